pub mod api;
pub mod config;
pub mod models;
pub mod services;
pub mod utils;

use crate::config::UploadConfig;
use crate::services::challenges::Scoreboard;
use crate::services::metrics::UploadMetrics;
use axum::{
    Router,
    body::Body,
    extract::DefaultBodyLimit,
    http::{Request, Response},
    middleware::from_fn,
    routing::{get, post},
};
use prometheus::Registry;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{Span, info};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Room for multipart boundaries and headers on top of the file itself
const MULTIPART_OVERHEAD: usize = 64 * 1024;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::upload::upload_file,
        api::handlers::challenges::list_challenges,
        api::handlers::metrics::metrics,
        api::handlers::health::health_check,
    ),
    components(
        schemas(
            models::ChallengeStatus,
            api::handlers::health::HealthResponse,
        )
    ),
    tags(
        (name = "complaints", description = "Complaint file upload"),
        (name = "challenges", description = "Challenge scoreboard"),
        (name = "system", description = "Health and metrics")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub config: UploadConfig,
    pub scoreboard: Arc<Scoreboard>,
    pub metrics: Arc<UploadMetrics>,
    pub registry: Registry,
}

impl AppState {
    pub fn new(config: UploadConfig) -> Result<Self, prometheus::Error> {
        let scoreboard = Arc::new(Scoreboard::new(
            config.safety_mode,
            config.runtime_env.clone(),
        ));
        let registry = Registry::new();
        let metrics = Arc::new(UploadMetrics::new(&registry)?);
        Ok(Self {
            config,
            scoreboard,
            metrics,
            registry,
        })
    }
}

/// Request span carrying the request id assigned by the request id middleware
pub fn make_request_span<B>(request: &Request<B>) -> Span {
    let request_id = request
        .headers()
        .get(api::middleware::request_id::REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");
    tracing::info_span!(
        "http_request",
        method = %request.method(),
        uri = %request.uri(),
        request_id = %request_id,
    )
}

pub fn create_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(api::handlers::health::health_check))
        .route("/metrics", get(api::handlers::metrics::metrics))
        .route(
            "/api/challenges",
            get(api::handlers::challenges::list_challenges),
        )
        .route(
            "/file-upload",
            post(api::handlers::upload::upload_file).layer(DefaultBodyLimit::max(
                state.config.max_upload_size + MULTIPART_OVERHEAD,
            )),
        )
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(make_request_span::<Body>)
                .on_request(|request: &Request<_>, _span: &Span| {
                    info!("📥 {} {}", request.method(), request.uri());
                })
                .on_response(|response: &Response<_>, latency: Duration, _span: &Span| {
                    info!(
                        "📤 Finished in {:?} with status {}",
                        latency,
                        response.status()
                    );
                }),
        )
        // outside the trace layer so the span sees the assigned id
        .layer(from_fn(api::middleware::request_id::request_id_middleware))
        .layer(cors)
        .with_state(state)
}
