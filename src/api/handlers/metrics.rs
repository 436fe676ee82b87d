use crate::AppState;
use crate::api::error::AppError;
use axum::{extract::State, http::header, response::IntoResponse};
use prometheus::{Encoder, TextEncoder};

#[utoipa::path(
    get,
    path = "/metrics",
    responses(
        (status = 200, description = "Upload counters in Prometheus text format", body = String)
    ),
    tag = "system"
)]
pub async fn metrics(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&state.registry.gather(), &mut buffer)?;

    Ok((
        [(header::CONTENT_TYPE, encoder.format_type().to_string())],
        buffer,
    ))
}
