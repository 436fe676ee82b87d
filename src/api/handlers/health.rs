use crate::AppState;
use axum::{Json, extract::State, response::IntoResponse};
use serde::Serialize;
use std::path::Path;
use utoipa::ToSchema;

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub uploads_dir: String,
    pub temp_dir: String,
    pub version: String,
}

fn dir_status(path: &Path) -> &'static str {
    match std::fs::metadata(path) {
        Ok(meta) if meta.permissions().readonly() => "readonly",
        Ok(meta) if meta.is_dir() => "ok",
        Ok(_) => "not a directory",
        // created on first extraction
        Err(_) => "missing",
    }
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "System health status", body = HealthResponse)
    ),
    tag = "system"
)]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        uploads_dir: dir_status(&state.config.uploads_dir).to_string(),
        temp_dir: dir_status(&state.config.temp_dir).to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
