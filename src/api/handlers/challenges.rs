use crate::AppState;
use crate::models::ChallengeStatus;
use axum::{Json, extract::State};

#[utoipa::path(
    get,
    path = "/api/challenges",
    responses(
        (status = 200, description = "Every challenge with its solve state", body = Vec<ChallengeStatus>)
    ),
    tag = "challenges"
)]
pub async fn list_challenges(State(state): State<AppState>) -> Json<Vec<ChallengeStatus>> {
    Json(state.scoreboard.snapshot())
}
