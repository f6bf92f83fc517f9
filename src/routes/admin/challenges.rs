use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Extension, Json, Router};

use crate::auth::AuthUser;
use crate::db::operations::gamification;
use crate::response::{created, ok, AppError};
use crate::services::challenge::{validate_input, ChallengeInput};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_challenges).post(create_challenge))
        .route("/:id", put(update_challenge).delete(delete_challenge))
}

async fn list_challenges(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    Ok(ok(gamification::list_challenges(&proxy, true).await?))
}

async fn create_challenge(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthUser>,
    Json(payload): Json<ChallengeInput>,
) -> Result<Response, AppError> {
    let draft = validate_input(payload)?;
    let proxy = state.require_db()?;
    let challenge = gamification::insert_challenge(&proxy, &admin.id, &draft).await?;
    tracing::info!(challenge_id = %challenge.id, admin = %admin.id, "challenge created");
    Ok(created(challenge))
}

async fn update_challenge(
    State(state): State<AppState>,
    Path(challenge_id): Path<String>,
    Json(payload): Json<ChallengeInput>,
) -> Result<impl IntoResponse, AppError> {
    let draft = validate_input(payload)?;
    let proxy = state.require_db()?;
    let challenge = gamification::replace_challenge(&proxy, &challenge_id, &draft)
        .await?
        .ok_or_else(|| AppError::not_found("Challenge not found"))?;
    Ok(ok(challenge))
}

async fn delete_challenge(
    State(state): State<AppState>,
    Path(challenge_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    if !gamification::delete_challenge(&proxy, &challenge_id).await? {
        return Err(AppError::not_found("Challenge not found"));
    }
    Ok(ok(serde_json::json!({ "deleted": true })))
}
