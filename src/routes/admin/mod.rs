use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;

use crate::response::{ok, AppError};
use crate::services::dashboard;
use crate::state::AppState;

mod challenges;
mod enrollments;
mod users;

/// Mounted under `/api/admin` behind `require_auth` + `require_admin`.
pub fn router() -> Router<AppState> {
    Router::new()
        .nest("/users", users::router())
        .nest("/enrollments", enrollments::router())
        .nest("/challenges", challenges::router())
        .route("/analytics", get(analytics))
}

async fn analytics(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    Ok(ok(dashboard::admin_analytics(&proxy, &state.cache()).await?))
}
