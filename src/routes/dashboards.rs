use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Extension, Router};

use crate::auth::AuthUser;
use crate::middleware::auth::ensure_role;
use crate::response::{ok, AppError};
use crate::services::dashboard;
use crate::state::AppState;
use crate::types::Role;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/student", get(student))
        .route("/tutor", get(tutor))
}

async fn student(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    let view = dashboard::student_dashboard(&proxy, &state.cache(), &state.realtime(), &user).await?;
    Ok(ok(view))
}

async fn tutor(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, AppError> {
    ensure_role(&user, &[Role::Tutor])?;
    let proxy = state.require_db()?;
    Ok(ok(dashboard::tutor_dashboard(&proxy, &user).await?))
}
