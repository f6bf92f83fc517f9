use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, put};
use axum::{Extension, Json, Router};
use serde::Deserialize;

use crate::auth::AuthUser;
use crate::cache::keys::session_key;
use crate::db::operations::users::{self, UserListFilter};
use crate::response::{ok, paginate, AppError, Page};
use crate::state::AppState;
use crate::types::Role;

const PAGE_DEFAULT: i64 = 20;
const PAGE_MAX: i64 = 100;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_users))
        .route("/:id/role", put(update_role))
        .route("/:id/status", put(update_status))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListUsersQuery {
    page: Option<i64>,
    page_size: Option<i64>,
    search: Option<String>,
    role: Option<Role>,
}

#[derive(Debug, Deserialize)]
struct UpdateRoleRequest {
    role: Role,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateStatusRequest {
    is_active: bool,
}

async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<ListUsersQuery>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    let (page, page_size, offset) = paginate(query.page, query.page_size, PAGE_DEFAULT, PAGE_MAX);
    let filter = UserListFilter {
        search: query
            .search
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
        role: query.role,
    };
    let (items, total) = users::list_users(&proxy, &filter, page_size, offset).await?;
    Ok(ok(Page::new(items, total, page, page_size)))
}

async fn update_role(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthUser>,
    Path(user_id): Path<String>,
    Json(payload): Json<UpdateRoleRequest>,
) -> Result<impl IntoResponse, AppError> {
    if user_id == admin.id && payload.role != Role::Admin {
        return Err(AppError::validation("Admins cannot demote themselves"));
    }
    let proxy = state.require_db()?;
    let profile = users::update_role(&proxy, &user_id, payload.role)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;

    // cached sessions carry the old role
    revoke_cached_sessions(&state, &user_id).await?;
    tracing::info!(user_id = %user_id, role = %payload.role, admin = %admin.id, "user role changed");
    Ok(ok(profile))
}

async fn update_status(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthUser>,
    Path(user_id): Path<String>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<impl IntoResponse, AppError> {
    if user_id == admin.id && !payload.is_active {
        return Err(AppError::validation("Admins cannot deactivate themselves"));
    }
    let proxy = state.require_db()?;
    let profile = users::set_active(&proxy, &user_id, payload.is_active)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;

    if !payload.is_active {
        revoke_cached_sessions(&state, &user_id).await?;
    }
    tracing::info!(
        user_id = %user_id,
        is_active = payload.is_active,
        admin = %admin.id,
        "user status changed"
    );
    Ok(ok(profile))
}

async fn revoke_cached_sessions(state: &AppState, user_id: &str) -> Result<(), AppError> {
    let proxy = state.require_db()?;
    let revoked = users::revoke_sessions(&proxy, user_id, None).await?;
    let cache = state.cache();
    for token_hash in &revoked {
        cache.delete(&session_key(token_hash)).await;
    }
    tracing::debug!(user_id, revoked = revoked.len(), "sessions revoked");
    Ok(())
}
