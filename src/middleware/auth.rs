use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::auth::{AuthError, AuthUser};
use crate::response::{json_error, AppError};
use crate::state::AppState;
use crate::types::Role;

pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let Some(token) = crate::auth::extract_token(req.headers()) else {
        return json_error(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "Missing authentication token")
            .into_response();
    };

    match authenticate(&state, &token).await {
        Ok(user) => {
            req.extensions_mut().insert(user);
            next.run(req).await
        }
        Err(err) => err.into_response(),
    }
}

pub async fn optional_auth(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    if let Some(token) = crate::auth::extract_token(req.headers()) {
        if let Ok(user) = authenticate(&state, &token).await {
            req.extensions_mut().insert(user);
        }
    }

    next.run(req).await
}

/// Runs after `require_auth`; rejects anyone who is not an admin.
pub async fn require_admin(req: Request<Body>, next: Next) -> Response {
    guard_roles(req, next, &[Role::Admin]).await
}

async fn guard_roles(req: Request<Body>, next: Next, roles: &[Role]) -> Response {
    let allowed = req
        .extensions()
        .get::<AuthUser>()
        .map(|user| user.has_any_role(roles));

    match allowed {
        Some(true) => next.run(req).await,
        Some(false) => AppError::forbidden("Insufficient permissions").into_response(),
        None => json_error(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "Authentication required")
            .into_response(),
    }
}

pub fn ensure_role(user: &AuthUser, roles: &[Role]) -> Result<(), AppError> {
    if user.has_any_role(roles) {
        Ok(())
    } else {
        Err(AppError::forbidden("Insufficient permissions"))
    }
}

pub async fn authenticate(state: &AppState, token: &str) -> Result<AuthUser, AppError> {
    let proxy = state.require_db()?;
    let cache = state.cache();

    crate::auth::verify_request_token(proxy.as_ref(), token, Some(&cache))
        .await
        .map_err(|err| match err {
            AuthError::AccountDisabled => AppError::forbidden("Account is disabled"),
            AuthError::Database(db_err) => {
                tracing::warn!(error = %db_err, "session lookup failed");
                AppError::unavailable()
            }
            AuthError::MissingSecret => {
                tracing::error!("JWT_SECRET is not configured");
                AppError::internal("JWT_SECRET is not configured")
            }
            _ => json_error(
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "Authentication failed, please sign in again",
            ),
        })
}
