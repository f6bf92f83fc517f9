mod admin;
mod auth;
mod chat;
mod content;
mod courses;
mod dashboards;
mod enrollments;
mod gamification;
mod health;
mod progress;

use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::middleware::auth::{optional_auth, require_admin, require_auth};
use crate::middleware::csrf::{csrf_token_middleware, csrf_validation_middleware};
use crate::middleware::rate_limit::{api_rate_limit_middleware, auth_rate_limit_middleware};
use crate::response::json_error;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    let public = Router::new()
        .nest("/api/catalog", courses::catalog_router())
        .layer(middleware::from_fn_with_state(state.clone(), optional_auth));

    let protected = Router::new()
        .nest("/api/auth/me", auth::me_router())
        .nest("/api/courses", courses::router())
        .merge(content::router())
        .merge(progress::router())
        .nest("/api/enrollments", enrollments::router())
        .nest("/api/gamification", gamification::router())
        .nest("/api/chat", chat::router())
        .nest("/api/dashboard", dashboards::router())
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let admin = admin::router()
        .layer(middleware::from_fn(require_admin))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .nest("/health", health::router())
        .nest("/api/auth", auth::router())
        .route("/api/chat/ws", axum::routing::get(chat::websocket))
        .merge(public)
        .merge(protected)
        .nest("/api/admin", admin)
        .layer(middleware::from_fn(csrf_validation_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), csrf_token_middleware))
        .layer(middleware::from_fn(auth_rate_limit_middleware))
        .layer(middleware::from_fn(api_rate_limit_middleware))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .fallback(fallback_handler)
        .with_state(state)
}

async fn fallback_handler() -> Response {
    json_error(StatusCode::NOT_FOUND, "NOT_FOUND", "Endpoint not found").into_response()
}
