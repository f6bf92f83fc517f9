pub mod auth;
pub mod cache;
pub mod config;
pub mod db;
pub mod logging;
pub mod middleware;
pub mod realtime;
pub mod response;
pub mod routes;
pub mod seed;
pub mod services;
pub mod state;
pub mod types;
pub mod workers;

use crate::state::AppState;

/// Full application router (middleware stack included) for the given state.
pub fn create_app(state: AppState) -> axum::Router {
    routes::router(state)
}
