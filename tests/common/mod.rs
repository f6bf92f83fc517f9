use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use tower::ServiceExt;

use tutorhub_backend::config::{AppEnv, Config};
use tutorhub_backend::state::AppState;

/// App without a database or redis; DB-backed handlers answer 503.
pub fn create_test_app() -> Router {
    std::env::set_var("APP_ENV", "test");

    let config = Config {
        app_env: AppEnv::Test,
        ..Config::default()
    };
    tutorhub_backend::create_app(AppState::new(config, None, None))
}

pub async fn send(request: Request<Body>) -> Response<Body> {
    create_test_app().oneshot(request).await.unwrap()
}

pub async fn json_body(response: Response<Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}
