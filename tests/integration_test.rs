use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::json;

mod common;

use common::{get, json_body, post_json, send};

#[tokio::test]
async fn test_health_root_reports_degraded_without_database() {
    let response = send(get("/health")).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let body = json_body(response).await;
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["database"], "disconnected");
}

#[tokio::test]
async fn test_health_live() {
    let response = send(get("/health/live")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_health_info() {
    let response = send(get("/health/info")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["service"], "tutorhub-backend");
    assert_eq!(body["environment"], "test");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_health_ready_not_ready_without_database() {
    let response = send(get("/health/ready")).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_unauthorized_without_token() {
    let response = send(get("/api/auth/me")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let body = json_body(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_protected_routes_require_auth() {
    for uri in [
        "/api/enrollments",
        "/api/gamification/streak",
        "/api/chat/conversations",
        "/api/dashboard/student",
        "/api/courses/mine",
    ] {
        let response = send(get(uri)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{uri}");
    }
}

#[tokio::test]
async fn test_admin_routes_require_auth() {
    let response = send(get("/api/admin/users")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_invalid_token_without_database_is_unavailable() {
    let request = Request::builder()
        .uri("/api/auth/me")
        .header("authorization", "Bearer not-a-real-token")
        .body(Body::empty())
        .unwrap();
    let response = send(request).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_catalog_without_database_is_unavailable() {
    let response = send(get("/api/catalog")).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let body = json_body(response).await;
    assert_eq!(body["code"], "SERVICE_UNAVAILABLE");
}

#[tokio::test]
async fn test_register_validates_before_touching_database() {
    let response = send(post_json(
        "/api/auth/register",
        json!({ "email": "not-an-email", "username": "someone", "password": "Password123" }),
    ))
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = json_body(response).await;
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_register_rejects_admin_role() {
    let response = send(post_json(
        "/api/auth/register",
        json!({
            "email": "admin@example.com",
            "username": "sneaky",
            "password": "Password123",
            "role": "ADMIN"
        }),
    ))
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_login_without_database_is_unavailable() {
    let response = send(post_json(
        "/api/auth/login",
        json!({ "email": "student@example.com", "password": "Password123" }),
    ))
    .await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_cookie_mutation_without_csrf_is_forbidden() {
    let request = Request::builder()
        .method("POST")
        .uri("/api/enrollments")
        .header("cookie", "auth_token=abc")
        .header("content-type", "application/json")
        .body(Body::from(json!({ "courseId": "c1" }).to_string()))
        .unwrap();
    let response = send(request).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let body = json_body(response).await;
    assert_eq!(body["code"], "CSRF_TOKEN_MISSING");
}

#[tokio::test]
async fn test_responses_set_csrf_cookie() {
    let response = send(get("/health/live")).await;
    let cookies: Vec<_> = response
        .headers()
        .get_all("set-cookie")
        .iter()
        .filter_map(|value| value.to_str().ok())
        .collect();
    assert!(cookies.iter().any(|cookie| cookie.starts_with("csrf_token=")));
}

#[tokio::test]
async fn test_unknown_endpoint_returns_json_404() {
    let response = send(get("/api/does-not-exist")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body = json_body(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "NOT_FOUND");
}
