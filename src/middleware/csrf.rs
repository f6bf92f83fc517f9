use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderValue, Method, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use uuid::Uuid;

use crate::auth::{get_cookie, has_bearer_token, AUTH_COOKIE_NAME};
use crate::response::json_error;
use crate::state::AppState;

const CSRF_COOKIE_NAME: &str = "csrf_token";
const CSRF_HEADER_NAME: &str = "x-csrf-token";

const EXEMPT_PREFIXES: &[&str] = &[
    "/api/auth/login",
    "/api/auth/register",
    "/api/auth/logout",
    "/api/chat/ws",
];

pub async fn csrf_token_middleware(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let has_token = get_cookie(req.headers(), CSRF_COOKIE_NAME).is_some();
    let mut response = next.run(req).await;

    if has_token {
        return response;
    }

    let token = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());
    let cookie = build_csrf_cookie_header(&token, state.config().is_production());
    if let Ok(header_value) = HeaderValue::from_str(&cookie) {
        response
            .headers_mut()
            .append(header::SET_COOKIE, header_value);
    }

    response
}

/// Double-submit check for cookie-authenticated mutations. Requests carrying a
/// bearer token cannot be forged cross-site and skip the check.
pub async fn csrf_validation_middleware(req: Request<Body>, next: Next) -> Response {
    if !requires_validation(&req) {
        return next.run(req).await;
    }

    let cookie_token = get_cookie(req.headers(), CSRF_COOKIE_NAME);
    let header_token = req
        .headers()
        .get(CSRF_HEADER_NAME)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string());

    let (Some(cookie_token), Some(header_token)) = (cookie_token, header_token) else {
        return json_error(
            StatusCode::FORBIDDEN,
            "CSRF_TOKEN_MISSING",
            "CSRF token validation failed",
        )
        .into_response();
    };

    if !secure_eq(cookie_token.as_bytes(), header_token.as_bytes()) {
        return json_error(
            StatusCode::FORBIDDEN,
            "CSRF_TOKEN_MISMATCH",
            "CSRF token validation failed",
        )
        .into_response();
    }

    next.run(req).await
}

fn requires_validation(req: &Request<Body>) -> bool {
    let mutating = matches!(
        *req.method(),
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    );
    if !mutating {
        return false;
    }

    let path = req.uri().path();
    if !path.starts_with("/api") || EXEMPT_PREFIXES.iter().any(|prefix| path.starts_with(prefix)) {
        return false;
    }

    if has_bearer_token(req.headers()) {
        return false;
    }

    get_cookie(req.headers(), AUTH_COOKIE_NAME).is_some()
}

fn build_csrf_cookie_header(token: &str, production: bool) -> String {
    let mut parts = vec![
        format!("{CSRF_COOKIE_NAME}={token}"),
        "Path=/".to_string(),
        "Max-Age=86400".to_string(),
    ];

    if production {
        parts.push("SameSite=Strict".to_string());
        parts.push("Secure".to_string());
    } else {
        parts.push("SameSite=Lax".to_string());
    }

    parts.join("; ")
}

fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0u8, |diff, (left, right)| diff | (left ^ right))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(method: Method, path: &str, headers: &[(&str, &str)]) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(path);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn only_cookie_authenticated_mutations_are_checked() {
        let cookie = ("cookie", "auth_token=abc");
        assert!(requires_validation(&request(Method::POST, "/api/enrollments", &[cookie])));
        assert!(!requires_validation(&request(Method::GET, "/api/enrollments", &[cookie])));
        assert!(!requires_validation(&request(Method::POST, "/api/enrollments", &[])));
        assert!(!requires_validation(&request(
            Method::POST,
            "/api/enrollments",
            &[cookie, ("authorization", "Bearer t")]
        )));
        assert!(!requires_validation(&request(Method::POST, "/api/auth/login", &[cookie])));
    }

    #[test]
    fn secure_eq_compares_full_length() {
        assert!(secure_eq(b"token", b"token"));
        assert!(!secure_eq(b"token", b"tokem"));
        assert!(!secure_eq(b"token", b"token2"));
    }

    #[test]
    fn production_cookie_is_strict_and_secure() {
        let cookie = build_csrf_cookie_header("t", true);
        assert!(cookie.contains("SameSite=Strict"));
        assert!(cookie.ends_with("Secure"));
        assert!(build_csrf_cookie_header("t", false).contains("SameSite=Lax"));
    }
}
