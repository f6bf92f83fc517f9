use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, OnceLock};

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{header::RETRY_AFTER, HeaderName, HeaderValue, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tokio::sync::Mutex;

use crate::config::{env_bool, env_non_empty};
use crate::response::json_error;

const RATE_LIMIT_LIMIT: HeaderName = HeaderName::from_static("ratelimit-limit");
const RATE_LIMIT_REMAINING: HeaderName = HeaderName::from_static("ratelimit-remaining");
const RATE_LIMIT_RESET: HeaderName = HeaderName::from_static("ratelimit-reset");

const DEFAULT_API_WINDOW_MS: u64 = 15 * 60 * 1000;
const DEFAULT_API_MAX: u64 = 600;

const AUTH_WINDOW_MS: u64 = 5 * 60 * 1000;
const AUTH_MAX: u64 = 30;

static API_LIMITER: OnceLock<Arc<RateLimiter>> = OnceLock::new();
static AUTH_LIMITER: OnceLock<Arc<RateLimiter>> = OnceLock::new();

pub async fn api_rate_limit_middleware(req: Request<Body>, next: Next) -> Response {
    let path = req.uri().path();
    if !matches_api_prefix(path) || should_skip(&req) || path.starts_with("/api/chat/ws") {
        return next.run(req).await;
    }

    let limiter = API_LIMITER.get_or_init(|| Arc::new(RateLimiter::new(api_config())));
    enforce_rate_limit(
        limiter,
        Scope::Api,
        req,
        next,
        "TOO_MANY_REQUESTS",
        "Too many requests, please try again later",
    )
    .await
}

pub async fn auth_rate_limit_middleware(req: Request<Body>, next: Next) -> Response {
    if should_skip(&req) || !req.uri().path().starts_with("/api/auth") {
        return next.run(req).await;
    }

    let limiter = AUTH_LIMITER.get_or_init(|| {
        Arc::new(RateLimiter::new(RateLimitConfig {
            window_ms: AUTH_WINDOW_MS,
            max: AUTH_MAX,
        }))
    });
    enforce_rate_limit(
        limiter,
        Scope::Auth,
        req,
        next,
        "TOO_MANY_AUTH_REQUESTS",
        "Too many authentication attempts, please try again later",
    )
    .await
}

async fn enforce_rate_limit(
    limiter: &Arc<RateLimiter>,
    scope: Scope,
    req: Request<Body>,
    next: Next,
    code: &'static str,
    message: &'static str,
) -> Response {
    let ip = extract_client_ip(&req).unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    let check = limiter.check(Key { scope, ip }, now_ms()).await;

    if !check.allowed {
        tracing::debug!(%ip, ?scope, "rate limit exceeded");
        let mut res = json_error(StatusCode::TOO_MANY_REQUESTS, code, message).into_response();
        apply_rate_limit_headers(&mut res, check);
        return res;
    }

    let mut res = next.run(req).await;
    apply_rate_limit_headers(&mut res, check);
    res
}

fn apply_rate_limit_headers(res: &mut Response, check: RateLimitCheck) {
    if let Ok(value) = HeaderValue::from_str(&check.limit.to_string()) {
        res.headers_mut().insert(RATE_LIMIT_LIMIT, value);
    }
    if let Ok(value) = HeaderValue::from_str(&check.remaining.to_string()) {
        res.headers_mut().insert(RATE_LIMIT_REMAINING, value);
    }
    if let Ok(value) = HeaderValue::from_str(&check.reset_after_seconds.to_string()) {
        res.headers_mut().insert(RATE_LIMIT_RESET, value.clone());
        if check.remaining == 0 {
            res.headers_mut().insert(RETRY_AFTER, value);
        }
    }
}

fn matches_api_prefix(path: &str) -> bool {
    path == "/api" || path.starts_with("/api/")
}

fn should_skip(req: &Request<Body>) -> bool {
    is_test_env() || is_loopback_request(req)
}

fn api_config() -> RateLimitConfig {
    RateLimitConfig {
        window_ms: env_u64("RATE_LIMIT_WINDOW_MS").unwrap_or(DEFAULT_API_WINDOW_MS),
        max: env_u64("RATE_LIMIT_MAX").unwrap_or(DEFAULT_API_MAX),
    }
}

fn env_u64(key: &str) -> Option<u64> {
    env_non_empty(key)?.parse::<u64>().ok()
}

fn is_test_env() -> bool {
    matches!(env_non_empty("APP_ENV").as_deref(), Some("test"))
}

fn is_loopback_request(req: &Request<Body>) -> bool {
    extract_client_ip(req)
        .map(|ip| ip.is_loopback())
        .unwrap_or(false)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Scope {
    Api,
    Auth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Key {
    scope: Scope,
    ip: IpAddr,
}

#[derive(Debug, Clone, Copy)]
struct RateLimitConfig {
    window_ms: u64,
    max: u64,
}

#[derive(Debug)]
struct RateLimiterState {
    entries: HashMap<Key, Entry>,
    last_cleanup_ms: u64,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    window_start_ms: u64,
    hits: u64,
}

#[derive(Debug, Clone, Copy)]
struct RateLimitCheck {
    allowed: bool,
    limit: u64,
    remaining: u64,
    reset_after_seconds: u64,
}

#[derive(Debug)]
struct RateLimiter {
    config: RateLimitConfig,
    state: Mutex<RateLimiterState>,
}

impl RateLimiter {
    fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            state: Mutex::new(RateLimiterState {
                entries: HashMap::new(),
                last_cleanup_ms: now_ms(),
            }),
        }
    }

    async fn check(&self, key: Key, now_ms: u64) -> RateLimitCheck {
        let window_ms = self.config.window_ms;
        let mut state = self.state.lock().await;

        if now_ms.saturating_sub(state.last_cleanup_ms) >= window_ms {
            state
                .entries
                .retain(|_, entry| now_ms.saturating_sub(entry.window_start_ms) < window_ms);
            state.last_cleanup_ms = now_ms;
        }

        let entry = state.entries.entry(key).or_insert(Entry {
            window_start_ms: now_ms,
            hits: 0,
        });

        if now_ms.saturating_sub(entry.window_start_ms) >= window_ms {
            entry.window_start_ms = now_ms;
            entry.hits = 0;
        }

        entry.hits = entry.hits.saturating_add(1);
        let allowed = entry.hits <= self.config.max;
        let remaining = self.config.max.saturating_sub(entry.hits);
        let reset_after_ms =
            window_ms.saturating_sub(now_ms.saturating_sub(entry.window_start_ms));

        RateLimitCheck {
            allowed,
            limit: self.config.max,
            remaining: if allowed { remaining } else { 0 },
            reset_after_seconds: reset_after_ms.div_ceil(1000),
        }
    }
}

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

fn extract_client_ip(req: &Request<Body>) -> Option<IpAddr> {
    if env_bool("TRUST_PROXY").unwrap_or(false) {
        if let Some(ip) = extract_x_forwarded_for(req) {
            return Some(ip);
        }
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

fn extract_x_forwarded_for(req: &Request<Body>) -> Option<IpAddr> {
    let raw = req
        .headers()
        .get(HeaderName::from_static("x-forwarded-for"))?
        .to_str()
        .ok()?;
    raw.split(',').next()?.trim().parse::<IpAddr>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(last_octet: u8) -> Key {
        Key {
            scope: Scope::Api,
            ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, last_octet)),
        }
    }

    #[tokio::test]
    async fn blocks_after_max_hits_within_window() {
        let limiter = RateLimiter::new(RateLimitConfig {
            window_ms: 1_000,
            max: 2,
        });
        let t0 = 1_000_000;

        let first = limiter.check(key(1), t0).await;
        assert!(first.allowed);
        assert_eq!(first.remaining, 1);
        assert!(limiter.check(key(1), t0 + 10).await.allowed);

        let blocked = limiter.check(key(1), t0 + 20).await;
        assert!(!blocked.allowed);
        assert_eq!(blocked.remaining, 0);
        assert_eq!(blocked.reset_after_seconds, 1);

        // other clients are unaffected
        assert!(limiter.check(key(2), t0 + 20).await.allowed);
    }

    #[tokio::test]
    async fn window_resets_after_expiry() {
        let limiter = RateLimiter::new(RateLimitConfig {
            window_ms: 1_000,
            max: 1,
        });
        let t0 = 5_000_000;
        assert!(limiter.check(key(3), t0).await.allowed);
        assert!(!limiter.check(key(3), t0 + 500).await.allowed);
        assert!(limiter.check(key(3), t0 + 1_000).await.allowed);
    }
}
