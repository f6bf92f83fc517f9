use axum::http::{header, HeaderMap, HeaderValue};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use thiserror::Error;

use crate::cache::keys::{session_key, SESSION_TTL};
use crate::cache::ResponseCache;
use crate::db::DatabaseProxy;
use crate::types::Role;

pub const AUTH_COOKIE_NAME: &str = "auth_token";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub id: String,
    pub email: String,
    pub username: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn has_any_role(&self, roles: &[Role]) -> bool {
        roles.contains(&self.role)
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing token")]
    MissingToken,
    #[error("invalid token")]
    InvalidToken,
    #[error("account disabled")]
    AccountDisabled,
    #[error("missing JWT_SECRET")]
    MissingSecret,
    #[error("invalid JWT_EXPIRES_IN")]
    InvalidExpiresIn,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    if let Some(auth_header) = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
    {
        if let Some(token) = auth_header.strip_prefix("Bearer ") {
            let token = token.trim();
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }

    get_cookie(headers, AUTH_COOKIE_NAME)
}

pub fn has_bearer_token(headers: &HeaderMap) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.starts_with("Bearer "))
        .unwrap_or(false)
}

pub async fn verify_request_token(
    proxy: &DatabaseProxy,
    token: &str,
    cache: Option<&ResponseCache>,
) -> Result<AuthUser, AuthError> {
    let secret = jwt_secret()?;
    let claims = verify_jwt_hs256(token, &secret, Utc::now().timestamp())?;
    let token_hash = hash_token(token);

    if let Some(cache) = cache {
        if let Some(user) = cache.get::<AuthUser>(&session_key(&token_hash)).await {
            if user.id == claims.user_id {
                return Ok(user);
            }
        }
    }

    let user = verify_with_postgres(proxy.pool(), &claims.user_id, &token_hash).await?;

    if let Some(cache) = cache {
        cache.set(&session_key(&token_hash), &user, SESSION_TTL).await;
    }

    Ok(user)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JwtClaims {
    pub user_id: String,
    pub role: Option<String>,
}

pub fn verify_jwt_hs256(token: &str, secret: &str, now: i64) -> Result<JwtClaims, AuthError> {
    let mut parts = token.split('.');
    let header_b64 = parts.next().ok_or(AuthError::InvalidToken)?;
    let payload_b64 = parts.next().ok_or(AuthError::InvalidToken)?;
    let sig_b64 = parts.next().ok_or(AuthError::InvalidToken)?;
    if parts.next().is_some() {
        return Err(AuthError::InvalidToken);
    }

    let header_bytes = URL_SAFE_NO_PAD
        .decode(header_b64.as_bytes())
        .map_err(|_| AuthError::InvalidToken)?;
    let payload_bytes = URL_SAFE_NO_PAD
        .decode(payload_b64.as_bytes())
        .map_err(|_| AuthError::InvalidToken)?;
    let sig_bytes = URL_SAFE_NO_PAD
        .decode(sig_b64.as_bytes())
        .map_err(|_| AuthError::InvalidToken)?;

    let header_json: serde_json::Value =
        serde_json::from_slice(&header_bytes).map_err(|_| AuthError::InvalidToken)?;
    let alg = header_json
        .get("alg")
        .and_then(|value| value.as_str())
        .ok_or(AuthError::InvalidToken)?;
    if alg != "HS256" {
        return Err(AuthError::InvalidToken);
    }

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| AuthError::InvalidToken)?;
    mac.update(format!("{header_b64}.{payload_b64}").as_bytes());
    mac.verify_slice(&sig_bytes)
        .map_err(|_| AuthError::InvalidToken)?;

    let payload_json: serde_json::Value =
        serde_json::from_slice(&payload_bytes).map_err(|_| AuthError::InvalidToken)?;

    validate_registered_claims(&payload_json, now)?;

    let user_id = payload_json
        .get("userId")
        .and_then(|value| value.as_str())
        .ok_or(AuthError::InvalidToken)?
        .to_string();
    let role = payload_json
        .get("role")
        .and_then(|value| value.as_str())
        .map(|value| value.to_string());

    Ok(JwtClaims { user_id, role })
}

fn validate_registered_claims(payload: &serde_json::Value, now: i64) -> Result<(), AuthError> {
    if let Some(exp) = payload.get("exp").and_then(|value| value.as_i64()) {
        if now >= exp {
            return Err(AuthError::InvalidToken);
        }
    }

    if let Some(nbf) = payload.get("nbf").and_then(|value| value.as_i64()) {
        if now < nbf {
            return Err(AuthError::InvalidToken);
        }
    }

    Ok(())
}

pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

fn jwt_secret() -> Result<String, AuthError> {
    std::env::var("JWT_SECRET")
        .ok()
        .filter(|value| !value.is_empty())
        .ok_or(AuthError::MissingSecret)
}

pub fn sign_jwt_for_user(user_id: &str, role: Role) -> Result<(String, DateTime<Utc>), AuthError> {
    let secret = jwt_secret()?;
    let expires_in_ms = match std::env::var("JWT_EXPIRES_IN") {
        Ok(value) => parse_expires_in_ms(&value).unwrap_or_else(|_| {
            tracing::warn!(value = %value, "invalid JWT_EXPIRES_IN, using default");
            DEFAULT_EXPIRES_IN_MS
        }),
        Err(_) => DEFAULT_EXPIRES_IN_MS,
    };
    sign_jwt(user_id, role, &secret, Utc::now(), expires_in_ms)
}

pub fn sign_jwt(
    user_id: &str,
    role: Role,
    secret: &str,
    issued_at: DateTime<Utc>,
    expires_in_ms: i64,
) -> Result<(String, DateTime<Utc>), AuthError> {
    let exp = issued_at
        .checked_add_signed(chrono::Duration::milliseconds(expires_in_ms))
        .ok_or(AuthError::InvalidExpiresIn)?;

    let header_json = serde_json::json!({
        "alg": "HS256",
        "typ": "JWT",
    });

    let payload_json = serde_json::json!({
        "userId": user_id,
        "role": role.as_str(),
        "iat": issued_at.timestamp(),
        "exp": exp.timestamp(),
        // keeps tokens issued within the same second distinct
        "jti": uuid::Uuid::new_v4().simple().to_string(),
    });

    let header_b64 = URL_SAFE_NO_PAD
        .encode(serde_json::to_vec(&header_json).map_err(|_| AuthError::InvalidToken)?);
    let payload_b64 = URL_SAFE_NO_PAD
        .encode(serde_json::to_vec(&payload_json).map_err(|_| AuthError::InvalidToken)?);
    let signing_input = format!("{header_b64}.{payload_b64}");

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| AuthError::InvalidToken)?;
    mac.update(signing_input.as_bytes());
    let sig_b64 = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

    Ok((format!("{signing_input}.{sig_b64}"), exp))
}

const DEFAULT_EXPIRES_IN_MS: i64 = 24 * 60 * 60 * 1000;

pub fn parse_expires_in_ms(value: &str) -> Result<i64, AuthError> {
    let trimmed = value.trim();
    if trimmed.len() < 2 {
        return Err(AuthError::InvalidExpiresIn);
    }

    let (digits, unit) = trimmed.split_at(trimmed.len() - 1);

    let amount: i64 = digits.parse().map_err(|_| AuthError::InvalidExpiresIn)?;
    if amount <= 0 {
        return Err(AuthError::InvalidExpiresIn);
    }

    let unit_ms: i64 = match unit {
        "s" => 1000,
        "m" => 60 * 1000,
        "h" => 60 * 60 * 1000,
        "d" => 24 * 60 * 60 * 1000,
        _ => return Err(AuthError::InvalidExpiresIn),
    };
    amount.checked_mul(unit_ms).ok_or(AuthError::InvalidExpiresIn)
}

async fn verify_with_postgres(
    pool: &PgPool,
    expected_user_id: &str,
    token_hash: &str,
) -> Result<AuthUser, AuthError> {
    let row: Option<SessionUserRow> = sqlx::query_as(
        r#"
        SELECT
          u."id", u."email", u."username", u."role", u."isActive", u."createdAt",
          s."userId" AS "sessionUserId", s."expiresAt"
        FROM "sessions" s
        JOIN "users" u ON u."id" = s."userId"
        WHERE s."token" = $1
        "#,
    )
    .bind(token_hash)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Err(AuthError::InvalidToken);
    };

    if row.session_user_id != expected_user_id || row.expires_at < Utc::now() {
        return Err(AuthError::InvalidToken);
    }
    if !row.is_active {
        return Err(AuthError::AccountDisabled);
    }

    let role = row.role.parse::<Role>().map_err(|_| AuthError::InvalidToken)?;

    Ok(AuthUser {
        id: row.id,
        email: row.email,
        username: row.username,
        role,
        created_at: row.created_at,
    })
}

#[derive(sqlx::FromRow)]
#[sqlx(rename_all = "camelCase")]
struct SessionUserRow {
    id: String,
    email: String,
    username: String,
    role: String,
    is_active: bool,
    created_at: DateTime<Utc>,
    session_user_id: String,
    expires_at: DateTime<Utc>,
}

pub fn build_auth_cookie(token: &str, expires_at: DateTime<Utc>, secure: bool) -> Option<HeaderValue> {
    let max_age = (expires_at - Utc::now()).num_seconds().max(0);
    let mut cookie =
        format!("{AUTH_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}");
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie).ok()
}

pub fn clear_auth_cookie() -> Option<HeaderValue> {
    HeaderValue::from_str(&format!(
        "{AUTH_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0"
    ))
    .ok()
}

pub fn get_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;
    raw.split(';').find_map(|part| {
        let (key, value) = part.trim().split_once('=')?;
        (key == name && !value.is_empty()).then(|| value.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "unit-test-secret";

    #[test]
    fn signed_token_verifies_and_carries_claims() {
        let issued = Utc::now();
        let (token, exp) = sign_jwt("user-1", Role::Tutor, SECRET, issued, 60_000).unwrap();
        assert!(exp > issued);

        let claims = verify_jwt_hs256(&token, SECRET, issued.timestamp()).unwrap();
        assert_eq!(claims.user_id, "user-1");
        assert_eq!(claims.role.as_deref(), Some("TUTOR"));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let (token, _) = sign_jwt("user-1", Role::Student, SECRET, Utc::now(), 60_000).unwrap();
        assert!(matches!(
            verify_jwt_hs256(&token, "other", Utc::now().timestamp()),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn expired_token_is_rejected() {
        let issued = Utc::now() - chrono::Duration::hours(2);
        let (token, exp) = sign_jwt("user-1", Role::Student, SECRET, issued, 1_000).unwrap();
        assert!(verify_jwt_hs256(&token, SECRET, exp.timestamp()).is_err());
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let (token, _) = sign_jwt("user-1", Role::Student, SECRET, Utc::now(), 60_000).unwrap();
        let mut parts: Vec<&str> = token.split('.').collect();
        let forged = URL_SAFE_NO_PAD.encode(br#"{"userId":"admin","role":"ADMIN"}"#);
        parts[1] = &forged;
        let forged_token = parts.join(".");
        assert!(verify_jwt_hs256(&forged_token, SECRET, Utc::now().timestamp()).is_err());
    }

    #[test]
    fn parses_expires_in_units() {
        assert_eq!(parse_expires_in_ms("30s").unwrap(), 30_000);
        assert_eq!(parse_expires_in_ms("15m").unwrap(), 900_000);
        assert_eq!(parse_expires_in_ms("24h").unwrap(), 86_400_000);
        assert_eq!(parse_expires_in_ms("7d").unwrap(), 604_800_000);
        assert!(parse_expires_in_ms("0h").is_err());
        assert!(parse_expires_in_ms("h").is_err());
        assert!(parse_expires_in_ms("10w").is_err());
        assert!(parse_expires_in_ms(&format!("{}d", i64::MAX)).is_err());
        assert!(parse_expires_in_ms("9223372036854776s").is_err());
    }

    #[test]
    fn extracts_bearer_before_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("theme=dark; auth_token=cookie-token"));
        assert_eq!(extract_token(&headers).as_deref(), Some("cookie-token"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer header-token"));
        assert_eq!(extract_token(&headers).as_deref(), Some("header-token"));
    }

    #[test]
    fn token_hash_is_stable_hex() {
        let hash = hash_token("abc");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hash_token("abc"));
        assert_ne!(hash, hash_token("abd"));
    }
}
