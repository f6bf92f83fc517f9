use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};

use crate::auth::{
    build_auth_cookie, clear_auth_cookie, extract_token, hash_token, sign_jwt_for_user, AuthUser,
};
use crate::cache::keys::session_key;
use crate::db::operations::users::{self, NewUser, UserProfile};
use crate::response::{created, json_error, ok, AppError};
use crate::services::validation::{
    is_http_url, normalize_email, validate_password, validate_username,
};
use crate::state::AppState;
use crate::types::Role;

const BCRYPT_COST: u32 = 10;
const BIO_MAX: usize = 1000;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/logout", post(logout))
}

pub fn me_router() -> Router<AppState> {
    Router::new()
        .route("/", get(me).put(update_me))
        .route("/password", put(update_password))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterRequest {
    email: String,
    username: String,
    password: String,
    #[serde(default)]
    role: Option<Role>,
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateProfileRequest {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    bio: Option<String>,
    #[serde(default)]
    avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdatePasswordRequest {
    old_password: String,
    new_password: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AuthData {
    user: UserProfile,
    token: String,
}

async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<Response, AppError> {
    let email = normalize_email(&payload.email)
        .ok_or_else(|| AppError::validation("Invalid email address"))?;
    let username = validate_username(&payload.username).map_err(AppError::validation)?;
    validate_password(&payload.password).map_err(AppError::validation)?;

    let role = payload.role.unwrap_or(Role::Student);
    if role == Role::Admin {
        return Err(AppError::forbidden("Admin accounts cannot be self-registered"));
    }

    let proxy = state.require_db()?;
    if users::email_exists(&proxy, &email).await? {
        return Err(AppError::conflict("Email is already registered"));
    }

    let password_hash = bcrypt::hash(&payload.password, BCRYPT_COST)
        .map_err(|err| AppError::internal(format!("password hash failed: {err}")))?;

    let user = users::insert_user(
        &proxy,
        NewUser {
            email: &email,
            username: &username,
            password_hash: &password_hash,
            role,
        },
    )
    .await?;

    tracing::info!(user_id = %user.id, role = %user.role, "user registered");
    let (token, cookie) = start_session(&state, &user).await?;

    let mut response = created(AuthData { user, token });
    if let Some(cookie) = cookie {
        response.headers_mut().insert(header::SET_COOKIE, cookie);
    }
    Ok(response)
}

async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Response, AppError> {
    let email = normalize_email(&payload.email)
        .ok_or_else(|| AppError::validation("Invalid email address"))?;
    if payload.password.is_empty() {
        return Err(AppError::validation("Password is required"));
    }

    let proxy = state.require_db()?;
    let invalid = || AppError::unauthorized("Invalid email or password");

    let credentials = users::find_credentials_by_email(&proxy, &email)
        .await?
        .ok_or_else(invalid)?;
    if !bcrypt::verify(&payload.password, &credentials.password_hash).unwrap_or(false) {
        return Err(invalid());
    }
    if !credentials.is_active {
        return Err(json_error(StatusCode::FORBIDDEN, "ACCOUNT_DISABLED", "Account is disabled"));
    }

    let user = users::find_profile(&proxy, &credentials.id)
        .await?
        .ok_or_else(invalid)?;
    let (token, cookie) = start_session(&state, &user).await?;
    users::touch_last_login(&proxy, &user.id).await?;

    let mut response = ok(AuthData { user, token }).into_response();
    if let Some(cookie) = cookie {
        response.headers_mut().insert(header::SET_COOKIE, cookie);
    }
    Ok(response)
}

async fn start_session(
    state: &AppState,
    user: &UserProfile,
) -> Result<(String, Option<axum::http::HeaderValue>), AppError> {
    let proxy = state.require_db()?;
    let (token, expires_at) = sign_jwt_for_user(&user.id, user.role).map_err(|err| {
        tracing::error!(error = %err, "jwt sign failed");
        AppError::internal("Failed to issue token")
    })?;

    users::insert_session(&proxy, &user.id, &hash_token(&token), expires_at).await?;
    let cookie = build_auth_cookie(&token, expires_at, state.config().is_production());
    Ok((token, cookie))
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let (Some(token), Some(proxy)) = (extract_token(&headers), state.db_proxy()) {
        let token_hash = hash_token(&token);
        if let Err(err) = users::delete_session(&proxy, &token_hash).await {
            tracing::warn!(error = %err, "logout session delete failed");
        }
        state.cache().delete(&session_key(&token_hash)).await;
    }

    let mut response = ok(serde_json::json!({ "loggedOut": true })).into_response();
    if let Some(cookie) = clear_auth_cookie() {
        response.headers_mut().insert(header::SET_COOKIE, cookie);
    }
    response
}

async fn me(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    let profile = users::find_profile(&proxy, &user.id)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;
    Ok(ok(profile))
}

async fn update_me(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    headers: HeaderMap,
    Json(payload): Json<UpdateProfileRequest>,
) -> Result<impl IntoResponse, AppError> {
    let username = payload
        .username
        .as_deref()
        .map(validate_username)
        .transpose()
        .map_err(AppError::validation)?;
    let bio = payload.bio.as_deref().map(str::trim);
    if bio.is_some_and(|bio| bio.chars().count() > BIO_MAX) {
        return Err(AppError::validation(format!("bio must be at most {BIO_MAX} characters")));
    }
    let avatar_url = payload.avatar_url.as_deref().map(str::trim);
    if avatar_url.is_some_and(|url| !url.is_empty() && !is_http_url(url)) {
        return Err(AppError::validation("avatarUrl must be an http(s) URL"));
    }

    let proxy = state.require_db()?;
    let profile = users::update_profile(&proxy, &user.id, username.as_deref(), bio, avatar_url)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;

    // cached session still carries the old username
    if let Some(token) = extract_token(&headers) {
        state.cache().delete(&session_key(&hash_token(&token))).await;
    }
    Ok(ok(profile))
}

async fn update_password(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    headers: HeaderMap,
    Json(payload): Json<UpdatePasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    validate_password(&payload.new_password).map_err(AppError::validation)?;

    let proxy = state.require_db()?;
    let credentials = users::find_credentials_by_id(&proxy, &user.id)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;
    if !bcrypt::verify(&payload.old_password, &credentials.password_hash).unwrap_or(false) {
        return Err(AppError::unauthorized("Current password is incorrect"));
    }

    let new_hash = bcrypt::hash(&payload.new_password, BCRYPT_COST)
        .map_err(|err| AppError::internal(format!("password hash failed: {err}")))?;
    users::update_password_hash(&proxy, &user.id, &new_hash).await?;

    let current = extract_token(&headers).map(|token| hash_token(&token));
    let revoked = users::revoke_sessions(&proxy, &user.id, current.as_deref()).await?;
    let cache = state.cache();
    for token_hash in &revoked {
        cache.delete(&session_key(token_hash)).await;
    }

    tracing::info!(user_id = %user.id, revoked = revoked.len(), "password changed");
    Ok(ok(serde_json::json!({ "revokedSessions": revoked.len() })))
}
