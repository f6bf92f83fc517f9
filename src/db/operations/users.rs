use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::db::DatabaseProxy;
use crate::types::Role;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
#[sqlx(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    pub username: String,
    pub role: Role,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub is_active: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Public card shown next to courses, conversations and leaderboards.
#[derive(Debug, Clone, Serialize, serde::Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
#[sqlx(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: String,
    pub username: String,
    pub role: Role,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
#[sqlx(rename_all = "camelCase")]
pub struct Credentials {
    pub id: String,
    pub role: Role,
    pub password_hash: String,
    pub is_active: bool,
}

pub struct NewUser<'a> {
    pub email: &'a str,
    pub username: &'a str,
    pub password_hash: &'a str,
    pub role: Role,
}

#[derive(Debug, Default)]
pub struct UserListFilter {
    pub search: Option<String>,
    pub role: Option<Role>,
}

const PROFILE_COLUMNS: &str = r#""id", "email", "username", "role", "bio", "avatarUrl", "isActive",
    "lastLoginAt", "createdAt", "updatedAt""#;

pub async fn insert_user(proxy: &DatabaseProxy, user: NewUser<'_>) -> Result<UserProfile, sqlx::Error> {
    let id = Uuid::new_v4().to_string();
    let sql = format!(
        r#"INSERT INTO "users" ("id", "email", "username", "passwordHash", "role")
           VALUES ($1, $2, $3, $4, $5)
           RETURNING {PROFILE_COLUMNS}"#
    );
    sqlx::query_as::<_, UserProfile>(&sql)
        .bind(&id)
        .bind(user.email)
        .bind(user.username)
        .bind(user.password_hash)
        .bind(user.role)
        .fetch_one(proxy.pool())
        .await
}

pub async fn email_exists(proxy: &DatabaseProxy, email: &str) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, bool>(r#"SELECT EXISTS(SELECT 1 FROM "users" WHERE "email" = $1)"#)
        .bind(email)
        .fetch_one(proxy.pool())
        .await
}

pub async fn find_credentials_by_email(
    proxy: &DatabaseProxy,
    email: &str,
) -> Result<Option<Credentials>, sqlx::Error> {
    sqlx::query_as::<_, Credentials>(
        r#"SELECT "id", "role", "passwordHash", "isActive" FROM "users" WHERE "email" = $1"#,
    )
    .bind(email)
    .fetch_optional(proxy.pool())
    .await
}

pub async fn find_credentials_by_id(
    proxy: &DatabaseProxy,
    user_id: &str,
) -> Result<Option<Credentials>, sqlx::Error> {
    sqlx::query_as::<_, Credentials>(
        r#"SELECT "id", "role", "passwordHash", "isActive" FROM "users" WHERE "id" = $1"#,
    )
    .bind(user_id)
    .fetch_optional(proxy.pool())
    .await
}

pub async fn find_profile(proxy: &DatabaseProxy, user_id: &str) -> Result<Option<UserProfile>, sqlx::Error> {
    let sql = format!(r#"SELECT {PROFILE_COLUMNS} FROM "users" WHERE "id" = $1"#);
    sqlx::query_as::<_, UserProfile>(&sql)
        .bind(user_id)
        .fetch_optional(proxy.pool())
        .await
}

pub async fn find_summary(proxy: &DatabaseProxy, user_id: &str) -> Result<Option<UserSummary>, sqlx::Error> {
    sqlx::query_as::<_, UserSummary>(
        r#"SELECT "id", "username", "role", "avatarUrl" FROM "users" WHERE "id" = $1 AND "isActive""#,
    )
    .bind(user_id)
    .fetch_optional(proxy.pool())
    .await
}

pub async fn update_profile(
    proxy: &DatabaseProxy,
    user_id: &str,
    username: Option<&str>,
    bio: Option<&str>,
    avatar_url: Option<&str>,
) -> Result<Option<UserProfile>, sqlx::Error> {
    let sql = format!(
        r#"UPDATE "users" SET
             "username" = COALESCE($2, "username"),
             "bio" = COALESCE($3, "bio"),
             "avatarUrl" = COALESCE($4, "avatarUrl"),
             "updatedAt" = NOW()
           WHERE "id" = $1
           RETURNING {PROFILE_COLUMNS}"#
    );
    sqlx::query_as::<_, UserProfile>(&sql)
        .bind(user_id)
        .bind(username)
        .bind(bio)
        .bind(avatar_url)
        .fetch_optional(proxy.pool())
        .await
}

pub async fn update_password_hash(
    proxy: &DatabaseProxy,
    user_id: &str,
    password_hash: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(r#"UPDATE "users" SET "passwordHash" = $2, "updatedAt" = NOW() WHERE "id" = $1"#)
        .bind(user_id)
        .bind(password_hash)
        .execute(proxy.pool())
        .await?;
    Ok(())
}

pub async fn touch_last_login(proxy: &DatabaseProxy, user_id: &str) -> Result<(), sqlx::Error> {
    sqlx::query(r#"UPDATE "users" SET "lastLoginAt" = NOW() WHERE "id" = $1"#)
        .bind(user_id)
        .execute(proxy.pool())
        .await?;
    Ok(())
}

pub async fn update_role(
    proxy: &DatabaseProxy,
    user_id: &str,
    role: Role,
) -> Result<Option<UserProfile>, sqlx::Error> {
    let sql = format!(
        r#"UPDATE "users" SET "role" = $2, "updatedAt" = NOW() WHERE "id" = $1
           RETURNING {PROFILE_COLUMNS}"#
    );
    sqlx::query_as::<_, UserProfile>(&sql)
        .bind(user_id)
        .bind(role)
        .fetch_optional(proxy.pool())
        .await
}

pub async fn set_active(
    proxy: &DatabaseProxy,
    user_id: &str,
    is_active: bool,
) -> Result<Option<UserProfile>, sqlx::Error> {
    let sql = format!(
        r#"UPDATE "users" SET "isActive" = $2, "updatedAt" = NOW() WHERE "id" = $1
           RETURNING {PROFILE_COLUMNS}"#
    );
    sqlx::query_as::<_, UserProfile>(&sql)
        .bind(user_id)
        .bind(is_active)
        .fetch_optional(proxy.pool())
        .await
}

pub async fn list_users(
    proxy: &DatabaseProxy,
    filter: &UserListFilter,
    limit: i64,
    offset: i64,
) -> Result<(Vec<UserProfile>, i64), sqlx::Error> {
    let pattern = filter.search.as_deref().map(|term| format!("%{}%", term.trim()));

    let total: i64 = sqlx::query_scalar(
        r#"SELECT COUNT(*) FROM "users"
           WHERE ($1::TEXT IS NULL OR "email" ILIKE $1 OR "username" ILIKE $1)
             AND ($2::TEXT IS NULL OR "role" = $2)"#,
    )
    .bind(pattern.as_deref())
    .bind(filter.role)
    .fetch_one(proxy.pool())
    .await?;

    let sql = format!(
        r#"SELECT {PROFILE_COLUMNS} FROM "users"
           WHERE ($1::TEXT IS NULL OR "email" ILIKE $1 OR "username" ILIKE $1)
             AND ($2::TEXT IS NULL OR "role" = $2)
           ORDER BY "createdAt" DESC
           LIMIT $3 OFFSET $4"#
    );
    let items = sqlx::query_as::<_, UserProfile>(&sql)
        .bind(pattern.as_deref())
        .bind(filter.role)
        .bind(limit)
        .bind(offset)
        .fetch_all(proxy.pool())
        .await?;

    Ok((items, total))
}

// sessions

pub async fn insert_session(
    proxy: &DatabaseProxy,
    user_id: &str,
    token_hash: &str,
    expires_at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO "sessions" ("id", "userId", "token", "expiresAt") VALUES ($1, $2, $3, $4)"#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(user_id)
    .bind(token_hash)
    .bind(expires_at)
    .execute(proxy.pool())
    .await?;
    Ok(())
}

pub async fn delete_session(proxy: &DatabaseProxy, token_hash: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(r#"DELETE FROM "sessions" WHERE "token" = $1"#)
        .bind(token_hash)
        .execute(proxy.pool())
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Deletes every session of the user except `keep_token_hash` and returns the
/// removed token hashes so their cache entries can be dropped too.
pub async fn revoke_sessions(
    proxy: &DatabaseProxy,
    user_id: &str,
    keep_token_hash: Option<&str>,
) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar::<_, String>(
        r#"DELETE FROM "sessions"
           WHERE "userId" = $1 AND ($2::TEXT IS NULL OR "token" <> $2)
           RETURNING "token""#,
    )
    .bind(user_id)
    .bind(keep_token_hash)
    .fetch_all(proxy.pool())
    .await
}

pub async fn delete_expired_sessions(proxy: &DatabaseProxy) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(r#"DELETE FROM "sessions" WHERE "expiresAt" < NOW()"#)
        .execute(proxy.pool())
        .await?;
    Ok(result.rows_affected())
}
