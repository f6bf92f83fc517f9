use crate::config::env_non_empty;
use crate::db::operations::users::{self, NewUser};
use crate::db::DatabaseProxy;
use crate::services::validation::{normalize_email, validate_password, validate_username};
use crate::types::Role;

const BCRYPT_COST: u32 = 10;

/// Creates the bootstrap admin from `SEED_ADMIN_*` when that email is not
/// registered yet. Admins cannot self-register, so this is the only way in.
pub async fn seed_admin(proxy: &DatabaseProxy) {
    let (Some(raw_email), Some(password)) = (
        env_non_empty("SEED_ADMIN_EMAIL"),
        env_non_empty("SEED_ADMIN_PASSWORD"),
    ) else {
        tracing::debug!("SEED_ADMIN_EMAIL/SEED_ADMIN_PASSWORD not set, skipping admin seed");
        return;
    };

    let Some(email) = normalize_email(&raw_email) else {
        tracing::warn!("SEED_ADMIN_EMAIL is not a valid email, skipping admin seed");
        return;
    };
    if let Err(reason) = validate_password(&password) {
        tracing::warn!(%reason, "SEED_ADMIN_PASSWORD rejected, skipping admin seed");
        return;
    }
    let username = match validate_username(
        &env_non_empty("SEED_ADMIN_USERNAME").unwrap_or_else(|| "admin".to_string()),
    ) {
        Ok(name) => name,
        Err(reason) => {
            tracing::warn!(%reason, "SEED_ADMIN_USERNAME rejected, skipping admin seed");
            return;
        }
    };

    match users::email_exists(proxy, &email).await {
        Ok(true) => {
            tracing::debug!(email = %email, "seed admin already exists");
            return;
        }
        Ok(false) => {}
        Err(err) => {
            tracing::warn!(error = %err, "failed to check seed admin");
            return;
        }
    }

    let password_hash = match bcrypt::hash(&password, BCRYPT_COST) {
        Ok(hash) => hash,
        Err(err) => {
            tracing::warn!(error = %err, "failed to hash seed admin password");
            return;
        }
    };

    match users::insert_user(
        proxy,
        NewUser {
            email: &email,
            username: &username,
            password_hash: &password_hash,
            role: Role::Admin,
        },
    )
    .await
    {
        Ok(profile) => tracing::info!(user_id = %profile.id, email = %email, "seeded admin user"),
        Err(err) => tracing::warn!(error = %err, "failed to seed admin user"),
    }
}
