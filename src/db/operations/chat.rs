use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::DatabaseProxy;
use crate::types::Role;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
#[sqlx(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
#[sqlx(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: String,
    pub peer_id: String,
    pub peer_username: String,
    pub peer_role: Role,
    pub peer_avatar_url: Option<String>,
    pub last_message_body: Option<String>,
    pub last_message_sender_id: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub unread_count: i64,
    pub created_at: DateTime<Utc>,
}

/// Conversation ids are unique per unordered user pair.
pub fn pair_key(a: &str, b: &str) -> String {
    if a <= b {
        format!("{a}:{b}")
    } else {
        format!("{b}:{a}")
    }
}

/// Returns the conversation for the pair, creating it on first contact.
pub async fn get_or_create_conversation(
    proxy: &DatabaseProxy,
    user_id: &str,
    peer_id: &str,
) -> Result<String, sqlx::Error> {
    let key = pair_key(user_id, peer_id);
    let mut tx = proxy.pool().begin().await?;

    let inserted: Option<String> = sqlx::query_scalar(
        r#"INSERT INTO "conversations" ("id", "pairKey") VALUES ($1, $2)
           ON CONFLICT ("pairKey") DO NOTHING
           RETURNING "id""#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&key)
    .fetch_optional(&mut *tx)
    .await?;

    let conversation_id = match inserted {
        Some(id) => {
            sqlx::query(
                r#"INSERT INTO "conversation_members" ("conversationId", "userId")
                   VALUES ($1, $2), ($1, $3)"#,
            )
            .bind(&id)
            .bind(user_id)
            .bind(peer_id)
            .execute(&mut *tx)
            .await?;
            id
        }
        None => {
            sqlx::query_scalar(r#"SELECT "id" FROM "conversations" WHERE "pairKey" = $1"#)
                .bind(&key)
                .fetch_one(&mut *tx)
                .await?
        }
    };

    tx.commit().await?;
    Ok(conversation_id)
}

/// The other member of a conversation the user belongs to; `None` when the
/// user is not a member.
pub async fn peer_of(
    proxy: &DatabaseProxy,
    conversation_id: &str,
    user_id: &str,
) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar(
        r#"SELECT other."userId" FROM "conversation_members" me
           JOIN "conversation_members" other
             ON other."conversationId" = me."conversationId" AND other."userId" <> me."userId"
           WHERE me."conversationId" = $1 AND me."userId" = $2"#,
    )
    .bind(conversation_id)
    .bind(user_id)
    .fetch_optional(proxy.pool())
    .await
}

pub async fn list_conversations(
    proxy: &DatabaseProxy,
    user_id: &str,
) -> Result<Vec<ConversationSummary>, sqlx::Error> {
    sqlx::query_as::<_, ConversationSummary>(
        r#"SELECT c."id", peer."id" AS "peerId", peer."username" AS "peerUsername",
                  peer."role" AS "peerRole", peer."avatarUrl" AS "peerAvatarUrl",
                  last."body" AS "lastMessageBody", last."senderId" AS "lastMessageSenderId",
                  c."lastMessageAt",
                  (SELECT COUNT(*) FROM "messages" m
                    WHERE m."conversationId" = c."id" AND m."senderId" <> $1
                      AND (me."lastReadAt" IS NULL OR m."createdAt" > me."lastReadAt")) AS "unreadCount",
                  c."createdAt"
           FROM "conversation_members" me
           JOIN "conversations" c ON c."id" = me."conversationId"
           JOIN "conversation_members" pm
             ON pm."conversationId" = c."id" AND pm."userId" <> me."userId"
           JOIN "users" peer ON peer."id" = pm."userId"
           LEFT JOIN LATERAL (
             SELECT m."body", m."senderId" FROM "messages" m
             WHERE m."conversationId" = c."id"
             ORDER BY m."createdAt" DESC LIMIT 1
           ) last ON TRUE
           WHERE me."userId" = $1
           ORDER BY COALESCE(c."lastMessageAt", c."createdAt") DESC"#,
    )
    .bind(user_id)
    .fetch_all(proxy.pool())
    .await
}

/// Newest first. With `before`, only messages older than that message.
pub async fn list_messages(
    proxy: &DatabaseProxy,
    conversation_id: &str,
    before: Option<&str>,
    limit: i64,
) -> Result<Vec<Message>, sqlx::Error> {
    sqlx::query_as::<_, Message>(
        r#"SELECT "id", "conversationId", "senderId", "body", "createdAt" FROM "messages"
           WHERE "conversationId" = $1
             AND ($2::TEXT IS NULL OR ("createdAt", "id") < (
                   SELECT b."createdAt", b."id" FROM "messages" b WHERE b."id" = $2))
           ORDER BY "createdAt" DESC, "id" DESC
           LIMIT $3"#,
    )
    .bind(conversation_id)
    .bind(before)
    .bind(limit)
    .fetch_all(proxy.pool())
    .await
}

pub async fn insert_message(
    proxy: &DatabaseProxy,
    conversation_id: &str,
    sender_id: &str,
    body: &str,
) -> Result<Message, sqlx::Error> {
    let mut tx = proxy.pool().begin().await?;

    let message = sqlx::query_as::<_, Message>(
        r#"INSERT INTO "messages" ("id", "conversationId", "senderId", "body") VALUES ($1, $2, $3, $4)
           RETURNING "id", "conversationId", "senderId", "body", "createdAt""#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(conversation_id)
    .bind(sender_id)
    .bind(body)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query(r#"UPDATE "conversations" SET "lastMessageAt" = $2 WHERE "id" = $1"#)
        .bind(conversation_id)
        .bind(message.created_at)
        .execute(&mut *tx)
        .await?;

    // the sender has read everything up to their own message
    sqlx::query(
        r#"UPDATE "conversation_members" SET "lastReadAt" = $3
           WHERE "conversationId" = $1 AND "userId" = $2"#,
    )
    .bind(conversation_id)
    .bind(sender_id)
    .bind(message.created_at)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(message)
}

pub async fn mark_read(
    proxy: &DatabaseProxy,
    conversation_id: &str,
    user_id: &str,
) -> Result<DateTime<Utc>, sqlx::Error> {
    sqlx::query_scalar(
        r#"UPDATE "conversation_members" SET "lastReadAt" = NOW()
           WHERE "conversationId" = $1 AND "userId" = $2
           RETURNING "lastReadAt""#,
    )
    .bind(conversation_id)
    .bind(user_id)
    .fetch_one(proxy.pool())
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_key_ignores_argument_order() {
        assert_eq!(pair_key("b", "a"), "a:b");
        assert_eq!(pair_key("a", "b"), pair_key("b", "a"));
    }
}
