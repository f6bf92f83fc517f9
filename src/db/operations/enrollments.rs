use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::DatabaseProxy;
use crate::types::{EnrollmentStatus, PaymentChannel};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
#[sqlx(rename_all = "camelCase")]
pub struct EnrollmentRequest {
    pub id: String,
    pub user_id: String,
    pub course_id: String,
    pub status: EnrollmentStatus,
    pub message: Option<String>,
    pub payment_channel: Option<PaymentChannel>,
    pub payment_reference: Option<String>,
    pub admin_note: Option<String>,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub activated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request joined with the student and course it refers to.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
#[sqlx(rename_all = "camelCase")]
pub struct EnrollmentView {
    pub id: String,
    pub user_id: String,
    pub username: String,
    pub email: String,
    pub course_id: String,
    pub course_title: String,
    pub course_slug: String,
    pub tutor_id: String,
    pub price_cents: i64,
    pub currency: String,
    pub status: EnrollmentStatus,
    pub message: Option<String>,
    pub payment_channel: Option<PaymentChannel>,
    pub payment_reference: Option<String>,
    pub admin_note: Option<String>,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub activated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Clone)]
pub struct EnrollmentFilter {
    pub status: Option<EnrollmentStatus>,
    pub course_id: Option<String>,
    pub user_id: Option<String>,
    pub tutor_id: Option<String>,
}

/// Fields written by a reviewed state change.
pub struct Transition<'a> {
    pub from: EnrollmentStatus,
    pub to: EnrollmentStatus,
    pub reviewer_id: &'a str,
    pub admin_note: Option<&'a str>,
    pub payment_reference: Option<&'a str>,
}

const REQUEST_COLUMNS: &str = r#""id", "userId", "courseId", "status", "message", "paymentChannel",
    "paymentReference", "adminNote", "reviewedBy", "reviewedAt", "activatedAt", "createdAt", "updatedAt""#;

const VIEW_SELECT: &str = r#"
    SELECT e."id", e."userId", u."username", u."email", e."courseId", c."title" AS "courseTitle",
           c."slug" AS "courseSlug", c."tutorId", c."priceCents", c."currency", e."status", e."message",
           e."paymentChannel", e."paymentReference", e."adminNote", e."reviewedBy", e."reviewedAt",
           e."activatedAt", e."createdAt", e."updatedAt"
    FROM "enrollment_requests" e
    JOIN "users" u ON u."id" = e."userId"
    JOIN "courses" c ON c."id" = e."courseId"
"#;

const VIEW_WHERE: &str = r#"
    WHERE ($1::TEXT IS NULL OR e."status" = $1)
      AND ($2::TEXT IS NULL OR e."courseId" = $2)
      AND ($3::TEXT IS NULL OR e."userId" = $3)
      AND ($4::TEXT IS NULL OR c."tutorId" = $4)
"#;

pub async fn insert_request(
    proxy: &DatabaseProxy,
    user_id: &str,
    course_id: &str,
    message: Option<&str>,
    payment_channel: Option<PaymentChannel>,
) -> Result<EnrollmentRequest, sqlx::Error> {
    let sql = format!(
        r#"INSERT INTO "enrollment_requests" ("id", "userId", "courseId", "status", "message", "paymentChannel")
           VALUES ($1, $2, $3, 'PENDING', $4, $5)
           RETURNING {REQUEST_COLUMNS}"#
    );
    sqlx::query_as::<_, EnrollmentRequest>(&sql)
        .bind(Uuid::new_v4().to_string())
        .bind(user_id)
        .bind(course_id)
        .bind(message)
        .bind(payment_channel)
        .fetch_one(proxy.pool())
        .await
}

pub async fn find_request(proxy: &DatabaseProxy, id: &str) -> Result<Option<EnrollmentRequest>, sqlx::Error> {
    let sql = format!(r#"SELECT {REQUEST_COLUMNS} FROM "enrollment_requests" WHERE "id" = $1"#);
    sqlx::query_as::<_, EnrollmentRequest>(&sql)
        .bind(id)
        .fetch_optional(proxy.pool())
        .await
}

pub async fn find_view(proxy: &DatabaseProxy, id: &str) -> Result<Option<EnrollmentView>, sqlx::Error> {
    let sql = format!(r#"{VIEW_SELECT} WHERE e."id" = $1"#);
    sqlx::query_as::<_, EnrollmentView>(&sql)
        .bind(id)
        .fetch_optional(proxy.pool())
        .await
}

/// The student's non-rejected request for a course, if any.
pub async fn find_open_request(
    proxy: &DatabaseProxy,
    user_id: &str,
    course_id: &str,
) -> Result<Option<EnrollmentRequest>, sqlx::Error> {
    let sql = format!(
        r#"SELECT {REQUEST_COLUMNS} FROM "enrollment_requests"
           WHERE "userId" = $1 AND "courseId" = $2 AND "status" <> 'REJECTED'
           LIMIT 1"#
    );
    sqlx::query_as::<_, EnrollmentRequest>(&sql)
        .bind(user_id)
        .bind(course_id)
        .fetch_optional(proxy.pool())
        .await
}

pub async fn has_active_enrollment(
    proxy: &DatabaseProxy,
    user_id: &str,
    course_id: &str,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar(
        r#"SELECT EXISTS(
             SELECT 1 FROM "enrollment_requests"
             WHERE "userId" = $1 AND "courseId" = $2 AND "status" = 'ACTIVE')"#,
    )
    .bind(user_id)
    .bind(course_id)
    .fetch_one(proxy.pool())
    .await
}

pub async fn list_views(
    proxy: &DatabaseProxy,
    filter: &EnrollmentFilter,
    limit: i64,
    offset: i64,
) -> Result<(Vec<EnrollmentView>, i64), sqlx::Error> {
    let count_sql = format!(
        r#"SELECT COUNT(*) FROM "enrollment_requests" e
           JOIN "courses" c ON c."id" = e."courseId"
           {VIEW_WHERE}"#
    );
    let total: i64 = sqlx::query_scalar(&count_sql)
        .bind(filter.status)
        .bind(filter.course_id.as_deref())
        .bind(filter.user_id.as_deref())
        .bind(filter.tutor_id.as_deref())
        .fetch_one(proxy.pool())
        .await?;

    let sql = format!(r#"{VIEW_SELECT} {VIEW_WHERE} ORDER BY e."createdAt" DESC LIMIT $5 OFFSET $6"#);
    let items = sqlx::query_as::<_, EnrollmentView>(&sql)
        .bind(filter.status)
        .bind(filter.course_id.as_deref())
        .bind(filter.user_id.as_deref())
        .bind(filter.tutor_id.as_deref())
        .bind(limit)
        .bind(offset)
        .fetch_all(proxy.pool())
        .await?;

    Ok((items, total))
}

/// Applies a reviewed transition guarded on the current status so concurrent
/// reviewers cannot both move the same request. `None` means the row was no
/// longer in `transition.from`.
pub async fn apply_transition(
    proxy: &DatabaseProxy,
    id: &str,
    transition: &Transition<'_>,
) -> Result<Option<EnrollmentRequest>, sqlx::Error> {
    let sql = format!(
        r#"UPDATE "enrollment_requests" SET
             "status" = $3,
             "reviewedBy" = $4,
             "reviewedAt" = NOW(),
             "adminNote" = COALESCE($5, "adminNote"),
             "paymentReference" = COALESCE($6, "paymentReference"),
             "activatedAt" = CASE WHEN $3 = 'ACTIVE' THEN NOW() ELSE "activatedAt" END,
             "updatedAt" = NOW()
           WHERE "id" = $1 AND "status" = $2
           RETURNING {REQUEST_COLUMNS}"#
    );
    sqlx::query_as::<_, EnrollmentRequest>(&sql)
        .bind(id)
        .bind(transition.from)
        .bind(transition.to)
        .bind(transition.reviewer_id)
        .bind(transition.admin_note)
        .bind(transition.payment_reference)
        .fetch_optional(proxy.pool())
        .await
}

pub async fn delete_pending_request(
    proxy: &DatabaseProxy,
    id: &str,
    user_id: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"DELETE FROM "enrollment_requests" WHERE "id" = $1 AND "userId" = $2 AND "status" = 'PENDING'"#,
    )
    .bind(id)
    .bind(user_id)
    .execute(proxy.pool())
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Course ids in which the student is ACTIVE.
pub async fn active_course_ids(proxy: &DatabaseProxy, user_id: &str) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar(
        r#"SELECT "courseId" FROM "enrollment_requests" WHERE "userId" = $1 AND "status" = 'ACTIVE'"#,
    )
    .bind(user_id)
    .fetch_all(proxy.pool())
    .await
}
