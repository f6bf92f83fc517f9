use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::db::DatabaseProxy;
use crate::types::{EnrollmentStatus, Role};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct RoleCount {
    pub role: Role,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct StatusCount {
    pub status: EnrollmentStatus,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CurrencyRevenue {
    pub currency: String,
    #[sqlx(rename = "totalCents")]
    pub total_cents: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DailyCount {
    pub day: NaiveDate,
    pub count: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CourseStatusCounts {
    pub published: i64,
    pub draft: i64,
}

/// Per-course figures for a tutor's dashboard.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
#[sqlx(rename_all = "camelCase")]
pub struct TutorCourseStats {
    pub course_id: String,
    pub title: String,
    pub published: bool,
    pub pending: i64,
    pub approved: i64,
    pub active: i64,
    pub rejected: i64,
    pub average_percentage: Option<f64>,
    pub material_count: i64,
    pub completions: i64,
}

pub async fn users_by_role(proxy: &DatabaseProxy) -> Result<Vec<RoleCount>, sqlx::Error> {
    sqlx::query_as::<_, RoleCount>(
        r#"SELECT "role", COUNT(*) AS "count" FROM "users" GROUP BY "role" ORDER BY "role""#,
    )
    .fetch_all(proxy.pool())
    .await
}

pub async fn course_status_counts(proxy: &DatabaseProxy) -> Result<CourseStatusCounts, sqlx::Error> {
    sqlx::query_as::<_, CourseStatusCounts>(
        r#"SELECT COUNT(*) FILTER (WHERE "published") AS "published",
                  COUNT(*) FILTER (WHERE NOT "published") AS "draft"
           FROM "courses""#,
    )
    .fetch_one(proxy.pool())
    .await
}

pub async fn requests_by_status(proxy: &DatabaseProxy) -> Result<Vec<StatusCount>, sqlx::Error> {
    sqlx::query_as::<_, StatusCount>(
        r#"SELECT "status", COUNT(*) AS "count" FROM "enrollment_requests"
           GROUP BY "status" ORDER BY "status""#,
    )
    .fetch_all(proxy.pool())
    .await
}

pub async fn revenue_by_currency(proxy: &DatabaseProxy) -> Result<Vec<CurrencyRevenue>, sqlx::Error> {
    sqlx::query_as::<_, CurrencyRevenue>(
        r#"SELECT c."currency", COALESCE(SUM(c."priceCents"), 0)::BIGINT AS "totalCents"
           FROM "enrollment_requests" e
           JOIN "courses" c ON c."id" = e."courseId"
           WHERE e."status" = 'ACTIVE'
           GROUP BY c."currency"
           ORDER BY c."currency""#,
    )
    .fetch_all(proxy.pool())
    .await
}

pub async fn active_learners_since(proxy: &DatabaseProxy, since: NaiveDate) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(
        r#"SELECT COUNT(DISTINCT "userId") FROM "study_activity" WHERE "activityDate" >= $1"#,
    )
    .bind(since)
    .fetch_one(proxy.pool())
    .await
}

pub async fn new_users_per_day(proxy: &DatabaseProxy, since: NaiveDate) -> Result<Vec<DailyCount>, sqlx::Error> {
    sqlx::query_as::<_, DailyCount>(
        r#"SELECT ("createdAt" AT TIME ZONE 'UTC')::DATE AS "day", COUNT(*) AS "count"
           FROM "users"
           WHERE ("createdAt" AT TIME ZONE 'UTC')::DATE >= $1
           GROUP BY 1
           ORDER BY 1"#,
    )
    .bind(since)
    .fetch_all(proxy.pool())
    .await
}

pub async fn tutor_course_stats(proxy: &DatabaseProxy, tutor_id: &str) -> Result<Vec<TutorCourseStats>, sqlx::Error> {
    sqlx::query_as::<_, TutorCourseStats>(
        r#"SELECT c."id" AS "courseId", c."title", c."published",
                  COUNT(e."id") FILTER (WHERE e."status" = 'PENDING') AS "pending",
                  COUNT(e."id") FILTER (WHERE e."status" = 'APPROVED') AS "approved",
                  COUNT(e."id") FILTER (WHERE e."status" = 'ACTIVE') AS "active",
                  COUNT(e."id") FILTER (WHERE e."status" = 'REJECTED') AS "rejected",
                  (SELECT AVG(a."percentage") FROM "test_attempts" a
                     JOIN "tests" x ON x."id" = a."testId"
                     JOIN "topics" t ON t."id" = x."topicId"
                    WHERE t."courseId" = c."id") AS "averagePercentage",
                  (SELECT COUNT(*) FROM "materials" m
                     JOIN "topics" t ON t."id" = m."topicId"
                    WHERE t."courseId" = c."id") AS "materialCount",
                  (SELECT COUNT(*) FROM "material_progress" mp
                     JOIN "materials" m ON m."id" = mp."materialId"
                     JOIN "topics" t ON t."id" = m."topicId"
                    WHERE t."courseId" = c."id") AS "completions"
           FROM "courses" c
           LEFT JOIN "enrollment_requests" e ON e."courseId" = c."id"
           WHERE c."tutorId" = $1
           GROUP BY c."id", c."title", c."published"
           ORDER BY c."title""#,
    )
    .bind(tutor_id)
    .fetch_all(proxy.pool())
    .await
}
