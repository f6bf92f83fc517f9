use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::db::DatabaseProxy;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
#[sqlx(rename_all = "camelCase")]
pub struct AttemptRecord {
    pub id: String,
    pub test_id: String,
    pub test_title: String,
    pub course_id: String,
    pub user_id: String,
    pub username: String,
    pub score: i64,
    pub max_score: i64,
    pub percentage: f64,
    pub passed: bool,
    pub submitted_at: DateTime<Utc>,
}

pub struct NewAttempt<'a> {
    pub test_id: &'a str,
    pub user_id: &'a str,
    pub score: i64,
    pub max_score: i64,
    pub percentage: f64,
    pub passed: bool,
    pub answers: &'a serde_json::Value,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
#[sqlx(rename_all = "camelCase")]
pub struct CourseCounts {
    pub total_materials: i64,
    pub completed_materials: i64,
    pub total_tests: i64,
    pub passed_tests: i64,
}

const ATTEMPT_SELECT: &str = r#"
    SELECT a."id", a."testId", x."title" AS "testTitle", t."courseId", a."userId", u."username",
           a."score", a."maxScore", a."percentage", a."passed", a."submittedAt"
    FROM "test_attempts" a
    JOIN "tests" x ON x."id" = a."testId"
    JOIN "topics" t ON t."id" = x."topicId"
    JOIN "users" u ON u."id" = a."userId"
"#;

/// Returns `true` only when this call created the completion row.
pub async fn insert_material_progress(
    conn: &mut PgConnection,
    user_id: &str,
    material_id: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"INSERT INTO "material_progress" ("userId", "materialId") VALUES ($1, $2)
           ON CONFLICT ("userId", "materialId") DO NOTHING"#,
    )
    .bind(user_id)
    .bind(material_id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn completed_material_ids(
    proxy: &DatabaseProxy,
    user_id: &str,
    course_id: &str,
) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar(
        r#"SELECT mp."materialId" FROM "material_progress" mp
           JOIN "materials" m ON m."id" = mp."materialId"
           JOIN "topics" t ON t."id" = m."topicId"
           WHERE mp."userId" = $1 AND t."courseId" = $2"#,
    )
    .bind(user_id)
    .bind(course_id)
    .fetch_all(proxy.pool())
    .await
}

pub async fn course_counts(
    proxy: &DatabaseProxy,
    user_id: &str,
    course_id: &str,
) -> Result<CourseCounts, sqlx::Error> {
    sqlx::query_as::<_, CourseCounts>(
        r#"SELECT
             (SELECT COUNT(*) FROM "materials" m JOIN "topics" t ON t."id" = m."topicId"
               WHERE t."courseId" = $2) AS "totalMaterials",
             (SELECT COUNT(*) FROM "material_progress" mp
               JOIN "materials" m ON m."id" = mp."materialId"
               JOIN "topics" t ON t."id" = m."topicId"
               WHERE t."courseId" = $2 AND mp."userId" = $1) AS "completedMaterials",
             (SELECT COUNT(*) FROM "tests" x JOIN "topics" t ON t."id" = x."topicId"
               WHERE t."courseId" = $2) AS "totalTests",
             (SELECT COUNT(DISTINCT a."testId") FROM "test_attempts" a
               JOIN "tests" x ON x."id" = a."testId"
               JOIN "topics" t ON t."id" = x."topicId"
               WHERE t."courseId" = $2 AND a."userId" = $1 AND a."passed") AS "passedTests""#,
    )
    .bind(user_id)
    .bind(course_id)
    .fetch_one(proxy.pool())
    .await
}

pub async fn count_attempts(proxy: &DatabaseProxy, user_id: &str, test_id: &str) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(r#"SELECT COUNT(*) FROM "test_attempts" WHERE "userId" = $1 AND "testId" = $2"#)
        .bind(user_id)
        .bind(test_id)
        .fetch_one(proxy.pool())
        .await
}

/// Inserts the attempt unless the user already used `max_attempts` on the
/// test. Submissions of one user on one test are serialised by an advisory
/// lock held until the surrounding transaction ends.
pub async fn insert_attempt_within_limit(
    conn: &mut PgConnection,
    attempt: &NewAttempt<'_>,
    max_attempts: Option<i32>,
) -> Result<Option<(String, DateTime<Utc>)>, sqlx::Error> {
    sqlx::query(r#"SELECT pg_advisory_xact_lock(hashtextextended($1::TEXT || ':' || $2::TEXT, 0))"#)
        .bind(attempt.user_id)
        .bind(attempt.test_id)
        .execute(&mut *conn)
        .await?;

    if let Some(max_attempts) = max_attempts {
        let used: i64 = sqlx::query_scalar(
            r#"SELECT COUNT(*) FROM "test_attempts" WHERE "userId" = $1 AND "testId" = $2"#,
        )
        .bind(attempt.user_id)
        .bind(attempt.test_id)
        .fetch_one(&mut *conn)
        .await?;
        if used >= i64::from(max_attempts) {
            return Ok(None);
        }
    }

    let id = Uuid::new_v4().to_string();
    let submitted_at: DateTime<Utc> = sqlx::query_scalar(
        r#"INSERT INTO "test_attempts" ("id", "testId", "userId", "score", "maxScore", "percentage",
                                        "passed", "answers")
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
           RETURNING "submittedAt""#,
    )
    .bind(&id)
    .bind(attempt.test_id)
    .bind(attempt.user_id)
    .bind(attempt.score)
    .bind(attempt.max_score)
    .bind(attempt.percentage)
    .bind(attempt.passed)
    .bind(Json(attempt.answers))
    .fetch_one(&mut *conn)
    .await?;
    Ok(Some((id, submitted_at)))
}

pub async fn list_user_attempts(
    proxy: &DatabaseProxy,
    user_id: &str,
    test_id: Option<&str>,
    limit: i64,
) -> Result<Vec<AttemptRecord>, sqlx::Error> {
    let sql = format!(
        r#"{ATTEMPT_SELECT}
           WHERE a."userId" = $1 AND ($2::TEXT IS NULL OR a."testId" = $2)
           ORDER BY a."submittedAt" DESC
           LIMIT $3"#
    );
    sqlx::query_as::<_, AttemptRecord>(&sql)
        .bind(user_id)
        .bind(test_id)
        .bind(limit)
        .fetch_all(proxy.pool())
        .await
}

pub async fn list_test_attempts(
    proxy: &DatabaseProxy,
    test_id: &str,
    limit: i64,
    offset: i64,
) -> Result<Vec<AttemptRecord>, sqlx::Error> {
    let sql = format!(
        r#"{ATTEMPT_SELECT}
           WHERE a."testId" = $1
           ORDER BY a."submittedAt" DESC
           LIMIT $2 OFFSET $3"#
    );
    sqlx::query_as::<_, AttemptRecord>(&sql)
        .bind(test_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(proxy.pool())
        .await
}

/// Latest attempts on any test of the tutor's courses.
pub async fn list_tutor_attempts(
    proxy: &DatabaseProxy,
    tutor_id: &str,
    limit: i64,
) -> Result<Vec<AttemptRecord>, sqlx::Error> {
    let sql = format!(
        r#"{ATTEMPT_SELECT}
           JOIN "courses" c ON c."id" = t."courseId"
           WHERE c."tutorId" = $1
           ORDER BY a."submittedAt" DESC
           LIMIT $2"#
    );
    sqlx::query_as::<_, AttemptRecord>(&sql)
        .bind(tutor_id)
        .bind(limit)
        .fetch_all(proxy.pool())
        .await
}
