use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::DatabaseProxy;
use crate::types::CourseLevel;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
#[sqlx(rename_all = "camelCase")]
pub struct Course {
    pub id: String,
    pub tutor_id: String,
    pub title: String,
    pub slug: String,
    pub description: String,
    pub category: String,
    pub level: CourseLevel,
    pub price_cents: i64,
    pub currency: String,
    pub published: bool,
    pub cover_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Catalog row: a course with its tutor's name and the number of learners
/// holding an ACTIVE enrollment.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
#[sqlx(rename_all = "camelCase")]
pub struct CourseListItem {
    pub id: String,
    pub tutor_id: String,
    pub tutor_name: String,
    pub title: String,
    pub slug: String,
    pub description: String,
    pub category: String,
    pub level: CourseLevel,
    pub price_cents: i64,
    pub currency: String,
    pub published: bool,
    pub cover_url: Option<String>,
    pub enrollment_count: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CategoryCount {
    pub category: String,
    pub count: i64,
}

#[derive(Debug, Default, Clone)]
pub struct CatalogFilter {
    pub q: Option<String>,
    pub category: Option<String>,
    pub level: Option<CourseLevel>,
    pub tutor_id: Option<String>,
}

pub struct CourseDraft {
    pub title: String,
    pub slug: String,
    pub description: String,
    pub category: String,
    pub level: CourseLevel,
    pub price_cents: i64,
    pub currency: String,
    pub cover_url: Option<String>,
}

#[derive(Debug, Default)]
pub struct CoursePatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub level: Option<CourseLevel>,
    pub price_cents: Option<i64>,
    pub currency: Option<String>,
    pub cover_url: Option<String>,
}

const COURSE_COLUMNS: &str = r#""id", "tutorId", "title", "slug", "description", "category", "level",
    "priceCents", "currency", "published", "coverUrl", "createdAt", "updatedAt""#;

const LIST_SELECT: &str = r#"
    SELECT c."id", c."tutorId", u."username" AS "tutorName", c."title", c."slug", c."description",
           c."category", c."level", c."priceCents", c."currency", c."published", c."coverUrl",
           c."createdAt",
           (SELECT COUNT(*) FROM "enrollment_requests" e
             WHERE e."courseId" = c."id" AND e."status" = 'ACTIVE') AS "enrollmentCount"
    FROM "courses" c
    JOIN "users" u ON u."id" = c."tutorId"
"#;

const CATALOG_WHERE: &str = r#"
    WHERE c."published"
      AND ($1::TEXT IS NULL OR c."title" ILIKE $1 OR c."description" ILIKE $1)
      AND ($2::TEXT IS NULL OR c."category" = $2)
      AND ($3::TEXT IS NULL OR c."level" = $3)
      AND ($4::TEXT IS NULL OR c."tutorId" = $4)
"#;

pub async fn insert_course(
    proxy: &DatabaseProxy,
    tutor_id: &str,
    draft: &CourseDraft,
) -> Result<Course, sqlx::Error> {
    let sql = format!(
        r#"INSERT INTO "courses" ("id", "tutorId", "title", "slug", "description", "category",
                                  "level", "priceCents", "currency", "coverUrl")
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
           RETURNING {COURSE_COLUMNS}"#
    );
    sqlx::query_as::<_, Course>(&sql)
        .bind(Uuid::new_v4().to_string())
        .bind(tutor_id)
        .bind(&draft.title)
        .bind(&draft.slug)
        .bind(&draft.description)
        .bind(&draft.category)
        .bind(draft.level)
        .bind(draft.price_cents)
        .bind(&draft.currency)
        .bind(draft.cover_url.as_deref())
        .fetch_one(proxy.pool())
        .await
}

pub async fn find_course(proxy: &DatabaseProxy, course_id: &str) -> Result<Option<Course>, sqlx::Error> {
    let sql = format!(r#"SELECT {COURSE_COLUMNS} FROM "courses" WHERE "id" = $1"#);
    sqlx::query_as::<_, Course>(&sql)
        .bind(course_id)
        .fetch_optional(proxy.pool())
        .await
}

pub async fn find_course_by_id_or_slug(
    proxy: &DatabaseProxy,
    id_or_slug: &str,
) -> Result<Option<Course>, sqlx::Error> {
    let sql = format!(r#"SELECT {COURSE_COLUMNS} FROM "courses" WHERE "id" = $1 OR "slug" = $1 LIMIT 1"#);
    sqlx::query_as::<_, Course>(&sql)
        .bind(id_or_slug)
        .fetch_optional(proxy.pool())
        .await
}

/// Slugs already taken by `base` or `base-<n>`.
pub async fn slugs_like(proxy: &DatabaseProxy, base: &str) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar::<_, String>(
        r#"SELECT "slug" FROM "courses" WHERE "slug" = $1 OR "slug" LIKE $1 || '-%'"#,
    )
    .bind(base)
    .fetch_all(proxy.pool())
    .await
}

pub async fn update_course(
    proxy: &DatabaseProxy,
    course_id: &str,
    patch: &CoursePatch,
) -> Result<Option<Course>, sqlx::Error> {
    let sql = format!(
        r#"UPDATE "courses" SET
             "title" = COALESCE($2, "title"),
             "description" = COALESCE($3, "description"),
             "category" = COALESCE($4, "category"),
             "level" = COALESCE($5, "level"),
             "priceCents" = COALESCE($6, "priceCents"),
             "currency" = COALESCE($7, "currency"),
             "coverUrl" = COALESCE($8, "coverUrl"),
             "updatedAt" = NOW()
           WHERE "id" = $1
           RETURNING {COURSE_COLUMNS}"#
    );
    sqlx::query_as::<_, Course>(&sql)
        .bind(course_id)
        .bind(patch.title.as_deref())
        .bind(patch.description.as_deref())
        .bind(patch.category.as_deref())
        .bind(patch.level)
        .bind(patch.price_cents)
        .bind(patch.currency.as_deref())
        .bind(patch.cover_url.as_deref())
        .fetch_optional(proxy.pool())
        .await
}

pub async fn set_published(
    proxy: &DatabaseProxy,
    course_id: &str,
    published: bool,
) -> Result<Option<Course>, sqlx::Error> {
    let sql = format!(
        r#"UPDATE "courses" SET "published" = $2, "updatedAt" = NOW() WHERE "id" = $1
           RETURNING {COURSE_COLUMNS}"#
    );
    sqlx::query_as::<_, Course>(&sql)
        .bind(course_id)
        .bind(published)
        .fetch_optional(proxy.pool())
        .await
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CourseDeletion {
    Deleted,
    NotFound,
    HasActiveEnrollments,
}

/// Deletes the course unless a learner holds an ACTIVE enrollment in it.
pub async fn delete_course(proxy: &DatabaseProxy, course_id: &str) -> Result<CourseDeletion, sqlx::Error> {
    let result = sqlx::query(
        r#"DELETE FROM "courses" c WHERE c."id" = $1
           AND NOT EXISTS(SELECT 1 FROM "enrollment_requests" e
                          WHERE e."courseId" = c."id" AND e."status" = 'ACTIVE')"#,
    )
    .bind(course_id)
    .execute(proxy.pool())
    .await?;
    if result.rows_affected() > 0 {
        return Ok(CourseDeletion::Deleted);
    }

    let exists: bool = sqlx::query_scalar(r#"SELECT EXISTS(SELECT 1 FROM "courses" WHERE "id" = $1)"#)
        .bind(course_id)
        .fetch_one(proxy.pool())
        .await?;
    Ok(if exists {
        CourseDeletion::HasActiveEnrollments
    } else {
        CourseDeletion::NotFound
    })
}

pub async fn count_active_enrollments(proxy: &DatabaseProxy, course_id: &str) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(
        r#"SELECT COUNT(*) FROM "enrollment_requests" WHERE "courseId" = $1 AND "status" = 'ACTIVE'"#,
    )
    .bind(course_id)
    .fetch_one(proxy.pool())
    .await
}

pub async fn list_published(
    proxy: &DatabaseProxy,
    filter: &CatalogFilter,
    limit: i64,
    offset: i64,
) -> Result<(Vec<CourseListItem>, i64), sqlx::Error> {
    let pattern = filter
        .q
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .map(|q| format!("%{q}%"));

    let count_sql = format!(r#"SELECT COUNT(*) FROM "courses" c {CATALOG_WHERE}"#);
    let total: i64 = sqlx::query_scalar(&count_sql)
        .bind(pattern.as_deref())
        .bind(filter.category.as_deref())
        .bind(filter.level)
        .bind(filter.tutor_id.as_deref())
        .fetch_one(proxy.pool())
        .await?;

    let sql = format!(r#"{LIST_SELECT} {CATALOG_WHERE} ORDER BY c."createdAt" DESC LIMIT $5 OFFSET $6"#);
    let items = sqlx::query_as::<_, CourseListItem>(&sql)
        .bind(pattern.as_deref())
        .bind(filter.category.as_deref())
        .bind(filter.level)
        .bind(filter.tutor_id.as_deref())
        .bind(limit)
        .bind(offset)
        .fetch_all(proxy.pool())
        .await?;

    Ok((items, total))
}

/// Every course a tutor owns, drafts included. `None` lists all courses (admin view).
pub async fn list_owned(
    proxy: &DatabaseProxy,
    tutor_id: Option<&str>,
) -> Result<Vec<CourseListItem>, sqlx::Error> {
    let sql = format!(
        r#"{LIST_SELECT} WHERE ($1::TEXT IS NULL OR c."tutorId" = $1) ORDER BY c."updatedAt" DESC"#
    );
    sqlx::query_as::<_, CourseListItem>(&sql)
        .bind(tutor_id)
        .fetch_all(proxy.pool())
        .await
}

pub async fn list_categories(proxy: &DatabaseProxy) -> Result<Vec<CategoryCount>, sqlx::Error> {
    sqlx::query_as::<_, CategoryCount>(
        r#"SELECT "category", COUNT(*) AS "count" FROM "courses"
           WHERE "published"
           GROUP BY "category"
           ORDER BY "count" DESC, "category" ASC"#,
    )
    .fetch_all(proxy.pool())
    .await
}
