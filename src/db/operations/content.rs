use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use uuid::Uuid;

use crate::db::DatabaseProxy;
use crate::types::{MaterialKind, QuestionKind};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
#[sqlx(rename_all = "camelCase")]
pub struct Topic {
    pub id: String,
    pub course_id: String,
    pub title: String,
    pub description: String,
    pub position: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
#[sqlx(rename_all = "camelCase")]
pub struct Material {
    pub id: String,
    pub topic_id: String,
    pub title: String,
    pub kind: MaterialKind,
    pub url: Option<String>,
    pub body: Option<String>,
    pub duration_seconds: Option<i32>,
    pub is_preview: bool,
    pub position: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
#[sqlx(rename_all = "camelCase")]
pub struct Test {
    pub id: String,
    pub topic_id: String,
    pub title: String,
    pub description: String,
    pub pass_score: i32,
    pub time_limit_minutes: Option<i32>,
    pub max_attempts: Option<i32>,
    pub position: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    pub test_id: String,
    pub prompt: String,
    pub kind: QuestionKind,
    pub options: Vec<String>,
    pub correct_answers: Vec<String>,
    pub points: i32,
    pub position: i32,
}

#[derive(sqlx::FromRow)]
#[sqlx(rename_all = "camelCase")]
struct QuestionRow {
    id: String,
    test_id: String,
    prompt: String,
    kind: QuestionKind,
    options: Json<Vec<String>>,
    correct_answers: Json<Vec<String>>,
    points: i32,
    position: i32,
}

impl From<QuestionRow> for Question {
    fn from(row: QuestionRow) -> Self {
        Self {
            id: row.id,
            test_id: row.test_id,
            prompt: row.prompt,
            kind: row.kind,
            options: row.options.0,
            correct_answers: row.correct_answers.0,
            points: row.points,
            position: row.position,
        }
    }
}

/// Owning course of a piece of content, used for authorization checks.
#[derive(Debug, Clone, sqlx::FromRow)]
#[sqlx(rename_all = "camelCase")]
pub struct ContentOwner {
    pub course_id: String,
    pub tutor_id: String,
    pub published: bool,
}

#[derive(Debug, Clone, Copy)]
pub enum ContentRef<'a> {
    Topic(&'a str),
    Material(&'a str),
    Test(&'a str),
    Question(&'a str),
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
#[sqlx(rename_all = "camelCase")]
pub struct MaterialSummary {
    pub id: String,
    #[serde(skip)]
    pub topic_id: String,
    pub title: String,
    pub kind: MaterialKind,
    pub duration_seconds: Option<i32>,
    pub is_preview: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
#[sqlx(rename_all = "camelCase")]
pub struct TestSummary {
    pub id: String,
    #[serde(skip)]
    pub topic_id: String,
    pub title: String,
    pub pass_score: i32,
    pub question_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicOutline {
    pub id: String,
    pub title: String,
    pub description: String,
    pub position: i32,
    pub material_count: usize,
    pub test_count: usize,
    pub materials: Vec<MaterialSummary>,
    pub tests: Vec<TestSummary>,
}

pub struct NewMaterial {
    pub title: String,
    pub kind: MaterialKind,
    pub url: Option<String>,
    pub body: Option<String>,
    pub duration_seconds: Option<i32>,
    pub is_preview: bool,
}

pub struct NewTest {
    pub title: String,
    pub description: String,
    pub pass_score: i32,
    pub time_limit_minutes: Option<i32>,
    pub max_attempts: Option<i32>,
}

pub struct NewQuestion {
    pub prompt: String,
    pub kind: QuestionKind,
    pub options: Vec<String>,
    pub correct_answers: Vec<String>,
    pub points: i32,
}

const TOPIC_COLUMNS: &str = r#""id", "courseId", "title", "description", "position", "createdAt""#;
const MATERIAL_COLUMNS: &str = r#""id", "topicId", "title", "kind", "url", "body", "durationSeconds",
    "isPreview", "position", "createdAt""#;
const TEST_COLUMNS: &str = r#""id", "topicId", "title", "description", "passScore", "timeLimitMinutes",
    "maxAttempts", "position", "createdAt""#;
const QUESTION_COLUMNS: &str =
    r#""id", "testId", "prompt", "kind", "options", "correctAnswers", "points", "position""#;

pub async fn find_owner(
    proxy: &DatabaseProxy,
    content: ContentRef<'_>,
) -> Result<Option<ContentOwner>, sqlx::Error> {
    let (join, id) = match content {
        ContentRef::Topic(id) => (r#"FROM "topics" t"#, id),
        ContentRef::Material(id) => (
            r#"FROM "materials" x JOIN "topics" t ON t."id" = x."topicId""#,
            id,
        ),
        ContentRef::Test(id) => (r#"FROM "tests" x JOIN "topics" t ON t."id" = x."topicId""#, id),
        ContentRef::Question(id) => (
            r#"FROM "questions" x
               JOIN "tests" q ON q."id" = x."testId"
               JOIN "topics" t ON t."id" = q."topicId""#,
            id,
        ),
    };
    let key = match content {
        ContentRef::Topic(_) => r#"t."id""#,
        _ => r#"x."id""#,
    };
    let sql = format!(
        r#"SELECT c."id" AS "courseId", c."tutorId", c."published"
           {join}
           JOIN "courses" c ON c."id" = t."courseId"
           WHERE {key} = $1"#
    );
    sqlx::query_as::<_, ContentOwner>(&sql)
        .bind(id)
        .fetch_optional(proxy.pool())
        .await
}

// topics

pub async fn insert_topic(
    proxy: &DatabaseProxy,
    course_id: &str,
    title: &str,
    description: &str,
) -> Result<Topic, sqlx::Error> {
    let sql = format!(
        r#"INSERT INTO "topics" ("id", "courseId", "title", "description", "position")
           VALUES ($1, $2, $3, $4,
                   (SELECT COALESCE(MAX("position") + 1, 0) FROM "topics" WHERE "courseId" = $2))
           RETURNING {TOPIC_COLUMNS}"#
    );
    sqlx::query_as::<_, Topic>(&sql)
        .bind(Uuid::new_v4().to_string())
        .bind(course_id)
        .bind(title)
        .bind(description)
        .fetch_one(proxy.pool())
        .await
}

pub async fn list_topics(proxy: &DatabaseProxy, course_id: &str) -> Result<Vec<Topic>, sqlx::Error> {
    let sql = format!(
        r#"SELECT {TOPIC_COLUMNS} FROM "topics" WHERE "courseId" = $1 ORDER BY "position", "createdAt""#
    );
    sqlx::query_as::<_, Topic>(&sql)
        .bind(course_id)
        .fetch_all(proxy.pool())
        .await
}

pub async fn update_topic(
    proxy: &DatabaseProxy,
    topic_id: &str,
    title: Option<&str>,
    description: Option<&str>,
) -> Result<Option<Topic>, sqlx::Error> {
    let sql = format!(
        r#"UPDATE "topics" SET "title" = COALESCE($2, "title"), "description" = COALESCE($3, "description")
           WHERE "id" = $1
           RETURNING {TOPIC_COLUMNS}"#
    );
    sqlx::query_as::<_, Topic>(&sql)
        .bind(topic_id)
        .bind(title)
        .bind(description)
        .fetch_optional(proxy.pool())
        .await
}

pub async fn delete_topic(proxy: &DatabaseProxy, topic_id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(r#"DELETE FROM "topics" WHERE "id" = $1"#)
        .bind(topic_id)
        .execute(proxy.pool())
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Rewrites topic positions to `0..n` following `ordered_ids`. Returns `false`
/// without touching anything when the ids are not exactly the course's topics.
pub async fn reorder_topics(
    proxy: &DatabaseProxy,
    course_id: &str,
    ordered_ids: &[String],
) -> Result<bool, sqlx::Error> {
    let mut tx = proxy.pool().begin().await?;

    let current: Vec<String> = sqlx::query_scalar(
        r#"SELECT "id" FROM "topics" WHERE "courseId" = $1 FOR UPDATE"#,
    )
    .bind(course_id)
    .fetch_all(&mut *tx)
    .await?;

    if !is_permutation(&current, ordered_ids) {
        tx.rollback().await?;
        return Ok(false);
    }

    sqlx::query(
        r#"UPDATE "topics" t SET "position" = (o.ord - 1)::INTEGER
           FROM UNNEST($2::TEXT[]) WITH ORDINALITY AS o("id", ord)
           WHERE t."id" = o."id" AND t."courseId" = $1"#,
    )
    .bind(course_id)
    .bind(ordered_ids)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(true)
}

fn is_permutation(current: &[String], proposed: &[String]) -> bool {
    if current.len() != proposed.len() {
        return false;
    }
    let existing: HashSet<&str> = current.iter().map(String::as_str).collect();
    let mut seen = HashSet::with_capacity(proposed.len());
    proposed
        .iter()
        .all(|id| existing.contains(id.as_str()) && seen.insert(id.as_str()))
}

// materials

pub async fn insert_material(
    proxy: &DatabaseProxy,
    topic_id: &str,
    material: &NewMaterial,
) -> Result<Material, sqlx::Error> {
    let sql = format!(
        r#"INSERT INTO "materials" ("id", "topicId", "title", "kind", "url", "body", "durationSeconds",
                                    "isPreview", "position")
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8,
                   (SELECT COALESCE(MAX("position") + 1, 0) FROM "materials" WHERE "topicId" = $2))
           RETURNING {MATERIAL_COLUMNS}"#
    );
    sqlx::query_as::<_, Material>(&sql)
        .bind(Uuid::new_v4().to_string())
        .bind(topic_id)
        .bind(&material.title)
        .bind(material.kind)
        .bind(material.url.as_deref())
        .bind(material.body.as_deref())
        .bind(material.duration_seconds)
        .bind(material.is_preview)
        .fetch_one(proxy.pool())
        .await
}

pub async fn find_material(proxy: &DatabaseProxy, material_id: &str) -> Result<Option<Material>, sqlx::Error> {
    let sql = format!(r#"SELECT {MATERIAL_COLUMNS} FROM "materials" WHERE "id" = $1"#);
    sqlx::query_as::<_, Material>(&sql)
        .bind(material_id)
        .fetch_optional(proxy.pool())
        .await
}

pub async fn list_materials(proxy: &DatabaseProxy, topic_id: &str) -> Result<Vec<Material>, sqlx::Error> {
    let sql = format!(
        r#"SELECT {MATERIAL_COLUMNS} FROM "materials" WHERE "topicId" = $1 ORDER BY "position", "createdAt""#
    );
    sqlx::query_as::<_, Material>(&sql)
        .bind(topic_id)
        .fetch_all(proxy.pool())
        .await
}

/// Replaces the editable fields of a material with an already-validated version.
pub async fn replace_material(
    proxy: &DatabaseProxy,
    material_id: &str,
    material: &NewMaterial,
) -> Result<Option<Material>, sqlx::Error> {
    let sql = format!(
        r#"UPDATE "materials" SET "title" = $2, "kind" = $3, "url" = $4, "body" = $5,
                                  "durationSeconds" = $6, "isPreview" = $7
           WHERE "id" = $1
           RETURNING {MATERIAL_COLUMNS}"#
    );
    sqlx::query_as::<_, Material>(&sql)
        .bind(material_id)
        .bind(&material.title)
        .bind(material.kind)
        .bind(material.url.as_deref())
        .bind(material.body.as_deref())
        .bind(material.duration_seconds)
        .bind(material.is_preview)
        .fetch_optional(proxy.pool())
        .await
}

pub async fn delete_material(proxy: &DatabaseProxy, material_id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(r#"DELETE FROM "materials" WHERE "id" = $1"#)
        .bind(material_id)
        .execute(proxy.pool())
        .await?;
    Ok(result.rows_affected() > 0)
}

// tests

pub async fn insert_test(proxy: &DatabaseProxy, topic_id: &str, test: &NewTest) -> Result<Test, sqlx::Error> {
    let sql = format!(
        r#"INSERT INTO "tests" ("id", "topicId", "title", "description", "passScore", "timeLimitMinutes",
                                "maxAttempts", "position")
           VALUES ($1, $2, $3, $4, $5, $6, $7,
                   (SELECT COALESCE(MAX("position") + 1, 0) FROM "tests" WHERE "topicId" = $2))
           RETURNING {TEST_COLUMNS}"#
    );
    sqlx::query_as::<_, Test>(&sql)
        .bind(Uuid::new_v4().to_string())
        .bind(topic_id)
        .bind(&test.title)
        .bind(&test.description)
        .bind(test.pass_score)
        .bind(test.time_limit_minutes)
        .bind(test.max_attempts)
        .fetch_one(proxy.pool())
        .await
}

pub async fn find_test(proxy: &DatabaseProxy, test_id: &str) -> Result<Option<Test>, sqlx::Error> {
    let sql = format!(r#"SELECT {TEST_COLUMNS} FROM "tests" WHERE "id" = $1"#);
    sqlx::query_as::<_, Test>(&sql)
        .bind(test_id)
        .fetch_optional(proxy.pool())
        .await
}

pub async fn replace_test(proxy: &DatabaseProxy, test_id: &str, test: &NewTest) -> Result<Option<Test>, sqlx::Error> {
    let sql = format!(
        r#"UPDATE "tests" SET "title" = $2, "description" = $3, "passScore" = $4,
                              "timeLimitMinutes" = $5, "maxAttempts" = $6
           WHERE "id" = $1
           RETURNING {TEST_COLUMNS}"#
    );
    sqlx::query_as::<_, Test>(&sql)
        .bind(test_id)
        .bind(&test.title)
        .bind(&test.description)
        .bind(test.pass_score)
        .bind(test.time_limit_minutes)
        .bind(test.max_attempts)
        .fetch_optional(proxy.pool())
        .await
}

pub async fn delete_test(proxy: &DatabaseProxy, test_id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(r#"DELETE FROM "tests" WHERE "id" = $1"#)
        .bind(test_id)
        .execute(proxy.pool())
        .await?;
    Ok(result.rows_affected() > 0)
}

// questions

pub async fn insert_question(
    proxy: &DatabaseProxy,
    test_id: &str,
    question: &NewQuestion,
) -> Result<Question, sqlx::Error> {
    let sql = format!(
        r#"INSERT INTO "questions" ("id", "testId", "prompt", "kind", "options", "correctAnswers",
                                    "points", "position")
           VALUES ($1, $2, $3, $4, $5, $6, $7,
                   (SELECT COALESCE(MAX("position") + 1, 0) FROM "questions" WHERE "testId" = $2))
           RETURNING {QUESTION_COLUMNS}"#
    );
    let row = sqlx::query_as::<_, QuestionRow>(&sql)
        .bind(Uuid::new_v4().to_string())
        .bind(test_id)
        .bind(&question.prompt)
        .bind(question.kind)
        .bind(Json(&question.options))
        .bind(Json(&question.correct_answers))
        .bind(question.points)
        .fetch_one(proxy.pool())
        .await?;
    Ok(row.into())
}

pub async fn list_questions(proxy: &DatabaseProxy, test_id: &str) -> Result<Vec<Question>, sqlx::Error> {
    let sql = format!(r#"SELECT {QUESTION_COLUMNS} FROM "questions" WHERE "testId" = $1 ORDER BY "position""#);
    let rows = sqlx::query_as::<_, QuestionRow>(&sql)
        .bind(test_id)
        .fetch_all(proxy.pool())
        .await?;
    Ok(rows.into_iter().map(Question::from).collect())
}

pub async fn replace_question(
    proxy: &DatabaseProxy,
    question_id: &str,
    question: &NewQuestion,
) -> Result<Option<Question>, sqlx::Error> {
    let sql = format!(
        r#"UPDATE "questions" SET "prompt" = $2, "kind" = $3, "options" = $4, "correctAnswers" = $5,
                                  "points" = $6
           WHERE "id" = $1
           RETURNING {QUESTION_COLUMNS}"#
    );
    let row = sqlx::query_as::<_, QuestionRow>(&sql)
        .bind(question_id)
        .bind(&question.prompt)
        .bind(question.kind)
        .bind(Json(&question.options))
        .bind(Json(&question.correct_answers))
        .bind(question.points)
        .fetch_optional(proxy.pool())
        .await?;
    Ok(row.map(Question::from))
}

pub async fn delete_question(proxy: &DatabaseProxy, question_id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(r#"DELETE FROM "questions" WHERE "id" = $1"#)
        .bind(question_id)
        .execute(proxy.pool())
        .await?;
    Ok(result.rows_affected() > 0)
}

// outline

pub async fn course_outline(proxy: &DatabaseProxy, course_id: &str) -> Result<Vec<TopicOutline>, sqlx::Error> {
    let topics = list_topics(proxy, course_id).await?;

    let materials = sqlx::query_as::<_, MaterialSummary>(
        r#"SELECT m."id", m."topicId", m."title", m."kind", m."durationSeconds", m."isPreview"
           FROM "materials" m
           JOIN "topics" t ON t."id" = m."topicId"
           WHERE t."courseId" = $1
           ORDER BY m."position", m."createdAt""#,
    )
    .bind(course_id)
    .fetch_all(proxy.pool())
    .await?;

    let tests = sqlx::query_as::<_, TestSummary>(
        r#"SELECT x."id", x."topicId", x."title", x."passScore",
                  (SELECT COUNT(*) FROM "questions" q WHERE q."testId" = x."id") AS "questionCount"
           FROM "tests" x
           JOIN "topics" t ON t."id" = x."topicId"
           WHERE t."courseId" = $1
           ORDER BY x."position", x."createdAt""#,
    )
    .bind(course_id)
    .fetch_all(proxy.pool())
    .await?;

    let mut materials_by_topic: HashMap<String, Vec<MaterialSummary>> = HashMap::new();
    for material in materials {
        materials_by_topic
            .entry(material.topic_id.clone())
            .or_default()
            .push(material);
    }
    let mut tests_by_topic: HashMap<String, Vec<TestSummary>> = HashMap::new();
    for test in tests {
        tests_by_topic.entry(test.topic_id.clone()).or_default().push(test);
    }

    Ok(topics
        .into_iter()
        .map(|topic| {
            let materials = materials_by_topic.remove(&topic.id).unwrap_or_default();
            let tests = tests_by_topic.remove(&topic.id).unwrap_or_default();
            TopicOutline {
                material_count: materials.len(),
                test_count: tests.len(),
                id: topic.id,
                title: topic.title,
                description: topic.description,
                position: topic.position,
                materials,
                tests,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn permutation_check_requires_exact_id_set() {
        let current = ids(&["a", "b", "c"]);
        assert!(is_permutation(&current, &ids(&["c", "a", "b"])));
        assert!(!is_permutation(&current, &ids(&["a", "b"])));
        assert!(!is_permutation(&current, &ids(&["a", "a", "b"])));
        assert!(!is_permutation(&current, &ids(&["a", "b", "z"])));
        assert!(is_permutation(&[], &[]));
    }
}
