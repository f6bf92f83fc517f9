use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};

use crate::auth::AuthUser;
use crate::db::operations::content::{
    self, ContentOwner, ContentRef, Material, NewMaterial, NewQuestion, NewTest, Question, Test,
};
use crate::db::operations::progress;
use crate::db::DatabaseProxy;
use crate::response::{created, ok, AppError};
use crate::services::enrollment::ensure_access;
use crate::services::grading::{normalize_question, PublicQuestion, MAX_QUESTION_POINTS};
use crate::services::validation::{is_http_url, required_text};
use crate::state::AppState;
use crate::types::{MaterialKind, QuestionKind};

use super::courses::{invalidate_catalog, load_owned_course};

const TITLE_MAX: usize = 160;
const PROMPT_MAX: usize = 2000;
const DEFAULT_PASS_SCORE: i32 = 60;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/courses/:id/topics", get(list_topics).post(create_topic))
        .route("/api/courses/:id/topics/reorder", put(reorder_topics))
        .route("/api/topics/:id", put(update_topic).delete(delete_topic))
        .route("/api/topics/:id/materials", get(list_materials).post(create_material))
        .route("/api/topics/:id/tests", post(create_test))
        .route(
            "/api/materials/:id",
            get(get_material).put(update_material).delete(delete_material),
        )
        .route("/api/tests/:id", get(get_test).put(update_test).delete(delete_test))
        .route("/api/tests/:id/questions", get(list_questions).post(create_question))
        .route("/api/questions/:id", put(update_question).delete(delete_question))
}

async fn owner_of(proxy: &DatabaseProxy, content: ContentRef<'_>) -> Result<ContentOwner, AppError> {
    content::find_owner(proxy, content).await?.ok_or_else(|| {
        let what = match content {
            ContentRef::Topic(_) => "Topic",
            ContentRef::Material(_) => "Material",
            ContentRef::Test(_) => "Test",
            ContentRef::Question(_) => "Question",
        };
        AppError::not_found(format!("{what} not found"))
    })
}

fn can_edit(user: &AuthUser, owner: &ContentOwner) -> bool {
    user.is_admin() || owner.tutor_id == user.id
}

async fn editable(
    proxy: &DatabaseProxy,
    user: &AuthUser,
    content: ContentRef<'_>,
) -> Result<ContentOwner, AppError> {
    let owner = owner_of(proxy, content).await?;
    if !can_edit(user, &owner) {
        return Err(AppError::forbidden("You do not own this course"));
    }
    Ok(owner)
}

// ---- topics ----

#[derive(Debug, Deserialize)]
struct TopicRequest {
    title: String,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TopicPatchRequest {
    title: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReorderRequest {
    topic_ids: Vec<String>,
}

async fn list_topics(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(course_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    let course = crate::db::operations::courses::find_course(&proxy, &course_id)
        .await?
        .ok_or_else(|| AppError::not_found("Course not found"))?;
    ensure_access(&proxy, &user, &course).await?;
    Ok(ok(content::course_outline(&proxy, &course.id).await?))
}

async fn create_topic(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(course_id): Path<String>,
    Json(payload): Json<TopicRequest>,
) -> Result<Response, AppError> {
    let title = required_text(&payload.title, "title", TITLE_MAX).map_err(AppError::validation)?;
    let description = payload.description.as_deref().unwrap_or("").trim().to_string();

    let proxy = state.require_db()?;
    load_owned_course(&proxy, &user, &course_id).await?;
    let topic = content::insert_topic(&proxy, &course_id, &title, &description).await?;
    invalidate_catalog(&state).await;
    Ok(created(topic))
}

async fn update_topic(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(topic_id): Path<String>,
    Json(payload): Json<TopicPatchRequest>,
) -> Result<impl IntoResponse, AppError> {
    let title = payload
        .title
        .map(|t| required_text(&t, "title", TITLE_MAX))
        .transpose()
        .map_err(AppError::validation)?;
    let description = payload.description.map(|d| d.trim().to_string());

    let proxy = state.require_db()?;
    editable(&proxy, &user, ContentRef::Topic(&topic_id)).await?;
    let topic = content::update_topic(&proxy, &topic_id, title.as_deref(), description.as_deref())
        .await?
        .ok_or_else(|| AppError::not_found("Topic not found"))?;
    invalidate_catalog(&state).await;
    Ok(ok(topic))
}

async fn delete_topic(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(topic_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    editable(&proxy, &user, ContentRef::Topic(&topic_id)).await?;
    content::delete_topic(&proxy, &topic_id).await?;
    invalidate_catalog(&state).await;
    Ok(ok(serde_json::json!({ "deleted": true })))
}

async fn reorder_topics(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(course_id): Path<String>,
    Json(payload): Json<ReorderRequest>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    load_owned_course(&proxy, &user, &course_id).await?;

    if !content::reorder_topics(&proxy, &course_id, &payload.topic_ids).await? {
        return Err(AppError::validation(
            "topicIds must list every topic of the course exactly once",
        ));
    }
    invalidate_catalog(&state).await;
    Ok(ok(content::list_topics(&proxy, &course_id).await?))
}

// ---- materials ----

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MaterialRequest {
    title: String,
    kind: MaterialKind,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    duration_seconds: Option<i32>,
    #[serde(default)]
    is_preview: bool,
}

fn validate_material(payload: MaterialRequest) -> Result<NewMaterial, AppError> {
    let title = required_text(&payload.title, "title", TITLE_MAX).map_err(AppError::validation)?;
    let url = payload
        .url
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty());
    let body = payload.body.filter(|b| !b.trim().is_empty());

    if payload.kind.requires_url() {
        match url.as_deref() {
            Some(url) if is_http_url(url) => {}
            _ => {
                return Err(AppError::validation(format!(
                    "{} materials require an http(s) url",
                    payload.kind
                )))
            }
        }
    } else if body.is_none() {
        return Err(AppError::validation("TEXT materials require a body"));
    }
    if payload.duration_seconds.is_some_and(|d| d < 0) {
        return Err(AppError::validation("durationSeconds must not be negative"));
    }

    Ok(NewMaterial {
        title,
        kind: payload.kind,
        url,
        body,
        duration_seconds: payload.duration_seconds,
        is_preview: payload.is_preview,
    })
}

async fn list_materials(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(topic_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    let owner = owner_of(&proxy, ContentRef::Topic(&topic_id)).await?;
    ensure_access(&proxy, &user, &owner).await?;
    Ok(ok(content::list_materials(&proxy, &topic_id).await?))
}

async fn create_material(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(topic_id): Path<String>,
    Json(payload): Json<MaterialRequest>,
) -> Result<Response, AppError> {
    let material = validate_material(payload)?;
    let proxy = state.require_db()?;
    editable(&proxy, &user, ContentRef::Topic(&topic_id)).await?;

    let material = content::insert_material(&proxy, &topic_id, &material).await?;
    invalidate_catalog(&state).await;
    Ok(created(material))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MaterialView {
    #[serde(flatten)]
    material: Material,
    completed: bool,
}

async fn get_material(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(material_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    let owner = owner_of(&proxy, ContentRef::Material(&material_id)).await?;
    let material = content::find_material(&proxy, &material_id)
        .await?
        .ok_or_else(|| AppError::not_found("Material not found"))?;
    if !(owner.published && material.is_preview) {
        ensure_access(&proxy, &user, &owner).await?;
    }

    let completed = progress::completed_material_ids(&proxy, &user.id, &owner.course_id)
        .await?
        .contains(&material.id);
    Ok(ok(MaterialView { material, completed }))
}

async fn update_material(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(material_id): Path<String>,
    Json(payload): Json<MaterialRequest>,
) -> Result<impl IntoResponse, AppError> {
    let material = validate_material(payload)?;
    let proxy = state.require_db()?;
    editable(&proxy, &user, ContentRef::Material(&material_id)).await?;

    let material = content::replace_material(&proxy, &material_id, &material)
        .await?
        .ok_or_else(|| AppError::not_found("Material not found"))?;
    invalidate_catalog(&state).await;
    Ok(ok(material))
}

async fn delete_material(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(material_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    editable(&proxy, &user, ContentRef::Material(&material_id)).await?;
    content::delete_material(&proxy, &material_id).await?;
    invalidate_catalog(&state).await;
    Ok(ok(serde_json::json!({ "deleted": true })))
}

// ---- tests ----

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TestRequest {
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    pass_score: Option<i32>,
    #[serde(default)]
    time_limit_minutes: Option<i32>,
    #[serde(default)]
    max_attempts: Option<i32>,
}

fn validate_test(payload: TestRequest) -> Result<NewTest, AppError> {
    let title = required_text(&payload.title, "title", TITLE_MAX).map_err(AppError::validation)?;
    let pass_score = payload.pass_score.unwrap_or(DEFAULT_PASS_SCORE);
    if !(0..=100).contains(&pass_score) {
        return Err(AppError::validation("passScore must be between 0 and 100"));
    }
    if payload.time_limit_minutes.is_some_and(|m| m < 1) {
        return Err(AppError::validation("timeLimitMinutes must be at least 1"));
    }
    if payload.max_attempts.is_some_and(|m| m < 1) {
        return Err(AppError::validation("maxAttempts must be at least 1"));
    }

    Ok(NewTest {
        title,
        description: payload.description.unwrap_or_default().trim().to_string(),
        pass_score,
        time_limit_minutes: payload.time_limit_minutes,
        max_attempts: payload.max_attempts,
    })
}

#[derive(Serialize)]
#[serde(untagged)]
enum QuestionSet {
    Full(Vec<Question>),
    Public(Vec<PublicQuestion>),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TestView {
    #[serde(flatten)]
    test: Test,
    questions: QuestionSet,
    attempts_used: i64,
    attempts_remaining: Option<i64>,
}

async fn create_test(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(topic_id): Path<String>,
    Json(payload): Json<TestRequest>,
) -> Result<Response, AppError> {
    let test = validate_test(payload)?;
    let proxy = state.require_db()?;
    editable(&proxy, &user, ContentRef::Topic(&topic_id)).await?;

    let test = content::insert_test(&proxy, &topic_id, &test).await?;
    invalidate_catalog(&state).await;
    Ok(created(test))
}

async fn get_test(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(test_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    let owner = owner_of(&proxy, ContentRef::Test(&test_id)).await?;
    ensure_access(&proxy, &user, &owner).await?;

    let test = content::find_test(&proxy, &test_id)
        .await?
        .ok_or_else(|| AppError::not_found("Test not found"))?;
    let questions = content::list_questions(&proxy, &test_id).await?;
    let questions = if can_edit(&user, &owner) {
        QuestionSet::Full(questions)
    } else {
        QuestionSet::Public(questions.into_iter().map(PublicQuestion::from).collect())
    };

    let attempts_used = progress::count_attempts(&proxy, &user.id, &test_id).await?;
    let attempts_remaining = test
        .max_attempts
        .map(|max| (i64::from(max) - attempts_used).max(0));

    Ok(ok(TestView {
        test,
        questions,
        attempts_used,
        attempts_remaining,
    }))
}

async fn update_test(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(test_id): Path<String>,
    Json(payload): Json<TestRequest>,
) -> Result<impl IntoResponse, AppError> {
    let test = validate_test(payload)?;
    let proxy = state.require_db()?;
    editable(&proxy, &user, ContentRef::Test(&test_id)).await?;

    let test = content::replace_test(&proxy, &test_id, &test)
        .await?
        .ok_or_else(|| AppError::not_found("Test not found"))?;
    invalidate_catalog(&state).await;
    Ok(ok(test))
}

async fn delete_test(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(test_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    editable(&proxy, &user, ContentRef::Test(&test_id)).await?;
    content::delete_test(&proxy, &test_id).await?;
    invalidate_catalog(&state).await;
    Ok(ok(serde_json::json!({ "deleted": true })))
}

// ---- questions ----

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuestionRequest {
    prompt: String,
    kind: QuestionKind,
    #[serde(default)]
    options: Vec<String>,
    #[serde(default)]
    correct_answers: Vec<String>,
    #[serde(default)]
    points: Option<i32>,
}

fn validate_question(payload: QuestionRequest) -> Result<NewQuestion, AppError> {
    let prompt =
        required_text(&payload.prompt, "prompt", PROMPT_MAX).map_err(AppError::validation)?;
    let points = payload.points.unwrap_or(1);
    if !(1..=MAX_QUESTION_POINTS).contains(&points) {
        return Err(AppError::validation(format!(
            "points must be between 1 and {MAX_QUESTION_POINTS}"
        )));
    }
    let (options, correct_answers) =
        normalize_question(payload.kind, payload.options, payload.correct_answers)?;

    Ok(NewQuestion {
        prompt,
        kind: payload.kind,
        options,
        correct_answers,
        points,
    })
}

async fn list_questions(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(test_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    editable(&proxy, &user, ContentRef::Test(&test_id)).await?;
    Ok(ok(content::list_questions(&proxy, &test_id).await?))
}

async fn create_question(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(test_id): Path<String>,
    Json(payload): Json<QuestionRequest>,
) -> Result<Response, AppError> {
    let question = validate_question(payload)?;
    let proxy = state.require_db()?;
    editable(&proxy, &user, ContentRef::Test(&test_id)).await?;
    Ok(created(content::insert_question(&proxy, &test_id, &question).await?))
}

async fn update_question(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(question_id): Path<String>,
    Json(payload): Json<QuestionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let question = validate_question(payload)?;
    let proxy = state.require_db()?;
    editable(&proxy, &user, ContentRef::Question(&question_id)).await?;

    let question = content::replace_question(&proxy, &question_id, &question)
        .await?
        .ok_or_else(|| AppError::not_found("Question not found"))?;
    Ok(ok(question))
}

async fn delete_question(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(question_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    editable(&proxy, &user, ContentRef::Question(&question_id)).await?;
    content::delete_question(&proxy, &question_id).await?;
    Ok(ok(serde_json::json!({ "deleted": true })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn material(kind: MaterialKind, url: Option<&str>, body: Option<&str>) -> MaterialRequest {
        MaterialRequest {
            title: "Intro".to_string(),
            kind,
            url: url.map(str::to_string),
            body: body.map(str::to_string),
            duration_seconds: None,
            is_preview: false,
        }
    }

    #[test]
    fn url_kinds_need_http_urls() {
        assert!(validate_material(material(MaterialKind::Video, None, None)).is_err());
        assert!(validate_material(material(MaterialKind::Pdf, Some("file:///a.pdf"), None)).is_err());
        let ok = validate_material(material(MaterialKind::Link, Some(" https://example.com "), None));
        assert_eq!(ok.unwrap().url.as_deref(), Some("https://example.com"));
    }

    #[test]
    fn text_needs_a_body() {
        assert!(validate_material(material(MaterialKind::Text, None, Some("   "))).is_err());
        assert!(validate_material(material(MaterialKind::Text, None, Some("Read me"))).is_ok());
    }

    #[test]
    fn test_bounds_are_checked() {
        let request = |pass_score, max_attempts| TestRequest {
            title: "Quiz".to_string(),
            description: None,
            pass_score,
            time_limit_minutes: None,
            max_attempts,
        };
        assert_eq!(validate_test(request(None, None)).unwrap().pass_score, 60);
        assert!(validate_test(request(Some(101), None)).is_err());
        assert!(validate_test(request(Some(50), Some(0))).is_err());
    }

    #[test]
    fn question_points_are_bounded() {
        let request = |points| QuestionRequest {
            prompt: "Is Rust memory safe?".to_string(),
            kind: QuestionKind::TrueFalse,
            options: Vec::new(),
            correct_answers: vec!["true".to_string()],
            points,
        };
        assert_eq!(validate_question(request(None)).unwrap().points, 1);
        assert!(validate_question(request(Some(MAX_QUESTION_POINTS))).is_ok());
        assert!(validate_question(request(Some(0))).is_err());
        assert!(validate_question(request(Some(MAX_QUESTION_POINTS + 1))).is_err());
        assert!(validate_question(request(Some(i32::MAX))).is_err());
    }
}
