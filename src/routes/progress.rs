use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::AuthUser;
use crate::db::operations::content::{self, ContentRef};
use crate::db::operations::courses;
use crate::db::operations::progress::{self, NewAttempt};
use crate::response::{created, json_error, ok, paginate, AppError};
use crate::services::enrollment::ensure_access;
use crate::services::grading::{grade, GradeReport};
use crate::services::progress::course_progress;
use crate::services::rewards;
use crate::state::AppState;

const ATTEMPTS_DEFAULT: i64 = 20;
const ATTEMPTS_MAX: i64 = 100;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/materials/:id/complete", post(complete_material))
        .route("/api/courses/:id/progress", get(course_progress_handler))
        .route("/api/tests/:id/attempts", get(test_attempts).post(submit_attempt))
        .route("/api/attempts/mine", get(my_attempts))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CompletionResponse {
    material_id: String,
    newly_completed: bool,
    points_awarded: i32,
}

async fn complete_material(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(material_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    let owner = content::find_owner(&proxy, ContentRef::Material(&material_id))
        .await?
        .ok_or_else(|| AppError::not_found("Material not found"))?;
    ensure_access(&proxy, &user, &owner).await?;

    let completion =
        rewards::complete_material(&proxy, &state.realtime(), &user.id, &material_id).await?;

    Ok(ok(CompletionResponse {
        material_id,
        newly_completed: completion.newly_completed,
        points_awarded: completion.points_awarded,
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CourseProgressResponse {
    #[serde(flatten)]
    progress: crate::services::progress::CourseProgress,
    completed_material_ids: Vec<String>,
}

async fn course_progress_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(course_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    let course = courses::find_course(&proxy, &course_id)
        .await?
        .ok_or_else(|| AppError::not_found("Course not found"))?;
    ensure_access(&proxy, &user, &course).await?;

    let counts = progress::course_counts(&proxy, &user.id, &course.id).await?;
    let completed_material_ids = progress::completed_material_ids(&proxy, &user.id, &course.id).await?;
    Ok(ok(CourseProgressResponse {
        progress: course_progress(&course.id, counts),
        completed_material_ids,
    }))
}

#[derive(Debug, Deserialize)]
struct SubmitRequest {
    answers: HashMap<String, Vec<String>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponse {
    attempt_id: String,
    submitted_at: DateTime<Utc>,
    #[serde(flatten)]
    report: GradeReport,
    points_earned: i32,
}

async fn submit_attempt(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(test_id): Path<String>,
    Json(payload): Json<SubmitRequest>,
) -> Result<Response, AppError> {
    let proxy = state.require_db()?;
    let owner = content::find_owner(&proxy, ContentRef::Test(&test_id))
        .await?
        .ok_or_else(|| AppError::not_found("Test not found"))?;
    ensure_access(&proxy, &user, &owner).await?;

    let test = content::find_test(&proxy, &test_id)
        .await?
        .ok_or_else(|| AppError::not_found("Test not found"))?;

    let questions = content::list_questions(&proxy, &test_id).await?;
    let report = grade(&questions, &payload.answers, test.pass_score)?;
    let answers = serde_json::to_value(&payload.answers)
        .map_err(|err| AppError::internal(format!("answer encoding failed: {err}")))?;

    let attempt = NewAttempt {
        test_id: &test_id,
        user_id: &user.id,
        score: report.score,
        max_score: report.max_score,
        percentage: report.percentage,
        passed: report.passed,
        answers: &answers,
    };
    let recorded = rewards::record_attempt(&proxy, &state.realtime(), &attempt, test.max_attempts)
        .await?
        .ok_or_else(|| max_attempts_reached(test.max_attempts.unwrap_or_default()))?;

    tracing::info!(
        user_id = %user.id,
        test_id = %test_id,
        score = report.score,
        max_score = report.max_score,
        passed = report.passed,
        "test attempt submitted"
    );

    Ok(created(SubmitResponse {
        attempt_id: recorded.attempt_id,
        submitted_at: recorded.submitted_at,
        report,
        points_earned: recorded.points_earned,
    }))
}

fn max_attempts_reached(max_attempts: i32) -> AppError {
    json_error(
        StatusCode::CONFLICT,
        "MAX_ATTEMPTS_REACHED",
        format!("Maximum of {max_attempts} attempts reached"),
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttemptsQuery {
    page: Option<i64>,
    page_size: Option<i64>,
}

/// Editors see every learner's attempts; learners see their own.
async fn test_attempts(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(test_id): Path<String>,
    Query(query): Query<AttemptsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    let owner = content::find_owner(&proxy, ContentRef::Test(&test_id))
        .await?
        .ok_or_else(|| AppError::not_found("Test not found"))?;

    let (_, page_size, offset) = paginate(query.page, query.page_size, ATTEMPTS_DEFAULT, ATTEMPTS_MAX);
    let attempts = if user.is_admin() || owner.tutor_id == user.id {
        progress::list_test_attempts(&proxy, &test_id, page_size, offset).await?
    } else {
        progress::list_user_attempts(&proxy, &user.id, Some(&test_id), page_size).await?
    };
    Ok(ok(attempts))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MyAttemptsQuery {
    test_id: Option<String>,
    limit: Option<i64>,
}

async fn my_attempts(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<MyAttemptsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    let limit = query.limit.unwrap_or(ATTEMPTS_DEFAULT).clamp(1, ATTEMPTS_MAX);
    let attempts =
        progress::list_user_attempts(&proxy, &user.id, query.test_id.as_deref(), limit).await?;
    Ok(ok(attempts))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_attempts_map_to_conflict() {
        let err = max_attempts_reached(3);
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.code(), "MAX_ATTEMPTS_REACHED");
    }
}
