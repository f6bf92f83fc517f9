use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Extension, Json, Router};
use serde::Deserialize;

use crate::auth::AuthUser;
use crate::db::operations::courses;
use crate::db::operations::enrollments::{self, EnrollmentFilter};
use crate::middleware::auth::ensure_role;
use crate::response::{created, ok, paginate, AppError, Page};
use crate::services::enrollment::{self, payment_instructions, CreateRequestInput, WorkflowError};
use crate::state::AppState;
use crate::types::{EnrollmentStatus, Role};

const PAGE_DEFAULT: i64 = 20;
const PAGE_MAX: i64 = 100;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(my_requests).post(create_request))
        .route("/tutor", get(tutor_requests))
        .route("/:id", get(get_request).delete(withdraw_request))
        .route("/:id/payment", get(payment))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListQuery {
    status: Option<EnrollmentStatus>,
    course_id: Option<String>,
    page: Option<i64>,
    page_size: Option<i64>,
}

async fn create_request(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(payload): Json<CreateRequestInput>,
) -> Result<Response, AppError> {
    let proxy = state.require_db()?;
    let request = enrollment::create_request(&proxy, &user, payload).await?;
    Ok(created(request))
}

async fn my_requests(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    let (page, page_size, offset) = paginate(query.page, query.page_size, PAGE_DEFAULT, PAGE_MAX);
    let filter = EnrollmentFilter {
        status: query.status,
        course_id: query.course_id,
        user_id: Some(user.id.clone()),
        tutor_id: None,
    };
    let (items, total) = enrollments::list_views(&proxy, &filter, page_size, offset).await?;
    Ok(ok(Page::new(items, total, page, page_size)))
}

async fn tutor_requests(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, AppError> {
    ensure_role(&user, &[Role::Tutor])?;
    let proxy = state.require_db()?;
    let (page, page_size, offset) = paginate(query.page, query.page_size, PAGE_DEFAULT, PAGE_MAX);
    let filter = EnrollmentFilter {
        status: query.status,
        course_id: query.course_id,
        user_id: None,
        tutor_id: Some(user.id.clone()),
    };
    let (items, total) = enrollments::list_views(&proxy, &filter, page_size, offset).await?;
    Ok(ok(Page::new(items, total, page, page_size)))
}

async fn get_request(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(request_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    let view = enrollments::find_view(&proxy, &request_id)
        .await?
        .filter(|view| user.is_admin() || view.user_id == user.id || view.tutor_id == user.id)
        .ok_or(WorkflowError::NotFound)?;
    Ok(ok(view))
}

async fn withdraw_request(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(request_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    enrollment::withdraw(&proxy, &user, &request_id).await?;
    tracing::info!(request_id = %request_id, user_id = %user.id, "enrollment request withdrawn");
    Ok(ok(serde_json::json!({ "deleted": true })))
}

async fn payment(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(request_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    let request = enrollments::find_request(&proxy, &request_id)
        .await?
        .filter(|request| request.user_id == user.id || user.is_admin())
        .ok_or(WorkflowError::NotFound)?;
    if request.status != EnrollmentStatus::Approved {
        return Err(AppError::conflict(
            "Payment instructions are only available for approved requests",
        ));
    }

    let course = courses::find_course(&proxy, &request.course_id)
        .await?
        .ok_or_else(|| AppError::not_found("Course not found"))?;
    Ok(ok(payment_instructions(&request, &course, &state.config().payment)))
}
