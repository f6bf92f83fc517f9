use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::Deserialize;

use crate::auth::AuthUser;
use crate::db::operations::enrollments::{self, EnrollmentFilter};
use crate::response::{ok, paginate, AppError, Page};
use crate::services::enrollment::{self, EnrollmentAction, ReviewInput};
use crate::state::AppState;
use crate::types::EnrollmentStatus;

const PAGE_DEFAULT: i64 = 20;
const PAGE_MAX: i64 = 100;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_requests))
        .route("/:id/approve", post(approve))
        .route("/:id/reject", post(reject))
        .route("/:id/activate", post(activate))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListQuery {
    status: Option<EnrollmentStatus>,
    course_id: Option<String>,
    page: Option<i64>,
    page_size: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReviewRequest {
    #[serde(default, alias = "reason")]
    note: Option<String>,
    #[serde(default)]
    payment_reference: Option<String>,
}

async fn list_requests(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    let (page, page_size, offset) = paginate(query.page, query.page_size, PAGE_DEFAULT, PAGE_MAX);
    let filter = EnrollmentFilter {
        status: query.status,
        course_id: query.course_id.filter(|id| !id.is_empty()),
        user_id: None,
        tutor_id: None,
    };
    let (items, total) = enrollments::list_views(&proxy, &filter, page_size, offset).await?;
    Ok(ok(Page::new(items, total, page, page_size)))
}

async fn approve(
    state: State<AppState>,
    admin: Extension<AuthUser>,
    Path(request_id): Path<String>,
    payload: Option<Json<ReviewRequest>>,
) -> Result<impl IntoResponse, AppError> {
    apply(state, admin, &request_id, EnrollmentAction::Approve, payload).await
}

async fn reject(
    state: State<AppState>,
    admin: Extension<AuthUser>,
    Path(request_id): Path<String>,
    payload: Option<Json<ReviewRequest>>,
) -> Result<impl IntoResponse, AppError> {
    apply(state, admin, &request_id, EnrollmentAction::Reject, payload).await
}

async fn activate(
    state: State<AppState>,
    admin: Extension<AuthUser>,
    Path(request_id): Path<String>,
    payload: Option<Json<ReviewRequest>>,
) -> Result<impl IntoResponse, AppError> {
    apply(state, admin, &request_id, EnrollmentAction::Activate, payload).await
}

async fn apply(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthUser>,
    request_id: &str,
    action: EnrollmentAction,
    payload: Option<Json<ReviewRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    let body = payload.map(|Json(body)| body).unwrap_or_default();
    let updated = enrollment::review(
        &proxy,
        &state.realtime(),
        &admin,
        request_id,
        ReviewInput {
            action,
            note: body.note.as_deref(),
            payment_reference: body.payment_reference.as_deref(),
        },
    )
    .await?;
    Ok(ok(updated))
}
