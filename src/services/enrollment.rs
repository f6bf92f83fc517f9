use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::auth::AuthUser;
use crate::config::PaymentContacts;
use crate::db::operations::content::ContentOwner;
use crate::db::operations::courses::{self, Course};
use crate::db::operations::enrollments::{self, EnrollmentRequest, Transition};
use crate::db::DatabaseProxy;
use crate::realtime::{RealtimeEvent, RealtimeHub};
use crate::response::AppError;
use crate::types::{EnrollmentStatus, PaymentChannel, Role};

const MESSAGE_MAX_CHARS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnrollmentAction {
    Approve,
    Reject,
    Activate,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("cannot {action:?} a request that is {from}")]
    InvalidTransition {
        from: EnrollmentStatus,
        action: EnrollmentAction,
    },
    #[error("enrollment request not found")]
    NotFound,
    #[error("an open enrollment request already exists for this course")]
    Duplicate,
    #[error("{0}")]
    NotAllowed(&'static str),
}

impl From<WorkflowError> for AppError {
    fn from(err: WorkflowError) -> Self {
        match err {
            WorkflowError::InvalidTransition { .. } => crate::response::json_error(
                axum::http::StatusCode::CONFLICT,
                "INVALID_TRANSITION",
                err.to_string(),
            ),
            WorkflowError::NotFound => AppError::not_found("Enrollment request not found"),
            WorkflowError::Duplicate => AppError::conflict(err.to_string()),
            WorkflowError::NotAllowed(message) => AppError::forbidden(message),
        }
    }
}

impl EnrollmentStatus {
    /// Next status for `action`. REJECTED and ACTIVE are terminal.
    pub fn transition(self, action: EnrollmentAction) -> Result<EnrollmentStatus, WorkflowError> {
        use EnrollmentAction::*;
        use EnrollmentStatus::*;

        match (self, action) {
            (Pending, Approve) => Ok(Approved),
            (Pending, Reject) | (Approved, Reject) => Ok(Rejected),
            (Approved, Activate) => Ok(Active),
            (from, action) => Err(WorkflowError::InvalidTransition { from, action }),
        }
    }
}

/// Approving a free course skips the payment step and lands on ACTIVE.
pub fn approval_target(price_cents: i64) -> EnrollmentStatus {
    if price_cents == 0 {
        EnrollmentStatus::Active
    } else {
        EnrollmentStatus::Approved
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInstructions {
    pub amount_cents: i64,
    pub currency: String,
    pub formatted_amount: String,
    pub reference: String,
    pub preferred_channel: Option<PaymentChannel>,
    pub message: String,
    pub whatsapp_url: Option<String>,
    pub telegram_url: Option<String>,
}

pub fn payment_reference(request_id: &str) -> String {
    let hex: String = request_id
        .chars()
        .filter(|c| c.is_ascii_hexdigit())
        .take(8)
        .collect();
    format!("ENR-{}", hex.to_ascii_uppercase())
}

pub fn format_amount(amount_cents: i64, currency: &str) -> String {
    format!("{} {}.{:02}", currency, amount_cents / 100, amount_cents % 100)
}

pub fn payment_instructions(
    request: &EnrollmentRequest,
    course: &Course,
    contacts: &PaymentContacts,
) -> PaymentInstructions {
    let reference = payment_reference(&request.id);
    let formatted_amount = format_amount(course.price_cents, &course.currency);
    let message = format!(
        "Hello! I would like to pay for the course \"{}\" ({}). Reference: {}",
        course.title, formatted_amount, reference
    );

    let whatsapp_url = contacts.whatsapp_number.as_deref().and_then(|number| {
        let digits: String = number.chars().filter(char::is_ascii_digit).collect();
        (!digits.is_empty())
            .then(|| format!("https://wa.me/{digits}?text={}", urlencoding::encode(&message)))
    });
    let telegram_url = contacts
        .telegram_username
        .as_deref()
        .filter(|name| !name.is_empty())
        .map(|name| format!("https://t.me/{name}"));

    PaymentInstructions {
        amount_cents: course.price_cents,
        currency: course.currency.clone(),
        formatted_amount,
        reference,
        preferred_channel: request.payment_channel,
        message,
        whatsapp_url,
        telegram_url,
    }
}

/// The parts of a course the access rule looks at.
#[derive(Debug, Clone, Copy)]
pub struct CourseRef<'a> {
    pub id: &'a str,
    pub tutor_id: &'a str,
}

impl<'a> From<&'a Course> for CourseRef<'a> {
    fn from(course: &'a Course) -> Self {
        Self {
            id: &course.id,
            tutor_id: &course.tutor_id,
        }
    }
}

impl<'a> From<&'a ContentOwner> for CourseRef<'a> {
    fn from(owner: &'a ContentOwner) -> Self {
        Self {
            id: &owner.course_id,
            tutor_id: &owner.tutor_id,
        }
    }
}

/// Gated-content rule: admins, the course tutor, and ACTIVE students.
pub async fn can_access<'a>(
    proxy: &DatabaseProxy,
    user: &AuthUser,
    course: impl Into<CourseRef<'a>>,
) -> Result<bool, sqlx::Error> {
    let course = course.into();
    if user.is_admin() || course.tutor_id == user.id {
        return Ok(true);
    }
    enrollments::has_active_enrollment(proxy, &user.id, course.id).await
}

pub async fn ensure_access<'a>(
    proxy: &DatabaseProxy,
    user: &AuthUser,
    course: impl Into<CourseRef<'a>>,
) -> Result<(), AppError> {
    if can_access(proxy, user, course).await? {
        Ok(())
    } else {
        Err(AppError::forbidden("An active enrollment is required for this course"))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequestInput {
    pub course_id: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub payment_channel: Option<PaymentChannel>,
}

pub async fn create_request(
    proxy: &DatabaseProxy,
    student: &AuthUser,
    input: CreateRequestInput,
) -> Result<EnrollmentRequest, AppError> {
    if student.role != Role::Student {
        return Err(WorkflowError::NotAllowed("Only students can request enrollment").into());
    }

    let course = courses::find_course(proxy, &input.course_id)
        .await?
        .filter(|course| course.published)
        .ok_or_else(|| AppError::not_found("Course not found"))?;
    if course.tutor_id == student.id {
        return Err(WorkflowError::NotAllowed("Tutors cannot enroll in their own course").into());
    }

    let message = input
        .message
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty());
    if message.as_ref().is_some_and(|m| m.chars().count() > MESSAGE_MAX_CHARS) {
        return Err(AppError::validation(format!(
            "message must be at most {MESSAGE_MAX_CHARS} characters"
        )));
    }

    if enrollments::find_open_request(proxy, &student.id, &course.id)
        .await?
        .is_some()
    {
        return Err(WorkflowError::Duplicate.into());
    }

    let request = enrollments::insert_request(
        proxy,
        &student.id,
        &course.id,
        message.as_deref(),
        input.payment_channel,
    )
    .await
    .map_err(|err| match AppError::from(err) {
        // lost a race against the partial unique index
        e if e.status() == axum::http::StatusCode::CONFLICT => WorkflowError::Duplicate.into(),
        e => e,
    })?;

    tracing::info!(request_id = %request.id, course_id = %course.id, user_id = %student.id, "enrollment requested");
    Ok(request)
}

pub async fn withdraw(proxy: &DatabaseProxy, student: &AuthUser, request_id: &str) -> Result<(), AppError> {
    let request = enrollments::find_request(proxy, request_id)
        .await?
        .filter(|request| request.user_id == student.id)
        .ok_or(WorkflowError::NotFound)?;

    ensure_withdrawable(request.status)?;
    if !enrollments::delete_pending_request(proxy, request_id, &student.id).await? {
        return Err(not_withdrawable());
    }
    Ok(())
}

/// Only requests nobody has reviewed yet can be withdrawn.
pub fn ensure_withdrawable(status: EnrollmentStatus) -> Result<(), AppError> {
    if status == EnrollmentStatus::Pending {
        Ok(())
    } else {
        Err(not_withdrawable())
    }
}

fn not_withdrawable() -> AppError {
    AppError::conflict("Only pending requests can be withdrawn")
}

pub struct ReviewInput<'a> {
    pub action: EnrollmentAction,
    pub note: Option<&'a str>,
    pub payment_reference: Option<&'a str>,
}

/// Moves a request through the workflow on behalf of an admin and notifies
/// the student.
pub async fn review(
    proxy: &DatabaseProxy,
    hub: &RealtimeHub,
    reviewer: &AuthUser,
    request_id: &str,
    input: ReviewInput<'_>,
) -> Result<EnrollmentRequest, AppError> {
    let note = input.note.map(str::trim).filter(|n| !n.is_empty());
    if input.action == EnrollmentAction::Reject && note.is_none() {
        return Err(AppError::validation("A reason is required to reject a request"));
    }

    let request = enrollments::find_request(proxy, request_id)
        .await?
        .ok_or(WorkflowError::NotFound)?;
    let course = courses::find_course(proxy, &request.course_id)
        .await?
        .ok_or_else(|| AppError::not_found("Course not found"))?;

    let mut target = request.status.transition(input.action)?;
    if input.action == EnrollmentAction::Approve {
        target = approval_target(course.price_cents);
    }

    let transition = Transition {
        from: request.status,
        to: target,
        reviewer_id: &reviewer.id,
        admin_note: note,
        payment_reference: input
            .payment_reference
            .map(str::trim)
            .filter(|r| !r.is_empty()),
    };
    let updated = enrollments::apply_transition(proxy, request_id, &transition)
        .await?
        .ok_or_else(|| AppError::conflict("Request was modified concurrently, reload and retry"))?;

    tracing::info!(
        request_id,
        from = %request.status,
        to = %updated.status,
        reviewer = %reviewer.id,
        "enrollment request reviewed"
    );

    hub.send_to_user(
        &updated.user_id,
        RealtimeEvent::new(
            "enrollment.updated",
            json!({
                "requestId": updated.id,
                "courseId": updated.course_id,
                "courseTitle": course.title,
                "status": updated.status,
                "note": updated.admin_note,
            }),
        ),
    );

    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use EnrollmentAction::*;
    use EnrollmentStatus::*;

    #[test]
    fn allowed_transitions() {
        assert_eq!(Pending.transition(Approve), Ok(Approved));
        assert_eq!(Pending.transition(Reject), Ok(Rejected));
        assert_eq!(Approved.transition(Activate), Ok(Active));
        assert_eq!(Approved.transition(Reject), Ok(Rejected));
    }

    #[test]
    fn terminal_and_skipping_transitions_fail() {
        for status in [Rejected, Active] {
            for action in [Approve, Reject, Activate] {
                assert!(status.transition(action).is_err());
            }
        }
        assert_eq!(
            Pending.transition(Activate),
            Err(WorkflowError::InvalidTransition { from: Pending, action: Activate })
        );
        assert!(Approved.transition(Approve).is_err());
    }

    #[test]
    fn invalid_transition_maps_to_conflict_code() {
        let err: AppError = Active.transition(Reject).unwrap_err().into();
        assert_eq!(err.status(), axum::http::StatusCode::CONFLICT);
        assert_eq!(err.code(), "INVALID_TRANSITION");
    }

    #[test]
    fn only_pending_requests_can_be_withdrawn() {
        assert!(ensure_withdrawable(Pending).is_ok());
        for status in [Approved, Rejected, Active] {
            let err = ensure_withdrawable(status).unwrap_err();
            assert_eq!(err.status(), axum::http::StatusCode::CONFLICT);
        }
    }

    #[test]
    fn duplicate_request_maps_to_conflict() {
        let err: AppError = WorkflowError::Duplicate.into();
        assert_eq!(err.status(), axum::http::StatusCode::CONFLICT);
    }

    #[test]
    fn free_courses_activate_on_approval() {
        assert_eq!(approval_target(0), Active);
        assert_eq!(approval_target(1500), Approved);
    }

    #[test]
    fn reference_uses_first_eight_hex_chars() {
        assert_eq!(payment_reference("3f2a9c1b-77aa-4e0b-9d4e-0a1b2c3d4e5f"), "ENR-3F2A9C1B");
    }

    fn course(price_cents: i64) -> Course {
        Course {
            id: "course-1".into(),
            tutor_id: "tutor-1".into(),
            title: "Rust & Friends".into(),
            slug: "rust-friends".into(),
            description: String::new(),
            category: "Programming".into(),
            level: crate::types::CourseLevel::Beginner,
            price_cents,
            currency: "USD".into(),
            published: true,
            cover_url: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn request() -> EnrollmentRequest {
        EnrollmentRequest {
            id: "abcdef12-0000-4000-8000-000000000000".into(),
            user_id: "student-1".into(),
            course_id: "course-1".into(),
            status: Approved,
            message: None,
            payment_channel: Some(PaymentChannel::Whatsapp),
            payment_reference: None,
            admin_note: None,
            reviewed_by: None,
            reviewed_at: None,
            activated_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn payment_links_are_built_from_contacts() {
        let contacts = PaymentContacts {
            whatsapp_number: Some("+1 (555) 010-2030".into()),
            telegram_username: Some("tutorhub_pay".into()),
        };
        let instructions = payment_instructions(&request(), &course(2599), &contacts);
        assert_eq!(instructions.reference, "ENR-ABCDEF12");
        assert_eq!(instructions.formatted_amount, "USD 25.99");
        assert!(instructions.message.contains("Rust & Friends"));
        let whatsapp = instructions.whatsapp_url.unwrap();
        assert!(whatsapp.starts_with("https://wa.me/15550102030?text="));
        assert!(whatsapp.contains("Rust%20%26%20Friends"));
        assert_eq!(instructions.telegram_url.as_deref(), Some("https://t.me/tutorhub_pay"));
    }

    #[test]
    fn unconfigured_channels_are_omitted() {
        let instructions = payment_instructions(&request(), &course(1000), &PaymentContacts::default());
        assert!(instructions.whatsapp_url.is_none());
        assert!(instructions.telegram_url.is_none());
    }
}
