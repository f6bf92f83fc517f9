//! Enrollment, grading and reward workflows against a real PostgreSQL.
//!
//! Runs only when `TEST_DATABASE_URL` points at a disposable database; every
//! test creates its own users and courses so they can share one schema.

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use tutorhub_backend::auth::AuthUser;
use tutorhub_backend::db::config::{DbConfig, HealthCheckConfig};
use tutorhub_backend::db::operations::content::{self, NewMaterial, NewTest};
use tutorhub_backend::db::operations::courses::{self, Course, CourseDeletion, CourseDraft};
use tutorhub_backend::db::operations::enrollments;
use tutorhub_backend::db::operations::gamification::{self, ChallengeDraft};
use tutorhub_backend::db::operations::progress::{self, NewAttempt};
use tutorhub_backend::db::operations::users::{self, NewUser};
use tutorhub_backend::db::{migrate, DatabaseProxy};
use tutorhub_backend::realtime::RealtimeHub;
use tutorhub_backend::services::challenge;
use tutorhub_backend::services::enrollment::{
    self, CreateRequestInput, EnrollmentAction, ReviewInput,
};
use tutorhub_backend::services::rewards;
use tutorhub_backend::types::{ChallengeMetric, CourseLevel, EnrollmentStatus, MaterialKind, Role};

static MIGRATED: Mutex<bool> = Mutex::const_new(false);

async fn test_db() -> Option<Arc<DatabaseProxy>> {
    let Ok(url) = std::env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set, skipping");
        return None;
    };
    let proxy = DatabaseProxy::connect(DbConfig {
        primary_url: url,
        max_connections: 8,
        acquire_timeout: Duration::from_secs(10),
        run_migrations: false,
        health_check: HealthCheckConfig::default(),
    })
    .await
    .unwrap();

    let mut migrated = MIGRATED.lock().await;
    if !*migrated {
        migrate::run_migrations(proxy.pool()).await.unwrap();
        *migrated = true;
    }
    Some(proxy)
}

async fn user(proxy: &DatabaseProxy, role: Role) -> AuthUser {
    let tag = Uuid::new_v4().simple().to_string();
    let profile = users::insert_user(
        proxy,
        NewUser {
            email: &format!("{tag}@tutorhub.test"),
            username: &format!("u{}", &tag[..12]),
            password_hash: "not-a-real-hash",
            role,
        },
    )
    .await
    .unwrap();
    AuthUser {
        id: profile.id,
        email: profile.email,
        username: profile.username,
        role: profile.role,
        created_at: profile.created_at,
    }
}

async fn published_course(proxy: &DatabaseProxy, tutor: &AuthUser, price_cents: i64) -> Course {
    let slug = format!("course-{}", Uuid::new_v4().simple());
    let course = courses::insert_course(
        proxy,
        &tutor.id,
        &CourseDraft {
            title: "Ownership in Practice".to_string(),
            slug,
            description: String::new(),
            category: "Programming".to_string(),
            level: CourseLevel::Beginner,
            price_cents,
            currency: "USD".to_string(),
            cover_url: None,
        },
    )
    .await
    .unwrap();
    courses::set_published(proxy, &course.id, true).await.unwrap().unwrap()
}

fn request_for(course: &Course) -> CreateRequestInput {
    CreateRequestInput {
        course_id: course.id.clone(),
        message: None,
        payment_channel: None,
    }
}

fn action(action: EnrollmentAction, note: Option<&str>) -> ReviewInput<'_> {
    ReviewInput {
        action,
        note,
        payment_reference: None,
    }
}

/// Student with an ACTIVE enrollment in a new free course.
async fn enrolled_student(
    proxy: &DatabaseProxy,
    hub: &RealtimeHub,
    admin: &AuthUser,
    course: &Course,
) -> AuthUser {
    let student = user(proxy, Role::Student).await;
    let request = enrollment::create_request(proxy, &student, request_for(course)).await.unwrap();
    let approved = enrollment::review(proxy, hub, admin, &request.id, action(EnrollmentAction::Approve, None))
        .await
        .unwrap();
    assert_eq!(approved.status, EnrollmentStatus::Active);
    student
}

#[tokio::test]
async fn test_duplicate_open_request_conflicts() {
    let Some(proxy) = test_db().await else { return };
    let tutor = user(&proxy, Role::Tutor).await;
    let student = user(&proxy, Role::Student).await;
    let course = published_course(&proxy, &tutor, 2500).await;

    enrollment::create_request(&proxy, &student, request_for(&course)).await.unwrap();
    let err = enrollment::create_request(&proxy, &student, request_for(&course))
        .await
        .unwrap_err();
    assert_eq!(err.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_rejected_request_does_not_block_new_request() {
    let Some(proxy) = test_db().await else { return };
    let hub = RealtimeHub::new();
    let admin = user(&proxy, Role::Admin).await;
    let tutor = user(&proxy, Role::Tutor).await;
    let student = user(&proxy, Role::Student).await;
    let course = published_course(&proxy, &tutor, 2500).await;

    let first = enrollment::create_request(&proxy, &student, request_for(&course)).await.unwrap();
    let rejected = enrollment::review(
        &proxy,
        &hub,
        &admin,
        &first.id,
        action(EnrollmentAction::Reject, Some("Course is full")),
    )
    .await
    .unwrap();
    assert_eq!(rejected.status, EnrollmentStatus::Rejected);

    let second = enrollment::create_request(&proxy, &student, request_for(&course)).await.unwrap();
    assert_ne!(second.id, first.id);
    assert_eq!(second.status, EnrollmentStatus::Pending);
}

#[tokio::test]
async fn test_withdraw_only_pending_requests() {
    let Some(proxy) = test_db().await else { return };
    let hub = RealtimeHub::new();
    let admin = user(&proxy, Role::Admin).await;
    let tutor = user(&proxy, Role::Tutor).await;
    let student = user(&proxy, Role::Student).await;
    let course = published_course(&proxy, &tutor, 2500).await;

    let request = enrollment::create_request(&proxy, &student, request_for(&course)).await.unwrap();
    enrollment::review(&proxy, &hub, &admin, &request.id, action(EnrollmentAction::Approve, None))
        .await
        .unwrap();

    let err = enrollment::withdraw(&proxy, &student, &request.id).await.unwrap_err();
    assert_eq!(err.status(), StatusCode::CONFLICT);

    let other = user(&proxy, Role::Student).await;
    let pending = enrollment::create_request(&proxy, &other, request_for(&course)).await.unwrap();
    enrollment::withdraw(&proxy, &other, &pending.id).await.unwrap();
    assert!(enrollments::find_request(&proxy, &pending.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_paid_and_free_approval_targets() {
    let Some(proxy) = test_db().await else { return };
    let hub = RealtimeHub::new();
    let admin = user(&proxy, Role::Admin).await;
    let tutor = user(&proxy, Role::Tutor).await;
    let paid = published_course(&proxy, &tutor, 4900).await;
    let free = published_course(&proxy, &tutor, 0).await;

    let student = user(&proxy, Role::Student).await;
    let request = enrollment::create_request(&proxy, &student, request_for(&paid)).await.unwrap();
    let approved = enrollment::review(&proxy, &hub, &admin, &request.id, action(EnrollmentAction::Approve, None))
        .await
        .unwrap();
    assert_eq!(approved.status, EnrollmentStatus::Approved);

    let student = enrolled_student(&proxy, &hub, &admin, &free).await;
    assert!(enrollment::can_access(&proxy, &student, &free).await.unwrap());
}

#[tokio::test]
async fn test_course_with_active_enrollment_cannot_be_deleted() {
    let Some(proxy) = test_db().await else { return };
    let hub = RealtimeHub::new();
    let admin = user(&proxy, Role::Admin).await;
    let tutor = user(&proxy, Role::Tutor).await;
    let course = published_course(&proxy, &tutor, 0).await;
    enrolled_student(&proxy, &hub, &admin, &course).await;

    assert_eq!(
        courses::delete_course(&proxy, &course.id).await.unwrap(),
        CourseDeletion::HasActiveEnrollments
    );

    let empty = published_course(&proxy, &tutor, 0).await;
    assert_eq!(courses::delete_course(&proxy, &empty.id).await.unwrap(), CourseDeletion::Deleted);
    assert_eq!(courses::delete_course(&proxy, &empty.id).await.unwrap(), CourseDeletion::NotFound);
}

#[tokio::test]
async fn test_course_leaderboard_only_ranks_active_students() {
    let Some(proxy) = test_db().await else { return };
    let hub = RealtimeHub::new();
    let admin = user(&proxy, Role::Admin).await;
    let tutor = user(&proxy, Role::Tutor).await;
    let course = published_course(&proxy, &tutor, 0).await;
    let enrolled = enrolled_student(&proxy, &hub, &admin, &course).await;

    let outsider = user(&proxy, Role::Student).await;
    let mut conn = proxy.pool().acquire().await.unwrap();
    gamification::award_points(&mut conn, &outsider.id, 500, "TEST_SUBMITTED", "elsewhere")
        .await
        .unwrap();
    gamification::award_points(&mut conn, &enrolled.id, 5, "TEST_SUBMITTED", "here")
        .await
        .unwrap();
    drop(conn);

    let scoped = gamification::points_totals(&proxy, None, Some(&course.id)).await.unwrap();
    assert_eq!(scoped.len(), 1);
    assert_eq!(scoped[0].user_id, enrolled.id);
    assert_eq!(scoped[0].points, 5);
}

async fn course_with_test(
    proxy: &DatabaseProxy,
    tutor: &AuthUser,
    max_attempts: Option<i32>,
) -> (Course, String, String) {
    let course = published_course(proxy, tutor, 0).await;
    let topic = content::insert_topic(proxy, &course.id, "Borrowing", "").await.unwrap();
    let material = content::insert_material(
        proxy,
        &topic.id,
        &NewMaterial {
            title: "Read me".to_string(),
            kind: MaterialKind::Text,
            url: None,
            body: Some("References never outlive their owner.".to_string()),
            duration_seconds: None,
            is_preview: false,
        },
    )
    .await
    .unwrap();
    let test = content::insert_test(
        proxy,
        &topic.id,
        &NewTest {
            title: "Quiz".to_string(),
            description: String::new(),
            pass_score: 60,
            time_limit_minutes: None,
            max_attempts,
        },
    )
    .await
    .unwrap();
    (course, material.id, test.id)
}

#[tokio::test]
async fn test_concurrent_submissions_respect_attempt_limit() {
    let Some(proxy) = test_db().await else { return };
    let hub = RealtimeHub::new();
    let admin = user(&proxy, Role::Admin).await;
    let tutor = user(&proxy, Role::Tutor).await;
    let (course, _, test_id) = course_with_test(&proxy, &tutor, Some(2)).await;
    let student = enrolled_student(&proxy, &hub, &admin, &course).await;

    let answers = serde_json::json!({});
    let submissions = (0..6).map(|_| {
        let attempt = NewAttempt {
            test_id: &test_id,
            user_id: &student.id,
            score: 0,
            max_score: 0,
            percentage: 0.0,
            passed: false,
            answers: &answers,
        };
        let proxy = Arc::clone(&proxy);
        let hub = Arc::clone(&hub);
        async move { rewards::record_attempt(&proxy, &hub, &attempt, Some(2)).await.unwrap() }
    });
    let recorded = futures_util::future::join_all(submissions).await;

    assert_eq!(recorded.iter().filter(|r| r.is_some()).count(), 2);
    assert_eq!(progress::count_attempts(&proxy, &student.id, &test_id).await.unwrap(), 2);
}

#[tokio::test]
async fn test_material_completion_pays_once() {
    let Some(proxy) = test_db().await else { return };
    let hub = RealtimeHub::new();
    let admin = user(&proxy, Role::Admin).await;
    let tutor = user(&proxy, Role::Tutor).await;
    let (course, material_id, _) = course_with_test(&proxy, &tutor, None).await;
    let student = enrolled_student(&proxy, &hub, &admin, &course).await;

    let first = rewards::complete_material(&proxy, &hub, &student.id, &material_id).await.unwrap();
    assert!(first.newly_completed);
    assert_eq!(first.points_awarded, rewards::MATERIAL_COMPLETED_POINTS);

    let again = rewards::complete_material(&proxy, &hub, &student.id, &material_id).await.unwrap();
    assert!(!again.newly_completed);
    assert_eq!(again.points_awarded, 0);

    let streak = gamification::find_streak(&proxy, &student.id).await.unwrap().unwrap();
    assert_eq!(streak.current_streak, 1);
    assert_eq!(
        gamification::total_points(&proxy, &student.id).await.unwrap(),
        i64::from(rewards::MATERIAL_COMPLETED_POINTS)
    );
}

#[tokio::test]
async fn test_challenge_completion_pays_reward_with_stamp() {
    let Some(proxy) = test_db().await else { return };
    let hub = RealtimeHub::new();
    let admin = user(&proxy, Role::Admin).await;
    let tutor = user(&proxy, Role::Tutor).await;
    let (course, material_id, _) = course_with_test(&proxy, &tutor, None).await;
    let student = enrolled_student(&proxy, &hub, &admin, &course).await;

    let draft = ChallengeDraft {
        title: "First steps".to_string(),
        description: String::new(),
        metric: ChallengeMetric::MaterialsCompleted,
        target: 1,
        reward_points: 40,
        starts_at: Utc::now() - ChronoDuration::hours(1),
        ends_at: Utc::now() + ChronoDuration::days(1),
    };
    let created = gamification::insert_challenge(&proxy, &admin.id, &draft).await.unwrap();
    challenge::join(&proxy, &hub, &created.id, &student.id).await.unwrap();

    rewards::complete_material(&proxy, &hub, &student.id, &material_id).await.unwrap();
    challenge::sweep(&proxy, &hub, Utc::now() - ChronoDuration::hours(1)).await.unwrap();

    let joined = gamification::user_participations(&proxy, &student.id).await.unwrap();
    let (participation, _) = joined.iter().find(|(_, c)| c.id == created.id).unwrap();
    assert!(participation.completed_at.is_some());
    assert_eq!(
        gamification::total_points(&proxy, &student.id).await.unwrap(),
        i64::from(rewards::MATERIAL_COMPLETED_POINTS + 40)
    );
}

#[tokio::test]
async fn test_study_days_ignore_activity_before_join() {
    let Some(proxy) = test_db().await else { return };
    let hub = RealtimeHub::new();
    let admin = user(&proxy, Role::Admin).await;
    let tutor = user(&proxy, Role::Tutor).await;
    let (course, material_id, _) = course_with_test(&proxy, &tutor, None).await;
    let student = enrolled_student(&proxy, &hub, &admin, &course).await;

    let before = Utc::now() - ChronoDuration::minutes(5);
    rewards::complete_material(&proxy, &hub, &student.id, &material_id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1100)).await;
    let joined = Utc::now();
    let until = joined + ChronoDuration::hours(1);

    let metric = ChallengeMetric::StudyDays;
    let from_before = gamification::metric_value(&proxy, &student.id, metric, before, until).await.unwrap();
    let from_join = gamification::metric_value(&proxy, &student.id, metric, joined, until).await.unwrap();
    assert_eq!(from_before, 1);
    assert_eq!(from_join, 0);
}
