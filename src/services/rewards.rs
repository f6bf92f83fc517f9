//! Points awarded for study events and the side effects they trigger.
//!
//! The event row, its ledger entries and the streak update commit together;
//! challenge progress is recomputed afterwards and the sweep worker catches
//! anything a failed refresh missed.

use chrono::{DateTime, Utc};
use sqlx::PgConnection;

use crate::db::operations::gamification;
use crate::db::operations::progress::{self, NewAttempt};
use crate::db::DatabaseProxy;
use crate::realtime::RealtimeHub;
use crate::services::{challenge, streak};

pub const MATERIAL_COMPLETED_POINTS: i32 = 5;
pub const TEST_SUBMITTED_POINTS: i32 = 10;
pub const TEST_FIRST_PASS_POINTS: i32 = 20;

pub const REASON_MATERIAL_COMPLETED: &str = "MATERIAL_COMPLETED";
pub const REASON_TEST_SUBMITTED: &str = "TEST_SUBMITTED";
pub const REASON_TEST_PASSED: &str = "TEST_PASSED";
pub const REASON_STREAK_MILESTONE: &str = "STREAK_MILESTONE";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaterialCompletion {
    pub newly_completed: bool,
    pub points_awarded: i32,
}

#[derive(Debug, Clone)]
pub struct RecordedAttempt {
    pub attempt_id: String,
    pub submitted_at: DateTime<Utc>,
    pub points_earned: i32,
}

/// Updates the streak for today and pays any milestone bonus.
async fn record_study_activity(
    conn: &mut PgConnection,
    user_id: &str,
) -> Result<gamification::StreakRow, sqlx::Error> {
    let today = Utc::now().date_naive();
    let mut before = 0;
    let row = gamification::record_activity(&mut *conn, user_id, today, |stored| {
        before = stored.map(|s| streak::effective_current(&s, today)).unwrap_or(0);
        streak::advance(stored, today)
    })
    .await?;

    for milestone in streak::milestones_crossed(before, row.current_streak) {
        let awarded = gamification::award_points(
            &mut *conn,
            user_id,
            milestone * streak::MILESTONE_MULTIPLIER,
            REASON_STREAK_MILESTONE,
            &milestone.to_string(),
        )
        .await?;
        if awarded {
            tracing::info!(user_id, milestone, "streak milestone reached");
        }
    }
    Ok(row)
}

/// Marks a material done. Points and the streak update are applied only by
/// the call that created the completion row.
pub async fn complete_material(
    proxy: &DatabaseProxy,
    hub: &RealtimeHub,
    user_id: &str,
    material_id: &str,
) -> Result<MaterialCompletion, sqlx::Error> {
    let mut tx = proxy.pool().begin().await?;
    let newly_completed = progress::insert_material_progress(&mut tx, user_id, material_id).await?;
    if !newly_completed {
        return Ok(MaterialCompletion {
            newly_completed,
            points_awarded: 0,
        });
    }

    let mut points_awarded = 0;
    if gamification::award_points(
        &mut tx,
        user_id,
        MATERIAL_COMPLETED_POINTS,
        REASON_MATERIAL_COMPLETED,
        material_id,
    )
    .await?
    {
        points_awarded = MATERIAL_COMPLETED_POINTS;
    }
    record_study_activity(&mut tx, user_id).await?;
    tx.commit().await?;

    challenge::refresh_for_user(proxy, hub, user_id).await?;
    Ok(MaterialCompletion {
        newly_completed,
        points_awarded,
    })
}

/// Stores a graded attempt with its rewards. `None` when the attempt limit
/// is already used up.
pub async fn record_attempt(
    proxy: &DatabaseProxy,
    hub: &RealtimeHub,
    attempt: &NewAttempt<'_>,
    max_attempts: Option<i32>,
) -> Result<Option<RecordedAttempt>, sqlx::Error> {
    let mut tx = proxy.pool().begin().await?;
    let Some((attempt_id, submitted_at)) =
        progress::insert_attempt_within_limit(&mut tx, attempt, max_attempts).await?
    else {
        return Ok(None);
    };

    let mut points_earned = 0;
    if gamification::award_points(
        &mut tx,
        attempt.user_id,
        TEST_SUBMITTED_POINTS,
        REASON_TEST_SUBMITTED,
        &attempt_id,
    )
    .await?
    {
        points_earned += TEST_SUBMITTED_POINTS;
    }
    if attempt.passed
        && gamification::award_points(
            &mut tx,
            attempt.user_id,
            TEST_FIRST_PASS_POINTS,
            REASON_TEST_PASSED,
            attempt.test_id,
        )
        .await?
    {
        points_earned += TEST_FIRST_PASS_POINTS;
    }
    record_study_activity(&mut tx, attempt.user_id).await?;
    tx.commit().await?;

    challenge::refresh_for_user(proxy, hub, attempt.user_id).await?;
    Ok(Some(RecordedAttempt {
        attempt_id,
        submitted_at,
        points_earned,
    }))
}
