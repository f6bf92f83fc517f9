use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::db::DatabaseProxy;
use crate::types::{ChallengeMetric, Role};

/// Ledger reason for challenge rewards; excluded from POINTS_EARNED progress.
pub const CHALLENGE_REWARD_REASON: &str = "CHALLENGE_REWARD";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
#[sqlx(rename_all = "camelCase")]
pub struct StreakRow {
    pub current_streak: i32,
    pub longest_streak: i32,
    pub last_activity_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
#[sqlx(rename_all = "camelCase")]
pub struct ActivityDay {
    pub activity_date: NaiveDate,
    pub activity_count: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
#[sqlx(rename_all = "camelCase")]
pub struct PointsEntry {
    pub id: String,
    pub points: i32,
    pub reason: String,
    pub ref_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
#[sqlx(rename_all = "camelCase")]
pub struct Challenge {
    pub id: String,
    pub title: String,
    pub description: String,
    pub metric: ChallengeMetric,
    pub target: i32,
    pub reward_points: i32,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
#[sqlx(rename_all = "camelCase")]
pub struct Participation {
    pub challenge_id: String,
    pub user_id: String,
    pub progress: i32,
    pub joined_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

pub struct ChallengeDraft {
    pub title: String,
    pub description: String,
    pub metric: ChallengeMetric,
    pub target: i32,
    pub reward_points: i32,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
#[sqlx(rename_all = "camelCase")]
pub struct PointsTotal {
    pub user_id: String,
    pub username: String,
    pub avatar_url: Option<String>,
    pub points: i64,
}

const CHALLENGE_COLUMNS: &str = r#""id", "title", "description", "metric", "target", "rewardPoints",
    "startsAt", "endsAt", "createdBy", "createdAt""#;

// streaks and activity

/// Bumps the day's activity counter and rewrites the streak row under a row
/// lock. `advance` receives the stored row (if any) and returns the new one.
/// Runs on the caller's transaction.
pub async fn record_activity<F>(
    conn: &mut PgConnection,
    user_id: &str,
    date: NaiveDate,
    advance: F,
) -> Result<StreakRow, sqlx::Error>
where
    F: FnOnce(Option<StreakRow>) -> StreakRow,
{
    sqlx::query(
        r#"INSERT INTO "study_activity" ("userId", "activityDate", "activityCount") VALUES ($1, $2, 1)
           ON CONFLICT ("userId", "activityDate")
           DO UPDATE SET "activityCount" = "study_activity"."activityCount" + 1"#,
    )
    .bind(user_id)
    .bind(date)
    .execute(&mut *conn)
    .await?;

    let stored = sqlx::query_as::<_, StreakRow>(
        r#"SELECT "currentStreak", "longestStreak", "lastActivityDate" FROM "streaks"
           WHERE "userId" = $1 FOR UPDATE"#,
    )
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?;

    let next = advance(stored);

    sqlx::query(
        r#"INSERT INTO "streaks" ("userId", "currentStreak", "longestStreak", "lastActivityDate", "updatedAt")
           VALUES ($1, $2, $3, $4, NOW())
           ON CONFLICT ("userId") DO UPDATE SET
             "currentStreak" = EXCLUDED."currentStreak",
             "longestStreak" = EXCLUDED."longestStreak",
             "lastActivityDate" = EXCLUDED."lastActivityDate",
             "updatedAt" = NOW()"#,
    )
    .bind(user_id)
    .bind(next.current_streak)
    .bind(next.longest_streak)
    .bind(next.last_activity_date)
    .execute(&mut *conn)
    .await?;

    Ok(next)
}

pub async fn find_streak(proxy: &DatabaseProxy, user_id: &str) -> Result<Option<StreakRow>, sqlx::Error> {
    sqlx::query_as::<_, StreakRow>(
        r#"SELECT "currentStreak", "longestStreak", "lastActivityDate" FROM "streaks" WHERE "userId" = $1"#,
    )
    .bind(user_id)
    .fetch_optional(proxy.pool())
    .await
}

/// Zeroes stored streaks whose last activity is before yesterday.
pub async fn reset_broken_streaks(proxy: &DatabaseProxy, today: NaiveDate) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"UPDATE "streaks" SET "currentStreak" = 0, "updatedAt" = NOW()
           WHERE "currentStreak" > 0 AND "lastActivityDate" < $1::DATE - 1"#,
    )
    .bind(today)
    .execute(proxy.pool())
    .await?;
    Ok(result.rows_affected())
}

pub async fn activity_since(
    proxy: &DatabaseProxy,
    user_id: &str,
    since: NaiveDate,
) -> Result<Vec<ActivityDay>, sqlx::Error> {
    sqlx::query_as::<_, ActivityDay>(
        r#"SELECT "activityDate", "activityCount" FROM "study_activity"
           WHERE "userId" = $1 AND "activityDate" >= $2
           ORDER BY "activityDate""#,
    )
    .bind(user_id)
    .bind(since)
    .fetch_all(proxy.pool())
    .await
}

// points

/// Inserts a ledger entry unless `(user, reason, ref)` was already awarded.
pub async fn award_points(
    conn: &mut PgConnection,
    user_id: &str,
    points: i32,
    reason: &str,
    ref_id: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"INSERT INTO "points_ledger" ("id", "userId", "points", "reason", "refId")
           VALUES ($1, $2, $3, $4, $5)
           ON CONFLICT ("userId", "reason", "refId") DO NOTHING"#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(user_id)
    .bind(points)
    .bind(reason)
    .bind(ref_id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn total_points(proxy: &DatabaseProxy, user_id: &str) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(r#"SELECT COALESCE(SUM("points"), 0)::BIGINT FROM "points_ledger" WHERE "userId" = $1"#)
        .bind(user_id)
        .fetch_one(proxy.pool())
        .await
}

pub async fn recent_points(proxy: &DatabaseProxy, user_id: &str, limit: i64) -> Result<Vec<PointsEntry>, sqlx::Error> {
    sqlx::query_as::<_, PointsEntry>(
        r#"SELECT "id", "points", "reason", "refId", "createdAt" FROM "points_ledger"
           WHERE "userId" = $1 ORDER BY "createdAt" DESC LIMIT $2"#,
    )
    .bind(user_id)
    .bind(limit)
    .fetch_all(proxy.pool())
    .await
}

/// Points per active student since `since` (all time when `None`), optionally
/// restricted to students ACTIVE in `course_id`. Ordered by points then username.
pub async fn points_totals(
    proxy: &DatabaseProxy,
    since: Option<DateTime<Utc>>,
    course_id: Option<&str>,
) -> Result<Vec<PointsTotal>, sqlx::Error> {
    sqlx::query_as::<_, PointsTotal>(
        r#"SELECT u."id" AS "userId", u."username", u."avatarUrl",
                  COALESCE(SUM(p."points"), 0)::BIGINT AS "points"
           FROM "users" u
           LEFT JOIN "points_ledger" p
             ON p."userId" = u."id" AND ($1::TIMESTAMPTZ IS NULL OR p."createdAt" >= $1)
           WHERE u."role" = $3 AND u."isActive"
             AND ($2::TEXT IS NULL OR EXISTS(
                   SELECT 1 FROM "enrollment_requests" e
                   WHERE e."userId" = u."id" AND e."courseId" = $2 AND e."status" = 'ACTIVE'))
           GROUP BY u."id", u."username", u."avatarUrl"
           ORDER BY "points" DESC, u."username" ASC"#,
    )
    .bind(since)
    .bind(course_id)
    .bind(Role::Student)
    .fetch_all(proxy.pool())
    .await
}

// challenges

pub async fn insert_challenge(
    proxy: &DatabaseProxy,
    created_by: &str,
    draft: &ChallengeDraft,
) -> Result<Challenge, sqlx::Error> {
    let sql = format!(
        r#"INSERT INTO "challenges" ("id", "title", "description", "metric", "target", "rewardPoints",
                                     "startsAt", "endsAt", "createdBy")
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
           RETURNING {CHALLENGE_COLUMNS}"#
    );
    sqlx::query_as::<_, Challenge>(&sql)
        .bind(Uuid::new_v4().to_string())
        .bind(&draft.title)
        .bind(&draft.description)
        .bind(draft.metric)
        .bind(draft.target)
        .bind(draft.reward_points)
        .bind(draft.starts_at)
        .bind(draft.ends_at)
        .bind(created_by)
        .fetch_one(proxy.pool())
        .await
}

pub async fn replace_challenge(
    proxy: &DatabaseProxy,
    challenge_id: &str,
    draft: &ChallengeDraft,
) -> Result<Option<Challenge>, sqlx::Error> {
    let sql = format!(
        r#"UPDATE "challenges" SET "title" = $2, "description" = $3, "metric" = $4, "target" = $5,
                                   "rewardPoints" = $6, "startsAt" = $7, "endsAt" = $8
           WHERE "id" = $1
           RETURNING {CHALLENGE_COLUMNS}"#
    );
    sqlx::query_as::<_, Challenge>(&sql)
        .bind(challenge_id)
        .bind(&draft.title)
        .bind(&draft.description)
        .bind(draft.metric)
        .bind(draft.target)
        .bind(draft.reward_points)
        .bind(draft.starts_at)
        .bind(draft.ends_at)
        .fetch_optional(proxy.pool())
        .await
}

pub async fn delete_challenge(proxy: &DatabaseProxy, challenge_id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(r#"DELETE FROM "challenges" WHERE "id" = $1"#)
        .bind(challenge_id)
        .execute(proxy.pool())
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn find_challenge(proxy: &DatabaseProxy, challenge_id: &str) -> Result<Option<Challenge>, sqlx::Error> {
    let sql = format!(r#"SELECT {CHALLENGE_COLUMNS} FROM "challenges" WHERE "id" = $1"#);
    sqlx::query_as::<_, Challenge>(&sql)
        .bind(challenge_id)
        .fetch_optional(proxy.pool())
        .await
}

/// Challenges that have not ended yet (`include_ended` lists everything).
pub async fn list_challenges(proxy: &DatabaseProxy, include_ended: bool) -> Result<Vec<Challenge>, sqlx::Error> {
    let sql = format!(
        r#"SELECT {CHALLENGE_COLUMNS} FROM "challenges"
           WHERE $1 OR "endsAt" > NOW()
           ORDER BY "startsAt" ASC"#
    );
    sqlx::query_as::<_, Challenge>(&sql)
        .bind(include_ended)
        .fetch_all(proxy.pool())
        .await
}

pub async fn join_challenge(
    proxy: &DatabaseProxy,
    challenge_id: &str,
    user_id: &str,
) -> Result<Participation, sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO "challenge_participants" ("challengeId", "userId") VALUES ($1, $2)
           ON CONFLICT ("challengeId", "userId") DO NOTHING"#,
    )
    .bind(challenge_id)
    .bind(user_id)
    .execute(proxy.pool())
    .await?;

    sqlx::query_as::<_, Participation>(
        r#"SELECT "challengeId", "userId", "progress", "joinedAt", "completedAt"
           FROM "challenge_participants" WHERE "challengeId" = $1 AND "userId" = $2"#,
    )
    .bind(challenge_id)
    .bind(user_id)
    .fetch_one(proxy.pool())
    .await
}

/// Participations of the user on challenges still open for progress at `now`.
pub async fn open_participations(
    proxy: &DatabaseProxy,
    user_id: &str,
) -> Result<Vec<(Participation, Challenge)>, sqlx::Error> {
    participations_where(proxy, r#"p."userId" = $1 AND p."completedAt" IS NULL AND c."startsAt" <= NOW() AND c."endsAt" > NOW()"#, user_id).await
}

pub async fn user_participations(
    proxy: &DatabaseProxy,
    user_id: &str,
) -> Result<Vec<(Participation, Challenge)>, sqlx::Error> {
    participations_where(proxy, r#"p."userId" = $1"#, user_id).await
}

async fn participations_where(
    proxy: &DatabaseProxy,
    predicate: &str,
    user_id: &str,
) -> Result<Vec<(Participation, Challenge)>, sqlx::Error> {
    let sql = format!(
        r#"SELECT p."challengeId", p."userId", p."progress", p."joinedAt", p."completedAt",
                  c."id", c."title", c."description", c."metric", c."target", c."rewardPoints",
                  c."startsAt", c."endsAt", c."createdBy", c."createdAt"
           FROM "challenge_participants" p
           JOIN "challenges" c ON c."id" = p."challengeId"
           WHERE {predicate}
           ORDER BY c."endsAt" ASC"#
    );
    let rows = sqlx::query_as::<_, ParticipationRow>(&sql)
        .bind(user_id)
        .fetch_all(proxy.pool())
        .await?;
    Ok(rows.into_iter().map(ParticipationRow::split).collect())
}

/// Unfinished participations on challenges whose window closed after `since`
/// or is still open.
pub async fn unfinished_participations(
    proxy: &DatabaseProxy,
    since: DateTime<Utc>,
) -> Result<Vec<(Participation, Challenge)>, sqlx::Error> {
    let rows = sqlx::query_as::<_, ParticipationRow>(
        r#"SELECT p."challengeId", p."userId", p."progress", p."joinedAt", p."completedAt",
                  c."id", c."title", c."description", c."metric", c."target", c."rewardPoints",
                  c."startsAt", c."endsAt", c."createdBy", c."createdAt"
           FROM "challenge_participants" p
           JOIN "challenges" c ON c."id" = p."challengeId"
           WHERE p."completedAt" IS NULL AND c."startsAt" <= NOW() AND c."endsAt" >= $1"#,
    )
    .bind(since)
    .fetch_all(proxy.pool())
    .await?;
    Ok(rows.into_iter().map(ParticipationRow::split).collect())
}

#[derive(sqlx::FromRow)]
#[sqlx(rename_all = "camelCase")]
struct ParticipationRow {
    challenge_id: String,
    user_id: String,
    progress: i32,
    joined_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    id: String,
    title: String,
    description: String,
    metric: ChallengeMetric,
    target: i32,
    reward_points: i32,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    created_by: Option<String>,
    created_at: DateTime<Utc>,
}

impl ParticipationRow {
    fn split(self) -> (Participation, Challenge) {
        (
            Participation {
                challenge_id: self.challenge_id,
                user_id: self.user_id,
                progress: self.progress,
                joined_at: self.joined_at,
                completed_at: self.completed_at,
            },
            Challenge {
                id: self.id,
                title: self.title,
                description: self.description,
                metric: self.metric,
                target: self.target,
                reward_points: self.reward_points,
                starts_at: self.starts_at,
                ends_at: self.ends_at,
                created_by: self.created_by,
                created_at: self.created_at,
            },
        )
    }
}

pub async fn set_progress(
    proxy: &DatabaseProxy,
    challenge_id: &str,
    user_id: &str,
    progress: i32,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"UPDATE "challenge_participants" SET "progress" = $3
           WHERE "challengeId" = $1 AND "userId" = $2 AND "completedAt" IS NULL"#,
    )
    .bind(challenge_id)
    .bind(user_id)
    .bind(progress)
    .execute(proxy.pool())
    .await?;
    Ok(())
}

/// Stamps completion once and pays the reward in the same transaction;
/// `true` only for the call that stamped it.
pub async fn complete_participation(
    proxy: &DatabaseProxy,
    challenge: &Challenge,
    user_id: &str,
    progress: i32,
) -> Result<bool, sqlx::Error> {
    let mut tx = proxy.pool().begin().await?;
    let result = sqlx::query(
        r#"UPDATE "challenge_participants" SET "progress" = $3, "completedAt" = NOW()
           WHERE "challengeId" = $1 AND "userId" = $2 AND "completedAt" IS NULL"#,
    )
    .bind(&challenge.id)
    .bind(user_id)
    .bind(progress)
    .execute(&mut *tx)
    .await?;
    if result.rows_affected() == 0 {
        return Ok(false);
    }

    if challenge.reward_points > 0 {
        award_points(
            &mut tx,
            user_id,
            challenge.reward_points,
            CHALLENGE_REWARD_REASON,
            &challenge.id,
        )
        .await?;
    }
    tx.commit().await?;
    Ok(true)
}

/// Value of `metric` for the user inside `[since, until)`.
pub async fn metric_value(
    proxy: &DatabaseProxy,
    user_id: &str,
    metric: ChallengeMetric,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
) -> Result<i64, sqlx::Error> {
    let sql = match metric {
        ChallengeMetric::MaterialsCompleted => {
            r#"SELECT COUNT(*)::BIGINT FROM "material_progress"
               WHERE "userId" = $1 AND "completedAt" >= $2 AND "completedAt" < $3"#
        }
        ChallengeMetric::TestsPassed => {
            r#"SELECT COUNT(DISTINCT "testId")::BIGINT FROM "test_attempts"
               WHERE "userId" = $1 AND "passed" AND "submittedAt" >= $2 AND "submittedAt" < $3"#
        }
        // distinct days with a completion or a submission inside the window
        ChallengeMetric::StudyDays => {
            r#"SELECT COUNT(DISTINCT d)::BIGINT FROM (
                 SELECT ("completedAt" AT TIME ZONE 'UTC')::DATE AS d FROM "material_progress"
                 WHERE "userId" = $1 AND "completedAt" >= $2 AND "completedAt" < $3
                 UNION ALL
                 SELECT ("submittedAt" AT TIME ZONE 'UTC')::DATE AS d FROM "test_attempts"
                 WHERE "userId" = $1 AND "submittedAt" >= $2 AND "submittedAt" < $3
               ) days"#
        }
        ChallengeMetric::PointsEarned => {
            r#"SELECT COALESCE(SUM("points"), 0)::BIGINT FROM "points_ledger"
               WHERE "userId" = $1 AND "createdAt" >= $2 AND "createdAt" < $3
                 AND "reason" <> 'CHALLENGE_REWARD'"#
        }
    };
    sqlx::query_scalar(sql)
        .bind(user_id)
        .bind(since)
        .bind(until)
        .fetch_one(proxy.pool())
        .await
}
