use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::db::operations::gamification::{self, Challenge, ChallengeDraft, Participation};
use crate::db::DatabaseProxy;
use crate::realtime::{RealtimeEvent, RealtimeHub};
use crate::response::AppError;
use crate::services::validation::required_text;
use crate::types::ChallengeMetric;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChallengeState {
    Upcoming,
    Active,
    Ended,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeCard {
    #[serde(flatten)]
    pub challenge: Challenge,
    pub state: ChallengeState,
    pub joined: bool,
    pub progress: i32,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeInput {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub metric: ChallengeMetric,
    pub target: i32,
    #[serde(default)]
    pub reward_points: Option<i32>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepStats {
    pub evaluated: usize,
    pub completed: usize,
}

pub fn state_at(challenge: &Challenge, now: DateTime<Utc>) -> ChallengeState {
    if now < challenge.starts_at {
        ChallengeState::Upcoming
    } else if now < challenge.ends_at {
        ChallengeState::Active
    } else {
        ChallengeState::Ended
    }
}

/// Interval in which activity counts toward a participant's progress:
/// from the later of join time and start, until the earlier of now and end.
pub fn progress_window(
    joined_at: DateTime<Utc>,
    challenge: &Challenge,
    now: DateTime<Utc>,
) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let since = joined_at.max(challenge.starts_at);
    let until = now.min(challenge.ends_at);
    (since < until).then_some((since, until))
}

pub fn validate_input(input: ChallengeInput) -> Result<ChallengeDraft, AppError> {
    let title = required_text(&input.title, "title", 120).map_err(AppError::validation)?;
    if input.target < 1 {
        return Err(AppError::validation("target must be at least 1"));
    }
    let reward_points = input.reward_points.unwrap_or(0);
    if reward_points < 0 {
        return Err(AppError::validation("rewardPoints must not be negative"));
    }
    if input.starts_at >= input.ends_at {
        return Err(AppError::validation("startsAt must be before endsAt"));
    }
    Ok(ChallengeDraft {
        title,
        description: input.description.unwrap_or_default().trim().to_string(),
        metric: input.metric,
        target: input.target,
        reward_points,
        starts_at: input.starts_at,
        ends_at: input.ends_at,
    })
}

/// Recomputes one participation. Returns the new progress and whether this
/// call completed the challenge.
pub async fn evaluate(
    proxy: &DatabaseProxy,
    hub: &RealtimeHub,
    participation: &Participation,
    challenge: &Challenge,
    now: DateTime<Utc>,
) -> Result<(i32, bool), sqlx::Error> {
    if participation.completed_at.is_some() {
        return Ok((participation.progress, false));
    }
    let Some((since, until)) = progress_window(participation.joined_at, challenge, now) else {
        return Ok((participation.progress, false));
    };

    let value = gamification::metric_value(proxy, &participation.user_id, challenge.metric, since, until).await?;
    let progress = i32::try_from(value).unwrap_or(i32::MAX);

    if progress < challenge.target {
        if progress != participation.progress {
            gamification::set_progress(proxy, &challenge.id, &participation.user_id, progress).await?;
        }
        return Ok((progress, false));
    }

    let completed =
        gamification::complete_participation(proxy, challenge, &participation.user_id, progress).await?;
    if completed {
        tracing::info!(
            challenge_id = %challenge.id,
            user_id = %participation.user_id,
            reward = challenge.reward_points,
            "challenge completed"
        );
        hub.send_to_user(
            &participation.user_id,
            RealtimeEvent::new(
                "challenge.completed",
                json!({
                    "challengeId": challenge.id,
                    "title": challenge.title,
                    "rewardPoints": challenge.reward_points,
                }),
            ),
        );
    }
    Ok((progress, completed))
}

/// Refreshes every open participation of the user.
pub async fn refresh_for_user(
    proxy: &DatabaseProxy,
    hub: &RealtimeHub,
    user_id: &str,
) -> Result<(), sqlx::Error> {
    let now = Utc::now();
    for (participation, challenge) in gamification::open_participations(proxy, user_id).await? {
        evaluate(proxy, hub, &participation, &challenge, now).await?;
    }
    Ok(())
}

/// Student-facing list: open challenges plus any the user joined, with
/// freshly computed progress.
pub async fn cards_for_user(
    proxy: &DatabaseProxy,
    hub: &RealtimeHub,
    user_id: &str,
) -> Result<Vec<ChallengeCard>, sqlx::Error> {
    refresh_for_user(proxy, hub, user_id).await?;

    let now = Utc::now();
    let joined = gamification::user_participations(proxy, user_id).await?;
    let mut cards: Vec<ChallengeCard> = gamification::list_challenges(proxy, false)
        .await?
        .into_iter()
        .filter(|challenge| !joined.iter().any(|(_, c)| c.id == challenge.id))
        .map(|challenge| ChallengeCard {
            state: state_at(&challenge, now),
            challenge,
            joined: false,
            progress: 0,
            completed_at: None,
        })
        .collect();

    cards.extend(joined.into_iter().map(|(participation, challenge)| ChallengeCard {
        state: state_at(&challenge, now),
        challenge,
        joined: true,
        progress: participation.progress,
        completed_at: participation.completed_at,
    }));
    cards.sort_by(|a, b| a.challenge.ends_at.cmp(&b.challenge.ends_at));
    Ok(cards)
}

pub async fn join(
    proxy: &DatabaseProxy,
    hub: &RealtimeHub,
    challenge_id: &str,
    user_id: &str,
) -> Result<Participation, AppError> {
    let challenge = gamification::find_challenge(proxy, challenge_id)
        .await?
        .ok_or_else(|| AppError::not_found("Challenge not found"))?;

    let now = Utc::now();
    if state_at(&challenge, now) == ChallengeState::Ended {
        return Err(AppError::conflict("Challenge has already ended"));
    }

    let participation = gamification::join_challenge(proxy, challenge_id, user_id).await?;
    let (progress, completed) = evaluate(proxy, hub, &participation, &challenge, now).await?;
    Ok(Participation {
        progress,
        completed_at: if completed { Some(now) } else { participation.completed_at },
        ..participation
    })
}

/// Awards completions that activity-triggered refreshes missed, for
/// challenges still open or that ended after `since`.
pub async fn sweep(
    proxy: &DatabaseProxy,
    hub: &RealtimeHub,
    since: DateTime<Utc>,
) -> Result<SweepStats, sqlx::Error> {
    let now = Utc::now();
    let mut stats = SweepStats::default();
    for (participation, challenge) in gamification::unfinished_participations(proxy, since).await? {
        let (_, completed) = evaluate(proxy, hub, &participation, &challenge, now).await?;
        stats.evaluated += 1;
        if completed {
            stats.completed += 1;
        }
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(hour: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap() + Duration::hours(hour)
    }

    fn challenge(starts: i64, ends: i64) -> Challenge {
        Challenge {
            id: "c1".into(),
            title: "Read five".into(),
            description: String::new(),
            metric: ChallengeMetric::MaterialsCompleted,
            target: 5,
            reward_points: 50,
            starts_at: at(starts),
            ends_at: at(ends),
            created_by: None,
            created_at: at(0),
        }
    }

    #[test]
    fn state_follows_window() {
        let c = challenge(10, 20);
        assert_eq!(state_at(&c, at(5)), ChallengeState::Upcoming);
        assert_eq!(state_at(&c, at(10)), ChallengeState::Active);
        assert_eq!(state_at(&c, at(20)), ChallengeState::Ended);
    }

    #[test]
    fn window_starts_at_later_of_join_and_start() {
        let c = challenge(10, 20);
        assert_eq!(progress_window(at(2), &c, at(15)), Some((at(10), at(15))));
        assert_eq!(progress_window(at(12), &c, at(30)), Some((at(12), at(20))));
        assert_eq!(progress_window(at(2), &c, at(5)), None);
    }

    #[test]
    fn input_validation() {
        let input = |target, starts, ends| ChallengeInput {
            title: " Sprint ".into(),
            description: None,
            metric: ChallengeMetric::StudyDays,
            target,
            reward_points: Some(10),
            starts_at: at(starts),
            ends_at: at(ends),
        };
        assert_eq!(validate_input(input(3, 0, 5)).unwrap().title, "Sprint");
        assert!(validate_input(input(0, 0, 5)).is_err());
        assert!(validate_input(input(3, 5, 5)).is_err());
    }
}
