use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::keys::{leaderboard_key, LEADERBOARD_TTL};
use crate::cache::ResponseCache;
use crate::db::operations::gamification::{points_totals, PointsTotal};
use crate::db::DatabaseProxy;
use crate::types::LeaderboardPeriod;

pub const DEFAULT_LIMIT: i64 = 20;
pub const MAX_LIMIT: i64 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedEntry {
    pub rank: u32,
    pub user_id: String,
    pub username: String,
    pub avatar_url: Option<String>,
    pub points: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Leaderboard {
    pub period: LeaderboardPeriod,
    pub course_id: Option<String>,
    pub entries: Vec<RankedEntry>,
    pub me: Option<RankedEntry>,
}

/// Standard competition ranking ("1224"). Input must already be sorted by
/// points descending, then username.
pub fn rank(totals: Vec<PointsTotal>) -> Vec<RankedEntry> {
    let mut ranked = Vec::with_capacity(totals.len());
    let mut previous_points: Option<i64> = None;
    let mut current_rank = 0u32;

    for (index, total) in totals.into_iter().enumerate() {
        if previous_points != Some(total.points) {
            current_rank = index as u32 + 1;
            previous_points = Some(total.points);
        }
        ranked.push(RankedEntry {
            rank: current_rank,
            user_id: total.user_id,
            username: total.username,
            avatar_url: total.avatar_url,
            points: total.points,
        });
    }

    ranked
}

/// Full ranking for a period and scope, memoised in the response cache.
pub async fn ranking(
    proxy: &DatabaseProxy,
    cache: &ResponseCache,
    period: LeaderboardPeriod,
    course_id: Option<&str>,
) -> Result<Vec<RankedEntry>, sqlx::Error> {
    let key = leaderboard_key(period.as_str(), course_id);
    if let Some(cached) = cache.get::<Vec<RankedEntry>>(&key).await {
        return Ok(cached);
    }

    let since = period
        .lookback_days()
        .map(|days| Utc::now() - Duration::days(days));
    let ranked = rank(points_totals(proxy, since, course_id).await?);

    cache.set(&key, &ranked, LEADERBOARD_TTL).await;
    Ok(ranked)
}

pub async fn leaderboard(
    proxy: &DatabaseProxy,
    cache: &ResponseCache,
    period: LeaderboardPeriod,
    course_id: Option<&str>,
    limit: i64,
    caller_id: &str,
) -> Result<Leaderboard, sqlx::Error> {
    let ranked = ranking(proxy, cache, period, course_id).await?;
    let me = ranked.iter().find(|entry| entry.user_id == caller_id).cloned();
    let limit = limit.clamp(1, MAX_LIMIT) as usize;

    Ok(Leaderboard {
        period,
        course_id: course_id.map(str::to_string),
        entries: ranked.into_iter().take(limit).collect(),
        me,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn total(name: &str, points: i64) -> PointsTotal {
        PointsTotal {
            user_id: format!("id-{name}"),
            username: name.to_string(),
            avatar_url: None,
            points,
        }
    }

    #[test]
    fn ties_share_rank_and_skip_following() {
        let ranked = rank(vec![
            total("ana", 50),
            total("ben", 30),
            total("cy", 30),
            total("dee", 10),
        ]);
        let ranks: Vec<u32> = ranked.iter().map(|e| e.rank).collect();
        assert_eq!(ranks, vec![1, 2, 2, 4]);
        assert_eq!(ranked[1].username, "ben");
    }

    #[test]
    fn everyone_at_zero_shares_first_place() {
        let ranked = rank(vec![total("a", 0), total("b", 0)]);
        assert!(ranked.iter().all(|e| e.rank == 1));
        assert!(rank(Vec::new()).is_empty());
    }
}
