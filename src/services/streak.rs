use chrono::{Days, NaiveDate};
use serde::Serialize;

use crate::db::operations::gamification::{ActivityDay, StreakRow};

pub const MILESTONES: [i32; 6] = [3, 7, 14, 30, 60, 100];
pub const MILESTONE_MULTIPLIER: i32 = 2;
pub const CALENDAR_DAYS: u64 = 30;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StreakView {
    pub current_streak: i32,
    pub longest_streak: i32,
    pub last_activity_date: Option<NaiveDate>,
    pub active_today: bool,
    pub next_milestone: Option<i32>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CalendarDay {
    pub date: NaiveDate,
    pub count: i32,
}

/// Streak after studying on `day`.
pub fn advance(previous: Option<StreakRow>, day: NaiveDate) -> StreakRow {
    let Some(previous) = previous else {
        return first_day(day);
    };
    let Some(last) = previous.last_activity_date else {
        return StreakRow {
            longest_streak: previous.longest_streak.max(1),
            ..first_day(day)
        };
    };

    if day <= last {
        return previous;
    }

    let current = if last.checked_add_days(Days::new(1)) == Some(day) {
        previous.current_streak.max(0) + 1
    } else {
        1
    };

    StreakRow {
        current_streak: current,
        longest_streak: previous.longest_streak.max(current),
        last_activity_date: Some(day),
    }
}

fn first_day(day: NaiveDate) -> StreakRow {
    StreakRow {
        current_streak: 1,
        longest_streak: 1,
        last_activity_date: Some(day),
    }
}

/// Stored streaks are only zeroed by the nightly job; readers must not show a
/// streak whose last activity is older than yesterday.
pub fn effective_current(row: &StreakRow, today: NaiveDate) -> i32 {
    match row.last_activity_date {
        Some(last) if (today - last).num_days() <= 1 => row.current_streak,
        _ => 0,
    }
}

pub fn view(row: Option<StreakRow>, today: NaiveDate) -> StreakView {
    let row = row.unwrap_or_default();
    let current = effective_current(&row, today);
    StreakView {
        current_streak: current,
        longest_streak: row.longest_streak,
        last_activity_date: row.last_activity_date,
        active_today: row.last_activity_date == Some(today),
        next_milestone: MILESTONES.iter().copied().find(|m| *m > current),
    }
}

/// Milestones newly reached when the streak moves from `before` to `after`.
pub fn milestones_crossed(before: i32, after: i32) -> Vec<i32> {
    MILESTONES
        .iter()
        .copied()
        .filter(|m| before < *m && after >= *m)
        .collect()
}

/// Last `CALENDAR_DAYS` days ending today, oldest first, zero-filled.
pub fn calendar(activity: &[ActivityDay], today: NaiveDate) -> Vec<CalendarDay> {
    (0..CALENDAR_DAYS)
        .rev()
        .filter_map(|offset| today.checked_sub_days(Days::new(offset)))
        .map(|date| CalendarDay {
            date,
            count: activity
                .iter()
                .find(|day| day.activity_date == date)
                .map(|day| day.activity_count)
                .unwrap_or(0),
        })
        .collect()
}

pub fn calendar_start(today: NaiveDate) -> NaiveDate {
    today
        .checked_sub_days(Days::new(CALENDAR_DAYS - 1))
        .unwrap_or(today)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn day(offset: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap() + chrono::Duration::days(offset)
    }

    fn row(current: i32, longest: i32, last: NaiveDate) -> StreakRow {
        StreakRow {
            current_streak: current,
            longest_streak: longest,
            last_activity_date: Some(last),
        }
    }

    #[test]
    fn first_activity_starts_at_one() {
        assert_eq!(advance(None, day(0)), row(1, 1, day(0)));
    }

    #[test]
    fn same_day_is_unchanged_and_next_day_extends() {
        let start = row(4, 6, day(10));
        assert_eq!(advance(Some(start), day(10)), start);
        assert_eq!(advance(Some(start), day(11)), row(5, 6, day(11)));
        assert_eq!(advance(Some(row(6, 6, day(10))), day(11)), row(7, 7, day(11)));
    }

    #[test]
    fn gap_resets_and_past_dates_are_ignored() {
        let start = row(4, 6, day(10));
        assert_eq!(advance(Some(start), day(13)), row(1, 6, day(13)));
        assert_eq!(advance(Some(start), day(3)), start);
    }

    #[test]
    fn effective_streak_expires_after_a_missed_day() {
        let stored = row(5, 5, day(10));
        assert_eq!(effective_current(&stored, day(10)), 5);
        assert_eq!(effective_current(&stored, day(11)), 5);
        assert_eq!(effective_current(&stored, day(12)), 0);
        assert_eq!(view(None, day(0)).current_streak, 0);
    }

    #[test]
    fn milestones_fire_once_per_crossing() {
        assert_eq!(milestones_crossed(2, 3), vec![3]);
        assert_eq!(milestones_crossed(3, 4), Vec::<i32>::new());
        assert_eq!(milestones_crossed(0, 7), vec![3, 7]);
        assert_eq!(view(Some(row(7, 7, day(0))), day(0)).next_milestone, Some(14));
    }

    #[test]
    fn calendar_is_zero_filled_and_ordered() {
        let activity = vec![
            ActivityDay { activity_date: day(29), activity_count: 3 },
            ActivityDay { activity_date: day(27), activity_count: 1 },
        ];
        let days = calendar(&activity, day(29));
        assert_eq!(days.len(), 30);
        assert_eq!(days.first().unwrap().date, day(0));
        assert_eq!(days.last().unwrap().count, 3);
        assert_eq!(days[27].count, 1);
        assert_eq!(days[28].count, 0);
        assert_eq!(calendar_start(day(29)), day(0));
    }

    proptest! {
        #[test]
        fn longest_never_below_current(gaps in proptest::collection::vec(0i64..4, 1..40)) {
            let mut state: Option<StreakRow> = None;
            let mut date = day(0);
            for gap in gaps {
                date += chrono::Duration::days(gap);
                let next = advance(state, date);
                prop_assert!(next.current_streak >= 1);
                prop_assert!(next.longest_streak >= next.current_streak);
                if let Some(prev) = state {
                    prop_assert!(next.longest_streak >= prev.longest_streak);
                }
                state = Some(next);
            }
        }

        #[test]
        fn replaying_a_day_is_idempotent(offset in 0i64..365, current in 1i32..50) {
            let stored = row(current, current, day(offset));
            prop_assert_eq!(advance(Some(stored), day(offset)), stored);
        }
    }
}
