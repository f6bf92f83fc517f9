use chrono::{Days, Utc};
use serde::Serialize;

use crate::auth::AuthUser;
use crate::cache::keys::{admin_analytics_key, ANALYTICS_TTL};
use crate::cache::ResponseCache;
use crate::db::operations::analytics::{
    self, CourseStatusCounts, CurrencyRevenue, DailyCount, RoleCount, StatusCount, TutorCourseStats,
};
use crate::db::operations::courses;
use crate::db::operations::enrollments::{self, EnrollmentFilter, EnrollmentView};
use crate::db::operations::gamification;
use crate::db::operations::progress::{self, AttemptRecord};
use crate::db::DatabaseProxy;
use crate::realtime::RealtimeHub;
use crate::services::challenge::{self, ChallengeCard};
use crate::services::leaderboard;
use crate::services::progress::{course_progress, ratio_percentage, CourseProgress};
use crate::services::streak::{self, StreakView};
use crate::types::{EnrollmentStatus, LeaderboardPeriod};

const RECENT_ATTEMPTS: i64 = 5;
const TUTOR_RECENT_ATTEMPTS: i64 = 10;
const OPEN_REQUESTS_LIMIT: i64 = 50;
const ACTIVE_LEARNER_DAYS: u64 = 7;
const NEW_USER_DAYS: u64 = 30;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveCourse {
    pub id: String,
    pub title: String,
    pub slug: String,
    pub progress: CourseProgress,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentDashboard {
    pub active_courses: Vec<ActiveCourse>,
    pub open_requests: Vec<EnrollmentView>,
    pub streak: StreakView,
    pub total_points: i64,
    pub rank: Option<u32>,
    pub recent_attempts: Vec<AttemptRecord>,
    pub challenges: Vec<ChallengeCard>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TutorCourseSummary {
    #[serde(flatten)]
    pub stats: TutorCourseStats,
    pub completion_rate: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TutorDashboard {
    pub courses: Vec<TutorCourseSummary>,
    pub pending_requests: Vec<EnrollmentView>,
    pub recent_attempts: Vec<AttemptRecord>,
}

#[derive(Debug, Clone, Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminAnalytics {
    pub users_by_role: Vec<RoleCount>,
    pub courses: CourseStatusCounts,
    pub requests_by_status: Vec<StatusCount>,
    pub revenue: Vec<CurrencyRevenue>,
    pub active_learners_7d: i64,
    pub new_users_per_day: Vec<DailyCount>,
}

pub async fn student_dashboard(
    proxy: &DatabaseProxy,
    cache: &ResponseCache,
    hub: &RealtimeHub,
    user: &AuthUser,
) -> Result<StudentDashboard, sqlx::Error> {
    let today = Utc::now().date_naive();

    let mut active_courses = Vec::new();
    for course_id in enrollments::active_course_ids(proxy, &user.id).await? {
        let Some(course) = courses::find_course(proxy, &course_id).await? else {
            continue;
        };
        let counts = progress::course_counts(proxy, &user.id, &course.id).await?;
        active_courses.push(ActiveCourse {
            progress: course_progress(&course.id, counts),
            id: course.id,
            title: course.title,
            slug: course.slug,
        });
    }

    let filter = EnrollmentFilter {
        user_id: Some(user.id.clone()),
        ..EnrollmentFilter::default()
    };
    let (requests, _) = enrollments::list_views(proxy, &filter, OPEN_REQUESTS_LIMIT, 0).await?;
    let open_requests = requests
        .into_iter()
        .filter(|r| matches!(r.status, EnrollmentStatus::Pending | EnrollmentStatus::Approved))
        .collect();

    let streak = streak::view(gamification::find_streak(proxy, &user.id).await?, today);
    let total_points = gamification::total_points(proxy, &user.id).await?;
    let rank = leaderboard::ranking(proxy, cache, LeaderboardPeriod::All, None)
        .await?
        .into_iter()
        .find(|entry| entry.user_id == user.id)
        .map(|entry| entry.rank);
    let recent_attempts = progress::list_user_attempts(proxy, &user.id, None, RECENT_ATTEMPTS).await?;
    let challenges = challenge::cards_for_user(proxy, hub, &user.id)
        .await?
        .into_iter()
        .filter(|card| card.joined)
        .collect();

    Ok(StudentDashboard {
        active_courses,
        open_requests,
        streak,
        total_points,
        rank,
        recent_attempts,
        challenges,
    })
}

pub async fn tutor_dashboard(proxy: &DatabaseProxy, tutor: &AuthUser) -> Result<TutorDashboard, sqlx::Error> {
    let courses = analytics::tutor_course_stats(proxy, &tutor.id)
        .await?
        .into_iter()
        .map(|stats| TutorCourseSummary {
            // completions over (materials x active learners)
            completion_rate: ratio_percentage(stats.completions, stats.material_count * stats.active),
            stats,
        })
        .collect();

    let filter = EnrollmentFilter {
        status: Some(EnrollmentStatus::Pending),
        tutor_id: Some(tutor.id.clone()),
        ..EnrollmentFilter::default()
    };
    let (pending_requests, _) = enrollments::list_views(proxy, &filter, OPEN_REQUESTS_LIMIT, 0).await?;
    let recent_attempts = progress::list_tutor_attempts(proxy, &tutor.id, TUTOR_RECENT_ATTEMPTS).await?;

    Ok(TutorDashboard {
        courses,
        pending_requests,
        recent_attempts,
    })
}

pub async fn admin_analytics(proxy: &DatabaseProxy, cache: &ResponseCache) -> Result<AdminAnalytics, sqlx::Error> {
    if let Some(cached) = cache.get::<AdminAnalytics>(admin_analytics_key()).await {
        return Ok(cached);
    }

    let today = Utc::now().date_naive();
    let learners_since = today
        .checked_sub_days(Days::new(ACTIVE_LEARNER_DAYS - 1))
        .unwrap_or(today);
    let users_since = today
        .checked_sub_days(Days::new(NEW_USER_DAYS - 1))
        .unwrap_or(today);

    let report = AdminAnalytics {
        users_by_role: analytics::users_by_role(proxy).await?,
        courses: analytics::course_status_counts(proxy).await?,
        requests_by_status: analytics::requests_by_status(proxy).await?,
        revenue: analytics::revenue_by_currency(proxy).await?,
        active_learners_7d: analytics::active_learners_since(proxy, learners_since).await?,
        new_users_per_day: analytics::new_users_per_day(proxy, users_since).await?,
    };

    cache.set(admin_analytics_key(), &report, ANALYTICS_TTL).await;
    Ok(report)
}
