use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Extension, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::auth::AuthUser;
use crate::db::operations::gamification::{self, PointsEntry};
use crate::response::{created, ok, AppError};
use crate::services::{challenge, leaderboard, streak};
use crate::state::AppState;
use crate::types::LeaderboardPeriod;

const RECENT_POINTS: i64 = 20;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/streak", get(get_streak))
        .route("/calendar", get(get_calendar))
        .route("/points", get(get_points))
        .route("/challenges", get(list_challenges))
        .route("/challenges/:id/join", post(join_challenge))
        .route("/leaderboard", get(get_leaderboard))
}

async fn get_streak(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    let row = gamification::find_streak(&proxy, &user.id).await?;
    Ok(ok(streak::view(row, Utc::now().date_naive())))
}

async fn get_calendar(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    let today = Utc::now().date_naive();
    let activity = gamification::activity_since(&proxy, &user.id, streak::calendar_start(today)).await?;
    Ok(ok(streak::calendar(&activity, today)))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PointsResponse {
    total: i64,
    recent: Vec<PointsEntry>,
}

async fn get_points(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    Ok(ok(PointsResponse {
        total: gamification::total_points(&proxy, &user.id).await?,
        recent: gamification::recent_points(&proxy, &user.id, RECENT_POINTS).await?,
    }))
}

async fn list_challenges(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    let cards = challenge::cards_for_user(&proxy, &state.realtime(), &user.id).await?;
    Ok(ok(cards))
}

async fn join_challenge(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(challenge_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    let participation = challenge::join(&proxy, &state.realtime(), &challenge_id, &user.id).await?;
    Ok(created(participation))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LeaderboardQuery {
    period: Option<LeaderboardPeriod>,
    course_id: Option<String>,
    limit: Option<i64>,
}

async fn get_leaderboard(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    let course_id = query
        .course_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty());
    let board = leaderboard::leaderboard(
        &proxy,
        &state.cache(),
        query.period.unwrap_or(LeaderboardPeriod::Week),
        course_id,
        query.limit.unwrap_or(leaderboard::DEFAULT_LIMIT),
        &user.id,
    )
    .await?;
    Ok(ok(board))
}
