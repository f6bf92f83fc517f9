pub mod challenge;
pub mod chat;
pub mod dashboard;
pub mod enrollment;
pub mod grading;
pub mod leaderboard;
pub mod progress;
pub mod rewards;
pub mod streak;
pub mod validation;
