pub mod analytics;
pub mod chat;
pub mod content;
pub mod courses;
pub mod enrollments;
pub mod gamification;
pub mod progress;
pub mod users;
