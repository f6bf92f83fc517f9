use std::time::Duration;

pub const SESSION_TTL: Duration = Duration::from_secs(10 * 60);
pub const CATALOG_TTL: Duration = Duration::from_secs(2 * 60);
pub const LEADERBOARD_TTL: Duration = Duration::from_secs(60);
pub const ANALYTICS_TTL: Duration = Duration::from_secs(5 * 60);

pub const CATALOG_PREFIX: &str = "catalog:";
pub const LEADERBOARD_PREFIX: &str = "leaderboard:";

pub fn session_key(token_hash: &str) -> String {
    format!("session:{}", token_hash)
}

pub fn catalog_list_key(query_fingerprint: &str) -> String {
    format!("{CATALOG_PREFIX}list:{query_fingerprint}")
}

pub fn catalog_course_key(id_or_slug: &str) -> String {
    format!("{CATALOG_PREFIX}course:{id_or_slug}")
}

pub fn catalog_categories_key() -> String {
    format!("{CATALOG_PREFIX}categories")
}

pub fn leaderboard_key(period: &str, course_id: Option<&str>) -> String {
    match course_id {
        Some(course_id) => format!("{LEADERBOARD_PREFIX}{period}:course:{course_id}"),
        None => format!("{LEADERBOARD_PREFIX}{period}:global"),
    }
}

pub fn admin_analytics_key() -> &'static str {
    "analytics:admin:overview"
}
