use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::info;

use crate::db::operations::gamification;
use crate::db::DatabaseProxy;

/// Zeroes stored current streaks whose last activity is before yesterday.
pub async fn run(db: Arc<DatabaseProxy>) -> Result<(), super::WorkerError> {
    let start = Instant::now();
    let reset = gamification::reset_broken_streaks(&db, Utc::now().date_naive()).await?;

    info!(
        reset,
        duration_secs = format!("{:.2}", start.elapsed().as_secs_f64()),
        "Streak reset completed"
    );
    Ok(())
}
