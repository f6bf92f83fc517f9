use std::sync::Arc;
use std::time::Instant;

use chrono::{Duration, Utc};
use tracing::info;

use crate::db::DatabaseProxy;
use crate::realtime::RealtimeHub;
use crate::services::challenge;

// wider than the 15 minute cadence so a skipped run is still covered
const LOOKBACK_MINUTES: i64 = 60;

pub async fn run(db: Arc<DatabaseProxy>, hub: Arc<RealtimeHub>) -> Result<(), super::WorkerError> {
    let start = Instant::now();
    let since = Utc::now() - Duration::minutes(LOOKBACK_MINUTES);
    let stats = challenge::sweep(&db, &hub, since).await?;

    info!(
        evaluated = stats.evaluated,
        completed = stats.completed,
        duration_secs = format!("{:.2}", start.elapsed().as_secs_f64()),
        "Challenge sweep completed"
    );
    Ok(())
}
