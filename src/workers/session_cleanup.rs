use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use crate::db::operations::users;
use crate::db::DatabaseProxy;

pub async fn run(db: Arc<DatabaseProxy>) -> Result<(), super::WorkerError> {
    let start = Instant::now();
    debug!("Starting session cleanup cycle");

    let expired_sessions = users::delete_expired_sessions(&db).await?;

    info!(
        expired_sessions,
        duration_secs = format!("{:.2}", start.elapsed().as_secs_f64()),
        "Session cleanup completed"
    );
    Ok(())
}
