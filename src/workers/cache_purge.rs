use std::sync::Arc;

use tracing::debug;

use crate::cache::MemoryCache;

pub async fn run(cache: Arc<MemoryCache>) -> Result<(), super::WorkerError> {
    let purged = cache.purge_expired();
    if purged > 0 {
        debug!(purged, remaining = cache.len(), "Memory cache purge completed");
    }
    Ok(())
}
