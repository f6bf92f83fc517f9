mod cache_purge;
mod challenge_sweep;
mod session_cleanup;
mod streak_reset;

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use crate::cache::MemoryCache;
use crate::config::{env_bool, env_non_empty};
use crate::db::DatabaseProxy;
use crate::realtime::RealtimeHub;

static WORKER_LEADER: AtomicBool = AtomicBool::new(false);

pub fn is_worker_leader() -> bool {
    WORKER_LEADER.load(Ordering::Relaxed)
}

fn set_worker_leader(val: bool) {
    WORKER_LEADER.store(val, Ordering::Relaxed);
}

fn env_flag(name: &str, default: bool) -> bool {
    env_bool(name).unwrap_or(default)
}

fn schedule_for(name: &str, default: &str) -> String {
    env_non_empty(name).unwrap_or_else(|| default.to_string())
}

pub struct WorkerManager {
    scheduler: Mutex<JobScheduler>,
    shutdown_tx: broadcast::Sender<()>,
    db_proxy: Arc<DatabaseProxy>,
    realtime: Arc<RealtimeHub>,
    memory_cache: Arc<MemoryCache>,
}

impl WorkerManager {
    pub async fn new(
        db_proxy: Arc<DatabaseProxy>,
        realtime: Arc<RealtimeHub>,
        memory_cache: Arc<MemoryCache>,
    ) -> Result<Self, WorkerError> {
        let scheduler = JobScheduler::new().await.map_err(WorkerError::Scheduler)?;
        let (shutdown_tx, _) = broadcast::channel(1);
        Ok(Self {
            scheduler: Mutex::new(scheduler),
            shutdown_tx,
            db_proxy,
            realtime,
            memory_cache,
        })
    }

    pub async fn start(&self) -> Result<(), WorkerError> {
        if !env_flag("WORKER_LEADER", false) {
            info!("WORKER_LEADER not set, skipping worker startup");
            return Ok(());
        }

        set_worker_leader(true);
        info!("Starting workers (leader mode)");

        let scheduler = self.scheduler.lock().await;

        if env_flag("ENABLE_SESSION_CLEANUP_WORKER", true) {
            let schedule = schedule_for("SESSION_CLEANUP_SCHEDULE", "0 0 * * * *");
            let db = Arc::clone(&self.db_proxy);
            self.add_job(&scheduler, "session_cleanup", &schedule, move || {
                session_cleanup::run(Arc::clone(&db))
            })
            .await?;
        }

        if env_flag("ENABLE_STREAK_RESET_WORKER", true) {
            let schedule = schedule_for("STREAK_RESET_SCHEDULE", "0 5 0 * * *");
            let db = Arc::clone(&self.db_proxy);
            self.add_job(&scheduler, "streak_reset", &schedule, move || {
                streak_reset::run(Arc::clone(&db))
            })
            .await?;
        }

        if env_flag("ENABLE_CHALLENGE_SWEEP_WORKER", true) {
            let schedule = schedule_for("CHALLENGE_SWEEP_SCHEDULE", "0 */15 * * * *");
            let db = Arc::clone(&self.db_proxy);
            let hub = Arc::clone(&self.realtime);
            self.add_job(&scheduler, "challenge_sweep", &schedule, move || {
                challenge_sweep::run(Arc::clone(&db), Arc::clone(&hub))
            })
            .await?;
        }

        if env_flag("ENABLE_CACHE_PURGE_WORKER", true) {
            let schedule = schedule_for("CACHE_PURGE_SCHEDULE", "0 * * * * *");
            let cache = Arc::clone(&self.memory_cache);
            self.add_job(&scheduler, "cache_purge", &schedule, move || {
                cache_purge::run(Arc::clone(&cache))
            })
            .await?;
        }

        scheduler.start().await.map_err(WorkerError::Scheduler)?;
        info!("All workers started");

        Ok(())
    }

    /// Registers a cron job whose run is abandoned when shutdown is signalled.
    async fn add_job<F, Fut>(
        &self,
        scheduler: &JobScheduler,
        name: &'static str,
        schedule: &str,
        task: F,
    ) -> Result<(), WorkerError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), WorkerError>> + Send + 'static,
    {
        let shutdown_rx = self.shutdown_tx.subscribe();
        let task = Arc::new(task);
        let job = Job::new_async(schedule, move |_uuid, _lock| {
            let task = Arc::clone(&task);
            let mut rx = shutdown_rx.resubscribe();
            Box::pin(async move {
                tokio::select! {
                    _ = rx.recv() => {
                        warn!(worker = name, "worker run cancelled by shutdown");
                    },
                    result = task() => {
                        if let Err(e) = result {
                            error!(worker = name, error = %e, "worker run failed");
                        }
                    }
                }
            })
        })
        .map_err(WorkerError::Scheduler)?;
        scheduler.add(job).await.map_err(WorkerError::Scheduler)?;
        info!(worker = name, schedule = %schedule, "worker scheduled");
        Ok(())
    }

    pub async fn stop(&self) {
        if !is_worker_leader() {
            return;
        }

        info!("Stopping workers...");
        let _ = self.shutdown_tx.send(());

        let mut scheduler = self.scheduler.lock().await;
        if let Err(e) = scheduler.shutdown().await {
            warn!(error = %e, "Error shutting down scheduler");
        }

        set_worker_leader(false);
        info!("Workers stopped");
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] tokio_cron_scheduler::JobSchedulerError),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_falls_back_to_default() {
        assert_eq!(
            schedule_for("TUTORHUB_TEST_UNSET_SCHEDULE", "0 * * * * *"),
            "0 * * * * *"
        );
    }

    #[test]
    fn flags_use_default_when_unset() {
        assert!(env_flag("TUTORHUB_TEST_UNSET_FLAG", true));
        assert!(!env_flag("TUTORHUB_TEST_UNSET_FLAG", false));
    }
}
