use std::sync::Arc;
use std::time::{Instant, SystemTime};

use crate::cache::{MemoryCache, RedisCache, ResponseCache};
use crate::config::Config;
use crate::db::DatabaseProxy;
use crate::realtime::RealtimeHub;
use crate::response::AppError;

#[derive(Clone)]
pub struct AppState {
    started_at: Instant,
    started_at_system: SystemTime,
    config: Arc<Config>,
    db_proxy: Option<Arc<DatabaseProxy>>,
    cache: ResponseCache,
    realtime: Arc<RealtimeHub>,
}

impl AppState {
    pub fn new(
        config: Config,
        db_proxy: Option<Arc<DatabaseProxy>>,
        redis: Option<RedisCache>,
    ) -> Self {
        let memory = Arc::new(MemoryCache::new(
            config.memory_cache_capacity,
            config.memory_cache_ttl,
        ));
        Self {
            started_at: Instant::now(),
            started_at_system: SystemTime::now(),
            config: Arc::new(config),
            db_proxy,
            cache: ResponseCache::new(redis, memory),
            realtime: RealtimeHub::new(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn started_at_system(&self) -> SystemTime {
        self.started_at_system
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn db_proxy(&self) -> Option<Arc<DatabaseProxy>> {
        self.db_proxy.clone()
    }

    pub fn require_db(&self) -> Result<Arc<DatabaseProxy>, AppError> {
        self.db_proxy.clone().ok_or_else(AppError::unavailable)
    }

    pub fn cache(&self) -> ResponseCache {
        self.cache.clone()
    }

    pub fn memory_cache(&self) -> Arc<MemoryCache> {
        Arc::clone(self.cache.memory())
    }

    pub fn realtime(&self) -> Arc<RealtimeHub> {
        Arc::clone(&self.realtime)
    }
}
