pub mod keys;
pub mod memory;

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub use memory::MemoryCache;

const TTL_JITTER_RATIO: f64 = 0.1;
const SCAN_BATCH: usize = 200;

#[derive(Clone)]
pub struct RedisCache {
    connection: MultiplexedConnection,
}

impl RedisCache {
    pub fn new(connection: MultiplexedConnection) -> Self {
        Self { connection }
    }

    pub async fn connect(redis_url: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(redis_url)?;
        let connection = client.get_multiplexed_tokio_connection().await?;
        Ok(Self::new(connection))
    }

    pub async fn get<T>(&self, key: &str) -> Option<T>
    where
        T: DeserializeOwned,
    {
        let mut conn = self.connection.clone();
        let payload: Option<String> = conn.get(key).await.ok()?;
        payload.and_then(|p| serde_json::from_str(&p).ok())
    }

    pub async fn set<T>(&self, key: &str, value: &T, ttl: Duration)
    where
        T: Serialize,
    {
        let payload = match serde_json::to_string(value) {
            Ok(p) => p,
            Err(_) => return,
        };
        let mut conn = self.connection.clone();

        if !ttl.is_zero() {
            let ttl = apply_ttl_jitter(ttl);
            let ttl_secs = ttl.as_secs().max(1);
            let _: Result<(), _> = conn.set_ex(key, payload, ttl_secs).await;
        } else {
            let _: Result<(), _> = conn.set(key, payload).await;
        }
    }

    pub async fn delete(&self, key: &str) {
        let mut conn = self.connection.clone();
        let _: Result<u64, _> = conn.del(key).await;
    }

    pub async fn delete_prefix(&self, prefix: &str) -> usize {
        let mut conn = self.connection.clone();
        let pattern = format!("{prefix}*");
        let mut cursor: u64 = 0;
        let mut removed = 0usize;
        loop {
            let scanned: Result<(u64, Vec<String>), _> = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await;
            let Ok((next, keys)) = scanned else {
                break;
            };
            if !keys.is_empty() {
                let deleted: Result<usize, _> = conn.del(&keys).await;
                removed += deleted.unwrap_or(0);
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }
        removed
    }

    pub async fn is_connected(&self) -> bool {
        let mut conn = self.connection.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .is_ok()
    }
}

fn apply_ttl_jitter(ttl: Duration) -> Duration {
    let base_ms = ttl.as_millis() as f64;
    let mut rng = rand::rng();
    let factor = rng.random_range(1.0 - TTL_JITTER_RATIO..=1.0 + TTL_JITTER_RATIO);
    let jittered_ms = (base_ms * factor).round().max(1.0);
    Duration::from_millis(jittered_ms as u64)
}

/// Response memoization: Redis when configured, the in-process cache otherwise.
#[derive(Clone)]
pub struct ResponseCache {
    redis: Option<RedisCache>,
    memory: Arc<MemoryCache>,
}

impl ResponseCache {
    pub fn new(redis: Option<RedisCache>, memory: Arc<MemoryCache>) -> Self {
        Self { redis, memory }
    }

    pub fn memory(&self) -> &Arc<MemoryCache> {
        &self.memory
    }

    pub fn redis(&self) -> Option<&RedisCache> {
        self.redis.as_ref()
    }

    pub async fn get<T>(&self, key: &str) -> Option<T>
    where
        T: DeserializeOwned,
    {
        match &self.redis {
            Some(redis) => redis.get(key).await,
            None => self.memory.get(key),
        }
    }

    pub async fn set<T>(&self, key: &str, value: &T, ttl: Duration)
    where
        T: Serialize,
    {
        match &self.redis {
            Some(redis) => redis.set(key, value, ttl).await,
            None => self.memory.set_with_ttl(key, value, ttl),
        }
    }

    pub async fn delete(&self, key: &str) {
        if let Some(redis) = &self.redis {
            redis.delete(key).await;
        }
        self.memory.delete(key);
    }

    pub async fn invalidate_prefix(&self, prefix: &str) {
        let mut removed = self.memory.delete_prefix(prefix);
        if let Some(redis) = &self.redis {
            removed += redis.delete_prefix(prefix).await;
        }
        tracing::debug!(prefix, removed, "cache prefix invalidated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn response_cache_falls_back_to_memory() {
        let memory = Arc::new(MemoryCache::new(8, Duration::from_secs(60)));
        let cache = ResponseCache::new(None, Arc::clone(&memory));

        cache
            .set(&keys::catalog_course_key("abc"), &"course", Duration::from_secs(10))
            .await;
        assert_eq!(
            cache.get::<String>(&keys::catalog_course_key("abc")).await,
            Some("course".to_string())
        );
        assert_eq!(memory.len(), 1);

        cache.invalidate_prefix(keys::CATALOG_PREFIX).await;
        assert!(memory.is_empty());
    }

    #[test]
    fn ttl_jitter_stays_within_ratio() {
        for _ in 0..100 {
            let jittered = apply_ttl_jitter(Duration::from_secs(100));
            assert!(jittered >= Duration::from_secs(90));
            assert!(jittered <= Duration::from_secs(110));
        }
    }
}
