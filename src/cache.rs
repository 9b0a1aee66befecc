//! Redis-backed caching for TableInfo summaries.
//!
//! The cache is a pure optimization: every failure path (no Redis configured,
//! connection refused, slow round-trip) is logged and treated as a miss. TTL
//! is the only consistency mechanism, except that the dataset delete path
//! invalidates its entry eagerly.

use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use crate::catalog::TableInfo;

pub const TABLE_INFO_TTL_SECONDS: u64 = 300;

const OP_TIMEOUT: Duration = Duration::from_secs(5);
const KEY_PREFIX: &str = "nlq";

pub fn table_info_key(table_name: &str) -> String {
    format!("{}:table_info:{}", KEY_PREFIX, table_name)
}

pub fn table_info_pattern() -> String {
    format!("{}:table_info:*", KEY_PREFIX)
}

pub fn conversation_key(chat_id: i32) -> String {
    format!("{}:conv:history:chat:{}", KEY_PREFIX, chat_id)
}

/// Shared async Redis handle. Cheap to clone; absent when no REDIS_URL was
/// configured, in which case every operation is a no-op miss.
#[derive(Clone)]
pub struct RedisCache {
    manager: Option<ConnectionManager>,
}

impl RedisCache {
    pub async fn connect(redis_url: Option<&str>) -> Self {
        let Some(url) = redis_url else {
            info!("No REDIS_URL configured, cache and conversation history disabled");
            return Self { manager: None };
        };

        let client = match redis::Client::open(url) {
            Ok(client) => client,
            Err(e) => {
                warn!("Invalid Redis URL, running without cache: {}", e);
                return Self { manager: None };
            }
        };

        match tokio::time::timeout(OP_TIMEOUT, ConnectionManager::new(client)).await {
            Ok(Ok(manager)) => {
                info!("Redis connected");
                Self {
                    manager: Some(manager),
                }
            }
            Ok(Err(e)) => {
                warn!("Redis connection failed, running without cache: {}", e);
                Self { manager: None }
            }
            Err(_) => {
                warn!("Redis connection timed out, running without cache");
                Self { manager: None }
            }
        }
    }

    pub fn disabled() -> Self {
        Self { manager: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.manager.is_some()
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        let mut conn = self.manager.clone()?;
        match tokio::time::timeout(OP_TIMEOUT, conn.get::<_, Option<String>>(key)).await {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                warn!("Redis read error for {}: {}", key, e);
                None
            }
            Err(_) => {
                warn!("Redis read timed out for {}", key);
                None
            }
        }
    }

    pub async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) {
        let Some(mut conn) = self.manager.clone() else {
            return;
        };
        match tokio::time::timeout(
            OP_TIMEOUT,
            conn.set_ex::<_, _, ()>(key, value, ttl_seconds),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Redis write error for {}: {}", key, e),
            Err(_) => warn!("Redis write timed out for {}", key),
        }
    }

    pub async fn delete(&self, key: &str) {
        let Some(mut conn) = self.manager.clone() else {
            return;
        };
        match tokio::time::timeout(OP_TIMEOUT, conn.del::<_, ()>(key)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Redis delete error for {}: {}", key, e),
            Err(_) => warn!("Redis delete timed out for {}", key),
        }
    }

    pub async fn delete_pattern(&self, pattern: &str) {
        let Some(mut conn) = self.manager.clone() else {
            return;
        };
        let keys: Vec<String> =
            match tokio::time::timeout(OP_TIMEOUT, conn.keys::<_, Vec<String>>(pattern)).await {
                Ok(Ok(keys)) => keys,
                Ok(Err(e)) => {
                    warn!("Redis key scan error for {}: {}", pattern, e);
                    return;
                }
                Err(_) => {
                    warn!("Redis key scan timed out for {}", pattern);
                    return;
                }
            };
        if keys.is_empty() {
            return;
        }
        let count = keys.len();
        match tokio::time::timeout(OP_TIMEOUT, conn.del::<_, ()>(keys)).await {
            Ok(Ok(())) => info!("Invalidated {} cache entries", count),
            Ok(Err(e)) => warn!("Redis bulk delete error: {}", e),
            Err(_) => warn!("Redis bulk delete timed out"),
        }
    }

    pub async fn ping(&self) -> bool {
        let Some(mut conn) = self.manager.clone() else {
            return false;
        };
        let pong = async {
            let reply: redis::RedisResult<String> = redis::cmd("PING").query_async(&mut conn).await;
            reply
        };
        matches!(tokio::time::timeout(OP_TIMEOUT, pong).await, Ok(Ok(_)))
    }
}

pub async fn get_cached_table_info(cache: &RedisCache, table_name: &str) -> Option<TableInfo> {
    let raw = cache.get(&table_info_key(table_name)).await?;
    match serde_json::from_str(&raw) {
        Ok(info) => {
            debug!("Cache HIT for table_info: {}", table_name);
            Some(info)
        }
        Err(e) => {
            warn!("Discarding malformed cached table_info for {}: {}", table_name, e);
            None
        }
    }
}

pub async fn set_cached_table_info(cache: &RedisCache, table_name: &str, info: &TableInfo) {
    let Ok(serialized) = serde_json::to_string(info) else {
        return;
    };
    cache
        .set_ex(&table_info_key(table_name), &serialized, TABLE_INFO_TTL_SECONDS)
        .await;
    debug!(
        "Cached table_info for: {} (TTL: {}s)",
        table_name, TABLE_INFO_TTL_SECONDS
    );
}

pub async fn invalidate_table_cache(cache: &RedisCache, table_name: &str) {
    cache.delete(&table_info_key(table_name)).await;
    info!("Invalidated cache for table: {}", table_name);
}

pub async fn invalidate_all_table_caches(cache: &RedisCache) {
    cache.delete_pattern(&table_info_pattern()).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced() {
        assert_eq!(table_info_key("dataset_ab12cd34"), "nlq:table_info:dataset_ab12cd34");
        assert_eq!(conversation_key(7), "nlq:conv:history:chat:7");
        assert_eq!(table_info_pattern(), "nlq:table_info:*");
    }

    #[tokio::test]
    async fn disabled_cache_is_always_a_miss() {
        let cache = RedisCache::disabled();
        assert!(!cache.is_enabled());
        assert!(cache.get("nlq:table_info:x").await.is_none());
        // Writes and deletes are silent no-ops.
        cache.set_ex("nlq:table_info:x", "{}", 60).await;
        cache.delete("nlq:table_info:x").await;
        assert!(!cache.ping().await);
        assert!(get_cached_table_info(&cache, "dataset_x").await.is_none());
    }
}
