//! Result cache for generated artifacts.
//!
//! Regenerating a lesson for the same source material with the same options
//! costs a metered provider call; this cache makes the second request a
//! lookup instead. Keys are structured so that replacing or deleting a
//! source document purges every artifact derived from it with one prefix
//! invalidation.
//!
//! All failure modes degrade to a cache miss: a broken Redis never breaks
//! job processing, it only makes it slower.
//!
//! ## Configuration
//!
//! Environment variables:
//! - `CACHE_ENABLED`: set to "false" to disable caching (default: true)
//! - `REDIS_URL`: Redis connection URL (default: redis://localhost:6379)
//! - `CACHE_TTL_SECS`: artifact TTL in seconds (default: 86400)

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use studiora_core::defaults;

/// Build the key prefix covering every artifact derived from one source
/// document of one tenant.
pub fn artifact_prefix(tenant_id: Uuid, source_id: &str) -> String {
    format!("artifact:{}:{}:", tenant_id, source_id)
}

/// Build the full cache key for one artifact.
///
/// `scope` names what was generated ("lesson", "evaluation"); `options`
/// are the generation parameters that change the output. Both are hashed
/// so arbitrary option payloads cannot inject key separators.
pub fn artifact_key(tenant_id: Uuid, source_id: &str, scope: &str, options: &JsonValue) -> String {
    let mut hasher = Sha256::new();
    hasher.update(scope.as_bytes());
    hasher.update(options.to_string().as_bytes());
    let hash = hex::encode(hasher.finalize());
    format!("{}{}", artifact_prefix(tenant_id, source_id), &hash[..16])
}

enum CacheBackend {
    Redis(RwLock<Option<ConnectionManager>>),
    Memory(Mutex<HashMap<String, MemoryEntry>>),
    Disabled,
}

struct MemoryEntry {
    data: String,
    expires_at: Instant,
}

/// Artifact cache with Redis, in-memory, and disabled backends.
#[derive(Clone)]
pub struct ResultCache {
    inner: Arc<ResultCacheInner>,
}

struct ResultCacheInner {
    backend: CacheBackend,
    ttl_seconds: u64,
}

impl ResultCache {
    /// Create a cache from environment configuration.
    ///
    /// Falls back to the in-memory backend when Redis is unreachable, so a
    /// missing Redis costs cross-process sharing, not correctness.
    pub async fn from_env() -> Self {
        let enabled = std::env::var("CACHE_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let ttl_seconds: u64 = std::env::var("CACHE_TTL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults::CACHE_TTL_SECS);

        if !enabled {
            info!(
                subsystem = "limits",
                component = "result_cache",
                "Result cache disabled via CACHE_ENABLED=false"
            );
            return Self::disabled();
        }

        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());

        let backend = match redis::Client::open(redis_url.as_str()) {
            Ok(client) => match ConnectionManager::new(client).await {
                Ok(conn) => {
                    info!(
                        subsystem = "limits",
                        component = "result_cache",
                        ttl_secs = ttl_seconds,
                        "Result cache using Redis"
                    );
                    CacheBackend::Redis(RwLock::new(Some(conn)))
                }
                Err(e) => {
                    warn!(
                        subsystem = "limits",
                        component = "result_cache",
                        error = %e,
                        "Redis unavailable, result cache using in-memory backend"
                    );
                    CacheBackend::Memory(Mutex::new(HashMap::new()))
                }
            },
            Err(e) => {
                warn!(
                    subsystem = "limits",
                    component = "result_cache",
                    error = %e,
                    "Invalid Redis URL, result cache using in-memory backend"
                );
                CacheBackend::Memory(Mutex::new(HashMap::new()))
            }
        };

        Self {
            inner: Arc::new(ResultCacheInner {
                backend,
                ttl_seconds,
            }),
        }
    }

    /// Create an in-memory cache (tests, single-process mode).
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(ResultCacheInner {
                backend: CacheBackend::Memory(Mutex::new(HashMap::new())),
                ttl_seconds: defaults::CACHE_TTL_SECS,
            }),
        }
    }

    /// Create a disabled cache: every get misses, every set is dropped.
    pub fn disabled() -> Self {
        Self {
            inner: Arc::new(ResultCacheInner {
                backend: CacheBackend::Disabled,
                ttl_seconds: defaults::CACHE_TTL_SECS,
            }),
        }
    }

    /// Get the configured TTL.
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.inner.ttl_seconds)
    }

    /// Get a cached artifact. Backend errors surface as a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match &self.inner.backend {
            CacheBackend::Disabled => None,
            CacheBackend::Memory(map) => {
                let mut map = map.lock().await;
                match map.get(key) {
                    Some(entry) if entry.expires_at > Instant::now() => {
                        debug!(component = "result_cache", key, "Cache HIT");
                        serde_json::from_str(&entry.data).ok()
                    }
                    Some(_) => {
                        map.remove(key);
                        debug!(component = "result_cache", key, "Cache MISS (expired)");
                        None
                    }
                    None => {
                        debug!(component = "result_cache", key, "Cache MISS");
                        None
                    }
                }
            }
            CacheBackend::Redis(connection) => {
                let mut conn_guard = connection.write().await;
                let conn = conn_guard.as_mut()?;
                match conn.get::<_, Option<String>>(key).await {
                    Ok(Some(data)) => match serde_json::from_str(&data) {
                        Ok(value) => {
                            debug!(component = "result_cache", key, "Cache HIT");
                            Some(value)
                        }
                        Err(e) => {
                            warn!(component = "result_cache", key, error = %e, "Cache deserialization error");
                            None
                        }
                    },
                    Ok(None) => {
                        debug!(component = "result_cache", key, "Cache MISS");
                        None
                    }
                    Err(e) => {
                        error!(component = "result_cache", key, error = %e, "Redis GET error");
                        None
                    }
                }
            }
        }
    }

    /// Store an artifact with the configured TTL. Returns false when the
    /// value was not stored.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> bool {
        let serialized = match serde_json::to_string(value) {
            Ok(s) => s,
            Err(e) => {
                error!(component = "result_cache", key, error = %e, "Cache serialization error");
                return false;
            }
        };

        match &self.inner.backend {
            CacheBackend::Disabled => false,
            CacheBackend::Memory(map) => {
                map.lock().await.insert(
                    key.to_string(),
                    MemoryEntry {
                        data: serialized,
                        expires_at: Instant::now() + self.ttl(),
                    },
                );
                debug!(component = "result_cache", key, "Cache SET");
                true
            }
            CacheBackend::Redis(connection) => {
                let mut conn_guard = connection.write().await;
                let conn = match conn_guard.as_mut() {
                    Some(c) => c,
                    None => return false,
                };
                match conn
                    .set_ex::<_, _, ()>(key, serialized, self.inner.ttl_seconds)
                    .await
                {
                    Ok(_) => {
                        debug!(
                            component = "result_cache",
                            key,
                            ttl_secs = self.inner.ttl_seconds,
                            "Cache SET"
                        );
                        true
                    }
                    Err(e) => {
                        error!(component = "result_cache", key, error = %e, "Redis SET error");
                        false
                    }
                }
            }
        }
    }

    /// Remove a single artifact.
    pub async fn invalidate(&self, key: &str) -> bool {
        match &self.inner.backend {
            CacheBackend::Disabled => false,
            CacheBackend::Memory(map) => {
                map.lock().await.remove(key);
                debug!(component = "result_cache", key, "Cache INVALIDATE");
                true
            }
            CacheBackend::Redis(connection) => {
                let mut conn_guard = connection.write().await;
                let conn = match conn_guard.as_mut() {
                    Some(c) => c,
                    None => return false,
                };
                match conn.del::<_, ()>(key).await {
                    Ok(_) => {
                        debug!(component = "result_cache", key, "Cache INVALIDATE");
                        true
                    }
                    Err(e) => {
                        error!(component = "result_cache", key, error = %e, "Redis DEL error");
                        false
                    }
                }
            }
        }
    }

    /// Remove every artifact under a prefix (see [`artifact_prefix`]).
    pub async fn invalidate_prefix(&self, prefix: &str) -> bool {
        match &self.inner.backend {
            CacheBackend::Disabled => false,
            CacheBackend::Memory(map) => {
                let mut map = map.lock().await;
                let before = map.len();
                map.retain(|key, _| !key.starts_with(prefix));
                debug!(
                    component = "result_cache",
                    prefix,
                    removed = before - map.len(),
                    "Cache INVALIDATE PREFIX"
                );
                true
            }
            CacheBackend::Redis(connection) => {
                let mut conn_guard = connection.write().await;
                let conn = match conn_guard.as_mut() {
                    Some(c) => c,
                    None => return false,
                };
                let pattern = format!("{}*", prefix);
                match redis::cmd("KEYS")
                    .arg(&pattern)
                    .query_async::<Vec<String>>(conn)
                    .await
                {
                    Ok(keys) if !keys.is_empty() => match conn.del::<_, ()>(&keys[..]).await {
                        Ok(_) => {
                            info!(
                                component = "result_cache",
                                prefix,
                                removed = keys.len(),
                                "Cache INVALIDATE PREFIX"
                            );
                            true
                        }
                        Err(e) => {
                            error!(component = "result_cache", prefix, error = %e, "Redis DEL error");
                            false
                        }
                    },
                    Ok(_) => true,
                    Err(e) => {
                        error!(component = "result_cache", prefix, error = %e, "Redis KEYS error");
                        false
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn artifact_key_is_deterministic_and_structured() {
        let tenant = Uuid::new_v4();
        let key1 = artifact_key(tenant, "mat-1", "lesson", &json!({"level": "a2"}));
        let key2 = artifact_key(tenant, "mat-1", "lesson", &json!({"level": "a2"}));
        assert_eq!(key1, key2);
        assert!(key1.starts_with(&artifact_prefix(tenant, "mat-1")));

        // Options change the key; source changes the prefix.
        let key3 = artifact_key(tenant, "mat-1", "lesson", &json!({"level": "b1"}));
        assert_ne!(key1, key3);
        let key4 = artifact_key(tenant, "mat-2", "lesson", &json!({"level": "a2"}));
        assert!(!key4.starts_with(&artifact_prefix(tenant, "mat-1")));
    }

    #[test]
    fn artifact_keys_are_tenant_scoped() {
        let options = json!({});
        let key_a = artifact_key(Uuid::new_v4(), "mat-1", "lesson", &options);
        let key_b = artifact_key(Uuid::new_v4(), "mat-1", "lesson", &options);
        assert_ne!(key_a, key_b);
    }

    #[tokio::test]
    async fn memory_round_trip_and_invalidate() {
        let cache = ResultCache::in_memory();
        let value = json!({"title": "Lesson 1"});

        assert!(cache.get::<JsonValue>("k").await.is_none());
        assert!(cache.set("k", &value).await);
        assert_eq!(cache.get::<JsonValue>("k").await, Some(value));

        assert!(cache.invalidate("k").await);
        assert!(cache.get::<JsonValue>("k").await.is_none());
    }

    #[tokio::test]
    async fn prefix_invalidation_purges_dependent_artifacts() {
        let cache = ResultCache::in_memory();
        let tenant = Uuid::new_v4();

        let lesson = artifact_key(tenant, "mat-1", "lesson", &json!({"level": "a2"}));
        let other_lesson = artifact_key(tenant, "mat-1", "lesson", &json!({"level": "b1"}));
        let unrelated = artifact_key(tenant, "mat-2", "lesson", &json!({"level": "a2"}));

        for key in [&lesson, &other_lesson, &unrelated] {
            assert!(cache.set(key, &json!({"ok": true})).await);
        }

        assert!(cache.invalidate_prefix(&artifact_prefix(tenant, "mat-1")).await);

        assert!(cache.get::<JsonValue>(&lesson).await.is_none());
        assert!(cache.get::<JsonValue>(&other_lesson).await.is_none());
        assert!(cache.get::<JsonValue>(&unrelated).await.is_some());
    }

    #[tokio::test]
    async fn disabled_cache_never_stores() {
        let cache = ResultCache::disabled();
        assert!(!cache.set("k", &json!(1)).await);
        assert!(cache.get::<JsonValue>("k").await.is_none());
    }
}
