//! Content-addressed memoization layer backed by a shared KV store.
//!
//! Keys are flat strings of the form `{activity}:{sha256(content)[:16]}`; the
//! cache is opaque-bytes in, opaque-bytes out. JSON (de)serialization and
//! corruption handling (bad deserialize → delete key, recompute, never fail
//! the run) live one layer up in `get_json`/`set_json`.

use async_trait::async_trait;
use moka::future::Cache as MokaCache;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

#[derive(Clone)]
struct Entry {
    bytes: Arc<[u8]>,
    expires_at: Instant,
}

/// The KV interface consumed by activities: `get`, `set`, `delete`.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Option<Vec<u8>>;
    async fn set(&self, key: &str, bytes: Vec<u8>, ttl: Duration);
    async fn delete(&self, key: &str);
}

/// In-memory cache. Last-writer-wins is fine because entries are
/// content-addressed: two writers computing the same key computed the same
/// value.
pub struct MemoCache {
    inner: MokaCache<String, Entry>,
}

impl MemoCache {
    pub fn new(max_capacity: u64) -> Self {
        Self {
            inner: MokaCache::builder().max_capacity(max_capacity).build(),
        }
    }
}

impl Default for MemoCache {
    fn default() -> Self {
        Self::new(100_000)
    }
}

#[async_trait]
impl Cache for MemoCache {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        match self.inner.get(key).await {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.bytes.to_vec()),
            Some(_) => {
                self.inner.invalidate(key).await;
                None
            }
            None => None,
        }
    }

    async fn set(&self, key: &str, bytes: Vec<u8>, ttl: Duration) {
        self.inner
            .insert(
                key.to_string(),
                Entry {
                    bytes: bytes.into(),
                    expires_at: Instant::now() + ttl,
                },
            )
            .await;
    }

    async fn delete(&self, key: &str) {
        self.inner.invalidate(key).await;
    }
}

/// Typed convenience wrapper: deserialize on read, delete-and-miss on corruption.
pub async fn get_json<T: DeserializeOwned>(cache: &dyn Cache, key: &str) -> Option<T> {
    let bytes = cache.get(key).await?;
    match serde_json::from_slice::<T>(&bytes) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(key, error = %err, "cache entry failed to deserialize, evicting");
            cache.delete(key).await;
            None
        }
    }
}

pub async fn set_json<T: Serialize>(cache: &dyn Cache, key: &str, value: &T, ttl: Duration) {
    match serde_json::to_vec(value) {
        Ok(bytes) => cache.set(key, bytes, ttl).await,
        Err(err) => warn!(key, error = %err, "failed to serialize cache value, skipping write"),
    }
}

/// Key composition for an activity: `{activity}:{content_hash[:16]}`.
pub fn activity_key(activity: &str, content_hash16: &str) -> String {
    format!("{activity}:{content_hash16}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
    struct Sample {
        value: u32,
    }

    #[tokio::test]
    async fn roundtrip_within_ttl() {
        let cache = MemoCache::new(100);
        set_json(&cache, "quality:abc", &Sample { value: 7 }, Duration::from_secs(60)).await;
        let got: Option<Sample> = get_json(&cache, "quality:abc").await;
        assert_eq!(got, Some(Sample { value: 7 }));
    }

    #[tokio::test]
    async fn expired_entry_is_a_miss() {
        let cache = MemoCache::new(100);
        cache.set("k", b"v".to_vec(), Duration::from_millis(1)).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn corrupted_entry_is_deleted_and_treated_as_miss() {
        let cache = MemoCache::new(100);
        cache.set("k", b"not json".to_vec(), Duration::from_secs(60)).await;
        let got: Option<Sample> = get_json(&cache, "k").await;
        assert_eq!(got, None);
        assert_eq!(cache.get("k").await, None);
    }

    #[test]
    fn key_composition() {
        assert_eq!(activity_key("quality", "abcd1234"), "quality:abcd1234");
    }
}
