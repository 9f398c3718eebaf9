use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use async_trait::async_trait;
use moka::future::Cache;
use moka::ops::compute::CompResult;
use moka::ops::compute::Op;
use moka::policy::EvictionPolicy;
use moka::Expiry;

use crate::error::Result;
use crate::traits::KvBackend;

#[derive(Clone, Debug)]
struct StoredValue {
    bytes: Arc<[u8]>,
    ttl:   Option<Duration>,
}

impl StoredValue {
    fn new(bytes: &[u8], ttl: Duration) -> Self {
        Self {
            bytes: Arc::from(bytes),
            ttl:   (!ttl.is_zero()).then_some(ttl),
        }
    }
}

// Every value carries its own lifetime; updates restart it.
struct PerValueTtl;

impl Expiry<String, StoredValue> for PerValueTtl {
    fn expire_after_create(&self, _key: &String, value: &StoredValue, _created_at: Instant) -> Option<Duration> {
        value.ttl
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &StoredValue,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        value.ttl
    }
}

/// In-process backend over the [moka](https://crates.io/crates/moka) cache.
///
/// Only useful when every cache user lives in the same process, or for testing. Cloning is cheap and the clones share
/// the same storage.
///
/// Eviction is LRU: a new value is always admitted, the least recently used one goes once `max_capacity` is reached.
/// A frequency-based admission policy could silently drop a fresh lock sentinel or envelope.
#[derive(Clone, Debug)]
pub struct MemoryBackend {
    cache: Cache<String, StoredValue>,
}

impl MemoryBackend {
    pub fn new(max_capacity: u64) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(max_capacity)
                .name("tag-cache")
                .eviction_policy(EvictionPolicy::lru())
                .expire_after(PerValueTtl)
                .build(),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.cache.get(key).await.map(|v| v.bytes.to_vec()))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool> {
        self.cache.insert(key.to_string(), StoredValue::new(value, ttl)).await;
        Ok(true)
    }

    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool> {
        let entry = self
            .cache
            .entry(key.to_string())
            .or_insert_with(async { StoredValue::new(value, ttl) })
            .await;
        Ok(entry.is_fresh())
    }

    async fn compare_and_swap(&self, key: &str, expected: &[u8], value: &[u8], ttl: Duration) -> Result<bool> {
        let replacement = StoredValue::new(value, ttl);
        let result = self
            .cache
            .entry(key.to_string())
            .and_compute_with(|entry| async move {
                match entry {
                    Some(entry) if entry.value().bytes.as_ref() == expected => Op::Put(replacement),
                    _ => Op::Nop,
                }
            })
            .await;
        Ok(matches!(result, CompResult::ReplacedWith(_)))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.cache.remove(key).await.is_some())
    }

    async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> Result<bool> {
        let result = self
            .cache
            .entry(key.to_string())
            .and_compute_with(|entry| async move {
                match entry {
                    Some(entry) if entry.value().bytes.as_ref() == expected => Op::Remove,
                    _ => Op::Nop,
                }
            })
            .await;
        Ok(matches!(result, CompResult::Removed(_)))
    }
}
