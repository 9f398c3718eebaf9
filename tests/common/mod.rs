#![allow(dead_code)]

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tag_cache::prelude::*;

#[derive(Debug, thiserror::Error)]
#[error("no answer for '{0}'")]
pub struct SourceError(pub String);

/// Answers queries from a table of canned results and counts how often it was asked.
#[derive(Debug, Default)]
pub struct ScriptedSource {
    catalog: QueryCatalog,
    answers: Mutex<HashMap<String, Value>>,
    calls:   AtomicUsize,
    latency: Duration,
}

impl ScriptedSource {
    pub fn new(catalog: QueryCatalog) -> Self {
        Self {
            catalog,
            ..Default::default()
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn answer(self, query: &str, value: Value) -> Self {
        self.set_answer(query, value);
        self
    }

    pub fn set_answer(&self, query: &str, value: Value) {
        self.answers.lock().unwrap().insert(query.to_string(), value);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataSource for ScriptedSource {
    type Error = SourceError;
    type Output = Value;
    type Params = Value;

    async fn execute(&self, query: &str, _params: &Value) -> Result<Value, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        // The answer is what the data looked like when the query started, not when it finished.
        let answer = self
            .answers
            .lock()
            .unwrap()
            .get(query)
            .cloned()
            .ok_or_else(|| SourceError(query.to_string()));
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        answer
    }

    fn tables_read(&self, query: &str) -> TagSet {
        self.catalog.tables_read(query)
    }

    fn tables_written(&self, query: &str) -> TagSet {
        self.catalog.tables_written(query)
    }
}

/// Memory backend which counts reads per key and can be told to refuse plain `set` to some keys. Atomic operations are
/// never refused, so the stampede lock keeps working.
#[derive(Debug, Default)]
pub struct CountingBackend {
    inner:   MemoryBackend,
    gets:    Mutex<HashMap<String, usize>>,
    refused: Mutex<HashSet<String>>,
}

impl CountingBackend {
    pub fn gets(&self, key: &str) -> usize {
        self.gets.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    pub fn refuse_sets_to(&self, key: &str) {
        self.refused.lock().unwrap().insert(key.to_string());
    }

    fn refuses(&self, key: &str) -> bool {
        self.refused.lock().unwrap().contains(key)
    }
}

#[async_trait]
impl KvBackend for CountingBackend {
    async fn get(&self, key: &str) -> tag_cache::error::Result<Option<Vec<u8>>> {
        *self.gets.lock().unwrap().entry(key.to_string()).or_default() += 1;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> tag_cache::error::Result<bool> {
        if self.refuses(key) {
            return Ok(false);
        }
        self.inner.set(key, value, ttl).await
    }

    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> tag_cache::error::Result<bool> {
        self.inner.set_if_absent(key, value, ttl).await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &[u8],
        value: &[u8],
        ttl: Duration,
    ) -> tag_cache::error::Result<bool> {
        self.inner.compare_and_swap(key, expected, value, ttl).await
    }

    async fn delete(&self, key: &str) -> tag_cache::error::Result<bool> {
        self.inner.delete(key).await
    }

    async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> tag_cache::error::Result<bool> {
        self.inner.compare_and_delete(key, expected).await
    }
}

pub const USERS_QUERY: &str = "SELECT id FROM users";
pub const USERS_ORDERS_QUERY: &str = "SELECT * FROM users JOIN orders USING (user_id)";
pub const UPDATE_USERS: &str = "UPDATE users SET name = 'x'";

pub fn catalog() -> QueryCatalog {
    QueryCatalog::new()
        .reads(USERS_QUERY, ["users"])
        .reads(USERS_ORDERS_QUERY, ["users", "orders"])
        .writes(UPDATE_USERS, ["users"])
}

pub fn config(try_count: u32, delay_micros: u64) -> CacheConfig {
    let mut config = CacheConfig::default();
    config.set_try_count(try_count);
    config.set_delay(delay_micros);
    config
}

pub fn build_cache(
    backend: &Arc<CountingBackend>,
    source: &Arc<ScriptedSource>,
    config: CacheConfig,
) -> TagCache<CountingBackend, ScriptedSource> {
    TagCache::builder()
        .backend(Arc::clone(backend))
        .data_source(Arc::clone(source))
        .config(config)
        .build()
        .unwrap()
}

/// Tag timestamps have microsecond resolution; make sure whatever comes next happens strictly later.
pub async fn tick() {
    tokio::time::sleep(Duration::from_millis(2)).await;
}
