use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;
use crate::types::TagSet;

/// Key-value storage shared by all cache users. Envelopes, lock sentinels and tag timestamps all live here.
///
/// A zero `ttl` means the value never expires. Every method must be atomic per key; `set_if_absent` and
/// `compare_and_swap` are what the stampede lock is built upon, so they must not be emulated with a read followed by
/// a write.
#[async_trait]
pub trait KvBackend: Debug + Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Returns `false` if the backend refused to store the value.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool>;

    /// Store the value only if there is nothing under the key yet. Returns `true` if the value was stored.
    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool>;

    /// Replace the value only if the current one is byte-equal to `expected`. Returns `true` if it was replaced.
    async fn compare_and_swap(&self, key: &str, expected: &[u8], value: &[u8], ttl: Duration) -> Result<bool>;

    /// Returns `false` if there was nothing to delete.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Delete the value only if it is byte-equal to `expected`. Returns `true` if it was deleted.
    async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> Result<bool>;

    /// Returns `true` if every key has been deleted.
    async fn delete_multi(&self, keys: &[String]) -> Result<bool> {
        let mut all = true;
        for key in keys {
            all &= self.delete(key).await?;
        }
        Ok(all)
    }
}

/// The expensive thing in front of which the cache sits.
///
/// The data source is also the authority on which tags a query depends on and which tags it modifies. The cache
/// never tries to find that out by itself.
#[async_trait]
pub trait DataSource: Send + Sync + 'static {
    type Params: Serialize + Debug + Send + Sync;
    type Output: Serialize + DeserializeOwned + Debug + Send + Sync + 'static;
    type Error: std::error::Error + Send + Sync + 'static;

    async fn execute(&self, query: &str, params: &Self::Params) -> Result<Self::Output, Self::Error>;

    /// Tags whose modification makes a result of this query stale.
    fn tables_read(&self, query: &str) -> TagSet;

    /// Tags this query modifies. Must be empty for read-only queries.
    fn tables_written(&self, query: &str) -> TagSet;
}
