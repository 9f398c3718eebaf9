use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use tracing::debug;
use tracing::instrument;
use tracing::warn;

use crate::error::Result;
use crate::traits::KvBackend;
use crate::types::CacheKey;
use crate::types::LockOutcome;

/// Cooperative marker telling other cache users that a key is being recomputed.
///
/// Nothing is ever blocked by it: other users just see the sentinel instead of a value and come back later. Normally
/// there is no explicit unlock either. The recomputed envelope overwrites the sentinel, or the sentinel expires by
/// itself if its owner never gets that far. Only a failed recompute [releases](StampedeLock::release) it.
#[derive(Debug)]
pub struct StampedeLock<KV>
where
    KV: KvBackend,
{
    backend:  Arc<KV>,
    sentinel: Vec<u8>,
    lock_ttl: Duration,
}

impl<KV> StampedeLock<KV>
where
    KV: KvBackend,
{
    pub fn new(backend: Arc<KV>, sentinel: impl Into<Vec<u8>>, lock_ttl: Duration) -> Self {
        Self {
            backend,
            sentinel: sentinel.into(),
            lock_ttl,
        }
    }

    pub fn is_sentinel(&self, value: &[u8]) -> bool {
        value == self.sentinel.as_slice()
    }

    /// Take the lock on a key that has nothing under it.
    #[instrument(level = "trace", skip(self), fields(key = %key))]
    pub async fn try_acquire(&self, key: &CacheKey) -> Result<LockOutcome> {
        let acquired = self
            .backend
            .set_if_absent(key.as_str(), &self.sentinel, self.lock_ttl)
            .await?;
        Ok(Self::outcome(key, acquired))
    }

    /// Take the lock on a key that holds `current`, a value deemed unusable. If someone has changed the value since
    /// it was read then the lock is not taken.
    #[instrument(level = "trace", skip(self, current), fields(key = %key))]
    pub async fn try_replace(&self, key: &CacheKey, current: &[u8]) -> Result<LockOutcome> {
        let acquired = self
            .backend
            .compare_and_swap(key.as_str(), current, &self.sentinel, self.lock_ttl)
            .await?;
        Ok(Self::outcome(key, acquired))
    }

    /// Drop the lock early when there will be no value to overwrite it with.
    ///
    /// All holders share the same sentinel, so once the lock has been held for `lock_ttl` the sentinel under the key,
    /// if any, may already belong to someone else. It is left alone then.
    pub async fn release(&self, key: &CacheKey, acquired_at: Instant) {
        if acquired_at.elapsed() >= self.lock_ttl {
            debug!("Lock on '{key}' has outlived its TTL, not releasing");
            return;
        }
        match self.backend.compare_and_delete(key.as_str(), &self.sentinel).await {
            Ok(true) => debug!("Released '{key}'"),
            Ok(false) => (),
            Err(err) => warn!("Failed to release lock on '{key}': {err}"),
        }
    }

    fn outcome(key: &CacheKey, acquired: bool) -> LockOutcome {
        if acquired {
            debug!("Locked '{key}'");
            LockOutcome::Acquired
        }
        else {
            debug!("'{key}' is locked by someone else");
            LockOutcome::AlreadyLocked
        }
    }
}
