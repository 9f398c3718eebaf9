use std::collections::BTreeSet;
use std::fmt::Display;

use serde::Deserialize;
use serde::Serialize;

/// Name of an invalidation domain; most often a table name.
pub type TagName = String;

/// Ordered to keep envelope encoding stable.
pub type TagSet = BTreeSet<TagName>;

/// Microseconds since the Unix epoch. Zero means "never".
pub type Timestamp = i64;

/// Key of a cached envelope. Only [`KeyDeriver`](crate::key::KeyDeriver) produces these, which is why they never
/// collide with tag names that are stored in the same namespace unhashed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub(crate) fn new(key: String) -> Self {
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Outcome of a single attempt to take the stampede lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    Acquired,
    AlreadyLocked,
}

/// What the orchestrator found under a key.
#[derive(Debug)]
pub(crate) enum Lookup<T> {
    Fresh(T),
    Locked,
    // Raw bytes are kept to compare-and-swap them for the lock.
    Stale(Vec<u8>),
    Absent,
}

pub fn now_micros() -> Timestamp {
    chrono::Utc::now().timestamp_micros()
}

/// Build a [`TagSet`] out of anything string-like.
pub fn tag_set<I, S>(tags: I) -> TagSet
where
    I: IntoIterator<Item = S>,
    S: Into<TagName>,
{
    tags.into_iter().map(Into::into).collect()
}
