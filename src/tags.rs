use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::instrument;
use tracing::warn;

use crate::error::CacheError;
use crate::error::Result;
use crate::traits::KvBackend;
use crate::types::now_micros;
use crate::types::TagName;
use crate::types::TagSet;
use crate::types::Timestamp;

/// Per-tag "last invalidated at" timestamps, kept in the backend under the bare tag names.
#[derive(Debug)]
pub struct TagRegistry<KV>
where
    KV: KvBackend,
{
    backend: Arc<KV>,
    tag_ttl: Duration,
}

impl<KV> TagRegistry<KV>
where
    KV: KvBackend,
{
    pub fn new(backend: Arc<KV>, tag_ttl: Duration) -> Self {
        Self { backend, tag_ttl }
    }

    /// Stamp every tag with the current time.
    ///
    /// A failure to write one tag doesn't stop the others from being written: a partially applied invalidation is
    /// still better than none. The first failure is what gets reported.
    #[instrument(level = "trace", skip(self))]
    pub async fn touch_tags(&self, tags: &TagSet) -> Result<()> {
        if tags.is_empty() {
            return Err(CacheError::NoTags);
        }

        let now = now_micros().to_string();
        let mut first_error = None;

        for tag in tags {
            let outcome = self.backend.set(tag, now.as_bytes(), self.tag_ttl).await;
            let failure = match outcome {
                Ok(true) => continue,
                Ok(false) => CacheError::TagWriteFailed { tag: tag.clone() },
                Err(err) => err,
            };
            warn!("Tag '{tag}' not invalidated: {failure}");
            first_error.get_or_insert(failure);
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Current timestamps of the tags, `None` for those never touched or already expired.
    #[instrument(level = "trace", skip(self))]
    pub async fn tag_timestamps(&self, tags: &TagSet) -> Result<BTreeMap<TagName, Option<Timestamp>>> {
        let mut stamps = BTreeMap::new();
        for tag in tags {
            let stamp = match self.backend.get(tag).await? {
                Some(raw) => Some(Self::parse_stamp(tag, &raw)),
                None => None,
            };
            stamps.insert(tag.clone(), stamp);
        }
        Ok(stamps)
    }

    // Something we can't read under a tag name can't be trusted to be older than any value. Make every dependent
    // value stale until the tag expires or is touched again.
    fn parse_stamp(tag: &str, raw: &[u8]) -> Timestamp {
        std::str::from_utf8(raw)
            .ok()
            .and_then(|s| s.trim().parse::<Timestamp>().ok())
            .unwrap_or_else(|| {
                warn!("Unreadable timestamp under tag '{tag}'");
                Timestamp::MAX
            })
    }
}
