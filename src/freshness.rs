use std::collections::BTreeMap;

use crate::envelope::Envelope;
use crate::types::TagName;
use crate::types::Timestamp;

/// The most recent invalidation among the tags. Tags never touched count as the epoch.
pub fn last_invalidation(tag_stamps: &BTreeMap<TagName, Option<Timestamp>>) -> Timestamp {
    tag_stamps.values().map(|s| s.unwrap_or(0)).max().unwrap_or(0)
}

/// An envelope is fresh if it was produced no earlier than the last invalidation of every tag it depends on.
///
/// The envelope's own lifetime is not checked here: the backend expires envelopes by itself, so anything that made
/// it this far is alive.
pub fn is_fresh(envelope: &Envelope, tag_stamps: &BTreeMap<TagName, Option<Timestamp>>) -> bool {
    envelope.created_at() > 0 && envelope.created_at() >= last_invalidation(tag_stamps)
}
