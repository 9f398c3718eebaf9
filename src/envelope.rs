use serde::Deserialize;
use serde::Serialize;

use crate::error::CacheError;
use crate::error::Result;
use crate::types::now_micros;
use crate::types::TagSet;
use crate::types::Timestamp;

// Prefixes every stored envelope. Anything without it, the lock sentinel included, is not an envelope.
const MAGIC: &[u8] = b"TCE\x01";

/// The unit stored under a [`CacheKey`](crate::types::CacheKey): an opaque payload, the time it was produced and the
/// tags it depends on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Envelope {
    #[serde(rename = "d")]
    data:       Vec<u8>,
    #[serde(rename = "c")]
    created_at: Timestamp,
    #[serde(rename = "t")]
    tags:       TagSet,
}

impl Envelope {
    /// Wrap a payload stamping it with the current time.
    pub fn new(data: Vec<u8>, tags: TagSet) -> Self {
        Self::with_time(data, now_micros(), tags)
    }

    pub fn with_time(data: Vec<u8>, created_at: Timestamp, tags: TagSet) -> Self {
        Self {
            data,
            created_at,
            tags,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    pub fn tags(&self) -> &TagSet {
        &self.tags
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut bytes = MAGIC.to_vec();
        postcard::to_io(self, &mut bytes)?;
        Ok(bytes)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let Some(body) = bytes.strip_prefix(MAGIC)
        else {
            return Err(CacheError::Codec("not an envelope".to_string()));
        };
        Ok(postcard::from_bytes(body)?)
    }
}
