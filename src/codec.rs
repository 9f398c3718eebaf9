//! Payload (de)serializers.
//!
//! The cache never looks into a payload: whatever the data source returns is turned into bytes by a [`Codec`] before
//! it is wrapped into an [`Envelope`](crate::envelope::Envelope), and turned back into a value when a fresh envelope
//! is found.
use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

pub trait Codec<T>: Debug + Send + Sync + 'static {
    fn encode(&self, value: &T) -> Result<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> Result<T>;
}

/// Human-readable payloads; the default.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl<T> Codec<T> for JsonCodec
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Compact binary payloads. Not self-describing, so it can't be used with `serde_json::Value` outputs.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostcardCodec;

impl<T> Codec<T> for PostcardCodec
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &T) -> Result<Vec<u8>> {
        Ok(postcard::to_stdvec(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<T> {
        Ok(postcard::from_bytes(bytes)?)
    }
}
