use std::error::Error as StdError;

use thiserror::Error;

use crate::types::CacheKey;
use crate::types::TagName;

pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

pub type Result<T, E = CacheError> = std::result::Result<T, E>;

/// Coarse classification of [`CacheError`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The caller passed something the cache cannot work with.
    InvalidInput,
    /// The key-value backend refused to store a tag or an envelope.
    BackendWriteFailed,
    /// The retry budget was exhausted while another party held the stampede lock.
    LockTimeout,
    /// The data source failed. Never retried.
    UpstreamFailure,
    /// The key-value backend itself is unreachable or misbehaving.
    Backend,
    /// A payload or an envelope could not be (de)serialized.
    Codec,
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Query string is empty")]
    EmptyOperand,

    #[error("No tags to invalidate")]
    NoTags,

    #[error("No page markup given")]
    EmptyMarkup,

    #[error("Not a valid page URL: '{0}'")]
    InvalidUrl(String),

    #[error("Failed to store timestamp of tag '{tag}'")]
    TagWriteFailed { tag: TagName },

    #[error("Failed to store value under key '{key}'")]
    EnvelopeWriteFailed { key: CacheKey },

    #[error("Failed to acquire lock on '{key}' after {attempts} attempts")]
    LockTimeout { key: CacheKey, attempts: u32 },

    /// The original data source error. Use [`CacheError::upstream_ref()`] to get it back.
    #[error("Data source failure: {0}")]
    Upstream(#[source] BoxError),

    #[error("Backend failure: {0}")]
    Backend(#[source] BoxError),

    #[error("Codec failure: {0}")]
    Codec(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Builder(#[from] fieldx::error::FieldXError),
}

impl CacheError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EmptyOperand
            | Self::NoTags
            | Self::EmptyMarkup
            | Self::InvalidUrl(_)
            | Self::Config(_)
            | Self::Builder(_) => {
                ErrorKind::InvalidInput
            }
            Self::TagWriteFailed { .. } | Self::EnvelopeWriteFailed { .. } => ErrorKind::BackendWriteFailed,
            Self::LockTimeout { .. } => ErrorKind::LockTimeout,
            Self::Upstream(_) => ErrorKind::UpstreamFailure,
            Self::Backend(_) => ErrorKind::Backend,
            Self::Codec(_) => ErrorKind::Codec,
        }
    }

    pub fn upstream<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Upstream(Box::new(err))
    }

    pub fn backend<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Backend(Box::new(err))
    }

    /// Try to get the original data source error of type `E`.
    pub fn upstream_ref<E>(&self) -> Option<&E>
    where
        E: StdError + 'static,
    {
        match self {
            Self::Upstream(err) => err.downcast_ref::<E>(),
            _ => None,
        }
    }
}

impl From<postcard::Error> for CacheError {
    fn from(err: postcard::Error) -> Self {
        Self::Codec(err.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        Self::Codec(err.to_string())
    }
}

impl From<garde::Report> for CacheError {
    fn from(report: garde::Report) -> Self {
        Self::Config(report.to_string())
    }
}
