//! # tag-cache
//!
//! Read-through cache for expensive, keyed computations (most often, SQL queries) with tag-based invalidation and
//! protection against cache stampedes.
//!
//! # The Basics
//!
//! The crate is designed for the following use case:
//!
//! - A data source that is slow or expensive to query; e.g., a relational database or a page renderer.
//! - A shared key-value store, like Redis, reachable from every process querying the data source.
//! - Results that must never be served after the data they were computed from has changed.
//!
//! The cache operates on the following principles:
//!
//! - It is backend-agnostic: anything implementing [`KvBackend`](traits::KvBackend) will do. An in-process
//!   [moka](https://crates.io/crates/moka) backend is always available, Redis is behind the `redis` feature.
//! - It is payload-agnostic: results are turned into bytes by a [`Codec`](codec::Codec), JSON by default.
//! - It never tries to understand queries. Which tables, or _tags_, a query reads and writes is told by the
//!   [`DataSource`](traits::DataSource).
//! - There is no in-process coordination whatsoever. Everything goes through the backend.
//!
//! # Tags
//!
//! A tag is an invalidation domain, typically a table name. The backend keeps the last time each tag was modified,
//! stored under the tag name itself. Each cached value records when it was produced, and a value is served only if
//! it was produced no earlier than the last modification of every tag its query reads. Touching a tag thus
//! invalidates every dependent value at once, without the cache having to know which values these are.
//!
//! Queries which the data source reports as writing some tags are never cached. [`TagCache::get_value()`] touches
//! their tags and passes them through.
//!
//! # Stampede Protection
//!
//! When a value is missing or stale, the first caller to notice replaces it with a lock sentinel using an atomic
//! create-if-absent (or compare-and-swap, if a stale value is in the way) and recomputes the value. Other callers
//! seeing the sentinel pause and re-read the key until the new value arrives or their attempts run out, in which case
//! they get [`CacheError::LockTimeout`]. Thus, no matter how many callers ask for the same missing value, the data
//! source computes it only once. A sentinel left by a crashed caller expires by itself.
//!
//! # Pages
//!
//! Rendered pages are cached by URL with [`TagCache::save_page()`]. Their tags are given explicitly. Reading a
//! missing or stale page doesn't trigger any computation; the caller is expected to render and save it.

pub mod backend;
pub mod cache;
pub mod codec;
pub mod config;
pub mod envelope;
pub mod error;
pub mod freshness;
pub mod key;
pub mod lock;
pub mod source;
pub mod tags;
pub mod traits;
pub mod types;

#[doc(inline)]
pub use cache::TagCache;
#[doc(inline)]
pub use config::CacheConfig;
#[doc(inline)]
pub use error::CacheError;

pub mod prelude {
    pub use crate::backend::MemoryBackend;
    #[cfg(feature = "redis")]
    pub use crate::backend::RedisBackend;
    pub use crate::cache::TagCache;
    pub use crate::codec::Codec;
    pub use crate::codec::JsonCodec;
    pub use crate::codec::PostcardCodec;
    pub use crate::config::CacheConfig;
    pub use crate::error::CacheError;
    pub use crate::error::ErrorKind;
    pub use crate::source::QueryCatalog;
    #[cfg(feature = "sea-orm")]
    pub use crate::source::SeaOrmSource;
    pub use crate::traits::DataSource;
    pub use crate::traits::KvBackend;
    pub use crate::types::*;
}

/// Build a [`TagSet`](types::TagSet) out of string literals.
#[macro_export]
macro_rules! tags {
    ($($tag:expr),* $(,)?) => {
        $crate::types::tag_set::<_, &str>([$($tag),*])
    };
}
