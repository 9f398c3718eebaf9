use std::time::Duration;

use fieldx::fxstruct;
use garde::Validate;

use crate::error::Result;

pub const DEFAULT_LOCK_VALUE: &str = "906a58a0aac5281e89718496686bb322";

/// Tunables of [`TagCache`](crate::TagCache).
///
/// The struct can be flattened into an application's own clap parser; every option is also readable from a
/// `TAGCACHE_*` environment variable.
#[derive(Debug, Clone, clap::Args, Validate)]
#[fxstruct(no_new, default(off), get(copy), set)]
pub struct CacheConfig {
    /// Lifetime of a cached value, seconds. Zero disables caching of read queries altogether.
    #[clap(long = "cache-ttl", env = "TAGCACHE_TTL", default_value_t = 300)]
    #[garde(skip)]
    ttl: u64,

    /// Lifetime of a tag timestamp, seconds.
    #[clap(long, env = "TAGCACHE_TAG_TTL", default_value_t = 120)]
    #[garde(range(min = 1))]
    tag_ttl: u64,

    /// Lifetime of the stampede lock, seconds. This is how long a crashed recompute may block a key.
    #[clap(long, env = "TAGCACHE_LOCK_TTL", default_value_t = 10)]
    #[garde(range(min = 1))]
    lock_ttl: u64,

    /// How many times to look at a locked key before giving up.
    #[clap(long, env = "TAGCACHE_TRY_COUNT", default_value_t = 20)]
    #[garde(range(min = 1))]
    try_count: u32,

    /// Pause between two consecutive attempts, microseconds.
    #[clap(long, env = "TAGCACHE_DELAY", default_value_t = 10_000)]
    #[garde(skip)]
    delay: u64,

    /// Secret mixed into every cache key.
    #[clap(long, env = "TAGCACHE_SALT", hide_env_values = true, default_value = "")]
    #[fieldx(get(clone))]
    #[garde(skip)]
    salt: String,

    /// The sentinel marking a key as being recomputed.
    #[clap(long, env = "TAGCACHE_LOCK_VALUE", default_value = DEFAULT_LOCK_VALUE)]
    #[fieldx(get(clone))]
    #[garde(length(min = 1))]
    lock_value: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl:        300,
            tag_ttl:    120,
            lock_ttl:   10,
            try_count:  20,
            delay:      10_000,
            salt:       String::new(),
            lock_value: DEFAULT_LOCK_VALUE.to_string(),
        }
    }
}

impl CacheConfig {
    pub fn validate_config(&self) -> Result<()> {
        self.validate()?;
        Ok(())
    }

    pub fn ttl_duration(&self) -> Duration {
        Duration::from_secs(self.ttl)
    }

    pub fn tag_ttl_duration(&self) -> Duration {
        Duration::from_secs(self.tag_ttl)
    }

    pub fn lock_ttl_duration(&self) -> Duration {
        Duration::from_secs(self.lock_ttl)
    }

    pub fn delay_duration(&self) -> Duration {
        Duration::from_micros(self.delay)
    }

    pub fn caching_enabled(&self) -> bool {
        self.ttl > 0
    }
}
