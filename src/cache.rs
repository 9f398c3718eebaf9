use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use fieldx::fxstruct;
use serde::Serialize;
use tracing::debug;
use tracing::instrument;

use crate::codec::Codec;
use crate::codec::JsonCodec;
use crate::config::CacheConfig;
use crate::envelope::Envelope;
use crate::error::CacheError;
use crate::error::Result;
use crate::freshness::is_fresh;
use crate::key::KeyDeriver;
use crate::lock::StampedeLock;
use crate::tags::TagRegistry;
use crate::traits::DataSource;
use crate::traits::KvBackend;
use crate::types::now_micros;
use crate::types::CacheKey;
use crate::types::LockOutcome;
use crate::types::Lookup;
use crate::types::TagSet;

/// Read-through cache in front of a [`DataSource`].
///
/// ```ignore
/// let cache = TagCache::builder()
///     .backend(MemoryBackend::new(100_000))
///     .data_source(my_source)
///     .config(config)
///     .build()?;
///
/// // Served from the cache for as long as none of the tables the query reads gets modified.
/// let rows = cache.get_value("SELECT * FROM users WHERE id = $1", &vec![json!(1)]).await?;
///
/// // Goes straight to the data source and makes every cached result depending on `users` stale.
/// cache.get_value("UPDATE users SET name = $1 WHERE id = $2", &vec![json!("Bob"), json!(1)]).await?;
/// ```
///
/// Any number of `TagCache` instances, in any number of processes, may share the same backend. They coordinate
/// exclusively through it: when a value is missing or stale, only the one that manages to put a lock sentinel under
/// the key recomputes it. The others keep re-reading the key, pausing for `delay` microseconds whenever they see the
/// sentinel, for up to `try_count` attempts. See [`CacheConfig`].
#[fxstruct(
    no_new,
    default(off),
    sync,
    builder(
        doc("Builder object of [`TagCache`].", "", "See [`TagCache::builder()`] method."),
        method_doc("Implement builder pattern for [`TagCache`]."),
        error(CacheError),
        post_build,
    )
)]
pub struct TagCache<KV, DS>
where
    KV: KvBackend,
    DS: DataSource,
{
    #[fieldx(get(clone), builder(required, into))]
    backend: Arc<KV>,

    #[fieldx(get(clone), builder(required, into))]
    data_source: Arc<DS>,

    #[fieldx(get, default(CacheConfig::default()))]
    config: CacheConfig,

    /// Turns data source output into envelope payload and back.
    #[fieldx(get, default(Arc::new(JsonCodec) as Arc<dyn Codec<DS::Output>>))]
    codec: Arc<dyn Codec<DS::Output>>,

    #[fieldx(lazy, private, get, builder(off))]
    key_deriver: KeyDeriver,

    #[fieldx(lazy, private, get, builder(off))]
    tag_registry: TagRegistry<KV>,

    #[fieldx(lazy, private, get, builder(off))]
    stampede_lock: StampedeLock<KV>,
}

impl<KV, DS> TagCache<KV, DS>
where
    KV: KvBackend,
    DS: DataSource,
{
    fn post_build(self) -> Result<Self> {
        self.config.validate_config()?;
        Ok(self)
    }

    fn build_key_deriver(&self) -> KeyDeriver {
        KeyDeriver::new(self.config.salt())
    }

    fn build_tag_registry(&self) -> TagRegistry<KV> {
        TagRegistry::new(self.backend(), self.config.tag_ttl_duration())
    }

    fn build_stampede_lock(&self) -> StampedeLock<KV> {
        StampedeLock::new(
            self.backend(),
            self.config.lock_value().into_bytes(),
            self.config.lock_ttl_duration(),
        )
    }

    pub fn derive_key<P>(&self, operation: &str, params: &P) -> Result<CacheKey>
    where
        P: Serialize + ?Sized,
    {
        self.key_deriver().derive_key(operation, params)
    }

    /// Mark the tags as modified right now. Every value depending on any of them becomes stale.
    pub async fn init_tags(&self, tags: &TagSet) -> Result<()> {
        self.tag_registry().touch_tags(tags).await
    }

    /// Return the result of a query, from the cache when possible.
    ///
    /// Queries modifying anything are never cached. Instead, they invalidate whatever they modify, and are then
    /// passed to the data source.
    #[instrument(level = "debug", skip(self, params))]
    pub async fn get_value(&self, query: &str, params: &DS::Params) -> Result<DS::Output> {
        let key = self.derive_key(query, params)?;

        let written = self.data_source.tables_written(query);
        if !written.is_empty() {
            debug!("Query modifies {written:?}, bypassing the cache");
            self.init_tags(&written).await?;
            return self.execute(query, params).await;
        }

        if !self.config.caching_enabled() {
            return self.execute(query, params).await;
        }

        let read_tags = self.data_source.tables_read(query);
        let codec = self.codec();
        let try_count = self.config.try_count();

        for attempt in 1..=try_count {
            let attempted_at = Instant::now();
            let outcome = match self
                .lookup(&key, Some(&read_tags), |envelope| codec.decode(envelope.data()))
                .await?
            {
                Lookup::Fresh(value) => {
                    debug!("'{key}' is a hit");
                    return Ok(value);
                }
                Lookup::Locked => {
                    debug!("'{key}' is being recomputed, attempt {attempt} of {try_count}");
                    tokio::time::sleep(self.config.delay_duration()).await;
                    continue;
                }
                Lookup::Stale(current) => self.stampede_lock().try_replace(&key, &current).await?,
                Lookup::Absent => self.stampede_lock().try_acquire(&key).await?,
            };

            if outcome == LockOutcome::Acquired {
                return self.recompute(&key, attempted_at, query, params, read_tags).await;
            }
        }

        Err(CacheError::LockTimeout {
            key,
            attempts: try_count,
        })
    }

    /// Put rendered page markup into the cache. Unlike query results, pages are produced outside of the cache and
    /// declare their tags explicitly. `ttl` defaults to the configured one.
    #[instrument(level = "debug", skip(self, params, markup))]
    pub async fn save_page<P>(
        &self,
        url: &str,
        params: &P,
        markup: &str,
        tags: TagSet,
        ttl: Option<Duration>,
    ) -> Result<()>
    where
        P: Serialize + ?Sized,
    {
        if markup.is_empty() {
            return Err(CacheError::EmptyMarkup);
        }
        let key = self.page_key(url, params)?;
        self.store(
            &key,
            &Envelope::new(markup.as_bytes().to_vec(), tags),
            ttl.unwrap_or_else(|| self.config.ttl_duration()),
        )
        .await
    }

    /// Fetch page markup. A missing or stale page is `None`: rendering it is up to the caller.
    #[instrument(level = "debug", skip(self, params))]
    pub async fn get_page<P>(&self, url: &str, params: &P) -> Result<Option<String>>
    where
        P: Serialize + ?Sized,
    {
        let key = self.page_key(url, params)?;
        let try_count = self.config.try_count();

        for _ in 0..try_count {
            match self
                .lookup(&key, None, |envelope| {
                    String::from_utf8(envelope.into_data()).map_err(|err| CacheError::Codec(err.to_string()))
                })
                .await?
            {
                Lookup::Fresh(markup) => return Ok(Some(markup)),
                Lookup::Locked => tokio::time::sleep(self.config.delay_duration()).await,
                Lookup::Stale(_) | Lookup::Absent => return Ok(None),
            }
        }

        Err(CacheError::LockTimeout {
            key,
            attempts: try_count,
        })
    }

    pub async fn delete_page<P>(&self, url: &str, params: &P) -> Result<bool>
    where
        P: Serialize + ?Sized,
    {
        let key = self.page_key(url, params)?;
        self.backend.delete(key.as_str()).await
    }

    /// Drop a batch of pages at once. Returns `true` if all of them were there.
    pub async fn delete_pages<P>(&self, pages: &[(&str, P)]) -> Result<bool>
    where
        P: Serialize,
    {
        let keys = pages
            .iter()
            .map(|(url, params)| self.page_key(url, params).map(|k| k.as_str().to_string()))
            .collect::<Result<Vec<_>>>()?;
        self.backend.delete_multi(&keys).await
    }

    fn page_key<P>(&self, url: &str, params: &P) -> Result<CacheKey>
    where
        P: Serialize + ?Sized,
    {
        match url::Url::parse(url) {
            Ok(parsed) if parsed.has_host() => self.derive_key(url, params),
            _ => Err(CacheError::InvalidUrl(url.to_string())),
        }
    }

    // `tags` overrides the ones recorded in the envelope.
    async fn lookup<T, F>(&self, key: &CacheKey, tags: Option<&TagSet>, decode: F) -> Result<Lookup<T>>
    where
        F: FnOnce(Envelope) -> Result<T>,
    {
        let Some(current) = self.backend.get(key.as_str()).await?
        else {
            return Ok(Lookup::Absent);
        };

        if self.stampede_lock().is_sentinel(&current) {
            return Ok(Lookup::Locked);
        }

        let envelope = match Envelope::decode(&current) {
            Ok(envelope) => envelope,
            Err(err) => {
                debug!("'{key}' holds no usable envelope: {err}");
                return Ok(Lookup::Stale(current));
            }
        };

        let stamps = self
            .tag_registry()
            .tag_timestamps(tags.unwrap_or_else(|| envelope.tags()))
            .await?;

        if !is_fresh(&envelope, &stamps) {
            debug!("'{key}' is stale");
            return Ok(Lookup::Stale(current));
        }

        match decode(envelope) {
            Ok(value) => Ok(Lookup::Fresh(value)),
            Err(err) => {
                debug!("'{key}' payload can't be decoded: {err}");
                Ok(Lookup::Stale(current))
            }
        }
    }

    // Must only be called while holding the lock on the key.
    async fn recompute(
        &self,
        key: &CacheKey,
        locked_at: Instant,
        query: &str,
        params: &DS::Params,
        tags: TagSet,
    ) -> Result<DS::Output> {
        // A tag touched while the query runs must invalidate its result, so the result is as old as the query.
        let started = now_micros();
        let outcome = async {
            let value = self.execute(query, params).await?;
            let envelope = Envelope::with_time(self.codec().encode(&value)?, started, tags);
            self.store(key, &envelope, self.config.ttl_duration()).await?;
            Result::<DS::Output, CacheError>::Ok(value)
        }
        .await;

        if outcome.is_err() {
            self.stampede_lock().release(key, locked_at).await;
        }

        outcome
    }

    async fn store(&self, key: &CacheKey, envelope: &Envelope, ttl: Duration) -> Result<()> {
        if self.backend.set(key.as_str(), &envelope.encode()?, ttl).await? {
            Ok(())
        }
        else {
            Err(CacheError::EnvelopeWriteFailed { key: key.clone() })
        }
    }

    async fn execute(&self, query: &str, params: &DS::Params) -> Result<DS::Output> {
        self.data_source
            .execute(query, params)
            .await
            .map_err(CacheError::upstream)
    }
}
