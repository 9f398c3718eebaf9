use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use async_trait::async_trait;
use clap::Parser;
use fieldx::fxstruct;
use garde::Validate;
use rand::Rng;
use serde_json::json;
use serde_json::Value;
use tag_cache::prelude::*;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::info;
use tracing_subscriber::EnvFilter;

const SELECT_PRICE: &str = "SELECT price FROM products WHERE id = ?";
const SELECT_TOTAL: &str = "SELECT SUM(price * qty) FROM products JOIN stock USING (id)";
const UPDATE_PRICE: &str = "UPDATE products SET price = ? WHERE id = ?";

#[derive(Debug, Clone, clap::Parser, Validate)]
#[fxstruct(no_new, get(copy))]
#[clap(about, version, name = "query_cache")]
struct Cli {
    /// Number of concurrent readers.
    #[clap(long, default_value_t = 8)]
    #[garde(range(min = 1))]
    readers: u32,

    /// Number of queries each reader sends.
    #[clap(long, default_value_t = 500)]
    #[garde(range(min = 1))]
    queries: u32,

    /// Number of products in the table.
    #[clap(long, default_value_t = 20)]
    #[garde(range(min = 1))]
    products: u32,

    /// Pause between two price updates, milliseconds.
    #[clap(long, default_value_t = 50)]
    #[garde(range(min = 1))]
    update_every: u64,

    /// Simulated query latency, milliseconds.
    #[clap(long, default_value_t = 5)]
    #[garde(skip)]
    latency: u64,

    /// Use the Redis server at this URL instead of the in-process backend. Needs the `redis` feature.
    #[clap(long)]
    #[fieldx(get(clone))]
    #[garde(skip)]
    redis_url: Option<String>,

    #[command(flatten)]
    #[fieldx(get(clone))]
    #[garde(dive)]
    cache: CacheConfig,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown query: {0}")]
struct UnknownQuery(String);

/// A slow products table.
#[derive(Debug)]
struct Products {
    catalog: QueryCatalog,
    prices:  RwLock<HashMap<u64, u64>>,
    latency: Duration,
    hits:    AtomicUsize,
}

impl Products {
    fn new(count: u32, latency: Duration) -> Self {
        Self {
            catalog: QueryCatalog::new()
                .reads(SELECT_PRICE, ["products"])
                .reads(SELECT_TOTAL, ["products", "stock"])
                .writes(UPDATE_PRICE, ["products"]),
            prices: RwLock::new((0..u64::from(count)).map(|id| (id, 100 + id)).collect()),
            latency,
            hits: AtomicUsize::new(0),
        }
    }

    fn hits(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl DataSource for Products {
    type Error = UnknownQuery;
    type Output = Value;
    type Params = Vec<Value>;

    async fn execute(&self, query: &str, params: &Vec<Value>) -> Result<Value, UnknownQuery> {
        self.hits.fetch_add(1, Ordering::Relaxed);
        tokio::time::sleep(self.latency).await;

        match query {
            SELECT_PRICE => {
                let id = params.first().and_then(Value::as_u64).unwrap_or_default();
                Ok(json!(self.prices.read().await.get(&id)))
            }
            SELECT_TOTAL => Ok(json!(self.prices.read().await.values().sum::<u64>())),
            UPDATE_PRICE => {
                let price = params.first().and_then(Value::as_u64).unwrap_or_default();
                let id = params.get(1).and_then(Value::as_u64).unwrap_or_default();
                let updated = self.prices.write().await.insert(id, price).is_some();
                Ok(json!({ "rows_affected": u64::from(updated) }))
            }
            _ => Err(UnknownQuery(query.to_string())),
        }
    }

    fn tables_read(&self, query: &str) -> TagSet {
        self.catalog.tables_read(query)
    }

    fn tables_written(&self, query: &str) -> TagSet {
        self.catalog.tables_written(query)
    }
}

async fn run<KV: KvBackend>(cli: &Cli, backend: KV) -> anyhow::Result<()> {
    let products = Arc::new(Products::new(cli.products(), Duration::from_millis(cli.latency())));
    let cache = Arc::new(
        TagCache::builder()
            .backend(backend)
            .data_source(Arc::clone(&products))
            .config(cli.cache())
            .build()?,
    );

    let started = Instant::now();
    let mut readers = JoinSet::new();
    for reader in 0..cli.readers() {
        let cache = Arc::clone(&cache);
        let (queries, product_count) = (cli.queries(), u64::from(cli.products()));
        readers.spawn(async move {
            let mut timeouts = 0usize;
            for _ in 0..queries {
                let outcome = if rand::rng().random_bool(0.1) {
                    cache.get_value(SELECT_TOTAL, &vec![]).await
                }
                else {
                    let id = rand::rng().random_range(0..product_count);
                    cache.get_value(SELECT_PRICE, &vec![json!(id)]).await
                };
                match outcome {
                    Ok(_) => (),
                    Err(err) if err.kind() == ErrorKind::LockTimeout => timeouts += 1,
                    Err(err) => return Err(err),
                }
            }
            info!(reader, timeouts, "Reader done");
            Ok(timeouts)
        });
    }

    let done = Arc::new(AtomicBool::new(false));
    let writer = {
        let (cache, done) = (Arc::clone(&cache), Arc::clone(&done));
        let (every, product_count) = (Duration::from_millis(cli.update_every()), u64::from(cli.products()));
        tokio::spawn(async move {
            let mut updates = 0usize;
            while !done.load(Ordering::Relaxed) {
                tokio::time::sleep(every).await;
                let (id, price) = {
                    let mut rng = rand::rng();
                    (rng.random_range(0..product_count), rng.random_range(50..500u64))
                };
                cache.get_value(UPDATE_PRICE, &vec![json!(price), json!(id)]).await?;
                updates += 1;
                if updates % 10 == 0 {
                    info!(updates, "Prices updated");
                }
            }
            Ok::<_, CacheError>(updates)
        })
    };

    let mut timeouts = 0;
    while let Some(joined) = readers.join_next().await {
        timeouts += joined??;
    }
    done.store(true, Ordering::Relaxed);
    let updates = writer.await??;

    let lookups = u64::from(cli.readers()) * u64::from(cli.queries());
    println!(
        "{lookups} lookups and {updates} updates in {:.2?}; {} queries reached the data source, {timeouts} lookups timed \
         out",
        started.elapsed(),
        products.hits()
    );

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    cli.validate()?;

    if let Some(url) = cli.redis_url() {
        #[cfg(feature = "redis")]
        return run(&cli, RedisBackend::connect(&url).await?).await;
        #[cfg(not(feature = "redis"))]
        anyhow::bail!("Built without the `redis` feature, can't use {url}");
    }

    run(&cli, MemoryBackend::default()).await
}
