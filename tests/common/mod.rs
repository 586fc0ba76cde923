// Shared test helpers
#![allow(dead_code)]

use graphstats::cache::{AggregationCache, CacheConfig};
use graphstats::ingest::normalize::Latin1Normalizer;
use graphstats::ingest::{IngestConfig, Submission, SubmissionIngest};
use graphstats::registry::PluginRegistry;
use graphstats::store::fold::FoldPolicy;
use graphstats::store::{AggregateStore, StoreConfig};
use graphstats::time_grid::{Bucket, TimeGrid};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Graph interval used across tests, in minutes.
pub const INTERVAL_MINUTES: u32 = 30;
pub const INTERVAL_SECS: i64 = 30 * 60;

/// A bucket start on the 30-minute grid (2023-11-14T22:00:00Z).
pub const B0: i64 = 1_699_999_200;

pub fn bucket(n: i64) -> Bucket {
    Bucket::new(B0 + n * INTERVAL_SECS)
}

pub fn grid() -> TimeGrid {
    TimeGrid::new(INTERVAL_MINUTES).unwrap()
}

pub fn store_config(grace_period_secs: i64) -> StoreConfig {
    StoreConfig {
        grace_period_secs,
        sample_retention_secs: 7 * 24 * 60 * 60,
        fold_policy: FoldPolicy::default(),
    }
}

pub fn cache_config() -> CacheConfig {
    CacheConfig {
        retention_window: Duration::from_secs(30 * 24 * 60 * 60),
        failure_ttl: Duration::from_secs(30),
        max_entries: 1000,
        compute_timeout: Duration::from_secs(5),
        open_bucket_ttl: Duration::from_secs(60),
    }
}

pub fn submission(items: &[(&str, &str)]) -> Submission {
    items
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Store, registry, cache and ingest pipeline over one temp SQLite file.
pub struct Stack {
    pub dir: TempDir,
    pub store: Arc<AggregateStore>,
    pub registry: Arc<PluginRegistry>,
    pub cache: Arc<AggregationCache>,
    pub ingest: Arc<SubmissionIngest>,
}

pub async fn stack(store_config: StoreConfig) -> Stack {
    stack_with(store_config, cache_config(), IngestConfig::default()).await
}

pub async fn stack_with(
    store_config: StoreConfig,
    cache_config: CacheConfig,
    ingest_config: IngestConfig,
) -> Stack {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("stats.db");
    let pool = graphstats::db::connect(path.to_str().unwrap(), 4)
        .await
        .unwrap();

    let store = Arc::new(AggregateStore::new(pool.clone(), grid(), store_config));
    store.init().await.unwrap();
    let registry = Arc::new(PluginRegistry::new(pool));
    registry.init().await.unwrap();
    let cache = Arc::new(AggregationCache::new(store.clone(), cache_config));
    let ingest = Arc::new(SubmissionIngest::new(
        store.clone(),
        registry.clone(),
        cache.clone(),
        grid(),
        Arc::new(Latin1Normalizer),
        ingest_config,
    ));

    Stack {
        dir,
        store,
        registry,
        cache,
        ingest,
    }
}
