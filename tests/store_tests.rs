// AggregateStore tests: append, fold, partial vs closed buckets, prune, range reads

mod common;

use common::{B0, INTERVAL_SECS, bucket, stack, store_config};
use graphstats::config::AppConfig;
use graphstats::models::{EntityId, MetricSample};
use graphstats::store::fold::FoldPolicy;
use graphstats::store::StoreConfig;

const PLUGIN: EntityId = EntityId(1);

fn sample(n: i64, name: &str, value: f64) -> MetricSample {
    MetricSample {
        entity_id: PLUGIN,
        bucket: bucket(n),
        metric_name: name.into(),
        value,
    }
}

#[tokio::test]
async fn store_init_is_idempotent() {
    let s = stack(store_config(0)).await;
    // Second init is no-op (IF NOT EXISTS)
    s.store.init().await.unwrap();
    s.registry.init().await.unwrap();
}

#[tokio::test]
async fn open_bucket_yields_partial_sums() {
    let s = stack(store_config(0)).await;
    s.store
        .append_samples(
            &[
                sample(0, "Hits", 1.0),
                sample(0, "Kills", 5.0),
                sample(0, "Hits", 1.0),
                sample(0, "Kills", 2.0),
                sample(1, "Hits", 1.0),
            ],
            B0 + 60,
        )
        .await
        .unwrap();

    let row = s
        .store
        .compute_aggregate(PLUGIN, bucket(0), B0 + 120)
        .await
        .unwrap();
    assert!(row.partial);
    assert_eq!(row.sample_count, 4);
    assert_eq!(row.get("Hits"), Some(2.0));
    assert_eq!(row.get("Kills"), Some(7.0));
    let names: Vec<_> = row.metrics.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, vec!["Hits", "Kills"]);

    let stored = s.store.load_aggregate(PLUGIN, bucket(0)).await.unwrap();
    assert_eq!(stored, Some(row));
}

#[tokio::test]
async fn empty_bucket_folds_to_empty_row() {
    let s = stack(store_config(0)).await;
    let row = s
        .store
        .compute_aggregate(PLUGIN, bucket(0), B0 + 2 * INTERVAL_SECS)
        .await
        .unwrap();
    assert!(!row.partial);
    assert_eq!(row.sample_count, 0);
    assert!(row.metrics.is_empty());
}

#[tokio::test]
async fn late_sample_within_grace_still_counts() {
    let s = stack(store_config(60)).await;
    let end = B0 + INTERVAL_SECS;
    s.store.append_sample(&sample(0, "Hits", 1.0), end - 10).await.unwrap();
    s.store
        .compute_aggregate(PLUGIN, bucket(0), end + 5)
        .await
        .unwrap();

    s.store.append_sample(&sample(0, "Hits", 1.0), end + 20).await.unwrap();
    let row = s
        .store
        .compute_aggregate(PLUGIN, bucket(0), end + 30)
        .await
        .unwrap();
    assert!(row.partial);
    assert_eq!(row.get("Hits"), Some(2.0));
}

#[tokio::test]
async fn closed_bucket_is_frozen_after_grace() {
    let s = stack(store_config(60)).await;
    let end = B0 + INTERVAL_SECS;
    s.store.append_sample(&sample(0, "Hits", 1.0), end - 10).await.unwrap();

    let closed = s
        .store
        .compute_aggregate(PLUGIN, bucket(0), end + 60)
        .await
        .unwrap();
    assert!(!closed.partial);
    assert_eq!(closed.get("Hits"), Some(1.0));

    // Too late: the stored final row is served as-is.
    s.store.append_sample(&sample(0, "Hits", 1.0), end + 90).await.unwrap();
    let again = s
        .store
        .compute_aggregate(PLUGIN, bucket(0), end + 120)
        .await
        .unwrap();
    assert_eq!(again, closed);
}

#[tokio::test]
async fn partial_row_is_refolded_once_bucket_closes() {
    let s = stack(store_config(0)).await;
    let end = B0 + INTERVAL_SECS;
    s.store.append_sample(&sample(0, "Hits", 1.0), B0).await.unwrap();
    let partial = s
        .store
        .compute_aggregate(PLUGIN, bucket(0), B0 + 10)
        .await
        .unwrap();
    assert!(partial.partial);

    s.store.append_sample(&sample(0, "Hits", 1.0), end - 1).await.unwrap();
    let closed = s
        .store
        .compute_aggregate(PLUGIN, bucket(0), end)
        .await
        .unwrap();
    assert!(!closed.partial);
    assert_eq!(closed.get("Hits"), Some(2.0));
}

#[tokio::test]
async fn last_write_metrics_keep_latest_value() {
    let s = stack(StoreConfig {
        fold_policy: FoldPolicy::new(vec!["Players*".into()]),
        ..store_config(0)
    })
    .await;
    s.store
        .append_samples(
            &[
                sample(0, "Players Online", 3.0),
                sample(0, "Hits", 1.0),
                sample(0, "Players Online", 7.0),
                sample(0, "Hits", 1.0),
            ],
            B0,
        )
        .await
        .unwrap();

    let row = s
        .store
        .compute_aggregate(PLUGIN, bucket(0), B0 + INTERVAL_SECS)
        .await
        .unwrap();
    assert_eq!(row.get("Players Online"), Some(7.0));
    assert_eq!(row.get("Hits"), Some(2.0));
}

#[tokio::test]
async fn prune_drops_old_samples_but_keeps_aggregates() {
    let s = stack(StoreConfig {
        sample_retention_secs: 3600,
        ..store_config(0)
    })
    .await;
    s.store.append_sample(&sample(0, "Hits", 1.0), B0).await.unwrap();
    s.store
        .compute_aggregate(PLUGIN, bucket(0), B0 + INTERVAL_SECS)
        .await
        .unwrap();
    s.store
        .append_sample(&sample(2, "Hits", 1.0), B0 + 2 * INTERVAL_SECS)
        .await
        .unwrap();

    let pruned = s
        .store
        .prune_samples(B0 + 2 * INTERVAL_SECS + 60)
        .await
        .unwrap();
    assert_eq!(pruned, 1);
    assert!(s.store.samples_for(PLUGIN, bucket(0)).await.unwrap().is_empty());
    assert_eq!(s.store.samples_for(PLUGIN, bucket(2)).await.unwrap().len(), 1);
    assert!(s.store.load_aggregate(PLUGIN, bucket(0)).await.unwrap().is_some());
}

#[tokio::test]
async fn aggregates_in_range_is_half_open_and_ascending() {
    let s = stack(store_config(0)).await;
    let now = B0 + 10 * INTERVAL_SECS;
    for n in [3, 0, 2, 1] {
        s.store.append_sample(&sample(n, "Hits", 1.0), now).await.unwrap();
        s.store.compute_aggregate(PLUGIN, bucket(n), now).await.unwrap();
    }

    let rows = s
        .store
        .aggregates_in_range(PLUGIN, bucket(1), bucket(3))
        .await
        .unwrap();
    let buckets: Vec<_> = rows.iter().map(|r| r.bucket).collect();
    assert_eq!(buckets, vec![bucket(1), bucket(2)]);
    assert!(
        s.store
            .aggregates_in_range(EntityId(99), bucket(0), bucket(4))
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn vacuum_succeeds() {
    let s = stack(store_config(0)).await;
    s.store.vacuum().await.unwrap();
}

#[tokio::test]
async fn late_sample_counted_after_invalidate_through_cache() {
    let s = stack(store_config(300)).await;
    let end = B0 + INTERVAL_SECS;
    s.store.append_sample(&sample(0, "Hits", 1.0), end - 10).await.unwrap();
    let first = s
        .cache
        .get_or_compute(PLUGIN, bucket(0), end + 10)
        .await
        .unwrap();
    assert_eq!(first.get("Hits"), Some(1.0));

    s.store.append_sample(&sample(0, "Hits", 1.0), end + 20).await.unwrap();
    s.cache.invalidate(PLUGIN, bucket(0));
    let second = s
        .cache
        .get_or_compute(PLUGIN, bucket(0), end + 30)
        .await
        .unwrap();
    assert_eq!(second.get("Hits"), Some(2.0));
}

#[tokio::test]
async fn default_config_counts_sample_arriving_just_after_bucket_end() {
    let config = AppConfig::load_from_str(
        r#"
[server]
port = 8081
host = "0.0.0.0"

[database]
path = "data/stats.db"
max_pool_size = 2

[graph]
interval = 30

[cache]
retentionWindowSeconds = 2592000
failureTtlSeconds = 30
maxEntries = 100
"#,
    )
    .unwrap();
    let s = stack(config.store_config()).await;
    let end = B0 + INTERVAL_SECS;

    s.store.append_sample(&sample(0, "Hits", 1.0), end - 10).await.unwrap();
    let first = s
        .cache
        .get_or_compute(PLUGIN, bucket(0), end + 1)
        .await
        .unwrap();
    assert_eq!(first.get("Hits"), Some(1.0));

    s.store.append_sample(&sample(0, "Hits", 1.0), end + 20).await.unwrap();
    s.cache.invalidate(PLUGIN, bucket(0));
    let second = s
        .cache
        .get_or_compute(PLUGIN, bucket(0), end + 30)
        .await
        .unwrap();
    assert_eq!(second.get("Hits"), Some(2.0));
}
