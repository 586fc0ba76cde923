// Schema for raw samples and folded aggregates, plus the pure fold logic.
// DB access (append, read by bucket, upsert) stays in store::mod.

use std::collections::BTreeMap;

use sqlx::SqlitePool;

use crate::error::StoreError;
use crate::models::{AggregateRow, EntityId, MetricValue};
use crate::time_grid::Bucket;

/// Creates the sample and aggregate tables and indexes if not present.
pub async fn init_tables(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sample (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_id INTEGER NOT NULL,
            bucket INTEGER NOT NULL,
            metric_name TEXT NOT NULL,
            value REAL NOT NULL,
            inserted_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sample_entity_bucket ON sample(entity_id, bucket)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sample_inserted_at ON sample(inserted_at)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS aggregate (
            entity_id INTEGER NOT NULL,
            bucket INTEGER NOT NULL,
            partial INTEGER NOT NULL,
            computed_at INTEGER NOT NULL,
            data BLOB NOT NULL,
            PRIMARY KEY (entity_id, bucket)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Which metrics are point-in-time gauges (latest sample wins) instead of summed counters.
/// Patterns match whole names; `*` matches any run of characters.
#[derive(Debug, Clone, Default)]
pub struct FoldPolicy {
    last_write_patterns: Vec<String>,
}

impl FoldPolicy {
    pub fn new(last_write_patterns: Vec<String>) -> Self {
        Self {
            last_write_patterns,
        }
    }

    pub fn is_last_write(&self, metric_name: &str) -> bool {
        self.last_write_patterns
            .iter()
            .any(|p| wildcard_match(p, metric_name))
    }
}

/// Folds samples (in submission order) into one row: sum per name, or last value for
/// last-write names. A non-finite value or sum fails the whole fold.
pub fn fold_samples(
    entity_id: EntityId,
    bucket: Bucket,
    samples: &[(String, f64)],
    policy: &FoldPolicy,
    partial: bool,
) -> Result<AggregateRow, StoreError> {
    let mut folded: BTreeMap<&str, f64> = BTreeMap::new();

    for (name, value) in samples {
        if !value.is_finite() {
            return Err(StoreError::Computation {
                entity_id,
                bucket,
                reason: format!("non-finite value {} for metric {:?}", value, name),
            });
        }
        if policy.is_last_write(name) {
            folded.insert(name, *value);
        } else {
            *folded.entry(name).or_insert(0.0) += value;
        }
    }

    if let Some((name, _)) = folded.iter().find(|(_, v)| !v.is_finite()) {
        return Err(StoreError::Computation {
            entity_id,
            bucket,
            reason: format!("sum overflowed for metric {:?}", name),
        });
    }

    Ok(AggregateRow {
        entity_id,
        bucket,
        metrics: folded
            .into_iter()
            .map(|(name, value)| MetricValue {
                name: name.to_string(),
                value,
            })
            .collect(),
        sample_count: samples.len() as u64,
        partial,
    })
}

fn wildcard_match(pattern: &str, name: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == name;
    }
    let (first, last) = (parts[0], parts[parts.len() - 1]);
    if !name.starts_with(first) || name.len() < first.len() + last.len() || !name.ends_with(last) {
        return false;
    }
    let mut rest = &name[first.len()..name.len() - last.len()];
    for part in &parts[1..parts.len() - 1] {
        match rest.find(part) {
            Some(i) => rest = &rest[i + part.len()..],
            None => return false,
        }
    }
    true
}
