// Aggregate store: append-only raw samples plus persisted per-(entity, bucket) aggregates.
// Samples are never updated; aggregates are upserted until their bucket closes (end + grace),
// after which the stored row is returned as-is.

pub mod fold;
mod blob;

use async_trait::async_trait;
use sqlx::Row;
use sqlx::SqlitePool;
use tracing::{debug, instrument};

use crate::cache::AggregateSource;
use crate::error::StoreError;
use crate::models::{AggregatePayload, AggregateRow, EntityId, MetricSample};
use crate::time_grid::{Bucket, TimeGrid};
use fold::FoldPolicy;

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Seconds after a bucket's end during which late samples still change its aggregate.
    pub grace_period_secs: i64,
    /// Raw samples older than this (by insert time) are pruned.
    pub sample_retention_secs: i64,
    pub fold_policy: FoldPolicy,
}

pub struct AggregateStore {
    pool: SqlitePool,
    grid: TimeGrid,
    config: StoreConfig,
}

impl AggregateStore {
    pub fn new(pool: SqlitePool, grid: TimeGrid, config: StoreConfig) -> Self {
        Self { pool, grid, config }
    }

    pub async fn init(&self) -> anyhow::Result<()> {
        fold::init_tables(&self.pool).await
    }

    #[instrument(skip(self, sample), fields(repo = "store", operation = "append_sample"))]
    pub async fn append_sample(
        &self,
        sample: &MetricSample,
        inserted_at: i64,
    ) -> Result<(), StoreError> {
        self.append_samples(std::slice::from_ref(sample), inserted_at)
            .await
    }

    /// Append raw rows in one transaction. Not idempotent: repeating a call duplicates rows.
    #[instrument(skip(self, samples), fields(repo = "store", operation = "append_samples", samples_count = samples.len()))]
    pub async fn append_samples(
        &self,
        samples: &[MetricSample],
        inserted_at: i64,
    ) -> Result<(), StoreError> {
        if samples.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for s in samples {
            sqlx::query(
                "INSERT INTO sample (entity_id, bucket, metric_name, value, inserted_at) VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(s.entity_id.0)
            .bind(s.bucket.start())
            .bind(&s.metric_name)
            .bind(s.value)
            .bind(inserted_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Raw (name, value) pairs for one bucket, in submission order.
    pub async fn samples_for(
        &self,
        entity_id: EntityId,
        bucket: Bucket,
    ) -> Result<Vec<(String, f64)>, StoreError> {
        let rows = sqlx::query(
            "SELECT metric_name, value FROM sample WHERE entity_id = $1 AND bucket = $2 ORDER BY id ASC",
        )
        .bind(entity_id.0)
        .bind(bucket.start())
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.try_get("metric_name")?;
            let value: f64 = row.try_get("value").map_err(|e| StoreError::Computation {
                entity_id,
                bucket,
                reason: format!("non-numeric value for metric {:?}: {}", name, e),
            })?;
            out.push((name, value));
        }
        Ok(out)
    }

    /// Fold every sample of (entity, bucket) and persist the row. A bucket that has not
    /// closed yet yields a partial row. A closed bucket with a final stored row is not refolded.
    #[instrument(skip(self), fields(repo = "store", operation = "compute_aggregate"))]
    pub async fn compute_aggregate(
        &self,
        entity_id: EntityId,
        bucket: Bucket,
        now: i64,
    ) -> Result<AggregateRow, StoreError> {
        let closed = self
            .grid
            .is_closed(bucket, now, self.config.grace_period_secs);
        if closed
            && let Some(stored) = self.load_aggregate(entity_id, bucket).await?
            && !stored.partial
        {
            debug!(entity_id = %entity_id, bucket = %bucket, "closed bucket served from stored aggregate");
            return Ok(stored);
        }

        let samples = self.samples_for(entity_id, bucket).await?;
        let row = fold::fold_samples(
            entity_id,
            bucket,
            &samples,
            &self.config.fold_policy,
            !closed,
        )?;
        self.save_aggregate(&row, now).await?;
        Ok(row)
    }

    async fn save_aggregate(&self, row: &AggregateRow, computed_at: i64) -> Result<(), StoreError> {
        let data = blob::encode_payload(&AggregatePayload {
            sample_count: row.sample_count,
            metrics: row.metrics.clone(),
        })?;
        sqlx::query(
            r#"
            INSERT INTO aggregate (entity_id, bucket, partial, computed_at, data)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT(entity_id, bucket) DO UPDATE SET
                partial = excluded.partial,
                computed_at = excluded.computed_at,
                data = excluded.data
            "#,
        )
        .bind(row.entity_id.0)
        .bind(row.bucket.start())
        .bind(row.partial)
        .bind(computed_at)
        .bind(&data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn load_aggregate(
        &self,
        entity_id: EntityId,
        bucket: Bucket,
    ) -> Result<Option<AggregateRow>, StoreError> {
        let row = sqlx::query(
            "SELECT entity_id, bucket, partial, data FROM aggregate WHERE entity_id = $1 AND bucket = $2",
        )
        .bind(entity_id.0)
        .bind(bucket.start())
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| Self::parse_aggregate_row(&r)).transpose()
    }

    /// Stored aggregates for one entity with bucket in [from, to), ascending.
    #[instrument(skip(self), fields(repo = "store", operation = "aggregates_in_range"))]
    pub async fn aggregates_in_range(
        &self,
        entity_id: EntityId,
        from: Bucket,
        to: Bucket,
    ) -> Result<Vec<AggregateRow>, StoreError> {
        let rows = sqlx::query(
            "SELECT entity_id, bucket, partial, data FROM aggregate
             WHERE entity_id = $1 AND bucket >= $2 AND bucket < $3
             ORDER BY bucket ASC",
        )
        .bind(entity_id.0)
        .bind(from.start())
        .bind(to.start())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::parse_aggregate_row).collect()
    }

    /// Delete raw samples inserted before `now - sample_retention`. Aggregates are kept.
    #[instrument(skip(self), fields(repo = "store", operation = "prune_samples"))]
    pub async fn prune_samples(&self, now: i64) -> Result<u64, StoreError> {
        let cutoff = now - self.config.sample_retention_secs;
        let r = sqlx::query("DELETE FROM sample WHERE inserted_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(r.rows_affected())
    }

    /// Reclaim space after deletes.
    #[instrument(skip(self), fields(repo = "store", operation = "vacuum"))]
    pub async fn vacuum(&self) -> Result<(), StoreError> {
        sqlx::query("VACUUM").execute(&self.pool).await?;
        Ok(())
    }

    fn parse_aggregate_row(row: &sqlx::sqlite::SqliteRow) -> Result<AggregateRow, StoreError> {
        let entity_id: i64 = row.try_get("entity_id")?;
        let bucket: i64 = row.try_get("bucket")?;
        let partial: bool = row.try_get("partial")?;
        let data: Vec<u8> = row.try_get("data")?;
        let payload = blob::decode_payload(&data)?;
        Ok(AggregateRow {
            entity_id: EntityId(entity_id),
            bucket: Bucket::new(bucket),
            metrics: payload.metrics,
            sample_count: payload.sample_count,
            partial,
        })
    }
}

#[async_trait]
impl AggregateSource for AggregateStore {
    async fn compute_aggregate(
        &self,
        entity_id: EntityId,
        bucket: Bucket,
        now: i64,
    ) -> Result<AggregateRow, StoreError> {
        AggregateStore::compute_aggregate(self, entity_id, bucket, now).await
    }

    fn closes_at(&self, bucket: Bucket) -> Option<i64> {
        Some(self.grid.bucket_end(bucket) + self.config.grace_period_secs)
    }
}
