// Aggregate cache keyed by (entity, bucket).
//
// Single-flight: the first caller for a key spawns the computation as its own task and
// parks a shared handle in the entry; later callers await that handle instead of computing.
// The task outlives any one caller, so an aborted request still populates the entry.
// Entries live in a sharded map; no lock is held while a computation runs.
//
// Lifecycle: build with `AggregationCache::new(source, config)` and pass the instance to
// whoever needs it. `shutdown()` waits for in-flight computations and then refuses new work.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{CacheError, StoreError};
use crate::models::{AggregateRow, EntityId};
use crate::time_grid::Bucket;

/// Whatever can fold raw samples into an aggregate; the store in production.
#[async_trait]
pub trait AggregateSource: Send + Sync {
    async fn compute_aggregate(
        &self,
        entity_id: EntityId,
        bucket: Bucket,
        now: i64,
    ) -> Result<AggregateRow, StoreError>;

    /// Unix time from which a partial row for `bucket` is stale because the bucket has
    /// closed. `None` leaves partial rows to the open-bucket TTL alone.
    fn closes_at(&self, _bucket: Bucket) -> Option<i64> {
        None
    }
}

pub type CacheResult = Result<Arc<AggregateRow>, CacheError>;
type SharedComputation = Shared<BoxFuture<'static, CacheResult>>;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Entries whose bucket starts before `now - retention_window` may be dropped.
    pub retention_window: Duration,
    /// How long a failed computation is remembered before the next caller retries.
    pub failure_ttl: Duration,
    pub max_entries: usize,
    /// Computations running longer than this fail with `CacheError::Timeout`.
    pub compute_timeout: Duration,
    /// Lifetime of a partial (bucket not yet closed) aggregate.
    pub open_bucket_ttl: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CacheKey {
    entity_id: EntityId,
    bucket: Bucket,
}

enum Slot {
    Pending {
        generation: u64,
        result: SharedComputation,
    },
    Ready {
        row: Arc<AggregateRow>,
        expires_at: Option<Instant>,
        /// Partial rows only: caller time at which the bucket closes.
        closes_at: Option<i64>,
    },
    Failed {
        error: CacheError,
        until: Instant,
    },
}

/// Computation-state tag of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryState {
    Pending,
    Ready,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    /// Callers that joined a computation already in flight.
    pub coalesced: u64,
    pub computations: u64,
    pub failures: u64,
    pub evictions: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    computations: AtomicU64,
    failures: AtomicU64,
    evictions: AtomicU64,
}

struct Inner {
    source: Arc<dyn AggregateSource>,
    config: CacheConfig,
    entries: DashMap<CacheKey, Slot>,
    next_generation: AtomicU64,
    closed: AtomicBool,
    counters: Counters,
}

enum Lookup {
    Hit(Arc<AggregateRow>),
    Join(SharedComputation),
    Failed(CacheError),
    Compute,
}

pub struct AggregationCache {
    inner: Arc<Inner>,
}

impl AggregationCache {
    pub fn new(source: Arc<dyn AggregateSource>, config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                config,
                entries: DashMap::new(),
                next_generation: AtomicU64::new(0),
                closed: AtomicBool::new(false),
                counters: Counters::default(),
            }),
        }
    }

    /// Cached aggregate for (entity, bucket), computing it at most once across concurrent
    /// callers. Every caller joined to one computation gets the same row or the same error.
    pub async fn get_or_compute(
        &self,
        entity_id: EntityId,
        bucket: Bucket,
        now: i64,
    ) -> CacheResult {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(CacheError::ShuttingDown);
        }
        let key = CacheKey { entity_id, bucket };
        let counters = &self.inner.counters;

        let computation = match self.inner.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                let lookup = match occupied.get() {
                    Slot::Ready {
                        row,
                        expires_at,
                        closes_at,
                    } if expires_at.is_none_or(|t| Instant::now() < t)
                        && closes_at.is_none_or(|c| now < c) =>
                    {
                        Lookup::Hit(row.clone())
                    }
                    Slot::Pending { result, .. } => Lookup::Join(result.clone()),
                    Slot::Failed { error, until } if Instant::now() < *until => {
                        Lookup::Failed(error.clone())
                    }
                    _ => Lookup::Compute,
                };
                match lookup {
                    Lookup::Hit(row) => {
                        counters.hits.fetch_add(1, Ordering::Relaxed);
                        return Ok(row);
                    }
                    Lookup::Failed(error) => return Err(error),
                    Lookup::Join(result) => {
                        counters.coalesced.fetch_add(1, Ordering::Relaxed);
                        result
                    }
                    Lookup::Compute => {
                        counters.misses.fetch_add(1, Ordering::Relaxed);
                        let (generation, result) = self.inner.spawn_computation(key, now);
                        occupied.insert(Slot::Pending {
                            generation,
                            result: result.clone(),
                        });
                        result
                    }
                }
            }
            Entry::Vacant(vacant) => {
                counters.misses.fetch_add(1, Ordering::Relaxed);
                let (generation, result) = self.inner.spawn_computation(key, now);
                vacant.insert(Slot::Pending {
                    generation,
                    result: result.clone(),
                });
                result
            }
        };

        computation.await
    }

    /// Drop the entry so the next access recomputes. A computation already in flight still
    /// answers its current waiters but its result is not stored.
    pub fn invalidate(&self, entity_id: EntityId, bucket: Bucket) {
        if self
            .inner
            .entries
            .remove(&CacheKey { entity_id, bucket })
            .is_some()
        {
            debug!(entity_id = %entity_id, bucket = %bucket, "aggregate invalidated");
        }
    }

    pub fn state(&self, entity_id: EntityId, bucket: Bucket) -> Option<EntryState> {
        self.inner
            .entries
            .get(&CacheKey { entity_id, bucket })
            .map(|slot| match &*slot {
                Slot::Pending { .. } => EntryState::Pending,
                Slot::Ready { .. } => EntryState::Ready,
                Slot::Failed { .. } => EntryState::Failed,
            })
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Drop settled entries whose bucket fell out of the retention window. Returns how many.
    pub fn sweep(&self, now: i64) -> usize {
        self.inner.sweep(now)
    }

    pub fn stats(&self) -> CacheStats {
        let c = &self.inner.counters;
        CacheStats {
            entries: self.inner.entries.len(),
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            coalesced: c.coalesced.load(Ordering::Relaxed),
            computations: c.computations.load(Ordering::Relaxed),
            failures: c.failures.load(Ordering::Relaxed),
            evictions: c.evictions.load(Ordering::Relaxed),
        }
    }

    /// Refuse new lookups, wait for in-flight computations, then clear all entries.
    pub async fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::Release);
        let pending: Vec<SharedComputation> = self
            .inner
            .entries
            .iter()
            .filter_map(|e| match e.value() {
                Slot::Pending { result, .. } => Some(result.clone()),
                _ => None,
            })
            .collect();
        let in_flight = pending.len();
        futures_util::future::join_all(pending).await;
        self.inner.entries.clear();
        info!(in_flight, "aggregation cache shut down");
    }
}

impl Inner {
    fn spawn_computation(self: &Arc<Self>, key: CacheKey, now: i64) -> (u64, SharedComputation) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let task_inner = Arc::clone(self);
        let handle = tokio::spawn(async move {
            task_inner
                .counters
                .computations
                .fetch_add(1, Ordering::Relaxed);
            let limit = task_inner.config.compute_timeout;
            let outcome = match tokio::time::timeout(
                limit,
                task_inner
                    .source
                    .compute_aggregate(key.entity_id, key.bucket, now),
            )
            .await
            {
                Ok(Ok(row)) => Ok(Arc::new(row)),
                Ok(Err(e)) => Err(CacheError::from(e)),
                Err(_) => Err(CacheError::Timeout(limit)),
            };
            task_inner.complete(key, generation, &outcome, now);
            outcome
        });

        let join_inner = Arc::clone(self);
        let result = async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    let outcome = Err(CacheError::Computation(format!(
                        "computation task ended abnormally: {}",
                        e
                    )));
                    join_inner.complete(key, generation, &outcome, now);
                    outcome
                }
            }
        }
        .boxed()
        .shared();

        (generation, result)
    }

    /// Settle the entry for `key` if it still belongs to computation `generation`.
    fn complete(&self, key: CacheKey, generation: u64, outcome: &CacheResult, now: i64) {
        let ready = {
            let Some(mut slot) = self.entries.get_mut(&key) else {
                return;
            };
            if !matches!(&*slot, Slot::Pending { generation: g, .. } if *g == generation) {
                return;
            }
            match outcome {
                Ok(row) => {
                    *slot = Slot::Ready {
                        row: row.clone(),
                        expires_at: row
                            .partial
                            .then(|| Instant::now() + self.config.open_bucket_ttl),
                        closes_at: if row.partial {
                            self.source.closes_at(key.bucket)
                        } else {
                            None
                        },
                    };
                    true
                }
                Err(error) => {
                    self.counters.failures.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        entity_id = %key.entity_id,
                        bucket = %key.bucket,
                        error = %error,
                        "aggregate computation failed"
                    );
                    *slot = Slot::Failed {
                        error: error.clone(),
                        until: Instant::now() + self.config.failure_ttl,
                    };
                    false
                }
            }
        };

        if ready {
            self.supersede_partials(key);
        }
        self.sweep(now);
        self.enforce_capacity();
    }

    /// A newer bucket for the same entity is ready: older partial rows are stale.
    fn supersede_partials(&self, key: CacheKey) {
        let before = self.entries.len();
        self.entries.retain(|k, slot| {
            !(k.entity_id == key.entity_id
                && k.bucket < key.bucket
                && matches!(slot, Slot::Ready { row, .. } if row.partial))
        });
        self.count_evictions(before);
    }

    fn sweep(&self, now: i64) -> usize {
        let cutoff = now.saturating_sub(self.config.retention_window.as_secs() as i64);
        let before = self.entries.len();
        self.entries
            .retain(|k, slot| matches!(slot, Slot::Pending { .. }) || k.bucket.start() >= cutoff);
        self.count_evictions(before)
    }

    /// Over capacity: evict the settled entry with the oldest bucket until back under.
    fn enforce_capacity(&self) {
        while self.entries.len() > self.config.max_entries {
            let victim = self
                .entries
                .iter()
                .filter(|e| !matches!(e.value(), Slot::Pending { .. }))
                .map(|e| *e.key())
                .min_by_key(|k| (k.bucket, k.entity_id));
            let Some(victim) = victim else {
                break;
            };
            if self.entries.remove(&victim).is_some() {
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(entity_id = %victim.entity_id, bucket = %victim.bucket, "aggregate evicted");
            }
        }
    }

    fn count_evictions(&self, before: usize) -> usize {
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            self.counters
                .evictions
                .fetch_add(removed as u64, Ordering::Relaxed);
        }
        removed
    }
}
