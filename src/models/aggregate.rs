// Aggregated row: one per (entity, bucket). Metrics are sorted by name.

use serde::{Deserialize, Serialize};
use wincode::{SchemaRead, SchemaWrite};

use super::EntityId;
use crate::time_grid::Bucket;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, SchemaRead, SchemaWrite)]
#[serde(rename_all = "camelCase")]
pub struct MetricValue {
    pub name: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateRow {
    pub entity_id: EntityId,
    pub bucket: Bucket,
    pub metrics: Vec<MetricValue>,
    pub sample_count: u64,
    /// Computed before the bucket (plus grace) closed; later samples may still change it.
    pub partial: bool,
}

impl AggregateRow {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.metrics
            .binary_search_by(|m| m.name.as_str().cmp(name))
            .ok()
            .map(|i| self.metrics[i].value)
    }
}

/// BLOB body of a persisted aggregate (entity and bucket live in their own columns).
#[derive(Debug, Clone, PartialEq, SchemaRead, SchemaWrite)]
pub struct AggregatePayload {
    pub sample_count: u64,
    pub metrics: Vec<MetricValue>,
}
