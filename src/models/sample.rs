// Raw metric samples as written by ingestion. Never mutated after insert.

use serde::{Deserialize, Serialize};

use super::EntityId;
use crate::time_grid::Bucket;

/// Built-in counter appended once per accepted submission.
pub const HITS_METRIC: &str = "Hits";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSample {
    pub entity_id: EntityId,
    pub bucket: Bucket,
    pub metric_name: String,
    pub value: f64,
}

/// A custom metric pulled out of a submission, before it is tagged with entity and bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomMetric {
    pub name: String,
    pub value: f64,
    /// Submitted text of the value, kept for the duplicate check.
    pub raw: String,
}

impl CustomMetric {
    pub fn into_sample(self, entity_id: EntityId, bucket: Bucket) -> MetricSample {
        MetricSample {
            entity_id,
            bucket,
            metric_name: self.name,
            value: self.value,
        }
    }
}
