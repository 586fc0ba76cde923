// Domain models: tracked entities, raw metric samples, folded aggregates.

mod aggregate;
mod entity;
mod sample;

pub use aggregate::{AggregatePayload, AggregateRow, MetricValue};
pub use entity::{Entity, EntityId, EntityKind};
pub use sample::{CustomMetric, HITS_METRIC, MetricSample};
