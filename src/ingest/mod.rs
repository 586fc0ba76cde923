// Submission ingestion: validate required fields, pull custom metrics out of the
// ordered field list, register activity, append raw samples for the current bucket.

pub mod normalize;
pub mod numeric;

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, instrument};

use crate::cache::AggregationCache;
use crate::error::IngestError;
use crate::models::{CustomMetric, EntityId, HITS_METRIC, MetricSample};
use crate::registry::PluginRegistry;
use crate::store::AggregateStore;
use crate::time_grid::{Bucket, TimeGrid};
use normalize::NameNormalizer;

/// Historical fix-up: names containing this term get every `?` turned into `i`.
const PROTECTIONS_TERM: &str = "Protections";

/// Submitted key/value pairs in request order. Duplicate keys are kept.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Submission {
    fields: Vec<(String, String)>,
}

impl Submission {
    pub fn new(fields: Vec<(String, String)>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    /// First value submitted under `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn require(&self, key: &str) -> Result<&str, IngestError> {
        self.get(key)
            .ok_or_else(|| IngestError::MissingField(key.to_string()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Submission {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::new(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Keeps pairs whose value is numeric and whose key starts with `prefix` (ASCII
/// case-insensitive). The name is the key minus the prefix and one separating `_`,
/// remaining `_` → space, then normalized.
///
/// Duplicate handling: a candidate is skipped when its name loosely equals a *value*
/// already accepted, and when the name itself was already accepted (first wins).
pub fn extract_custom_metrics(
    fields: &[(String, String)],
    prefix: &str,
    normalizer: &dyn NameNormalizer,
) -> Vec<CustomMetric> {
    let mut out: Vec<CustomMetric> = Vec::new();

    for (key, raw) in fields {
        let Some(value) = numeric::parse_numeric(raw) else {
            continue;
        };
        if !has_prefix_ignore_ascii_case(key, prefix) {
            continue;
        }

        let rest = &key[prefix.len()..];
        let spaced = rest.strip_prefix('_').unwrap_or(rest).replace('_', " ");
        let mut name = normalizer.normalize(&spaced).name;
        if name.contains(PROTECTIONS_TERM) {
            name = name.replace('?', "i");
        }
        if name.is_empty() {
            debug!(key = %key, "custom field with empty metric name skipped");
            continue;
        }

        if out.iter().any(|m| numeric::loose_eq(&m.raw, &name)) {
            continue;
        }
        if out.iter().any(|m| m.name == name) {
            continue;
        }

        out.push(CustomMetric {
            name,
            value,
            raw: raw.clone(),
        });
    }

    out
}

fn has_prefix_ignore_ascii_case(key: &str, prefix: &str) -> bool {
    key.len() >= prefix.len()
        && key.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}

#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Fields every submission must carry; a missing one rejects the request.
    pub required_fields: Vec<String>,
    /// Field holding the reporting server's identity.
    pub server_field: String,
    pub custom_prefix: String,
    /// Create plugins on first report instead of rejecting unknown names.
    pub auto_register_plugins: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            required_fields: vec!["guid".to_string()],
            server_field: "guid".to_string(),
            custom_prefix: "custom".to_string(),
            auto_register_plugins: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReceipt {
    pub plugin_id: EntityId,
    pub server_id: EntityId,
    pub bucket: Bucket,
    pub samples: usize,
}

pub struct SubmissionIngest {
    store: Arc<AggregateStore>,
    registry: Arc<PluginRegistry>,
    cache: Arc<AggregationCache>,
    grid: TimeGrid,
    normalizer: Arc<dyn NameNormalizer>,
    config: IngestConfig,
}

impl SubmissionIngest {
    pub fn new(
        store: Arc<AggregateStore>,
        registry: Arc<PluginRegistry>,
        cache: Arc<AggregationCache>,
        grid: TimeGrid,
        normalizer: Arc<dyn NameNormalizer>,
        config: IngestConfig,
    ) -> Self {
        Self {
            store,
            registry,
            cache,
            grid,
            normalizer,
            config,
        }
    }

    pub fn extract(&self, submission: &Submission) -> Vec<CustomMetric> {
        extract_custom_metrics(
            submission.fields(),
            &self.config.custom_prefix,
            self.normalizer.as_ref(),
        )
    }

    /// Accept one report for `plugin_name` at `now`. Validation runs before any write.
    #[instrument(skip(self, submission), fields(operation = "ingest", plugin = %plugin_name))]
    pub async fn ingest(
        &self,
        plugin_name: &str,
        submission: &Submission,
        now: i64,
    ) -> Result<IngestReceipt, IngestError> {
        for field in &self.config.required_fields {
            submission.require(field)?;
        }
        let guid = submission.require(&self.config.server_field)?;
        let custom = self.extract(submission);

        let plugin = if self.config.auto_register_plugins {
            self.registry.register_plugin(plugin_name, "").await?
        } else {
            self.registry
                .load_by_name(plugin_name)
                .await?
                .ok_or_else(|| IngestError::UnknownPlugin(plugin_name.to_string()))?
        };
        let server = self.registry.register_server(guid).await?;

        self.registry
            .record_server_plugin(server.id, plugin.id, now)
            .await?;
        self.registry.increment_global_hits(plugin.id).await?;

        let bucket = self.grid.current_bucket(now);
        let mut samples = Vec::with_capacity(custom.len() + 1);
        samples.push(MetricSample {
            entity_id: plugin.id,
            bucket,
            metric_name: HITS_METRIC.to_string(),
            value: 1.0,
        });
        samples.extend(custom.into_iter().map(|m| m.into_sample(plugin.id, bucket)));
        self.store.append_samples(&samples, now).await?;

        self.cache.invalidate(plugin.id, bucket);

        debug!(
            plugin_id = %plugin.id,
            server_id = %server.id,
            bucket = %bucket,
            samples = samples.len(),
            "submission ingested"
        );

        Ok(IngestReceipt {
            plugin_id: plugin.id,
            server_id: server.id,
            bucket,
            samples: samples.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::normalize::Latin1Normalizer;
    use super::*;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn extract(items: &[(&str, &str)]) -> Vec<CustomMetric> {
        extract_custom_metrics(&pairs(items), "custom", &Latin1Normalizer)
    }

    #[test]
    fn keeps_only_prefixed_numeric_fields() {
        let out = extract(&[
            ("guid", "abc"),
            ("custom_Kills", "5"),
            ("custom_Name", "steve"),
            ("players", "12"),
            ("CUSTOM_Deaths", "2.5"),
        ]);
        let names: Vec<_> = out.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["Kills", "Deaths"]);
        assert_eq!(out[1].value, 2.5);
    }

    #[test]
    fn underscores_become_spaces() {
        let out = extract(&[("customTotal_Player_Count", "9")]);
        assert_eq!(out[0].name, "Total Player Count");
    }

    // Known quirk: duplicates are resolved first-wins, via the value-membership check.
    #[test]
    fn duplicate_key_keeps_first_occurrence() {
        let out = extract(&[("custom_Kills", "5"), ("custom_Kills", "7")]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].value, 5.0);
        assert_eq!(out[0].raw, "5");
    }

    // Known quirk: a name equal to an earlier accepted value is dropped.
    #[test]
    fn name_matching_an_earlier_value_is_dropped() {
        let out = extract(&[("customA", "5"), ("custom5", "3"), ("custom5.0", "4")]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].name, "A");
    }

    #[test]
    fn protections_question_marks_become_i() {
        let out = extract(&[("custom_Map?Protections", "1")]);
        assert_eq!(out[0].name, "MapiProtections");

        let out = extract(&[("customMap?Protections", "1")]);
        assert_eq!(out[0].name, "MapiProtections");
    }

    #[test]
    fn mis_encoded_protections_term_is_repaired() {
        // U+0131 is unmappable, becomes '?', then the fix-up turns it into 'i'.
        let out = extract(&[("customWorldGuard Protect\u{131}ons", "3")]);
        assert_eq!(out[0].name, "WorldGuard Protect?ons");

        let out = extract(&[("customProtections R\u{131}gions", "3")]);
        assert_eq!(out[0].name, "Protections Rigions");
    }

    #[test]
    fn lossy_names_keep_question_marks_without_protections() {
        let out = extract(&[("custom€uro", "3")]);
        assert_eq!(out[0].name, "?uro");
    }

    #[test]
    fn bare_prefix_skipped() {
        assert!(extract(&[("custom", "3")]).is_empty());
    }

    #[test]
    fn submission_require_reports_missing_field() {
        let s: Submission = [("guid", "abc")].into_iter().collect();
        assert_eq!(s.require("guid").unwrap(), "abc");
        let err = s.require("server").unwrap_err();
        assert!(matches!(err, IngestError::MissingField(f) if f == "server"));
    }
}
