use serde::Deserialize;
use std::time::Duration;

use crate::cache::CacheConfig;
use crate::ingest::IngestConfig;
use crate::store::StoreConfig;
use crate::store::fold::FoldPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub graph: GraphConfig,
    pub cache: CacheSettings,
    #[serde(default)]
    pub aggregation: AggregationSettings,
    #[serde(default)]
    pub ingest: IngestSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    pub max_pool_size: u32,
    #[serde(default = "default_sample_retention_days")]
    pub sample_retention_days: u32,
}

fn default_sample_retention_days() -> u32 {
    7
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphConfig {
    /// Minutes between graphing periods.
    pub interval: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSettings {
    pub retention_window_seconds: u64,
    pub failure_ttl_seconds: u64,
    pub max_entries: usize,
    #[serde(default = "default_compute_timeout_secs")]
    pub compute_timeout_secs: u64,
    #[serde(default = "default_open_bucket_ttl_seconds")]
    pub open_bucket_ttl_seconds: u64,
}

fn default_compute_timeout_secs() -> u64 {
    30
}

fn default_open_bucket_ttl_seconds() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct AggregationSettings {
    #[serde(default = "default_true")]
    pub enable: bool,
    /// Late samples within this many seconds after a bucket ends still change it.
    /// Defaults to a tenth of the graph interval; see [`AppConfig::grace_period_secs`].
    #[serde(default)]
    pub grace_period_secs: Option<u64>,
    /// Trailing window used to rank plugins by active servers.
    #[serde(default = "default_ranking_window_secs")]
    pub ranking_window_secs: u64,
    /// Metric-name patterns (`*` wildcard) folded as last-write gauges instead of sums.
    #[serde(default)]
    pub last_write_patterns: Vec<String>,
    #[serde(default = "default_stats_log_interval_secs")]
    pub stats_log_interval_secs: u64,
    /// Optional cron expression for VACUUM (e.g. "0 0 3 * * *" = 03:00 daily). Uses local time.
    #[serde(default)]
    pub vacuum_schedule: Option<String>,
    /// Run VACUUM every N seconds when vacuum_schedule is not set.
    #[serde(default = "default_vacuum_interval_secs")]
    pub vacuum_interval_secs: u64,
}

impl Default for AggregationSettings {
    fn default() -> Self {
        Self {
            enable: true,
            grace_period_secs: None,
            ranking_window_secs: default_ranking_window_secs(),
            last_write_patterns: Vec::new(),
            stats_log_interval_secs: default_stats_log_interval_secs(),
            vacuum_schedule: None,
            vacuum_interval_secs: default_vacuum_interval_secs(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_ranking_window_secs() -> u64 {
    24 * 60 * 60
}

fn default_stats_log_interval_secs() -> u64 {
    300
}

fn default_vacuum_interval_secs() -> u64 {
    24 * 60 * 60
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestSettings {
    #[serde(default = "default_required_fields")]
    pub required_fields: Vec<String>,
    #[serde(default = "default_server_field")]
    pub server_field: String,
    #[serde(default = "default_custom_prefix")]
    pub custom_prefix: String,
    #[serde(default = "default_true")]
    pub auto_register_plugins: bool,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            required_fields: default_required_fields(),
            server_field: default_server_field(),
            custom_prefix: default_custom_prefix(),
            auto_register_plugins: true,
        }
    }
}

fn default_required_fields() -> Vec<String> {
    vec![default_server_field()]
}

fn default_server_field() -> String {
    "guid".into()
}

fn default_custom_prefix() -> String {
    "custom".into()
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        let s = std::fs::read_to_string(&path)?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.server.port > 0,
            "server.port must be between 1 and 65535, got {}",
            self.server.port
        );
        anyhow::ensure!(
            !self.database.path.is_empty(),
            "database.path must be non-empty"
        );
        anyhow::ensure!(
            self.database.max_pool_size > 0,
            "database.max_pool_size must be > 0, got {}",
            self.database.max_pool_size
        );
        anyhow::ensure!(
            self.database.sample_retention_days > 0,
            "database.sample_retention_days must be > 0, got {}",
            self.database.sample_retention_days
        );
        anyhow::ensure!(
            self.graph.interval > 0,
            "graph.interval must be > 0, got {}",
            self.graph.interval
        );
        anyhow::ensure!(
            self.cache.retention_window_seconds > 0,
            "cache.retentionWindowSeconds must be > 0, got {}",
            self.cache.retention_window_seconds
        );
        anyhow::ensure!(
            self.cache.failure_ttl_seconds > 0,
            "cache.failureTtlSeconds must be > 0, got {}",
            self.cache.failure_ttl_seconds
        );
        anyhow::ensure!(
            self.cache.max_entries > 0,
            "cache.maxEntries must be > 0, got {}",
            self.cache.max_entries
        );
        anyhow::ensure!(
            self.cache.compute_timeout_secs > 0,
            "cache.computeTimeoutSecs must be > 0, got {}",
            self.cache.compute_timeout_secs
        );
        if self.aggregation.enable {
            let interval_secs = u64::from(self.graph.interval) * 60;
            anyhow::ensure!(
                self.grace_period_secs() < interval_secs,
                "aggregation.grace_period_secs must be < graph.interval in seconds ({}), got {}",
                interval_secs,
                self.grace_period_secs()
            );
            anyhow::ensure!(
                self.aggregation.ranking_window_secs > 0,
                "aggregation.ranking_window_secs must be > 0, got {}",
                self.aggregation.ranking_window_secs
            );
            anyhow::ensure!(
                self.aggregation.stats_log_interval_secs > 0,
                "aggregation.stats_log_interval_secs must be > 0, got {}",
                self.aggregation.stats_log_interval_secs
            );
            anyhow::ensure!(
                self.aggregation.vacuum_interval_secs > 0,
                "aggregation.vacuum_interval_secs must be > 0, got {}",
                self.aggregation.vacuum_interval_secs
            );
        }
        anyhow::ensure!(
            !self.ingest.server_field.is_empty(),
            "ingest.server_field must be non-empty"
        );
        anyhow::ensure!(
            !self.ingest.custom_prefix.is_empty(),
            "ingest.custom_prefix must be non-empty"
        );
        Ok(())
    }

    /// Effective grace period: the configured value, or a tenth of the graph interval.
    pub fn grace_period_secs(&self) -> u64 {
        self.aggregation
            .grace_period_secs
            .unwrap_or(u64::from(self.graph.interval) * 60 / 10)
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            retention_window: Duration::from_secs(self.cache.retention_window_seconds),
            failure_ttl: Duration::from_secs(self.cache.failure_ttl_seconds),
            max_entries: self.cache.max_entries,
            compute_timeout: Duration::from_secs(self.cache.compute_timeout_secs),
            open_bucket_ttl: Duration::from_secs(self.cache.open_bucket_ttl_seconds),
        }
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            grace_period_secs: self.grace_period_secs() as i64,
            sample_retention_secs: i64::from(self.database.sample_retention_days) * 24 * 60 * 60,
            fold_policy: FoldPolicy::new(self.aggregation.last_write_patterns.clone()),
        }
    }

    pub fn ingest_config(&self) -> IngestConfig {
        IngestConfig {
            required_fields: self.ingest.required_fields.clone(),
            server_field: self.ingest.server_field.clone(),
            custom_prefix: self.ingest.custom_prefix.clone(),
            auto_register_plugins: self.ingest.auto_register_plugins,
        }
    }
}
