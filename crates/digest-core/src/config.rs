//! Startup configuration surface (design §6).
//!
//! Every field has a default matching the spec's configuration table.
//! [`Config::load`] reads an optional TOML file and then lets environment
//! variables of the form `DIGEST_<FIELD_UPPER>` override individual values,
//! the same two-layer precedence the grounding codebase uses for its
//! provider configs. Settings read at runtime from the control-plane store
//! (see `digest-store`'s `Store::get_setting`) take precedence over both.

use std::time::Duration;

use serde::Deserialize;

fn default_digest_window() -> Duration {
    Duration::from_secs(3600)
}
fn default_digest_top_n() -> usize {
    20
}
fn default_relevance_threshold() -> f64 {
    0.5
}
fn default_importance_threshold() -> f64 {
    0.3
}
fn default_similarity_threshold() -> f64 {
    0.65
}
fn default_cluster_similarity_threshold() -> f64 {
    0.75
}
fn default_cluster_coherence_threshold() -> f64 {
    0.70
}
fn default_cluster_time_window_hours() -> u64 {
    36
}
fn default_cross_topic_similarity_threshold() -> f64 {
    0.90
}
fn default_rate_limit_rps() -> f64 {
    1.0
}
fn default_reader_fetch_limit() -> usize {
    20
}
fn default_worker_batch_size() -> usize {
    10
}
fn default_worker_poll_interval() -> Duration {
    Duration::from_secs(10)
}
fn default_scheduler_tick_interval() -> Duration {
    Duration::from_secs(600)
}
fn default_scheduler_catchup_window() -> Duration {
    Duration::from_secs(86_400)
}
fn default_topic_diversity_cap() -> f64 {
    0.30
}
fn default_freshness_decay_hours() -> f64 {
    36.0
}
fn default_freshness_floor() -> f64 {
    0.4
}
fn default_min_topic_count() -> usize {
    3
}
fn default_rating_min_sample_channel() -> u64 {
    15
}
fn default_rating_min_sample_global() -> u64 {
    100
}
fn default_true() -> bool {
    true
}
fn default_lease_name() -> String {
    "digest-scheduler-leader".to_string()
}
fn default_pool_multiplier() -> usize {
    3
}
fn default_auto_min_weight() -> f64 {
    0.1
}
fn default_auto_max_weight() -> f64 {
    2.0
}
fn default_min_messages() -> u64 {
    10
}
fn default_expected_frequency() -> f64 {
    5.0
}
fn default_net_positive() -> f64 {
    0.20
}
fn default_net_negative() -> f64 {
    -0.20
}
fn default_threshold_step() -> f64 {
    0.02
}
fn default_min_global_ratings() -> f64 {
    20.0
}
fn default_min_channel_ratings() -> f64 {
    5.0
}
fn default_backlog_anomaly_threshold() -> u64 {
    100
}
fn default_min_length() -> usize {
    10
}
fn default_filter_mode() -> String {
    "denylist".to_string()
}

/// Startup configuration. Every field is overridable at runtime through the
/// [`crate::model::Setting`] store; these are only the process defaults.
///
/// Every field carries its own `#[serde(default = "...")]`, so there is
/// deliberately no struct-level `#[serde(default)]` here: that attribute
/// resolves missing fields via `Config::default()`, which would recurse
/// into `toml::from_str("")` below.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(with = "humantime_serde_duration", default = "default_digest_window")]
    pub digest_window: Duration,
    #[serde(default = "default_digest_top_n")]
    pub digest_top_n: usize,
    #[serde(default = "default_relevance_threshold")]
    pub relevance_threshold: f64,
    #[serde(default = "default_importance_threshold")]
    pub importance_threshold: f64,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    #[serde(default = "default_cluster_similarity_threshold")]
    pub cluster_similarity_threshold: f64,
    #[serde(default = "default_cluster_coherence_threshold")]
    pub cluster_coherence_threshold: f64,
    #[serde(default = "default_cluster_time_window_hours")]
    pub cluster_time_window_hours: u64,
    #[serde(default)]
    pub cross_topic_clustering_enabled: bool,
    #[serde(default = "default_cross_topic_similarity_threshold")]
    pub cross_topic_similarity_threshold: f64,
    #[serde(default = "default_rate_limit_rps")]
    pub rate_limit_rps: f64,
    #[serde(default = "default_true")]
    pub leader_election_enabled: bool,
    #[serde(default = "default_lease_name")]
    pub leader_election_lease_name: String,
    #[serde(default = "default_reader_fetch_limit")]
    pub reader_fetch_limit: usize,
    #[serde(default = "default_worker_batch_size")]
    pub worker_batch_size: usize,
    #[serde(
        with = "humantime_serde_duration",
        default = "default_worker_poll_interval"
    )]
    pub worker_poll_interval: Duration,
    #[serde(
        with = "humantime_serde_duration",
        default = "default_scheduler_tick_interval"
    )]
    pub scheduler_tick_interval: Duration,
    #[serde(
        with = "humantime_serde_duration",
        default = "default_scheduler_catchup_window"
    )]
    pub scheduler_catchup_window: Duration,
    #[serde(default = "default_topic_diversity_cap")]
    pub topic_diversity_cap: f64,
    #[serde(default = "default_freshness_decay_hours")]
    pub freshness_decay_hours: f64,
    #[serde(default = "default_freshness_floor")]
    pub freshness_floor: f64,
    #[serde(default = "default_min_topic_count")]
    pub min_topic_count: usize,
    #[serde(default = "default_rating_min_sample_channel")]
    pub rating_min_sample_channel: u64,
    #[serde(default = "default_rating_min_sample_global")]
    pub rating_min_sample_global: u64,
    #[serde(default = "default_pool_multiplier")]
    pub pool_multiplier: usize,

    // Adaptive-tuning bounds (§4.8)
    #[serde(default = "default_auto_min_weight")]
    pub auto_weight_min: f64,
    #[serde(default = "default_auto_max_weight")]
    pub auto_weight_max: f64,
    #[serde(default = "default_min_messages")]
    pub auto_weight_min_messages: u64,
    #[serde(default = "default_expected_frequency")]
    pub auto_weight_expected_frequency: f64,
    #[serde(default = "default_net_positive")]
    pub net_positive_threshold: f64,
    #[serde(default = "default_net_negative")]
    pub net_negative_threshold: f64,
    #[serde(default = "default_threshold_step")]
    pub global_threshold_step: f64,
    #[serde(default = "default_min_global_ratings")]
    pub rating_min_weighted_global: f64,
    #[serde(default = "default_min_channel_ratings")]
    pub rating_min_weighted_channel: f64,
    #[serde(default = "default_backlog_anomaly_threshold")]
    pub backlog_anomaly_threshold: u64,

    // Admission filter (§4.3); overridable at runtime like everything else.
    #[serde(default = "default_min_length")]
    pub min_length: usize,
    #[serde(default)]
    pub ads_filter_enabled: bool,
    #[serde(default)]
    pub ads_keywords: Vec<String>,
    #[serde(default)]
    pub skip_forwards: bool,
    /// One of `denylist`, `allowlist`, `mixed` (design §4.3).
    #[serde(default = "default_filter_mode")]
    pub filter_mode: String,
    #[serde(default = "default_true")]
    pub relevance_gate_enabled: bool,

    /// Link-enrichment toggle; the enricher itself is an external
    /// collaborator (see design §1 Non-goals), this only gates whether the
    /// pipeline attempts to call it.
    #[serde(default)]
    pub link_enrichment_enabled: bool,
    #[serde(default)]
    pub vision_routing_enabled: bool,
    #[serde(default)]
    pub tiered_rescoring_enabled: bool,
    #[serde(default)]
    pub normalization_enabled: bool,
    #[serde(default)]
    pub topic_clustering_enabled: bool,
    #[serde(default)]
    pub semantic_dedup_enabled: bool,
    #[serde(default)]
    pub editor_overview_enabled: bool,

    #[serde(default = "default_model_name")]
    pub default_model: String,
    #[serde(default = "default_smart_model_name")]
    pub smart_model: String,

    /// Destination chat for posted digests (design §6 poster interface).
    #[serde(default)]
    pub digest_chat_id: String,
}

fn default_model_name() -> String {
    "gpt-4o-mini".to_string()
}
fn default_smart_model_name() -> String {
    "gpt-4o".to_string()
}

impl Default for Config {
    fn default() -> Self {
        toml::from_str("").expect("empty document deserializes via field defaults")
    }
}

impl Config {
    /// Loads configuration from an optional TOML file, falling back to
    /// built-in defaults for any field the file omits.
    ///
    /// # Errors
    /// Returns [`digest_core::error::Error::Fatal`] if the file exists but
    /// fails to parse.
    pub fn load(path: Option<&std::path::Path>) -> crate::error::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .map_err(|e| crate::error::Error::Fatal(format!("reading config {path:?}: {e}")))?;
        toml::from_str(&text)
            .map_err(|e| crate::error::Error::Fatal(format!("parsing config {path:?}: {e}")))
    }
}

/// Minimal `humantime`-style duration (de)serialization, avoiding a
/// dependency on the `humantime-serde` crate for the handful of duration
/// fields in [`Config`]: plain seconds as an integer or float.
mod humantime_serde_duration {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(secs))
    }
}
