//! Configuration for analysis runs

use crate::error::AnalyzerError;
use crate::rate_limit::RateLimit;
use crate::retry::BackoffPolicy;
use crate::source::SourceId;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Default number of concurrent lookups per stage
pub const DEFAULT_WORKERS: usize = 8;
/// Default BFS depth for neighbor graph expansion
pub const DEFAULT_MAX_DEPTH: u32 = 1;
/// Default per-call timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Settings for one upstream source
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceSettings {
    /// Per-call timeout in milliseconds
    pub timeout_ms: u64,
    /// Request rate limit
    pub rate_limit: RateLimit,
    /// Override of the upstream endpoint (HTTP sources only)
    pub base_url: Option<String>,
}

/// Per-source settings as written in a config file
///
/// Every field is optional; absent fields keep the source's defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SourceOverrides {
    timeout_ms: Option<u64>,
    rate_limit: Option<RateLimitOverrides>,
    base_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RateLimitOverrides {
    max_requests: Option<u32>,
    window_ms: Option<u64>,
    min_interval_ms: Option<u64>,
}

impl SourceOverrides {
    fn apply(self, mut settings: SourceSettings) -> SourceSettings {
        if let Some(timeout_ms) = self.timeout_ms {
            settings.timeout_ms = timeout_ms;
        }
        if let Some(limit) = self.rate_limit {
            let current = &mut settings.rate_limit;
            current.max_requests = limit.max_requests.unwrap_or(current.max_requests);
            current.window_ms = limit.window_ms.unwrap_or(current.window_ms);
            current.min_interval_ms = limit.min_interval_ms.unwrap_or(current.min_interval_ms);
        }
        if self.base_url.is_some() {
            settings.base_url = self.base_url;
        }
        settings
    }
}

/// Read the `sources` table, layering each entry over that source's defaults
fn deserialize_sources<'de, D>(
    deserializer: D,
) -> Result<BTreeMap<SourceId, SourceSettings>, D::Error>
where
    D: Deserializer<'de>,
{
    let overrides = BTreeMap::<SourceId, SourceOverrides>::deserialize(deserializer)?;
    Ok(overrides
        .into_iter()
        .map(|(id, entry)| (id, entry.apply(SourceSettings::default_for(id))))
        .collect())
}

impl SourceSettings {
    /// Create settings with the given limit and timeout
    pub fn new(rate_limit: RateLimit, timeout: Duration) -> Self {
        Self {
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            rate_limit,
            base_url: None,
        }
    }

    /// Per-call timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Default settings for a source, sized to its published quota
    pub fn default_for(source: SourceId) -> Self {
        let (limit, timeout) = match source {
            // DNS service without a published cap; keep it polite
            SourceId::TeamCymru => (
                RateLimit::new(50, Duration::from_secs(1), Duration::from_millis(10)),
                Duration::from_millis(DEFAULT_TIMEOUT_MS),
            ),
            // Free tier: 45 requests per minute
            SourceId::IpApi => (
                RateLimit::new(45, Duration::from_secs(60), Duration::ZERO),
                Duration::from_millis(DEFAULT_TIMEOUT_MS),
            ),
            // Free tier: 50k requests per month
            SourceId::IpInfo => (
                RateLimit::new(60, Duration::from_secs(60), Duration::ZERO),
                Duration::from_millis(DEFAULT_TIMEOUT_MS),
            ),
            SourceId::RipeNcc => (
                RateLimit::new(120, Duration::from_secs(60), Duration::from_millis(500)),
                Duration::from_secs(10),
            ),
        };
        Self::new(limit, timeout)
    }
}

/// Configuration for an analysis run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// IP to ASN fallback chain, tried in order
    pub source_priority: Vec<SourceId>,
    /// Source used for ASN holder details
    pub holder_source: SourceId,
    /// Source used for neighbor discovery
    pub neighbor_source: SourceId,
    /// Per-source settings; sources without an entry use their defaults
    #[serde(deserialize_with = "deserialize_sources")]
    pub sources: BTreeMap<SourceId, SourceSettings>,
    /// Backoff policy for transient failures
    pub retry: BackoffPolicy,
    /// Concurrent lookups per stage
    pub workers: usize,
    /// Neighbor graph expansion depth (0 = seeds only)
    pub max_depth: u32,
    /// Skip the neighbor graph stage entirely
    pub build_graph: bool,
    /// Fetch holder details for non-seed graph nodes too
    pub enrich_graph_nodes: bool,
    /// Token for ipinfo.io
    pub ipinfo_token: Option<String>,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            source_priority: vec![SourceId::TeamCymru, SourceId::IpApi],
            holder_source: SourceId::RipeNcc,
            neighbor_source: SourceId::RipeNcc,
            sources: BTreeMap::new(),
            retry: BackoffPolicy::default(),
            workers: DEFAULT_WORKERS,
            max_depth: DEFAULT_MAX_DEPTH,
            build_graph: true,
            enrich_graph_nodes: false,
            ipinfo_token: None,
        }
    }
}

impl AnalyzerConfig {
    /// Create a new AnalyzerConfig builder
    pub fn builder() -> AnalyzerConfigBuilder {
        AnalyzerConfigBuilder::new()
    }

    /// Parse a configuration from TOML text; missing keys use defaults
    pub fn from_toml_str(text: &str) -> Result<Self, AnalyzerError> {
        let config: AnalyzerConfig = toml::from_str(text)?;
        config.validate().map_err(AnalyzerError::Config)?;
        Ok(config)
    }

    /// Load a configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, AnalyzerError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Settings for a source, falling back to its defaults
    pub fn source_settings(&self, source: SourceId) -> SourceSettings {
        self.sources
            .get(&source)
            .cloned()
            .unwrap_or_else(|| SourceSettings::default_for(source))
    }

    /// Every source this configuration needs, in a stable order
    pub fn required_sources(&self) -> Vec<SourceId> {
        let mut sources = self.source_priority.clone();
        sources.push(self.holder_source);
        if self.build_graph {
            sources.push(self.neighbor_source);
        }
        sources.sort();
        sources.dedup();
        sources
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.source_priority.is_empty() {
            return Err("source_priority must name at least one source".to_string());
        }
        let mut seen = Vec::with_capacity(self.source_priority.len());
        for source in &self.source_priority {
            if seen.contains(source) {
                return Err(format!("source '{source}' appears twice in source_priority"));
            }
            seen.push(*source);
        }
        if self.workers == 0 {
            return Err("workers must be at least 1".to_string());
        }
        for (source, settings) in &self.sources {
            if settings.timeout_ms == 0 {
                return Err(format!("timeout for '{source}' must be greater than 0"));
            }
            settings
                .rate_limit
                .validate()
                .map_err(|e| format!("{source}: {e}"))?;
        }
        self.retry.validate()?;
        Ok(())
    }
}

/// Builder for AnalyzerConfig
pub struct AnalyzerConfigBuilder {
    config: AnalyzerConfig,
}

impl AnalyzerConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self {
            config: AnalyzerConfig::default(),
        }
    }

    /// Start from an existing configuration, e.g. one loaded from a file
    pub fn from_config(config: AnalyzerConfig) -> Self {
        Self { config }
    }

    /// Set the IP to ASN fallback chain
    pub fn source_priority(mut self, sources: impl IntoIterator<Item = SourceId>) -> Self {
        self.config.source_priority = sources.into_iter().collect();
        self
    }

    /// Set the holder details source
    pub fn holder_source(mut self, source: SourceId) -> Self {
        self.config.holder_source = source;
        self
    }

    /// Set the neighbor discovery source
    pub fn neighbor_source(mut self, source: SourceId) -> Self {
        self.config.neighbor_source = source;
        self
    }

    /// Override settings for one source
    pub fn source_settings(mut self, source: SourceId, settings: SourceSettings) -> Self {
        self.config.sources.insert(source, settings);
        self
    }

    /// Set the backoff policy
    pub fn retry(mut self, policy: BackoffPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    /// Set the retry ceiling only
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.retry.max_retries = retries;
        self
    }

    /// Set the worker pool size
    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    /// Set the graph expansion depth
    pub fn max_depth(mut self, depth: u32) -> Self {
        self.config.max_depth = depth;
        self
    }

    /// Enable or disable the neighbor graph stage
    pub fn build_graph(mut self, enable: bool) -> Self {
        self.config.build_graph = enable;
        self
    }

    /// Enable or disable holder lookups for non-seed graph nodes
    pub fn enrich_graph_nodes(mut self, enable: bool) -> Self {
        self.config.enrich_graph_nodes = enable;
        self
    }

    /// Set the ipinfo.io token
    pub fn ipinfo_token(mut self, token: impl Into<String>) -> Self {
        self.config.ipinfo_token = Some(token.into());
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<AnalyzerConfig, String> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for AnalyzerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
