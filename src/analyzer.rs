//! Top-level orchestration of an analysis run
//!
//! The [`Analyzer`] owns everything that lives for one run: the source
//! registry (and with it every rate limiter), the result cache and the
//! cancellation token. It chains IP resolution, holder details and
//! neighbor graph discovery into a single [`AnalysisReport`].

use crate::cache::ResultCache;
use crate::config::AnalyzerConfig;
use crate::details::DetailFetcher;
use crate::engine::ResolutionEngine;
use crate::error::{AnalyzerError, LookupError};
use crate::graph::{Graph, GraphBuilder};
use crate::source::{
    IpApiSource, IpInfoSource, RipeSource, SourceAdapter, SourceHandle, SourceId, SourceRegistry,
    TeamCymruSource,
};
use crate::types::{AsnRecord, ResolutionResult};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Everything a run produced, ready for an exporter
#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalysisReport {
    /// One entry per unique input IP
    pub resolutions: BTreeMap<IpAddr, ResolutionResult>,
    /// One record per resolved ASN
    pub records: BTreeMap<u32, AsnRecord>,
    /// Neighbor graph seeded with the resolved ASNs
    pub graph: Graph,
}

impl AnalysisReport {
    /// IPs grouped by their origin ASN
    pub fn ips_by_asn(&self) -> BTreeMap<u32, Vec<IpAddr>> {
        let mut groups: BTreeMap<u32, Vec<IpAddr>> = BTreeMap::new();
        for result in self.resolutions.values() {
            if let Some(asn) = result.asn {
                groups.entry(asn).or_default().push(result.ip);
            }
        }
        groups
    }

    /// The `n` ASNs with the most IPs, most common first
    pub fn top_asns(&self, n: usize) -> Vec<(u32, usize)> {
        let mut counts: Vec<(u32, usize)> = self
            .ips_by_asn()
            .into_iter()
            .map(|(asn, ips)| (asn, ips.len()))
            .collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        counts.truncate(n);
        counts
    }

    /// Results for IPs no source could resolve
    pub fn unresolved(&self) -> Vec<&ResolutionResult> {
        self.resolutions
            .values()
            .filter(|r| !r.is_resolved())
            .collect()
    }

    /// Whether any item was skipped because the run was cancelled
    pub fn was_cancelled(&self) -> bool {
        self.resolutions
            .values()
            .any(|r| r.error == Some(LookupError::Cancelled))
    }
}

/// Runs the resolve, enrich and expand pipeline for one batch of IPs
///
/// # Examples
///
/// ```no_run
/// use asnmap::{Analyzer, AnalyzerConfig};
/// use std::net::IpAddr;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let analyzer = Analyzer::new(AnalyzerConfig::default())?;
///     let ips: Vec<IpAddr> = vec!["8.8.8.8".parse()?, "1.1.1.1".parse()?];
///
///     let report = analyzer.run(&ips).await?;
///     for (asn, count) in report.top_asns(10) {
///         println!("AS{asn}: {count} IPs");
///     }
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct Analyzer {
    config: AnalyzerConfig,
    sources: Arc<SourceRegistry>,
    cache: Arc<ResultCache>,
    cancel: CancellationToken,
}

impl Analyzer {
    /// Create an analyzer with the built-in sources and a fresh cache
    ///
    /// # Errors
    ///
    /// * `AnalyzerError::Config` - If the configuration is invalid or a
    ///   source client cannot be built
    pub fn new(config: AnalyzerConfig) -> Result<Self, AnalyzerError> {
        Self::with_cache(config, ResultCache::new())
    }

    /// Create an analyzer with the built-in sources and a pre-populated cache
    pub fn with_cache(config: AnalyzerConfig, cache: ResultCache) -> Result<Self, AnalyzerError> {
        config.validate().map_err(AnalyzerError::Config)?;
        let adapters = config
            .required_sources()
            .into_iter()
            .map(|id| build_adapter(&config, id))
            .collect::<Result<Vec<_>, _>>()?;
        Self::with_adapters(config, adapters, cache)
    }

    /// Create an analyzer around caller-supplied adapters
    ///
    /// Each adapter is wrapped with the rate limit and timeout configured
    /// for its source id.
    pub fn with_adapters(
        config: AnalyzerConfig,
        adapters: Vec<Arc<dyn SourceAdapter>>,
        cache: ResultCache,
    ) -> Result<Self, AnalyzerError> {
        config.validate().map_err(AnalyzerError::Config)?;
        let mut registry = SourceRegistry::new();
        for adapter in adapters {
            let settings = config.source_settings(adapter.id());
            registry.insert(SourceHandle::new(
                adapter,
                settings.rate_limit,
                settings.timeout(),
            ));
        }
        Ok(Self {
            config,
            sources: Arc::new(registry),
            cache: Arc::new(cache),
            cancel: CancellationToken::new(),
        })
    }

    /// The run's configuration
    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// The run's cache, e.g. for persisting it after an interrupt
    pub fn cache(&self) -> Arc<ResultCache> {
        Arc::clone(&self.cache)
    }

    /// Token that cancels the run cooperatively
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Build the resolution engine for this run
    pub fn engine(&self) -> ResolutionEngine {
        ResolutionEngine::new(
            Arc::clone(&self.sources),
            Arc::clone(&self.cache),
            self.config.retry.clone(),
            self.config.workers,
        )
        .with_cancellation(self.cancel.clone())
    }

    /// Build the detail fetcher for this run
    pub fn detail_fetcher(&self) -> Result<DetailFetcher, AnalyzerError> {
        Ok(DetailFetcher::new(
            &self.sources,
            self.config.holder_source,
            Arc::clone(&self.cache),
            self.config.retry.clone(),
            self.config.workers,
        )?
        .with_cancellation(self.cancel.clone()))
    }

    /// Build the graph builder for this run
    pub fn graph_builder(&self) -> Result<GraphBuilder, AnalyzerError> {
        Ok(GraphBuilder::new(
            &self.sources,
            self.config.neighbor_source,
            Arc::clone(&self.cache),
            self.config.retry.clone(),
            self.config.workers,
        )?
        .with_cancellation(self.cancel.clone()))
    }

    /// Resolve, enrich and expand
    ///
    /// # Errors
    ///
    /// * `AnalyzerError::Config` - If a configured source is missing or lacks
    ///   the capability its stage needs. All stages are checked before the
    ///   first lookup.
    pub async fn run(&self, ips: &[IpAddr]) -> Result<AnalysisReport, AnalyzerError> {
        let engine = self.engine();
        let fetcher = self.detail_fetcher()?;
        let builder = if self.config.build_graph {
            Some(self.graph_builder()?)
        } else {
            None
        };

        let resolutions = engine
            .resolve_bulk(ips, &self.config.source_priority)
            .await?;

        let asns: BTreeSet<u32> = resolutions.values().filter_map(|r| r.asn).collect();
        info!("Found {} unique ASNs", asns.len());

        let mut records = fetcher.fetch_details(asns.iter().copied()).await;
        for result in resolutions.values() {
            if let Some(record) = result.asn.and_then(|asn| records.get_mut(&asn)) {
                record.fill_observed(result.country.as_deref(), result.org.as_deref());
            }
        }

        let graph = match builder {
            Some(builder) => {
                let mut graph = builder
                    .build_graph(asns.iter().copied(), self.config.max_depth)
                    .await;

                let mut node_records = records.clone();
                let extra: Vec<u32> = graph
                    .nodes()
                    .keys()
                    .copied()
                    .filter(|asn| !records.contains_key(asn))
                    .collect();
                if self.config.enrich_graph_nodes && !extra.is_empty() {
                    node_records.extend(fetcher.fetch_details(extra).await);
                } else {
                    for asn in extra {
                        if let Some(record) = self.cache.get_holder(asn) {
                            node_records.insert(asn, record);
                        }
                    }
                }
                graph.attach_records(&node_records);
                graph
            }
            None => Graph::new(),
        };

        Ok(AnalysisReport {
            resolutions,
            records,
            graph,
        })
    }
}

fn build_adapter(
    config: &AnalyzerConfig,
    id: SourceId,
) -> Result<Arc<dyn SourceAdapter>, AnalyzerError> {
    let base_url = config.source_settings(id).base_url;
    let to_config = |e: LookupError| AnalyzerError::Config(format!("{id}: {e}"));
    let adapter: Arc<dyn SourceAdapter> = match id {
        SourceId::TeamCymru => Arc::new(TeamCymruSource::new()),
        SourceId::IpApi => Arc::new(match base_url {
            Some(url) => IpApiSource::with_base_url(url),
            None => IpApiSource::new(),
        }
        .map_err(to_config)?),
        SourceId::IpInfo => {
            let token = config.ipinfo_token.clone();
            Arc::new(match base_url {
                Some(url) => IpInfoSource::with_base_url(url, token),
                None => IpInfoSource::new(token),
            }
            .map_err(to_config)?)
        }
        SourceId::RipeNcc => Arc::new(match base_url {
            Some(url) => RipeSource::with_base_url(url),
            None => RipeSource::new(),
        }
        .map_err(to_config)?),
    };
    Ok(adapter)
}
