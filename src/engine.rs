//! Bulk IP to ASN resolution with cache, fallback chain and retries

use crate::cache::ResultCache;
use crate::error::{AnalyzerError, LookupError};
use crate::retry::BackoffPolicy;
use crate::source::{Operation, SourceHandle, SourceId, SourceRegistry};
use crate::types::ResolutionResult;
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashSet};
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How often (in completed items) bulk stages log progress
pub(crate) const PROGRESS_LOG_INTERVAL: usize = 100;

/// Completion counter for a long-running stage
///
/// Cheap to clone; all clones observe the same counters.
#[derive(Debug, Clone, Default)]
pub struct Progress {
    inner: Arc<ProgressInner>,
}

#[derive(Debug, Default)]
struct ProgressInner {
    total: AtomicUsize,
    completed: AtomicUsize,
}

impl Progress {
    /// Create a progress counter at 0/0
    pub fn new() -> Self {
        Self::default()
    }

    /// Items finished so far
    pub fn completed(&self) -> usize {
        self.inner.completed.load(Ordering::Relaxed)
    }

    /// Items in the current stage
    pub fn total(&self) -> usize {
        self.inner.total.load(Ordering::Relaxed)
    }

    /// Fraction completed in `[0.0, 1.0]`; an empty stage counts as done
    pub fn fraction(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            1.0
        } else {
            self.completed() as f64 / total as f64
        }
    }

    pub(crate) fn start(&self, total: usize) {
        self.inner.completed.store(0, Ordering::Relaxed);
        self.inner.total.store(total, Ordering::Relaxed);
    }

    pub(crate) fn advance(&self) -> usize {
        self.inner.completed.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Resolves IP addresses to ASNs through an ordered chain of sources
///
/// Per-IP failures are isolated: the output always has exactly one entry per
/// unique input IP, with `asn = None` and the last error for IPs no source
/// could answer.
#[derive(Debug, Clone)]
pub struct ResolutionEngine {
    sources: Arc<SourceRegistry>,
    cache: Arc<ResultCache>,
    policy: BackoffPolicy,
    workers: usize,
    progress: Progress,
    cancel: CancellationToken,
}

impl ResolutionEngine {
    /// Create an engine
    pub fn new(
        sources: Arc<SourceRegistry>,
        cache: Arc<ResultCache>,
        policy: BackoffPolicy,
        workers: usize,
    ) -> Self {
        Self {
            sources,
            cache,
            policy,
            workers: workers.max(1),
            progress: Progress::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Use a cancellation token shared with the rest of the run
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Progress handle for the current or last `resolve_bulk` call
    pub fn progress(&self) -> Progress {
        self.progress.clone()
    }

    /// Resolve every IP through `source_priority`
    ///
    /// # Errors
    ///
    /// * `AnalyzerError::Config` - If the priority list is empty, names an
    ///   unconfigured source, or names a source without IP to ASN support.
    ///   Checked before any lookup is issued.
    pub async fn resolve_bulk(
        &self,
        ips: &[IpAddr],
        source_priority: &[SourceId],
    ) -> Result<BTreeMap<IpAddr, ResolutionResult>, AnalyzerError> {
        let chain = self.sources.chain(source_priority, Operation::IpToAsn)?;

        let mut seen = HashSet::with_capacity(ips.len());
        let unique: Vec<IpAddr> = ips.iter().copied().filter(|ip| seen.insert(*ip)).collect();
        let total = unique.len();
        self.progress.start(total);
        info!(
            ips = total,
            sources = ?source_priority,
            workers = self.workers,
            "resolving IP addresses"
        );

        let chain = chain.as_slice();
        let mut lookups = stream::iter(unique)
            .map(|ip| self.resolve_one(ip, chain))
            .buffer_unordered(self.workers);

        let mut results = BTreeMap::new();
        while let Some(result) = lookups.next().await {
            let done = self.progress.advance();
            if done % PROGRESS_LOG_INTERVAL == 0 || done == total {
                info!("Processed {done}/{total} IPs");
            }
            results.insert(result.ip, result);
        }

        let failed = results.values().filter(|r| !r.is_resolved()).count();
        info!(resolved = total - failed, failed, "IP resolution finished");
        Ok(results)
    }

    async fn resolve_one(&self, ip: IpAddr, chain: &[SourceHandle]) -> ResolutionResult {
        if let Some(cached) = self.cache.get_ip(&ip) {
            debug!(%ip, source = %cached.source, "cache hit");
            return ResolutionResult::resolved(ip, cached.source, cached.lookup);
        }

        let mut last_error = LookupError::NotFound;
        for handle in chain {
            let attempt = tokio::select! {
                biased;
                () = self.cancel.cancelled() => Err(LookupError::Cancelled),
                outcome = handle.call(&self.policy, |adapter| async move {
                    adapter.resolve_ip(ip).await
                }) => outcome,
            };

            match attempt {
                Ok(lookup) => {
                    debug!(%ip, source = %handle.id(), asn = lookup.asn, "resolved");
                    self.cache.put_ip(ip, handle.id(), lookup.clone());
                    return ResolutionResult::resolved(ip, handle.id(), lookup);
                }
                Err(LookupError::Cancelled) => {
                    return ResolutionResult::failed(ip, LookupError::Cancelled);
                }
                Err(e) => {
                    debug!(%ip, source = %handle.id(), error = %e, "source failed, falling back");
                    last_error = e;
                }
            }
        }

        warn!(%ip, error = %last_error, "all sources exhausted");
        ResolutionResult::failed(ip, last_error)
    }
}
