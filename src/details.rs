//! Holder details for resolved ASNs

use crate::cache::ResultCache;
use crate::engine::{Progress, PROGRESS_LOG_INTERVAL};
use crate::error::{AnalyzerError, LookupError};
use crate::retry::BackoffPolicy;
use crate::source::{Operation, SourceHandle, SourceId, SourceRegistry};
use crate::types::AsnRecord;
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Fetches one holder record per unique ASN through the registry source
///
/// Every requested ASN gets a record. ASNs whose details are unavailable get
/// a record with absent fields.
#[derive(Debug, Clone)]
pub struct DetailFetcher {
    handle: SourceHandle,
    cache: Arc<ResultCache>,
    policy: BackoffPolicy,
    workers: usize,
    progress: Progress,
    cancel: CancellationToken,
}

impl DetailFetcher {
    /// Create a fetcher using `source` from the registry
    ///
    /// # Errors
    ///
    /// * `AnalyzerError::Config` - If the source is not configured or does
    ///   not support holder lookups
    pub fn new(
        sources: &SourceRegistry,
        source: SourceId,
        cache: Arc<ResultCache>,
        policy: BackoffPolicy,
        workers: usize,
    ) -> Result<Self, AnalyzerError> {
        let handle = sources.require(source, Operation::Holder)?.clone();
        Ok(Self {
            handle,
            cache,
            policy,
            workers: workers.max(1),
            progress: Progress::new(),
            cancel: CancellationToken::new(),
        })
    }

    /// Use a cancellation token shared with the rest of the run
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Progress handle for the current or last `fetch_details` call
    pub fn progress(&self) -> Progress {
        self.progress.clone()
    }

    /// Fetch details for a set of ASNs
    pub async fn fetch_details(
        &self,
        asns: impl IntoIterator<Item = u32>,
    ) -> BTreeMap<u32, AsnRecord> {
        let unique: BTreeSet<u32> = asns.into_iter().collect();
        let total = unique.len();
        self.progress.start(total);
        info!(asns = total, source = %self.handle.id(), "fetching ASN details");

        let mut fetches = stream::iter(unique)
            .map(|asn| self.fetch_one(asn))
            .buffer_unordered(self.workers);

        let mut records = BTreeMap::new();
        while let Some(record) = fetches.next().await {
            let done = self.progress.advance();
            if done % PROGRESS_LOG_INTERVAL == 0 || done == total {
                info!("Fetched details for {done}/{total} ASNs");
            }
            records.insert(record.asn, record);
        }
        records
    }

    async fn fetch_one(&self, asn: u32) -> AsnRecord {
        if let Some(record) = self.cache.get_holder(asn) {
            return record;
        }

        let attempt = tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(LookupError::Cancelled),
            outcome = self.handle.call(&self.policy, |adapter| async move {
                adapter.resolve_holder(asn).await
            }) => outcome,
        };

        match attempt {
            Ok(mut record) => {
                // Adapters answer for the ASN they were asked about
                record.asn = asn;
                self.cache.put_holder(record.clone());
                record
            }
            Err(LookupError::NotFound) => {
                debug!(asn, "no holder record");
                let record = AsnRecord::unknown(asn);
                self.cache.put_holder(record.clone());
                record
            }
            Err(e) => {
                // Not cached, so a resumed run asks again
                debug!(asn, error = %e, "holder lookup failed");
                AsnRecord::unknown(asn)
            }
        }
    }
}
