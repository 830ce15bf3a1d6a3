//! Rate-limited, timeout-bounded dispatch to configured sources

use super::{Operation, SourceAdapter, SourceId};
use crate::error::{AnalyzerError, LookupError};
use crate::rate_limit::{RateLimit, RateLimiter};
use crate::retry::BackoffPolicy;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// An adapter together with its rate limiter and per-call timeout
///
/// One handle exists per source; every stage that talks to the source goes
/// through the same handle and therefore the same limiter.
#[derive(Clone)]
pub struct SourceHandle {
    adapter: Arc<dyn SourceAdapter>,
    limiter: Arc<RateLimiter>,
    timeout: Duration,
}

impl SourceHandle {
    /// Wrap an adapter
    pub fn new(adapter: Arc<dyn SourceAdapter>, limit: RateLimit, timeout: Duration) -> Self {
        Self {
            adapter,
            limiter: Arc::new(RateLimiter::new(limit)),
            timeout,
        }
    }

    /// Source identifier
    pub fn id(&self) -> SourceId {
        self.adapter.id()
    }

    /// Whether the wrapped adapter supports an operation
    pub fn supports(&self, operation: Operation) -> bool {
        self.adapter.capabilities().supports(operation)
    }

    /// The shared limiter for this source
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Run one lookup with rate limiting, timeout and transient retries
    ///
    /// Every attempt acquires a limiter slot first. An attempt that exceeds
    /// the timeout counts as a transient failure. Transient failures are
    /// retried according to `policy`; any other outcome is returned as is.
    pub async fn call<T, F, Fut>(&self, policy: &BackoffPolicy, op: F) -> Result<T, LookupError>
    where
        F: Fn(Arc<dyn SourceAdapter>) -> Fut,
        Fut: Future<Output = Result<T, LookupError>>,
    {
        let mut retries = 0;
        loop {
            self.limiter.acquire().await;

            let outcome = match tokio::time::timeout(self.timeout, op(Arc::clone(&self.adapter)))
                .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(LookupError::Transient(format!(
                    "timed out after {}ms",
                    self.timeout.as_millis()
                ))),
            };

            match outcome {
                Err(e) if e.is_transient() && retries < policy.max_retries => {
                    let delay = policy.delay_for(retries);
                    retries += 1;
                    debug!(
                        source = %self.id(),
                        retry = retries,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "transient failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }
}

impl std::fmt::Debug for SourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceHandle")
            .field("id", &self.id())
            .field("limit", &self.limiter.limit())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// The set of sources available to a run, keyed by identifier
#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    handles: HashMap<SourceId, SourceHandle>,
}

impl SourceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handle, replacing any existing handle for the same source
    pub fn insert(&mut self, handle: SourceHandle) {
        self.handles.insert(handle.id(), handle);
    }

    /// Look up a handle
    pub fn get(&self, id: SourceId) -> Option<&SourceHandle> {
        self.handles.get(&id)
    }

    /// Number of registered sources
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether no source is registered
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Resolve a source for an operation, failing with a configuration error
    /// when it is missing or does not support the operation
    pub fn require(
        &self,
        id: SourceId,
        operation: Operation,
    ) -> Result<&SourceHandle, AnalyzerError> {
        let handle = self
            .get(id)
            .ok_or_else(|| AnalyzerError::Config(format!("source '{id}' is not configured")))?;
        if !handle.supports(operation) {
            return Err(AnalyzerError::Config(format!(
                "source '{id}' does not support {operation}"
            )));
        }
        Ok(handle)
    }

    /// Resolve an ordered fallback chain for an operation
    pub fn chain(
        &self,
        order: &[SourceId],
        operation: Operation,
    ) -> Result<Vec<SourceHandle>, AnalyzerError> {
        if order.is_empty() {
            return Err(AnalyzerError::Config(
                "source priority list is empty".to_string(),
            ));
        }
        order
            .iter()
            .map(|id| self.require(*id, operation).cloned())
            .collect()
    }
}
