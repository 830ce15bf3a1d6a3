//! asnmap - Bulk IP to ASN resolution with BGP neighbor graph discovery
//!
//! This library resolves batches of IP addresses to their origin ASNs through
//! a prioritized chain of public sources, enriches every ASN with holder
//! details and expands a bounded neighbor graph around them. Every source is
//! rate limited, retried with backoff and cached for the lifetime of a run.
//!
//! # Examples
//!
//! ```no_run
//! use asnmap::{Analyzer, AnalyzerConfig, SourceId};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AnalyzerConfig::builder()
//!         .source_priority([SourceId::TeamCymru, SourceId::IpApi])
//!         .max_depth(1)
//!         .build()?;
//!
//!     let analyzer = Analyzer::new(config)?;
//!     let report = analyzer.run(&["8.8.8.8".parse()?]).await?;
//!     println!("{} ASNs, {} edges", report.records.len(), report.graph.edge_count());
//!     Ok(())
//! }
//! ```

pub mod analyzer;
pub mod cache;
pub mod config;
pub mod details;
pub mod engine;
pub mod error;
pub mod graph;
pub mod rate_limit;
pub mod retry;
pub mod source;
pub mod types;

// Re-export core types for library users
pub use analyzer::{AnalysisReport, Analyzer};
pub use cache::{CacheSnapshot, CacheStats, ResultCache};
pub use config::{AnalyzerConfig, AnalyzerConfigBuilder, SourceSettings};
pub use details::DetailFetcher;
pub use engine::{Progress, ResolutionEngine};
pub use error::{AnalyzerError, LookupError};
pub use graph::{AsnEdge, AsnNode, EdgeInfo, Graph, GraphBuilder};
pub use rate_limit::{RateLimit, RateLimiter};
pub use retry::BackoffPolicy;
pub use source::{
    Capabilities, Operation, SourceAdapter, SourceHandle, SourceId, SourceRegistry,
};
pub use types::{AsnRecord, IpLookup, Neighbor, NeighborKind, ResolutionResult};
