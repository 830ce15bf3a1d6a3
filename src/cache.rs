//! Run-scoped result cache
//!
//! Holds the three lookup kinds used by a run (IP to ASN, ASN holder, ASN
//! neighbors). Entries are never evicted during a run. The cache can be
//! written to a JSON snapshot and reloaded so an interrupted run can resume
//! without repeating completed lookups.

use crate::error::AnalyzerError;
use crate::source::SourceId;
use crate::types::{AsnRecord, IpLookup, Neighbor};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;
use std::time::SystemTime;

/// A cached value with the time it was fetched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<V> {
    /// Cached value
    pub value: V,
    /// When the value was fetched from upstream
    pub fetched_at: SystemTime,
}

impl<V> CacheEntry<V> {
    fn now(value: V) -> Self {
        Self {
            value,
            fetched_at: SystemTime::now(),
        }
    }
}

/// Cached IP to ASN answer along with the source that produced it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedIp {
    /// Source that answered
    pub source: SourceId,
    /// The answer
    pub lookup: IpLookup,
}

/// Thread-safe cache shared by every stage of a run
///
/// Backed by sharded maps: operations on different keys do not contend, and
/// concurrent writes to the same key are last-write-wins.
#[derive(Debug, Default)]
pub struct ResultCache {
    ips: DashMap<IpAddr, CacheEntry<CachedIp>>,
    holders: DashMap<u32, CacheEntry<AsnRecord>>,
    neighbors: DashMap<u32, CacheEntry<Vec<Neighbor>>>,
}

/// Entry counts per lookup kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    /// Cached IP to ASN answers
    pub ips: usize,
    /// Cached holder records
    pub holders: usize,
    /// Cached neighbor lists
    pub neighbors: usize,
}

impl CacheStats {
    /// Total number of entries
    pub fn total(&self) -> usize {
        self.ips + self.holders + self.neighbors
    }
}

/// Serializable copy of a cache
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheSnapshot {
    /// IP to ASN entries
    #[serde(default)]
    pub ips: Vec<(IpAddr, CacheEntry<CachedIp>)>,
    /// Holder entries
    #[serde(default)]
    pub holders: Vec<(u32, CacheEntry<AsnRecord>)>,
    /// Neighbor entries
    #[serde(default)]
    pub neighbors: Vec<(u32, CacheEntry<Vec<Neighbor>>)>,
}

impl ResultCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a cached IP to ASN answer
    pub fn get_ip(&self, ip: &IpAddr) -> Option<CachedIp> {
        self.ips.get(ip).map(|entry| entry.value.clone())
    }

    /// Store an IP to ASN answer
    pub fn put_ip(&self, ip: IpAddr, source: SourceId, lookup: IpLookup) {
        self.ips
            .insert(ip, CacheEntry::now(CachedIp { source, lookup }));
    }

    /// Look up a cached holder record
    pub fn get_holder(&self, asn: u32) -> Option<AsnRecord> {
        self.holders.get(&asn).map(|entry| entry.value.clone())
    }

    /// Store a holder record
    pub fn put_holder(&self, record: AsnRecord) {
        self.holders.insert(record.asn, CacheEntry::now(record));
    }

    /// Look up a cached neighbor list
    pub fn get_neighbors(&self, asn: u32) -> Option<Vec<Neighbor>> {
        self.neighbors.get(&asn).map(|entry| entry.value.clone())
    }

    /// Store a neighbor list
    pub fn put_neighbors(&self, asn: u32, neighbors: Vec<Neighbor>) {
        self.neighbors.insert(asn, CacheEntry::now(neighbors));
    }

    /// Entry counts per kind
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            ips: self.ips.len(),
            holders: self.holders.len(),
            neighbors: self.neighbors.len(),
        }
    }

    /// Check whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.stats().total() == 0
    }

    /// Copy the current contents into a serializable snapshot
    pub fn snapshot(&self) -> CacheSnapshot {
        CacheSnapshot {
            ips: self
                .ips
                .iter()
                .map(|e| (*e.key(), e.value().clone()))
                .collect(),
            holders: self
                .holders
                .iter()
                .map(|e| (*e.key(), e.value().clone()))
                .collect(),
            neighbors: self
                .neighbors
                .iter()
                .map(|e| (*e.key(), e.value().clone()))
                .collect(),
        }
    }

    /// Rebuild a cache from a snapshot, keeping original fetch timestamps
    pub fn from_snapshot(snapshot: CacheSnapshot) -> Self {
        Self {
            ips: snapshot.ips.into_iter().collect(),
            holders: snapshot.holders.into_iter().collect(),
            neighbors: snapshot.neighbors.into_iter().collect(),
        }
    }

    /// Write a JSON snapshot to `path`
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<(), AnalyzerError> {
        let json = serde_json::to_vec(&self.snapshot())?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load a cache from a JSON snapshot at `path`
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, AnalyzerError> {
        let bytes = std::fs::read(path)?;
        let snapshot: CacheSnapshot = serde_json::from_slice(&bytes)?;
        Ok(Self::from_snapshot(snapshot))
    }
}
