//! Core data types shared by the resolution, detail and graph stages

use crate::error::LookupError;
use crate::source::SourceId;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Holder and organization metadata for an ASN
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsnRecord {
    /// Autonomous System Number
    pub asn: u32,
    /// Registry holder string (e.g. "GOOGLE - Google LLC")
    pub holder: Option<String>,
    /// ISO country code
    pub country: Option<String>,
    /// Organization name
    pub org: Option<String>,
    /// Whether the ASN is currently announced in BGP
    pub announced: Option<bool>,
}

impl AsnRecord {
    /// A record with every metadata field absent
    pub fn unknown(asn: u32) -> Self {
        Self {
            asn,
            holder: None,
            country: None,
            org: None,
            announced: None,
        }
    }

    /// Whether any metadata is present
    pub fn is_known(&self) -> bool {
        self.holder.is_some() || self.country.is_some() || self.org.is_some()
    }

    /// Fill absent fields from data observed during IP resolution
    pub fn fill_observed(&mut self, country: Option<&str>, org: Option<&str>) {
        if self.country.is_none() {
            self.country = country.map(str::to_string);
        }
        if self.org.is_none() {
            self.org = org.map(str::to_string);
        }
    }
}

/// Successful IP to ASN answer from a single source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpLookup {
    /// Origin ASN
    pub asn: u32,
    /// Announced prefix containing the IP, when the source reports it
    pub prefix: Option<IpNet>,
    /// ISO country code
    pub country: Option<String>,
    /// Organization name
    pub org: Option<String>,
}

impl IpLookup {
    /// Create a lookup carrying only the ASN
    pub fn new(asn: u32) -> Self {
        Self {
            asn,
            prefix: None,
            country: None,
            org: None,
        }
    }
}

/// Outcome of resolving one IP address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionResult {
    /// The IP address that was resolved
    pub ip: IpAddr,
    /// Origin ASN, absent when every source failed
    pub asn: Option<u32>,
    /// Announced prefix, when known
    pub prefix: Option<IpNet>,
    /// ISO country code, when known
    pub country: Option<String>,
    /// Organization name, when known
    pub org: Option<String>,
    /// Source that produced the answer
    pub source: Option<SourceId>,
    /// Last error observed when resolution failed
    pub error: Option<LookupError>,
}

impl ResolutionResult {
    /// Build a successful result
    pub fn resolved(ip: IpAddr, source: SourceId, lookup: IpLookup) -> Self {
        Self {
            ip,
            asn: Some(lookup.asn),
            prefix: lookup.prefix,
            country: lookup.country,
            org: lookup.org,
            source: Some(source),
            error: None,
        }
    }

    /// Build a failed result carrying the last observed error
    pub fn failed(ip: IpAddr, error: LookupError) -> Self {
        Self {
            ip,
            asn: None,
            prefix: None,
            country: None,
            org: None,
            source: None,
            error: Some(error),
        }
    }

    /// Whether an ASN was found
    pub fn is_resolved(&self) -> bool {
        self.asn.is_some()
    }
}

/// Position of a neighbor relative to the queried ASN in observed AS paths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NeighborKind {
    /// Neighbor seen closer to the collector (upstream)
    Left,
    /// Neighbor seen further from the collector (downstream)
    Right,
    /// Direction could not be determined
    Uncertain,
}

/// A BGP neighbor of an ASN
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Neighbor {
    /// Neighbor ASN
    pub asn: u32,
    /// Observed direction
    pub kind: NeighborKind,
    /// Number of peers observing this adjacency
    pub power: u32,
}
