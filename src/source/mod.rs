//! Upstream lookup sources
//!
//! Each source implements [`SourceAdapter`] for the subset of lookups it
//! actually supports. Callers discover support through
//! [`SourceAdapter::capabilities`] instead of inspecting concrete types.

pub mod ipapi;
pub mod ipinfo;
pub mod registry;
pub mod ripe;
pub mod team_cymru;

pub use ipapi::IpApiSource;
pub use ipinfo::IpInfoSource;
pub use registry::{SourceHandle, SourceRegistry};
pub use ripe::RipeSource;
pub use team_cymru::TeamCymruSource;

use crate::error::LookupError;
use crate::types::{AsnRecord, IpLookup, Neighbor};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// Identifier of an upstream source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SourceId {
    /// Team Cymru IP to ASN DNS service
    #[serde(rename = "team_cymru")]
    TeamCymru,
    /// ip-api.com geolocation API
    #[serde(rename = "ipapi")]
    IpApi,
    /// ipinfo.io API
    #[serde(rename = "ipinfo")]
    IpInfo,
    /// RIPE NCC RIPEstat data API
    #[serde(rename = "ripe_ncc")]
    RipeNcc,
}

impl SourceId {
    /// Stable identifier used in configuration and output
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceId::TeamCymru => "team_cymru",
            SourceId::IpApi => "ipapi",
            SourceId::IpInfo => "ipinfo",
            SourceId::RipeNcc => "ripe_ncc",
        }
    }

    /// Get all known sources
    pub fn all() -> &'static [SourceId] {
        &[
            SourceId::TeamCymru,
            SourceId::IpApi,
            SourceId::IpInfo,
            SourceId::RipeNcc,
        ]
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "team_cymru" | "cymru" => Ok(SourceId::TeamCymru),
            "ipapi" | "ip_api" => Ok(SourceId::IpApi),
            "ipinfo" => Ok(SourceId::IpInfo),
            "ripe_ncc" | "ripe" | "ripestat" => Ok(SourceId::RipeNcc),
            other => Err(format!("unknown source '{other}'")),
        }
    }
}

/// A lookup operation a source may support
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// IP address to origin ASN
    IpToAsn,
    /// ASN to holder metadata
    Holder,
    /// ASN to BGP neighbors
    Neighbors,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::IpToAsn => "IP to ASN lookup",
            Operation::Holder => "ASN holder lookup",
            Operation::Neighbors => "neighbor discovery",
        })
    }
}

/// Set of operations a source supports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// Supports [`SourceAdapter::resolve_ip`]
    pub ip_to_asn: bool,
    /// Supports [`SourceAdapter::resolve_holder`]
    pub holder: bool,
    /// Supports [`SourceAdapter::resolve_neighbors`]
    pub neighbors: bool,
}

impl Capabilities {
    /// Capabilities of an IP to ASN only source
    pub const IP_TO_ASN: Capabilities = Capabilities {
        ip_to_asn: true,
        holder: false,
        neighbors: false,
    };

    /// Check whether an operation is supported
    pub fn supports(&self, operation: Operation) -> bool {
        match operation {
            Operation::IpToAsn => self.ip_to_asn,
            Operation::Holder => self.holder,
            Operation::Neighbors => self.neighbors,
        }
    }
}

/// A single upstream lookup source
///
/// Every invocation issues exactly one outbound query. Operations a source
/// does not implement return [`LookupError::Permanent`].
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Identifier of this source
    fn id(&self) -> SourceId;

    /// Operations this source supports
    fn capabilities(&self) -> Capabilities;

    /// Resolve the origin ASN of an IP address
    async fn resolve_ip(&self, ip: IpAddr) -> Result<IpLookup, LookupError> {
        let _ = ip;
        Err(LookupError::unsupported("IP to ASN lookup"))
    }

    /// Discover the BGP neighbors of an ASN
    async fn resolve_neighbors(&self, asn: u32) -> Result<Vec<Neighbor>, LookupError> {
        let _ = asn;
        Err(LookupError::unsupported("neighbor discovery"))
    }

    /// Fetch holder metadata for an ASN
    async fn resolve_holder(&self, asn: u32) -> Result<AsnRecord, LookupError> {
        let _ = asn;
        Err(LookupError::unsupported("ASN holder lookup"))
    }
}

/// Map an HTTP status to a lookup error
///
/// Returns `None` for success statuses.
pub(crate) fn classify_status(status: reqwest::StatusCode) -> Option<LookupError> {
    if status.is_success() {
        return None;
    }
    let code = status.as_u16();
    Some(match code {
        404 => LookupError::NotFound,
        408 | 429 => LookupError::Transient(format!("HTTP {code}")),
        _ if status.is_server_error() => LookupError::Transient(format!("HTTP {code}")),
        _ => LookupError::Permanent(format!("HTTP {code}")),
    })
}

/// Map a transport error from reqwest to a lookup error
pub(crate) fn classify_request_error(e: &reqwest::Error) -> LookupError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        LookupError::Transient(e.to_string())
    } else if e.is_decode() || e.is_body() {
        LookupError::Permanent(format!("undecodable response: {e}"))
    } else if let Some(status) = e.status() {
        classify_status(status).unwrap_or_else(|| LookupError::Transient(e.to_string()))
    } else {
        LookupError::Transient(e.to_string())
    }
}

/// Build the shared HTTP client used by the HTTP sources
pub(crate) fn http_client() -> Result<reqwest::Client, LookupError> {
    reqwest::Client::builder()
        .user_agent(concat!("asnmap/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| LookupError::Permanent(format!("failed to build HTTP client: {e}")))
}

/// Parse an "AS15169 Google LLC" style string into ASN and organization
pub(crate) fn parse_as_field(field: &str) -> Option<(u32, Option<String>)> {
    let field = field.trim();
    let (number, rest) = match field.split_once(char::is_whitespace) {
        Some((number, rest)) => (number, rest.trim()),
        None => (field, ""),
    };
    let number = number
        .strip_prefix("AS")
        .or_else(|| number.strip_prefix("as"))
        .unwrap_or(number);
    let asn = number.parse::<u32>().ok()?;
    let org = (!rest.is_empty()).then(|| rest.to_string());
    Some((asn, org))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_id_round_trip_names() {
        for id in SourceId::all() {
            assert_eq!(id.as_str().parse::<SourceId>().unwrap(), *id);
        }
        assert_eq!("RIPE".parse::<SourceId>().unwrap(), SourceId::RipeNcc);
        assert_eq!("ip-api".parse::<SourceId>().unwrap(), SourceId::IpApi);
        assert!("maxmind".parse::<SourceId>().is_err());
    }

    #[test]
    fn test_source_id_serde_names() {
        let json = serde_json::to_string(&SourceId::IpApi).unwrap();
        assert_eq!(json, "\"ipapi\"");
        let parsed: SourceId = serde_json::from_str("\"team_cymru\"").unwrap();
        assert_eq!(parsed, SourceId::TeamCymru);
    }

    #[test]
    fn test_capabilities() {
        let caps = Capabilities::IP_TO_ASN;
        assert!(caps.supports(Operation::IpToAsn));
        assert!(!caps.supports(Operation::Holder));
        assert!(!caps.supports(Operation::Neighbors));
    }

    #[test]
    fn test_classify_status() {
        use reqwest::StatusCode;
        assert!(classify_status(StatusCode::OK).is_none());
        assert_eq!(
            classify_status(StatusCode::NOT_FOUND),
            Some(LookupError::NotFound)
        );
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS)
            .unwrap()
            .is_transient());
        assert!(classify_status(StatusCode::BAD_GATEWAY)
            .unwrap()
            .is_transient());
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN),
            Some(LookupError::Permanent(_))
        ));
    }

    #[test]
    fn test_parse_as_field() {
        assert_eq!(
            parse_as_field("AS15169 Google LLC"),
            Some((15169, Some("Google LLC".to_string())))
        );
        assert_eq!(parse_as_field("AS13335"), Some((13335, None)));
        assert_eq!(parse_as_field("3356 Level 3"), Some((3356, Some("Level 3".to_string()))));
        assert_eq!(parse_as_field(""), None);
        assert_eq!(parse_as_field("ASXYZ Foo"), None);
    }

    struct HolderOnly;

    #[async_trait]
    impl SourceAdapter for HolderOnly {
        fn id(&self) -> SourceId {
            SourceId::RipeNcc
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities {
                holder: true,
                ..Capabilities::default()
            }
        }

        async fn resolve_holder(&self, asn: u32) -> Result<AsnRecord, LookupError> {
            Ok(AsnRecord::unknown(asn))
        }
    }

    #[tokio::test]
    async fn test_default_operations_are_unsupported() {
        let source = HolderOnly;
        let ip: IpAddr = "8.8.8.8".parse().unwrap();
        assert!(matches!(
            source.resolve_ip(ip).await,
            Err(LookupError::Permanent(_))
        ));
        assert!(matches!(
            source.resolve_neighbors(15169).await,
            Err(LookupError::Permanent(_))
        ));
        assert!(source.resolve_holder(15169).await.is_ok());
    }
}
