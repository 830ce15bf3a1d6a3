//! IP to ASN lookup using Team Cymru's DNS whois service

use super::{Capabilities, SourceAdapter, SourceId};
use crate::error::LookupError;
use crate::types::IpLookup;
use async_trait::async_trait;
use hickory_resolver::config::ResolverConfig;
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::TokioResolver;
use ipnet::IpNet;
use std::fmt::Write as _;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use tracing::debug;

/// Team Cymru origin lookup over DNS TXT records
///
/// Supports IP to ASN only. IPv4 addresses are queried under
/// `origin.asn.cymru.com`, IPv6 addresses under `origin6.asn.cymru.com`.
#[derive(Clone)]
pub struct TeamCymruSource {
    resolver: Arc<TokioResolver>,
}

impl TeamCymruSource {
    /// Create a source backed by Cloudflare's public resolvers
    pub fn new() -> Self {
        Self::with_resolver(create_default_resolver())
    }

    /// Create a source using a specific DNS resolver
    pub fn with_resolver(resolver: Arc<TokioResolver>) -> Self {
        Self { resolver }
    }
}

impl Default for TeamCymruSource {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TeamCymruSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TeamCymruSource").finish_non_exhaustive()
    }
}

#[async_trait]
impl SourceAdapter for TeamCymruSource {
    fn id(&self) -> SourceId {
        SourceId::TeamCymru
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::IP_TO_ASN
    }

    async fn resolve_ip(&self, ip: IpAddr) -> Result<IpLookup, LookupError> {
        // Special-use space has no origin AS; don't spend a query on it
        if is_special_use(&ip) {
            return Err(LookupError::NotFound);
        }

        let query = origin_query(&ip);
        debug!(%ip, %query, "querying Team Cymru");

        let lookup = self.resolver.txt_lookup(query).await.map_err(|e| {
            if e.is_no_records_found() {
                LookupError::NotFound
            } else {
                LookupError::Transient(format!("DNS resolution failed: {e}"))
            }
        })?;

        let record = lookup.iter().next().ok_or(LookupError::NotFound)?;

        let txt_data = record
            .iter()
            .map(|data| String::from_utf8_lossy(data))
            .collect::<Vec<_>>()
            .join("");

        parse_origin_txt(&txt_data)
    }
}

/// Create a default DNS resolver for Team Cymru lookups
pub fn create_default_resolver() -> Arc<TokioResolver> {
    Arc::new(
        TokioResolver::builder_with_config(
            ResolverConfig::cloudflare(),
            TokioConnectionProvider::default(),
        )
        .build(),
    )
}

/// Build the origin query name for an address
pub(crate) fn origin_query(ip: &IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => {
            let octets = v4.octets();
            format!(
                "{}.{}.{}.{}.origin.asn.cymru.com",
                octets[3], octets[2], octets[1], octets[0]
            )
        }
        IpAddr::V6(v6) => {
            let mut query = String::with_capacity(72 + 22);
            for byte in v6.octets().iter().rev() {
                let _ = write!(query, "{:x}.{:x}.", byte & 0x0f, byte >> 4);
            }
            query.push_str("origin6.asn.cymru.com");
            query
        }
    }
}

/// Parse a `"ASN | prefix | CC | registry | allocated"` answer
///
/// Multi-origin answers list several ASNs in the first field; the first one
/// is used.
pub(crate) fn parse_origin_txt(txt: &str) -> Result<IpLookup, LookupError> {
    let parts: Vec<&str> = txt.split('|').map(str::trim).collect();
    if parts.len() < 3 {
        return Err(LookupError::Permanent(format!(
            "invalid Team Cymru answer: {txt}"
        )));
    }

    let asn = parts[0]
        .split_whitespace()
        .next()
        .and_then(|first| first.parse::<u32>().ok())
        .ok_or_else(|| LookupError::Permanent(format!("invalid ASN field: {}", parts[0])))?;

    let prefix = parts[1].parse::<IpNet>().ok();
    let country = Some(parts[2])
        .filter(|cc| !cc.is_empty())
        .map(str::to_string);

    Ok(IpLookup {
        asn,
        prefix,
        country,
        org: None,
    })
}

fn is_special_use(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_special_v4(v4),
        IpAddr::V6(v6) => is_special_v6(v6),
    }
}

fn is_special_v4(ip: &Ipv4Addr) -> bool {
    let octets = ip.octets();
    let cgnat = octets[0] == 100 && (octets[1] & 0xc0) == 64;
    ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_broadcast()
        || ip.is_documentation()
        || ip.is_unspecified()
        || cgnat
}

fn is_special_v6(ip: &Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    let unique_local = (first & 0xfe00) == 0xfc00;
    let link_local = (first & 0xffc0) == 0xfe80;
    let documentation = first == 0x2001 && ip.segments()[1] == 0x0db8;
    ip.is_loopback() || ip.is_unspecified() || unique_local || link_local || documentation
}
