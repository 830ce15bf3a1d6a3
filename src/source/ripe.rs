//! ASN holder and neighbor lookups using the RIPEstat data API

use super::{
    classify_request_error, classify_status, http_client, Capabilities, SourceAdapter, SourceId,
};
use crate::error::LookupError;
use crate::types::{AsnRecord, Neighbor, NeighborKind};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

/// Default RIPEstat endpoint
pub const DEFAULT_RIPE_URL: &str = "https://stat.ripe.net";

/// RIPE NCC registry source
///
/// Supports holder lookup (`as-overview`) and neighbor discovery
/// (`asn-neighbours`).
#[derive(Debug, Clone)]
pub struct RipeSource {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    messages: Vec<Vec<String>>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct OverviewData {
    #[serde(default)]
    holder: Option<String>,
    #[serde(default)]
    announced: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct NeighboursData {
    #[serde(default)]
    neighbours: Vec<RawNeighbour>,
}

#[derive(Debug, Deserialize)]
struct RawNeighbour {
    asn: u32,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    power: u32,
}

impl RipeSource {
    /// Create a source against the public endpoint
    pub fn new() -> Result<Self, LookupError> {
        Self::with_base_url(DEFAULT_RIPE_URL)
    }

    /// Create a source against a custom endpoint
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, LookupError> {
        Ok(Self {
            client: http_client()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn fetch<T: DeserializeOwned>(&self, call: &str, asn: u32) -> Result<T, LookupError> {
        let url = format!("{}/data/{call}/data.json", self.base_url);
        let resource = format!("AS{asn}");
        debug!(asn, %url, "querying RIPEstat");

        let response = self
            .client
            .get(&url)
            .query(&[("resource", resource.as_str())])
            .send()
            .await
            .map_err(|e| classify_request_error(&e))?;

        if let Some(err) = classify_status(response.status()) {
            return Err(err);
        }

        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| classify_request_error(&e))?;

        if let Some(status) = envelope.status.as_deref() {
            if status != "ok" {
                let detail = envelope
                    .messages
                    .iter()
                    .filter_map(|m| m.get(1))
                    .cloned()
                    .collect::<Vec<_>>()
                    .join("; ");
                return Err(LookupError::Permanent(format!(
                    "RIPEstat {call} returned status '{status}': {detail}"
                )));
            }
        }

        envelope.data.ok_or(LookupError::NotFound)
    }
}

#[async_trait]
impl SourceAdapter for RipeSource {
    fn id(&self) -> SourceId {
        SourceId::RipeNcc
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            ip_to_asn: false,
            holder: true,
            neighbors: true,
        }
    }

    async fn resolve_neighbors(&self, asn: u32) -> Result<Vec<Neighbor>, LookupError> {
        let data: NeighboursData = self.fetch("asn-neighbours", asn).await?;
        Ok(data
            .neighbours
            .into_iter()
            .map(|n| Neighbor {
                asn: n.asn,
                kind: match n.kind.as_deref() {
                    Some("left") => NeighborKind::Left,
                    Some("right") => NeighborKind::Right,
                    _ => NeighborKind::Uncertain,
                },
                power: n.power,
            })
            .collect())
    }

    async fn resolve_holder(&self, asn: u32) -> Result<AsnRecord, LookupError> {
        let data: OverviewData = self.fetch("as-overview", asn).await?;
        let holder = data
            .holder
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty())
            .ok_or(LookupError::NotFound)?;

        Ok(AsnRecord {
            asn,
            org: org_from_holder(&holder),
            holder: Some(holder),
            country: None,
            announced: data.announced,
        })
    }
}

/// Extract the organization from a "HANDLE - Organization" holder string
fn org_from_holder(holder: &str) -> Option<String> {
    holder
        .split_once(" - ")
        .map(|(_, org)| org.trim().to_string())
        .filter(|org| !org.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_org_from_holder() {
        assert_eq!(
            org_from_holder("GOOGLE - Google LLC").as_deref(),
            Some("Google LLC")
        );
        assert_eq!(org_from_holder("CLOUDFLARENET"), None);
    }

    #[tokio::test]
    async fn test_resolve_holder() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data/as-overview/data.json"))
            .and(query_param("resource", "AS15169"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "ok",
                "messages": [],
                "data": {
                    "resource": "15169",
                    "holder": "GOOGLE - Google LLC",
                    "announced": true,
                    "block": {"resource": "15169-15359", "name": "IANA 16-bit Autonomous System (AS) Numbers Registry"}
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let source = RipeSource::with_base_url(server.uri()).unwrap();
        let record = source.resolve_holder(15169).await.unwrap();
        assert_eq!(record.asn, 15169);
        assert_eq!(record.holder.as_deref(), Some("GOOGLE - Google LLC"));
        assert_eq!(record.org.as_deref(), Some("Google LLC"));
        assert_eq!(record.announced, Some(true));
        assert!(record.country.is_none());
    }

    #[tokio::test]
    async fn test_resolve_holder_empty_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "ok",
                "data": {"resource": "4294967294", "holder": "", "announced": false}
            })))
            .mount(&server)
            .await;

        let source = RipeSource::with_base_url(server.uri()).unwrap();
        assert_eq!(
            source.resolve_holder(4_294_967_294).await,
            Err(LookupError::NotFound)
        );
    }

    #[tokio::test]
    async fn test_resolve_neighbors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data/asn-neighbours/data.json"))
            .and(query_param("resource", "AS13335"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "ok",
                "data": {
                    "neighbour_counts": {"left": 1, "right": 1, "uncertain": 1},
                    "neighbours": [
                        {"asn": 6939, "type": "left", "power": 120, "v4_peers": 100, "v6_peers": 80},
                        {"asn": 64512, "type": "right", "power": 3},
                        {"asn": 174, "type": "uncertain", "power": 1}
                    ]
                }
            })))
            .mount(&server)
            .await;

        let source = RipeSource::with_base_url(server.uri()).unwrap();
        let neighbors = source.resolve_neighbors(13335).await.unwrap();
        assert_eq!(neighbors.len(), 3);
        assert_eq!(neighbors[0].asn, 6939);
        assert_eq!(neighbors[0].kind, NeighborKind::Left);
        assert_eq!(neighbors[0].power, 120);
        assert_eq!(neighbors[1].kind, NeighborKind::Right);
        assert_eq!(neighbors[2].kind, NeighborKind::Uncertain);
    }

    #[tokio::test]
    async fn test_error_status_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "error",
                "messages": [["error", "invalid resource"]],
                "data": null
            })))
            .mount(&server)
            .await;

        let source = RipeSource::with_base_url(server.uri()).unwrap();
        let err = source.resolve_neighbors(1).await.unwrap_err();
        assert!(matches!(err, LookupError::Permanent(ref m) if m.contains("invalid resource")));
    }

    #[tokio::test]
    async fn test_ip_lookup_unsupported() {
        let source = RipeSource::with_base_url("http://127.0.0.1:9").unwrap();
        assert!(!source.capabilities().ip_to_asn);
        assert!(matches!(
            source.resolve_ip("8.8.8.8".parse().unwrap()).await,
            Err(LookupError::Permanent(_))
        ));
    }
}
