//! IP to ASN lookup using the ipinfo.io API

use super::{
    classify_request_error, classify_status, http_client, parse_as_field, Capabilities,
    SourceAdapter, SourceId,
};
use crate::error::LookupError;
use crate::types::IpLookup;
use async_trait::async_trait;
use serde::Deserialize;
use std::net::IpAddr;
use tracing::debug;

/// Default ipinfo.io endpoint
pub const DEFAULT_IPINFO_URL: &str = "https://ipinfo.io";

/// ipinfo.io source
///
/// Works without a token at a low daily quota; a token raises the quota.
#[derive(Debug, Clone)]
pub struct IpInfoSource {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IpInfoResponse {
    #[serde(default)]
    org: Option<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    bogon: bool,
}

impl IpInfoSource {
    /// Create a source against the public endpoint
    pub fn new(token: Option<String>) -> Result<Self, LookupError> {
        Self::with_base_url(DEFAULT_IPINFO_URL, token)
    }

    /// Create a source against a custom endpoint
    pub fn with_base_url(
        base_url: impl Into<String>,
        token: Option<String>,
    ) -> Result<Self, LookupError> {
        Ok(Self {
            client: http_client()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
        })
    }
}

#[async_trait]
impl SourceAdapter for IpInfoSource {
    fn id(&self) -> SourceId {
        SourceId::IpInfo
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::IP_TO_ASN
    }

    async fn resolve_ip(&self, ip: IpAddr) -> Result<IpLookup, LookupError> {
        let url = format!("{}/{ip}/json", self.base_url);
        debug!(%ip, %url, "querying ipinfo");

        let mut request = self.client.get(&url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| classify_request_error(&e))?;

        if let Some(err) = classify_status(response.status()) {
            return Err(err);
        }

        let body: IpInfoResponse = response
            .json()
            .await
            .map_err(|e| classify_request_error(&e))?;

        if body.bogon {
            return Err(LookupError::NotFound);
        }

        let org = body.org.unwrap_or_default();
        let (asn, org) = parse_as_field(&org).ok_or(LookupError::NotFound)?;

        Ok(IpLookup {
            asn,
            prefix: None,
            country: body.country.filter(|cc| !cc.is_empty()),
            org,
        })
    }
}
