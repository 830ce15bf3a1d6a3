//! IP to ASN lookup using the ip-api.com JSON API

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

/// Default ip-api.com endpoint (the free tier is HTTP only)
pub const DEFAULT_IPAPI_URL: &str = "http://ip-api.com";

const FIELDS: &str = "status,message,countryCode,as,query";

/// ip-api.com geolocation source
#[derive(Debug, Clone)]
pub struct IpApiSource {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpApiResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    country_code: Option<String>,
    #[serde(default, rename = "as")]
    as_field: Option<String>,
}

impl IpApiSource {
    /// Create a source against the public endpoint
    pub fn new() -> Result<Self, LookupError> {
        Self::with_base_url(DEFAULT_IPAPI_URL)
    }

    /// Create a source against a custom endpoint
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, LookupError> {
        Ok(Self {
            client: http_client()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl SourceAdapter for IpApiSource {
    fn id(&self) -> SourceId {
        SourceId::IpApi
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::IP_TO_ASN
    }

    async fn resolve_ip(&self, ip: IpAddr) -> Result<IpLookup, LookupError> {
        let url = format!("{}/json/{ip}", self.base_url);
        debug!(%ip, %url, "querying ip-api");

        let response = self
            .client
            .get(&url)
            .query(&[("fields", FIELDS)])
            .send()
            .await
            .map_err(|e| classify_request_error(&e))?;

        if let Some(err) = classify_status(response.status()) {
            return Err(err);
        }

        let body: IpApiResponse = response
            .json()
            .await
            .map_err(|e| classify_request_error(&e))?;

        interpret(body)
    }
}

fn interpret(body: IpApiResponse) -> Result<IpLookup, LookupError> {
    if body.status != "success" {
        let message = body.message.unwrap_or_default();
        return Err(match message.as_str() {
            "private range" | "reserved range" | "invalid query" => LookupError::NotFound,
            _ => LookupError::Permanent(format!("ip-api failure: {message}")),
        });
    }

    let as_field = body.as_field.unwrap_or_default();
    let (asn, org) = parse_as_field(&as_field).ok_or(LookupError::NotFound)?;

    Ok(IpLookup {
        asn,
        prefix: None,
        country: body.country_code.filter(|cc| !cc.is_empty()),
        org,
    })
}
