//! End-to-end pipeline tests against in-memory sources

#![allow(clippy::unwrap_used)]

use asnmap::{
    Analyzer, AnalyzerConfig, AnalyzerError, AsnRecord, Capabilities, IpLookup, LookupError,
    Neighbor, NeighborKind, RateLimit, ResultCache, SourceAdapter, SourceId, SourceSettings,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Scripted source answering from fixed tables
struct Scripted {
    id: SourceId,
    capabilities: Capabilities,
    ips: HashMap<IpAddr, Result<IpLookup, LookupError>>,
    holders: HashMap<u32, String>,
    neighbors: HashMap<u32, Vec<u32>>,
    ip_calls: AtomicUsize,
    holder_calls: AtomicUsize,
    neighbor_calls: AtomicUsize,
}

impl Scripted {
    fn new(id: SourceId, capabilities: Capabilities) -> Self {
        Self {
            id,
            capabilities,
            ips: HashMap::new(),
            holders: HashMap::new(),
            neighbors: HashMap::new(),
            ip_calls: AtomicUsize::new(0),
            holder_calls: AtomicUsize::new(0),
            neighbor_calls: AtomicUsize::new(0),
        }
    }

    fn ip(mut self, ip: &str, answer: Result<u32, LookupError>) -> Self {
        self.ips
            .insert(ip.parse().unwrap(), answer.map(IpLookup::new));
        self
    }

    fn holder(mut self, asn: u32, holder: &str) -> Self {
        self.holders.insert(asn, holder.to_string());
        self
    }

    fn neighbors(mut self, asn: u32, neighbors: &[u32]) -> Self {
        self.neighbors.insert(asn, neighbors.to_vec());
        self
    }
}

#[async_trait]
impl SourceAdapter for Scripted {
    fn id(&self) -> SourceId {
        self.id
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    async fn resolve_ip(&self, ip: IpAddr) -> Result<IpLookup, LookupError> {
        self.ip_calls.fetch_add(1, Ordering::SeqCst);
        self.ips.get(&ip).cloned().unwrap_or(Err(LookupError::NotFound))
    }

    async fn resolve_holder(&self, asn: u32) -> Result<AsnRecord, LookupError> {
        self.holder_calls.fetch_add(1, Ordering::SeqCst);
        let holder = self.holders.get(&asn).ok_or(LookupError::NotFound)?;
        Ok(AsnRecord {
            holder: Some(holder.clone()),
            announced: Some(true),
            ..AsnRecord::unknown(asn)
        })
    }

    async fn resolve_neighbors(&self, asn: u32) -> Result<Vec<Neighbor>, LookupError> {
        self.neighbor_calls.fetch_add(1, Ordering::SeqCst);
        let found = self.neighbors.get(&asn).ok_or(LookupError::NotFound)?;
        Ok(found
            .iter()
            .map(|&asn| Neighbor {
                asn,
                kind: NeighborKind::Left,
                power: 1,
            })
            .collect())
    }
}

fn registry_source() -> Scripted {
    Scripted::new(
        SourceId::RipeNcc,
        Capabilities {
            ip_to_asn: false,
            holder: true,
            neighbors: true,
        },
    )
    .holder(15169, "GOOGLE - Google LLC")
    .holder(13335, "CLOUDFLARENET - Cloudflare, Inc.")
    .holder(6939, "HURRICANE - Hurricane Electric LLC")
    .neighbors(15169, &[6939])
    .neighbors(13335, &[6939])
    .neighbors(6939, &[15169, 13335, 174])
}

fn config() -> asnmap::AnalyzerConfigBuilder {
    let mut builder = AnalyzerConfig::builder()
        .source_priority([SourceId::TeamCymru, SourceId::IpApi])
        .max_retries(0)
        .workers(4);
    for &id in SourceId::all() {
        builder = builder.source_settings(
            id,
            SourceSettings::new(RateLimit::unlimited(), Duration::from_secs(1)),
        );
    }
    builder
}

fn ips(list: &[&str]) -> Vec<IpAddr> {
    list.iter().map(|ip| ip.parse().unwrap()).collect()
}

#[tokio::test]
async fn test_fallback_and_exhaustion_in_one_run() {
    let cymru = Arc::new(
        Scripted::new(SourceId::TeamCymru, Capabilities::IP_TO_ASN)
            .ip("8.8.8.8", Err(LookupError::Permanent("refused".to_string())))
            .ip("1.1.1.1", Ok(13335)),
    );
    let ipapi = Arc::new(
        Scripted::new(SourceId::IpApi, Capabilities::IP_TO_ASN).ip("8.8.8.8", Ok(15169)),
    );
    let ripe = Arc::new(registry_source());

    let analyzer = Analyzer::with_adapters(
        config().build().unwrap(),
        vec![cymru.clone(), ipapi.clone(), ripe.clone()],
        ResultCache::new(),
    )
    .unwrap();

    let report = analyzer
        .run(&ips(&["8.8.8.8", "1.1.1.1", "203.0.113.1"]))
        .await
        .unwrap();

    let google = &report.resolutions[&"8.8.8.8".parse::<IpAddr>().unwrap()];
    assert_eq!(google.asn, Some(15169));
    assert_eq!(google.source, Some(SourceId::IpApi));

    let cloudflare = &report.resolutions[&"1.1.1.1".parse::<IpAddr>().unwrap()];
    assert_eq!(cloudflare.source, Some(SourceId::TeamCymru));

    let missing = &report.resolutions[&"203.0.113.1".parse::<IpAddr>().unwrap()];
    assert_eq!(missing.asn, None);
    assert!(missing.error.is_some());
    assert_eq!(report.unresolved().len(), 1);

    // 1.1.1.1 short-circuits at the first source
    assert_eq!(ipapi.ip_calls.load(Ordering::SeqCst), 2);

    assert_eq!(report.records.len(), 2);
    assert_eq!(
        report.records[&15169].holder.as_deref(),
        Some("GOOGLE - Google LLC")
    );
}

#[tokio::test]
async fn test_one_result_per_unique_ip() {
    let cymru = Arc::new(
        Scripted::new(SourceId::TeamCymru, Capabilities::IP_TO_ASN)
            .ip("8.8.8.8", Ok(15169))
            .ip("8.8.4.4", Ok(15169)),
    );
    let ripe = Arc::new(registry_source());
    let config = config()
        .source_priority([SourceId::TeamCymru])
        .build_graph(false)
        .build()
        .unwrap();
    let analyzer =
        Analyzer::with_adapters(config, vec![cymru.clone(), ripe.clone()], ResultCache::new())
            .unwrap();

    let input = ips(&["8.8.8.8", "8.8.4.4", "8.8.8.8", "8.8.4.4", "8.8.8.8"]);
    let report = analyzer.run(&input).await.unwrap();

    assert_eq!(report.resolutions.len(), 2);
    assert_eq!(cymru.ip_calls.load(Ordering::SeqCst), 2);
    assert_eq!(report.ips_by_asn()[&15169].len(), 2);
    assert_eq!(report.top_asns(10), vec![(15169, 2)]);

    // One holder lookup per unique ASN, no graph stage
    assert_eq!(ripe.holder_calls.load(Ordering::SeqCst), 1);
    assert_eq!(ripe.neighbor_calls.load(Ordering::SeqCst), 0);
    assert_eq!(report.graph.node_count(), 0);
}

#[tokio::test]
async fn test_shared_neighbor_produces_single_edges() {
    let cymru = Arc::new(
        Scripted::new(SourceId::TeamCymru, Capabilities::IP_TO_ASN)
            .ip("8.8.8.8", Ok(15169))
            .ip("1.1.1.1", Ok(13335)),
    );
    let ripe = Arc::new(registry_source());
    let config = config()
        .source_priority([SourceId::TeamCymru])
        .max_depth(1)
        .build()
        .unwrap();
    let analyzer =
        Analyzer::with_adapters(config, vec![cymru, ripe.clone()], ResultCache::new()).unwrap();

    let report = analyzer.run(&ips(&["8.8.8.8", "1.1.1.1"])).await.unwrap();
    let graph = &report.graph;

    assert_eq!(graph.node_count(), 3);
    assert_eq!(graph.node(15169).unwrap().depth, 0);
    assert_eq!(graph.node(13335).unwrap().depth, 0);
    assert_eq!(graph.node(6939).unwrap().depth, 1);
    assert_eq!(graph.edge_count(), 2);
    assert!(graph.has_edge(6939, 15169));
    assert!(graph.has_edge(13335, 6939));

    // Each edge keeps what the registry reported from the seed's side
    for seed in [15169, 13335] {
        let info = graph.edge_info(seed, 6939).unwrap();
        assert_eq!(info.observed_from, seed);
        assert_eq!(info.kind, NeighborKind::Left);
        assert_eq!(info.power, 1);
    }

    // Frontier nodes at the depth limit are never expanded
    assert_eq!(ripe.neighbor_calls.load(Ordering::SeqCst), 2);

    // Non-seed nodes are not enriched unless asked
    assert!(!graph.node(6939).unwrap().record.is_known());
    assert_eq!(ripe.holder_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_enriched_graph_nodes() {
    let cymru = Arc::new(
        Scripted::new(SourceId::TeamCymru, Capabilities::IP_TO_ASN).ip("8.8.8.8", Ok(15169)),
    );
    let ripe = Arc::new(registry_source());
    let config = config()
        .source_priority([SourceId::TeamCymru])
        .max_depth(2)
        .enrich_graph_nodes(true)
        .build()
        .unwrap();
    let analyzer =
        Analyzer::with_adapters(config, vec![cymru, ripe.clone()], ResultCache::new()).unwrap();

    let report = analyzer.run(&ips(&["8.8.8.8"])).await.unwrap();
    let graph = &report.graph;

    // 15169 -> 6939 -> {13335, 174}
    assert_eq!(graph.node_count(), 4);
    assert_eq!(graph.node(174).unwrap().depth, 2);
    assert_eq!(
        graph.node(6939).unwrap().record.holder.as_deref(),
        Some("HURRICANE - Hurricane Electric LLC")
    );
    // Graph-only ASNs stay out of the per-IP records
    assert_eq!(report.records.len(), 1);
}

#[tokio::test]
async fn test_cached_run_makes_no_calls() {
    let cymru = Arc::new(
        Scripted::new(SourceId::TeamCymru, Capabilities::IP_TO_ASN).ip("8.8.8.8", Ok(15169)),
    );
    let ripe = Arc::new(registry_source());
    let build = || {
        config()
            .source_priority([SourceId::TeamCymru])
            .build()
            .unwrap()
    };

    let first = Analyzer::with_adapters(
        build(),
        vec![cymru.clone(), ripe.clone()],
        ResultCache::new(),
    )
    .unwrap();
    let report = first.run(&ips(&["8.8.8.8"])).await.unwrap();
    let snapshot = first.cache().snapshot();

    let ip_calls = cymru.ip_calls.load(Ordering::SeqCst);
    let holder_calls = ripe.holder_calls.load(Ordering::SeqCst);
    let neighbor_calls = ripe.neighbor_calls.load(Ordering::SeqCst);

    let second = Analyzer::with_adapters(
        build(),
        vec![cymru.clone(), ripe.clone()],
        ResultCache::from_snapshot(snapshot),
    )
    .unwrap();
    let resumed = second.run(&ips(&["8.8.8.8"])).await.unwrap();

    assert_eq!(cymru.ip_calls.load(Ordering::SeqCst), ip_calls);
    assert_eq!(ripe.holder_calls.load(Ordering::SeqCst), holder_calls);
    assert_eq!(ripe.neighbor_calls.load(Ordering::SeqCst), neighbor_calls);
    assert_eq!(resumed.records, report.records);
    assert_eq!(resumed.graph, report.graph);
}

#[tokio::test]
async fn test_missing_stage_source_fails_before_lookups() {
    let cymru = Arc::new(
        Scripted::new(SourceId::TeamCymru, Capabilities::IP_TO_ASN).ip("8.8.8.8", Ok(15169)),
    );
    let config = config()
        .source_priority([SourceId::TeamCymru])
        .build()
        .unwrap();
    let analyzer =
        Analyzer::with_adapters(config, vec![cymru.clone()], ResultCache::new()).unwrap();

    let err = analyzer.run(&ips(&["8.8.8.8"])).await.unwrap_err();
    assert!(matches!(err, AnalyzerError::Config(_)));
    assert_eq!(cymru.ip_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_cancelled_run_flags_remaining_ips() {
    let cymru = Arc::new(
        Scripted::new(SourceId::TeamCymru, Capabilities::IP_TO_ASN).ip("8.8.8.8", Ok(15169)),
    );
    let ripe = Arc::new(registry_source());
    let config = config()
        .source_priority([SourceId::TeamCymru])
        .build()
        .unwrap();
    let analyzer =
        Analyzer::with_adapters(config, vec![cymru.clone(), ripe], ResultCache::new()).unwrap();

    analyzer.cancellation_token().cancel();
    let report = analyzer.run(&ips(&["8.8.8.8", "9.9.9.9"])).await.unwrap();

    assert_eq!(report.resolutions.len(), 2);
    assert!(report.was_cancelled());
    assert!(report
        .resolutions
        .values()
        .all(|r| r.error == Some(LookupError::Cancelled)));
    assert_eq!(cymru.ip_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_report_serializes_to_json() {
    let cymru = Arc::new(
        Scripted::new(SourceId::TeamCymru, Capabilities::IP_TO_ASN).ip("8.8.8.8", Ok(15169)),
    );
    let ripe = Arc::new(registry_source());
    let config = config()
        .source_priority([SourceId::TeamCymru])
        .build()
        .unwrap();
    let analyzer = Analyzer::with_adapters(config, vec![cymru, ripe], ResultCache::new()).unwrap();

    let report = analyzer
        .run(&ips(&["8.8.8.8", "203.0.113.9"]))
        .await
        .unwrap();
    let json = serde_json::to_value(&report).unwrap();

    assert_eq!(json["resolutions"]["8.8.8.8"]["asn"], 15169);
    assert_eq!(json["resolutions"]["8.8.8.8"]["source"], "team_cymru");
    assert_eq!(json["resolutions"]["203.0.113.9"]["error"]["kind"], "not_found");
    assert!(json["records"]["15169"].is_object());
}
