//! Bounded breadth-first discovery of the BGP neighbor graph

use crate::cache::ResultCache;
use crate::engine::Progress;
use crate::error::{AnalyzerError, LookupError};
use crate::retry::BackoffPolicy;
use crate::source::{Operation, SourceHandle, SourceId, SourceRegistry};
use crate::types::{AsnRecord, Neighbor, NeighborKind};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// An ASN in the graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsnNode {
    /// Autonomous System Number
    pub asn: u32,
    /// BFS distance from the nearest seed
    pub depth: u32,
    /// Holder details (fields absent when not fetched)
    pub record: AsnRecord,
}

/// An undirected peering edge, stored with the lower ASN first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AsnEdge {
    a: u32,
    b: u32,
}

impl AsnEdge {
    /// Canonical edge between two ASNs; `None` for a self-loop
    pub fn new(x: u32, y: u32) -> Option<Self> {
        match x.cmp(&y) {
            std::cmp::Ordering::Less => Some(Self { a: x, b: y }),
            std::cmp::Ordering::Greater => Some(Self { a: y, b: x }),
            std::cmp::Ordering::Equal => None,
        }
    }

    /// Both endpoints, lower ASN first
    pub fn endpoints(&self) -> (u32, u32) {
        (self.a, self.b)
    }

}

/// What the registry reported about an edge when it was first discovered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeInfo {
    /// ASN whose neighbor list contained the edge
    pub observed_from: u32,
    /// Position of the neighbor relative to `observed_from`
    pub kind: NeighborKind,
    /// Number of peers observing the adjacency
    pub power: u32,
}

/// ASN-level peering graph
///
/// Every edge endpoint is a node, and nodes are unique by ASN.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Graph {
    nodes: BTreeMap<u32, AsnNode>,
    #[serde(with = "edge_list")]
    edges: BTreeMap<AsnEdge, EdgeInfo>,
}

impl Graph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Nodes keyed by ASN
    pub fn nodes(&self) -> &BTreeMap<u32, AsnNode> {
        &self.nodes
    }

    /// Canonical edges with what was first reported about each
    pub fn edges(&self) -> &BTreeMap<AsnEdge, EdgeInfo> {
        &self.edges
    }

    /// Look up a node
    pub fn node(&self, asn: u32) -> Option<&AsnNode> {
        self.nodes.get(&asn)
    }

    /// Whether an edge between two ASNs exists, in either direction
    pub fn has_edge(&self, x: u32, y: u32) -> bool {
        AsnEdge::new(x, y).is_some_and(|edge| self.edges.contains_key(&edge))
    }

    /// Kind and power of the edge between two ASNs, in either direction
    pub fn edge_info(&self, x: u32, y: u32) -> Option<&EdgeInfo> {
        AsnEdge::new(x, y).and_then(|edge| self.edges.get(&edge))
    }

    /// Number of nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of edges
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Fill node records from fetched details; nodes without one keep theirs
    pub fn attach_records(&mut self, records: &BTreeMap<u32, AsnRecord>) {
        for (asn, node) in &mut self.nodes {
            if let Some(record) = records.get(asn) {
                node.record = record.clone();
            }
        }
    }

    /// Insert a node at `depth` unless the ASN is already known.
    /// Returns whether the node was added.
    fn insert_node(&mut self, asn: u32, depth: u32) -> bool {
        if self.nodes.contains_key(&asn) {
            return false;
        }
        self.nodes.insert(
            asn,
            AsnNode {
                asn,
                depth,
                record: AsnRecord::unknown(asn),
            },
        );
        true
    }

    /// Record the edge from `asn` to `neighbor`. The first report of an
    /// edge is kept when both directions are seen.
    fn insert_edge(&mut self, asn: u32, neighbor: &Neighbor) {
        if let Some(edge) = AsnEdge::new(asn, neighbor.asn) {
            self.edges.entry(edge).or_insert(EdgeInfo {
                observed_from: asn,
                kind: neighbor.kind,
                power: neighbor.power,
            });
        }
    }
}

/// Edges serialize as a flat list of `{a, b, observed_from, kind, power}`
mod edge_list {
    use super::{AsnEdge, EdgeInfo};
    use crate::types::NeighborKind;
    use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    #[derive(Serialize, Deserialize)]
    struct EdgeRecord {
        a: u32,
        b: u32,
        observed_from: u32,
        kind: NeighborKind,
        power: u32,
    }

    pub fn serialize<S>(
        edges: &BTreeMap<AsnEdge, EdgeInfo>,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(edges.iter().map(|(edge, info)| EdgeRecord {
            a: edge.a,
            b: edge.b,
            observed_from: info.observed_from,
            kind: info.kind,
            power: info.power,
        }))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BTreeMap<AsnEdge, EdgeInfo>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Vec::<EdgeRecord>::deserialize(deserializer)?
            .into_iter()
            .map(|record| {
                let edge = AsnEdge::new(record.a, record.b).ok_or_else(|| {
                    de::Error::custom(format!("self-loop edge on AS{}", record.a))
                })?;
                let info = EdgeInfo {
                    observed_from: record.observed_from,
                    kind: record.kind,
                    power: record.power,
                };
                Ok((edge, info))
            })
            .collect()
    }
}

/// Expands seed ASNs into a neighbor graph through a discovery source
#[derive(Debug, Clone)]
pub struct GraphBuilder {
    handle: SourceHandle,
    cache: Arc<ResultCache>,
    policy: BackoffPolicy,
    workers: usize,
    progress: Progress,
    cancel: CancellationToken,
}

impl GraphBuilder {
    /// Create a builder using `source` from the registry
    ///
    /// # Errors
    ///
    /// * `AnalyzerError::Config` - If the source is not configured or does
    ///   not support neighbor discovery
    pub fn new(
        sources: &SourceRegistry,
        source: SourceId,
        cache: Arc<ResultCache>,
        policy: BackoffPolicy,
        workers: usize,
    ) -> Result<Self, AnalyzerError> {
        let handle = sources.require(source, Operation::Neighbors)?.clone();
        Ok(Self {
            handle,
            cache,
            policy,
            workers: workers.max(1),
            progress: Progress::new(),
            cancel: CancellationToken::new(),
        })
    }

    /// Use a cancellation token shared with the rest of the run
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Progress of the layer currently being expanded
    pub fn progress(&self) -> Progress {
        self.progress.clone()
    }

    /// Build the graph reachable from `seeds` within `max_depth` hops
    ///
    /// Layers are expanded one at a time. Lookups within a layer run
    /// concurrently; their results are merged one by one, so a node's depth
    /// is always the length of its shortest discovery path from a seed.
    pub async fn build_graph(
        &self,
        seeds: impl IntoIterator<Item = u32>,
        max_depth: u32,
    ) -> Graph {
        let mut graph = Graph::new();
        let mut frontier: Vec<u32> = Vec::new();
        for seed in seeds {
            if graph.insert_node(seed, 0) {
                frontier.push(seed);
            }
        }
        info!(seeds = frontier.len(), max_depth, "building neighbor graph");

        let mut depth = 0;
        while depth < max_depth && !frontier.is_empty() {
            if self.cancel.is_cancelled() {
                info!(depth, "graph expansion cancelled");
                break;
            }

            self.progress.start(frontier.len());
            let layer = std::mem::take(&mut frontier);
            let layer_size = layer.len();
            let mut lookups = stream::iter(layer)
                .map(|asn| async move { (asn, self.neighbors(asn).await) })
                .buffer_unordered(self.workers);

            while let Some((asn, neighbors)) = lookups.next().await {
                self.progress.advance();
                for neighbor in neighbors {
                    if neighbor.asn == asn {
                        continue;
                    }
                    if graph.insert_node(neighbor.asn, depth + 1) {
                        frontier.push(neighbor.asn);
                    }
                    graph.insert_edge(asn, &neighbor);
                }
            }

            depth += 1;
            info!(
                depth,
                expanded = layer_size,
                discovered = frontier.len(),
                nodes = graph.node_count(),
                edges = graph.edge_count(),
                "graph layer complete"
            );
        }

        graph
    }

    /// Neighbors of one ASN; unavailable data counts as no neighbors
    async fn neighbors(&self, asn: u32) -> Vec<Neighbor> {
        if let Some(neighbors) = self.cache.get_neighbors(asn) {
            return neighbors;
        }

        let attempt = tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(LookupError::Cancelled),
            outcome = self.handle.call(&self.policy, |adapter| async move {
                adapter.resolve_neighbors(asn).await
            }) => outcome,
        };

        match attempt {
            Ok(neighbors) => {
                debug!(asn, count = neighbors.len(), "neighbors discovered");
                self.cache.put_neighbors(asn, neighbors.clone());
                neighbors
            }
            Err(LookupError::NotFound) => {
                self.cache.put_neighbors(asn, Vec::new());
                Vec::new()
            }
            Err(e) => {
                debug!(asn, error = %e, "neighbor lookup failed, treating as no neighbors");
                Vec::new()
            }
        }
    }
}
