//! Knowledge graph store
//!
//! Owns the heterogeneous weighted graph linking visited pages to topic
//! keywords. Nodes live in an arena indexed by a dense slot id with a side
//! table mapping the external string ids (`page:<url>`, `kw:<term>`) to
//! slots; edges are records keyed by the unordered slot pair. This keeps
//! pruning and iteration cache-friendly and avoids holding references into
//! node memory anywhere outside the store.
//!
//! All iteration orders that reach externally visible output are derived
//! from the lexicographic order of node ids.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

use crate::constants::{MAX_PAGE_REFS, SNAPSHOT_VERSION, STATS_TOP_KEYWORDS};
use crate::errors::{EngineError, Result, ValidationErrorExt};
use crate::extract::normalize_keyword;
use crate::validation;

/// Node payload, one variant per node type
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum NodeKind {
    Page {
        url: String,
        title: String,
        summary: String,
        content_snippet: String,
        visit_count: u64,
        first_visited: f64,
        last_visited: f64,
    },
    Keyword {
        label: String,
        frequency: u64,
        /// Referring page URLs, newest first, exact-match unique, capped
        page_refs: Vec<String>,
        first_seen: f64,
        last_seen: f64,
    },
}

/// A node in the knowledge graph
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    /// External identifier: `page:<url>` or `kw:<term>`
    pub id: String,
    pub kind: NodeKind,
}

impl Node {
    pub fn is_page(&self) -> bool {
        matches!(self.kind, NodeKind::Page { .. })
    }

    pub fn is_keyword(&self) -> bool {
        matches!(self.kind, NodeKind::Keyword { .. })
    }

    /// Timestamp of the node's most recent activity
    pub fn last_touch(&self) -> f64 {
        match &self.kind {
            NodeKind::Page { last_visited, .. } => *last_visited,
            NodeKind::Keyword { last_seen, .. } => *last_seen,
        }
    }

    pub fn keyword_label(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Keyword { label, .. } => Some(label),
            NodeKind::Page { .. } => None,
        }
    }

    pub fn page_url(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Page { url, .. } => Some(url),
            NodeKind::Keyword { .. } => None,
        }
    }
}

/// An undirected edge between two distinct nodes
///
/// `base_weight` only ever grows under reinforcement; `weight` is the
/// decayed value used by every downstream computation and never exceeds
/// `base_weight`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Edge {
    pub base_weight: f64,
    pub weight: f64,
    pub last_active: f64,
    pub created: f64,
}

/// A page visit as handed to `ingest`
#[derive(Debug, Clone, Default)]
pub struct PageVisit {
    pub url: String,
    pub title: String,
    pub summary: String,
    pub content_snippet: String,
}

/// What an ingest did, for telemetry previews
#[derive(Debug, Clone, Copy, Default)]
pub struct IngestStats {
    pub new_nodes: usize,
    pub pruned_edges: usize,
    pub pruned_nodes: usize,
}

/// A keyword–keyword relationship inside a community
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeywordRelation {
    pub from: String,
    pub to: String,
    pub weight: f64,
}

/// High-level graph statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphStats {
    pub node_count: usize,
    pub edge_count: usize,
    pub top_keywords: Vec<String>,
}

/// Serialized node shape for `get_graph`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    /// Community index, -1 when unassigned
    pub community: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visit_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_snippet: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_refs: Option<Vec<String>>,
}

/// Serialized edge shape for `get_graph`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportEdge {
    pub source: String,
    pub target: String,
    pub weight: f64,
    pub base_weight: f64,
}

/// Full serialized graph for `get_graph`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphExport {
    pub nodes: Vec<ExportNode>,
    pub edges: Vec<ExportEdge>,
    pub community_count: usize,
}

/// Tunables the store needs at mutation time
#[derive(Debug, Clone, Copy)]
pub struct GraphTuning {
    /// Decay rate λ per hour
    pub decay_rate: f64,
    /// Edge removal threshold ε
    pub prune_threshold: f64,
    /// Node cap
    pub max_nodes: usize,
}

impl Default for GraphTuning {
    fn default() -> Self {
        Self {
            decay_rate: crate::constants::DECAY_RATE_PER_HOUR,
            prune_threshold: crate::constants::EDGE_PRUNE_THRESHOLD,
            max_nodes: crate::constants::MAX_GRAPH_NODES,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct SnapshotEdge {
    source: String,
    target: String,
    edge: Edge,
}

/// Canonical serialized form: nodes and edges in lexicographic order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct SnapshotPayload {
    nodes: Vec<Node>,
    edges: Vec<SnapshotEdge>,
}

fn edge_key(a: usize, b: usize) -> (usize, usize) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

/// The graph store (C1)
#[derive(Debug, Clone)]
pub struct GraphStore {
    slots: Vec<Option<Node>>,
    adjacency: Vec<HashSet<usize>>,
    index: HashMap<String, usize>,
    free: Vec<usize>,
    edges: HashMap<(usize, usize), Edge>,
    tuning: GraphTuning,
}

impl GraphStore {
    pub fn new(tuning: GraphTuning) -> Self {
        Self {
            slots: Vec::new(),
            adjacency: Vec::new(),
            index: HashMap::new(),
            free: Vec::new(),
            edges: HashMap::new(),
            tuning,
        }
    }

    pub fn tuning(&self) -> GraphTuning {
        self.tuning
    }

    pub fn node_count(&self) -> usize {
        self.index.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.index
            .get(id)
            .and_then(|&idx| self.slots[idx].as_ref())
    }

    /// All live nodes, unordered
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.slots.iter().filter_map(|slot| slot.as_ref())
    }

    /// All node ids, lexicographically sorted
    pub fn node_ids_sorted(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.index.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn page_count(&self) -> usize {
        self.nodes().filter(|n| n.is_page()).count()
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Atomically apply a page visit.
    ///
    /// Upserts the page node, the keyword nodes, the page–keyword edges and
    /// the keyword co-occurrence edges, then runs the decay sweep and cap
    /// enforcement. Invalid input is rejected before any mutation.
    pub fn ingest(&mut self, visit: &PageVisit, keywords: &[String], now: f64) -> Result<IngestStats> {
        validation::validate_url(&visit.url).map_validation_err("url")?;
        validation::validate_timestamp(now).map_validation_err("timestamp")?;

        let mut stats = IngestStats::default();

        // Page node
        let page_id = format!("page:{}", visit.url);
        let page_idx = match self.index.get(&page_id).copied() {
            Some(idx) => {
                if let Some(Node {
                    kind:
                        NodeKind::Page {
                            title,
                            summary,
                            content_snippet,
                            visit_count,
                            last_visited,
                            ..
                        },
                    ..
                }) = self.slots[idx].as_mut()
                {
                    *visit_count += 1;
                    *last_visited = now;
                    if !visit.title.is_empty() {
                        *title = visit.title.clone();
                    }
                    if !visit.summary.is_empty() {
                        *summary = visit.summary.clone();
                    }
                    if !visit.content_snippet.is_empty() {
                        *content_snippet = visit.content_snippet.clone();
                    }
                }
                idx
            }
            None => {
                stats.new_nodes += 1;
                self.insert_node(Node {
                    id: page_id.clone(),
                    kind: NodeKind::Page {
                        url: visit.url.clone(),
                        title: visit.title.clone(),
                        summary: visit.summary.clone(),
                        content_snippet: visit.content_snippet.clone(),
                        visit_count: 1,
                        first_visited: now,
                        last_visited: now,
                    },
                })
            }
        };

        // Keyword nodes, deduplicated after normalization, first occurrence wins
        let mut seen = HashSet::new();
        let mut kw_indices = Vec::new();
        for raw in keywords {
            let label = normalize_keyword(raw);
            if label.is_empty() || !seen.insert(label.clone()) {
                continue;
            }

            let kw_id = format!("kw:{label}");
            let idx = match self.index.get(&kw_id).copied() {
                Some(idx) => {
                    if let Some(Node {
                        kind:
                            NodeKind::Keyword {
                                frequency,
                                page_refs,
                                last_seen,
                                ..
                            },
                        ..
                    }) = self.slots[idx].as_mut()
                    {
                        *frequency += 1;
                        *last_seen = now;
                        page_refs.retain(|r| r != &visit.url);
                        page_refs.insert(0, visit.url.clone());
                        page_refs.truncate(MAX_PAGE_REFS);
                    }
                    idx
                }
                None => {
                    stats.new_nodes += 1;
                    self.insert_node(Node {
                        id: kw_id.clone(),
                        kind: NodeKind::Keyword {
                            label: label.clone(),
                            frequency: 1,
                            page_refs: vec![visit.url.clone()],
                            first_seen: now,
                            last_seen: now,
                        },
                    })
                }
            };
            kw_indices.push(idx);

            self.upsert_edge(page_idx, idx, now);
        }

        // Keyword co-occurrence edges over unordered distinct pairs
        for i in 0..kw_indices.len() {
            for j in (i + 1)..kw_indices.len() {
                self.upsert_edge(kw_indices[i], kw_indices[j], now);
            }
        }

        stats.pruned_edges = self.decay_sweep(now);
        stats.pruned_nodes = self.enforce_cap(now);

        Ok(stats)
    }

    fn insert_node(&mut self, node: Node) -> usize {
        let id = node.id.clone();
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(node);
                idx
            }
            None => {
                self.slots.push(Some(node));
                self.adjacency.push(HashSet::new());
                self.slots.len() - 1
            }
        };
        self.index.insert(id, idx);
        idx
    }

    fn upsert_edge(&mut self, a: usize, b: usize, now: f64) {
        if a == b {
            return;
        }
        let key = edge_key(a, b);
        match self.edges.get_mut(&key) {
            Some(edge) => {
                edge.base_weight += 1.0;
                edge.weight = edge.base_weight;
                edge.last_active = now;
            }
            None => {
                self.edges.insert(
                    key,
                    Edge {
                        base_weight: 1.0,
                        weight: 1.0,
                        last_active: now,
                        created: now,
                    },
                );
                self.adjacency[a].insert(b);
                self.adjacency[b].insert(a);
            }
        }
    }

    /// Recompute every decayed weight against `now` and drop dead edges.
    ///
    /// `w(t) = base_weight × e^(−λ × Δt_hours)`; edges below the prune
    /// threshold are removed and nodes left with degree zero go with them.
    /// Returns the number of edges removed.
    pub fn decay_sweep(&mut self, now: f64) -> usize {
        let lambda = self.tuning.decay_rate;
        let threshold = self.tuning.prune_threshold;

        let mut dead = Vec::new();
        for (key, edge) in self.edges.iter_mut() {
            let hours = (now - edge.last_active).max(0.0) / 3600.0;
            edge.weight = edge.base_weight * (-lambda * hours).exp();
            if edge.weight < threshold {
                dead.push(*key);
            }
        }

        for key in &dead {
            self.remove_edge(*key);
        }
        self.remove_orphans();
        dead.len()
    }

    /// Evict the lowest-value nodes while the graph exceeds its cap.
    ///
    /// Score is `weighted_degree × e^(−λ × hours_since_last_touch)`; ties
    /// fall back to lexicographic id order. Returns the number of nodes
    /// removed (including cascade orphans).
    pub fn enforce_cap(&mut self, now: f64) -> usize {
        let excess = self.node_count().saturating_sub(self.tuning.max_nodes);
        if excess == 0 {
            return 0;
        }

        let lambda = self.tuning.decay_rate;
        let mut scored: Vec<(f64, String, usize)> = self
            .index
            .iter()
            .filter_map(|(id, &idx)| {
                let node = self.slots[idx].as_ref()?;
                let hours = (now - node.last_touch()).max(0.0) / 3600.0;
                let recency = (-lambda * hours).exp();
                Some((self.weighted_degree_idx(idx) * recency, id.clone(), idx))
            })
            .collect();
        scored.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

        let before = self.node_count();
        for (_, _, idx) in scored.into_iter().take(excess) {
            self.remove_node(idx);
        }
        self.remove_orphans();
        before - self.node_count()
    }

    fn remove_edge(&mut self, key: (usize, usize)) {
        if self.edges.remove(&key).is_some() {
            let (a, b) = key;
            self.adjacency[a].remove(&b);
            self.adjacency[b].remove(&a);
        }
    }

    fn remove_node(&mut self, idx: usize) {
        let neighbors: Vec<usize> = self.adjacency[idx].iter().copied().collect();
        for nbr in neighbors {
            self.edges.remove(&edge_key(idx, nbr));
            self.adjacency[nbr].remove(&idx);
        }
        self.adjacency[idx].clear();
        if let Some(node) = self.slots[idx].take() {
            self.index.remove(&node.id);
        }
        self.free.push(idx);
    }

    fn remove_orphans(&mut self) {
        let orphans: Vec<usize> = self
            .index
            .values()
            .copied()
            .filter(|&idx| self.adjacency[idx].is_empty())
            .collect();
        for idx in orphans {
            self.remove_node(idx);
        }
    }

    /// Drop every node and edge
    pub fn clear(&mut self) {
        self.slots.clear();
        self.adjacency.clear();
        self.index.clear();
        self.free.clear();
        self.edges.clear();
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Neighbors of a node with the decayed edge weight, sorted by node id
    pub fn neighbors(&self, id: &str) -> Vec<(&Node, f64)> {
        let Some(&idx) = self.index.get(id) else {
            return Vec::new();
        };
        let mut out: Vec<(&Node, f64)> = self.adjacency[idx]
            .iter()
            .filter_map(|&nbr| {
                let node = self.slots[nbr].as_ref()?;
                let weight = self.edges.get(&edge_key(idx, nbr))?.weight;
                Some((node, weight))
            })
            .collect();
        out.sort_by(|a, b| a.0.id.cmp(&b.0.id));
        out
    }

    /// Decayed weight of the edge between two nodes, if present
    pub fn edge_weight(&self, a: &str, b: &str) -> Option<f64> {
        let &ia = self.index.get(a)?;
        let &ib = self.index.get(b)?;
        self.edges.get(&edge_key(ia, ib)).map(|e| e.weight)
    }

    /// Raw edge record between two nodes, if present
    pub fn edge(&self, a: &str, b: &str) -> Option<&Edge> {
        let &ia = self.index.get(a)?;
        let &ib = self.index.get(b)?;
        self.edges.get(&edge_key(ia, ib))
    }

    /// Sum of decayed weights over a node's incident edges
    pub fn weighted_degree(&self, id: &str) -> f64 {
        match self.index.get(id) {
            Some(&idx) => self.weighted_degree_idx(idx),
            None => 0.0,
        }
    }

    fn weighted_degree_idx(&self, idx: usize) -> f64 {
        self.adjacency[idx]
            .iter()
            .filter_map(|&nbr| self.edges.get(&edge_key(idx, nbr)))
            .map(|e| e.weight)
            .sum()
    }

    /// Sum of decayed weights over a node's edges into a member set
    pub fn weighted_degree_within(&self, id: &str, members: &HashSet<&str>) -> f64 {
        let Some(&idx) = self.index.get(id) else {
            return 0.0;
        };
        self.adjacency[idx]
            .iter()
            .filter_map(|&nbr| {
                let node = self.slots[nbr].as_ref()?;
                if !members.contains(node.id.as_str()) {
                    return None;
                }
                self.edges.get(&edge_key(idx, nbr)).map(|e| e.weight)
            })
            .sum()
    }

    /// Most recently visited pages, `last_visited` descending, id ascending on ties
    pub fn recent_pages(&self, limit: usize) -> Vec<&Node> {
        let mut pages: Vec<&Node> = self.nodes().filter(|n| n.is_page()).collect();
        pages.sort_by(|a, b| {
            b.last_touch()
                .total_cmp(&a.last_touch())
                .then_with(|| a.id.cmp(&b.id))
        });
        pages.truncate(limit);
        pages
    }

    /// Edge count and total decayed weight of edges fully inside a member set
    pub fn internal_edge_stats(&self, members: &HashSet<&str>) -> (usize, f64) {
        let mut count = 0;
        let mut total = 0.0;
        for (&(a, b), edge) in &self.edges {
            let (Some(na), Some(nb)) = (self.slots[a].as_ref(), self.slots[b].as_ref()) else {
                continue;
            };
            if members.contains(na.id.as_str()) && members.contains(nb.id.as_str()) {
                count += 1;
                total += edge.weight;
            }
        }
        (count, total)
    }

    /// Strongest keyword–keyword edges fully inside a member set,
    /// decayed weight descending, capped at `k`
    pub fn keyword_edges_in(&self, members: &HashSet<&str>, k: usize) -> Vec<KeywordRelation> {
        let mut relations = Vec::new();
        for (&(a, b), edge) in &self.edges {
            let (Some(na), Some(nb)) = (self.slots[a].as_ref(), self.slots[b].as_ref()) else {
                continue;
            };
            if !members.contains(na.id.as_str()) || !members.contains(nb.id.as_str()) {
                continue;
            }
            let (Some(la), Some(lb)) = (na.keyword_label(), nb.keyword_label()) else {
                continue;
            };
            let (from, to) = if la <= lb { (la, lb) } else { (lb, la) };
            relations.push(KeywordRelation {
                from: from.to_string(),
                to: to.to_string(),
                weight: edge.weight,
            });
        }
        relations.sort_by(|a, b| {
            b.weight
                .total_cmp(&a.weight)
                .then_with(|| a.from.cmp(&b.from))
                .then_with(|| a.to.cmp(&b.to))
        });
        relations.truncate(k);
        relations
    }

    /// Keyword nodes whose neighbors span two or more communities.
    ///
    /// Returns `(label, neighbor communities)` sorted by span descending,
    /// then label; `assignment` maps node ids to community indices.
    pub fn bridging_keywords(&self, assignment: &HashMap<String, usize>) -> Vec<(String, Vec<usize>)> {
        let mut bridges = Vec::new();
        for &idx in self.index.values() {
            let Some(node) = self.slots[idx].as_ref() else {
                continue;
            };
            let Some(label) = node.keyword_label() else {
                continue;
            };

            let communities: BTreeSet<usize> = self.adjacency[idx]
                .iter()
                .filter_map(|&nbr| self.slots[nbr].as_ref())
                .filter_map(|n| assignment.get(&n.id).copied())
                .collect();
            if communities.len() >= 2 {
                bridges.push((label.to_string(), communities.into_iter().collect::<Vec<_>>()));
            }
        }
        bridges.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then_with(|| a.0.cmp(&b.0)));
        bridges
    }

    /// High-level statistics including the strongest keyword labels
    pub fn stats(&self) -> GraphStats {
        let mut keywords: Vec<(&str, f64)> = self
            .index
            .iter()
            .filter_map(|(_, &idx)| {
                let node = self.slots[idx].as_ref()?;
                let label = node.keyword_label()?;
                Some((label, self.weighted_degree_idx(idx)))
            })
            .collect();
        keywords.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));

        GraphStats {
            node_count: self.node_count(),
            edge_count: self.edge_count(),
            top_keywords: keywords
                .into_iter()
                .take(STATS_TOP_KEYWORDS)
                .map(|(label, _)| label.to_string())
                .collect(),
        }
    }

    /// Serialize the whole graph for the `get_graph` surface
    pub fn export(&self, assignment: &HashMap<String, usize>, community_count: usize) -> GraphExport {
        let mut nodes: Vec<ExportNode> = Vec::with_capacity(self.node_count());
        for id in self.node_ids_sorted() {
            let Some(node) = self.node(&id) else { continue };
            let community = assignment.get(&id).map(|&c| c as i64).unwrap_or(-1);
            let export = match &node.kind {
                NodeKind::Page {
                    url,
                    title,
                    summary,
                    content_snippet,
                    visit_count,
                    ..
                } => ExportNode {
                    id: id.clone(),
                    node_type: "page".to_string(),
                    community,
                    label: None,
                    title: Some(title.clone()),
                    url: Some(url.clone()),
                    visit_count: Some(*visit_count),
                    frequency: None,
                    summary: (!summary.is_empty()).then(|| summary.clone()),
                    content_snippet: (!content_snippet.is_empty()).then(|| content_snippet.clone()),
                    page_refs: None,
                },
                NodeKind::Keyword {
                    label,
                    frequency,
                    page_refs,
                    ..
                } => ExportNode {
                    id: id.clone(),
                    node_type: "keyword".to_string(),
                    community,
                    label: Some(label.clone()),
                    title: None,
                    url: None,
                    visit_count: None,
                    frequency: Some(*frequency),
                    summary: None,
                    content_snippet: None,
                    page_refs: Some(page_refs.clone()),
                },
            };
            nodes.push(export);
        }

        let mut edges: Vec<ExportEdge> = self
            .edges
            .iter()
            .filter_map(|(&(a, b), edge)| {
                let (na, nb) = (self.slots[a].as_ref()?, self.slots[b].as_ref()?);
                let (source, target) = if na.id <= nb.id {
                    (na.id.clone(), nb.id.clone())
                } else {
                    (nb.id.clone(), na.id.clone())
                };
                Some(ExportEdge {
                    source,
                    target,
                    weight: edge.weight,
                    base_weight: edge.base_weight,
                })
            })
            .collect();
        edges.sort_by(|a, b| a.source.cmp(&b.source).then_with(|| a.target.cmp(&b.target)));

        GraphExport {
            nodes,
            edges,
            community_count,
        }
    }

    // =========================================================================
    // Invariants
    // =========================================================================

    /// Verify the structural invariants, returning the first violation found
    pub fn check_invariants(&self) -> Result<()> {
        if self.node_count() > self.tuning.max_nodes {
            return Err(EngineError::InvariantViolation(format!(
                "node count {} exceeds cap {}",
                self.node_count(),
                self.tuning.max_nodes
            )));
        }

        for (&(a, b), edge) in &self.edges {
            if a == b {
                return Err(EngineError::InvariantViolation(format!(
                    "self-loop on slot {a}"
                )));
            }
            let (Some(na), Some(nb)) = (
                self.slots.get(a).and_then(|s| s.as_ref()),
                self.slots.get(b).and_then(|s| s.as_ref()),
            ) else {
                return Err(EngineError::InvariantViolation(format!(
                    "edge ({a},{b}) references a dead slot"
                )));
            };
            if na.is_page() && nb.is_page() {
                return Err(EngineError::InvariantViolation(format!(
                    "page-page edge between '{}' and '{}'",
                    na.id, nb.id
                )));
            }
            if edge.weight < 0.0 || edge.weight > edge.base_weight + 1e-9 {
                return Err(EngineError::InvariantViolation(format!(
                    "edge ('{}','{}') weight {} outside [0, {}]",
                    na.id, nb.id, edge.weight, edge.base_weight
                )));
            }
            if edge.last_active < edge.created {
                return Err(EngineError::InvariantViolation(format!(
                    "edge ('{}','{}') last_active precedes created",
                    na.id, nb.id
                )));
            }
        }

        for node in self.nodes() {
            match &node.kind {
                NodeKind::Page {
                    first_visited,
                    last_visited,
                    visit_count,
                    ..
                } => {
                    if last_visited < first_visited || *visit_count == 0 {
                        return Err(EngineError::InvariantViolation(format!(
                            "page '{}' has inconsistent visit bookkeeping",
                            node.id
                        )));
                    }
                }
                NodeKind::Keyword {
                    first_seen,
                    last_seen,
                    frequency,
                    page_refs,
                    ..
                } => {
                    if last_seen < first_seen || *frequency == 0 {
                        return Err(EngineError::InvariantViolation(format!(
                            "keyword '{}' has inconsistent bookkeeping",
                            node.id
                        )));
                    }
                    if page_refs.len() > MAX_PAGE_REFS {
                        return Err(EngineError::InvariantViolation(format!(
                            "keyword '{}' holds {} page refs",
                            node.id,
                            page_refs.len()
                        )));
                    }
                    let unique: HashSet<&String> = page_refs.iter().collect();
                    if unique.len() != page_refs.len() {
                        return Err(EngineError::InvariantViolation(format!(
                            "keyword '{}' holds duplicate page refs",
                            node.id
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    // =========================================================================
    // Snapshot codec
    // =========================================================================

    fn canonical(&self) -> SnapshotPayload {
        let mut nodes: Vec<Node> = self.nodes().cloned().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));

        let mut edges: Vec<SnapshotEdge> = self
            .edges
            .iter()
            .filter_map(|(&(a, b), edge)| {
                let (na, nb) = (self.slots[a].as_ref()?, self.slots[b].as_ref()?);
                let (source, target) = if na.id <= nb.id {
                    (na.id.clone(), nb.id.clone())
                } else {
                    (nb.id.clone(), na.id.clone())
                };
                Some(SnapshotEdge {
                    source,
                    target,
                    edge: *edge,
                })
            })
            .collect();
        edges.sort_by(|a, b| a.source.cmp(&b.source).then_with(|| a.target.cmp(&b.target)));

        SnapshotPayload { nodes, edges }
    }

    /// Encode the graph as a versioned binary snapshot
    pub fn snapshot_bytes(&self) -> Result<Vec<u8>> {
        let payload = self.canonical();
        let encoded = bincode::serde::encode_to_vec(&payload, bincode::config::standard())
            .map_err(|e| EngineError::SnapshotIo(format!("encode failed: {e}")))?;

        let mut bytes = Vec::with_capacity(encoded.len() + 1);
        bytes.push(SNAPSHOT_VERSION);
        bytes.extend_from_slice(&encoded);
        Ok(bytes)
    }

    /// Decode a versioned binary snapshot into a fresh store
    pub fn from_snapshot_bytes(bytes: &[u8], tuning: GraphTuning) -> Result<Self> {
        let Some((&version, payload_bytes)) = bytes.split_first() else {
            return Err(EngineError::SnapshotIo("empty snapshot".to_string()));
        };
        if version != SNAPSHOT_VERSION {
            return Err(EngineError::SnapshotIo(format!(
                "unsupported snapshot version {version} (expected {SNAPSHOT_VERSION})"
            )));
        }

        let (payload, _): (SnapshotPayload, usize) =
            bincode::serde::decode_from_slice(payload_bytes, bincode::config::standard())
                .map_err(|e| EngineError::SnapshotIo(format!("decode failed: {e}")))?;

        let mut store = Self::new(tuning);
        for node in payload.nodes {
            store.insert_node(node);
        }
        for SnapshotEdge { source, target, edge } in payload.edges {
            let (Some(&a), Some(&b)) = (store.index.get(&source), store.index.get(&target)) else {
                return Err(EngineError::SnapshotIo(format!(
                    "snapshot edge '{source}'–'{target}' references a missing node"
                )));
            };
            store.edges.insert(edge_key(a, b), edge);
            store.adjacency[a].insert(b);
            store.adjacency[b].insert(a);
        }

        store.check_invariants()?;
        Ok(store)
    }
}

impl Default for GraphStore {
    fn default() -> Self {
        Self::new(GraphTuning::default())
    }
}

impl PartialEq for GraphStore {
    fn eq(&self, other: &Self) -> bool {
        self.canonical() == other.canonical()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn visit(url: &str, title: &str) -> PageVisit {
        PageVisit {
            url: url.to_string(),
            title: title.to_string(),
            summary: String::new(),
            content_snippet: String::new(),
        }
    }

    fn kws(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_ingest_creates_nodes_and_edges() {
        let mut graph = GraphStore::default();
        let stats = graph
            .ingest(&visit("u1", "React Docs"), &kws(&["react", "hooks"]), 1000.0)
            .unwrap();

        // 1 page + 2 keywords, 2 page-kw edges + 1 co-occurrence edge
        assert_eq!(stats.new_nodes, 3);
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edge_count(), 3);
        assert_eq!(graph.edge_weight("page:u1", "kw:react"), Some(1.0));
        assert_eq!(graph.edge_weight("kw:hooks", "kw:react"), Some(1.0));
        graph.check_invariants().unwrap();
    }

    #[test]
    fn test_reinforcement_increments_base_weight() {
        let mut graph = GraphStore::default();
        graph
            .ingest(&visit("u1", "React Docs"), &kws(&["react", "hooks"]), 1000.0)
            .unwrap();
        graph
            .ingest(&visit("u1", "React Docs"), &kws(&["react", "hooks"]), 1001.0)
            .unwrap();

        assert_eq!(graph.node_count(), 3);
        let edge = graph.edge("page:u1", "kw:react").unwrap();
        assert_eq!(edge.base_weight, 2.0);

        match &graph.node("page:u1").unwrap().kind {
            NodeKind::Page { visit_count, first_visited, last_visited, .. } => {
                assert_eq!(*visit_count, 2);
                assert_eq!(*first_visited, 1000.0);
                assert_eq!(*last_visited, 1001.0);
            }
            _ => panic!("expected page node"),
        }
    }

    #[test]
    fn test_duplicate_keywords_in_one_visit_count_once() {
        let mut graph = GraphStore::default();
        graph
            .ingest(
                &visit("u1", "Rust"),
                &kws(&["rust", "Rust", "  rust  ", "async"]),
                1000.0,
            )
            .unwrap();

        // rust deduplicates to one node, one page edge, one co-occurrence pair
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edge("page:u1", "kw:rust").unwrap().base_weight, 1.0);
        assert_eq!(graph.edge("kw:async", "kw:rust").unwrap().base_weight, 1.0);
    }

    #[test]
    fn test_invalid_input_rejected_without_mutation() {
        let mut graph = GraphStore::default();
        assert!(graph.ingest(&visit("", "x"), &kws(&["a"]), 1000.0).is_err());
        assert!(graph
            .ingest(&visit("u1", "x"), &kws(&["a"]), f64::NAN)
            .is_err());
        assert!(graph.is_empty());
    }

    #[test]
    fn test_decay_monotonic_and_prunes() {
        let mut graph = GraphStore::default();
        graph
            .ingest(&visit("u1", "t"), &kws(&["a", "b"]), 0.0)
            .unwrap();

        graph.decay_sweep(3600.0);
        let after_one_hour = graph.edge_weight("kw:a", "kw:b").unwrap();
        assert!(after_one_hour < 1.0);

        graph.decay_sweep(7200.0);
        let after_two_hours = graph.edge_weight("kw:a", "kw:b").unwrap();
        assert!(after_two_hours < after_one_hour);

        // ~461 idle hours push weight below 0.01 for base_weight 1
        let removed = graph.decay_sweep(1000.0 * 3600.0);
        assert!(removed > 0);
        assert!(graph.is_empty(), "orphaned nodes should be gone");
    }

    #[test]
    fn test_fresh_edges_survive_sweep_exactly_at_base_weight() {
        let mut graph = GraphStore::default();
        graph
            .ingest(&visit("u1", "t"), &kws(&["a"]), 1000.0)
            .unwrap();
        graph.decay_sweep(1000.0);
        assert_eq!(graph.edge_weight("page:u1", "kw:a"), Some(1.0));
    }

    #[test]
    fn test_page_refs_newest_first_unique_capped() {
        let mut graph = GraphStore::default();
        for i in 0..15 {
            graph
                .ingest(&visit(&format!("u{i}"), "t"), &kws(&["shared"]), 1000.0 + i as f64)
                .unwrap();
        }
        // Revisit an old page; its ref should move to the front
        graph
            .ingest(&visit("u3", "t"), &kws(&["shared"]), 2000.0)
            .unwrap();

        match &graph.node("kw:shared").unwrap().kind {
            NodeKind::Keyword { page_refs, frequency, .. } => {
                assert_eq!(page_refs.len(), MAX_PAGE_REFS);
                assert_eq!(page_refs[0], "u3");
                let unique: HashSet<&String> = page_refs.iter().collect();
                assert_eq!(unique.len(), page_refs.len());
                assert_eq!(*frequency, 16);
            }
            _ => panic!("expected keyword node"),
        }
    }

    #[test]
    fn test_cap_enforcement_keeps_highest_scores() {
        let tuning = GraphTuning {
            max_nodes: 5,
            ..Default::default()
        };
        let mut graph = GraphStore::new(tuning);
        for i in 0..6 {
            graph
                .ingest(
                    &visit(&format!("u{i}"), "t"),
                    &kws(&[&format!("kw{i}a"), &format!("kw{i}b")]),
                    1000.0 + i as f64 * 10.0,
                )
                .unwrap();
        }

        assert_eq!(graph.node_count(), 5);
        // The newest visit's triangle survives intact
        assert!(graph.contains("page:u5"));
        assert!(graph.contains("kw:kw5a"));
        assert!(graph.contains("kw:kw5b"));
        graph.check_invariants().unwrap();
    }

    #[test]
    fn test_neighbors_sorted_by_id() {
        let mut graph = GraphStore::default();
        graph
            .ingest(&visit("u1", "t"), &kws(&["zebra", "alpha", "mango"]), 1000.0)
            .unwrap();
        let ids: Vec<&str> = graph
            .neighbors("page:u1")
            .iter()
            .map(|(n, _)| n.id.as_str())
            .collect();
        assert_eq!(ids, vec!["kw:alpha", "kw:mango", "kw:zebra"]);
    }

    #[test]
    fn test_recent_pages_ordering() {
        let mut graph = GraphStore::default();
        graph.ingest(&visit("a", "t"), &kws(&["x"]), 1000.0).unwrap();
        graph.ingest(&visit("b", "t"), &kws(&["x"]), 2000.0).unwrap();
        graph.ingest(&visit("c", "t"), &kws(&["x"]), 1500.0).unwrap();

        let urls: Vec<&str> = graph
            .recent_pages(10)
            .iter()
            .filter_map(|n| n.page_url())
            .collect();
        assert_eq!(urls, vec!["b", "c", "a"]);
    }

    #[test]
    fn test_bridging_keywords() {
        let mut graph = GraphStore::default();
        graph
            .ingest(&visit("u1", "t"), &kws(&["react", "shared"]), 1000.0)
            .unwrap();
        graph
            .ingest(&visit("u2", "t"), &kws(&["python", "shared"]), 1001.0)
            .unwrap();

        let mut assignment = HashMap::new();
        assignment.insert("page:u1".to_string(), 0);
        assignment.insert("kw:react".to_string(), 0);
        assignment.insert("page:u2".to_string(), 1);
        assignment.insert("kw:python".to_string(), 1);
        assignment.insert("kw:shared".to_string(), 0);

        // "shared" spans both communities; so does "python", whose neighbors
        // are page:u2 (community 1) and kw:shared (community 0)
        let bridges = graph.bridging_keywords(&assignment);
        let labels: Vec<&str> = bridges.iter().map(|(l, _)| l.as_str()).collect();
        assert_eq!(labels, vec!["python", "shared"]);
        assert!(bridges.iter().all(|(_, c)| c == &vec![0, 1]));
    }

    #[test]
    fn test_snapshot_round_trip_identity() {
        let mut graph = GraphStore::default();
        graph
            .ingest(&visit("u1", "React Docs"), &kws(&["react", "hooks"]), 1000.0)
            .unwrap();
        graph
            .ingest(&visit("u2", "FastAPI"), &kws(&["python", "fastapi"]), 1002.0)
            .unwrap();

        let bytes = graph.snapshot_bytes().unwrap();
        assert_eq!(bytes[0], SNAPSHOT_VERSION);

        let restored = GraphStore::from_snapshot_bytes(&bytes, graph.tuning()).unwrap();
        assert_eq!(graph, restored);
    }

    #[test]
    fn test_snapshot_rejects_bad_version() {
        let graph = GraphStore::default();
        let mut bytes = graph.snapshot_bytes().unwrap();
        bytes[0] = 99;
        assert!(matches!(
            GraphStore::from_snapshot_bytes(&bytes, GraphTuning::default()),
            Err(EngineError::SnapshotIo(_))
        ));
    }

    #[test]
    fn test_snapshot_rejects_garbage() {
        assert!(GraphStore::from_snapshot_bytes(&[], GraphTuning::default()).is_err());
        assert!(
            GraphStore::from_snapshot_bytes(&[SNAPSHOT_VERSION, 0xFF, 0x13], GraphTuning::default())
                .is_err()
        );
    }

    #[test]
    fn test_export_shape() {
        let mut graph = GraphStore::default();
        graph
            .ingest(&visit("u1", "React Docs"), &kws(&["react"]), 1000.0)
            .unwrap();

        let mut assignment = HashMap::new();
        assignment.insert("page:u1".to_string(), 0);
        assignment.insert("kw:react".to_string(), 0);

        let export = graph.export(&assignment, 1);
        assert_eq!(export.nodes.len(), 2);
        assert_eq!(export.edges.len(), 1);
        assert_eq!(export.community_count, 1);

        // kw:react sorts before page:u1
        assert_eq!(export.nodes[0].node_type, "keyword");
        assert_eq!(export.nodes[0].frequency, Some(1));
        assert_eq!(export.nodes[1].node_type, "page");
        assert_eq!(export.nodes[1].visit_count, Some(1));
        assert_eq!(export.edges[0].source, "kw:react");
        assert_eq!(export.edges[0].target, "page:u1");
    }

    #[test]
    fn test_stats_top_keywords() {
        let mut graph = GraphStore::default();
        graph
            .ingest(&visit("u1", "t"), &kws(&["rust", "tokio"]), 1000.0)
            .unwrap();
        graph
            .ingest(&visit("u2", "t"), &kws(&["rust"]), 1001.0)
            .unwrap();

        let stats = graph.stats();
        assert_eq!(stats.node_count, 4);
        assert_eq!(stats.top_keywords[0], "rust");
    }
}
