//! Community detection over the knowledge graph
//!
//! Modularity-optimizing partition (Louvain method) over the decayed edge
//! weights:
//!
//! `Q_γ = (1/2m) · Σij [Aij − γ·ki·kj/(2m)] · δ(ci, cj)`
//!
//! Phase 1 moves nodes between communities while any move yields a positive
//! modularity gain; phase 2 contracts each community into a super-node
//! (inter-community weights become edges, intra-community weights become
//! self-loops) and the phases repeat until the quality stops improving.
//!
//! Every source of ordering is pinned: nodes enter in lexicographic id
//! order, the visit order is shuffled by a PRNG seeded from configuration,
//! and gain ties resolve to the lowest community id. Given the same graph
//! and seed the partition is bit-identical across runs.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::config::EngineConfig;
use crate::constants::{
    COMMUNITY_RESOLUTION, COMMUNITY_SEED, COMMUNITY_TOP_KEYWORDS, LOUVAIN_MAX_LEVELS,
    LOUVAIN_MIN_IMPROVEMENT,
};
use crate::graph::GraphStore;

/// Label used for communities that contain no keyword nodes
pub const PAGES_ONLY_LABEL: &str = "(pages)";

/// Partitioner configuration
#[derive(Debug, Clone)]
pub struct PartitionConfig {
    /// Resolution γ: higher values favor more, smaller communities
    pub resolution: f64,
    /// PRNG seed for the node visit order
    pub seed: u64,
    /// Bound on aggregation levels
    pub max_levels: usize,
    /// Minimum modularity gain to run another level
    pub min_improvement: f64,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            resolution: COMMUNITY_RESOLUTION,
            seed: COMMUNITY_SEED,
            max_levels: LOUVAIN_MAX_LEVELS,
            min_improvement: LOUVAIN_MIN_IMPROVEMENT,
        }
    }
}

impl PartitionConfig {
    pub fn from_engine_config(config: &EngineConfig) -> Self {
        Self {
            resolution: config.community_resolution,
            seed: config.community_seed,
            ..Default::default()
        }
    }
}

/// A detected community with its human-readable labeling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Community {
    pub id: usize,
    /// Keyword with the highest weighted degree inside the community,
    /// or `"(pages)"` when the community holds no keyword nodes
    pub label: String,
    /// Top keywords by weighted degree inside the community
    pub keywords: Vec<String>,
    /// Member node ids, lexicographically sorted
    pub members: Vec<String>,
}

/// A labeled partition of the graph
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Partition {
    pub communities: Vec<Community>,
    /// Node id → community index
    pub assignment: HashMap<String, usize>,
}

impl Partition {
    pub fn len(&self) -> usize {
        self.communities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.communities.is_empty()
    }

    pub fn label(&self, idx: usize) -> &str {
        self.communities
            .get(idx)
            .map(|c| c.label.as_str())
            .unwrap_or(PAGES_ONLY_LABEL)
    }

    pub fn community_of(&self, id: &str) -> Option<usize> {
        self.assignment.get(id).copied()
    }
}

/// Louvain partitioner (C3)
pub struct LouvainPartitioner {
    config: PartitionConfig,
}

impl LouvainPartitioner {
    pub fn new(config: PartitionConfig) -> Self {
        Self { config }
    }

    /// Partition the current graph into labeled communities
    pub fn partition(&self, graph: &GraphStore) -> Partition {
        let ids = graph.node_ids_sorted();
        let n = ids.len();

        if n == 0 {
            return Partition::default();
        }
        if n == 1 {
            return self.build_partition(graph, ids, vec![0]);
        }

        let pos: HashMap<&str, usize> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();

        // Level-0 adjacency with decayed weights, no self-loops yet
        let mut level_adj: Vec<HashMap<usize, f64>> = vec![HashMap::new(); n];
        for (i, id) in ids.iter().enumerate() {
            for (nbr, weight) in graph.neighbors(id) {
                if let Some(&j) = pos.get(nbr.id.as_str()) {
                    level_adj[i].insert(j, weight);
                }
            }
        }
        let mut level_self: Vec<f64> = vec![0.0; n];

        // Original node → node in the current contracted graph
        let mut orig_to_level: Vec<usize> = (0..n).collect();
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut prev_q = f64::NEG_INFINITY;

        for _ in 0..self.config.max_levels {
            let (membership, moved) = self.local_moving(&level_adj, &level_self, &mut rng);

            let q = self.modularity(&level_adj, &level_self, &membership);
            if !moved || (prev_q.is_finite() && q - prev_q < self.config.min_improvement) {
                break;
            }
            prev_q = q;

            let (remap, contracted_adj, contracted_self) =
                contract(&level_adj, &level_self, &membership);
            for level_node in orig_to_level.iter_mut() {
                *level_node = remap[membership[*level_node]];
            }
            level_adj = contracted_adj;
            level_self = contracted_self;

            if level_adj.len() == 1 {
                break;
            }
        }

        self.build_partition(graph, ids, orig_to_level)
    }

    /// Phase 1: greedy local moving until a full pass yields no move.
    /// Returns the membership vector and whether anything moved.
    fn local_moving(
        &self,
        adj: &[HashMap<usize, f64>],
        self_w: &[f64],
        rng: &mut StdRng,
    ) -> (Vec<usize>, bool) {
        let n = adj.len();
        let degrees: Vec<f64> = (0..n)
            .map(|i| adj[i].values().sum::<f64>() + 2.0 * self_w[i])
            .collect();
        let two_m: f64 = degrees.iter().sum();

        let mut community: Vec<usize> = (0..n).collect();
        if two_m == 0.0 {
            return (community, false);
        }

        let mut comm_total = degrees.clone();
        let mut order: Vec<usize> = (0..n).collect();
        order.shuffle(rng);

        let mut moved_any = false;
        loop {
            let mut moved_this_pass = false;
            for &node in &order {
                let current = community[node];

                // Weight from this node into each neighboring community
                let mut links: HashMap<usize, f64> = HashMap::new();
                for (&nbr, &w) in &adj[node] {
                    if nbr != node {
                        *links.entry(community[nbr]).or_default() += w;
                    }
                }

                comm_total[current] -= degrees[node];
                let gain_of = |comm: usize, w_to: f64| {
                    w_to - self.config.resolution * degrees[node] * comm_total[comm] / two_m
                };

                let mut best = current;
                let mut best_gain = gain_of(current, links.get(&current).copied().unwrap_or(0.0));

                let mut candidates: Vec<(usize, f64)> =
                    links.iter().map(|(&c, &w)| (c, w)).collect();
                candidates.sort_by_key(|&(c, _)| c);
                for (comm, w_to) in candidates {
                    if comm == current {
                        continue;
                    }
                    let gain = gain_of(comm, w_to);
                    if gain > best_gain + 1e-12 {
                        best_gain = gain;
                        best = comm;
                    }
                }

                comm_total[best] += degrees[node];
                if best != current {
                    community[node] = best;
                    moved_this_pass = true;
                    moved_any = true;
                }
            }
            if !moved_this_pass {
                break;
            }
        }

        (community, moved_any)
    }

    /// Modularity `Q_γ` of a membership over the level graph
    fn modularity(&self, adj: &[HashMap<usize, f64>], self_w: &[f64], membership: &[usize]) -> f64 {
        let n = adj.len();
        let degrees: Vec<f64> = (0..n)
            .map(|i| adj[i].values().sum::<f64>() + 2.0 * self_w[i])
            .collect();
        let two_m: f64 = degrees.iter().sum();
        if two_m == 0.0 {
            return 0.0;
        }

        let comm_count = membership.iter().copied().max().map_or(0, |m| m + 1);
        let mut internal = vec![0.0; comm_count];
        let mut total = vec![0.0; comm_count];

        for i in 0..n {
            internal[membership[i]] += self_w[i];
            total[membership[i]] += degrees[i];
            for (&j, &w) in &adj[i] {
                if j > i && membership[i] == membership[j] {
                    internal[membership[i]] += w;
                }
            }
        }

        (0..comm_count)
            .map(|c| {
                2.0 * internal[c] / two_m
                    - self.config.resolution * (total[c] / two_m) * (total[c] / two_m)
            })
            .sum()
    }

    /// Materialize the labeled partition from the final per-node membership.
    ///
    /// Communities are renumbered by their lexicographically smallest member
    /// so the indices are stable across runs.
    fn build_partition(
        &self,
        graph: &GraphStore,
        ids: Vec<String>,
        membership: Vec<usize>,
    ) -> Partition {
        // Group original nodes by final community, ordered by first member;
        // `ids` is sorted, so first appearance is the smallest member id.
        let mut order: Vec<usize> = Vec::new();
        let mut renumber: HashMap<usize, usize> = HashMap::new();
        for &m in &membership {
            if !renumber.contains_key(&m) {
                renumber.insert(m, order.len());
                order.push(m);
            }
        }

        let mut member_lists: Vec<Vec<String>> = vec![Vec::new(); order.len()];
        let mut assignment = HashMap::with_capacity(ids.len());
        for (i, id) in ids.into_iter().enumerate() {
            let community = renumber[&membership[i]];
            assignment.insert(id.clone(), community);
            member_lists[community].push(id);
        }

        let communities = member_lists
            .into_iter()
            .enumerate()
            .map(|(id, members)| {
                let (label, keywords) = label_community(graph, &members);
                Community {
                    id,
                    label,
                    keywords,
                    members,
                }
            })
            .collect();

        Partition {
            communities,
            assignment,
        }
    }
}

impl Default for LouvainPartitioner {
    fn default() -> Self {
        Self::new(PartitionConfig::default())
    }
}

/// Phase 2: contract each community into a super-node.
///
/// Returns the community → super-node renumbering plus the contracted
/// adjacency and self-loop weights.
#[allow(clippy::type_complexity)]
fn contract(
    adj: &[HashMap<usize, f64>],
    self_w: &[f64],
    membership: &[usize],
) -> (Vec<usize>, Vec<HashMap<usize, f64>>, Vec<f64>) {
    let max_comm = membership.iter().copied().max().map_or(0, |m| m + 1);
    let mut remap = vec![usize::MAX; max_comm];
    let mut next = 0usize;
    for &m in membership {
        if remap[m] == usize::MAX {
            remap[m] = next;
            next += 1;
        }
    }

    let mut new_adj: Vec<HashMap<usize, f64>> = vec![HashMap::new(); next];
    let mut new_self = vec![0.0; next];

    for i in 0..adj.len() {
        let ci = remap[membership[i]];
        new_self[ci] += self_w[i];
        for (&j, &w) in &adj[i] {
            if j <= i {
                continue;
            }
            let cj = remap[membership[j]];
            if ci == cj {
                new_self[ci] += w;
            } else {
                *new_adj[ci].entry(cj).or_default() += w;
                *new_adj[cj].entry(ci).or_default() += w;
            }
        }
    }

    (remap, new_adj, new_self)
}

/// Pick a community's label and top keywords by weighted degree inside it.
///
/// Degree ties resolve to the lexicographically greatest label, which is
/// what the natural maximum over `(degree, label)` pairs yields.
fn label_community(graph: &GraphStore, members: &[String]) -> (String, Vec<String>) {
    let member_set: HashSet<&str> = members.iter().map(|m| m.as_str()).collect();

    let mut ranked: Vec<(f64, &str)> = members
        .iter()
        .filter_map(|id| {
            let node = graph.node(id)?;
            let label = node.keyword_label()?;
            Some((graph.weighted_degree_within(id, &member_set), label))
        })
        .collect();
    ranked.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| b.1.cmp(a.1)));

    let label = ranked
        .first()
        .map(|(_, l)| l.to_string())
        .unwrap_or_else(|| PAGES_ONLY_LABEL.to_string());
    let keywords = ranked
        .into_iter()
        .take(COMMUNITY_TOP_KEYWORDS)
        .map(|(_, l)| l.to_string())
        .collect();

    (label, keywords)
}
