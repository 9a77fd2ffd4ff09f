//! Context document assembly
//!
//! Folds the graph state, the current partition, and the latest inference
//! into the structured context document handed to downstream consumers.
//! Empty sections are omitted from serialization; when the graph is too
//! small or the inference fell back to "Exploring", only the active-task
//! header and the trajectory are populated.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::community::Partition;
use crate::config::EngineConfig;
use crate::constants::{
    MAX_BRIDGE_KEYWORDS, MAX_CLUSTER_DEEP_PAGES, MAX_CLUSTER_PAGES, MAX_CLUSTER_RELATIONSHIPS,
    MAX_DEEP_CONTENT_PAGES, MAX_PAGE_TOPICS, MAX_TASK_KEYWORDS, MAX_TRAJECTORY_PAGES,
    MIN_PAGES_FOR_ENRICHMENT,
};
use crate::graph::{GraphStore, KeywordRelation, NodeKind};
use crate::infer::TaskInference;

/// Section 1: the inferred active task
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActiveTaskSection {
    pub label: String,
    pub confidence: f64,
    pub entropy: f64,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub keywords: Vec<String>,
}

/// Section 2 entry: one recently visited page
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrajectoryPage {
    pub title: String,
    pub url: String,
    pub summary: String,
    /// Full content snippet, only for the most recent pages
    pub snippet: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub topics: Vec<String>,
    pub age_seconds: f64,
}

/// Section 3 entry: a key page of the active cluster
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterPage {
    pub title: String,
    pub url: String,
    pub summary: String,
    pub snippet: Option<String>,
    pub visit_count: u64,
}

/// Section 3: the active task's community in detail
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterSection {
    pub page_count: usize,
    pub keyword_count: usize,
    pub internal_edge_count: usize,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub key_pages: Vec<ClusterPage>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub key_relationships: Vec<KeywordRelation>,
}

/// Section 4 entry: posterior probability of one task
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskProbability {
    pub label: String,
    pub probability: f64,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub keywords: Vec<String>,
    pub size: usize,
}

/// Section 5 entry: a keyword connecting several communities
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BridgeKeyword {
    pub keyword: String,
    pub communities: Vec<String>,
}

/// The assembled context document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextDocument {
    pub active_task: ActiveTaskSection,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub trajectory: Vec<TrajectoryPage>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cluster: Option<ClusterSection>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub all_tasks: Vec<TaskProbability>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub bridges: Vec<BridgeKeyword>,
}

impl ContextDocument {
    /// The document for an engine that has seen nothing yet
    pub fn exploring() -> Self {
        Self {
            active_task: ActiveTaskSection {
                label: crate::infer::EXPLORING_LABEL.to_string(),
                confidence: 0.0,
                entropy: 0.0,
                keywords: Vec::new(),
            },
            trajectory: Vec::new(),
            cluster: None,
            all_tasks: Vec::new(),
            bridges: Vec::new(),
        }
    }
}

/// Section size limits
#[derive(Debug, Clone, Copy)]
pub struct EnrichLimits {
    pub trajectory_pages: usize,
    pub deep_content_pages: usize,
    pub cluster_pages: usize,
    pub cluster_deep_pages: usize,
    pub cluster_relationships: usize,
    pub bridge_keywords: usize,
    pub task_keywords: usize,
    pub page_topics: usize,
    pub min_pages: usize,
}

impl Default for EnrichLimits {
    fn default() -> Self {
        Self {
            trajectory_pages: MAX_TRAJECTORY_PAGES,
            deep_content_pages: MAX_DEEP_CONTENT_PAGES,
            cluster_pages: MAX_CLUSTER_PAGES,
            cluster_deep_pages: MAX_CLUSTER_DEEP_PAGES,
            cluster_relationships: MAX_CLUSTER_RELATIONSHIPS,
            bridge_keywords: MAX_BRIDGE_KEYWORDS,
            task_keywords: MAX_TASK_KEYWORDS,
            page_topics: MAX_PAGE_TOPICS,
            min_pages: MIN_PAGES_FOR_ENRICHMENT,
        }
    }
}

/// Context enricher (C5)
pub struct ContextEnricher {
    limits: EnrichLimits,
}

impl ContextEnricher {
    pub fn new(limits: EnrichLimits) -> Self {
        Self { limits }
    }

    pub fn from_engine_config(config: &EngineConfig) -> Self {
        Self {
            limits: EnrichLimits {
                trajectory_pages: config.max_trajectory_pages,
                deep_content_pages: config.max_deep_content_pages,
                ..Default::default()
            },
        }
    }

    /// Assemble the context document against the clock time `now`
    pub fn enrich(
        &self,
        graph: &GraphStore,
        partition: &Partition,
        inference: &TaskInference,
        now: f64,
    ) -> ContextDocument {
        let trajectory = self.trajectory(graph, now);

        // Degraded mode: too little history or no confident task call.
        // The header reports "Exploring" either way; the posterior's entropy
        // is preserved for confidence gauging downstream.
        let degraded = graph.page_count() < self.limits.min_pages || inference.cold_start;
        if degraded {
            return ContextDocument {
                active_task: ActiveTaskSection {
                    label: crate::infer::EXPLORING_LABEL.to_string(),
                    confidence: 0.0,
                    entropy: inference.entropy,
                    keywords: Vec::new(),
                },
                trajectory,
                cluster: None,
                all_tasks: Vec::new(),
                bridges: Vec::new(),
            };
        }

        let active_task = ActiveTaskSection {
            label: inference.active_task.clone(),
            confidence: inference.confidence,
            entropy: inference.entropy,
            keywords: inference
                .active_community
                .map(|idx| self.task_keywords(graph, partition, idx))
                .unwrap_or_default(),
        };

        ContextDocument {
            active_task,
            trajectory,
            cluster: inference
                .active_community
                .map(|idx| self.cluster(graph, partition, idx)),
            all_tasks: self.all_tasks(partition, &inference.posterior),
            bridges: self.bridges(graph, partition),
        }
    }

    /// Top keywords of a community by weighted degree inside it
    fn task_keywords(&self, graph: &GraphStore, partition: &Partition, idx: usize) -> Vec<String> {
        let Some(community) = partition.communities.get(idx) else {
            return Vec::new();
        };
        let members: HashSet<&str> = community.members.iter().map(|m| m.as_str()).collect();

        let mut ranked: Vec<(f64, &str)> = community
            .members
            .iter()
            .filter_map(|id| {
                let label = graph.node(id)?.keyword_label()?;
                Some((graph.weighted_degree_within(id, &members), label))
            })
            .collect();
        ranked.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| b.1.cmp(a.1)));
        ranked
            .into_iter()
            .take(self.limits.task_keywords)
            .map(|(_, label)| label.to_string())
            .collect()
    }

    /// Most recent pages with their neighbor-keyword topics
    fn trajectory(&self, graph: &GraphStore, now: f64) -> Vec<TrajectoryPage> {
        graph
            .recent_pages(self.limits.trajectory_pages)
            .into_iter()
            .enumerate()
            .filter_map(|(rank, node)| {
                let NodeKind::Page {
                    url,
                    title,
                    summary,
                    content_snippet,
                    last_visited,
                    ..
                } = &node.kind
                else {
                    return None;
                };

                // Topic labels from neighboring keywords, strongest edges first
                let mut topics: Vec<(f64, &str)> = graph
                    .neighbors(&node.id)
                    .into_iter()
                    .filter_map(|(nbr, weight)| Some((weight, nbr.keyword_label()?)))
                    .collect();
                topics.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(b.1)));

                let snippet = (rank < self.limits.deep_content_pages
                    && !content_snippet.is_empty())
                .then(|| content_snippet.clone());

                Some(TrajectoryPage {
                    title: title.clone(),
                    url: url.clone(),
                    summary: summary.clone(),
                    snippet,
                    topics: topics
                        .into_iter()
                        .take(self.limits.page_topics)
                        .map(|(_, label)| label.to_string())
                        .collect(),
                    age_seconds: (now - last_visited).max(0.0),
                })
            })
            .collect()
    }

    /// Detailed view of the active community
    fn cluster(&self, graph: &GraphStore, partition: &Partition, idx: usize) -> ClusterSection {
        let Some(community) = partition.communities.get(idx) else {
            return ClusterSection {
                page_count: 0,
                keyword_count: 0,
                internal_edge_count: 0,
                key_pages: Vec::new(),
                key_relationships: Vec::new(),
            };
        };
        let members: HashSet<&str> = community.members.iter().map(|m| m.as_str()).collect();

        let mut pages: Vec<&crate::graph::Node> = community
            .members
            .iter()
            .filter_map(|id| graph.node(id))
            .filter(|n| n.is_page())
            .collect();
        let page_count = pages.len();
        let keyword_count = community.members.len() - page_count;

        // Most visited first, recency then id breaking ties
        pages.sort_by(|a, b| {
            let (va, vb) = (page_visits(a), page_visits(b));
            vb.cmp(&va)
                .then_with(|| b.last_touch().total_cmp(&a.last_touch()))
                .then_with(|| a.id.cmp(&b.id))
        });

        let key_pages = pages
            .into_iter()
            .take(self.limits.cluster_pages)
            .enumerate()
            .filter_map(|(rank, node)| {
                let NodeKind::Page {
                    url,
                    title,
                    summary,
                    content_snippet,
                    visit_count,
                    ..
                } = &node.kind
                else {
                    return None;
                };
                let snippet = (rank < self.limits.cluster_deep_pages
                    && !content_snippet.is_empty())
                .then(|| content_snippet.clone());
                Some(ClusterPage {
                    title: title.clone(),
                    url: url.clone(),
                    summary: summary.clone(),
                    snippet,
                    visit_count: *visit_count,
                })
            })
            .collect();

        let (internal_edge_count, _) = graph.internal_edge_stats(&members);

        ClusterSection {
            page_count,
            keyword_count,
            internal_edge_count,
            key_pages,
            key_relationships: graph
                .keyword_edges_in(&members, self.limits.cluster_relationships),
        }
    }

    /// Posterior table over every task, most probable first
    fn all_tasks(&self, partition: &Partition, posterior: &[f64]) -> Vec<TaskProbability> {
        let mut tasks: Vec<TaskProbability> = partition
            .communities
            .iter()
            .map(|community| TaskProbability {
                label: community.label.clone(),
                probability: posterior.get(community.id).copied().unwrap_or(0.0),
                keywords: community.keywords.clone(),
                size: community.members.len(),
            })
            .collect();
        tasks.sort_by(|a, b| {
            b.probability
                .total_cmp(&a.probability)
                .then_with(|| a.label.cmp(&b.label))
        });
        tasks
    }

    /// Keywords whose neighborhoods span several communities
    fn bridges(&self, graph: &GraphStore, partition: &Partition) -> Vec<BridgeKeyword> {
        graph
            .bridging_keywords(&partition.assignment)
            .into_iter()
            .take(self.limits.bridge_keywords)
            .map(|(keyword, communities)| {
                let mut labels: Vec<String> = communities
                    .into_iter()
                    .map(|idx| partition.label(idx).to_string())
                    .collect();
                labels.dedup();
                BridgeKeyword {
                    keyword,
                    communities: labels,
                }
            })
            .collect()
    }
}

impl Default for ContextEnricher {
    fn default() -> Self {
        Self::new(EnrichLimits::default())
    }
}

fn page_visits(node: &crate::graph::Node) -> u64 {
    match &node.kind {
        NodeKind::Page { visit_count, .. } => *visit_count,
        NodeKind::Keyword { .. } => 0,
    }
}
