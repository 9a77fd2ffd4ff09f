//! Bayesian task inference
//!
//! Treats each community as a latent "task" and computes
//! `P(Task | Evidence) ∝ P(Evidence | Task) × P(Task)` with Laplace
//! smoothing, where the evidence is the current visit's keyword set.
//!
//! Priors come from the decayed weight mass inside each community;
//! likelihoods from how strongly the evidence keywords overlap a community,
//! either by direct membership or through their edges into it.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::community::Partition;
use crate::config::EngineConfig;
use crate::constants::{CONFIDENCE_COLD_START, DIRECT_MEMBERSHIP_SCORE, LAPLACE_SMOOTHING};
use crate::extract::normalize_keyword;
use crate::graph::GraphStore;

/// Task label reported while evidence is too weak for a call
pub const EXPLORING_LABEL: &str = "Exploring";

/// Inferrer configuration
#[derive(Debug, Clone)]
pub struct InferenceConfig {
    /// Laplace smoothing constant α
    pub smoothing: f64,
    /// Confidence threshold θ below which the cold-start guard fires
    pub cold_start_threshold: f64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            smoothing: LAPLACE_SMOOTHING,
            cold_start_threshold: CONFIDENCE_COLD_START,
        }
    }
}

impl InferenceConfig {
    pub fn from_engine_config(config: &EngineConfig) -> Self {
        Self {
            smoothing: config.laplace_smoothing,
            cold_start_threshold: config.confidence_cold_start,
        }
    }
}

/// Outcome of one inference pass
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskInference {
    /// Winning community label, or `"Exploring"` under the cold-start guard
    pub active_task: String,
    /// Posterior probability of the winner; 0 under the guard
    pub confidence: f64,
    /// Shannon entropy of the posterior in bits
    pub entropy: f64,
    /// Whether the cold-start guard replaced the winner
    pub cold_start: bool,
    /// Index of the winning community, absent under the guard
    pub active_community: Option<usize>,
    /// Full posterior, indexed by community, kept for telemetry
    pub posterior: Vec<f64>,
}

impl TaskInference {
    pub fn exploring() -> Self {
        Self {
            active_task: EXPLORING_LABEL.to_string(),
            confidence: 0.0,
            entropy: 0.0,
            cold_start: true,
            active_community: None,
            posterior: Vec::new(),
        }
    }
}

impl Default for TaskInference {
    fn default() -> Self {
        Self::exploring()
    }
}

/// Bayesian task inferrer (C4)
pub struct TaskInferrer {
    config: InferenceConfig,
}

impl TaskInferrer {
    pub fn new(config: InferenceConfig) -> Self {
        Self { config }
    }

    /// Infer the active task from the current visit's keywords
    pub fn infer(&self, graph: &GraphStore, partition: &Partition, evidence: &[String]) -> TaskInference {
        let posterior = self.posteriors(graph, partition, evidence);
        if posterior.is_empty() {
            return TaskInference::exploring();
        }

        let entropy = Self::entropy(&posterior);

        // Argmax over (probability, label); probability ties resolve to the
        // lexicographically greatest label, consistent with community labeling
        let (winner, confidence) = posterior
            .iter()
            .enumerate()
            .map(|(i, &p)| (i, p))
            .max_by(|a, b| {
                a.1.total_cmp(&b.1)
                    .then_with(|| partition.label(a.0).cmp(partition.label(b.0)))
            })
            .expect("non-empty posterior");

        if partition.len() < 2 || confidence < self.config.cold_start_threshold {
            return TaskInference {
                entropy,
                posterior,
                ..TaskInference::exploring()
            };
        }

        TaskInference {
            active_task: partition.label(winner).to_string(),
            confidence,
            entropy,
            cold_start: false,
            active_community: Some(winner),
            posterior,
        }
    }

    /// Posterior probability per community; sums to 1 when non-empty
    pub fn posteriors(&self, graph: &GraphStore, partition: &Partition, evidence: &[String]) -> Vec<f64> {
        let n = partition.len();
        if n == 0 {
            return Vec::new();
        }

        let alpha = self.config.smoothing;
        let evidence_ids: HashSet<String> = evidence
            .iter()
            .map(|k| normalize_keyword(k))
            .filter(|k| !k.is_empty())
            .map(|k| format!("kw:{k}"))
            .collect();

        let member_sets: Vec<HashSet<&str>> = partition
            .communities
            .iter()
            .map(|c| c.members.iter().map(|m| m.as_str()).collect())
            .collect();

        // Prior: decayed weight mass inside the community, smoothed
        let mut priors: Vec<f64> = member_sets
            .iter()
            .map(|members| graph.internal_edge_stats(members).1 + alpha)
            .collect();
        let prior_total: f64 = priors.iter().sum();
        for p in priors.iter_mut() {
            *p /= prior_total;
        }

        // Likelihood: per-keyword overlap with the community, smoothed.
        // Direct membership scores a flat bonus; otherwise the keyword
        // contributes the weight of its edges into the community.
        let mut likelihoods: Vec<f64> = member_sets
            .iter()
            .map(|members| {
                let mut overlap = 0.0;
                for kw_id in &evidence_ids {
                    if members.contains(kw_id.as_str()) {
                        overlap += DIRECT_MEMBERSHIP_SCORE;
                    } else {
                        overlap += graph.weighted_degree_within(kw_id, members);
                    }
                }
                overlap + alpha
            })
            .collect();
        let likelihood_total: f64 = likelihoods.iter().sum();
        for l in likelihoods.iter_mut() {
            *l /= likelihood_total;
        }

        // Posterior via Bayes' rule, uniform fallback on a degenerate sum
        let unnormalized: Vec<f64> = priors
            .iter()
            .zip(&likelihoods)
            .map(|(p, l)| p * l)
            .collect();
        let z: f64 = unnormalized.iter().sum();
        if z <= 0.0 || !z.is_finite() {
            return vec![1.0 / n as f64; n];
        }
        unnormalized.into_iter().map(|u| u / z).collect()
    }

    /// Shannon entropy `H = −Σ p·log2(p)` with `0·log 0 = 0`
    pub fn entropy(posterior: &[f64]) -> f64 {
        posterior
            .iter()
            .filter(|&&p| p > 0.0)
            .map(|&p| -p * p.log2())
            .sum()
    }

    /// `D_KL(current ‖ previous)` in bits, over posteriors of equal length.
    ///
    /// Measures how far the task belief shifted between consecutive visits;
    /// a large value flags a context switch.
    pub fn kl_divergence(current: &[f64], previous: &[f64]) -> f64 {
        if current.len() != previous.len() {
            return f64::NAN;
        }
        current
            .iter()
            .zip(previous)
            .filter(|&(&p, _)| p > 0.0)
            .map(|(&p, &q)| p * (p / q.max(1e-10)).log2())
            .sum()
    }
}

impl Default for TaskInferrer {
    fn default() -> Self {
        Self::new(InferenceConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::community::LouvainPartitioner;
    use crate::graph::{GraphStore, PageVisit};

    fn visit(url: &str) -> PageVisit {
        PageVisit {
            url: url.to_string(),
            title: url.to_string(),
            ..Default::default()
        }
    }

    fn kws(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    /// Two clearly separated topics with the react side carrying more mass
    fn two_topic_graph() -> (GraphStore, Partition) {
        let mut graph = GraphStore::default();
        graph
            .ingest(&visit("u1"), &kws(&["react", "hooks"]), 1000.0)
            .unwrap();
        graph
            .ingest(&visit("u1"), &kws(&["react", "hooks"]), 1001.0)
            .unwrap();
        graph
            .ingest(&visit("u2"), &kws(&["python", "fastapi"]), 1002.0)
            .unwrap();
        let partition = LouvainPartitioner::default().partition(&graph);
        (graph, partition)
    }

    #[test]
    fn test_posterior_is_probability_distribution() {
        let (graph, partition) = two_topic_graph();
        let posterior =
            TaskInferrer::default().posteriors(&graph, &partition, &kws(&["react", "hooks"]));

        assert_eq!(posterior.len(), partition.len());
        assert!(posterior.iter().all(|&p| (0.0..=1.0).contains(&p)));
        let sum: f64 = posterior.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_direct_membership_wins() {
        let (graph, partition) = two_topic_graph();
        let inference = TaskInferrer::default().infer(&graph, &partition, &kws(&["react"]));
        assert!(!inference.cold_start);
        assert_eq!(inference.active_task, "react");
        assert!(inference.confidence > 0.5);
    }

    #[test]
    fn test_unknown_keywords_fall_back_to_prior() {
        let (graph, partition) = two_topic_graph();
        let inferrer = TaskInferrer::default();

        let posterior = inferrer.posteriors(&graph, &partition, &kws(&["quantum", "biology"]));
        let prior_only = inferrer.posteriors(&graph, &partition, &[]);
        for (a, b) in posterior.iter().zip(&prior_only) {
            assert!((a - b).abs() < 1e-12);
        }

        // The heavier community holds the larger prior
        let react_comm = partition.community_of("kw:react").unwrap();
        let python_comm = partition.community_of("kw:python").unwrap();
        assert!(posterior[react_comm] > posterior[python_comm]);
    }

    #[test]
    fn test_single_community_is_cold_start() {
        let mut graph = GraphStore::default();
        graph
            .ingest(&visit("u1"), &kws(&["react", "hooks"]), 1000.0)
            .unwrap();
        let partition = LouvainPartitioner::default().partition(&graph);
        assert_eq!(partition.len(), 1);

        let inference = TaskInferrer::default().infer(&graph, &partition, &kws(&["react"]));
        assert!(inference.cold_start);
        assert_eq!(inference.active_task, EXPLORING_LABEL);
        assert_eq!(inference.confidence, 0.0);
        assert_eq!(inference.active_community, None);
        // Posterior survives the guard for telemetry
        assert_eq!(inference.posterior.len(), 1);
    }

    #[test]
    fn test_empty_partition_explores() {
        let graph = GraphStore::default();
        let inference =
            TaskInferrer::default().infer(&graph, &Partition::default(), &kws(&["anything"]));
        assert!(inference.cold_start);
        assert!(inference.posterior.is_empty());
        assert_eq!(inference.entropy, 0.0);
    }

    #[test]
    fn test_entropy_bounds() {
        assert_eq!(TaskInferrer::entropy(&[]), 0.0);
        assert_eq!(TaskInferrer::entropy(&[1.0]), 0.0);
        let uniform = TaskInferrer::entropy(&[0.25; 4]);
        assert!((uniform - 2.0).abs() < 1e-12);
        // Zero entries contribute nothing
        assert_eq!(TaskInferrer::entropy(&[1.0, 0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_kl_divergence() {
        let p = [0.5, 0.5];
        assert!(TaskInferrer::kl_divergence(&p, &p).abs() < 1e-12);

        let shifted = TaskInferrer::kl_divergence(&[0.9, 0.1], &[0.5, 0.5]);
        assert!(shifted > 0.0);

        assert!(TaskInferrer::kl_divergence(&[1.0], &[0.5, 0.5]).is_nan());
    }

    #[test]
    fn test_evidence_keywords_are_normalized() {
        let (graph, partition) = two_topic_graph();
        let inferrer = TaskInferrer::default();
        let a = inferrer.posteriors(&graph, &partition, &kws(&["React", "  HOOKS "]));
        let b = inferrer.posteriors(&graph, &partition, &kws(&["react", "hooks"]));
        assert_eq!(a, b);
    }
}
