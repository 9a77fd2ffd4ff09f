//! Documented constants for the context engine
//!
//! All tunable parameters live here with the reasoning behind their values.
//! Every one of them can be overridden through the environment, see
//! [`crate::config::EngineConfig`].

// =============================================================================
// TEMPORAL DECAY
// Edge weights decay exponentially with idle time so that the graph follows
// the user's attention instead of accumulating stale associations forever.
// =============================================================================

/// Exponential decay rate λ per hour for edge weights
///
/// `w(t) = base_weight × e^(−λ × Δt_hours)`
///
/// At 0.01/hour an untouched edge loses half its weight in ~69 hours
/// (`ln 2 / 0.01`) and a `base_weight = 1` edge crosses the prune
/// threshold after ~19 days of inactivity.
pub const DECAY_RATE_PER_HOUR: f64 = 0.01;

/// Edges whose decayed weight falls below this are removed during a sweep
///
/// 0.01 together with [`DECAY_RATE_PER_HOUR`] bounds how long a one-off
/// association survives; reinforced edges (higher `base_weight`) live
/// proportionally longer.
pub const EDGE_PRUNE_THRESHOLD: f64 = 0.01;

// =============================================================================
// GRAPH SIZE
// =============================================================================

/// Hard cap on the number of nodes in the graph
///
/// When exceeded, nodes are pruned by `weighted_degree × recency` score,
/// lowest first. 500 nodes keeps a full clone of the store (used for
/// transactional ingestion) in the tens-of-kilobytes range.
pub const MAX_GRAPH_NODES: usize = 500;

/// Most recent referring page URLs kept on a keyword node, newest first
pub const MAX_PAGE_REFS: usize = 10;

// =============================================================================
// COMMUNITY DETECTION
// =============================================================================

/// Louvain resolution γ (higher ⇒ more, smaller communities)
pub const COMMUNITY_RESOLUTION: f64 = 1.0;

/// Seed for the Louvain node-ordering PRNG
///
/// A fixed seed makes the partition bit-identical across runs on the same
/// graph, which the telemetry and tests rely on.
pub const COMMUNITY_SEED: u64 = 42;

/// Minimum modularity gain to continue another Louvain level
pub const LOUVAIN_MIN_IMPROVEMENT: f64 = 1e-7;

/// Safety bound on Louvain aggregation levels
pub const LOUVAIN_MAX_LEVELS: usize = 10;

/// Keywords carried on each community summary (top by weighted degree)
pub const COMMUNITY_TOP_KEYWORDS: usize = 5;

// =============================================================================
// BAYESIAN INFERENCE
// =============================================================================

/// Laplace smoothing constant α for priors and likelihoods
pub const LAPLACE_SMOOTHING: f64 = 0.1;

/// Overlap contribution when an evidence keyword is a member of a community
///
/// Direct membership outweighs any single decayed edge, so a keyword that
/// belongs to a community dominates mere adjacency to it.
pub const DIRECT_MEMBERSHIP_SCORE: f64 = 3.0;

/// Posterior confidence below which the engine reports "Exploring"
pub const CONFIDENCE_COLD_START: f64 = 0.25;

// =============================================================================
// EXTRACTION & CONTENT LIMITS
// =============================================================================

/// Maximum keywords accepted per page visit
pub const MAX_KEYWORDS_PER_PAGE: usize = 12;

/// Page content is truncated to this many characters before extraction
pub const MAX_CONTENT_LENGTH: usize = 8000;

/// Stored content snippet length in characters
pub const MAX_CONTEXT_SNIPPET_LENGTH: usize = 3000;

/// Stored summary length cap in characters
pub const MAX_SUMMARY_LENGTH: usize = 1500;

/// Summary accumulation target: sentences are added until this length
pub const SUMMARY_TARGET_LENGTH: usize = 1000;

/// Score bonus for a token that also appears in the page title
pub const TITLE_SCORE_BOOST: usize = 3;

/// Minimum token length considered a keyword candidate
pub const MIN_TOKEN_LENGTH: usize = 3;

// =============================================================================
// CONTEXT DOCUMENT SHAPE
// =============================================================================

/// Pages listed in the trajectory section
pub const MAX_TRAJECTORY_PAGES: usize = 8;

/// Trajectory pages that carry the full content snippet
pub const MAX_DEEP_CONTENT_PAGES: usize = 4;

/// Key pages listed in the cluster section
pub const MAX_CLUSTER_PAGES: usize = 6;

/// Cluster key pages that carry the full content snippet
pub const MAX_CLUSTER_DEEP_PAGES: usize = 4;

/// Keyword–keyword relationships listed in the cluster section
pub const MAX_CLUSTER_RELATIONSHIPS: usize = 10;

/// Bridge keywords listed in the bridges section
pub const MAX_BRIDGE_KEYWORDS: usize = 10;

/// Keywords listed on the active-task section
pub const MAX_TASK_KEYWORDS: usize = 8;

/// Topic labels listed per trajectory page
pub const MAX_PAGE_TOPICS: usize = 8;

/// Pages below which the cluster/tasks/bridges sections stay empty
pub const MIN_PAGES_FOR_ENRICHMENT: usize = 3;

/// Keyword labels reported in graph statistics
pub const STATS_TOP_KEYWORDS: usize = 10;

// =============================================================================
// PIPELINE ADMISSION & SCHEDULING
// =============================================================================

/// Repeat visits to the same URL within this window are dropped
pub const DEBOUNCE_MS: u64 = 5000;

/// Minimum gap between two processed visits
pub const MIN_INTERVAL_MS: u64 = 3000;

/// Soft timeout for the external keyword extractor
pub const EXTRACTION_TIMEOUT_MS: u64 = 3000;

/// Queue drain allowance during shutdown before pending visits are aborted
pub const SHUTDOWN_DRAIN_SECS: u64 = 10;

/// Pipeline runs retained in the telemetry ring buffer (in-memory only)
pub const MAX_PIPELINE_RUNS: usize = 20;

/// Characters of step output captured in telemetry previews
pub const STEP_PREVIEW_LENGTH: usize = 160;

// =============================================================================
// PERSISTENCE
// =============================================================================

/// Version tag written as the first byte of every snapshot
pub const SNAPSHOT_VERSION: u8 = 1;

/// Default snapshot file name
pub const DEFAULT_SNAPSHOT_PATH: &str = "graph.bin";
