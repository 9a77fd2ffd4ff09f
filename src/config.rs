//! Configuration management for the context engine
//!
//! All configurable parameters in one place with environment variable
//! overrides. Sensible defaults, configurable in production.

use std::env;
use std::path::PathBuf;
use tracing::info;

use crate::constants::{
    COMMUNITY_RESOLUTION, COMMUNITY_SEED, CONFIDENCE_COLD_START, DEBOUNCE_MS,
    DECAY_RATE_PER_HOUR, DEFAULT_SNAPSHOT_PATH, EDGE_PRUNE_THRESHOLD, EXTRACTION_TIMEOUT_MS,
    LAPLACE_SMOOTHING, MAX_CONTENT_LENGTH, MAX_CONTEXT_SNIPPET_LENGTH, MAX_DEEP_CONTENT_PAGES,
    MAX_GRAPH_NODES, MAX_KEYWORDS_PER_PAGE, MAX_SUMMARY_LENGTH, MAX_TRAJECTORY_PAGES,
    MIN_INTERVAL_MS,
};

/// Engine configuration loaded from environment with defaults
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Edge decay rate λ per hour (default: 0.01)
    pub decay_rate: f64,

    /// Louvain resolution γ (default: 1.0)
    pub community_resolution: f64,

    /// Louvain PRNG seed (default: 42)
    pub community_seed: u64,

    /// Laplace smoothing α (default: 0.1)
    pub laplace_smoothing: f64,

    /// Node cap for the graph (default: 500)
    pub max_graph_nodes: usize,

    /// Edge removal threshold ε after decay (default: 0.01)
    pub edge_prune_threshold: f64,

    /// Confidence below which the active task is "Exploring" (default: 0.25)
    pub confidence_cold_start: f64,

    /// Keywords accepted per page (default: 12)
    pub max_keywords_per_page: usize,

    /// Content characters fed to extraction (default: 8000)
    pub max_content_length: usize,

    /// Stored snippet characters (default: 3000)
    pub max_snippet_length: usize,

    /// Stored summary characters (default: 1500)
    pub max_summary_length: usize,

    /// Pages in the trajectory section (default: 8)
    pub max_trajectory_pages: usize,

    /// Trajectory pages carrying full snippets (default: 4)
    pub max_deep_content_pages: usize,

    /// Same-URL debounce window in milliseconds (default: 5000)
    pub debounce_ms: u64,

    /// Minimum gap between processed visits in milliseconds (default: 3000)
    pub min_interval_ms: u64,

    /// External extractor soft timeout in milliseconds (default: 3000)
    pub extraction_timeout_ms: u64,

    /// Snapshot file path (default: graph.bin)
    pub snapshot_path: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            decay_rate: DECAY_RATE_PER_HOUR,
            community_resolution: COMMUNITY_RESOLUTION,
            community_seed: COMMUNITY_SEED,
            laplace_smoothing: LAPLACE_SMOOTHING,
            max_graph_nodes: MAX_GRAPH_NODES,
            edge_prune_threshold: EDGE_PRUNE_THRESHOLD,
            confidence_cold_start: CONFIDENCE_COLD_START,
            max_keywords_per_page: MAX_KEYWORDS_PER_PAGE,
            max_content_length: MAX_CONTENT_LENGTH,
            max_snippet_length: MAX_CONTEXT_SNIPPET_LENGTH,
            max_summary_length: MAX_SUMMARY_LENGTH,
            max_trajectory_pages: MAX_TRAJECTORY_PAGES,
            max_deep_content_pages: MAX_DEEP_CONTENT_PAGES,
            debounce_ms: DEBOUNCE_MS,
            min_interval_ms: MIN_INTERVAL_MS,
            extraction_timeout_ms: EXTRACTION_TIMEOUT_MS,
            snapshot_path: PathBuf::from(DEFAULT_SNAPSHOT_PATH),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, target: &mut T) {
    if let Ok(val) = env::var(name) {
        if let Ok(parsed) = val.parse() {
            *target = parsed;
        } else {
            tracing::warn!("Ignoring unparseable {name}={val}");
        }
    }
}

impl EngineConfig {
    /// Load configuration from `DRISHTI_*` environment variables with defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();

        env_parse("DRISHTI_DECAY_RATE", &mut config.decay_rate);
        env_parse(
            "DRISHTI_COMMUNITY_RESOLUTION",
            &mut config.community_resolution,
        );
        env_parse("DRISHTI_COMMUNITY_SEED", &mut config.community_seed);
        env_parse("DRISHTI_LAPLACE_SMOOTHING", &mut config.laplace_smoothing);
        env_parse("DRISHTI_MAX_GRAPH_NODES", &mut config.max_graph_nodes);
        env_parse(
            "DRISHTI_EDGE_PRUNE_THRESHOLD",
            &mut config.edge_prune_threshold,
        );
        env_parse(
            "DRISHTI_CONFIDENCE_COLD_START",
            &mut config.confidence_cold_start,
        );
        env_parse(
            "DRISHTI_MAX_KEYWORDS_PER_PAGE",
            &mut config.max_keywords_per_page,
        );
        env_parse("DRISHTI_MAX_CONTENT_LENGTH", &mut config.max_content_length);
        env_parse(
            "DRISHTI_MAX_CONTEXT_SNIPPET_LENGTH",
            &mut config.max_snippet_length,
        );
        env_parse("DRISHTI_MAX_SUMMARY_LENGTH", &mut config.max_summary_length);
        env_parse(
            "DRISHTI_MAX_TRAJECTORY_PAGES",
            &mut config.max_trajectory_pages,
        );
        env_parse(
            "DRISHTI_MAX_DEEP_CONTENT_PAGES",
            &mut config.max_deep_content_pages,
        );
        env_parse("DRISHTI_DEBOUNCE_MS", &mut config.debounce_ms);
        env_parse("DRISHTI_MIN_INTERVAL_MS", &mut config.min_interval_ms);
        env_parse(
            "DRISHTI_EXTRACTION_TIMEOUT_MS",
            &mut config.extraction_timeout_ms,
        );

        if let Ok(val) = env::var("DRISHTI_SNAPSHOT_PATH") {
            if !val.trim().is_empty() {
                config.snapshot_path = PathBuf::from(val);
            }
        }

        config.sanitize();
        config
    }

    /// Clamp values that would make the engine degenerate
    fn sanitize(&mut self) {
        if self.decay_rate < 0.0 {
            tracing::warn!("decay_rate cannot be negative, using default");
            self.decay_rate = DECAY_RATE_PER_HOUR;
        }
        if self.max_graph_nodes == 0 {
            tracing::warn!("max_graph_nodes cannot be 0, using default");
            self.max_graph_nodes = MAX_GRAPH_NODES;
        }
        if self.max_keywords_per_page == 0 {
            self.max_keywords_per_page = 1;
        }
        self.confidence_cold_start = self.confidence_cold_start.clamp(0.0, 1.0);
        if self.laplace_smoothing <= 0.0 {
            tracing::warn!("laplace_smoothing must be positive, using default");
            self.laplace_smoothing = LAPLACE_SMOOTHING;
        }
    }

    /// Log the effective configuration
    pub fn log(&self) {
        info!("Engine configuration:");
        info!(
            "   Decay: λ={}/h, prune threshold ε={}",
            self.decay_rate, self.edge_prune_threshold
        );
        info!(
            "   Communities: resolution γ={}, seed {}",
            self.community_resolution, self.community_seed
        );
        info!(
            "   Inference: α={}, cold-start θ={}",
            self.laplace_smoothing, self.confidence_cold_start
        );
        info!(
            "   Graph cap: {} nodes, {} keywords/page",
            self.max_graph_nodes, self.max_keywords_per_page
        );
        info!(
            "   Admission: debounce {}ms, min interval {}ms",
            self.debounce_ms, self.min_interval_ms
        );
        info!("   Snapshot: {}", self.snapshot_path.display());
    }
}
