//! Drishti-Context Library
//!
//! Browsing context engine for contextual assistants. From a stream of
//! page-visit events it maintains a weighted heterogeneous graph linking
//! visited pages to topic keywords, infers after every visit which latent
//! task the user is engaged in, and assembles a structured context document
//! for downstream conversational consumers.
//!
//! # Architecture
//! - Knowledge graph with temporal decay and size-capped pruning
//! - Deterministic Louvain community detection over decayed edge weights
//! - Bayesian task inference with Laplace smoothing and a cold-start guard
//! - Serial visit pipeline with per-URL debounce/coalescing and telemetry
//! - Versioned binary snapshots, written atomically on shutdown
//!
//! Single-process, single-user, fully in-memory; transports and extractors
//! plug in through capability traits.

pub mod clock;
pub mod community;
pub mod config;
pub mod constants;
pub mod engine;
pub mod enrich;
pub mod errors;
pub mod extract;
pub mod graph;
pub mod infer;
pub mod pipeline;
pub mod snapshot;
pub mod validation;

pub use clock::{Clock, ManualClock, SystemClock};
pub use community::{Community, LouvainPartitioner, Partition, PartitionConfig};
pub use config::EngineConfig;
pub use engine::{BootstrapOptions, ChatContext, Engine, EngineStats};
pub use enrich::{ContextDocument, ContextEnricher};
pub use errors::{EngineError, Result};
pub use extract::{ExternalExtractor, HeuristicExtractor};
pub use graph::{GraphExport, GraphStore, GraphTuning, PageVisit};
pub use infer::{TaskInference, TaskInferrer};
pub use pipeline::{PipelineEvents, PipelineRun, VisitRequest};
pub use snapshot::{FileSnapshotStore, MemorySnapshotStore, SnapshotStore};

// Re-export dependencies so tests and embedders use the same versions
pub use chrono;
pub use parking_lot;
