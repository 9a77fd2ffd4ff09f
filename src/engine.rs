//! Engine lifecycle and capability surface
//!
//! `Engine::bootstrap` hydrates the graph from the snapshot store, re-runs
//! community detection over whatever survived, and starts the visit worker.
//! `Engine::shutdown` drains the queue (bounded), stops the worker, and
//! writes the final snapshot. In between, the engine exposes the in-process
//! API that transports wrap: analyze, context reads, graph export, stats,
//! telemetry, and chat-context assembly.
//!
//! The engine is designed as a process-wide singleton: construct one per
//! process and clone the handle freely.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::community::{LouvainPartitioner, PartitionConfig};
use crate::config::EngineConfig;
use crate::constants::SHUTDOWN_DRAIN_SECS;
use crate::enrich::ContextDocument;
use crate::errors::{EngineError, Result, ValidationErrorExt};
use crate::extract::ExternalExtractor;
use crate::graph::{GraphExport, GraphStore, GraphTuning};
use crate::pipeline::{Admission, PipelineEvents, PipelineOrchestrator, VisitRequest};
use crate::snapshot::{FileSnapshotStore, SnapshotStore};
use crate::validation;

/// The `get_stats` response shape
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStats {
    pub node_count: usize,
    pub edge_count: usize,
    pub community_count: usize,
    pub max_nodes: usize,
    pub extractor_healthy: bool,
    /// Strongest keyword labels by weighted degree
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub top_keywords: Vec<String>,
}

/// The `chat_context` response shape
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatContext {
    pub context_document: ContextDocument,
    pub query: String,
}

/// Injected capabilities for `bootstrap`
pub struct BootstrapOptions {
    pub clock: Arc<dyn Clock>,
    pub snapshot_store: Arc<dyn SnapshotStore>,
    pub external_extractor: Option<Arc<dyn ExternalExtractor>>,
}

impl BootstrapOptions {
    /// Production wiring: wall clock, file-backed snapshots, no external
    /// extractor
    pub fn with_defaults(config: &EngineConfig) -> Self {
        Self {
            clock: Arc::new(SystemClock),
            snapshot_store: Arc::new(FileSnapshotStore::new(config.snapshot_path.clone())),
            external_extractor: None,
        }
    }
}

struct EngineInner {
    orchestrator: Arc<PipelineOrchestrator>,
    snapshot_store: Arc<dyn SnapshotStore>,
    worker: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

/// The browsing context engine
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Initialize the engine: hydrate the snapshot, partition whatever was
    /// restored, and start the visit worker.
    ///
    /// Must be called from within a tokio runtime. A missing or corrupt
    /// snapshot logs a warning and starts empty; it is never fatal.
    pub fn bootstrap(config: EngineConfig, options: BootstrapOptions) -> Result<Engine> {
        let BootstrapOptions {
            clock,
            snapshot_store,
            external_extractor,
        } = options;

        let tuning = GraphTuning {
            decay_rate: config.decay_rate,
            prune_threshold: config.edge_prune_threshold,
            max_nodes: config.max_graph_nodes,
        };

        let graph = match snapshot_store.read() {
            Ok(Some(bytes)) => match GraphStore::from_snapshot_bytes(&bytes, tuning) {
                Ok(graph) => {
                    info!(
                        nodes = graph.node_count(),
                        edges = graph.edge_count(),
                        "Hydrated knowledge graph from snapshot"
                    );
                    graph
                }
                Err(e) => {
                    warn!("Snapshot unreadable ({e}), starting with an empty graph");
                    GraphStore::new(tuning)
                }
            },
            Ok(None) => GraphStore::new(tuning),
            Err(e) => {
                warn!("Snapshot read failed ({e}), starting with an empty graph");
                GraphStore::new(tuning)
            }
        };

        // Re-detect communities over the hydrated graph so reads before the
        // first visit see a labeled partition
        let partition = if graph.is_empty() {
            Default::default()
        } else {
            LouvainPartitioner::new(PartitionConfig::from_engine_config(&config)).partition(&graph)
        };

        let orchestrator = Arc::new(PipelineOrchestrator::new(
            config,
            clock,
            external_extractor,
            graph,
            partition,
        ));
        let worker = tokio::spawn(Arc::clone(&orchestrator).worker_loop());

        Ok(Engine {
            inner: Arc::new(EngineInner {
                orchestrator,
                snapshot_store,
                worker: parking_lot::Mutex::new(Some(worker)),
            }),
        })
    }

    /// Process a page visit and return the published context document.
    ///
    /// Visits are applied strictly one at a time; a visit debounced by the
    /// same-URL window resolves immediately with the last published context.
    pub async fn analyze(&self, request: VisitRequest) -> Result<Arc<ContextDocument>> {
        validation::validate_url(&request.url).map_validation_err("url")?;
        validation::validate_title(&request.title).map_validation_err("title")?;
        validation::validate_timestamp(request.timestamp).map_validation_err("timestamp")?;

        match self.inner.orchestrator.submit(request)? {
            Admission::Enqueued(rx) => rx.await.map_err(|_| EngineError::ShutdownInProgress)?,
            Admission::Debounced => Ok(self
                .inner
                .orchestrator
                .published()
                .unwrap_or_else(|| Arc::new(ContextDocument::exploring()))),
        }
    }

    /// Last published context document, if any visit has completed
    pub fn get_context(&self) -> Option<Arc<ContextDocument>> {
        self.inner.orchestrator.published()
    }

    /// Serialize the graph with community assignments
    pub fn get_graph(&self) -> GraphExport {
        let orchestrator = &self.inner.orchestrator;
        // Hold the graph read guard across the partition read so both come
        // from the same committed visit
        let graph = orchestrator.graph().read();
        let partition = orchestrator.current_partition();
        graph.export(&partition.assignment, partition.len())
    }

    /// Empty the graph and every piece of derived state, then persist the
    /// empty snapshot
    pub fn reset_graph(&self) -> Result<()> {
        self.inner.orchestrator.reset();
        self.write_snapshot();
        Ok(())
    }

    pub fn get_stats(&self) -> EngineStats {
        let orchestrator = &self.inner.orchestrator;
        let graph = orchestrator.graph().read();
        let stats = graph.stats();
        let max_nodes = graph.tuning().max_nodes;
        let community_count = orchestrator.current_partition().len();
        drop(graph);

        EngineStats {
            node_count: stats.node_count,
            edge_count: stats.edge_count,
            community_count,
            max_nodes,
            extractor_healthy: orchestrator.extractor_healthy(),
            top_keywords: stats.top_keywords,
        }
    }

    /// The 20 most recent pipeline runs, oldest first
    pub fn get_pipeline_events(&self) -> PipelineEvents {
        self.inner.orchestrator.pipeline_events()
    }

    /// Assemble a fresh context document for a chat query.
    ///
    /// Reads a consistent copy of the graph and re-enriches with the last
    /// partition and inference, so the document reflects the latest
    /// committed graph state without blocking the writer.
    pub fn chat_context(&self, query: &str) -> ChatContext {
        ChatContext {
            context_document: self.inner.orchestrator.chat_document(),
            query: query.to_string(),
        }
    }

    /// Subscribe to context documents as visits publish them
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Arc<ContextDocument>> {
        self.inner.orchestrator.subscribe()
    }

    /// Drain the queue (up to the shutdown allowance), stop the worker, and
    /// write the final snapshot. New visits are rejected once this starts.
    pub async fn shutdown(&self) {
        let orchestrator = &self.inner.orchestrator;
        orchestrator.begin_shutdown();

        let handle = self.inner.worker.lock().take();
        if let Some(handle) = handle {
            let abort = handle.abort_handle();
            match tokio::time::timeout(Duration::from_secs(SHUTDOWN_DRAIN_SECS), handle).await {
                Ok(_) => info!("Visit queue drained"),
                Err(_) => {
                    error!("Queue drain exceeded {SHUTDOWN_DRAIN_SECS}s, aborting pending visits");
                    abort.abort();
                    orchestrator.abort_pending();
                }
            }
        }

        self.write_snapshot();
        info!("Engine shutdown complete");
    }

    /// Persist the current graph; failures are logged, never surfaced
    fn write_snapshot(&self) {
        let bytes = { self.inner.orchestrator.graph().read().snapshot_bytes() };
        match bytes {
            Ok(bytes) => {
                if let Err(e) = self.inner.snapshot_store.write(&bytes) {
                    error!("{}", EngineError::SnapshotIo(e.to_string()).message());
                }
            }
            Err(e) => error!("{}", e.message()),
        }
    }
}
