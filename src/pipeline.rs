//! Visit pipeline orchestration
//!
//! Drives the per-visit sequence extract → ingest → partition → infer →
//! enrich → publish, strictly one visit at a time. Writers funnel through a
//! single worker that owns the graph write lock; readers (chat context,
//! stats, exports) take cheap copies under a read lock and never observe a
//! half-applied visit.
//!
//! Admission control lives here too: same-URL visits are debounced, the
//! queue keeps at most one pending entry per URL (a newer visit supersedes
//! the queued one and inherits its waiting callers), and a minimum gap is
//! enforced between processed visits.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, Notify};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::community::{LouvainPartitioner, Partition, PartitionConfig};
use crate::config::EngineConfig;
use crate::constants::{MAX_PIPELINE_RUNS, STEP_PREVIEW_LENGTH};
use crate::enrich::{ContextDocument, ContextEnricher};
use crate::errors::{EngineError, Result};
use crate::extract::{normalize_keyword, truncate_chars, ExternalExtractor, HeuristicExtractor};
use crate::graph::{GraphStore, PageVisit};
use crate::infer::{InferenceConfig, TaskInference, TaskInferrer};

/// A page-visit event submitted to `analyze`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisitRequest {
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub content: Option<String>,
    /// Pre-extracted keywords (e.g. from an on-device model); used verbatim
    /// after normalization when non-empty
    #[serde(default)]
    pub keywords: Option<Vec<String>>,
    /// Pre-made summary; preferred over the heuristic one when non-empty
    #[serde(default)]
    pub summary: Option<String>,
    /// Seconds since epoch
    pub timestamp: f64,
}

/// Step outcome inside a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Completed,
    Skipped,
    Failed,
}

/// Telemetry for a single pipeline step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    pub started_at: f64,
    pub completed_at: f64,
    pub duration_ms: f64,
    pub status: StepStatus,
    pub output_preview: String,
}

/// Overall outcome of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

/// Telemetry for one visit through the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: u64,
    pub url: String,
    pub title: String,
    pub started_at: f64,
    pub completed_at: Option<f64>,
    pub status: RunStatus,
    pub steps: Vec<StepRecord>,
}

impl PipelineRun {
    fn record_step(
        &mut self,
        name: &str,
        started_at: f64,
        completed_at: f64,
        status: StepStatus,
        preview: impl Into<String>,
    ) {
        self.steps.push(StepRecord {
            name: name.to_string(),
            started_at,
            completed_at,
            duration_ms: ((completed_at - started_at) * 1000.0).max(0.0),
            status,
            output_preview: truncate_chars(&preview.into(), STEP_PREVIEW_LENGTH),
        });
    }
}

/// The `get_pipeline_events` response shape
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineEvents {
    pub runs: Vec<PipelineRun>,
}

const PIPELINE_STEPS: [&str; 6] = [
    "extract",
    "ingest",
    "partition",
    "infer",
    "enrich",
    "publish",
];

type VisitReply = Result<Arc<ContextDocument>>;

struct VisitJob {
    request: VisitRequest,
    repliers: Vec<oneshot::Sender<VisitReply>>,
}

/// What `submit` decided about a visit
pub enum Admission {
    /// Queued; the receiver resolves when the visit (or a superseding visit
    /// for the same URL) has been processed
    Enqueued(oneshot::Receiver<VisitReply>),
    /// Dropped by the same-URL debounce window
    Debounced,
}

/// The serial visit driver (C6)
pub struct PipelineOrchestrator {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    heuristic: HeuristicExtractor,
    external: Option<Arc<dyn ExternalExtractor>>,
    partitioner: LouvainPartitioner,
    inferrer: TaskInferrer,
    enricher: ContextEnricher,

    graph: RwLock<GraphStore>,
    partition: RwLock<Partition>,
    inference: RwLock<TaskInference>,
    published: RwLock<Option<Arc<ContextDocument>>>,

    queue: Mutex<VecDeque<VisitJob>>,
    notify: Notify,
    last_accepted: Mutex<HashMap<String, f64>>,
    telemetry: Mutex<VecDeque<PipelineRun>>,
    next_run_id: AtomicU64,
    last_posterior: Mutex<Option<Vec<f64>>>,

    broadcast_tx: broadcast::Sender<Arc<ContextDocument>>,
    shutting_down: AtomicBool,
    extractor_healthy: AtomicBool,
}

impl PipelineOrchestrator {
    pub fn new(
        config: EngineConfig,
        clock: Arc<dyn Clock>,
        external: Option<Arc<dyn ExternalExtractor>>,
        graph: GraphStore,
        partition: Partition,
    ) -> Self {
        let (broadcast_tx, _) = broadcast::channel(32);
        Self {
            heuristic: HeuristicExtractor::new(&config),
            partitioner: LouvainPartitioner::new(PartitionConfig::from_engine_config(&config)),
            inferrer: TaskInferrer::new(InferenceConfig::from_engine_config(&config)),
            enricher: ContextEnricher::from_engine_config(&config),
            external,
            clock,
            graph: RwLock::new(graph),
            partition: RwLock::new(partition),
            inference: RwLock::new(TaskInference::default()),
            published: RwLock::new(None),
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            last_accepted: Mutex::new(HashMap::new()),
            telemetry: Mutex::new(VecDeque::new()),
            next_run_id: AtomicU64::new(1),
            last_posterior: Mutex::new(None),
            broadcast_tx,
            shutting_down: AtomicBool::new(false),
            extractor_healthy: AtomicBool::new(true),
            config,
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Flag shutdown and wake the worker so it can drain and exit
    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// Drop all pending jobs; their callers observe a closed channel
    pub fn abort_pending(&self) {
        let dropped = {
            let mut queue = self.queue.lock();
            let n = queue.len();
            queue.clear();
            n
        };
        if dropped > 0 {
            warn!("Aborted {dropped} pending visits during shutdown");
        }
    }

    /// Admit a visit into the queue.
    ///
    /// Debounced URLs are dropped; a queued visit for the same URL is
    /// superseded in place and its waiting callers are carried over to the
    /// newer visit.
    pub fn submit(&self, request: VisitRequest) -> Result<Admission> {
        if self.is_shutting_down() {
            return Err(EngineError::ShutdownInProgress);
        }

        let now = self.clock.now_seconds();
        if self.config.debounce_ms > 0 {
            let window = self.config.debounce_ms as f64 / 1000.0;
            let last = self.last_accepted.lock().get(&request.url).copied();
            if let Some(last) = last {
                if now - last < window {
                    debug!(url = %request.url, "Visit debounced");
                    return Ok(Admission::Debounced);
                }
            }
        }
        self.last_accepted.lock().insert(request.url.clone(), now);

        let (tx, rx) = oneshot::channel();
        {
            let mut queue = self.queue.lock();
            if let Some(job) = queue.iter_mut().find(|job| job.request.url == request.url) {
                debug!(url = %request.url, "Queued visit superseded by newer event");
                job.request = request;
                job.repliers.push(tx);
            } else {
                queue.push_back(VisitJob {
                    request,
                    repliers: vec![tx],
                });
            }
        }
        self.notify.notify_one();
        Ok(Admission::Enqueued(rx))
    }

    /// Worker loop: pop and process visits until shutdown drains the queue
    pub async fn worker_loop(self: Arc<Self>) {
        loop {
            let job = self.queue.lock().pop_front();
            match job {
                Some(job) => {
                    self.process_visit(job).await;
                    if self.config.min_interval_ms > 0 {
                        tokio::time::sleep(Duration::from_millis(self.config.min_interval_ms))
                            .await;
                    }
                }
                None => {
                    if self.is_shutting_down() {
                        break;
                    }
                    self.notify.notified().await;
                }
            }
        }
        debug!("Visit worker stopped");
    }

    async fn process_visit(&self, job: VisitJob) {
        let VisitJob { request, repliers } = job;
        let started_at = self.clock.now_seconds();
        let mut run = PipelineRun {
            id: self.next_run_id.fetch_add(1, Ordering::SeqCst),
            url: request.url.clone(),
            title: request.title.clone(),
            started_at,
            completed_at: None,
            status: RunStatus::Running,
            steps: Vec::new(),
        };

        let outcome = self.run_pipeline(&request, &mut run).await;

        // Steps the failure path never reached
        let now = self.clock.now_seconds();
        for name in PIPELINE_STEPS {
            if !run.steps.iter().any(|s| s.name == name) {
                run.record_step(name, now, now, StepStatus::Skipped, "");
            }
        }
        run.completed_at = Some(now);
        run.status = match &outcome {
            Ok(_) => RunStatus::Completed,
            Err(_) => RunStatus::Failed,
        };

        {
            let mut telemetry = self.telemetry.lock();
            telemetry.push_back(run);
            while telemetry.len() > MAX_PIPELINE_RUNS {
                telemetry.pop_front();
            }
        }

        match outcome {
            Ok(document) => {
                for tx in repliers {
                    let _ = tx.send(Ok(document.clone()));
                }
            }
            Err(err) => {
                warn!(url = %request.url, error = %err, "Visit pipeline failed");
                for tx in repliers {
                    let _ = tx.send(Err(err.replicate()));
                }
            }
        }
    }

    /// The visit pipeline proper. Either every step through publish
    /// succeeds, or nothing observable changes.
    async fn run_pipeline(
        &self,
        request: &VisitRequest,
        run: &mut PipelineRun,
    ) -> Result<Arc<ContextDocument>> {
        // ── extract ──────────────────────────────────────────────────────
        let step_start = self.clock.now_seconds();
        let content = truncate_chars(
            request.content.as_deref().unwrap_or(""),
            self.config.max_content_length,
        );
        let extraction = self.heuristic.extract(&request.title, &content);
        let (keywords, source) = self.resolve_keywords(request, &content, &extraction.keywords).await;

        let summary = match request.summary.as_deref().map(str::trim) {
            Some(provided) if !provided.is_empty() => {
                truncate_chars(provided, self.config.max_summary_length)
            }
            _ => extraction.summary.clone(),
        };

        run.record_step(
            "extract",
            step_start,
            self.clock.now_seconds(),
            StepStatus::Completed,
            format!("{} keywords via {source}", keywords.len()),
        );

        // ── ingest, on a staged copy so failures never leak ──────────────
        let step_start = self.clock.now_seconds();
        let visit = PageVisit {
            url: request.url.clone(),
            title: request.title.clone(),
            summary,
            content_snippet: extraction.snippet,
        };
        let mut staged = self.graph.read().clone();
        let ingest_result = staged
            .ingest(&visit, &keywords, request.timestamp)
            .and_then(|stats| staged.check_invariants().map(|_| stats));
        let stats = match ingest_result {
            Ok(stats) => stats,
            Err(err) => {
                run.record_step(
                    "ingest",
                    step_start,
                    self.clock.now_seconds(),
                    StepStatus::Failed,
                    err.message(),
                );
                return Err(err);
            }
        };
        run.record_step(
            "ingest",
            step_start,
            self.clock.now_seconds(),
            StepStatus::Completed,
            format!(
                "{} nodes, {} edges (+{} new, -{} pruned)",
                staged.node_count(),
                staged.edge_count(),
                stats.new_nodes,
                stats.pruned_nodes
            ),
        );

        // ── partition ────────────────────────────────────────────────────
        let step_start = self.clock.now_seconds();
        let partition = self.partitioner.partition(&staged);
        run.record_step(
            "partition",
            step_start,
            self.clock.now_seconds(),
            StepStatus::Completed,
            format!("{} communities", partition.len()),
        );

        // ── infer ────────────────────────────────────────────────────────
        let step_start = self.clock.now_seconds();
        let inference = self.inferrer.infer(&staged, &partition, &keywords);
        let shift = {
            let mut last = self.last_posterior.lock();
            let kl = last
                .as_deref()
                .filter(|prev| prev.len() == inference.posterior.len())
                .map(|prev| TaskInferrer::kl_divergence(&inference.posterior, prev));
            *last = Some(inference.posterior.clone());
            kl
        };
        let mut preview = format!(
            "task={} confidence={:.3} entropy={:.3}",
            inference.active_task, inference.confidence, inference.entropy
        );
        if let Some(kl) = shift {
            preview.push_str(&format!(" shift={kl:.3}"));
        }
        run.record_step(
            "infer",
            step_start,
            self.clock.now_seconds(),
            StepStatus::Completed,
            preview,
        );

        // ── enrich ───────────────────────────────────────────────────────
        let step_start = self.clock.now_seconds();
        let document = Arc::new(self.enricher.enrich(
            &staged,
            &partition,
            &inference,
            self.clock.now_seconds(),
        ));
        run.record_step(
            "enrich",
            step_start,
            self.clock.now_seconds(),
            StepStatus::Completed,
            format!(
                "trajectory={} tasks={} bridges={}",
                document.trajectory.len(),
                document.all_tasks.len(),
                document.bridges.len()
            ),
        );

        // ── publish: swap all shared state in one motion ─────────────────
        let step_start = self.clock.now_seconds();
        {
            let mut graph = self.graph.write();
            *graph = staged;
            *self.partition.write() = partition;
            *self.inference.write() = inference;
            *self.published.write() = Some(document.clone());
        }
        let _ = self.broadcast_tx.send(document.clone());
        run.record_step(
            "publish",
            step_start,
            self.clock.now_seconds(),
            StepStatus::Completed,
            format!("run {} published", run.id),
        );

        Ok(document)
    }

    /// Keyword source precedence: request → external extractor → heuristic
    async fn resolve_keywords(
        &self,
        request: &VisitRequest,
        content: &str,
        heuristic_keywords: &[String],
    ) -> (Vec<String>, &'static str) {
        if let Some(provided) = &request.keywords {
            let cleaned = self.clean_keywords(provided);
            if !cleaned.is_empty() {
                return (cleaned, "request");
            }
        }

        if let Some(external) = &self.external {
            let timeout = Duration::from_millis(self.config.extraction_timeout_ms);
            match tokio::time::timeout(timeout, external.extract(&request.title, content)).await {
                Ok(Some(raw)) => {
                    let cleaned = self.clean_keywords(&raw);
                    if !cleaned.is_empty() {
                        self.extractor_healthy.store(true, Ordering::SeqCst);
                        return (cleaned, "external");
                    }
                    self.extractor_healthy.store(false, Ordering::SeqCst);
                    debug!("External extractor returned no keywords, falling back");
                }
                Ok(None) => {
                    self.extractor_healthy.store(false, Ordering::SeqCst);
                    debug!(
                        "{}",
                        EngineError::ExtractionUnavailable("extractor declined".into()).message()
                    );
                }
                Err(_) => {
                    self.extractor_healthy.store(false, Ordering::SeqCst);
                    warn!(
                        "{}",
                        EngineError::ExtractionUnavailable(format!(
                            "timed out after {}ms",
                            self.config.extraction_timeout_ms
                        ))
                        .message()
                    );
                }
            }
        }

        (heuristic_keywords.to_vec(), "heuristic")
    }

    /// Lowercase, trim, deduplicate (first occurrence wins), cap
    fn clean_keywords(&self, raw: &[String]) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        raw.iter()
            .map(|k| normalize_keyword(k))
            .filter(|k| !k.is_empty() && seen.insert(k.clone()))
            .take(self.config.max_keywords_per_page)
            .collect()
    }

    // =========================================================================
    // Read surface
    // =========================================================================

    /// Last published context document
    pub fn published(&self) -> Option<Arc<ContextDocument>> {
        self.published.read().clone()
    }

    /// Subscribe to published context documents
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<ContextDocument>> {
        self.broadcast_tx.subscribe()
    }

    /// Re-enrich against the current graph with the last partition and
    /// inference: the chat-context read path.
    ///
    /// Copy-on-read: the clones are taken under the graph read guard (the
    /// writer swaps all three together while holding the write lock), then
    /// the enrichment runs without holding anything.
    pub fn chat_document(&self) -> ContextDocument {
        let (graph, partition, inference) = {
            let guard = self.graph.read();
            (
                guard.clone(),
                self.partition.read().clone(),
                self.inference.read().clone(),
            )
        };
        self.enricher
            .enrich(&graph, &partition, &inference, self.clock.now_seconds())
    }

    pub fn pipeline_events(&self) -> PipelineEvents {
        PipelineEvents {
            runs: self.telemetry.lock().iter().cloned().collect(),
        }
    }

    pub fn extractor_healthy(&self) -> bool {
        self.extractor_healthy.load(Ordering::SeqCst)
    }

    pub fn graph(&self) -> &RwLock<GraphStore> {
        &self.graph
    }

    pub fn current_partition(&self) -> Partition {
        self.partition.read().clone()
    }

    /// Drop all derived and published state alongside the graph
    pub fn reset(&self) {
        {
            let mut graph = self.graph.write();
            graph.clear();
            *self.partition.write() = Partition::default();
            *self.inference.write() = TaskInference::default();
            *self.published.write() = None;
        }
        self.last_accepted.lock().clear();
        *self.last_posterior.lock() = None;
        info!("Graph and inference state reset");
    }
}
