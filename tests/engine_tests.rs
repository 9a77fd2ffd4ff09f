//! Engine Integration Tests
//!
//! Drives the full pipeline through the public engine surface with a manual
//! clock, an in-memory snapshot store, and admission control disabled
//! unless a test turns it back on. Covers the end-to-end visit scenarios:
//! cold start, reinforcement, community emergence, decay, cap enforcement,
//! and deterministic partitioning.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use drishti_context::clock::ManualClock;
use drishti_context::config::EngineConfig;
use drishti_context::engine::{BootstrapOptions, Engine};
use drishti_context::extract::ExternalExtractor;
use drishti_context::pipeline::{RunStatus, StepStatus, VisitRequest};
use drishti_context::snapshot::MemorySnapshotStore;
use drishti_context::SnapshotStore;

fn test_config() -> EngineConfig {
    EngineConfig {
        debounce_ms: 0,
        min_interval_ms: 0,
        ..Default::default()
    }
}

struct Harness {
    engine: Engine,
    clock: Arc<ManualClock>,
    snapshots: Arc<MemorySnapshotStore>,
}

fn bootstrap(config: EngineConfig) -> Harness {
    bootstrap_with(config, None, Arc::new(MemorySnapshotStore::new()))
}

fn bootstrap_with(
    config: EngineConfig,
    external: Option<Arc<dyn ExternalExtractor>>,
    snapshots: Arc<MemorySnapshotStore>,
) -> Harness {
    let clock = ManualClock::new(1000.0);
    let engine = Engine::bootstrap(
        config,
        BootstrapOptions {
            clock: clock.clone(),
            snapshot_store: snapshots.clone(),
            external_extractor: external,
        },
    )
    .expect("bootstrap");
    Harness {
        engine,
        clock,
        snapshots,
    }
}

fn request(url: &str, title: &str, keywords: &[&str], timestamp: f64) -> VisitRequest {
    VisitRequest {
        url: url.to_string(),
        title: title.to_string(),
        content: None,
        keywords: Some(keywords.iter().map(|k| k.to_string()).collect()),
        summary: None,
        timestamp,
    }
}

impl Harness {
    async fn analyze(&self, req: VisitRequest) -> Arc<drishti_context::ContextDocument> {
        self.clock.set(req.timestamp);
        self.engine.analyze(req).await.expect("analyze")
    }
}

// =============================================================================
// END-TO-END SCENARIOS
// =============================================================================

#[tokio::test]
async fn scenario_cold_start() {
    let h = bootstrap(test_config());

    let doc = h
        .analyze(request("u1", "React Docs", &["react", "hooks"], 1000.0))
        .await;

    assert_eq!(doc.active_task.label, "Exploring");
    assert_eq!(doc.active_task.confidence, 0.0);
    assert!(doc.cluster.is_none());
    assert!(doc.all_tasks.is_empty());
    assert!(doc.bridges.is_empty());

    let stats = h.engine.get_stats();
    assert_eq!(stats.node_count, 3);
    assert_eq!(stats.edge_count, 3);

    let export = h.engine.get_graph();
    assert!(export.edges.iter().all(|e| e.base_weight == 1.0));

    h.engine.shutdown().await;
}

#[tokio::test]
async fn scenario_reinforcement() {
    let h = bootstrap(test_config());

    h.analyze(request("u1", "React Docs", &["react", "hooks"], 1000.0))
        .await;
    h.analyze(request("u1", "React Docs", &["react", "hooks"], 1001.0))
        .await;

    let stats = h.engine.get_stats();
    assert_eq!(stats.node_count, 3);

    let export = h.engine.get_graph();
    assert!(export.edges.iter().all(|e| e.base_weight == 2.0));
    let page = export
        .nodes
        .iter()
        .find(|n| n.node_type == "page")
        .expect("page node");
    assert_eq!(page.visit_count, Some(2));

    h.engine.shutdown().await;
}

#[tokio::test]
async fn scenario_second_community_emerges() {
    let h = bootstrap(test_config());

    h.analyze(request("u1", "React Docs", &["react", "hooks"], 1000.0))
        .await;
    h.analyze(request("u1", "React Docs", &["react", "hooks"], 1001.0))
        .await;
    h.analyze(request("u2", "FastAPI", &["python", "fastapi"], 1002.0))
        .await;

    let stats = h.engine.get_stats();
    assert_eq!(stats.node_count, 6);
    assert_eq!(stats.edge_count, 6);
    assert_eq!(stats.community_count, 2);

    // Each triangle lands in its own community
    let export = h.engine.get_graph();
    let community_of = |id: &str| {
        export
            .nodes
            .iter()
            .find(|n| n.id == id)
            .map(|n| n.community)
            .unwrap()
    };
    let react = community_of("kw:react");
    assert_eq!(community_of("kw:hooks"), react);
    assert_eq!(community_of("page:u1"), react);
    let python = community_of("kw:python");
    assert_ne!(react, python);
    assert_eq!(community_of("kw:fastapi"), python);
    assert_eq!(community_of("page:u2"), python);

    h.engine.shutdown().await;
}

#[tokio::test]
async fn scenario_decay_shifts_posterior() {
    let h = bootstrap(test_config());

    h.analyze(request("u1", "React Docs", &["react", "hooks"], 1000.0))
        .await;
    h.analyze(request("u1", "React Docs", &["react", "hooks"], 1001.0))
        .await;
    h.analyze(request("u2", "FastAPI", &["python", "fastapi"], 1002.0))
        .await;

    // ~277.8 hours later, a third python-leaning visit
    let later = 1002.0 + 1_000_000.0;
    let doc = h
        .analyze(request("u3", "More Python", &["python", "asyncio"], later))
        .await;

    // Old edges decayed to base_weight · e^(−0.01·277.8) ≈ base · 0.0622
    let export = h.engine.get_graph();
    let factor = (-0.01f64 * (1_000_000.0 / 3600.0)).exp();
    let old_edge = export
        .edges
        .iter()
        .find(|e| e.source == "kw:hooks" && e.target == "kw:react")
        .expect("react-hooks edge survives");
    assert_eq!(old_edge.base_weight, 2.0);
    assert!((old_edge.weight - 2.0 * factor).abs() < 1e-6);

    // The posterior strongly favors the python-containing community
    assert_eq!(doc.active_task.label, "python");
    assert!(doc.active_task.confidence > 0.9);
    assert_eq!(doc.all_tasks[0].label, "python");

    h.engine.shutdown().await;
}

#[tokio::test]
async fn scenario_cap_enforcement() {
    let config = EngineConfig {
        max_graph_nodes: 5,
        ..test_config()
    };
    let h = bootstrap(config);

    for i in 0..6 {
        let ka = format!("kw{i}a");
        let kb = format!("kw{i}b");
        h.analyze(request(
            &format!("u{i}"),
            "Visit",
            &[&ka, &kb],
            1000.0 + i as f64 * 10.0,
        ))
        .await;
    }

    let stats = h.engine.get_stats();
    assert_eq!(stats.node_count, 5);
    assert_eq!(stats.max_nodes, 5);

    // The newest triangle survives whole
    let export = h.engine.get_graph();
    let ids: Vec<&str> = export.nodes.iter().map(|n| n.id.as_str()).collect();
    assert!(ids.contains(&"page:u5"));
    assert!(ids.contains(&"kw:kw5a"));
    assert!(ids.contains(&"kw:kw5b"));

    h.engine.shutdown().await;
}

#[tokio::test]
async fn scenario_deterministic_partition() {
    let run = || async {
        let h = bootstrap(test_config());
        h.analyze(request("u1", "React Docs", &["react", "hooks"], 1000.0))
            .await;
        h.analyze(request("u1", "React Docs", &["react", "hooks"], 1001.0))
            .await;
        h.analyze(request("u2", "FastAPI", &["python", "fastapi"], 1002.0))
            .await;
        let export = h.engine.get_graph();
        h.engine.shutdown().await;
        serde_json::to_string(&export).unwrap()
    };

    assert_eq!(run().await, run().await);
}

// =============================================================================
// LAWS & DEGRADATION
// =============================================================================

#[tokio::test]
async fn single_visit_never_clears_cold_start() {
    let h = bootstrap(test_config());
    let doc = h
        .analyze(request("only", "One Visit", &["alpha", "beta"], 1000.0))
        .await;
    assert_eq!(doc.active_task.label, "Exploring");
    assert!(doc.active_task.confidence < 0.25);
    h.engine.shutdown().await;
}

#[tokio::test]
async fn long_idle_graph_accepts_new_visits() {
    let h = bootstrap(test_config());
    h.analyze(request("old", "Old", &["stale", "topic"], 1000.0))
        .await;

    let later = 1000.0 + 3.0 * 365.0 * 24.0 * 3600.0;
    h.analyze(request("new", "New", &["fresh", "things"], later))
        .await;

    let export = h.engine.get_graph();
    let ids: Vec<&str> = export.nodes.iter().map(|n| n.id.as_str()).collect();
    assert!(!ids.contains(&"page:old"));
    assert!(ids.contains(&"page:new"));
    h.engine.shutdown().await;
}

// =============================================================================
// ADMISSION CONTROL
// =============================================================================

#[tokio::test]
async fn debounce_drops_rapid_same_url_visits() {
    let config = EngineConfig {
        debounce_ms: 5000,
        min_interval_ms: 0,
        ..Default::default()
    };
    let h = bootstrap(config);

    h.analyze(request("u1", "First", &["alpha", "beta"], 1000.0))
        .await;
    // One second later: inside the window, dropped without processing
    h.analyze(request("u1", "Second", &["gamma", "delta"], 1001.0))
        .await;

    let export = h.engine.get_graph();
    let page = export.nodes.iter().find(|n| n.id == "page:u1").unwrap();
    assert_eq!(page.visit_count, Some(1));
    assert!(!export.nodes.iter().any(|n| n.id == "kw:gamma"));

    // Outside the window the same URL is accepted again
    h.analyze(request("u1", "Third", &["alpha", "beta"], 1010.0))
        .await;
    let export = h.engine.get_graph();
    let page = export.nodes.iter().find(|n| n.id == "page:u1").unwrap();
    assert_eq!(page.visit_count, Some(2));

    h.engine.shutdown().await;
}

#[tokio::test]
async fn internal_urls_are_rejected() {
    let h = bootstrap(test_config());
    let err = h
        .engine
        .analyze(request("chrome://settings", "Settings", &["x"], 1000.0))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_INPUT");

    let err = h
        .engine
        .analyze(VisitRequest {
            timestamp: f64::NAN,
            ..request("https://ok.example", "t", &["x"], 0.0)
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_INPUT");

    assert_eq!(h.engine.get_stats().node_count, 0);
    h.engine.shutdown().await;
}

// =============================================================================
// EXTRACTION PATHS
// =============================================================================

struct FixedExtractor(Vec<String>);

#[async_trait]
impl ExternalExtractor for FixedExtractor {
    async fn extract(&self, _title: &str, _text: &str) -> Option<Vec<String>> {
        Some(self.0.clone())
    }
}

struct StalledExtractor;

#[async_trait]
impl ExternalExtractor for StalledExtractor {
    async fn extract(&self, _title: &str, _text: &str) -> Option<Vec<String>> {
        tokio::time::sleep(Duration::from_secs(300)).await;
        Some(vec!["never".to_string()])
    }
}

#[tokio::test]
async fn external_extractor_supplies_keywords() {
    let external: Arc<dyn ExternalExtractor> =
        Arc::new(FixedExtractor(vec!["Alpha".into(), "beta".into()]));
    let h = bootstrap_with(
        test_config(),
        Some(external),
        Arc::new(MemorySnapshotStore::new()),
    );

    let mut req = request("u1", "Title", &[], 1000.0);
    req.keywords = None;
    req.content = Some("body text that the external extractor supersedes".into());
    h.clock.set(1000.0);
    h.engine.analyze(req).await.unwrap();

    let export = h.engine.get_graph();
    let ids: Vec<&str> = export.nodes.iter().map(|n| n.id.as_str()).collect();
    assert!(ids.contains(&"kw:alpha"), "external keywords are normalized");
    assert!(ids.contains(&"kw:beta"));
    assert!(h.engine.get_stats().extractor_healthy);

    h.engine.shutdown().await;
}

#[tokio::test]
async fn stalled_extractor_falls_back_to_heuristic() {
    let config = EngineConfig {
        extraction_timeout_ms: 50,
        ..test_config()
    };
    let external: Arc<dyn ExternalExtractor> = Arc::new(StalledExtractor);
    let h = bootstrap_with(config, Some(external), Arc::new(MemorySnapshotStore::new()));

    let mut req = request("u1", "Tokio Runtime", &[], 1000.0);
    req.keywords = None;
    req.content = Some("The tokio runtime schedules asynchronous tasks.".into());
    h.clock.set(1000.0);
    h.engine.analyze(req).await.unwrap();

    let export = h.engine.get_graph();
    let ids: Vec<&str> = export.nodes.iter().map(|n| n.id.as_str()).collect();
    assert!(ids.contains(&"kw:tokio"), "heuristic fallback ran");
    assert!(!ids.contains(&"kw:never"));
    assert!(!h.engine.get_stats().extractor_healthy);

    h.engine.shutdown().await;
}

// =============================================================================
// SURFACE: context, chat, telemetry, reset, persistence
// =============================================================================

#[tokio::test]
async fn context_is_cached_and_broadcast() {
    let h = bootstrap(test_config());
    assert!(h.engine.get_context().is_none());

    let mut rx = h.engine.subscribe();
    let doc = h
        .analyze(request("u1", "React", &["react", "hooks"], 1000.0))
        .await;

    let cached = h.engine.get_context().expect("cached context");
    assert_eq!(*cached, *doc);

    let broadcast = rx.recv().await.expect("broadcast context");
    assert_eq!(*broadcast, *doc);

    h.engine.shutdown().await;
}

#[tokio::test]
async fn chat_context_reflects_latest_graph() {
    let h = bootstrap(test_config());
    h.analyze(request("u1", "React", &["react", "hooks"], 1000.0))
        .await;

    let chat = h.engine.chat_context("what am I working on?");
    assert_eq!(chat.query, "what am I working on?");
    assert_eq!(chat.context_document.trajectory.len(), 1);
    assert_eq!(chat.context_document.trajectory[0].url, "u1");

    h.engine.shutdown().await;
}

#[tokio::test]
async fn pipeline_events_record_each_run() {
    let h = bootstrap(test_config());
    h.analyze(request("u1", "First", &["alpha", "beta"], 1000.0))
        .await;
    h.analyze(request("u2", "Second", &["gamma", "delta"], 1010.0))
        .await;

    let events = h.engine.get_pipeline_events();
    assert_eq!(events.runs.len(), 2);
    assert!(events.runs[0].id < events.runs[1].id);

    for run in &events.runs {
        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.completed_at.is_some());
        let names: Vec<&str> = run.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["extract", "ingest", "partition", "infer", "enrich", "publish"]
        );
        assert!(run.steps.iter().all(|s| s.status == StepStatus::Completed));
    }

    h.engine.shutdown().await;
}

#[tokio::test]
async fn telemetry_buffer_is_capped() {
    let h = bootstrap(test_config());
    for i in 0..25 {
        h.analyze(request(
            &format!("u{i}"),
            "Visit",
            &["common", "topic"],
            1000.0 + i as f64 * 10.0,
        ))
        .await;
    }

    let events = h.engine.get_pipeline_events();
    assert_eq!(events.runs.len(), 20);
    // Oldest runs were evicted
    assert_eq!(events.runs.first().unwrap().url, "u5");
    h.engine.shutdown().await;
}

#[tokio::test]
async fn reset_graph_clears_everything() {
    let h = bootstrap(test_config());
    h.analyze(request("u1", "React", &["react", "hooks"], 1000.0))
        .await;
    assert!(h.engine.get_context().is_some());

    h.engine.reset_graph().unwrap();

    assert_eq!(h.engine.get_stats().node_count, 0);
    assert!(h.engine.get_context().is_none());
    assert_eq!(h.engine.get_graph().nodes.len(), 0);

    // The empty state was snapshotted
    assert!(h.snapshots.read().unwrap().is_some());
    h.engine.shutdown().await;
}

#[tokio::test]
async fn shutdown_persists_and_rejects_new_visits() {
    let snapshots = Arc::new(MemorySnapshotStore::new());
    let h = bootstrap_with(test_config(), None, snapshots.clone());

    h.analyze(request("u1", "React", &["react", "hooks"], 1000.0))
        .await;
    h.engine.shutdown().await;

    let err = h
        .engine
        .analyze(request("u2", "After", &["x", "y"], 2000.0))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "SHUTDOWN_IN_PROGRESS");

    // A fresh engine hydrates the persisted graph and partitions it
    let h2 = bootstrap_with(test_config(), None, snapshots);
    let stats = h2.engine.get_stats();
    assert_eq!(stats.node_count, 3);
    assert_eq!(stats.edge_count, 3);
    assert_eq!(stats.community_count, 1);
    h2.engine.shutdown().await;
}

#[tokio::test]
async fn corrupt_snapshot_starts_empty() {
    let snapshots = Arc::new(MemorySnapshotStore::with_bytes(vec![9, 9, 9, 9]));
    let h = bootstrap_with(test_config(), None, snapshots);
    assert_eq!(h.engine.get_stats().node_count, 0);

    // Still fully functional
    h.analyze(request("u1", "Works", &["fine", "still"], 1000.0))
        .await;
    assert_eq!(h.engine.get_stats().node_count, 3);
    h.engine.shutdown().await;
}

#[tokio::test]
async fn provided_summary_is_preferred() {
    let h = bootstrap(test_config());
    let mut req = request("u1", "Docs", &["alpha", "beta"], 1000.0);
    req.summary = Some("A curated summary.".into());
    req.content = Some("Body content that would otherwise be summarized.".into());
    h.analyze(req).await;

    let export = h.engine.get_graph();
    let page = export.nodes.iter().find(|n| n.id == "page:u1").unwrap();
    assert_eq!(page.summary.as_deref(), Some("A curated summary."));
    h.engine.shutdown().await;
}
