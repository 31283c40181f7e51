//! Refinement loop: termination, convergence, failure, timeout, cancellation
//! and degraded persistence.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use specloop_core::backend::{BackendError, GenerationBackend, RuleBasedBackend};
use specloop_core::refinement::{cancel_pair, CancelHandle, CancelToken, LoopState, SessionStart};
use specloop_core::{Generator, RefinementConfig, RefinementLoop, SessionStatus};
use specloop_state::fakes::MemorySpecStore;
use specloop_state::{
    IterationId, IterationKind, IterationRecord, SpecId, SpecStore, Specification, StorageError, StorageResult,
};

/// Always proposes an oversized chair and ignores revision requests, so
/// the score never moves.
struct StubbornBackend {
    calls: AtomicU32,
}

impl StubbornBackend {
    fn new() -> Self {
        Self {
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl GenerationBackend for StubbornBackend {
    fn name(&self) -> &str {
        "stubborn"
    }

    async fn run(&self, _prompt: &str, _params: &Value) -> Result<Value, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!({
            "design_type": "chair",
            "category": "furniture",
            "materials": ["wood"],
            "dimensions": { "length": 5.0, "width": 5.0, "height": 5.0, "units": "meters" },
            "features": []
        }))
    }
}

struct FailingBackend {
    calls: AtomicU32,
}

#[async_trait]
impl GenerationBackend for FailingBackend {
    fn name(&self) -> &str {
        "failing"
    }

    async fn run(&self, _prompt: &str, _params: &Value) -> Result<Value, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(BackendError::Unavailable("connection refused".to_string()))
    }
}

struct SleepyBackend;

#[async_trait]
impl GenerationBackend for SleepyBackend {
    fn name(&self) -> &str {
        "sleepy"
    }

    async fn run(&self, _prompt: &str, _params: &Value) -> Result<Value, BackendError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(json!({ "design_type": "chair" }))
    }
}

/// Cancels the session from inside the first backend call.
struct CancellingBackend {
    handle: CancelHandle,
    inner: RuleBasedBackend,
}

#[async_trait]
impl GenerationBackend for CancellingBackend {
    fn name(&self) -> &str {
        "cancelling"
    }

    async fn run(&self, prompt: &str, params: &Value) -> Result<Value, BackendError> {
        self.handle.cancel();
        self.inner.run(prompt, params).await
    }
}

/// Reads work, every write fails.
#[derive(Default)]
struct ReadOnlyStore {
    inner: MemorySpecStore,
}

#[async_trait]
impl SpecStore for ReadOnlyStore {
    async fn get_spec(&self, spec_id: &SpecId) -> StorageResult<Specification> {
        self.inner.get_spec(spec_id).await
    }

    async fn put_spec(&self, _spec_id: &SpecId, _spec: &Specification) -> StorageResult<()> {
        Err(StorageError::Connection("store offline".to_string()))
    }

    async fn save_iteration(&self, _record: &IterationRecord) -> StorageResult<IterationId> {
        Err(StorageError::Connection("store offline".to_string()))
    }

    async fn get_iterations(&self, spec_id: &SpecId) -> StorageResult<Vec<IterationRecord>> {
        self.inner.get_iterations(spec_id).await
    }
}

fn config(max_rounds: u32, threshold: f64) -> RefinementConfig {
    RefinementConfig {
        max_rounds,
        convergence_threshold: threshold,
        ..RefinementConfig::default()
    }
}

fn engine(backend: Arc<dyn GenerationBackend>, store: Arc<dyn SpecStore>, config: RefinementConfig) -> RefinementLoop {
    RefinementLoop::new(Arc::new(Generator::new(backend)), store, config)
}

fn fresh(id: &str, prompt: &str) -> SessionStart {
    SessionStart::Fresh {
        spec_id: SpecId::from(id),
        prompt: prompt.to_string(),
    }
}

#[tokio::test]
async fn test_modern_office_chair_terminates_within_budget() {
    let store = Arc::new(MemorySpecStore::new());
    let engine = engine(Arc::new(RuleBasedBackend::new()), store.clone(), config(3, 0.9));

    let outcome = engine
        .run(fresh("spec_office_chair", "Modern office chair"), &Value::Null, &CancelToken::never())
        .await;

    match outcome.status {
        SessionStatus::Converged => {
            let last = outcome.history.last().unwrap();
            assert!(last.score.unwrap() >= 0.9);
        }
        SessionStatus::Exhausted => assert_eq!(outcome.history.len(), 4),
        other => panic!("unexpected terminal status {other}"),
    }
    assert!(outcome.history.len() <= 4);
    assert!(outcome.history_complete);

    let stored = store.get_iterations(&outcome.spec_id).await.unwrap();
    assert_eq!(stored.len(), outcome.history.len());
    for (i, record) in stored.iter().enumerate() {
        assert_eq!(record.round_index, Some(i as u32));
        assert_eq!(record.kind, IterationKind::Refinement);
    }
    assert!(stored[0].before_spec.is_none());

    let best = outcome.best_spec.unwrap();
    assert_eq!(store.get_spec(&outcome.spec_id).await.unwrap(), best);
}

#[tokio::test]
async fn test_exhausted_after_max_rounds_plus_one_records() {
    let store = Arc::new(MemorySpecStore::new());
    let backend = Arc::new(StubbornBackend::new());
    let engine = engine(backend.clone(), store.clone(), config(3, 0.99));

    let outcome = engine
        .run(fresh("spec_stubborn", "a wooden chair"), &Value::Null, &CancelToken::never())
        .await;

    assert_eq!(outcome.status, SessionStatus::Exhausted);
    assert_eq!(outcome.rounds, 4);
    assert_eq!(outcome.history.len(), 4);
    assert_eq!(outcome.feedback_rounds(), 3);
    assert_eq!(backend.calls.load(Ordering::SeqCst), 4);
    assert_eq!(store.iteration_count(), 4);

    // Exactly one pause for feedback between round 0 and round 1.
    let t = &outcome.transitions;
    assert_eq!(
        &t[..5],
        &[
            LoopState::Start,
            LoopState::Generating,
            LoopState::Evaluating,
            LoopState::AwaitingFeedback,
            LoopState::Generating,
        ]
    );
    assert_eq!(t.last(), Some(&LoopState::Exhausted));

    // Later rounds revise the previous spec and carry the synthesized instruction.
    for pair in outcome.history.windows(2) {
        assert_eq!(pair[1].before_spec.as_ref(), Some(&pair[0].after_spec));
        assert!(pair[1].feedback.contains("chair_1"));
    }
}

#[tokio::test]
async fn test_best_score_is_monotonic_and_returned() {
    let store = Arc::new(MemorySpecStore::new());
    let engine = engine(Arc::new(RuleBasedBackend::new()), store, config(4, 0.99));

    let outcome = engine
        .run(
            fresh("spec_monotonic", "rustic dining table with chairs"),
            &Value::Null,
            &CancelToken::never(),
        )
        .await;

    let scores: Vec<f64> = outcome.history.iter().filter_map(|r| r.score).collect();
    assert!(!scores.is_empty());
    for s in &scores {
        assert!((0.0..=1.0).contains(s));
    }
    let max = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    assert_eq!(outcome.best_score, Some(max));

    // The first record reaching the maximum is the returned spec.
    let first_best = outcome.history.iter().find(|r| r.score == Some(max)).unwrap();
    assert_eq!(outcome.best_spec.as_ref(), Some(&first_best.after_spec));
}

#[tokio::test]
async fn test_failing_backend_fails_after_one_degraded_record() {
    let store = Arc::new(MemorySpecStore::new());
    let backend = Arc::new(FailingBackend {
        calls: AtomicU32::new(0),
    });
    let engine = engine(backend.clone(), store.clone(), config(5, 0.85));

    let outcome = engine
        .run(fresh("spec_broken", "Modern office chair"), &Value::Null, &CancelToken::never())
        .await;

    assert_eq!(outcome.status, SessionStatus::Failed);
    assert_eq!(outcome.history.len(), 1);
    assert!(outcome.history[0].degraded);
    assert!(outcome.history[0].after_spec.is_degraded());
    assert!(outcome.failure.as_deref().unwrap().contains("connection refused"));
    // One retry, no more.
    assert_eq!(backend.calls.load(Ordering::SeqCst), 2);

    let stored = store.get_iterations(&SpecId::from("spec_broken")).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert!(stored[0].degraded);
    // A degraded spec never replaces the stored one.
    assert!(store.get_spec(&SpecId::from("spec_broken")).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_round_timeout_fails_session_without_record() {
    let store = Arc::new(MemorySpecStore::new());
    let cfg = RefinementConfig {
        per_round_timeout_ms: 100,
        ..RefinementConfig::default()
    };
    let engine = engine(Arc::new(SleepyBackend), store.clone(), cfg);

    let outcome = engine
        .run(fresh("spec_slow", "a chair"), &Value::Null, &CancelToken::never())
        .await;

    assert_eq!(outcome.status, SessionStatus::Failed);
    assert!(outcome.history.is_empty());
    assert!(outcome.failure.as_deref().unwrap().contains("timeout"));
    assert_eq!(store.iteration_count(), 0);
}

#[tokio::test]
async fn test_cancel_before_start_runs_no_rounds() {
    let store = Arc::new(MemorySpecStore::new());
    let engine = engine(Arc::new(RuleBasedBackend::new()), store.clone(), config(5, 0.85));
    let (handle, token) = cancel_pair();
    handle.cancel();

    let outcome = engine.run(fresh("spec_cancel_early", "a chair"), &Value::Null, &token).await;

    assert_eq!(outcome.status, SessionStatus::Cancelled);
    assert_eq!(outcome.rounds, 0);
    assert!(outcome.best_spec.is_none());
    assert_eq!(store.iteration_count(), 0);
}

#[tokio::test]
async fn test_cancel_mid_round_commits_the_round_in_flight() {
    let store = Arc::new(MemorySpecStore::new());
    let (handle, token) = cancel_pair();
    let backend = Arc::new(CancellingBackend {
        handle,
        inner: RuleBasedBackend::new(),
    });
    let engine = engine(backend, store.clone(), config(5, 0.99));

    let outcome = engine.run(fresh("spec_cancel_mid", "a wooden stool"), &Value::Null, &token).await;

    assert_eq!(outcome.status, SessionStatus::Cancelled);
    assert_eq!(outcome.history.len(), 1);
    assert_eq!(store.iteration_count(), 1);
    // Best-so-far is kept and persisted.
    let best = outcome.best_spec.unwrap();
    assert_eq!(store.get_spec(&SpecId::from("spec_cancel_mid")).await.unwrap(), best);
}

#[tokio::test]
async fn test_store_write_failures_are_reported_not_swallowed() {
    let store = Arc::new(ReadOnlyStore::default());
    let engine = engine(Arc::new(StubbornBackend::new()), store, config(1, 0.99));

    let outcome = engine
        .run(fresh("spec_offline", "a chair"), &Value::Null, &CancelToken::never())
        .await;

    // The loop still runs to completion on the in-memory session.
    assert_eq!(outcome.status, SessionStatus::Exhausted);
    assert_eq!(outcome.history.len(), 2);
    assert!(!outcome.history_complete);
    // Two iteration writes plus the final spec write.
    assert_eq!(outcome.store_errors.len(), 3);
    assert!(outcome.store_errors.iter().all(|e| e.contains("store offline")));
}

#[tokio::test]
async fn test_existing_spec_meeting_threshold_runs_no_rounds() {
    let store = Arc::new(MemorySpecStore::new());
    let engine = engine(Arc::new(RuleBasedBackend::new()), store.clone(), config(5, 0.0));
    let spec = Specification::new(SpecId::from("spec_done"));

    let outcome = engine
        .run(
            SessionStart::Existing {
                spec: spec.clone(),
                instruction: None,
            },
            &Value::Null,
            &CancelToken::never(),
        )
        .await;

    assert_eq!(outcome.status, SessionStatus::Converged);
    assert_eq!(outcome.rounds, 0);
    assert_eq!(outcome.best_spec, Some(spec));
    assert_eq!(store.iteration_count(), 0);
}
