//! Per-session state and the externally visible outcome.

use serde::{Deserialize, Serialize};
use specloop_state::{IterationRecord, SpecId, Specification};

/// Terminal (or running) status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Converged,
    Exhausted,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Converged => "converged",
            SessionStatus::Exhausted => "exhausted",
            SessionStatus::Failed => "failed",
            SessionStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Running)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// States of the loop state machine, recorded in order of entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Start,
    Generating,
    Evaluating,
    AwaitingFeedback,
    Converged,
    Exhausted,
    Failed,
    Cancelled,
}

/// Mutable state owned by one running session.
#[derive(Debug, Clone)]
pub struct RefinementSession {
    pub spec_id: SpecId,
    pub current_spec: Option<Specification>,
    /// Index of the round in progress, starting at 0
    pub round_index: u32,
    /// Rounds that produced a spec
    pub rounds_run: u32,
    best_score: f64,
    pub best_spec: Option<Specification>,
    pub history: Vec<IterationRecord>,
    pub status: SessionStatus,
    pub transitions: Vec<LoopState>,
    pub failure: Option<String>,
    pub store_errors: Vec<String>,
}

impl RefinementSession {
    pub fn new(spec_id: SpecId) -> Self {
        Self {
            spec_id,
            current_spec: None,
            round_index: 0,
            rounds_run: 0,
            best_score: f64::NEG_INFINITY,
            best_spec: None,
            history: Vec::new(),
            status: SessionStatus::Running,
            transitions: vec![LoopState::Start],
            failure: None,
            store_errors: Vec::new(),
        }
    }

    /// Start from an existing spec whose score is already known.
    pub fn seed(&mut self, spec: Specification, score: f64) {
        self.observe(&spec, score);
        self.current_spec = Some(spec);
    }

    pub fn enter(&mut self, state: LoopState) {
        self.transitions.push(state);
        self.status = match state {
            LoopState::Converged => SessionStatus::Converged,
            LoopState::Exhausted => SessionStatus::Exhausted,
            LoopState::Failed => SessionStatus::Failed,
            LoopState::Cancelled => SessionStatus::Cancelled,
            _ => SessionStatus::Running,
        };
    }

    /// Track the best spec; only a strictly higher score replaces it.
    pub fn observe(&mut self, spec: &Specification, score: f64) -> bool {
        if score > self.best_score {
            self.best_score = score;
            self.best_spec = Some(spec.clone());
            true
        } else {
            false
        }
    }

    pub fn best_score(&self) -> Option<f64> {
        self.best_spec.as_ref().map(|_| self.best_score)
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        self.failure = Some(reason.into());
        self.enter(LoopState::Failed);
    }

    pub fn into_outcome(self) -> SessionOutcome {
        SessionOutcome {
            best_score: self.best_score(),
            history_complete: self.store_errors.is_empty(),
            spec_id: self.spec_id,
            status: self.status,
            rounds: self.rounds_run,
            best_spec: self.best_spec,
            history: self.history,
            failure: self.failure,
            store_errors: self.store_errors,
            transitions: self.transitions,
        }
    }
}

/// What a finished session reports back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionOutcome {
    pub spec_id: SpecId,
    pub status: SessionStatus,
    pub rounds: u32,
    pub best_spec: Option<Specification>,
    pub best_score: Option<f64>,
    /// Records produced by this session, in round order
    pub history: Vec<IterationRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    /// False when some record or the final spec could not be persisted
    pub history_complete: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub store_errors: Vec<String>,
    pub transitions: Vec<LoopState>,
}

impl SessionOutcome {
    /// How many times the loop paused for feedback.
    pub fn feedback_rounds(&self) -> usize {
        self.transitions
            .iter()
            .filter(|s| **s == LoopState::AwaitingFeedback)
            .count()
    }
}
