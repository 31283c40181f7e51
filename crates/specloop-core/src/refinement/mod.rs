//! The refinement loop.
//!
//! State machine:
//!
//! ```text
//! Start -> Generating -> Evaluating -> Converged
//!                                   -> Exhausted
//!                                   -> AwaitingFeedback -> Generating
//! Generating -> Failed | Cancelled
//! ```
//!
//! Rounds are numbered from 0. Each round runs generate + evaluate under the
//! per-round timeout and appends exactly one iteration record. A session
//! converges when a round scores at or above the threshold, and is exhausted
//! after the round whose index equals `max_rounds`. The best spec seen is
//! written back to the store when the session converges, is exhausted or is
//! cancelled.

mod cancel;
mod session;

pub use cancel::{cancel_pair, CancelHandle, CancelToken};
pub use session::{LoopState, RefinementSession, SessionOutcome, SessionStatus};

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use specloop_state::{IterationKind, IterationRecord, SpecId, SpecStore, Specification};
use tracing::{debug, Instrument};

use crate::config::RefinementConfig;
use crate::evaluator::{EvaluationResult, Evaluator};
use crate::feedback::FeedbackSynthesizer;
use crate::generator::{GenerationOutcome, Generator};
use crate::metrics::METRICS;
use crate::obs;
use crate::persist;

/// Where a session begins.
#[derive(Debug, Clone)]
pub enum SessionStart {
    /// Generate a new spec from a prompt.
    Fresh { spec_id: SpecId, prompt: String },
    /// Refine a stored spec. Without an instruction the first one is
    /// synthesized from the spec's own evaluation.
    Existing {
        spec: Specification,
        instruction: Option<String>,
    },
}

impl SessionStart {
    fn spec_id(&self) -> &SpecId {
        match self {
            SessionStart::Fresh { spec_id, .. } => spec_id,
            SessionStart::Existing { spec, .. } => &spec.spec_id,
        }
    }

    fn mode(&self) -> &'static str {
        match self {
            SessionStart::Fresh { .. } => "generate",
            SessionStart::Existing { .. } => "iterate",
        }
    }
}

pub struct RefinementLoop {
    generator: Arc<Generator>,
    evaluator: Evaluator,
    feedback: FeedbackSynthesizer,
    store: Arc<dyn SpecStore>,
    config: RefinementConfig,
}

impl RefinementLoop {
    pub fn new(generator: Arc<Generator>, store: Arc<dyn SpecStore>, config: RefinementConfig) -> Self {
        Self {
            evaluator: Evaluator::from_config(&config),
            feedback: FeedbackSynthesizer::from_config(&config),
            generator,
            store,
            config,
        }
    }

    pub fn config(&self) -> &RefinementConfig {
        &self.config
    }

    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }

    /// Run a session to a terminal state.
    ///
    /// Never returns an error: failures inside the session end it as
    /// `Failed`, and store write failures are reported through
    /// `history_complete` and `store_errors`.
    pub async fn run(&self, start: SessionStart, params: &Value, cancel: &CancelToken) -> SessionOutcome {
        let span = obs::session_span(start.spec_id(), start.mode());
        self.run_inner(start, params, cancel).instrument(span).await
    }

    async fn run_inner(&self, start: SessionStart, params: &Value, cancel: &CancelToken) -> SessionOutcome {
        let started = Instant::now();
        let spec_id = start.spec_id().clone();
        obs::emit_session_started(&spec_id, start.mode(), self.config.max_rounds);

        let mut session = RefinementSession::new(spec_id.clone());
        let (mut instruction, mut previous) = match start {
            SessionStart::Fresh { prompt, .. } => (prompt, None),
            SessionStart::Existing { spec, instruction } => {
                let evaluation = self.evaluator.evaluate(&spec);
                session.seed(spec.clone(), evaluation.score);
                let text = match instruction.filter(|t| !t.trim().is_empty()) {
                    Some(text) => text,
                    None => self.feedback.synthesize(&spec, &evaluation).text,
                };
                if text.trim().is_empty() {
                    if evaluation.score >= self.config.convergence_threshold {
                        debug!(score = evaluation.score, "stored spec already meets the threshold");
                        session.enter(LoopState::Converged);
                    } else {
                        debug!(score = evaluation.score, "no actionable feedback for stored spec");
                        session.enter(LoopState::Exhausted);
                    }
                    return self.finish(session, started).await;
                }
                (text, Some(spec))
            }
        };

        loop {
            if cancel.is_cancelled() {
                session.enter(LoopState::Cancelled);
                break;
            }

            session.enter(LoopState::Generating);
            let round = tokio::time::timeout(
                self.config.per_round_timeout(),
                self.generate_and_evaluate(&spec_id, &instruction, params, previous.as_ref()),
            )
            .await;
            let Ok((outcome, evaluation)) = round else {
                session.fail(format!(
                    "round {} exceeded the per-round timeout of {} ms",
                    session.round_index, self.config.per_round_timeout_ms
                ));
                break;
            };

            session.enter(LoopState::Evaluating);
            session.rounds_run += 1;
            session.observe(&outcome.spec, evaluation.score);
            let record = IterationRecord::new(
                IterationKind::Refinement,
                Some(session.round_index),
                previous.clone(),
                outcome.spec.clone(),
                instruction.clone(),
                Some(evaluation.score),
            );
            obs::emit_round_committed(&spec_id, session.round_index, evaluation.score, record.degraded);
            METRICS.inc_rounds();
            self.append_record(&mut session, record).await;
            session.current_spec = Some(outcome.spec.clone());

            if let Some(failure) = outcome.failure {
                session.fail(format!("generation failed after {} attempts: {failure}", outcome.attempts));
                break;
            }
            if evaluation.score >= self.config.convergence_threshold {
                session.enter(LoopState::Converged);
                break;
            }
            if session.round_index >= self.config.max_rounds {
                session.enter(LoopState::Exhausted);
                break;
            }

            session.enter(LoopState::AwaitingFeedback);
            let next = self.feedback.synthesize(&outcome.spec, &evaluation);
            if next.is_empty() {
                session.enter(LoopState::Exhausted);
                break;
            }
            debug!(round_index = session.round_index, instruction = %next.text, "feedback synthesized");
            instruction = next.text;
            previous = Some(outcome.spec);
            session.round_index += 1;
        }

        self.finish(session, started).await
    }

    async fn generate_and_evaluate(
        &self,
        spec_id: &SpecId,
        instruction: &str,
        params: &Value,
        previous: Option<&Specification>,
    ) -> (GenerationOutcome, EvaluationResult) {
        let outcome = self.generator.generate(spec_id, instruction, params, previous).await;
        let evaluation = self.evaluator.evaluate(&outcome.spec);
        (outcome, evaluation)
    }

    async fn append_record(&self, session: &mut RefinementSession, record: IterationRecord) {
        if let Err(e) = persist::save_iteration(self.store.as_ref(), &record).await {
            obs::emit_store_write_failed(&session.spec_id, "save_iteration", &e);
            METRICS.inc_store_write_failures();
            session.store_errors.push(format!(
                "round {}: failed to save iteration: {e}",
                record.round_index.unwrap_or_default()
            ));
        }
        session.history.push(record);
    }

    async fn persist_best(&self, session: &mut RefinementSession) {
        let Some(best) = session.best_spec.as_ref() else {
            return;
        };
        if best.is_degraded() {
            return;
        }
        if let Err(e) = persist::put_spec(self.store.as_ref(), best).await {
            obs::emit_store_write_failed(&session.spec_id, "put_spec", &e);
            METRICS.inc_store_write_failures();
            session
                .store_errors
                .push(format!("failed to store best spec: {e}"));
        }
    }

    async fn finish(&self, mut session: RefinementSession, started: Instant) -> SessionOutcome {
        match session.status {
            SessionStatus::Converged | SessionStatus::Exhausted | SessionStatus::Cancelled
                if session.rounds_run > 0 =>
            {
                self.persist_best(&mut session).await;
            }
            _ => {}
        }
        match session.status {
            SessionStatus::Converged => METRICS.inc_converged(),
            SessionStatus::Exhausted => METRICS.inc_exhausted(),
            SessionStatus::Failed => METRICS.inc_failed(),
            SessionStatus::Cancelled => METRICS.inc_cancelled(),
            SessionStatus::Running => {}
        }
        obs::emit_session_finished(
            &session.spec_id,
            session.status.as_str(),
            session.rounds_run,
            session.best_score(),
            started.elapsed().as_millis() as u64,
        );
        session.into_outcome()
    }
}
