//! Structured lifecycle events for refinement sessions.
//!
//! Every event carries an `event` field so log pipelines can filter on it.
//! Sessions run inside [`session_span`] so everything logged during a
//! session is tagged with its `spec_id`.

use specloop_state::SpecId;
use tracing::{info, warn};

/// Span for one session; attach with `tracing::Instrument::instrument`.
pub fn session_span(spec_id: &SpecId, mode: &str) -> tracing::Span {
    tracing::info_span!("specloop.session", spec_id = %spec_id, mode = %mode)
}

pub fn emit_session_started(spec_id: &SpecId, mode: &str, max_rounds: u32) {
    info!(event = "session.started", spec_id = %spec_id, mode = %mode, max_rounds);
}

pub fn emit_round_committed(spec_id: &SpecId, round_index: u32, score: f64, degraded: bool) {
    info!(
        event = "round.committed",
        spec_id = %spec_id,
        round_index,
        score,
        degraded,
    );
}

pub fn emit_session_finished(
    spec_id: &SpecId,
    status: &str,
    rounds: u32,
    best_score: Option<f64>,
    duration_ms: u64,
) {
    info!(
        event = "session.finished",
        spec_id = %spec_id,
        status = %status,
        rounds,
        best_score = best_score.unwrap_or(f64::NAN),
        duration_ms,
    );
}

pub fn emit_switch_applied(spec_id: &SpecId, changes: usize, degraded: bool) {
    info!(event = "switch.applied", spec_id = %spec_id, changes, degraded);
}

pub fn emit_store_write_failed(spec_id: &SpecId, operation: &str, error: &dyn std::fmt::Display) {
    warn!(event = "store.write_failed", spec_id = %spec_id, operation = %operation, error = %error);
}

pub fn emit_generator_fallback(spec_id: &SpecId, reason: &str) {
    warn!(event = "generator.fallback", spec_id = %spec_id, reason = %reason);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_span_enters() {
        let span = session_span(&SpecId::from("spec_span"), "generate");
        let _entered = span.enter();
        emit_session_started(&SpecId::from("spec_span"), "generate", 3);
    }
}
