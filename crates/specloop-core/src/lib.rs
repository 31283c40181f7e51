//! specloop core library
//!
//! Generation, evaluation, feedback, diffing and the refinement loop that
//! ties them together, plus the [`AgentCoordinator`] façade.

pub mod backend;
pub mod config;
pub mod coordinator;
pub mod diff;
pub mod error;
pub mod evaluator;
pub mod feedback;
pub mod generator;
pub mod instruction;
pub mod metrics;
pub mod obs;
mod persist;
pub mod reference;
pub mod refinement;
pub mod telemetry;

pub use backend::{BackendError, GenerationBackend, HttpBackend, HttpBackendConfig, RuleBasedBackend};
pub use config::{ConfigError, RefinementConfig};
pub use coordinator::{AgentCoordinator, BatchItem, BatchItemResult, SwitchOutcome};
pub use diff::{apply_changes, diff_specs, Change, ChangeKind, DiffError, SpecDiff};
pub use error::{Result, SpecloopError};
pub use evaluator::{Criterion, CriterionBreakdown, EvaluationResult, Evaluator};
pub use feedback::FeedbackSynthesizer;
pub use generator::{GenerationFailure, GenerationOutcome, Generator};
pub use instruction::{Directive, Instruction};
pub use metrics::METRICS;
pub use refinement::{
    cancel_pair, CancelHandle, CancelToken, LoopState, RefinementLoop, SessionOutcome, SessionStart,
    SessionStatus,
};
pub use telemetry::init_tracing;

pub use specloop_state::{
    DesignObject, Dimensions, IterationKind, IterationRecord, MaterialProperties, SpecId, SpecStore,
    Specification, StorageError,
};
