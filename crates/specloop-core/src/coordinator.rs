//! Request routing: new generation, manual switch, iterate and batch.
//!
//! The coordinator only sequences calls into the generator, the diff engine
//! and the refinement loop. Mutating requests on the same `spec_id` are
//! serialized through a per-spec async mutex; requests on different specs
//! never wait on each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use specloop_state::{IterationId, IterationKind, IterationRecord, SpecId, SpecStore, Specification};
use tokio::sync::{OwnedMutexGuard, Semaphore};
use tracing::{debug, instrument, warn};

use crate::config::RefinementConfig;
use crate::diff::{diff_specs, SpecDiff};
use crate::error::{Result, SpecloopError};
use crate::evaluator::EvaluationResult;
use crate::generator::Generator;
use crate::instruction::{Directive, Instruction};
use crate::metrics::METRICS;
use crate::obs;
use crate::persist;
use crate::refinement::{CancelToken, RefinementLoop, SessionOutcome, SessionStart};

/// One async mutex per spec id.
#[derive(Default)]
struct SpecLocks {
    inner: Mutex<HashMap<SpecId, Arc<tokio::sync::Mutex<()>>>>,
}

impl SpecLocks {
    async fn acquire(&self, spec_id: &SpecId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
            // Entries nobody else holds or waits on can go.
            map.retain(|_, l| Arc::strong_count(l) > 1);
            Arc::clone(map.entry(spec_id.clone()).or_default())
        };
        lock.lock_owned().await
    }
}

/// Result of a manual switch.
#[derive(Debug, Clone, Serialize)]
pub struct SwitchOutcome {
    pub spec: Specification,
    pub changes: SpecDiff,
    pub iteration_id: IterationId,
    pub degraded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    pub history_complete: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub store_errors: Vec<String>,
}

/// A single batch request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum BatchItem {
    Generate {
        prompt: String,
    },
    Iterate {
        spec_id: SpecId,
        #[serde(default)]
        instruction: Option<String>,
    },
}

/// Per-item batch result, reported in input order.
#[derive(Debug, Clone, Serialize)]
pub struct BatchItemResult {
    pub index: usize,
    pub item: BatchItem,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<SessionOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchItemResult {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_some()
    }
}

pub struct AgentCoordinator {
    engine: RefinementLoop,
    generator: Arc<Generator>,
    store: Arc<dyn SpecStore>,
    locks: SpecLocks,
    params: Value,
}

impl AgentCoordinator {
    pub fn new(generator: Arc<Generator>, store: Arc<dyn SpecStore>, config: RefinementConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            engine: RefinementLoop::new(Arc::clone(&generator), Arc::clone(&store), config),
            generator,
            store,
            locks: SpecLocks::default(),
            params: Value::Null,
        })
    }

    /// Extra parameters passed through to the generation backend.
    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    pub fn config(&self) -> &RefinementConfig {
        self.engine.config()
    }

    pub async fn generate(&self, prompt: &str) -> Result<SessionOutcome> {
        self.generate_with_cancel(prompt, &CancelToken::never()).await
    }

    /// Start a refinement session from a prompt under a fresh spec id.
    pub async fn generate_with_cancel(&self, prompt: &str, cancel: &CancelToken) -> Result<SessionOutcome> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(SpecloopError::EmptyPrompt);
        }
        let spec_id = SpecId::new();
        let _guard = self.locks.acquire(&spec_id).await;
        let start = SessionStart::Fresh {
            spec_id,
            prompt: prompt.to_string(),
        };
        Ok(self.engine.run(start, &self.params, cancel).await)
    }

    pub async fn iterate(&self, spec_id: &SpecId, instruction: Option<&str>) -> Result<SessionOutcome> {
        self.iterate_with_cancel(spec_id, instruction, &CancelToken::never())
            .await
    }

    /// Refine a stored spec. The spec is loaded after the per-spec lock is
    /// taken, so a queued request sees the previous one's result.
    pub async fn iterate_with_cancel(
        &self,
        spec_id: &SpecId,
        instruction: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<SessionOutcome> {
        let _guard = self.locks.acquire(spec_id).await;
        let spec = self.store.get_spec(spec_id).await?;
        let start = SessionStart::Existing {
            spec,
            instruction: instruction.map(str::to_string),
        };
        Ok(self.engine.run(start, &self.params, cancel).await)
    }

    /// Apply one instruction once: a single generator revision, a diff and
    /// one `ManualSwitch` record. No scoring, no loop.
    #[instrument(skip_all, fields(spec_id = %spec_id))]
    pub async fn switch(&self, spec_id: &SpecId, instruction: &str) -> Result<SwitchOutcome> {
        let instruction = instruction.trim();
        if instruction.is_empty() {
            return Err(SpecloopError::EmptyInstruction);
        }
        let _guard = self.locks.acquire(spec_id).await;
        let before = self.store.get_spec(spec_id).await?;
        validate_targets(&before, &Instruction::from_text(instruction))?;

        let outcome = self
            .generator
            .generate(spec_id, instruction, &self.params, Some(&before))
            .await;
        let degraded = outcome.is_degraded();
        let changes = diff_specs(Some(&before), &outcome.spec);
        debug!(changes = changes.len(), degraded, "switch revision built");

        let record = IterationRecord::new(
            IterationKind::ManualSwitch,
            None,
            Some(before),
            outcome.spec.clone(),
            instruction.to_string(),
            None,
        );

        let mut store_errors = Vec::new();
        if let Err(e) = persist::save_iteration(self.store.as_ref(), &record).await {
            obs::emit_store_write_failed(spec_id, "save_iteration", &e);
            METRICS.inc_store_write_failures();
            store_errors.push(format!("failed to save iteration: {e}"));
        }
        if !degraded {
            if let Err(e) = persist::put_spec(self.store.as_ref(), &outcome.spec).await {
                obs::emit_store_write_failed(spec_id, "put_spec", &e);
                METRICS.inc_store_write_failures();
                store_errors.push(format!("failed to store spec: {e}"));
            }
        }
        obs::emit_switch_applied(spec_id, changes.len(), degraded);

        Ok(SwitchOutcome {
            spec: outcome.spec,
            changes,
            iteration_id: record.iter_id,
            degraded,
            failure: outcome.failure.map(|f| f.to_string()),
            history_complete: store_errors.is_empty(),
            store_errors,
        })
    }

    /// Shorthand for switching one object's material type.
    pub async fn switch_material(&self, spec_id: &SpecId, object_id: &str, material: &str) -> Result<SwitchOutcome> {
        let directive = Directive::set(object_id, "material.type", material.trim());
        self.switch(spec_id, &directive.to_string()).await
    }

    /// Run every item as its own session, at most `batch_concurrency_limit`
    /// at a time. One item failing does not affect the others.
    #[instrument(skip_all, fields(items = items.len()))]
    pub async fn batch(self: &Arc<Self>, items: Vec<BatchItem>) -> Vec<BatchItemResult> {
        let sem = Arc::new(Semaphore::new(self.config().batch_concurrency_limit.max(1)));
        let mut tasks = Vec::with_capacity(items.len());

        for (index, item) in items.into_iter().enumerate() {
            let this = Arc::clone(self);
            let sem = Arc::clone(&sem);
            let task_item = item.clone();
            let handle = tokio::spawn(async move {
                let _permit = sem.acquire_owned().await.ok();
                match &task_item {
                    BatchItem::Generate { prompt } => this.generate(prompt).await,
                    BatchItem::Iterate {
                        spec_id,
                        instruction,
                    } => this.iterate(spec_id, instruction.as_deref()).await,
                }
            });
            tasks.push((index, item, handle));
        }

        let joined = futures::future::join_all(tasks.into_iter().map(|(index, item, handle)| async move {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(SpecloopError::Task(e.to_string())),
            };
            (index, item, result)
        }))
        .await;

        joined
            .into_iter()
            .map(|(index, item, result)| match result {
                Ok(outcome) => BatchItemResult {
                    index,
                    item,
                    outcome: Some(outcome),
                    error: None,
                },
                Err(e) => {
                    warn!(index, error = %e, "batch item failed");
                    BatchItemResult {
                        index,
                        item,
                        outcome: None,
                        error: Some(e.to_string()),
                    }
                }
            })
            .collect()
    }

    pub async fn get_spec(&self, spec_id: &SpecId) -> Result<Specification> {
        Ok(self.store.get_spec(spec_id).await?)
    }

    /// Every stored record for `spec_id`, oldest first.
    pub async fn history(&self, spec_id: &SpecId) -> Result<Vec<IterationRecord>> {
        Ok(self.store.get_iterations(spec_id).await?)
    }

    /// Score the stored spec with the configured criteria.
    pub async fn evaluate(&self, spec_id: &SpecId) -> Result<EvaluationResult> {
        let spec = self.store.get_spec(spec_id).await?;
        Ok(self.engine.evaluator().evaluate(&spec))
    }
}

/// Every object a directive names must exist and be editable.
fn validate_targets(spec: &Specification, instruction: &Instruction) -> Result<()> {
    for directive in &instruction.directives {
        let Some(object_id) = directive.target() else {
            continue;
        };
        let object = spec.object(object_id).ok_or_else(|| SpecloopError::ObjectNotFound {
            spec_id: spec.spec_id.to_string(),
            object_id: object_id.to_string(),
        })?;
        let touches_material = matches!(
            directive,
            Directive::Set { field, .. } if field == "material" || field.starts_with("material.")
        );
        if !object.editable || (touches_material && !object.material_editable()) {
            return Err(SpecloopError::NotEditable {
                object_id: object_id.to_string(),
            });
        }
    }
    Ok(())
}
