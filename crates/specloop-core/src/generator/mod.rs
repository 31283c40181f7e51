//! Specification generator.
//!
//! Wraps a [`GenerationBackend`]: builds the backend parameters, validates
//! the mapping it returns and turns it into a [`Specification`]. A fresh
//! generation allocates new `{type}_{n}` ids. A revision starts from the
//! previous spec, may only change objects the instruction targets, and never
//! touches non-editable objects.
//!
//! [`Generator::generate`] retries a failed attempt once. If the retry fails
//! too, it returns a degraded fallback spec together with the failure so the
//! caller can record it.

mod draft;

pub use draft::{apply_patch, merge, Draft, DraftObject};

use std::sync::Arc;

use serde_json::{json, Map, Value};
use specloop_state::{
    DesignObject, Dimensions, MaterialProperties, Position, SpecId, Specification, DEGRADED_KEY,
};
use tracing::{debug, warn};

use crate::backend::{BackendError, GenerationBackend};
use crate::instruction::Instruction;
use crate::metrics::METRICS;
use crate::obs;
use crate::reference::{self, UNSPECIFIED_MATERIAL};

/// Attempts per `generate` call (first try plus one retry).
pub const MAX_ATTEMPTS: u32 = 2;

/// Scene-metadata key holding the reason for a fallback.
pub const FALLBACK_REASON_KEY: &str = "fallback_reason";

/// Why a generation attempt produced no usable spec.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GenerationFailure {
    #[error("generation backend failed: {0}")]
    Backend(#[from] BackendError),

    #[error("unparsable backend output: {0}")]
    Unparsable(String),
}

/// Result of [`Generator::generate`].
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub spec: Specification,
    pub attempts: u32,
    /// Set when `spec` is a fallback
    pub failure: Option<GenerationFailure>,
}

impl GenerationOutcome {
    pub fn is_degraded(&self) -> bool {
        self.failure.is_some()
    }
}

pub struct Generator {
    backend: Arc<dyn GenerationBackend>,
}

impl Generator {
    pub fn new(backend: Arc<dyn GenerationBackend>) -> Self {
        Self { backend }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Generate with one retry, falling back to a degraded spec.
    pub async fn generate(
        &self,
        spec_id: &SpecId,
        prompt: &str,
        params: &Value,
        previous: Option<&Specification>,
    ) -> GenerationOutcome {
        let mut last_failure = None;
        for attempt in 1..=MAX_ATTEMPTS {
            match self.try_generate(spec_id, prompt, params, previous).await {
                Ok(spec) => {
                    return GenerationOutcome {
                        spec,
                        attempts: attempt,
                        failure: None,
                    }
                }
                Err(e) => {
                    warn!(spec_id = %spec_id, attempt, error = %e, "generation attempt failed");
                    last_failure = Some(e);
                }
            }
        }

        let failure = last_failure
            .unwrap_or_else(|| GenerationFailure::Unparsable("no attempt was made".to_string()));
        obs::emit_generator_fallback(spec_id, &failure.to_string());
        METRICS.inc_fallbacks();
        GenerationOutcome {
            spec: Self::fallback(spec_id, prompt, previous, &failure),
            attempts: MAX_ATTEMPTS,
            failure: Some(failure),
        }
    }

    /// One backend call, no retry and no fallback.
    pub async fn try_generate(
        &self,
        spec_id: &SpecId,
        prompt: &str,
        params: &Value,
        previous: Option<&Specification>,
    ) -> Result<Specification, GenerationFailure> {
        let call_params = self.backend_params(prompt, params, previous)?;
        let raw = self.backend.run(prompt, &call_params).await?;
        let draft = Draft::parse(raw)?;
        match previous {
            None => self.build_fresh(spec_id, prompt, &draft),
            Some(previous) => Self::build_revision(previous, prompt, &draft),
        }
    }

    fn backend_params(
        &self,
        prompt: &str,
        params: &Value,
        previous: Option<&Specification>,
    ) -> Result<Value, GenerationFailure> {
        let mut out = match params {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        match previous {
            None => {
                out.insert("mode".into(), json!("create"));
            }
            Some(previous) => {
                let targets: Vec<String> = Instruction::from_text(prompt)
                    .targeted_objects(previous)
                    .into_iter()
                    .collect();
                let snapshot = serde_json::to_value(previous)
                    .map_err(|e| GenerationFailure::Unparsable(e.to_string()))?;
                out.insert("mode".into(), json!("revise"));
                out.insert("previous_spec".into(), snapshot);
                out.insert("targets".into(), json!(targets));
            }
        }
        Ok(Value::Object(out))
    }

    fn build_fresh(
        &self,
        spec_id: &SpecId,
        prompt: &str,
        draft: &Draft,
    ) -> Result<Specification, GenerationFailure> {
        let mut spec = Specification::new(spec_id.clone());
        let entries = if draft.objects.is_empty() {
            vec![draft.primary_object()]
        } else {
            draft.objects.clone()
        };

        for entry in entries {
            let object_type = entry
                .object_type
                .as_deref()
                .map(|t| t.trim().to_ascii_lowercase())
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| draft.design_type.clone());
            let base = new_object(&mut spec, &object_type);
            let object = apply_patch(&base, entry.patch)?;
            spec.objects.push(object);
        }

        let meta = &mut spec.scene_metadata;
        meta.insert("prompt".into(), json!(prompt));
        meta.insert("design_type".into(), json!(draft.design_type));
        let category = draft
            .category
            .clone()
            .filter(|c| !c.trim().is_empty())
            .or_else(|| reference::category(&draft.design_type).map(str::to_string))
            .unwrap_or_else(|| "object".to_string());
        meta.insert("category".into(), json!(category));
        if !draft.features.is_empty() {
            meta.insert("features".into(), json!(draft.features));
        }
        if let Some(style) = &draft.style {
            meta.insert("style".into(), json!(style));
        }
        meta.insert("backend".into(), json!(self.backend.name()));

        debug!(spec_id = %spec_id, objects = spec.objects.len(), "built fresh spec");
        Ok(spec)
    }

    fn build_revision(
        previous: &Specification,
        prompt: &str,
        draft: &Draft,
    ) -> Result<Specification, GenerationFailure> {
        let mut spec = previous.clone();
        let targets = Instruction::from_text(prompt).targeted_objects(previous);

        for entry in &draft.objects {
            let existing = entry
                .object_id
                .as_deref()
                .map(str::to_ascii_lowercase)
                .filter(|id| previous.contains_object(id));

            match existing {
                Some(id) => {
                    if !targets.contains(&id) {
                        debug!(object_id = %id, "ignoring edit to an untargeted object");
                        continue;
                    }
                    let Some(current) = spec.object(&id).cloned() else {
                        continue;
                    };
                    if !current.editable {
                        debug!(object_id = %id, "skipping non-editable object");
                        continue;
                    }
                    let mut patch = entry.patch.clone();
                    if !current.material.editable {
                        patch.remove("material");
                    }
                    let updated = apply_patch(&current, patch)?;
                    if let Some(slot) = spec.object_mut(&id) {
                        *slot = updated;
                    }
                }
                None => {
                    let object_type = entry
                        .object_type
                        .as_deref()
                        .map(|t| t.trim().to_ascii_lowercase())
                        .filter(|t| !t.is_empty())
                        .unwrap_or_else(|| draft.design_type.clone());
                    let base = new_object(&mut spec, &object_type);
                    let object = apply_patch(&base, entry.patch.clone())?;
                    spec.objects.push(object);
                }
            }
        }

        for id in &draft.removals {
            let id = id.to_ascii_lowercase();
            let removable = targets.contains(&id) && spec.object(&id).is_some_and(|o| o.editable);
            if removable {
                spec.objects.retain(|o| o.object_id != id);
            }
        }

        if let Some(style) = &draft.style {
            spec.scene_metadata.insert("style".into(), json!(style));
        }
        spec.scene_metadata.remove(DEGRADED_KEY);
        spec.scene_metadata.remove(FALLBACK_REASON_KEY);
        spec.touch();
        Ok(spec)
    }

    /// Deterministic replacement when generation keeps failing.
    ///
    /// A revision falls back to the previous spec unchanged; a fresh
    /// generation falls back to a single placeholder object. Both are marked
    /// degraded.
    pub fn fallback(
        spec_id: &SpecId,
        prompt: &str,
        previous: Option<&Specification>,
        failure: &GenerationFailure,
    ) -> Specification {
        let mut spec = match previous {
            Some(previous) => previous.clone(),
            None => {
                let mut spec = Specification::new(spec_id.clone());
                let object = new_object(&mut spec, "object");
                spec.objects.push(object);
                spec.scene_metadata.insert("prompt".into(), json!(prompt));
                spec
            }
        };
        spec.mark_degraded();
        spec.scene_metadata
            .insert(FALLBACK_REASON_KEY.into(), json!(failure.to_string()));
        spec.touch();
        spec
    }
}

/// Allocate an id and build a default object of `object_type`.
fn new_object(spec: &mut Specification, object_type: &str) -> DesignObject {
    let object_id = spec.allocate_object_id(object_type);
    let dimensions = match reference::dimension_range(object_type) {
        Some(range) => {
            let (l, w, h) = range.midpoint();
            Dimensions::meters(l, w, h)
        }
        None => Dimensions::meters(1.0, 1.0, 1.0),
    };
    DesignObject {
        object_id,
        object_type: object_type.to_string(),
        material: MaterialProperties::of_type(UNSPECIFIED_MATERIAL),
        position: Position::default(),
        dimensions,
        rotation: None,
        metadata: Map::new(),
        editable: true,
    }
}
