//! Validated form of a backend mapping.

use serde::Deserialize;
use serde_json::{Map, Value};
use specloop_state::DesignObject;

use super::GenerationFailure;

/// Top-level backend output.
///
/// `design_type` is required and must be non-empty; everything else has a
/// default. Object entries are JSON patches applied on top of an existing or
/// freshly allocated object.
#[derive(Debug, Clone, Deserialize)]
pub struct Draft {
    pub design_type: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub materials: Vec<String>,
    #[serde(default)]
    pub dimensions: Option<Value>,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default)]
    pub objects: Vec<DraftObject>,
    #[serde(default)]
    pub removals: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DraftObject {
    #[serde(default)]
    pub object_id: Option<String>,
    #[serde(default)]
    pub object_type: Option<String>,
    #[serde(flatten)]
    pub patch: Map<String, Value>,
}

impl Draft {
    pub fn parse(value: Value) -> Result<Self, GenerationFailure> {
        match &value {
            Value::Object(map) if map.is_empty() => {
                return Err(GenerationFailure::Unparsable("empty mapping".to_string()))
            }
            Value::Object(_) => {}
            other => {
                return Err(GenerationFailure::Unparsable(format!(
                    "expected a JSON object, got {}",
                    type_name(other)
                )))
            }
        }
        let mut draft: Draft = serde_json::from_value(value)
            .map_err(|e| GenerationFailure::Unparsable(e.to_string()))?;
        draft.design_type = draft.design_type.trim().to_ascii_lowercase();
        if draft.design_type.is_empty() {
            return Err(GenerationFailure::Unparsable(
                "design_type must not be empty".to_string(),
            ));
        }
        draft.style = draft
            .style
            .map(|s| s.trim().to_ascii_lowercase())
            .filter(|s| !s.is_empty());
        Ok(draft)
    }

    /// Single entry describing the primary object when no list was given.
    pub fn primary_object(&self) -> DraftObject {
        let mut patch = Map::new();
        if let Some(dims) = self.dimensions.as_ref().filter(|d| d.as_object().is_some_and(|m| !m.is_empty())) {
            patch.insert("dimensions".to_string(), dims.clone());
        }
        if let Some(material) = self.materials.first() {
            patch.insert("material".to_string(), Value::String(material.clone()));
        }
        DraftObject {
            object_id: None,
            object_type: Some(self.design_type.clone()),
            patch,
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Keys a patch may never change.
const PROTECTED: &[&str] = &["object_id", "object_type", "editable"];

/// Merge `patch` into `object` and deserialize the result.
///
/// A bare string for `material` means `{"type": <string>}`. Null values
/// remove the key. Identity and editability flags are never patched.
pub fn apply_patch(
    object: &DesignObject,
    mut patch: Map<String, Value>,
) -> Result<DesignObject, GenerationFailure> {
    for key in PROTECTED {
        patch.remove(*key);
    }
    if let Some(Value::String(material)) = patch.get("material") {
        let material = material.trim().to_ascii_lowercase();
        patch.insert("material".to_string(), serde_json::json!({ "type": material }));
    }
    if let Some(Value::Object(material)) = patch.get_mut("material") {
        material.remove("editable");
        if let Some(Value::String(t)) = material.get_mut("type") {
            *t = t.trim().to_ascii_lowercase();
        }
    }

    let mut value = serde_json::to_value(object)
        .map_err(|e| GenerationFailure::Unparsable(e.to_string()))?;
    merge(&mut value, &Value::Object(patch));
    serde_json::from_value(value).map_err(|e| {
        GenerationFailure::Unparsable(format!("invalid fields for {}: {e}", object.object_id))
    })
}

/// JSON merge patch: objects merge recursively, null deletes, other values replace.
pub fn merge(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target) = target {
        for (key, value) in patch {
            if value.is_null() {
                target.remove(key);
            } else {
                merge(target.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}
