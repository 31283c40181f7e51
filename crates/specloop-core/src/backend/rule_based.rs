//! Deterministic keyword backend.
//!
//! Creation reads object types, materials, a style and feature words out of
//! the prompt. Revision applies only the explicit directives in the
//! instruction. The same input always yields the same mapping, which keeps
//! offline runs and tests reproducible.

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::{mode, BackendError, GenerationBackend};
use crate::instruction::{parse_directives, Directive};
use crate::reference;

const ROOM_WORDS: &[&str] = &[
    "room", "bedroom", "office", "kitchen", "lobby", "studio", "lounge", "bathroom", "hall",
];

const FEATURE_WORDS: &[&str] = &[
    "ergonomic", "adjustable", "armrests", "wheels", "swivel", "storage", "foldable", "reclining",
    "cushioned", "stackable", "extendable", "dimmable", "modular",
];

#[derive(Debug, Clone, Default)]
pub struct RuleBasedBackend;

impl RuleBasedBackend {
    pub fn new() -> Self {
        Self
    }

    fn create(&self, prompt: &str) -> Result<Value, BackendError> {
        let words: Vec<String> = prompt
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_ascii_lowercase)
            .collect();

        let mut types: Vec<&'static str> = Vec::new();
        let mut materials: Vec<String> = Vec::new();
        let mut features: Vec<String> = Vec::new();
        let mut style: Option<&'static str> = None;
        let mut room: Option<String> = None;

        for (i, word) in words.iter().enumerate() {
            if let Some(t) = reference::canonical_type(word) {
                push_unique(&mut types, t);
            }
            if reference::is_known_material(word) {
                push_unique(&mut materials, word.clone());
            }
            if FEATURE_WORDS.contains(&word.as_str()) {
                push_unique(&mut features, word.clone());
            }
            if style.is_none() {
                style = reference::known_styles().find(|s| *s == word.as_str());
            }
            // "office chair" names a chair, "office with a desk" names a room
            let modifies_next = words
                .get(i + 1)
                .is_some_and(|next| reference::canonical_type(next).is_some());
            if room.is_none() && ROOM_WORDS.contains(&word.as_str()) && !modifies_next {
                room = Some(word.clone());
            }
        }

        if types.is_empty() && room.is_none() {
            return Err(BackendError::Rejected(format!(
                "no recognizable design object in {prompt:?}"
            )));
        }

        if room.is_some() {
            for t in ["wall", "floor"] {
                if !types.contains(&t) {
                    types.insert(0, t);
                }
            }
        }

        let design_type = room.clone().unwrap_or_else(|| types[0].to_string());
        let category = match &room {
            Some(_) => "interior",
            None => reference::category(types[0]).unwrap_or("object"),
        };
        let dimensions = match (&room, reference::dimension_range(types[0])) {
            (None, Some(range)) => {
                let (l, w, h) = range.midpoint();
                json!({ "length": l, "width": w, "height": h, "units": "meters" })
            }
            _ => json!({}),
        };

        let mut mapping = json!({
            "design_type": design_type,
            "category": category,
            "materials": materials,
            "dimensions": dimensions,
            "features": features,
        });
        if let Some(style) = style {
            mapping["style"] = json!(style);
        }
        if types.len() > 1 {
            let objects: Vec<Value> = types
                .iter()
                .map(|t| {
                    let mut object = json!({ "object_type": t });
                    let fit = reference::compatible_materials(t).and_then(|compatible| {
                        materials.iter().find(|m| compatible.contains(&m.as_str()))
                    });
                    if let Some(m) = fit {
                        object["material"] = json!({ "type": m });
                    }
                    object
                })
                .collect();
            mapping["objects"] = Value::Array(objects);
        }
        Ok(mapping)
    }

    fn revise(&self, prompt: &str, params: &Value) -> Value {
        let previous_meta = params
            .get("previous_spec")
            .and_then(|s| s.get("scene_metadata"));
        let design_type = previous_meta
            .and_then(|m| m.get("design_type"))
            .and_then(Value::as_str)
            .unwrap_or("design");
        let category = previous_meta
            .and_then(|m| m.get("category"))
            .and_then(Value::as_str)
            .unwrap_or("object");

        let mut objects: Vec<(String, Map<String, Value>)> = Vec::new();
        let mut additions: Vec<Value> = Vec::new();
        let mut removals: Vec<String> = Vec::new();

        for directive in parse_directives(prompt) {
            match directive {
                Directive::Set {
                    object_id,
                    field,
                    value,
                } => {
                    let idx = match objects.iter().position(|(id, _)| *id == object_id) {
                        Some(idx) => idx,
                        None => {
                            objects.push((object_id.clone(), Map::new()));
                            objects.len() - 1
                        }
                    };
                    set_path(&mut objects[idx].1, &field, value);
                }
                Directive::Add { object_type } => {
                    additions.push(json!({ "object_type": object_type }));
                }
                Directive::Remove { object_id } => removals.push(object_id),
            }
        }

        let mut entries: Vec<Value> = objects
            .into_iter()
            .map(|(id, mut patch)| {
                patch.insert("object_id".to_string(), Value::String(id));
                Value::Object(patch)
            })
            .collect();
        entries.extend(additions);

        json!({
            "design_type": design_type,
            "category": category,
            "materials": [],
            "dimensions": {},
            "features": [],
            "objects": entries,
            "removals": removals,
        })
    }
}

fn push_unique<T: PartialEq>(items: &mut Vec<T>, item: T) {
    if !items.contains(&item) {
        items.push(item);
    }
}

/// Set `a.b.c` inside `map`, creating intermediate objects.
fn set_path(map: &mut Map<String, Value>, path: &str, value: Value) {
    let mut parts = path.split('.').peekable();
    let mut current = map;
    while let Some(part) = parts.next() {
        if parts.peek().is_none() {
            current.insert(part.to_string(), value);
            return;
        }
        let entry = current
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        let Value::Object(next) = entry else {
            return;
        };
        current = next;
    }
}

#[async_trait]
impl GenerationBackend for RuleBasedBackend {
    fn name(&self) -> &str {
        "rules"
    }

    async fn run(&self, prompt: &str, params: &Value) -> Result<Value, BackendError> {
        match mode(params) {
            "revise" => Ok(self.revise(prompt, params)),
            _ => self.create(prompt),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create(prompt: &str) -> Value {
        RuleBasedBackend::new().create(prompt).unwrap()
    }

    #[test]
    fn office_chair_is_a_chair_not_a_room() {
        let m = create("Modern office chair");
        assert_eq!(m["design_type"], "chair");
        assert_eq!(m["category"], "furniture");
        assert_eq!(m["style"], "modern");
        assert!(m.get("objects").is_none());
        assert!(m["dimensions"]["height"].as_f64().unwrap() > 0.0);
    }

    #[test]
    fn room_prompt_yields_structure_objects() {
        let m = create("rustic living room with an oak floor, a wool rug and a leather sofa");
        assert_eq!(m["design_type"], "room");
        let objects = m["objects"].as_array().unwrap();
        let types: Vec<&str> = objects.iter().map(|o| o["object_type"].as_str().unwrap()).collect();
        assert_eq!(types, vec!["wall", "floor", "rug", "sofa"]);
        assert_eq!(objects[1]["material"]["type"], "oak");
        assert_eq!(objects[2]["material"]["type"], "wool");
        assert_eq!(objects[3]["material"]["type"], "leather");
    }

    #[test]
    fn features_and_materials_are_collected_once() {
        let m = create("ergonomic adjustable steel desk, steel frame");
        assert_eq!(m["materials"], json!(["steel"]));
        assert_eq!(m["features"], json!(["ergonomic", "adjustable"]));
    }

    #[test]
    fn gibberish_is_rejected() {
        let err = RuleBasedBackend::new().create("qwzx plonk").unwrap_err();
        assert!(matches!(err, BackendError::Rejected(_)));
    }

    #[test]
    fn revise_groups_directives_per_object() {
        let params = json!({
            "mode": "revise",
            "previous_spec": { "scene_metadata": { "design_type": "chair", "category": "furniture" } },
        });
        let m = RuleBasedBackend::new().revise(
            "set chair_1.material.type to metal; set chair_1.material.finish to matte; add object lamp; remove object rug_1",
            &params,
        );
        assert_eq!(m["design_type"], "chair");
        let objects = m["objects"].as_array().unwrap();
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0]["object_id"], "chair_1");
        assert_eq!(objects[0]["material"], json!({ "type": "metal", "finish": "matte" }));
        assert_eq!(objects[1]["object_type"], "lamp");
        assert_eq!(m["removals"], json!(["rug_1"]));
    }

    #[tokio::test]
    async fn run_dispatches_on_mode() {
        let backend = RuleBasedBackend::new();
        let created = backend.run("a lamp", &json!({})).await.unwrap();
        assert_eq!(created["design_type"], "lamp");
        let revised = backend
            .run("make it nicer", &json!({ "mode": "revise" }))
            .await
            .unwrap();
        assert_eq!(revised["objects"], json!([]));
    }
}
