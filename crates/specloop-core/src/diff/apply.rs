//! Replaying a change list onto a specification.

use std::collections::BTreeMap;

use serde_json::Value;
use specloop_state::Specification;

use super::fields::{flatten, unflatten};
use super::{object_fields, Change, ChangeKind, ORDER_FIELD, ORDER_OBJECT_ID, SCENE_OBJECT_ID};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DiffError {
    #[error("change refers to unknown object {object_id}")]
    UnknownObject { object_id: String },

    #[error("object {object_id} is invalid after applying changes: {reason}")]
    InvalidObject { object_id: String, reason: String },

    #[error("object order change does not match the resulting objects")]
    InvalidOrder,
}

/// Apply `changes` to a copy of `base`.
///
/// `apply_changes(a, &diff_specs(Some(a), b).changes)` reproduces the
/// objects and scene metadata of `b`. New objects are appended in the
/// order their first change appears unless an order change says otherwise.
pub fn apply_changes(base: &Specification, changes: &[Change]) -> Result<Specification, DiffError> {
    let mut order: Vec<String> = base.objects.iter().map(|o| o.object_id.clone()).collect();
    let mut objects: BTreeMap<String, BTreeMap<String, Value>> = base
        .objects
        .iter()
        .map(|o| (o.object_id.clone(), object_fields(o)))
        .collect();
    let mut scene = flatten(&base.scene_metadata);
    let mut explicit_order: Option<Vec<String>> = None;

    for change in changes {
        if change.object_id == ORDER_OBJECT_ID && change.field == ORDER_FIELD {
            let ids = serde_json::from_value(change.after.clone()).map_err(|_| DiffError::InvalidOrder)?;
            explicit_order = Some(ids);
            continue;
        }
        if change.object_id == SCENE_OBJECT_ID {
            set_leaf(&mut scene, &change.field, &change.after);
            continue;
        }
        match change.kind {
            ChangeKind::Removed => {
                objects.remove(&change.object_id);
                order.retain(|id| *id != change.object_id);
            }
            ChangeKind::Added => {
                if !objects.contains_key(&change.object_id) {
                    order.push(change.object_id.clone());
                }
                let fields = objects.entry(change.object_id.clone()).or_default();
                set_leaf(fields, &change.field, &change.after);
            }
            ChangeKind::Modified => {
                let fields = objects
                    .get_mut(&change.object_id)
                    .ok_or_else(|| DiffError::UnknownObject {
                        object_id: change.object_id.clone(),
                    })?;
                set_leaf(fields, &change.field, &change.after);
            }
        }
    }

    if let Some(explicit) = explicit_order {
        let mut sorted_explicit = explicit.clone();
        sorted_explicit.sort();
        let mut sorted_order = order;
        sorted_order.sort();
        if sorted_explicit != sorted_order {
            return Err(DiffError::InvalidOrder);
        }
        order = explicit;
    }

    let mut spec = base.clone();
    spec.objects = Vec::with_capacity(order.len());
    for object_id in order {
        let fields = objects.remove(&object_id).unwrap_or_default();
        let mut map = unflatten(&fields);
        map.insert("object_id".to_string(), Value::String(object_id.clone()));
        let object = serde_json::from_value(Value::Object(map)).map_err(|e| {
            DiffError::InvalidObject {
                object_id: object_id.clone(),
                reason: e.to_string(),
            }
        })?;
        spec.objects.push(object);
    }
    spec.scene_metadata = unflatten(&scene);
    spec.sync_id_counters();
    Ok(spec)
}

fn set_leaf(fields: &mut BTreeMap<String, Value>, path: &str, value: &Value) {
    if value.is_null() {
        fields.remove(path);
    } else {
        fields.insert(path.to_string(), value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::diff_specs;
    use serde_json::{json, Map};
    use specloop_state::{DesignObject, Dimensions, MaterialProperties, Position, SpecId};

    fn object(id: &str, material: &str) -> DesignObject {
        let (t, _) = DesignObject::parse_id(id).unwrap();
        DesignObject {
            object_id: id.to_string(),
            object_type: t.to_string(),
            material: MaterialProperties::of_type(material),
            position: Position::default(),
            dimensions: Dimensions::meters(1.0, 1.0, 1.0),
            rotation: None,
            metadata: Map::new(),
            editable: true,
        }
    }

    #[test]
    fn modified_change_on_missing_object_fails() {
        let base = Specification::new(SpecId::from("spec_apply"));
        let change = Change {
            object_id: "chair_1".into(),
            field: "material.type".into(),
            kind: ChangeKind::Modified,
            before: json!("wood"),
            after: json!("oak"),
        };
        let err = apply_changes(&base, &[change]).unwrap_err();
        assert_eq!(
            err,
            DiffError::UnknownObject {
                object_id: "chair_1".into()
            }
        );
    }

    #[test]
    fn partial_added_object_is_invalid() {
        let base = Specification::new(SpecId::from("spec_apply"));
        let change = Change {
            object_id: "chair_1".into(),
            field: "material.type".into(),
            kind: ChangeKind::Added,
            before: Value::Null,
            after: json!("oak"),
        };
        assert!(matches!(
            apply_changes(&base, &[change]),
            Err(DiffError::InvalidObject { .. })
        ));
    }

    #[test]
    fn order_change_naming_unknown_ids_fails() {
        let mut base = Specification::new(SpecId::from("spec_apply"));
        base.objects = vec![object("floor_1", "wood")];
        let change = Change {
            object_id: ORDER_OBJECT_ID.into(),
            field: ORDER_FIELD.into(),
            kind: ChangeKind::Modified,
            before: json!(["floor_1"]),
            after: json!(["floor_1", "sofa_1"]),
        };
        assert_eq!(apply_changes(&base, &[change]), Err(DiffError::InvalidOrder));
    }

    #[test]
    fn replay_reproduces_target() {
        let mut a = Specification::new(SpecId::from("spec_apply"));
        a.objects = vec![object("floor_1", "wood"), object("rug_1", "wool")];
        a.scene_metadata.insert("style".into(), json!("rustic"));
        a.sync_id_counters();

        let mut b = a.clone();
        b.objects.remove(1);
        b.objects[0].material.finish = Some("oiled".into());
        b.objects.push(object("lamp_1", "brass"));
        b.scene_metadata.insert("style".into(), json!("modern"));

        let replayed = apply_changes(&a, &diff_specs(Some(&a), &b).changes).unwrap();
        assert_eq!(replayed.objects, b.objects);
        assert_eq!(replayed.scene_metadata, b.scene_metadata);
        assert_eq!(replayed.id_counters.get("rug"), Some(&1));
    }
}
