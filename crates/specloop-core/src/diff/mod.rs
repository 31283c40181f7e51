//! Field-level diff between two specifications.
//!
//! Objects are matched by `object_id`. Fields are dotted leaf paths inside
//! an object (`material.type`, `dimensions.height`). Scene metadata is
//! diffed as the pseudo-object [`SCENE_OBJECT_ID`].
//!
//! Order is deterministic: objects in the order of the new spec, then
//! removed objects in the order of the old spec, then scene changes. Within
//! one object fields are sorted by path.
//!
//! Object order is part of a spec. When the new order is not the old order
//! with removals dropped and additions appended, one extra `Modified` change
//! on [`ORDER_OBJECT_ID`] carries both id lists.

mod apply;
mod fields;

pub use apply::{apply_changes, DiffError};
pub use fields::{escape_segment, flatten, unescape_segment, unflatten};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use specloop_state::{DesignObject, Specification};

/// Pseudo object id under which scene-metadata changes are reported.
pub const SCENE_OBJECT_ID: &str = "@scene";

/// Field name used for whole-object removals.
pub const WHOLE_OBJECT: &str = "*";

/// Pseudo object id of the object-order change.
pub const ORDER_OBJECT_ID: &str = "@objects";

/// Field of the object-order change; values are arrays of object ids.
pub const ORDER_FIELD: &str = "order";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// Field of an object that did not exist before
    Added,
    /// Whole object gone; `field` is [`WHOLE_OBJECT`]
    Removed,
    /// Field changed, appeared or disappeared on an existing object
    Modified,
}

/// One field-level change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub object_id: String,
    pub field: String,
    pub kind: ChangeKind,
    /// `Null` when absent
    pub before: Value,
    /// `Null` when absent
    pub after: Value,
}

/// Ordered list of changes between two specs.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SpecDiff {
    pub changes: Vec<Change>,
}

impl SpecDiff {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn count(&self, kind: ChangeKind) -> usize {
        self.changes.iter().filter(|c| c.kind == kind).count()
    }

    /// Changes affecting one object.
    pub fn for_object<'a>(&'a self, object_id: &'a str) -> impl Iterator<Item = &'a Change> + 'a {
        self.changes.iter().filter(move |c| c.object_id == object_id)
    }
}

/// Leaf fields of an object, excluding its id.
pub(crate) fn object_fields(object: &DesignObject) -> BTreeMap<String, Value> {
    match serde_json::to_value(object) {
        Ok(Value::Object(mut map)) => {
            map.remove("object_id");
            flatten(&map)
        }
        _ => BTreeMap::new(),
    }
}

fn diff_fields(
    object_id: &str,
    kind: ChangeKind,
    before: &BTreeMap<String, Value>,
    after: &BTreeMap<String, Value>,
    out: &mut Vec<Change>,
) {
    let mut paths: Vec<&String> = before.keys().chain(after.keys()).collect();
    paths.sort();
    paths.dedup();
    for path in paths {
        let b = before.get(path).cloned().unwrap_or(Value::Null);
        let a = after.get(path).cloned().unwrap_or(Value::Null);
        if a != b {
            out.push(Change {
                object_id: object_id.to_string(),
                field: path.clone(),
                kind,
                before: b,
                after: a,
            });
        }
    }
}

/// Diff `before` (absent for a fresh spec) against `after`.
pub fn diff_specs(before: Option<&Specification>, after: &Specification) -> SpecDiff {
    let empty = BTreeMap::new();
    let mut changes = Vec::new();

    for object in &after.objects {
        let after_fields = object_fields(object);
        match before.and_then(|b| b.object(&object.object_id)) {
            Some(old) => diff_fields(
                &object.object_id,
                ChangeKind::Modified,
                &object_fields(old),
                &after_fields,
                &mut changes,
            ),
            None => diff_fields(&object.object_id, ChangeKind::Added, &empty, &after_fields, &mut changes),
        }
    }

    if let Some(before) = before {
        for old in before.objects.iter().filter(|o| !after.contains_object(&o.object_id)) {
            changes.push(Change {
                object_id: old.object_id.clone(),
                field: WHOLE_OBJECT.to_string(),
                kind: ChangeKind::Removed,
                before: serde_json::to_value(old).unwrap_or(Value::Null),
                after: Value::Null,
            });
        }
    }

    if let Some(change) = order_change(before, after) {
        changes.push(change);
    }

    let empty_meta = Map::new();
    let before_meta = before.map(|b| &b.scene_metadata).unwrap_or(&empty_meta);
    diff_fields(
        SCENE_OBJECT_ID,
        ChangeKind::Modified,
        &flatten(before_meta),
        &flatten(&after.scene_metadata),
        &mut changes,
    );

    SpecDiff { changes }
}

/// Order change for `after`, if replay would not produce its order on its
/// own (surviving objects in their old order, then new ones appended).
fn order_change(before: Option<&Specification>, after: &Specification) -> Option<Change> {
    let before = before?;
    let implied: Vec<&str> = before
        .objects
        .iter()
        .filter(|o| after.contains_object(&o.object_id))
        .chain(after.objects.iter().filter(|o| !before.contains_object(&o.object_id)))
        .map(|o| o.object_id.as_str())
        .collect();
    let actual: Vec<&str> = after.objects.iter().map(|o| o.object_id.as_str()).collect();
    if implied == actual {
        return None;
    }
    let ids = |spec: &Specification| {
        Value::from(spec.objects.iter().map(|o| o.object_id.clone()).collect::<Vec<_>>())
    };
    Some(Change {
        object_id: ORDER_OBJECT_ID.to_string(),
        field: ORDER_FIELD.to_string(),
        kind: ChangeKind::Modified,
        before: ids(before),
        after: ids(after),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use specloop_state::{Dimensions, MaterialProperties, Position, SpecId};

    fn object(id: &str, material: &str) -> DesignObject {
        let (t, _) = DesignObject::parse_id(id).unwrap();
        DesignObject {
            object_id: id.to_string(),
            object_type: t.to_string(),
            material: MaterialProperties::of_type(material),
            position: Position::default(),
            dimensions: Dimensions::meters(4.0, 4.0, 0.1),
            rotation: None,
            metadata: Map::new(),
            editable: true,
        }
    }

    fn spec(objects: Vec<DesignObject>) -> Specification {
        let mut s = Specification::new(SpecId::from("spec_diff"));
        s.objects = objects;
        s.sync_id_counters();
        s
    }

    #[test]
    fn identical_specs_have_empty_diff() {
        let a = spec(vec![object("floor_1", "wood")]);
        assert!(diff_specs(Some(&a), &a.clone()).is_empty());
    }

    #[test]
    fn material_switch_is_a_single_change() {
        let a = spec(vec![object("floor_1", "wood"), object("wall_1", "plaster")]);
        let mut b = a.clone();
        b.objects[0].material.material_type = "marble".into();

        let diff = diff_specs(Some(&a), &b);
        assert_eq!(
            diff.changes,
            vec![Change {
                object_id: "floor_1".into(),
                field: "material.type".into(),
                kind: ChangeKind::Modified,
                before: json!("wood"),
                after: json!("marble"),
            }]
        );
    }

    #[test]
    fn added_and_removed_objects() {
        let a = spec(vec![object("floor_1", "wood"), object("rug_1", "wool")]);
        let b = spec(vec![object("floor_1", "wood"), object("lamp_1", "brass")]);
        let diff = diff_specs(Some(&a), &b);

        assert!(diff.for_object("lamp_1").all(|c| c.kind == ChangeKind::Added));
        assert!(diff.for_object("lamp_1").any(|c| c.field == "material.type"));
        let removed: Vec<_> = diff.for_object("rug_1").collect();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].field, WHOLE_OBJECT);
        assert_eq!(diff.changes.last().map(|c| c.object_id.as_str()), Some("rug_1"));
    }

    #[test]
    fn fresh_spec_is_all_additions() {
        let mut b = spec(vec![object("floor_1", "wood")]);
        b.scene_metadata.insert("style".into(), json!("modern"));
        let diff = diff_specs(None, &b);
        assert_eq!(diff.count(ChangeKind::Removed), 0);
        let scene: Vec<_> = diff.for_object(SCENE_OBJECT_ID).collect();
        assert_eq!(scene.len(), 1);
        assert_eq!(scene[0].field, "style");
        assert_eq!(scene[0].before, Value::Null);
    }

    #[test]
    fn reordered_objects_produce_an_order_change() {
        let a = spec(vec![object("floor_1", "wood"), object("wall_1", "plaster")]);
        let b = spec(vec![object("wall_1", "plaster"), object("floor_1", "wood")]);
        let diff = diff_specs(Some(&a), &b);
        assert_eq!(
            diff.changes,
            vec![Change {
                object_id: ORDER_OBJECT_ID.into(),
                field: ORDER_FIELD.into(),
                kind: ChangeKind::Modified,
                before: json!(["floor_1", "wall_1"]),
                after: json!(["wall_1", "floor_1"]),
            }]
        );
    }

    #[test]
    fn appended_object_needs_no_order_change() {
        let a = spec(vec![object("floor_1", "wood"), object("rug_1", "wool")]);
        let b = spec(vec![object("floor_1", "wood"), object("lamp_1", "brass")]);
        assert_eq!(diff_specs(Some(&a), &b).for_object(ORDER_OBJECT_ID).count(), 0);
    }

    #[test]
    fn cleared_optional_field_is_modified_to_null() {
        let mut a = spec(vec![object("floor_1", "wood")]);
        a.objects[0].material.color = Some("oak".into());
        let b = spec(vec![object("floor_1", "wood")]);
        let diff = diff_specs(Some(&a), &b);
        assert_eq!(diff.len(), 1);
        assert_eq!(diff.changes[0].field, "material.color");
        assert_eq!(diff.changes[0].after, Value::Null);
    }
}
