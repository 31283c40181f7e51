//! Specification document model.
//!
//! A [`Specification`] is an ordered list of [`DesignObject`]s plus free-form
//! scene metadata. Object ids follow the `{type}_{n}` scheme and are never
//! reused within one document: the per-type counters in
//! [`Specification::id_counters`] only ever grow.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::Sha256;

use crate::error::StorageError;

/// Scene-metadata key set when a spec came out of a fallback path.
pub const DEGRADED_KEY: &str = "degraded";

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Identifier of a specification document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpecId(pub String);

impl SpecId {
    /// Generate a fresh random id (`spec_<32 hex>`).
    pub fn new() -> Self {
        SpecId(format!("spec_{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Ids double as file names and record keys, so only `[A-Za-z0-9_-]`.
    pub fn is_valid(&self) -> bool {
        !self.0.is_empty()
            && self
                .0
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    }
}

impl Default for SpecId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SpecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SpecId {
    fn from(s: &str) -> Self {
        SpecId(s.to_string())
    }
}

/// Identifier of a single iteration record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IterationId(pub String);

impl IterationId {
    pub fn new() -> Self {
        IterationId(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for IterationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for IterationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// SHA-256 over the canonical JSON of a spec's content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpecDigest(String);

impl SpecDigest {
    pub fn from_bytes(data: &[u8]) -> Self {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        hasher.update(data);
        SpecDigest(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl TryFrom<String> for SpecDigest {
    type Error = StorageError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StorageError::InvalidDigest { digest: s });
        }
        Ok(SpecDigest(s.to_ascii_lowercase()))
    }
}

impl fmt::Display for SpecDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Objects
// ---------------------------------------------------------------------------

/// Editable material properties of one object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialProperties {
    /// Material type, e.g. wood, metal, fabric, concrete, glass
    #[serde(rename = "type")]
    pub material_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub texture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish: Option<String>,
    /// 0.0–1.0
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reflectivity: Option<f64>,
    /// 0.0–1.0
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roughness: Option<f64>,
    /// 0.0–1.0
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metallic: Option<f64>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,
    /// Whether a switch/refinement may change this material
    #[serde(default = "default_true")]
    pub editable: bool,
}

impl MaterialProperties {
    /// A bare editable material of the given type.
    pub fn of_type(material_type: impl Into<String>) -> Self {
        Self {
            material_type: material_type.into(),
            color: None,
            texture: None,
            finish: None,
            reflectivity: None,
            roughness: None,
            metallic: None,
            properties: Map::new(),
            editable: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

/// Rotation angles in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rotation {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dimensions {
    pub length: f64,
    pub width: f64,
    pub height: f64,
    #[serde(default = "default_units")]
    pub units: String,
}

impl Dimensions {
    pub fn meters(length: f64, width: f64, height: f64) -> Self {
        Self {
            length,
            width,
            height,
            units: default_units(),
        }
    }
}

/// One object in a design, addressed by a stable `{type}_{n}` id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesignObject {
    pub object_id: String,
    /// floor, wall, chair, sofa, lamp, ...
    pub object_type: String,
    pub material: MaterialProperties,
    #[serde(default)]
    pub position: Position,
    pub dimensions: Dimensions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<Rotation>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    #[serde(default = "default_true")]
    pub editable: bool,
}

impl DesignObject {
    /// Build an id following the `{type}_{number}` convention.
    pub fn generate_id(object_type: &str, index: u32) -> String {
        format!("{}_{}", object_type.to_lowercase(), index)
    }

    /// Split `chair_12` into `("chair", 12)`.
    pub fn parse_id(object_id: &str) -> Option<(&str, u32)> {
        let (prefix, n) = object_id.rsplit_once('_')?;
        if prefix.is_empty() {
            return None;
        }
        n.parse().ok().map(|n| (prefix, n))
    }

    /// Whether a refinement is allowed to change the material.
    pub fn material_editable(&self) -> bool {
        self.editable && self.material.editable
    }
}

// ---------------------------------------------------------------------------
// Specification
// ---------------------------------------------------------------------------

/// A versioned design document with per-object ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Specification {
    pub spec_id: SpecId,
    pub objects: Vec<DesignObject>,
    #[serde(default)]
    pub scene_metadata: Map<String, Value>,
    /// Highest index ever handed out per lowercase object type.
    #[serde(default)]
    pub id_counters: BTreeMap<String, u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Specification {
    pub fn new(spec_id: SpecId) -> Self {
        let now = Utc::now();
        Self {
            spec_id,
            objects: Vec::new(),
            scene_metadata: Map::new(),
            id_counters: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn object(&self, object_id: &str) -> Option<&DesignObject> {
        self.objects.iter().find(|o| o.object_id == object_id)
    }

    pub fn object_mut(&mut self, object_id: &str) -> Option<&mut DesignObject> {
        self.objects.iter_mut().find(|o| o.object_id == object_id)
    }

    pub fn contains_object(&self, object_id: &str) -> bool {
        self.object(object_id).is_some()
    }

    /// Reserve the next unused `{type}_{n}` id.
    ///
    /// The counter never goes backwards, and it is also raised past any
    /// existing object with the same prefix, so ids of removed objects
    /// stay retired.
    pub fn allocate_object_id(&mut self, object_type: &str) -> String {
        let prefix = object_type.to_lowercase();
        let highest_existing = self
            .objects
            .iter()
            .filter_map(|o| DesignObject::parse_id(&o.object_id))
            .filter(|(p, _)| *p == prefix)
            .map(|(_, n)| n)
            .max()
            .unwrap_or(0);
        let counter = self.id_counters.entry(prefix.clone()).or_insert(0);
        *counter = (*counter).max(highest_existing) + 1;
        DesignObject::generate_id(&prefix, *counter)
    }

    /// Record ids assigned elsewhere (e.g. deserialized objects) in the counters.
    pub fn sync_id_counters(&mut self) {
        for object in &self.objects {
            if let Some((prefix, n)) = DesignObject::parse_id(&object.object_id) {
                let counter = self.id_counters.entry(prefix.to_string()).or_insert(0);
                *counter = (*counter).max(n);
            }
        }
    }

    /// Every object id appears once.
    pub fn has_unique_object_ids(&self) -> bool {
        let mut seen = std::collections::BTreeSet::new();
        self.objects.iter().all(|o| seen.insert(o.object_id.as_str()))
    }

    pub fn is_degraded(&self) -> bool {
        self.scene_metadata
            .get(DEGRADED_KEY)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn mark_degraded(&mut self) {
        self.scene_metadata
            .insert(DEGRADED_KEY.to_string(), Value::Bool(true));
    }

    /// Scene-level style (e.g. "modern"), if one was inferred.
    pub fn style(&self) -> Option<&str> {
        self.scene_metadata
            .get("style")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Digest over objects, scene metadata and id counters.
    ///
    /// Timestamps and the spec id are excluded so two snapshots with the same
    /// content hash equal.
    pub fn digest(&self) -> SpecDigest {
        let content = serde_json::json!({
            "objects": self.objects,
            "scene_metadata": self.scene_metadata,
            "id_counters": self.id_counters,
        });
        // serde_json maps are BTreeMap-backed, so this is canonical.
        let bytes = serde_json::to_vec(&content).unwrap_or_default();
        SpecDigest::from_bytes(&bytes)
    }
}

// ---------------------------------------------------------------------------
// Iteration records
// ---------------------------------------------------------------------------

/// What produced an iteration record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationKind {
    /// One round of the refinement loop
    Refinement,
    /// A single targeted edit outside the loop
    ManualSwitch,
}

/// Immutable audit entry for one round or one manual edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iter_id: IterationId,
    pub spec_id: SpecId,
    pub kind: IterationKind,
    /// Round within its refinement session; `None` for manual switches
    pub round_index: Option<u32>,
    /// `None` on the first round of a fresh generation
    pub before_spec: Option<Specification>,
    pub after_spec: Specification,
    pub after_digest: SpecDigest,
    /// Instruction used to produce `after_spec`
    pub feedback: String,
    /// Composite score; `None` when the record was not scored
    pub score: Option<f64>,
    /// `after_spec` came from a fallback path
    pub degraded: bool,
    pub timestamp: DateTime<Utc>,
}

impl IterationRecord {
    pub fn new(
        kind: IterationKind,
        round_index: Option<u32>,
        before_spec: Option<Specification>,
        after_spec: Specification,
        feedback: impl Into<String>,
        score: Option<f64>,
    ) -> Self {
        Self {
            iter_id: IterationId::new(),
            spec_id: after_spec.spec_id.clone(),
            kind,
            round_index,
            before_spec,
            after_digest: after_spec.digest(),
            degraded: after_spec.is_degraded(),
            after_spec,
            feedback: feedback.into(),
            score,
            timestamp: Utc::now(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_units() -> String {
    "meters".to_string()
}
