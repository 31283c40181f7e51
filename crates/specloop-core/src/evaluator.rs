//! Deterministic scoring of a specification.
//!
//! Each [`Criterion`] maps to a pure scoring function in [`scoring_fn`].
//! A function returns `Ok(None)` when the criterion does not apply to the
//! spec at all (e.g. style consistency without a scene style); such
//! criteria are skipped and the remaining weights are renormalized. A
//! function that returns `Err` is recorded in the breakdown and scored at
//! the neutral value instead, so one bad field never aborts an evaluation.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use specloop_state::{DesignObject, Specification};
use tracing::warn;

use crate::config::RefinementConfig;
use crate::reference::{self, UNSPECIFIED_MATERIAL};

/// Score assigned when a value cannot be judged.
pub const NEUTRAL_SCORE: f64 = 0.5;

/// Scoring criteria known to the evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    /// Fraction of optional material fields that are filled in
    Completeness,
    /// Material fits the object type
    MaterialValidity,
    /// Dimensions fall inside the plausible range for the type
    DimensionalPlausibility,
    /// Materials and finishes match the scene style
    StyleConsistency,
}

impl Criterion {
    pub const ALL: [Criterion; 4] = [
        Criterion::Completeness,
        Criterion::MaterialValidity,
        Criterion::DimensionalPlausibility,
        Criterion::StyleConsistency,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Criterion::Completeness => "completeness",
            Criterion::MaterialValidity => "material_validity",
            Criterion::DimensionalPlausibility => "dimensional_plausibility",
            Criterion::StyleConsistency => "style_consistency",
        }
    }

    /// Human-readable name used in instruction text.
    pub fn label(&self) -> &'static str {
        match self {
            Criterion::Completeness => "completeness",
            Criterion::MaterialValidity => "material validity",
            Criterion::DimensionalPlausibility => "dimensional plausibility",
            Criterion::StyleConsistency => "style consistency",
        }
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Criterion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Criterion::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown criterion: {s}"))
    }
}

/// A scoring function failed on malformed input.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScoringError {
    #[error("{object_id}: {field} is not a finite positive number ({value})")]
    InvalidDimension {
        object_id: String,
        field: &'static str,
        value: f64,
    },

    #[error("{object_id}: material {field} {value} is outside [0, 1]")]
    OutOfRange {
        object_id: String,
        field: &'static str,
        value: f64,
    },
}

/// Raw output of one scoring function.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CriterionScore {
    pub value: f64,
    pub object_scores: BTreeMap<String, f64>,
}

impl CriterionScore {
    fn from_objects(object_scores: BTreeMap<String, f64>) -> Self {
        let value = if object_scores.is_empty() {
            0.0
        } else {
            object_scores.values().sum::<f64>() / object_scores.len() as f64
        };
        Self {
            value,
            object_scores,
        }
    }
}

pub type ScoringFn = fn(&Specification) -> Result<Option<CriterionScore>, ScoringError>;

/// Lookup table from criterion to scoring function.
pub fn scoring_fn(criterion: Criterion) -> ScoringFn {
    match criterion {
        Criterion::Completeness => score_completeness,
        Criterion::MaterialValidity => score_material_validity,
        Criterion::DimensionalPlausibility => score_dimensional_plausibility,
        Criterion::StyleConsistency => score_style_consistency,
    }
}

/// Per-criterion part of an evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionBreakdown {
    /// Weight after renormalization over applicable criteria
    pub weight: f64,
    pub raw: f64,
    /// `weight * raw`
    pub contribution: f64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub object_scores: BTreeMap<String, f64>,
    /// Set when the scoring function failed and `raw` is the neutral value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Composite score plus per-criterion breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub score: f64,
    pub breakdown: BTreeMap<Criterion, CriterionBreakdown>,
    /// Configured criteria that did not apply to this spec
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<Criterion>,
}

impl EvaluationResult {
    pub fn get(&self, criterion: Criterion) -> Option<&CriterionBreakdown> {
        self.breakdown.get(&criterion)
    }

    pub fn failed_criteria(&self) -> impl Iterator<Item = Criterion> + '_ {
        self.breakdown
            .iter()
            .filter(|(_, b)| b.error.is_some())
            .map(|(c, _)| *c)
    }
}

/// Scores specifications against weighted criteria.
#[derive(Debug, Clone)]
pub struct Evaluator {
    weights: BTreeMap<Criterion, f64>,
}

impl Evaluator {
    pub fn new(weights: BTreeMap<Criterion, f64>) -> Self {
        Self { weights }
    }

    pub fn from_config(config: &RefinementConfig) -> Self {
        Self::new(config.criteria_weights.clone())
    }

    /// Score `spec`. Never fails; bad inputs lower or neutralize criteria.
    pub fn evaluate(&self, spec: &Specification) -> EvaluationResult {
        let mut raw: Vec<(Criterion, f64, CriterionScore, Option<String>)> = Vec::new();
        let mut skipped = Vec::new();

        for (criterion, weight) in &self.weights {
            if *weight <= 0.0 {
                continue;
            }
            match scoring_fn(*criterion)(spec) {
                Ok(Some(score)) => raw.push((*criterion, *weight, score, None)),
                Ok(None) => skipped.push(*criterion),
                Err(e) => {
                    warn!(criterion = %criterion, error = %e, "scoring function failed, using neutral score");
                    let neutral = CriterionScore {
                        value: NEUTRAL_SCORE,
                        object_scores: BTreeMap::new(),
                    };
                    raw.push((*criterion, *weight, neutral, Some(e.to_string())));
                }
            }
        }

        let total: f64 = raw.iter().map(|(_, w, _, _)| w).sum();
        let mut breakdown = BTreeMap::new();
        let mut score = 0.0;
        for (criterion, weight, result, error) in raw {
            let weight = if total > 0.0 { weight / total } else { 0.0 };
            let value = result.value.clamp(0.0, 1.0);
            let contribution = weight * value;
            score += contribution;
            breakdown.insert(
                criterion,
                CriterionBreakdown {
                    weight,
                    raw: value,
                    contribution,
                    object_scores: result.object_scores,
                    error,
                },
            );
        }

        EvaluationResult {
            score: score.clamp(0.0, 1.0),
            breakdown,
            skipped,
        }
    }
}

// ---------------------------------------------------------------------------
// Scoring functions
// ---------------------------------------------------------------------------

fn has_material(object: &DesignObject) -> bool {
    let t = object.material.material_type.trim();
    !t.is_empty() && !t.eq_ignore_ascii_case(UNSPECIFIED_MATERIAL)
}

fn filled(field: &Option<String>) -> bool {
    field.as_deref().is_some_and(|s| !s.trim().is_empty())
}

/// Share of material type, color, texture and finish that are set.
/// A spec with no objects scores 0.
fn score_completeness(spec: &Specification) -> Result<Option<CriterionScore>, ScoringError> {
    let scores = spec
        .objects
        .iter()
        .map(|o| {
            let m = &o.material;
            let slots = [has_material(o), filled(&m.color), filled(&m.texture), filled(&m.finish)];
            let n = slots.iter().filter(|s| **s).count();
            (o.object_id.clone(), n as f64 / slots.len() as f64)
        })
        .collect();
    Ok(Some(CriterionScore::from_objects(scores)))
}

fn score_material_validity(spec: &Specification) -> Result<Option<CriterionScore>, ScoringError> {
    if spec.objects.is_empty() {
        return Ok(None);
    }
    let mut scores = BTreeMap::new();
    for o in &spec.objects {
        for (field, value) in [
            ("reflectivity", o.material.reflectivity),
            ("roughness", o.material.roughness),
            ("metallic", o.material.metallic),
        ] {
            if let Some(v) = value {
                if !(0.0..=1.0).contains(&v) {
                    return Err(ScoringError::OutOfRange {
                        object_id: o.object_id.clone(),
                        field,
                        value: v,
                    });
                }
            }
        }

        let material = o.material.material_type.to_ascii_lowercase();
        let score = if !has_material(o) {
            NEUTRAL_SCORE
        } else if !reference::is_known_material(&material) {
            0.2
        } else {
            match reference::compatible_materials(&o.object_type) {
                Some(compatible) if compatible.contains(&material.as_str()) => 1.0,
                Some(_) => 0.4,
                None => NEUTRAL_SCORE,
            }
        };
        scores.insert(o.object_id.clone(), score);
    }
    Ok(Some(CriterionScore::from_objects(scores)))
}

/// 1.0 inside the range, falling off linearly with relative deviation.
fn range_score(value: f64, (lo, hi): reference::Range) -> f64 {
    if value < lo {
        (1.0 - (lo - value) / lo).max(0.0)
    } else if value > hi {
        (1.0 - (value - hi) / hi).max(0.0)
    } else {
        1.0
    }
}

fn score_dimensional_plausibility(
    spec: &Specification,
) -> Result<Option<CriterionScore>, ScoringError> {
    if spec.objects.is_empty() {
        return Ok(None);
    }
    let mut scores = BTreeMap::new();
    for o in &spec.objects {
        let d = &o.dimensions;
        for (field, value) in [("length", d.length), ("width", d.width), ("height", d.height)] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ScoringError::InvalidDimension {
                    object_id: o.object_id.clone(),
                    field,
                    value,
                });
            }
        }

        let score = match reference::dimension_range(&o.object_type) {
            None => NEUTRAL_SCORE,
            Some(range) => {
                let meters = |v| reference::to_meters(v, &d.units);
                match (meters(d.length), meters(d.width), meters(d.height)) {
                    (Some(l), Some(w), Some(h)) => {
                        (range_score(l, range.length)
                            + range_score(w, range.width)
                            + range_score(h, range.height))
                            / 3.0
                    }
                    _ => NEUTRAL_SCORE,
                }
            }
        };
        scores.insert(o.object_id.clone(), score);
    }
    Ok(Some(CriterionScore::from_objects(scores)))
}

fn score_style_consistency(spec: &Specification) -> Result<Option<CriterionScore>, ScoringError> {
    let Some(palette) = spec.style().and_then(reference::style_palette) else {
        return Ok(None);
    };
    if spec.objects.is_empty() {
        return Ok(None);
    }

    let scores = spec
        .objects
        .iter()
        .map(|o| {
            let material = o.material.material_type.to_ascii_lowercase();
            let material_match = if !has_material(o) {
                NEUTRAL_SCORE
            } else if palette.materials.contains(&material.as_str()) {
                1.0
            } else {
                0.3
            };
            let finish_match = match o.material.finish.as_deref() {
                None => NEUTRAL_SCORE,
                Some(f) if f.eq_ignore_ascii_case(palette.finish) => 1.0,
                Some(_) => 0.6,
            };
            (o.object_id.clone(), 0.7 * material_match + 0.3 * finish_match)
        })
        .collect();
    Ok(Some(CriterionScore::from_objects(scores)))
}
