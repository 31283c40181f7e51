//! Turns an evaluation into the next refinement instruction.
//!
//! The synthesizer picks one criterion per round: among criteria that still
//! have room to improve, the one with the lowest weighted contribution, ties
//! broken by the configured priority order. It then targets the worst
//! scoring objects for that criterion and emits concrete directives for
//! them. A score at or above the convergence threshold yields the empty
//! instruction.

use std::cmp::Ordering;

use specloop_state::{DesignObject, Specification};

use crate::config::RefinementConfig;
use crate::evaluator::{Criterion, CriterionBreakdown, EvaluationResult};
use crate::instruction::{Directive, Instruction};
use crate::reference::{self, round3, UNSPECIFIED_MATERIAL};

/// Objects addressed by one instruction at most.
pub const MAX_TARGETS: usize = 3;

const DEFAULT_COLOR: &str = "#9e9e9e";
const DEFAULT_TEXTURE: &str = "smooth";
const DEFAULT_FINISH: &str = "matte";

#[derive(Debug, Clone)]
pub struct FeedbackSynthesizer {
    threshold: f64,
    priority: Vec<Criterion>,
}

impl FeedbackSynthesizer {
    pub fn new(threshold: f64, priority: Vec<Criterion>) -> Self {
        Self {
            threshold,
            priority,
        }
    }

    pub fn from_config(config: &RefinementConfig) -> Self {
        Self::new(config.convergence_threshold, config.priority())
    }

    fn rank(&self, criterion: Criterion) -> usize {
        self.priority
            .iter()
            .position(|c| *c == criterion)
            .unwrap_or(self.priority.len())
    }

    /// Criteria worth addressing, most urgent first.
    pub fn ranked_criteria<'a>(
        &self,
        evaluation: &'a EvaluationResult,
    ) -> Vec<(Criterion, &'a CriterionBreakdown)> {
        let mut candidates: Vec<_> = evaluation
            .breakdown
            .iter()
            .filter(|(_, b)| b.raw < 1.0)
            .map(|(c, b)| (*c, b))
            .collect();
        candidates.sort_by(|(ca, a), (cb, b)| {
            a.contribution
                .partial_cmp(&b.contribution)
                .unwrap_or(Ordering::Equal)
                .then_with(|| self.rank(*ca).cmp(&self.rank(*cb)))
        });
        candidates
    }

    pub fn synthesize(&self, spec: &Specification, evaluation: &EvaluationResult) -> Instruction {
        if evaluation.score >= self.threshold {
            return Instruction::empty();
        }

        if spec.objects.is_empty() {
            let object_type = spec
                .scene_metadata
                .get("design_type")
                .and_then(|v| v.as_str())
                .filter(|t| reference::is_known_type(t))
                .unwrap_or("object");
            return Instruction::compose(
                Criterion::Completeness,
                Vec::new(),
                "the design has no objects",
                Vec::new(),
                vec![Directive::Add {
                    object_type: object_type.to_string(),
                }],
            );
        }

        let candidates = self.ranked_criteria(evaluation);
        for (criterion, breakdown) in &candidates {
            let mut notes = Vec::new();
            let mut directives = Vec::new();
            let mut targets = Vec::new();
            for object in worst_objects(spec, breakdown) {
                let before = directives.len();
                match criterion {
                    Criterion::Completeness => completeness(object, spec.style(), &mut directives),
                    Criterion::MaterialValidity => material(object, spec.style(), &mut directives),
                    Criterion::DimensionalPlausibility => {
                        dimensions(object, &mut notes, &mut directives)
                    }
                    Criterion::StyleConsistency => style(object, spec.style(), &mut directives),
                }
                if directives.len() > before {
                    targets.push(object.object_id.clone());
                }
                if targets.len() == MAX_TARGETS {
                    break;
                }
            }
            if !directives.is_empty() {
                let summary = format!("improve {} of {}", criterion.label(), targets.join(", "));
                return Instruction::compose(*criterion, targets, &summary, notes, directives);
            }
        }

        match candidates.first() {
            Some((criterion, _)) => Instruction::compose(
                *criterion,
                Vec::new(),
                &format!("improve {}", criterion.label()),
                Vec::new(),
                Vec::new(),
            ),
            None => Instruction::empty(),
        }
    }
}

/// Objects below a perfect score, worst first. When the criterion failed to
/// score, every object is a candidate.
fn worst_objects<'a>(spec: &'a Specification, breakdown: &CriterionBreakdown) -> Vec<&'a DesignObject> {
    let mut scored: Vec<(&DesignObject, f64)> = spec
        .objects
        .iter()
        .filter_map(|o| {
            if breakdown.object_scores.is_empty() {
                return Some((o, 0.0));
            }
            breakdown
                .object_scores
                .get(&o.object_id)
                .filter(|s| **s < 1.0)
                .map(|s| (o, *s))
        })
        .collect();
    scored.sort_by(|(oa, a), (ob, b)| {
        a.partial_cmp(b)
            .unwrap_or(Ordering::Equal)
            .then_with(|| oa.object_id.cmp(&ob.object_id))
    });
    scored.into_iter().map(|(o, _)| o).collect()
}

fn is_blank(field: &Option<String>) -> bool {
    field.as_deref().map_or(true, |s| s.trim().is_empty())
}

fn material_missing(object: &DesignObject) -> bool {
    let t = object.material.material_type.trim();
    t.is_empty() || t.eq_ignore_ascii_case(UNSPECIFIED_MATERIAL)
}

fn completeness(object: &DesignObject, style: Option<&str>, out: &mut Vec<Directive>) {
    if !object.material_editable() {
        return;
    }
    let palette = style.and_then(reference::style_palette);
    let id = &object.object_id;
    if material_missing(object) {
        out.push(Directive::set(
            id,
            "material.type",
            reference::preferred_material(&object.object_type, style),
        ));
    }
    if is_blank(&object.material.color) {
        out.push(Directive::set(id, "material.color", palette.map_or(DEFAULT_COLOR, |p| p.color)));
    }
    if is_blank(&object.material.texture) {
        out.push(Directive::set(id, "material.texture", DEFAULT_TEXTURE));
    }
    if is_blank(&object.material.finish) {
        out.push(Directive::set(id, "material.finish", palette.map_or(DEFAULT_FINISH, |p| p.finish)));
    }
}

fn material(object: &DesignObject, style: Option<&str>, out: &mut Vec<Directive>) {
    if !object.material_editable() {
        return;
    }
    let preferred = reference::preferred_material(&object.object_type, style);
    if !object.material.material_type.eq_ignore_ascii_case(preferred) {
        out.push(Directive::set(&object.object_id, "material.type", preferred));
    }
}

fn dimensions(object: &DesignObject, notes: &mut Vec<String>, out: &mut Vec<Directive>) {
    if !object.editable {
        return;
    }
    let Some(range) = reference::dimension_range(&object.object_type) else {
        return;
    };
    let id = &object.object_id;
    let d = &object.dimensions;
    let (mid_l, mid_w, mid_h) = range.midpoint();

    let convertible = reference::to_meters(1.0, &d.units).is_some();
    if !convertible {
        notes.push(format!("express {id} in meters"));
        out.push(Directive::set(id, "dimensions.units", "meters"));
        out.push(Directive::set(id, "dimensions.length", mid_l));
        out.push(Directive::set(id, "dimensions.width", mid_w));
        out.push(Directive::set(id, "dimensions.height", mid_h));
        return;
    }

    for (field, value, bounds, mid) in [
        ("length", d.length, range.length, mid_l),
        ("width", d.width, range.width, mid_w),
        ("height", d.height, range.height, mid_h),
    ] {
        let target_m = match reference::to_meters(value, &d.units) {
            Some(v) if v.is_finite() && v > 0.0 => {
                if v < bounds.0 {
                    notes.push(format!("increase {field} of {id}"));
                    bounds.0
                } else if v > bounds.1 {
                    notes.push(format!("reduce {field} of {id}"));
                    bounds.1
                } else {
                    continue;
                }
            }
            _ => {
                notes.push(format!("give {id} a valid {field}"));
                mid
            }
        };
        let target = reference::from_meters(target_m, &d.units).unwrap_or(target_m);
        out.push(Directive::set(id, format!("dimensions.{field}"), round3(target)));
    }
}

fn style(object: &DesignObject, style: Option<&str>, out: &mut Vec<Directive>) {
    let Some(palette) = style.and_then(reference::style_palette) else {
        return;
    };
    if !object.material_editable() {
        return;
    }
    let id = &object.object_id;
    let current = object.material.material_type.to_ascii_lowercase();
    if !palette.materials.contains(&current.as_str()) {
        let preferred = reference::preferred_material(&object.object_type, style);
        if palette.materials.contains(&preferred) && preferred != current {
            out.push(Directive::set(id, "material.type", preferred));
        }
    }
    let finish_matches = object
        .material
        .finish
        .as_deref()
        .is_some_and(|f| f.eq_ignore_ascii_case(palette.finish));
    if !finish_matches {
        out.push(Directive::set(id, "material.finish", palette.finish));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::Evaluator;
    use serde_json::{json, Map};
    use specloop_state::{Dimensions, MaterialProperties, Position, SpecId};

    fn object(id: &str, material: &str, dims: Dimensions) -> DesignObject {
        let (t, _) = DesignObject::parse_id(id).unwrap();
        DesignObject {
            object_id: id.to_string(),
            object_type: t.to_string(),
            material: MaterialProperties::of_type(material),
            position: Position::default(),
            dimensions: dims,
            rotation: None,
            metadata: Map::new(),
            editable: true,
        }
    }

    fn complete(mut o: DesignObject) -> DesignObject {
        o.material.color = Some("#8b5a2b".into());
        o.material.texture = Some("grain".into());
        o.material.finish = Some("natural".into());
        o
    }

    fn setup(objects: Vec<DesignObject>) -> (Specification, EvaluationResult, FeedbackSynthesizer) {
        let config = RefinementConfig::default();
        let mut spec = Specification::new(SpecId::from("spec_fb"));
        spec.objects = objects;
        let eval = Evaluator::from_config(&config).evaluate(&spec);
        (spec, eval, FeedbackSynthesizer::from_config(&config))
    }

    #[test]
    fn converged_spec_gets_empty_instruction() {
        let (spec, eval, fb) = setup(vec![complete(object("chair_1", "wood", Dimensions::meters(0.5, 0.5, 0.9)))]);
        assert!(eval.score >= 0.85);
        assert!(fb.synthesize(&spec, &eval).is_empty());
    }

    #[test]
    fn tall_chair_gets_height_directive() {
        let (spec, eval, fb) = setup(vec![complete(object("chair_1", "wood", Dimensions::meters(0.5, 0.5, 3.0)))]);
        // Dimensional plausibility is the only imperfect criterion.
        let fb = FeedbackSynthesizer::new(1.0, fb.priority.clone());
        let instr = fb.synthesize(&spec, &eval);
        assert_eq!(instr.criterion, Some(Criterion::DimensionalPlausibility));
        assert_eq!(instr.targets, vec!["chair_1".to_string()]);
        assert_eq!(
            instr.directives,
            vec![Directive::set("chair_1", "dimensions.height", json!(1.2))]
        );
        assert!(instr.text.contains("reduce height of chair_1"));
    }

    #[test]
    fn lowest_contribution_wins() {
        let (spec, eval, fb) = setup(vec![object("chair_1", UNSPECIFIED_MATERIAL, Dimensions::meters(0.5, 0.5, 0.9))]);
        let instr = fb.synthesize(&spec, &eval);
        assert_eq!(instr.criterion, Some(Criterion::Completeness));
        assert!(instr
            .directives
            .contains(&Directive::set("chair_1", "material.type", "wood")));
    }

    #[test]
    fn ties_follow_priority_order() {
        let (spec, mut eval, _) = setup(vec![object("sofa_1", "marble", Dimensions::meters(2.0, 0.9, 0.8))]);
        for b in eval.breakdown.values_mut() {
            b.raw = 0.5;
            b.contribution = 0.1;
        }
        let fb = FeedbackSynthesizer::new(0.85, vec![Criterion::MaterialValidity, Criterion::Completeness]);
        let instr = fb.synthesize(&spec, &eval);
        assert_eq!(instr.criterion, Some(Criterion::MaterialValidity));
        assert_eq!(
            instr.directives,
            vec![Directive::set("sofa_1", "material.type", "fabric")]
        );
    }

    #[test]
    fn targets_are_capped_and_worst_first() {
        let objects = (1..=5)
            .map(|i| object(&format!("chair_{i}"), UNSPECIFIED_MATERIAL, Dimensions::meters(0.5, 0.5, 0.9)))
            .collect();
        let (spec, eval, fb) = setup(objects);
        let instr = fb.synthesize(&spec, &eval);
        assert_eq!(instr.targets, vec!["chair_1", "chair_2", "chair_3"]);
    }

    #[test]
    fn locked_materials_are_not_targeted() {
        let mut locked = object("chair_1", UNSPECIFIED_MATERIAL, Dimensions::meters(0.5, 0.5, 0.9));
        locked.material.editable = false;
        let open = object("chair_2", UNSPECIFIED_MATERIAL, Dimensions::meters(0.5, 0.5, 0.9));
        let (spec, eval, fb) = setup(vec![locked, open]);
        let instr = fb.synthesize(&spec, &eval);
        assert_eq!(instr.targets, vec!["chair_2"]);
        assert!(instr.directives.iter().all(|d| d.target() == Some("chair_2")));
    }

    #[test]
    fn empty_spec_asks_for_an_object() {
        let (mut spec, _, fb) = setup(Vec::new());
        spec.scene_metadata.insert("design_type".into(), json!("desk"));
        let eval = Evaluator::from_config(&RefinementConfig::default()).evaluate(&spec);
        let instr = fb.synthesize(&spec, &eval);
        assert_eq!(
            instr.directives,
            vec![Directive::Add {
                object_type: "desk".into()
            }]
        );
    }

    #[test]
    fn instruction_text_parses_back_to_directives() {
        let (spec, eval, fb) = setup(vec![object("lamp_1", UNSPECIFIED_MATERIAL, Dimensions::meters(0.3, 0.3, 1.5))]);
        let instr = fb.synthesize(&spec, &eval);
        assert!(!instr.directives.is_empty());
        assert_eq!(Instruction::from_text(instr.text.clone()).directives, instr.directives);
    }
}
