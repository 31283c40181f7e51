//! Refinement instructions.
//!
//! An [`Instruction`] is free text plus the machine-readable [`Directive`]s
//! embedded in it. Directives use a small clause grammar so the same text
//! works for people, for language-model backends and for the rule-based
//! backend:
//!
//! ```text
//! set chair_1.dimensions.height to 0.95
//! set floor_1.material.type to marble
//! add object lamp
//! remove object rug_2
//! ```
//!
//! Clauses are separated by `;`. Anything that is not a directive is kept as
//! prose.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use specloop_state::Specification;

use crate::evaluator::Criterion;

/// One concrete edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Directive {
    Set {
        object_id: String,
        /// Dotted path inside the object, e.g. `material.type`
        field: String,
        value: Value,
    },
    Add {
        object_type: String,
    },
    Remove {
        object_id: String,
    },
}

impl Directive {
    pub fn set(object_id: impl Into<String>, field: impl Into<String>, value: impl Into<Value>) -> Self {
        Directive::Set {
            object_id: object_id.into(),
            field: field.into(),
            value: value.into(),
        }
    }

    /// Existing object this directive touches.
    pub fn target(&self) -> Option<&str> {
        match self {
            Directive::Set { object_id, .. } | Directive::Remove { object_id } => Some(object_id),
            Directive::Add { .. } => None,
        }
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Directive::Set {
                object_id,
                field,
                value,
            } => {
                write!(f, "set {object_id}.{field} to ")?;
                match value {
                    Value::String(s) => f.write_str(s),
                    other => write!(f, "{other}"),
                }
            }
            Directive::Add { object_type } => write!(f, "add object {object_type}"),
            Directive::Remove { object_id } => write!(f, "remove object {object_id}"),
        }
    }
}

fn set_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\bset\s+([a-z][a-z0-9_]*_\d+)\.([a-z_][a-z0-9_.]*)\s+to\s+([^;]+)")
            .expect("static regex")
    })
}

fn add_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\badd\s+object\s+([a-z][a-z0-9_]*)").expect("static regex"))
}

fn remove_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\bremove\s+object\s+([a-z][a-z0-9_]*_\d+)").expect("static regex")
    })
}

fn object_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b[a-z][a-z0-9_]*_\d+\b").expect("static regex"))
}

/// Numbers and booleans become JSON scalars, everything else a string.
fn parse_value(raw: &str) -> Value {
    let raw = raw.trim().trim_end_matches('.').trim();
    if let Ok(n) = raw.parse::<i64>() {
        return Value::from(n);
    }
    if let Ok(n) = raw.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(n) {
            return Value::Number(n);
        }
    }
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(raw.trim_matches('"').to_string()),
    }
}

/// Extract every directive from `text`, in order of appearance.
pub fn parse_directives(text: &str) -> Vec<Directive> {
    let mut found: Vec<(usize, Directive)> = Vec::new();
    for c in set_re().captures_iter(text) {
        let (Some(m), Some(id), Some(field), Some(value)) = (c.get(0), c.get(1), c.get(2), c.get(3))
        else {
            continue;
        };
        found.push((
            m.start(),
            Directive::Set {
                object_id: id.as_str().to_ascii_lowercase(),
                field: field.as_str().to_ascii_lowercase(),
                value: parse_value(value.as_str()),
            },
        ));
    }
    for c in add_re().captures_iter(text) {
        if let (Some(m), Some(t)) = (c.get(0), c.get(1)) {
            found.push((
                m.start(),
                Directive::Add {
                    object_type: t.as_str().to_ascii_lowercase(),
                },
            ));
        }
    }
    for c in remove_re().captures_iter(text) {
        if let (Some(m), Some(id)) = (c.get(0), c.get(1)) {
            found.push((
                m.start(),
                Directive::Remove {
                    object_id: id.as_str().to_ascii_lowercase(),
                },
            ));
        }
    }
    found.sort_by_key(|(pos, _)| *pos);
    found.into_iter().map(|(_, d)| d).collect()
}

/// Object ids of `spec` mentioned anywhere in `text`.
pub fn mentioned_objects(text: &str, spec: &Specification) -> Vec<String> {
    let lowered = text.to_ascii_lowercase();
    let mut seen = BTreeSet::new();
    object_id_re()
        .find_iter(&lowered)
        .map(|m| m.as_str().to_string())
        .filter(|id| spec.contains_object(id) && seen.insert(id.clone()))
        .collect()
}

/// A natural-language refinement request with its parsed directives.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Instruction {
    /// Criterion this instruction addresses, when synthesized from feedback
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub criterion: Option<Criterion>,
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default)]
    pub directives: Vec<Directive>,
    pub text: String,
}

impl Instruction {
    /// The "nothing to do" instruction.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.directives.is_empty()
    }

    /// Parse free text. Targets are the objects named by directives.
    pub fn from_text(text: impl Into<String>) -> Self {
        let text = text.into();
        let directives = parse_directives(&text);
        let mut targets: Vec<String> = Vec::new();
        for d in &directives {
            if let Some(t) = d.target() {
                if !targets.iter().any(|x| x == t) {
                    targets.push(t.to_string());
                }
            }
        }
        Self {
            criterion: None,
            targets,
            directives,
            text,
        }
    }

    /// Build from a summary line, prose notes and directives; the text
    /// embeds all three.
    pub fn compose(
        criterion: Criterion,
        targets: Vec<String>,
        summary: &str,
        notes: Vec<String>,
        directives: Vec<Directive>,
    ) -> Self {
        let clauses: Vec<String> = notes
            .into_iter()
            .chain(directives.iter().map(ToString::to_string))
            .collect();
        let text = if clauses.is_empty() {
            summary.to_string()
        } else {
            format!("{summary}: {}", clauses.join("; "))
        };
        Self {
            criterion: Some(criterion),
            targets,
            directives,
            text,
        }
    }

    /// Objects in `spec` this instruction may change: explicit targets
    /// plus any existing id mentioned in the text.
    pub fn targeted_objects(&self, spec: &Specification) -> BTreeSet<String> {
        let mut out: BTreeSet<String> = self
            .targets
            .iter()
            .filter(|t| spec.contains_object(t))
            .cloned()
            .collect();
        out.extend(mentioned_objects(&self.text, spec));
        out
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}
