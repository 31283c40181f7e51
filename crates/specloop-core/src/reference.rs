//! Static reference data: plausible sizes, material compatibility and style
//! palettes per object type.
//!
//! Everything here is keyed by lowercase names. Lookups for unknown names
//! return `None`, and callers treat that as "cannot judge".

/// Inclusive `(min, max)` range in meters.
pub type Range = (f64, f64);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DimensionRange {
    pub length: Range,
    pub width: Range,
    pub height: Range,
}

impl DimensionRange {
    /// Midpoint of each range, used for defaults.
    pub fn midpoint(&self) -> (f64, f64, f64) {
        let mid = |(lo, hi): Range| round3((lo + hi) / 2.0);
        (mid(self.length), mid(self.width), mid(self.height))
    }
}

struct TypeInfo {
    name: &'static str,
    category: &'static str,
    dims: DimensionRange,
    /// Compatible materials, most typical first.
    materials: &'static [&'static str],
}

const fn dims(length: Range, width: Range, height: Range) -> DimensionRange {
    DimensionRange {
        length,
        width,
        height,
    }
}

static TYPES: &[TypeInfo] = &[
    TypeInfo {
        name: "chair",
        category: "furniture",
        dims: dims((0.4, 0.7), (0.4, 0.7), (0.75, 1.2)),
        materials: &["wood", "oak", "walnut", "metal", "steel", "aluminum", "fabric", "leather", "mesh", "plastic", "rattan", "velvet"],
    },
    TypeInfo {
        name: "table",
        category: "furniture",
        dims: dims((0.6, 2.4), (0.6, 1.2), (0.7, 0.8)),
        materials: &["wood", "oak", "walnut", "glass", "marble", "metal", "steel", "granite", "stone"],
    },
    TypeInfo {
        name: "desk",
        category: "furniture",
        dims: dims((1.0, 2.0), (0.5, 0.9), (0.7, 0.8)),
        materials: &["wood", "oak", "walnut", "metal", "steel", "glass"],
    },
    TypeInfo {
        name: "sofa",
        category: "furniture",
        dims: dims((1.5, 3.0), (0.8, 1.1), (0.7, 1.0)),
        materials: &["fabric", "leather", "velvet", "linen", "wool", "cotton"],
    },
    TypeInfo {
        name: "bed",
        category: "furniture",
        dims: dims((1.9, 2.2), (0.9, 2.0), (0.4, 1.2)),
        materials: &["wood", "oak", "walnut", "fabric", "metal", "leather", "velvet"],
    },
    TypeInfo {
        name: "shelf",
        category: "furniture",
        dims: dims((0.6, 2.0), (0.25, 0.5), (0.8, 2.2)),
        materials: &["wood", "oak", "walnut", "metal", "steel", "glass"],
    },
    TypeInfo {
        name: "cabinet",
        category: "furniture",
        dims: dims((0.4, 2.0), (0.35, 0.65), (0.6, 2.2)),
        materials: &["wood", "oak", "walnut", "metal", "steel", "glass"],
    },
    TypeInfo {
        name: "stool",
        category: "furniture",
        dims: dims((0.3, 0.5), (0.3, 0.5), (0.45, 0.8)),
        materials: &["wood", "oak", "metal", "steel", "plastic", "leather"],
    },
    TypeInfo {
        name: "bench",
        category: "furniture",
        dims: dims((0.9, 2.0), (0.3, 0.5), (0.4, 0.5)),
        materials: &["wood", "oak", "walnut", "metal", "steel", "stone", "concrete"],
    },
    TypeInfo {
        name: "lamp",
        category: "lighting",
        dims: dims((0.15, 0.6), (0.15, 0.6), (0.3, 1.9)),
        materials: &["metal", "brass", "steel", "aluminum", "glass", "ceramic", "fabric", "plastic"],
    },
    TypeInfo {
        name: "floor",
        category: "architecture",
        dims: dims((2.0, 30.0), (2.0, 30.0), (0.01, 0.3)),
        materials: &["wood", "oak", "walnut", "marble", "granite", "stone", "concrete", "tile", "ceramic"],
    },
    TypeInfo {
        name: "wall",
        category: "architecture",
        dims: dims((1.0, 30.0), (0.08, 0.5), (2.2, 5.0)),
        materials: &["plaster", "brick", "concrete", "stone", "wood", "tile", "glass"],
    },
    TypeInfo {
        name: "ceiling",
        category: "architecture",
        dims: dims((2.0, 30.0), (2.0, 30.0), (0.01, 0.5)),
        materials: &["plaster", "wood", "concrete", "metal"],
    },
    TypeInfo {
        name: "door",
        category: "architecture",
        dims: dims((0.7, 1.2), (0.03, 0.1), (1.9, 2.5)),
        materials: &["wood", "oak", "walnut", "metal", "steel", "glass"],
    },
    TypeInfo {
        name: "window",
        category: "architecture",
        dims: dims((0.4, 3.0), (0.02, 0.3), (0.4, 2.5)),
        materials: &["glass", "aluminum", "wood", "steel"],
    },
    TypeInfo {
        name: "rug",
        category: "textile",
        dims: dims((0.6, 4.0), (0.6, 3.0), (0.005, 0.03)),
        materials: &["wool", "cotton", "linen", "fabric"],
    },
];

/// Every material the evaluator recognizes.
pub static KNOWN_MATERIALS: &[&str] = &[
    "wood", "oak", "walnut", "metal", "steel", "aluminum", "brass", "fabric", "leather", "velvet",
    "linen", "wool", "cotton", "glass", "marble", "granite", "stone", "concrete", "ceramic", "tile",
    "plastic", "mesh", "rattan", "plaster", "brick",
];

/// Placeholder material for objects whose material was never determined.
pub const UNSPECIFIED_MATERIAL: &str = "unspecified";

/// Materials, finish and accent color that read as one style.
#[derive(Debug)]
pub struct StylePalette {
    pub name: &'static str,
    pub materials: &'static [&'static str],
    pub finish: &'static str,
    pub color: &'static str,
}

static STYLES: &[StylePalette] = &[
    StylePalette {
        name: "modern",
        materials: &["metal", "steel", "aluminum", "glass", "leather", "fabric", "mesh", "concrete", "marble"],
        finish: "matte",
        color: "#2f2f2f",
    },
    StylePalette {
        name: "rustic",
        materials: &["wood", "oak", "walnut", "stone", "brick", "linen", "wool", "rattan"],
        finish: "natural",
        color: "#8b5a2b",
    },
    StylePalette {
        name: "industrial",
        materials: &["steel", "metal", "concrete", "brick", "leather", "wood"],
        finish: "brushed",
        color: "#4a4a4a",
    },
    StylePalette {
        name: "minimalist",
        materials: &["wood", "oak", "glass", "plaster", "linen", "cotton", "concrete"],
        finish: "matte",
        color: "#f5f5f5",
    },
    StylePalette {
        name: "scandinavian",
        materials: &["oak", "wood", "wool", "linen", "cotton", "plaster", "fabric"],
        finish: "satin",
        color: "#ede6da",
    },
    StylePalette {
        name: "luxury",
        materials: &["marble", "velvet", "brass", "leather", "walnut", "glass"],
        finish: "glossy",
        color: "#1c1c3c",
    },
];

fn type_info(object_type: &str) -> Option<&'static TypeInfo> {
    let key = object_type.to_ascii_lowercase();
    TYPES.iter().find(|t| t.name == key)
}

pub fn dimension_range(object_type: &str) -> Option<DimensionRange> {
    type_info(object_type).map(|t| t.dims)
}

pub fn category(object_type: &str) -> Option<&'static str> {
    type_info(object_type).map(|t| t.category)
}

pub fn compatible_materials(object_type: &str) -> Option<&'static [&'static str]> {
    type_info(object_type).map(|t| t.materials)
}

pub fn is_known_type(object_type: &str) -> bool {
    type_info(object_type).is_some()
}

pub fn is_known_material(material: &str) -> bool {
    KNOWN_MATERIALS.contains(&material.to_ascii_lowercase().as_str())
}

pub fn style_palette(style: &str) -> Option<&'static StylePalette> {
    let key = style.to_ascii_lowercase();
    STYLES.iter().find(|s| s.name == key)
}

pub fn known_styles() -> impl Iterator<Item = &'static str> {
    STYLES.iter().map(|s| s.name)
}

/// Best material for a type, preferring ones that also fit the style.
pub fn preferred_material(object_type: &str, style: Option<&str>) -> &'static str {
    let palette = style.and_then(style_palette);
    match (compatible_materials(object_type), palette) {
        (Some(compatible), Some(palette)) => compatible
            .iter()
            .find(|m| palette.materials.contains(m))
            .or_else(|| compatible.first())
            .copied()
            .unwrap_or("wood"),
        (Some(compatible), None) => compatible.first().copied().unwrap_or("wood"),
        (None, Some(palette)) => palette.materials.first().copied().unwrap_or("wood"),
        (None, None) => "wood",
    }
}

/// Map a prompt word to a canonical object type.
pub fn canonical_type(word: &str) -> Option<&'static str> {
    let word = word.to_ascii_lowercase();
    let canonical = match word.trim_end_matches('s') {
        "chair" | "armchair" | "seat" => "chair",
        "table" | "tabletop" => "table",
        "desk" | "workstation" => "desk",
        "sofa" | "couch" | "loveseat" => "sofa",
        "bed" => "bed",
        "shelf" | "shelve" | "bookshelf" | "bookcase" => "shelf",
        "cabinet" | "wardrobe" | "dresser" | "cupboard" => "cabinet",
        "stool" => "stool",
        "bench" | "benche" => "bench",
        "lamp" | "light" | "chandelier" => "lamp",
        "floor" | "flooring" => "floor",
        "wall" => "wall",
        "ceiling" => "ceiling",
        "door" => "door",
        "window" => "window",
        "rug" | "carpet" => "rug",
        _ => return None,
    };
    Some(canonical)
}

/// Convert a length in `units` to meters.
pub fn to_meters(value: f64, units: &str) -> Option<f64> {
    unit_factor(units).map(|f| value * f)
}

/// Convert a length in meters to `units`.
pub fn from_meters(value: f64, units: &str) -> Option<f64> {
    unit_factor(units).map(|f| value / f)
}

fn unit_factor(units: &str) -> Option<f64> {
    let factor = match units.trim().to_ascii_lowercase().as_str() {
        "m" | "meter" | "meters" | "metre" | "metres" => 1.0,
        "cm" | "centimeter" | "centimeters" => 0.01,
        "mm" | "millimeter" | "millimeters" => 0.001,
        "ft" | "foot" | "feet" => 0.3048,
        "in" | "inch" | "inches" => 0.0254,
        _ => return None,
    };
    Some(factor)
}

pub(crate) fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}
