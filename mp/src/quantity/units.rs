//! Unit normalization, conversion and display rounding

use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dimension {
    Mass,
    Volume,
}

/// Canonical spelling of a unit ("Pounds" -> "lb", "L" -> "l")
pub fn canonical_unit(unit: &str) -> String {
    let u = unit.trim().trim_end_matches('.').to_lowercase();
    let canonical = match u.as_str() {
        "g" | "gram" | "grams" | "gr" => "g",
        "kg" | "kilogram" | "kilograms" | "kilo" | "kilos" => "kg",
        "oz" | "ounce" | "ounces" => "oz",
        "lb" | "lbs" | "pound" | "pounds" => "lb",
        "ml" | "milliliter" | "milliliters" | "millilitre" | "millilitres" => "ml",
        "l" | "liter" | "liters" | "litre" | "litres" => "l",
        "tsp" | "teaspoon" | "teaspoons" => "tsp",
        "tbsp" | "tablespoon" | "tablespoons" | "tbs" => "tbsp",
        "cup" | "cups" | "c" => "cup",
        "fl oz" | "fluid ounce" | "fluid ounces" | "floz" => "fl oz",
        "pint" | "pints" | "pt" => "pint",
        "quart" | "quarts" | "qt" => "quart",
        "gallon" | "gallons" | "gal" => "gallon",
        other => other,
    };
    canonical.to_string()
}

/// Dimension and factor to the base unit (grams or milliliters)
fn unit_info(unit: &str) -> Option<(Dimension, f64)> {
    let info = match canonical_unit(unit).as_str() {
        "g" => (Dimension::Mass, 1.0),
        "kg" => (Dimension::Mass, 1000.0),
        "oz" => (Dimension::Mass, 28.349_523_125),
        "lb" => (Dimension::Mass, 453.592_37),
        "ml" => (Dimension::Volume, 1.0),
        "l" => (Dimension::Volume, 1000.0),
        "tsp" => (Dimension::Volume, 4.928_921_593_75),
        "tbsp" => (Dimension::Volume, 14.786_764_781_25),
        "cup" => (Dimension::Volume, 236.588_236_5),
        "fl oz" => (Dimension::Volume, 29.573_529_562_5),
        "pint" => (Dimension::Volume, 473.176_473),
        "quart" => (Dimension::Volume, 946.352_946),
        "gallon" => (Dimension::Volume, 3785.411_784),
        _ => return None,
    };
    Some(info)
}

/// Same unit after canonicalization
pub fn same_unit(a: &str, b: &str) -> bool {
    canonical_unit(a) == canonical_unit(b)
}

/// Convert a quantity between units of the same dimension
///
/// Returns `None` when the units are incompatible (mass vs volume, or a
/// count unit that has no conversion).
pub fn convert(quantity: f64, from: &str, to: &str) -> Option<f64> {
    if same_unit(from, to) {
        return Some(quantity);
    }
    let (from_dim, from_factor) = unit_info(from)?;
    let (to_dim, to_factor) = unit_info(to)?;
    if from_dim != to_dim {
        debug!(%from, %to, "convert: incompatible dimensions");
        return None;
    }
    Some(quantity * from_factor / to_factor)
}

const DISCRETE_UNITS: &[&str] = &[
    "", "whole", "each", "ea", "piece", "pieces", "clove", "cloves", "can", "cans", "jar", "jars", "bunch",
    "bunches", "head", "heads", "loaf", "loaves", "bottle", "bottles", "package", "packages", "pkg", "dozen",
    "serving", "servings", "slice", "slices", "bag", "bags", "box", "boxes", "stalk", "stalks", "sprig", "sprigs",
    "egg", "eggs", "large", "medium", "small", "count", "ct",
];

/// Unit counts whole things and is bought in whole numbers
pub fn is_discrete(unit: &str) -> bool {
    let u = unit.trim().to_lowercase();
    DISCRETE_UNITS.contains(&u.as_str())
}

/// Round a quantity up for display
///
/// Discrete units round up to whole numbers, continuous units up to one
/// decimal place. Tiny float noise below the step does not bump the value.
pub fn round_for_display(quantity: f64, unit: &str) -> f64 {
    const EPSILON: f64 = 1e-9;
    if quantity <= 0.0 {
        return 0.0;
    }
    if is_discrete(unit) {
        (quantity - EPSILON).ceil().max(1.0)
    } else {
        ((quantity * 10.0 - EPSILON).ceil() / 10.0).max(0.1)
    }
}

/// Format a quantity without trailing zeros: 3 -> "3", 0.20 -> "0.2"
pub fn format_quantity(quantity: f64) -> String {
    if (quantity - quantity.round()).abs() < 1e-9 {
        return format!("{}", quantity.round() as i64);
    }
    let s = format!("{:.2}", quantity);
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}
