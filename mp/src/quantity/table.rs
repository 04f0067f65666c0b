//! Per-person portion table and the scale function

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::QuantitiesConfig;
use crate::domain::{GuestCounts, normalize_key};

/// Per-person baseline for one dish category, in reference servings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Portion {
    pub adult: f64,
    /// Child baseline; `None` means adult × child ratio
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child: Option<f64>,
}

impl Portion {
    pub const fn new(adult: f64) -> Self {
        Self { adult, child: None }
    }

    pub const fn with_child(adult: f64, child: f64) -> Self {
        Self {
            adult,
            child: Some(child),
        }
    }
}

/// Result of scaling one category for a guest count
#[derive(Debug, Clone, PartialEq)]
pub struct Scale {
    /// Category actually used (after alias resolution)
    pub category: String,
    pub multiplier: f64,
    /// Unknown category; the fallback portion was used
    pub estimated: bool,
}

pub const FALLBACK_CATEGORY: &str = "unknown";

const BUILTIN: &[(&str, Portion)] = &[
    ("protein", Portion::new(1.0)),
    ("secondary_protein", Portion::new(0.5)),
    ("starch_side", Portion::new(1.0)),
    ("vegetable_side", Portion::new(1.0)),
    ("side", Portion::new(1.0)),
    ("salad", Portion::new(1.0)),
    ("bread", Portion::with_child(1.0, 1.0)),
    ("dessert", Portion::with_child(1.0, 1.0)),
    ("appetizer", Portion::with_child(2.0, 1.0)),
    ("drink", Portion::with_child(1.5, 1.0)),
    ("alcoholic_drink", Portion::with_child(1.5, 0.0)),
    ("condiment", Portion::new(0.25)),
];

const ALIASES: &[(&str, &str)] = &[
    ("main", "protein"),
    ("main_protein", "protein"),
    ("entree", "protein"),
    ("meat", "protein"),
    ("starch", "starch_side"),
    ("vegetable", "vegetable_side"),
    ("veggie", "vegetable_side"),
    ("desserts", "dessert"),
    ("appetizers", "appetizer"),
    ("drinks", "drink"),
    ("beverage", "drink"),
    ("beverages", "drink"),
    ("alcohol", "alcoholic_drink"),
    ("cocktail", "alcoholic_drink"),
    ("wine", "alcoholic_drink"),
    ("beer", "alcoholic_drink"),
    ("sauce", "condiment"),
    ("condiments", "condiment"),
];

/// Lookup table mapping dish categories to per-person portions
#[derive(Debug, Clone)]
pub struct QuantityTable {
    categories: HashMap<String, Portion>,
    child_ratio: f64,
    reference_servings: u32,
    fallback: Portion,
}

impl Default for QuantityTable {
    fn default() -> Self {
        Self::from_config(&QuantitiesConfig::default())
    }
}

impl QuantityTable {
    /// Built-in table with config overrides and additions applied
    pub fn from_config(config: &QuantitiesConfig) -> Self {
        debug!(
            overrides = config.categories.len(),
            child_ratio = config.child_ratio,
            "QuantityTable::from_config: called"
        );
        let mut categories: HashMap<String, Portion> =
            BUILTIN.iter().map(|(name, portion)| (name.to_string(), *portion)).collect();
        for (name, portion) in &config.categories {
            categories.insert(category_key(name), *portion);
        }
        Self {
            categories,
            child_ratio: config.child_ratio,
            reference_servings: config.reference_servings.max(1),
            fallback: config.fallback_category,
        }
    }

    pub fn reference_servings(&self) -> u32 {
        self.reference_servings
    }

    pub fn child_ratio(&self) -> f64 {
        self.child_ratio
    }

    /// Resolve a category name (with aliases) to a table entry
    pub fn lookup(&self, category: &str) -> Option<(String, Portion)> {
        let key = category_key(category);
        if let Some(portion) = self.categories.get(&key) {
            return Some((key, *portion));
        }
        let (_, target) = ALIASES.iter().find(|(alias, _)| *alias == key)?;
        self.categories.get(*target).map(|p| (target.to_string(), *p))
    }

    /// Multiplier for a category and guest count
    ///
    /// `adults × adult + children × child`, where child defaults to
    /// `adult × child_ratio`. Unknown or missing categories use the fallback
    /// portion and are flagged as estimated. No rounding happens here.
    pub fn scale(&self, category: Option<&str>, guests: GuestCounts) -> Scale {
        debug!(?category, adults = guests.adults, children = guests.children, "scale: called");
        let (name, portion, estimated) = match category.and_then(|c| self.lookup(c)) {
            Some((name, portion)) => (name, portion, false),
            None => {
                warn!(?category, "scale: unknown dish category, using fallback portion");
                (FALLBACK_CATEGORY.to_string(), self.fallback, true)
            }
        };
        let child = portion.child.unwrap_or(portion.adult * self.child_ratio);
        let multiplier = f64::from(guests.adults) * portion.adult + f64::from(guests.children) * child;
        Scale {
            category: name,
            multiplier,
            estimated,
        }
    }
}

/// Scale a base-recipe quantity: `base × multiplier / reference_servings`
pub fn scale_quantity(base: f64, multiplier: f64, reference_servings: u32) -> f64 {
    base * multiplier / f64::from(reference_servings.max(1))
}

fn category_key(name: &str) -> String {
    normalize_key(name).replace(' ', "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_grilled_chicken_for_eight_adults_two_children() {
        let table = QuantityTable::default();
        let scale = table.scale(Some("protein"), GuestCounts::new(8, 2));
        assert!(close(scale.multiplier, 9.2));
        assert!(!scale.estimated);
        assert!(close(scale_quantity(2.0, scale.multiplier, 4), 4.6));
    }

    #[test]
    fn test_drinks_use_own_child_baseline() {
        let table = QuantityTable::default();
        let scale = table.scale(Some("drink"), GuestCounts::new(4, 4));
        assert!(close(scale.multiplier, 4.0 * 1.5 + 4.0 * 1.0));
        let wine = table.scale(Some("wine"), GuestCounts::new(4, 4));
        assert_eq!(wine.category, "alcoholic_drink");
        assert!(close(wine.multiplier, 6.0));
    }

    #[test]
    fn test_aliases_resolve() {
        let table = QuantityTable::default();
        let scale = table.scale(Some("Main Protein"), GuestCounts::new(2, 0));
        assert_eq!(scale.category, "protein");
        assert!(close(scale.multiplier, 2.0));
    }

    #[test]
    fn test_unknown_category_is_estimated() {
        let table = QuantityTable::default();
        let scale = table.scale(Some("mystery course"), GuestCounts::new(3, 0));
        assert!(scale.estimated);
        assert_eq!(scale.category, FALLBACK_CATEGORY);
        assert!(close(scale.multiplier, 3.0));

        let none = table.scale(None, GuestCounts::new(3, 0));
        assert!(none.estimated);
    }

    #[test]
    fn test_config_overrides_builtin() {
        let mut config = QuantitiesConfig::default();
        config.categories.insert("protein".to_string(), Portion::with_child(1.5, 0.5));
        config.categories.insert("soup".to_string(), Portion::new(0.75));
        let table = QuantityTable::from_config(&config);

        let protein = table.scale(Some("protein"), GuestCounts::new(2, 2));
        assert!(close(protein.multiplier, 4.0));
        let soup = table.scale(Some("soup"), GuestCounts::new(4, 0));
        assert!(!soup.estimated);
        assert!(close(soup.multiplier, 3.0));
    }

    #[test]
    fn test_scale_quantity_is_unrounded() {
        assert!(close(scale_quantity(1.0, 1.0, 3), 1.0 / 3.0));
        assert!(close(scale_quantity(0.1, 1.0, 1) + scale_quantity(0.05, 1.0, 1), 0.15));
    }
}
