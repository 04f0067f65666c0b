//! ExtractionDiff - the sparse, typed update produced by one extraction pass
//!
//! Every scalar is optional and `None` means "no information". Collection
//! fields are wrapped in [`Union`] so the merger can only ever add to them.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::recipe::{Ingredient, PreparationMethod, RecipeArtifact, RecipeType};
use super::record::{CriticalField, DietaryRestriction, OutputFormat};

/// Collection values merged into the record as a set union, never replacing it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Union<T>(pub Vec<T>);

impl<T> Union<T> {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.0.iter()
    }
}

impl<T> Default for Union<T> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<T> From<Vec<T>> for Union<T> {
    fn from(v: Vec<T>) -> Self {
        Self(v)
    }
}

/// Sparse field update from the extractor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionDiff {
    pub event_type: Option<String>,
    pub event_date: Option<NaiveDate>,
    pub duration_hours: Option<f64>,
    pub formality: Option<String>,
    pub meal_type: Option<String>,
    pub budget: Option<f64>,
    pub beverages_preferences: Option<String>,

    /// Raw numbers as extracted; only positive integers are applied
    pub adult_count: Option<f64>,
    pub child_count: Option<f64>,

    pub dietary_restrictions: Union<DietaryRestriction>,
    pub cuisine_preferences: Union<String>,
    pub available_equipment: Union<String>,
    pub foods_to_avoid: Union<String>,

    /// Menu edits, applied in order
    pub menu: Vec<MenuDelta>,

    pub meal_plan_confirmed: Option<bool>,

    /// Honoured only while selecting output
    pub output_formats: Option<Vec<OutputFormat>>,

    /// Critical fields answered without a value ("no dietary restrictions")
    pub answered: Vec<CriticalField>,
}

impl ExtractionDiff {
    /// True when the diff carries no information at all
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn with_guests(adults: u32, children: u32) -> Self {
        Self {
            adult_count: Some(f64::from(adults)),
            child_count: (children > 0).then_some(f64::from(children)),
            ..Self::default()
        }
    }
}

/// One ordered menu edit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum MenuDelta {
    Add {
        name: String,
        /// Generic entry ("main", "a dessert") that still needs a name
        #[serde(default)]
        placeholder: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        recipe_type: Option<RecipeType>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        preparation: Option<PreparationMethod>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        category: Option<String>,
    },
    Rename {
        from: String,
        to: String,
    },
    Remove {
        name: String,
    },
    SetPreparation {
        name: String,
        method: PreparationMethod,
    },
    SetRecipeType {
        name: String,
        recipe_type: RecipeType,
    },
    SetCategory {
        name: String,
        category: String,
    },
    SetServings {
        name: String,
        servings: u32,
    },
    AttachSource {
        name: String,
        artifact: RecipeArtifact,
    },
    /// User will supply the recipe; skip default generation
    AwaitInput {
        name: String,
    },
    SetIngredients {
        name: String,
        ingredients: Vec<Ingredient>,
    },
}

impl MenuDelta {
    pub fn add(name: impl Into<String>) -> Self {
        Self::Add {
            name: name.into(),
            placeholder: false,
            recipe_type: None,
            preparation: None,
            category: None,
        }
    }

    /// Dish the delta targets (the original name for renames)
    pub fn dish(&self) -> &str {
        match self {
            Self::Add { name, .. }
            | Self::Remove { name }
            | Self::SetPreparation { name, .. }
            | Self::SetRecipeType { name, .. }
            | Self::SetCategory { name, .. }
            | Self::SetServings { name, .. }
            | Self::AttachSource { name, .. }
            | Self::AwaitInput { name }
            | Self::SetIngredients { name, .. } => name,
            Self::Rename { from, .. } => from,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_json_is_empty_diff() {
        let diff: ExtractionDiff = serde_json::from_str("{}").unwrap();
        assert!(diff.is_empty());
    }

    #[test]
    fn test_null_fields_are_absent() {
        let diff: ExtractionDiff = serde_json::from_str(r#"{"event_type": null, "budget": null}"#).unwrap();
        assert!(diff.is_empty());
    }

    #[test]
    fn test_menu_deltas_parse_in_order() {
        let json = r#"{
            "menu": [
                {"action": "add", "name": "main", "placeholder": true},
                {"action": "rename", "from": "main", "to": "Grilled Chicken"},
                {"action": "set_preparation", "name": "Baguette", "method": "store_bought"},
                {"action": "attach_source", "name": "Chili", "artifact": {"kind": "url", "url": "https://x.test/chili"}}
            ]
        }"#;
        let diff: ExtractionDiff = serde_json::from_str(json).unwrap();
        assert_eq!(diff.menu.len(), 4);
        assert_eq!(diff.menu[1].dish(), "main");
        assert!(matches!(
            diff.menu[2],
            MenuDelta::SetPreparation {
                method: PreparationMethod::StoreBought,
                ..
            }
        ));
    }

    #[test]
    fn test_union_fields_deserialize_from_lists() {
        let diff: ExtractionDiff =
            serde_json::from_str(r#"{"cuisine_preferences": ["Italian"], "dietary_restrictions": [{"kind": "vegan", "count": 2}]}"#)
                .unwrap();
        assert_eq!(diff.cuisine_preferences.0, vec!["Italian".to_string()]);
        assert_eq!(diff.dietary_restrictions.0[0].count, Some(2));
    }

    #[test]
    fn test_with_guests() {
        let diff = ExtractionDiff::with_guests(8, 0);
        assert_eq!(diff.adult_count, Some(8.0));
        assert_eq!(diff.child_count, None);
    }
}
