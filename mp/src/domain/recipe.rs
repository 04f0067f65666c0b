//! Recipe domain type
//!
//! A Recipe is one dish on the menu. It tracks its own lifecycle from a
//! placeholder ("main") through a named dish to a complete entry with a
//! resolved ingredient list at reference servings.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::id::normalize_key;
use super::shopping::GroceryCategory;

/// Lifecycle status of a recipe in the meal plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecipeStatus {
    /// Generic entry like "main" or "side" that still needs a real name
    Placeholder,
    /// Has a specific name, still needs ingredients
    #[default]
    Named,
    /// Has a name and a resolved ingredient list (or is store-bought)
    Complete,
}

/// Food or drink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecipeType {
    #[default]
    Food,
    Drink,
}

/// Whether the host cooks the dish or buys it ready-made
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PreparationMethod {
    StoreBought,
    #[default]
    Homemade,
}

/// Provenance of a recipe's ingredient list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    #[default]
    AiDefault,
    UserUrl,
    UserUpload,
    UserDescription,
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AiDefault => write!(f, "ai_default"),
            Self::UserUrl => write!(f, "user_url"),
            Self::UserUpload => write!(f, "user_upload"),
            Self::UserDescription => write!(f, "user_description"),
        }
    }
}

/// A user-supplied recipe artifact to extract ingredients from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecipeArtifact {
    /// Link to a recipe page
    Url { url: String },
    /// Uploaded file (photo of a recipe card, PDF); content is base64
    Upload {
        filename: String,
        media_type: String,
        content: String,
    },
    /// Free-text description of the dish ("my chili is beans, beef, ...")
    Description { text: String },
}

impl RecipeArtifact {
    /// The source type this artifact resolves to
    pub fn source_type(&self) -> SourceType {
        match self {
            Self::Url { .. } => SourceType::UserUrl,
            Self::Upload { .. } => SourceType::UserUpload,
            Self::Description { .. } => SourceType::UserDescription,
        }
    }

    /// Short label for logs and user messages
    pub fn label(&self) -> String {
        match self {
            Self::Url { url } => url.clone(),
            Self::Upload { filename, .. } => filename.clone(),
            Self::Description { text } => text.chars().take(40).collect(),
        }
    }
}

/// A single ingredient at the recipe's reference servings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ingredient {
    pub name: String,
    pub quantity: f64,
    pub unit: String,
    #[serde(default)]
    pub category: GroceryCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Ingredient {
    pub fn new(name: impl Into<String>, quantity: f64, unit: impl Into<String>, category: GroceryCategory) -> Self {
        Self {
            name: name.into(),
            quantity,
            unit: unit.into(),
            category,
            notes: None,
        }
    }
}

/// Single dish in the meal plan with lifecycle tracking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    /// Current name (may be a placeholder like "main")
    pub name: String,

    #[serde(default)]
    pub status: RecipeStatus,

    #[serde(default)]
    pub recipe_type: RecipeType,

    #[serde(default)]
    pub preparation_method: PreparationMethod,

    /// Where the ingredients come (or came) from
    #[serde(default)]
    pub source_type: SourceType,

    /// Artifact supplied by the user for user_* source types
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<RecipeArtifact>,

    /// Quantity-table category key ("protein", "starch_side", ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dish_category: Option<String>,

    /// Servings the base ingredient list is written for; unset means the
    /// quantity table's reference servings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub servings: Option<u32>,

    /// Base ingredients, present only once the recipe is complete
    #[serde(default)]
    pub ingredients: Vec<Ingredient>,

    /// True while a homemade dish has no usable ingredient source
    #[serde(default)]
    pub awaiting_user_input: bool,

    /// Why the last resolution attempt did not produce ingredients
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_resolution_error: Option<String>,
}

impl Recipe {
    /// Create a named dish with default settings
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        debug!(%name, "Recipe::new: called");
        Self {
            name,
            status: RecipeStatus::Named,
            recipe_type: RecipeType::Food,
            preparation_method: PreparationMethod::Homemade,
            source_type: SourceType::AiDefault,
            artifact: None,
            dish_category: None,
            servings: None,
            ingredients: Vec::new(),
            awaiting_user_input: false,
            last_resolution_error: None,
        }
    }

    /// Create a placeholder entry ("main", "dessert") that still needs a real name
    pub fn placeholder(name: impl Into<String>) -> Self {
        let mut recipe = Self::new(name);
        recipe.status = RecipeStatus::Placeholder;
        recipe
    }

    /// Normalized comparison key for this dish
    pub fn key(&self) -> String {
        normalize_key(&self.name)
    }

    /// Case-insensitive name comparison
    pub fn matches_name(&self, name: &str) -> bool {
        self.key() == normalize_key(name)
    }

    pub fn is_store_bought(&self) -> bool {
        self.preparation_method == PreparationMethod::StoreBought
    }

    /// Recipe has a name and everything needed for the shopping list
    pub fn is_resolved(&self) -> bool {
        if self.is_store_bought() {
            return self.status != RecipeStatus::Placeholder;
        }
        self.status == RecipeStatus::Complete && !self.ingredients.is_empty()
    }

    /// Homemade dish that has no ingredient list yet
    pub fn needs_resolution(&self) -> bool {
        !self.is_store_bought() && !self.is_resolved()
    }

    /// Record a successful resolution
    ///
    /// An empty list never completes a homemade dish; returns whether the
    /// recipe is complete afterwards.
    pub fn complete_with(&mut self, ingredients: Vec<Ingredient>, source_type: SourceType) -> bool {
        debug!(name = %self.name, count = ingredients.len(), %source_type, "Recipe::complete_with: called");
        if ingredients.is_empty() && !self.is_store_bought() {
            debug!(name = %self.name, "Recipe::complete_with: empty ingredient list, not completing");
            self.awaiting_user_input = true;
            return false;
        }
        self.ingredients = ingredients;
        self.source_type = source_type;
        self.status = RecipeStatus::Complete;
        self.awaiting_user_input = false;
        self.last_resolution_error = None;
        true
    }

    /// Record a failed resolution; the dish now waits for the user
    pub fn mark_awaiting_input(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        debug!(name = %self.name, %reason, "Recipe::mark_awaiting_input: called");
        self.awaiting_user_input = true;
        self.last_resolution_error = Some(reason);
        if !self.is_store_bought() && self.ingredients.is_empty() && self.status == RecipeStatus::Complete {
            self.status = RecipeStatus::Named;
        }
    }

    /// Switch between store-bought and homemade, keeping the status invariant
    pub fn set_preparation(&mut self, method: PreparationMethod) {
        debug!(name = %self.name, ?method, "Recipe::set_preparation: called");
        self.preparation_method = method;
        match method {
            PreparationMethod::StoreBought => {
                self.ingredients.clear();
                self.awaiting_user_input = false;
                self.last_resolution_error = None;
                if self.status != RecipeStatus::Placeholder {
                    self.status = RecipeStatus::Complete;
                }
            }
            PreparationMethod::Homemade => {
                if self.status == RecipeStatus::Complete && self.ingredients.is_empty() {
                    self.status = RecipeStatus::Named;
                }
            }
        }
    }

    /// Attach a user artifact; cached ingredients are dropped so it gets resolved
    pub fn attach_artifact(&mut self, artifact: RecipeArtifact) {
        debug!(name = %self.name, label = %artifact.label(), "Recipe::attach_artifact: called");
        self.source_type = artifact.source_type();
        self.artifact = Some(artifact);
        self.ingredients.clear();
        self.awaiting_user_input = false;
        self.last_resolution_error = None;
        if self.is_store_bought() {
            self.preparation_method = PreparationMethod::Homemade;
        }
        if self.status == RecipeStatus::Complete {
            self.status = RecipeStatus::Named;
        }
    }

    /// Rename the dish; a placeholder becomes a named dish
    pub fn rename(&mut self, name: impl Into<String>) {
        self.name = name.into();
        if self.status == RecipeStatus::Placeholder {
            self.status = if self.is_store_bought() {
                RecipeStatus::Complete
            } else {
                RecipeStatus::Named
            };
        }
    }

    /// Fold another entry for the same dish into this one
    ///
    /// Used when a rename or add collides with an existing dish. Resolved
    /// ingredients win over unresolved ones; explicit settings on `other`
    /// are carried over.
    pub fn absorb(&mut self, other: Recipe) {
        debug!(name = %self.name, other = %other.name, "Recipe::absorb: called");
        let other_resolved = other.is_resolved();
        if self.status == RecipeStatus::Placeholder && other.status != RecipeStatus::Placeholder {
            self.status = other.status;
        }
        if self.dish_category.is_none() {
            self.dish_category = other.dish_category;
        }
        if self.artifact.is_none() && other.artifact.is_some() {
            self.artifact = other.artifact;
            self.source_type = other.source_type;
        }
        if !self.is_resolved() && other_resolved {
            self.preparation_method = other.preparation_method;
            self.ingredients = other.ingredients;
            self.source_type = other.source_type;
            self.status = other.status;
            self.servings = other.servings.or(self.servings);
            self.awaiting_user_input = false;
            self.last_resolution_error = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pasta() -> Ingredient {
        Ingredient::new("pasta", 1.0, "lb", GroceryCategory::Pantry)
    }

    #[test]
    fn test_new_recipe_defaults() {
        let r = Recipe::new("Lasagna");
        assert_eq!(r.status, RecipeStatus::Named);
        assert_eq!(r.servings, None);
        assert!(r.needs_resolution());
        assert!(!r.is_resolved());
    }

    #[test]
    fn test_matches_name_case_insensitive() {
        let r = Recipe::new("Pasta Carbonara");
        assert!(r.matches_name("pasta carbonara"));
        assert!(r.matches_name("  PASTA   carbonara "));
        assert!(!r.matches_name("pasta"));
    }

    #[test]
    fn test_complete_with_ingredients() {
        let mut r = Recipe::new("Pasta");
        assert!(r.complete_with(vec![pasta()], SourceType::AiDefault));
        assert_eq!(r.status, RecipeStatus::Complete);
        assert!(r.is_resolved());
    }

    #[test]
    fn test_complete_with_empty_list_keeps_named() {
        let mut r = Recipe::new("Pasta");
        assert!(!r.complete_with(vec![], SourceType::UserUrl));
        assert_eq!(r.status, RecipeStatus::Named);
        assert!(r.awaiting_user_input);
    }

    #[test]
    fn test_store_bought_is_resolved_without_ingredients() {
        let mut r = Recipe::new("Baguette");
        r.set_preparation(PreparationMethod::StoreBought);
        assert_eq!(r.status, RecipeStatus::Complete);
        assert!(r.ingredients.is_empty());
        assert!(r.is_resolved());
        assert!(!r.needs_resolution());
    }

    #[test]
    fn test_store_bought_placeholder_not_resolved() {
        let mut r = Recipe::placeholder("dessert");
        r.set_preparation(PreparationMethod::StoreBought);
        assert_eq!(r.status, RecipeStatus::Placeholder);
        assert!(!r.is_resolved());
    }

    #[test]
    fn test_switch_back_to_homemade_reopens_recipe() {
        let mut r = Recipe::new("Pie");
        r.set_preparation(PreparationMethod::StoreBought);
        r.set_preparation(PreparationMethod::Homemade);
        assert_eq!(r.status, RecipeStatus::Named);
        assert!(r.needs_resolution());
    }

    #[test]
    fn test_attach_artifact_clears_cached_ingredients() {
        let mut r = Recipe::new("Chili");
        r.complete_with(vec![pasta()], SourceType::AiDefault);
        r.attach_artifact(RecipeArtifact::Url {
            url: "https://example.com/chili".to_string(),
        });
        assert_eq!(r.source_type, SourceType::UserUrl);
        assert_eq!(r.status, RecipeStatus::Named);
        assert!(r.ingredients.is_empty());
        assert!(r.needs_resolution());
    }

    #[test]
    fn test_rename_placeholder_becomes_named() {
        let mut r = Recipe::placeholder("main");
        r.rename("Grilled Chicken");
        assert_eq!(r.status, RecipeStatus::Named);
        assert_eq!(r.name, "Grilled Chicken");
    }

    #[test]
    fn test_absorb_prefers_resolved_ingredients() {
        let mut target = Recipe::new("Pasta");
        let mut other = Recipe::new("pasta");
        other.complete_with(vec![pasta()], SourceType::UserDescription);
        target.absorb(other);
        assert!(target.is_resolved());
        assert_eq!(target.source_type, SourceType::UserDescription);
    }

    #[test]
    fn test_absorb_carries_category_artifact_and_ingredients() {
        let mut target = Recipe::new("Chili");
        let mut other = Recipe::new("chili");
        other.dish_category = Some("main".to_string());
        other.complete_with(vec![pasta()], SourceType::UserUrl);
        other.artifact = Some(RecipeArtifact::Url {
            url: "https://example.com/chili".to_string(),
        });
        target.absorb(other);
        assert_eq!(target.dish_category.as_deref(), Some("main"));
        assert!(target.artifact.is_some());
        assert!(target.is_resolved());
        assert_eq!(target.ingredients.len(), 1);
    }

    #[test]
    fn test_artifact_serialization_is_tagged() {
        let artifact = RecipeArtifact::Description {
            text: "beans and beef".to_string(),
        };
        let json = serde_json::to_string(&artifact).unwrap();
        assert!(json.contains("\"kind\":\"description\""));
    }
}
