//! ExtractionMerger - folds extraction diffs into the planning record
//!
//! Merging is additive: absent values never erase known data, collections
//! grow by set union, and invalid values are rejected and reported instead of
//! applied. After all fields are applied the record may advance one stage.
//! The merger performs no I/O; callers emit events from the returned outcome.

use std::collections::BTreeSet;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::{
    CriticalField, DietaryRestriction, ExtractionDiff, MenuDelta, PlanningRecord, Recipe, SourceType, Stage,
    Union, normalize_key,
};

/// A diff value that was reported instead of applied
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MergeRejection {
    #[error("{field} must be a positive whole number, got {value}")]
    InvalidGuestCount { field: String, value: f64 },

    #[error("{field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("cannot {action} '{dish}': no such dish on the menu")]
    UnknownDish { action: String, dish: String },

    #[error("the menu is locked while the shopping list is being built ('{dish}' not changed)")]
    MenuFrozen { dish: String },

    #[error("output formats can only be chosen while selecting output (stage is {stage})")]
    OutputsNotSelectable { stage: Stage },

    #[error("servings for '{dish}' must be at least 1")]
    InvalidServings { dish: String },

    #[error("ingredient list for '{dish}' is empty")]
    EmptyIngredients { dish: String },

    #[error("cannot confirm an empty menu")]
    EmptyMenuConfirmation,
}

/// What one merge did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeOutcome {
    /// Stage change fired by this merge, if any
    pub transition: Option<(Stage, Stage)>,
    pub rejected: Vec<MergeRejection>,
    /// A dish was added or removed
    pub menu_changed: bool,
    /// Critical fields newly answered by this merge
    pub answered_now: Vec<CriticalField>,
    /// Any field of the record changed
    pub changed: bool,
}

/// Apply a diff to the record
pub fn apply(record: &mut PlanningRecord, diff: ExtractionDiff) -> MergeOutcome {
    debug!(session_id = %record.session_id, stage = %record.stage, "apply: called");
    let mut merger = Merger {
        record,
        outcome: MergeOutcome::default(),
        answered_before: BTreeSet::new(),
    };
    merger.answered_before = merger.record.answered.clone();

    let ExtractionDiff {
        event_type,
        event_date,
        duration_hours,
        formality,
        meal_type,
        budget,
        beverages_preferences,
        adult_count,
        child_count,
        dietary_restrictions,
        cuisine_preferences,
        available_equipment,
        foods_to_avoid,
        menu,
        meal_plan_confirmed,
        output_formats,
        answered,
    } = diff;

    merger.scalars(event_type, event_date, duration_hours, formality, meal_type, budget, beverages_preferences);
    merger.guests(adult_count, child_count);
    merger.unions(dietary_restrictions, cuisine_preferences, available_equipment, foods_to_avoid);
    merger.menu(menu);
    merger.confirmation(meal_plan_confirmed);
    merger.output_formats(output_formats);
    merger.explicit_answers(answered);
    merger.finish()
}

struct Merger<'a> {
    record: &'a mut PlanningRecord,
    outcome: MergeOutcome,
    answered_before: BTreeSet<CriticalField>,
}

impl Merger<'_> {
    fn reject(&mut self, rejection: MergeRejection) {
        warn!(session_id = %self.record.session_id, %rejection, "merge: rejected field");
        self.outcome.rejected.push(rejection);
    }

    fn answer(&mut self, field: CriticalField) {
        self.record.answered.insert(field);
    }

    fn set_text(slot: &mut Option<String>, value: Option<String>) -> bool {
        match value.map(|v| v.trim().to_string()) {
            Some(v) if !v.is_empty() && slot.as_deref() != Some(v.as_str()) => {
                *slot = Some(v);
                true
            }
            _ => false,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn scalars(
        &mut self,
        event_type: Option<String>,
        event_date: Option<chrono::NaiveDate>,
        duration_hours: Option<f64>,
        formality: Option<String>,
        meal_type: Option<String>,
        budget: Option<f64>,
        beverages_preferences: Option<String>,
    ) {
        let attrs = &mut self.record.attributes;
        let mut changed = false;

        let had_event_type = event_type.as_deref().is_some_and(|s| !s.trim().is_empty());
        changed |= Self::set_text(&mut attrs.event_type, event_type);
        changed |= Self::set_text(&mut attrs.formality, formality);
        changed |= Self::set_text(&mut attrs.meal_type, meal_type);
        changed |= Self::set_text(&mut attrs.beverages_preferences, beverages_preferences);

        if event_date.is_some() && attrs.event_date != event_date {
            attrs.event_date = event_date;
            changed = true;
        }

        let mut rejections = Vec::new();
        match duration_hours {
            Some(h) if h.is_finite() && h > 0.0 => {
                changed |= attrs.duration_hours != Some(h);
                attrs.duration_hours = Some(h);
            }
            Some(h) => rejections.push(MergeRejection::InvalidValue {
                field: "duration_hours".to_string(),
                reason: format!("must be positive, got {}", h),
            }),
            None => {}
        }
        match budget {
            Some(b) if b.is_finite() && b >= 0.0 => {
                changed |= attrs.budget != Some(b);
                attrs.budget = Some(b);
            }
            Some(b) => rejections.push(MergeRejection::InvalidValue {
                field: "budget".to_string(),
                reason: format!("must not be negative, got {}", b),
            }),
            None => {}
        }

        self.outcome.changed |= changed;
        for r in rejections {
            self.reject(r);
        }
        if had_event_type {
            self.answer(CriticalField::EventType);
        }
    }

    fn guests(&mut self, adult_count: Option<f64>, child_count: Option<f64>) {
        if let Some(value) = adult_count {
            match positive_count(value) {
                Some(n) => {
                    self.outcome.changed |= self.record.guests.adults != n;
                    self.record.guests.adults = n;
                    self.answer(CriticalField::GuestCount);
                }
                None => self.reject(MergeRejection::InvalidGuestCount {
                    field: "adult_count".to_string(),
                    value,
                }),
            }
        }
        if let Some(value) = child_count {
            match positive_count(value) {
                Some(n) => {
                    self.outcome.changed |= self.record.guests.children != n;
                    self.record.guests.children = n;
                    self.answer(CriticalField::GuestBreakdown);
                }
                None => self.reject(MergeRejection::InvalidGuestCount {
                    field: "child_count".to_string(),
                    value,
                }),
            }
        }
    }

    fn unions(
        &mut self,
        dietary: Union<DietaryRestriction>,
        cuisine: Union<String>,
        equipment: Union<String>,
        avoid: Union<String>,
    ) {
        let attrs = &mut self.record.attributes;
        let mut changed = false;

        let answered_dietary = !dietary.is_empty();
        for incoming in dietary.0 {
            let key = normalize_key(&incoming.kind);
            if key.is_empty() {
                continue;
            }
            match attrs
                .dietary_restrictions
                .iter_mut()
                .find(|d| normalize_key(&d.kind) == key)
            {
                Some(existing) => {
                    if incoming.count.is_some() && existing.count != incoming.count {
                        existing.count = incoming.count;
                        changed = true;
                    }
                    if incoming.notes.is_some() && existing.notes != incoming.notes {
                        existing.notes = incoming.notes;
                        changed = true;
                    }
                }
                None => {
                    attrs.dietary_restrictions.push(incoming);
                    changed = true;
                }
            }
        }

        let answered_cuisine = !cuisine.is_empty();
        changed |= union_names(&mut attrs.cuisine_preferences, cuisine);
        changed |= union_names(&mut attrs.available_equipment, equipment);
        changed |= union_names(&mut attrs.foods_to_avoid, avoid);

        self.outcome.changed |= changed;
        if answered_dietary {
            self.answer(CriticalField::Dietary);
        }
        if answered_cuisine {
            self.answer(CriticalField::Cuisine);
        }
    }

    fn menu(&mut self, deltas: Vec<MenuDelta>) {
        if deltas.is_empty() {
            return;
        }
        if self.record.stage >= Stage::AgentRunning {
            for delta in deltas {
                self.reject(MergeRejection::MenuFrozen {
                    dish: delta.dish().to_string(),
                });
            }
            return;
        }

        let mut structural = false;
        for delta in deltas {
            debug!(session_id = %self.record.session_id, dish = %delta.dish(), "merge: applying menu delta");
            match delta {
                MenuDelta::Add {
                    name,
                    placeholder,
                    recipe_type,
                    preparation,
                    category,
                } => {
                    structural |= self.add_dish(name, placeholder, recipe_type, preparation, category);
                }
                MenuDelta::Rename { from, to } => {
                    structural |= self.rename_dish(&from, to);
                }
                MenuDelta::Remove { name } => match self.record.recipe_index(&name) {
                    Some(idx) => {
                        self.record.meal_plan.remove(idx);
                        structural = true;
                    }
                    None => self.unknown("remove", name),
                },
                MenuDelta::SetPreparation { name, method } => match self.record.find_recipe_mut(&name) {
                    Some(recipe) => {
                        if recipe.preparation_method != method {
                            recipe.set_preparation(method);
                            self.outcome.changed = true;
                        }
                    }
                    None => self.unknown("set preparation for", name),
                },
                MenuDelta::SetRecipeType { name, recipe_type } => match self.record.find_recipe_mut(&name) {
                    Some(recipe) => {
                        self.outcome.changed |= recipe.recipe_type != recipe_type;
                        recipe.recipe_type = recipe_type;
                    }
                    None => self.unknown("set recipe type for", name),
                },
                MenuDelta::SetCategory { name, category } => match self.record.find_recipe_mut(&name) {
                    Some(recipe) => {
                        let category = Some(category.trim().to_string()).filter(|c| !c.is_empty());
                        if category.is_some() && recipe.dish_category != category {
                            recipe.dish_category = category;
                            self.outcome.changed = true;
                        }
                    }
                    None => self.unknown("set category for", name),
                },
                MenuDelta::SetServings { name, servings } => {
                    if servings == 0 {
                        self.reject(MergeRejection::InvalidServings { dish: name });
                        continue;
                    }
                    match self.record.find_recipe_mut(&name) {
                        Some(recipe) => {
                            self.outcome.changed |= recipe.servings != Some(servings);
                            recipe.servings = Some(servings);
                        }
                        None => self.unknown("set servings for", name),
                    }
                }
                MenuDelta::AttachSource { name, artifact } => match self.record.find_recipe_mut(&name) {
                    Some(recipe) => {
                        recipe.attach_artifact(artifact);
                        self.outcome.changed = true;
                    }
                    None => self.unknown("attach a recipe to", name),
                },
                MenuDelta::AwaitInput { name } => match self.record.find_recipe_mut(&name) {
                    Some(recipe) => {
                        if recipe.needs_resolution() && !recipe.awaiting_user_input {
                            recipe.awaiting_user_input = true;
                            self.outcome.changed = true;
                        }
                    }
                    None => self.unknown("wait for a recipe for", name),
                },
                MenuDelta::SetIngredients { name, ingredients } => {
                    if ingredients.is_empty() {
                        self.reject(MergeRejection::EmptyIngredients { dish: name });
                        continue;
                    }
                    match self.record.find_recipe_mut(&name) {
                        Some(recipe) => {
                            recipe.preparation_method = crate::domain::PreparationMethod::Homemade;
                            recipe.artifact = None;
                            recipe.complete_with(ingredients, SourceType::UserDescription);
                            self.outcome.changed = true;
                        }
                        None => self.unknown("set ingredients for", name),
                    }
                }
            }
        }

        if structural {
            debug!(session_id = %self.record.session_id, "merge: menu changed, confirmation reset");
            self.outcome.menu_changed = true;
            self.outcome.changed = true;
            self.record.meal_plan_confirmed = false;
            self.record.answered.remove(&CriticalField::MealPlan);
        }
    }

    fn unknown(&mut self, action: &str, dish: String) {
        self.reject(MergeRejection::UnknownDish {
            action: action.to_string(),
            dish,
        });
    }

    /// Returns true when a new dish was appended
    fn add_dish(
        &mut self,
        name: String,
        placeholder: bool,
        recipe_type: Option<crate::domain::RecipeType>,
        preparation: Option<crate::domain::PreparationMethod>,
        category: Option<String>,
    ) -> bool {
        let name = name.trim().to_string();
        if name.is_empty() {
            self.reject(MergeRejection::InvalidValue {
                field: "menu".to_string(),
                reason: "dish name is empty".to_string(),
            });
            return false;
        }

        let (recipe, added) = match self.record.recipe_index(&name) {
            Some(idx) => {
                debug!(dish = %name, "merge: duplicate add merged into existing dish");
                let recipe = &mut self.record.meal_plan[idx];
                if !placeholder && recipe.status == crate::domain::RecipeStatus::Placeholder {
                    recipe.rename(name);
                }
                (recipe, false)
            }
            None => {
                let recipe = if placeholder {
                    Recipe::placeholder(name)
                } else {
                    Recipe::new(name)
                };
                self.record.meal_plan.push(recipe);
                let last = self.record.meal_plan.len() - 1;
                (&mut self.record.meal_plan[last], true)
            }
        };

        if let Some(t) = recipe_type {
            recipe.recipe_type = t;
        }
        if let Some(c) = category.map(|c| c.trim().to_string()).filter(|c| !c.is_empty()) {
            recipe.dish_category = Some(c);
        }
        match preparation {
            Some(method) if recipe.preparation_method != method => recipe.set_preparation(method),
            _ => {}
        }
        self.outcome.changed = true;
        added
    }

    /// Returns true when the rename was promoted to an add
    fn rename_dish(&mut self, from: &str, to: String) -> bool {
        let to = to.trim().to_string();
        if to.is_empty() {
            self.reject(MergeRejection::InvalidValue {
                field: "menu".to_string(),
                reason: format!("new name for '{}' is empty", from),
            });
            return false;
        }

        let Some(from_idx) = self.record.recipe_index(from) else {
            debug!(%from, %to, "merge: rename of unknown dish promoted to add");
            return self.add_dish(to, false, None, None, None);
        };

        match self.record.recipe_index(&to) {
            Some(to_idx) if to_idx != from_idx => {
                debug!(%from, %to, "merge: rename collides, merging dishes");
                let moved = self.record.meal_plan.remove(from_idx);
                let target = if to_idx > from_idx { to_idx - 1 } else { to_idx };
                self.record.meal_plan[target].absorb(moved);
            }
            _ => {
                self.record.meal_plan[from_idx].rename(to);
            }
        }
        self.outcome.changed = true;
        false
    }

    fn confirmation(&mut self, confirmed: Option<bool>) {
        match confirmed {
            Some(true) if self.record.meal_plan.is_empty() => {
                self.reject(MergeRejection::EmptyMenuConfirmation);
            }
            Some(true) => {
                self.outcome.changed |= !self.record.meal_plan_confirmed;
                self.record.meal_plan_confirmed = true;
                self.answer(CriticalField::MealPlan);
            }
            Some(false) => {
                self.outcome.changed |= self.record.meal_plan_confirmed;
                self.record.meal_plan_confirmed = false;
                self.record.answered.remove(&CriticalField::MealPlan);
            }
            None => {}
        }
    }

    fn output_formats(&mut self, formats: Option<Vec<crate::domain::OutputFormat>>) {
        let Some(formats) = formats.filter(|f| !f.is_empty()) else {
            return;
        };
        if self.record.stage != Stage::SelectingOutput {
            self.reject(MergeRejection::OutputsNotSelectable {
                stage: self.record.stage,
            });
            return;
        }
        let formats: BTreeSet<_> = formats.into_iter().collect();
        if self.record.output_formats != formats {
            self.record.output_formats = formats;
            self.outcome.changed = true;
        }
    }

    fn explicit_answers(&mut self, answered: Vec<CriticalField>) {
        for field in answered {
            if field == CriticalField::MealPlan && self.record.meal_plan.is_empty() {
                self.reject(MergeRejection::EmptyMenuConfirmation);
                continue;
            }
            if field == CriticalField::MealPlan {
                self.record.meal_plan_confirmed = true;
            }
            self.answer(field);
        }
    }

    fn finish(mut self) -> MergeOutcome {
        self.outcome.answered_now = self
            .record
            .answered
            .difference(&self.answered_before)
            .copied()
            .collect();
        if !self.outcome.answered_now.is_empty() || self.answered_before != self.record.answered {
            self.outcome.changed = true;
        }
        if self.outcome.changed {
            self.record.touch();
        }

        self.outcome.transition = self.record.evaluate_transition();
        if let Some((from, to)) = self.outcome.transition {
            info!(session_id = %self.record.session_id, %from, %to, "merge: stage advanced");
        }
        debug!(
            session_id = %self.record.session_id,
            score = self.record.completion_score(),
            rejected = self.outcome.rejected.len(),
            "merge: finished"
        );
        self.outcome
    }
}

/// Positive whole number that fits a u32
fn positive_count(value: f64) -> Option<u32> {
    if value.is_finite() && value.fract() == 0.0 && value >= 1.0 && value <= f64::from(u32::MAX) {
        Some(value as u32)
    } else {
        None
    }
}

/// Union by normalized name, keeping first-seen spelling; returns whether anything was added
fn union_names(target: &mut Vec<String>, incoming: Union<String>) -> bool {
    let mut changed = false;
    for name in incoming.0 {
        let name = name.trim().to_string();
        let key = normalize_key(&name);
        if key.is_empty() || target.iter().any(|t| normalize_key(t) == key) {
            continue;
        }
        target.push(name);
        changed = true;
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        GroceryCategory, Ingredient, OutputFormat, PreparationMethod, RecipeArtifact, RecipeStatus, RecipeType,
    };
    use proptest::prelude::*;

    fn record() -> PlanningRecord {
        PlanningRecord::new("test-session")
    }

    fn full_answers(menu: &[&str]) -> ExtractionDiff {
        ExtractionDiff {
            event_type: Some("dinner party".to_string()),
            adult_count: Some(8.0),
            child_count: Some(2.0),
            dietary_restrictions: vec![DietaryRestriction::new("vegetarian")].into(),
            cuisine_preferences: vec!["Italian".to_string()].into(),
            menu: menu.iter().map(|n| MenuDelta::add(*n)).collect(),
            meal_plan_confirmed: Some(true),
            ..ExtractionDiff::default()
        }
    }

    fn ingredients() -> Vec<Ingredient> {
        vec![Ingredient::new("chicken thighs", 2.0, "lb", GroceryCategory::Proteins)]
    }

    #[test]
    fn test_scalars_last_write_wins_and_null_ignored() {
        let mut r = record();
        apply(
            &mut r,
            ExtractionDiff {
                event_type: Some("BBQ".to_string()),
                budget: Some(300.0),
                ..ExtractionDiff::default()
            },
        );
        apply(
            &mut r,
            ExtractionDiff {
                event_type: Some("Birthday".to_string()),
                ..ExtractionDiff::default()
            },
        );
        assert_eq!(r.attributes.event_type.as_deref(), Some("Birthday"));
        assert_eq!(r.attributes.budget, Some(300.0));
        assert!(r.answered.contains(&CriticalField::EventType));
    }

    #[test]
    fn test_guest_counts_reject_fractional_and_zero() {
        let mut r = record();
        apply(&mut r, ExtractionDiff::with_guests(6, 2));
        let outcome = apply(
            &mut r,
            ExtractionDiff {
                adult_count: Some(2.5),
                child_count: Some(0.0),
                ..ExtractionDiff::default()
            },
        );
        assert_eq!(r.guests.adults, 6);
        assert_eq!(r.guests.children, 2);
        assert_eq!(outcome.rejected.len(), 2);
        assert!(matches!(
            outcome.rejected[0],
            MergeRejection::InvalidGuestCount { value, .. } if value == 2.5
        ));
    }

    #[test]
    fn test_guest_total_saturates_at_max_count() {
        let mut r = record();
        let outcome = apply(
            &mut r,
            ExtractionDiff {
                adult_count: Some(f64::from(u32::MAX)),
                child_count: Some(1.0),
                ..ExtractionDiff::default()
            },
        );
        assert!(outcome.rejected.is_empty());
        assert_eq!(r.guests.adults, u32::MAX);
        assert_eq!(r.guests.children, 1);
        assert_eq!(r.total_guests(), u32::MAX);
    }

    #[test]
    fn test_dietary_and_cuisine_union() {
        let mut r = record();
        apply(
            &mut r,
            ExtractionDiff {
                dietary_restrictions: vec![DietaryRestriction::new("Gluten-Free")].into(),
                cuisine_preferences: vec!["Italian".to_string()].into(),
                ..ExtractionDiff::default()
            },
        );
        apply(
            &mut r,
            ExtractionDiff {
                dietary_restrictions: vec![
                    DietaryRestriction {
                        kind: "gluten free".to_string(),
                        count: Some(2),
                        notes: None,
                    },
                    DietaryRestriction::new("vegan"),
                ]
                .into(),
                cuisine_preferences: vec!["italian".to_string(), "Mexican".to_string()].into(),
                ..ExtractionDiff::default()
            },
        );
        assert_eq!(r.attributes.dietary_restrictions.len(), 2);
        assert_eq!(r.attributes.dietary_restrictions[0].kind, "Gluten-Free");
        assert_eq!(r.attributes.dietary_restrictions[0].count, Some(2));
        assert_eq!(r.attributes.cuisine_preferences, vec!["Italian", "Mexican"]);
    }

    #[test]
    fn test_rename_unknown_dish_promoted_to_add() {
        let mut r = record();
        let outcome = apply(
            &mut r,
            ExtractionDiff {
                menu: vec![MenuDelta::Rename {
                    from: "main".to_string(),
                    to: "Lasagna".to_string(),
                }],
                ..ExtractionDiff::default()
            },
        );
        assert!(outcome.menu_changed);
        assert_eq!(r.meal_plan.len(), 1);
        assert_eq!(r.meal_plan[0].name, "Lasagna");
    }

    #[test]
    fn test_duplicate_names_merge() {
        let mut r = record();
        apply(
            &mut r,
            ExtractionDiff {
                menu: vec![
                    MenuDelta::add("Caesar Salad"),
                    MenuDelta::Add {
                        name: "caesar salad".to_string(),
                        placeholder: false,
                        recipe_type: None,
                        preparation: Some(PreparationMethod::StoreBought),
                        category: Some("salad".to_string()),
                    },
                ],
                ..ExtractionDiff::default()
            },
        );
        assert_eq!(r.meal_plan.len(), 1);
        assert!(r.meal_plan[0].is_store_bought());
        assert_eq!(r.meal_plan[0].dish_category.as_deref(), Some("salad"));
    }

    #[test]
    fn test_rename_into_existing_dish_merges() {
        let mut r = record();
        apply(
            &mut r,
            ExtractionDiff {
                menu: vec![
                    MenuDelta::Add {
                        name: "main".to_string(),
                        placeholder: true,
                        recipe_type: None,
                        preparation: None,
                        category: Some("protein".to_string()),
                    },
                    MenuDelta::add("Brisket"),
                    MenuDelta::Rename {
                        from: "main".to_string(),
                        to: "brisket".to_string(),
                    },
                ],
                ..ExtractionDiff::default()
            },
        );
        assert_eq!(r.meal_plan.len(), 1);
        assert_eq!(r.meal_plan[0].name, "Brisket");
        assert_eq!(r.meal_plan[0].dish_category.as_deref(), Some("protein"));
    }

    #[test]
    fn test_menu_change_resets_confirmation() {
        let mut r = record();
        apply(&mut r, full_answers(&["Lasagna"]));
        assert!(r.meal_plan_confirmed);
        apply(
            &mut r,
            ExtractionDiff {
                menu: vec![MenuDelta::add("Tiramisu")],
                ..ExtractionDiff::default()
            },
        );
        assert!(!r.meal_plan_confirmed);
        assert!(!r.answered.contains(&CriticalField::MealPlan));
    }

    #[test]
    fn test_full_answers_reach_recipe_confirmation() {
        let mut r = record();
        let outcome = apply(&mut r, full_answers(&["Lasagna", "Garlic Bread"]));
        assert_eq!(outcome.transition, Some((Stage::Gathering, Stage::RecipeConfirmation)));
        assert_eq!(r.completion_score(), 1.0);
    }

    #[test]
    fn test_placeholder_blocks_transition() {
        let mut r = record();
        let mut diff = full_answers(&["Lasagna"]);
        diff.menu.push(MenuDelta::Add {
            name: "dessert".to_string(),
            placeholder: true,
            recipe_type: None,
            preparation: None,
            category: None,
        });
        let outcome = apply(&mut r, diff);
        assert_eq!(outcome.transition, None);
        assert_eq!(r.stage, Stage::Gathering);

        let outcome = apply(
            &mut r,
            ExtractionDiff {
                menu: vec![MenuDelta::Rename {
                    from: "dessert".to_string(),
                    to: "Tiramisu".to_string(),
                }],
                ..ExtractionDiff::default()
            },
        );
        assert_eq!(r.meal_plan[1].status, RecipeStatus::Named);
        assert_eq!(outcome.transition, Some((Stage::Gathering, Stage::RecipeConfirmation)));
    }

    #[test]
    fn test_recipe_confirmation_to_selecting_output() {
        let mut r = record();
        apply(&mut r, full_answers(&["Chicken", "Baguette"]));
        assert_eq!(r.stage, Stage::RecipeConfirmation);

        let outcome = apply(
            &mut r,
            ExtractionDiff {
                menu: vec![
                    MenuDelta::SetPreparation {
                        name: "baguette".to_string(),
                        method: PreparationMethod::StoreBought,
                    },
                    MenuDelta::SetIngredients {
                        name: "chicken".to_string(),
                        ingredients: ingredients(),
                    },
                ],
                ..ExtractionDiff::default()
            },
        );
        assert_eq!(outcome.transition, Some((Stage::RecipeConfirmation, Stage::SelectingOutput)));
        assert_eq!(r.meal_plan[0].source_type, SourceType::UserDescription);
    }

    #[test]
    fn test_output_formats_only_while_selecting() {
        let mut r = record();
        let outcome = apply(
            &mut r,
            ExtractionDiff {
                output_formats: Some(vec![OutputFormat::InChat]),
                ..ExtractionDiff::default()
            },
        );
        assert!(r.output_formats.is_empty());
        assert!(matches!(
            outcome.rejected[0],
            MergeRejection::OutputsNotSelectable {
                stage: Stage::Gathering
            }
        ));
    }

    #[test]
    fn test_menu_frozen_once_agent_running() {
        let mut r = record();
        r.stage = Stage::AgentRunning;
        let outcome = apply(
            &mut r,
            ExtractionDiff {
                menu: vec![MenuDelta::add("Soup")],
                ..ExtractionDiff::default()
            },
        );
        assert!(r.meal_plan.is_empty());
        assert!(matches!(outcome.rejected[0], MergeRejection::MenuFrozen { .. }));
    }

    #[test]
    fn test_attach_source_and_await_input() {
        let mut r = record();
        apply(
            &mut r,
            ExtractionDiff {
                menu: vec![
                    MenuDelta::add("Chili"),
                    MenuDelta::add("Grandma's Pie"),
                    MenuDelta::AttachSource {
                        name: "chili".to_string(),
                        artifact: RecipeArtifact::Description {
                            text: "beans, beef, tomatoes".to_string(),
                        },
                    },
                    MenuDelta::AwaitInput {
                        name: "grandma's pie".to_string(),
                    },
                    MenuDelta::SetRecipeType {
                        name: "Unknown".to_string(),
                        recipe_type: RecipeType::Drink,
                    },
                ],
                ..ExtractionDiff::default()
            },
        );
        assert_eq!(r.meal_plan[0].source_type, SourceType::UserDescription);
        assert!(r.meal_plan[0].artifact.is_some());
        assert!(r.meal_plan[1].awaiting_user_input);
    }

    #[test]
    fn test_unknown_dish_and_invalid_values_reported() {
        let mut r = record();
        let outcome = apply(
            &mut r,
            ExtractionDiff {
                budget: Some(-5.0),
                menu: vec![
                    MenuDelta::Remove {
                        name: "Ghost".to_string(),
                    },
                    MenuDelta::add("Soup"),
                    MenuDelta::SetServings {
                        name: "Soup".to_string(),
                        servings: 0,
                    },
                    MenuDelta::SetIngredients {
                        name: "Soup".to_string(),
                        ingredients: vec![],
                    },
                ],
                ..ExtractionDiff::default()
            },
        );
        assert_eq!(r.attributes.budget, None);
        assert_eq!(outcome.rejected.len(), 4);
        assert_eq!(r.meal_plan[0].servings, None);
    }

    #[test]
    fn test_explicit_answers() {
        let mut r = record();
        let outcome = apply(
            &mut r,
            ExtractionDiff {
                answered: vec![CriticalField::Dietary, CriticalField::GuestBreakdown],
                ..ExtractionDiff::default()
            },
        );
        assert!(r.attributes.dietary_restrictions.is_empty());
        assert_eq!(
            outcome.answered_now,
            vec![CriticalField::GuestBreakdown, CriticalField::Dietary]
        );
    }

    #[test]
    fn test_empty_diff_changes_nothing() {
        let mut r = record();
        apply(&mut r, full_answers(&["Lasagna"]));
        let before = r.clone();
        let outcome = apply(&mut r, ExtractionDiff::default());
        assert!(!outcome.changed);
        assert_eq!(r, before);
    }

    fn arb_diff() -> impl Strategy<Value = ExtractionDiff> {
        let names = prop::sample::select(vec!["Lasagna", "lasagna", "Salad", "main", "Pie", "Wine"]);
        (
            prop::option::of(prop::sample::select(vec!["BBQ", "Dinner", "Brunch"])),
            prop::option::of(prop::sample::select(vec![-1.0, 0.0, 2.5, 1.0, 8.0, 12.0])),
            prop::option::of(prop::sample::select(vec![0.0, 1.5, 2.0, 3.0])),
            prop::collection::vec(prop::sample::select(vec!["Italian", "italian", "Thai"]), 0..3),
            prop::collection::vec((names, any::<bool>(), 0u8..4), 0..4),
            prop::option::of(any::<bool>()),
            prop::collection::vec(prop::sample::select(CriticalField::ALL.to_vec()), 0..3),
        )
            .prop_map(|(event_type, adults, children, cuisine, menu, confirmed, answered)| ExtractionDiff {
                event_type: event_type.map(String::from),
                adult_count: adults,
                child_count: children,
                cuisine_preferences: cuisine.into_iter().map(String::from).collect::<Vec<_>>().into(),
                menu: menu
                    .into_iter()
                    .map(|(name, placeholder, op)| match op {
                        0 => MenuDelta::Add {
                            name: name.to_string(),
                            placeholder,
                            recipe_type: None,
                            preparation: None,
                            category: None,
                        },
                        1 => MenuDelta::Rename {
                            from: "main".to_string(),
                            to: name.to_string(),
                        },
                        2 => MenuDelta::SetPreparation {
                            name: name.to_string(),
                            method: PreparationMethod::StoreBought,
                        },
                        _ => MenuDelta::SetIngredients {
                            name: name.to_string(),
                            ingredients: ingredients(),
                        },
                    })
                    .collect(),
                meal_plan_confirmed: confirmed,
                answered,
                ..ExtractionDiff::default()
            })
    }

    fn fields(r: &PlanningRecord) -> (crate::domain::EventAttributes, crate::domain::GuestCounts, Vec<Recipe>) {
        (r.attributes.clone(), r.guests, r.meal_plan.clone())
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// An empty diff leaves every previously set field as it was
        #[test]
        fn prop_unset_diff_never_erases(diffs in prop::collection::vec(arb_diff(), 0..6)) {
            let mut r = record();
            for d in diffs {
                apply(&mut r, d);
            }
            let before = fields(&r);
            let answered = r.answered.clone();
            let confirmed = r.meal_plan_confirmed;
            apply(&mut r, ExtractionDiff::default());
            prop_assert_eq!(fields(&r), before);
            prop_assert_eq!(&r.answered, &answered);
            prop_assert_eq!(r.meal_plan_confirmed, confirmed);
        }

        #[test]
        fn prop_stage_moves_forward_one_step(diffs in prop::collection::vec(arb_diff(), 0..8)) {
            let mut r = record();
            for d in diffs {
                let before = r.stage;
                let outcome = apply(&mut r, d);
                prop_assert!(r.stage >= before);
                match outcome.transition {
                    Some((from, to)) => {
                        prop_assert_eq!(from, before);
                        prop_assert_eq!(Some(to), before.next());
                    }
                    None => prop_assert_eq!(r.stage, before),
                }
            }
        }

        #[test]
        fn prop_reapplying_without_pending_guard_keeps_stage(
            setup in prop::collection::vec(arb_diff(), 0..6),
            diff in arb_diff(),
        ) {
            let mut r = record();
            for d in setup {
                apply(&mut r, d);
            }
            apply(&mut r, diff.clone());
            let next_guard_holds = r.stage.next().is_some_and(|next| r.guard_satisfied(next).is_ok());
            prop_assume!(!next_guard_holds);
            let before = r.clone();
            apply(&mut r, diff);
            let guard_inputs_same = r.meal_plan == before.meal_plan
                && r.answered == before.answered
                && r.guests == before.guests
                && r.output_formats == before.output_formats;
            if guard_inputs_same {
                prop_assert_eq!(r.stage, before.stage);
            }
        }
    }
}
