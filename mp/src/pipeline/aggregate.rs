//! Scaling and aggregation of resolved recipes into a shopping list

use tracing::{debug, info};

use crate::domain::{
    DishScale, GroceryCategory, GuestCounts, NeedsInput, Recipe, RecipeType, ShoppingItem, ShoppingList,
    normalize_key,
};
use crate::quantity::{QuantityTable, scale_quantity, units};

/// Always on hand; never bought
const NEVER_PURCHASE: &[&str] = &[
    "water",
    "tap water",
    "cold water",
    "hot water",
    "boiling water",
    "ice water",
];

pub fn is_never_purchased(name: &str) -> bool {
    NEVER_PURCHASE.contains(&normalize_key(name).as_str())
}

/// Quantity-table key for a dish
fn dish_category(recipe: &Recipe) -> Option<&str> {
    match (&recipe.dish_category, recipe.recipe_type) {
        (Some(category), _) => Some(category.as_str()),
        (None, RecipeType::Drink) => Some("drink"),
        (None, RecipeType::Food) => None,
    }
}

/// The calculating step: one multiplier per dish for the current guests
pub fn compute_scales(menu: &[Recipe], guests: GuestCounts, table: &QuantityTable) -> Vec<DishScale> {
    debug!(dishes = menu.len(), adults = guests.adults, children = guests.children, "compute_scales: called");
    menu.iter()
        .map(|recipe| {
            let scale = table.scale(dish_category(recipe), guests);
            DishScale {
                dish: recipe.name.clone(),
                category: scale.category,
                multiplier: scale.multiplier,
                reference_servings: recipe.servings.unwrap_or_else(|| table.reference_servings()).max(1),
                estimated: scale.estimated,
            }
        })
        .collect()
}

/// Running total for one (category, ingredient) line
#[derive(Debug)]
struct Line {
    category: GroceryCategory,
    key: String,
    name: String,
    unit: String,
    quantity: f64,
    appears_in: Vec<String>,
    estimated: bool,
}

#[derive(Debug, Default)]
struct Accumulator {
    lines: Vec<Line>,
}

impl Accumulator {
    /// Add into a line with the same category and name whose unit converts;
    /// otherwise start a new line
    fn add(&mut self, category: GroceryCategory, name: &str, quantity: f64, unit: &str, dish: &str, estimated: bool) {
        let key = normalize_key(name);
        for line in self.lines.iter_mut().filter(|l| l.category == category && l.key == key) {
            if let Some(converted) = units::convert(quantity, unit, &line.unit) {
                line.quantity += converted;
                line.estimated |= estimated;
                if !line.appears_in.iter().any(|d| d == dish) {
                    line.appears_in.push(dish.to_string());
                }
                return;
            }
        }
        self.lines.push(Line {
            category,
            key,
            name: name.trim().to_string(),
            unit: unit.trim().to_string(),
            quantity,
            appears_in: vec![dish.to_string()],
            estimated,
        });
    }

    fn into_list(self) -> ShoppingList {
        let mut list = ShoppingList::new();
        for line in self.lines {
            let mut item = ShoppingItem::new(line.name, line.quantity, line.unit, line.category);
            item.appears_in = line.appears_in;
            item.estimated = line.estimated;
            list.add_item(item);
        }
        list
    }
}

/// Merge every resolved dish into a grouped shopping list
///
/// Quantities are scaled exactly once and summed unrounded; rounding only
/// happens when a line is displayed. Dishes without ingredients are listed
/// under `needs_input` instead.
pub fn aggregate(menu: &[Recipe], scales: &[DishScale]) -> ShoppingList {
    debug!(dishes = menu.len(), "aggregate: called");
    let mut acc = Accumulator::default();
    let mut needs_input = Vec::new();

    for recipe in menu {
        let Some(scale) = scales.iter().find(|s| recipe.matches_name(&s.dish)) else {
            debug!(dish = %recipe.name, "aggregate: no scale computed, skipping");
            continue;
        };

        if recipe.is_store_bought() {
            let category = match recipe.recipe_type {
                RecipeType::Drink => GroceryCategory::Beverages,
                RecipeType::Food => GroceryCategory::Other,
            };
            acc.add(category, &recipe.name, scale.multiplier, "servings", &recipe.name, scale.estimated);
            continue;
        }

        if !recipe.is_resolved() || recipe.awaiting_user_input {
            let reason = recipe
                .last_resolution_error
                .clone()
                .unwrap_or_else(|| "waiting for the recipe; share the recipe or list the ingredients".to_string());
            needs_input.push(NeedsInput {
                dish: recipe.name.clone(),
                reason,
            });
            continue;
        }

        for ingredient in &recipe.ingredients {
            if is_never_purchased(&ingredient.name) {
                debug!(dish = %recipe.name, ingredient = %ingredient.name, "aggregate: never purchased, dropped");
                continue;
            }
            let quantity = scale_quantity(ingredient.quantity, scale.multiplier, scale.reference_servings);
            acc.add(
                ingredient.category,
                &ingredient.name,
                quantity,
                &ingredient.unit,
                &recipe.name,
                scale.estimated,
            );
        }
    }

    let mut list = acc.into_list();
    list.needs_input = needs_input;
    info!(
        items = list.item_count(),
        needs_input = list.needs_input.len(),
        "aggregate: shopping list built"
    );
    list
}
