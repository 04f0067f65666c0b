//! Shopping list types
//!
//! The shopping list is derived: the pipeline recomputes it per run from the
//! resolved menu. Items are grouped by grocery category in a fixed aisle order.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::id::normalize_key;
use crate::quantity::units;

/// Grocery aisle; declaration order is display order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(from = "String", into = "String")]
pub enum GroceryCategory {
    Proteins,
    Produce,
    Dairy,
    Bakery,
    Pantry,
    Frozen,
    Beverages,
    Condiments,
    #[default]
    Other,
}

impl GroceryCategory {
    pub const ALL: [GroceryCategory; 9] = [
        Self::Proteins,
        Self::Produce,
        Self::Dairy,
        Self::Bakery,
        Self::Pantry,
        Self::Frozen,
        Self::Beverages,
        Self::Condiments,
        Self::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proteins => "proteins",
            Self::Produce => "produce",
            Self::Dairy => "dairy",
            Self::Bakery => "bakery",
            Self::Pantry => "pantry",
            Self::Frozen => "frozen",
            Self::Beverages => "beverages",
            Self::Condiments => "condiments",
            Self::Other => "other",
        }
    }

    /// Heading used when rendering the list
    pub fn heading(&self) -> &'static str {
        match self {
            Self::Proteins => "Proteins",
            Self::Produce => "Produce",
            Self::Dairy => "Dairy",
            Self::Bakery => "Bakery",
            Self::Pantry => "Pantry",
            Self::Frozen => "Frozen",
            Self::Beverages => "Beverages",
            Self::Condiments => "Condiments",
            Self::Other => "Other",
        }
    }

    /// Parse a category name leniently; anything unknown lands in Other
    pub fn parse(name: &str) -> Self {
        match normalize_key(name).as_str() {
            "proteins" | "protein" | "meat" | "meats" | "seafood" | "meat and seafood" => Self::Proteins,
            "produce" | "vegetables" | "vegetable" | "fruit" | "fruits" | "herbs" => Self::Produce,
            "dairy" | "dairy and eggs" | "eggs" | "cheese" => Self::Dairy,
            "bakery" | "bread" | "breads" => Self::Bakery,
            "pantry" | "dry goods" | "spices" | "baking" | "canned goods" | "grains" => Self::Pantry,
            "frozen" | "frozen foods" => Self::Frozen,
            "beverages" | "beverage" | "drinks" | "drink" => Self::Beverages,
            "condiments" | "condiment" | "sauces" | "oils" => Self::Condiments,
            _ => Self::Other,
        }
    }
}

impl std::fmt::Display for GroceryCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<String> for GroceryCategory {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<GroceryCategory> for String {
    fn from(c: GroceryCategory) -> Self {
        c.as_str().to_string()
    }
}

/// One aggregated line on the shopping list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShoppingItem {
    pub name: String,
    pub total_quantity: f64,
    pub unit: String,
    pub category: GroceryCategory,

    /// Dishes that contributed to this line, in menu order
    #[serde(default)]
    pub appears_in: Vec<String>,

    /// A contributing dish used the fallback quantity category
    #[serde(default)]
    pub estimated: bool,

    /// User marked "already have"
    #[serde(default)]
    pub excluded: bool,
}

impl ShoppingItem {
    pub fn new(name: impl Into<String>, total_quantity: f64, unit: impl Into<String>, category: GroceryCategory) -> Self {
        Self {
            name: name.into(),
            total_quantity,
            unit: unit.into(),
            category,
            appears_in: Vec::new(),
            estimated: false,
            excluded: false,
        }
    }

    pub fn key(&self) -> String {
        normalize_key(&self.name)
    }

    /// Quantity rounded for display
    pub fn display_quantity(&self) -> f64 {
        units::round_for_display(self.total_quantity, &self.unit)
    }

    /// Human-readable line: "4.6 lb chicken thighs"
    pub fn display_line(&self) -> String {
        let qty = units::format_quantity(self.display_quantity());
        let mut line = if self.unit.is_empty() {
            format!("{} {}", qty, self.name)
        } else {
            format!("{} {} {}", qty, self.unit, self.name)
        };
        if self.estimated {
            line.push_str(" (estimated)");
        }
        line
    }
}

/// Items of one grocery category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryGroup {
    pub category: GroceryCategory,
    pub items: Vec<ShoppingItem>,
}

/// A dish left out of the quantities because it has no ingredients yet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeedsInput {
    pub dish: String,
    pub reason: String,
}

/// Grouped, aggregated shopping list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShoppingList {
    /// Groups in grocery order; empty groups are never stored
    #[serde(default)]
    pub groups: Vec<CategoryGroup>,

    /// Names the user marked "already have"
    #[serde(default)]
    pub excluded_items: BTreeSet<String>,

    /// Dishes omitted from quantities, shown to the reviewer as gaps
    #[serde(default)]
    pub needs_input: Vec<NeedsInput>,
}

impl ShoppingList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> impl Iterator<Item = &ShoppingItem> {
        self.groups.iter().flat_map(|g| g.items.iter())
    }

    fn items_mut(&mut self) -> impl Iterator<Item = &mut ShoppingItem> {
        self.groups.iter_mut().flat_map(|g| g.items.iter_mut())
    }

    pub fn item_count(&self) -> usize {
        self.groups.iter().map(|g| g.items.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.item_count() == 0
    }

    pub fn group(&self, category: GroceryCategory) -> Option<&CategoryGroup> {
        self.groups.iter().find(|g| g.category == category)
    }

    /// Find an item by case-insensitive name
    pub fn find_item(&self, name: &str) -> Option<&ShoppingItem> {
        let key = normalize_key(name);
        self.items().find(|i| i.key() == key)
    }

    pub fn find_item_mut(&mut self, name: &str) -> Option<&mut ShoppingItem> {
        let key = normalize_key(name);
        self.items_mut().find(|i| i.key() == key)
    }

    /// Insert an item into its category group, merging with an existing line
    ///
    /// Same name and unit sums quantities. Same name in a different unit is
    /// stored as "name (unit)" so names stay unique within the category.
    pub fn add_item(&mut self, mut item: ShoppingItem) {
        debug!(name = %item.name, category = %item.category, "ShoppingList::add_item: called");
        let idx = match self.groups.iter().position(|g| g.category == item.category) {
            Some(idx) => idx,
            None => {
                let at = self
                    .groups
                    .iter()
                    .position(|g| g.category > item.category)
                    .unwrap_or(self.groups.len());
                self.groups.insert(
                    at,
                    CategoryGroup {
                        category: item.category,
                        items: Vec::new(),
                    },
                );
                at
            }
        };
        let group = &mut self.groups[idx];

        let key = item.key();
        if let Some(existing) = group.items.iter_mut().find(|i| i.key() == key) {
            if existing.unit == item.unit {
                debug!(name = %existing.name, "ShoppingList::add_item: merged into existing line");
                existing.total_quantity += item.total_quantity;
                existing.estimated |= item.estimated;
                for dish in item.appears_in {
                    if !existing.appears_in.contains(&dish) {
                        existing.appears_in.push(dish);
                    }
                }
                return;
            }
            item.name = format!("{} ({})", item.name, item.unit);
            let key = item.key();
            if let Some(existing) = group.items.iter_mut().find(|i| i.key() == key) {
                existing.total_quantity += item.total_quantity;
                existing.estimated |= item.estimated;
                return;
            }
        }
        group.items.push(item);
    }

    /// Remove an item outright; returns it when found
    pub fn remove_item(&mut self, name: &str) -> Option<ShoppingItem> {
        debug!(%name, "ShoppingList::remove_item: called");
        let key = normalize_key(name);
        for group in &mut self.groups {
            if let Some(pos) = group.items.iter().position(|i| i.key() == key) {
                let item = group.items.remove(pos);
                self.excluded_items.retain(|n| normalize_key(n) != key);
                self.groups.retain(|g| !g.items.is_empty());
                return Some(item);
            }
        }
        None
    }

    /// Toggle a single item's exclusion; returns false when no such item
    pub fn set_excluded(&mut self, name: &str, excluded: bool) -> bool {
        debug!(%name, excluded, "ShoppingList::set_excluded: called");
        let canonical = match self.find_item_mut(name) {
            Some(item) => {
                item.excluded = excluded;
                item.name.clone()
            }
            None => return false,
        };
        if excluded {
            self.excluded_items.insert(canonical);
        } else {
            self.excluded_items.remove(&canonical);
        }
        true
    }

    /// Replace every exclusion flag with the given set
    ///
    /// Returns the requested names that matched no item.
    pub fn set_exclusions<'a, I>(&mut self, names: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let requested: Vec<&String> = names.into_iter().collect();
        debug!(count = requested.len(), "ShoppingList::set_exclusions: called");
        let keys: BTreeSet<String> = requested.iter().map(|n| normalize_key(n)).collect();

        self.excluded_items.clear();
        let mut matched = BTreeSet::new();
        let mut excluded_names = BTreeSet::new();
        for item in self.items_mut() {
            let key = item.key();
            item.excluded = keys.contains(&key);
            if item.excluded {
                matched.insert(key);
                excluded_names.insert(item.name.clone());
            }
        }
        self.excluded_items = excluded_names;

        requested
            .into_iter()
            .filter(|n| !matched.contains(&normalize_key(n)))
            .cloned()
            .collect()
    }

    /// The list handed to delivery: excluded items removed, empty groups dropped
    pub fn deliverable(&self) -> ShoppingList {
        let groups = self
            .groups
            .iter()
            .filter_map(|g| {
                let items: Vec<ShoppingItem> = g.items.iter().filter(|i| !i.excluded).cloned().collect();
                (!items.is_empty()).then(|| CategoryGroup {
                    category: g.category,
                    items,
                })
            })
            .collect();
        ShoppingList {
            groups,
            excluded_items: BTreeSet::new(),
            needs_input: self.needs_input.clone(),
        }
    }
}
