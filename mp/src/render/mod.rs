//! Text rendering of shopping lists
//!
//! Handlebars over embedded templates, HTML escaping disabled since every
//! output is markdown or plain text.

pub mod embedded;

use eyre::{Result, eyre};
use handlebars::Handlebars;
use serde::Serialize;
use tracing::debug;

use crate::domain::{ShoppingList, Stage};

#[derive(Debug, Serialize)]
struct ItemView {
    line: String,
    excluded: bool,
}

#[derive(Debug, Serialize)]
struct GroupView {
    heading: &'static str,
    items: Vec<ItemView>,
}

#[derive(Debug, Serialize)]
struct NeedsInputView<'a> {
    dish: &'a str,
    reason: &'a str,
}

#[derive(Debug, Serialize)]
struct ListView<'a> {
    title: &'a str,
    item_count: usize,
    groups: Vec<GroupView>,
    needs_input: Vec<NeedsInputView<'a>>,
}

impl<'a> ListView<'a> {
    fn new(title: &'a str, list: &'a ShoppingList) -> Self {
        let groups = list
            .groups
            .iter()
            .filter(|g| !g.items.is_empty())
            .map(|g| GroupView {
                heading: g.category.heading(),
                items: g
                    .items
                    .iter()
                    .map(|i| ItemView {
                        line: i.display_line(),
                        excluded: i.excluded,
                    })
                    .collect(),
            })
            .collect();
        let needs_input = list
            .needs_input
            .iter()
            .map(|n| NeedsInputView {
                dish: &n.dish,
                reason: &n.reason,
            })
            .collect();
        Self {
            title,
            item_count: list.item_count(),
            groups,
            needs_input,
        }
    }
}

/// Renders lists through the embedded templates
pub struct Renderer {
    hbs: Handlebars<'static>,
}

impl Renderer {
    pub fn new() -> Self {
        let mut hbs = Handlebars::new();
        hbs.register_escape_fn(handlebars::no_escape);
        Self { hbs }
    }

    fn render(&self, template_name: &str, view: &ListView<'_>) -> Result<String> {
        debug!(%template_name, "Renderer::render: called");
        let template =
            embedded::get_embedded(template_name).ok_or_else(|| eyre!("Template not found: {}", template_name))?;
        self.hbs
            .render_template(template, view)
            .map_err(|e| eyre!("Failed to render template {}: {}", template_name, e))
    }

    /// Markdown list as delivered in chat
    pub fn shopping_list(&self, title: &str, list: &ShoppingList) -> Result<String> {
        self.render("shopping_list", &ListView::new(title, list))
    }

    /// Review message with a checkbox per item; unticked items are excluded
    pub fn review(&self, title: &str, list: &ShoppingList) -> Result<String> {
        self.render("review", &ListView::new(title, list))
    }
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new()
    }
}

/// One-line prompt hint for entering a stage
pub fn stage_prompt(stage: Stage) -> &'static str {
    match stage {
        Stage::Gathering => "Tell me about the event: what kind, how many guests, and what you'd like to serve.",
        Stage::RecipeConfirmation => "Here is the menu. Share a recipe for any dish, or mark it store-bought.",
        Stage::SelectingOutput => "Where should the shopping list go: Google Sheet, Google Tasks or here in chat?",
        Stage::AgentRunning => "Working out quantities and building the shopping list.",
        Stage::Complete => "All done. The shopping list has been delivered.",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{GroceryCategory, NeedsInput, ShoppingItem};

    fn sample() -> ShoppingList {
        let mut list = ShoppingList::new();
        let mut onion = ShoppingItem::new("onion", 2.2, "whole", GroceryCategory::Produce);
        onion.appears_in.push("Chili".to_string());
        list.add_item(onion);
        list.add_item(ShoppingItem::new("olive oil", 0.15, "L", GroceryCategory::Pantry));
        list.needs_input.push(NeedsInput {
            dish: "Pie".to_string(),
            reason: "could not generate ingredients for 'Pie'; provide the recipe manually".to_string(),
        });
        list
    }

    #[test]
    fn test_shopping_list_markdown() {
        let out = Renderer::new().shopping_list("Party Shopping - 03-15-2026", &sample()).unwrap();
        assert!(out.contains("# Party Shopping - 03-15-2026"));
        assert!(out.contains("- 3 whole onion"));
        assert!(out.contains("- 0.2 L olive oil"));
        assert!(out.contains("Pie: could not generate"));
    }

    #[test]
    fn test_no_html_escaping() {
        let mut list = ShoppingList::new();
        list.add_item(ShoppingItem::new("mac & cheese", 1.0, "servings", GroceryCategory::Other));
        let out = Renderer::new().shopping_list("t", &list).unwrap();
        assert!(out.contains("mac & cheese"));
    }

    #[test]
    fn test_review_marks_excluded_items() {
        let mut list = sample();
        list.set_excluded("onion", true);
        let out = Renderer::new().review("Party", &list).unwrap();
        assert!(out.contains("[ ] 3 whole onion"));
        assert!(out.contains("[x] 0.2 L olive oil"));
        assert!(out.contains("not on the list yet"));
    }
}
