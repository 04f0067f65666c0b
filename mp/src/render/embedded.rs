//! Embedded templates
//!
//! Compiled into the binary from the .hbs files in `templates/`.

use tracing::debug;

/// Markdown shopping list delivered in chat
pub const SHOPPING_LIST: &str = include_str!("../../templates/shopping_list.hbs");

/// Review payload with per-item exclusion toggles
pub const REVIEW: &str = include_str!("../../templates/review.hbs");

pub fn get_embedded(name: &str) -> Option<&'static str> {
    debug!(%name, "get_embedded: called");
    match name {
        "shopping_list" => Some(SHOPPING_LIST),
        "review" => Some(REVIEW),
        _ => {
            debug!(%name, "get_embedded: no match found");
            None
        }
    }
}
