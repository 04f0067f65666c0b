//! Session ID generation, name normalization and ID resolution
//!
//! Session IDs use the format: `{6-char-hex}-{kind}-{slug}`
//! Example: `0f3a2c-plan-dinner-party`

use std::collections::HashMap;

/// Generate an ID from a kind and a human title
pub fn generate_id(kind: &str, title: &str) -> String {
    // the tail of a v7 uuid is random; the head only changes every few hours
    let simple = uuid::Uuid::now_v7().simple().to_string();
    let hex_prefix = &simple[simple.len() - 6..];
    let slug = slugify(title);
    if slug.is_empty() {
        format!("{}-{}", hex_prefix, kind)
    } else {
        format!("{}-{}-{}", hex_prefix, kind, slug)
    }
}

/// Slugify a title for use in IDs
pub fn slugify(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        // Apostrophes vanish, everything else non-alphanumeric splits words
        .filter_map(|c| {
            if c.is_ascii_alphanumeric() {
                Some(c)
            } else if c == '\'' || c == '\u{2019}' || c == '\u{2018}' {
                None
            } else {
                Some('-')
            }
        })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Normalize a dish, ingredient or preference name for comparison
///
/// Case-insensitive, whitespace-collapsed, with `-` and `_` treated as spaces:
/// "Gluten-Free", "gluten free" and " GLUTEN_free " all share one key.
pub fn normalize_key(name: &str) -> String {
    name.to_lowercase()
        .split(|c: char| c.is_whitespace() || c == '-' || c == '_')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Resolves partial session references (hex prefix or slug fragment) to full IDs
pub struct IdResolver<'a> {
    ids: &'a HashMap<String, String>, // id -> display name
}

impl<'a> IdResolver<'a> {
    pub fn new(ids: &'a HashMap<String, String>) -> Self {
        Self { ids }
    }

    /// Resolve a partial reference to a full ID
    ///
    /// Returns:
    /// - Ok(Some(id)) if exactly one match
    /// - Ok(None) if no matches
    /// - Err with candidates if ambiguous
    pub fn resolve(&self, reference: &str) -> Result<Option<String>, Vec<String>> {
        if self.ids.contains_key(reference) {
            return Ok(Some(reference.to_string()));
        }

        let mut matches: Vec<String> = self
            .ids
            .keys()
            .filter(|id| Self::matches(id, reference))
            .cloned()
            .collect();

        match matches.len() {
            0 => Ok(None),
            1 => Ok(matches.pop()),
            _ => {
                matches.sort();
                Err(matches)
            }
        }
    }

    fn matches(id: &str, reference: &str) -> bool {
        if id.starts_with(reference) {
            return true;
        }

        if let Some(slug_start) = id.find('-') {
            let slug_part = &id[slug_start + 1..];
            if slug_part.contains(reference) {
                return true;
            }
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_id() {
        let id = generate_id("session", "Dinner Party");
        assert!(id.len() > 10);
        assert!(id.contains("-session-"));
        assert!(id.ends_with("dinner-party"));
    }

    #[test]
    fn test_generate_id_without_title() {
        let id = generate_id("session", "");
        assert!(id.ends_with("-session"));
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Kid's Birthday BBQ"), "kids-birthday-bbq");
        assert_eq!(slugify("Dinner   Party!"), "dinner-party");
        assert_eq!(slugify("don't stop"), "dont-stop");
        assert_eq!(slugify("Crème Brûlée"), "cr-me-br-l-e");
    }

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key("Gluten-Free"), "gluten free");
        assert_eq!(normalize_key("  GLUTEN_free "), "gluten free");
        assert_eq!(normalize_key("Olive  Oil"), "olive oil");
    }

    #[test]
    fn test_id_resolver_hex_prefix() {
        let mut ids = HashMap::new();
        ids.insert("019430-session-bbq".to_string(), "BBQ".to_string());
        ids.insert("019431-session-brunch".to_string(), "Brunch".to_string());

        let resolver = IdResolver::new(&ids);
        assert_eq!(resolver.resolve("019430").unwrap(), Some("019430-session-bbq".to_string()));
    }

    #[test]
    fn test_id_resolver_slug_match() {
        let mut ids = HashMap::new();
        ids.insert("019430-session-bbq".to_string(), "BBQ".to_string());
        ids.insert("019431-session-brunch".to_string(), "Brunch".to_string());

        let resolver = IdResolver::new(&ids);
        assert_eq!(resolver.resolve("brunch").unwrap(), Some("019431-session-brunch".to_string()));
    }

    #[test]
    fn test_id_resolver_ambiguous() {
        let mut ids = HashMap::new();
        ids.insert("019430-session-bbq".to_string(), "BBQ".to_string());
        ids.insert("019431-session-brunch".to_string(), "Brunch".to_string());

        let resolver = IdResolver::new(&ids);
        let candidates = resolver.resolve("session").unwrap_err();
        assert_eq!(candidates.len(), 2);
    }

    #[test]
    fn test_id_resolver_no_match() {
        let mut ids = HashMap::new();
        ids.insert("019430-session-bbq".to_string(), "BBQ".to_string());

        let resolver = IdResolver::new(&ids);
        assert_eq!(resolver.resolve("nonexistent").unwrap(), None);
    }
}
