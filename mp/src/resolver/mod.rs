//! RecipeResolver - turns named dishes into base ingredient lists
//!
//! Resolution branches on the recipe's source type. Results are cached on the
//! Recipe itself, so resolving a complete recipe again returns the cached list
//! without calling any capability. Base quantities are stored unscaled; guest
//! scaling happens once, at aggregation.

use std::sync::Arc;

use futures::StreamExt;
use futures::stream;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::capability::{CapabilityError, IngredientSource, RetryPolicy, call_with_retry};
use crate::domain::{Ingredient, Recipe, RecipeStatus, SourceType};

/// Default number of dishes resolved at once
pub const DEFAULT_MAX_CONCURRENT: usize = 8;

/// Why a dish has no ingredient list
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("could not generate ingredients for '{dish}': {source}")]
    Generation { dish: String, source: CapabilityError },

    #[error("could not read the recipe for '{dish}': {source}")]
    Extraction { dish: String, source: CapabilityError },

    #[error("no ingredients found in the recipe for '{dish}'")]
    EmptyExtraction { dish: String },

    #[error("waiting for the recipe for '{dish}'")]
    MissingArtifact { dish: String },

    #[error("'{dish}' needs a specific name before ingredients can be found")]
    Placeholder { dish: String },
}

impl ResolveError {
    /// What the user can do about it
    pub fn action(&self) -> &'static str {
        match self {
            Self::Generation { .. } => "provide the recipe manually or mark it store-bought",
            Self::Extraction { .. } | Self::EmptyExtraction { .. } => {
                "try a different link, photo or description, or list the ingredients"
            }
            Self::MissingArtifact { .. } => "share the recipe or list the ingredients",
            Self::Placeholder { .. } => "name the dish",
        }
    }

    /// The error followed by what to do about it
    pub fn user_message(&self) -> String {
        format!("{}; {}", self, self.action())
    }
}

/// Outcome of resolving one recipe
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Resolved {
        ingredients: Vec<Ingredient>,
        source_type: SourceType,
        /// Returned from the recipe without calling a capability
        cached: bool,
    },
    /// Store-bought dishes never need ingredients
    StoreBought,
    /// Recoverable; the user has to supply something
    AwaitingInput(ResolveError),
    Failed(ResolveError),
}

impl Resolution {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved { .. } | Self::StoreBought)
    }

    pub fn error(&self) -> Option<&ResolveError> {
        match self {
            Self::AwaitingInput(e) | Self::Failed(e) => Some(e),
            _ => None,
        }
    }

    /// Write the outcome onto the recipe it was computed for
    pub fn apply_to(&self, recipe: &mut Recipe) {
        debug!(dish = %recipe.name, "Resolution::apply_to: called");
        match self {
            Self::Resolved { cached: true, .. } => {}
            Self::Resolved {
                ingredients,
                source_type,
                cached: false,
            } => {
                recipe.complete_with(ingredients.clone(), *source_type);
            }
            Self::StoreBought => {
                if recipe.status != RecipeStatus::Placeholder {
                    recipe.status = RecipeStatus::Complete;
                    recipe.awaiting_user_input = false;
                }
            }
            Self::AwaitingInput(e) | Self::Failed(e) => {
                // keep the first, more specific reason while nothing has changed
                if recipe.awaiting_user_input && recipe.last_resolution_error.is_some() {
                    return;
                }
                recipe.mark_awaiting_input(e.user_message());
            }
        }
    }
}

/// Per-dish ingredient resolution over an opaque ingredient source
#[derive(Clone)]
pub struct RecipeResolver {
    source: Arc<dyn IngredientSource>,
    retry: RetryPolicy,
    max_concurrent: usize,
}

impl RecipeResolver {
    pub fn new(source: Arc<dyn IngredientSource>, retry: RetryPolicy) -> Self {
        Self {
            source,
            retry,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
        }
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    /// Resolve one recipe; safe to call repeatedly
    pub async fn resolve(&self, recipe: &Recipe) -> Resolution {
        debug!(dish = %recipe.name, source_type = %recipe.source_type, "resolve: called");

        if recipe.is_store_bought() {
            debug!(dish = %recipe.name, "resolve: store-bought, nothing to resolve");
            return Resolution::StoreBought;
        }
        if recipe.is_resolved() {
            debug!(dish = %recipe.name, "resolve: returning cached ingredients");
            return Resolution::Resolved {
                ingredients: recipe.ingredients.clone(),
                source_type: recipe.source_type,
                cached: true,
            };
        }
        let dish = recipe.name.clone();
        if recipe.status == RecipeStatus::Placeholder {
            return Resolution::Failed(ResolveError::Placeholder { dish });
        }

        match recipe.source_type {
            SourceType::AiDefault => {
                if recipe.awaiting_user_input {
                    debug!(%dish, "resolve: awaiting user input, skipping default generation");
                    return Resolution::AwaitingInput(ResolveError::MissingArtifact { dish });
                }
                self.generate(dish).await
            }
            SourceType::UserUrl | SourceType::UserUpload | SourceType::UserDescription => match &recipe.artifact {
                // this artifact already failed; a new one clears the flag
                Some(_) if recipe.awaiting_user_input => {
                    debug!(%dish, "resolve: artifact already failed, waiting for a new one");
                    Resolution::AwaitingInput(ResolveError::EmptyExtraction { dish })
                }
                Some(_) => self.extract(recipe).await,
                None => Resolution::AwaitingInput(ResolveError::MissingArtifact { dish }),
            },
        }
    }

    async fn generate(&self, dish: String) -> Resolution {
        let source = &self.source;
        let name = dish.as_str();
        let result = call_with_retry(&self.retry, "generate_default_ingredients", move || {
            source.generate_default_ingredients(name)
        })
        .await;

        match result {
            Ok(ingredients) if !ingredients.is_empty() => {
                info!(%dish, count = ingredients.len(), "resolve: generated default ingredients");
                Resolution::Resolved {
                    ingredients,
                    source_type: SourceType::AiDefault,
                    cached: false,
                }
            }
            Ok(_) => {
                warn!(%dish, "resolve: generation returned no ingredients");
                Resolution::Failed(ResolveError::Generation {
                    dish,
                    source: CapabilityError::Malformed("empty ingredient list".to_string()),
                })
            }
            Err(source) => {
                warn!(%dish, error = %source, "resolve: generation failed");
                Resolution::Failed(ResolveError::Generation { dish, source })
            }
        }
    }

    async fn extract(&self, recipe: &Recipe) -> Resolution {
        let dish = recipe.name.clone();
        let Some(artifact) = recipe.artifact.as_ref() else {
            return Resolution::AwaitingInput(ResolveError::MissingArtifact { dish });
        };
        let source = &self.source;
        let name = dish.as_str();
        let result = call_with_retry(&self.retry, "extract_from_artifact", move || {
            source.extract_from_artifact(name, artifact)
        })
        .await;

        match result {
            Ok(ingredients) if !ingredients.is_empty() => {
                info!(%dish, count = ingredients.len(), "resolve: extracted ingredients from artifact");
                Resolution::Resolved {
                    ingredients,
                    source_type: artifact.source_type(),
                    cached: false,
                }
            }
            Ok(_) | Err(CapabilityError::NoData) => {
                warn!(%dish, label = %artifact.label(), "resolve: artifact yielded no ingredients");
                Resolution::AwaitingInput(ResolveError::EmptyExtraction { dish })
            }
            Err(source) => {
                warn!(%dish, error = %source, "resolve: extraction failed");
                Resolution::Failed(ResolveError::Extraction { dish, source })
            }
        }
    }

    /// Resolve every recipe concurrently and wait for all of them
    ///
    /// Completion order is irrelevant; results are returned in input order.
    /// One dish failing never affects another dish's result.
    pub async fn resolve_all(&self, recipes: &[Recipe]) -> Vec<(String, Resolution)> {
        debug!(count = recipes.len(), max_concurrent = self.max_concurrent, "resolve_all: called");
        let futures: Vec<_> = recipes
            .iter()
            .enumerate()
            .map(|(idx, recipe)| async move { (idx, recipe.name.clone(), self.resolve(recipe).await) })
            .collect();
        let mut results: Vec<(usize, String, Resolution)> = stream::iter(futures)
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;
        results.sort_by_key(|(idx, _, _)| *idx);
        results.into_iter().map(|(_, name, resolution)| (name, resolution)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::ScriptedSource;
    use crate::domain::{GroceryCategory, PreparationMethod, RecipeArtifact};
    use std::time::Duration;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_millis(200),
            max_retries: 1,
            initial_backoff: Duration::from_millis(1),
        }
    }

    fn chicken() -> Vec<Ingredient> {
        vec![Ingredient::new("chicken thighs", 2.0, "lb", GroceryCategory::Proteins)]
    }

    #[tokio::test]
    async fn test_ai_default_success_completes_recipe() {
        let source = Arc::new(ScriptedSource::new().with_dish("Grilled Chicken", chicken()));
        let resolver = RecipeResolver::new(source.clone(), policy());
        let mut recipe = Recipe::new("Grilled Chicken");

        let resolution = resolver.resolve(&recipe).await;
        resolution.apply_to(&mut recipe);
        assert_eq!(recipe.status, RecipeStatus::Complete);
        assert_eq!(recipe.source_type, SourceType::AiDefault);

        // cached on the second call
        let again = resolver.resolve(&recipe).await;
        assert!(matches!(again, Resolution::Resolved { cached: true, .. }));
        assert_eq!(source.calls_for("Grilled Chicken"), 1);
    }

    #[tokio::test]
    async fn test_generation_failure_sets_awaiting_input() {
        let source = Arc::new(ScriptedSource::new().with_failure("Souffle", CapabilityError::Malformed("?".into())));
        let resolver = RecipeResolver::new(source.clone(), policy());
        let mut recipe = Recipe::new("Souffle");

        let resolution = resolver.resolve(&recipe).await;
        assert!(matches!(resolution, Resolution::Failed(ResolveError::Generation { .. })));
        resolution.apply_to(&mut recipe);
        assert!(recipe.awaiting_user_input);
        assert!(recipe.last_resolution_error.is_some());

        // not regenerated while waiting on the user
        let again = resolver.resolve(&recipe).await;
        assert!(matches!(again, Resolution::AwaitingInput(_)));
        assert_eq!(source.calls_for("Souffle"), 1);
    }

    #[tokio::test]
    async fn test_empty_artifact_extraction_is_recoverable() {
        let source = Arc::new(ScriptedSource::new());
        let resolver = RecipeResolver::new(source.clone(), policy());
        let mut recipe = Recipe::new("Chili");
        recipe.attach_artifact(RecipeArtifact::Url {
            url: "https://x.test/blank".to_string(),
        });

        let resolution = resolver.resolve(&recipe).await;
        assert!(matches!(
            resolution,
            Resolution::AwaitingInput(ResolveError::EmptyExtraction { .. })
        ));
        resolution.apply_to(&mut recipe);
        assert!(recipe.awaiting_user_input);
        assert_eq!(recipe.status, RecipeStatus::Named);

        // the same artifact is not extracted twice
        resolver.resolve(&recipe).await.apply_to(&mut recipe);
        assert_eq!(source.total_calls(), 1);
        assert!(recipe.last_resolution_error.as_deref().unwrap().contains("no ingredients found"));
    }

    #[tokio::test]
    async fn test_artifact_extraction_sets_source_type() {
        let source = Arc::new(ScriptedSource::new().with_artifact("https://x.test/chili", chicken()));
        let resolver = RecipeResolver::new(source, policy());
        let mut recipe = Recipe::new("Chili");
        recipe.attach_artifact(RecipeArtifact::Url {
            url: "https://x.test/chili".to_string(),
        });

        resolver.resolve(&recipe).await.apply_to(&mut recipe);
        assert_eq!(recipe.status, RecipeStatus::Complete);
        assert_eq!(recipe.source_type, SourceType::UserUrl);
    }

    #[tokio::test]
    async fn test_store_bought_never_calls_source() {
        let source = Arc::new(ScriptedSource::new());
        let resolver = RecipeResolver::new(source.clone(), policy());
        let mut recipe = Recipe::new("Baguette");
        recipe.set_preparation(PreparationMethod::StoreBought);

        assert_eq!(resolver.resolve(&recipe).await, Resolution::StoreBought);
        assert_eq!(source.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_placeholder_fails() {
        let resolver = RecipeResolver::new(Arc::new(ScriptedSource::new()), policy());
        let recipe = Recipe::placeholder("main");
        assert!(matches!(
            resolver.resolve(&recipe).await,
            Resolution::Failed(ResolveError::Placeholder { .. })
        ));
    }

    #[tokio::test]
    async fn test_resolve_all_isolates_failures() {
        let source = Arc::new(
            ScriptedSource::new()
                .with_dish("Chicken", chicken())
                .with_hang("Slow Roast")
                .with_dish("Salad", vec![Ingredient::new("lettuce", 1.0, "head", GroceryCategory::Produce)]),
        );
        let resolver = RecipeResolver::new(source, policy()).with_max_concurrent(2);
        let recipes = vec![Recipe::new("Chicken"), Recipe::new("Slow Roast"), Recipe::new("Salad")];

        let results = resolver.resolve_all(&recipes).await;
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].0, "Chicken");
        assert!(results[0].1.is_resolved());
        assert!(matches!(
            &results[1].1,
            Resolution::Failed(ResolveError::Generation {
                source: CapabilityError::Timeout(_),
                ..
            })
        ));
        assert!(results[2].1.is_resolved());
    }
}
