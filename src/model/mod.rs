//! Selected model, persisted independently of conversations.

use crate::storage::StorageFacade;

/// Storage key for the selected model name.
pub const MODEL_KEY: &str = "ollamaModel";
/// Model used until the user picks one.
pub const DEFAULT_MODEL: &str = "llama3.1";

#[derive(Debug, Clone)]
pub struct ModelSelection {
    storage: StorageFacade,
    current: String,
}

impl ModelSelection {
    /// Load the saved selection, falling back to [`DEFAULT_MODEL`].
    pub fn load(storage: StorageFacade) -> Self {
        Self::load_with_default(storage, DEFAULT_MODEL)
    }

    /// Load the saved selection, falling back to `default`.
    pub fn load_with_default(storage: StorageFacade, default: &str) -> Self {
        let current = storage.get(MODEL_KEY, default.to_string());
        Self { storage, current }
    }

    pub fn current(&self) -> &str {
        &self.current
    }

    /// Update the selection and write it through to storage.
    pub fn save(&mut self, model: impl Into<String>) {
        self.current = model.into();
        self.storage.set(MODEL_KEY, &self.current);
        tracing::debug!(model = %self.current, "Saved model selection");
    }

    /// Pick the model to use from what the server actually has.
    ///
    /// Prefers the saved name, then the first model whose name starts with it
    /// (`llama3.1` matches `llama3.1:8b`), then the first listed model.
    /// Returns `None` for an empty list. Does not write to storage.
    #[must_use]
    pub fn resolve_available<'a>(&self, models: &'a [String]) -> Option<&'a str> {
        let first = models.first()?;

        if self.current.is_empty() {
            return Some(first.as_str());
        }

        models
            .iter()
            .find(|m| **m == self.current)
            .or_else(|| models.iter().find(|m| m.starts_with(&self.current)))
            .or(Some(first))
            .map(String::as_str)
    }
}
