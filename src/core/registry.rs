//! Model catalog
//!
//! This module owns the immutable catalog of callable models, loaded from
//! the builtin_models.toml file embedded at build time. Capability flags
//! and rate-limit ceilings live here; usage counters live in
//! [`crate::core::usage`] so the catalog itself never mutates.

use serde::{Deserialize, Serialize};

/// Upstream provider wire protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Provider {
    Gemini,
    OpenRouter,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Gemini => "gemini",
            Provider::OpenRouter => "openrouter",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Provider::Gemini => "Gemini",
            Provider::OpenRouter => "OpenRouter",
        }
    }

    /// Whether the provider accepts more than one credential, making key
    /// rotation meaningful on rate-limit failures.
    pub fn multi_key(self) -> bool {
        matches!(self, Provider::Gemini)
    }
}

impl AsRef<str> for Provider {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl TryFrom<&str> for Provider {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "gemini" => Ok(Provider::Gemini),
            "openrouter" => Ok(Provider::OpenRouter),
            _ => Err(format!("invalid provider: {value}")),
        }
    }
}

impl TryFrom<String> for Provider {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

impl From<Provider> for String {
    fn from(value: Provider) -> Self {
        value.as_str().to_string()
    }
}

/// Published ceilings for a model. Per-minute figures are descriptive
/// metadata for UIs; only per-day ceilings gate routing decisions.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RateLimits {
    #[serde(default)]
    pub requests_per_minute: Option<u32>,
    #[serde(default)]
    pub requests_per_day: Option<u32>,
    #[serde(default)]
    pub tokens_per_minute: Option<u64>,
    #[serde(default)]
    pub tokens_per_day: Option<u64>,
}

/// Descriptor of a callable LLM endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Model {
    pub id: String,
    pub name: String,
    pub provider: Provider,
    pub model_id: String,
    /// Accepts image attachments.
    #[serde(default)]
    pub vision: bool,
    #[serde(default)]
    pub thinking: bool,
    #[serde(default)]
    pub web_search: bool,
    #[serde(default)]
    pub image_generation: bool,
    #[serde(default)]
    pub rate_limits: Option<RateLimits>,
    #[serde(default)]
    pub fallback_model_id: Option<String>,
}

impl Model {
    /// The minimal identifying subset persisted in place of the full
    /// descriptor; capabilities and limits are reconstructed from the
    /// registry on load.
    pub fn model_ref(&self) -> ModelRef {
        ModelRef {
            id: self.id.clone(),
            name: self.name.clone(),
            provider: self.provider,
            model_id: self.model_id.clone(),
        }
    }
}

/// Persisted reduction of a [`Model`]: just enough to rehydrate through the
/// registry and to label messages in a transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelRef {
    pub id: String,
    pub name: String,
    pub provider: Provider,
    pub model_id: String,
}

#[derive(Deserialize)]
struct ModelCatalog {
    default_model: String,
    models: Vec<Model>,
}

/// Immutable model catalog with a designated default.
#[derive(Debug)]
pub struct ModelRegistry {
    models: Vec<Model>,
    default_id: String,
}

impl ModelRegistry {
    /// Load the catalog embedded in the binary.
    pub fn builtin() -> Self {
        const CATALOG_CONTENT: &str = include_str!("../builtin_models.toml");

        let catalog: ModelCatalog =
            toml::from_str(CATALOG_CONTENT).expect("Failed to parse builtin_models.toml");
        Self::new(catalog.models, catalog.default_model)
    }

    /// Build a registry from explicit entries. Panics if `default_id` does
    /// not name one of `models`; a catalog without a resolvable default
    /// would break the total-lookup contract of [`Self::model_by_id`].
    pub fn new(models: Vec<Model>, default_id: impl Into<String>) -> Self {
        let default_id = default_id.into();
        assert!(
            models.iter().any(|m| m.id == default_id),
            "default model '{default_id}' is not in the catalog"
        );
        Self { models, default_id }
    }

    /// Look up a model by its local id. Unknown ids resolve to the default
    /// model, so this never fails.
    pub fn model_by_id(&self, id: &str) -> &Model {
        self.models
            .iter()
            .find(|m| m.id == id)
            .unwrap_or_else(|| self.default_model())
    }

    pub fn default_model(&self) -> &Model {
        self.models
            .iter()
            .find(|m| m.id == self.default_id)
            .expect("registry invariant: default model exists")
    }

    pub fn models(&self) -> &[Model] {
        &self.models
    }

    /// Models for one provider, in catalog order.
    pub fn models_for_provider(&self, provider: Provider) -> Vec<&Model> {
        self.models
            .iter()
            .filter(|m| m.provider == provider)
            .collect()
    }

    /// First image-generation-capable model, preferring the given provider.
    pub fn image_capable(&self, preferred: Provider) -> Option<&Model> {
        self.models
            .iter()
            .find(|m| m.image_generation && m.provider == preferred)
            .or_else(|| self.models.iter().find(|m| m.image_generation))
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}
