//! Provider adapters.
//!
//! One adapter per backend wire protocol, each exposing a uniform async
//! completion call and a uniform image-generation call. The orchestrator
//! talks to adapters exclusively through [`ProviderAdapter`], so tests can
//! substitute mocks at this seam.

use crate::core::message::Message;
use async_trait::async_trait;
use std::error::Error as StdError;
use std::fmt;

mod gemini;
mod openrouter;

pub use gemini::GeminiAdapter;
pub use openrouter::OpenRouterAdapter;

/// Feature flags for one request, already gated by both the settings
/// toggles and the model's capability flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestOptions {
    pub thinking: bool,
    pub web_search: bool,
}

/// A web source the provider grounded its answer in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroundingSource {
    pub url: String,
    pub title: Option<String>,
}

/// Token counts as reported by the provider, when it reports them. Usage
/// tracking works from a local estimate; these are surfaced for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportedUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// A finalized (non-streaming) completion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub content: String,
    pub finish_reason: Option<String>,
    pub id: Option<String>,
    pub sources: Vec<GroundingSource>,
    pub search_suggestions: Vec<String>,
    pub usage: Option<ReportedUsage>,
}

/// A generated image as a data URL, plus any caption text the provider
/// returned alongside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub data_url: String,
    pub caption: Option<String>,
}

/// Failure from a provider call. The message is preserved verbatim enough
/// for classification: rate-limit failures carry "429", "RESOURCE_EXHAUSTED"
/// or "quota"; auth failures mention "API key".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderFailure {
    pub status: Option<u16>,
    pub message: String,
}

impl ProviderFailure {
    pub fn transport(err: &reqwest::Error) -> Self {
        Self {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }

    /// Build a failure from a non-2xx response body, preferring the
    /// provider's own error summary when the body parses as JSON.
    pub fn from_body(status: u16, body: &str) -> Self {
        let message = error_summary(body).unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                format!("HTTP {status}")
            } else {
                format!("HTTP {status}: {trimmed}")
            }
        });
        Self {
            status: Some(status),
            message,
        }
    }

    pub fn malformed(detail: impl fmt::Display) -> Self {
        Self {
            status: None,
            message: format!("malformed provider response: {detail}"),
        }
    }

    pub fn is_rate_limit(&self) -> bool {
        self.status == Some(429)
            || self.message.contains("429")
            || self.message.contains("RESOURCE_EXHAUSTED")
            || self.message.to_lowercase().contains("quota")
    }

    pub fn is_auth(&self) -> bool {
        self.message.contains("API key")
    }
}

impl fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "provider error ({status}): {}", self.message),
            None => write!(f, "provider error: {}", self.message),
        }
    }
}

impl StdError for ProviderFailure {}

/// Pull a human-readable summary out of a provider error body, whichever of
/// the common shapes it uses.
fn error_summary(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body.trim()).ok()?;
    let summary = value
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .or_else(|| {
            value.get("error").and_then(|v| match v {
                serde_json::Value::String(s) => Some(s.clone()),
                _ => None,
            })
        })
        .or_else(|| {
            value
                .get("message")
                .and_then(|v| v.as_str().map(str::to_owned))
        })?;

    let collapsed = summary.split_whitespace().collect::<Vec<_>>().join(" ");
    let status = value.pointer("/error/status").and_then(|v| v.as_str());
    Some(match status {
        Some(status) => format!("{collapsed} ({status})"),
        None => collapsed,
    })
}

/// Uniform surface over one backend wire protocol.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    async fn complete(
        &self,
        api_key: &str,
        model_id: &str,
        history: &[Message],
        options: &RequestOptions,
    ) -> Result<Completion, ProviderFailure>;

    async fn generate_image(
        &self,
        api_key: &str,
        model_id: &str,
        prompt: &str,
    ) -> Result<GeneratedImage, ProviderFailure>;
}
