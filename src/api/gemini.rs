//! Gemini wire protocol (v1beta `generateContent`, non-streaming).

use crate::api::{
    Completion, GeneratedImage, GroundingSource, ProviderAdapter, ProviderFailure, ReportedUsage,
    RequestOptions,
};
use crate::core::message::{Message, Role};
use crate::utils::url::normalize_base_url;
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl GeminiAdapter {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: normalize_base_url(base_url),
        }
    }

    /// Auth rides as a query parameter, not a header.
    fn request_url(&self, model_id: &str, api_key: &str) -> String {
        format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, model_id, api_key
        )
    }

    async fn post(
        &self,
        model_id: &str,
        api_key: &str,
        body: &GeminiRequest,
    ) -> Result<GeminiResponse, ProviderFailure> {
        let response = self
            .client
            .post(self.request_url(model_id, api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|err| ProviderFailure::transport(&err))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderFailure::from_body(status.as_u16(), &body));
        }

        response
            .json::<GeminiResponse>()
            .await
            .map_err(|err| ProviderFailure::malformed(err))
    }
}

impl Default for GeminiAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<GeminiInlineData>,
}

impl GeminiPart {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            inline_data: None,
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiInlineData {
    mime_type: String,
    data: String,
}

#[derive(Serialize, Deserialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiSystemInstruction {
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiThinkingConfig {
    thinking_budget: i32,
}

#[derive(Serialize, Default)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking_config: Option<GeminiThinkingConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_modalities: Option<Vec<&'static str>>,
}

impl GeminiGenerationConfig {
    fn is_default(&self) -> bool {
        self.thinking_config.is_none() && self.response_modalities.is_none()
    }
}

#[derive(Serialize)]
struct GeminiGoogleSearch {}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiTool {
    google_search: GeminiGoogleSearch,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiSystemInstruction>,
    #[serde(skip_serializing_if = "GeminiGenerationConfig::is_default")]
    generation_config: GeminiGenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<GeminiTool>>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    usage_metadata: Option<GeminiUsageMetadata>,
    #[serde(default)]
    response_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContent>,
    #[serde(default)]
    finish_reason: Option<String>,
    #[serde(default)]
    grounding_metadata: Option<GeminiGroundingMetadata>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct GeminiGroundingMetadata {
    #[serde(default)]
    grounding_chunks: Vec<GeminiGroundingChunk>,
    #[serde(default)]
    web_search_queries: Vec<String>,
}

#[derive(Deserialize)]
struct GeminiGroundingChunk {
    #[serde(default)]
    web: Option<GeminiWebSource>,
}

#[derive(Deserialize)]
struct GeminiWebSource {
    uri: String,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

/// Map the transcript onto Gemini contents. Gemini only knows "user" and
/// "model" roles; system messages become the system instruction.
fn build_chat_request(history: &[Message], options: &RequestOptions) -> GeminiRequest {
    let mut contents = Vec::new();
    let mut system_parts = Vec::new();

    for message in history {
        if message.role == Role::System {
            system_parts.push(GeminiPart::text(&message.content));
            continue;
        }

        let role = if message.is_assistant() { "model" } else { "user" };
        let mut parts = vec![GeminiPart::text(&message.content)];
        for attachment in &message.attachments {
            parts.push(GeminiPart {
                text: None,
                inline_data: Some(GeminiInlineData {
                    mime_type: attachment.mime.clone(),
                    data: base64::engine::general_purpose::STANDARD.encode(&attachment.bytes),
                }),
            });
        }
        contents.push(GeminiContent {
            role: role.to_string(),
            parts,
        });
    }

    GeminiRequest {
        contents,
        system_instruction: if system_parts.is_empty() {
            None
        } else {
            Some(GeminiSystemInstruction {
                parts: system_parts,
            })
        },
        generation_config: GeminiGenerationConfig {
            thinking_config: options
                .thinking
                .then_some(GeminiThinkingConfig { thinking_budget: -1 }),
            response_modalities: None,
        },
        tools: options.web_search.then(|| {
            vec![GeminiTool {
                google_search: GeminiGoogleSearch {},
            }]
        }),
    }
}

fn build_image_request(prompt: &str) -> GeminiRequest {
    GeminiRequest {
        contents: vec![GeminiContent {
            role: "user".to_string(),
            parts: vec![GeminiPart::text(prompt)],
        }],
        system_instruction: None,
        generation_config: GeminiGenerationConfig {
            thinking_config: None,
            response_modalities: Some(vec!["TEXT", "IMAGE"]),
        },
        tools: None,
    }
}

fn parse_completion(response: GeminiResponse) -> Result<Completion, ProviderFailure> {
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| ProviderFailure::malformed("no candidates in response"))?;

    let content = candidate
        .content
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    let (sources, search_suggestions) = match candidate.grounding_metadata {
        Some(metadata) => (
            metadata
                .grounding_chunks
                .into_iter()
                .filter_map(|chunk| chunk.web)
                .map(|web| GroundingSource {
                    url: web.uri,
                    title: web.title,
                })
                .collect(),
            metadata.web_search_queries,
        ),
        None => (Vec::new(), Vec::new()),
    };

    Ok(Completion {
        content,
        finish_reason: candidate.finish_reason,
        id: response.response_id,
        sources,
        search_suggestions,
        usage: response.usage_metadata.map(|usage| ReportedUsage {
            prompt_tokens: usage.prompt_token_count,
            completion_tokens: usage.candidates_token_count,
        }),
    })
}

fn parse_image(response: GeminiResponse) -> Result<GeneratedImage, ProviderFailure> {
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| ProviderFailure::malformed("no candidates in response"))?;
    let parts = candidate
        .content
        .map(|content| content.parts)
        .unwrap_or_default();

    let mut caption = None;
    let mut data_url = None;
    for part in parts {
        if let Some(text) = part.text {
            if !text.is_empty() {
                caption = Some(text);
            }
        }
        if let Some(inline) = part.inline_data {
            data_url = Some(format!("data:{};base64,{}", inline.mime_type, inline.data));
        }
    }

    match data_url {
        Some(data_url) => Ok(GeneratedImage { data_url, caption }),
        None => Err(ProviderFailure::malformed("no image data in response")),
    }
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    async fn complete(
        &self,
        api_key: &str,
        model_id: &str,
        history: &[Message],
        options: &RequestOptions,
    ) -> Result<Completion, ProviderFailure> {
        let request = build_chat_request(history, options);
        let response = self.post(model_id, api_key, &request).await?;
        parse_completion(response)
    }

    async fn generate_image(
        &self,
        api_key: &str,
        model_id: &str,
        prompt: &str,
    ) -> Result<GeneratedImage, ProviderFailure> {
        let request = build_image_request(prompt);
        let response = self.post(model_id, api_key, &request).await?;
        parse_image(response)
    }
}
