//! OpenRouter wire protocol (OpenAI-style `chat/completions`, non-streaming).

use crate::api::{
    Completion, GeneratedImage, ProviderAdapter, ProviderFailure, ReportedUsage, RequestOptions,
};
use crate::core::message::Message;
use crate::utils::url::construct_api_url;
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
const REFERER: &str = "https://mimir.chat";
const APP_TITLE: &str = "Mimir";

pub struct OpenRouterAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl OpenRouterAdapter {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.to_string(),
        }
    }

    async fn post(
        &self,
        api_key: &str,
        body: &OpenRouterRequest,
    ) -> Result<OpenRouterResponse, ProviderFailure> {
        let url = construct_api_url(&self.base_url, "chat/completions");
        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {api_key}"))
            .header("HTTP-Referer", REFERER)
            .header("X-Title", APP_TITLE)
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
            .json::<OpenRouterResponse>()
            .await
            .map_err(|err| ProviderFailure::malformed(err))
    }
}

impl Default for OpenRouterAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct OpenRouterMessage {
    role: String,
    content: Value,
}

#[derive(Serialize)]
struct OpenRouterPlugin {
    id: &'static str,
}

#[derive(Serialize)]
struct OpenRouterReasoning {
    enabled: bool,
}

#[derive(Serialize)]
struct OpenRouterRequest {
    model: String,
    messages: Vec<OpenRouterMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    plugins: Option<Vec<OpenRouterPlugin>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning: Option<OpenRouterReasoning>,
    #[serde(skip_serializing_if = "Option::is_none")]
    modalities: Option<Vec<&'static str>>,
}

#[derive(Deserialize, Default)]
struct OpenRouterResponse {
    #[serde(default)]
    choices: Vec<OpenRouterChoice>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    usage: Option<OpenRouterUsage>,
}

#[derive(Deserialize)]
struct OpenRouterChoice {
    message: OpenRouterResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct OpenRouterResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    images: Vec<OpenRouterImage>,
}

#[derive(Deserialize)]
struct OpenRouterImage {
    image_url: OpenRouterImageUrl,
}

#[derive(Deserialize)]
struct OpenRouterImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct OpenRouterUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// Plain text stays a string; messages with image attachments become an
/// array of content parts with inline data URLs.
fn message_content(message: &Message) -> Value {
    let images: Vec<&crate::core::message::Attachment> = message
        .attachments
        .iter()
        .filter(|attachment| attachment.is_image())
        .collect();
    if images.is_empty() {
        return Value::String(message.content.clone());
    }

    let mut parts = vec![serde_json::json!({"type": "text", "text": message.content})];
    for attachment in images {
        let data_url = format!(
            "data:{};base64,{}",
            attachment.mime,
            base64::engine::general_purpose::STANDARD.encode(&attachment.bytes)
        );
        parts.push(serde_json::json!({
            "type": "image_url",
            "image_url": {"url": data_url}
        }));
    }
    Value::Array(parts)
}

fn build_chat_request(
    model_id: &str,
    history: &[Message],
    options: &RequestOptions,
) -> OpenRouterRequest {
    OpenRouterRequest {
        model: model_id.to_string(),
        messages: history
            .iter()
            .map(|message| OpenRouterMessage {
                role: message.role.as_str().to_string(),
                content: message_content(message),
            })
            .collect(),
        stream: false,
        plugins: options
            .web_search
            .then(|| vec![OpenRouterPlugin { id: "web" }]),
        reasoning: options
            .thinking
            .then_some(OpenRouterReasoning { enabled: true }),
        modalities: None,
    }
}

fn build_image_request(model_id: &str, prompt: &str) -> OpenRouterRequest {
    OpenRouterRequest {
        model: model_id.to_string(),
        messages: vec![OpenRouterMessage {
            role: "user".to_string(),
            content: Value::String(prompt.to_string()),
        }],
        stream: false,
        plugins: None,
        reasoning: None,
        modalities: Some(vec!["image", "text"]),
    }
}

fn parse_completion(response: OpenRouterResponse) -> Result<Completion, ProviderFailure> {
    let id = response.id;
    let usage = response.usage;
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderFailure::malformed("no choices in response"))?;

    Ok(Completion {
        content: choice.message.content.unwrap_or_default(),
        finish_reason: choice.finish_reason,
        id,
        sources: Vec::new(),
        search_suggestions: Vec::new(),
        usage: usage.map(|usage| ReportedUsage {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
        }),
    })
}

fn parse_image(response: OpenRouterResponse) -> Result<GeneratedImage, ProviderFailure> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderFailure::malformed("no choices in response"))?;

    let caption = choice.message.content.filter(|text| !text.is_empty());
    let image = choice
        .message
        .images
        .into_iter()
        .next()
        .ok_or_else(|| ProviderFailure::malformed("no image data in response"))?;

    Ok(GeneratedImage {
        data_url: image.image_url.url,
        caption,
    })
}

#[async_trait]
impl ProviderAdapter for OpenRouterAdapter {
    async fn complete(
        &self,
        api_key: &str,
        model_id: &str,
        history: &[Message],
        options: &RequestOptions,
    ) -> Result<Completion, ProviderFailure> {
        let request = build_chat_request(model_id, history, options);
        let response = self.post(api_key, &request).await?;
        parse_completion(response)
    }

    async fn generate_image(
        &self,
        api_key: &str,
        model_id: &str,
        prompt: &str,
    ) -> Result<GeneratedImage, ProviderFailure> {
        let request = build_image_request(model_id, prompt);
        let response = self.post(api_key, &request).await?;
        parse_image(response)
    }
}
