//! HTTP-backed LLM providers.

use crate::config::ProviderConfig;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use weft_core::agent::{Generation, GenerationOptions, LlmProvider, TokenUsage};
use weft_core::AgentError;

const OPENAI_URL: &str = "https://api.openai.com/v1";
const OPENAI_MODEL: &str = "gpt-4o-mini";
const ANTHROPIC_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_MODEL: &str = "claude-3-haiku-20240307";
const ANTHROPIC_VERSION: &str = "2023-06-01";

fn token_limit(options: &GenerationOptions, cap: Option<u32>) -> u32 {
    match cap {
        Some(cap) => options.max_tokens.min(cap),
        None => options.max_tokens,
    }
}

async fn send_json<T: for<'de> Deserialize<'de>>(
    provider: &str,
    request: reqwest::RequestBuilder,
) -> Result<T, AgentError> {
    let response = request
        .send()
        .await
        .map_err(|e| AgentError::Provider(format!("{} request failed: {}", provider, e)))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        tracing::warn!("{} returned HTTP {}: {}", provider, status, body);
        return Err(AgentError::Provider(format!(
            "{} returned HTTP {}: {}",
            provider, status, body
        )));
    }

    response
        .json::<T>()
        .await
        .map_err(|e| AgentError::InvalidResponse(format!("{}: {}", provider, e)))
}

// OpenAI chat completions

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

pub struct OpenAiProvider {
    http: Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: Option<u32>,
}

impl OpenAiProvider {
    pub const NAME: &'static str = "openai";

    pub fn new(api_key: String, config: &ProviderConfig) -> Self {
        Self {
            http: Client::new(),
            api_key,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| OPENAI_URL.to_string()),
            model: config.model.clone().unwrap_or_else(|| OPENAI_MODEL.to_string()),
            max_tokens: config.max_tokens,
        }
    }
}

#[async_trait::async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<Generation, AgentError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens: token_limit(options, self.max_tokens),
            temperature: options.temperature,
        };

        tracing::debug!("OpenAI request to model {}", self.model);
        let request = self
            .http
            .post(format!("{}/chat/completions", self.base_url.trim_end_matches('/')))
            .bearer_auth(&self.api_key)
            .json(&body);
        let response: ChatResponse = send_json(Self::NAME, request).await?;

        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AgentError::InvalidResponse("openai: no completion choices".to_string()))?;

        Ok(Generation {
            text,
            model: response.model.unwrap_or_else(|| self.model.clone()),
            usage: response.usage.map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            }),
        })
    }
}

// Anthropic messages

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    model: Option<String>,
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<MessagesUsage>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct MessagesUsage {
    input_tokens: u64,
    output_tokens: u64,
}

pub struct AnthropicProvider {
    http: Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: Option<u32>,
}

impl AnthropicProvider {
    pub const NAME: &'static str = "anthropic";

    pub fn new(api_key: String, config: &ProviderConfig) -> Self {
        Self {
            http: Client::new(),
            api_key,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| ANTHROPIC_URL.to_string()),
            model: config
                .model
                .clone()
                .unwrap_or_else(|| ANTHROPIC_MODEL.to_string()),
            max_tokens: config.max_tokens,
        }
    }
}

#[async_trait::async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<Generation, AgentError> {
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: token_limit(options, self.max_tokens),
            temperature: options.temperature,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        tracing::debug!("Anthropic request to model {}", self.model);
        let request = self
            .http
            .post(format!("{}/messages", self.base_url.trim_end_matches('/')))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body);
        let response: MessagesResponse = send_json(Self::NAME, request).await?;

        let text: String = response
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");
        if text.is_empty() {
            return Err(AgentError::InvalidResponse(
                "anthropic: response has no text content".to_string(),
            ));
        }

        Ok(Generation {
            text,
            model: response.model.unwrap_or_else(|| self.model.clone()),
            usage: response.usage.map(|u| TokenUsage {
                prompt_tokens: u.input_tokens,
                completion_tokens: u.output_tokens,
            }),
        })
    }
}
