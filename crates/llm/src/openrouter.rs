use std::env;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::{GeneratedText, GenerationError, GenerationRequest, TextGenerator};

pub const DEFAULT_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "openai/gpt-3.5-turbo";
const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

#[derive(Debug, Clone)]
pub struct OpenRouterConfig {
    pub api_key: String,
    pub api_url: String,
    pub model: String,
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl OpenRouterConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_url: DEFAULT_API_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECONDS),
            connect_timeout: Duration::from_secs(6),
        }
    }

    pub fn from_env() -> Option<Self> {
        let api_key = env::var("OPENROUTER_API_KEY")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())?;

        let mut config = Self::new(api_key);
        if let Some(url) = non_empty_var("OPENROUTER_API_URL") {
            config.api_url = url;
        }
        if let Some(model) = non_empty_var("MODEL_NAME") {
            config.model = model;
        }
        if let Some(seconds) = env::var("SOP_GENERATION_TIMEOUT_SECONDS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|seconds| *seconds > 0)
        {
            config.timeout = Duration::from_secs(seconds);
        }
        Some(config)
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// OpenAI-compatible chat-completions client. Each call builds and drops
/// its own HTTP client, so nothing is held between requests.
#[derive(Debug, Clone)]
pub struct OpenRouterClient {
    config: OpenRouterConfig,
}

impl OpenRouterClient {
    pub fn new(config: OpenRouterConfig) -> Self {
        Self { config }
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn payload(&self, request: &GenerationRequest) -> serde_json::Value {
        serde_json::json!({
            "model": self.config.model,
            "messages": [
                { "role": "system", "content": request.system_instruction },
                { "role": "user", "content": request.user_message }
            ],
            "temperature": request.temperature,
            "max_tokens": request.max_output_tokens,
        })
    }
}

impl TextGenerator for OpenRouterClient {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GeneratedText, GenerationError> {
        let client = Client::builder()
            .connect_timeout(self.config.connect_timeout)
            .timeout(self.config.timeout)
            .build()?;

        debug!(
            model = %self.config.model,
            temperature = request.temperature,
            max_tokens = request.max_output_tokens,
            "sending chat completion request"
        );

        let response = client
            .post(self.config.api_url.as_str())
            .bearer_auth(self.config.api_key.as_str())
            .json(&self.payload(request))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.bytes().await?;
        let text = extract_completion_text(&body)?;
        Ok(GeneratedText { text })
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    error: Option<ProviderError>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProviderError {
    message: String,
}

fn extract_completion_text(body: &[u8]) -> Result<String, GenerationError> {
    let completion: ChatCompletion = serde_json::from_slice(body)
        .map_err(|err| GenerationError::MalformedPayload(err.to_string()))?;

    if let Some(error) = completion.error {
        return Err(GenerationError::Provider(error.message));
    }

    completion
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| GenerationError::MalformedPayload("missing choices[0].message.content".to_string()))
}
