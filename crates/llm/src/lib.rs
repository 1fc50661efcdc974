mod openrouter;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use openrouter::{OpenRouterClient, OpenRouterConfig};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub system_instruction: String,
    pub user_message: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedText {
    pub text: String,
}

/// Every variant is a transport or protocol failure; callers treat them
/// uniformly.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    #[error("text generation backend is not configured")]
    NotConfigured,
    #[error("request to text generation service timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("text generation service returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("text generation service reported an error: {0}")]
    Provider(String),
    #[error("malformed response payload: {0}")]
    MalformedPayload(String),
}

impl From<reqwest::Error> for GenerationError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Transport(err.to_string())
        }
    }
}

pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest)
        -> Result<GeneratedText, GenerationError>;
}

#[derive(Debug, Clone)]
pub enum Generator {
    OpenRouter(OpenRouterClient),
    Unconfigured,
}

impl Generator {
    /// OpenRouter when `OPENROUTER_API_KEY` is set, otherwise a backend
    /// that fails every call.
    pub fn from_env() -> Self {
        match OpenRouterConfig::from_env() {
            Some(config) => Self::OpenRouter(OpenRouterClient::new(config)),
            None => Self::Unconfigured,
        }
    }

    pub fn is_configured(&self) -> bool {
        matches!(self, Self::OpenRouter(_))
    }

    pub fn model(&self) -> Option<&str> {
        match self {
            Self::OpenRouter(client) => Some(client.model()),
            Self::Unconfigured => None,
        }
    }
}

impl TextGenerator for Generator {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GeneratedText, GenerationError> {
        match self {
            Generator::OpenRouter(client) => client.generate(request).await,
            Generator::Unconfigured => Err(GenerationError::NotConfigured),
        }
    }
}
