use std::env;
use std::path::PathBuf;
use std::time::Duration;

use sop_agents::LoopSettings;
use sop_llm::{Generator, OpenRouterClient, OpenRouterConfig};

const DEFAULT_BIND: &str = "0.0.0.0:8000";
const DEFAULT_ORIGINS: [&str; 5] = [
    "http://localhost:5173",
    "http://127.0.0.1:5173",
    "http://localhost:5174",
    "http://127.0.0.1:5174",
    "http://localhost:3000",
];

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind: String,
    pub database_url: Option<String>,
    pub docs_root: Option<PathBuf>,
    pub allowed_origins: Vec<String>,
    pub rate_limit_window: Duration,
    pub rate_limit_max: usize,
    pub openrouter: Option<OpenRouterConfig>,
    pub loop_settings: LoopSettings,
}

impl Default for ApiConfig {
    /// Memory store, no generation backend, local dev origins.
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            database_url: None,
            docs_root: None,
            allowed_origins: DEFAULT_ORIGINS.iter().map(|origin| origin.to_string()).collect(),
            rate_limit_window: Duration::from_secs(60),
            rate_limit_max: 60,
            openrouter: None,
            loop_settings: LoopSettings::default(),
        }
    }
}

impl ApiConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            bind: non_empty_var("SOP_BIND").unwrap_or(defaults.bind),
            database_url: non_empty_var("SOP_DATABASE_URL"),
            docs_root: non_empty_var("SOP_DOCS_ROOT").map(PathBuf::from),
            allowed_origins: non_empty_var("SOP_ALLOWED_ORIGINS")
                .map(|value| parse_origins(&value))
                .filter(|origins| !origins.is_empty())
                .unwrap_or(defaults.allowed_origins),
            rate_limit_window: env::var("SOP_RATE_LIMIT_WINDOW_SECONDS")
                .ok()
                .and_then(|value| value.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.rate_limit_window),
            rate_limit_max: env::var("SOP_RATE_LIMIT_MAX")
                .ok()
                .and_then(|value| value.parse::<usize>().ok())
                .unwrap_or(defaults.rate_limit_max),
            openrouter: OpenRouterConfig::from_env(),
            loop_settings: LoopSettings::from_env(),
        }
    }

    pub fn generator(&self) -> Generator {
        match &self.openrouter {
            Some(config) => Generator::OpenRouter(OpenRouterClient::new(config.clone())),
            None => Generator::Unconfigured,
        }
    }
}

fn parse_origins(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|origin| origin.trim().trim_end_matches('/').to_string())
        .filter(|origin| !origin.is_empty() && origin != "*")
        .collect()
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
