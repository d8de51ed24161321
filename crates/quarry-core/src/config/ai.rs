//! Language-model provider configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the AI provider chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    /// Model id used when a request does not name one.
    #[serde(default)]
    pub default_model: Option<String>,

    /// Upper bound for a single provider call.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default)]
    pub temperature: f32,

    /// Model registry: model id -> provider transport.
    #[serde(default)]
    pub models: Vec<ModelConfig>,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            default_model: None,
            timeout_secs: default_timeout_secs(),
            max_tokens: default_max_tokens(),
            temperature: 0.0,
            models: Vec::new(),
        }
    }
}

impl AiConfig {
    /// Look a registered model up by id.
    pub fn model(&self, id: &str) -> Option<&ModelConfig> {
        self.models.iter().find(|m| m.id == id)
    }

    /// The model id a request should use: the requested one, else the
    /// configured default, else the first registered model.
    pub fn resolve_model_id(&self, requested: Option<&str>) -> Option<String> {
        requested
            .map(str::to_string)
            .or_else(|| self.default_model.clone())
            .or_else(|| self.models.first().map(|m| m.id.clone()))
    }
}

/// One entry of the model registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Id requests refer to (e.g. "gpt-4o", "claude", "local-llama").
    pub id: String,

    pub provider: ProviderKind,

    /// Provider-side model name.
    pub model: String,

    /// Override for the provider's API base URL.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
}

impl ModelConfig {
    /// The environment variable to read the key from, if the provider needs one.
    pub fn key_env(&self) -> Option<&str> {
        self.api_key_env
            .as_deref()
            .or_else(|| self.provider.default_api_key_env())
    }

    pub fn effective_base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.provider.default_base_url())
    }
}

/// Provider transport family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI chat completions.
    #[serde(alias = "open_ai")]
    OpenAi,
    /// Anthropic messages API.
    Anthropic,
    /// OpenAI-compatible local server (Ollama, vLLM).
    Local,
}

impl ProviderKind {
    pub fn default_api_key_env(&self) -> Option<&'static str> {
        match self {
            Self::OpenAi => Some("OPENAI_API_KEY"),
            Self::Anthropic => Some("ANTHROPIC_API_KEY"),
            Self::Local => None,
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Anthropic => "https://api.anthropic.com/v1",
            Self::Local => "http://localhost:11434",
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_tokens() -> u32 {
    1024
}
