//! Language-model providers.
//!
//! Every provider implements the single [`TextCompletion`] capability. The
//! concrete HTTP transports are a closed set selected by [`ProviderKind`];
//! model ids map to providers through a [`ProviderRegistry`] lookup table.

use async_trait::async_trait;
use quarry_core::{AiConfig, ModelConfig, ProviderError, ProviderKind};
use reqwest::{Client, StatusCode};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Accept a prompt, return raw text.
#[async_trait]
pub trait TextCompletion: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String, ProviderError>;
}

/// An HTTP provider for one configured model.
pub struct HttpProvider {
    kind: ProviderKind,
    client: Client,
    model: String,
    base_url: String,
    api_key: Option<String>,
    key_env: Option<String>,
    max_tokens: u32,
    temperature: f32,
    timeout_secs: u64,
}

impl HttpProvider {
    /// Build a provider from its model entry. The API key is read from the
    /// environment now; a missing key surfaces on the first call.
    pub fn from_config(model: &ModelConfig, ai: &AiConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(ai.timeout_secs))
            .build()
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let key_env = model.key_env().map(str::to_string);
        let api_key = key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|key| !key.trim().is_empty());

        Ok(Self {
            kind: model.provider,
            client,
            model: model.model.clone(),
            base_url: model.effective_base_url().trim_end_matches('/').to_string(),
            api_key,
            key_env,
            max_tokens: ai.max_tokens,
            temperature: ai.temperature,
            timeout_secs: ai.timeout_secs,
        })
    }

    fn require_key(&self) -> Result<&str, ProviderError> {
        match (&self.api_key, &self.key_env) {
            (Some(key), _) => Ok(key),
            (None, Some(var)) => Err(ProviderError::MissingCredentials(var.clone())),
            (None, None) => Err(ProviderError::MissingCredentials("API key".to_string())),
        }
    }

    fn endpoint(&self) -> String {
        match self.kind {
            ProviderKind::OpenAi => format!("{}/chat/completions", self.base_url),
            ProviderKind::Anthropic => format!("{}/messages", self.base_url),
            ProviderKind::Local => format!("{}/v1/chat/completions", self.base_url),
        }
    }

    fn body(&self, system: &str, user: &str) -> serde_json::Value {
        match self.kind {
            ProviderKind::Anthropic => serde_json::json!({
                "model": self.model,
                "system": system,
                "messages": [{ "role": "user", "content": user }],
                "max_tokens": self.max_tokens,
                "temperature": self.temperature,
            }),
            ProviderKind::OpenAi | ProviderKind::Local => serde_json::json!({
                "model": self.model,
                "messages": [
                    { "role": "system", "content": system },
                    { "role": "user", "content": user },
                ],
                "max_tokens": self.max_tokens,
                "temperature": self.temperature,
            }),
        }
    }
}

#[async_trait]
impl TextCompletion for HttpProvider {
    async fn complete(&self, system: &str, user: &str) -> Result<String, ProviderError> {
        let url = self.endpoint();
        let mut request = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&self.body(system, user));

        request = match self.kind {
            ProviderKind::OpenAi => {
                request.header("Authorization", format!("Bearer {}", self.require_key()?))
            }
            ProviderKind::Anthropic => request
                .header("x-api-key", self.require_key()?)
                .header("anthropic-version", ANTHROPIC_VERSION),
            // Local servers usually run without auth.
            ProviderKind::Local => match &self.api_key {
                Some(key) => request.header("Authorization", format!("Bearer {}", key)),
                None => request,
            },
        };

        debug!(url = %url, model = %self.model, "calling model provider");
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout {
                    secs: self.timeout_secs,
                }
            } else {
                ProviderError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        extract_text(self.kind, &data)
    }
}

/// Pull the completion text out of a provider response body.
pub fn extract_text(kind: ProviderKind, data: &serde_json::Value) -> Result<String, ProviderError> {
    let text = match kind {
        ProviderKind::Anthropic => data["content"][0]["text"].as_str(),
        ProviderKind::OpenAi | ProviderKind::Local => {
            data["choices"][0]["message"]["content"].as_str()
        }
    };
    match text {
        Some(t) if !t.trim().is_empty() => Ok(t.to_string()),
        _ => Err(ProviderError::InvalidResponse(
            "response carries no completion text".to_string(),
        )),
    }
}

/// Model id to provider lookup table.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn TextCompletion>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One HTTP provider per configured model.
    pub fn from_config(ai: &AiConfig) -> Result<Self, ProviderError> {
        let mut registry = Self::new();
        for model in &ai.models {
            registry.register(model.id.clone(), Arc::new(HttpProvider::from_config(model, ai)?));
        }
        Ok(registry)
    }

    pub fn register(&mut self, id: impl Into<String>, provider: Arc<dyn TextCompletion>) {
        self.providers.insert(id.into(), provider);
    }

    pub fn get(&self, id: &str) -> Result<Arc<dyn TextCompletion>, ProviderError> {
        self.providers
            .get(id)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownModel(id.to_string()))
    }

    pub fn model_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("models", &self.model_ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(kind: ProviderKind) -> ModelConfig {
        ModelConfig {
            id: "m".to_string(),
            provider: kind,
            model: "test-model".to_string(),
            base_url: Some("http://localhost:8080/".to_string()),
            api_key_env: Some("QUARRY_TEST_KEY_THAT_IS_NOT_SET".to_string()),
        }
    }

    #[test]
    fn test_endpoints_and_bodies() {
        let ai = AiConfig::default();
        let openai = HttpProvider::from_config(&model(ProviderKind::OpenAi), &ai).unwrap();
        assert_eq!(openai.endpoint(), "http://localhost:8080/chat/completions");
        assert_eq!(openai.body("s", "u")["messages"][0]["role"], "system");

        let anthropic = HttpProvider::from_config(&model(ProviderKind::Anthropic), &ai).unwrap();
        assert_eq!(anthropic.endpoint(), "http://localhost:8080/messages");
        assert_eq!(anthropic.body("s", "u")["system"], "s");

        let local = HttpProvider::from_config(&model(ProviderKind::Local), &ai).unwrap();
        assert_eq!(local.endpoint(), "http://localhost:8080/v1/chat/completions");
    }

    #[test]
    fn test_missing_key_is_reported() {
        let provider =
            HttpProvider::from_config(&model(ProviderKind::OpenAi), &AiConfig::default()).unwrap();
        assert_eq!(
            provider.require_key().unwrap_err(),
            ProviderError::MissingCredentials("QUARRY_TEST_KEY_THAT_IS_NOT_SET".to_string())
        );
    }

    #[test]
    fn test_extract_text() {
        let openai = serde_json::json!({"choices": [{"message": {"content": "SELECT 1"}}]});
        assert_eq!(extract_text(ProviderKind::OpenAi, &openai).unwrap(), "SELECT 1");

        let anthropic = serde_json::json!({"content": [{"type": "text", "text": "SELECT 2"}]});
        assert_eq!(extract_text(ProviderKind::Anthropic, &anthropic).unwrap(), "SELECT 2");

        let empty = serde_json::json!({"choices": []});
        assert!(matches!(
            extract_text(ProviderKind::Local, &empty),
            Err(ProviderError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_registry_lookup() {
        let mut ai = AiConfig::default();
        ai.models.push(model(ProviderKind::Local));
        let registry = ProviderRegistry::from_config(&ai).unwrap();
        assert_eq!(registry.model_ids(), vec!["m"]);
        assert!(registry.get("m").is_ok());
        assert!(matches!(
            registry.get("other").err(),
            Some(ProviderError::UnknownModel(_))
        ));
    }
}
