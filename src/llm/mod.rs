// LLM provider abstraction and adapters.
//
// Every vendor is reached through the same `Provider` trait: one prompt in,
// a stream of text fragments out. Batch replies are a one-item stream.

pub mod anthropic;
pub mod error;
pub mod gemini;
pub mod models;
pub mod ollama;
pub mod openai;
pub mod streaming;
pub mod transport;

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::Stream;
use tokio_util::sync::CancellationToken;

use crate::copilot::CopilotAuth;
pub use error::{LlmError, Result};
pub use models::{ModelDescriptor, ProviderKind};

/// Text fragments in arrival order. The first error ends the stream.
pub type CompletionStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// A single-turn request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub prompt: String,
    pub stream: bool,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>, stream: bool) -> Self {
        Self {
            prompt: prompt.into(),
            stream,
        }
    }
}

/// A configured vendor adapter.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Send `request` and return its reply as a fragment stream.
    ///
    /// Errors before the first byte (bad status, unreachable host) are
    /// returned directly; later failures arrive as the stream's last item.
    async fn complete(
        &self,
        cancel: &CancellationToken,
        request: CompletionRequest,
    ) -> Result<CompletionStream>;

    /// Vendor identifier, e.g. "openai".
    fn name(&self) -> &'static str;
}

/// Credential and endpoint override for one hosted vendor.
#[derive(Debug, Clone, Default)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

impl ProviderConfig {
    fn key(&self, kind: ProviderKind, env_var: &str) -> Result<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                LlmError::missing_credential(
                    kind.name(),
                    format!("set {} or add an api_key to the {} section of the config", env_var, kind),
                )
            })
    }
}

/// Everything the factory needs, resolved once from config and environment.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub openai: ProviderConfig,
    pub anthropic: ProviderConfig,
    pub gemini: ProviderConfig,
    pub groq: ProviderConfig,
    pub ollama_host: Option<String>,
    /// GitHub OAuth token from `copilot-login`, if any.
    pub copilot_token: Option<String>,
    pub timeout: Duration,
    pub max_tokens: u32,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            openai: ProviderConfig::default(),
            anthropic: ProviderConfig::default(),
            gemini: ProviderConfig::default(),
            groq: ProviderConfig::default(),
            ollama_host: None,
            copilot_token: None,
            timeout: Duration::from_secs(300),
            max_tokens: 4096,
        }
    }
}

/// Build the adapter for a resolved model.
///
/// Hosted vendors fail with `MissingCredential` before any network traffic
/// when no key is configured. Copilot exchanges the stored GitHub token for
/// an API token first; that exchange gives up when `cancel` fires.
pub async fn create_provider(
    model: &ModelDescriptor,
    settings: &ProviderSettings,
    cancel: &CancellationToken,
) -> Result<Box<dyn Provider>> {
    let kind = model.provider;
    let client = transport::build_client(kind.name(), settings.timeout)?;
    let id = model.model_id.as_str();
    tracing::debug!(provider = %kind, model = id, "creating provider");

    let provider: Box<dyn Provider> = match kind {
        ProviderKind::OpenAi => {
            let key = settings.openai.key(kind, "OPENAI_API_KEY")?;
            Box::new(openai::OpenAiProvider::openai(
                client,
                key,
                settings.openai.base_url.as_deref(),
                id,
            ))
        }
        ProviderKind::Groq => {
            let key = settings.groq.key(kind, "GROQ_API_KEY")?;
            Box::new(openai::OpenAiProvider::groq(
                client,
                key,
                settings.groq.base_url.as_deref(),
                id,
            ))
        }
        ProviderKind::Anthropic => {
            let key = settings.anthropic.key(kind, "ANTHROPIC_API_KEY")?;
            Box::new(anthropic::AnthropicProvider::new(
                client,
                key,
                settings.anthropic.base_url.as_deref(),
                id,
                settings.max_tokens,
            ))
        }
        ProviderKind::Gemini => {
            let key = settings.gemini.key(kind, "GOOGLE_API_KEY")?;
            Box::new(gemini::GeminiProvider::new(
                client,
                key,
                settings.gemini.base_url.as_deref(),
                id,
            ))
        }
        ProviderKind::Ollama => Box::new(ollama::OllamaProvider::new(
            client,
            settings.ollama_host.as_deref(),
            id,
        )),
        ProviderKind::Copilot => {
            let github_token = settings
                .copilot_token
                .as_deref()
                .filter(|t| !t.is_empty())
                .ok_or_else(|| {
                    LlmError::missing_credential(kind.name(), "run `ask copilot-login` first")
                })?;
            let api_token = CopilotAuth::new(client.clone())
                .fetch_api_token(cancel, github_token)
                .await?;
            Box::new(openai::OpenAiProvider::copilot(client, &api_token, None, id)?)
        }
    };

    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyed(key: &str) -> ProviderConfig {
        ProviderConfig {
            api_key: Some(key.to_string()),
            base_url: None,
        }
    }

    #[tokio::test]
    async fn missing_key_is_reported_before_any_request() {
        let settings = ProviderSettings::default();
        for token in ["gpt-4o", "claude-3-haiku", "gemini-pro", "groq-llama3", "copilot-chat"] {
            let model = models::resolve(token).unwrap();
            match create_provider(&model, &settings, &CancellationToken::new()).await {
                Err(LlmError::MissingCredential { vendor, .. }) => {
                    assert_eq!(vendor, model.provider.name())
                }
                Err(e) => panic!("{}: unexpected error {}", token, e),
                Ok(_) => panic!("{}: expected missing credential", token),
            }
        }
    }

    #[tokio::test]
    async fn blank_key_counts_as_missing() {
        let settings = ProviderSettings {
            openai: keyed("   "),
            ..Default::default()
        };
        let model = models::resolve("gpt-4o").unwrap();
        let err = create_provider(&model, &settings, &CancellationToken::new()).await.err().unwrap();
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }

    #[tokio::test]
    async fn builds_the_matching_adapter() {
        let settings = ProviderSettings {
            openai: keyed("sk-test"),
            anthropic: keyed("sk-ant"),
            gemini: keyed("g"),
            groq: keyed("gsk"),
            ..Default::default()
        };
        let cases = [
            ("gpt-4o", "openai"),
            ("claude-3-haiku", "anthropic"),
            ("gemini-pro", "gemini"),
            ("groq-llama3", "groq"),
            ("llama3:8b", "ollama"),
        ];
        for (token, name) in cases {
            let model = models::resolve(token).unwrap();
            let provider = create_provider(&model, &settings, &CancellationToken::new()).await.unwrap();
            assert_eq!(provider.name(), name);
        }
    }

    #[tokio::test]
    async fn ollama_needs_no_credential() {
        let model = models::resolve("ollama/mistral").unwrap();
        let provider = create_provider(&model, &ProviderSettings::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(provider.name(), "ollama");
    }
}
