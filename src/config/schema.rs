use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::llm::{ProviderConfig, ProviderSettings};

/// Top-level CLI configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Model token used when `-m` is not given.
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Stream responses as they arrive.
    #[serde(default = "default_stream")]
    pub stream: bool,

    /// Whole-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Max tokens for vendors that require it (Anthropic).
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default)]
    pub openai: VendorConfig,
    #[serde(default)]
    pub anthropic: VendorConfig,
    #[serde(default)]
    pub gemini: VendorConfig,
    #[serde(default)]
    pub groq: VendorConfig,

    /// Ollama daemon URL.
    #[serde(default)]
    pub ollama_host: Option<String>,

    /// Custom prompt commands, invoked with `ask run <name>`.
    #[serde(default)]
    pub commands: Vec<CustomCommand>,
}

/// Credentials and endpoint for one hosted vendor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VendorConfig {
    /// API key, supports `${ENV_VAR}` syntax.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Base URL override for the vendor API.
    #[serde(default)]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomCommand {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Prompt template; the user's words are appended after it.
    pub prompt: String,
    /// Refuse to run without piped input.
    #[serde(default)]
    pub require_stdin: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_model: default_model(),
            stream: default_stream(),
            timeout_secs: default_timeout_secs(),
            max_tokens: default_max_tokens(),
            openai: VendorConfig::default(),
            anthropic: VendorConfig::default(),
            gemini: VendorConfig::default(),
            groq: VendorConfig::default(),
            ollama_host: None,
            commands: Vec::new(),
        }
    }
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_stream() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_max_tokens() -> u32 {
    4096
}

impl Config {
    /// Validate configuration values, returning an error with a helpful message
    /// if any value is out of range.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.default_model.trim().is_empty() {
            anyhow::bail!("default_model cannot be empty");
        }
        if self.timeout_secs == 0 {
            anyhow::bail!("timeout_secs must be greater than 0");
        }
        if self.max_tokens == 0 {
            anyhow::bail!("max_tokens must be greater than 0");
        }
        let mut seen = HashSet::new();
        for cmd in &self.commands {
            if cmd.name.trim().is_empty() {
                anyhow::bail!("custom command name cannot be empty");
            }
            if !seen.insert(cmd.name.as_str()) {
                anyhow::bail!("duplicate custom command '{}'", cmd.name);
            }
        }
        Ok(())
    }

    pub fn command(&self, name: &str) -> Option<&CustomCommand> {
        self.commands.iter().find(|c| c.name == name)
    }

    /// Factory settings, with vendor keys falling back to the environment.
    pub fn provider_settings(&self, copilot_token: Option<String>) -> ProviderSettings {
        self.provider_settings_with(|var| std::env::var(var).ok(), copilot_token)
    }

    pub(crate) fn provider_settings_with<F>(
        &self,
        env: F,
        copilot_token: Option<String>,
    ) -> ProviderSettings
    where
        F: Fn(&str) -> Option<String>,
    {
        let vendor = |cfg: &VendorConfig, var: &str| ProviderConfig {
            api_key: cfg
                .api_key
                .clone()
                .filter(|k| !k.trim().is_empty())
                .or_else(|| env(var).filter(|k| !k.trim().is_empty())),
            base_url: cfg.base_url.clone().filter(|u| !u.trim().is_empty()),
        };

        ProviderSettings {
            openai: vendor(&self.openai, "OPENAI_API_KEY"),
            anthropic: vendor(&self.anthropic, "ANTHROPIC_API_KEY"),
            gemini: vendor(&self.gemini, "GOOGLE_API_KEY"),
            groq: vendor(&self.groq, "GROQ_API_KEY"),
            ollama_host: self.ollama_host.clone().filter(|h| !h.trim().is_empty()),
            copilot_token,
            timeout: Duration::from_secs(self.timeout_secs),
            max_tokens: self.max_tokens,
        }
    }
}
