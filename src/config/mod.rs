pub mod schema;

pub use schema::{Config, CustomCommand, VendorConfig};

use std::path::PathBuf;

use anyhow::{Context, Result};

const APP_DIR: &str = "ask-cli";

/// Per-user directory for the config file and the Copilot token.
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR))
}

/// Load configuration, checking (in order):
/// 1. `$ASK_CLI_CONFIG` env var
/// 2. `<config dir>/ask-cli/config.yaml`
/// 3. Built-in defaults
pub fn load_config() -> Result<Config> {
    let path = resolve_config_path();

    let mut config = match path {
        Some(p) if p.exists() => {
            tracing::info!(path = %p.display(), "loading config");
            let raw = std::fs::read_to_string(&p)
                .with_context(|| format!("reading config from {}", p.display()))?;
            parse_config(&raw).with_context(|| format!("parsing config from {}", p.display()))?
        }
        _ => {
            tracing::debug!("no config file found, using defaults");
            Config::default()
        }
    };

    resolve_env_vars(&mut config);
    config.validate()?;
    Ok(config)
}

fn parse_config(raw: &str) -> Result<Config> {
    // An empty file deserializes to null, not an empty mapping.
    if raw.trim().is_empty() {
        return Ok(Config::default());
    }
    Ok(serde_yaml::from_str(raw)?)
}

/// Determine the config file path.
fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("ASK_CLI_CONFIG") {
        let p = PathBuf::from(path);
        if !p.as_os_str().is_empty() {
            return Some(p);
        }
    }

    config_dir().map(|d| d.join("config.yaml"))
}

/// Resolve `${ENV_VAR}` references in the vendor api_key fields.
fn resolve_env_vars(config: &mut Config) {
    for vendor in [
        &mut config.openai,
        &mut config.anthropic,
        &mut config.gemini,
        &mut config.groq,
    ] {
        if let Some(ref key) = vendor.api_key {
            vendor.api_key = Some(substitute_env_vars(key));
        }
    }
}

/// Substitute `${VAR}` patterns with environment variable values.
/// Unset variables become empty strings.
fn substitute_env_vars(input: &str) -> String {
    if let Some(inner) = extract_env_ref(input) {
        return std::env::var(inner).unwrap_or_default();
    }
    let mut result = input.to_string();
    let mut pos = 0;
    while let Some(offset) = result[pos..].find("${") {
        let start = pos + offset;
        let rest = &result[start + 2..];
        if let Some(end) = rest.find('}') {
            let var_name = &rest[..end];
            let replacement = std::env::var(var_name).unwrap_or_default();
            result = format!("{}{}{}", &result[..start], replacement, &rest[end + 1..]);
            // Substituted values are not expanded again.
            pos = start + replacement.len();
        } else {
            break;
        }
    }
    result
}

/// If the entire string is `${VAR}`, return the variable name.
fn extract_env_ref(s: &str) -> Option<&str> {
    let trimmed = s.trim();
    if trimmed.starts_with("${") && trimmed.ends_with('}') && trimmed.len() > 3 {
        let inner = &trimmed[2..trimmed.len() - 1];
        if !inner.contains('{') && !inner.contains('}') {
            return Some(inner);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.default_model, "gpt-4o-mini");
        assert!(config.stream);
        assert_eq!(config.timeout_secs, 300);
        assert_eq!(config.max_tokens, 4096);
        assert!(config.openai.api_key.is_none());
        assert!(config.commands.is_empty());
    }

    #[test]
    fn test_validate_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_empty_model() {
        let mut config = Config::default();
        config.default_model = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_limits() {
        let mut config = Config::default();
        config.timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.max_tokens = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_custom_commands() {
        let cmd = |name: &str| CustomCommand {
            name: name.to_string(),
            description: String::new(),
            prompt: "Summarize".to_string(),
            require_stdin: false,
        };

        let mut config = Config::default();
        config.commands = vec![cmd("sum"), cmd("sum")];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate"));

        config.commands = vec![cmd("")];
        assert!(config.validate().is_err());

        config.commands = vec![cmd("sum"), cmd("fix")];
        assert!(config.validate().is_ok());
        assert_eq!(config.command("fix").unwrap().prompt, "Summarize");
        assert!(config.command("nope").is_none());
    }

    #[test]
    fn test_extract_env_ref() {
        assert_eq!(extract_env_ref("${HOME}"), Some("HOME"));
        assert_eq!(extract_env_ref("plain"), None);
        assert_eq!(extract_env_ref("${A}extra"), None);
        assert_eq!(extract_env_ref("${}"), None);
    }

    #[test]
    fn test_substitute_env_vars_passthrough() {
        assert_eq!(substitute_env_vars("plain-key-123"), "plain-key-123");
    }

    #[test]
    fn test_substitute_env_vars_with_home() {
        // HOME is always set in test environment
        let result = substitute_env_vars("${HOME}");
        assert!(!result.is_empty());
        assert!(!result.contains("${"));
    }

    #[test]
    fn test_substitute_unset_var_is_empty() {
        assert_eq!(substitute_env_vars("${ASK_CLI_TEST_SURELY_UNSET_VAR}"), "");
        assert_eq!(substitute_env_vars("pre-${ASK_CLI_TEST_SURELY_UNSET_VAR}-post"), "pre--post");
    }

    #[test]
    fn test_substitute_value_containing_reference() {
        std::env::set_var("ASK_CLI_TEST_SELF_REF", "${ASK_CLI_TEST_SELF_REF}");
        assert_eq!(
            substitute_env_vars("a-${ASK_CLI_TEST_SELF_REF}-b"),
            "a-${ASK_CLI_TEST_SELF_REF}-b"
        );
        assert_eq!(
            substitute_env_vars("${ASK_CLI_TEST_SELF_REF}/${ASK_CLI_TEST_SURELY_UNSET_VAR}x"),
            "${ASK_CLI_TEST_SELF_REF}/x"
        );
        std::env::remove_var("ASK_CLI_TEST_SELF_REF");
    }

    #[test]
    fn test_parse_yaml_config() {
        let yaml = r#"
default_model: claude-3-haiku
stream: false
max_tokens: 2048
anthropic:
  api_key: sk-ant-123
  base_url: http://localhost:9000
ollama_host: http://gpu-box:11434
commands:
  - name: explain
    description: Explain piped code
    prompt: Explain this code
    require_stdin: true
"#;
        let config = parse_config(yaml).unwrap();
        assert_eq!(config.default_model, "claude-3-haiku");
        assert!(!config.stream);
        assert_eq!(config.max_tokens, 2048);
        assert_eq!(config.timeout_secs, 300);
        assert_eq!(config.anthropic.api_key.as_deref(), Some("sk-ant-123"));
        assert_eq!(config.ollama_host.as_deref(), Some("http://gpu-box:11434"));
        assert!(config.commands[0].require_stdin);
    }

    #[test]
    fn test_parse_empty_yaml() {
        assert_eq!(parse_config("").unwrap().default_model, "gpt-4o-mini");
        assert_eq!(parse_config("{}").unwrap().default_model, "gpt-4o-mini");
    }

    #[test]
    fn test_provider_settings_env_fallback() {
        let mut config = Config::default();
        config.openai.api_key = Some("from-config".to_string());
        config.groq.api_key = Some(String::new());
        config.timeout_secs = 30;

        let env = |var: &str| match var {
            "OPENAI_API_KEY" => Some("from-env".to_string()),
            "GROQ_API_KEY" => Some("gsk-env".to_string()),
            _ => None,
        };
        let settings = config.provider_settings_with(env, Some("gho_x".to_string()));

        assert_eq!(settings.openai.api_key.as_deref(), Some("from-config"));
        assert_eq!(settings.groq.api_key.as_deref(), Some("gsk-env"));
        assert!(settings.anthropic.api_key.is_none());
        assert_eq!(settings.copilot_token.as_deref(), Some("gho_x"));
        assert_eq!(settings.timeout.as_secs(), 30);
        assert_eq!(settings.max_tokens, 4096);
    }
}
