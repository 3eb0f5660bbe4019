// Model resolution: provider families, alias table, and cheap substitutes.

use std::fmt;

use super::error::{LlmError, Result};

// ---------------------------------------------------------------------------
// Provider families
// ---------------------------------------------------------------------------

/// The vendor family a model belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Gemini,
    Groq,
    Copilot,
    Ollama,
}

impl ProviderKind {
    /// Stable vendor identifier, as accepted in `provider/model` tokens.
    pub fn name(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
            Self::Groq => "groq",
            Self::Copilot => "copilot",
            Self::Ollama => "ollama",
        }
    }

    /// Parse a family name or one of its short aliases (`gpt`, `claude`).
    pub fn parse(name: &str) -> Option<Self> {
        FAMILIES
            .iter()
            .find(|f| f.kind.name() == name || f.aliases.contains(&name))
            .map(|f| f.kind)
    }

    /// Whether models of this family run on the local machine.
    pub fn is_local(self) -> bool {
        matches!(self, Self::Ollama)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Static model table
// ---------------------------------------------------------------------------

/// A registered model: the short alias users type and the id the vendor expects.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelEntry {
    pub alias: &'static str,
    /// Dated snapshot name, when it differs from the alias.
    pub canonical: Option<&'static str>,
    pub description: &'static str,
}

impl ModelEntry {
    const fn new(alias: &'static str, description: &'static str) -> Self {
        Self {
            alias,
            canonical: None,
            description,
        }
    }

    const fn snapshot(
        alias: &'static str,
        canonical: &'static str,
        description: &'static str,
    ) -> Self {
        Self {
            alias,
            canonical: Some(canonical),
            description,
        }
    }

    /// The id sent on the wire.
    pub fn id(&self) -> &'static str {
        self.canonical.unwrap_or(self.alias)
    }
}

struct Family {
    kind: ProviderKind,
    aliases: &'static [&'static str],
    /// Ordered: the first entry is the family default.
    models: &'static [ModelEntry],
}

static FAMILIES: &[Family] = &[
    Family {
        kind: ProviderKind::OpenAi,
        aliases: &["gpt"],
        models: &[
            ModelEntry::new("gpt-3.5-turbo", "OpenAI GPT-3.5 Turbo"),
            ModelEntry::new("gpt-4-turbo", "OpenAI GPT-4 Turbo"),
            ModelEntry::new("gpt-4", "OpenAI GPT-4"),
            ModelEntry::new("gpt-4-32k", "OpenAI GPT-4 32k context"),
            ModelEntry::new("gpt-4o", "OpenAI GPT-4o"),
            ModelEntry::new("gpt-4o-mini", "OpenAI GPT-4o mini"),
        ],
    },
    Family {
        kind: ProviderKind::Anthropic,
        aliases: &["claude"],
        models: &[
            ModelEntry::snapshot("claude-3-haiku", "claude-3-haiku-20240307", "Anthropic Claude 3 Haiku"),
            ModelEntry::snapshot("claude-3-sonnet", "claude-3-sonnet-20240229", "Anthropic Claude 3 Sonnet"),
            ModelEntry::snapshot("claude-3-opus", "claude-3-opus-20240229", "Anthropic Claude 3 Opus"),
            ModelEntry::snapshot("claude-3.5-sonnet", "claude-3-5-sonnet-20240620", "Anthropic Claude 3.5 Sonnet"),
        ],
    },
    Family {
        kind: ProviderKind::Gemini,
        aliases: &[],
        models: &[
            ModelEntry::new("gemini-pro", "Google Gemini Pro"),
            ModelEntry::snapshot("gemini-1.5-pro", "gemini-1.5-pro-latest", "Google Gemini 1.5 Pro"),
            ModelEntry::snapshot("gemini-1.5-flash", "gemini-1.5-flash-latest", "Google Gemini 1.5 Flash"),
        ],
    },
    Family {
        kind: ProviderKind::Groq,
        aliases: &[],
        models: &[
            ModelEntry::snapshot("groq-llama3", "llama3-70b-8192", "Llama 3 70B on Groq"),
            ModelEntry::snapshot("groq-mixtral", "mixtral-8x7b-32768", "Mixtral 8x7B on Groq"),
            ModelEntry::snapshot("groq-gemma", "gemma-7b-it", "Gemma 7B on Groq"),
        ],
    },
    Family {
        kind: ProviderKind::Copilot,
        aliases: &[],
        models: &[
            ModelEntry::snapshot("copilot-chat", "gpt-4", "GitHub Copilot Chat"),
            ModelEntry::snapshot("copilot-gpt-4o", "gpt-4o", "GitHub Copilot GPT-4o"),
            ModelEntry::snapshot("copilot-o1-mini", "o1-mini", "GitHub Copilot o1-mini"),
            ModelEntry::snapshot("copilot-o1-preview", "o1-preview", "GitHub Copilot o1-preview"),
            ModelEntry::snapshot(
                "copilot-claude-3.5-sonnet",
                "claude-3.5-sonnet",
                "GitHub Copilot Claude 3.5 Sonnet",
            ),
        ],
    },
    // Local models come from the running daemon's inventory.
    Family {
        kind: ProviderKind::Ollama,
        aliases: &["local"],
        models: &[],
    },
];

/// Registered models of one family, in table order.
pub fn family_models(kind: ProviderKind) -> &'static [ModelEntry] {
    FAMILIES
        .iter()
        .find(|f| f.kind == kind)
        .map(|f| f.models)
        .unwrap_or(&[])
}

/// Every registered model, in table order.
pub fn all_models() -> impl Iterator<Item = (ProviderKind, &'static ModelEntry)> {
    FAMILIES
        .iter()
        .flat_map(|f| f.models.iter().map(move |m| (f.kind, m)))
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// The outcome of resolving a user token. Built once per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelDescriptor {
    /// What the user typed.
    pub alias: String,
    pub provider: ProviderKind,
    /// The id the vendor expects.
    pub model_id: String,
}

impl ModelDescriptor {
    fn new(alias: &str, provider: ProviderKind, model_id: &str) -> Self {
        Self {
            alias: alias.to_string(),
            provider,
            model_id: model_id.to_string(),
        }
    }
}

/// Resolve a model token to a provider family and vendor model id.
///
/// First match wins:
/// 1. `provider/model` is split; the model part is used literally.
/// 2. A registered alias (or canonical id) maps to its canonical id.
/// 3. A bare family name picks that family's first registered model.
/// 4. A `name:tag` token is passed through as a local model.
pub fn resolve(token: &str) -> Result<ModelDescriptor> {
    let token = token.trim();

    if let Some((family, model)) = token.split_once('/') {
        let provider = ProviderKind::parse(family)
            .filter(|_| !model.is_empty())
            .ok_or_else(|| LlmError::UnknownModel(token.to_string()))?;
        return Ok(ModelDescriptor::new(token, provider, model));
    }

    for family in FAMILIES {
        if let Some(entry) = family
            .models
            .iter()
            .find(|m| m.alias == token || m.canonical == Some(token))
        {
            return Ok(ModelDescriptor::new(token, family.kind, entry.id()));
        }
    }

    if let Some(kind) = ProviderKind::parse(token) {
        if let Some(first) = family_models(kind).first() {
            return Ok(ModelDescriptor::new(token, kind, first.id()));
        }
    }

    if is_local_model(token) {
        return Ok(ModelDescriptor::new(token, ProviderKind::Ollama, token));
    }

    Err(LlmError::UnknownModel(token.to_string()))
}

/// Whether `name` follows the local `name:tag` convention.
pub fn is_local_model(name: &str) -> bool {
    match name.split_once(':') {
        Some((model, tag)) => !model.is_empty() && !tag.is_empty() && !tag.contains(':'),
        None => false,
    }
}

// ---------------------------------------------------------------------------
// Cheap substitutes
// ---------------------------------------------------------------------------

/// Prefix of a flagship alias or id, and the cheaper sibling it maps to.
static CHEAP_SUBSTITUTES: &[(&str, &str)] = &[
    ("gpt-4", "gpt-3.5-turbo"),
    ("claude-3-opus", "claude-3-haiku"),
    ("gemini-1.5", "gemini-pro"),
    ("groq-llama3", "groq-gemma"),
];

/// Map a model token to a cheaper model of the same family.
///
/// Tokens without a registered sibling, local models, and tokens whose
/// sibling would land in another family are returned unchanged. A
/// `provider/` prefix is kept and the sibling's vendor id follows it.
pub fn cheap_model(token: &str) -> String {
    let (family, model) = match token.split_once('/') {
        Some((prefix, model)) => match ProviderKind::parse(prefix) {
            Some(kind) => (Some((prefix, kind)), model),
            None => return token.to_string(),
        },
        None => (None, token),
    };
    let kind = match family {
        Some((_, kind)) => Some(kind),
        None => resolve(token).ok().map(|d| d.provider),
    };
    if kind.is_some_and(ProviderKind::is_local) || is_local_model(model) {
        return token.to_string();
    }

    let Some(sibling) = CHEAP_SUBSTITUTES
        .iter()
        .find(|(flagship, _)| model.starts_with(flagship))
        .and_then(|(_, cheap)| resolve(cheap).ok())
    else {
        return token.to_string();
    };
    if kind.is_some_and(|k| k != sibling.provider) {
        return token.to_string();
    }

    match family {
        Some((prefix, _)) => format!("{}/{}", prefix, sibling.model_id),
        None => sibling.alias,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
