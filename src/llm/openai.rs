// OpenAI Chat Completions adapter.
//
// Also serves the OpenAI-compatible vendors (Groq, GitHub Copilot), which
// differ only in base URL, extra headers and a few body fields.
// Streams responses via SSE from POST {base}/chat/completions with stream: true.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use super::error::{LlmError, Result};
use super::streaming::{parse_sse_stream, SseEvent};
use super::transport::{self, Delta};
use super::{CompletionRequest, CompletionStream, Provider};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
const COPILOT_BASE_URL: &str = "https://api.githubcopilot.com";

/// Headers the Copilot chat endpoint expects from an editor integration.
pub(crate) const COPILOT_EDITOR_HEADERS: &[(&str, &str)] = &[
    ("Editor-Version", "vscode/1.88.0"),
    ("Editor-Plugin-Version", "copilot-chat/0.14.2024032901"),
    ("User-Agent", "GitHubCopilotChat/0.14.2024032901"),
];

const COPILOT_CHAT_HEADERS: &[(&str, &str)] = &[
    ("OpenAI-Intent", "conversation-panel"),
    ("OpenAI-Organization", "github-copilot"),
    ("X-GitHub-Api-Version", "2023-07-07"),
    ("Copilot-Integration-Id", "vscode-chat"),
];

/// Model names the Copilot endpoint accepts, with their short forms.
const COPILOT_MODELS: &[(&str, &str)] = &[
    ("gpt-4", "gpt-4"),
    ("4", "gpt-4"),
    ("gpt-4o", "gpt-4o"),
    ("4o", "gpt-4o"),
    ("o1-mini", "o1-mini"),
    ("o1-preview", "o1-preview"),
    ("claude-3.5-sonnet", "claude-3.5-sonnet"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flavor {
    OpenAi,
    Groq,
    Copilot,
}

impl Flavor {
    fn vendor(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Groq => "groq",
            Self::Copilot => "copilot",
        }
    }
}

pub struct OpenAiProvider {
    client: reqwest::Client,
    flavor: Flavor,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiProvider {
    pub fn openai(client: reqwest::Client, api_key: &str, base_url: Option<&str>, model: &str) -> Self {
        Self::with_flavor(client, Flavor::OpenAi, api_key, base_url.unwrap_or(OPENAI_BASE_URL), model)
    }

    pub fn groq(client: reqwest::Client, api_key: &str, base_url: Option<&str>, model: &str) -> Self {
        Self::with_flavor(client, Flavor::Groq, api_key, base_url.unwrap_or(GROQ_BASE_URL), model)
    }

    /// `api_token` is the short-lived Copilot token, not the GitHub OAuth token.
    pub fn copilot(
        client: reqwest::Client,
        api_token: &str,
        base_url: Option<&str>,
        model: &str,
    ) -> Result<Self> {
        let model = copilot_model(model)?;
        Ok(Self::with_flavor(
            client,
            Flavor::Copilot,
            api_token,
            base_url.unwrap_or(COPILOT_BASE_URL),
            model,
        ))
    }

    fn with_flavor(
        client: reqwest::Client,
        flavor: Flavor,
        api_key: &str,
        base_url: &str,
        model: &str,
    ) -> Self {
        Self {
            client,
            flavor,
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }

    fn build_request_body(&self, request: &CompletionRequest) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": request.prompt }],
            "stream": request.stream,
        });

        if self.flavor == Flavor::Copilot {
            body["intent"] = json!(true);
            body["n"] = json!(1);
            body["temperature"] = json!(0.1);
            body["top_p"] = json!(1);
            body["max_tokens"] = json!(8192);
        }

        body
    }
}

/// Canonicalize a model name for the Copilot endpoint.
fn copilot_model(model: &str) -> Result<&'static str> {
    let model = model.strip_prefix("copilot-").unwrap_or(model);
    if model.is_empty() {
        return Ok("gpt-4");
    }
    COPILOT_MODELS
        .iter()
        .find(|(name, _)| *name == model)
        .map(|(_, canonical)| *canonical)
        .ok_or_else(|| LlmError::UnknownModel(format!("copilot/{}", model)))
}

/// Extract the reply text from a non-streaming completion.
fn parse_completion(vendor: &'static str, body: &Value) -> Result<String> {
    let choices = body["choices"]
        .as_array()
        .ok_or_else(|| LlmError::decode(vendor, "missing choices"))?;
    let first = choices
        .first()
        .ok_or_else(|| LlmError::decode(vendor, "no completion choices returned"))?;
    // A null content (e.g. refusal or tool-only reply) is an empty answer.
    match &first["message"]["content"] {
        Value::String(text) => Ok(text.clone()),
        Value::Null => Ok(String::new()),
        other => Err(LlmError::decode(vendor, format!("unexpected content: {}", other))),
    }
}

/// Map one SSE event from a chat-completions stream to a delta.
fn parse_stream_event(vendor: &'static str, event: &SseEvent) -> Result<Option<Delta>> {
    // OpenAI terminates with "data: [DONE]".
    if event.data.trim() == "[DONE]" {
        return Ok(Some(Delta::Done));
    }

    let chunk: Value =
        serde_json::from_str(&event.data).map_err(|e| LlmError::decode(vendor, e))?;

    if let Some(message) = chunk["error"]["message"].as_str() {
        return Err(LlmError::decode(vendor, message));
    }

    Ok(chunk["choices"][0]["delta"]["content"]
        .as_str()
        .map(|text| Delta::Text(text.to_string())))
}

#[async_trait]
impl Provider for OpenAiProvider {
    async fn complete(
        &self,
        cancel: &CancellationToken,
        request: CompletionRequest,
    ) -> Result<CompletionStream> {
        let vendor = self.flavor.vendor();
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_request_body(&request);
        tracing::debug!(vendor, %url, model = %self.model, stream = request.stream, "sending completion");

        let mut req = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .bearer_auth(&self.api_key);
        if self.flavor == Flavor::Copilot {
            for (name, value) in COPILOT_EDITOR_HEADERS.iter().chain(COPILOT_CHAT_HEADERS) {
                req = req.header(*name, *value);
            }
        }

        let response = transport::send(vendor, cancel, req.json(&body)).await?;

        if !request.stream {
            let body = transport::read_json(vendor, cancel, response).await?;
            return Ok(transport::single_shot(parse_completion(vendor, &body)?));
        }

        let deltas = parse_sse_stream(vendor, response.bytes_stream()).filter_map(move |item| {
            let delta = match item {
                Ok(event) => parse_stream_event(vendor, &event).transpose(),
                Err(e) => Some(Err(e)),
            };
            futures_util::future::ready(delta)
        });

        Ok(transport::spawn_pump(vendor, cancel.clone(), deltas))
    }

    fn name(&self) -> &'static str {
        self.flavor.vendor()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(flavor: Flavor) -> OpenAiProvider {
        OpenAiProvider::with_flavor(reqwest::Client::new(), flavor, "key", "http://x/v1/", "gpt-4o")
    }

    fn sse(data: &str) -> SseEvent {
        SseEvent {
            event_type: None,
            data: data.to_string(),
        }
    }

    #[test]
    fn test_build_request_body_basic() {
        let body = provider(Flavor::OpenAi).build_request_body(&CompletionRequest::new("hi", true));

        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "hi");
        assert!(body.get("intent").is_none());
    }

    #[test]
    fn test_build_request_body_copilot_extras() {
        let body = provider(Flavor::Copilot).build_request_body(&CompletionRequest::new("hi", false));

        assert_eq!(body["stream"], false);
        assert_eq!(body["intent"], true);
        assert_eq!(body["n"], 1);
        assert_eq!(body["max_tokens"], 8192);
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        assert_eq!(provider(Flavor::Groq).base_url, "http://x/v1");
    }

    #[test]
    fn test_names() {
        assert_eq!(provider(Flavor::OpenAi).name(), "openai");
        assert_eq!(provider(Flavor::Groq).name(), "groq");
        assert_eq!(provider(Flavor::Copilot).name(), "copilot");
    }

    #[test]
    fn test_copilot_model_canonicalization() {
        assert_eq!(copilot_model("4o").unwrap(), "gpt-4o");
        assert_eq!(copilot_model("copilot-gpt-4").unwrap(), "gpt-4");
        assert_eq!(copilot_model("").unwrap(), "gpt-4");
        assert!(matches!(copilot_model("davinci"), Err(LlmError::UnknownModel(_))));
    }

    #[test]
    fn test_parse_completion() {
        let body = json!({"choices": [{"message": {"role": "assistant", "content": "Hello!"}}]});
        assert_eq!(parse_completion("openai", &body).unwrap(), "Hello!");
    }

    #[test]
    fn test_parse_completion_empty_choices() {
        let body = json!({"choices": []});
        assert!(matches!(parse_completion("openai", &body), Err(LlmError::Decode { .. })));
        assert!(matches!(parse_completion("openai", &json!({})), Err(LlmError::Decode { .. })));
    }

    #[test]
    fn test_parse_stream_event_text() {
        let event = sse(&json!({"choices": [{"delta": {"content": "Hel"}}]}).to_string());
        assert_eq!(
            parse_stream_event("openai", &event).unwrap(),
            Some(Delta::Text("Hel".into()))
        );
    }

    #[test]
    fn test_parse_stream_event_role_only_chunk() {
        let event = sse(&json!({"choices": [{"delta": {"role": "assistant"}}]}).to_string());
        assert_eq!(parse_stream_event("openai", &event).unwrap(), None);
    }

    #[test]
    fn test_parse_stream_event_done() {
        assert_eq!(parse_stream_event("openai", &sse("[DONE]")).unwrap(), Some(Delta::Done));
    }

    #[test]
    fn test_parse_stream_event_malformed() {
        assert!(matches!(
            parse_stream_event("groq", &sse("{not json")),
            Err(LlmError::Decode { .. })
        ));
    }
}
