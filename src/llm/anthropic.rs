// Anthropic Messages API adapter.
//
// Streams responses via SSE from POST /v1/messages with stream: true.
// Only text deltas are surfaced; every other event type is framing.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use super::error::{LlmError, Result};
use super::streaming::{parse_sse_stream, SseEvent};
use super::transport::{self, Delta};
use super::{CompletionRequest, CompletionStream, Provider};

const VENDOR: &str = "anthropic";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicProvider {
    pub fn new(
        client: reqwest::Client,
        api_key: &str,
        base_url: Option<&str>,
        model: &str,
        max_tokens: u32,
    ) -> Self {
        Self {
            client,
            api_key: api_key.to_string(),
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            model: model.to_string(),
            max_tokens,
        }
    }

    /// Build the request body for the Anthropic Messages API.
    fn build_request_body(&self, request: &CompletionRequest) -> Value {
        json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": [{ "role": "user", "content": request.prompt }],
            "stream": request.stream,
        })
    }
}

/// Concatenate the text blocks of a non-streaming reply.
fn parse_message(body: &Value) -> Result<String> {
    let blocks = body["content"]
        .as_array()
        .ok_or_else(|| LlmError::decode(VENDOR, "missing content"))?;
    Ok(blocks
        .iter()
        .filter(|b| b["type"] == "text")
        .filter_map(|b| b["text"].as_str())
        .collect())
}

/// Map one typed SSE event to a delta.
fn parse_stream_event(event: &SseEvent) -> Result<Option<Delta>> {
    match event.event_type.as_deref().unwrap_or("") {
        "content_block_delta" => {
            let data: Value =
                serde_json::from_str(&event.data).map_err(|e| LlmError::decode(VENDOR, e))?;
            let delta = &data["delta"];
            if delta["type"] != "text_delta" {
                return Ok(None);
            }
            let text = delta["text"]
                .as_str()
                .ok_or_else(|| LlmError::decode(VENDOR, "text_delta without text"))?;
            Ok(Some(Delta::Text(text.to_string())))
        }

        "message_stop" => Ok(Some(Delta::Done)),

        // Errors can arrive mid-stream after a 200 (e.g. overloaded).
        "error" => Err(LlmError::Provider {
            vendor: VENDOR.to_string(),
            status: 200,
            body: event.data.clone(),
        }),

        _ => Ok(None), // message_start, ping, content_block_start/stop, message_delta
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    async fn complete(
        &self,
        cancel: &CancellationToken,
        request: CompletionRequest,
    ) -> Result<CompletionStream> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.build_request_body(&request);
        tracing::debug!(%url, model = %self.model, stream = request.stream, "sending anthropic request");

        let req = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body);

        let response = transport::send(VENDOR, cancel, req).await?;

        if !request.stream {
            let body = transport::read_json(VENDOR, cancel, response).await?;
            return Ok(transport::single_shot(parse_message(&body)?));
        }

        let deltas = parse_sse_stream(VENDOR, response.bytes_stream()).filter_map(|item| {
            let delta = match item {
                Ok(event) => parse_stream_event(&event).transpose(),
                Err(e) => Some(Err(e)),
            };
            futures_util::future::ready(delta)
        });

        Ok(transport::spawn_pump(VENDOR, cancel.clone(), deltas))
    }

    fn name(&self) -> &'static str {
        VENDOR
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(event_type: &str, data: Value) -> SseEvent {
        SseEvent {
            event_type: Some(event_type.to_string()),
            data: data.to_string(),
        }
    }

    #[test]
    fn test_build_request_body() {
        let provider = AnthropicProvider::new(
            reqwest::Client::new(),
            "key",
            None,
            "claude-3-haiku-20240307",
            1024,
        );
        let body = provider.build_request_body(&CompletionRequest::new("hello", true));

        assert_eq!(body["model"], "claude-3-haiku-20240307");
        assert_eq!(body["max_tokens"], 1024);
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "hello");
        assert!(body.get("system").is_none());
        assert_eq!(provider.base_url, "https://api.anthropic.com");
    }

    #[test]
    fn test_parse_message_joins_text_blocks() {
        let body = json!({
            "content": [
                {"type": "text", "text": "Hello"},
                {"type": "tool_use", "id": "t1"},
                {"type": "text", "text": " there"}
            ]
        });
        assert_eq!(parse_message(&body).unwrap(), "Hello there");
        assert!(matches!(parse_message(&json!({})), Err(LlmError::Decode { .. })));
    }

    #[test]
    fn test_process_text_delta() {
        let ev = event(
            "content_block_delta",
            json!({"delta": {"type": "text_delta", "text": "Hello"}}),
        );
        assert_eq!(parse_stream_event(&ev).unwrap(), Some(Delta::Text("Hello".into())));
    }

    #[test]
    fn test_non_text_deltas_are_skipped() {
        let ev = event(
            "content_block_delta",
            json!({"delta": {"type": "input_json_delta", "partial_json": "{"}}),
        );
        assert_eq!(parse_stream_event(&ev).unwrap(), None);

        let ping = event("ping", json!({}));
        assert_eq!(parse_stream_event(&ping).unwrap(), None);
    }

    #[test]
    fn test_message_stop_ends_stream() {
        assert_eq!(
            parse_stream_event(&event("message_stop", json!({}))).unwrap(),
            Some(Delta::Done)
        );
    }

    #[test]
    fn test_error_event() {
        let ev = event(
            "error",
            json!({"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}}),
        );
        match parse_stream_event(&ev) {
            Err(LlmError::Provider { vendor, body, .. }) => {
                assert_eq!(vendor, "anthropic");
                assert!(body.contains("Overloaded"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_malformed_delta() {
        let ev = SseEvent {
            event_type: Some("content_block_delta".into()),
            data: "{oops".into(),
        };
        assert!(matches!(parse_stream_event(&ev), Err(LlmError::Decode { .. })));
    }
}
