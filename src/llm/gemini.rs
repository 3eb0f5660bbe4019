// Google Gemini adapter.
//
// Batch: POST {base}/models/{model}:generateContent?key=...
// Stream: POST {base}/models/{model}:streamGenerateContent?alt=sse&key=...
// Both reply with GenerateContentResponse objects; the stream sends one per
// SSE event and simply closes when done.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use super::error::{LlmError, Result};
use super::streaming::parse_sse_stream;
use super::transport::{self, Delta};
use super::{CompletionRequest, CompletionStream, Provider};

const VENDOR: &str = "gemini";
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1";

pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl GeminiProvider {
    pub fn new(client: reqwest::Client, api_key: &str, base_url: Option<&str>, model: &str) -> Self {
        Self {
            client,
            api_key: api_key.to_string(),
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            model: model.to_string(),
        }
    }

    fn endpoint(&self, stream: bool) -> String {
        if stream {
            format!("{}/models/{}:streamGenerateContent", self.base_url, self.model)
        } else {
            format!("{}/models/{}:generateContent", self.base_url, self.model)
        }
    }
}

fn build_request_body(request: &CompletionRequest) -> Value {
    json!({
        "contents": [{ "role": "user", "parts": [{ "text": request.prompt }] }]
    })
}

/// Text of the first candidate. A candidate without parts (e.g. a final
/// chunk carrying only finishReason) yields an empty string.
fn candidate_text(body: &Value) -> Result<String> {
    let candidates = body["candidates"]
        .as_array()
        .ok_or_else(|| LlmError::decode(VENDOR, "missing candidates"))?;
    let Some(first) = candidates.first() else {
        return Err(LlmError::decode(VENDOR, "no candidates returned"));
    };
    Ok(first["content"]["parts"]
        .as_array()
        .map(|parts| parts.iter().filter_map(|p| p["text"].as_str()).collect())
        .unwrap_or_default())
}

fn parse_stream_chunk(data: &str) -> Result<Delta> {
    let chunk: Value = serde_json::from_str(data).map_err(|e| LlmError::decode(VENDOR, e))?;
    candidate_text(&chunk).map(Delta::Text)
}

#[async_trait]
impl Provider for GeminiProvider {
    async fn complete(
        &self,
        cancel: &CancellationToken,
        request: CompletionRequest,
    ) -> Result<CompletionStream> {
        let url = self.endpoint(request.stream);
        tracing::debug!(%url, stream = request.stream, "sending gemini request");

        let mut req = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .json(&build_request_body(&request));
        req = if request.stream {
            req.query(&[("alt", "sse"), ("key", self.api_key.as_str())])
        } else {
            req.query(&[("key", self.api_key.as_str())])
        };

        let response = transport::send(VENDOR, cancel, req).await?;

        if !request.stream {
            let body = transport::read_json(VENDOR, cancel, response).await?;
            return Ok(transport::single_shot(candidate_text(&body)?));
        }

        let deltas = parse_sse_stream(VENDOR, response.bytes_stream())
            .map(|item| item.and_then(|event| parse_stream_chunk(&event.data)));

        Ok(transport::spawn_pump(VENDOR, cancel.clone(), deltas))
    }

    fn name(&self) -> &'static str {
        VENDOR
    }
}
