// Ollama native API adapter.
//
// IMPORTANT: Ollama uses NDJSON streaming, NOT SSE.
// Each response line is a complete JSON object; the last one has done: true.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::error::{LlmError, Result};
use super::streaming::parse_ndjson_stream;
use super::transport::{self, Delta};
use super::{CompletionRequest, CompletionStream, Provider};

const VENDOR: &str = "ollama";
pub const DEFAULT_HOST: &str = "http://localhost:11434";

pub struct OllamaProvider {
    client: reqwest::Client,
    host: String,
    model: String,
}

impl OllamaProvider {
    pub fn new(client: reqwest::Client, host: Option<&str>, model: &str) -> Self {
        Self {
            client,
            host: normalize_host(host.unwrap_or(DEFAULT_HOST)),
            model: model.to_string(),
        }
    }
}

/// Users often configure the OpenAI-compatible `/v1` URL; the native API
/// lives at the root.
fn normalize_host(host: &str) -> String {
    let base = host.trim_end_matches('/');
    base.strip_suffix("/v1").unwrap_or(base).to_string()
}

/// One object from /api/generate, streamed or not.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GenerateChunk {
    response: String,
    done: bool,
    error: Option<String>,
}

fn parse_chunk(line: &str) -> Result<GenerateChunk> {
    let chunk: GenerateChunk =
        serde_json::from_str(line).map_err(|e| LlmError::decode(VENDOR, e))?;
    reject_error(chunk)
}

fn reject_error(chunk: GenerateChunk) -> Result<GenerateChunk> {
    match chunk.error {
        Some(err) => Err(LlmError::decode(VENDOR, err)),
        None => Ok(chunk),
    }
}

/// A text chunk followed by the terminator when `done` is set.
fn chunk_deltas(chunk: GenerateChunk) -> Vec<Result<Delta>> {
    let mut deltas = Vec::with_capacity(2);
    if !chunk.response.is_empty() {
        deltas.push(Ok(Delta::Text(chunk.response)));
    }
    if chunk.done {
        deltas.push(Ok(Delta::Done));
    }
    deltas
}

#[async_trait]
impl Provider for OllamaProvider {
    async fn complete(
        &self,
        cancel: &CancellationToken,
        request: CompletionRequest,
    ) -> Result<CompletionStream> {
        let url = format!("{}/api/generate", self.host);
        let body = json!({
            "model": self.model,
            "prompt": request.prompt,
            "stream": request.stream,
        });
        tracing::debug!(%url, model = %self.model, stream = request.stream, "sending ollama request");

        let req = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .json(&body);
        let response = transport::send(VENDOR, cancel, req).await?;

        if !request.stream {
            let body = transport::read_json(VENDOR, cancel, response).await?;
            let chunk: GenerateChunk =
                serde_json::from_value(body).map_err(|e| LlmError::decode(VENDOR, e))?;
            let chunk = reject_error(chunk)?;
            return Ok(transport::single_shot(chunk.response));
        }

        let deltas = parse_ndjson_stream(VENDOR, response.bytes_stream()).flat_map(|line| {
            let deltas = match line.and_then(|l| parse_chunk(&l)) {
                Ok(chunk) => chunk_deltas(chunk),
                Err(e) => vec![Err(e)],
            };
            futures_util::stream::iter(deltas)
        });

        Ok(transport::spawn_pump(VENDOR, cancel.clone(), deltas))
    }

    fn name(&self) -> &'static str {
        VENDOR
    }
}

// ---------------------------------------------------------------------------
// Local inventory
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<LocalModel>,
}

/// A model installed in the local daemon.
#[derive(Debug, Clone, Deserialize)]
pub struct LocalModel {
    pub name: String,
    #[serde(default)]
    pub size: u64,
}

/// List installed models via GET /api/tags.
pub async fn list_models(client: &reqwest::Client, host: Option<&str>) -> Result<Vec<LocalModel>> {
    let url = format!("{}/api/tags", normalize_host(host.unwrap_or(DEFAULT_HOST)));
    let response = transport::send(VENDOR, &CancellationToken::new(), client.get(&url)).await?;
    let tags: TagsResponse = response
        .json()
        .await
        .map_err(|e| LlmError::decode(VENDOR, e))?;
    Ok(tags.models)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_host() {
        assert_eq!(normalize_host("http://localhost:11434"), "http://localhost:11434");
        assert_eq!(normalize_host("http://localhost:11434/v1"), "http://localhost:11434");
        assert_eq!(normalize_host("http://localhost:11434/v1/"), "http://localhost:11434");
    }

    #[test]
    fn test_parse_chunk() {
        let chunk = parse_chunk(r#"{"model":"llama3","response":"Hi","done":false}"#).unwrap();
        assert_eq!(chunk.response, "Hi");
        assert!(!chunk.done);
    }

    #[test]
    fn test_parse_chunk_error_field() {
        let err = parse_chunk(r#"{"error":"model 'x' not found"}"#).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_parse_chunk_malformed() {
        assert!(matches!(parse_chunk("{nope"), Err(LlmError::Decode { .. })));
    }

    #[test]
    fn test_final_chunk_flushes_text_then_ends() {
        let deltas = chunk_deltas(GenerateChunk {
            response: "bye".into(),
            done: true,
            error: None,
        });
        let deltas: Vec<Delta> = deltas.into_iter().map(|d| d.unwrap()).collect();
        assert_eq!(deltas, vec![Delta::Text("bye".into()), Delta::Done]);
    }
}
