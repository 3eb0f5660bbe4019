// Shared HTTP plumbing for the adapters: status mapping, cancellation-aware
// sends, and the producer task that bridges a network stream to a bounded
// channel.

use futures_util::{Stream, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use super::error::{LlmError, Result};
use super::CompletionStream;

/// Fragments buffered between the network reader and the consumer.
pub const FRAGMENT_BUFFER: usize = 32;

/// What an adapter extracts from one vendor stream item.
#[derive(Debug, Clone, PartialEq)]
pub enum Delta {
    Text(String),
    /// Vendor-specific terminator; nothing after it is read.
    Done,
}

/// Build the client an adapter keeps for its lifetime.
pub fn build_client(vendor: &str, timeout: std::time::Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| LlmError::transport(vendor, e))
}

/// Send a request, giving up as soon as `cancel` fires.
///
/// Non-success statuses are read to completion and returned as
/// `LlmError::Provider`; the response is only handed back on success.
pub async fn send(
    vendor: &'static str,
    cancel: &CancellationToken,
    request: reqwest::RequestBuilder,
) -> Result<reqwest::Response> {
    let response = tokio::select! {
        _ = cancel.cancelled() => return Err(LlmError::Cancelled),
        res = request.send() => res.map_err(|e| LlmError::transport(vendor, e))?,
    };

    let status = response.status();
    if !status.is_success() {
        let body = tokio::select! {
            _ = cancel.cancelled() => return Err(LlmError::Cancelled),
            body = response.text() => body.unwrap_or_default(),
        };
        tracing::debug!(vendor, status = status.as_u16(), "request rejected");
        return Err(LlmError::Provider {
            vendor: vendor.to_string(),
            status: status.as_u16(),
            body,
        });
    }

    Ok(response)
}

/// Read a whole response body as JSON.
pub async fn read_json(
    vendor: &'static str,
    cancel: &CancellationToken,
    response: reqwest::Response,
) -> Result<Value> {
    let text = tokio::select! {
        _ = cancel.cancelled() => return Err(LlmError::Cancelled),
        text = response.text() => text.map_err(|e| LlmError::transport(vendor, e))?,
    };
    serde_json::from_str(&text).map_err(|e| LlmError::decode(vendor, e))
}

/// A stream that yields `text` once and ends.
pub fn single_shot(text: String) -> CompletionStream {
    Box::pin(futures_util::stream::once(async move { Ok(text) }))
}

/// Spawn the producer task for a streaming response.
///
/// The task owns `deltas` (and through it the HTTP response). It stops, and
/// drops the response, on `Delta::Done`, end of body, the first error, when
/// the returned stream is dropped, or when `cancel` fires. The channel is
/// bounded, so a slow consumer stalls the network read.
///
/// Once `cancel` fires the returned stream yields a single
/// `LlmError::Cancelled` and ends, even if fragments are still buffered.
pub fn spawn_pump<S>(vendor: &'static str, cancel: CancellationToken, deltas: S) -> CompletionStream
where
    S: Stream<Item = Result<Delta>> + Send + Unpin + 'static,
{
    let (tx, rx) = mpsc::channel(FRAGMENT_BUFFER);
    let watcher = cancel.clone();

    tokio::spawn(async move {
        let mut deltas = deltas;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!(vendor, "request cancelled, closing stream");
                    break;
                }
                _ = tx.closed() => {
                    tracing::debug!(vendor, "consumer went away, closing stream");
                    break;
                }
                next = deltas.next() => next,
            };

            match next {
                None | Some(Ok(Delta::Done)) => break,
                Some(Ok(Delta::Text(text))) => {
                    if text.is_empty() {
                        continue;
                    }
                    let delivered = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => false,
                        sent = tx.send(Ok(text)) => sent.is_ok(),
                    };
                    if !delivered {
                        break;
                    }
                }
                Some(Err(e)) => {
                    let _ = tx.send(Err(e)).await;
                    break;
                }
            }
        }
    });

    let fragments = ReceiverStream::new(rx);
    Box::pin(futures_util::stream::unfold(
        Some((fragments, watcher)),
        |state| async move {
            let (mut fragments, cancel) = state?;
            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Some((Err(LlmError::Cancelled), None)),
                item = fragments.next() => item?,
            };
            Some((item, Some((fragments, cancel))))
        },
    ))
}
