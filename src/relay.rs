// Stream relay: copies a completion stream to an output sink, either verbatim
// or paced into readable chunks as fragments arrive.

use std::collections::VecDeque;

use futures_util::StreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::llm::{CompletionStream, LlmError, Result};

/// Buffered fragments that force a flush.
pub const FLUSH_FRAGMENTS: usize = 10;

const SENTENCE_END: &[char] = &['.', '!', '?'];
const NO_SPACE_AFTER: &[char] = &['.', ',', '!', '?', ':', ';'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Copy the stream to the sink unchanged.
    Batch,
    /// Re-chunk fragments and end with a newline.
    Incremental,
}

/// Accumulates fragments and decides when a chunk is ready to show.
#[derive(Debug, Default)]
pub struct Pacer {
    buf: String,
    fragments: usize,
}

impl Pacer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one fragment; returns the chunk to write when a flush triggers.
    pub fn push(&mut self, fragment: &str) -> Option<String> {
        self.buf.push_str(fragment);
        if !fragment.ends_with(NO_SPACE_AFTER) {
            self.buf.push(' ');
        }
        self.fragments += 1;

        if self.fragments >= FLUSH_FRAGMENTS || fragment.contains(SENTENCE_END) {
            self.fragments = 0;
            return Some(std::mem::take(&mut self.buf));
        }
        None
    }

    /// Whatever is still buffered.
    pub fn finish(&mut self) -> String {
        self.fragments = 0;
        std::mem::take(&mut self.buf)
    }
}

/// Write `stream` to `sink`.
///
/// Returns the first stream error after writing what was already buffered.
/// Cancellation stops output immediately with `LlmError::Cancelled`.
pub async fn relay<W>(
    mut stream: CompletionStream,
    sink: &mut W,
    delivery: Delivery,
    cancel: &CancellationToken,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut pacer = Pacer::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LlmError::Cancelled),
            next = stream.next() => next,
        };

        let fragment = match next {
            Some(Ok(fragment)) => fragment,
            Some(Err(e)) => {
                let rest = pacer.finish();
                if !rest.is_empty() {
                    sink.write_all(rest.as_bytes()).await?;
                    sink.flush().await?;
                }
                return Err(e);
            }
            None => break,
        };

        match delivery {
            Delivery::Batch => sink.write_all(fragment.as_bytes()).await?,
            Delivery::Incremental => {
                if let Some(chunk) = pacer.push(&fragment) {
                    sink.write_all(chunk.as_bytes()).await?;
                    sink.flush().await?;
                }
            }
        }
    }

    if delivery == Delivery::Incremental {
        let rest = pacer.finish();
        sink.write_all(rest.as_bytes()).await?;
        sink.write_all(b"\n").await?;
    }
    sink.flush().await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Word segmentation
// ---------------------------------------------------------------------------

/// Splits raw token deltas into whitespace-separated words. A word may span
/// several deltas.
#[derive(Debug, Default)]
pub struct WordSplitter {
    carry: String,
}

impl WordSplitter {
    pub fn push(&mut self, delta: &str) -> Vec<String> {
        self.carry.push_str(delta);
        let Some(last_ws) = self.carry.rfind(char::is_whitespace) else {
            return Vec::new();
        };
        let ws_len = self.carry[last_ws..]
            .chars()
            .next()
            .map_or(1, char::len_utf8);
        let tail = self.carry.split_off(last_ws + ws_len);
        let complete = std::mem::replace(&mut self.carry, tail);
        complete.split_whitespace().map(String::from).collect()
    }

    pub fn finish(&mut self) -> Option<String> {
        let word = std::mem::take(&mut self.carry);
        let word = word.trim();
        (!word.is_empty()).then(|| word.to_string())
    }
}

/// Re-segment a stream of token deltas into a stream of words.
pub fn into_words(stream: CompletionStream) -> CompletionStream {
    struct State {
        inner: CompletionStream,
        splitter: WordSplitter,
        ready: VecDeque<Result<String>>,
        finished: bool,
    }

    let state = State {
        inner: stream,
        splitter: WordSplitter::default(),
        ready: VecDeque::new(),
        finished: false,
    };

    Box::pin(futures_util::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.ready.pop_front() {
                return Some((item, st));
            }
            if st.finished {
                return None;
            }
            match st.inner.next().await {
                Some(Ok(delta)) => st.ready.extend(st.splitter.push(&delta).into_iter().map(Ok)),
                Some(Err(e)) => {
                    st.ready.extend(st.splitter.finish().map(Ok));
                    st.ready.push_back(Err(e));
                    st.finished = true;
                }
                None => {
                    st.ready.extend(st.splitter.finish().map(Ok));
                    st.finished = true;
                }
            }
        }
    }))
}
