use crate::types::ToolCall;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use std::collections::HashMap;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};

/// Upper bound on lines consumed from a single provider stream. A runaway
/// upstream should fail loudly instead of pinning a task forever.
pub const MAX_STREAM_LINES: usize = 100_000;

const MAX_LINE_BYTES: usize = 1024 * 1024;

pub const SSE_DATA_PREFIX: &str = "data: ";
pub const SSE_DONE_MARKER: &str = "[DONE]";

/// Frame a provider response body into SSE lines. Callers strip the
/// `data: ` prefix themselves since some providers also emit `event:` lines
/// we want to observe.
pub fn sse_lines(
    response: reqwest::Response,
) -> impl Stream<Item = std::result::Result<String, LinesCodecError>> + Unpin + Send {
    let bytes_stream = response
        .bytes_stream()
        .map(|r: std::result::Result<Bytes, reqwest::Error>| r.map_err(std::io::Error::other));
    FramedRead::new(
        tokio_util::io::StreamReader::new(bytes_stream),
        LinesCodec::new_with_max_length(MAX_LINE_BYTES),
    )
}

#[derive(Debug, Default, Clone)]
struct PendingToolCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

/// Assembles streamed tool-call fragments back into complete calls.
///
/// Providers key fragments by `index` and often send the call id and name
/// only on the first fragment, with argument text drip-fed as raw JSON
/// pieces across later ones. We map index -> id so late fragments stay
/// associated, and synthesize a stable id if one never arrives.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    order: Vec<u32>,
    pending: HashMap<u32, PendingToolCall>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, index: u32, id: Option<&str>, name: Option<&str>, args_delta: &str) {
        let entry = self.pending.entry(index).or_insert_with(|| {
            self.order.push(index);
            PendingToolCall::default()
        });
        if let Some(id) = id {
            if !id.is_empty() && entry.id.is_none() {
                entry.id = Some(id.to_string());
            }
        }
        if let Some(name) = name {
            if !name.is_empty() && entry.name.is_empty() {
                entry.name = name.to_string();
            }
        }
        entry.arguments.push_str(args_delta);
    }

    /// Parse each buffered call's argument text into JSON. Malformed
    /// argument text degrades to an empty object so the turn can still
    /// proceed and the model can be told what went wrong.
    pub fn finalize(self) -> Vec<ToolCall> {
        let mut calls = Vec::with_capacity(self.order.len());
        let mut pending = self.pending;
        for index in self.order {
            let Some(entry) = pending.remove(&index) else {
                continue;
            };
            let id = match entry.id {
                Some(id) => id,
                None => {
                    tracing::warn!(
                        "[STREAM] tool_call id missing for index {}; synthesizing",
                        index
                    );
                    format!("tool_index_{}", index)
                }
            };
            let args = if entry.arguments.trim().is_empty() {
                serde_json::json!({})
            } else {
                match serde_json::from_str(&entry.arguments) {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!(
                            "[STREAM] tool_call {} has unparseable arguments ({}): {:?}",
                            id,
                            e,
                            entry.arguments
                        );
                        serde_json::json!({})
                    }
                }
            };
            calls.push(ToolCall {
                id: Some(id),
                name: entry.name,
                args,
            });
        }
        calls
    }
}

/// Per-stream counters logged once at stream end.
#[derive(Default)]
pub struct StreamMetric {
    pub chunks: usize,
    pub text_chars: usize,
    pub tool_parts: usize,
    pub tool_names: Vec<String>,
}

impl StreamMetric {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_text(&mut self, delta: &str) {
        self.chunks += 1;
        self.text_chars += delta.len();
    }

    pub fn record_tool_part(&mut self, name: Option<&str>) {
        self.chunks += 1;
        self.tool_parts += 1;
        if let Some(name) = name {
            if !name.is_empty() {
                self.tool_names.push(name.to_string());
            }
        }
    }

    pub fn log_summary(&self, model_id: &str) {
        let tools_str = if self.tool_names.is_empty() {
            format!("{}", self.tool_parts)
        } else {
            format!("{} ({})", self.tool_parts, self.tool_names.join(", "))
        };
        tracing::info!(
            "[STREAM END] Model: {} | Chunks: {} | Tools: {} | Text: {} chars",
            model_id,
            self.chunks,
            tools_str,
            self.text_chars
        );
    }
}
