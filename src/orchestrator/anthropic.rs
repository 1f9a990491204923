use super::{run_tool_batch, ToolOrchestrator, TurnContext};
use crate::models::Provider;
use crate::specs::anthropic::{
    MessagesRequest, MessagesResponse, ResponseBlock, StreamEventLine, ANTHROPIC_VERSION,
};
use crate::streaming::{sse_lines, StreamMetric, MAX_STREAM_LINES, SSE_DATA_PREFIX};
use crate::types::{PrismError, Result, StreamEvent, ToolCall};
use futures_util::StreamExt;
use tokio_util::codec::LinesCodecError;

const ANTHROPIC_MESSAGES: &str = "https://api.anthropic.com/v1/messages";

/// Orchestrator for the Anthropic messages API.
///
/// Plain turns stream over SSE. Turns with tools enabled run as
/// non-streaming rounds instead: tool input arrives as `input_json_delta`
/// fragments mid-stream, and buffering a whole round is simpler and no
/// slower for the single-hop loop than reassembling those fragments.
pub struct AnthropicOrchestrator;

impl AnthropicOrchestrator {
    fn post(&self, ctx: &TurnContext, request: &MessagesRequest) -> reqwest::RequestBuilder {
        ctx.client
            .post(ANTHROPIC_MESSAGES)
            .header("x-api-key", &ctx.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(request)
    }

    async fn stream_plain(&self, ctx: &TurnContext) -> Result<()> {
        let request = MessagesRequest::new(&ctx.model_id, &ctx.history, &[]).streaming();
        let response = self.post(ctx, &request).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PrismError::Provider(
                Provider::Anthropic,
                format!("{}: {}", status, body),
            )
            .into());
        }

        let mut lines = sse_lines(response);
        let mut metrics = StreamMetric::new();
        let mut line_count = 0usize;

        loop {
            let line_result = tokio::select! {
                _ = ctx.cancel.cancelled() => {
                    tracing::info!("[☁️  -> ⚙️ ] Turn cancelled; abandoning stream");
                    return Ok(());
                }
                line = lines.next() => match line {
                    Some(l) => l,
                    None => break,
                },
            };

            line_count += 1;
            if line_count > MAX_STREAM_LINES {
                return Err(PrismError::Provider(
                    Provider::Anthropic,
                    format!("stream exceeded max line limit ({})", MAX_STREAM_LINES),
                )
                .into());
            }

            let line = match line_result {
                Ok(line) => line,
                Err(LinesCodecError::Io(e)) => return Err(PrismError::Io(e).into()),
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    return Err(PrismError::Provider(
                        Provider::Anthropic,
                        "stream line exceeded max length".to_string(),
                    )
                    .into())
                }
            };

            let Some(data) = line.strip_prefix(SSE_DATA_PREFIX) else {
                continue;
            };

            let event: StreamEventLine = match serde_json::from_str(data) {
                Ok(e) => e,
                Err(_) => {
                    tracing::debug!("[STREAM] Unknown line format: {:.200}", data);
                    continue;
                }
            };

            match event.r#type.as_str() {
                "content_block_delta" => {
                    if let Some(text) = event.delta.and_then(|d| d.text) {
                        if !text.is_empty() {
                            metrics.record_text(&text);
                            ctx.emit(StreamEvent::Text { delta: text }).await;
                        }
                    }
                }
                "error" => {
                    let message = event
                        .error
                        .map(|e| e.message)
                        .unwrap_or_else(|| "unknown stream error".to_string());
                    tracing::error!("[☁️  -> ⚙️ ] Stream error: {}", message);
                    return Err(PrismError::Provider(Provider::Anthropic, message).into());
                }
                "message_stop" => break,
                _ => {}
            }
        }

        metrics.log_summary(&ctx.model_id);
        Ok(())
    }

    /// Run one non-streaming round. Text blocks are emitted as deltas in
    /// order; tool_use blocks come back as calls.
    async fn fetch_round(
        &self,
        ctx: &TurnContext,
        request: &MessagesRequest,
    ) -> Result<Vec<ToolCall>> {
        let response = self.post(ctx, request).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PrismError::Provider(
                Provider::Anthropic,
                format!("{}: {}", status, body),
            )
            .into());
        }

        let parsed: MessagesResponse = response.json().await?;
        let mut calls = Vec::new();
        for block in parsed.content {
            match block {
                ResponseBlock::Text { text } => {
                    if !text.is_empty() {
                        ctx.emit(StreamEvent::Text { delta: text }).await;
                    }
                }
                ResponseBlock::ToolUse { id, name, input } => {
                    calls.push(ToolCall {
                        id: Some(id),
                        name,
                        args: input,
                    });
                }
                ResponseBlock::Other => {}
            }
        }
        Ok(calls)
    }
}

#[async_trait::async_trait]
impl ToolOrchestrator for AnthropicOrchestrator {
    async fn stream_turn(&self, ctx: TurnContext) -> Result<()> {
        if ctx.tools.is_empty() {
            return self.stream_plain(&ctx).await;
        }

        let mut request = MessagesRequest::new(&ctx.model_id, &ctx.history, &ctx.tools);
        let calls = self.fetch_round(&ctx, &request).await?;
        if calls.is_empty() || ctx.cancel.is_cancelled() {
            return Ok(());
        }

        let results = run_tool_batch(&ctx, &calls).await;
        if ctx.cancel.is_cancelled() {
            return Ok(());
        }

        request.push_tool_round(&calls, &results);
        let followup_calls = self.fetch_round(&ctx, &request).await?;
        if !followup_calls.is_empty() {
            tracing::warn!(
                "[ORCH] Model {} requested {} tool(s) after its tool round; dropping",
                ctx.model_id,
                followup_calls.len()
            );
        }
        Ok(())
    }
}
