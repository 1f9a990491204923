use super::{run_tool_batch, ToolOrchestrator, TurnContext};
use crate::models::Provider;
use crate::specs::google::{GenerateRequest, GenerateResponse, Part};
use crate::streaming::{sse_lines, StreamMetric, MAX_STREAM_LINES, SSE_DATA_PREFIX};
use crate::types::{PrismError, Result, StreamEvent, ToolCall};
use futures_util::StreamExt;
use tokio_util::codec::LinesCodecError;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Header carrying the API key. The key must never ride in the URL query:
/// request URLs surface in transport error text and logs.
const GOOGLE_API_KEY_HEADER: &str = "x-goog-api-key";

/// Orchestrator for the Gemini generateContent API.
///
/// Plain turns use `streamGenerateContent?alt=sse`. Turns with tools run as
/// non-streaming `generateContent` rounds since Gemini delivers function
/// calls as whole parts rather than incremental fragments anyway.
pub struct GoogleOrchestrator;

fn stream_url(model_id: &str) -> String {
    format!(
        "{}/models/{}:streamGenerateContent?alt=sse",
        GEMINI_BASE_URL, model_id
    )
}

fn generate_url(model_id: &str) -> String {
    format!("{}/models/{}:generateContent", GEMINI_BASE_URL, model_id)
}

impl GoogleOrchestrator {
    async fn stream_plain(&self, ctx: &TurnContext) -> Result<()> {
        let request = GenerateRequest::new(&ctx.history, &[]);
        let response = ctx
            .client
            .post(stream_url(&ctx.model_id))
            .header(GOOGLE_API_KEY_HEADER, &ctx.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PrismError::Provider(
                Provider::Google,
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
                    Provider::Google,
                    format!("stream exceeded max line limit ({})", MAX_STREAM_LINES),
                )
                .into());
            }

            let line = match line_result {
                Ok(line) => line,
                Err(LinesCodecError::Io(e)) => return Err(PrismError::Io(e).into()),
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    return Err(PrismError::Provider(
                        Provider::Google,
                        "stream line exceeded max length".to_string(),
                    )
                    .into())
                }
            };

            let Some(data) = line.strip_prefix(SSE_DATA_PREFIX) else {
                continue;
            };

            let chunk: GenerateResponse = match serde_json::from_str(data) {
                Ok(c) => c,
                Err(_) => {
                    tracing::debug!("[STREAM] Unknown line format: {:.200}", data);
                    continue;
                }
            };

            for candidate in chunk.candidates {
                let Some(content) = candidate.content else {
                    continue;
                };
                for part in content.parts {
                    if let Part::Text { text } = part {
                        if !text.is_empty() {
                            metrics.record_text(&text);
                            ctx.emit(StreamEvent::Text { delta: text }).await;
                        }
                    }
                }
            }
        }

        metrics.log_summary(&ctx.model_id);
        Ok(())
    }

    async fn fetch_round(
        &self,
        ctx: &TurnContext,
        request: &GenerateRequest,
    ) -> Result<Vec<ToolCall>> {
        let response = ctx
            .client
            .post(generate_url(&ctx.model_id))
            .header(GOOGLE_API_KEY_HEADER, &ctx.api_key)
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PrismError::Provider(
                Provider::Google,
                format!("{}: {}", status, body),
            )
            .into());
        }

        let parsed: GenerateResponse = response.json().await?;
        let mut calls = Vec::new();
        for candidate in parsed.candidates {
            let Some(content) = candidate.content else {
                continue;
            };
            for part in content.parts {
                match part {
                    Part::Text { text } => {
                        if !text.is_empty() {
                            ctx.emit(StreamEvent::Text { delta: text }).await;
                        }
                    }
                    Part::FunctionCall { function_call } => {
                        // Gemini carries no call ids; results pair by name.
                        calls.push(ToolCall {
                            id: None,
                            name: function_call.name,
                            args: function_call.args,
                        });
                    }
                    Part::FunctionResponse { .. } => {}
                }
            }
        }
        Ok(calls)
    }
}

#[async_trait::async_trait]
impl ToolOrchestrator for GoogleOrchestrator {
    async fn stream_turn(&self, ctx: TurnContext) -> Result<()> {
        if ctx.tools.is_empty() {
            return self.stream_plain(&ctx).await;
        }

        let mut request = GenerateRequest::new(&ctx.history, &ctx.tools);
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
