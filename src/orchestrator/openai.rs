use super::{run_tool_batch, ToolOrchestrator, TurnContext};
use crate::models::Provider;
use crate::specs::openai::{self, ChatRequest, LineEvent};
use crate::streaming::{
    sse_lines, StreamMetric, ToolCallAccumulator, MAX_STREAM_LINES, SSE_DATA_PREFIX,
    SSE_DONE_MARKER,
};
use crate::types::{PrismError, Result, StreamEvent, ToolCall};
use futures_util::StreamExt;
use tokio_util::codec::LinesCodecError;

const OPENAI_CHAT_COMPLETIONS: &str = "https://api.openai.com/v1/chat/completions";
const OPENROUTER_CHAT_COMPLETIONS: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Orchestrator for the OpenAI chat completions dialect. OpenRouter speaks
/// the same wire format, so the two differ only in endpoint and credential.
pub struct OpenAiOrchestrator {
    provider: Provider,
    endpoint: String,
}

impl OpenAiOrchestrator {
    pub fn openai() -> Self {
        Self {
            provider: Provider::OpenAi,
            endpoint: OPENAI_CHAT_COMPLETIONS.to_string(),
        }
    }

    pub fn openrouter() -> Self {
        Self {
            provider: Provider::OpenRouter,
            endpoint: OPENROUTER_CHAT_COMPLETIONS.to_string(),
        }
    }

    #[cfg(test)]
    fn at(endpoint: String) -> Self {
        Self {
            provider: Provider::OpenAi,
            endpoint,
        }
    }

    /// Stream one model round, forwarding text deltas as events and
    /// buffering tool-call fragments. Returns the assembled tool calls.
    async fn stream_round(&self, ctx: &TurnContext, request: &ChatRequest) -> Result<Vec<ToolCall>> {
        let response = ctx
            .client
            .post(&self.endpoint)
            .bearer_auth(&ctx.api_key)
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PrismError::Provider(
                self.provider,
                format!("{}: {}", status, body),
            )
            .into());
        }

        let mut lines = sse_lines(response);
        let mut accumulator = ToolCallAccumulator::new();
        let mut metrics = StreamMetric::new();
        let mut line_count = 0usize;

        loop {
            let line_result = tokio::select! {
                _ = ctx.cancel.cancelled() => {
                    tracing::info!("[☁️  -> ⚙️ ] Turn cancelled; abandoning stream");
                    return Ok(Vec::new());
                }
                line = lines.next() => match line {
                    Some(l) => l,
                    None => break,
                },
            };

            line_count += 1;
            if line_count > MAX_STREAM_LINES {
                return Err(PrismError::Provider(
                    self.provider,
                    format!("stream exceeded max line limit ({})", MAX_STREAM_LINES),
                )
                .into());
            }

            let line = match line_result {
                Ok(line) => line,
                Err(LinesCodecError::Io(e)) => return Err(PrismError::Io(e).into()),
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    return Err(PrismError::Provider(
                        self.provider,
                        "stream line exceeded max length".to_string(),
                    )
                    .into())
                }
            };

            let Some(data) = line.strip_prefix(SSE_DATA_PREFIX) else {
                continue;
            };
            if data == SSE_DONE_MARKER {
                tracing::debug!("[☁️  -> ⚙️ ] Stream end marker [DONE] received");
                break;
            }

            match openai::parse_data_line(data) {
                LineEvent::Chunk(chunk) => {
                    for choice in &chunk.choices {
                        if let Some(content) = &choice.delta.content {
                            if !content.is_empty() {
                                metrics.record_text(content);
                                ctx.emit(StreamEvent::Text {
                                    delta: content.clone(),
                                })
                                .await;
                            }
                        }
                        if let Some(deltas) = &choice.delta.tool_calls {
                            for td in deltas {
                                let (name, args) = match &td.function {
                                    Some(f) => (f.name.as_deref(), f.arguments.as_deref()),
                                    None => (None, None),
                                };
                                metrics.record_tool_part(name);
                                accumulator.record(
                                    td.index,
                                    td.id.as_deref(),
                                    name,
                                    args.unwrap_or_default(),
                                );
                            }
                        }
                    }
                }
                LineEvent::Error(err) => {
                    tracing::error!("[☁️  -> ⚙️ ] Stream error: {}", err.error.message);
                    return Err(
                        PrismError::Provider(self.provider, err.error.message).into()
                    );
                }
                LineEvent::Unknown(_) => {}
            }
        }

        metrics.log_summary(&ctx.model_id);
        Ok(accumulator.finalize())
    }
}

#[async_trait::async_trait]
impl ToolOrchestrator for OpenAiOrchestrator {
    async fn stream_turn(&self, ctx: TurnContext) -> Result<()> {
        let mut request = ChatRequest::new(&ctx.model_id, &ctx.history, &ctx.tools).streaming();

        let calls = self.stream_round(&ctx, &request).await?;
        if calls.is_empty() || ctx.cancel.is_cancelled() {
            return Ok(());
        }

        let results = run_tool_batch(&ctx, &calls).await;
        if ctx.cancel.is_cancelled() {
            return Ok(());
        }

        request.push_tool_round(&calls, &results);
        let followup_calls = self.stream_round(&ctx, &request).await?;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{available_tools, ToolRunner};
    use crate::types::{ChatMessage, Role, ToolResult};
    use axum::extract::State;
    use axum::response::IntoResponse;
    use axum::routing::post;
    use axum::Router;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    struct CountingRunner {
        executed: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ToolRunner for CountingRunner {
        async fn execute(&self, call: &ToolCall) -> ToolResult {
            self.executed.fetch_add(1, Ordering::SeqCst);
            ToolResult {
                tool_call_id: call.id.clone(),
                content: "[]".to_string(),
            }
        }
    }

    type StubState = (Arc<AtomicUsize>, Arc<Vec<String>>);

    /// Plays back one canned SSE body per request, counting round trips.
    async fn stub_handler(State((hits, bodies)): State<StubState>) -> impl IntoResponse {
        let n = hits.fetch_add(1, Ordering::SeqCst);
        let body = bodies.get(n).cloned().unwrap_or_default();
        (
            [(axum::http::header::CONTENT_TYPE, "text/event-stream")],
            body,
        )
    }

    async fn spawn_stub(bodies: Vec<String>) -> (String, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let state: StubState = (hits.clone(), Arc::new(bodies));
        let app = Router::new()
            .route("/v1/chat/completions", post(stub_handler))
            .with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}/v1/chat/completions", addr), hits)
    }

    fn sse_body(lines: &[&str]) -> String {
        let mut body = String::new();
        for line in lines {
            body.push_str("data: ");
            body.push_str(line);
            body.push_str("\n\n");
        }
        body.push_str("data: [DONE]\n\n");
        body
    }

    fn context(
        runner: Arc<dyn ToolRunner>,
        with_tools: bool,
        events: mpsc::Sender<StreamEvent>,
    ) -> TurnContext {
        TurnContext {
            client: reqwest::Client::new(),
            api_key: "sk-test".into(),
            model_id: "gpt-4o".into(),
            history: vec![ChatMessage::new(Role::User, "what happened today?")],
            tools: available_tools(with_tools),
            executor: runner,
            events,
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn tool_turn_resumes_exactly_once_and_drops_followup_requests() {
        let round1 = sse_body(&[
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"web_search","arguments":"{\"query\":\"news\"}"}}]},"finish_reason":null}]}"#,
        ]);
        // The resumed round answers but also asks for another tool.
        let round2 = sse_body(&[
            r#"{"choices":[{"delta":{"content":"Here is what happened."},"finish_reason":null}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_2","function":{"name":"web_search","arguments":"{}"}}]},"finish_reason":null}]}"#,
        ]);
        let (endpoint, hits) = spawn_stub(vec![round1, round2]).await;

        let runner = Arc::new(CountingRunner {
            executed: AtomicUsize::new(0),
        });
        let (tx, mut rx) = mpsc::channel(32);
        let ctx = context(runner.clone(), true, tx);

        OpenAiOrchestrator::at(endpoint)
            .stream_turn(ctx)
            .await
            .unwrap();

        // One initial round plus exactly one resume; call_2 never executes.
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(runner.executed.load(Ordering::SeqCst), 1);

        let mut tool_calls = 0;
        let mut text = String::new();
        while let Ok(event) = rx.try_recv() {
            match event {
                StreamEvent::ToolCall(call) => {
                    tool_calls += 1;
                    assert_eq!(call.id.as_deref(), Some("call_1"));
                }
                StreamEvent::Text { delta } => text.push_str(&delta),
                StreamEvent::ToolResult(_) => {}
            }
        }
        assert_eq!(tool_calls, 1);
        assert_eq!(text, "Here is what happened.");
    }

    #[tokio::test]
    async fn plain_turn_makes_a_single_round_trip() {
        let round = sse_body(&[
            r#"{"choices":[{"delta":{"content":"Four."},"finish_reason":null}]}"#,
        ]);
        let (endpoint, hits) = spawn_stub(vec![round]).await;

        let runner = Arc::new(CountingRunner {
            executed: AtomicUsize::new(0),
        });
        let (tx, mut rx) = mpsc::channel(32);
        let ctx = context(runner.clone(), false, tx);

        OpenAiOrchestrator::at(endpoint)
            .stream_turn(ctx)
            .await
            .unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(runner.executed.load(Ordering::SeqCst), 0);
        assert!(matches!(rx.try_recv(), Ok(StreamEvent::Text { .. })));
    }
}
