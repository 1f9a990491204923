//! Provider orchestrators: one streaming turn against an upstream model,
//! including at most one tool round.
//!
//! Every orchestrator follows the same single-hop contract: stream (or
//! fetch) the first model round; if it requested tools, execute them in
//! order and resume the model exactly once with the results; stream the
//! resumed round to completion. Tool calls in a resumed round are logged
//! and dropped so a misbehaving model cannot loop.

mod anthropic;
mod google;
mod openai;

pub use anthropic::AnthropicOrchestrator;
pub use google::GoogleOrchestrator;
pub use openai::OpenAiOrchestrator;

use crate::models::Provider;
use crate::tools::{ToolDefinition, ToolRunner};
use crate::types::{ChatMessage, Result, StreamEvent, ToolCall, ToolResult};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Everything one turn needs, owned so the turn can run on its own task.
pub struct TurnContext {
    pub client: reqwest::Client,
    pub api_key: String,
    pub model_id: String,
    pub history: Vec<ChatMessage>,
    pub tools: Vec<ToolDefinition>,
    pub executor: Arc<dyn ToolRunner>,
    pub events: mpsc::Sender<StreamEvent>,
    pub cancel: CancellationToken,
}

impl TurnContext {
    /// Send failures mean the consumer went away; the turn keeps running so
    /// the transcript still gets persisted.
    pub async fn emit(&self, event: StreamEvent) {
        if self.events.send(event).await.is_err() {
            tracing::trace!("Event consumer dropped; continuing turn for persistence");
        }
    }
}

#[async_trait::async_trait]
pub trait ToolOrchestrator: Send + Sync {
    /// Run one full turn, emitting deltas and tool activity as events.
    /// Returning Ok after cancellation is deliberate: whatever was emitted
    /// before the cancel stands as the turn's output.
    async fn stream_turn(&self, ctx: TurnContext) -> Result<()>;
}

pub fn orchestrator_for(provider: Provider) -> Arc<dyn ToolOrchestrator> {
    match provider {
        Provider::Google => Arc::new(GoogleOrchestrator),
        Provider::Anthropic => Arc::new(AnthropicOrchestrator),
        Provider::OpenAi => Arc::new(OpenAiOrchestrator::openai()),
        Provider::OpenRouter => Arc::new(OpenAiOrchestrator::openrouter()),
    }
}

/// Execute a batch of tool calls sequentially, emitting a `tool_call` event
/// before each execution and a `tool_result` event after. Results come back
/// in call order so every dialect can pair them positionally.
pub(crate) async fn run_tool_batch(ctx: &TurnContext, calls: &[ToolCall]) -> Vec<ToolResult> {
    let mut results = Vec::with_capacity(calls.len());
    for call in calls {
        if ctx.cancel.is_cancelled() {
            tracing::info!("[ORCH] Turn cancelled mid-batch; stopping tool execution");
            break;
        }
        tracing::info!("[ORCH] Executing tool {} ({:?})", call.name, call.id);
        ctx.emit(StreamEvent::ToolCall(call.clone())).await;
        let result = ctx.executor.execute(call).await;
        ctx.emit(StreamEvent::ToolResult(result.clone())).await;
        results.push(result);
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PrismError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRunner {
        executed: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ToolRunner for CountingRunner {
        async fn execute(&self, call: &ToolCall) -> ToolResult {
            let n = self.executed.fetch_add(1, Ordering::SeqCst);
            ToolResult {
                tool_call_id: call.id.clone(),
                content: format!("result {}", n),
            }
        }
    }

    fn test_context(
        executor: Arc<dyn ToolRunner>,
        events: mpsc::Sender<StreamEvent>,
    ) -> TurnContext {
        TurnContext {
            client: reqwest::Client::new(),
            api_key: "test-key".into(),
            model_id: "test-model".into(),
            history: Vec::new(),
            tools: Vec::new(),
            executor,
            events,
            cancel: CancellationToken::new(),
        }
    }

    fn call(id: &str) -> ToolCall {
        ToolCall {
            id: Some(id.to_string()),
            name: "web_search".into(),
            args: serde_json::json!({"query": id}),
        }
    }

    #[tokio::test]
    async fn batch_executes_sequentially_and_in_order() {
        let runner = Arc::new(CountingRunner {
            executed: AtomicUsize::new(0),
        });
        let (tx, mut rx) = mpsc::channel(32);
        let ctx = test_context(runner.clone(), tx);

        let results = run_tool_batch(&ctx, &[call("call_a"), call("call_b")]).await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].tool_call_id.as_deref(), Some("call_a"));
        assert_eq!(results[0].content, "result 0");
        assert_eq!(results[1].content, "result 1");

        // call, result, call, result
        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(match event {
                StreamEvent::ToolCall(_) => "call",
                StreamEvent::ToolResult(_) => "result",
                StreamEvent::Text { .. } => "text",
            });
        }
        assert_eq!(kinds, ["call", "result", "call", "result"]);
    }

    #[tokio::test]
    async fn cancelled_batch_stops_before_next_tool() {
        let runner = Arc::new(CountingRunner {
            executed: AtomicUsize::new(0),
        });
        let (tx, _rx) = mpsc::channel(32);
        let mut ctx = test_context(runner.clone(), tx);
        let token = CancellationToken::new();
        token.cancel();
        ctx.cancel = token;

        let results = run_tool_batch(&ctx, &[call("call_a")]).await;
        assert!(results.is_empty());
        assert_eq!(runner.executed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn factory_covers_every_provider() {
        for provider in [
            Provider::Google,
            Provider::OpenAi,
            Provider::Anthropic,
            Provider::OpenRouter,
        ] {
            let _ = orchestrator_for(provider);
        }
        // Unknown providers never reach the factory.
        assert!(matches!(
            "mistral".parse::<Provider>(),
            Err(PrismError::UnsupportedProvider(_))
        ));
    }
}
