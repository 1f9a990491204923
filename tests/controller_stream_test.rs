use prism::controller::{ChatStreamController, ChatTurn, MessageStore, TURN_FAILURE_MESSAGE};
use prism::keys::HostKeys;
use prism::models::{resolve_model, Provider};
use prism::orchestrator::{ToolOrchestrator, TurnContext};
use prism::types::{PrismError, Result, StreamEvent, ToolCall, ToolResult};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct MemoryStore {
    snapshots: Mutex<HashMap<String, Vec<String>>>,
    finalized: Mutex<HashMap<String, Vec<String>>>,
}

impl MemoryStore {
    fn snapshot_count(&self, id: &str) -> usize {
        self.snapshots
            .lock()
            .unwrap()
            .get(id)
            .map(|v| v.len())
            .unwrap_or(0)
    }

    fn final_content(&self, id: &str) -> Option<String> {
        self.finalized
            .lock()
            .unwrap()
            .get(id)
            .and_then(|v| v.last().cloned())
    }

    fn finalize_count(&self, id: &str) -> usize {
        self.finalized
            .lock()
            .unwrap()
            .get(id)
            .map(|v| v.len())
            .unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl MessageStore for MemoryStore {
    async fn update_content(&self, message_id: &str, content: &str) -> Result<()> {
        self.snapshots
            .lock()
            .unwrap()
            .entry(message_id.to_string())
            .or_default()
            .push(content.to_string());
        Ok(())
    }

    async fn finalize_content(&self, message_id: &str, content: &str) -> Result<()> {
        self.finalized
            .lock()
            .unwrap()
            .entry(message_id.to_string())
            .or_default()
            .push(content.to_string());
        Ok(())
    }
}

struct NullRunner;

#[async_trait::async_trait]
impl prism::tools::ToolRunner for NullRunner {
    async fn execute(&self, call: &ToolCall) -> ToolResult {
        ToolResult {
            tool_call_id: call.id.clone(),
            content: "unused".to_string(),
        }
    }
}

/// Emits a fixed script of events, then succeeds or fails.
struct ScriptedOrchestrator {
    events: Vec<StreamEvent>,
    fail: bool,
}

#[async_trait::async_trait]
impl ToolOrchestrator for ScriptedOrchestrator {
    async fn stream_turn(&self, ctx: TurnContext) -> Result<()> {
        for event in &self.events {
            ctx.emit(event.clone()).await;
        }
        if self.fail {
            Err(PrismError::Provider(Provider::OpenAi, "upstream exploded".to_string()).into())
        } else {
            Ok(())
        }
    }
}

/// Emits one delta, then idles until the turn is cancelled.
struct HangingOrchestrator;

#[async_trait::async_trait]
impl ToolOrchestrator for HangingOrchestrator {
    async fn stream_turn(&self, ctx: TurnContext) -> Result<()> {
        ctx.emit(StreamEvent::Text {
            delta: "partial answer".to_string(),
        })
        .await;
        ctx.cancel.cancelled().await;
        Ok(())
    }
}

fn text(delta: &str) -> StreamEvent {
    StreamEvent::Text {
        delta: delta.to_string(),
    }
}

fn setup(store: Arc<MemoryStore>) -> (ChatStreamController, ChatTurn) {
    let controller = ChatStreamController::new(
        reqwest::Client::new(),
        HostKeys::default(),
        store,
        Arc::new(NullRunner),
    );
    let turn = ChatTurn {
        message_id: "msg_test".to_string(),
        history: Vec::new(),
        model: resolve_model("GPT-4o").unwrap(),
        user_api_key: Some("sk-test".to_string()),
        web_search_enabled: false,
    };
    (controller, turn)
}

async fn drain(mut rx: mpsc::Receiver<StreamEvent>) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn deltas_accumulate_and_finalize_once() {
    let store = Arc::new(MemoryStore::default());
    let (controller, turn) = setup(store.clone());
    let orchestrator = Arc::new(ScriptedOrchestrator {
        events: vec![text("Hello"), text(", "), text("world")],
        fail: false,
    });

    let (tx, rx) = mpsc::channel(16);
    controller
        .run_with(orchestrator, turn, tx, CancellationToken::new())
        .await;

    // Every delta produced a persisted snapshot of the growing buffer.
    assert_eq!(store.snapshot_count("msg_test"), 3);
    assert_eq!(
        store.final_content("msg_test").as_deref(),
        Some("Hello, world")
    );
    assert_eq!(store.finalize_count("msg_test"), 1);

    let events = drain(rx).await;
    assert_eq!(events, vec![text("Hello"), text(", "), text("world")]);
}

#[tokio::test]
async fn empty_stream_finalizes_empty_content() {
    let store = Arc::new(MemoryStore::default());
    let (controller, turn) = setup(store.clone());
    let orchestrator = Arc::new(ScriptedOrchestrator {
        events: Vec::new(),
        fail: false,
    });

    let (tx, _rx) = mpsc::channel(16);
    controller
        .run_with(orchestrator, turn, tx, CancellationToken::new())
        .await;

    assert_eq!(store.final_content("msg_test").as_deref(), Some(""));
    assert_eq!(store.finalize_count("msg_test"), 1);
}

#[tokio::test]
async fn failed_turn_finalizes_with_failure_message() {
    let store = Arc::new(MemoryStore::default());
    let (controller, turn) = setup(store.clone());
    let orchestrator = Arc::new(ScriptedOrchestrator {
        events: vec![text("I was about to say")],
        fail: true,
    });

    let (tx, rx) = mpsc::channel(16);
    controller
        .run_with(orchestrator, turn, tx, CancellationToken::new())
        .await;

    let final_content = store.final_content("msg_test").unwrap();
    assert!(final_content.starts_with(TURN_FAILURE_MESSAGE));
    assert!(final_content.contains("upstream exploded"));
    assert_eq!(store.finalize_count("msg_test"), 1);

    // The client also sees the failure text before the stream closes.
    let events = drain(rx).await;
    assert_eq!(events.last(), Some(&text(&final_content)));
}

#[tokio::test]
async fn missing_credential_finalizes_readable_message() {
    let store = Arc::new(MemoryStore::default());
    let (controller, mut turn) = setup(store.clone());
    turn.user_api_key = None;

    let orchestrator = Arc::new(ScriptedOrchestrator {
        events: vec![text("never streamed")],
        fail: false,
    });

    let (tx, rx) = mpsc::channel(16);
    controller
        .run_with(orchestrator, turn, tx, CancellationToken::new())
        .await;

    // The turn never reaches the orchestrator; the placeholder is filled
    // with an explanation instead.
    let final_content = store.final_content("msg_test").unwrap();
    assert!(final_content.contains("No API key"));
    assert!(final_content.contains("openai"));
    assert_eq!(store.snapshot_count("msg_test"), 0);
    assert_eq!(store.finalize_count("msg_test"), 1);

    let events = drain(rx).await;
    assert_eq!(events, vec![text(&final_content)]);
}

#[tokio::test]
async fn aborted_turn_finalizes_partial_content_as_success() {
    let store = Arc::new(MemoryStore::default());
    let (controller, turn) = setup(store.clone());
    let cancel = CancellationToken::new();

    let (tx, mut rx) = mpsc::channel(16);
    let canceller = cancel.clone();
    let watcher = tokio::spawn(async move {
        // Cancel as soon as the first delta reaches the client.
        let first = rx.recv().await;
        canceller.cancel();
        first
    });

    controller
        .run_with(Arc::new(HangingOrchestrator), turn, tx, cancel)
        .await;

    let first = watcher.await.unwrap();
    assert_eq!(first, Some(text("partial answer")));
    assert_eq!(
        store.final_content("msg_test").as_deref(),
        Some("partial answer")
    );
    assert_eq!(store.finalize_count("msg_test"), 1);
}

#[tokio::test]
async fn tool_events_are_relayed_but_not_persisted() {
    let store = Arc::new(MemoryStore::default());
    let (controller, turn) = setup(store.clone());
    let orchestrator = Arc::new(ScriptedOrchestrator {
        events: vec![
            StreamEvent::ToolCall(ToolCall {
                id: Some("call_1".to_string()),
                name: "web_search".to_string(),
                args: serde_json::json!({"query": "rust"}),
            }),
            StreamEvent::ToolResult(ToolResult {
                tool_call_id: Some("call_1".to_string()),
                content: "[]".to_string(),
            }),
            text("Answer."),
        ],
        fail: false,
    });

    let (tx, rx) = mpsc::channel(16);
    controller
        .run_with(orchestrator, turn, tx, CancellationToken::new())
        .await;

    // Only the text delta touched the store.
    assert_eq!(store.snapshot_count("msg_test"), 1);
    assert_eq!(store.final_content("msg_test").as_deref(), Some("Answer."));

    let events = drain(rx).await;
    assert_eq!(events.len(), 3);
    assert!(matches!(events[0], StreamEvent::ToolCall(_)));
    assert!(matches!(events[1], StreamEvent::ToolResult(_)));
}
