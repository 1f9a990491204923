use crate::keys::{self, HostKeys};
use crate::models::ModelConfig;
use crate::orchestrator::{orchestrator_for, ToolOrchestrator, TurnContext};
use crate::tools::{available_tools, ToolRunner};
use crate::types::{ChatMessage, Result, StreamEvent};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Shown to the user when a turn dies before producing a usable answer.
pub const TURN_FAILURE_MESSAGE: &str =
    "Sorry, something went wrong while generating this response. Please try again.";

/// A missing credential still ends in a readable assistant message, never a
/// silently dropped turn.
pub fn missing_key_message(model: &ModelConfig) -> String {
    format!(
        "No API key is available for {} (provider: {}). Add your own key in settings, or ask \
         the operator to configure one.",
        model.name, model.provider
    )
}

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Persistence seam for assistant messages. `update_content` lands each
/// intermediate snapshot; `finalize_content` marks the message complete and
/// must be safe to call on an already-final message.
#[async_trait::async_trait]
pub trait MessageStore: Send + Sync {
    async fn update_content(&self, message_id: &str, content: &str) -> Result<()>;
    async fn finalize_content(&self, message_id: &str, content: &str) -> Result<()>;
}

/// One assistant turn to run: the placeholder row to fill, the transcript to
/// send upstream, the resolved model, and the caller's own key if they sent
/// one.
pub struct ChatTurn {
    pub message_id: String,
    pub history: Vec<ChatMessage>,
    pub model: ModelConfig,
    pub user_api_key: Option<String>,
    pub web_search_enabled: bool,
}

/// Owns the lifecycle of a streamed assistant message.
///
/// The orchestrator runs on its own task and feeds events through a
/// channel. The controller appends text deltas to a buffer, persists each
/// snapshot before touching the next event so the stored transcript never
/// runs ahead of what was forwarded, relays every event to the client, and
/// finalizes the message exactly once no matter how the turn ends.
pub struct ChatStreamController {
    client: reqwest::Client,
    host_keys: HostKeys,
    store: Arc<dyn MessageStore>,
    executor: Arc<dyn ToolRunner>,
}

impl ChatStreamController {
    pub fn new(
        client: reqwest::Client,
        host_keys: HostKeys,
        store: Arc<dyn MessageStore>,
        executor: Arc<dyn ToolRunner>,
    ) -> Self {
        Self {
            client,
            host_keys,
            store,
            executor,
        }
    }

    pub async fn run(
        &self,
        turn: ChatTurn,
        client_tx: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
    ) {
        let orchestrator = orchestrator_for(turn.model.provider);
        self.run_with(orchestrator, turn, client_tx, cancel).await
    }

    pub async fn run_with(
        &self,
        orchestrator: Arc<dyn ToolOrchestrator>,
        turn: ChatTurn,
        client_tx: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
    ) {
        let resolved = match keys::resolve(
            turn.model.provider,
            turn.user_api_key.as_deref(),
            &self.host_keys,
        ) {
            Ok(resolved) => resolved,
            Err(e) => {
                tracing::warn!("[CTRL] {}", e);
                let message = missing_key_message(&turn.model);
                let _ = client_tx
                    .send(StreamEvent::Text {
                        delta: message.clone(),
                    })
                    .await;
                if let Err(e) = self.store.finalize_content(&turn.message_id, &message).await {
                    tracing::error!("[CTRL] Failed to finalize message: {}", e);
                }
                return;
            }
        };
        tracing::debug!(
            "[CTRL] Using {} key for {}",
            resolved.source,
            turn.model.provider
        );

        let (events_tx, mut events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let ctx = TurnContext {
            client: self.client.clone(),
            api_key: resolved.key,
            model_id: turn.model.model_id.clone(),
            history: turn.history,
            tools: available_tools(turn.web_search_enabled),
            executor: self.executor.clone(),
            events: events_tx,
            cancel: cancel.clone(),
        };
        let model_id = turn.model.model_id.clone();
        let task = tokio::spawn(async move { orchestrator.stream_turn(ctx).await });

        let mut buffer = String::new();
        while let Some(event) = events_rx.recv().await {
            if let StreamEvent::Text { delta } = &event {
                buffer.push_str(delta);
                if let Err(e) = self.store.update_content(&turn.message_id, &buffer).await {
                    tracing::error!("[CTRL] Failed to persist snapshot: {}", e);
                }
            }
            // A send failure means the client went away; the turn keeps
            // running so the transcript still lands in the store.
            let _ = client_tx.send(event).await;
        }

        let outcome = match task.await {
            Ok(outcome) => outcome,
            Err(join_error) => {
                tracing::error!("[CTRL] Orchestrator task panicked: {}", join_error);
                self.finalize_failure(&turn.message_id, "internal error", &client_tx)
                    .await;
                return;
            }
        };

        match outcome {
            Ok(()) => {
                if buffer.is_empty() && !cancel.is_cancelled() {
                    tracing::warn!("[CTRL] Model {} produced an empty stream", model_id);
                }
                if cancel.is_cancelled() {
                    tracing::info!(
                        "[CTRL] Turn aborted; finalizing partial content ({} chars)",
                        buffer.len()
                    );
                }
                if let Err(e) = self.store.finalize_content(&turn.message_id, &buffer).await {
                    tracing::error!("[CTRL] Failed to finalize message: {}", e);
                }
            }
            Err(e) => {
                tracing::error!("[CTRL] Turn failed: {}", e);
                self.finalize_failure(&turn.message_id, &e.inner.to_string(), &client_tx)
                    .await;
            }
        }
    }

    async fn finalize_failure(
        &self,
        message_id: &str,
        reason: &str,
        client_tx: &mpsc::Sender<StreamEvent>,
    ) {
        let text = format!("{} ({})", TURN_FAILURE_MESSAGE, reason);
        let _ = client_tx
            .send(StreamEvent::Text {
                delta: text.clone(),
            })
            .await;
        if let Err(e) = self.store.finalize_content(message_id, &text).await {
            tracing::error!("[CTRL] Failed to finalize failed message: {}", e);
        }
    }
}
