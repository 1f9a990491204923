use crate::db::SqliteMessageStore;
use crate::keys::HostKeys;
use crate::tools::ToolExecutor;
use crate::types::{ChatMessage, Role};
use clap::Parser;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[arg(long, default_value_t = 8080)]
    pub port: u16,
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,
    #[arg(long, default_value = "prism.db")]
    pub database: String,
    #[arg(long, default_value_t = 300)]
    pub request_timeout_secs: u64,
    #[arg(long, default_value_t = 10)]
    pub connect_timeout_secs: u64,
    #[arg(long, default_value_t = 10 * 1024 * 1024)]
    pub max_body_size: usize,
}

#[derive(Clone)]
pub struct AppState {
    pub client: reqwest::Client,
    pub store: Arc<SqliteMessageStore>,
    pub host_keys: HostKeys,
    pub executor: Arc<ToolExecutor>,
    pub args: Arc<Args>,
}

/// Body of POST /api/chat, as sent by the frontend.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawChatRequest {
    pub messages: Vec<RawMessage>,
    pub model: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub user_api_key: Option<String>,
    #[serde(default)]
    pub web_search_enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct RawMessage {
    pub role: Role,
    pub content: String,
}

impl RawMessage {
    pub fn to_chat_message(&self) -> ChatMessage {
        ChatMessage::new(self.role, self.content.clone())
    }
}

/// Body of POST /api/title.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTitleRequest {
    pub message: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub user_api_key: Option<String>,
}
