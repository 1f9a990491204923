//! Wire schema for the Anthropic messages API. System prompts live at the
//! request root and `max_tokens` is mandatory.

use crate::tools::ToolDefinition;
use crate::types::{ChatMessage, Role, ToolCall, ToolResult};
use serde::{Deserialize, Serialize};

pub const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const DEFAULT_MAX_TOKENS: u32 = 8192;

#[derive(Debug, Serialize)]
pub struct MessagesRequest {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub messages: Vec<Message>,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolSpec>>,
}

#[derive(Debug, Serialize)]
pub struct Message {
    pub role: String,
    pub content: Content,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

#[derive(Debug, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

impl MessagesRequest {
    /// Leading system messages move to the root `system` field; the rest of
    /// the history becomes alternating user/assistant messages.
    pub fn new(model_id: &str, history: &[ChatMessage], tools: &[ToolDefinition]) -> Self {
        let mut system = None;
        let mut messages = Vec::with_capacity(history.len());
        for msg in history {
            match msg.role {
                Role::System => {
                    system = Some(msg.content.clone());
                }
                Role::User | Role::Data => messages.push(Message {
                    role: "user".to_string(),
                    content: Content::Text(msg.content.clone()),
                }),
                Role::Assistant => messages.push(Message {
                    role: "assistant".to_string(),
                    content: Content::Text(msg.content.clone()),
                }),
            }
        }
        Self {
            model: model_id.to_string(),
            system,
            messages,
            max_tokens: DEFAULT_MAX_TOKENS,
            stream: None,
            tools: if tools.is_empty() {
                None
            } else {
                Some(
                    tools
                        .iter()
                        .map(|t| ToolSpec {
                            name: t.name.clone(),
                            description: t.description.clone(),
                            input_schema: t.parameters.clone(),
                        })
                        .collect(),
                )
            },
        }
    }

    pub fn streaming(mut self) -> Self {
        self.stream = Some(true);
        self
    }

    /// Tool rounds are an assistant message of `tool_use` blocks followed by
    /// a user message of `tool_result` blocks.
    pub fn push_tool_round(&mut self, calls: &[ToolCall], results: &[ToolResult]) {
        self.messages.push(Message {
            role: "assistant".to_string(),
            content: Content::Blocks(
                calls
                    .iter()
                    .map(|c| ContentBlock::ToolUse {
                        id: c.id.clone().unwrap_or_default(),
                        name: c.name.clone(),
                        input: c.args.clone(),
                    })
                    .collect(),
            ),
        });
        self.messages.push(Message {
            role: "user".to_string(),
            content: Content::Blocks(
                results
                    .iter()
                    .map(|r| ContentBlock::ToolResult {
                        tool_use_id: r.tool_call_id.clone().unwrap_or_default(),
                        content: r.content.clone(),
                    })
                    .collect(),
            ),
        });
    }
}

// --- Streaming events ---

#[derive(Debug, Deserialize)]
pub struct StreamEventLine {
    pub r#type: String,
    #[serde(default)]
    pub delta: Option<DeltaPayload>,
    #[serde(default)]
    pub error: Option<ErrorPayload>,
}

#[derive(Debug, Deserialize)]
pub struct DeltaPayload {
    #[serde(default)]
    pub r#type: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ErrorPayload {
    #[serde(default)]
    pub r#type: Option<String>,
    pub message: String,
}

// --- Non-streaming responses ---

#[derive(Debug, Deserialize)]
pub struct MessagesResponse {
    #[serde(default)]
    pub content: Vec<ResponseBlock>,
    #[serde(default)]
    pub stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChatMessage;

    #[test]
    fn system_message_moves_to_root_field() {
        let history = vec![
            ChatMessage::new(Role::System, "Be terse."),
            ChatMessage::new(Role::User, "Hello"),
        ];
        let req = MessagesRequest::new("claude-3-5-sonnet-20241022", &history, &[]);
        assert_eq!(req.system.as_deref(), Some("Be terse."));
        assert_eq!(req.messages.len(), 1);
    }

    #[test]
    fn tool_round_serializes_result_blocks() {
        let mut req = MessagesRequest::new("claude-3-5-sonnet-20241022", &[], &[]);
        req.push_tool_round(
            &[ToolCall {
                id: Some("toolu_1".into()),
                name: "web_search".into(),
                args: serde_json::json!({"query": "x"}),
            }],
            &[ToolResult {
                tool_call_id: Some("toolu_1".into()),
                content: "results".into(),
            }],
        );
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["messages"][0]["role"], "assistant");
        assert_eq!(json["messages"][0]["content"][0]["type"], "tool_use");
        assert_eq!(json["messages"][1]["role"], "user");
        assert_eq!(
            json["messages"][1]["content"][0]["tool_use_id"],
            "toolu_1"
        );
    }

    #[test]
    fn text_delta_event_parses() {
        let json = r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#;
        let event: StreamEventLine = serde_json::from_str(json).unwrap();
        assert_eq!(event.r#type, "content_block_delta");
        assert_eq!(event.delta.unwrap().text.as_deref(), Some("Hi"));
    }

    #[test]
    fn tool_use_response_block_parses() {
        let json = r#"{"content":[{"type":"text","text":"Checking."},{"type":"tool_use","id":"toolu_9","name":"web_search","input":{"query":"rust"}}],"stop_reason":"tool_use"}"#;
        let resp: MessagesResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.stop_reason.as_deref(), Some("tool_use"));
        match &resp.content[1] {
            ResponseBlock::ToolUse { name, input, .. } => {
                assert_eq!(name, "web_search");
                assert_eq!(input["query"], "rust");
            }
            other => panic!("expected tool_use, got {:?}", other),
        }
    }
}
