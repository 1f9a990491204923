//! Wire schema for the OpenAI chat completions dialect, which OpenRouter
//! also speaks.

use crate::tools::ToolDefinition;
use crate::types::{ChatMessage, Role, ToolCall, ToolResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<WireTool>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum WireMessage {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<WireToolCall>,
    },
    Tool {
        content: String,
        tool_call_id: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireToolCall {
    pub id: String,
    pub r#type: String, // always "function"
    pub function: WireFunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireFunctionCall {
    pub name: String,
    /// Raw JSON text, not a parsed object.
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct WireTool {
    pub r#type: String,
    pub function: WireFunctionDefinition,
}

#[derive(Debug, Clone, Serialize)]
pub struct WireFunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl ChatRequest {
    pub fn new(model_id: &str, history: &[ChatMessage], tools: &[ToolDefinition]) -> Self {
        Self {
            model: model_id.to_string(),
            messages: history.iter().map(wire_message).collect(),
            stream: None,
            max_tokens: None,
            tools: if tools.is_empty() {
                None
            } else {
                Some(tools.iter().map(wire_tool).collect())
            },
        }
    }

    pub fn streaming(mut self) -> Self {
        self.stream = Some(true);
        self
    }

    /// Append the assistant turn that requested tools, then one tool message
    /// per result, in the order the calls arrived.
    pub fn push_tool_round(&mut self, calls: &[ToolCall], results: &[ToolResult]) {
        self.messages.push(WireMessage::Assistant {
            content: None,
            tool_calls: calls.iter().map(wire_tool_call).collect(),
        });
        for result in results {
            self.messages.push(WireMessage::Tool {
                content: result.content.clone(),
                tool_call_id: result.tool_call_id.clone().unwrap_or_default(),
            });
        }
    }
}

fn wire_message(msg: &ChatMessage) -> WireMessage {
    match msg.role {
        Role::System => WireMessage::System {
            content: msg.content.clone(),
        },
        // Data-carrying frontend messages travel as user turns.
        Role::User | Role::Data => WireMessage::User {
            content: msg.content.clone(),
        },
        Role::Assistant => WireMessage::Assistant {
            content: Some(msg.content.clone()),
            tool_calls: Vec::new(),
        },
    }
}

fn wire_tool(def: &ToolDefinition) -> WireTool {
    WireTool {
        r#type: "function".to_string(),
        function: WireFunctionDefinition {
            name: def.name.clone(),
            description: def.description.clone(),
            parameters: def.parameters.clone(),
        },
    }
}

fn wire_tool_call(call: &ToolCall) -> WireToolCall {
    WireToolCall {
        id: call.id.clone().unwrap_or_default(),
        r#type: "function".to_string(),
        function: WireFunctionCall {
            name: call.name.clone(),
            arguments: call.args.to_string(),
        },
    }
}

// --- Streaming chunks ---

#[derive(Debug, Clone, Deserialize)]
pub struct StreamChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChunkChoice {
    pub delta: ChunkDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChunkDelta {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallDelta {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: Option<FunctionDelta>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FunctionDelta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

// --- Non-streaming completions (title generation, tool follow-ups) ---

#[derive(Debug, Clone, Deserialize)]
pub struct Completion {
    #[serde(default)]
    pub choices: Vec<CompletionChoice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompletionChoice {
    pub message: CompletionMessage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompletionMessage {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<WireToolCall>>,
}

// --- Line classification ---

#[derive(Debug, Deserialize)]
pub struct ErrorLine {
    pub error: ErrorDetails,
}

#[derive(Debug, Deserialize)]
pub struct ErrorDetails {
    pub message: String,
    #[serde(default)]
    pub code: Option<serde_json::Value>,
}

#[derive(Debug)]
pub enum LineEvent {
    Chunk(StreamChunk),
    Error(ErrorLine),
    Unknown(String),
}

/// Classify one `data:` payload. Errors are tried first since the error
/// shape is more specific than a chunk with defaulted fields.
pub fn parse_data_line(data: &str) -> LineEvent {
    if let Ok(err) = serde_json::from_str::<ErrorLine>(data) {
        return LineEvent::Error(err);
    }
    if let Ok(chunk) = serde_json::from_str::<StreamChunk>(data) {
        if !chunk.choices.is_empty() {
            return LineEvent::Chunk(chunk);
        }
    }
    tracing::debug!("[STREAM] Unknown line format: {:.200}", data);
    LineEvent::Unknown(data.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_line_with_delta_parses_as_chunk() {
        let json = r#"{"id":"x","choices":[{"delta":{"content":"Hi"},"finish_reason":null}]}"#;
        match parse_data_line(json) {
            LineEvent::Chunk(c) => {
                assert_eq!(c.choices[0].delta.content.as_deref(), Some("Hi"))
            }
            other => panic!("expected chunk, got {:?}", other),
        }
    }

    #[test]
    fn data_line_with_error_key_parses_as_error() {
        let json = r#"{"error":{"message":"overloaded","code":529}}"#;
        match parse_data_line(json) {
            LineEvent::Error(e) => assert_eq!(e.error.message, "overloaded"),
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[test]
    fn unrecognized_line_is_unknown() {
        match parse_data_line(r#"{"ping":true}"#) {
            LineEvent::Unknown(_) => {}
            other => panic!("expected unknown, got {:?}", other),
        }
    }

    #[test]
    fn tool_round_keeps_result_order() {
        let mut req = ChatRequest::new("gpt-4o", &[], &[]);
        let calls = vec![
            ToolCall {
                id: Some("call_a".into()),
                name: "web_search".into(),
                args: serde_json::json!({"query": "a"}),
            },
            ToolCall {
                id: Some("call_b".into()),
                name: "web_search".into(),
                args: serde_json::json!({"query": "b"}),
            },
        ];
        let results = vec![
            ToolResult {
                tool_call_id: Some("call_a".into()),
                content: "first".into(),
            },
            ToolResult {
                tool_call_id: Some("call_b".into()),
                content: "second".into(),
            },
        ];
        req.push_tool_round(&calls, &results);
        assert_eq!(req.messages.len(), 3);
        match &req.messages[1] {
            WireMessage::Tool { tool_call_id, .. } => assert_eq!(tool_call_id, "call_a"),
            other => panic!("expected tool message, got {:?}", other),
        }
    }

    #[test]
    fn tool_definitions_serialize_under_function_key() {
        let tools = crate::tools::available_tools(true);
        let req = ChatRequest::new("gpt-4o", &[], &tools);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["tools"][0]["type"], "function");
        assert_eq!(json["tools"][0]["function"]["name"], "web_search");
    }
}
