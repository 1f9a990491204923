//! Wire schema for the Gemini generateContent API. The model id travels in
//! the URL, the API key in a header, system prompts in `systemInstruction`,
//! and tool traffic as `functionCall`/`functionResponse` parts.

use crate::tools::ToolDefinition;
use crate::types::{ChatMessage, Role, ToolCall, ToolResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct GenerateRequest {
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<SystemInstruction>,
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolsEntry>>,
}

#[derive(Debug, Serialize)]
pub struct SystemInstruction {
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Part {
    Text {
        text: String,
    },
    FunctionCall {
        #[serde(rename = "functionCall")]
        function_call: FunctionCall,
    },
    FunctionResponse {
        #[serde(rename = "functionResponse")]
        function_response: FunctionResponse,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionResponse {
    pub name: String,
    pub response: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct ToolsEntry {
    #[serde(rename = "functionDeclarations")]
    pub function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Serialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl GenerateRequest {
    pub fn new(history: &[ChatMessage], tools: &[ToolDefinition]) -> Self {
        let mut system_instruction = None;
        let mut contents = Vec::with_capacity(history.len());
        for msg in history {
            match msg.role {
                Role::System => {
                    system_instruction = Some(SystemInstruction {
                        parts: vec![Part::Text {
                            text: msg.content.clone(),
                        }],
                    });
                }
                Role::User | Role::Data => contents.push(Content {
                    role: "user".to_string(),
                    parts: vec![Part::Text {
                        text: msg.content.clone(),
                    }],
                }),
                Role::Assistant => contents.push(Content {
                    role: "model".to_string(),
                    parts: vec![Part::Text {
                        text: msg.content.clone(),
                    }],
                }),
            }
        }
        Self {
            system_instruction,
            contents,
            tools: if tools.is_empty() {
                None
            } else {
                Some(vec![ToolsEntry {
                    function_declarations: tools
                        .iter()
                        .map(|t| FunctionDeclaration {
                            name: t.name.clone(),
                            description: t.description.clone(),
                            parameters: t.parameters.clone(),
                        })
                        .collect(),
                }])
            },
        }
    }

    /// Gemini has no tool-call ids. Responses are paired to calls by
    /// function name, so results echo the call's name.
    pub fn push_tool_round(&mut self, calls: &[ToolCall], results: &[ToolResult]) {
        self.contents.push(Content {
            role: "model".to_string(),
            parts: calls
                .iter()
                .map(|c| Part::FunctionCall {
                    function_call: FunctionCall {
                        name: c.name.clone(),
                        args: c.args.clone(),
                    },
                })
                .collect(),
        });
        self.contents.push(Content {
            role: "function".to_string(),
            parts: calls
                .iter()
                .zip(results.iter())
                .map(|(call, result)| Part::FunctionResponse {
                    function_response: FunctionResponse {
                        name: call.name.clone(),
                        response: serde_json::json!({ "result": result.content }),
                    },
                })
                .collect(),
        });
    }
}

#[derive(Debug, Deserialize)]
pub struct GenerateResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
}
