use crate::types::{ToolCall, ToolResult};
use serde::{Deserialize, Serialize};

pub const WEB_SEARCH_TOOL: &str = "web_search";
pub const MAX_SEARCH_RESULTS: u32 = 5;

const TAVILY_SEARCH_URL: &str = "https://api.tavily.com/search";

/// A capability advertised to the model: name, description and a
/// JSON-schema parameter object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// The ordered set of tools for one turn. A single flag currently gates the
/// only tool we ship.
pub fn available_tools(web_search_enabled: bool) -> Vec<ToolDefinition> {
    if !web_search_enabled {
        return Vec::new();
    }
    vec![ToolDefinition {
        name: WEB_SEARCH_TOOL.to_string(),
        description: "Search the web for up-to-date information. Use this for questions about \
                      current events or anything beyond your training data."
            .to_string(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                }
            },
            "required": ["query"]
        }),
    }]
}

/// Executes tool calls on behalf of the orchestrators. A trait so tests can
/// count invocations without touching the network.
#[async_trait::async_trait]
pub trait ToolRunner: Send + Sync {
    async fn execute(&self, call: &ToolCall) -> ToolResult;
}

pub struct ToolExecutor {
    client: reqwest::Client,
    search_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct TavilyRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    max_results: u32,
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub score: f64,
}

impl ToolExecutor {
    pub fn new(client: reqwest::Client, search_key: Option<String>) -> Self {
        Self { client, search_key }
    }

    /// Run one web search and serialize the results for the model. Every
    /// failure path returns readable text instead of an error so the
    /// generation loop stays alive and the model can explain the problem.
    async fn web_search(&self, args: &serde_json::Value) -> String {
        let query = match args.get("query").and_then(|v| v.as_str()) {
            Some(q) if !q.trim().is_empty() => q.trim(),
            _ => return "Web search failed: no query was provided.".to_string(),
        };

        let api_key = match self.search_key.as_deref() {
            Some(k) => k,
            None => {
                tracing::warn!("[TOOLS] web_search invoked without TAVILY_API_KEY configured");
                return "Web search is not configured on this server (missing search API key)."
                    .to_string();
            }
        };

        tracing::info!("[TOOLS] web_search: {:?}", query);

        let request = TavilyRequest {
            api_key,
            query,
            max_results: MAX_SEARCH_RESULTS,
        };

        let response = match self.client.post(TAVILY_SEARCH_URL).json(&request).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::error!("[TOOLS] web_search transport error: {}", e);
                return format!("Web search failed: {}", e);
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!("[TOOLS] web_search upstream error {}: {}", status, body);
            return format!("Web search failed with status {}.", status);
        }

        match response.json::<TavilyResponse>().await {
            Ok(parsed) => serde_json::to_string(&parsed.results)
                .unwrap_or_else(|e| format!("Web search failed to serialize results: {}", e)),
            Err(e) => format!("Web search returned an unreadable response: {}", e),
        }
    }
}

#[async_trait::async_trait]
impl ToolRunner for ToolExecutor {
    async fn execute(&self, call: &ToolCall) -> ToolResult {
        let content = match call.name.as_str() {
            WEB_SEARCH_TOOL => self.web_search(&call.args).await,
            other => {
                tracing::warn!("[TOOLS] Unknown tool requested: {}", other);
                format!("Unknown tool: {}", other)
            }
        };
        ToolResult {
            tool_call_id: call.id.clone(),
            content,
        }
    }
}
