//! Conversation title generation. One non-streaming completion against the
//! requested model, sanitized down to a short plain-text label.

use crate::models::{ModelConfig, Provider};
use crate::specs::{anthropic, google, openai};
use crate::types::{ChatMessage, PrismError, Result, Role};

pub const TITLE_MAX_CHARS: usize = 80;

const TITLE_SYSTEM_PROMPT: &str = "Generate a short title (at most 6 words) summarizing the \
                                   user's message. Respond with the title only: no quotes, no \
                                   punctuation, no explanation.";

const OPENAI_CHAT_COMPLETIONS: &str = "https://api.openai.com/v1/chat/completions";
const OPENROUTER_CHAT_COMPLETIONS: &str = "https://openrouter.ai/api/v1/chat/completions";
const ANTHROPIC_MESSAGES: &str = "https://api.anthropic.com/v1/messages";
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub async fn generate_title(
    client: &reqwest::Client,
    model: &ModelConfig,
    api_key: &str,
    first_message: &str,
) -> Result<String> {
    let history = vec![
        ChatMessage::new(Role::System, TITLE_SYSTEM_PROMPT),
        ChatMessage::new(Role::User, first_message),
    ];
    let raw = complete_once(client, model, api_key, &history).await?;
    let title = sanitize_title(&raw);
    tracing::info!("[TITLE] Generated title via {}: {:?}", model.name, title);
    Ok(title)
}

/// One non-streaming completion with no tools, returning the concatenated
/// text of the response.
async fn complete_once(
    client: &reqwest::Client,
    model: &ModelConfig,
    api_key: &str,
    history: &[ChatMessage],
) -> Result<String> {
    match model.provider {
        Provider::OpenAi | Provider::OpenRouter => {
            let endpoint = match model.provider {
                Provider::OpenAi => OPENAI_CHAT_COMPLETIONS,
                _ => OPENROUTER_CHAT_COMPLETIONS,
            };
            let request = openai::ChatRequest::new(&model.model_id, history, &[]);
            let response = client
                .post(endpoint)
                .bearer_auth(api_key)
                .json(&request)
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(upstream_error(model.provider, response).await);
            }
            let completion: openai::Completion = response.json().await?;
            Ok(completion
                .choices
                .first()
                .and_then(|c| c.message.content.clone())
                .unwrap_or_default())
        }
        Provider::Anthropic => {
            let request = anthropic::MessagesRequest::new(&model.model_id, history, &[]);
            let response = client
                .post(ANTHROPIC_MESSAGES)
                .header("x-api-key", api_key)
                .header("anthropic-version", anthropic::ANTHROPIC_VERSION)
                .json(&request)
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(upstream_error(model.provider, response).await);
            }
            let parsed: anthropic::MessagesResponse = response.json().await?;
            let mut text = String::new();
            for block in parsed.content {
                if let anthropic::ResponseBlock::Text { text: t } = block {
                    text.push_str(&t);
                }
            }
            Ok(text)
        }
        Provider::Google => {
            // Key in the header, never the URL: request URLs surface in
            // transport error text and logs.
            let url = format!(
                "{}/models/{}:generateContent",
                GEMINI_BASE_URL, model.model_id
            );
            let request = google::GenerateRequest::new(history, &[]);
            let response = client
                .post(url)
                .header("x-goog-api-key", api_key)
                .json(&request)
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(upstream_error(model.provider, response).await);
            }
            let parsed: google::GenerateResponse = response.json().await?;
            let mut text = String::new();
            for candidate in parsed.candidates {
                if let Some(content) = candidate.content {
                    for part in content.parts {
                        if let google::Part::Text { text: t } = part {
                            text.push_str(&t);
                        }
                    }
                }
            }
            Ok(text)
        }
    }
}

async fn upstream_error(provider: Provider, response: reqwest::Response) -> crate::types::ObservedError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    PrismError::Provider(provider, format!("{}: {}", status, body)).into()
}

/// Strip quoting and colons models like to add, collapse whitespace, and
/// clamp to the display limit.
fn sanitize_title(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, '"' | '\'' | '\u{2018}' | '\u{2019}' | '\u{201c}' | '\u{201d}' | ':'))
        .collect();
    cleaned
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(TITLE_MAX_CHARS)
        .collect::<String>()
        .trim_end()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_quotes_and_colons() {
        assert_eq!(
            sanitize_title("\"Rust: a survey\""),
            "Rust a survey"
        );
    }

    #[test]
    fn collapses_whitespace_and_newlines() {
        assert_eq!(sanitize_title("  Hello\n  world  "), "Hello world");
    }

    #[test]
    fn clamps_to_display_limit() {
        let long = "word ".repeat(40);
        let title = sanitize_title(&long);
        assert!(title.chars().count() <= TITLE_MAX_CHARS);
        assert!(!title.ends_with(' '));
    }

    #[test]
    fn keeps_short_titles_untouched() {
        assert_eq!(sanitize_title("Weather in Lisbon"), "Weather in Lisbon");
    }
}
