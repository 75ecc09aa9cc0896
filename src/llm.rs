use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::error::LlmError;

/// Chat-completion capability, injected so agents can run against a
/// scripted fake in tests.
#[async_trait]
pub trait ChatCompleter: Send + Sync {
    /// One round trip: system + user message in, assistant text out.
    /// `json_only` asks the provider for JSON-object response mode.
    async fn complete(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
        json_only: bool,
    ) -> Result<String, LlmError>;
}

/// OpenAI-compatible chat-completions client.
pub struct HttpChatCompleter {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

impl HttpChatCompleter {
    pub fn new(client: reqwest::Client, endpoint: String, api_key: String, model: String) -> Self {
        HttpChatCompleter {
            client,
            endpoint,
            api_key,
            model,
        }
    }

    async fn send_once(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
        json_only: bool,
    ) -> Result<String, LlmError> {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "max_tokens": max_tokens,
            "temperature": 0.1,
        });
        if json_only {
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout
                } else {
                    LlmError::Transport(e.to_string())
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(LlmError::Status(status.as_u16()));
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LlmError::Transport("empty completion".to_string()))
    }
}

#[async_trait]
impl ChatCompleter for HttpChatCompleter {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
        json_only: bool,
    ) -> Result<String, LlmError> {
        match self.send_once(system, user, max_tokens, json_only).await {
            Ok(text) => Ok(text),
            Err(e) if e.is_transient() => {
                let jitter_ms = rand::rng().random_range(100..400);
                tracing::warn!("llm: transient failure ({e}), retrying after {jitter_ms}ms");
                tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
                self.send_once(system, user, max_tokens, json_only).await
            }
            Err(e) => Err(e),
        }
    }
}

/// The gateway agents talk to: deadline enforcement, fence stripping, and
/// the parse-retry-fallback combinator in one place.
pub struct LlmGateway {
    completer: Box<dyn ChatCompleter>,
}

impl LlmGateway {
    pub fn new(completer: Box<dyn ChatCompleter>) -> Self {
        LlmGateway { completer }
    }

    /// Free-text completion under a deadline.
    pub async fn complete_text(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
        deadline: Duration,
    ) -> Result<String, LlmError> {
        tokio::time::timeout(
            deadline,
            self.completer.complete(system, user, max_tokens, false),
        )
        .await
        .map_err(|_| LlmError::Timeout)?
    }

    async fn complete_structured(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
        deadline: Duration,
    ) -> Result<String, LlmError> {
        tokio::time::timeout(
            deadline,
            self.completer.complete(system, user, max_tokens, true),
        )
        .await
        .map_err(|_| LlmError::Timeout)?
    }

    /// JSON completion parsed into `T`. Parse or shape failures get one
    /// retry with a reinforced JSON-only instruction, then `InvalidJson`.
    pub async fn complete_json<T: DeserializeOwned>(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
        deadline: Duration,
    ) -> Result<T, LlmError> {
        let started = tokio::time::Instant::now();
        let text = self.complete_structured(system, user, max_tokens, deadline).await?;
        match parse_json_response::<T>(&text) {
            Ok(v) => Ok(v),
            Err(first_err) => {
                let remaining = deadline.saturating_sub(started.elapsed());
                if remaining.is_zero() {
                    return Err(LlmError::Timeout);
                }
                tracing::warn!("llm: unparseable JSON ({first_err}), retrying with reinforcement");
                let reinforced = format!(
                    "{system}\n\nYour previous reply was not valid JSON. Respond with ONLY a \
                     single valid JSON object. No prose, no markdown fences."
                );
                let text = self
                    .complete_structured(&reinforced, user, max_tokens, remaining)
                    .await?;
                parse_json_response::<T>(&text).map_err(LlmError::InvalidJson)
            }
        }
    }
}

/// Strip optional ```json fences and parse.
fn parse_json_response<T: DeserializeOwned>(text: &str) -> Result<T, String> {
    let cleaned = strip_code_fences(text);
    serde_json::from_str(cleaned).map_err(|e| e.to_string())
}

fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the language tag on the opening fence, then the closing fence
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.trim_start_matches(['\r', '\n']);
    rest.strip_suffix("```").map(str::trim).unwrap_or(rest.trim())
}
