//! Decision oracle: asks a language model for the next action.
//!
//! The model's reply is untrusted text. It may wrap the JSON in reasoning
//! tags, prose or markdown fences, so the reply is cleaned and scanned for the
//! first JSON object that actually parses before it is decoded.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::debug;

use crate::action::{Action, Decision};
use crate::config::OracleConfig;
use crate::error::DecisionError;

/// Recent actions shown to the oracle unless configured otherwise.
pub const HISTORY_WINDOW: usize = 3;

const THINK_TAGS: &[(&str, &str)] = &[("<think>", "</think>"), ("<thinking>", "</thinking>")];

const SYSTEM_PROMPT: &str = r#"You operate an Android phone on behalf of a user. Each turn you see the goal, your most recent actions and the current screen, one element per line:
[index] Class "text" [centerX,centerY] flags

Reply with exactly ONE JSON object and nothing else:
- {"action":"tap","element":3,"reasoning":"..."}
- {"action":"double_tap","element":3,"reasoning":"..."}
- {"action":"long_press","element":3,"reasoning":"..."}
- {"action":"swipe","direction":"up|down|left|right","reasoning":"..."}
- {"action":"type","text":"hello","reasoning":"..."}   (types into the focused field; tap it first)
- {"action":"press_button","button":"back|home|recents|enter","reasoning":"..."}
- {"action":"launch_app","package":"com.android.settings","reasoning":"..."}
- {"action":"wait","reasoning":"..."}
- {"action":"done","summary":"what was achieved","reasoning":"..."}

Rules:
1. Only reference element indices from the current screen.
2. If an action did not change the screen, try something different.
3. Use done as soon as the goal is achieved, or when it cannot be achieved."#;

/// One past step as remembered by the loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub action: String,
    pub reasoning: String,
}

#[derive(Debug, Clone, Copy)]
pub struct DecisionRequest<'a> {
    pub goal: &'a str,
    pub ui_text: &'a str,
    pub history: &'a [HistoryEntry],
    /// How many of the newest `history` entries the oracle sees.
    pub history_window: usize,
}

impl DecisionRequest<'_> {
    /// The last `history_window` entries, oldest first.
    pub fn recent_history(&self) -> &[HistoryEntry] {
        let skip = self.history.len().saturating_sub(self.history_window);
        &self.history[skip..]
    }

    pub fn user_prompt(&self) -> String {
        let mut prompt = format!("Goal: {}\n\nRecent actions:\n", self.goal);
        let recent = self.recent_history();
        if recent.is_empty() {
            prompt.push_str("(none yet)\n");
        }
        for (i, entry) in recent.iter().enumerate() {
            prompt.push_str(&format!("{}. {} (reason: {})\n", i + 1, entry.action, entry.reasoning));
        }
        prompt.push_str("\nCurrent screen:\n");
        prompt.push_str(self.ui_text);
        prompt.push_str("\n\nWhat is your next action?");
        prompt
    }
}

/// Source of raw completions. Implementations only move text; parsing happens
/// in [`decide`].
#[async_trait]
pub trait DecisionOracle: Send + Sync {
    async fn complete(&self, request: &DecisionRequest<'_>) -> Result<String, DecisionError>;
}

pub async fn decide<O>(oracle: &O, request: &DecisionRequest<'_>) -> Result<Decision, DecisionError>
where
    O: DecisionOracle + ?Sized,
{
    let raw = oracle.complete(request).await?;
    debug!(raw = %raw, "oracle replied");
    parse_decision(&raw)
}

/// Extract and decode the action object from free-form oracle output.
pub fn parse_decision(raw: &str) -> Result<Decision, DecisionError> {
    let cleaned = strip_thinking(raw);
    if cleaned.trim().is_empty() {
        return Err(DecisionError::EmptyResponse);
    }
    let value = first_json_object(&cleaned).ok_or(DecisionError::NoJson)?;
    let reasoning = value
        .get("reasoning")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();
    let action: Action = serde_json::from_value(value).map_err(DecisionError::InvalidAction)?;
    Ok(Decision { action, reasoning })
}

fn strip_thinking(raw: &str) -> String {
    let mut text = raw.to_string();
    for (open, close) in THINK_TAGS {
        while let Some(start) = text.find(open) {
            match text[start..].find(close) {
                Some(end) => text.replace_range(start..start + end + close.len(), ""),
                None => text.replace_range(start..start + open.len(), ""),
            }
        }
        // A closing tag with no opener means everything before it was reasoning.
        if let Some(end) = text.rfind(close) {
            text = text[end + close.len()..].to_string();
        }
    }
    text
}

fn first_json_object(text: &str) -> Option<Value> {
    let mut from = 0;
    while let Some(offset) = text[from..].find('{') {
        let start = from + offset;
        if let Some(len) = balanced_len(&text[start..]) {
            if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(&text[start..start + len]) {
                return Some(value);
            }
        }
        from = start + 1;
    }
    None
}

/// Byte length of the brace-balanced prefix of `text`, which starts with `{`.
fn balanced_len(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// OpenAI-compatible chat completions client.
pub struct ChatOracle {
    client: Client,
    config: OracleConfig,
}

impl ChatOracle {
    pub fn new(config: OracleConfig) -> Result<Self, DecisionError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl DecisionOracle for ChatOracle {
    async fn complete(&self, request: &DecisionRequest<'_>) -> Result<String, DecisionError> {
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let mut builder = self.client.post(url).json(&json!({
            "model": self.config.model,
            "temperature": self.config.temperature,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": request.user_prompt()},
            ],
        }));
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DecisionError::Transport(api_error(status, &body)));
        }
        let payload: Value = response.json().await?;

        payload["choices"][0]["message"]["content"]
            .as_str()
            .filter(|content| !content.trim().is_empty())
            .map(str::to_string)
            .ok_or(DecisionError::EmptyResponse)
    }
}

/// `"<status>: <message>"`, using the API's JSON error message when the body has one.
fn api_error(status: reqwest::StatusCode, body: &str) -> String {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|payload| payload["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                "unknown API error".to_string()
            } else {
                trimmed.chars().take(200).collect()
            }
        });
    format!("{status}: {message}")
}
