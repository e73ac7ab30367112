//! Scripted stand-ins for the device and the oracle.

use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::Mutex;

use crate::channel::{CommandChannel, CommandResponse, GET_UI_TREE};
use crate::error::{ChannelError, DecisionError};
use crate::oracle::{DecisionOracle, DecisionRequest, HistoryEntry};

/// A clickable node with the given class, text and bounds string.
pub fn node(class: &str, text: &str, bounds: &str) -> Value {
    json!({"class": class, "text": text, "bounds": bounds, "clickable": true})
}

/// A root container holding `children`.
pub fn screen(children: Vec<Value>) -> Value {
    json!({"class": "android.widget.FrameLayout", "bounds": "[0,0][1080,1920]", "children": children})
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentCommand {
    pub id: String,
    pub command_type: String,
    pub params: Option<Value>,
}

#[derive(Default)]
struct DeviceState {
    next_id: u64,
    screens: VecDeque<Value>,
    inline_tree: Option<Value>,
    failures: HashMap<String, String>,
    silent: HashSet<String>,
    sent: Vec<SentCommand>,
    cancelled: Vec<String>,
    results: HashMap<String, CommandResponse>,
}

/// In-process device that answers every command as soon as it is submitted.
///
/// `get_ui_tree` serves the queued screens in order and keeps repeating the
/// last one.
#[derive(Default)]
pub struct FakeDevice {
    state: Mutex<DeviceState>,
}

impl FakeDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_screens(screens: Vec<Value>) -> Self {
        Self {
            state: Mutex::new(DeviceState {
                screens: screens.into(),
                ..DeviceState::default()
            }),
        }
    }

    /// Make every `command_type` command fail with `error`.
    pub async fn fail_command(&self, command_type: &str, error: &str) {
        self.state
            .lock()
            .await
            .failures
            .insert(command_type.to_string(), error.to_string());
    }

    /// Never answer `command_type` commands.
    pub async fn silence(&self, command_type: &str) {
        self.state.lock().await.silent.insert(command_type.to_string());
    }

    /// Attach `tree` to every completed action response as `ui_tree`.
    pub async fn attach_ui_tree(&self, tree: Value) {
        self.state.lock().await.inline_tree = Some(tree);
    }

    pub async fn commands(&self) -> Vec<SentCommand> {
        self.state.lock().await.sent.clone()
    }

    /// Ids the caller gave up on.
    pub async fn cancelled(&self) -> Vec<String> {
        self.state.lock().await.cancelled.clone()
    }

    pub async fn last_command(&self) -> Option<SentCommand> {
        self.state.lock().await.sent.last().cloned()
    }

    pub async fn count(&self, command_type: &str) -> usize {
        self.state
            .lock()
            .await
            .sent
            .iter()
            .filter(|cmd| cmd.command_type == command_type)
            .count()
    }
}

#[async_trait]
impl CommandChannel for FakeDevice {
    async fn submit(&self, command_type: &str, params: Option<Value>) -> Result<String, ChannelError> {
        let mut state = self.state.lock().await;
        state.next_id += 1;
        let id = format!("fake-{}", state.next_id);
        state.sent.push(SentCommand {
            id: id.clone(),
            command_type: command_type.to_string(),
            params,
        });

        if state.silent.contains(command_type) {
            return Ok(id);
        }
        let failure = state.failures.get(command_type).cloned();
        let response = if let Some(error) = failure {
            CommandResponse::failed(error)
        } else if command_type == GET_UI_TREE {
            let tree = if state.screens.len() > 1 {
                state.screens.pop_front()
            } else {
                state.screens.front().cloned()
            };
            CommandResponse::completed(tree)
        } else {
            CommandResponse::completed(state.inline_tree.clone().map(|tree| json!({"ui_tree": tree})))
        };
        state.results.insert(id.clone(), response);
        Ok(id)
    }

    async fn poll(&self, id: &str) -> Result<Option<CommandResponse>, ChannelError> {
        Ok(self.state.lock().await.results.remove(id))
    }

    async fn cancel(&self, id: &str) -> Result<(), ChannelError> {
        let mut state = self.state.lock().await;
        state.results.remove(id);
        state.cancelled.push(id.to_string());
        Ok(())
    }
}

/// A channel whose transport is down.
pub struct BrokenChannel;

#[async_trait]
impl CommandChannel for BrokenChannel {
    async fn submit(&self, _command_type: &str, _params: Option<Value>) -> Result<String, ChannelError> {
        Err(ChannelError::Transport("connection refused".to_string()))
    }

    async fn poll(&self, id: &str) -> Result<Option<CommandResponse>, ChannelError> {
        Err(ChannelError::UnknownCommand(id.to_string()))
    }

    async fn cancel(&self, _id: &str) -> Result<(), ChannelError> {
        Err(ChannelError::Transport("connection refused".to_string()))
    }
}

#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text(String),
    TransportError(String),
}

impl From<&str> for ScriptedReply {
    fn from(text: &str) -> Self {
        ScriptedReply::Text(text.to_string())
    }
}

impl From<String> for ScriptedReply {
    fn from(text: String) -> Self {
        ScriptedReply::Text(text)
    }
}

/// What the oracle was shown on one call.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub goal: String,
    pub ui_text: String,
    pub history: Vec<HistoryEntry>,
}

/// Oracle that replays a fixed list of replies.
pub struct ScriptedOracle {
    replies: Mutex<VecDeque<ScriptedReply>>,
    cycle: bool,
    seen: Mutex<Vec<SeenRequest>>,
}

impl ScriptedOracle {
    pub fn new<I, R>(replies: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<ScriptedReply>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            cycle: false,
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Like [`ScriptedOracle::new`], starting over when the script runs out.
    pub fn cycling<I, R>(replies: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<ScriptedReply>,
    {
        Self {
            cycle: true,
            ..Self::new(replies)
        }
    }

    pub async fn calls(&self) -> usize {
        self.seen.lock().await.len()
    }

    pub async fn requests(&self) -> Vec<SeenRequest> {
        self.seen.lock().await.clone()
    }
}

#[async_trait]
impl DecisionOracle for ScriptedOracle {
    async fn complete(&self, request: &DecisionRequest<'_>) -> Result<String, DecisionError> {
        self.seen.lock().await.push(SeenRequest {
            goal: request.goal.to_string(),
            ui_text: request.ui_text.to_string(),
            history: request.recent_history().to_vec(),
        });

        let mut replies = self.replies.lock().await;
        let reply = replies
            .pop_front()
            .ok_or_else(|| DecisionError::Transport("script exhausted".to_string()))?;
        if self.cycle {
            replies.push_back(reply.clone());
        }
        match reply {
            ScriptedReply::Text(text) => Ok(text),
            ScriptedReply::TransportError(message) => Err(DecisionError::Transport(message)),
        }
    }
}
