//! Request/response contract for talking to the device.
//!
//! Commands are submitted and then polled until the device reports a terminal
//! status. The channel never retries; callers decide what a failure means.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

use crate::config::PollProfile;
use crate::error::{ActionError, ChannelError};

pub const GET_UI_TREE: &str = "get_ui_tree";

/// Terminal status of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Completed,
    Failed,
    /// No terminal status was seen before the deadline.
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub status: CommandStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandResponse {
    pub fn completed(response: Option<Value>) -> Self {
        Self {
            status: CommandStatus::Completed,
            response,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: CommandStatus::Failed,
            response: None,
            error: Some(error.into()),
        }
    }

    pub fn timed_out() -> Self {
        Self {
            status: CommandStatus::Timeout,
            response: None,
            error: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == CommandStatus::Completed
    }

    /// UI tree the device attached to a completed action, if any.
    pub fn fresh_ui_tree(&self) -> Option<&Value> {
        if !self.is_completed() {
            return None;
        }
        self.response
            .as_ref()
            .and_then(|payload| payload.get("ui_tree"))
            .filter(|tree| !tree.is_null())
    }

    pub fn into_outcome(self) -> Result<Option<Value>, ActionError> {
        match self.status {
            CommandStatus::Completed => Ok(self.response),
            CommandStatus::Failed => Err(ActionError::Failed(
                self.error
                    .unwrap_or_else(|| "device reported failure".to_string()),
            )),
            CommandStatus::Timeout => Err(ActionError::TimedOut),
        }
    }
}

/// Asynchronous, polling-based command transport.
#[async_trait]
pub trait CommandChannel: Send + Sync {
    /// Queue a command for the device and return its id.
    async fn submit(&self, command_type: &str, params: Option<Value>)
    -> Result<String, ChannelError>;

    /// Terminal response for `id`, or `None` while the command is pending.
    async fn poll(&self, id: &str) -> Result<Option<CommandResponse>, ChannelError>;

    /// Give up on `id`. A command the device has not picked up yet is never
    /// delivered, and a late result is discarded. Unknown ids are not an error.
    async fn cancel(&self, id: &str) -> Result<(), ChannelError>;
}

/// Submit a command and poll until it finishes or the profile's deadline passes.
///
/// Expiry cancels the command and yields a [`CommandStatus::Timeout`] response,
/// not an error. Errors are reserved for a broken channel.
pub async fn send_command<C>(
    channel: &C,
    command_type: &str,
    params: Option<Value>,
    profile: PollProfile,
) -> Result<CommandResponse, ChannelError>
where
    C: CommandChannel + ?Sized,
{
    let id = channel.submit(command_type, params).await?;
    debug!(%id, command_type, "command submitted");
    let started = Instant::now();
    loop {
        sleep(profile.interval).await;
        if let Some(response) = channel.poll(&id).await? {
            debug!(%id, status = ?response.status, "command finished");
            return Ok(response);
        }
        if started.elapsed() >= profile.deadline {
            warn!(%id, command_type, deadline_ms = profile.deadline.as_millis() as u64, "command timed out");
            channel.cancel(&id).await?;
            return Ok(CommandResponse::timed_out());
        }
    }
}
