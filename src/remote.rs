//! Command channel backed by a store running in another process.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::channel::{CommandChannel, CommandResponse, CommandStatus};
use crate::error::ChannelError;

/// Body of `POST /commands`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    #[serde(rename = "type")]
    pub command_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// Reply to `POST /commands`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitReply {
    pub id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollStatus {
    Pending,
    Completed,
    Failed,
    Timeout,
}

/// Reply to `GET /commands/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollReply {
    pub status: PollStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PollReply {
    pub fn pending() -> Self {
        Self {
            status: PollStatus::Pending,
            response: None,
            error: None,
        }
    }

    pub fn into_response(self) -> Option<CommandResponse> {
        let status = match self.status {
            PollStatus::Pending => return None,
            PollStatus::Completed => CommandStatus::Completed,
            PollStatus::Failed => CommandStatus::Failed,
            PollStatus::Timeout => CommandStatus::Timeout,
        };
        Some(CommandResponse {
            status,
            response: self.response,
            error: self.error,
        })
    }
}

impl From<CommandResponse> for PollReply {
    fn from(response: CommandResponse) -> Self {
        let status = match response.status {
            CommandStatus::Completed => PollStatus::Completed,
            CommandStatus::Failed => PollStatus::Failed,
            CommandStatus::Timeout => PollStatus::Timeout,
        };
        Self {
            status,
            response: response.response,
            error: response.error,
        }
    }
}

pub struct RemoteChannel {
    client: Client,
    base_url: String,
}

impl RemoteChannel {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl CommandChannel for RemoteChannel {
    async fn submit(
        &self,
        command_type: &str,
        params: Option<Value>,
    ) -> Result<String, ChannelError> {
        let response = self
            .client
            .post(format!("{}/commands", self.base_url))
            .json(&SubmitRequest {
                command_type: command_type.to_string(),
                params,
            })
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ChannelError::Protocol(format!(
                "submit {command_type} returned {status}"
            )));
        }
        let reply: SubmitReply = response.json().await?;
        Ok(reply.id)
    }

    async fn poll(&self, id: &str) -> Result<Option<CommandResponse>, ChannelError> {
        let response = self
            .client
            .get(format!("{}/commands/{id}", self.base_url))
            .send()
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(ChannelError::UnknownCommand(id.to_string())),
            status if status.is_success() => {
                let reply: PollReply = response.json().await?;
                Ok(reply.into_response())
            }
            status => Err(ChannelError::Protocol(format!("poll {id} returned {status}"))),
        }
    }

    async fn cancel(&self, id: &str) -> Result<(), ChannelError> {
        let response = self
            .client
            .delete(format!("{}/commands/{id}", self.base_url))
            .send()
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(()),
            status if status.is_success() => Ok(()),
            status => Err(ChannelError::Protocol(format!("cancel {id} returned {status}"))),
        }
    }
}
