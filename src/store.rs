//! In-memory command store shared by the loop and the device.
//!
//! The automation side submits and polls. The device side pulls queued
//! commands with [`CommandStore::next_pending`] and reports back with
//! [`CommandStore::complete`]. Nothing here serializes access to the device
//! itself: two callers submitting at once get their commands interleaved.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::channel::{CommandChannel, CommandResponse};
use crate::error::ChannelError;

/// Entries older than this are dropped, whether or not the device answered.
const RETENTION: Duration = Duration::from_secs(120);

/// A command as handed to the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingCommand {
    pub id: String,
    #[serde(rename = "type")]
    pub command_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

enum Slot {
    Queued,
    Dispatched,
    Finished {
        response: CommandResponse,
        at: Instant,
    },
}

struct Entry {
    command: PendingCommand,
    slot: Slot,
    submitted: Instant,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    queue: VecDeque<String>,
    entries: HashMap<String, Entry>,
}

impl Inner {
    fn prune(&mut self, now: Instant) {
        self.entries.retain(|id, entry| {
            let since = match &entry.slot {
                Slot::Finished { at, .. } => *at,
                _ => entry.submitted,
            };
            let keep = now.duration_since(since) < RETENTION;
            if !keep && !matches!(entry.slot, Slot::Finished { .. }) {
                warn!(%id, command_type = %entry.command.command_type, "expiring unanswered command");
            }
            keep
        });
        let entries = &self.entries;
        self.queue.retain(|id| entries.contains_key(id));
    }
}

#[derive(Clone, Default)]
pub struct CommandStore {
    inner: Arc<Mutex<Inner>>,
}

impl CommandStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Oldest queued command, marked as dispatched.
    pub async fn next_pending(&self) -> Option<PendingCommand> {
        let mut inner = self.inner.lock().await;
        while let Some(id) = inner.queue.pop_front() {
            if let Some(entry) = inner.entries.get_mut(&id) {
                if matches!(entry.slot, Slot::Queued) {
                    entry.slot = Slot::Dispatched;
                    return Some(entry.command.clone());
                }
            }
        }
        None
    }

    /// Record the device's outcome for `id`.
    pub async fn complete(&self, id: &str, response: CommandResponse) -> Result<(), ChannelError> {
        let mut inner = self.inner.lock().await;
        let entry = inner
            .entries
            .get_mut(id)
            .ok_or_else(|| ChannelError::UnknownCommand(id.to_string()))?;
        if matches!(entry.slot, Slot::Finished { .. }) {
            warn!(%id, "ignoring duplicate result");
            return Ok(());
        }
        let was_queued = matches!(entry.slot, Slot::Queued);
        entry.slot = Slot::Finished {
            response,
            at: Instant::now(),
        };
        if was_queued {
            inner.queue.retain(|queued| queued != id);
        }
        debug!(%id, "command result recorded");
        Ok(())
    }

    /// Commands still waiting for the device to pick them up.
    pub async fn queued_len(&self) -> usize {
        self.inner.lock().await.queue.len()
    }
}

#[async_trait]
impl CommandChannel for CommandStore {
    async fn submit(
        &self,
        command_type: &str,
        params: Option<Value>,
    ) -> Result<String, ChannelError> {
        let mut inner = self.inner.lock().await;
        inner.prune(Instant::now());
        inner.next_id += 1;
        let id = format!("cmd-{}", inner.next_id);
        inner.queue.push_back(id.clone());
        inner.entries.insert(
            id.clone(),
            Entry {
                command: PendingCommand {
                    id: id.clone(),
                    command_type: command_type.to_string(),
                    params,
                },
                slot: Slot::Queued,
                submitted: Instant::now(),
            },
        );
        Ok(id)
    }

    async fn poll(&self, id: &str) -> Result<Option<CommandResponse>, ChannelError> {
        let mut inner = self.inner.lock().await;
        let finished = match inner.entries.get(id) {
            None => return Err(ChannelError::UnknownCommand(id.to_string())),
            Some(entry) => matches!(entry.slot, Slot::Finished { .. }),
        };
        if !finished {
            return Ok(None);
        }
        match inner.entries.remove(id).map(|entry| entry.slot) {
            Some(Slot::Finished { response, .. }) => Ok(Some(response)),
            _ => Ok(None),
        }
    }

    async fn cancel(&self, id: &str) -> Result<(), ChannelError> {
        let mut inner = self.inner.lock().await;
        let Some(entry) = inner.entries.remove(id) else {
            return Ok(());
        };
        match entry.slot {
            Slot::Queued => {
                inner.queue.retain(|queued| queued != id);
                debug!(%id, "queued command withdrawn");
            }
            Slot::Dispatched => warn!(%id, "abandoned command was already dispatched"),
            Slot::Finished { .. } => debug!(%id, "late result discarded"),
        }
        Ok(())
    }
}
