//! Error taxonomy for the automation loop.
//!
//! Only [`ChannelError`] (wrapped in [`AutomationError`]) ends a run early.
//! The other kinds are recorded as failed steps and the loop keeps going.

use thiserror::Error;

/// The command channel itself broke (as opposed to a command failing).
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected reply from command store: {0}")]
    Protocol(String),

    #[error("unknown command id {0}")]
    UnknownCommand(String),
}

/// The screen could not be read, or it contained nothing addressable.
#[derive(Debug, Error)]
pub enum ObservationError {
    #[error("screen has no actionable elements")]
    Empty,

    #[error("ui tree request failed: {0}")]
    Failed(String),

    #[error("ui tree request timed out")]
    TimedOut,

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// The oracle could not produce a usable action.
#[derive(Debug, Error)]
pub enum DecisionError {
    #[error("oracle request failed: {0}")]
    Transport(String),

    #[error("oracle http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("oracle returned an empty response")]
    EmptyResponse,

    #[error("no JSON object found in oracle output")]
    NoJson,

    #[error("invalid action: {0}")]
    InvalidAction(#[source] serde_json::Error),
}

/// A decided action could not be carried out.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ActionError {
    #[error("Element [{0}] not found")]
    ElementNotFound(i64),

    #[error("{0}")]
    Failed(String),

    #[error("command timed out")]
    TimedOut,
}

/// Unexpected failure that ends a run without a report.
#[derive(Debug, Error)]
pub enum AutomationError {
    #[error(transparent)]
    Channel(#[from] ChannelError),
}
