//! Actions the oracle may choose, decoded from its JSON output.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Left => "left",
            Direction::Right => "right",
        }
    }
}

/// Exactly one device action. Element references are indices into the
/// snapshot the oracle was shown; they are range-checked at execution time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Tap {
        element: i64,
    },
    DoubleTap {
        element: i64,
    },
    LongPress {
        element: i64,
    },
    Swipe {
        #[serde(default)]
        direction: Direction,
    },
    #[serde(rename = "type", alias = "type_text")]
    Type {
        text: String,
    },
    PressButton {
        button: String,
    },
    LaunchApp {
        #[serde(alias = "package_id", alias = "packageId", alias = "app")]
        package: String,
    },
    Wait,
    Done {
        summary: String,
    },
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Tap { .. } => "tap",
            Action::DoubleTap { .. } => "double_tap",
            Action::LongPress { .. } => "long_press",
            Action::Swipe { .. } => "swipe",
            Action::Type { .. } => "type",
            Action::PressButton { .. } => "press_button",
            Action::LaunchApp { .. } => "launch_app",
            Action::Wait => "wait",
            Action::Done { .. } => "done",
        }
    }

    /// Identity used for stall detection: kind plus its target.
    pub fn signature(&self) -> String {
        match self {
            Action::Tap { element } | Action::DoubleTap { element } | Action::LongPress { element } => {
                format!("{}:{element}", self.kind())
            }
            Action::Swipe { direction } => format!("swipe:{}", direction.as_str()),
            Action::Type { text } => format!("type:{text}"),
            Action::PressButton { button } => format!("press_button:{button}"),
            Action::LaunchApp { package } => format!("launch_app:{package}"),
            Action::Wait => "wait".to_string(),
            Action::Done { .. } => "done".to_string(),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Tap { element } | Action::DoubleTap { element } | Action::LongPress { element } => {
                write!(f, "{} [{element}]", self.kind())
            }
            Action::Swipe { direction } => write!(f, "swipe {}", direction.as_str()),
            Action::Type { text } => write!(f, "type {text:?}"),
            Action::PressButton { button } => write!(f, "press_button {button}"),
            Action::LaunchApp { package } => write!(f, "launch_app {package}"),
            Action::Wait => f.write_str("wait"),
            Action::Done { summary } => write!(f, "done {summary:?}"),
        }
    }
}

/// An action together with the oracle's stated reason for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub action: Action,
    pub reasoning: String,
}
