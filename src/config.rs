//! Runtime configuration.
//!
//! Everything is read from the environment (a `.env` file is loaded by the
//! binaries first). Missing values fall back to the defaults below.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};

use crate::history::default_history_path;
use crate::oracle::HISTORY_WINDOW;

/// How often and for how long a submitted command is polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollProfile {
    pub interval: Duration,
    pub deadline: Duration,
}

impl PollProfile {
    /// User-facing one-shot commands.
    pub const STANDARD: PollProfile = PollProfile {
        interval: Duration::from_millis(500),
        deadline: Duration::from_secs(15),
    };

    /// Commands issued from inside the automation loop.
    pub const FAST: PollProfile = PollProfile {
        interval: Duration::from_millis(200),
        deadline: Duration::from_secs(10),
    };
}

/// Limits and pacing for one automation run.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopConfig {
    /// Hard ceiling on loop iterations.
    pub max_steps: usize,
    /// Identical consecutive decisions that count as a stall.
    pub stall_limit: usize,
    /// Consecutive empty or unreadable screens before giving up.
    pub empty_observation_limit: usize,
    /// Number of (action, reasoning) pairs shown to the oracle.
    pub history_window: usize,
    /// Pause after every action except `wait`, so the UI can redraw.
    pub settle_delay: Duration,
    /// Duration of a `wait` action.
    pub wait_delay: Duration,
    /// Pause before re-reading a screen that came back empty.
    pub observe_retry_delay: Duration,
    pub poll_profile: PollProfile,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_steps: 20,
            stall_limit: 3,
            empty_observation_limit: 3,
            history_window: HISTORY_WINDOW,
            settle_delay: Duration::from_millis(800),
            wait_delay: Duration::from_secs(2),
            observe_retry_delay: Duration::from_secs(1),
            poll_profile: PollProfile::FAST,
        }
    }
}

impl LoopConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_steps == 0 {
            return Err(anyhow!("max_steps must be > 0"));
        }
        if self.stall_limit == 0 {
            return Err(anyhow!("stall_limit must be > 0"));
        }
        if self.empty_observation_limit == 0 {
            return Err(anyhow!("empty_observation_limit must be > 0"));
        }
        if self.history_window == 0 {
            return Err(anyhow!("history_window must be > 0"));
        }
        if self.poll_profile.interval.is_zero() {
            return Err(anyhow!("poll interval must be > 0"));
        }
        Ok(())
    }
}

/// Connection settings for an OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct OracleConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub timeout: Duration,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            temperature: 0.2,
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    /// Address the agent server listens on.
    pub bind: String,
    /// Where finished runs are recorded. `None` disables history.
    pub history_path: Option<PathBuf>,
    pub oracle: OracleConfig,
    pub automation: LoopConfig,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let mut oracle = OracleConfig {
            api_key: env::var("ORACLE_API_KEY")
                .or_else(|_| env::var("OPENAI_API_KEY"))
                .ok(),
            ..OracleConfig::default()
        };
        if let Ok(base_url) = env::var("ORACLE_BASE_URL") {
            oracle.base_url = base_url;
        }
        if let Ok(model) = env::var("ORACLE_MODEL") {
            oracle.model = model;
        }
        if let Some(secs) = parse_var::<u64>("ORACLE_TIMEOUT_SECS")? {
            oracle.timeout = Duration::from_secs(secs);
        }

        let mut automation = LoopConfig::default();
        if let Some(max_steps) = parse_var::<usize>("DROIDPILOT_MAX_STEPS")? {
            automation.max_steps = max_steps;
        }
        automation.validate()?;

        let history_path = match env::var("DROIDPILOT_HISTORY") {
            Ok(path) if path.eq_ignore_ascii_case("off") => None,
            Ok(path) => Some(PathBuf::from(path)),
            Err(_) => default_history_path(),
        };

        Ok(Self {
            bind: env::var("DROIDPILOT_BIND").unwrap_or_else(|_| "127.0.0.1:3000".to_string()),
            history_path,
            oracle,
            automation,
        })
    }
}

fn parse_var<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("parse {name}={raw}")),
        Err(_) => Ok(None),
    }
}
