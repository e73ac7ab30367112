//! Finished runs, persisted as a JSON array.

use std::fs::{self, OpenOptions};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::automation::{RunReport, StepLog};

pub const HISTORY_FILE: &str = "runs.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub goal: String,
    pub completed: bool,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub steps: Vec<StepLog>,
    /// Seconds since the Unix epoch.
    pub finished_at: u64,
}

impl RunRecord {
    pub fn from_report(report: &RunReport) -> Self {
        Self {
            goal: report.goal.clone(),
            completed: report.completed(),
            status: report.status.to_string(),
            summary: report.summary().map(str::to_string),
            steps: report.steps.clone(),
            finished_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default(),
        }
    }
}

pub fn default_history_path() -> Option<PathBuf> {
    dirs::data_local_dir().map(|dir| dir.join("droidpilot").join(HISTORY_FILE))
}

/// Missing file means no runs yet.
pub fn load_runs(path: &Path) -> Result<Vec<RunRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = fs::File::open(path).with_context(|| format!("open {}", path.display()))?;
    let runs = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("parse {}", path.display()))?;
    Ok(runs)
}

pub fn save_runs(path: &Path, runs: &[RunRecord]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    serde_json::to_writer_pretty(file, runs).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

pub fn append_run(path: &Path, record: RunRecord) -> Result<()> {
    let mut runs = load_runs(path)?;
    runs.push(record);
    save_runs(path, &runs)
}
