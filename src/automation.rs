//! The observe -> decide -> act loop.
//!
//! One call to [`Automation::run`] owns all of its mutable state in a
//! [`RunContext`]; nothing is shared between runs. Expected failures (an
//! unreadable screen, a bad oracle reply, a command the device rejects) are
//! written to the step log and the loop carries on. Only a broken command
//! channel escapes as an error.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::time::sleep;
use tracing::{info, instrument, warn};

use crate::action::Action;
use crate::channel::{CommandChannel, CommandStatus, GET_UI_TREE, send_command};
use crate::config::LoopConfig;
use crate::error::{AutomationError, ObservationError};
use crate::executor::ActionExecutor;
use crate::oracle::{DecisionOracle, DecisionRequest, HistoryEntry, decide};
use crate::tree::{CompressOptions, Snapshot, compress_with};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum StepOutcome {
    Ok,
    Failed(String),
    Aborted(String),
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepOutcome::Ok => f.write_str("ok"),
            StepOutcome::Failed(reason) => write!(f, "failed: {reason}"),
            StepOutcome::Aborted(reason) => write!(f, "aborted: {reason}"),
        }
    }
}

/// One entry of the audit trail. Never modified once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepLog {
    pub step: usize,
    /// Action kind, or `observe`/`decide` when the step failed before an action existed.
    pub action: String,
    pub reasoning: String,
    pub outcome: StepOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AbortReason {
    Stuck { signature: String, repeats: usize },
    ScreenUnreadable { attempts: usize },
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Stuck { signature, repeats } => {
                write!(f, "stuck: {signature} repeated {repeats} times")
            }
            AbortReason::ScreenUnreadable { attempts } => {
                write!(f, "screen unreadable after {attempts} attempts")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Completed { summary: String },
    Aborted { reason: AbortReason },
    StepLimit { max_steps: usize },
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Completed { .. } => f.write_str("completed"),
            RunStatus::Aborted { reason } => write!(f, "stopped ({reason})"),
            RunStatus::StepLimit { max_steps } => {
                write!(f, "stopped (reached the {max_steps}-step limit)")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub goal: String,
    pub status: RunStatus,
    pub steps: Vec<StepLog>,
}

impl RunReport {
    pub fn completed(&self) -> bool {
        matches!(self.status, RunStatus::Completed { .. })
    }

    pub fn summary(&self) -> Option<&str> {
        match &self.status {
            RunStatus::Completed { summary } => Some(summary),
            _ => None,
        }
    }

    /// Multi-line, human-readable account of the run.
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Goal: {}", self.goal)?;
        writeln!(f, "Result: {}", self.status)?;
        writeln!(f, "Steps:")?;
        if self.steps.is_empty() {
            writeln!(f, "  (none)")?;
        }
        for entry in &self.steps {
            write!(f, "  {}. {}", entry.step, entry.action)?;
            if !entry.reasoning.is_empty() {
                write!(f, " ({})", entry.reasoning)?;
            }
            writeln!(f, " -> {}", entry.outcome)?;
        }
        if let Some(summary) = self.summary() {
            write!(f, "Summary: {summary}")?;
        }
        Ok(())
    }
}

/// Progress notifications for live observers. The run's result is still only
/// the final [`RunReport`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AutomationEvent {
    Started { goal: String },
    Thinking { step: usize },
    Step { entry: StepLog },
    Finished { completed: bool, status: String },
}

/// Mutable state of a single run.
struct RunContext {
    goal: String,
    history: Vec<HistoryEntry>,
    history_window: usize,
    last_signature: Option<String>,
    repeats: usize,
    empty_observations: usize,
    step: usize,
    fresh_tree: Option<Value>,
    steps: Vec<StepLog>,
}

impl RunContext {
    fn new(goal: &str, history_window: usize) -> Self {
        Self {
            goal: goal.to_string(),
            history: Vec::new(),
            history_window,
            last_signature: None,
            repeats: 0,
            empty_observations: 0,
            step: 0,
            fresh_tree: None,
            steps: Vec::new(),
        }
    }

    fn remember(&mut self, action: &Action, reasoning: &str) {
        self.history.push(HistoryEntry {
            action: action.to_string(),
            reasoning: reasoning.to_string(),
        });
        let excess = self.history.len().saturating_sub(self.history_window);
        self.history.drain(..excess);
    }

    /// Count consecutive identical signatures; returns the current run length.
    fn track_repeat(&mut self, signature: String) -> usize {
        if self.last_signature.as_ref() == Some(&signature) {
            self.repeats += 1;
        } else {
            self.last_signature = Some(signature);
            self.repeats = 1;
        }
        self.repeats
    }
}

pub struct Automation<'a, C: ?Sized, O: ?Sized> {
    channel: &'a C,
    oracle: &'a O,
    config: LoopConfig,
    compress: CompressOptions,
    events: Option<broadcast::Sender<AutomationEvent>>,
}

impl<'a, C, O> Automation<'a, C, O>
where
    C: CommandChannel + ?Sized,
    O: DecisionOracle + ?Sized,
{
    pub fn new(channel: &'a C, oracle: &'a O, config: LoopConfig) -> Self {
        Self {
            channel,
            oracle,
            config,
            compress: CompressOptions::default(),
            events: None,
        }
    }

    pub fn with_compress_options(mut self, options: CompressOptions) -> Self {
        self.compress = options;
        self
    }

    pub fn with_events(mut self, events: broadcast::Sender<AutomationEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Drive the device toward `goal` until the oracle says `done`, the run is
    /// aborted, or the step ceiling is reached.
    #[instrument(skip(self), fields(max_steps = self.config.max_steps))]
    pub async fn run(&self, goal: &str) -> Result<RunReport, AutomationError> {
        let mut ctx = RunContext::new(goal, self.config.history_window);
        let executor = ActionExecutor::new(self.channel, self.config.poll_profile)
            .with_wait_delay(self.config.wait_delay);
        self.emit(AutomationEvent::Started {
            goal: goal.to_string(),
        });

        let status = loop {
            if ctx.step >= self.config.max_steps {
                warn!(max_steps = self.config.max_steps, "step limit reached");
                break RunStatus::StepLimit {
                    max_steps: self.config.max_steps,
                };
            }
            ctx.step += 1;

            let snapshot = match self.observe(&mut ctx).await {
                Ok(snapshot) => {
                    ctx.empty_observations = 0;
                    snapshot
                }
                Err(ObservationError::Channel(err)) => return Err(err.into()),
                Err(err) => {
                    ctx.empty_observations += 1;
                    warn!(step = ctx.step, attempt = ctx.empty_observations, error = %err, "observation failed");
                    if ctx.empty_observations >= self.config.empty_observation_limit {
                        self.record(&mut ctx, "observe", "", StepOutcome::Aborted(err.to_string()));
                        break RunStatus::Aborted {
                            reason: AbortReason::ScreenUnreadable {
                                attempts: ctx.empty_observations,
                            },
                        };
                    }
                    self.record(&mut ctx, "observe", "", StepOutcome::Failed(err.to_string()));
                    sleep(self.config.observe_retry_delay).await;
                    continue;
                }
            };

            self.emit(AutomationEvent::Thinking { step: ctx.step });
            let request = DecisionRequest {
                goal: &ctx.goal,
                ui_text: &snapshot.text,
                history: &ctx.history,
                history_window: self.config.history_window,
            };
            let decision = match decide(self.oracle, &request).await {
                Ok(decision) => decision,
                Err(err) => {
                    warn!(step = ctx.step, error = %err, "oracle gave no usable action");
                    self.record(&mut ctx, "decide", "", StepOutcome::Failed(err.to_string()));
                    continue;
                }
            };
            let kind = decision.action.kind();

            if let Action::Done { summary } = &decision.action {
                self.record(&mut ctx, kind, &decision.reasoning, StepOutcome::Ok);
                break RunStatus::Completed {
                    summary: summary.clone(),
                };
            }

            let signature = decision.action.signature();
            let repeats = ctx.track_repeat(signature.clone());
            if repeats >= self.config.stall_limit {
                let reason = AbortReason::Stuck { signature, repeats };
                self.record(
                    &mut ctx,
                    kind,
                    &decision.reasoning,
                    StepOutcome::Aborted(reason.to_string()),
                );
                break RunStatus::Aborted { reason };
            }

            info!(step = ctx.step, action = %decision.action, "executing");
            let response = executor
                .execute(&decision.action, &snapshot.elements)
                .await?;
            ctx.fresh_tree = response.fresh_ui_tree().cloned();
            let outcome = match response.into_outcome() {
                Ok(_) => StepOutcome::Ok,
                Err(err) => {
                    warn!(step = ctx.step, action = %decision.action, error = %err, "action failed");
                    StepOutcome::Failed(err.to_string())
                }
            };
            self.record(&mut ctx, kind, &decision.reasoning, outcome);
            ctx.remember(&decision.action, &decision.reasoning);

            if !matches!(decision.action, Action::Wait) {
                sleep(self.config.settle_delay).await;
            }
        };

        let report = RunReport {
            goal: ctx.goal,
            status,
            steps: ctx.steps,
        };
        info!(status = %report.status, steps = report.steps.len(), "automation finished");
        self.emit(AutomationEvent::Finished {
            completed: report.completed(),
            status: report.status.to_string(),
        });
        Ok(report)
    }

    /// Current screen, preferring a tree the previous action already returned.
    async fn observe(&self, ctx: &mut RunContext) -> Result<Snapshot, ObservationError> {
        let tree = match ctx.fresh_tree.take() {
            Some(tree) => tree,
            None => {
                let response =
                    send_command(self.channel, GET_UI_TREE, None, self.config.poll_profile).await?;
                match response.status {
                    CommandStatus::Completed => response.response.map(unwrap_tree).unwrap_or_default(),
                    CommandStatus::Failed => {
                        return Err(ObservationError::Failed(
                            response.error.unwrap_or_else(|| "device reported failure".to_string()),
                        ));
                    }
                    CommandStatus::Timeout => return Err(ObservationError::TimedOut),
                }
            }
        };

        let snapshot = compress_with(&tree, &self.compress);
        if snapshot.is_empty() {
            return Err(ObservationError::Empty);
        }
        Ok(snapshot)
    }

    fn record(&self, ctx: &mut RunContext, action: &str, reasoning: &str, outcome: StepOutcome) {
        let entry = StepLog {
            step: ctx.step,
            action: action.to_string(),
            reasoning: reasoning.to_string(),
            outcome,
        };
        self.emit(AutomationEvent::Step {
            entry: entry.clone(),
        });
        ctx.steps.push(entry);
    }

    fn emit(&self, event: AutomationEvent) {
        if let Some(events) = &self.events {
            // No subscribers is fine.
            let _ = events.send(event);
        }
    }
}

/// Devices either send the tree itself or wrap it as `{"tree": ..}` / `{"ui_tree": ..}`.
fn unwrap_tree(payload: Value) -> Value {
    match payload {
        Value::Object(mut fields) if fields.contains_key("ui_tree") || fields.contains_key("tree") => fields
            .remove("ui_tree")
            .or_else(|| fields.remove("tree"))
            .unwrap_or_default(),
        other => other,
    }
}

/// Tool entry point: run `goal` to the end and return the textual report.
pub async fn run_automation<C, O>(
    channel: &C,
    oracle: &O,
    config: LoopConfig,
    goal: &str,
) -> Result<String, AutomationError>
where
    C: CommandChannel + ?Sized,
    O: DecisionOracle + ?Sized,
{
    let report = Automation::new(channel, oracle, config).run(goal).await?;
    Ok(report.render())
}
