use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use droidpilot::automation::Automation;
use droidpilot::channel::send_command;
use droidpilot::config::{PollProfile, Settings};
use droidpilot::history::{RunRecord, append_run, load_runs};
use droidpilot::oracle::ChatOracle;
use droidpilot::remote::RemoteChannel;
use serde_json::Value;

#[derive(Parser)]
#[command(name = "droidpilot", about = "Drive a remote Android device toward a goal")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the automation loop for one goal and print the report.
    Run {
        goal: String,
        /// Agent server hosting the command store.
        #[arg(long, env = "DROIDPILOT_SERVER", default_value = "http://127.0.0.1:3000")]
        server: String,
        #[arg(long)]
        max_steps: Option<usize>,
        /// Do not record the run in the history file.
        #[arg(long)]
        no_history: bool,
    },
    /// Send a single device command and print the response.
    Send {
        /// Command type, e.g. `get_ui_tree` or `press_button`.
        command_type: String,
        /// JSON object of command parameters.
        #[arg(long)]
        params: Option<String>,
        #[arg(long, env = "DROIDPILOT_SERVER", default_value = "http://127.0.0.1:3000")]
        server: String,
    },
    /// Show recently recorded runs.
    History {
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    droidpilot::logging::init("warn");

    match run(Cli::parse()).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut settings = Settings::from_env()?;
    match cli.command {
        Command::Run {
            goal,
            server,
            max_steps,
            no_history,
        } => {
            if let Some(max_steps) = max_steps {
                settings.automation.max_steps = max_steps;
                settings.automation.validate()?;
            }
            let channel = RemoteChannel::new(server);
            let oracle = ChatOracle::new(settings.oracle.clone())?;

            let report = match Automation::new(&channel, &oracle, settings.automation.clone())
                .run(&goal)
                .await
            {
                Ok(report) => report,
                Err(err) => {
                    println!("automation failed: {err}");
                    return Ok(ExitCode::FAILURE);
                }
            };
            println!("{report}");

            if !no_history {
                if let Some(path) = &settings.history_path {
                    append_run(path, RunRecord::from_report(&report))?;
                }
            }
            Ok(if report.completed() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2)
            })
        }
        Command::Send {
            command_type,
            params,
            server,
        } => {
            let params = params
                .map(|raw| serde_json::from_str::<Value>(&raw).context("parse --params"))
                .transpose()?;
            let channel = RemoteChannel::new(server);
            let response = send_command(&channel, &command_type, params, PollProfile::STANDARD).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(if response.is_completed() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::History { limit, path } => {
            let path = path
                .or(settings.history_path)
                .ok_or_else(|| anyhow!("no history file configured"))?;
            let runs = load_runs(&path)?;
            if runs.is_empty() {
                println!("No runs recorded in {}", path.display());
            }
            let skip = runs.len().saturating_sub(limit);
            for run in &runs[skip..] {
                let mark = if run.completed { "done" } else { "stopped" };
                println!("[{mark}] {} ({} steps): {}", run.goal, run.steps.len(), run.status);
                if let Some(summary) = &run.summary {
                    println!("    {summary}");
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
