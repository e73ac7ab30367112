mod face;

use anyhow::Result;
use dotenvy::dotenv;
use droidpilot::automation::{Automation, AutomationEvent};
use droidpilot::config::Settings;
use droidpilot::history::{RunRecord, append_run};
use droidpilot::oracle::ChatOracle;
use droidpilot::store::CommandStore;
use face::{AppState, GoalRequest};
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    droidpilot::logging::init("info");

    let settings = Settings::from_env()?;
    if settings.oracle.api_key.is_none() {
        warn!("no ORACLE_API_KEY / OPENAI_API_KEY set; oracle calls will be unauthenticated");
    }
    let oracle = ChatOracle::new(settings.oracle.clone())?;
    let store = CommandStore::new();

    // Goals are queued and handled one at a time by the loop below.
    let (goal_tx, mut goal_rx) = mpsc::channel::<GoalRequest>(8);
    let (event_tx, _) = broadcast::channel::<AutomationEvent>(64);

    face::start_server(
        &settings.bind,
        AppState {
            store: store.clone(),
            goal_tx,
            event_tx: event_tx.clone(),
        },
    )
    .await?;
    info!("waiting for goals");

    while let Some(request) = goal_rx.recv().await {
        let report = run_goal(&store, &oracle, &settings, &event_tx, &request.goal).await;
        if request.reply.send(report).is_err() {
            warn!(goal = %request.goal, "caller went away before the report was ready");
        }
    }

    Ok(())
}

async fn run_goal(
    store: &CommandStore,
    oracle: &ChatOracle,
    settings: &Settings,
    events: &broadcast::Sender<AutomationEvent>,
    goal: &str,
) -> String {
    let automation = Automation::new(store, oracle, settings.automation.clone()).with_events(events.clone());
    match automation.run(goal).await {
        Ok(report) => {
            if let Some(path) = &settings.history_path {
                if let Err(err) = append_run(path, RunRecord::from_report(&report)) {
                    warn!(error = %err, path = %path.display(), "could not record run");
                }
            }
            report.render()
        }
        Err(err) => {
            error!(error = %err, %goal, "automation failed");
            format!("automation failed: {err}")
        }
    }
}
