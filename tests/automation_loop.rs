use std::time::Duration;

use droidpilot::automation::{AbortReason, Automation, RunStatus, StepOutcome};
use droidpilot::config::{LoopConfig, PollProfile};
use droidpilot::error::AutomationError;
use droidpilot::run_automation;
use droidpilot::test_support::{BrokenChannel, FakeDevice, ScriptedOracle, ScriptedReply, node, screen};
use serde_json::{Value, json};
use tokio::sync::broadcast;

fn config() -> LoopConfig {
    LoopConfig {
        settle_delay: Duration::ZERO,
        wait_delay: Duration::ZERO,
        observe_retry_delay: Duration::ZERO,
        poll_profile: PollProfile {
            interval: Duration::from_millis(1),
            deadline: Duration::from_millis(30),
        },
        ..LoopConfig::default()
    }
}

fn home() -> Value {
    screen(vec![
        node("android.widget.Button", "Settings", "[0,0][100,100]"),
        node("android.widget.Button", "Camera", "[100,0][200,100]"),
    ])
}

fn empty() -> Value {
    screen(Vec::new())
}

const TAP_0: &str = r#"{"action":"tap","element":0,"reasoning":"open it"}"#;
const TAP_1: &str = r#"{"action":"tap","element":1,"reasoning":"other one"}"#;

#[tokio::test]
async fn done_on_first_step_finishes_with_one_entry() {
    let device = FakeDevice::with_screens(vec![home()]);
    let oracle = ScriptedOracle::new([
        r#"{"action":"done","summary":"Opened settings","reasoning":"already there"}"#,
    ]);

    let report = Automation::new(&device, &oracle, config())
        .run("Open settings")
        .await
        .expect("run");

    assert!(report.completed());
    assert_eq!(report.summary(), Some("Opened settings"));
    assert_eq!(report.steps.len(), 1);
    assert_eq!(report.steps[0].action, "done");
    assert!(report.render().contains("Summary: Opened settings"));
    assert_eq!(device.count("get_ui_tree").await, 1);
    assert_eq!(device.commands().await.len(), 1);
}

#[tokio::test]
async fn third_identical_decision_aborts_as_stuck() {
    let device = FakeDevice::with_screens(vec![home()]);
    let oracle = ScriptedOracle::cycling([TAP_0]);

    let report = Automation::new(&device, &oracle, config())
        .run("Open settings")
        .await
        .expect("run");

    assert_eq!(
        report.status,
        RunStatus::Aborted {
            reason: AbortReason::Stuck {
                signature: "tap:0".into(),
                repeats: 3
            }
        }
    );
    assert_eq!(report.steps.len(), 3);
    assert!(matches!(report.steps[2].outcome, StepOutcome::Aborted(_)));
    assert_eq!(device.count("tap").await, 2);
    assert_eq!(oracle.calls().await, 3);
}

#[tokio::test]
async fn alternating_decisions_are_not_a_stall_and_hit_the_step_ceiling() {
    let device = FakeDevice::with_screens(vec![home()]);
    let oracle = ScriptedOracle::cycling([TAP_0, TAP_1]);

    let report = Automation::new(&device, &oracle, config())
        .run("Never finishes")
        .await
        .expect("run");

    assert_eq!(report.status, RunStatus::StepLimit { max_steps: 20 });
    assert_eq!(report.steps.len(), 20);
    assert_eq!(oracle.calls().await, 20);
    assert_eq!(device.count("tap").await, 20);
    assert!(report.render().contains("stopped (reached the 20-step limit)"));
}

#[tokio::test]
async fn three_empty_observations_abort_without_asking_the_oracle() {
    let device = FakeDevice::with_screens(vec![empty()]);
    let oracle = ScriptedOracle::cycling([TAP_0]);

    let report = Automation::new(&device, &oracle, config())
        .run("Open settings")
        .await
        .expect("run");

    assert_eq!(
        report.status,
        RunStatus::Aborted {
            reason: AbortReason::ScreenUnreadable { attempts: 3 }
        }
    );
    assert_eq!(oracle.calls().await, 0);
    assert_eq!(device.count("get_ui_tree").await, 3);
    let outcomes: Vec<_> = report.steps.iter().map(|s| s.outcome.to_string()).collect();
    assert_eq!(
        outcomes,
        vec![
            "failed: screen has no actionable elements",
            "failed: screen has no actionable elements",
            "aborted: screen has no actionable elements",
        ]
    );
}

#[tokio::test]
async fn a_readable_screen_resets_the_empty_streak() {
    let device = FakeDevice::with_screens(vec![empty(), empty(), home(), empty(), empty(), home()]);
    let oracle = ScriptedOracle::new([
        TAP_0,
        r#"{"action":"done","summary":"ok"}"#,
    ]);

    let report = Automation::new(&device, &oracle, config())
        .run("Open settings")
        .await
        .expect("run");

    assert!(report.completed());
    assert_eq!(report.steps.len(), 6);
    assert_eq!(oracle.calls().await, 2);
}

#[tokio::test]
async fn silent_device_counts_as_unreadable_screen() {
    let device = FakeDevice::with_screens(vec![home()]);
    device.silence("get_ui_tree").await;
    let oracle = ScriptedOracle::cycling([TAP_0]);

    let report = Automation::new(&device, &oracle, config())
        .run("Open settings")
        .await
        .expect("run");

    assert!(!report.completed());
    assert!(report.steps[0].outcome.to_string().contains("timed out"));
    assert_eq!(oracle.calls().await, 0);
}

#[tokio::test]
async fn bad_oracle_replies_are_logged_and_the_loop_continues() {
    let device = FakeDevice::with_screens(vec![home()]);
    let oracle = ScriptedOracle::new([
        ScriptedReply::from("I think the settings icon is top left."),
        ScriptedReply::TransportError("503 overloaded".into()),
        ScriptedReply::from(r#"{"action":"tap","reasoning":"forgot the index"}"#),
        ScriptedReply::from(r#"{"action":"done","summary":"gave up politely"}"#),
    ]);

    let report = Automation::new(&device, &oracle, config())
        .run("Open settings")
        .await
        .expect("run");

    assert!(report.completed());
    assert_eq!(report.steps.len(), 4);
    for entry in &report.steps[..3] {
        assert_eq!(entry.action, "decide");
        assert!(matches!(entry.outcome, StepOutcome::Failed(_)));
    }
    assert!(report.steps[1].outcome.to_string().contains("503 overloaded"));
    assert_eq!(device.count("get_ui_tree").await, 4);
}

#[tokio::test]
async fn unknown_element_fails_locally_and_run_recovers() {
    let device = FakeDevice::with_screens(vec![home()]);
    let oracle = ScriptedOracle::new([
        r#"{"action":"tap","element":7,"reasoning":"guess"}"#,
        r#"{"action":"done","summary":"done"}"#,
    ]);

    let report = Automation::new(&device, &oracle, config())
        .run("Open settings")
        .await
        .expect("run");

    assert_eq!(
        report.steps[0].outcome,
        StepOutcome::Failed("Element [7] not found".into())
    );
    assert_eq!(device.count("tap").await, 0);
    assert!(report.completed());
}

#[tokio::test]
async fn device_rejection_is_a_failed_step() {
    let device = FakeDevice::with_screens(vec![home()]);
    device.fail_command("launch_app", "package not installed").await;
    let oracle = ScriptedOracle::new([
        r#"{"action":"launch_app","package":"com.example.missing"}"#,
        r#"{"action":"done","summary":"app missing"}"#,
    ]);

    let report = Automation::new(&device, &oracle, config())
        .run("Open the missing app")
        .await
        .expect("run");

    assert_eq!(report.steps[0].outcome.to_string(), "failed: package not installed");
    assert!(report.completed());
}

#[tokio::test]
async fn unanswered_action_is_a_failed_step_and_the_run_goes_on() {
    let device = FakeDevice::with_screens(vec![home()]);
    device.silence("tap").await;
    let oracle = ScriptedOracle::new([
        TAP_0,
        r#"{"action":"done","summary":"tap never landed"}"#,
    ]);

    let report = Automation::new(&device, &oracle, config())
        .run("Open settings")
        .await
        .expect("run");

    assert_eq!(report.steps.len(), 2);
    assert_eq!(report.steps[0].outcome.to_string(), "failed: command timed out");
    assert!(report.completed());
    assert_eq!(device.count("get_ui_tree").await, 2);

    let commands = device.commands().await;
    let tap = commands.iter().find(|cmd| cmd.command_type == "tap").expect("tap sent");
    assert_eq!(device.cancelled().await, vec![tap.id.clone()]);
}

#[tokio::test]
async fn inline_tree_from_an_action_skips_the_next_fetch() {
    let device = FakeDevice::with_screens(vec![home()]);
    device
        .attach_ui_tree(screen(vec![node("android.widget.Switch", "Wi-Fi", "[0,200][1080,300]")]))
        .await;
    let oracle = ScriptedOracle::new([TAP_0, r#"{"action":"done","summary":"on the Wi-Fi page"}"#]);

    let report = Automation::new(&device, &oracle, config())
        .run("Open Wi-Fi settings")
        .await
        .expect("run");

    assert!(report.completed());
    assert_eq!(device.count("get_ui_tree").await, 1);
    let requests = oracle.requests().await;
    assert!(requests[0].ui_text.contains("\"Settings\""));
    assert_eq!(requests[1].ui_text, "[0] Switch \"Wi-Fi\" [540,250] clickable");
}

#[tokio::test]
async fn oracle_sees_at_most_three_recent_actions() {
    let device = FakeDevice::with_screens(vec![home()]);
    let oracle = ScriptedOracle::new([
        TAP_0,
        r#"{"action":"swipe","direction":"down","reasoning":"look below"}"#,
        TAP_1,
        r#"{"action":"press_button","button":"back","reasoning":"go back"}"#,
        r#"{"action":"wait","reasoning":"let it load"}"#,
        r#"{"action":"done","summary":"finished"}"#,
    ]);

    Automation::new(&device, &oracle, config())
        .run("Explore")
        .await
        .expect("run");

    let requests = oracle.requests().await;
    assert_eq!(requests.len(), 6);
    assert!(requests[0].history.is_empty());
    assert_eq!(requests[2].history.len(), 2);
    let last: Vec<_> = requests[5].history.iter().map(|h| h.action.as_str()).collect();
    assert_eq!(last, vec!["tap [1]", "press_button back", "wait"]);
    assert_eq!(requests[5].history[2].reasoning, "let it load");
}

#[tokio::test]
async fn configured_history_window_reaches_the_oracle() {
    let device = FakeDevice::with_screens(vec![home()]);
    let oracle = ScriptedOracle::new([
        TAP_0,
        r#"{"action":"swipe","direction":"down","reasoning":"look below"}"#,
        TAP_1,
        r#"{"action":"press_button","button":"back","reasoning":"go back"}"#,
        r#"{"action":"done","summary":"finished"}"#,
    ]);
    let config = LoopConfig {
        history_window: 2,
        ..config()
    };

    Automation::new(&device, &oracle, config)
        .run("Explore")
        .await
        .expect("run");

    let requests = oracle.requests().await;
    let last: Vec<_> = requests[4].history.iter().map(|h| h.action.as_str()).collect();
    assert_eq!(last, vec!["tap [1]", "press_button back"]);
}

#[tokio::test]
async fn wait_never_reaches_the_device() {
    let device = FakeDevice::with_screens(vec![home()]);
    let oracle = ScriptedOracle::new([
        r#"{"action":"wait","reasoning":"loading"}"#,
        r#"{"action":"done","summary":"loaded"}"#,
    ]);

    Automation::new(&device, &oracle, config())
        .run("Wait for it")
        .await
        .expect("run");

    let kinds: Vec<_> = device
        .commands()
        .await
        .into_iter()
        .map(|cmd| cmd.command_type)
        .collect();
    assert_eq!(kinds, vec!["get_ui_tree", "get_ui_tree"]);
}

#[tokio::test]
async fn broken_channel_is_fatal() {
    let oracle = ScriptedOracle::cycling([TAP_0]);

    let err = run_automation(&BrokenChannel, &oracle, config(), "Open settings")
        .await
        .expect_err("fatal");

    assert!(matches!(err, AutomationError::Channel(_)));
    assert_eq!(format!("automation failed: {err}"), "automation failed: transport error: connection refused");
    assert_eq!(oracle.calls().await, 0);
}

#[tokio::test]
async fn run_automation_returns_the_rendered_report() {
    let device = FakeDevice::with_screens(vec![home()]);
    let oracle = ScriptedOracle::new([r#"{"action":"done","summary":"Opened settings"}"#]);

    let text = run_automation(&device, &oracle, config(), "Open settings")
        .await
        .expect("run");

    assert!(text.starts_with("Goal: Open settings\nResult: completed\n"));
    assert!(text.ends_with("Summary: Opened settings"));
}

#[tokio::test]
async fn observers_see_start_steps_and_finish() {
    let device = FakeDevice::with_screens(vec![home()]);
    let oracle = ScriptedOracle::new([TAP_0, r#"{"action":"done","summary":"ok"}"#]);
    let (tx, mut rx) = broadcast::channel(32);

    Automation::new(&device, &oracle, config())
        .with_events(tx)
        .run("Open settings")
        .await
        .expect("run");

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(serde_json::to_value(&event).expect("serialize"));
    }
    assert_eq!(events.first(), Some(&json!({"event": "started", "goal": "Open settings"})));
    assert_eq!(
        events.last(),
        Some(&json!({"event": "finished", "completed": true, "status": "completed"}))
    );
    let steps = events.iter().filter(|e| e["event"] == "step").count();
    assert_eq!(steps, 2);
    assert_eq!(events[1], json!({"event": "thinking", "step": 1}));
}
