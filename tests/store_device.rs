use std::time::Duration;

use droidpilot::automation::Automation;
use droidpilot::channel::{CommandChannel, CommandResponse};
use droidpilot::config::{LoopConfig, PollProfile};
use droidpilot::store::CommandStore;
use droidpilot::test_support::{ScriptedOracle, node, screen};
use serde_json::json;
use tokio::task::JoinHandle;

/// Device stand-in that drains the store: it answers `get_ui_tree` with a
/// chat screen and acknowledges everything else.
fn spawn_device(store: CommandStore) -> JoinHandle<Vec<String>> {
    tokio::spawn(async move {
        let mut handled = Vec::new();
        loop {
            let Some(cmd) = store.next_pending().await else {
                tokio::time::sleep(Duration::from_millis(1)).await;
                continue;
            };
            let response = match cmd.command_type.as_str() {
                "get_ui_tree" => CommandResponse::completed(Some(json!({
                    "tree": screen(vec![
                        node("android.widget.EditText", "", "[0,1700][900,1800]"),
                        node("android.widget.ImageButton", "Send", "[900,1700][1080,1800]"),
                    ])
                }))),
                "shutdown" => break handled,
                _ => CommandResponse::completed(None),
            };
            handled.push(cmd.command_type.clone());
            store.complete(&cmd.id, response).await.expect("complete");
        }
    })
}

#[tokio::test]
async fn loop_drives_a_device_through_the_command_store() {
    let store = CommandStore::new();
    let device = spawn_device(store.clone());
    let oracle = ScriptedOracle::new([
        r#"{"action":"tap","element":0,"reasoning":"focus the message box"}"#,
        r#"{"action":"type","text":"On my way","reasoning":"write the message"}"#,
        r#"{"action":"tap","element":1,"reasoning":"send it"}"#,
        r#"{"action":"done","summary":"Sent 'On my way'"}"#,
    ]);
    let config = LoopConfig {
        settle_delay: Duration::ZERO,
        poll_profile: PollProfile {
            interval: Duration::from_millis(1),
            deadline: Duration::from_secs(2),
        },
        ..LoopConfig::default()
    };

    let report = Automation::new(&store, &oracle, config)
        .run("Reply 'On my way'")
        .await
        .expect("run");

    store.submit("shutdown", None).await.expect("submit");
    let handled = device.await.expect("device task");

    assert!(report.completed(), "{report}");
    assert_eq!(report.summary(), Some("Sent 'On my way'"));
    assert_eq!(
        handled,
        vec![
            "get_ui_tree",
            "tap",
            "get_ui_tree",
            "type_text",
            "get_ui_tree",
            "tap",
            "get_ui_tree",
        ]
    );
    let requests = oracle.requests().await;
    assert_eq!(
        requests[0].ui_text,
        "[0] EditText \"\" [450,1750] clickable,editable\n[1] ImageButton \"Send\" [990,1750] clickable"
    );
}
