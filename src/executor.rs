//! Turns decided actions into device commands.

use std::time::Duration;

use serde_json::{Value, json};
use tracing::debug;

use crate::action::Action;
use crate::channel::{CommandChannel, CommandResponse, send_command};
use crate::config::PollProfile;
use crate::error::{ActionError, ChannelError};
use crate::tree::UiElement;

const LONG_PRESS_MS: u64 = 1_000;

pub struct ActionExecutor<'a, C: ?Sized> {
    channel: &'a C,
    profile: PollProfile,
    wait_delay: Duration,
}

impl<'a, C> ActionExecutor<'a, C>
where
    C: CommandChannel + ?Sized,
{
    pub fn new(channel: &'a C, profile: PollProfile) -> Self {
        Self {
            channel,
            profile,
            wait_delay: Duration::from_secs(2),
        }
    }

    pub fn with_wait_delay(mut self, wait_delay: Duration) -> Self {
        self.wait_delay = wait_delay;
        self
    }

    /// Carry out `action` against the snapshot it was chosen from.
    ///
    /// Local problems (an element index outside `elements`) come back as a
    /// failed [`CommandResponse`] without touching the channel. `Err` means
    /// the channel itself is broken.
    pub async fn execute(
        &self,
        action: &Action,
        elements: &[UiElement],
    ) -> Result<CommandResponse, ChannelError> {
        match action {
            Action::Tap { element } => self.touch("tap", *element, elements, None).await,
            Action::DoubleTap { element } => self.touch("double_tap", *element, elements, None).await,
            Action::LongPress { element } => {
                self.touch("long_press", *element, elements, Some(LONG_PRESS_MS))
                    .await
            }
            Action::Swipe { direction } => {
                self.send("swipe", json!({"direction": direction.as_str()})).await
            }
            Action::Type { text } => self.send("type_text", json!({"text": text})).await,
            Action::PressButton { button } => {
                self.send("press_button", json!({"button": button})).await
            }
            Action::LaunchApp { package } => {
                self.send("launch_app", json!({"package": package})).await
            }
            Action::Wait => {
                tokio::time::sleep(self.wait_delay).await;
                Ok(CommandResponse::completed(None))
            }
            Action::Done { summary } => Ok(CommandResponse::completed(Some(
                json!({"summary": summary}),
            ))),
        }
    }

    async fn touch(
        &self,
        command_type: &str,
        index: i64,
        elements: &[UiElement],
        duration_ms: Option<u64>,
    ) -> Result<CommandResponse, ChannelError> {
        let Some(target) = resolve(elements, index) else {
            return Ok(CommandResponse::failed(
                ActionError::ElementNotFound(index).to_string(),
            ));
        };
        let mut params = json!({"x": target.bounds.center_x, "y": target.bounds.center_y});
        if let Some(ms) = duration_ms {
            params["duration_ms"] = json!(ms);
        }
        debug!(command_type, index, element = %target.render(), "touching element");
        self.send(command_type, params).await
    }

    async fn send(&self, command_type: &str, params: Value) -> Result<CommandResponse, ChannelError> {
        send_command(self.channel, command_type, Some(params), self.profile).await
    }
}

fn resolve(elements: &[UiElement], index: i64) -> Option<&UiElement> {
    usize::try_from(index).ok().and_then(|i| elements.get(i))
}
