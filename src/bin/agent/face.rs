use std::convert::Infallible;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use droidpilot::automation::AutomationEvent;
use droidpilot::channel::{CommandChannel, CommandResponse, send_command};
use droidpilot::config::PollProfile;
use droidpilot::error::ChannelError;
use droidpilot::remote::{PollReply, SubmitReply, SubmitRequest};
use droidpilot::store::CommandStore;
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};

/// A goal waiting for the automation worker, with a slot for its report.
pub struct GoalRequest {
    pub goal: String,
    pub reply: oneshot::Sender<String>,
}

#[derive(Clone)]
pub struct AppState {
    pub store: CommandStore,
    pub goal_tx: mpsc::Sender<GoalRequest>,
    pub event_tx: broadcast::Sender<AutomationEvent>,
}

#[derive(Deserialize)]
struct AutomatePayload {
    goal: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/automate", post(automate_handler))
        .route("/command", post(command_handler))
        .route("/commands", post(submit_handler))
        .route("/commands/{id}", get(poll_handler).delete(cancel_handler))
        .route("/device/next", get(device_next_handler))
        .route("/device/result/{id}", post(device_result_handler))
        .route("/events", get(sse_handler))
        .with_state(Arc::new(state))
}

/// Bind `addr` and serve in the background.
pub async fn start_server(addr: &str, state: AppState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!(%addr, "agent server listening");

    let app = router(state);
    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            warn!(error = %err, "server stopped");
        }
    });
    Ok(())
}

async fn automate_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<AutomatePayload>,
) -> Response {
    let goal = payload.goal.trim().to_string();
    if goal.is_empty() {
        return (StatusCode::BAD_REQUEST, "goal must not be empty").into_response();
    }
    info!(%goal, "goal received");

    let (reply, report) = oneshot::channel();
    if state.goal_tx.send(GoalRequest { goal, reply }).await.is_err() {
        return (StatusCode::SERVICE_UNAVAILABLE, "automation worker is not running").into_response();
    }
    match report.await {
        Ok(text) => text.into_response(),
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "automation failed: worker dropped the goal")
            .into_response(),
    }
}

async fn command_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SubmitRequest>,
) -> Response {
    match send_command(&state.store, &payload.command_type, payload.params, PollProfile::STANDARD).await {
        Ok(response) => Json(response).into_response(),
        Err(err) => channel_error(err),
    }
}

async fn submit_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SubmitRequest>,
) -> Response {
    match state.store.submit(&payload.command_type, payload.params).await {
        Ok(id) => Json(SubmitReply { id }).into_response(),
        Err(err) => channel_error(err),
    }
}

async fn poll_handler(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match state.store.poll(&id).await {
        Ok(Some(response)) => Json(PollReply::from(response)).into_response(),
        Ok(None) => Json(PollReply::pending()).into_response(),
        Err(err) => channel_error(err),
    }
}

async fn cancel_handler(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match state.store.cancel(&id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => channel_error(err),
    }
}

async fn device_next_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.store.next_pending().await {
        Some(command) => {
            let queued = state.store.queued_len().await;
            debug!(id = %command.id, command_type = %command.command_type, queued, "command dispatched");
            Json(command).into_response()
        }
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn device_result_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(response): Json<CommandResponse>,
) -> Response {
    match state.store.complete(&id, response).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => channel_error(err),
    }
}

async fn sse_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.event_tx.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|result| {
        let event = result.ok()?;
        Event::default().json_data(&event).ok().map(Ok::<_, Infallible>)
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn channel_error(err: ChannelError) -> Response {
    let status = match err {
        ChannelError::UnknownCommand(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::BAD_GATEWAY,
    };
    (status, err.to_string()).into_response()
}
