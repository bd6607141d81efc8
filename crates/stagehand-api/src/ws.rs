//! WebSocket handling for real-time build updates.
//!
//! Clients subscribe to `owner:{id}` or `build:{id}` channels and receive
//! every matching [`BuildEvent`] as JSON.

use std::collections::HashSet;
use std::str::FromStr;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use stagehand_core::{BuildId, OwnerId};
use stagehand_scheduler::BuildEvent;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::AppState;

/// WebSocket upgrade handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Channel {
    Owner(OwnerId),
    Build(BuildId),
}

impl Channel {
    fn matches(&self, event: &BuildEvent) -> bool {
        match self {
            Channel::Owner(id) => event.owner_id() == *id,
            Channel::Build(id) => event.build_id() == *id,
        }
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| format!("invalid channel: {}", s))?;
        let id: i64 = id
            .parse()
            .map_err(|_| format!("invalid channel id: {}", id))?;
        match kind {
            "owner" => Ok(Channel::Owner(OwnerId::new(id))),
            "build" => Ok(Channel::Build(BuildId::new(id))),
            _ => Err(format!("unknown channel kind: {}", kind)),
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Owner(id) => write!(f, "owner:{}", id),
            Channel::Build(id) => write!(f, "build:{}", id),
        }
    }
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    info!("WebSocket connection established");
    let (mut sender, mut receiver) = socket.split();
    let mut events = state.notifier.subscribe();
    let mut channels: HashSet<Channel> = HashSet::new();

    loop {
        let outgoing = tokio::select! {
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => handle_command(&text, &mut channels),
                Some(Ok(Message::Close(_))) | None => {
                    info!("WebSocket connection closed");
                    break;
                }
                Some(Err(e)) => {
                    warn!(error = %e, "WebSocket error");
                    break;
                }
                Some(Ok(_)) => continue,
            },
            event = events.recv() => match event {
                Ok(event) => match channels.iter().find(|c| c.matches(&event)) {
                    Some(channel) => WsMessage::Event {
                        channel: channel.to_string(),
                        event,
                    },
                    None => continue,
                },
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "WebSocket subscriber lagged behind");
                    continue;
                }
                Err(RecvError::Closed) => break,
            },
            _ = state.shutdown.cancelled() => break,
        };

        let json = match serde_json::to_string(&outgoing) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "Failed to encode WebSocket message");
                continue;
            }
        };
        if sender.send(Message::Text(json.into())).await.is_err() {
            debug!("WebSocket client went away");
            break;
        }
    }
}

fn handle_command(text: &str, channels: &mut HashSet<Channel>) -> WsMessage {
    let cmd = match serde_json::from_str::<WsCommand>(text) {
        Ok(cmd) => cmd,
        Err(e) => {
            return WsMessage::Error {
                message: format!("invalid command: {}", e),
            };
        }
    };

    match cmd {
        WsCommand::Subscribe { channel } => match channel.parse::<Channel>() {
            Ok(parsed) => {
                info!(channel = %channel, "Client subscribed");
                channels.insert(parsed);
                WsMessage::Subscribed { channel }
            }
            Err(message) => WsMessage::Error { message },
        },
        WsCommand::Unsubscribe { channel } => match channel.parse::<Channel>() {
            Ok(parsed) => {
                info!(channel = %channel, "Client unsubscribed");
                channels.remove(&parsed);
                WsMessage::Unsubscribed { channel }
            }
            Err(message) => WsMessage::Error { message },
        },
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsCommand {
    Subscribe { channel: String },
    Unsubscribe { channel: String },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsMessage {
    Subscribed { channel: String },
    Unsubscribed { channel: String },
    Event { channel: String, event: BuildEvent },
    Error { message: String },
}
