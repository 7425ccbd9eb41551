// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! WebSocket Relay Client
//!
//! JSON text frames over `tokio-tungstenite`. The client authenticates as
//! soon as the socket opens; everything after that is forwarded as
//! [`RelayClientEvent`]s.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use super::client::{RelayClient, RelayClientFactory, RelayConnection};
use super::protocol::{ClientFrame, RelayClientEvent, ServerFrame};
use crate::types::{UserCredentials, UserId};
use crate::wire::RelayMessageBundle;

enum Command {
    Frame(ClientFrame),
    Close,
}

/// Connects to a relay over WebSocket.
#[derive(Debug, Clone)]
pub struct WebSocketRelayClientFactory {
    server_url: String,
    connect_timeout: Duration,
}

impl WebSocketRelayClientFactory {
    pub fn new(server_url: impl Into<String>, connect_timeout: Duration) -> Self {
        WebSocketRelayClientFactory {
            server_url: server_url.into(),
            connect_timeout,
        }
    }
}

impl RelayClientFactory for WebSocketRelayClientFactory {
    fn connect(&self, credentials: UserCredentials) -> RelayConnection {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (event_tx, events) = mpsc::unbounded_channel();

        tokio::spawn(run_connection(
            self.server_url.clone(),
            self.connect_timeout,
            credentials,
            command_rx,
            event_tx,
        ));

        RelayConnection {
            client: Arc::new(WebSocketRelayClient { commands }),
            events,
        }
    }
}

/// Handle to a WebSocket relay connection task.
pub struct WebSocketRelayClient {
    commands: mpsc::UnboundedSender<Command>,
}

impl WebSocketRelayClient {
    fn submit(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("Relay connection task has ended");
        }
    }
}

impl RelayClient for WebSocketRelayClient {
    fn send_message(&self, to: UserId, bundle: RelayMessageBundle, message_id: &str) {
        self.submit(Command::Frame(ClientFrame::SendMessage {
            to,
            message_id: message_id.to_string(),
            bundle,
        }));
    }

    fn send_message_received_ack(&self, message_id: &str) {
        self.submit(Command::Frame(ClientFrame::MessageReceivedAck {
            message_id: message_id.to_string(),
        }));
    }

    fn send_ping(&self) {
        self.submit(Command::Frame(ClientFrame::Ping));
    }

    fn disconnect(&self) {
        self.submit(Command::Close);
    }
}

fn emit(events: &mpsc::UnboundedSender<RelayClientEvent>, event: RelayClientEvent) {
    let _ = events.send(event);
}

async fn run_connection(
    server_url: String,
    connect_timeout: Duration,
    credentials: UserCredentials,
    mut commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<RelayClientEvent>,
) {
    let stream = match tokio::time::timeout(connect_timeout, connect_async(server_url.as_str())).await
    {
        Ok(Ok((stream, _response))) => stream,
        Ok(Err(e)) => {
            emit(&events, RelayClientEvent::ConnectionFailure(e.to_string()));
            return;
        }
        Err(_) => {
            emit(
                &events,
                RelayClientEvent::ConnectionFailure(format!(
                    "timed out after {:?}",
                    connect_timeout
                )),
            );
            return;
        }
    };
    emit(&events, RelayClientEvent::ConnectionEstablished);

    let (mut write, mut read) = stream.split();

    let auth = match serde_json::to_string(&ClientFrame::authenticate(&credentials)) {
        Ok(json) => json,
        Err(e) => {
            emit(&events, RelayClientEvent::ConnectionFailure(e.to_string()));
            return;
        }
    };
    if let Err(e) = write.send(Message::Text(auth)).await {
        emit(&events, RelayClientEvent::ConnectionFailure(e.to_string()));
        return;
    }

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Frame(frame)) => {
                    let json = match serde_json::to_string(&frame) {
                        Ok(json) => json,
                        Err(e) => {
                            warn!("Unable to serialize relay frame: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = write.send(Message::Text(json)).await {
                        warn!("Relay write failed: {}", e);
                        emit(&events, RelayClientEvent::ConnectionLost { was_requested: false });
                        return;
                    }
                }
                Some(Command::Close) | None => {
                    let _ = write.close().await;
                    emit(&events, RelayClientEvent::ConnectionLost { was_requested: true });
                    return;
                }
            },
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ServerFrame>(&text) {
                        Ok(frame) => {
                            if let Some(event) = frame.into_event() {
                                emit(&events, event);
                            }
                        }
                        Err(e) => warn!("Ignoring malformed relay frame: {}", e),
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    emit(&events, RelayClientEvent::ConnectionLost { was_requested: false });
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("Relay read failed: {}", e);
                    emit(&events, RelayClientEvent::ConnectionLost { was_requested: false });
                    return;
                }
            },
        }
    }
}
