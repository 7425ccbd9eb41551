// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Mock relay for testing.
//!
//! Records outgoing traffic and lets tests inject events into the current
//! connection.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::client::{RelayClient, RelayClientFactory, RelayConnection};
use super::protocol::RelayClientEvent;
use crate::types::{now_millis, UserCredentials, UserId};
use crate::wire::RelayMessageBundle;

/// A message handed to the mock relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentRelayMessage {
    pub to: UserId,
    pub message_id: String,
    pub bundle: RelayMessageBundle,
}

#[derive(Default)]
struct MockRelayState {
    connections: Vec<UserCredentials>,
    current: Option<mpsc::UnboundedSender<RelayClientEvent>>,
    sent: Vec<SentRelayMessage>,
    acks: Vec<String>,
    pings: usize,
    disconnects: usize,
}

/// Mock relay client factory.
#[derive(Clone, Default)]
pub struct MockRelayClientFactory {
    state: Arc<Mutex<MockRelayState>>,
    auto_authenticate: bool,
    auto_ack: bool,
}

impl MockRelayClientFactory {
    /// Connections stay silent until a test emits events.
    pub fn new() -> Self {
        Self::default()
    }

    /// New connections authenticate immediately.
    pub fn with_auto_authenticate(mut self) -> Self {
        self.auto_authenticate = true;
        self
    }

    /// Every sent message is acknowledged by the server immediately.
    pub fn with_auto_ack(mut self) -> Self {
        self.auto_ack = true;
        self
    }

    /// Injects an event into the current connection. Returns false when
    /// there is no connection.
    pub fn emit(&self, event: RelayClientEvent) -> bool {
        match &self.state.lock().current {
            Some(events) => events.send(event).is_ok(),
            None => false,
        }
    }

    /// Completes the handshake on the current connection.
    pub fn authenticate(&self) -> bool {
        self.emit(RelayClientEvent::ConnectionEstablished)
            && self.emit(RelayClientEvent::AuthenticationSuccessful)
    }

    /// Simulates the server dropping the connection.
    pub fn drop_connection(&self) -> bool {
        let sent = self.emit(RelayClientEvent::ConnectionLost {
            was_requested: false,
        });
        self.state.lock().current = None;
        sent
    }

    pub fn connection_count(&self) -> usize {
        self.state.lock().connections.len()
    }

    pub fn credentials(&self) -> Vec<UserCredentials> {
        self.state.lock().connections.clone()
    }

    pub fn sent_messages(&self) -> Vec<SentRelayMessage> {
        self.state.lock().sent.clone()
    }

    pub fn acks(&self) -> Vec<String> {
        self.state.lock().acks.clone()
    }

    pub fn ping_count(&self) -> usize {
        self.state.lock().pings
    }

    pub fn disconnect_count(&self) -> usize {
        self.state.lock().disconnects
    }
}

impl RelayClientFactory for MockRelayClientFactory {
    fn connect(&self, credentials: UserCredentials) -> RelayConnection {
        let (tx, events) = mpsc::unbounded_channel();
        {
            let mut state = self.state.lock();
            state.connections.push(credentials);
            state.current = Some(tx.clone());
        }

        if self.auto_authenticate {
            let _ = tx.send(RelayClientEvent::ConnectionEstablished);
            let _ = tx.send(RelayClientEvent::AuthenticationSuccessful);
        }

        RelayConnection {
            client: Arc::new(MockRelayClient {
                state: self.state.clone(),
                events: tx,
                auto_ack: self.auto_ack,
            }),
            events,
        }
    }
}

struct MockRelayClient {
    state: Arc<Mutex<MockRelayState>>,
    events: mpsc::UnboundedSender<RelayClientEvent>,
    auto_ack: bool,
}

impl RelayClient for MockRelayClient {
    fn send_message(&self, to: UserId, bundle: RelayMessageBundle, message_id: &str) {
        self.state.lock().sent.push(SentRelayMessage {
            to,
            message_id: message_id.to_string(),
            bundle,
        });
        if self.auto_ack {
            let _ = self.events.send(RelayClientEvent::ServerReceivedMessage {
                to,
                message_id: message_id.to_string(),
                timestamp: now_millis(),
            });
        }
    }

    fn send_message_received_ack(&self, message_id: &str) {
        self.state.lock().acks.push(message_id.to_string());
    }

    fn send_ping(&self) {
        self.state.lock().pings += 1;
    }

    fn disconnect(&self) {
        {
            let mut state = self.state.lock();
            state.disconnects += 1;
            if state
                .current
                .as_ref()
                .is_some_and(|current| current.same_channel(&self.events))
            {
                state.current = None;
            }
        }
        let _ = self.events.send(RelayClientEvent::ConnectionLost {
            was_requested: true,
        });
    }
}
