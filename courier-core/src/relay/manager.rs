// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Relay Client Manager
//!
//! Owns the single relay connection. The relay counts as online only after
//! authentication succeeds, and every online transition draws a new
//! [`ConnectionTag`]. Sends carry the tag they were prepared under and are
//! dropped when it no longer matches.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use super::client::{RelayClient, RelayClientFactory};
use super::error::RelayError;
use super::protocol::RelayClientEvent;
use crate::types::{ConnectionTag, UserCredentials, UserId};
use crate::wire::RelayMessageBundle;

/// Relay connectivity as seen by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayStatus {
    pub online: bool,
    /// Tag of the current connection, or of the last one while offline.
    pub connection_tag: ConnectionTag,
}

impl RelayStatus {
    pub fn offline() -> Self {
        RelayStatus {
            online: false,
            connection_tag: ConnectionTag(0),
        }
    }
}

struct ManagerState {
    client: Option<Arc<dyn RelayClient>>,
    /// Bumped per connect; events from older clients are ignored.
    generation: u64,
}

struct ManagerInner {
    factory: Arc<dyn RelayClientFactory>,
    state: Mutex<ManagerState>,
    status: watch::Sender<RelayStatus>,
    events: broadcast::Sender<RelayClientEvent>,
}

/// Cloneable handle to the relay connection.
#[derive(Clone)]
pub struct RelayClientManager {
    inner: Arc<ManagerInner>,
}

impl RelayClientManager {
    /// `event_capacity` of zero is raised to one.
    pub fn new(factory: Arc<dyn RelayClientFactory>, event_capacity: usize) -> Self {
        RelayClientManager {
            inner: Arc::new(ManagerInner {
                factory,
                state: Mutex::new(ManagerState {
                    client: None,
                    generation: 0,
                }),
                status: watch::channel(RelayStatus::offline()).0,
                events: broadcast::channel(event_capacity.max(1)).0,
            }),
        }
    }

    /// Starts a new connection. Must be called from within a Tokio runtime.
    pub fn connect(&self, credentials: UserCredentials) -> Result<(), RelayError> {
        let (generation, events) = {
            let mut state = self.inner.state.lock();
            if state.client.is_some() {
                return Err(RelayError::AlreadyConnected);
            }
            info!(address = %credentials.address, "Connecting to relay");
            let connection = self.inner.factory.connect(credentials);
            state.generation += 1;
            state.client = Some(connection.client);
            (state.generation, connection.events)
        };

        tokio::spawn(pump_events(
            Arc::downgrade(&self.inner),
            generation,
            events,
        ));
        Ok(())
    }

    /// Asks the current client to close. Status changes once the client
    /// reports the connection lost.
    pub fn disconnect(&self) {
        let client = self.inner.state.lock().client.clone();
        match client {
            Some(client) => client.disconnect(),
            None => debug!("Disconnect requested with no relay client"),
        }
    }

    /// Transmits a message if `connection_tag` still names the live connection.
    pub fn send_message(
        &self,
        connection_tag: ConnectionTag,
        to: UserId,
        bundle: RelayMessageBundle,
        message_id: &str,
    ) {
        let status = *self.inner.status.borrow();
        if !status.online || status.connection_tag != connection_tag {
            debug!(
                %message_id,
                tag = %connection_tag,
                current = %status.connection_tag,
                "Dropping message for stale connection"
            );
            return;
        }

        match self.current_client() {
            Some(client) => client.send_message(to, bundle, message_id),
            None => warn!(%message_id, "No relay client to send message"),
        }
    }

    pub fn send_message_received_ack(&self, message_id: &str) {
        match self.current_client() {
            Some(client) => client.send_message_received_ack(message_id),
            None => warn!(%message_id, "No relay client to acknowledge message"),
        }
    }

    pub fn send_ping(&self) {
        if let Some(client) = self.current_client() {
            client.send_ping();
        }
    }

    pub fn is_online(&self) -> bool {
        self.inner.status.borrow().online
    }

    pub fn connection_tag(&self) -> ConnectionTag {
        self.inner.status.borrow().connection_tag
    }

    pub fn current_status(&self) -> RelayStatus {
        *self.inner.status.borrow()
    }

    /// Online status stream. The current value is visible immediately.
    pub fn status(&self) -> watch::Receiver<RelayStatus> {
        self.inner.status.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<RelayClientEvent> {
        self.inner.events.subscribe()
    }

    /// Whether a client exists, connected or not.
    pub fn has_client(&self) -> bool {
        self.inner.state.lock().client.is_some()
    }

    fn current_client(&self) -> Option<Arc<dyn RelayClient>> {
        self.inner.state.lock().client.clone()
    }
}

impl ManagerInner {
    fn handle_event(&self, generation: u64, event: RelayClientEvent) {
        {
            let mut state = self.state.lock();
            if state.generation != generation {
                debug!(?event, "Ignoring event from superseded relay client");
                return;
            }

            match &event {
                RelayClientEvent::AuthenticationSuccessful => {
                    let tag = ConnectionTag::random();
                    info!(%tag, "Relay online");
                    self.status.send_replace(RelayStatus {
                        online: true,
                        connection_tag: tag,
                    });
                }
                RelayClientEvent::ConnectionLost { was_requested } => {
                    info!(was_requested, "Relay connection lost");
                    state.client = None;
                    self.go_offline();
                }
                RelayClientEvent::ConnectionFailure(cause) => {
                    warn!(%cause, "Relay connection failed");
                    state.client = None;
                    self.go_offline();
                }
                RelayClientEvent::AuthenticationFailure => {
                    warn!("Relay authentication failed");
                    if let Some(client) = state.client.take() {
                        client.disconnect();
                    }
                    self.go_offline();
                }
                _ => {}
            }
        }

        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// The event stream ended without a lost/failure event.
    fn handle_closed(&self, generation: u64) {
        let was_current = {
            let mut state = self.state.lock();
            if state.generation == generation && state.client.is_some() {
                state.client = None;
                true
            } else {
                false
            }
        };

        if was_current {
            warn!("Relay client event stream closed");
            self.go_offline();
            let _ = self
                .events
                .send(RelayClientEvent::ConnectionLost {
                    was_requested: false,
                });
        }
    }

    fn go_offline(&self) {
        self.status.send_if_modified(|status| {
            if status.online {
                status.online = false;
                true
            } else {
                false
            }
        });
    }
}

async fn pump_events(
    inner: Weak<ManagerInner>,
    generation: u64,
    mut events: mpsc::UnboundedReceiver<RelayClientEvent>,
) {
    while let Some(event) = events.recv().await {
        match inner.upgrade() {
            Some(inner) => inner.handle_event(generation, event),
            None => return,
        }
    }
    if let Some(inner) = inner.upgrade() {
        inner.handle_closed(generation);
    }
}
