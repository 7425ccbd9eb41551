// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Relay client contract.

use std::sync::Arc;

use tokio::sync::mpsc;

use super::protocol::RelayClientEvent;
use crate::types::{UserCredentials, UserId};
use crate::wire::RelayMessageBundle;

/// One live relay connection. All calls are non-blocking; outcomes arrive as
/// [`RelayClientEvent`]s.
pub trait RelayClient: Send + Sync {
    fn send_message(&self, to: UserId, bundle: RelayMessageBundle, message_id: &str);

    fn send_message_received_ack(&self, message_id: &str);

    fn send_ping(&self);

    /// Requests a clean shutdown. The client reports
    /// `ConnectionLost { was_requested: true }` once closed.
    fn disconnect(&self);
}

/// A started client together with its event stream. The stream ends when
/// the client is gone.
pub struct RelayConnection {
    pub client: Arc<dyn RelayClient>,
    pub events: mpsc::UnboundedReceiver<RelayClientEvent>,
}

/// Creates relay clients.
pub trait RelayClientFactory: Send + Sync {
    /// Starts connecting in the background and returns immediately.
    fn connect(&self, credentials: UserCredentials) -> RelayConnection;
}
