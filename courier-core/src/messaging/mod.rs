// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Messaging Module
//!
//! The message delivery pipeline: an outbound sender queue, an inbound
//! receiver queue and the messenger service that connects both to the relay
//! and the contact list.

mod error;
mod events;
mod messenger;
mod receiver;
mod sender;

pub use error::MessagingError;
pub use events::{DeliveryFailure, MessageUpdateEvent, ReceivedGroupEvent};
pub use messenger::{MessengerDeps, MessengerOptions, MessengerService};
pub use receiver::{MessageReceiver, QueuedReceivedMessage, ReceiverSnapshot};
pub use sender::{MessageSender, QueuedSendMessage, SenderSnapshot};
