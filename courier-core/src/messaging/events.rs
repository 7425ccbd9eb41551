// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Events published by the delivery pipeline.

use crate::types::{DeviceAddress, MessageBundle, UserId};
use crate::wire::GroupEventMessage;

/// Why an outbound message was given up on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryFailure {
    /// The recipient account is gone or has no key material.
    InactiveUser,
}

/// Status changes of outbound messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageUpdateEvent {
    /// The relay acknowledged the messages; records reflect the new state.
    Delivered(MessageBundle),
    Failed {
        user_id: UserId,
        message_id: String,
        reason: DeliveryFailure,
    },
}

/// A group control event received from another user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedGroupEvent {
    pub from: DeviceAddress,
    pub message_id: String,
    pub event: GroupEventMessage,
}
