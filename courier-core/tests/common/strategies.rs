// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Proptest Strategies
//!
//! Reusable proptest strategies for property-based testing.
//! Import these in property test files to avoid duplication.

use proptest::prelude::*;

use courier_core::contacts::ContactSyncJobDescription;
use courier_core::types::{AllowedMessageLevel, DeviceAddress, UserId};
use courier_core::wire::{GroupEventMessage, TextMessage, WireMessage};

// ============================================================
// Identity Strategies
// ============================================================

pub fn user_id_strategy() -> impl Strategy<Value = UserId> {
    (1u64..1_000_000).prop_map(UserId::new)
}

pub fn device_address_strategy() -> impl Strategy<Value = DeviceAddress> {
    (user_id_strategy(), 1u32..16).prop_map(|(user, device)| DeviceAddress::new(user, device))
}

pub fn message_level_strategy() -> impl Strategy<Value = AllowedMessageLevel> {
    prop_oneof![
        Just(AllowedMessageLevel::All),
        Just(AllowedMessageLevel::GroupOnly),
        Just(AllowedMessageLevel::Blocked),
    ]
}

// ============================================================
// Message Strategies
// ============================================================

/// Arbitrary message text, including unicode and empty strings.
pub fn message_text_strategy() -> impl Strategy<Value = String> {
    ".{0,200}"
}

pub fn group_id_strategy() -> impl Strategy<Value = String> {
    "[a-f0-9]{8,32}"
}

pub fn wire_message_strategy() -> impl Strategy<Value = WireMessage> {
    let text = (
        any::<u64>(),
        message_text_strategy(),
        proptest::option::of(group_id_strategy()),
    )
        .prop_map(|(ts, msg, group)| WireMessage::Text(TextMessage::new(ts, msg, group)));

    let join = (
        group_id_strategy(),
        proptest::collection::btree_set(user_id_strategy(), 1..5),
    )
        .prop_map(|(id, joined)| WireMessage::GroupEvent(GroupEventMessage::Join { id, joined }));

    let part = group_id_strategy()
        .prop_map(|id| WireMessage::GroupEvent(GroupEventMessage::Part { id }));

    let invitation = (
        group_id_strategy(),
        message_text_strategy(),
        proptest::collection::btree_set(user_id_strategy(), 0..5),
    )
        .prop_map(|(id, name, members)| {
            WireMessage::GroupEvent(GroupEventMessage::Invitation { id, name, members })
        });

    prop_oneof![text, join, part, invitation]
}

// ============================================================
// Sync Job Strategies
// ============================================================

pub fn job_description_strategy() -> impl Strategy<Value = ContactSyncJobDescription> {
    (any::<bool>(), any::<bool>(), any::<bool>()).prop_map(
        |(local_sync, remote_sync, update_remote)| ContactSyncJobDescription {
            local_sync,
            remote_sync,
            update_remote,
        },
    )
}
