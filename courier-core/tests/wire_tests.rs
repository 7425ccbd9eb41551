// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Tests for wire and relay::protocol
//! Pins the JSON layout of message envelopes, encrypted payloads and relay
//! frames.

mod common;

use common::strategies::wire_message_strategy;
use courier_core::relay::{ClientFrame, RelayClientEvent, ServerFrame};
use courier_core::types::{DeviceAddress, UserCredentials, UserId};
use courier_core::wire::{
    deserialize_message, serialize_message, DeviceMismatchContent, EncryptedPackagePayload,
    GroupEventMessage, TextMessage, WireMessage,
};
use proptest::prelude::*;
use serde_json::{json, Value};

fn to_value(message: &WireMessage) -> Value {
    serde_json::from_slice(&serialize_message(message).unwrap()).unwrap()
}

// === Envelopes ===

#[test]
fn test_text_envelope_layout() {
    let message = WireMessage::Text(TextMessage::new(1234, "hi", None));
    assert_eq!(
        to_value(&message),
        json!({"t": "t", "m": {"timestamp": 1234, "message": "hi", "groupId": null}})
    );
}

#[test]
fn test_group_join_envelope_layout() {
    let message = WireMessage::GroupEvent(GroupEventMessage::Join {
        id: "g1".into(),
        joined: [UserId(5), UserId(3)].into_iter().collect(),
    });
    assert_eq!(
        to_value(&message),
        json!({"t": "g", "m": {"t": "j", "id": "g1", "joined": [3, 5]}})
    );
}

#[test]
fn test_sync_and_control_envelopes_are_recognised() {
    let sync = deserialize_message(br#"{"t":"s","m":{"anything":1}}"#).unwrap();
    assert_eq!(sync.kind(), "sync");

    let control = deserialize_message(br#"{"t":"c","m":[1,2]}"#).unwrap();
    assert_eq!(control.kind(), "control");
}

#[test]
fn test_unknown_envelope_type_is_malformed() {
    assert!(deserialize_message(br#"{"t":"x","m":{}}"#).is_err());
    assert!(deserialize_message(b"not json").is_err());
}

#[test]
fn test_group_event_group_id() {
    let part = GroupEventMessage::Part { id: "abc".into() };
    assert_eq!(part.group_id(), "abc");
}

// === Encrypted Payloads ===

#[test]
fn test_encrypted_payload_json_layout() {
    let payload = EncryptedPackagePayload {
        is_pre_key: true,
        payload: b"hello".to_vec(),
    };
    let value: Value = serde_json::from_str(&payload.to_json().unwrap()).unwrap();
    assert_eq!(value, json!({"isPreKeyWhisper": true, "payload": "aGVsbG8="}));

    let parsed = EncryptedPackagePayload::from_json(&payload.to_json().unwrap()).unwrap();
    assert_eq!(parsed, payload);
}

#[test]
fn test_encrypted_payload_rejects_invalid_base64() {
    let result = EncryptedPackagePayload::from_json(r#"{"isPreKeyWhisper":false,"payload":"***"}"#);
    assert!(result.is_err());
}

// === Relay Frames ===

#[test]
fn test_authenticate_frame() {
    let credentials = UserCredentials::new(DeviceAddress::new(UserId(9), 2), "token");
    let value = serde_json::to_value(ClientFrame::authenticate(&credentials)).unwrap();
    assert_eq!(
        value,
        json!({"type": "authenticate", "user_id": 9, "device_id": 2, "auth_token": "token"})
    );
}

#[test]
fn test_credentials_debug_redacts_token() {
    let credentials = UserCredentials::new(DeviceAddress::new(UserId(9), 2), "secret-token");
    let debug = format!("{:?}", credentials);
    assert!(!debug.contains("secret-token"));
}

#[test]
fn test_device_mismatch_frame_maps_to_event() {
    let frame: ServerFrame = serde_json::from_value(json!({
        "type": "device_mismatch",
        "to": 4,
        "message_id": "m1",
        "stale": [1],
        "missing": [2, 3]
    }))
    .unwrap();

    assert_eq!(
        frame.into_event(),
        Some(RelayClientEvent::DeviceMismatch {
            to: UserId(4),
            message_id: "m1".into(),
            info: DeviceMismatchContent {
                stale: vec![1],
                missing: vec![2, 3],
                removed: vec![],
            },
        })
    );
}

#[test]
fn test_pushed_message_frame_maps_to_event() {
    let frame: ServerFrame = serde_json::from_value(json!({
        "type": "message",
        "from_user": 7,
        "from_device": 3,
        "message_id": "m9",
        "content": "{}"
    }))
    .unwrap();

    assert_eq!(
        frame.into_event(),
        Some(RelayClientEvent::ReceivedMessage {
            from: DeviceAddress::new(UserId(7), 3),
            message_id: "m9".into(),
            content: "{}".into(),
        })
    );
}

#[test]
fn test_pong_has_no_event() {
    let frame: ServerFrame = serde_json::from_value(json!({"type": "pong"})).unwrap();
    assert_eq!(frame.into_event(), None);
}

// === Properties ===

proptest! {
    #[test]
    fn prop_envelope_survives_serialization(message in wire_message_strategy()) {
        let bytes = serialize_message(&message).unwrap();
        prop_assert_eq!(deserialize_message(&bytes).unwrap(), message);
    }
}
