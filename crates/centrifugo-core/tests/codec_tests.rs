//! Broker wire codec round-trip tests.

use centrifugo_core::codec::{self, Payload};
use centrifugo_core::{AdminMessage, ClientInfo, ControlMessage, JoinMessage, LeaveMessage, Message};
use serde_json::value::RawValue;

fn raw(s: &str) -> Box<RawValue> {
    RawValue::from_string(s.to_string()).unwrap()
}

fn sample_info() -> ClientInfo {
    ClientInfo {
        user: "42".into(),
        client: "7a37e561-c720-4608-52a8-a964a9db7a8a".into(),
        default_info: Some(raw(r#"{"name":"alice"}"#)),
        channel_info: Some(raw(r#"{"role":"admin"}"#)),
    }
}

#[test]
fn message_roundtrip_is_identity() {
    let msg = Message::new(
        "public:news".into(),
        raw(r#"{"input":"hello","n":3}"#),
        Some("conn-1".into()),
        Some(sample_info()),
    );

    let encoded = codec::encode_message(&msg).unwrap();
    let decoded = codec::decode_message(&encoded).unwrap();

    assert_eq!(decoded.uid, msg.uid);
    assert_eq!(decoded.timestamp, msg.timestamp);
    assert_eq!(decoded.channel, msg.channel);
    assert_eq!(decoded.data.get(), msg.data.get());
    assert_eq!(decoded.client, msg.client);
    let info = decoded.info.unwrap();
    assert_eq!(info.user, "42");
    assert_eq!(info.default_info.unwrap().get(), r#"{"name":"alice"}"#);
    assert_eq!(info.channel_info.unwrap().get(), r#"{"role":"admin"}"#);
}

#[test]
fn message_without_optionals() {
    let msg = Message::new("news".into(), raw("{}"), None, None);
    let encoded = codec::encode_message(&msg).unwrap();
    let decoded = codec::decode_message(&encoded).unwrap();
    assert!(decoded.client.is_none());
    assert!(decoded.info.is_none());
}

#[test]
fn encoding_is_length_stable() {
    // Two encodes of the same record produce the same bytes.
    let msg = Message::new("news".into(), raw(r#"{"x":1}"#), None, None);
    let a = codec::encode_message(&msg).unwrap();
    let b = codec::encode_message(&msg).unwrap();
    assert_eq!(a, b);
}

#[test]
fn join_and_leave_roundtrip() {
    let join = JoinMessage {
        channel: "chat".into(),
        data: sample_info(),
    };
    let encoded = codec::encode_join(&join).unwrap();
    match codec::decode(&encoded).unwrap() {
        Payload::Join(j) => {
            assert_eq!(j.channel, "chat");
            assert_eq!(j.data.user, "42");
        }
        other => panic!("expected join, got {other:?}"),
    }

    let leave = LeaveMessage {
        channel: "chat".into(),
        data: sample_info(),
    };
    let encoded = codec::encode_leave(&leave).unwrap();
    match codec::decode(&encoded).unwrap() {
        Payload::Leave(l) => assert_eq!(l.channel, "chat"),
        other => panic!("expected leave, got {other:?}"),
    }
}

#[test]
fn control_roundtrip() {
    let msg = ControlMessage {
        uid: "node-a".into(),
        method: "unsubscribe".into(),
        params: raw(r#"{"user":"42","channel":"news"}"#),
    };
    let encoded = codec::encode_control(&msg).unwrap();
    match codec::decode(&encoded).unwrap() {
        Payload::Control(c) => {
            assert_eq!(c.uid, "node-a");
            assert_eq!(c.method, "unsubscribe");
            assert_eq!(c.params.get(), r#"{"user":"42","channel":"news"}"#);
        }
        other => panic!("expected control, got {other:?}"),
    }
}

#[test]
fn admin_roundtrip() {
    let msg = AdminMessage {
        kind: "message".into(),
        params: raw(r#"{"channel":"news"}"#),
    };
    let encoded = codec::encode_admin(&msg).unwrap();
    match codec::decode(&encoded).unwrap() {
        Payload::Admin(a) => {
            assert_eq!(a.kind, "message");
            assert_eq!(a.params.get(), r#"{"channel":"news"}"#);
        }
        other => panic!("expected admin, got {other:?}"),
    }
}

#[test]
fn decode_rejects_unknown_kind() {
    assert!(codec::decode(&[0x7f, 0, 0, 0, 0]).is_err());
}

#[test]
fn decode_rejects_empty_and_truncated_input() {
    assert!(codec::decode(&[]).is_err());

    let msg = Message::new("news".into(), raw(r#"{"x":1}"#), None, None);
    let encoded = codec::encode_message(&msg).unwrap();
    // Every strict prefix must fail cleanly, never panic.
    for cut in 1..encoded.len() {
        assert!(
            codec::decode(&encoded[..cut]).is_err(),
            "prefix of {cut} bytes decoded unexpectedly"
        );
    }
}

#[test]
fn decode_message_rejects_other_kinds() {
    let join = JoinMessage {
        channel: "chat".into(),
        data: sample_info(),
    };
    let encoded = codec::encode_join(&join).unwrap();
    assert!(codec::decode_message(&encoded).is_err());
}

#[test]
fn unicode_channel_and_data_survive() {
    let msg = Message::new("новости".into(), raw(r#"{"text":"héllo ✓"}"#), None, None);
    let encoded = codec::encode_message(&msg).unwrap();
    let decoded = codec::decode_message(&encoded).unwrap();
    assert_eq!(decoded.channel, "новости");
    assert_eq!(decoded.data.get(), r#"{"text":"héllo ✓"}"#);
}
