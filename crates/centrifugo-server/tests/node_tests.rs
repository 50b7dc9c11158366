//! End-to-end node tests over the memory engine with a mock transport.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use centrifugo_core::auth;
use centrifugo_core::commands::Request;
use centrifugo_server::client::SessionError;
use centrifugo_server::{
    ChannelOptions, Client, Config, MemoryEngine, Namespace, Node, Session,
};

const SECRET: &str = "s";

struct MockSession {
    sent: Mutex<Vec<String>>,
    closed: Mutex<Option<(u16, String)>>,
    stalled: AtomicBool,
}

impl MockSession {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            closed: Mutex::new(None),
            stalled: AtomicBool::new(false),
        })
    }

    fn stall(&self) {
        self.stalled.store(true, Ordering::SeqCst);
    }

    fn close_code(&self) -> Option<u16> {
        self.closed.lock().as_ref().map(|(code, _)| *code)
    }

    fn frames(&self) -> Vec<Value> {
        self.sent
            .lock()
            .iter()
            .map(|s| serde_json::from_str(s).expect("frame is JSON"))
            .collect()
    }
}

#[async_trait]
impl Session for MockSession {
    async fn send(&self, data: String) -> Result<(), SessionError> {
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.sent.lock().push(data);
        Ok(())
    }

    async fn close(&self, code: u16, reason: &str) {
        let mut closed = self.closed.lock();
        if closed.is_none() {
            *closed = Some((code, reason.to_string()));
        }
    }
}

async fn start_node(mutate: impl FnOnce(&mut Config)) -> Arc<Node> {
    let mut cfg = Config::default();
    cfg.secret = SECRET.to_string();
    mutate(&mut cfg);
    let node = Node::new(cfg);
    let engine = Arc::new(MemoryEngine::new(node.clone()));
    node.set_engine(engine);
    node.run().await.expect("node runs");
    node
}

async fn wait_frames(session: &Arc<MockSession>, n: usize) -> Vec<Value> {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if session.sent.lock().len() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| {
        panic!(
            "timed out waiting for {n} frames, have {}",
            session.sent.lock().len()
        )
    });
    session.frames()
}

async fn wait_closed(session: &Arc<MockSession>) -> u16 {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let Some(code) = session.close_code() {
                return code;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timed out waiting for close")
}

fn connect_frame(user: &str) -> String {
    let sign = auth::connect_token(SECRET, user, "0", "");
    json!({
        "method": "connect",
        "params": { "user": user, "exp": "0", "info": "", "sign": sign }
    })
    .to_string()
}

/// Connect a client and return it with its session and conn id.
async fn connected_client(node: &Arc<Node>, user: &str) -> (Arc<Client>, Arc<MockSession>, String) {
    let session = MockSession::new();
    let client = Client::new(node.clone(), session.clone());
    client.handle(&connect_frame(user)).await.expect("connect ok");
    let frames = wait_frames(&session, 1).await;
    let uid = frames[0]["body"]["client"].as_str().expect("client uid").to_string();
    (client, session, uid)
}

fn api_request(method: &str, params: Value) -> Request {
    serde_json::from_value(json!({ "method": method, "params": params })).unwrap()
}

// ============================================================================
// Connect & subscribe
// ============================================================================

#[tokio::test]
async fn connect_and_subscribe() {
    let node = start_node(|_| {}).await;
    let session = MockSession::new();
    let client = Client::new(node.clone(), session.clone());

    client.handle(&connect_frame("42")).await.unwrap();
    let frames = wait_frames(&session, 1).await;
    let body = &frames[0]["body"];
    assert_eq!(frames[0]["method"], "connect");
    assert_eq!(frames[0]["error"], Value::Null);
    assert_eq!(body["client"].as_str().unwrap().len(), 36);
    assert_eq!(body["expires"], false);
    assert_eq!(body["expired"], false);
    assert_eq!(body["ttl"], Value::Null);

    client
        .handle(r#"{"method":"subscribe","params":{"channel":"news"}}"#)
        .await
        .unwrap();
    let frames = wait_frames(&session, 2).await;
    assert_eq!(frames[1]["method"], "subscribe");
    assert_eq!(frames[1]["body"]["channel"], "news");
    assert_eq!(frames[1]["body"]["status"], true);

    assert_eq!(node.num_subscribers("centrifugo.news"), 1);
}

#[tokio::test]
async fn connect_with_bad_sign_is_fatal() {
    let node = start_node(|_| {}).await;
    let session = MockSession::new();
    let client = Client::new(node, session);
    let frame = json!({
        "method": "connect",
        "params": { "user": "42", "exp": "0", "info": "", "sign": "deadbeef" }
    })
    .to_string();
    assert!(client.handle(&frame).await.is_err());
}

#[tokio::test]
async fn connect_twice_returns_same_client_uid() {
    let node = start_node(|_| {}).await;
    let (client, session, uid) = connected_client(&node, "42").await;
    client.handle(&connect_frame("42")).await.unwrap();
    let frames = wait_frames(&session, 2).await;
    assert_eq!(frames[1]["body"]["client"], Value::String(uid));
}

#[tokio::test]
async fn commands_before_connect_are_unauthorized() {
    let node = start_node(|_| {}).await;
    let session = MockSession::new();
    let client = Client::new(node, session);
    let err = client
        .handle(r#"{"method":"subscribe","params":{"channel":"news"}}"#)
        .await
        .unwrap_err();
    assert_eq!(err.as_str(), "unauthorized");
}

#[tokio::test]
async fn unknown_method_is_fatal() {
    let node = start_node(|_| {}).await;
    let (client, _session, _) = connected_client(&node, "42").await;
    let err = client
        .handle(r#"{"method":"teleport","params":{}}"#)
        .await
        .unwrap_err();
    assert_eq!(err.as_str(), "method not found");
}

#[tokio::test]
async fn batch_frame_gets_ordered_array_response() {
    let node = start_node(|_| {}).await;
    let session = MockSession::new();
    let client = Client::new(node, session.clone());

    let frame = format!(
        r#"[{},{{"method":"subscribe","params":{{"channel":"news"}}}},{{"method":"ping","uid":"p1"}}]"#,
        connect_frame("42")
    );
    client.handle(&frame).await.unwrap();
    let frames = wait_frames(&session, 1).await;
    let batch = frames[0].as_array().expect("array response");
    assert_eq!(batch.len(), 3);
    assert_eq!(batch[0]["method"], "connect");
    assert_eq!(batch[1]["method"], "subscribe");
    assert_eq!(batch[2]["method"], "ping");
    assert_eq!(batch[2]["body"], "pong");
    assert_eq!(batch[2]["uid"], "p1");
}

#[tokio::test]
async fn oversized_frame_is_fatal() {
    let node = start_node(|cfg| cfg.client_request_max_size = 64).await;
    let session = MockSession::new();
    let client = Client::new(node, session);
    let big = format!(r#"{{"method":"ping","params":{{"pad":"{}"}}}}"#, "x".repeat(100));
    assert_eq!(client.handle(&big).await.unwrap_err().as_str(), "limit exceeded");
}

// ============================================================================
// Publish fan-out
// ============================================================================

#[tokio::test]
async fn api_publish_fans_out_to_all_subscribers() {
    let node = start_node(|_| {}).await;
    let (client_a, session_a, _) = connected_client(&node, "a").await;
    let (client_b, session_b, _) = connected_client(&node, "b").await;

    for client in [&client_a, &client_b] {
        client
            .handle(r#"{"method":"subscribe","params":{"channel":"news"}}"#)
            .await
            .unwrap();
    }
    wait_frames(&session_a, 2).await;
    wait_frames(&session_b, 2).await;

    let resp = node
        .api_cmd(&api_request("publish", json!({ "channel": "news", "data": {"x": 1} })))
        .await;
    assert!(resp.error.is_none());

    for session in [&session_a, &session_b] {
        let frames = wait_frames(session, 3).await;
        let push = &frames[2];
        assert_eq!(push["method"], "message");
        assert_eq!(push["body"]["channel"], "news");
        assert_eq!(push["body"]["data"]["x"], 1);
        assert!(push["body"]["uid"].is_string());
        assert!(push["body"]["timestamp"].is_u64());
    }
}

#[tokio::test]
async fn client_publish_requires_channel_option() {
    let node = start_node(|_| {}).await;
    let (client, session, _) = connected_client(&node, "42").await;
    client
        .handle(r#"{"method":"subscribe","params":{"channel":"news"}}"#)
        .await
        .unwrap();
    client
        .handle(r#"{"method":"publish","params":{"channel":"news","data":{"x":1}}}"#)
        .await
        .unwrap();
    let frames = wait_frames(&session, 3).await;
    assert_eq!(frames[2]["error"], "permission denied");
    assert_eq!(frames[2]["body"]["status"], false);
}

#[tokio::test]
async fn client_publish_allowed_reaches_subscribers() {
    let node = start_node(|cfg| cfg.channel_options.publish = true).await;
    let (client_a, session_a, uid_a) = connected_client(&node, "a").await;
    let (client_b, session_b, _) = connected_client(&node, "b").await;
    for client in [&client_a, &client_b] {
        client
            .handle(r#"{"method":"subscribe","params":{"channel":"news"}}"#)
            .await
            .unwrap();
    }
    wait_frames(&session_a, 2).await;
    wait_frames(&session_b, 2).await;

    client_a
        .handle(r#"{"method":"publish","params":{"channel":"news","data":{"y":2}}}"#)
        .await
        .unwrap();

    // B receives the push with publisher attribution.
    let frames = wait_frames(&session_b, 3).await;
    assert_eq!(frames[2]["method"], "message");
    assert_eq!(frames[2]["body"]["client"], Value::String(uid_a.clone()));
    assert_eq!(frames[2]["body"]["info"]["user"], "a");

    // A receives its own message too, plus the publish response.
    let frames = wait_frames(&session_a, 4).await;
    let methods: Vec<&str> = frames[2..].iter().filter_map(|f| f["method"].as_str()).collect();
    assert!(methods.contains(&"message"));
    assert!(methods.contains(&"publish"));
}

// ============================================================================
// History & recovery
// ============================================================================

fn history_config(cfg: &mut Config) {
    cfg.channel_options = ChannelOptions {
        history_size: 10,
        history_lifetime: 60,
        history_recover: true,
        ..ChannelOptions::default()
    };
}

#[tokio::test]
async fn history_keeps_bounded_newest_first() {
    let node = start_node(history_config).await;
    for n in 0..15 {
        let resp = node
            .api_cmd(&api_request("publish", json!({ "channel": "chat", "data": {"n": n} })))
            .await;
        assert!(resp.error.is_none());
    }
    let history = node.history("chat", 0).await.unwrap();
    assert_eq!(history.len(), 10);
    let head: Value = serde_json::from_str(history[0].data.get()).unwrap();
    assert_eq!(head["n"], 14);
}

#[tokio::test]
async fn subscribe_with_recover_returns_missed_messages() {
    let node = start_node(history_config).await;
    for n in 0..15 {
        node.api_cmd(&api_request("publish", json!({ "channel": "chat", "data": {"n": n} })))
            .await;
    }
    // History holds messages 5..14 newest first; pick the uid of message 7.
    let history = node.history("chat", 0).await.unwrap();
    let last_uid = history
        .iter()
        .find(|m| {
            let v: Value = serde_json::from_str(m.data.get()).unwrap();
            v["n"] == 7
        })
        .map(|m| m.uid.clone())
        .expect("message 7 still in history");

    let (client, session, _) = connected_client(&node, "42").await;
    let frame = json!({
        "method": "subscribe",
        "params": { "channel": "chat", "recover": true, "last": last_uid }
    })
    .to_string();
    client.handle(&frame).await.unwrap();

    let frames = wait_frames(&session, 2).await;
    let body = &frames[1]["body"];
    assert_eq!(body["status"], true);
    assert_eq!(body["recovered"], true);
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 7);
    // Returned oldest first: 8, 9, ... 14.
    assert_eq!(messages[0]["data"]["n"], 8);
    assert_eq!(messages[6]["data"]["n"], 14);
}

#[tokio::test]
async fn recover_with_evicted_last_uid_reports_not_recovered() {
    let node = start_node(history_config).await;
    let mut first_uid = None;
    for n in 0..15 {
        node.api_cmd(&api_request("publish", json!({ "channel": "chat", "data": {"n": n} })))
            .await;
        if n == 0 {
            first_uid = node
                .history("chat", 0)
                .await
                .unwrap()
                .first()
                .map(|m| m.uid.clone());
        }
    }
    // Message 0 was evicted by the size cap, so recovery can not prove
    // completeness.
    let (client, session, _) = connected_client(&node, "42").await;
    let frame = json!({
        "method": "subscribe",
        "params": { "channel": "chat", "recover": true, "last": first_uid.unwrap() }
    })
    .to_string();
    client.handle(&frame).await.unwrap();
    let frames = wait_frames(&session, 2).await;
    assert_eq!(frames[1]["body"]["recovered"], false);
    assert_eq!(frames[1]["body"]["messages"].as_array().unwrap().len(), 10);
}

#[tokio::test]
async fn subscribe_without_recover_returns_last_uid() {
    let node = start_node(history_config).await;
    node.api_cmd(&api_request("publish", json!({ "channel": "chat", "data": {"n": 1} })))
        .await;
    let newest = node.history("chat", 0).await.unwrap()[0].uid.clone();

    let (client, session, _) = connected_client(&node, "42").await;
    client
        .handle(r#"{"method":"subscribe","params":{"channel":"chat"}}"#)
        .await
        .unwrap();
    let frames = wait_frames(&session, 2).await;
    assert_eq!(frames[1]["body"]["last"], Value::String(newest));
}

#[tokio::test]
async fn client_history_command_requires_option() {
    let node = start_node(|_| {}).await;
    let (client, session, _) = connected_client(&node, "42").await;
    client
        .handle(r#"{"method":"history","params":{"channel":"news"}}"#)
        .await
        .unwrap();
    let frames = wait_frames(&session, 2).await;
    assert_eq!(frames[1]["error"], "not available");
}

// ============================================================================
// Presence
// ============================================================================

#[tokio::test]
async fn presence_tracks_subscribers_and_expires() {
    let node = start_node(|cfg| {
        cfg.presence_expire_interval = 1;
        cfg.channel_options.presence = true;
    })
    .await;
    let (client, session, uid) = connected_client(&node, "42").await;
    client
        .handle(r#"{"method":"subscribe","params":{"channel":"park"}}"#)
        .await
        .unwrap();
    wait_frames(&session, 2).await;

    let presence = node.presence("park").await.unwrap();
    assert_eq!(presence.len(), 1);
    assert_eq!(presence[&uid].user, "42");

    client
        .handle(r#"{"method":"presence","params":{"channel":"park"}}"#)
        .await
        .unwrap();
    let frames = wait_frames(&session, 3).await;
    assert_eq!(frames[2]["body"]["data"][&uid]["user"], "42");

    // Without presence pings the entry expires.
    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert!(node.presence("park").await.unwrap().is_empty());
}

#[tokio::test]
async fn presence_command_requires_option() {
    let node = start_node(|_| {}).await;
    let (client, session, _) = connected_client(&node, "42").await;
    client
        .handle(r#"{"method":"presence","params":{"channel":"news"}}"#)
        .await
        .unwrap();
    let frames = wait_frames(&session, 2).await;
    assert_eq!(frames[1]["error"], "not available");
}

#[tokio::test]
async fn join_and_leave_notifications() {
    let node = start_node(|cfg| cfg.channel_options.join_leave = true).await;
    let (client_a, session_a, _) = connected_client(&node, "a").await;
    client_a
        .handle(r#"{"method":"subscribe","params":{"channel":"room"}}"#)
        .await
        .unwrap();
    wait_frames(&session_a, 2).await;

    let (client_b, session_b, _) = connected_client(&node, "b").await;
    client_b
        .handle(r#"{"method":"subscribe","params":{"channel":"room"}}"#)
        .await
        .unwrap();
    wait_frames(&session_b, 2).await;

    // A first sees its own join (it was already in the book when its
    // join was published), then B's.
    let frames = wait_frames(&session_a, 4).await;
    assert_eq!(frames[2]["method"], "join");
    assert_eq!(frames[2]["body"]["data"]["user"], "a");
    assert_eq!(frames[3]["method"], "join");
    assert_eq!(frames[3]["body"]["channel"], "room");
    assert_eq!(frames[3]["body"]["data"]["user"], "b");

    client_b
        .handle(r#"{"method":"unsubscribe","params":{"channel":"room"}}"#)
        .await
        .unwrap();
    let frames = wait_frames(&session_a, 5).await;
    assert_eq!(frames[4]["method"], "leave");
    assert_eq!(frames[4]["body"]["data"]["user"], "b");
}

// ============================================================================
// Channel ACL
// ============================================================================

#[tokio::test]
async fn private_channel_requires_valid_sign() {
    let node = start_node(|_| {}).await;
    let (client, session, uid) = connected_client(&node, "42").await;

    client
        .handle(r#"{"method":"subscribe","params":{"channel":"$secret"}}"#)
        .await
        .unwrap();
    let frames = wait_frames(&session, 2).await;
    assert_eq!(frames[1]["error"], "permission denied");
    assert_eq!(frames[1]["body"]["status"], false);

    let sign = auth::channel_sign(SECRET, &uid, "$secret", "");
    let frame = json!({
        "method": "subscribe",
        "params": { "channel": "$secret", "client": uid, "info": "", "sign": sign }
    })
    .to_string();
    client.handle(&frame).await.unwrap();
    let frames = wait_frames(&session, 3).await;
    assert_eq!(frames[2]["error"], Value::Null);
    assert_eq!(frames[2]["body"]["status"], true);
}

#[tokio::test]
async fn user_limited_channel_enforces_whitelist() {
    let node = start_node(|_| {}).await;
    let (client, session, _) = connected_client(&node, "42").await;

    client
        .handle(r#"{"method":"subscribe","params":{"channel":"dialog#42,43"}}"#)
        .await
        .unwrap();
    let frames = wait_frames(&session, 2).await;
    assert_eq!(frames[1]["body"]["status"], true);

    client
        .handle(r#"{"method":"subscribe","params":{"channel":"dialog#1,2"}}"#)
        .await
        .unwrap();
    let frames = wait_frames(&session, 3).await;
    assert_eq!(frames[2]["error"], "permission denied");
}

#[tokio::test]
async fn client_limited_channel_binds_to_connection() {
    let node = start_node(|_| {}).await;
    let (client, session, uid) = connected_client(&node, "42").await;

    let frame = json!({
        "method": "subscribe",
        "params": { "channel": format!("updates&{uid}") }
    })
    .to_string();
    client.handle(&frame).await.unwrap();
    let frames = wait_frames(&session, 2).await;
    assert_eq!(frames[1]["body"]["status"], true);

    client
        .handle(r#"{"method":"subscribe","params":{"channel":"updates&someone-else"}}"#)
        .await
        .unwrap();
    let frames = wait_frames(&session, 3).await;
    assert_eq!(frames[2]["error"], "permission denied");
}

#[tokio::test]
async fn anonymous_subscribe_needs_flag() {
    let node = start_node(|cfg| {
        cfg.namespaces = vec![Namespace {
            name: "open".into(),
            options: ChannelOptions {
                anonymous: true,
                ..ChannelOptions::default()
            },
        }];
    })
    .await;
    let (client, session, _) = connected_client(&node, "").await;

    client
        .handle(r#"{"method":"subscribe","params":{"channel":"news"}}"#)
        .await
        .unwrap();
    let frames = wait_frames(&session, 2).await;
    assert_eq!(frames[1]["error"], "permission denied");

    client
        .handle(r#"{"method":"subscribe","params":{"channel":"open:news"}}"#)
        .await
        .unwrap();
    let frames = wait_frames(&session, 3).await;
    assert_eq!(frames[2]["error"], Value::Null);
}

#[tokio::test]
async fn unknown_namespace_is_soft_error() {
    let node = start_node(|_| {}).await;
    let (client, session, _) = connected_client(&node, "42").await;
    client
        .handle(r#"{"method":"subscribe","params":{"channel":"ghost:news"}}"#)
        .await
        .unwrap();
    let frames = wait_frames(&session, 2).await;
    assert_eq!(frames[1]["error"], "namespace not found");
}

#[tokio::test]
async fn channel_limit_is_enforced() {
    let node = start_node(|cfg| cfg.client_channel_limit = 2).await;
    let (client, session, _) = connected_client(&node, "42").await;
    for (i, ch) in ["a1", "a2", "a3"].iter().enumerate() {
        client
            .handle(&format!(r#"{{"method":"subscribe","params":{{"channel":"{ch}"}}}}"#))
            .await
            .unwrap();
        wait_frames(&session, i + 2).await;
    }
    let frames = session.frames();
    assert_eq!(frames[1]["body"]["status"], true);
    assert_eq!(frames[2]["body"]["status"], true);
    assert_eq!(frames[3]["error"], "limit exceeded");
}

#[tokio::test]
async fn duplicate_subscribe_is_rejected() {
    let node = start_node(|_| {}).await;
    let (client, session, _) = connected_client(&node, "42").await;
    client
        .handle(r#"{"method":"subscribe","params":{"channel":"news"}}"#)
        .await
        .unwrap();
    client
        .handle(r#"{"method":"subscribe","params":{"channel":"news"}}"#)
        .await
        .unwrap();
    let frames = wait_frames(&session, 3).await;
    assert_eq!(frames[2]["error"], "already subscribed");
    assert_eq!(node.num_subscribers("centrifugo.news"), 1);
}

// ============================================================================
// Slow client
// ============================================================================

#[tokio::test]
async fn slow_client_is_closed_and_removed_from_book() {
    let node = start_node(|cfg| cfg.client_queue_max_size = 1024).await;
    let (client_a, session_a, _) = connected_client(&node, "a").await;
    let (client_b, session_b, _) = connected_client(&node, "b").await;
    for client in [&client_a, &client_b] {
        client
            .handle(r#"{"method":"subscribe","params":{"channel":"news"}}"#)
            .await
            .unwrap();
    }
    wait_frames(&session_a, 2).await;
    wait_frames(&session_b, 2).await;

    // A's transport stops draining; its queue fills until the byte cap
    // trips.
    session_a.stall();
    let payload = "x".repeat(600);
    for _ in 0..4 {
        let resp = node
            .api_cmd(&api_request("publish", json!({ "channel": "news", "data": {"pad": payload} })))
            .await;
        assert!(resp.error.is_none());
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(wait_closed(&session_a).await, 3003);

    // The slow client left the book; the healthy subscriber remains.
    tokio::time::timeout(Duration::from_secs(2), async {
        while node.num_subscribers("centrifugo.news") != 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("slow client removed from book");
    assert!(session_b.close_code().is_none());
    assert!(session_b.frames().len() >= 3);
}

// ============================================================================
// Close & shutdown
// ============================================================================

#[tokio::test]
async fn close_removes_subscriptions_and_presence() {
    let node = start_node(|cfg| cfg.channel_options.presence = true).await;
    let (client, session, uid) = connected_client(&node, "42").await;
    client
        .handle(r#"{"method":"subscribe","params":{"channel":"news"}}"#)
        .await
        .unwrap();
    wait_frames(&session, 2).await;
    assert_eq!(node.presence("news").await.unwrap().len(), 1);

    client.close(3000, "bye").await;
    assert_eq!(node.num_subscribers("centrifugo.news"), 0);
    assert!(node.presence("news").await.unwrap().is_empty());
    assert!(!node.presence("news").await.unwrap().contains_key(&uid));

    // Close is idempotent.
    client.close(3000, "bye again").await;
    assert_eq!(session.close_code(), Some(3000));
}

#[tokio::test]
async fn shutdown_closes_clients_with_shutdown_code() {
    let node = start_node(|_| {}).await;
    let (_client, session, _) = connected_client(&node, "42").await;
    node.shutdown().await;
    assert_eq!(wait_closed(&session).await, 3001);
}

#[tokio::test]
async fn stale_connection_is_closed() {
    let node = start_node(|cfg| cfg.stale_connection_close_delay = 1).await;
    let session = MockSession::new();
    let _client = Client::new(node, session.clone());
    tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            if session.close_code() == Some(3002) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("stale connection closed");
}

// ============================================================================
// API dispatcher
// ============================================================================

#[tokio::test]
async fn api_unsubscribe_and_disconnect_user() {
    let node = start_node(|_| {}).await;
    let (client, session, _) = connected_client(&node, "42").await;
    client
        .handle(r#"{"method":"subscribe","params":{"channel":"news"}}"#)
        .await
        .unwrap();
    wait_frames(&session, 2).await;

    let resp = node
        .api_cmd(&api_request("unsubscribe", json!({ "user": "42", "channel": "news" })))
        .await;
    assert!(resp.error.is_none());
    assert_eq!(node.num_subscribers("centrifugo.news"), 0);

    let resp = node.api_cmd(&api_request("disconnect", json!({ "user": "42" }))).await;
    assert!(resp.error.is_none());
    assert_eq!(wait_closed(&session).await, 3000);
}

#[tokio::test]
async fn api_channels_stats_node_ping() {
    let node = start_node(|_| {}).await;
    let (client, session, _) = connected_client(&node, "42").await;
    client
        .handle(r#"{"method":"subscribe","params":{"channel":"news"}}"#)
        .await
        .unwrap();
    wait_frames(&session, 2).await;

    let resp = node.api_cmd(&api_request("channels", json!({}))).await;
    assert_eq!(resp.body["data"], json!(["news"]));

    let resp = node.api_cmd(&api_request("stats", json!({}))).await;
    assert!(resp.body["data"]["nodes"].as_array().is_some());
    assert!(resp.body["data"]["metrics_interval"].is_u64());

    let resp = node.api_cmd(&api_request("node", json!({}))).await;
    assert_eq!(resp.body["data"]["metrics"]["num_clients"], 1);

    let resp = node.api_cmd(&api_request("ping", json!({}))).await;
    assert_eq!(resp.body, "pong");

    let resp = node.api_cmd(&api_request("warp", json!({}))).await;
    assert_eq!(resp.error.as_deref(), Some("method not found"));
}

#[tokio::test]
async fn api_broadcast_publishes_to_every_channel() {
    let node = start_node(|_| {}).await;
    let (client, session, _) = connected_client(&node, "42").await;
    for ch in ["one", "two"] {
        client
            .handle(&format!(r#"{{"method":"subscribe","params":{{"channel":"{ch}"}}}}"#))
            .await
            .unwrap();
    }
    wait_frames(&session, 3).await;

    let resp = node
        .api_cmd(&api_request(
            "broadcast",
            json!({ "channels": ["one", "two"], "data": {"b": 1} }),
        ))
        .await;
    assert!(resp.error.is_none());

    let frames = wait_frames(&session, 5).await;
    let channels: Vec<&str> = frames[3..]
        .iter()
        .filter_map(|f| f["body"]["channel"].as_str())
        .collect();
    assert!(channels.contains(&"one"));
    assert!(channels.contains(&"two"));
}

// ============================================================================
// Admin connections
// ============================================================================

#[tokio::test]
async fn admin_connect_requires_valid_token() {
    let node = start_node(|_| {}).await;

    let session = MockSession::new();
    let admin = centrifugo_server::AdminClient::new(node.clone(), session);
    let err = admin
        .handle(r#"{"method":"connect","params":{"token":"bogus"}}"#)
        .await
        .unwrap_err();
    assert_eq!(err.as_str(), "unauthorized");

    let session = MockSession::new();
    let admin = centrifugo_server::AdminClient::new(node.clone(), session.clone());
    let token = auth::admin_token(SECRET);
    let frame = json!({ "method": "connect", "params": { "token": token } }).to_string();
    admin.handle(&frame).await.unwrap();
    let frames = wait_frames(&session, 1).await;
    assert_eq!(frames[0]["method"], "connect");
    assert_eq!(frames[0]["body"], true);

    admin.handle(r#"{"method":"ping"}"#).await.unwrap();
    admin.handle(r#"{"method":"info"}"#).await.unwrap();
    let frames = wait_frames(&session, 3).await;
    assert_eq!(frames[1]["body"], "pong");
    assert!(frames[2]["body"]["data"]["version"].is_string());
}

#[tokio::test]
async fn admin_commands_require_auth_first() {
    let node = start_node(|_| {}).await;
    let session = MockSession::new();
    let admin = centrifugo_server::AdminClient::new(node, session);
    let err = admin.handle(r#"{"method":"info"}"#).await.unwrap_err();
    assert_eq!(err.as_str(), "unauthorized");
}

#[tokio::test]
async fn watched_channel_mirrors_publishes_to_admins() {
    let node = start_node(|cfg| {
        cfg.insecure_admin = true;
        cfg.channel_options.watch = true;
    })
    .await;

    let session = MockSession::new();
    let admin = centrifugo_server::AdminClient::new(node.clone(), session.clone());
    admin.handle(r#"{"method":"connect"}"#).await.unwrap();
    wait_frames(&session, 1).await;

    let resp = node
        .api_cmd(&api_request("publish", json!({ "channel": "news", "data": {"x": 1} })))
        .await;
    assert!(resp.error.is_none());

    let frames = wait_frames(&session, 2).await;
    assert_eq!(frames[1]["type"], "message");
    assert_eq!(frames[1]["params"]["channel"], "news");
    assert_eq!(frames[1]["params"]["data"]["x"], 1);
}

// ============================================================================
// Expiry & refresh
// ============================================================================

#[tokio::test]
async fn expired_credentials_are_rejected_at_connect() {
    let node = start_node(|_| {}).await;
    let session = MockSession::new();
    let client = Client::new(node, session.clone());

    let past = (centrifugo_core::timestamp_secs() - 10).to_string();
    let sign = auth::connect_token(SECRET, "42", &past, "");
    let frame = json!({
        "method": "connect",
        "params": { "user": "42", "exp": past, "info": "", "sign": sign }
    })
    .to_string();
    client.handle(&frame).await.unwrap();
    let frames = wait_frames(&session, 1).await;
    assert_eq!(frames[0]["error"], "connection expired");
    assert_eq!(frames[0]["body"]["expired"], true);
    assert!(!client.is_authenticated());
}

#[tokio::test]
async fn connection_expires_then_grace_close() {
    let node = start_node(|cfg| cfg.expired_connection_close_delay = 1).await;
    let session = MockSession::new();
    let client = Client::new(node, session.clone());

    let exp = (centrifugo_core::timestamp_secs() + 1).to_string();
    let sign = auth::connect_token(SECRET, "42", &exp, "");
    let frame = json!({
        "method": "connect",
        "params": { "user": "42", "exp": exp, "info": "", "sign": sign }
    })
    .to_string();
    client.handle(&frame).await.unwrap();
    let frames = wait_frames(&session, 1).await;
    assert_eq!(frames[0]["body"]["expires"], true);
    assert!(frames[0]["body"]["ttl"].is_u64());

    // No refresh within exp + grace: closed as expired.
    tokio::time::timeout(Duration::from_secs(4), async {
        loop {
            if session.close_code() == Some(3004) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("connection closed as expired");
}

#[tokio::test]
async fn refresh_extends_expiry() {
    let node = start_node(|_| {}).await;
    let session = MockSession::new();
    let client = Client::new(node, session.clone());

    let exp = (centrifugo_core::timestamp_secs() + 5).to_string();
    let sign = auth::connect_token(SECRET, "42", &exp, "");
    client
        .handle(
            &json!({
                "method": "connect",
                "params": { "user": "42", "exp": exp, "info": "", "sign": sign }
            })
            .to_string(),
        )
        .await
        .unwrap();
    wait_frames(&session, 1).await;

    let new_exp = (centrifugo_core::timestamp_secs() + 3600).to_string();
    let sign = auth::connect_token(SECRET, "42", &new_exp, "");
    client
        .handle(
            &json!({
                "method": "refresh",
                "params": { "user": "42", "exp": new_exp, "info": "", "sign": sign }
            })
            .to_string(),
        )
        .await
        .unwrap();
    let frames = wait_frames(&session, 2).await;
    assert_eq!(frames[1]["body"]["expired"], false);
    let ttl = frames[1]["body"]["ttl"].as_u64().unwrap();
    assert!(ttl > 3500 && ttl <= 3600);
}

// ============================================================================
// Insecure mode
// ============================================================================

#[tokio::test]
async fn insecure_mode_skips_auth_and_allows_publish() {
    let node = start_node(|cfg| cfg.insecure = true).await;
    let session = MockSession::new();
    let client = Client::new(node, session.clone());

    client
        .handle(r#"{"method":"connect","params":{"user":"42"}}"#)
        .await
        .unwrap();
    client
        .handle(r#"{"method":"subscribe","params":{"channel":"news"}}"#)
        .await
        .unwrap();
    client
        .handle(r#"{"method":"publish","params":{"channel":"news","data":{"x":1}}}"#)
        .await
        .unwrap();
    let frames = wait_frames(&session, 3).await;
    assert_eq!(frames[0]["error"], Value::Null);
    assert_eq!(frames[1]["body"]["status"], true);
    assert_eq!(frames[2]["body"]["status"], true);
}
