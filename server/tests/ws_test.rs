//! Integration tests for WebSocket auth, presence, relay and the admin HTTP routes.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use campus_relay::auth::jwt::issue_access_token;
use campus_relay::config::{Config, HubConfig, StorageBackend};

const SECRET: &str = "integration-secret";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestClient {
    write: SplitSink<WsStream, Message>,
    read: SplitStream<WsStream>,
}

impl TestClient {
    async fn send(&mut self, event: &str, data: Value, request_id: Option<&str>) {
        let mut frame = json!({ "event": event, "data": data });
        if let Some(id) = request_id {
            frame["requestId"] = json!(id);
        }
        self.write
            .send(Message::Text(frame.to_string().into()))
            .await
            .expect("send frame");
    }

    /// Read frames until one named `event` arrives.
    async fn expect_event(&mut self, event: &str) -> Value {
        let deadline = Duration::from_secs(5);
        tokio::time::timeout(deadline, async {
            loop {
                match self.read.next().await {
                    Some(Ok(Message::Text(text))) => {
                        let value: Value = serde_json::from_str(text.as_str()).unwrap();
                        if value["event"] == event {
                            return value;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        panic!("closed while waiting for {event}: {frame:?}")
                    }
                    Some(Ok(_)) => continue,
                    other => panic!("stream ended while waiting for {event}: {other:?}"),
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {event}"))
    }

    /// Assert no frame named `event` arrives within a short window.
    async fn expect_no_event(&mut self, event: &str) {
        let window = Duration::from_millis(300);
        let _ = tokio::time::timeout(window, async {
            while let Some(Ok(msg)) = self.read.next().await {
                if let Message::Text(text) = msg {
                    let value: Value = serde_json::from_str(text.as_str()).unwrap();
                    assert_ne!(value["event"], event, "unexpected frame {value}");
                }
            }
        })
        .await;
    }

    async fn expect_close(&mut self) -> u16 {
        let deadline = Duration::from_secs(5);
        tokio::time::timeout(deadline, async {
            loop {
                match self.read.next().await {
                    Some(Ok(Message::Close(Some(frame)))) => return u16::from(frame.code),
                    Some(Ok(_)) => continue,
                    other => panic!("expected close frame, got {other:?}"),
                }
            }
        })
        .await
        .expect("timed out waiting for close frame")
    }

    /// Join and wait until our own id shows up in a presence broadcast.
    async fn join(&mut self, user_id: &str) {
        self.send("join", json!({ "userId": user_id }), None).await;
        loop {
            let frame = self.expect_event("onlineUsers").await;
            if online(&frame).contains(&user_id.to_string()) {
                break;
            }
        }
    }
}

fn online(frame: &Value) -> Vec<String> {
    frame["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect()
}

fn token(user_id: &str, role: &str) -> String {
    issue_access_token(SECRET.as_bytes(), user_id, role, 900).unwrap()
}

/// Helper: start the server on a random port and return its address.
async fn start_test_server(require_token: bool) -> SocketAddr {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = Config {
        data_dir: tmp_dir.path().to_str().unwrap().to_string(),
        storage_backend: StorageBackend::Memory,
        jwt_secret: Some(SECRET.to_string()),
        hub: HubConfig {
            require_token,
            ..HubConfig::default()
        },
        ..Config::default()
    };

    let state = campus_relay::build_state(&config).expect("Failed to build state");
    state.hub.start();
    let app = campus_relay::routes::build_router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
        let _keep = tmp_dir;
    });

    addr
}

async fn connect(addr: SocketAddr, token: Option<&str>) -> TestClient {
    let url = match token {
        Some(t) => format!("ws://{}/ws?token={}", addr, t),
        None => format!("ws://{}/ws", addr),
    };
    let (stream, _) = tokio_tungstenite::connect_async(url)
        .await
        .expect("WebSocket connect");
    let (write, read) = stream.split();
    TestClient { write, read }
}

#[tokio::test]
async fn test_health_reports_online_count() {
    let addr = start_test_server(true).await;
    let mut teacher = connect(addr, Some(&token("teacher1", "teacher"))).await;
    teacher.join("teacher1").await;

    let body: Value = reqwest::get(format!("http://{}/health", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, json!({"status": "ok", "online": 1}));
}

#[tokio::test]
async fn test_ws_rejects_bad_tokens() {
    let addr = start_test_server(true).await;

    let mut missing = connect(addr, None).await;
    assert_eq!(missing.expect_close().await, 4002);

    let mut invalid = connect(addr, Some("not-a-jwt")).await;
    assert_eq!(invalid.expect_close().await, 4002);

    let expired = issue_access_token(SECRET.as_bytes(), "u1", "student", -300).unwrap();
    let mut expired = connect(addr, Some(&expired)).await;
    assert_eq!(expired.expect_close().await, 4001);
}

#[tokio::test]
async fn test_student_message_reaches_teacher() {
    let addr = start_test_server(true).await;
    let mut teacher = connect(addr, Some(&token("teacher1", "teacher"))).await;
    let mut student = connect(addr, Some(&token("student1", "student"))).await;

    teacher.join("teacher1").await;
    student.join("student1").await;

    let both = teacher.expect_event("onlineUsers").await;
    let mut users = online(&both);
    users.sort();
    assert_eq!(users, vec!["student1".to_string(), "teacher1".to_string()]);

    student
        .send(
            "send_message",
            json!({"senderId": "student1", "receiverId": "teacher1", "message": "hi", "chatId": "chat1"}),
            Some("r1"),
        )
        .await;

    let received = teacher.expect_event("receive_message").await;
    assert_eq!(received["data"]["senderId"], "student1");
    assert_eq!(received["data"]["message"], "hi");
    assert_eq!(received["data"]["chatId"], "chat1");
    assert_eq!(received["data"]["read"], false);
    assert!(received["data"]["messageId"].is_string());

    let ack = student.expect_event("ack").await;
    assert_eq!(
        ack["data"],
        json!({"requestId": "r1", "event": "send_message", "delivered": true})
    );

    // Reading it notifies the student
    let message_id = received["data"]["messageId"].clone();
    teacher
        .send(
            "read_message",
            json!({"chatId": "chat1", "messageId": message_id, "senderId": "student1", "receiverId": "teacher1"}),
            None,
        )
        .await;
    let read = student.expect_event("message_read").await;
    assert_eq!(read["data"], json!({"messageId": message_id, "chatId": "chat1"}));
}

#[tokio::test]
async fn test_burst_of_messages_arrives_in_order() {
    let addr = start_test_server(true).await;
    let mut teacher = connect(addr, Some(&token("teacher1", "teacher"))).await;
    let mut student = connect(addr, Some(&token("student1", "student"))).await;
    teacher.join("teacher1").await;
    student.join("student1").await;

    let sent: Vec<String> = (0..10).map(|i| format!("message {i}")).collect();
    for text in &sent {
        let data = json!({
            "senderId": "student1",
            "receiverId": "teacher1",
            "message": text,
            "chatId": "chat1",
        });
        student.send("send_message", data, None).await;
    }

    let mut received = Vec::new();
    for _ in 0..sent.len() {
        let frame = teacher.expect_event("receive_message").await;
        received.push(frame["data"]["message"].as_str().unwrap().to_string());
    }
    assert_eq!(received, sent);
}

#[tokio::test]
async fn test_read_of_unknown_message_is_not_relayed() {
    let addr = start_test_server(true).await;
    let mut teacher = connect(addr, Some(&token("teacher1", "teacher"))).await;
    let mut student = connect(addr, Some(&token("student1", "student"))).await;
    teacher.join("teacher1").await;
    student.join("student1").await;

    teacher
        .send(
            "read_message",
            json!({"chatId": "chat1", "messageId": "missing", "senderId": "student1", "receiverId": "teacher1"}),
            Some("r2"),
        )
        .await;

    let error = teacher.expect_event("error").await;
    assert_eq!(error["data"]["code"], 404);
    student.expect_no_event("message_read").await;
}

#[tokio::test]
async fn test_join_as_other_user_closes_connection() {
    let addr = start_test_server(true).await;
    let mut student = connect(addr, Some(&token("student1", "student"))).await;

    student.send("join", json!({"userId": "teacher1"}), None).await;
    assert_eq!(student.expect_close().await, 4003);

    let body: Value = reqwest::get(format!("http://{}/health", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["online"], 0);
}

#[tokio::test]
async fn test_anonymous_join_when_tokens_optional() {
    let addr = start_test_server(false).await;
    let mut a = connect(addr, None).await;
    let mut b = connect(addr, None).await;

    a.join("teacher1").await;
    b.join("student1").await;

    b.send("typing", json!({"senderId": "student1", "receiverId": "teacher1"}), None)
        .await;
    let typing = a.expect_event("typing").await;
    assert_eq!(typing["data"], json!({"senderId": "student1"}));
}

#[tokio::test]
async fn test_disconnect_removes_user_from_presence() {
    let addr = start_test_server(true).await;
    let mut teacher = connect(addr, Some(&token("teacher1", "teacher"))).await;
    let mut student = connect(addr, Some(&token("student1", "student"))).await;
    teacher.join("teacher1").await;
    student.join("student1").await;

    student.write.close().await.unwrap();
    drop(student);

    loop {
        let frame = teacher.expect_event("onlineUsers").await;
        if online(&frame) == vec!["teacher1".to_string()] {
            break;
        }
    }

    let users: Vec<String> = reqwest::Client::new()
        .get(format!("http://{}/api/presence", addr))
        .bearer_auth(token("teacher1", "teacher"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(users, vec!["teacher1".to_string()]);
}

#[tokio::test]
async fn test_presence_route_requires_token() {
    let addr = start_test_server(true).await;
    let resp = reqwest::get(format!("http://{}/api/presence", addr))
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn test_admin_routes_push_to_online_user() {
    let addr = start_test_server(true).await;
    let client = reqwest::Client::new();
    let mut student = connect(addr, Some(&token("student1", "student"))).await;
    student.join("student1").await;

    // Non-admins are refused
    let resp = client
        .post(format!("http://{}/api/moderation/block", addr))
        .bearer_auth(token("teacher1", "teacher"))
        .json(&json!({"userId": "student1"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    let admin = token("admin1", "admin");

    let body: Value = client
        .post(format!("http://{}/api/moderation/block", addr))
        .bearer_auth(&admin)
        .json(&json!({"userId": "student1", "reason": "spam"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, json!({"delivered": true}));
    let blocked = student.expect_event("accountBlocked").await;
    assert_eq!(blocked["data"]["reason"], "spam");
    assert!(blocked["data"]["blockedAt"].is_string());

    let resp = client
        .post(format!("http://{}/api/notifications", addr))
        .bearer_auth(&admin)
        .json(&json!({"receiverId": "student1", "title": "Exam", "message": "Room 4"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let notification = student.expect_event("receive_notification").await;
    assert_eq!(notification["data"]["title"], "Exam");
    assert_eq!(notification["data"]["type"], "general");
    assert_eq!(notification["data"]["read"], false);
    assert!(notification["data"]["id"].is_string());

    let body: Value = client
        .post(format!("http://{}/api/users/ghost/events", addr))
        .bearer_auth(&admin)
        .json(&json!({"event": "courseUpdated", "payload": {"courseId": "c1"}}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, json!({"delivered": false}));
}
