// Fake backend and fake STOMP broker shared by the integration tests
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use artisan_market::client::services::stomp::{self, parse_frames, Frame};
use axum::extract::{Multipart, Path, Query, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsFrame;

pub const TOKEN: &str = "tok-123";
pub const PASSWORD: &str = "secret";
pub const ME: i64 = 10;

pub fn setup_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn message_json(id: i64, from: i64, to: i64, content: &str) -> Value {
    json!({
        "id": id,
        "senderId": from,
        "receiverId": to,
        "content": content,
        "timestamp": "2024-05-01T10:00:00Z",
        "isRead": false,
        "messageStatus": "DELIVERED"
    })
}

#[derive(Default)]
pub struct Backend {
    pub unread: Mutex<Vec<Value>>,
    pub history: Mutex<Vec<Value>>,
    /// "METHOD path" of the calls worth asserting on
    pub requests: Mutex<Vec<String>>,
    /// Multipart fields of the last POST /api/messages (files as their text content)
    pub last_upload: Mutex<HashMap<String, String>>,
}

impl Backend {
    pub fn recorded(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    fn record(&self, entry: String) {
        self.requests.lock().unwrap().push(entry);
    }
}

fn authorized(headers: &HeaderMap) -> bool {
    headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) == Some(&format!("Bearer {}", TOKEN)[..])
}

fn user_json() -> Value {
    json!({"id": ME, "email": "claire@example.com", "firstName": "Claire", "lastName": "Martin", "role": "CLIENT"})
}

async fn login(Json(body): Json<Value>) -> Response {
    if body["password"] == PASSWORD {
        Json(json!({"token": TOKEN, "user": user_json()})).into_response()
    } else {
        StatusCode::UNAUTHORIZED.into_response()
    }
}

async fn me(headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(user_json()).into_response()
}

async fn logout(State(b): State<Arc<Backend>>) -> StatusCode {
    b.record("POST /api/users/logout".to_string());
    StatusCode::OK
}

async fn unread(State(b): State<Arc<Backend>>, headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(Value::Array(b.unread.lock().unwrap().clone())).into_response()
}

async fn conversation(State(b): State<Arc<Backend>>, headers: HeaderMap, Path(other): Path<i64>) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    b.record(format!("GET /api/messages/conversations/{}", other));
    Json(Value::Array(b.history.lock().unwrap().clone())).into_response()
}

async fn mark_read(State(b): State<Arc<Backend>>, headers: HeaderMap, Path(id): Path<i64>) -> StatusCode {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED;
    }
    b.record(format!("PUT /api/messages/{}/read", id));
    StatusCode::OK
}

async fn history(headers: HeaderMap, Query(params): Query<HashMap<String, String>>) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let page: u32 = params.get("page").and_then(|p| p.parse().ok()).unwrap_or(0);
    let size: u32 = params.get("size").and_then(|p| p.parse().ok()).unwrap_or(20);
    Json(json!({
        "content": [{"otherUserId": 2, "otherUserName": "Hugo Bernard", "lastMessage": "À demain",
                     "lastMessageTime": "2024-05-01T18:00:00"}],
        "totalPages": 3,
        "totalElements": 21,
        "number": page,
        "size": size
    }))
    .into_response()
}

async fn post_message(State(b): State<Arc<Backend>>, headers: HeaderMap, mut multipart: Multipart) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let mut fields = HashMap::new();
    let mut file_name = None;
    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            file_name = field.file_name().map(str::to_string);
        }
        let data = field.bytes().await.unwrap_or_default();
        fields.insert(name, String::from_utf8_lossy(&data).into_owned());
    }
    let receiver: i64 = fields.get("receiverId").and_then(|v| v.parse().ok()).unwrap_or(0);
    let content = fields.get("content").cloned().unwrap_or_default();
    let attachments: Vec<Value> = file_name
        .iter()
        .map(|n| json!({"fileUrl": format!("/uploads/{}", n)}))
        .collect();
    *b.last_upload.lock().unwrap() = fields;

    let mut message = message_json(500, ME, receiver, &content);
    message["attachments"] = Value::Array(attachments);
    message["messageStatus"] = json!("SENT");
    Json(message).into_response()
}

async fn artisans() -> Json<Value> {
    Json(json!([
        {"id": 1, "firstName": "Jeanne", "lastName": "Potier", "email": "jeanne@example.com",
         "city": "Lyon", "categoryId": 3},
        {"id": 2, "firstName": "Marc", "lastName": "Ebeniste", "email": "marc@example.com", "enabled": false}
    ]))
}

async fn delete_artisan() -> StatusCode {
    StatusCode::FORBIDDEN
}

async fn missing_category() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"status": 404, "error": "Not Found", "message": "Category not found"})),
    )
        .into_response()
}

async fn geocode(Query(params): Query<HashMap<String, String>>) -> Json<Value> {
    Json(json!({"lat": 45.764, "lng": 4.8357, "displayName": params.get("address").cloned().unwrap_or_default()}))
}

/// Start the fake REST backend; returns its base URL.
pub async fn spawn_backend() -> Result<(String, Arc<Backend>)> {
    let backend = Arc::new(Backend::default());
    let app = Router::new()
        .route("/api/users/login", post(login))
        .route("/api/users/me", get(me))
        .route("/api/users/logout", post(logout))
        .route("/api/messages", post(post_message))
        .route("/api/messages/unread", get(unread))
        .route("/api/messages/history", get(history))
        .route("/api/messages/conversations/:other", get(conversation))
        .route("/api/messages/:id/read", put(mark_read))
        .route("/api/artisans", get(artisans))
        .route("/api/artisans/:id", delete(delete_artisan))
        .route("/api/categories/:id", get(missing_category))
        .route("/api/geocode", get(geocode))
        .with_state(backend.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((format!("http://{}", addr), backend))
}

pub enum BrokerCommand {
    Push(String),
    Close,
}

/// One-connection STOMP broker. Every frame the client sends is forwarded to `frames`.
pub struct FakeBroker {
    pub url: String,
    pub frames: mpsc::UnboundedReceiver<Frame>,
    pub commands: mpsc::UnboundedSender<BrokerCommand>,
}

impl FakeBroker {
    pub async fn next_frame(&mut self) -> Result<Frame> {
        tokio::time::timeout(Duration::from_secs(5), self.frames.recv())
            .await?
            .ok_or_else(|| anyhow::anyhow!("broker connection ended"))
    }

    pub fn push_message(&self, body: Value) {
        let frame = Frame::new("MESSAGE")
            .header("destination", stomp::USER_QUEUE)
            .header("subscription", "sub-0")
            .header("message-id", "m-1")
            .header("content-type", "application/json")
            .body(body.to_string());
        let _ = self.commands.send(BrokerCommand::Push(frame.encode()));
    }

    pub fn close(&self) {
        let _ = self.commands.send(BrokerCommand::Close);
    }
}

pub async fn spawn_broker(accepted_token: &str) -> Result<FakeBroker> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (frames_tx, frames_rx) = mpsc::unbounded_channel();
    let (commands_tx, mut commands_rx) = mpsc::unbounded_channel::<BrokerCommand>();
    let expected = format!("Bearer {}", accepted_token);

    tokio::spawn(async move {
        let Ok((stream, _)) = listener.accept().await else { return };
        let Ok(ws) = tokio_tungstenite::accept_async(stream).await else { return };
        let (mut sink, mut source) = ws.split();
        loop {
            tokio::select! {
                incoming = source.next() => {
                    let text = match incoming {
                        Some(Ok(WsFrame::Text(text))) => text,
                        Some(Ok(_)) => continue,
                        _ => break,
                    };
                    for frame in parse_frames(&text).unwrap_or_default() {
                        if frame.command == "CONNECT" {
                            let reply = if frame.get("Authorization") == Some(expected.as_str()) {
                                Frame::new("CONNECTED").header("version", "1.2")
                            } else {
                                Frame::new("ERROR").header("message", "Invalid token")
                            };
                            let _ = sink.send(WsFrame::Text(reply.encode())).await;
                        }
                        let _ = frames_tx.send(frame);
                    }
                }
                command = commands_rx.recv() => match command {
                    Some(BrokerCommand::Push(text)) => {
                        let _ = sink.send(WsFrame::Text(text)).await;
                    }
                    Some(BrokerCommand::Close) | None => {
                        let _ = sink.close().await;
                        break;
                    }
                }
            }
        }
    });

    Ok(FakeBroker { url: format!("ws://{}/ws/websocket", addr), frames: frames_rx, commands: commands_tx })
}
