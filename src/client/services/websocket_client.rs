use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsFrame;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::client::services::stomp::{self, Frame};
use crate::common::models::{Message, OutgoingChat};
use crate::utils::ids::new_subscription_id;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// What the real-time channel hands to the application.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    /// A chat message pushed on `/user/queue/messages`, including echoes of our own sends.
    Message(Message),
    Error(String),
    Disconnected,
}

#[derive(Debug, Clone)]
pub enum WebSocketError {
    ConnectionFailed(String),
    AuthenticationFailed(String),
    MessageSendFailed(String),
    Disconnected,
    InvalidMessage(String),
    Timeout,
}

impl std::fmt::Display for WebSocketError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WebSocketError::ConnectionFailed(msg) => write!(f, "Connection failed: {}", msg),
            WebSocketError::AuthenticationFailed(msg) => write!(f, "Authentication failed: {}", msg),
            WebSocketError::MessageSendFailed(msg) => write!(f, "Message send failed: {}", msg),
            WebSocketError::Disconnected => write!(f, "WebSocket disconnected"),
            WebSocketError::InvalidMessage(msg) => write!(f, "Invalid message: {}", msg),
            WebSocketError::Timeout => write!(f, "Operation timed out"),
        }
    }
}

impl std::error::Error for WebSocketError {}

pub struct WebSocketClient {
    url: Url,
    bearer_token: Option<String>,
    connection_retry_attempts: u32,
    max_retry_attempts: u32,
    retry_delay: tokio::time::Duration,
    event_sender: mpsc::UnboundedSender<ChatEvent>,
    event_receiver: Option<mpsc::UnboundedReceiver<ChatEvent>>,
    /// Frames queued for the writer task; `None` until connected
    outgoing_sender: Option<mpsc::UnboundedSender<Frame>>,
    connected: Arc<AtomicBool>,
}

impl WebSocketClient {
    pub fn new(url: Url, max_retry_attempts: u32) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            url,
            bearer_token: None,
            connection_retry_attempts: 0,
            max_retry_attempts: max_retry_attempts.max(1),
            retry_delay: tokio::time::Duration::from_secs(2),
            event_sender: tx,
            event_receiver: Some(rx),
            outgoing_sender: None,
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Hands the event stream to the application. Only the first call gets it.
    pub fn take_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<ChatEvent>> {
        self.event_receiver.take()
    }

    pub fn set_bearer_token(&mut self, token: String) {
        self.bearer_token = Some(token);
    }

    pub fn set_retry_delay(&mut self, delay: tokio::time::Duration) {
        self.retry_delay = delay;
    }

    pub fn get_retry_attempts(&self) -> u32 {
        self.connection_retry_attempts
    }

    /// Connect, authenticate and subscribe to the user queue.
    ///
    /// Only the initial handshake is retried (exponential backoff, capped at 30s).
    /// Once established, a dropped connection is reported as
    /// [`ChatEvent::Disconnected`] and nothing is resent.
    pub async fn connect_with_auth(&mut self) -> Result<(), WebSocketError> {
        for attempt in 1..=self.max_retry_attempts {
            match self.try_connect().await {
                Ok(outgoing_sender) => {
                    self.connection_retry_attempts = 0;
                    self.outgoing_sender = Some(outgoing_sender);
                    info!("[WS:CLIENT] Connected and subscribed to {}", stomp::USER_QUEUE);
                    return Ok(());
                }
                // a rejected token will not get better by retrying
                Err(e @ WebSocketError::AuthenticationFailed(_)) => {
                    error!("[WS:CLIENT] {}", e);
                    return Err(e);
                }
                Err(e) => {
                    self.connection_retry_attempts = attempt;
                    warn!("[WS:CLIENT] Connection attempt {} failed: {}", attempt, e);

                    if attempt < self.max_retry_attempts {
                        info!("[WS:CLIENT] Retrying in {:?}...", self.retry_delay);
                        tokio::time::sleep(self.retry_delay).await;
                        self.retry_delay = std::cmp::min(
                            self.retry_delay * 2,
                            tokio::time::Duration::from_secs(30),
                        );
                    } else {
                        return Err(e);
                    }
                }
            }
        }

        Err(WebSocketError::ConnectionFailed("Max retry attempts exceeded".to_string()))
    }

    async fn try_connect(&self) -> Result<mpsc::UnboundedSender<Frame>, WebSocketError> {
        let token = self
            .bearer_token
            .clone()
            .ok_or_else(|| WebSocketError::AuthenticationFailed("No bearer token provided".to_string()))?;

        debug!("[WS:CLIENT] Connecting to {}", self.url);
        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| WebSocketError::ConnectionFailed(format!("Failed to connect: {}", e)))?;

        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let host = self.url.host_str().unwrap_or("localhost");
        ws_sender
            .send(WsFrame::Text(Frame::connect(host, &token).encode()))
            .await
            .map_err(|e| WebSocketError::ConnectionFailed(format!("Failed to send CONNECT: {}", e)))?;

        let connected = tokio::time::timeout(
            tokio::time::Duration::from_secs(10),
            Self::await_connected(&mut ws_receiver),
        )
        .await
        .map_err(|_| WebSocketError::Timeout)??;
        debug!("[WS:CLIENT] Broker accepted session (version {:?})", connected.get("version"));

        let subscribe = Frame::subscribe(&new_subscription_id(), stomp::USER_QUEUE);
        ws_sender
            .send(WsFrame::Text(subscribe.encode()))
            .await
            .map_err(|e| WebSocketError::ConnectionFailed(format!("Failed to subscribe: {}", e)))?;

        self.connected.store(true, Ordering::SeqCst);

        let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<Frame>();

        let events = self.event_sender.clone();
        let connected_flag = self.connected.clone();
        tokio::spawn(async move {
            Self::handle_incoming_frames(ws_receiver, events, connected_flag).await;
        });

        let connected_flag = self.connected.clone();
        tokio::spawn(async move {
            while let Some(frame) = outgoing_rx.recv().await {
                let is_disconnect = frame.command == "DISCONNECT";
                if let Err(e) = ws_sender.send(WsFrame::Text(frame.encode())).await {
                    warn!("[WS:CLIENT] Failed to write {} frame: {}", frame.command, e);
                    connected_flag.store(false, Ordering::SeqCst);
                    break;
                }
                if is_disconnect {
                    let _ = ws_sender.close().await;
                    break;
                }
            }
            debug!("[WS:CLIENT] Outgoing frame handler ended");
        });

        Ok(outgoing_tx)
    }

    async fn await_connected(ws_receiver: &mut SplitStream<WsStream>) -> Result<Frame, WebSocketError> {
        while let Some(incoming) = ws_receiver.next().await {
            let text = match incoming {
                Ok(WsFrame::Text(text)) => text,
                Ok(WsFrame::Binary(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
                Ok(WsFrame::Close(_)) => return Err(WebSocketError::Disconnected),
                Ok(_) => continue,
                Err(e) => return Err(WebSocketError::ConnectionFailed(format!("WebSocket error during CONNECT: {}", e))),
            };
            let frames = stomp::parse_frames(&text).map_err(|e| WebSocketError::InvalidMessage(e.to_string()))?;
            for frame in frames {
                match frame.command.as_str() {
                    "CONNECTED" => return Ok(frame),
                    "ERROR" => {
                        let reason = frame.get("message").unwrap_or("broker refused the session").to_string();
                        return Err(WebSocketError::AuthenticationFailed(reason));
                    }
                    other => debug!("[WS:CLIENT] Ignoring {} before CONNECTED", other),
                }
            }
        }
        Err(WebSocketError::Disconnected)
    }

    async fn handle_incoming_frames(
        mut ws_receiver: SplitStream<WsStream>,
        events: mpsc::UnboundedSender<ChatEvent>,
        connected: Arc<AtomicBool>,
    ) {
        while let Some(incoming) = ws_receiver.next().await {
            let text = match incoming {
                Ok(WsFrame::Text(text)) => text,
                Ok(WsFrame::Binary(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
                Ok(WsFrame::Close(_)) => {
                    info!("[WS:CLIENT] Connection closed by server");
                    break;
                }
                Ok(_) => continue,
                Err(e) => {
                    warn!("[WS:CLIENT] WebSocket error: {}", e);
                    break;
                }
            };

            let frames = match stomp::parse_frames(&text) {
                Ok(frames) => frames,
                Err(e) => {
                    warn!("[WS:CLIENT] {}", e);
                    let _ = events.send(ChatEvent::Error(e.to_string()));
                    continue;
                }
            };
            for frame in frames {
                if let Some(event) = Self::frame_to_event(frame) {
                    if events.send(event).is_err() {
                        debug!("[WS:CLIENT] Application dropped the event receiver");
                        connected.store(false, Ordering::SeqCst);
                        return;
                    }
                }
            }
        }
        connected.store(false, Ordering::SeqCst);
        warn!("[WS:CLIENT] Disconnected; messages must be resent manually");
        let _ = events.send(ChatEvent::Disconnected);
    }

    fn frame_to_event(frame: Frame) -> Option<ChatEvent> {
        match frame.command.as_str() {
            "MESSAGE" => match serde_json::from_str::<Message>(&frame.body) {
                Ok(message) => Some(ChatEvent::Message(message)),
                Err(e) => {
                    warn!("[WS:CLIENT] Unreadable chat payload: {}", e);
                    Some(ChatEvent::Error(WebSocketError::InvalidMessage(e.to_string()).to_string()))
                }
            },
            "ERROR" => {
                let reason = frame.get("message").map(str::to_string).unwrap_or(frame.body);
                error!("[WS:CLIENT] Broker error: {}", reason);
                Some(ChatEvent::Error(reason))
            }
            _ => None,
        }
    }

    /// Publish a chat message on `/app/chat`.
    pub fn send_chat(&self, chat: &OutgoingChat) -> Result<(), WebSocketError> {
        if !self.is_connected() {
            return Err(WebSocketError::MessageSendFailed("WebSocket not connected".to_string()));
        }
        let sender = self
            .outgoing_sender
            .as_ref()
            .ok_or_else(|| WebSocketError::MessageSendFailed("WebSocket not connected".to_string()))?;
        let json = serde_json::to_string(chat)
            .map_err(|e| WebSocketError::MessageSendFailed(format!("Failed to serialize message: {}", e)))?;
        sender
            .send(Frame::send_json(stomp::CHAT_DESTINATION, json))
            .map_err(|_| WebSocketError::MessageSendFailed("Writer task is gone".to_string()))?;
        debug!("[WS:CLIENT] Queued chat message {}", chat.temp_id);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.outgoing_sender.is_some() && self.connected.load(Ordering::SeqCst)
    }

    pub fn disconnect(&mut self) {
        if let Some(sender) = self.outgoing_sender.take() {
            let _ = sender.send(Frame::disconnect());
        }
        self.connected.store(false, Ordering::SeqCst);
        info!("[WS:CLIENT] Disconnected by client");
    }
}
