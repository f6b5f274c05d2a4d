pub mod api_client;
pub mod chat_service;
pub mod stomp;
pub mod unread_poller;
pub mod websocket_client;

pub use api_client::ApiClient;
pub use chat_service::ChatService;
pub use websocket_client::{ChatEvent, WebSocketClient, WebSocketError};
