use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::sync::{mpsc, Mutex};

use crate::client::config::ClientConfig;
use crate::client::models::{Conversation, Merge, UnreadTracker};
use crate::client::services::api_client::ApiClient;
use crate::client::services::unread_poller::UnreadPoller;
use crate::client::services::websocket_client::{ChatEvent, WebSocketClient};
use crate::client::utils::session_store;
use crate::common::error::{ClientError, Result};
use crate::common::models::{ConversationSummary, Message, OutgoingChat, Page, UserId, UserProfile};

/// Everything the messaging screens need, wired together explicitly.
///
/// Owns the open conversation and drives the REST client, the STOMP channel
/// and the unread badge. The badge is shared with the background poller.
pub struct ChatService {
    config: ClientConfig,
    api: Arc<ApiClient>,
    websocket: Option<WebSocketClient>,
    events: Option<mpsc::UnboundedReceiver<ChatEvent>>,
    current_user: Option<UserProfile>,
    conversation: Option<Conversation>,
    unread: Arc<Mutex<UnreadTracker>>,
    poller: Option<UnreadPoller>,
}

impl ChatService {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let api = Arc::new(ApiClient::new(&config)?);
        Ok(Self {
            config,
            api,
            websocket: None,
            events: None,
            current_user: None,
            conversation: None,
            unread: Arc::new(Mutex::new(UnreadTracker::new())),
            poller: None,
        })
    }

    pub fn api(&self) -> &Arc<ApiClient> {
        &self.api
    }

    pub fn unread_tracker(&self) -> Arc<Mutex<UnreadTracker>> {
        self.unread.clone()
    }

    pub fn current_user(&self) -> Option<&UserProfile> {
        self.current_user.as_ref()
    }

    fn require_user(&self) -> Result<&UserProfile> {
        self.current_user.as_ref().ok_or(ClientError::NotLoggedIn)
    }

    // --- session

    pub async fn login(&mut self, email: &str, password: &str) -> Result<UserProfile> {
        let login = self.api.login(email, password).await?;
        if self.config.persist_session {
            // losing persistence only means logging in again next time
            if let Err(e) = session_store::save_session_token(&login.token) {
                warn!("[CHAT_SERVICE] Session not persisted: {}", e);
            }
        }
        info!("[CHAT_SERVICE] Logged in as {}", login.user.display_name());
        self.current_user = Some(login.user.clone());
        Ok(login.user)
    }

    /// Reuse a token saved by a previous run. `Ok(None)` means a fresh login is needed.
    pub async fn restore_session(&mut self) -> Result<Option<UserProfile>> {
        if !self.config.persist_session {
            return Ok(None);
        }
        let Some(token) = session_store::load_session_token() else {
            return Ok(None);
        };
        self.api.set_token(Some(token)).await;
        match self.api.me().await {
            Ok(user) => {
                info!("[CHAT_SERVICE] Session restored for {}", user.display_name());
                self.current_user = Some(user.clone());
                Ok(Some(user))
            }
            Err(e) if e.requires_login() => {
                info!("[CHAT_SERVICE] Stored session expired");
                self.api.set_token(None).await;
                forget_stored_session();
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn logout(&mut self) -> Result<()> {
        self.reset().await;
        let result = self.api.logout().await;
        if self.config.persist_session {
            forget_stored_session();
        }
        result
    }

    /// Drop connections, background tasks and per-user state.
    pub async fn reset(&mut self) {
        if let Some(mut ws) = self.websocket.take() {
            ws.disconnect();
        }
        if let Some(poller) = self.poller.take() {
            poller.stop().await;
        }
        self.events = None;
        self.conversation = None;
        self.current_user = None;
        *self.unread.lock().await = UnreadTracker::new();
    }

    // --- real-time channel

    pub async fn connect_realtime(&mut self) -> Result<()> {
        self.require_user()?;
        let token = self.api.token().await.ok_or(ClientError::NotLoggedIn)?;

        let mut ws = WebSocketClient::new(self.config.ws_url.clone(), self.config.ws_max_retry_attempts);
        ws.set_bearer_token(token);
        let receiver = ws.take_receiver();
        ws.connect_with_auth().await?;

        self.events = receiver;
        self.websocket = Some(ws);
        info!("[CHAT_SERVICE] Real-time channel ready at {}", self.config.ws_url);
        Ok(())
    }

    pub fn is_realtime_connected(&self) -> bool {
        self.websocket.as_ref().map(|ws| ws.is_connected()).unwrap_or(false)
    }

    /// Give the event stream to a caller that wants to `select!` on it.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<ChatEvent>> {
        self.events.take()
    }

    /// Wait for the next event when the stream has not been taken.
    pub async fn next_event(&mut self) -> Option<ChatEvent> {
        match self.events.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    /// Apply a real-time event to the open conversation and to the badge.
    ///
    /// Returns how the message was merged when it belongs to the open conversation.
    pub async fn handle_event(&mut self, event: ChatEvent) -> Option<Merge> {
        match event {
            ChatEvent::Message(message) => self.handle_inbound(message).await,
            ChatEvent::Error(reason) => {
                error!("[CHAT_SERVICE] Real-time error: {}", reason);
                None
            }
            ChatEvent::Disconnected => {
                warn!("[CHAT_SERVICE] Real-time channel lost");
                None
            }
        }
    }

    async fn handle_inbound(&mut self, message: Message) -> Option<Merge> {
        let me = self.current_user.as_ref()?.id;
        self.unread.lock().await.on_inbound(me, &message);

        let conversation = self.conversation.as_mut()?;
        let incoming_id = message.id;
        let from_peer = message.sender_id == conversation.peer() && !message.is_read;
        let merge = conversation.apply_inbound(message);
        debug!("[CHAT_SERVICE] Inbound message {:?}: {:?}", incoming_id, merge);

        // seen as soon as it lands in the open conversation
        if merge == Merge::Appended && from_peer {
            if let Some(id) = incoming_id {
                conversation.mark_read(id);
                if let Err(e) = self.api.mark_read(id).await {
                    warn!("[CHAT_SERVICE] Could not mark message {} read: {}", id, e);
                }
            }
        }
        Some(merge)
    }

    // --- conversations

    pub async fn conversations(&self, page: u32, size: u32) -> Result<Page<ConversationSummary>> {
        self.require_user()?;
        self.api.conversations(page, size).await
    }

    /// Load the history with `peer`, mark it read and make it the active conversation.
    pub async fn open_conversation(&mut self, peer: UserId) -> Result<&Conversation> {
        let me = self.require_user()?.id;
        let history = self.api.conversation_messages(peer).await?;

        let mut conversation = Conversation::new(me, peer);
        conversation.load_history(history);
        let to_ack = conversation.mark_all_read();

        {
            let mut unread = self.unread.lock().await;
            unread.set_active(Some(peer));
            unread.mark_conversation_read(peer);
        }
        for id in to_ack {
            if let Err(e) = self.api.mark_read(id).await {
                warn!("[CHAT_SERVICE] Could not mark message {} read: {}", id, e);
            }
        }

        info!("[CHAT_SERVICE] Opened conversation with user {} ({} messages)", peer, conversation.len());
        Ok(self.conversation.insert(conversation))
    }

    pub async fn close_conversation(&mut self) {
        self.conversation = None;
        self.unread.lock().await.set_active(None);
    }

    pub fn conversation(&self) -> Option<&Conversation> {
        self.conversation.as_ref()
    }

    // --- sending

    /// Optimistic text send over the real-time channel. Returns the temp id.
    ///
    /// Without a live connection nothing is added to the conversation.
    pub fn send_text(&mut self, content: &str) -> Result<String> {
        let me = self.require_user()?.id;
        let conversation = self.conversation.as_mut().ok_or(ClientError::NoConversation)?;
        let ws = match self.websocket.as_ref() {
            Some(ws) if ws.is_connected() => ws,
            _ => {
                warn!("[CHAT_SERVICE] Text send refused: real-time channel down");
                return Err(ClientError::NotConnected);
            }
        };

        let optimistic = conversation.push_optimistic(content);
        let temp_id = optimistic.temp_id.clone().unwrap_or_default();
        let outgoing = OutgoingChat {
            sender_id: me,
            receiver_id: conversation.peer(),
            content: content.to_string(),
            temp_id: temp_id.clone(),
        };
        if let Err(e) = ws.send_chat(&outgoing) {
            conversation.discard_optimistic(&temp_id);
            return Err(e.into());
        }
        Ok(temp_id)
    }

    /// Send through REST with a file. Not optimistic: on failure nothing is shown.
    pub async fn send_with_attachment(&mut self, path: &Path, content: &str) -> Result<Message> {
        self.require_user()?;
        let peer = self.conversation.as_ref().ok_or(ClientError::NoConversation)?.peer();
        let message = self.api.send_message(peer, content, None, Some(path)).await?;
        if let Some(conversation) = self.conversation.as_mut() {
            conversation.apply_inbound(message.clone());
        }
        Ok(message)
    }

    // --- unread badge

    pub async fn refresh_unread(&self) -> Result<usize> {
        let me = self.require_user()?.id;
        let unread = self.api.unread().await?;
        let mut tracker = self.unread.lock().await;
        tracker.refresh(me, &unread);
        Ok(tracker.total())
    }

    pub async fn unread_total(&self) -> usize {
        self.unread.lock().await.total()
    }

    pub async fn unread_by_sender(&self) -> HashMap<UserId, usize> {
        self.unread.lock().await.per_sender().clone()
    }

    pub fn start_unread_polling(&mut self) -> Result<()> {
        let me = self.require_user()?.id;
        if self.poller.as_ref().map(|p| p.is_running()).unwrap_or(false) {
            return Ok(());
        }
        self.poller = Some(UnreadPoller::spawn(
            self.api.clone(),
            self.unread.clone(),
            me,
            self.config.unread_poll_interval,
        ));
        Ok(())
    }
}

fn forget_stored_session() {
    if let Err(e) = session_store::clear_session_token() {
        warn!("[CHAT_SERVICE] Failed to clear stored session: {}", e);
    }
}
