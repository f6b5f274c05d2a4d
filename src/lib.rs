//! Client library for the artisan marketplace backend: REST calls, the
//! STOMP real-time channel, conversation state and the unread badge.

pub mod client;
pub mod common;
pub mod utils;

pub use client::config::ClientConfig;
pub use client::models::{Conversation, Merge, UnreadTracker};
pub use client::services::{ApiClient, ChatEvent, ChatService};
pub use common::error::{ClientError, Result};
pub use common::models::{Message, MessageStatus, UserId, UserProfile};
