// Wire models shared by the REST client, the STOMP channel and the chat state
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use crate::common::error::ClientError;
use crate::utils::time;

pub type UserId = i64;
pub type MessageId = i64;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    Artisan,
    Client,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: UserId,
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl UserProfile {
    pub fn display_name(&self) -> String {
        let full = format!("{} {}", self.first_name, self.last_name);
        let full = full.trim();
        if full.is_empty() { self.email.clone() } else { full.to_string() }
    }

    /// Admins pass every role check.
    pub fn require_role(&self, role: Role) -> Result<(), ClientError> {
        if self.role == role || self.role == Role::Admin {
            Ok(())
        } else {
            Err(ClientError::Forbidden)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub user: UserProfile,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub file_url: String,
}

/// Delivery state of a chat message. `Sending` only exists client-side.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageStatus {
    Sending,
    #[default]
    Sent,
    Delivered,
    Read,
}

impl MessageStatus {
    pub fn from_wire(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "SENDING" => MessageStatus::Sending,
            "DELIVERED" => MessageStatus::Delivered,
            "READ" => MessageStatus::Read,
            _ => MessageStatus::Sent,
        }
    }
}

impl<'de> Deserialize<'de> for MessageStatus {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(d)?;
        Ok(raw.as_deref().map(MessageStatus::from_wire).unwrap_or_default())
    }
}

/// A chat message as exchanged with the backend.
///
/// Until the server has confirmed it, an optimistic message has no `id` and
/// is identified by its `temp_id` alone.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<String>,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(alias = "createdAt", with = "time::flexible", default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, alias = "read")]
    pub is_read: bool,
    #[serde(default)]
    pub message_status: MessageStatus,
}

impl Message {
    /// Shown locally but not yet confirmed by the server.
    pub fn is_pending(&self) -> bool {
        self.id.is_none() && self.temp_id.is_some()
    }

    /// True when the message was exchanged between `a` and `b`, in either direction.
    pub fn involves(&self, a: UserId, b: UserId) -> bool {
        (self.sender_id == a && self.receiver_id == b) || (self.sender_id == b && self.receiver_id == a)
    }
}

/// Body of a STOMP SEND to `/app/chat`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingChat {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub temp_id: String,
}

/// One row of the conversation list, aggregated by the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub other_user_id: UserId,
    #[serde(default)]
    pub other_user_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other_user_avatar: Option<String>,
    #[serde(default)]
    pub last_message: Option<String>,
    #[serde(default, with = "time::flexible::option")]
    pub last_message_time: Option<DateTime<Utc>>,
}

/// Spring Data page envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub content: Vec<T>,
    #[serde(default)]
    pub total_pages: u32,
    #[serde(default)]
    pub total_elements: u64,
    #[serde(default)]
    pub number: u32,
    #[serde(default)]
    pub size: u32,
}

impl<T> Page<T> {
    pub fn has_next(&self) -> bool {
        self.number + 1 < self.total_pages
    }
}

/// A REST collection exposed with the usual list/get/create/update/delete routes.
pub trait Resource: Serialize + DeserializeOwned + Send + Sync {
    /// Collection path, e.g. `/api/artisans`.
    const PATH: &'static str;

    fn id(&self) -> Option<i64>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Artisan {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub category_id: Option<i64>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    // accounts suspended by an admin stay listed but disabled
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// A service request posted by a client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Asking {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category_id: Option<i64>,
    #[serde(default)]
    pub client_id: Option<i64>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "time::flexible::option")]
    pub created_at: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

impl Resource for Artisan {
    const PATH: &'static str = "/api/artisans";
    fn id(&self) -> Option<i64> { self.id }
}

impl Resource for Client {
    const PATH: &'static str = "/api/clients";
    fn id(&self) -> Option<i64> { self.id }
}

impl Resource for Category {
    const PATH: &'static str = "/api/categories";
    fn id(&self) -> Option<i64> { self.id }
}

impl Resource for Asking {
    const PATH: &'static str = "/api/askings";
    fn id(&self) -> Option<i64> { self.id }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GeoLocation {
    pub lat: f64,
    #[serde(alias = "lng")]
    pub lon: f64,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AvatarUpload {
    #[serde(alias = "url")]
    pub avatar_url: String,
}
