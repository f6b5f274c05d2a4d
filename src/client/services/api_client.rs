use std::path::Path;

use log::{debug, warn};
use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::client::config::ClientConfig;
use crate::common::error::{ClientError, Result};
use crate::common::models::{
    AvatarUpload, ConversationSummary, GeoLocation, LoginRequest, LoginResponse, Message, MessageId, Page,
    Resource, UserId, UserProfile,
};

/// Typed client for the marketplace REST API.
///
/// The bearer token lives inside the client so it can be shared behind an
/// `Arc` by the chat service and the unread poller.
pub struct ApiClient {
    http: reqwest::Client,
    base: String,
    token: RwLock<Option<String>>,
}

impl ApiClient {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(config.http_timeout).build()?;
        Ok(Self {
            http,
            base: config.api_url.as_str().trim_end_matches('/').to_string(),
            token: RwLock::new(None),
        })
    }

    pub async fn set_token(&self, token: Option<String>) {
        *self.token.write().await = token;
    }

    pub async fn token(&self) -> Option<String> {
        self.token.read().await.clone()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn authorized(&self, rb: RequestBuilder) -> RequestBuilder {
        match self.token.read().await.as_deref() {
            Some(token) => rb.bearer_auth(token),
            None => rb,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        debug!("[API] GET {}", path);
        let rb = self.authorized(self.http.get(self.url(path))).await;
        decode(rb.send().await?).await
    }

    async fn send_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        rb: RequestBuilder,
        body: &B,
    ) -> Result<T> {
        let rb = self.authorized(rb.json(body)).await;
        decode(rb.send().await?).await
    }

    async fn send_empty(&self, rb: RequestBuilder) -> Result<()> {
        let rb = self.authorized(rb).await;
        check(rb.send().await?).await.map(|_| ())
    }

    // --- session

    /// Log in and keep the returned token for the following calls.
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResponse> {
        let body = LoginRequest { email: email.to_string(), password: password.to_string() };
        let resp = self.http.post(self.url("/api/users/login")).json(&body).send().await?;
        let login: LoginResponse = decode(resp).await?;
        self.set_token(Some(login.token.clone())).await;
        debug!("[API] Logged in as user {}", login.user.id);
        Ok(login)
    }

    pub async fn me(&self) -> Result<UserProfile> {
        if self.token().await.is_none() {
            return Err(ClientError::NotLoggedIn);
        }
        self.get_json("/api/users/me").await
    }

    /// The local token is dropped even when the server call fails.
    pub async fn logout(&self) -> Result<()> {
        let result = self.send_empty(self.http.post(self.url("/api/users/logout"))).await;
        self.set_token(None).await;
        if let Err(e) = &result {
            warn!("[API] Logout call failed: {}", e);
        }
        result
    }

    // --- marketplace collections

    pub async fn list<R: Resource>(&self) -> Result<Vec<R>> {
        self.get_json(R::PATH).await
    }

    pub async fn get<R: Resource>(&self, id: i64) -> Result<R> {
        self.get_json(&format!("{}/{}", R::PATH, id)).await
    }

    pub async fn create<R: Resource>(&self, record: &R) -> Result<R> {
        self.send_json(self.http.post(self.url(R::PATH)), record).await
    }

    pub async fn update<R: Resource>(&self, record: &R) -> Result<R> {
        let id = record
            .id()
            .ok_or_else(|| ClientError::Protocol(format!("cannot update a record of {} without id", R::PATH)))?;
        self.send_json(self.http.put(self.url(&format!("{}/{}", R::PATH, id))), record).await
    }

    pub async fn delete<R: Resource>(&self, id: i64) -> Result<()> {
        self.send_empty(self.http.delete(self.url(&format!("{}/{}", R::PATH, id)))).await
    }

    // --- messaging

    /// `POST /api/messages` as multipart, with an optional file attached.
    pub async fn send_message(
        &self,
        receiver_id: UserId,
        content: &str,
        temp_id: Option<&str>,
        attachment: Option<&Path>,
    ) -> Result<Message> {
        let mut form = Form::new()
            .text("receiverId", receiver_id.to_string())
            .text("content", content.to_string());
        if let Some(temp_id) = temp_id {
            form = form.text("tempId", temp_id.to_string());
        }
        if let Some(path) = attachment {
            form = form.part("file", file_part(path).await?);
        }
        let rb = self.authorized(self.http.post(self.url("/api/messages")).multipart(form)).await;
        decode(rb.send().await?).await
    }

    /// Paginated conversation list of the current user.
    pub async fn conversations(&self, page: u32, size: u32) -> Result<Page<ConversationSummary>> {
        let rb = self
            .http
            .get(self.url("/api/messages/history"))
            .query(&[("page", page.to_string()), ("size", size.to_string())]);
        let rb = self.authorized(rb).await;
        decode(rb.send().await?).await
    }

    pub async fn conversation_messages(&self, other_user: UserId) -> Result<Vec<Message>> {
        self.get_json(&format!("/api/messages/conversations/{}", other_user)).await
    }

    pub async fn unread(&self) -> Result<Vec<Message>> {
        self.get_json("/api/messages/unread").await
    }

    pub async fn mark_read(&self, id: MessageId) -> Result<()> {
        self.send_empty(self.http.put(self.url(&format!("/api/messages/{}/read", id)))).await
    }

    // --- misc

    pub async fn upload_avatar(&self, path: &Path) -> Result<AvatarUpload> {
        let form = Form::new().part("file", file_part(path).await?);
        let rb = self.authorized(self.http.post(self.url("/api/avatar/upload")).multipart(form)).await;
        decode(rb.send().await?).await
    }

    pub async fn geocode(&self, address: &str) -> Result<GeoLocation> {
        let rb = self.http.get(self.url("/api/geocode")).query(&[("address", address)]);
        let rb = self.authorized(rb).await;
        decode(rb.send().await?).await
    }
}

async fn file_part(path: &Path) -> Result<Part> {
    let data = tokio::fs::read(path).await?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string());
    Ok(Part::bytes(data).file_name(file_name))
}

async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T> {
    let resp = check(resp).await?;
    let bytes = resp.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Map a non-2xx answer to a [`ClientError`].
async fn check(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    match status {
        StatusCode::UNAUTHORIZED => Err(ClientError::Unauthorized),
        StatusCode::FORBIDDEN => Err(ClientError::Forbidden),
        _ => {
            let body = resp.text().await.unwrap_or_default();
            Err(ClientError::Status { status: status.as_u16(), message: error_message(&body, status) })
        }
    }
}

/// Pull a readable message out of an error body (Spring error JSON, plain text, or nothing).
fn error_message(body: &str, status: StatusCode) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["message", "error", "detail"] {
            if let Some(text) = value.get(key).and_then(|v| v.as_str()) {
                if !text.trim().is_empty() {
                    return text.trim().to_string();
                }
            }
        }
    }
    let text = body.trim();
    if !text.is_empty() && !text.starts_with('{') && !text.starts_with('<') {
        return text.to_string();
    }
    status.canonical_reason().unwrap_or("Request failed").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_message_prefers_json_message() {
        let body = r#"{"timestamp":"2024-05-01T10:00:00","status":400,"error":"Bad Request","message":"Title is required"}"#;
        assert_eq!(error_message(body, StatusCode::BAD_REQUEST), "Title is required");
    }

    #[test]
    fn error_message_uses_plain_text_body() {
        assert_eq!(error_message("Artisan not found", StatusCode::NOT_FOUND), "Artisan not found");
    }

    #[test]
    fn error_message_falls_back_to_reason_phrase() {
        assert_eq!(error_message("", StatusCode::INTERNAL_SERVER_ERROR), "Internal Server Error");
        assert_eq!(error_message("<html>oops</html>", StatusCode::BAD_GATEWAY), "Bad Gateway");
    }

    #[test]
    fn base_url_has_no_trailing_slash() {
        let cfg = ClientConfig::from_lookup(|k| (k == "API_URL").then(|| "http://localhost:8080/".to_string())).unwrap();
        let api = ApiClient::new(&cfg).unwrap();
        assert_eq!(api.url("/api/users/me"), "http://localhost:8080/api/users/me");
    }
}
