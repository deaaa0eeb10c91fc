use super::error::{ChatError, ChatResult};
use super::events::{EventStream, decode_event_stream};
use crate::types::SessionId;
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};

/// The seam between the conversation and the network.
///
/// `stream_chat` resolves once the response headers are in; the returned
/// stream is then read lazily by the caller.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn stream_chat(&self, session_id: &SessionId, message: &str) -> ChatResult<EventStream>;

    async fn clear_session(&self, session_id: &SessionId) -> ChatResult<()>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    session_id: &'a str,
    message: &'a str,
}

#[derive(Deserialize)]
struct ErrorBody {
    detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ChatReply {
    pub response: String,
    pub session_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct HistoryEntry {
    /// Backend role name; may include roles the client never produces.
    pub role: String,
    pub content: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct SessionHistory {
    pub session_id: String,
    #[serde(default)]
    pub messages: Vec<HistoryEntry>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct IndexReport {
    pub status: String,
    pub documents_indexed: u64,
}

/// HTTP client for the RAG chat backend.
#[derive(Clone)]
pub struct ChatClient {
    client: Client,
    base_url: String,
}

impl ChatClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Non-streaming chat: the full answer in one response.
    pub async fn send_message(&self, session_id: &SessionId, message: &str) -> ChatResult<ChatReply> {
        let response = self
            .client
            .post(self.url("/chat"))
            .json(&ChatRequest {
                session_id: session_id.as_str(),
                message,
            })
            .send()
            .await?;
        let response = ensure_success(response).await?;
        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    pub async fn health(&self) -> ChatResult<HealthStatus> {
        let response = self.client.get(self.url("/health")).send().await?;
        let response = ensure_success(response).await?;
        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Server-side view of the conversation memory for a session.
    pub async fn history(&self, session_id: &SessionId) -> ChatResult<SessionHistory> {
        let url = self.url(&format!("/session/{}/history", session_id));
        let response = self.client.get(url).send().await?;
        let response = ensure_success(response).await?;
        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Asks the backend to rebuild its document index.
    pub async fn reindex(&self) -> ChatResult<IndexReport> {
        let response = self.client.post(self.url("/index")).send().await?;
        let response = ensure_success(response).await?;
        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl ChatTransport for ChatClient {
    async fn stream_chat(&self, session_id: &SessionId, message: &str) -> ChatResult<EventStream> {
        let response = self
            .client
            .post(self.url("/chat/stream"))
            .header("accept", "text/event-stream")
            .json(&ChatRequest {
                session_id: session_id.as_str(),
                message,
            })
            .send()
            .await?;
        let response = ensure_success(response).await?;
        tracing::debug!(session = %session_id, "chat stream opened");
        Ok(decode_event_stream(response.bytes_stream()))
    }

    async fn clear_session(&self, session_id: &SessionId) -> ChatResult<()> {
        let url = self.url(&format!("/session/{}", session_id));
        let response = self.client.delete(url).send().await?;
        ensure_success(response).await?;
        Ok(())
    }
}

/// Passes successful responses through; otherwise turns the body's
/// `detail` field into a [`ChatError::Request`].
async fn ensure_success(response: Response) -> ChatResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorBody>(&body) {
        Ok(parsed) if !parsed.detail.is_empty() => Err(ChatError::Request(parsed.detail)),
        _ => Err(ChatError::Status {
            status: status.as_u16(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_normalized() {
        let client = ChatClient::new("http://localhost:8000/api/");
        assert_eq!(client.base_url(), "http://localhost:8000/api");
        assert_eq!(client.url("/chat/stream"), "http://localhost:8000/api/chat/stream");
    }

    #[test]
    fn request_body_shape() {
        let body = serde_json::to_value(ChatRequest {
            session_id: "abc",
            message: "What is RAG?",
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({"session_id": "abc", "message": "What is RAG?"})
        );
    }

    #[test]
    fn history_tolerates_missing_messages() {
        let parsed: SessionHistory = serde_json::from_str(r#"{"session_id":"abc"}"#).unwrap();
        assert!(parsed.messages.is_empty());
    }
}
