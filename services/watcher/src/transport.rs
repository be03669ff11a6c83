//! Chat transport.
//!
//! Outbound messages go through [`ChatTransport`]; inbound commands are read
//! from an [`InboundSource`]. [`TelegramTransport`] implements both over the
//! Telegram Bot HTTP API.

use std::time::Duration;

use async_trait::async_trait;
use leasewatch_id::{MessageId, SubscriberId};
use leasewatch_render::ComposedMessage;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Errors from the chat transport.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The request never completed.
    #[error("transport request failed: {0}")]
    Request(String),

    /// The transport answered with an error.
    #[error("transport rejected request: {0}")]
    Rejected(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        Self::Request(e.to_string())
    }
}

/// Outbound message primitives.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Send a message to a subscriber.
    async fn send(
        &self,
        to: SubscriberId,
        message: &ComposedMessage,
    ) -> Result<MessageId, TransportError>;

    /// Delete a previously sent message.
    async fn delete(&self, to: SubscriberId, message: MessageId) -> Result<(), TransportError>;
}

/// A chat message received from a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Chat the message came from.
    pub from: SubscriberId,

    /// Id of the message within that chat.
    pub id: MessageId,

    /// Display name of the sender.
    pub sender_name: String,

    pub text: String,
}

/// Result of one inbound poll.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundBatch {
    /// Offset for the next poll. Acknowledges everything returned here.
    pub next_offset: i64,

    /// Text messages, in arrival order.
    pub messages: Vec<InboundMessage>,
}

/// Source of inbound chat messages.
#[async_trait]
pub trait InboundSource: Send + Sync {
    /// Long-poll for updates at or after `offset`.
    async fn poll(&self, offset: i64) -> Result<InboundBatch, TransportError>;
}

// =============================================================================
// Telegram
// =============================================================================

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

#[derive(Debug, Serialize)]
struct DeleteMessageRequest {
    chat_id: i64,
    message_id: i64,
}

#[derive(Debug, Serialize)]
struct GetUpdatesRequest {
    offset: i64,
    timeout: u64,
    allowed_updates: [&'static str; 1],
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    #[serde(default)]
    message: Option<UpdateMessage>,
}

#[derive(Debug, Deserialize)]
struct UpdateMessage {
    message_id: i64,
    chat: Chat,
    #[serde(default)]
    from: Option<User>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct User {
    #[serde(default)]
    first_name: String,
    #[serde(default)]
    username: Option<String>,
}

/// Telegram Bot API transport.
pub struct TelegramTransport {
    client: reqwest::Client,
    endpoint: String,
    poll_timeout: Duration,
}

impl TelegramTransport {
    /// Create a new Telegram transport.
    pub fn new(base_url: &str, token: &str) -> Result<Self, TransportError> {
        let poll_timeout = Duration::from_secs(30);
        let client = reqwest::Client::builder()
            .timeout(poll_timeout + Duration::from_secs(15))
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/bot{}", base_url.trim_end_matches('/'), token),
            poll_timeout,
        })
    }

    /// Set the long-poll timeout used by [`InboundSource::poll`].
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    async fn call<B: Serialize + Sync, T: DeserializeOwned + Send>(
        &self,
        method: &str,
        body: &B,
    ) -> Result<T, TransportError> {
        let url = format!("{}/{}", self.endpoint, method);
        let response = self.client.post(&url).json(body).send().await?;
        let status = response.status();
        let payload: ApiResponse<T> = response.json().await?;

        match payload {
            ApiResponse {
                ok: true,
                result: Some(result),
                ..
            } => Ok(result),
            ApiResponse { description, .. } => Err(TransportError::Rejected(format!(
                "{method}: {status} - {}",
                description.unwrap_or_default()
            ))),
        }
    }
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    async fn send(
        &self,
        to: SubscriberId,
        message: &ComposedMessage,
    ) -> Result<MessageId, TransportError> {
        let request = SendMessageRequest {
            chat_id: to.value(),
            text: &message.text,
            parse_mode: message.markdown.then_some("Markdown"),
        };
        let sent: SentMessage = self.call("sendMessage", &request).await?;
        debug!(subscriber_id = %to, message_id = sent.message_id, "Message sent");
        Ok(MessageId::new(sent.message_id))
    }

    async fn delete(&self, to: SubscriberId, message: MessageId) -> Result<(), TransportError> {
        let request = DeleteMessageRequest {
            chat_id: to.value(),
            message_id: message.value(),
        };
        let _: bool = self.call("deleteMessage", &request).await?;
        Ok(())
    }
}

#[async_trait]
impl InboundSource for TelegramTransport {
    async fn poll(&self, offset: i64) -> Result<InboundBatch, TransportError> {
        let request = GetUpdatesRequest {
            offset,
            timeout: self.poll_timeout.as_secs(),
            allowed_updates: ["message"],
        };
        let updates: Vec<Update> = self.call("getUpdates", &request).await?;

        let next_offset = updates
            .iter()
            .map(|update| update.update_id + 1)
            .max()
            .unwrap_or(offset);

        let messages = updates
            .into_iter()
            .filter_map(|update| {
                let message = update.message?;
                let text = message.text?;
                let sender_name = message
                    .from
                    .map(|user| user.username.unwrap_or(user.first_name))
                    .unwrap_or_default();
                Some(InboundMessage {
                    from: SubscriberId::new(message.chat.id),
                    id: MessageId::new(message.message_id),
                    sender_name,
                    text,
                })
            })
            .collect();

        Ok(InboundBatch {
            next_offset,
            messages,
        })
    }
}
