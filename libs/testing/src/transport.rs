//! Recording chat transport and scripted inbound source.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use leasewatch_id::{MessageId, SubscriberId};
use leasewatch_render::ComposedMessage;
use leasewatch_watcher::transport::{
    ChatTransport, InboundBatch, InboundMessage, InboundSource, TransportError,
};
use tokio::time::Instant;

use crate::lock;

/// A message handed to [`RecordingTransport`].
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub to: SubscriberId,
    pub text: String,
    pub markdown: bool,

    /// Tokio time of the send, comparable under paused time.
    pub at: Instant,
}

/// Transport that records every send.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<SentMessage>>,
    deleted: Mutex<Vec<(SubscriberId, MessageId)>>,
    failing: Mutex<HashSet<SubscriberId>>,
    next_id: AtomicI64,
}

impl RecordingTransport {
    /// Create a new transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every send to `to`.
    pub fn fail_for(&self, to: SubscriberId) {
        lock(&self.failing).insert(to);
    }

    /// Every message sent so far.
    pub fn sent(&self) -> Vec<SentMessage> {
        lock(&self.sent).clone()
    }

    /// Messages sent to one subscriber.
    pub fn sent_to(&self, to: SubscriberId) -> Vec<SentMessage> {
        lock(&self.sent)
            .iter()
            .filter(|message| message.to == to)
            .cloned()
            .collect()
    }

    /// Number of messages sent.
    pub fn count(&self) -> usize {
        lock(&self.sent).len()
    }

    /// Deleted messages.
    pub fn deleted(&self) -> Vec<(SubscriberId, MessageId)> {
        lock(&self.deleted).clone()
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn send(
        &self,
        to: SubscriberId,
        message: &ComposedMessage,
    ) -> Result<MessageId, TransportError> {
        if lock(&self.failing).contains(&to) {
            return Err(TransportError::Rejected(format!("chat {to} unreachable")));
        }

        lock(&self.sent).push(SentMessage {
            to,
            text: message.text.clone(),
            markdown: message.markdown,
            at: Instant::now(),
        });
        Ok(MessageId::new(self.next_id.fetch_add(1, Ordering::SeqCst) + 1))
    }

    async fn delete(&self, to: SubscriberId, message: MessageId) -> Result<(), TransportError> {
        lock(&self.deleted).push((to, message));
        Ok(())
    }
}

/// Inbound source that replays queued messages.
///
/// Each poll returns one queued message. An empty queue waits a second of
/// tokio time and returns an empty batch.
#[derive(Default)]
pub struct ScriptedInbound {
    queue: Mutex<VecDeque<InboundMessage>>,
    offsets: Mutex<Vec<i64>>,
    next_id: AtomicI64,
}

impl ScriptedInbound {
    /// Create an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a message from `from` and return its message id. Ids count
    /// up from 1001.
    pub fn push(&self, from: SubscriberId, sender_name: &str, text: &str) -> MessageId {
        let id = MessageId::new(self.next_id.fetch_add(1, Ordering::SeqCst) + 1001);
        lock(&self.queue).push_back(InboundMessage {
            from,
            id,
            sender_name: sender_name.to_string(),
            text: text.to_string(),
        });
        id
    }

    /// Offsets passed to `poll`, in call order.
    pub fn offsets(&self) -> Vec<i64> {
        lock(&self.offsets).clone()
    }

    /// Returns true once every queued message was handed out.
    pub fn is_drained(&self) -> bool {
        lock(&self.queue).is_empty()
    }
}

#[async_trait]
impl InboundSource for ScriptedInbound {
    async fn poll(&self, offset: i64) -> Result<InboundBatch, TransportError> {
        lock(&self.offsets).push(offset);

        let next = lock(&self.queue).pop_front();
        match next {
            Some(message) => Ok(InboundBatch {
                next_offset: offset + 1,
                messages: vec![message],
            }),
            None => {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok(InboundBatch {
                    next_offset: offset,
                    messages: Vec::new(),
                })
            }
        }
    }
}
