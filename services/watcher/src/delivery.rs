//! Deferred notification delivery.
//!
//! Each batch runs as its own task: wait out the batch delay, then send the
//! messages in order. Waiting batches are abandoned when the scheduler is
//! shut down; a batch that has started sending runs to completion.

use std::sync::Arc;
use std::time::Duration;

use leasewatch_id::{BatchId, SubscriberId};
use leasewatch_render::ComposedMessage;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics::Metrics;
use crate::transport::ChatTransport;

/// Messages for one subscriber produced by one update.
#[derive(Debug, Clone)]
pub struct DeliveryBatch {
    pub to: SubscriberId,

    /// Metrics label of the recipient.
    pub label: String,

    pub messages: Vec<ComposedMessage>,

    /// Wait before the first send.
    pub delay: Duration,
}

/// Result of a delivery task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The delay elapsed; `sent` of the batch's messages were accepted.
    Sent { sent: usize },
    /// Cancelled before the delay elapsed. Nothing was sent.
    Cancelled,
}

/// Handle to a scheduled batch.
pub struct DeliveryHandle {
    pub batch_id: BatchId,
    token: CancellationToken,
    join: JoinHandle<DeliveryOutcome>,
}

impl DeliveryHandle {
    /// Abandon the batch if it is still waiting.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Wait for the delivery task to finish.
    pub async fn join(self) -> DeliveryOutcome {
        self.join.await.unwrap_or(DeliveryOutcome::Cancelled)
    }
}

/// Spawns delivery tasks tied to a process-wide cancellation token.
#[derive(Clone)]
pub struct DeliveryScheduler {
    transport: Arc<dyn ChatTransport>,
    metrics: Arc<dyn Metrics>,
    shutdown: CancellationToken,
}

impl DeliveryScheduler {
    /// Create a new scheduler.
    pub fn new(transport: Arc<dyn ChatTransport>, metrics: Arc<dyn Metrics>) -> Self {
        Self {
            transport,
            metrics,
            shutdown: CancellationToken::new(),
        }
    }

    /// Schedule a batch. Returns immediately.
    pub fn schedule(&self, batch: DeliveryBatch) -> DeliveryHandle {
        let batch_id = BatchId::new();
        let token = self.shutdown.child_token();
        let transport = Arc::clone(&self.transport);
        let metrics = Arc::clone(&self.metrics);

        debug!(
            batch_id = %batch_id,
            subscriber_id = %batch.to,
            message_count = batch.messages.len(),
            delay_secs = batch.delay.as_secs(),
            "Scheduling delivery"
        );

        let join = tokio::spawn({
            let token = token.clone();
            async move {
                if !batch.delay.is_zero() {
                    tokio::select! {
                        _ = tokio::time::sleep(batch.delay) => {}
                        _ = token.cancelled() => {
                            info!(batch_id = %batch_id, subscriber_id = %batch.to, "Delivery abandoned");
                            return DeliveryOutcome::Cancelled;
                        }
                    }
                } else if token.is_cancelled() {
                    return DeliveryOutcome::Cancelled;
                }

                let mut sent = 0;
                for message in &batch.messages {
                    match transport.send(batch.to, message).await {
                        Ok(_) => sent += 1,
                        Err(e) => warn!(
                            batch_id = %batch_id,
                            subscriber_id = %batch.to,
                            error = %e,
                            "Failed to send message"
                        ),
                    }
                }
                metrics.messages_sent(&batch.label, sent);
                debug!(batch_id = %batch_id, sent, "Delivery finished");

                DeliveryOutcome::Sent { sent }
            }
        });

        DeliveryHandle {
            batch_id,
            token,
            join,
        }
    }

    /// Abandon every waiting batch and refuse new ones.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Returns true once [`shutdown`](Self::shutdown) has been called.
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
