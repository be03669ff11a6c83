//! Inbound command dispatch loop.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::commands::SubscriberService;
use crate::policy::{RatePolicy, SleepOutcome};
use crate::transport::{ChatTransport, InboundSource};

/// Poll `source` for commands and send the replies until `shutdown` flips.
/// Messages carrying credentials are deleted before replying.
///
/// Poll errors are retried after the policy's no-donor backoff.
pub async fn run_dispatch_loop(
    source: Arc<dyn InboundSource>,
    transport: Arc<dyn ChatTransport>,
    service: Arc<SubscriberService>,
    policy: RatePolicy,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("Command dispatch started");
    let mut offset = 0;

    loop {
        if *shutdown.borrow() {
            break;
        }

        let batch = tokio::select! {
            result = source.poll(offset) => result,
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
        };

        let batch = match batch {
            Ok(batch) => batch,
            Err(e) => {
                warn!(error = %e, "Inbound poll failed");
                if policy.sleep(policy.no_donor_backoff, &mut shutdown).await == SleepOutcome::Stopped {
                    break;
                }
                continue;
            }
        };

        offset = batch.next_offset.max(offset);
        for message in batch.messages {
            debug!(subscriber_id = %message.from, "Command received");
            let response = service.execute(&message).await;
            if let Some(id) = response.delete {
                if let Err(e) = transport.delete(message.from, id).await {
                    warn!(subscriber_id = %message.from, error = %e, "Failed to delete message");
                }
            }
            for reply in response.replies {
                if let Err(e) = transport.send(message.from, &reply).await {
                    warn!(subscriber_id = %message.from, error = %e, "Failed to send reply");
                }
            }
        }
    }

    info!("Command dispatch stopped");
}
