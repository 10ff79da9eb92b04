//! # Inbound message notifications.
//!
//! Every message a worker receives is forwarded as an [`InboundMessage`] to a
//! [`NotificationSink`]. The worker awaits the sink after each pump, outside the
//! connection's callback, and contains both errors and panics:
//!
//! ```text
//! Connection::pump_once ──► OnMessage (enqueue only)
//! Worker: drain queue ──► NotificationSink::notify(&InboundMessage)
//!                              ├─ Ok        ─► next message
//!                              ├─ Err(e)    ─► NotifyFailed event, next message
//!                              └─ panic     ─► NotifyFailed event, next message
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::error::NotifyError;

/// Message received by a worker, tagged with the worker's identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Topic the message was published on.
    pub topic: String,
    /// Raw payload.
    pub payload: Vec<u8>,
    /// Name of the worker that received it.
    pub worker: Arc<str>,
    /// When the worker drained it from its queue.
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    /// Payload as UTF-8, if valid.
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

/// Receiver of inbound messages.
#[async_trait]
pub trait NotificationSink: Send + Sync + 'static {
    /// Handles one message. Errors are reported, never retried.
    async fn notify(&self, message: &InboundMessage) -> Result<(), NotifyError>;
}

/// Discards every message.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

#[async_trait]
impl NotificationSink for NullNotifier {
    async fn notify(&self, _message: &InboundMessage) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Forwards messages into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<InboundMessage>,
}

impl ChannelNotifier {
    /// Creates the notifier and the receiving end.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<InboundMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl NotificationSink for ChannelNotifier {
    async fn notify(&self, message: &InboundMessage) -> Result<(), NotifyError> {
        self.tx
            .send(message.clone())
            .map_err(|_| NotifyError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> InboundMessage {
        InboundMessage {
            topic: "t".into(),
            payload: b"hello".to_vec(),
            worker: Arc::from("w"),
            received_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_channel_notifier_forwards_and_reports_closed() {
        let (notifier, mut rx) = ChannelNotifier::channel();
        notifier.notify(&message()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().payload_str(), Some("hello"));

        drop(rx);
        assert_eq!(notifier.notify(&message()).await, Err(NotifyError::Closed));
    }
}
