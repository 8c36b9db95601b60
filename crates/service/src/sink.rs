use blockray_common::ResultEvent;
use crossbeam_channel::{Receiver, Sender, TrySendError, unbounded};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DeliveryError {
    #[error("requester is gone")]
    Disconnected,
    #[error("requester mailbox is full")]
    Full,
    #[error("delivery failed: {0}")]
    Other(String),
}

/// Pushes finished results back to guest scripts.
///
/// Called from worker threads, once per accepted query.
pub trait EventSink: Send + Sync {
    fn deliver(&self, event: ResultEvent) -> Result<(), DeliveryError>;
}

/// Sink backed by a crossbeam channel; the host drains the receiver on its
/// own thread and dispatches to scripts.
#[derive(Clone)]
pub struct ChannelSink {
    sender: Sender<ResultEvent>,
}

impl ChannelSink {
    /// Unbounded sink and the receiver the host polls.
    pub fn new() -> (Self, Receiver<ResultEvent>) {
        let (sender, receiver) = unbounded();
        (Self { sender }, receiver)
    }

    /// Sink that refuses deliveries once `capacity` results are waiting.
    pub fn bounded(capacity: usize) -> (Self, Receiver<ResultEvent>) {
        let (sender, receiver) = crossbeam_channel::bounded(capacity);
        (Self { sender }, receiver)
    }
}

impl EventSink for ChannelSink {
    fn deliver(&self, event: ResultEvent) -> Result<(), DeliveryError> {
        match self.sender.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(DeliveryError::Full),
            Err(TrySendError::Disconnected(_)) => Err(DeliveryError::Disconnected),
        }
    }
}
