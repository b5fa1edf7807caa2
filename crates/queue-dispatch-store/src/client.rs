use crate::StoreTarget;
use async_trait::async_trait;
use queue_dispatch_core::Result;
use std::sync::Arc;
use std::time::Duration;

/// A message taken off a queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoppedMessage {
    pub queue: String,
    pub payload: String,
}

/// Factory for store connections
#[async_trait]
pub trait QueueStoreClient: Send + Sync {
    /// Open a connection to the store described by `target`
    async fn connect(&self, target: &StoreTarget) -> Result<Arc<dyn QueueConnection>>;
}

/// A live connection shared by every queue worker
#[async_trait]
pub trait QueueConnection: Send + Sync {
    /// Verify the store is reachable
    async fn ping(&self) -> Result<()>;

    /// Pop the head of `queue`, waiting at most `timeout` for a message.
    ///
    /// Returns `Ok(None)` when the wait elapses without a message.
    async fn blocking_pop(&self, queue: &str, timeout: Duration) -> Result<Option<PoppedMessage>>;

    /// Append a message to the tail of `queue`
    async fn push(&self, queue: &str, payload: &str) -> Result<()>;

    /// Release the connection; later calls fail with `ConnectionClosed`
    async fn close(&self);
}
