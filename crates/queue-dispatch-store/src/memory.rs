use crate::{PoppedMessage, QueueConnection, QueueStoreClient, StoreTarget};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use queue_dispatch_core::{DispatchError, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// A single FIFO list with wake-ups for blocked poppers
#[derive(Default)]
struct MemoryList {
    items: Mutex<VecDeque<String>>,
    notify: Notify,
}

/// In-process list-backed store, shared by every connection it hands out.
///
/// Queues are created on first use. Messages survive connection close, the
/// same way they survive a client disconnect on a real server.
pub struct MemoryBroker {
    lists: DashMap<String, Arc<MemoryList>>,
    reachable: AtomicBool,
    connections: AtomicUsize,
}

impl MemoryBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(MemoryBroker {
            lists: DashMap::new(),
            reachable: AtomicBool::new(true),
            connections: AtomicUsize::new(0),
        })
    }

    /// Make subsequent `connect` and `ping` calls fail
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::Release);
    }

    pub fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::Acquire)
    }

    /// Number of connections opened so far
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Acquire)
    }

    /// Append a message to the tail of `queue`
    pub fn push(&self, queue: &str, payload: impl Into<String>) {
        let list = self.list(queue);
        list.items.lock().push_back(payload.into());
        list.notify.notify_one();
    }

    /// Pending messages on `queue`
    pub fn len(&self, queue: &str) -> usize {
        self.lists
            .get(queue)
            .map(|list| list.items.lock().len())
            .unwrap_or(0)
    }

    fn list(&self, queue: &str) -> Arc<MemoryList> {
        self.lists
            .entry(queue.to_string())
            .or_insert_with(|| Arc::new(MemoryList::default()))
            .clone()
    }

    fn try_pop(&self, queue: &str) -> Option<String> {
        self.lists
            .get(queue)
            .and_then(|list| list.items.lock().pop_front())
    }
}

#[async_trait]
impl QueueStoreClient for Arc<MemoryBroker> {
    async fn connect(&self, target: &StoreTarget) -> Result<Arc<dyn QueueConnection>> {
        if !self.is_reachable() {
            return Err(DispatchError::Connection(format!(
                "memory store unreachable at {}",
                target.redacted_url()
            )));
        }

        self.connections.fetch_add(1, Ordering::AcqRel);
        Ok(Arc::new(MemoryConnection {
            broker: self.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

/// Connection handed out by [`MemoryBroker`]
pub struct MemoryConnection {
    broker: Arc<MemoryBroker>,
    closed: AtomicBool,
}

impl MemoryConnection {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DispatchError::ConnectionClosed);
        }
        Ok(())
    }
}

#[async_trait]
impl QueueConnection for MemoryConnection {
    async fn ping(&self) -> Result<()> {
        self.ensure_open()?;
        if !self.broker.is_reachable() {
            return Err(DispatchError::Connection("memory store unreachable".to_string()));
        }
        Ok(())
    }

    async fn blocking_pop(&self, queue: &str, timeout: Duration) -> Result<Option<PoppedMessage>> {
        let deadline = Instant::now() + timeout;
        let list = self.broker.list(queue);

        loop {
            self.ensure_open()?;

            if let Some(payload) = self.broker.try_pop(queue) {
                return Ok(Some(PoppedMessage {
                    queue: queue.to_string(),
                    payload,
                }));
            }

            // notify_one stores a permit when nobody is waiting, so a push
            // between try_pop and here is not lost
            if tokio::time::timeout_at(deadline, list.notify.notified())
                .await
                .is_err()
            {
                return Ok(None);
            }
        }
    }

    async fn push(&self, queue: &str, payload: &str) -> Result<()> {
        self.ensure_open()?;
        self.broker.push(queue, payload);
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
