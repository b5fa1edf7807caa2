//! Redis-backed queue store.
//!
//! Queues are Redis lists: producers `RPUSH`, workers `BLPOP`. `BLPOP` parks
//! the connection it runs on, so every queue gets its own multiplexed
//! connection while `PING` and `RPUSH` share a control connection.

use crate::{PoppedMessage, QueueConnection, QueueStoreClient, StoreTarget};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use queue_dispatch_core::{DispatchError, Result};
use redis::aio::MultiplexedConnection;
use redis::IntoConnectionInfo;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Opens [`RedisConnection`]s
#[derive(Debug, Clone)]
pub struct RedisStoreClient {
    connect_timeout: Duration,
}

impl RedisStoreClient {
    pub fn new(connect_timeout: Duration) -> Self {
        RedisStoreClient { connect_timeout }
    }

    async fn open_connection(
        &self,
        client: &redis::Client,
        target: &StoreTarget,
    ) -> Result<MultiplexedConnection> {
        match tokio::time::timeout(self.connect_timeout, client.get_multiplexed_async_connection())
            .await
        {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(e)) => Err(DispatchError::Connection(format!(
                "Failed to connect to Redis at {}: {}",
                target.redacted_url(),
                e
            ))),
            Err(_) => Err(DispatchError::Connection(format!(
                "Timed out after {:?} connecting to Redis at {}",
                self.connect_timeout,
                target.redacted_url()
            ))),
        }
    }
}

impl Default for RedisStoreClient {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl QueueStoreClient for RedisStoreClient {
    async fn connect(&self, target: &StoreTarget) -> Result<Arc<dyn QueueConnection>> {
        let mut info = target.url.as_str().into_connection_info().map_err(|e| {
            DispatchError::Connection(format!("Invalid Redis URL {}: {}", target.redacted_url(), e))
        })?;

        if let Some(username) = &target.username {
            info.redis.username = Some(username.clone());
        }
        if let Some(password) = &target.password {
            info.redis.password = Some(password.clone());
        }

        let client = redis::Client::open(info).map_err(|e| {
            DispatchError::Connection(format!("Failed to create Redis client: {}", e))
        })?;

        let control = self.open_connection(&client, target).await?;
        debug!(url = %target.redacted_url(), "Redis connection established");

        Ok(Arc::new(RedisConnection {
            client,
            target: target.clone(),
            store: self.clone(),
            control: Mutex::new(Some(control)),
            consumers: DashMap::new(),
            closed: AtomicBool::new(false),
        }))
    }
}

/// Live Redis connection set shared by all queue workers
pub struct RedisConnection {
    client: redis::Client,
    target: StoreTarget,
    store: RedisStoreClient,
    control: Mutex<Option<MultiplexedConnection>>,
    consumers: DashMap<String, MultiplexedConnection>,
    closed: AtomicBool,
}

impl RedisConnection {
    fn control(&self) -> Result<MultiplexedConnection> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DispatchError::ConnectionClosed);
        }
        self.control
            .lock()
            .as_ref()
            .cloned()
            .ok_or(DispatchError::ConnectionClosed)
    }

    /// Dedicated connection for one queue, opened on first use
    async fn consumer(&self, queue: &str) -> Result<MultiplexedConnection> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DispatchError::ConnectionClosed);
        }
        if let Some(conn) = self.consumers.get(queue) {
            return Ok(conn.clone());
        }

        let conn = self.store.open_connection(&self.client, &self.target).await?;
        self.consumers.insert(queue.to_string(), conn.clone());
        debug!(queue = %queue, "Opened consumer connection");
        Ok(conn)
    }
}

/// BLPOP treats 0 as "block forever" and older servers only take integer seconds
fn blpop_timeout(timeout: Duration) -> String {
    if timeout.subsec_nanos() == 0 && timeout.as_secs() > 0 {
        timeout.as_secs().to_string()
    } else {
        format!("{:.3}", timeout.as_secs_f64().max(0.01))
    }
}

#[async_trait]
impl QueueConnection for RedisConnection {
    async fn ping(&self) -> Result<()> {
        let mut conn = self.control()?;
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| DispatchError::Connection(format!("Redis PING failed: {}", e)))?;

        if pong != "PONG" {
            return Err(DispatchError::Connection(format!(
                "Unexpected PING reply: {}",
                pong
            )));
        }
        Ok(())
    }

    async fn blocking_pop(&self, queue: &str, timeout: Duration) -> Result<Option<PoppedMessage>> {
        let mut conn = self.consumer(queue).await?;

        let popped: Option<(String, String)> = redis::cmd("BLPOP")
            .arg(queue)
            .arg(blpop_timeout(timeout))
            .query_async(&mut conn)
            .await
            .map_err(|e| DispatchError::poll(queue, e))?;

        Ok(popped.map(|(queue, payload)| PoppedMessage { queue, payload }))
    }

    async fn push(&self, queue: &str, payload: &str) -> Result<()> {
        let mut conn = self.control()?;
        let _: i64 = redis::cmd("RPUSH")
            .arg(queue)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| DispatchError::poll(queue, e))?;
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.consumers.clear();
        self.control.lock().take();
        debug!(url = %self.target.redacted_url(), "Redis connection closed");
    }
}
