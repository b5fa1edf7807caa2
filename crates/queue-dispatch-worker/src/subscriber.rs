use crate::{config::SubscriberConfig, worker::QueueWorker};
use queue_dispatch_core::{DispatchError, HandlerRegistry, MessageHandler, Result};
use queue_dispatch_store::{QueueConnection, QueueStoreClient, RedisStoreClient, StoreTarget};

use parking_lot::RwLock;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, warn, Instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberState {
    Stopped,
    Running,
}

struct WorkerHandle {
    queue_name: String,
    join: JoinHandle<()>,
}

#[derive(Default)]
struct Lifecycle {
    connection: Option<Arc<dyn QueueConnection>>,
    workers: Vec<WorkerHandle>,
}

/// Dispatches messages from store queues to registered handlers, one worker per queue
pub struct Subscriber {
    config: SubscriberConfig,
    instance_id: String,
    client: Arc<dyn QueueStoreClient>,
    registry: HandlerRegistry,
    // Replaced on every start so workers abandoned by an earlier stop never resume
    running: RwLock<Arc<AtomicBool>>,
    lifecycle: Mutex<Lifecycle>,
}

impl Subscriber {
    pub fn new(config: SubscriberConfig, client: Arc<dyn QueueStoreClient>) -> Self {
        let instance_id = config.generate_instance_id();

        Subscriber {
            registry: HandlerRegistry::with_policy(config.duplicate_policy),
            config,
            instance_id,
            client,
            running: RwLock::new(Arc::new(AtomicBool::new(false))),
            lifecycle: Mutex::new(Lifecycle::default()),
        }
    }

    /// Subscriber backed by the Redis server named in the config
    pub fn redis(config: SubscriberConfig) -> Self {
        let client = RedisStoreClient::new(config.connect_timeout());
        Self::new(config, Arc::new(client))
    }

    pub fn config(&self) -> &SubscriberConfig {
        &self.config
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Bind a handler to `queue_name` through the returned [`Subscription`]
    pub fn subscribe(&self, queue_name: impl Into<String>) -> Subscription<'_> {
        Subscription {
            subscriber: self,
            queue_name: queue_name.into(),
        }
    }

    /// Register a handler for a queue and hand it back.
    ///
    /// Workers are built from a snapshot taken at start, so a registration
    /// made while running only takes effect after the next restart.
    pub fn register<H: MessageHandler + 'static>(
        &self,
        queue_name: impl Into<String>,
        handler: H,
    ) -> Result<Arc<H>> {
        let queue_name = queue_name.into();
        if self.is_running() {
            warn!(queue = %queue_name, "Handler registered while running; it applies after restart");
        }
        self.registry.register(queue_name, handler)
    }

    pub fn is_running(&self) -> bool {
        self.running.read().load(Ordering::Acquire)
    }

    pub fn state(&self) -> SubscriberState {
        if self.is_running() {
            SubscriberState::Running
        } else {
            SubscriberState::Stopped
        }
    }

    /// Queues that currently have a worker, in spawn order
    pub async fn active_queues(&self) -> Vec<String> {
        let lifecycle = self.lifecycle.lock().await;
        lifecycle
            .workers
            .iter()
            .map(|w| w.queue_name.clone())
            .collect()
    }

    pub async fn worker_count(&self) -> usize {
        self.lifecycle.lock().await.workers.len()
    }

    /// Connect to the store and spawn one worker per registered queue
    pub async fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;

        if self.is_running() {
            warn!("Subscriber is already running");
            return Ok(());
        }

        if !lifecycle.workers.is_empty() {
            info!(count = lifecycle.workers.len(), "Clearing stale worker handles");
            lifecycle.workers.clear();
        }

        let connection = match self.connect().await {
            Ok(connection) => connection,
            Err(e) => {
                error!("Failed to start subscriber: {}", e);
                self.shutdown(&mut lifecycle).await;
                return Err(e);
            }
        };
        lifecycle.connection = Some(connection.clone());

        let running = Arc::new(AtomicBool::new(true));
        *self.running.write() = running.clone();

        for (queue_name, handler) in self.registry.snapshot() {
            let worker = QueueWorker::new(
                queue_name.clone(),
                handler,
                connection.clone(),
                running.clone(),
                self.config.poll_timeout(),
            );
            let span = info_span!("queue_worker", queue = %queue_name, instance = %self.instance_id);
            let join = tokio::spawn(worker.run().instrument(span));

            info!(queue = %queue_name, "Started queue listener");
            lifecycle.workers.push(WorkerHandle { queue_name, join });
        }

        info!(
            instance = %self.instance_id,
            queues = lifecycle.workers.len(),
            "Subscriber started"
        );
        Ok(())
    }

    /// Signal every worker, wait for them, then close the connection
    pub async fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().await;

        if !self.is_running() {
            return;
        }

        info!(instance = %self.instance_id, "Stopping subscriber");
        self.shutdown(&mut lifecycle).await;
        info!(instance = %self.instance_id, "Subscriber stopped");
    }

    /// Start, wait for `shutdown` to resolve, then stop
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.start().await?;
        shutdown.await;
        info!("Received shutdown signal");
        self.stop().await;
        Ok(())
    }

    async fn connect(&self) -> Result<Arc<dyn QueueConnection>> {
        let target = self.config.target();
        let connect_timeout = self.config.connect_timeout();

        match tokio::time::timeout(connect_timeout, self.connect_and_ping(&target)).await {
            Ok(Ok(connection)) => {
                info!(url = %target.redacted_url(), "Connected to queue store");
                Ok(connection)
            }
            Ok(Err(DispatchError::Connection(message))) => Err(DispatchError::Connection(message)),
            Ok(Err(other)) => Err(DispatchError::Connection(other.to_string())),
            Err(_) => Err(DispatchError::Connection(format!(
                "Timed out after {:?} connecting to {}",
                connect_timeout,
                target.redacted_url()
            ))),
        }
    }

    async fn connect_and_ping(&self, target: &StoreTarget) -> Result<Arc<dyn QueueConnection>> {
        let connection = self.client.connect(target).await?;
        if let Err(e) = connection.ping().await {
            connection.close().await;
            return Err(e);
        }
        Ok(connection)
    }

    async fn shutdown(&self, lifecycle: &mut Lifecycle) {
        self.running.read().store(false, Ordering::Release);

        let workers = std::mem::take(&mut lifecycle.workers);
        for worker in workers {
            self.join_worker(worker).await;
        }

        if let Some(connection) = lifecycle.connection.take() {
            connection.close().await;
        }
    }

    /// Best-effort join: a worker still busy after the timeout is detached, not aborted
    async fn join_worker(&self, worker: WorkerHandle) {
        let WorkerHandle {
            queue_name,
            mut join,
        } = worker;

        let outcome = match self.config.join_timeout() {
            Some(limit) => match tokio::time::timeout(limit, &mut join).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(
                        queue = %queue_name,
                        "Queue listener still busy after {:?}, abandoning it",
                        limit
                    );
                    return;
                }
            },
            None => join.await,
        };

        match outcome {
            Ok(()) => info!(queue = %queue_name, "Queue listener stopped"),
            Err(e) if e.is_panic() => error!(queue = %queue_name, "Queue listener panicked: {}", e),
            Err(e) => warn!(queue = %queue_name, "Queue listener was cancelled: {}", e),
        }
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.running.read().store(false, Ordering::Release);
    }
}

/// Pending registration returned by [`Subscriber::subscribe`]
pub struct Subscription<'a> {
    subscriber: &'a Subscriber,
    queue_name: String,
}

impl Subscription<'_> {
    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Record `handler` for this queue and return it
    pub fn handle<H: MessageHandler + 'static>(self, handler: H) -> Result<Arc<H>> {
        self.subscriber.register(self.queue_name, handler)
    }
}
