use futures::FutureExt;
use queue_dispatch_core::{DispatchError, MessageHandler};
use queue_dispatch_store::QueueConnection;

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

/// Polling loop bound to one queue and its handler
pub struct QueueWorker {
    queue_name: String,
    handler: Arc<dyn MessageHandler>,
    connection: Arc<dyn QueueConnection>,
    running: Arc<AtomicBool>,
    poll_timeout: Duration,
}

impl QueueWorker {
    pub fn new(
        queue_name: String,
        handler: Arc<dyn MessageHandler>,
        connection: Arc<dyn QueueConnection>,
        running: Arc<AtomicBool>,
        poll_timeout: Duration,
    ) -> Self {
        QueueWorker {
            queue_name,
            handler,
            connection,
            running,
            poll_timeout,
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Run until the running flag drops or the store fails
    pub async fn run(self) {
        while self.running.load(Ordering::Acquire) {
            match self
                .connection
                .blocking_pop(&self.queue_name, self.poll_timeout)
                .await
            {
                Ok(Some(message)) => {
                    debug!(queue = %self.queue_name, payload = %message.payload, "Received message");
                    self.dispatch(message.payload).await;
                }
                Ok(None) => continue,
                Err(e) => {
                    // Errors after stop are the connection being torn down
                    if self.running.load(Ordering::Acquire) {
                        error!(queue = %self.queue_name, "Queue listener error: {}", e);
                    }
                    break;
                }
            }
        }

        debug!(queue = %self.queue_name, "Queue listener exited");
    }

    /// Invoke the handler, containing both returned errors and panics
    async fn dispatch(&self, payload: String) {
        let outcome = AssertUnwindSafe(self.handler.handle(payload))
            .catch_unwind()
            .await;

        let failure = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(e)) => format!("{:#}", e),
            Err(panic) => panic_message(panic.as_ref()),
        };

        let err = DispatchError::Handler {
            queue: self.queue_name.clone(),
            message: failure,
        };
        error!(queue = %self.queue_name, handler = self.handler.name(), "{}", err);
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("handler panicked: {}", s)
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use queue_dispatch_core::{blocking_handler_fn, handler_fn};
    use queue_dispatch_store::{MemoryBroker, PoppedMessage, QueueStoreClient, StoreTarget};
    use std::sync::atomic::AtomicUsize;

    fn collector() -> (Arc<Mutex<Vec<String>>>, Arc<dyn MessageHandler>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler = handler_fn(move |message: String| {
            let sink = sink.clone();
            async move {
                if message == "panic" {
                    panic!("boom");
                }
                if message == "bad" {
                    anyhow::bail!("cannot handle {}", message);
                }
                sink.lock().push(message);
                Ok(())
            }
        });
        (seen, Arc::new(handler))
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !condition() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_worker_survives_errors_and_panics() {
        let broker = MemoryBroker::new();
        let conn = broker.connect(&StoreTarget::new("memory://")).await.unwrap();
        let running = Arc::new(AtomicBool::new(true));
        let (seen, handler) = collector();

        for payload in ["one", "bad", "panic", "two"] {
            broker.push("jobs", payload);
        }

        let worker = QueueWorker::new(
            "jobs".to_string(),
            handler,
            conn,
            running.clone(),
            Duration::from_millis(20),
        );
        assert_eq!(worker.queue_name(), "jobs");
        let handle = tokio::spawn(worker.run());

        wait_for(|| seen.lock().len() == 2).await;
        running.store(false, Ordering::Release);
        handle.await.unwrap();

        assert_eq!(*seen.lock(), vec!["one".to_string(), "two".to_string()]);
        assert_eq!(broker.len("jobs"), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_worker_survives_blocking_handler_panic() {
        let broker = MemoryBroker::new();
        let conn = broker.connect(&StoreTarget::new("memory://")).await.unwrap();
        let running = Arc::new(AtomicBool::new(true));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler = blocking_handler_fn(move |message: String| {
            if message == "panic" {
                panic!("blocking boom");
            }
            sink.lock().push(message);
            Ok(())
        });

        for payload in ["panic", "after"] {
            broker.push("jobs", payload);
        }

        let worker = QueueWorker::new(
            "jobs".to_string(),
            Arc::new(handler),
            conn,
            running.clone(),
            Duration::from_millis(20),
        );
        let handle = tokio::spawn(worker.run());

        wait_for(|| seen.lock().len() == 1).await;
        running.store(false, Ordering::Release);
        handle.await.unwrap();

        assert_eq!(*seen.lock(), vec!["after".to_string()]);
    }

    struct FailingConnection {
        pops: AtomicUsize,
    }

    #[async_trait]
    impl QueueConnection for FailingConnection {
        async fn ping(&self) -> queue_dispatch_core::Result<()> {
            Ok(())
        }

        async fn blocking_pop(
            &self,
            queue: &str,
            _timeout: Duration,
        ) -> queue_dispatch_core::Result<Option<PoppedMessage>> {
            self.pops.fetch_add(1, Ordering::SeqCst);
            Err(DispatchError::poll(queue, "connection reset"))
        }

        async fn push(&self, _queue: &str, _payload: &str) -> queue_dispatch_core::Result<()> {
            Ok(())
        }

        async fn close(&self) {}
    }

    #[tokio::test]
    async fn test_pop_error_ends_worker() {
        let conn = Arc::new(FailingConnection {
            pops: AtomicUsize::new(0),
        });
        let running = Arc::new(AtomicBool::new(true));
        let (_seen, handler) = collector();

        let worker = QueueWorker::new(
            "jobs".to_string(),
            handler,
            conn.clone(),
            running.clone(),
            Duration::from_millis(20),
        );

        tokio::time::timeout(Duration::from_secs(1), worker.run())
            .await
            .expect("worker should exit on pop error");

        assert_eq!(conn.pops.load(Ordering::SeqCst), 1);
        assert!(running.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn test_worker_exits_when_flag_cleared() {
        let broker = MemoryBroker::new();
        let conn = broker.connect(&StoreTarget::new("memory://")).await.unwrap();
        let running = Arc::new(AtomicBool::new(false));
        let (seen, handler) = collector();
        broker.push("jobs", "never");

        QueueWorker::new("jobs".to_string(), handler, conn, running, Duration::from_millis(20))
            .run()
            .await;

        assert!(seen.lock().is_empty());
        assert_eq!(broker.len("jobs"), 1);
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "handler panicked: boom");

        let boxed: Box<dyn std::any::Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(boxed.as_ref()), "handler panicked");
    }
}
