use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

/// Result type for message handlers
pub type HandlerResult = anyhow::Result<()>;

/// Trait for queue message handlers
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle one message popped from the bound queue
    async fn handle(&self, message: String) -> HandlerResult;

    /// Name used in log lines
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Handler backed by an async closure, see [`handler_fn`]
pub struct FnHandler<F> {
    name: String,
    f: F,
}

impl<F> FnHandler<F> {
    /// Override the name reported in log lines
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Wrap an async closure `Fn(String) -> Future<Output = HandlerResult>` as a handler
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    FnHandler {
        name: std::any::type_name::<F>().to_string(),
        f,
    }
}

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle(&self, message: String) -> HandlerResult {
        (self.f)(message).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Handler backed by a synchronous closure, see [`blocking_handler_fn`]
pub struct BlockingFnHandler<F> {
    name: String,
    f: Arc<F>,
}

impl<F> BlockingFnHandler<F> {
    /// Override the name reported in log lines
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Wrap a synchronous closure `Fn(String) -> HandlerResult` as a handler.
///
/// Each call runs on the blocking thread pool, so blocking I/O or CPU-bound
/// work stalls only the queue the handler is bound to. A panic in the
/// closure is resumed on the calling task.
pub fn blocking_handler_fn<F>(f: F) -> BlockingFnHandler<F>
where
    F: Fn(String) -> HandlerResult + Send + Sync + 'static,
{
    BlockingFnHandler {
        name: std::any::type_name::<F>().to_string(),
        f: Arc::new(f),
    }
}

#[async_trait]
impl<F> MessageHandler for BlockingFnHandler<F>
where
    F: Fn(String) -> HandlerResult + Send + Sync + 'static,
{
    async fn handle(&self, message: String) -> HandlerResult {
        let f = self.f.clone();
        match tokio::task::spawn_blocking(move || f(message)).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(anyhow::anyhow!("Blocking handler was cancelled: {}", e)),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
