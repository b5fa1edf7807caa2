pub mod config;
pub mod handler;
pub mod subscriber;
pub mod worker;

pub use config::SubscriberConfig;
pub use subscriber::{Subscriber, SubscriberState, Subscription};
pub use worker::QueueWorker;

pub use queue_dispatch_core::{
    blocking_handler_fn, handler_fn, DispatchError, DuplicatePolicy, HandlerRegistry,
    HandlerResult, MessageHandler, Result,
};
pub use queue_dispatch_store::{MemoryBroker, QueueConnection, QueueStoreClient, StoreTarget};
