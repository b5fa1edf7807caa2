mod client;
mod memory;
mod redis_store;
mod target;

pub use client::{PoppedMessage, QueueConnection, QueueStoreClient};
pub use memory::{MemoryBroker, MemoryConnection};
pub use redis_store::{RedisConnection, RedisStoreClient};
pub use target::StoreTarget;
