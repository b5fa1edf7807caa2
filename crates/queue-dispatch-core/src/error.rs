use thiserror::Error;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Poll error on queue {queue}: {message}")]
    Poll { queue: String, message: String },

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Handler already registered for queue: {0}")]
    DuplicateHandler(String),

    #[error("Handler failed on queue {queue}: {message}")]
    Handler { queue: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl DispatchError {
    pub fn poll(queue: impl Into<String>, message: impl ToString) -> Self {
        DispatchError::Poll {
            queue: queue.into(),
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;
