mod error;
mod handler;
mod registry;

pub use error::{DispatchError, Result};
pub use handler::{
    blocking_handler_fn, handler_fn, BlockingFnHandler, FnHandler, HandlerResult, MessageHandler,
};
pub use registry::{DuplicatePolicy, HandlerRegistry};
