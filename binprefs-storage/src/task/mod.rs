//! Background task pipeline: one serialized worker per store.

mod executor;
mod failure;
mod handle;

pub use executor::StoreExecutor;
pub use failure::{FailureHandler, IgnoreFailureHandler, LoggingFailureHandler};
pub use handle::TaskHandle;
