pub mod align;
mod batch_function;
mod cache;
mod config;
mod error;
mod executor;
mod handle;
mod loader;
mod loader_op;
mod loader_worker;
mod registry;
#[cfg(feature = "stats")]
mod worker_stats;

pub use batch_function::BatchFunction;
pub use cache::Cache;
pub use config::{DispatchPolicy, LoaderConfig, PrimePolicy};
pub use error::{LoadError, Outcome, PrimeError};
pub use handle::LoadFuture;
pub use loader::Loader;
