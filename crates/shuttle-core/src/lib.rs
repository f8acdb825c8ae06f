//! shuttle-core
//!
//! Concurrency building blocks for the Shuttle runtime.
//!
//! # Modules
//! - **pool**: fixed-size worker pool over a shared intake queue, with
//!   drain or stop-immediately shutdown
//! - **race**: first-result-wins dispatch of one query to many sources
//! - **signal**: one-shot broadcast signal shared by both
//! - **domain**: ids, lifecycle states, work items
//! - **ports**: traits callers implement (`Handler`, `Source`)
//! - **config** / **error** / **observability**: settings, error types, pool stats

pub mod config;
pub mod domain;
pub mod error;
pub mod observability;
pub mod pool;
pub mod ports;
pub mod race;
pub mod signal;

pub use config::{DispatchConfig, DrainPolicy, PoolConfig, QueueCapacity, ShuttleConfig};
pub use domain::{AttemptState, DispatchId, ItemId, WorkItem, WorkerId, WorkerState};
pub use error::{AttemptFailure, BoxError, BuildError, ConfigError, DispatchError, PoolError, WorkerError};
pub use observability::PoolStats;
pub use pool::{ErrorCallback, Pool, PoolBuilder};
pub use ports::{FnSource, Handler, Source};
pub use race::{Dispatcher, Won};
pub use signal::{Signal, SignalObserver};
