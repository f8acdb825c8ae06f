//! Ports - the seams where caller code plugs into the engine.
//!
//! - **Handler**: typed work executed by pool workers
//! - **Source**: a redundant backend raced by the dispatcher

pub mod handler;
pub mod source;

pub use self::handler::Handler;
pub use self::source::{FnSource, Source};
