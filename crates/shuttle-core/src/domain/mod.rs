//! Domain model (ids, lifecycle states, work items).

pub mod ids;
pub mod item;
pub mod state;

pub use self::ids::{DispatchId, ItemId, WorkerId};
pub use self::item::WorkItem;
pub use self::state::{AttemptState, WorkerState};
