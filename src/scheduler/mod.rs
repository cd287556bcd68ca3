//! scheduler - Single worker thread running queued tasks and periodic timers
//!
//! Everything that touches the audio graph outside of a plain push call runs
//! here: network reads hand their packets over with `invoke`, pacing stages
//! register a [`TickWorker`]. Because there is only one worker, tasks and
//! timer callbacks never run concurrently with each other.

mod dedicated;
mod tick_worker;

pub use dedicated::{Completion, DedicatedScheduler, MERGE_THRESHOLD};
pub use tick_worker::TickWorker;
