// Scheduler module: due-queue, launcher and cancellation

mod cancel;
mod due_queue;
pub mod engine;
mod stats;

pub use cancel::CancelHandle;
pub use engine::{Scheduler, SchedulerBuilder};
pub use stats::{SchedulerStats, SchedulerStatus};
