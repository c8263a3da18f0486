pub mod api;
pub mod queue;
pub mod task;
pub mod worker;

pub use api::*;
pub use queue::Queue;
pub use task::{Priority, Task, TaskStatus};
pub use worker::{Worker, WorkerStatus};
