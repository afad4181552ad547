//! Task definitions and the fleet manager that drives them.

pub mod fleet;
pub mod task;
pub mod todo;

pub use fleet::{FleetError, FleetManager, DEFAULT_TICK_INTERVAL};
pub use task::{generate_task_id, FleetTask, NotifyPolicy, Runnable, Task, TaskParts};
pub use todo::{reminder_runtimes, Todo, TodoFormatter, TodoTask};
