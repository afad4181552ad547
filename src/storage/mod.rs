//! Storage layer abstractions and implementations.
//!
//! Each store is a trait with a SQLite implementation for production and an
//! in-memory implementation for tests.

pub mod result_store;
pub mod running_task;
pub mod traits;

pub use result_store::{MemoryResultStore, ResultStore, SqliteResultStore, TaskResultRow};
pub use running_task::{
    MemoryRunningTaskStore, RegistrySnapshot, RunningTaskRow, RunningTaskStore,
    SqliteRunningTaskStore,
};
pub use traits::StorageResult;
