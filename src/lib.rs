//! # argus
//!
//! argus is a recurring-task runner. Tasks are defined once, persisted as
//! polymorphic JSON records in a running-task registry, and driven by a fleet
//! manager that polls the registry and runs whatever is due.
//!
//! ## Architecture Overview
//!
//! ### Schedules
//! - A [`schedule::Schedule`] owns timezone-aware runtimes and an advancing
//!   cursor, with fixed-frequency or explicit-list advancement and day/month
//!   exclusion filters
//!
//! ### Tasks
//! - A [`tasks::Task`] composes a [`tasks::Runnable`] payload with a schedule,
//!   a formatter/notifier channel, and a notification policy
//! - Results are appended to an audit-trail store on every run; the
//!   `on_change` policy compares against the last stored result to decide
//!   whether to notify
//!
//! ### Serialization
//! - Polymorphic entities carry a `__type` discriminator and are reconstructed
//!   through an explicit [`serialization::SerialRegistry`]
//!
//! ### Fleet Manager
//! - [`tasks::FleetManager`] polls the running-task registry, rebuilds the
//!   in-memory fleet when a count/timestamp snapshot changes, and isolates
//!   per-task failures
//!
//! ## Configuration
//!
//! The service is configured via environment variables:
//! - `DATABASE_URL`: SQLite connection string
//! - `TICK_INTERVAL_SECONDS`: fleet polling interval
//!
//! ## Error Handling
//!
//! All error strings use the format: `error-argus-<domain>-<number> <message>: <details>`

pub mod config;
pub mod errors;
pub mod notify;
pub mod schedule;
pub mod serialization;
pub mod storage;
pub mod tasks;
