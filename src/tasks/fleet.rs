//! Fleet manager: polls the running-task registry and drives active tasks.
//!
//! Each tick takes a registry snapshot and rebuilds the in-memory fleet only
//! when the snapshot changed, then offers every active task a chance to run.
//! One task failing never stops the others; the failure is logged against its
//! task id and the tick moves on.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::errors::StorageError;
use crate::serialization::SerialRegistry;
use crate::storage::{RegistrySnapshot, ResultStore, RunningTaskStore};
use crate::tasks::task::FleetTask;

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum FleetError {
    #[error("error-argus-fleet-1 Registry storage failure: {source}")]
    RegistryStorage {
        #[from]
        source: StorageError,
    },
}

/// Owns the active task fleet and keeps it synchronized with the persisted
/// running-task registry.
pub struct FleetManager {
    running_tasks: Arc<dyn RunningTaskStore>,
    results: Arc<dyn ResultStore>,
    registry: Arc<SerialRegistry>,
    cancel_token: CancellationToken,
    tick_interval: Duration,
    active: Vec<Box<dyn FleetTask>>,
    last_snapshot: Option<RegistrySnapshot>,
}

impl FleetManager {
    pub fn new(
        running_tasks: Arc<dyn RunningTaskStore>,
        results: Arc<dyn ResultStore>,
        registry: Arc<SerialRegistry>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            running_tasks,
            results,
            registry,
            cancel_token,
            tick_interval: DEFAULT_TICK_INTERVAL,
            active: Vec::new(),
            last_snapshot: None,
        }
    }

    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    pub fn active_tasks(&self) -> &[Box<dyn FleetTask>] {
        &self.active
    }

    /// Ticks until cancelled. The first tick happens immediately so a fresh
    /// process picks up the registry without waiting a full interval.
    pub async fn run(mut self) {
        info!(
            interval_secs = self.tick_interval.as_secs(),
            "fleet manager started"
        );
        loop {
            if let Err(e) = self.tick().await {
                error!(error = %e, "fleet tick failed");
            }
            tokio::select! {
                _ = sleep(self.tick_interval) => {}
                _ = self.cancel_token.cancelled() => {
                    info!("fleet manager stopping");
                    return;
                }
            }
        }
    }

    /// One poll cycle: refresh the fleet when the registry changed, then let
    /// every due task run.
    pub async fn tick(&mut self) -> Result<(), FleetError> {
        let snapshot = self.running_tasks.snapshot().await?;
        if self.last_snapshot != Some(snapshot) {
            self.reload().await?;
            // Recorded only after a successful reload, so a failed reload is
            // retried on the next tick.
            self.last_snapshot = Some(snapshot);
        }

        let results = Arc::clone(&self.results);
        let mut any_ran = false;
        for task in &mut self.active {
            match task.run_if_due(results.as_ref()).await {
                Ok(ran) => any_ran |= ran,
                Err(e) => {
                    error!(task_id = task.task_id(), error = %e, "task run failed");
                }
            }
        }
        if any_ran {
            self.log_next_task();
        }
        Ok(())
    }

    /// Rebuilds the fleet wholesale from the registry. A row that fails to
    /// parse or names an unknown type is logged and skipped; the rest of the
    /// fleet still loads.
    async fn reload(&mut self) -> Result<(), FleetError> {
        let rows = self.running_tasks.list_all().await?;
        let mut active: Vec<Box<dyn FleetTask>> = Vec::with_capacity(rows.len());
        for row in rows {
            let parsed = serde_json::from_str::<Value>(&row.serialized_data)
                .map_err(|e| e.to_string())
                .and_then(|record| {
                    self.registry
                        .deserialize_task(&record)
                        .map_err(|e| e.to_string())
                });
            match parsed {
                Ok(task) => active.push(task),
                Err(details) => {
                    warn!(task_id = %row.task_id, error = %details, "skipping unloadable registry row");
                }
            }
        }
        info!(active = active.len(), "task fleet reloaded");
        self.active = active;
        Ok(())
    }

    fn log_next_task(&self) {
        let next = self
            .active
            .iter()
            .filter_map(|task| task.next_runtime().map(|runtime| (runtime, task.task_id())))
            .min_by_key(|(runtime, _)| *runtime);
        match next {
            Some((runtime, task_id)) => {
                info!(task_id, next_runtime = %runtime, "next scheduled task");
            }
            None => debug!("no scheduled runtimes remain"),
        }
    }
}
