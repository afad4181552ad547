//! End-to-end fleet lifecycle against SQLite: provision a task, let the fleet
//! pick it up and run it, then remove it and watch the fleet shrink.

use std::sync::Arc;

use argus::schedule::{Frequency, Schedule, ScheduleConfig};
use argus::serialization::SerialRegistry;
use argus::storage::{
    ResultStore, RunningTaskStore, SqliteResultStore, SqliteRunningTaskStore,
};
use argus::tasks::{FleetManager, FleetTask, Task, TodoTask};
use chrono::{NaiveDate, NaiveDateTime};
use sqlx::sqlite::SqlitePoolOptions;
use tokio_util::sync::CancellationToken;

fn naive(y: i32, m: u32, d: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .unwrap()
        .and_hms_opt(9, 0, 0)
        .unwrap()
}

fn serialized_todo(task_id: &str) -> String {
    let schedule = Schedule::new(
        vec![naive(2023, 1, 2)],
        ScheduleConfig {
            frequency: Frequency::List,
            adjust_to_current_time: false,
            ..ScheduleConfig::default()
        },
    )
    .unwrap();
    Task::new(TodoTask::new("File the report", naive(2023, 1, 2)))
        .with_task_id(task_id)
        .with_schedule(schedule)
        .to_record()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn provisioned_task_runs_and_is_removable() {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();

    let running_tasks = SqliteRunningTaskStore::new(pool.clone());
    running_tasks.initialize_schema().await.unwrap();
    let results = SqliteResultStore::new(pool.clone());
    results.initialize_schema().await.unwrap();

    let running_tasks = Arc::new(running_tasks);
    let results = Arc::new(results);

    running_tasks
        .upsert("todo_task_11111111", &serialized_todo("todo_task_11111111"))
        .await
        .unwrap();

    let mut manager = FleetManager::new(
        running_tasks.clone(),
        results.clone(),
        Arc::new(SerialRegistry::standard()),
        CancellationToken::new(),
    );

    manager.tick().await.unwrap();
    assert_eq!(manager.active_tasks().len(), 1);

    let latest = results
        .latest("todo_task_11111111")
        .await
        .unwrap()
        .expect("the due task should have produced a result");
    assert!(latest.result.contains("File the report"));

    running_tasks.remove("todo_task_11111111").await.unwrap();
    manager.tick().await.unwrap();
    assert!(manager.active_tasks().is_empty());
}
