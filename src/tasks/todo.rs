//! Dated reminder task.
//!
//! A [`TodoTask`] carries a title and a target datetime and produces a [`Todo`]
//! every run. Paired with a [`TodoFormatter`] and a notifier it turns into a
//! recurring reminder; [`reminder_runtimes`] gives the usual lead-up schedule.

use async_trait::async_trait;
use chrono::{NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{FormatError, SerializationError};
use crate::notify::Formatter;
use crate::serialization::{require_str_field, Record, SerialRegistry};
use crate::tasks::task::{FleetTask, Runnable, TaskParts};

/// Wire format for the persisted `target_date` field.
const TARGET_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Human-facing format used in the produced result, e.g. `3 May 18:30`.
const DISPLAY_DATE_FORMAT: &str = "%-d %B %H:%M";

/// The result a [`TodoTask`] run produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Todo {
    pub title: String,
    /// Target datetime already rendered for display.
    pub date: String,
}

/// A reminder with a title and a target datetime in the schedule's timezone.
pub struct TodoTask {
    title: String,
    target_date: NaiveDateTime,
}

impl TodoTask {
    pub fn new(title: impl Into<String>, target_date: NaiveDateTime) -> Self {
        Self {
            title: title.into(),
            target_date,
        }
    }
}

#[async_trait]
impl Runnable for TodoTask {
    type Output = Todo;

    fn type_name(&self) -> &'static str {
        "TodoTask"
    }

    async fn run(&mut self) -> anyhow::Result<Todo> {
        Ok(Todo {
            title: self.title.clone(),
            date: self.target_date.format(DISPLAY_DATE_FORMAT).to_string(),
        })
    }

    fn fields(&self) -> Record {
        let mut fields = Record::new();
        fields.insert("title".to_string(), Value::String(self.title.clone()));
        fields.insert(
            "target_date".to_string(),
            Value::String(self.target_date.format(TARGET_DATE_FORMAT).to_string()),
        );
        fields
    }
}

/// Renders a [`Todo`] as a short multi-line reminder message.
pub struct TodoFormatter;

impl Formatter for TodoFormatter {
    fn type_name(&self) -> &'static str {
        "TodoFormatter"
    }

    fn format(&self, result: &Value) -> Result<String, FormatError> {
        let todo: Todo =
            serde_json::from_value(result.clone()).map_err(|e| FormatError::FormatFailed {
                type_name: self.type_name().to_string(),
                details: e.to_string(),
            })?;
        Ok(format!(
            "📝 *TODO*\n*Task:* {}\n*Date:* {}",
            todo.title, todo.date
        ))
    }

    fn fields(&self) -> Record {
        Record::new()
    }
}

/// The usual reminder lead-up for a target datetime: a week before, a day
/// before, and the target itself. Past entries are dropped by the schedule's
/// current-time adjustment.
pub fn reminder_runtimes(target_date: NaiveDateTime) -> Vec<NaiveDateTime> {
    vec![
        target_date - TimeDelta::days(7),
        target_date - TimeDelta::days(1),
        target_date,
    ]
}

pub fn deserialize_todo_task(
    registry: &SerialRegistry,
    fields: &Record,
) -> Result<Box<dyn FleetTask>, SerializationError> {
    const TYPE: &str = "TodoTask";
    let title = require_str_field(fields, TYPE, "title")?.to_string();
    let raw_date = require_str_field(fields, TYPE, "target_date")?;
    let target_date =
        NaiveDateTime::parse_from_str(raw_date, TARGET_DATE_FORMAT).map_err(|e| {
            SerializationError::InvalidField {
                type_name: TYPE.to_string(),
                field: "target_date",
                details: e.to_string(),
            }
        })?;
    let parts = TaskParts::from_record(registry, TYPE, fields)?;
    Ok(Box::new(parts.into_task(TodoTask::new(title, target_date))))
}

pub fn deserialize_todo_formatter(
    _fields: &Record,
) -> Result<Box<dyn Formatter>, SerializationError> {
    Ok(Box::new(TodoFormatter))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{Channel, WebhookNotifier};
    use crate::schedule::{Frequency, Schedule, ScheduleConfig, WEEKEND};
    use crate::tasks::task::{NotifyPolicy, Task};
    use chrono::NaiveDate;
    use serde_json::json;

    fn target() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 3)
            .unwrap()
            .and_hms_opt(18, 30, 0)
            .unwrap()
    }

    #[tokio::test]
    async fn run_renders_the_target_date() {
        let mut task = TodoTask::new("Pay rent", target());
        let todo = task.run().await.unwrap();
        assert_eq!(
            todo,
            Todo {
                title: "Pay rent".to_string(),
                date: "3 May 18:30".to_string(),
            }
        );
    }

    #[test]
    fn formatter_renders_a_reminder_message() {
        let result = json!({ "title": "Pay rent", "date": "3 May 18:30" });
        let text = TodoFormatter.format(&result).unwrap();
        assert_eq!(text, "📝 *TODO*\n*Task:* Pay rent\n*Date:* 3 May 18:30");
    }

    #[test]
    fn formatter_rejects_foreign_results() {
        let err = TodoFormatter.format(&json!({ "stars": 3 })).unwrap_err();
        assert!(matches!(err, FormatError::FormatFailed { .. }));
    }

    #[test]
    fn reminder_runtimes_lead_up_to_the_target() {
        let runtimes = reminder_runtimes(target());
        assert_eq!(runtimes.len(), 3);
        assert_eq!(runtimes[2], target());
        assert_eq!(runtimes[1], target() - TimeDelta::days(1));
        assert_eq!(runtimes[0], target() - TimeDelta::days(7));
    }

    #[tokio::test]
    async fn full_task_record_round_trips() {
        let schedule = Schedule::new(
            reminder_runtimes(target()),
            ScheduleConfig {
                frequency: Frequency::List,
                skip_days: Some(WEEKEND.to_vec()),
                adjust_to_current_time: false,
                ..ScheduleConfig::default()
            },
        )
        .unwrap();
        let channel = Channel::new(
            Box::new(TodoFormatter),
            Box::new(WebhookNotifier::new(vec![
                "https://hooks.example.com/reminders".to_string(),
            ])),
        );
        let task = Task::new(TodoTask::new("Pay rent", target()))
            .with_task_id("todo_task_0000abcd")
            .with_schedule(schedule)
            .with_channel(channel)
            .with_policy(NotifyPolicy::OnChange);

        let record = task.to_record().unwrap();
        let restored = SerialRegistry::standard().deserialize_task(&record).unwrap();

        assert_eq!(restored.task_id(), "todo_task_0000abcd");
        assert_eq!(restored.type_name(), "TodoTask");
        assert_eq!(restored.to_record().unwrap(), record);
    }
}
