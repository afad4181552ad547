//! Task lifecycle: scheduling gate, execution, persistence, and notification.
//!
//! A [`Task`] composes a [`Runnable`] payload with an optional [`Schedule`],
//! an optional formatter/notifier [`Channel`], and a [`NotifyPolicy`]. Policy
//! variation is a strategy on the one concrete task type, not a subclass
//! hierarchy: `Always` notifies after every run, `OnChange` compares the new
//! result's serialized form against the last persisted one and stays quiet
//! when nothing changed. Results are persisted unconditionally either way;
//! the result store is an audit trail, not a notification log.

use async_trait::async_trait;
use chrono::DateTime;
use chrono_tz::Tz;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::errors::{SerializationError, TaskError};
use crate::notify::Channel;
use crate::schedule::Schedule;
use crate::serialization::{serialize_polymorphic, Record, SerialRegistry};
use crate::storage::ResultStore;

/// The unit-of-work capability: produces a typed result when run.
///
/// Implementations also describe their own serialized fields so the owning
/// task can persist them; the task base fields (`task_id`, schedule, channel,
/// policy) are handled by [`Task`] itself.
#[async_trait]
pub trait Runnable: Send + Sync + 'static {
    type Output: Serialize + Send + Sync;

    /// Discriminator under which the owning task is registered.
    fn type_name(&self) -> &'static str;

    async fn run(&mut self) -> anyhow::Result<Self::Output>;

    /// The runnable's own serialized fields, without the task base fields.
    fn fields(&self) -> Record;
}

/// When to invoke the formatter/notifier pair after a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyPolicy {
    /// Notify after every run.
    #[default]
    Always,
    /// Notify only when the serialized result differs from the last persisted
    /// one. The first-ever run always notifies.
    OnChange,
}

/// A schedulable unit of work.
pub struct Task<R: Runnable> {
    task_id: String,
    schedule: Option<Schedule>,
    channel: Option<Channel>,
    policy: NotifyPolicy,
    runner: R,
}

impl<R: Runnable> Task<R> {
    /// Creates a task with a generated `task_id` and no schedule or channel.
    /// A task without a schedule is always due and runs on every tick.
    pub fn new(runner: R) -> Self {
        let task_id = generate_task_id(runner.type_name());
        Self {
            task_id,
            schedule: None,
            channel: None,
            policy: NotifyPolicy::Always,
            runner,
        }
    }

    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = task_id.into();
        self
    }

    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = Some(schedule);
        self
    }

    pub fn with_channel(mut self, channel: Channel) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn with_policy(mut self, policy: NotifyPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn schedule(&self) -> Option<&Schedule> {
        self.schedule.as_ref()
    }

    pub fn policy(&self) -> NotifyPolicy {
        self.policy
    }

    fn is_due(&self) -> bool {
        match &self.schedule {
            None => true,
            Some(schedule) => schedule.is_due(),
        }
    }

    async fn on_run_completed(
        &self,
        result: &Value,
        results: &dyn ResultStore,
    ) -> Result<(), TaskError> {
        // The prior row must be read before the new one is appended.
        let should_notify = match self.policy {
            NotifyPolicy::Always => true,
            NotifyPolicy::OnChange => {
                let previous = results.latest(&self.task_id).await.map_err(|e| {
                    TaskError::Storage {
                        task_id: self.task_id.clone(),
                        source: e,
                    }
                })?;
                match previous {
                    None => true,
                    Some(row) => match serde_json::from_str::<Value>(&row.result) {
                        Ok(previous_result) => previous_result != *result,
                        Err(e) => {
                            warn!(
                                task_id = %self.task_id,
                                error = %e,
                                "previous result is unparsable, treating as changed"
                            );
                            true
                        }
                    },
                }
            }
        };

        results
            .append(&self.task_id, result)
            .await
            .map_err(|e| TaskError::Storage {
                task_id: self.task_id.clone(),
                source: e,
            })?;

        if !should_notify {
            debug!(task_id = %self.task_id, "result unchanged, skipping notification");
            return Ok(());
        }
        if let Some(channel) = &self.channel {
            let text = channel
                .formatter
                .format(result)
                .map_err(|e| TaskError::Format {
                    task_id: self.task_id.clone(),
                    source: e,
                })?;
            channel
                .notifier
                .notify(&text)
                .await
                .map_err(|e| TaskError::Notification {
                    task_id: self.task_id.clone(),
                    source: e,
                })?;
            info!(task_id = %self.task_id, "notification sent");
        }
        Ok(())
    }
}

/// Object-safe task surface the fleet manager works with.
#[async_trait]
pub trait FleetTask: Send + Sync {
    fn task_id(&self) -> &str;

    /// Discriminator of the concrete task type.
    fn type_name(&self) -> &'static str;

    /// Next scheduled runtime; `None` when unscheduled or exhausted.
    fn next_runtime(&self) -> Option<DateTime<Tz>>;

    /// Runs the task when due: executes, persists, notifies per policy, and
    /// advances the schedule. Returns whether the task ran.
    async fn run_if_due(&mut self, results: &dyn ResultStore) -> Result<bool, TaskError>;

    /// Full polymorphic serialization, including nested schedule, formatter,
    /// and notifier records.
    fn to_record(&self) -> Result<Value, SerializationError>;
}

impl std::fmt::Debug for dyn FleetTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FleetTask")
            .field("task_id", &self.task_id())
            .field("type_name", &self.type_name())
            .finish()
    }
}

#[async_trait]
impl<R: Runnable> FleetTask for Task<R> {
    fn task_id(&self) -> &str {
        &self.task_id
    }

    fn type_name(&self) -> &'static str {
        self.runner.type_name()
    }

    fn next_runtime(&self) -> Option<DateTime<Tz>> {
        self.schedule.as_ref().and_then(Schedule::next_runtime)
    }

    async fn run_if_due(&mut self, results: &dyn ResultStore) -> Result<bool, TaskError> {
        if !self.is_due() {
            return Ok(false);
        }
        info!(task_id = %self.task_id, task_type = self.runner.type_name(), "task running");
        let output = self
            .runner
            .run()
            .await
            .map_err(|e| TaskError::Execution {
                task_id: self.task_id.clone(),
                details: e.to_string(),
            })?;
        let result = serde_json::to_value(&output).map_err(|e| TaskError::Serialization {
            task_id: self.task_id.clone(),
            source: SerializationError::Json {
                data_type: self.runner.type_name().to_string(),
                source: e,
            },
        })?;
        self.on_run_completed(&result, results).await?;
        if let Some(schedule) = &mut self.schedule {
            schedule.advance().map_err(|e| TaskError::Schedule {
                task_id: self.task_id.clone(),
                source: e,
            })?;
        }
        info!(task_id = %self.task_id, "task finished");
        Ok(true)
    }

    fn to_record(&self) -> Result<Value, SerializationError> {
        let mut fields = self.runner.fields();
        fields.insert("task_id".to_string(), Value::String(self.task_id.clone()));
        if let Some(schedule) = &self.schedule {
            fields.insert("schedule".to_string(), schedule.to_record());
        }
        if let Some(channel) = &self.channel {
            fields.insert(
                "formatter".to_string(),
                serialize_polymorphic(channel.formatter.type_name(), channel.formatter.fields()),
            );
            fields.insert(
                "notifier".to_string(),
                serialize_polymorphic(channel.notifier.type_name(), channel.notifier.fields()),
            );
        }
        fields.insert(
            "notify_policy".to_string(),
            serde_json::to_value(self.policy).map_err(|e| SerializationError::Json {
                data_type: "NotifyPolicy".to_string(),
                source: e,
            })?,
        );
        Ok(serialize_polymorphic(self.runner.type_name(), fields))
    }
}

/// Task base fields extracted from a serialized record, shared by every
/// concrete task factory.
pub struct TaskParts {
    pub task_id: Option<String>,
    pub schedule: Option<Schedule>,
    pub channel: Option<Channel>,
    pub policy: NotifyPolicy,
}

impl TaskParts {
    /// Reads the base fields out of a task record, resolving the nested
    /// formatter and notifier through the registry.
    pub fn from_record(
        registry: &SerialRegistry,
        type_name: &str,
        fields: &Record,
    ) -> Result<Self, SerializationError> {
        let task_id = match fields.get("task_id") {
            None => None,
            Some(value) => Some(
                value
                    .as_str()
                    .ok_or_else(|| SerializationError::InvalidField {
                        type_name: type_name.to_string(),
                        field: "task_id",
                        details: "expected a string".to_string(),
                    })?
                    .to_string(),
            ),
        };

        let schedule = fields
            .get("schedule")
            .map(Schedule::from_record)
            .transpose()?;

        let channel = match (fields.get("formatter"), fields.get("notifier")) {
            (None, None) => None,
            (Some(formatter), Some(notifier)) => Some(Channel::new(
                registry.deserialize_formatter(formatter)?,
                registry.deserialize_notifier(notifier)?,
            )),
            (Some(_), None) => {
                return Err(SerializationError::MissingField {
                    type_name: type_name.to_string(),
                    field: "notifier",
                })
            }
            (None, Some(_)) => {
                return Err(SerializationError::MissingField {
                    type_name: type_name.to_string(),
                    field: "formatter",
                })
            }
        };

        let policy = match fields.get("notify_policy") {
            None => NotifyPolicy::default(),
            Some(value) => serde_json::from_value(value.clone()).map_err(|e| {
                SerializationError::InvalidField {
                    type_name: type_name.to_string(),
                    field: "notify_policy",
                    details: e.to_string(),
                }
            })?,
        };

        Ok(Self {
            task_id,
            schedule,
            channel,
            policy,
        })
    }

    /// Assembles the concrete task around its reconstructed runnable.
    pub fn into_task<R: Runnable>(self, runner: R) -> Task<R> {
        let mut task = Task::new(runner).with_policy(self.policy);
        if let Some(task_id) = self.task_id {
            task = task.with_task_id(task_id);
        }
        if let Some(schedule) = self.schedule {
            task = task.with_schedule(schedule);
        }
        if let Some(channel) = self.channel {
            task = task.with_channel(channel);
        }
        task
    }
}

/// Generates `<snake_case_type_name>_<8 hex chars>`.
pub fn generate_task_id(type_name: &str) -> String {
    format!("{}_{:08x}", snake_case(type_name), rand::random::<u32>())
}

fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, ch) in name.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{FormatError, NotifyError};
    use crate::notify::Formatter;
    use crate::notify::Notifier;
    use crate::schedule::{Frequency, ScheduleConfig};
    use crate::storage::MemoryResultStore;
    use chrono::NaiveDate;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    struct SequenceRunner {
        outputs: VecDeque<Value>,
    }

    impl SequenceRunner {
        fn new(outputs: &[Value]) -> Self {
            Self {
                outputs: outputs.iter().cloned().collect(),
            }
        }
    }

    #[async_trait]
    impl Runnable for SequenceRunner {
        type Output = Value;

        fn type_name(&self) -> &'static str {
            "SequenceRunner"
        }

        async fn run(&mut self) -> anyhow::Result<Value> {
            self.outputs
                .pop_front()
                .ok_or_else(|| anyhow::anyhow!("sequence exhausted"))
        }

        fn fields(&self) -> Record {
            Record::new()
        }
    }

    struct RecordingNotifier {
        sent: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        fn type_name(&self) -> &'static str {
            "RecordingNotifier"
        }

        async fn notify(&self, text: &str) -> Result<(), NotifyError> {
            self.sent.lock().unwrap().push(text.to_string());
            Ok(())
        }

        fn fields(&self) -> Record {
            Record::new()
        }
    }

    struct PassthroughFormatter;

    impl Formatter for PassthroughFormatter {
        fn type_name(&self) -> &'static str {
            "PassthroughFormatter"
        }

        fn format(&self, result: &Value) -> Result<String, FormatError> {
            Ok(result.to_string())
        }

        fn fields(&self) -> Record {
            Record::new()
        }
    }

    fn recording_channel() -> (Channel, Arc<Mutex<Vec<String>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let channel = Channel::new(
            Box::new(PassthroughFormatter),
            Box::new(RecordingNotifier { sent: sent.clone() }),
        );
        (channel, sent)
    }

    fn past_schedule() -> Schedule {
        Schedule::new(
            vec![NaiveDate::from_ymd_opt(2023, 1, 1)
                .unwrap()
                .and_hms_opt(9, 0, 0)
                .unwrap()],
            ScheduleConfig {
                frequency: Frequency::List,
                adjust_to_current_time: false,
                ..ScheduleConfig::default()
            },
        )
        .unwrap()
    }

    fn future_schedule() -> Schedule {
        Schedule::new(
            vec![NaiveDate::from_ymd_opt(2100, 1, 1)
                .unwrap()
                .and_hms_opt(9, 0, 0)
                .unwrap()],
            ScheduleConfig {
                frequency: Frequency::List,
                adjust_to_current_time: false,
                ..ScheduleConfig::default()
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn unscheduled_task_runs_every_tick() {
        let store = MemoryResultStore::new();
        let mut task = Task::new(SequenceRunner::new(&[json!(1), json!(2)]));
        assert!(task.run_if_due(&store).await.unwrap());
        assert!(task.run_if_due(&store).await.unwrap());
        assert_eq!(store.history(task.task_id(), 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn future_schedule_is_not_due() {
        let store = MemoryResultStore::new();
        let mut task =
            Task::new(SequenceRunner::new(&[json!(1)])).with_schedule(future_schedule());
        assert!(!task.run_if_due(&store).await.unwrap());
        assert!(store.latest(task.task_id()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn schedule_advances_after_run() {
        let store = MemoryResultStore::new();
        let mut task =
            Task::new(SequenceRunner::new(&[json!(1)])).with_schedule(past_schedule());
        assert!(task.run_if_due(&store).await.unwrap());
        assert!(task.schedule().unwrap().is_exhausted());
        assert!(!task.run_if_due(&store).await.unwrap());
        assert_eq!(store.history(task.task_id(), 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn always_policy_notifies_every_run() {
        let store = MemoryResultStore::new();
        let (channel, sent) = recording_channel();
        let mut task = Task::new(SequenceRunner::new(&[json!("a"), json!("a")]))
            .with_channel(channel);
        task.run_if_due(&store).await.unwrap();
        task.run_if_due(&store).await.unwrap();
        assert_eq!(sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn on_change_policy_suppresses_identical_results() {
        let store = MemoryResultStore::new();
        let (channel, sent) = recording_channel();
        let mut task = Task::new(SequenceRunner::new(&[
            json!({ "stars": 10 }),
            json!({ "stars": 10 }),
            json!({ "stars": 11 }),
        ]))
        .with_channel(channel)
        .with_policy(NotifyPolicy::OnChange);

        task.run_if_due(&store).await.unwrap();
        task.run_if_due(&store).await.unwrap();
        task.run_if_due(&store).await.unwrap();

        // First run notifies, identical second run does not, changed third does.
        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], r#"{"stars":10}"#);
        assert_eq!(sent[1], r#"{"stars":11}"#);

        // Persistence is not gated on change.
        assert_eq!(store.history(task.task_id(), 10).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn execution_failure_surfaces_as_task_error() {
        let store = MemoryResultStore::new();
        let mut task = Task::new(SequenceRunner::new(&[]));
        let err = task.run_if_due(&store).await.unwrap_err();
        assert!(matches!(err, TaskError::Execution { .. }));
    }

    #[test]
    fn generated_task_ids_have_snake_prefix_and_hex_suffix() {
        let task_id = generate_task_id("SequenceRunner");
        let (prefix, suffix) = task_id.rsplit_once('_').unwrap();
        assert_eq!(prefix, "sequence_runner");
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
