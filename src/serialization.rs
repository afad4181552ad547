//! Polymorphic serialization registry for persisted task state.
//!
//! Tasks, formatters, and notifiers are persisted as JSON objects carrying a
//! type discriminator under the reserved [`TYPE_KEY`]. The [`SerialRegistry`]
//! maps discriminators to factory functions so a stored blob can be
//! reconstructed as the correct concrete type. The registry is an explicit
//! object populated once at startup and passed into every deserialization;
//! there is no ambient global registration.
//!
//! Concrete types such as [`crate::schedule::Schedule`] carry no discriminator
//! and deserialize directly as the statically-expected type.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::errors::SerializationError;
use crate::notify::{Formatter, Notifier};
use crate::tasks::FleetTask;

/// Reserved record key holding the type discriminator.
pub const TYPE_KEY: &str = "__type";

/// A serialized entity: its own fields, optionally plus [`TYPE_KEY`].
pub type Record = Map<String, Value>;

/// Reconstructs a task from its fields. Receives the registry so nested
/// formatter and notifier records can be resolved recursively.
pub type TaskFactory =
    fn(&SerialRegistry, &Record) -> Result<Box<dyn FleetTask>, SerializationError>;

/// Reconstructs a formatter from its fields.
pub type FormatterFactory = fn(&Record) -> Result<Box<dyn Formatter>, SerializationError>;

/// Reconstructs a notifier from its fields.
pub type NotifierFactory = fn(&Record) -> Result<Box<dyn Notifier>, SerializationError>;

/// Discriminator-to-factory tables for every polymorphic entity kind.
///
/// Populated once before any deserialization occurs, then never mutated. Each
/// factory must consume exactly the field set its serializer produced, so
/// `deserialize(serialize(x))` is structurally equal to `x` for every
/// registered type.
pub struct SerialRegistry {
    tasks: HashMap<&'static str, TaskFactory>,
    formatters: HashMap<&'static str, FormatterFactory>,
    notifiers: HashMap<&'static str, NotifierFactory>,
}

impl SerialRegistry {
    pub fn new() -> Self {
        Self {
            tasks: HashMap::new(),
            formatters: HashMap::new(),
            notifiers: HashMap::new(),
        }
    }

    /// Registry with every type this crate ships built in.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register_task("TodoTask", crate::tasks::todo::deserialize_todo_task);
        registry.register_formatter(
            "SimpleFormatter",
            crate::notify::deserialize_simple_formatter,
        );
        registry.register_formatter("TodoFormatter", crate::tasks::todo::deserialize_todo_formatter);
        registry.register_notifier("WebhookNotifier", crate::notify::deserialize_webhook_notifier);
        registry
    }

    pub fn register_task(&mut self, type_name: &'static str, factory: TaskFactory) {
        self.tasks.insert(type_name, factory);
    }

    pub fn register_formatter(&mut self, type_name: &'static str, factory: FormatterFactory) {
        self.formatters.insert(type_name, factory);
    }

    pub fn register_notifier(&mut self, type_name: &'static str, factory: NotifierFactory) {
        self.notifiers.insert(type_name, factory);
    }

    /// Reconstructs a task from a full polymorphic record.
    pub fn deserialize_task(
        &self,
        record: &Value,
    ) -> Result<Box<dyn FleetTask>, SerializationError> {
        let (type_name, fields) = split_discriminator(record, "task")?;
        let factory = self
            .tasks
            .get(type_name)
            .ok_or_else(|| SerializationError::UnknownType {
                type_name: type_name.to_string(),
            })?;
        factory(self, fields)
    }

    pub fn deserialize_formatter(
        &self,
        record: &Value,
    ) -> Result<Box<dyn Formatter>, SerializationError> {
        let (type_name, fields) = split_discriminator(record, "formatter")?;
        let factory =
            self.formatters
                .get(type_name)
                .ok_or_else(|| SerializationError::UnknownType {
                    type_name: type_name.to_string(),
                })?;
        factory(fields)
    }

    pub fn deserialize_notifier(
        &self,
        record: &Value,
    ) -> Result<Box<dyn Notifier>, SerializationError> {
        let (type_name, fields) = split_discriminator(record, "notifier")?;
        let factory =
            self.notifiers
                .get(type_name)
                .ok_or_else(|| SerializationError::UnknownType {
                    type_name: type_name.to_string(),
                })?;
        factory(fields)
    }
}

impl Default for SerialRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Wraps an entity's fields into a full record by embedding the discriminator.
pub fn serialize_polymorphic(type_name: &str, mut fields: Record) -> Value {
    fields.insert(TYPE_KEY.to_string(), Value::String(type_name.to_string()));
    Value::Object(fields)
}

/// Splits a polymorphic record into its discriminator and remaining fields.
///
/// Polymorphic entities have no statically-expected concrete type, so a
/// missing discriminator is an error here; `expected_kind` only labels the
/// error message.
fn split_discriminator<'a>(
    record: &'a Value,
    expected_kind: &'static str,
) -> Result<(&'a str, &'a Record), SerializationError> {
    let fields = record.as_object().ok_or(SerializationError::NotAnObject)?;
    let type_name = fields
        .get(TYPE_KEY)
        .and_then(Value::as_str)
        .ok_or(SerializationError::MissingField {
            type_name: expected_kind.to_string(),
            field: TYPE_KEY,
        })?;
    Ok((type_name, fields))
}

/// Fetches a required field from a record.
pub fn require_field<'a>(
    fields: &'a Record,
    type_name: &str,
    field: &'static str,
) -> Result<&'a Value, SerializationError> {
    fields.get(field).ok_or(SerializationError::MissingField {
        type_name: type_name.to_string(),
        field,
    })
}

/// Fetches a required string field from a record.
pub fn require_str_field<'a>(
    fields: &'a Record,
    type_name: &str,
    field: &'static str,
) -> Result<&'a str, SerializationError> {
    require_field(fields, type_name, field)?
        .as_str()
        .ok_or_else(|| SerializationError::InvalidField {
            type_name: type_name.to_string(),
            field,
            details: "expected a string".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_discriminator_fails() {
        let registry = SerialRegistry::standard();
        let record = json!({ TYPE_KEY: "RemovedTask", "task_id": "removed_task_00000000" });
        let err = registry.deserialize_task(&record).unwrap_err();
        assert!(matches!(
            err,
            SerializationError::UnknownType { type_name } if type_name == "RemovedTask"
        ));
    }

    #[test]
    fn missing_discriminator_fails_for_polymorphic_records() {
        let registry = SerialRegistry::standard();
        let record = json!({ "task_id": "anonymous_00000000" });
        let err = registry.deserialize_task(&record).unwrap_err();
        assert!(matches!(
            err,
            SerializationError::MissingField { field: TYPE_KEY, .. }
        ));
    }

    #[test]
    fn non_object_record_fails() {
        let registry = SerialRegistry::standard();
        let err = registry.deserialize_task(&json!(["not", "a", "record"])).unwrap_err();
        assert!(matches!(err, SerializationError::NotAnObject));
    }

    #[test]
    fn formatter_round_trip() {
        let registry = SerialRegistry::standard();
        for record in [
            json!({ TYPE_KEY: "SimpleFormatter" }),
            json!({ TYPE_KEY: "TodoFormatter" }),
        ] {
            let formatter = registry.deserialize_formatter(&record).unwrap();
            let restored = serialize_polymorphic(formatter.type_name(), formatter.fields());
            assert_eq!(record, restored);
        }
    }

    #[test]
    fn notifier_round_trip() {
        let registry = SerialRegistry::standard();
        let record = json!({
            TYPE_KEY: "WebhookNotifier",
            "webhooks": ["https://hooks.example.com/a", "https://hooks.example.com/b"],
            "username": "argus",
        });
        let notifier = registry.deserialize_notifier(&record).unwrap();
        let restored = serialize_polymorphic(notifier.type_name(), notifier.fields());
        assert_eq!(record, restored);
    }
}
