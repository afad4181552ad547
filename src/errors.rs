use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("error-argus-config-1 Invalid tick interval: {value}")]
    InvalidTickInterval { value: String },

    #[error("error-argus-config-2 Invalid environment variable {var_name}: {details}")]
    InvalidEnvVar { var_name: String, details: String },

    #[error("error-argus-config-3 Version not available")]
    VersionNotAvailable,
}

#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("error-argus-schedule-1 Schedule requires at least one runtime")]
    EmptyRuntimes,

    #[error("error-argus-schedule-2 Unknown timezone: {name}")]
    UnknownTimezone { name: String },

    #[error("error-argus-schedule-3 Local time {datetime} is unrepresentable in {timezone}")]
    UnrepresentableLocalTime { timezone: String, datetime: String },

    #[error(
        "error-argus-schedule-4 No valid runtime found within {attempts} advancement attempts"
    )]
    UnboundedAdvancement { attempts: u32 },

    #[error("error-argus-schedule-5 Runtime arithmetic overflowed past {from}")]
    RuntimeOverflow { from: String },
}

#[derive(Error, Debug)]
pub enum SerializationError {
    #[error("error-argus-serialization-1 Unknown type discriminator: {type_name}")]
    UnknownType { type_name: String },

    #[error("error-argus-serialization-2 Record is not a JSON object")]
    NotAnObject,

    #[error("error-argus-serialization-3 Missing field {field} in {type_name} record")]
    MissingField {
        type_name: String,
        field: &'static str,
    },

    #[error("error-argus-serialization-4 Invalid field {field} in {type_name} record: {details}")]
    InvalidField {
        type_name: String,
        field: &'static str,
        details: String,
    },

    #[error("error-argus-serialization-5 JSON serialization failed: {data_type}: {source}")]
    Json {
        data_type: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("error-argus-serialization-6 Schedule reconstruction failed: {source}")]
    Schedule {
        #[from]
        source: ScheduleError,
    },
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("error-argus-storage-1 Database connection failed: {source}")]
    ConnectionFailed {
        #[source]
        source: sqlx::Error,
    },

    #[error("error-argus-storage-2 Query execution failed: {source}")]
    QueryFailed {
        #[source]
        source: sqlx::Error,
    },

    #[error("error-argus-storage-3 Invalid stored data: {details}")]
    InvalidStoredData { details: String },
}

#[derive(Error, Debug)]
pub enum FormatError {
    #[error("error-argus-format-1 Formatter {type_name} failed: {details}")]
    FormatFailed { type_name: String, details: String },
}

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("error-argus-notify-1 Message length {length} exceeds limit of {limit} characters")]
    MessageTooLong { length: usize, limit: usize },

    #[error("error-argus-notify-2 Webhook delivery to {url} failed: {source}")]
    DeliveryFailed {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("error-argus-task-1 Task {task_id} execution failed: {details}")]
    Execution { task_id: String, details: String },

    #[error("error-argus-task-2 Task {task_id} result formatting failed: {source}")]
    Format {
        task_id: String,
        #[source]
        source: FormatError,
    },

    #[error("error-argus-task-3 Task {task_id} notification failed: {source}")]
    Notification {
        task_id: String,
        #[source]
        source: NotifyError,
    },

    #[error("error-argus-task-4 Task {task_id} result persistence failed: {source}")]
    Storage {
        task_id: String,
        #[source]
        source: StorageError,
    },

    #[error("error-argus-task-5 Task {task_id} schedule advancement failed: {source}")]
    Schedule {
        task_id: String,
        #[source]
        source: ScheduleError,
    },

    #[error("error-argus-task-6 Task {task_id} result serialization failed: {source}")]
    Serialization {
        task_id: String,
        #[source]
        source: SerializationError,
    },
}
