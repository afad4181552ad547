use crate::errors::ConfigError;

type Result<T> = std::result::Result<T, ConfigError>;

/// Fleet polling interval configuration.
///
/// Wraps the number of seconds between fleet manager ticks. Must be at
/// least one second.
#[derive(Clone, Debug)]
pub struct TickInterval(u64);

impl Default for TickInterval {
    fn default() -> Self {
        Self(30)
    }
}

impl TryFrom<String> for TickInterval {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self> {
        let seconds = value
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidTickInterval {
                value: value.clone(),
            })?;
        if seconds == 0 {
            return Err(ConfigError::InvalidTickInterval { value });
        }
        Ok(Self(seconds))
    }
}

impl TickInterval {
    pub fn to_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.0)
    }
}

impl AsRef<u64> for TickInterval {
    fn as_ref(&self) -> &u64 {
        &self.0
    }
}

/// Main configuration structure for the argus service.
///
/// Loaded from environment variables with sensible defaults; no variable is
/// strictly required for a local run.
#[derive(Clone)]
pub struct Config {
    pub version: String,
    pub database_url: String,
    pub tick_interval: TickInterval,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// - `DATABASE_URL`: SQLite connection string, defaults to a local file.
    /// - `TICK_INTERVAL_SECONDS`: fleet polling interval, defaults to 30.
    pub fn new() -> Result<Self> {
        let database_url = default_env("DATABASE_URL", "sqlite:argus.db?mode=rwc");

        let tick_interval: TickInterval = {
            let env_value = optional_env("TICK_INTERVAL_SECONDS");
            if env_value.is_empty() {
                TickInterval::default()
            } else {
                env_value.try_into()?
            }
        };

        Ok(Self {
            version: version()?,
            database_url,
            tick_interval,
        })
    }
}

fn optional_env(name: &str) -> String {
    std::env::var(name).unwrap_or("".to_string())
}

fn default_env(name: &str, default_value: &str) -> String {
    std::env::var(name).unwrap_or(default_value.to_string())
}

/// Retrieves the service version from compile-time environment variables.
pub fn version() -> Result<String> {
    option_env!("GIT_HASH")
        .or(option_env!("CARGO_PKG_VERSION"))
        .map(|val| val.to_string())
        .ok_or(ConfigError::VersionNotAvailable)
}
