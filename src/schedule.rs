//! Recurring schedule computation with timezone handling and exclusion filters.
//!
//! A [`Schedule`] owns a sorted list of timezone-aware candidate runtimes, a
//! [`ScheduleConfig`], and a cursor pointing at the next runtime. Advancement
//! either walks the explicit runtime list or repeatedly adds a fixed calendar
//! delta, skipping runtimes disqualified by the day/month exclusion filters.
//! A schedule whose cursor becomes `None` is exhausted and never fires again.

use chrono::{DateTime, Datelike, Days, Months, NaiveDateTime, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::errors::{ScheduleError, SerializationError};
use crate::serialization::require_field;

/// Upper bound on consecutive fixed-delta advancement candidates. Exceeding it
/// means the exclusion filters reject every reachable runtime (for example
/// `skip_days` covering all seven weekdays) and advancement fails fatally.
pub const MAX_ADVANCE_ATTEMPTS: u32 = 1000;

const DEFAULT_TIMEZONE: &str = "Europe/Sofia";

/// How the next runtime is derived from the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Minutely,
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Annually,
    /// Walk the supplied runtime list instead of adding a calendar delta.
    List,
}

impl Frequency {
    /// Adds one calendar delta to `from`. Daily and weekly steps preserve the
    /// local wall-clock time across DST transitions; monthly and annual steps
    /// move by civil months. Returns `None` for [`Frequency::List`] and on
    /// arithmetic overflow.
    fn checked_step(self, from: DateTime<Tz>) -> Option<DateTime<Tz>> {
        match self {
            Frequency::Minutely => from.checked_add_signed(TimeDelta::minutes(1)),
            Frequency::Hourly => from.checked_add_signed(TimeDelta::hours(1)),
            Frequency::Daily => from.checked_add_days(Days::new(1)),
            Frequency::Weekly => from.checked_add_days(Days::new(7)),
            Frequency::Monthly => from.checked_add_months(Months::new(1)),
            Frequency::Annually => from.checked_add_months(Months::new(12)),
            Frequency::List => None,
        }
    }
}

/// Weekday used by the `skip_days` exclusion filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Day {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl Day {
    pub const ALL: [Day; 7] = [
        Day::Monday,
        Day::Tuesday,
        Day::Wednesday,
        Day::Thursday,
        Day::Friday,
        Day::Saturday,
        Day::Sunday,
    ];

    fn from_weekday(weekday: chrono::Weekday) -> Day {
        match weekday {
            chrono::Weekday::Mon => Day::Monday,
            chrono::Weekday::Tue => Day::Tuesday,
            chrono::Weekday::Wed => Day::Wednesday,
            chrono::Weekday::Thu => Day::Thursday,
            chrono::Weekday::Fri => Day::Friday,
            chrono::Weekday::Sat => Day::Saturday,
            chrono::Weekday::Sun => Day::Sunday,
        }
    }
}

/// Weekend days, the most common `skip_days` value.
pub const WEEKEND: [Day; 2] = [Day::Saturday, Day::Sunday];

/// Month used by the `skip_months` exclusion filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Month {
    January,
    February,
    March,
    April,
    May,
    June,
    July,
    August,
    September,
    October,
    November,
    December,
}

impl Month {
    /// Converts a one-based month index as returned by [`Datelike::month`].
    fn from_index(index: u32) -> Option<Month> {
        Some(match index {
            1 => Month::January,
            2 => Month::February,
            3 => Month::March,
            4 => Month::April,
            5 => Month::May,
            6 => Month::June,
            7 => Month::July,
            8 => Month::August,
            9 => Month::September,
            10 => Month::October,
            11 => Month::November,
            12 => Month::December,
            _ => return None,
        })
    }
}

/// Immutable schedule configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_frequency")]
    pub frequency: Frequency,
    /// IANA timezone name the runtimes are expressed in.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Fast-forward past anchor runtimes that are already in the past, so the
    /// first real firing is in the future. Disabled in tests and backfills
    /// that want an immediately-due past runtime.
    #[serde(default = "default_true")]
    pub adjust_to_current_time: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_days: Option<Vec<Day>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_months: Option<Vec<Month>>,
}

fn default_frequency() -> Frequency {
    Frequency::List
}

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

fn default_true() -> bool {
    true
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            frequency: default_frequency(),
            timezone: default_timezone(),
            adjust_to_current_time: true,
            skip_days: None,
            skip_months: None,
        }
    }
}

/// A recurring schedule: candidate runtimes plus an advancing cursor.
///
/// The runtime list is sorted ascending at construction. The cursor
/// `next_runtime` is always either a reachable runtime or `None`, and once it
/// becomes `None` the schedule is terminal.
#[derive(Debug, Clone, PartialEq)]
pub struct Schedule {
    runtimes: Vec<DateTime<Tz>>,
    config: ScheduleConfig,
    tz: Tz,
    next_runtime: Option<DateTime<Tz>>,
}

impl Schedule {
    /// Builds a schedule from naive civil datetimes, localizing them into the
    /// configured timezone. Fails on an empty runtime list, an unknown
    /// timezone, a runtime falling into a DST gap, or when the initial
    /// fast-forward cannot find a valid runtime.
    pub fn new(
        runtimes: Vec<NaiveDateTime>,
        config: ScheduleConfig,
    ) -> Result<Self, ScheduleError> {
        let tz = parse_timezone(&config.timezone)?;
        if runtimes.is_empty() {
            return Err(ScheduleError::EmptyRuntimes);
        }
        let mut localized = runtimes
            .into_iter()
            .map(|naive| {
                tz.from_local_datetime(&naive).earliest().ok_or_else(|| {
                    ScheduleError::UnrepresentableLocalTime {
                        timezone: config.timezone.clone(),
                        datetime: naive.to_string(),
                    }
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        localized.sort();

        let next_runtime = Some(localized[0]);
        let mut schedule = Self {
            runtimes: localized,
            config,
            tz,
            next_runtime,
        };
        if schedule.config.adjust_to_current_time {
            while let Some(next) = schedule.next_runtime {
                if next >= schedule.now() {
                    break;
                }
                schedule.advance()?;
            }
        }
        Ok(schedule)
    }

    /// Reassembles a schedule from persisted parts, preserving the cursor
    /// exactly as stored. Never re-runs the current-time adjustment, so a
    /// reconstructed schedule equals the one that was serialized.
    fn from_parts(
        runtimes: Vec<DateTime<Tz>>,
        config: ScheduleConfig,
        next_runtime: Option<DateTime<Tz>>,
    ) -> Result<Self, ScheduleError> {
        let tz = parse_timezone(&config.timezone)?;
        if runtimes.is_empty() {
            return Err(ScheduleError::EmptyRuntimes);
        }
        Ok(Self {
            runtimes,
            config,
            tz,
            next_runtime,
        })
    }

    /// Current time in the schedule's configured timezone.
    pub fn now(&self) -> DateTime<Tz> {
        Utc::now().with_timezone(&self.tz)
    }

    /// The next candidate runtime, or `None` when exhausted.
    pub fn next_runtime(&self) -> Option<DateTime<Tz>> {
        self.next_runtime
    }

    pub fn is_exhausted(&self) -> bool {
        self.next_runtime.is_none()
    }

    /// True when the next runtime has passed in the configured timezone.
    pub fn is_due(&self) -> bool {
        matches!(self.next_runtime, Some(next) if self.now() >= next)
    }

    fn is_valid_runtime(&self, runtime: &DateTime<Tz>) -> bool {
        if let Some(skip_days) = &self.config.skip_days {
            if skip_days.contains(&Day::from_weekday(runtime.weekday())) {
                return false;
            }
        }
        if let Some(skip_months) = &self.config.skip_months {
            let month = Month::from_index(runtime.month());
            if month.is_some_and(|m| skip_months.contains(&m)) {
                return false;
            }
        }
        true
    }

    /// Moves the cursor to the next valid runtime.
    ///
    /// List frequency takes the smallest list entry strictly greater than the
    /// current cursor that passes the exclusion filters, exhausting the
    /// schedule when none remains. Fixed-delta frequencies repeatedly add the
    /// calendar delta until a candidate passes, bounded by
    /// [`MAX_ADVANCE_ATTEMPTS`]. Exhausted schedules stay exhausted.
    pub fn advance(&mut self) -> Result<(), ScheduleError> {
        let Some(current) = self.next_runtime else {
            return Ok(());
        };

        if self.config.frequency == Frequency::List {
            self.next_runtime = self
                .runtimes
                .iter()
                .find(|runtime| **runtime > current && self.is_valid_runtime(runtime))
                .copied();
            return Ok(());
        }

        let mut candidate = self.step(current)?;
        for _ in 0..MAX_ADVANCE_ATTEMPTS {
            if self.is_valid_runtime(&candidate) {
                self.next_runtime = Some(candidate);
                return Ok(());
            }
            candidate = self.step(candidate)?;
        }
        Err(ScheduleError::UnboundedAdvancement {
            attempts: MAX_ADVANCE_ATTEMPTS,
        })
    }

    fn step(&self, from: DateTime<Tz>) -> Result<DateTime<Tz>, ScheduleError> {
        // List frequency never reaches here, so None can only mean overflow.
        self.config
            .frequency
            .checked_step(from)
            .ok_or_else(|| ScheduleError::RuntimeOverflow {
                from: from.to_rfc3339(),
            })
    }

    /// Serializes to a plain JSON record. Schedules are concrete, so the
    /// record carries no type discriminator.
    pub fn to_record(&self) -> Value {
        json!({
            "runtimes": self
                .runtimes
                .iter()
                .map(|runtime| runtime.to_rfc3339())
                .collect::<Vec<_>>(),
            "config": self.config,
            "next_runtime": self.next_runtime.map(|runtime| runtime.to_rfc3339()),
        })
    }

    /// Reconstructs a schedule from a record produced by [`Schedule::to_record`].
    pub fn from_record(record: &Value) -> Result<Self, SerializationError> {
        const TYPE: &str = "Schedule";
        let fields = record.as_object().ok_or(SerializationError::NotAnObject)?;

        let config: ScheduleConfig =
            serde_json::from_value(require_field(fields, TYPE, "config")?.clone()).map_err(
                |e| SerializationError::InvalidField {
                    type_name: TYPE.to_string(),
                    field: "config",
                    details: e.to_string(),
                },
            )?;
        let tz = parse_timezone(&config.timezone)?;

        let raw_runtimes = require_field(fields, TYPE, "runtimes")?
            .as_array()
            .ok_or_else(|| SerializationError::InvalidField {
                type_name: TYPE.to_string(),
                field: "runtimes",
                details: "expected an array".to_string(),
            })?;
        let runtimes = raw_runtimes
            .iter()
            .map(|value| {
                let text = value.as_str().ok_or_else(|| invalid_runtime("not a string"))?;
                parse_runtime(text, &tz)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let next_runtime = match require_field(fields, TYPE, "next_runtime")? {
            Value::Null => None,
            value => {
                let text = value.as_str().ok_or_else(|| invalid_runtime("not a string"))?;
                Some(parse_runtime(text, &tz)?)
            }
        };

        Ok(Self::from_parts(runtimes, config, next_runtime)?)
    }
}

impl std::fmt::Display for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.next_runtime {
            Some(next) => write!(f, "{}", next.format("%Y-%m-%d %H:%M:%S")),
            None => write!(f, "exhausted"),
        }
    }
}

fn parse_timezone(name: &str) -> Result<Tz, ScheduleError> {
    name.parse::<Tz>()
        .map_err(|_| ScheduleError::UnknownTimezone {
            name: name.to_string(),
        })
}

fn parse_runtime(text: &str, tz: &Tz) -> Result<DateTime<Tz>, SerializationError> {
    DateTime::parse_from_rfc3339(text)
        .map(|parsed| parsed.with_timezone(tz))
        .map_err(|e| invalid_runtime(&e.to_string()))
}

fn invalid_runtime(details: &str) -> SerializationError {
    SerializationError::InvalidField {
        type_name: "Schedule".to_string(),
        field: "runtimes",
        details: details.to_string(),
    }
}
