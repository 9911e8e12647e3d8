//! Settings loaded from `config.toml`, the environment and `.env`.
//!
//! Every key has a default, so a missing `config.toml` is fine. Environment variables override the
//! file using the `ATTENDANCE__<SECTION>__<KEY>` form, and `DATABASE_URL` overrides
//! `database.url`.

use crate::records::CheckInPolicy;
use crate::scheduler::SchedulerConfig;
use crate::time::{offset_from_minutes, parse_time};
use crate::{Error, Result};
use ::config::{Config, Environment, File};
use chrono::Duration;
use serde::Deserialize;
use std::env;

/// One day.
const MAX_LATE_THRESHOLD_MINUTES: i64 = 24 * 60;
/// Roughly ten years.
const MAX_FINALIZE_AFTER_DAYS: i64 = 3_650;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub attendance: AttendanceSettings,
    pub scheduler: SchedulerSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub url: String,
    /// How long SQLite waits on a locked database before failing the call.
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: "attendance.db".to_string(),
            busy_timeout_ms: 5_000,
        }
    }
}

impl DatabaseSettings {
    /// A private, throwaway database.
    pub fn in_memory() -> Self {
        Self {
            url: ":memory:".to_string(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AttendanceSettings {
    pub late_threshold_minutes: i64,
}

impl Default for AttendanceSettings {
    fn default() -> Self {
        Self {
            late_threshold_minutes: 15,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// The school's time zone as minutes east of UTC.
    pub utc_offset_minutes: i32,
    pub end_of_day_at: String,
    pub finalization_at: String,
    pub finalize_after_days: i64,
    pub poll_interval_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            utc_offset_minutes: 0,
            end_of_day_at: "23:59".to_string(),
            finalization_at: "00:15".to_string(),
            finalize_after_days: 3,
            poll_interval_secs: 30,
        }
    }
}

impl Settings {
    /// Loads the settings from `config.toml` in the working directory and the environment.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut builder = Config::builder()
            .add_source(File::with_name("config").required(false))
            .add_source(
                Environment::with_prefix("ATTENDANCE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        if let Ok(url) = env::var("DATABASE_URL") {
            builder = builder.set_override("database.url", url)?;
        }

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;

        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        self.check_in_policy()?;
        self.scheduler_config()?;
        Ok(())
    }

    pub fn check_in_policy(&self) -> Result<CheckInPolicy> {
        let minutes = self.attendance.late_threshold_minutes;
        let late_threshold = Duration::try_minutes(minutes)
            .filter(|_| (0..=MAX_LATE_THRESHOLD_MINUTES).contains(&minutes))
            .ok_or_else(|| {
                Error::Validation(format!(
                    "attendance.late_threshold_minutes must be between 0 and \
                     {MAX_LATE_THRESHOLD_MINUTES}, got {minutes}"
                ))
            })?;

        Ok(CheckInPolicy {
            late_threshold,
            utc_offset: offset_from_minutes(self.scheduler.utc_offset_minutes)?,
        })
    }

    pub fn scheduler_config(&self) -> Result<SchedulerConfig> {
        let scheduler = &self.scheduler;

        let days = scheduler.finalize_after_days;
        let finalize_after = Duration::try_days(days)
            .filter(|_| (0..=MAX_FINALIZE_AFTER_DAYS).contains(&days))
            .ok_or_else(|| {
                Error::Validation(format!(
                    "scheduler.finalize_after_days must be between 0 and \
                     {MAX_FINALIZE_AFTER_DAYS}, got {days}"
                ))
            })?;

        if scheduler.poll_interval_secs == 0 {
            return Err(Error::Validation(
                "scheduler.poll_interval_secs must be at least 1".to_string(),
            ));
        }

        Ok(SchedulerConfig {
            utc_offset: offset_from_minutes(scheduler.utc_offset_minutes)?,
            end_of_day_at: parse_time(&scheduler.end_of_day_at)?,
            finalization_at: parse_time(&scheduler.finalization_at)?,
            finalize_after,
            poll_interval: std::time::Duration::from_secs(scheduler.poll_interval_secs),
        })
    }
}
