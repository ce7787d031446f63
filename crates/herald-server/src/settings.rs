//! Typed configuration: TOML file plus `HERALD_`-prefixed environment
//! overrides (`HERALD_WORKER__MODE=live` targets `[worker] mode`).
//!
//! Anything a subcommand cannot run without is validated here, at startup,
//! so misconfiguration fails fast instead of surfacing mid-batch.

use std::path::{Path, PathBuf};

use chrono::Weekday;
use herald_dispatch::{
  SmtpConfig, WorkerConfig,
  scheduler::WeeklySchedule,
  worker::SendMode,
};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
  #[error(transparent)]
  Load(#[from] config::ConfigError),

  #[error("unknown worker mode {0:?} (expected simulate, redirect, or live)")]
  UnknownMode(String),

  #[error("unknown schedule weekday {0:?}")]
  UnknownWeekday(String),

  #[error("schedule hour {0} is out of range (0-23)")]
  HourOutOfRange(u32),

  #[error("worker mode {0:?} requires [smtp] configuration")]
  SmtpRequired(&'static str),

  #[error("redirect mode requires worker.test_address")]
  TestAddressRequired,
}

fn default_host() -> String { "127.0.0.1".into() }
fn default_port() -> u16 { 8000 }
fn default_store_path() -> PathBuf { PathBuf::from("herald.db") }
fn default_base_url() -> String { "http://127.0.0.1:8000".into() }
fn default_true() -> bool { true }

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
  #[serde(default = "default_host")]
  pub host:       String,
  #[serde(default = "default_port")]
  pub port:       u16,
  #[serde(default = "default_store_path")]
  pub store_path: PathBuf,
  /// Public base URL, used for unsubscribe links in rendered mail.
  #[serde(default = "default_base_url")]
  pub base_url:   String,
  #[serde(default)]
  pub admin_key:  Option<String>,
  #[serde(default)]
  pub webhook:    WebhookSettings,
  #[serde(default)]
  pub worker:     WorkerSettings,
  #[serde(default)]
  pub smtp:       Option<SmtpSettings>,
  #[serde(default)]
  pub schedule:   ScheduleSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookSettings {
  #[serde(default)]
  pub secret:            Option<String>,
  #[serde(default)]
  pub verify_token:      Option<String>,
  #[serde(default = "default_true")]
  pub verify_signatures: bool,
}

impl Default for WebhookSettings {
  fn default() -> Self {
    Self { secret: None, verify_token: None, verify_signatures: true }
  }
}

fn default_worker_id() -> String {
  format!("worker-{}", std::process::id())
}
fn default_mode() -> String { "simulate".into() }
fn default_batch_size() -> usize { 25 }
fn default_poll_secs() -> u64 { 3 }
fn default_lease_secs() -> i64 { 300 }

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerSettings {
  #[serde(default = "default_worker_id")]
  pub worker_id:    String,
  #[serde(default = "default_mode")]
  pub mode:         String,
  #[serde(default = "default_batch_size")]
  pub batch_size:   usize,
  #[serde(default = "default_poll_secs")]
  pub poll_secs:    u64,
  #[serde(default = "default_lease_secs")]
  pub lease_secs:   i64,
  #[serde(default)]
  pub retry_limit:  i64,
  #[serde(default)]
  pub test_address: Option<String>,
}

impl Default for WorkerSettings {
  fn default() -> Self {
    Self {
      worker_id:    default_worker_id(),
      mode:         default_mode(),
      batch_size:   default_batch_size(),
      poll_secs:    default_poll_secs(),
      lease_secs:   default_lease_secs(),
      retry_limit:  0,
      test_address: None,
    }
  }
}

fn default_smtp_port() -> u16 { 587 }
fn default_from_name() -> String { "Herald".into() }
fn default_smtp_timeout() -> u64 { 20 }

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpSettings {
  pub host:         String,
  #[serde(default = "default_smtp_port")]
  pub port:         u16,
  pub username:     String,
  pub password:     String,
  #[serde(default = "default_from_name")]
  pub from_name:    String,
  pub from_address: String,
  #[serde(default = "default_smtp_timeout")]
  pub timeout_secs: u64,
}

fn default_weekday() -> String { "mon".into() }
fn default_hour() -> u32 { 13 }

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleSettings {
  #[serde(default = "default_weekday")]
  pub weekday: String,
  /// UTC hour of day.
  #[serde(default = "default_hour")]
  pub hour:    u32,
}

impl Default for ScheduleSettings {
  fn default() -> Self {
    Self { weekday: default_weekday(), hour: default_hour() }
  }
}

impl Settings {
  pub fn load(path: &Path) -> Result<Self, SettingsError> {
    let settings = config::Config::builder()
      .add_source(config::File::from(path.to_path_buf()).required(false))
      .add_source(config::Environment::with_prefix("HERALD").separator("__"))
      .build()?
      .try_deserialize()?;
    Ok(settings)
  }

  pub fn send_mode(&self) -> Result<SendMode, SettingsError> {
    self
      .worker
      .mode
      .parse()
      .map_err(|_| SettingsError::UnknownMode(self.worker.mode.clone()))
  }

  /// Worker configuration with mode requirements checked.
  pub fn worker_config(&self) -> Result<WorkerConfig, SettingsError> {
    let mode = self.send_mode()?;
    if mode == SendMode::Redirect && self.worker.test_address.is_none() {
      return Err(SettingsError::TestAddressRequired);
    }
    Ok(WorkerConfig {
      worker_id: self.worker.worker_id.clone(),
      mode,
      batch_size: self.worker.batch_size,
      poll_secs: self.worker.poll_secs,
      lease_secs: self.worker.lease_secs,
      retry_limit: self.worker.retry_limit,
      test_address: self.worker.test_address.clone(),
    })
  }

  /// SMTP configuration, required in any mode that actually sends.
  pub fn smtp_config(&self) -> Result<SmtpConfig, SettingsError> {
    let mode_name = match self.send_mode()? {
      SendMode::Simulate => return Err(SettingsError::SmtpRequired("simulate")),
      SendMode::Redirect => "redirect",
      SendMode::Live => "live",
    };
    let smtp = self
      .smtp
      .as_ref()
      .ok_or(SettingsError::SmtpRequired(mode_name))?;
    Ok(SmtpConfig {
      host:         smtp.host.clone(),
      port:         smtp.port,
      username:     smtp.username.clone(),
      password:     smtp.password.clone(),
      from_name:    smtp.from_name.clone(),
      from_address: smtp.from_address.clone(),
      timeout_secs: smtp.timeout_secs,
    })
  }

  pub fn weekly_schedule(&self) -> Result<WeeklySchedule, SettingsError> {
    let weekday: Weekday = self
      .schedule
      .weekday
      .parse()
      .map_err(|_| SettingsError::UnknownWeekday(self.schedule.weekday.clone()))?;
    if !herald_core::schedule::valid_hour(self.schedule.hour) {
      return Err(SettingsError::HourOutOfRange(self.schedule.hour));
    }
    Ok(WeeklySchedule { weekday, hour: self.schedule.hour })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn base_settings() -> Settings {
    Settings {
      host:       default_host(),
      port:       default_port(),
      store_path: default_store_path(),
      base_url:   default_base_url(),
      admin_key:  None,
      webhook:    WebhookSettings::default(),
      worker:     WorkerSettings::default(),
      smtp:       None,
      schedule:   ScheduleSettings::default(),
    }
  }

  #[test]
  fn defaults_are_simulate_monday_1300() {
    let settings = base_settings();
    assert_eq!(settings.send_mode().unwrap(), SendMode::Simulate);
    let schedule = settings.weekly_schedule().unwrap();
    assert_eq!(schedule.weekday, Weekday::Mon);
    assert_eq!(schedule.hour, 13);
  }

  #[test]
  fn redirect_without_test_address_is_rejected() {
    let mut settings = base_settings();
    settings.worker.mode = "redirect".into();
    assert!(matches!(
      settings.worker_config(),
      Err(SettingsError::TestAddressRequired)
    ));
  }

  #[test]
  fn live_mode_requires_smtp() {
    let mut settings = base_settings();
    settings.worker.mode = "live".into();
    assert!(matches!(
      settings.smtp_config(),
      Err(SettingsError::SmtpRequired("live"))
    ));
  }

  #[test]
  fn out_of_range_hour_is_rejected() {
    let mut settings = base_settings();
    settings.schedule.hour = 24;
    assert!(matches!(
      settings.weekly_schedule(),
      Err(SettingsError::HourOutOfRange(24))
    ));
  }
}
