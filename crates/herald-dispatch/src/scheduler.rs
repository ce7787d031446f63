//! The weekly scheduler loop.
//!
//! Sleeps until the next configured occurrence, runs the enqueue, repeats.
//! Timing lives in [`herald_core::schedule`]; this module is only the loop.

use std::time::Duration;

use chrono::{Utc, Weekday};
use herald_core::{
  enqueue::{self, EnqueueRequest},
  schedule,
  store::EngagementStore,
};
use tokio::{sync::watch, time::sleep};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy)]
pub struct WeeklySchedule {
  pub weekday: Weekday,
  /// UTC hour of day, validated at configuration load.
  pub hour:    u32,
}

/// Run the weekly enqueue at each occurrence until `shutdown` flips.
///
/// The enqueue is idempotent per slot, so a scheduler restarted shortly
/// before an occurrence cannot double-queue anything.
pub async fn run_weekly<S>(store: &S, schedule: WeeklySchedule, mut shutdown: watch::Receiver<bool>)
where
  S: EngagementStore,
  S::Error: std::error::Error,
{
  loop {
    if *shutdown.borrow() {
      break;
    }

    let now = Utc::now();
    let next = schedule::next_occurrence(now, schedule.weekday, schedule.hour);
    let wait = schedule::seconds_until(now, schedule.weekday, schedule.hour);
    info!(%next, wait_secs = wait, "scheduler sleeping until next occurrence");

    tokio::select! {
      _ = sleep(Duration::from_secs(wait)) => {}
      _ = shutdown.changed() => continue,
    }

    let request = EnqueueRequest {
      scheduled_for: Some(next),
      ..EnqueueRequest::weekly_email()
    };
    match enqueue::run(store, request).await {
      Ok(outcome) => info!(
        queued = outcome.queued,
        reason = outcome.reason.as_deref().unwrap_or(""),
        "weekly enqueue ran"
      ),
      Err(error) => warn!(%error, "weekly enqueue failed; will retry next occurrence"),
    }
  }

  info!("scheduler stopped");
}
