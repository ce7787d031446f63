//! The competing-consumer dispatch worker.
//!
//! Each cycle claims a bounded batch of due queued rows, renders them, and
//! resolves each row according to the send mode. Claims are leased: if this
//! process dies mid-batch, its rows become reclaimable once the lease
//! expires, preserving at-least-once delivery.

use std::{str::FromStr, sync::Arc, time::Duration};

use chrono::Utc;
use herald_core::{
  outbox::OutboxMessage,
  store::{ClaimRequest, EngagementStore},
};
use thiserror::Error;
use tokio::{sync::watch, time::sleep};
use tracing::{debug, info, warn};

use crate::{
  render::TemplateRenderer,
  transport::{MailTransport, OutboundEmail},
};

const ERROR_BACKOFF: Duration = Duration::from_secs(2);

/// How the worker resolves claimed rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendMode {
  /// Log what would be sent, release the claim, transition nothing.
  Simulate,
  /// Send every message to the configured test address instead of the
  /// real recipient, then mark it sent.
  Redirect,
  /// Send to the real recipient.
  Live,
}

#[derive(Debug, Error)]
#[error("unknown send mode {0:?} (expected simulate, redirect, or live)")]
pub struct UnknownSendMode(String);

impl FromStr for SendMode {
  type Err = UnknownSendMode;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "simulate" => Ok(Self::Simulate),
      "redirect" => Ok(Self::Redirect),
      "live" => Ok(Self::Live),
      _ => Err(UnknownSendMode(s.to_owned())),
    }
  }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
  /// Claim token; distinct per worker process.
  pub worker_id:    String,
  pub mode:         SendMode,
  pub batch_size:   usize,
  pub poll_secs:    u64,
  /// A claim older than this is considered abandoned and reclaimable.
  pub lease_secs:   i64,
  /// Failures beyond this many attempts are terminal. 0 means the first
  /// failure is final.
  pub retry_limit:  i64,
  /// Required in redirect mode.
  pub test_address: Option<String>,
}

impl WorkerConfig {
  pub fn new(worker_id: impl Into<String>, mode: SendMode) -> Self {
    Self {
      worker_id: worker_id.into(),
      mode,
      batch_size: 25,
      poll_secs: 3,
      lease_secs: 300,
      retry_limit: 0,
      test_address: None,
    }
  }
}

#[derive(Debug, Error)]
pub enum WorkerSetupError {
  #[error("redirect mode requires a test address")]
  MissingTestAddress,

  #[error("batch size must be at least 1")]
  ZeroBatchSize,
}

/// Mode with its requirements already checked, so the hot path never has
/// to re-validate configuration.
enum Delivery {
  Simulate,
  Redirect(String),
  Live,
}

pub struct Worker<S, T, R> {
  store:     Arc<S>,
  transport: Arc<T>,
  renderer:  R,
  config:    WorkerConfig,
  delivery:  Delivery,
}

impl<S, T, R> Worker<S, T, R>
where
  S: EngagementStore,
  S::Error: std::error::Error + Send + Sync + 'static,
  T: MailTransport,
  R: TemplateRenderer,
{
  pub fn new(
    store: Arc<S>,
    transport: Arc<T>,
    renderer: R,
    config: WorkerConfig,
  ) -> Result<Self, WorkerSetupError> {
    if config.batch_size == 0 {
      return Err(WorkerSetupError::ZeroBatchSize);
    }
    let delivery = match config.mode {
      SendMode::Simulate => Delivery::Simulate,
      SendMode::Live => Delivery::Live,
      SendMode::Redirect => match config.test_address.clone() {
        Some(address) => Delivery::Redirect(address),
        None => return Err(WorkerSetupError::MissingTestAddress),
      },
    };
    Ok(Self { store, transport, renderer, config, delivery })
  }

  /// Run until `shutdown` flips to `true`. The in-flight message is
  /// finished; remaining claims from the batch are released.
  pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
    info!(
      worker = %self.config.worker_id,
      mode = ?self.config.mode,
      batch_size = self.config.batch_size,
      "worker started; polling outbox"
    );

    loop {
      if *shutdown.borrow() {
        break;
      }
      match self.cycle(&shutdown).await {
        Ok(0) => {
          tokio::select! {
            _ = sleep(self.idle_delay()) => {}
            _ = shutdown.changed() => {}
          }
        }
        Ok(processed) => {
          debug!(processed, "batch complete");
          // Simulate releases its rows back to the queue, so the next
          // cycle would claim them again immediately. Pace it like an
          // idle cycle instead of spinning on the same rows.
          if matches!(self.delivery, Delivery::Simulate) {
            tokio::select! {
              _ = sleep(self.idle_delay()) => {}
              _ = shutdown.changed() => {}
            }
          }
        }
        Err(error) => {
          // A failed cycle must not kill the worker; the claims it held
          // expire on their own.
          warn!(%error, "claim cycle failed; backing off");
          tokio::select! {
            _ = sleep(ERROR_BACKOFF) => {}
            _ = shutdown.changed() => {}
          }
        }
      }
    }

    info!(worker = %self.config.worker_id, "worker stopped");
  }

  fn idle_delay(&self) -> Duration {
    // Simulate mode has nobody waiting on it; poll less aggressively.
    let secs = match self.delivery {
      Delivery::Simulate => self.config.poll_secs * 5,
      _ => self.config.poll_secs,
    };
    Duration::from_secs(secs.max(1))
  }

  async fn cycle(&self, shutdown: &watch::Receiver<bool>) -> Result<usize, S::Error> {
    let batch = self
      .store
      .claim_due(ClaimRequest {
        worker_id:  self.config.worker_id.clone(),
        now:        Utc::now(),
        lease_secs: self.config.lease_secs,
        batch_size: self.config.batch_size,
      })
      .await?;

    if batch.is_empty() {
      return Ok(0);
    }

    let mut processed = 0;
    let mut remaining = batch.into_iter();
    while let Some(message) = remaining.next() {
      if *shutdown.borrow() {
        self.release(message.outbox_id).await?;
        for unprocessed in remaining.by_ref() {
          self.release(unprocessed.outbox_id).await?;
        }
        break;
      }
      self.process(message).await?;
      processed += 1;
    }

    Ok(processed)
  }

  async fn release(&self, outbox_id: i64) -> Result<(), S::Error> {
    if !self.store.release_claim(outbox_id, &self.config.worker_id).await? {
      warn!(outbox = outbox_id, "claim was lost before release");
    }
    Ok(())
  }

  async fn process(&self, message: OutboxMessage) -> Result<(), S::Error> {
    let rendered = self.renderer.render(&message.template_key, &message.payload);

    match &self.delivery {
      Delivery::Simulate => {
        info!(
          outbox = message.outbox_id,
          to = %message.payload.address,
          template = %message.template_key,
          subject = %rendered.subject,
          "simulate: would send"
        );
        self.release(message.outbox_id).await
      }
      Delivery::Redirect(address) => {
        let email = OutboundEmail {
          to:      address.clone(),
          subject: rendered.subject,
          body:    format!(
            "{}\n\n[redirected from {}]",
            rendered.body, message.payload.address
          ),
        };
        self.deliver(&message, email).await
      }
      Delivery::Live => {
        let email = OutboundEmail {
          to:      message.payload.address.clone(),
          subject: rendered.subject,
          body:    rendered.body,
        };
        self.deliver(&message, email).await
      }
    }
  }

  async fn deliver(
    &self,
    message: &OutboxMessage,
    email: OutboundEmail,
  ) -> Result<(), S::Error> {
    match self.transport.send(&email).await {
      Ok(()) => {
        let marked = self
          .store
          .mark_sent(message.outbox_id, &self.config.worker_id, Utc::now())
          .await?;
        if marked {
          info!(outbox = message.outbox_id, to = %email.to, "sent");
        } else {
          warn!(outbox = message.outbox_id, "claim was lost before mark_sent");
        }
      }
      Err(error) => {
        let status = self
          .store
          .record_failure(
            message.outbox_id,
            &self.config.worker_id,
            &error.to_string(),
            self.config.retry_limit,
          )
          .await?;
        warn!(
          outbox = message.outbox_id,
          to = %email.to,
          %error,
          status = ?status,
          "send failed"
        );
      }
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicUsize, Ordering};

  use herald_core::{
    campaign::{CampaignKind, NewCampaign},
    consent::{ConsentProof, ConsentPurpose, ConsentStatus, NewConsentEvent},
    customer::{Channel, NewCustomer, NewIdentity},
    enqueue::{self, EnqueueRequest},
    outbox::OutboxStatus,
  };
  use herald_store_sqlite::SqliteStore;

  use super::*;
  use crate::{
    render::{DefaultTemplates, RenderedEmail, TemplateRenderer},
    transport::memory::MemoryTransport,
  };

  /// Counts render calls; one render per processed row.
  struct CountingTemplates {
    renders: Arc<AtomicUsize>,
  }

  impl TemplateRenderer for CountingTemplates {
    fn render(
      &self,
      _template_key: &str,
      _payload: &herald_core::outbox::MessagePayload,
    ) -> RenderedEmail {
      self.renders.fetch_add(1, Ordering::SeqCst);
      RenderedEmail { subject: "s".into(), body: "b".into() }
    }
  }

  async fn seeded_store(recipients: &[&str]) -> SqliteStore {
    let store = SqliteStore::open_in_memory().await.unwrap();
    store
      .create_campaign(NewCampaign {
        name:         "Weekly promo".into(),
        kind:         CampaignKind::WeeklyPromo,
        channel:      Channel::Email,
        template_key: "weekly_promo_v1".into(),
      })
      .await
      .unwrap();

    for address in recipients {
      let customer = store
        .create_customer(NewCustomer::new("Test", "test"))
        .await
        .unwrap();
      store
        .try_insert_identity(NewIdentity {
          customer_id: customer.customer_id,
          channel:     Channel::Email,
          value:       (*address).into(),
          is_primary:  true,
        })
        .await
        .unwrap()
        .unwrap();
      store
        .append_consent(NewConsentEvent {
          customer_id: customer.customer_id,
          channel:     Channel::Email,
          purpose:     ConsentPurpose::Promotions,
          status:      ConsentStatus::Granted,
          proof:       ConsentProof::method("test"),
        })
        .await
        .unwrap();
    }

    let outcome = enqueue::run(&store, EnqueueRequest::weekly_email()).await.unwrap();
    assert_eq!(outcome.queued as usize, recipients.len());
    store
  }

  fn worker(
    store: &Arc<SqliteStore>,
    transport: &Arc<MemoryTransport>,
    mode: SendMode,
    test_address: Option<&str>,
  ) -> Worker<SqliteStore, MemoryTransport, DefaultTemplates> {
    let mut config = WorkerConfig::new("w1", mode);
    config.test_address = test_address.map(Into::into);
    Worker::new(
      store.clone(),
      transport.clone(),
      DefaultTemplates::new("https://example.test"),
      config,
    )
    .unwrap()
  }

  fn not_shutdown() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    // Keep the sender alive for the test's duration.
    std::mem::forget(tx);
    rx
  }

  async fn statuses(store: &SqliteStore) -> Vec<(OutboxStatus, u64)> {
    store.outbox_status_counts().await.unwrap()
  }

  #[tokio::test]
  async fn live_mode_sends_and_marks_sent() {
    let store = Arc::new(seeded_store(&["a@example.com", "b@example.com"]).await);
    let transport = Arc::new(MemoryTransport::new());
    let worker = worker(&store, &transport, SendMode::Live, None);

    let processed = worker.cycle(&not_shutdown()).await.unwrap();
    assert_eq!(processed, 2);

    let sent = transport.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().any(|e| e.to == "a@example.com"));
    assert_eq!(statuses(&store).await, vec![(OutboxStatus::Sent, 2)]);
  }

  #[tokio::test]
  async fn redirect_mode_overrides_recipient_and_annotates_body() {
    let store = Arc::new(seeded_store(&["real@example.com"]).await);
    let transport = Arc::new(MemoryTransport::new());
    let worker = worker(&store, &transport, SendMode::Redirect, Some("qa@example.com"));

    worker.cycle(&not_shutdown()).await.unwrap();

    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "qa@example.com");
    assert!(sent[0].body.contains("[redirected from real@example.com]"));
    assert_eq!(statuses(&store).await, vec![(OutboxStatus::Sent, 1)]);
  }

  #[tokio::test]
  async fn redirect_mode_requires_test_address() {
    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    let transport = Arc::new(MemoryTransport::new());
    let result = Worker::new(
      store,
      transport,
      DefaultTemplates::new("https://example.test"),
      WorkerConfig::new("w1", SendMode::Redirect),
    );
    assert!(matches!(result, Err(WorkerSetupError::MissingTestAddress)));
  }

  #[tokio::test]
  async fn simulate_mode_sends_nothing_and_releases_rows() {
    let store = Arc::new(seeded_store(&["a@example.com"]).await);
    let transport = Arc::new(MemoryTransport::new());
    let worker = worker(&store, &transport, SendMode::Simulate, None);

    let processed = worker.cycle(&not_shutdown()).await.unwrap();
    assert_eq!(processed, 1);
    assert!(transport.sent().is_empty());
    assert_eq!(statuses(&store).await, vec![(OutboxStatus::Queued, 1)]);

    // The released row is immediately claimable by another worker.
    let claimed = store
      .claim_due(ClaimRequest {
        worker_id:  "w2".into(),
        now:        Utc::now(),
        lease_secs: 300,
        batch_size: 10,
      })
      .await
      .unwrap();
    assert_eq!(claimed.len(), 1);
  }

  #[tokio::test]
  async fn transport_failure_marks_row_failed_with_reason() {
    let store = Arc::new(seeded_store(&["a@example.com"]).await);
    let transport = Arc::new(MemoryTransport::new());
    transport.fail_next();
    let worker = worker(&store, &transport, SendMode::Live, None);

    worker.cycle(&not_shutdown()).await.unwrap();

    let failed = store.recent_outbox(OutboxStatus::Failed, 10).await.unwrap();
    assert_eq!(failed.len(), 1);
    assert!(
      failed[0]
        .failure_reason
        .as_deref()
        .unwrap()
        .contains("injected failure")
    );

    // Terminal with the default retry limit: a later cycle sends nothing.
    let processed = worker.cycle(&not_shutdown()).await.unwrap();
    assert_eq!(processed, 0);
    assert!(transport.sent().is_empty());
  }

  #[tokio::test]
  async fn failure_in_batch_does_not_stop_the_rest() {
    let store = Arc::new(seeded_store(&["a@example.com", "b@example.com"]).await);
    let transport = Arc::new(MemoryTransport::new());
    transport.fail_next();
    let worker = worker(&store, &transport, SendMode::Live, None);

    let processed = worker.cycle(&not_shutdown()).await.unwrap();
    assert_eq!(processed, 2);
    assert_eq!(transport.sent().len(), 1);

    let counts = statuses(&store).await;
    assert!(counts.contains(&(OutboxStatus::Sent, 1)));
    assert!(counts.contains(&(OutboxStatus::Failed, 1)));
  }

  #[tokio::test]
  async fn shutdown_releases_unprocessed_claims() {
    let store = Arc::new(seeded_store(&["a@example.com", "b@example.com"]).await);
    let transport = Arc::new(MemoryTransport::new());
    let worker = worker(&store, &transport, SendMode::Live, None);

    let (tx, rx) = watch::channel(true);
    let processed = worker.cycle(&rx).await.unwrap();
    drop(tx);

    assert_eq!(processed, 0);
    assert!(transport.sent().is_empty());
    // Both rows are queued and unclaimed again.
    let claimed = store
      .claim_due(ClaimRequest {
        worker_id:  "w2".into(),
        now:        Utc::now(),
        lease_secs: 300,
        batch_size: 10,
      })
      .await
      .unwrap();
    assert_eq!(claimed.len(), 2);
  }

  #[tokio::test]
  async fn simulate_mode_idles_between_cycles() {
    let store = Arc::new(seeded_store(&["a@example.com"]).await);
    let transport = Arc::new(MemoryTransport::new());
    let renders = Arc::new(AtomicUsize::new(0));

    let mut config = WorkerConfig::new("w1", SendMode::Simulate);
    config.poll_secs = 1;
    let worker = Worker::new(
      store,
      transport,
      CountingTemplates { renders: renders.clone() },
      config,
    )
    .unwrap();

    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(async move { worker.run(rx).await });
    tokio::time::sleep(Duration::from_millis(500)).await;
    tx.send(true).unwrap();
    handle.await.unwrap();

    // The released row is claimable again at once; the worker must still
    // wait out the idle delay rather than re-render it in a tight loop.
    assert!(renders.load(Ordering::SeqCst) <= 2);
  }

  #[test]
  fn send_mode_parses_from_str() {
    assert_eq!("simulate".parse::<SendMode>().unwrap(), SendMode::Simulate);
    assert_eq!("REDIRECT".parse::<SendMode>().unwrap(), SendMode::Redirect);
    assert_eq!("Live".parse::<SendMode>().unwrap(), SendMode::Live);
    assert!("dry_run".parse::<SendMode>().is_err());
  }
}
