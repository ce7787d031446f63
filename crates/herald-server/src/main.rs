//! Herald server binary.
//!
//! One binary, four roles:
//!
//! - `herald serve`    — the JSON API (signup, unsubscribe, webhook, admin)
//! - `herald worker`   — the outbox dispatch worker
//! - `herald enqueue`  — run the weekly enqueue once and print the outcome
//! - `herald schedule` — the weekly scheduler loop
//!
//! All roles read `config.toml` (or `--config <path>`) with `HERALD_`
//! environment overrides.

mod settings;

use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use herald_core::enqueue::{self, EnqueueRequest};
use herald_dispatch::{
  DefaultTemplates, DisabledTransport, SmtpTransport, Worker,
  scheduler::{self, WeeklySchedule},
  worker::SendMode,
};
use herald_store_sqlite::SqliteStore;
use tokio::{net::TcpListener, sync::watch};
use tower_http::trace::TraceLayer;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;

use crate::settings::Settings;

#[derive(Parser)]
#[command(author, version, about = "Herald customer engagement backend")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Serve the JSON API.
  Serve,
  /// Run the outbox dispatch worker.
  Worker,
  /// Run the weekly enqueue once and print the outcome.
  Enqueue {
    /// Override the campaign's template key.
    #[arg(long)]
    template: Option<String>,
    /// Schedule slot (RFC 3339); defaults to now.
    #[arg(long)]
    at: Option<DateTime<Utc>>,
  },
  /// Run the weekly scheduler loop.
  Schedule,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let settings = Settings::load(&cli.config).context("failed to load configuration")?;

  let store = SqliteStore::open(&settings.store_path)
    .await
    .with_context(|| format!("failed to open store at {:?}", settings.store_path))?;
  let store = Arc::new(store);

  match cli.command {
    Command::Serve => serve(settings, store).await,
    Command::Worker => run_worker(settings, store).await,
    Command::Enqueue { template, at } => run_enqueue(store, template, at).await,
    Command::Schedule => run_schedule(settings, store).await,
  }
}

async fn serve(settings: Settings, store: Arc<SqliteStore>) -> anyhow::Result<()> {
  let state = herald_api::ApiState {
    store,
    config: Arc::new(herald_api::ApiConfig {
      admin_key:            settings.admin_key.clone(),
      webhook_secret:       settings.webhook.secret.clone(),
      webhook_verify_token: settings.webhook.verify_token.clone(),
      verify_signatures:    settings.webhook.verify_signatures,
    }),
  };

  let app = herald_api::api_router(state).layer(TraceLayer::new_for_http());
  let address = format!("{}:{}", settings.host, settings.port);

  info!("listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app)
    .with_graceful_shutdown(async {
      wait_for_ctrl_c().await;
      info!("shutting down");
    })
    .await
    .context("server error")?;

  Ok(())
}

async fn run_worker(settings: Settings, store: Arc<SqliteStore>) -> anyhow::Result<()> {
  let config = settings.worker_config()?;
  let templates = DefaultTemplates::new(settings.base_url.clone());
  let shutdown = shutdown_channel();

  // The transport type differs per mode, so each arm builds and runs its
  // own worker.
  match config.mode {
    SendMode::Simulate => {
      let worker = Worker::new(store, Arc::new(DisabledTransport), templates, config)?;
      worker.run(shutdown).await;
    }
    SendMode::Redirect | SendMode::Live => {
      let transport = Arc::new(SmtpTransport::new(settings.smtp_config()?));
      let worker = Worker::new(store, transport, templates, config)?;
      worker.run(shutdown).await;
    }
  }

  Ok(())
}

async fn run_enqueue(
  store: Arc<SqliteStore>,
  template: Option<String>,
  at: Option<DateTime<Utc>>,
) -> anyhow::Result<()> {
  let outcome = enqueue::run(store.as_ref(), EnqueueRequest {
    template_key: template,
    scheduled_for: at,
    ..EnqueueRequest::weekly_email()
  })
  .await
  .context("enqueue failed")?;

  println!("{}", serde_json::to_string_pretty(&outcome)?);
  Ok(())
}

async fn run_schedule(settings: Settings, store: Arc<SqliteStore>) -> anyhow::Result<()> {
  let schedule: WeeklySchedule = settings.weekly_schedule()?;
  let shutdown = shutdown_channel();
  scheduler::run_weekly(store.as_ref(), schedule, shutdown).await;
  Ok(())
}

/// A watch channel that flips to `true` on Ctrl-C.
fn shutdown_channel() -> watch::Receiver<bool> {
  let (tx, rx) = watch::channel(false);
  tokio::spawn(async move {
    wait_for_ctrl_c().await;
    info!("shutdown requested");
    let _ = tx.send(true);
    // Keep the sender alive so the flag stays observable.
    std::future::pending::<()>().await;
  });
  rx
}

async fn wait_for_ctrl_c() {
  if let Err(error) = tokio::signal::ctrl_c().await {
    tracing::error!(%error, "failed to listen for ctrl-c");
  }
}
