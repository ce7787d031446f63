//! Eligibility resolution and deduplicated enqueueing.
//!
//! Thin service over the store: resolve the active campaign for the
//! requested programme, then hand the set-oriented insert to the backend.
//! "No active campaign" is an outcome with a reason, not an error.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::{
  campaign::CampaignKind,
  consent::ConsentPurpose,
  customer::Channel,
  store::{EngagementStore, EnqueueSpec},
};

/// What to enqueue. `template_key` defaults to the campaign's own template;
/// `scheduled_for` defaults to now (send immediately).
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
  pub kind:          CampaignKind,
  pub channel:       Channel,
  pub template_key:  Option<String>,
  pub scheduled_for: Option<DateTime<Utc>>,
}

impl EnqueueRequest {
  pub fn weekly_email() -> Self {
    Self {
      kind:          CampaignKind::WeeklyPromo,
      channel:       Channel::Email,
      template_key:  None,
      scheduled_for: None,
    }
  }
}

/// Structured result of an enqueue invocation.
#[derive(Debug, Clone, Serialize)]
pub struct EnqueueOutcome {
  pub queued:        u64,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub scheduled_for: Option<DateTime<Utc>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub reason:        Option<String>,
}

impl EnqueueOutcome {
  fn skipped(reason: impl Into<String>) -> Self {
    Self { queued: 0, scheduled_for: None, reason: Some(reason.into()) }
  }
}

/// Resolve the active campaign and enqueue one deduplicated message per
/// eligible customer. Idempotent per (template key, schedule) slot: a repeat
/// invocation inserts nothing and reports `queued: 0`.
pub async fn run<S: EngagementStore>(
  store: &S,
  request: EnqueueRequest,
) -> Result<EnqueueOutcome, S::Error> {
  let Some(campaign) = store.active_campaign(request.kind, request.channel).await? else {
    return Ok(EnqueueOutcome::skipped(format!(
      "no active {} {} campaign",
      request.kind.discriminant(),
      request.channel.discriminant(),
    )));
  };

  let template_key = request
    .template_key
    .unwrap_or_else(|| campaign.template_key.clone());
  let scheduled_for = request.scheduled_for.unwrap_or_else(Utc::now);

  let queued = store
    .enqueue_campaign(EnqueueSpec {
      campaign_id: campaign.campaign_id,
      channel: campaign.channel,
      purpose: ConsentPurpose::Promotions,
      template_key: template_key.clone(),
      scheduled_for,
    })
    .await?;

  info!(
    campaign = %campaign.campaign_id,
    template = %template_key,
    %scheduled_for,
    queued,
    "enqueue complete"
  );

  Ok(EnqueueOutcome { queued, scheduled_for: Some(scheduled_for), reason: None })
}
