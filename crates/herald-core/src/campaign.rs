//! Campaigns — the named send programmes the enqueuer resolves against.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::customer::Channel;

/// The recurring programme a campaign belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignKind {
  WeeklyPromo,
}

impl CampaignKind {
  pub fn discriminant(self) -> &'static str {
    match self {
      Self::WeeklyPromo => "weekly_promo",
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
  pub campaign_id:  Uuid,
  pub name:         String,
  pub kind:         CampaignKind,
  pub channel:      Channel,
  pub template_key: String,
  pub is_active:    bool,
  pub created_at:   DateTime<Utc>,
}

/// Input to [`crate::store::EngagementStore::create_campaign`].
/// New campaigns start active.
#[derive(Debug, Clone)]
pub struct NewCampaign {
  pub name:         String,
  pub kind:         CampaignKind,
  pub channel:      Channel,
  pub template_key: String,
}
