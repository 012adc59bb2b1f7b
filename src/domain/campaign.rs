//! Campaign types: classification labels, drafts, rendered messages,
//! and the persisted campaign row.
//!
//! `NeedCategory` is derived per (vehicle, date) and never stored; the
//! persisted `Campaign` row is the unit of delivery and idempotency.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a workflow run was initiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// Periodic lifecycle sweep
    Scheduled,

    /// Weather conditions warrant a location-wide campaign
    WeatherAlert,

    /// An upcoming observance warrants a location-wide campaign
    Holiday,

    /// Operator-initiated run
    Manual,
}

impl Trigger {
    /// True for triggers that target every customer in a location
    /// regardless of service need.
    pub fn is_location_wide(self) -> bool {
        matches!(self, Self::WeatherAlert | Self::Holiday)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::WeatherAlert => "weather_alert",
            Self::Holiday => "holiday",
            Self::Manual => "manual",
        }
    }
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Service urgency of a vehicle at a point in time.
///
/// Computed from vehicle dates against a reference date; recomputed each
/// run, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NeedCategory {
    /// next_service_due is in the past
    OverdueService,

    /// next_service_due falls within the upcoming window (boundary inclusive)
    UpcomingService,

    /// warranty_end falls within the expiry window
    WarrantyExpiring,

    /// No qualifying window; excluded from targeting output
    NoNeed,
}

impl NeedCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OverdueService => "overdue_service",
            Self::UpcomingService => "upcoming_service",
            Self::WarrantyExpiring => "warranty_expiring",
            Self::NoNeed => "no_need",
        }
    }
}

impl std::fmt::Display for NeedCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The reason a customer was targeted: a derived service need for
/// lifecycle runs, or the run trigger itself for location-wide runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    Category(NeedCategory),
    Trigger(Trigger),
}

impl Reason {
    /// Stable label used in campaign rows, identifiers, and logs.
    pub fn slug(self) -> &'static str {
        match self {
            Self::Category(c) => c.as_str(),
            Self::Trigger(t) => t.as_str(),
        }
    }
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.slug())
    }
}

/// Unrendered content for one reason, shared by every matching customer
/// in a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignDraft {
    /// The reason this draft was composed for
    pub reason: Reason,

    /// Campaign title (internal, not sent)
    pub title: String,

    /// Subject line template with {{placeholder}} tokens
    pub subject: String,

    /// Body template with {{placeholder}} tokens
    pub body: String,

    /// True when the static fallback template was used instead of
    /// generated content
    pub fallback: bool,
}

/// A draft after customer-specific placeholder substitution, ready for
/// dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderedCampaign {
    /// Idempotency key; generated exactly once per (run, customer, reason)
    pub campaign_id: String,

    pub customer_id: i64,

    pub vehicle_id: Option<i64>,

    pub recipient_email: String,

    pub recipient_name: String,

    pub reason: Reason,

    pub title: String,

    pub subject: String,

    pub body: String,

    pub location: Option<String>,

    pub trigger: Trigger,
}

/// Delivery lifecycle of a persisted campaign.
///
/// Transitions move strictly forward: pending → sent → opened → clicked,
/// or pending → failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Pending,
    Sent,
    Opened,
    Clicked,
    Failed,
}

impl CampaignStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Opened => "opened",
            Self::Clicked => "clicked",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "sent" => Some(Self::Sent),
            "opened" => Some(Self::Opened),
            "clicked" => Some(Self::Clicked),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Whether moving to `next` is a legal forward transition.
    pub fn can_transition(self, next: Self) -> bool {
        use CampaignStatus::*;
        matches!(
            (self, next),
            (Pending, Sent) | (Pending, Failed) | (Sent, Opened) | (Opened, Clicked)
        )
    }
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted campaign row: one per customer per run reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    /// String key, also the delivery idempotency key
    pub campaign_id: String,

    pub customer_id: i64,

    pub vehicle_id: Option<i64>,

    /// Reason slug at creation time
    pub campaign_type: String,

    pub title: String,

    pub subject: String,

    pub content: String,

    pub status: CampaignStatus,

    pub location: Option<String>,

    pub trigger: String,

    pub created_at: DateTime<Utc>,

    pub sent_at: Option<DateTime<Utc>>,

    pub opened_at: Option<DateTime<Utc>>,

    pub clicked_at: Option<DateTime<Utc>>,

    /// Message id returned by the delivery provider
    pub provider_message_id: Option<String>,
}

/// Aggregate delivery counters for one campaign.
///
/// Upserted by the dispatcher on send; opened/clicked/bounced counters are
/// updated by receipt ingestion outside this pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CampaignMetrics {
    pub campaign_id: String,
    pub total_sent: i64,
    pub delivered: i64,
    pub opened: i64,
    pub clicked: i64,
    pub bounced: i64,
    pub unsubscribed: i64,
    pub open_rate: f64,
    pub click_rate: f64,
    pub bounce_rate: f64,
}

impl CampaignMetrics {
    pub fn for_campaign(campaign_id: impl Into<String>) -> Self {
        Self {
            campaign_id: campaign_id.into(),
            ..Default::default()
        }
    }

    /// Recompute derived rates from the raw counters.
    pub fn recompute_rates(&mut self) {
        if self.total_sent > 0 {
            let sent = self.total_sent as f64;
            self.open_rate = self.opened as f64 / sent;
            self.click_rate = self.clicked as f64 / sent;
            self.bounce_rate = self.bounced as f64 / sent;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_forward_transitions() {
        use CampaignStatus::*;

        assert!(Pending.can_transition(Sent));
        assert!(Pending.can_transition(Failed));
        assert!(Sent.can_transition(Opened));
        assert!(Opened.can_transition(Clicked));

        // No backward or skipping transitions
        assert!(!Sent.can_transition(Pending));
        assert!(!Failed.can_transition(Sent));
        assert!(!Pending.can_transition(Opened));
        assert!(!Clicked.can_transition(Opened));
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            CampaignStatus::Pending,
            CampaignStatus::Sent,
            CampaignStatus::Opened,
            CampaignStatus::Clicked,
            CampaignStatus::Failed,
        ] {
            assert_eq!(CampaignStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(CampaignStatus::parse("bogus"), None);
    }

    #[test]
    fn test_reason_slug() {
        assert_eq!(
            Reason::Category(NeedCategory::OverdueService).slug(),
            "overdue_service"
        );
        assert_eq!(Reason::Trigger(Trigger::Holiday).slug(), "holiday");
    }

    #[test]
    fn test_metrics_rates() {
        let mut metrics = CampaignMetrics::for_campaign("cmp-abc");
        metrics.total_sent = 4;
        metrics.opened = 2;
        metrics.clicked = 1;
        metrics.recompute_rates();

        assert_eq!(metrics.open_rate, 0.5);
        assert_eq!(metrics.click_rate, 0.25);
    }
}
