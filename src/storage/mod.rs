//! Persistence for customers, vehicles, campaigns, and metrics.
//!
//! The pipeline persists a campaign row as `pending` before any delivery
//! attempt, so a crash between persist and send leaves a resumable row
//! rather than a silent gap.

pub mod sqlite;

pub use sqlite::SqliteStore;

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::domain::{Campaign, CampaignMetrics, Customer, ServiceRecord, Vehicle};

/// Backing store used by the pipeline stages.
///
/// Methods are synchronous; callers on the async path wrap them in
/// `spawn_blocking` when contention matters. All implementations must be
/// safe to share across worker tasks.
pub trait Store: Send + Sync {
    /// Customers whose preferred location matches, or every customer when
    /// no location is given.
    fn customers(&self, location: Option<&str>) -> Result<Vec<Customer>>;

    fn vehicles_for_customer(&self, customer_id: i64) -> Result<Vec<Vehicle>>;

    fn service_history(&self, vehicle_id: i64) -> Result<Vec<ServiceRecord>>;

    /// Insert a new campaign row. Fails if the campaign id already exists.
    fn insert_campaign(&self, campaign: &Campaign) -> Result<()>;

    fn get_campaign(&self, campaign_id: &str) -> Result<Option<Campaign>>;

    /// Record a successful delivery: status `sent`, timestamp, and the
    /// provider's message id.
    fn mark_sent(&self, campaign_id: &str, message_id: &str, sent_at: DateTime<Utc>) -> Result<()>;

    fn mark_failed(&self, campaign_id: &str) -> Result<()>;

    /// When this customer last received a campaign with the given type,
    /// if ever. Used for the suppression window.
    fn last_sent_at(&self, customer_id: i64, campaign_type: &str)
        -> Result<Option<DateTime<Utc>>>;

    fn upsert_metrics(&self, metrics: &CampaignMetrics) -> Result<()>;

    // Seed helpers; return the assigned row id.
    fn insert_customer(&self, customer: &Customer) -> Result<i64>;
    fn insert_vehicle(&self, vehicle: &Vehicle) -> Result<i64>;
    fn insert_service_record(&self, record: &ServiceRecord) -> Result<i64>;
}
