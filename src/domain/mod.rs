//! Domain types for the campaign pipeline.
//!
//! This module contains the core data structures:
//! - Customer/Vehicle/ServiceRecord: storage-backed inputs to targeting
//! - Campaign types: need classification, drafts, rendered and persisted campaigns
//! - Run: workflow run requests, stages, and summaries

pub mod campaign;
pub mod customer;
pub mod run;

// Re-export commonly used types
pub use campaign::{
    Campaign, CampaignDraft, CampaignMetrics, CampaignStatus, NeedCategory, Reason,
    RenderedCampaign, Trigger,
};
pub use customer::{Customer, ServiceRecord, Vehicle};
pub use run::{RunError, RunRequest, RunStage, RunStatus, RunSummary};
