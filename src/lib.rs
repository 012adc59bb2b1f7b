//! drivecast - Vehicle-service campaign pipeline
//!
//! A Rust pipeline that turns vehicle lifecycle data, weather, and
//! festival calendars into personalized service campaigns.
//!
//! # Architecture
//!
//! A run moves through five stages, strictly in order:
//! - Context: collect weather and holiday facts (best-effort)
//! - Targeting: select customers with a qualifying service need
//! - Composing: one content draft per distinct reason
//! - Personalizing: fill placeholders per customer and vehicle
//! - Dispatching: persist, then send in bounded batches with retries
//!
//! Each run appends JSONL stage events under the runs directory, and the
//! campaign id doubles as the delivery idempotency key.
//!
//! # Modules
//!
//! - `adapters`: External collaborators (weather, holidays, generation, delivery)
//! - `core`: Pipeline stages and the coordinator
//! - `domain`: Data structures (Customer, Campaign, RunSummary)
//! - `storage`: SQLite-backed persistence
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Seed a demo database, then run a scheduled sweep
//! drivecast seed
//! drivecast run --location Mumbai
//!
//! # Location-wide festival campaign, simulated
//! drivecast run --trigger holiday --location Mumbai --dry-run
//!
//! # Inspect a run
//! drivecast status <run-id>
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod storage;

// Re-export main types at crate root for convenience
pub use core::{Collaborators, Coordinator, RunLog};
pub use domain::{
    Campaign, CampaignStatus, NeedCategory, Reason, RunRequest, RunStatus, RunSummary, Trigger,
};
pub use storage::{SqliteStore, Store};
