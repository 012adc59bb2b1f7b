//! Core pipeline logic.
//!
//! This module contains the pipeline stages in execution order:
//! - Context: weather/holiday collection
//! - Targeting: customer and vehicle selection
//! - Composer: draft generation with fallback templates
//! - Personalizer: placeholder rendering per target
//! - Dispatcher: durable, batched, retried delivery
//! plus the Coordinator that drives them and the per-run JSONL log.

pub mod composer;
pub mod context;
pub mod coordinator;
pub mod dispatcher;
pub mod personalizer;
pub mod run_log;
pub mod targeting;

// Re-export commonly used types
pub use composer::{fallback_draft, Composer, KNOWN_PLACEHOLDERS};
pub use context::{Clock, ContextCollector, RunContext, SystemClock};
pub use coordinator::{Collaborators, Coordinator};
pub use dispatcher::{text_to_html, DispatchOutcome, Dispatcher, RetryPolicy};
pub use personalizer::{generate_campaign_id, render_all, PersonalizationOutcome};
pub use run_log::{RunEvent, RunLog};
pub use targeting::{classify, Target, TargetingEngine, TargetingOutcome};
