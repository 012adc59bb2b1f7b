//! Adapter interfaces for external collaborators.
//!
//! Each collaborator the pipeline talks to (weather lookup, holiday
//! lookup, content generation, email delivery) is a trait with one
//! concrete implementation; tests substitute their own.

pub mod generation;
pub mod holidays;
pub mod mailer;
pub mod weather;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use generation::OpenAiGenerator;
pub use holidays::HolidayCalendar;
pub use mailer::BrevoMailer;
pub use weather::OpenWeather;

/// Current weather for a location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conditions {
    pub location: String,

    pub temperature_c: f64,

    /// Short condition label, e.g. "Rain"
    pub condition: String,

    pub description: String,

    pub humidity: i64,
}

/// A holiday or festival within the look-ahead window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observance {
    pub name: String,

    pub date: NaiveDate,

    /// e.g. "Major Festival", "Religious Festival"
    pub kind: String,

    pub significance: Option<String>,
}

/// Weather lookup collaborator.
#[async_trait]
pub trait WeatherProvider: Send + Sync {
    async fn current(&self, location: &str) -> Result<Conditions>;
}

/// Holiday lookup collaborator.
#[async_trait]
pub trait HolidayProvider: Send + Sync {
    /// Observances for `locale` with dates in [from, from + lookahead_days].
    async fn upcoming(
        &self,
        locale: &str,
        from: NaiveDate,
        lookahead_days: i64,
    ) -> Result<Vec<Observance>>;
}

/// Content generation collaborator: prompt in, text out.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// One outbound email.
#[derive(Debug, Clone)]
pub struct SendRequest {
    pub recipient_email: String,

    pub recipient_name: String,

    pub subject: String,

    pub html_body: String,

    pub text_body: String,

    /// Campaign identifier; reused unchanged across retries so the
    /// provider can deduplicate
    pub idempotency_key: String,

    pub tags: Vec<String>,
}

/// Provider acknowledgement for a successful send.
#[derive(Debug, Clone)]
pub struct DeliveryReceipt {
    pub message_id: String,
}

/// Delivery failures, split into the two kinds the dispatcher cares
/// about: transient failures are retried, permanent ones are not.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    #[error("transient delivery failure: {0}")]
    Transient(String),

    #[error("permanent delivery failure: {0}")]
    Permanent(String),
}

impl DeliveryError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Email delivery collaborator.
#[async_trait]
pub trait EmailDelivery: Send + Sync {
    async fn send(&self, request: &SendRequest) -> Result<DeliveryReceipt, DeliveryError>;
}
