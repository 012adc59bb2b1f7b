//! Campaign dispatch: durable persistence, batched sends, retries.
//!
//! Every campaign row is persisted as `pending` before the first send
//! attempt, so a crash mid-dispatch leaves an auditable row instead of a
//! silent gap. The campaign id doubles as the delivery idempotency key
//! and never changes across retries.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::adapters::{DeliveryError, EmailDelivery, SendRequest};
use crate::config::CampaignConfig;
use crate::domain::{
    Campaign, CampaignMetrics, CampaignStatus, RenderedCampaign, RunError, RunStage,
};
use crate::storage::Store;

/// Retry policy for transient delivery failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including first try)
    pub max_attempts: u32,

    /// Initial delay between retries in milliseconds
    pub initial_delay_ms: u64,

    /// Maximum delay between retries in milliseconds
    pub max_delay_ms: u64,

    /// Backoff multiplier (delay *= multiplier after each retry)
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Calculate delay for a specific attempt (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::from_millis(self.initial_delay_ms);
        }

        let delay =
            self.initial_delay_ms as f64 * self.backoff_multiplier.powi((attempt - 1) as i32);

        let capped = delay.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(capped)
    }

    /// Check if we should retry based on attempt count
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Counters and per-item errors from one dispatch pass.
#[derive(Debug, Default)]
pub struct DispatchOutcome {
    pub sent: usize,
    pub failed: usize,
    pub errors: Vec<RunError>,
}

enum ItemResult {
    Sent,
    Failed(RunError),
}

/// Dispatches rendered campaigns in bounded batches.
pub struct Dispatcher {
    mailer: Option<Arc<dyn EmailDelivery>>,
    store: Arc<dyn Store>,
    policy: RetryPolicy,
    batch_size: usize,
}

impl Dispatcher {
    pub fn new(
        mailer: Option<Arc<dyn EmailDelivery>>,
        store: Arc<dyn Store>,
        config: &CampaignConfig,
    ) -> Self {
        Self {
            mailer,
            store,
            policy: RetryPolicy {
                max_attempts: config.max_retry_attempts.max(1),
                ..RetryPolicy::default()
            },
            batch_size: config.batch_size.max(1),
        }
    }

    /// Dispatch every campaign, batch by batch. The cancel flag is checked
    /// between batches; a cancelled run leaves the remaining campaigns
    /// untouched.
    pub async fn dispatch(
        &self,
        campaigns: Vec<RenderedCampaign>,
        dry_run: bool,
        cancel: Arc<AtomicBool>,
    ) -> Result<DispatchOutcome> {
        let mut outcome = DispatchOutcome::default();

        if dry_run {
            for campaign in &campaigns {
                info!(
                    campaign_id = %campaign.campaign_id,
                    recipient = %campaign.recipient_email,
                    "Dry run: would send campaign"
                );
            }
            outcome.sent = campaigns.len();
            return Ok(outcome);
        }

        let mailer = self
            .mailer
            .clone()
            .context("No email delivery configured; set BREVO_API_KEY or use --dry-run")?;

        for batch in campaigns.chunks(self.batch_size) {
            if cancel.load(Ordering::SeqCst) {
                warn!(
                    remaining = campaigns.len() - (outcome.sent + outcome.failed),
                    "Dispatch cancelled between batches"
                );
                outcome.errors.push(RunError::new(
                    RunStage::Dispatching,
                    None,
                    "run cancelled before dispatch completed",
                ));
                break;
            }

            let mut tasks: JoinSet<ItemResult> = JoinSet::new();
            for campaign in batch {
                let campaign = campaign.clone();
                let mailer = mailer.clone();
                let store = self.store.clone();
                let policy = self.policy.clone();

                tasks.spawn(async move { dispatch_one(campaign, mailer, store, policy).await });
            }

            while let Some(result) = tasks.join_next().await {
                match result {
                    Ok(ItemResult::Sent) => outcome.sent += 1,
                    Ok(ItemResult::Failed(error)) => {
                        outcome.errors.push(error);
                        outcome.failed += 1;
                    }
                    Err(e) => {
                        outcome.errors.push(RunError::new(
                            RunStage::Dispatching,
                            None,
                            format!("dispatch task panicked: {}", e),
                        ));
                        outcome.failed += 1;
                    }
                }
            }
        }

        Ok(outcome)
    }
}

async fn dispatch_one(
    campaign: RenderedCampaign,
    mailer: Arc<dyn EmailDelivery>,
    store: Arc<dyn Store>,
    policy: RetryPolicy,
) -> ItemResult {
    let campaign_id = campaign.campaign_id.clone();

    // Persist before sending. Only a pending row from an interrupted
    // dispatch is resumed; every other status is terminal here.
    match store.get_campaign(&campaign_id) {
        Ok(Some(existing)) => match existing.status {
            CampaignStatus::Pending => {}
            CampaignStatus::Sent | CampaignStatus::Opened | CampaignStatus::Clicked => {
                debug!(campaign_id = %campaign_id, "Campaign already sent, skipping");
                return ItemResult::Sent;
            }
            CampaignStatus::Failed => {
                debug!(campaign_id = %campaign_id, "Campaign previously failed, not retried");
                return ItemResult::Failed(RunError::new(
                    RunStage::Dispatching,
                    Some(campaign_id),
                    "campaign previously failed; not retried",
                ));
            }
        },
        Ok(None) => {
            let row = Campaign {
                campaign_id: campaign_id.clone(),
                customer_id: campaign.customer_id,
                vehicle_id: campaign.vehicle_id,
                campaign_type: campaign.reason.slug().to_string(),
                title: campaign.title.clone(),
                subject: campaign.subject.clone(),
                content: campaign.body.clone(),
                status: CampaignStatus::Pending,
                location: campaign.location.clone(),
                trigger: campaign.trigger.as_str().to_string(),
                created_at: Utc::now(),
                sent_at: None,
                opened_at: None,
                clicked_at: None,
                provider_message_id: None,
            };
            if let Err(e) = store.insert_campaign(&row) {
                return ItemResult::Failed(RunError::new(
                    RunStage::Dispatching,
                    Some(campaign_id),
                    format!("failed to persist campaign: {:#}", e),
                ));
            }
        }
        Err(e) => {
            return ItemResult::Failed(RunError::new(
                RunStage::Dispatching,
                Some(campaign_id),
                format!("failed to load campaign: {:#}", e),
            ));
        }
    }

    let request = SendRequest {
        recipient_email: campaign.recipient_email.clone(),
        recipient_name: campaign.recipient_name.clone(),
        subject: campaign.subject.clone(),
        html_body: text_to_html(&campaign.body),
        text_body: campaign.body.clone(),
        idempotency_key: campaign_id.clone(),
        tags: vec![
            campaign.reason.slug().to_string(),
            campaign.trigger.as_str().to_string(),
        ],
    };

    let mut attempt = 1u32;
    let failure = loop {
        match mailer.send(&request).await {
            Ok(receipt) => {
                if let Err(e) = store.mark_sent(&campaign_id, &receipt.message_id, Utc::now()) {
                    return ItemResult::Failed(RunError::new(
                        RunStage::Dispatching,
                        Some(campaign_id),
                        format!("sent but failed to record delivery: {:#}", e),
                    ));
                }

                let mut metrics = CampaignMetrics::for_campaign(&campaign_id);
                metrics.total_sent = 1;
                metrics.delivered = 1;
                if let Err(e) = store.upsert_metrics(&metrics) {
                    warn!(campaign_id = %campaign_id, error = %e, "Failed to record metrics");
                }

                debug!(campaign_id = %campaign_id, message_id = %receipt.message_id, "Campaign sent");
                return ItemResult::Sent;
            }
            Err(DeliveryError::Transient(reason)) if policy.should_retry(attempt) => {
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    campaign_id = %campaign_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    reason,
                    "Transient delivery failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => break e,
        }
    };

    if let Err(e) = store.mark_failed(&campaign_id) {
        warn!(campaign_id = %campaign_id, error = %e, "Failed to record delivery failure");
    }

    ItemResult::Failed(RunError::new(
        RunStage::Dispatching,
        Some(campaign_id),
        format!("delivery failed after {} attempt(s): {}", attempt, failure),
    ))
}

/// Wrap plain-text campaign content into a minimal HTML body.
pub fn text_to_html(text: &str) -> String {
    let paragraphs: Vec<String> = text
        .split("\n\n")
        .map(|p| format!("<p>{}</p>", escape_html(p).replace('\n', "<br>")))
        .collect();

    format!(
        "<html><body style=\"font-family: Arial, sans-serif; line-height: 1.6;\">{}</body></html>",
        paragraphs.join("")
    )
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
