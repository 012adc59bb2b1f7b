//! Fallback behavior: generation failures and unusable drafts never
//! block a run, and rendered output never leaks placeholder tokens.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use uuid::Uuid;

use drivecast::adapters::ContentGenerator;
use drivecast::config::CampaignConfig;
use drivecast::core::{render_all, Composer, RunContext, Target};
use drivecast::domain::{Customer, NeedCategory, Reason, Trigger};

struct FailingGenerator;

#[async_trait]
impl ContentGenerator for FailingGenerator {
    async fn generate(&self, _prompt: &str) -> anyhow::Result<String> {
        Err(anyhow!("model quota exhausted"))
    }
}

/// Produces drafts with placeholder tokens the personalizer cannot fill.
struct HallucinatingGenerator;

#[async_trait]
impl ContentGenerator for HallucinatingGenerator {
    async fn generate(&self, _prompt: &str) -> anyhow::Result<String> {
        Ok("SUBJECT: Offer inside\nBODY:\nHello {{customer_name}}, use code \
            {{discount_code}} at checkout."
            .to_string())
    }
}

fn context() -> RunContext {
    RunContext {
        location: Some("Mumbai".to_string()),
        trigger: Trigger::Scheduled,
        reference_date: NaiveDate::from_ymd_opt(2026, 8, 1).unwrap(),
        weather: None,
        holidays: Vec::new(),
        collected_at: Utc::now(),
    }
}

fn all_reasons() -> Vec<Reason> {
    vec![
        Reason::Category(NeedCategory::OverdueService),
        Reason::Category(NeedCategory::UpcomingService),
        Reason::Category(NeedCategory::WarrantyExpiring),
        Reason::Trigger(Trigger::WeatherAlert),
        Reason::Trigger(Trigger::Holiday),
    ]
}

#[tokio::test]
async fn test_failing_generator_yields_complete_fallback_drafts() {
    let composer = Composer::new(Some(Arc::new(FailingGenerator)), &CampaignConfig::default());
    let reasons = all_reasons();

    let drafts = composer.compose(&reasons, &context()).await;

    assert_eq!(drafts.len(), reasons.len());
    for (reason, draft) in &drafts {
        assert!(draft.fallback, "{:?}", reason);
        assert!(!draft.subject.is_empty());
        assert!(!draft.body.is_empty());
        assert!(draft.body.contains("{{customer_name}}"));
    }
}

#[tokio::test]
async fn test_unknown_placeholder_draft_falls_back() {
    let composer = Composer::new(
        Some(Arc::new(HallucinatingGenerator)),
        &CampaignConfig::default(),
    );
    let reasons = vec![Reason::Trigger(Trigger::Holiday)];

    let drafts = composer.compose(&reasons, &context()).await;
    assert!(drafts[&reasons[0]].fallback);
    assert!(!drafts[&reasons[0]].body.contains("discount_code"));
}

#[tokio::test]
async fn test_fallback_rendering_leaves_no_tokens() {
    let composer = Composer::new(Some(Arc::new(FailingGenerator)), &CampaignConfig::default());
    let reasons = all_reasons();
    let drafts = composer.compose(&reasons, &context()).await;

    // Render every fallback draft for a customer without any vehicle:
    // per-field fallbacks must cover everything.
    let customer = Customer {
        id: 1,
        name: "Asha Rao".to_string(),
        email: "asha@example.com".to_string(),
        phone: None,
        preferred_location: Some("Mumbai".to_string()),
        created_at: Utc::now(),
    };
    let targets: Vec<Target> = reasons
        .iter()
        .map(|&reason| Target {
            customer: customer.clone(),
            vehicle: None,
            reason,
        })
        .collect();

    let outcome = render_all(Uuid::new_v4(), &drafts, &targets, &context());

    assert_eq!(outcome.campaigns.len(), reasons.len());
    assert!(outcome.skipped.is_empty());
    for campaign in &outcome.campaigns {
        assert!(!campaign.subject.contains("{{"), "{}", campaign.subject);
        assert!(!campaign.body.contains("{{"), "{}", campaign.body);
        assert!(campaign.body.contains("Asha Rao"));
    }
}

#[tokio::test]
async fn test_empty_reason_list_yields_no_drafts() {
    let composer = Composer::new(Some(Arc::new(FailingGenerator)), &CampaignConfig::default());
    let drafts: HashMap<_, _> = composer.compose(&[], &context()).await;
    assert!(drafts.is_empty());
}
