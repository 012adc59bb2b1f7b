//! Campaign composition: one draft per distinct run reason.
//!
//! Drafts are generated with the content generator when one is
//! configured, validated, and replaced with a static template whenever
//! generation fails, times out, or produces text the personalizer could
//! not safely render.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::adapters::ContentGenerator;
use crate::config::CampaignConfig;
use crate::domain::{CampaignDraft, NeedCategory, Reason, Trigger};

use super::context::RunContext;

/// Placeholder tokens the personalizer knows how to fill.
pub const KNOWN_PLACEHOLDERS: &[&str] = &[
    "customer_name",
    "vehicle_info",
    "vehicle_make",
    "vehicle_model",
    "vehicle_year",
    "last_service_date",
    "next_service_due",
    "mileage",
    "warranty_status",
    "customer_location",
];

/// Produces one `CampaignDraft` per distinct reason in a run.
pub struct Composer {
    generator: Option<Arc<dyn ContentGenerator>>,
    worker_limit: usize,
    call_timeout: Duration,
}

impl Composer {
    pub fn new(generator: Option<Arc<dyn ContentGenerator>>, config: &CampaignConfig) -> Self {
        Self {
            generator,
            worker_limit: config.worker_limit.max(1),
            call_timeout: config.request_timeout(),
        }
    }

    /// Compose drafts for every reason. Never fails: a reason whose
    /// generation fails gets the static fallback for that reason.
    pub async fn compose(
        &self,
        reasons: &[Reason],
        context: &RunContext,
    ) -> HashMap<Reason, CampaignDraft> {
        let mut drafts = HashMap::new();

        let Some(generator) = self.generator.clone() else {
            debug!("No content generator configured, using fallback templates");
            for &reason in reasons {
                drafts.insert(reason, fallback_draft(reason));
            }
            return drafts;
        };

        let facts = Arc::new(context_facts(context));
        let semaphore = Arc::new(Semaphore::new(self.worker_limit));
        let mut tasks: JoinSet<(Reason, Option<CampaignDraft>)> = JoinSet::new();

        for &reason in reasons {
            let generator = generator.clone();
            let facts = facts.clone();
            let semaphore = semaphore.clone();
            let timeout = self.call_timeout;

            tasks.spawn(async move {
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => return (reason, None),
                };

                let prompt = build_prompt(reason, &facts);
                match tokio::time::timeout(timeout, generator.generate(&prompt)).await {
                    Ok(Ok(text)) => (reason, parse_draft(reason, &text)),
                    Ok(Err(e)) => {
                        warn!(reason = reason.slug(), error = %e, "Content generation failed");
                        (reason, None)
                    }
                    Err(_) => {
                        warn!(reason = reason.slug(), "Content generation timed out");
                        (reason, None)
                    }
                }
            });
        }

        while let Some(result) = tasks.join_next().await {
            match result {
                Ok((reason, Some(draft))) => {
                    drafts.insert(reason, draft);
                }
                Ok((reason, None)) => {
                    drafts.insert(reason, fallback_draft(reason));
                }
                Err(e) => {
                    warn!(error = %e, "Composition task panicked");
                }
            }
        }

        // A panicked task leaves its reason unfilled; backfill it.
        for &reason in reasons {
            drafts
                .entry(reason)
                .or_insert_with(|| fallback_draft(reason));
        }

        drafts
    }
}

/// Render the run context as prompt facts.
fn context_facts(context: &RunContext) -> String {
    let mut facts = String::new();

    if let Some(location) = &context.location {
        facts.push_str(&format!("Location: {}\n", location));
    }

    if let Some(weather) = &context.weather {
        facts.push_str(&format!(
            "Current weather: {} ({}), {:.0}°C, humidity {}%\n",
            weather.condition, weather.description, weather.temperature_c, weather.humidity
        ));
    }

    for observance in &context.holidays {
        facts.push_str(&format!(
            "Upcoming festival: {} on {} ({})\n",
            observance.name, observance.date, observance.kind
        ));
    }

    if facts.is_empty() {
        facts.push_str("No weather or festival context available.\n");
    }

    facts
}

fn reason_brief(reason: Reason) -> &'static str {
    match reason {
        Reason::Category(NeedCategory::OverdueService) => {
            "The customer's vehicle is overdue for service."
        }
        Reason::Category(NeedCategory::UpcomingService) => {
            "The customer's vehicle has a service due within the next month."
        }
        Reason::Category(NeedCategory::WarrantyExpiring) => {
            "The customer's vehicle warranty expires soon."
        }
        Reason::Category(NeedCategory::NoNeed) => "General service check-in.",
        Reason::Trigger(Trigger::WeatherAlert) => {
            "Current weather conditions call for a vehicle check-up."
        }
        Reason::Trigger(Trigger::Holiday) => {
            "An upcoming festival is a good occasion for a service offer."
        }
        Reason::Trigger(Trigger::Scheduled) | Reason::Trigger(Trigger::Manual) => {
            "Routine service reminder."
        }
    }
}

fn build_prompt(reason: Reason, facts: &str) -> String {
    format!(
        "Write a short service-center marketing email.\n\
         Campaign reason: {}\n\
         {}\n\
         Context:\n{}\n\
         Use only these placeholder tokens, written exactly as shown: {}.\n\
         The body must greet the customer with {{{{customer_name}}}}.\n\
         Respond in exactly this format:\n\
         SUBJECT: <subject line>\n\
         BODY:\n<email body>",
        reason.slug(),
        reason_brief(reason),
        facts,
        KNOWN_PLACEHOLDERS
            .iter()
            .map(|p| format!("{{{{{}}}}}", p))
            .collect::<Vec<_>>()
            .join(", "),
    )
}

/// Parse and validate generated text into a draft. Returns None when the
/// text cannot be rendered safely, in which case the caller falls back.
fn parse_draft(reason: Reason, text: &str) -> Option<CampaignDraft> {
    let (subject, body) = split_subject_body(text)?;

    if !is_renderable(&subject) || !is_renderable(&body) {
        warn!(
            reason = reason.slug(),
            "Generated draft contains unknown placeholders, falling back"
        );
        return None;
    }

    if !body.contains("{{customer_name}}") {
        warn!(
            reason = reason.slug(),
            "Generated draft is missing the customer greeting, falling back"
        );
        return None;
    }

    Some(CampaignDraft {
        reason,
        title: default_title(reason).to_string(),
        subject,
        body,
        fallback: false,
    })
}

fn split_subject_body(text: &str) -> Option<(String, String)> {
    let trimmed = text.trim();
    let rest = trimmed.strip_prefix("SUBJECT:")?;
    let (subject, body) = rest.split_once("BODY:")?;

    let subject = subject.trim().to_string();
    let body = body.trim().to_string();
    if subject.is_empty() || body.is_empty() {
        return None;
    }
    Some((subject, body))
}

/// True when every `{{token}}` in the text is one the personalizer fills.
fn is_renderable(text: &str) -> bool {
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            // Unterminated token
            return false;
        };
        let token = after[..end].trim();
        if !KNOWN_PLACEHOLDERS.contains(&token) {
            return false;
        }
        rest = &after[end + 2..];
    }
    true
}

fn default_title(reason: Reason) -> &'static str {
    match reason {
        Reason::Category(NeedCategory::OverdueService) => "Overdue Service Reminder",
        Reason::Category(NeedCategory::UpcomingService) => "Upcoming Service Reminder",
        Reason::Category(NeedCategory::WarrantyExpiring) => "Warranty Expiry Notice",
        Reason::Category(NeedCategory::NoNeed) => "Service Check-In",
        Reason::Trigger(Trigger::WeatherAlert) => "Weather Care Check-Up",
        Reason::Trigger(Trigger::Holiday) => "Festival Service Special",
        Reason::Trigger(Trigger::Scheduled) | Reason::Trigger(Trigger::Manual) => {
            "Service Reminder"
        }
    }
}

/// Static template used when generation is unavailable or unusable.
pub fn fallback_draft(reason: Reason) -> CampaignDraft {
    let (subject, body) = match reason {
        Reason::Category(NeedCategory::OverdueService) => (
            "Your {{vehicle_info}} is overdue for service",
            "Hello {{customer_name}},\n\n\
             Our records show your {{vehicle_info}} was due for service on \
             {{next_service_due}}. Regular servicing keeps your vehicle safe and \
             protects its resale value.\n\n\
             Vehicle: {{vehicle_info}}\n\
             Last service: {{last_service_date}}\n\
             Mileage: {{mileage}} km\n\n\
             Book your service slot today and we'll have you back on the road in \
             no time.",
        ),
        Reason::Category(NeedCategory::UpcomingService) => (
            "Service due soon for your {{vehicle_info}}",
            "Hello {{customer_name}},\n\n\
             Your {{vehicle_info}} is due for its next service on \
             {{next_service_due}}. Book early to pick the slot that suits you \
             best.\n\n\
             Vehicle: {{vehicle_info}}\n\
             Last service: {{last_service_date}}\n\
             Mileage: {{mileage}} km\n\n\
             Reply to this email or call us to confirm your booking.",
        ),
        Reason::Category(NeedCategory::WarrantyExpiring) => (
            "Warranty update for your {{vehicle_info}}",
            "Hello {{customer_name}},\n\n\
             The warranty on your {{vehicle_info}} is expiring soon \
             ({{warranty_status}}). A pre-expiry inspection lets us fix any \
             covered issues while the warranty still applies.\n\n\
             Vehicle: {{vehicle_info}}\n\
             Warranty: {{warranty_status}}\n\n\
             Schedule your free pre-expiry inspection this week.",
        ),
        Reason::Category(NeedCategory::NoNeed) => (
            "A quick check-in about your {{vehicle_info}}",
            "Hello {{customer_name}},\n\n\
             Just a quick note from your service team. Your {{vehicle_info}} \
             has no pending service items, and we're here when you need us.",
        ),
        Reason::Trigger(Trigger::WeatherAlert) => (
            "Weather check-up for your {{vehicle_info}}",
            "Hello {{customer_name}},\n\n\
             The weather in {{customer_location}} calls for some extra care for \
             your {{vehicle_info}}. Wipers, tyres, and brakes take the brunt of \
             rough conditions.\n\n\
             Drop by for a quick weather-readiness check, free with any \
             service.",
        ),
        Reason::Trigger(Trigger::Holiday) => (
            "Festive service special for your {{vehicle_info}}",
            "Hello {{customer_name}},\n\n\
             Celebrate the season with a perfectly maintained {{vehicle_info}}. \
             For a limited time, enjoy a festive discount on all service \
             packages plus a complimentary vehicle wash.\n\n\
             Book before the festivities begin and travel worry-free.",
        ),
        Reason::Trigger(Trigger::Scheduled) | Reason::Trigger(Trigger::Manual) => (
            "Service reminder for your {{vehicle_info}}",
            "Hello {{customer_name}},\n\n\
             This is a friendly reminder from your service team about your \
             {{vehicle_info}}.\n\n\
             Last service: {{last_service_date}}\n\
             Next service due: {{next_service_due}}\n\n\
             Call us or reply to this email to book your slot.",
        ),
    };

    CampaignDraft {
        reason,
        title: default_title(reason).to_string(),
        subject: subject.to_string(),
        body: body.to_string(),
        fallback: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use chrono::{NaiveDate, Utc};

    struct FixedGenerator(String);

    #[async_trait]
    impl ContentGenerator for FixedGenerator {
        async fn generate(&self, _prompt: &str) -> anyhow::Result<String> {
            Ok(self.0.clone())
        }
    }

    struct FailingGenerator;

    #[async_trait]
    impl ContentGenerator for FailingGenerator {
        async fn generate(&self, _prompt: &str) -> anyhow::Result<String> {
            Err(anyhow!("model unavailable"))
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

    #[test]
    fn test_fallback_templates_are_renderable() {
        for reason in [
            Reason::Category(NeedCategory::OverdueService),
            Reason::Category(NeedCategory::UpcomingService),
            Reason::Category(NeedCategory::WarrantyExpiring),
            Reason::Trigger(Trigger::WeatherAlert),
            Reason::Trigger(Trigger::Holiday),
        ] {
            let draft = fallback_draft(reason);
            assert!(draft.fallback);
            assert!(draft.body.contains("{{customer_name}}"), "{:?}", reason);
            assert!(is_renderable(&draft.subject), "{:?}", reason);
            assert!(is_renderable(&draft.body), "{:?}", reason);
        }
    }

    #[test]
    fn test_unknown_placeholder_rejected() {
        assert!(is_renderable("Hello {{customer_name}}"));
        assert!(!is_renderable("Hello {{customer_nmae}}"));
        assert!(!is_renderable("Hello {{customer_name}, broken"));
    }

    #[test]
    fn test_parse_draft_format() {
        let reason = Reason::Category(NeedCategory::UpcomingService);

        let good = "SUBJECT: Time for a service\nBODY:\nHello {{customer_name}}, your \
                    {{vehicle_info}} is due soon.";
        let draft = parse_draft(reason, good).unwrap();
        assert_eq!(draft.subject, "Time for a service");
        assert!(!draft.fallback);

        // Missing greeting
        let no_greeting = "SUBJECT: Hi\nBODY:\nYour car is due.";
        assert!(parse_draft(reason, no_greeting).is_none());

        // Not in the expected format
        assert!(parse_draft(reason, "Hello {{customer_name}}").is_none());
    }

    #[tokio::test]
    async fn test_generation_failure_falls_back() {
        let composer = Composer::new(
            Some(Arc::new(FailingGenerator)),
            &CampaignConfig::default(),
        );
        let reasons = [Reason::Category(NeedCategory::OverdueService)];

        let drafts = composer.compose(&reasons, &context()).await;
        assert!(drafts[&reasons[0]].fallback);
    }

    #[tokio::test]
    async fn test_valid_generation_is_used() {
        let composer = Composer::new(
            Some(Arc::new(FixedGenerator(
                "SUBJECT: Monsoon check\nBODY:\nHello {{customer_name}}, rain is coming."
                    .to_string(),
            ))),
            &CampaignConfig::default(),
        );
        let reasons = [Reason::Trigger(Trigger::WeatherAlert)];

        let drafts = composer.compose(&reasons, &context()).await;
        let draft = &drafts[&reasons[0]];
        assert!(!draft.fallback);
        assert_eq!(draft.subject, "Monsoon check");
    }

    #[tokio::test]
    async fn test_no_generator_uses_fallbacks() {
        let composer = Composer::new(None, &CampaignConfig::default());
        let reasons = [
            Reason::Category(NeedCategory::OverdueService),
            Reason::Trigger(Trigger::Holiday),
        ];

        let drafts = composer.compose(&reasons, &context()).await;
        assert_eq!(drafts.len(), 2);
        assert!(drafts.values().all(|d| d.fallback));
    }
}
