//! Personalization: one rendered campaign per target.
//!
//! Fills every placeholder in the reason's draft with customer and
//! vehicle facts, falling back per field when a fact is missing, and
//! stamps the campaign with its deterministic identifier.

use std::collections::HashMap;

use chrono::NaiveDate;
use sha2::{Digest, Sha256};
use tracing::warn;
use uuid::Uuid;

use crate::domain::{
    CampaignDraft, Customer, Reason, RenderedCampaign, RunError, RunStage, Vehicle,
};

use super::context::RunContext;
use super::targeting::Target;

/// Output of the personalization stage.
#[derive(Debug, Clone)]
pub struct PersonalizationOutcome {
    pub campaigns: Vec<RenderedCampaign>,

    /// Targets that could not be rendered, with the reason
    pub skipped: Vec<RunError>,
}

/// Deterministic campaign identifier for a (run, customer, reason)
/// triple. Stable across retries within a run, unique across runs.
pub fn generate_campaign_id(run_id: Uuid, customer_id: i64, reason: Reason) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}:{}:{}", run_id, customer_id, reason.slug()));
    let digest = hex::encode(hasher.finalize());
    format!("cmp-{}", &digest[..16])
}

/// Render every target against its reason's draft.
pub fn render_all(
    run_id: Uuid,
    drafts: &HashMap<Reason, CampaignDraft>,
    targets: &[Target],
    context: &RunContext,
) -> PersonalizationOutcome {
    let mut campaigns = Vec::with_capacity(targets.len());
    let mut skipped = Vec::new();

    for target in targets {
        if target.customer.email.trim().is_empty() {
            warn!(
                customer_id = target.customer.id,
                "Customer has no email address, skipping"
            );
            skipped.push(RunError::new(
                RunStage::Personalizing,
                Some(target.customer.id.to_string()),
                "customer has no email address",
            ));
            continue;
        }

        let Some(draft) = drafts.get(&target.reason) else {
            // Composition guarantees a draft per reason; a miss here is a
            // stage-wiring bug worth surfacing, not a panic.
            skipped.push(RunError::new(
                RunStage::Personalizing,
                Some(target.customer.id.to_string()),
                format!("no draft composed for reason {}", target.reason.slug()),
            ));
            continue;
        };

        let facts = TargetFacts::new(target, context);
        campaigns.push(RenderedCampaign {
            campaign_id: generate_campaign_id(run_id, target.customer.id, target.reason),
            customer_id: target.customer.id,
            vehicle_id: target.vehicle.as_ref().map(|v| v.id),
            recipient_email: target.customer.email.clone(),
            recipient_name: target.customer.name.clone(),
            reason: target.reason,
            title: draft.title.clone(),
            subject: facts.fill(&draft.subject),
            body: facts.fill(&draft.body),
            location: context.location.clone(),
            trigger: context.trigger,
        });
    }

    PersonalizationOutcome { campaigns, skipped }
}

/// Human-readable warranty status for a vehicle at the reference date.
pub fn warranty_status(vehicle: &Vehicle, reference_date: NaiveDate) -> String {
    match vehicle.warranty_end {
        None => "Not Available".to_string(),
        Some(end) if end < reference_date => "Expired".to_string(),
        Some(end) => {
            let days = (end - reference_date).num_days();
            if days > 90 {
                "Active".to_string()
            } else {
                format!("Expires in {} days", days)
            }
        }
    }
}

/// Resolved placeholder values for one target.
struct TargetFacts {
    values: HashMap<&'static str, String>,
}

impl TargetFacts {
    fn new(target: &Target, context: &RunContext) -> Self {
        let customer: &Customer = &target.customer;
        let vehicle = target.vehicle.as_ref();

        let mut values: HashMap<&'static str, String> = HashMap::new();
        values.insert("customer_name", customer.name.clone());
        values.insert(
            "vehicle_info",
            vehicle
                .map(Vehicle::display_name)
                .unwrap_or_else(|| "your vehicle".to_string()),
        );
        values.insert(
            "vehicle_make",
            vehicle
                .map(|v| v.make.clone())
                .unwrap_or_else(|| "Not Available".to_string()),
        );
        values.insert(
            "vehicle_model",
            vehicle
                .map(|v| v.model.clone())
                .unwrap_or_else(|| "Not Available".to_string()),
        );
        values.insert(
            "vehicle_year",
            vehicle
                .map(|v| v.year.to_string())
                .unwrap_or_else(|| "Not Available".to_string()),
        );
        values.insert(
            "last_service_date",
            vehicle
                .and_then(|v| v.last_service_date)
                .map(format_date)
                .unwrap_or_else(|| "Not Available".to_string()),
        );
        values.insert(
            "next_service_due",
            vehicle
                .and_then(|v| v.next_service_due)
                .map(format_date)
                .unwrap_or_else(|| "Not Available".to_string()),
        );
        values.insert(
            "mileage",
            vehicle
                .and_then(|v| v.mileage)
                .map(|m| m.to_string())
                .unwrap_or_else(|| "Not Available".to_string()),
        );
        values.insert(
            "warranty_status",
            vehicle
                .map(|v| warranty_status(v, context.reference_date))
                .unwrap_or_else(|| "Not Available".to_string()),
        );
        values.insert(
            "customer_location",
            customer
                .preferred_location
                .clone()
                .or_else(|| context.location.clone())
                .unwrap_or_else(|| "your city".to_string()),
        );

        Self { values }
    }

    /// Substitute every known `{{token}}` in the template.
    fn fill(&self, template: &str) -> String {
        let mut rendered = template.to_string();
        for (token, value) in &self.values {
            rendered = rendered.replace(&format!("{{{{{}}}}}", token), value);
        }
        rendered
    }
}

fn format_date(date: NaiveDate) -> String {
    date.format("%d %b %Y").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::composer::fallback_draft;
    use crate::domain::{NeedCategory, Trigger};
    use chrono::Utc;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn customer(id: i64, email: &str) -> Customer {
        Customer {
            id,
            name: "Asha Rao".to_string(),
            email: email.to_string(),
            phone: None,
            preferred_location: Some("Mumbai".to_string()),
            created_at: Utc::now(),
        }
    }

    fn vehicle() -> Vehicle {
        Vehicle {
            id: 7,
            customer_id: 1,
            make: "Toyota".to_string(),
            model: "Camry".to_string(),
            year: 2020,
            vin: None,
            registration_date: None,
            last_service_date: Some(day(2026, 2, 10)),
            last_service_type: None,
            next_service_due: Some(day(2026, 8, 10)),
            mileage: Some(32_000),
            warranty_start: None,
            warranty_end: Some(day(2026, 9, 1)),
        }
    }

    fn context() -> RunContext {
        RunContext {
            location: Some("Mumbai".to_string()),
            trigger: Trigger::Scheduled,
            reference_date: day(2026, 8, 1),
            weather: None,
            holidays: Vec::new(),
            collected_at: Utc::now(),
        }
    }

    #[test]
    fn test_campaign_id_deterministic_and_distinct() {
        let run = Uuid::new_v4();
        let reason = Reason::Category(NeedCategory::OverdueService);

        let a = generate_campaign_id(run, 1, reason);
        let b = generate_campaign_id(run, 1, reason);
        assert_eq!(a, b);
        assert!(a.starts_with("cmp-"));
        assert_eq!(a.len(), 4 + 16);

        // Different customer or run changes the id
        assert_ne!(a, generate_campaign_id(run, 2, reason));
        assert_ne!(a, generate_campaign_id(Uuid::new_v4(), 1, reason));
    }

    #[test]
    fn test_render_fills_every_placeholder() {
        let run = Uuid::new_v4();
        let reason = Reason::Category(NeedCategory::OverdueService);
        let mut drafts = HashMap::new();
        drafts.insert(reason, fallback_draft(reason));

        let targets = vec![Target {
            customer: customer(1, "asha@example.com"),
            vehicle: Some(vehicle()),
            reason,
        }];

        let outcome = render_all(run, &drafts, &targets, &context());
        assert_eq!(outcome.campaigns.len(), 1);
        assert!(outcome.skipped.is_empty());

        let rendered = &outcome.campaigns[0];
        assert!(!rendered.subject.contains("{{"));
        assert!(!rendered.body.contains("{{"));
        assert!(rendered.body.contains("Asha Rao"));
        assert!(rendered.body.contains("2020 Toyota Camry"));
        assert!(rendered.body.contains("10 Aug 2026"));
    }

    #[test]
    fn test_missing_vehicle_uses_field_fallbacks() {
        let run = Uuid::new_v4();
        let reason = Reason::Trigger(Trigger::Holiday);
        let mut drafts = HashMap::new();
        drafts.insert(reason, fallback_draft(reason));

        let targets = vec![Target {
            customer: customer(1, "asha@example.com"),
            vehicle: None,
            reason,
        }];

        let outcome = render_all(run, &drafts, &targets, &context());
        assert_eq!(outcome.campaigns.len(), 1);
        assert!(outcome.campaigns[0].body.contains("your vehicle"));
    }

    #[test]
    fn test_missing_email_is_skipped_with_reason() {
        let run = Uuid::new_v4();
        let reason = Reason::Category(NeedCategory::UpcomingService);
        let mut drafts = HashMap::new();
        drafts.insert(reason, fallback_draft(reason));

        let targets = vec![Target {
            customer: customer(9, "  "),
            vehicle: Some(vehicle()),
            reason,
        }];

        let outcome = render_all(run, &drafts, &targets, &context());
        assert!(outcome.campaigns.is_empty());
        assert_eq!(outcome.skipped.len(), 1);
        assert_eq!(outcome.skipped[0].stage, RunStage::Personalizing);
        assert_eq!(outcome.skipped[0].subject.as_deref(), Some("9"));
    }

    #[test]
    fn test_warranty_status_wording() {
        let reference = day(2026, 8, 1);
        let mut v = vehicle();

        v.warranty_end = Some(day(2026, 7, 1));
        assert_eq!(warranty_status(&v, reference), "Expired");

        v.warranty_end = Some(day(2026, 8, 31));
        assert_eq!(warranty_status(&v, reference), "Expires in 30 days");

        v.warranty_end = Some(day(2027, 8, 1));
        assert_eq!(warranty_status(&v, reference), "Active");

        v.warranty_end = None;
        assert_eq!(warranty_status(&v, reference), "Not Available");
    }
}
