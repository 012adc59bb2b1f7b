//! Target selection: which customers get a campaign, and why.
//!
//! Lifecycle triggers classify every vehicle against the reference date
//! and keep at most one target per (customer, category). Location-wide
//! triggers (weather, holiday) target every customer in the location
//! regardless of service need.

use anyhow::Result;
use chrono::{Duration, NaiveDate};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::config::CampaignConfig;
use crate::domain::{Customer, NeedCategory, Reason, Trigger, Vehicle};
use crate::storage::Store;

/// One customer selected for a campaign, with the vehicle that justified
/// the selection when there is one.
#[derive(Debug, Clone)]
pub struct Target {
    pub customer: Customer,

    pub vehicle: Option<Vehicle>,

    pub reason: Reason,
}

/// Output of the targeting stage.
#[derive(Debug, Clone)]
pub struct TargetingOutcome {
    pub targets: Vec<Target>,

    /// Customers excluded by the suppression window
    pub suppressed: usize,
}

/// Classify one vehicle's service need against a reference date.
///
/// Overdue wins over upcoming, and service needs win over warranty
/// expiry. Boundary dates are inclusive: a vehicle due exactly on the
/// reference date is upcoming, not overdue.
pub fn classify(vehicle: &Vehicle, reference_date: NaiveDate, config: &CampaignConfig) -> NeedCategory {
    if let Some(due) = vehicle.next_service_due {
        if due < reference_date {
            return NeedCategory::OverdueService;
        }
        if due <= reference_date + Duration::days(config.upcoming_service_days) {
            return NeedCategory::UpcomingService;
        }
    }

    if let Some(end) = vehicle.warranty_end {
        if end >= reference_date
            && end <= reference_date + Duration::days(config.warranty_expiry_days)
        {
            return NeedCategory::WarrantyExpiring;
        }
    }

    NeedCategory::NoNeed
}

/// Selects run targets from the store.
pub struct TargetingEngine {
    store: Arc<dyn Store>,
    config: CampaignConfig,
}

impl TargetingEngine {
    pub fn new(store: Arc<dyn Store>, config: CampaignConfig) -> Self {
        Self { store, config }
    }

    /// Select targets for one run.
    pub fn select(
        &self,
        location: Option<&str>,
        trigger: Trigger,
        reference_date: NaiveDate,
    ) -> Result<TargetingOutcome> {
        let customers = self.store.customers(location)?;
        debug!(
            count = customers.len(),
            location = location.unwrap_or("all"),
            "Loaded customers for targeting"
        );

        let mut targets = Vec::new();
        let mut suppressed = 0;

        for customer in customers {
            let vehicles = self.store.vehicles_for_customer(customer.id)?;

            let candidate_reasons: Vec<(Reason, Option<Vehicle>)> = if trigger.is_location_wide() {
                // Everyone in the location qualifies; attach the vehicle
                // with the nearest due date for personalization.
                vec![(
                    Reason::Trigger(trigger),
                    nearest_due(vehicles.iter()).cloned().or_else(|| vehicles.first().cloned()),
                )]
            } else {
                self.lifecycle_reasons(&vehicles, reference_date)
            };

            for (reason, vehicle) in candidate_reasons {
                if self.is_suppressed(customer.id, reason, reference_date)? {
                    debug!(
                        customer_id = customer.id,
                        reason = reason.slug(),
                        "Customer within suppression window, skipping"
                    );
                    suppressed += 1;
                    continue;
                }

                targets.push(Target {
                    customer: customer.clone(),
                    vehicle,
                    reason,
                });
            }
        }

        Ok(TargetingOutcome {
            targets,
            suppressed,
        })
    }

    /// Classify every vehicle and keep one per category: the vehicle with
    /// the nearest due date wins a tie.
    fn lifecycle_reasons(
        &self,
        vehicles: &[Vehicle],
        reference_date: NaiveDate,
    ) -> Vec<(Reason, Option<Vehicle>)> {
        let mut by_category: HashMap<NeedCategory, Vehicle> = HashMap::new();

        for vehicle in vehicles {
            let category = classify(vehicle, reference_date, &self.config);
            if category == NeedCategory::NoNeed {
                continue;
            }

            match by_category.get(&category) {
                Some(held) if !is_nearer(vehicle, held, category) => {}
                _ => {
                    by_category.insert(category, vehicle.clone());
                }
            }
        }

        let mut reasons: Vec<(Reason, Option<Vehicle>)> = by_category
            .into_iter()
            .map(|(category, vehicle)| (Reason::Category(category), Some(vehicle)))
            .collect();

        // Deterministic output order: overdue, upcoming, warranty
        reasons.sort_by_key(|(reason, _)| match reason {
            Reason::Category(NeedCategory::OverdueService) => 0,
            Reason::Category(NeedCategory::UpcomingService) => 1,
            Reason::Category(NeedCategory::WarrantyExpiring) => 2,
            _ => 3,
        });
        reasons
    }

    /// A customer is suppressed when the same campaign type was sent
    /// within the window ending on the reference date. The cutoff is
    /// derived from the reference date, not the wall clock, so a run
    /// replayed against a fixed date makes the same decisions.
    fn is_suppressed(
        &self,
        customer_id: i64,
        reason: Reason,
        reference_date: NaiveDate,
    ) -> Result<bool> {
        let Some(window_days) = self.config.suppression_days else {
            return Ok(false);
        };

        let last = self.store.last_sent_at(customer_id, reason.slug())?;
        match last {
            Some(sent_at) => {
                let cutoff = reference_date - Duration::days(window_days);
                Ok(sent_at.date_naive() > cutoff)
            }
            None => Ok(false),
        }
    }
}

fn nearest_due<'a>(vehicles: impl Iterator<Item = &'a Vehicle>) -> Option<&'a Vehicle> {
    vehicles
        .filter(|v| v.next_service_due.is_some())
        .min_by_key(|v| v.next_service_due)
}

/// The date that put a vehicle into `category`: warranty expiry for
/// warranty campaigns, the service due date otherwise.
fn relevant_date(vehicle: &Vehicle, category: NeedCategory) -> Option<NaiveDate> {
    match category {
        NeedCategory::WarrantyExpiring => vehicle.warranty_end,
        _ => vehicle.next_service_due,
    }
}

/// Whether `candidate` has a strictly nearer due/expiry date than `held`
/// for the category both were classified into. A vehicle without the
/// relevant date never displaces one that has it.
fn is_nearer(candidate: &Vehicle, held: &Vehicle, category: NeedCategory) -> bool {
    match (relevant_date(candidate, category), relevant_date(held, category)) {
        (Some(c), Some(h)) => c < h,
        (Some(_), None) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vehicle(due: Option<NaiveDate>, warranty_end: Option<NaiveDate>) -> Vehicle {
        Vehicle {
            id: 1,
            customer_id: 1,
            make: "Toyota".to_string(),
            model: "Camry".to_string(),
            year: 2020,
            vin: None,
            registration_date: None,
            last_service_date: None,
            last_service_type: None,
            next_service_due: due,
            mileage: None,
            warranty_start: None,
            warranty_end,
        }
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_classify_boundaries() {
        let config = CampaignConfig::default();
        let reference = day(2026, 8, 1);

        // Due yesterday: overdue. Due today: upcoming, not overdue.
        assert_eq!(
            classify(&vehicle(Some(day(2026, 7, 31)), None), reference, &config),
            NeedCategory::OverdueService
        );
        assert_eq!(
            classify(&vehicle(Some(day(2026, 8, 1)), None), reference, &config),
            NeedCategory::UpcomingService
        );

        // Last day of the 30-day window is in; the day after is out.
        assert_eq!(
            classify(&vehicle(Some(day(2026, 8, 31)), None), reference, &config),
            NeedCategory::UpcomingService
        );
        assert_eq!(
            classify(&vehicle(Some(day(2026, 9, 1)), None), reference, &config),
            NeedCategory::NoNeed
        );
    }

    #[test]
    fn test_classify_warranty_window() {
        let config = CampaignConfig::default();
        let reference = day(2026, 8, 1);

        assert_eq!(
            classify(&vehicle(None, Some(day(2026, 9, 15))), reference, &config),
            NeedCategory::WarrantyExpiring
        );
        // 60-day boundary inclusive
        assert_eq!(
            classify(&vehicle(None, Some(day(2026, 9, 30))), reference, &config),
            NeedCategory::WarrantyExpiring
        );
        assert_eq!(
            classify(&vehicle(None, Some(day(2026, 10, 1))), reference, &config),
            NeedCategory::NoNeed
        );
        // Already expired warranties are not "expiring"
        assert_eq!(
            classify(&vehicle(None, Some(day(2026, 7, 31))), reference, &config),
            NeedCategory::NoNeed
        );
    }

    #[test]
    fn test_service_need_beats_warranty() {
        let config = CampaignConfig::default();
        let reference = day(2026, 8, 1);

        let v = vehicle(Some(day(2026, 7, 1)), Some(day(2026, 8, 20)));
        assert_eq!(classify(&v, reference, &config), NeedCategory::OverdueService);
    }

    #[test]
    fn test_nearest_due_tie_break() {
        let near = vehicle(Some(day(2026, 8, 5)), None);
        let far = Vehicle {
            id: 2,
            next_service_due: Some(day(2026, 8, 20)),
            ..vehicle(None, None)
        };

        assert!(is_nearer(&near, &far, NeedCategory::UpcomingService));
        assert!(!is_nearer(&far, &near, NeedCategory::UpcomingService));
        assert!(is_nearer(&near, &vehicle(None, None), NeedCategory::UpcomingService));
        assert!(!is_nearer(&vehicle(None, None), &near, NeedCategory::UpcomingService));
    }

    #[test]
    fn test_warranty_tie_break_uses_expiry_date() {
        // Near-expiry vehicle with no due date vs far-expiry vehicle
        // whose due date fell outside the upcoming window.
        let near_expiry = vehicle(None, Some(day(2026, 8, 11)));
        let far_expiry = Vehicle {
            id: 2,
            next_service_due: Some(day(2026, 12, 1)),
            warranty_end: Some(day(2026, 9, 20)),
            ..vehicle(None, None)
        };

        assert!(is_nearer(&near_expiry, &far_expiry, NeedCategory::WarrantyExpiring));
        assert!(!is_nearer(&far_expiry, &near_expiry, NeedCategory::WarrantyExpiring));
    }
}
