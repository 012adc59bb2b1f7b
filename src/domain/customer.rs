//! Customers, their vehicles, and service history.
//!
//! These rows are read by the targeting engine and never mutated by the
//! pipeline; service records are appended by external intake processes.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A customer who owns one or more vehicles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: i64,

    pub name: String,

    /// Unique contact address; campaigns are delivered here.
    pub email: String,

    pub phone: Option<String>,

    /// Location used for weather/holiday targeting.
    pub preferred_location: Option<String>,

    pub created_at: DateTime<Utc>,
}

/// A vehicle owned by exactly one customer.
///
/// Lifecycle dates are all optional: real rows are sparse, and the
/// classifier treats a missing date as "window does not apply".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: i64,

    pub customer_id: i64,

    pub make: String,

    pub model: String,

    pub year: i32,

    pub vin: Option<String>,

    pub registration_date: Option<NaiveDate>,

    pub last_service_date: Option<NaiveDate>,

    pub last_service_type: Option<String>,

    pub next_service_due: Option<NaiveDate>,

    pub mileage: Option<i64>,

    pub warranty_start: Option<NaiveDate>,

    pub warranty_end: Option<NaiveDate>,
}

impl Vehicle {
    /// Display string used in personalization, e.g. "2020 Toyota Camry".
    pub fn display_name(&self) -> String {
        format!("{} {} {}", self.year, self.make, self.model)
    }
}

/// Immutable service history entry for a vehicle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub id: i64,

    pub vehicle_id: i64,

    pub service_date: NaiveDate,

    pub service_type: String,

    pub mileage: Option<i64>,

    pub cost: Option<f64>,

    pub description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vehicle_display_name() {
        let vehicle = Vehicle {
            id: 1,
            customer_id: 1,
            make: "Toyota".to_string(),
            model: "Camry".to_string(),
            year: 2020,
            vin: None,
            registration_date: None,
            last_service_date: None,
            last_service_type: None,
            next_service_due: None,
            mileage: None,
            warranty_start: None,
            warranty_end: None,
        };

        assert_eq!(vehicle.display_name(), "2020 Toyota Camry");
    }
}
