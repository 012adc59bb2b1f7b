//! SQLite-backed store.
//!
//! Dates are stored as ISO-8601 text: `YYYY-MM-DD` for plain dates and
//! RFC 3339 for timestamps. A single connection behind a mutex is enough
//! for this workload; writes are short and batched.

use std::path::Path;
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use crate::domain::{Campaign, CampaignMetrics, CampaignStatus, Customer, ServiceRecord, Vehicle};

use super::Store;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS customers (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    name                TEXT NOT NULL,
    email               TEXT NOT NULL UNIQUE,
    phone               TEXT,
    preferred_location  TEXT,
    created_at          TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS vehicles (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    customer_id         INTEGER NOT NULL REFERENCES customers(id),
    make                TEXT NOT NULL,
    model               TEXT NOT NULL,
    year                INTEGER NOT NULL,
    vin                 TEXT UNIQUE,
    registration_date   TEXT,
    last_service_date   TEXT,
    last_service_type   TEXT,
    next_service_due    TEXT,
    mileage             INTEGER,
    warranty_start      TEXT,
    warranty_end        TEXT
);

CREATE TABLE IF NOT EXISTS service_history (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    vehicle_id    INTEGER NOT NULL REFERENCES vehicles(id),
    service_date  TEXT NOT NULL,
    service_type  TEXT NOT NULL,
    mileage       INTEGER,
    cost          REAL,
    description   TEXT
);

CREATE TABLE IF NOT EXISTS campaigns (
    id                   INTEGER PRIMARY KEY AUTOINCREMENT,
    campaign_id          TEXT NOT NULL UNIQUE,
    customer_id          INTEGER NOT NULL REFERENCES customers(id),
    vehicle_id           INTEGER REFERENCES vehicles(id),
    campaign_type        TEXT NOT NULL,
    campaign_title       TEXT NOT NULL,
    subject_line         TEXT NOT NULL,
    content              TEXT NOT NULL,
    status               TEXT NOT NULL DEFAULT 'pending',
    location             TEXT,
    trigger_type         TEXT NOT NULL,
    created_at           TEXT NOT NULL,
    sent_at              TEXT,
    opened_at            TEXT,
    clicked_at           TEXT,
    provider_message_id  TEXT
);

CREATE INDEX IF NOT EXISTS idx_campaigns_customer
    ON campaigns(customer_id, campaign_type, sent_at);

CREATE TABLE IF NOT EXISTS campaign_metrics (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    campaign_id  TEXT NOT NULL UNIQUE,
    total_sent   INTEGER NOT NULL DEFAULT 0,
    delivered    INTEGER NOT NULL DEFAULT 0,
    opened       INTEGER NOT NULL DEFAULT 0,
    clicked      INTEGER NOT NULL DEFAULT 0,
    bounced      INTEGER NOT NULL DEFAULT 0,
    unsubscribed INTEGER NOT NULL DEFAULT 0,
    open_rate    REAL NOT NULL DEFAULT 0,
    click_rate   REAL NOT NULL DEFAULT 0,
    bounce_rate  REAL NOT NULL DEFAULT 0,
    updated_at   TEXT NOT NULL
);
"#;

/// Store implementation over a single SQLite database file.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (creating if absent) the database at `path` and apply the
    /// schema.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create database directory: {:?}", parent))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {:?}", path))?;
        Self::init(conn)
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .context("Failed to apply database schema")?;
        debug!("Database schema ready");

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Database connection mutex poisoned"))
    }
}

fn date_to_sql(date: Option<NaiveDate>) -> Option<String> {
    date.map(|d| d.format("%Y-%m-%d").to_string())
}

fn date_from_sql(value: Option<String>, column: &str) -> Result<Option<NaiveDate>> {
    value
        .map(|s| {
            NaiveDate::parse_from_str(&s, "%Y-%m-%d")
                .with_context(|| format!("Invalid date in column {}: {}", column, s))
        })
        .transpose()
}

fn timestamp_from_sql(value: Option<String>, column: &str) -> Result<Option<DateTime<Utc>>> {
    value
        .map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .with_context(|| format!("Invalid timestamp in column {}: {}", column, s))
        })
        .transpose()
}

fn customer_from_row(row: &Row<'_>) -> rusqlite::Result<(Customer, Option<String>)> {
    Ok((
        Customer {
            id: row.get("id")?,
            name: row.get("name")?,
            email: row.get("email")?,
            phone: row.get("phone")?,
            preferred_location: row.get("preferred_location")?,
            created_at: DateTime::<Utc>::MIN_UTC, // replaced by caller
        },
        row.get("created_at")?,
    ))
}

struct VehicleRow {
    vehicle: Vehicle,
    registration_date: Option<String>,
    last_service_date: Option<String>,
    next_service_due: Option<String>,
    warranty_start: Option<String>,
    warranty_end: Option<String>,
}

fn vehicle_from_row(row: &Row<'_>) -> rusqlite::Result<VehicleRow> {
    Ok(VehicleRow {
        vehicle: Vehicle {
            id: row.get("id")?,
            customer_id: row.get("customer_id")?,
            make: row.get("make")?,
            model: row.get("model")?,
            year: row.get("year")?,
            vin: row.get("vin")?,
            registration_date: None,
            last_service_date: None,
            last_service_type: row.get("last_service_type")?,
            next_service_due: None,
            mileage: row.get("mileage")?,
            warranty_start: None,
            warranty_end: None,
        },
        registration_date: row.get("registration_date")?,
        last_service_date: row.get("last_service_date")?,
        next_service_due: row.get("next_service_due")?,
        warranty_start: row.get("warranty_start")?,
        warranty_end: row.get("warranty_end")?,
    })
}

impl VehicleRow {
    fn resolve(self) -> Result<Vehicle> {
        let mut vehicle = self.vehicle;
        vehicle.registration_date = date_from_sql(self.registration_date, "registration_date")?;
        vehicle.last_service_date = date_from_sql(self.last_service_date, "last_service_date")?;
        vehicle.next_service_due = date_from_sql(self.next_service_due, "next_service_due")?;
        vehicle.warranty_start = date_from_sql(self.warranty_start, "warranty_start")?;
        vehicle.warranty_end = date_from_sql(self.warranty_end, "warranty_end")?;
        Ok(vehicle)
    }
}

struct CampaignRow {
    campaign: Campaign,
    status: String,
    created_at: String,
    sent_at: Option<String>,
    opened_at: Option<String>,
    clicked_at: Option<String>,
}

fn campaign_from_row(row: &Row<'_>) -> rusqlite::Result<CampaignRow> {
    Ok(CampaignRow {
        campaign: Campaign {
            campaign_id: row.get("campaign_id")?,
            customer_id: row.get("customer_id")?,
            vehicle_id: row.get("vehicle_id")?,
            campaign_type: row.get("campaign_type")?,
            title: row.get("campaign_title")?,
            subject: row.get("subject_line")?,
            content: row.get("content")?,
            status: CampaignStatus::Pending, // replaced by caller
            location: row.get("location")?,
            trigger: row.get("trigger_type")?,
            created_at: DateTime::<Utc>::MIN_UTC,
            sent_at: None,
            opened_at: None,
            clicked_at: None,
            provider_message_id: row.get("provider_message_id")?,
        },
        status: row.get("status")?,
        created_at: row.get("created_at")?,
        sent_at: row.get("sent_at")?,
        opened_at: row.get("opened_at")?,
        clicked_at: row.get("clicked_at")?,
    })
}

impl CampaignRow {
    fn resolve(self) -> Result<Campaign> {
        let mut campaign = self.campaign;
        campaign.status = CampaignStatus::parse(&self.status)
            .ok_or_else(|| anyhow!("Unknown campaign status: {}", self.status))?;
        campaign.created_at = timestamp_from_sql(Some(self.created_at), "created_at")?
            .ok_or_else(|| anyhow!("Missing created_at"))?;
        campaign.sent_at = timestamp_from_sql(self.sent_at, "sent_at")?;
        campaign.opened_at = timestamp_from_sql(self.opened_at, "opened_at")?;
        campaign.clicked_at = timestamp_from_sql(self.clicked_at, "clicked_at")?;
        Ok(campaign)
    }
}

impl Store for SqliteStore {
    fn customers(&self, location: Option<&str>) -> Result<Vec<Customer>> {
        let conn = self.lock()?;

        let mut rows = Vec::new();
        let collect = |pairs: Vec<(Customer, Option<String>)>| -> Result<Vec<Customer>> {
            pairs
                .into_iter()
                .map(|(mut customer, created_at)| {
                    customer.created_at = timestamp_from_sql(created_at, "created_at")?
                        .unwrap_or(DateTime::<Utc>::MIN_UTC);
                    Ok(customer)
                })
                .collect()
        };

        match location {
            Some(loc) => {
                let mut stmt = conn.prepare(
                    "SELECT id, name, email, phone, preferred_location, created_at
                     FROM customers WHERE preferred_location = ?1 ORDER BY id",
                )?;
                for pair in stmt.query_map(params![loc], customer_from_row)? {
                    rows.push(pair?);
                }
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT id, name, email, phone, preferred_location, created_at
                     FROM customers ORDER BY id",
                )?;
                for pair in stmt.query_map([], customer_from_row)? {
                    rows.push(pair?);
                }
            }
        }

        collect(rows)
    }

    fn vehicles_for_customer(&self, customer_id: i64) -> Result<Vec<Vehicle>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, customer_id, make, model, year, vin, registration_date,
                    last_service_date, last_service_type, next_service_due,
                    mileage, warranty_start, warranty_end
             FROM vehicles WHERE customer_id = ?1 ORDER BY id",
        )?;

        let mut vehicles = Vec::new();
        for row in stmt.query_map(params![customer_id], vehicle_from_row)? {
            vehicles.push(row?.resolve()?);
        }
        Ok(vehicles)
    }

    fn service_history(&self, vehicle_id: i64) -> Result<Vec<ServiceRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, vehicle_id, service_date, service_type, mileage, cost, description
             FROM service_history WHERE vehicle_id = ?1 ORDER BY service_date DESC",
        )?;

        let mut records = Vec::new();
        for row in stmt.query_map(params![vehicle_id], |row| {
            Ok((
                ServiceRecord {
                    id: row.get("id")?,
                    vehicle_id: row.get("vehicle_id")?,
                    service_date: NaiveDate::MIN, // replaced below
                    service_type: row.get("service_type")?,
                    mileage: row.get("mileage")?,
                    cost: row.get("cost")?,
                    description: row.get("description")?,
                },
                row.get::<_, String>("service_date")?,
            ))
        })? {
            let (mut record, date) = row?;
            record.service_date = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
                .with_context(|| format!("Invalid service_date: {}", date))?;
            records.push(record);
        }
        Ok(records)
    }

    fn insert_campaign(&self, campaign: &Campaign) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO campaigns (campaign_id, customer_id, vehicle_id, campaign_type,
                 campaign_title, subject_line, content, status, location, trigger_type,
                 created_at, sent_at, provider_message_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                campaign.campaign_id,
                campaign.customer_id,
                campaign.vehicle_id,
                campaign.campaign_type,
                campaign.title,
                campaign.subject,
                campaign.content,
                campaign.status.as_str(),
                campaign.location,
                campaign.trigger,
                campaign.created_at.to_rfc3339(),
                campaign.sent_at.map(|t| t.to_rfc3339()),
                campaign.provider_message_id,
            ],
        )
        .with_context(|| format!("Failed to insert campaign {}", campaign.campaign_id))?;
        Ok(())
    }

    fn get_campaign(&self, campaign_id: &str) -> Result<Option<Campaign>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT campaign_id, customer_id, vehicle_id, campaign_type, campaign_title,
                        subject_line, content, status, location, trigger_type, created_at,
                        sent_at, opened_at, clicked_at, provider_message_id
                 FROM campaigns WHERE campaign_id = ?1",
                params![campaign_id],
                campaign_from_row,
            )
            .optional()
            .with_context(|| format!("Failed to load campaign {}", campaign_id))?;

        row.map(CampaignRow::resolve).transpose()
    }

    fn mark_sent(&self, campaign_id: &str, message_id: &str, sent_at: DateTime<Utc>) -> Result<()> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE campaigns
             SET status = 'sent', sent_at = ?2, provider_message_id = ?3
             WHERE campaign_id = ?1 AND status = 'pending'",
            params![campaign_id, sent_at.to_rfc3339(), message_id],
        )?;

        if updated == 0 {
            return Err(anyhow!(
                "Campaign {} not found or not pending",
                campaign_id
            ));
        }
        Ok(())
    }

    fn mark_failed(&self, campaign_id: &str) -> Result<()> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE campaigns SET status = 'failed'
             WHERE campaign_id = ?1 AND status = 'pending'",
            params![campaign_id],
        )?;

        if updated == 0 {
            return Err(anyhow!(
                "Campaign {} not found or not pending",
                campaign_id
            ));
        }
        Ok(())
    }

    fn last_sent_at(
        &self,
        customer_id: i64,
        campaign_type: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let conn = self.lock()?;
        let value: Option<String> = conn
            .query_row(
                "SELECT MAX(sent_at) FROM campaigns
                 WHERE customer_id = ?1 AND campaign_type = ?2 AND status = 'sent'",
                params![customer_id, campaign_type],
                |row| row.get(0),
            )
            .optional()?
            .flatten();

        timestamp_from_sql(value, "sent_at")
    }

    fn upsert_metrics(&self, metrics: &CampaignMetrics) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO campaign_metrics (campaign_id, total_sent, delivered, opened,
                 clicked, bounced, unsubscribed, open_rate, click_rate, bounce_rate, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(campaign_id) DO UPDATE SET
                 total_sent = excluded.total_sent,
                 delivered = excluded.delivered,
                 opened = excluded.opened,
                 clicked = excluded.clicked,
                 bounced = excluded.bounced,
                 unsubscribed = excluded.unsubscribed,
                 open_rate = excluded.open_rate,
                 click_rate = excluded.click_rate,
                 bounce_rate = excluded.bounce_rate,
                 updated_at = excluded.updated_at",
            params![
                metrics.campaign_id,
                metrics.total_sent,
                metrics.delivered,
                metrics.opened,
                metrics.clicked,
                metrics.bounced,
                metrics.unsubscribed,
                metrics.open_rate,
                metrics.click_rate,
                metrics.bounce_rate,
                Utc::now().to_rfc3339(),
            ],
        )
        .with_context(|| format!("Failed to upsert metrics for {}", metrics.campaign_id))?;
        Ok(())
    }

    fn insert_customer(&self, customer: &Customer) -> Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO customers (name, email, phone, preferred_location, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                customer.name,
                customer.email,
                customer.phone,
                customer.preferred_location,
                customer.created_at.to_rfc3339(),
            ],
        )
        .with_context(|| format!("Failed to insert customer {}", customer.email))?;
        Ok(conn.last_insert_rowid())
    }

    fn insert_vehicle(&self, vehicle: &Vehicle) -> Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO vehicles (customer_id, make, model, year, vin, registration_date,
                 last_service_date, last_service_type, next_service_due, mileage,
                 warranty_start, warranty_end)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                vehicle.customer_id,
                vehicle.make,
                vehicle.model,
                vehicle.year,
                vehicle.vin,
                date_to_sql(vehicle.registration_date),
                date_to_sql(vehicle.last_service_date),
                vehicle.last_service_type,
                date_to_sql(vehicle.next_service_due),
                vehicle.mileage,
                date_to_sql(vehicle.warranty_start),
                date_to_sql(vehicle.warranty_end),
            ],
        )
        .context("Failed to insert vehicle")?;
        Ok(conn.last_insert_rowid())
    }

    fn insert_service_record(&self, record: &ServiceRecord) -> Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO service_history (vehicle_id, service_date, service_type,
                 mileage, cost, description)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.vehicle_id,
                record.service_date.format("%Y-%m-%d").to_string(),
                record.service_type,
                record.mileage,
                record.cost,
                record.description,
            ],
        )
        .context("Failed to insert service record")?;
        Ok(conn.last_insert_rowid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Trigger;

    fn test_customer(email: &str, location: Option<&str>) -> Customer {
        Customer {
            id: 0,
            name: "Asha Rao".to_string(),
            email: email.to_string(),
            phone: None,
            preferred_location: location.map(String::from),
            created_at: Utc::now(),
        }
    }

    fn test_campaign(id: &str, customer_id: i64) -> Campaign {
        Campaign {
            campaign_id: id.to_string(),
            customer_id,
            vehicle_id: None,
            campaign_type: "overdue_service".to_string(),
            title: "Service Reminder".to_string(),
            subject: "Your car misses you".to_string(),
            content: "Hello".to_string(),
            status: CampaignStatus::Pending,
            location: Some("Mumbai".to_string()),
            trigger: Trigger::Scheduled.as_str().to_string(),
            created_at: Utc::now(),
            sent_at: None,
            opened_at: None,
            clicked_at: None,
            provider_message_id: None,
        }
    }

    #[test]
    fn test_customers_filtered_by_location() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .insert_customer(&test_customer("a@example.com", Some("Mumbai")))
            .unwrap();
        store
            .insert_customer(&test_customer("b@example.com", Some("Delhi")))
            .unwrap();

        let mumbai = store.customers(Some("Mumbai")).unwrap();
        assert_eq!(mumbai.len(), 1);
        assert_eq!(mumbai[0].email, "a@example.com");

        let all = store.customers(None).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_vehicle_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let customer_id = store
            .insert_customer(&test_customer("a@example.com", None))
            .unwrap();

        let vehicle = Vehicle {
            id: 0,
            customer_id,
            make: "Honda".to_string(),
            model: "City".to_string(),
            year: 2021,
            vin: Some("VIN123".to_string()),
            registration_date: None,
            last_service_date: NaiveDate::from_ymd_opt(2026, 1, 15),
            last_service_type: Some("Oil Change".to_string()),
            next_service_due: NaiveDate::from_ymd_opt(2026, 7, 15),
            mileage: Some(24_000),
            warranty_start: None,
            warranty_end: NaiveDate::from_ymd_opt(2027, 1, 1),
        };
        store.insert_vehicle(&vehicle).unwrap();

        let loaded = store.vehicles_for_customer(customer_id).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].next_service_due, vehicle.next_service_due);
        assert_eq!(loaded[0].warranty_end, vehicle.warranty_end);
        assert_eq!(loaded[0].mileage, Some(24_000));
    }

    #[test]
    fn test_campaign_lifecycle() {
        let store = SqliteStore::open_in_memory().unwrap();
        let customer_id = store
            .insert_customer(&test_customer("a@example.com", None))
            .unwrap();

        store
            .insert_campaign(&test_campaign("cmp-0001", customer_id))
            .unwrap();

        let loaded = store.get_campaign("cmp-0001").unwrap().unwrap();
        assert_eq!(loaded.status, CampaignStatus::Pending);

        store
            .mark_sent("cmp-0001", "<msg-1>", Utc::now())
            .unwrap();
        let sent = store.get_campaign("cmp-0001").unwrap().unwrap();
        assert_eq!(sent.status, CampaignStatus::Sent);
        assert_eq!(sent.provider_message_id.as_deref(), Some("<msg-1>"));
        assert!(sent.sent_at.is_some());

        // Already sent, cannot mark again
        assert!(store.mark_sent("cmp-0001", "<msg-2>", Utc::now()).is_err());
        assert!(store.mark_failed("cmp-0001").is_err());
    }

    #[test]
    fn test_duplicate_campaign_id_rejected() {
        let store = SqliteStore::open_in_memory().unwrap();
        let customer_id = store
            .insert_customer(&test_customer("a@example.com", None))
            .unwrap();

        store
            .insert_campaign(&test_campaign("cmp-0001", customer_id))
            .unwrap();
        assert!(store
            .insert_campaign(&test_campaign("cmp-0001", customer_id))
            .is_err());
    }

    #[test]
    fn test_last_sent_at_for_suppression() {
        let store = SqliteStore::open_in_memory().unwrap();
        let customer_id = store
            .insert_customer(&test_customer("a@example.com", None))
            .unwrap();

        assert!(store
            .last_sent_at(customer_id, "overdue_service")
            .unwrap()
            .is_none());

        store
            .insert_campaign(&test_campaign("cmp-0001", customer_id))
            .unwrap();
        let sent_at = Utc::now();
        store.mark_sent("cmp-0001", "<msg-1>", sent_at).unwrap();

        let last = store
            .last_sent_at(customer_id, "overdue_service")
            .unwrap()
            .unwrap();
        assert_eq!(last.timestamp(), sent_at.timestamp());

        // Different campaign type is not suppressed
        assert!(store
            .last_sent_at(customer_id, "holiday")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_metrics_upsert() {
        let store = SqliteStore::open_in_memory().unwrap();

        let mut metrics = CampaignMetrics::for_campaign("cmp-0001");
        metrics.total_sent = 1;
        metrics.delivered = 1;
        store.upsert_metrics(&metrics).unwrap();

        // Second upsert overwrites instead of duplicating
        metrics.opened = 1;
        metrics.recompute_rates();
        store.upsert_metrics(&metrics).unwrap();
    }
}
