//! Command-line interface for drivecast.
//!
//! Provides commands for executing campaign runs, inspecting run logs,
//! seeding a demo database, and debugging configuration.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use uuid::Uuid;

use crate::adapters::{BrevoMailer, HolidayCalendar, OpenAiGenerator, OpenWeather};
use crate::config::{config, Config};
use crate::core::{Collaborators, Coordinator, RunLog};
use crate::domain::{Customer, RunRequest, RunStatus, Trigger, Vehicle};
use crate::storage::{SqliteStore, Store};

/// drivecast - Vehicle-service campaign pipeline
#[derive(Parser, Debug)]
#[command(name = "drivecast")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Execute a campaign run
    Run {
        /// Target location (uses the configured default when omitted for
        /// location-wide triggers)
        #[arg(short, long)]
        location: Option<String>,

        /// What initiated the run
        #[arg(short, long, value_enum, default_value = "scheduled")]
        trigger: TriggerArg,

        /// Run once per listed location (comma-separated)
        #[arg(long, value_delimiter = ',')]
        locations: Option<Vec<String>>,

        /// Execute all stages but simulate the sends
        #[arg(long)]
        dry_run: bool,
    },

    /// Check the status of a run
    Status {
        /// Run ID (UUID)
        run_id: String,
    },

    /// List recent runs
    Runs {
        /// Maximum number of runs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Seed the database with sample customers and vehicles
    Seed,

    /// Show resolved configuration (debug)
    Config,
}

/// Trigger type for CLI (maps to Trigger)
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum TriggerArg {
    Scheduled,
    WeatherAlert,
    Holiday,
    Manual,
}

impl From<TriggerArg> for Trigger {
    fn from(t: TriggerArg) -> Self {
        match t {
            TriggerArg::Scheduled => Trigger::Scheduled,
            TriggerArg::WeatherAlert => Trigger::WeatherAlert,
            TriggerArg::Holiday => Trigger::Holiday,
            TriggerArg::Manual => Trigger::Manual,
        }
    }
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run {
                location,
                trigger,
                locations,
                dry_run,
            } => run_campaign(location, trigger.into(), locations, dry_run).await,
            Commands::Status { run_id } => show_status(&run_id).await,
            Commands::Runs { limit } => list_runs(limit).await,
            Commands::Seed => seed_database(),
            Commands::Config => show_config(),
        }
    }
}

/// Build the coordinator from resolved configuration. Collaborators with
/// missing API keys are left out and the pipeline degrades accordingly.
fn build_coordinator(config: &Config) -> Result<Coordinator> {
    let timeout = config.campaigns.request_timeout();
    let store = Arc::new(
        SqliteStore::open(&config.database_path)
            .with_context(|| format!("Failed to open database: {:?}", config.database_path))?,
    );

    let weather: Option<Arc<dyn crate::adapters::WeatherProvider>> =
        match OpenWeather::new(&config.weather, timeout) {
            Ok(provider) => Some(Arc::new(provider)),
            Err(_) => {
                eprintln!("Note: no weather API key configured, running without weather context");
                None
            }
        };
    let generator: Option<Arc<dyn crate::adapters::ContentGenerator>> =
        match OpenAiGenerator::new(&config.generation, timeout) {
            Ok(generator) => Some(Arc::new(generator)),
            Err(_) => {
                eprintln!("Note: no generation API key configured, using fallback templates");
                None
            }
        };
    let mailer: Option<Arc<dyn crate::adapters::EmailDelivery>> =
        match BrevoMailer::new(&config.mailer, timeout) {
            Ok(mailer) => Some(Arc::new(mailer)),
            Err(_) => None,
        };
    let holidays = HolidayCalendar::new(config.holidays_path.as_deref());

    Ok(Coordinator::new(
        Collaborators {
            store,
            weather,
            holidays: Some(Arc::new(holidays)),
            generator,
            mailer,
        },
        RunLog::new(&config.runs_dir),
        config.campaigns.clone(),
    ))
}

/// Execute a campaign run and print its summary
async fn run_campaign(
    location: Option<String>,
    trigger: Trigger,
    locations: Option<Vec<String>>,
    dry_run: bool,
) -> Result<()> {
    let config = config()?;

    // Location-wide triggers need a location; fall back to the default.
    let location = match location {
        Some(loc) => Some(loc),
        None if trigger.is_location_wide() && locations.is_none() => {
            Some(config.weather.default_location.clone())
        }
        None => None,
    };

    let coordinator = build_coordinator(config)?;
    let request = RunRequest {
        location,
        trigger,
        locations,
        dry_run,
    };

    let summaries = coordinator.run_many(&request).await;
    let mut any_failed = false;

    for summary in &summaries {
        print_summary(summary);
        any_failed |= summary.status == RunStatus::Failed;
    }

    if any_failed {
        std::process::exit(1);
    }
    Ok(())
}

fn print_summary(summary: &crate::domain::RunSummary) {
    let status = match summary.status {
        RunStatus::Success => "success",
        RunStatus::PartialSuccess => "partial success",
        RunStatus::Failed => "FAILED",
    };

    println!(
        "\nRun {} [{}]{}",
        summary.run_id,
        status,
        if summary.dry_run { " (dry run)" } else { "" }
    );
    println!("  Trigger:   {}", summary.trigger);
    println!(
        "  Location:  {}",
        summary.location.as_deref().unwrap_or("all")
    );
    println!("  Targeted:  {}", summary.total_targeted);
    println!("  Created:   {}", summary.campaigns_created);
    println!("  Sent:      {}", summary.campaigns_sent);
    println!("  Failed:    {}", summary.campaigns_failed);
    println!("  Skipped:   {}", summary.skipped);
    println!("  Elapsed:   {}ms", summary.elapsed_ms);

    for error in &summary.errors {
        println!(
            "  error [{}] {}: {}",
            error.stage,
            error.subject.as_deref().unwrap_or("-"),
            error.reason
        );
    }
}

/// Show the status of a run from its log
async fn show_status(run_id_str: &str) -> Result<()> {
    let run_id = Uuid::parse_str(run_id_str)
        .with_context(|| format!("Invalid run ID: {}", run_id_str))?;

    let config = config()?;
    let run_log = RunLog::new(&config.runs_dir);
    let events = run_log.replay(run_id).await?;

    if events.is_empty() {
        anyhow::bail!("No run found with ID: {}", run_id);
    }

    println!("Run ID: {}", run_id);
    println!("\nStages:");
    for event in &events {
        match &event.detail {
            Some(detail) => println!("  {}  {}  {}", event.at, event.stage, detail),
            None => println!("  {}  {}", event.at, event.stage),
        }
    }

    if let Some(summary) = events.into_iter().rev().find_map(|e| e.summary) {
        print_summary(&summary);
    } else {
        println!("\nRun has not completed yet");
    }
    Ok(())
}

/// List recent runs with their outcomes
async fn list_runs(limit: usize) -> Result<()> {
    let config = config()?;
    let run_log = RunLog::new(&config.runs_dir);
    let run_ids = run_log.list_runs(limit).await?;

    if run_ids.is_empty() {
        println!("No runs found in {}", config.runs_dir.display());
        return Ok(());
    }

    for run_id in run_ids {
        match run_log.summary(run_id).await? {
            Some(summary) => println!(
                "{}  {:?}  trigger={} sent={} failed={}",
                run_id,
                summary.status,
                summary.trigger,
                summary.campaigns_sent,
                summary.campaigns_failed
            ),
            None => println!("{}  (incomplete)", run_id),
        }
    }
    Ok(())
}

/// Populate the database with a demo fleet
fn seed_database() -> Result<()> {
    let config = config()?;
    let store = SqliteStore::open(&config.database_path)
        .with_context(|| format!("Failed to open database: {:?}", config.database_path))?;

    let today = Utc::now().date_naive();
    let samples = [
        ("Asha Rao", "asha.rao@example.com", "Mumbai", "Toyota", "Camry", 2020, -10i64, 400),
        ("Vikram Singh", "vikram.singh@example.com", "Mumbai", "Honda", "City", 2022, 15, 600),
        ("Meera Iyer", "meera.iyer@example.com", "Mumbai", "Hyundai", "Creta", 2021, 45, 30),
        ("Rahul Verma", "rahul.verma@example.com", "Delhi", "Maruti", "Swift", 2019, -30, -100),
        ("Priya Nair", "priya.nair@example.com", "Delhi", "Tata", "Nexon", 2023, 90, 700),
    ];

    for (name, email, city, make, model, year, due_offset, warranty_offset) in samples {
        let customer_id = store.insert_customer(&Customer {
            id: 0,
            name: name.to_string(),
            email: email.to_string(),
            phone: None,
            preferred_location: Some(city.to_string()),
            created_at: Utc::now(),
        })?;

        store.insert_vehicle(&Vehicle {
            id: 0,
            customer_id,
            make: make.to_string(),
            model: model.to_string(),
            year,
            vin: None,
            registration_date: Some(today - Duration::days(365 * (2026 - year as i64))),
            last_service_date: Some(today + Duration::days(due_offset) - Duration::days(180)),
            last_service_type: Some("General Service".to_string()),
            next_service_due: Some(today + Duration::days(due_offset)),
            mileage: Some(12_000 * (2026 - year as i64)),
            warranty_start: None,
            warranty_end: Some(today + Duration::days(warranty_offset)),
        })?;
    }

    println!(
        "Seeded {} customers into {}",
        samples.len(),
        config.database_path.display()
    );
    Ok(())
}

/// Show resolved configuration with secrets masked
fn show_config() -> Result<()> {
    let config = config()?;

    println!("Config file: {:?}", config.config_file);
    println!("Database:    {}", config.database_path.display());
    println!("Runs dir:    {}", config.runs_dir.display());
    println!("Holidays:    {:?}", config.holidays_path);
    println!();
    println!("Weather:");
    println!("  api_url:          {}", config.weather.api_url);
    println!("  api_key:          {}", mask(&config.weather.api_key));
    println!("  default_location: {}", config.weather.default_location);
    println!("Generation:");
    println!("  api_url: {}", config.generation.api_url);
    println!("  api_key: {}", mask(&config.generation.api_key));
    println!("  model:   {}", config.generation.model);
    println!("Mailer:");
    println!("  api_url: {}", config.mailer.api_url);
    println!("  api_key: {}", mask(&config.mailer.api_key));
    println!("  sender:  {} <{}>", config.mailer.sender_name, config.mailer.sender_email);
    println!("Campaigns:");
    println!("  batch_size:          {}", config.campaigns.batch_size);
    println!("  max_retry_attempts:  {}", config.campaigns.max_retry_attempts);
    println!("  worker_limit:        {}", config.campaigns.worker_limit);
    println!("  upcoming_window:     {} days", config.campaigns.upcoming_service_days);
    println!("  warranty_window:     {} days", config.campaigns.warranty_expiry_days);
    println!("  holiday_lookahead:   {} days", config.campaigns.holiday_lookahead_days);
    println!("  suppression_days:    {:?}", config.campaigns.suppression_days);
    Ok(())
}

fn mask(key: &Option<String>) -> String {
    match key {
        Some(k) if k.len() > 4 => format!("****{}", &k[k.len() - 4..]),
        Some(_) => "****".to_string(),
        None => "(not set)".to_string(),
    }
}
