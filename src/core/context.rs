//! Run context collection: weather and holiday facts.
//!
//! Context is best-effort. A failed or timed-out lookup degrades to
//! absence (no weather, no holidays) and the run proceeds; composition
//! simply has fewer facts to work with.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::adapters::{Conditions, HolidayProvider, Observance, WeatherProvider};
use crate::config::CampaignConfig;
use crate::domain::Trigger;

/// Time source, swapped out by tests that need a fixed reference date.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Everything later stages may personalize against for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunContext {
    pub location: Option<String>,

    pub trigger: Trigger,

    /// Date all lifecycle windows are evaluated against
    pub reference_date: NaiveDate,

    /// Current conditions for the run location, when available
    pub weather: Option<Conditions>,

    /// Observances within the look-ahead window, soonest first
    pub holidays: Vec<Observance>,

    pub collected_at: DateTime<Utc>,
}

struct CachedWeather {
    conditions: Conditions,
    fetched_at: DateTime<Utc>,
}

struct CachedHolidays {
    observances: Vec<Observance>,
    fetched_at: DateTime<Utc>,
}

/// Collects weather + holiday context with per-location TTL caching.
///
/// Cache freshness is judged against the injected [`Clock`], so tests
/// drive expiry by advancing the clock rather than sleeping.
///
/// Providers are optional: a deployment without a weather API key still
/// runs, it just never sees weather context.
pub struct ContextCollector {
    weather: Option<Arc<dyn WeatherProvider>>,
    holidays: Option<Arc<dyn HolidayProvider>>,
    weather_cache: Mutex<HashMap<String, CachedWeather>>,
    holiday_cache: Mutex<HashMap<String, CachedHolidays>>,
    weather_ttl: chrono::Duration,
    holiday_ttl: chrono::Duration,
    call_timeout: Duration,
    lookahead_days: i64,
    clock: Arc<dyn Clock>,
}

impl ContextCollector {
    pub fn new(
        weather: Option<Arc<dyn WeatherProvider>>,
        holidays: Option<Arc<dyn HolidayProvider>>,
        config: &CampaignConfig,
    ) -> Self {
        Self {
            weather,
            holidays,
            weather_cache: Mutex::new(HashMap::new()),
            holiday_cache: Mutex::new(HashMap::new()),
            weather_ttl: chrono::Duration::seconds(config.weather_cache_ttl_secs as i64),
            holiday_ttl: chrono::Duration::seconds(config.holiday_cache_ttl_secs as i64),
            call_timeout: config.request_timeout(),
            lookahead_days: config.holiday_lookahead_days,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Collect context for one run. Never fails; lookup errors are logged
    /// and degrade to absence.
    pub async fn collect(
        &self,
        location: Option<&str>,
        trigger: Trigger,
        reference_date: NaiveDate,
    ) -> RunContext {
        let weather = match location {
            Some(loc) => self.weather_for(loc).await,
            None => None,
        };

        let locale = location.unwrap_or("all");
        let holidays = self.holidays_for(locale, reference_date).await;

        RunContext {
            location: location.map(String::from),
            trigger,
            reference_date,
            weather,
            holidays,
            collected_at: self.clock.now(),
        }
    }

    async fn weather_for(&self, location: &str) -> Option<Conditions> {
        let provider = self.weather.as_ref()?;

        let now = self.clock.now();
        if let Ok(cache) = self.weather_cache.lock() {
            if let Some(cached) = cache.get(location) {
                if now - cached.fetched_at < self.weather_ttl {
                    debug!(location, "Weather cache hit");
                    return Some(cached.conditions.clone());
                }
            }
        }

        let result = tokio::time::timeout(self.call_timeout, provider.current(location)).await;
        match result {
            Ok(Ok(conditions)) => {
                if let Ok(mut cache) = self.weather_cache.lock() {
                    cache.insert(
                        location.to_string(),
                        CachedWeather {
                            conditions: conditions.clone(),
                            fetched_at: self.clock.now(),
                        },
                    );
                }
                Some(conditions)
            }
            Ok(Err(e)) => {
                warn!(location, error = %e, "Weather lookup failed, continuing without");
                None
            }
            Err(_) => {
                warn!(location, "Weather lookup timed out, continuing without");
                None
            }
        }
    }

    async fn holidays_for(&self, locale: &str, from: NaiveDate) -> Vec<Observance> {
        let Some(provider) = self.holidays.as_ref() else {
            return Vec::new();
        };

        let cache_key = format!("{}:{}", locale, from);
        let now = self.clock.now();
        if let Ok(cache) = self.holiday_cache.lock() {
            if let Some(cached) = cache.get(&cache_key) {
                if now - cached.fetched_at < self.holiday_ttl {
                    debug!(locale, "Holiday cache hit");
                    return cached.observances.clone();
                }
            }
        }

        let lookup = provider.upcoming(locale, from, self.lookahead_days);
        let result = tokio::time::timeout(self.call_timeout, lookup).await;
        match result {
            Ok(Ok(observances)) => {
                if let Ok(mut cache) = self.holiday_cache.lock() {
                    cache.insert(
                        cache_key,
                        CachedHolidays {
                            observances: observances.clone(),
                            fetched_at: self.clock.now(),
                        },
                    );
                }
                observances
            }
            Ok(Err(e)) => {
                warn!(locale, error = %e, "Holiday lookup failed, continuing without");
                Vec::new()
            }
            Err(_) => {
                warn!(locale, "Holiday lookup timed out, continuing without");
                Vec::new()
            }
        }
    }
}
