//! Holiday calendar backed by a JSON file, with built-in defaults.
//!
//! The calendar file is a JSON array of observances. When no file is
//! configured (or it cannot be read) a small built-in set of major Indian
//! festivals is used so holiday-triggered runs work out of the box.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use serde::Deserialize;
use tracing::warn;

use super::{HolidayProvider, Observance};

/// File schema for one calendar entry.
#[derive(Debug, Clone, Deserialize)]
struct CalendarEntry {
    name: String,
    date: NaiveDate,
    #[serde(default = "default_kind")]
    kind: String,
    #[serde(default)]
    significance: Option<String>,
    /// Restrict the entry to one locale; unset means all locales
    #[serde(default)]
    locale: Option<String>,
}

fn default_kind() -> String {
    "Festival".to_string()
}

/// JSON-file holiday lookup.
pub struct HolidayCalendar {
    path: Option<PathBuf>,
    entries: Option<Vec<CalendarEntry>>,
}

impl HolidayCalendar {
    /// Load from a calendar file; falls back to built-in defaults when the
    /// file is absent or unreadable.
    pub fn new(path: Option<&Path>) -> Self {
        let entries = path.and_then(|p| match Self::load_file(p) {
            Ok(entries) => Some(entries),
            Err(e) => {
                warn!(path = %p.display(), error = %e, "Falling back to built-in holiday calendar");
                None
            }
        });

        Self {
            path: path.map(Path::to_path_buf),
            entries,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn load_file(path: &Path) -> Result<Vec<CalendarEntry>> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read holiday calendar: {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse holiday calendar: {}", path.display()))
    }

    /// Major festivals used when no calendar file is configured.
    fn default_entries(year: i32) -> Vec<CalendarEntry> {
        let fixed = [
            ("Dussehra", 10, 24, "Major Festival", "Victory of good over evil"),
            ("Diwali", 11, 12, "Major Festival", "Festival of lights and prosperity"),
            ("Holi", 3, 14, "Festival", "Festival of colors and spring"),
            ("Eid", 4, 10, "Religious Festival", "End of Ramadan, celebration and giving"),
        ];

        // Two calendar years so a look-ahead window spanning new year
        // still finds the spring festivals.
        let mut entries = Vec::new();
        for y in [year, year + 1] {
            for (name, month, day, kind, significance) in fixed {
                if let Some(date) = NaiveDate::from_ymd_opt(y, month, day) {
                    entries.push(CalendarEntry {
                        name: name.to_string(),
                        date,
                        kind: kind.to_string(),
                        significance: Some(significance.to_string()),
                        locale: None,
                    });
                }
            }
        }
        entries
    }
}

#[async_trait]
impl HolidayProvider for HolidayCalendar {
    async fn upcoming(
        &self,
        locale: &str,
        from: NaiveDate,
        lookahead_days: i64,
    ) -> Result<Vec<Observance>> {
        let until = from + chrono::Duration::days(lookahead_days);

        let defaults;
        let entries = match &self.entries {
            Some(entries) => entries.as_slice(),
            None => {
                defaults = Self::default_entries(from.year());
                defaults.as_slice()
            }
        };

        let mut upcoming: Vec<Observance> = entries
            .iter()
            .filter(|e| e.date >= from && e.date <= until)
            .filter(|e| {
                e.locale
                    .as_deref()
                    .map(|l| l.eq_ignore_ascii_case(locale))
                    .unwrap_or(true)
            })
            .map(|e| Observance {
                name: e.name.clone(),
                date: e.date,
                kind: e.kind.clone(),
                significance: e.significance.clone(),
            })
            .collect();

        // Closest first
        upcoming.sort_by_key(|o| o.date);
        Ok(upcoming)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn test_default_calendar_window() {
        let calendar = HolidayCalendar::new(None);

        // 14 days before default Diwali date
        let upcoming = calendar
            .upcoming("in", date(2025, 11, 1), 14)
            .await
            .unwrap();

        assert_eq!(upcoming.len(), 1);
        assert_eq!(upcoming[0].name, "Diwali");
    }

    #[tokio::test]
    async fn test_window_excludes_out_of_range() {
        let calendar = HolidayCalendar::new(None);

        let upcoming = calendar.upcoming("in", date(2025, 1, 2), 7).await.unwrap();
        assert!(upcoming.is_empty());
    }

    #[tokio::test]
    async fn test_file_calendar_with_locale_filter() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("holidays.json");
        std::fs::write(
            &path,
            r#"[
                {"name": "Pongal", "date": "2025-01-14", "kind": "Festival", "locale": "in"},
                {"name": "Tet", "date": "2025-01-29", "kind": "Major Festival", "locale": "vn"}
            ]"#,
        )
        .unwrap();

        let calendar = HolidayCalendar::new(Some(&path));
        let upcoming = calendar.upcoming("in", date(2025, 1, 10), 30).await.unwrap();

        assert_eq!(upcoming.len(), 1);
        assert_eq!(upcoming[0].name, "Pongal");
    }

    #[tokio::test]
    async fn test_sorted_closest_first() {
        let calendar = HolidayCalendar::new(None);

        let upcoming = calendar
            .upcoming("in", date(2025, 10, 20), 30)
            .await
            .unwrap();

        assert!(upcoming.len() >= 2);
        assert!(upcoming.windows(2).all(|w| w[0].date <= w[1].date));
    }
}
