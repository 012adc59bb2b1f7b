//! Configuration for drivecast.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (DRIVECAST_*, WEATHER_API_KEY, BREVO_API_KEY, ...)
//! 2. Config file (.drivecast/config.yaml)
//! 3. Defaults
//!
//! Config file discovery searches the current directory and parents for
//! .drivecast/config.yaml. Relative paths in the file resolve against the
//! config file's parent directory.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<std::result::Result<Config, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub weather: Option<WeatherSection>,
    #[serde(default)]
    pub generation: Option<GenerationSection>,
    #[serde(default)]
    pub mailer: Option<MailerSection>,
    #[serde(default)]
    pub campaigns: Option<CampaignSection>,
    #[serde(default)]
    pub paths: Option<PathsSection>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WeatherSection {
    pub api_key: Option<String>,
    pub api_url: Option<String>,
    pub default_location: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerationSection {
    pub api_key: Option<String>,
    pub api_url: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MailerSection {
    pub api_key: Option<String>,
    pub api_url: Option<String>,
    pub sender_email: Option<String>,
    pub sender_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CampaignSection {
    pub batch_size: Option<usize>,
    pub max_retry_attempts: Option<u32>,
    pub worker_limit: Option<usize>,
    pub upcoming_service_days: Option<i64>,
    pub warranty_expiry_days: Option<i64>,
    pub holiday_lookahead_days: Option<i64>,
    pub suppression_days: Option<i64>,
    pub request_timeout_secs: Option<u64>,
    pub weather_cache_ttl_secs: Option<u64>,
    pub holiday_cache_ttl_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsSection {
    /// SQLite database file (relative to config file parent)
    pub database: Option<String>,
    /// Directory for per-run JSONL logs
    pub runs: Option<String>,
    /// Holiday calendar JSON file
    pub holidays: Option<String>,
}

/// Resolved configuration used throughout the pipeline.
#[derive(Debug, Clone)]
pub struct Config {
    pub weather: WeatherConfig,
    pub generation: GenerationConfig,
    pub mailer: MailerConfig,
    pub campaigns: CampaignConfig,
    pub database_path: PathBuf,
    pub runs_dir: PathBuf,
    pub holidays_path: Option<PathBuf>,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct WeatherConfig {
    pub api_key: Option<String>,
    pub api_url: String,
    pub default_location: String,
}

#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub api_key: Option<String>,
    pub api_url: String,
    pub model: String,
    pub temperature: f64,
}

#[derive(Debug, Clone)]
pub struct MailerConfig {
    pub api_key: Option<String>,
    pub api_url: String,
    pub sender_email: String,
    pub sender_name: String,
}

/// Tunables for targeting windows, dispatch batching, and caching.
#[derive(Debug, Clone)]
pub struct CampaignConfig {
    /// Max concurrent outbound sends per batch
    pub batch_size: usize,

    /// Delivery attempts per campaign before marking failed
    pub max_retry_attempts: u32,

    /// Bound on concurrent generation calls
    pub worker_limit: usize,

    /// Window for the upcoming-service category (days from reference date)
    pub upcoming_service_days: i64,

    /// Window for the warranty-expiring category
    pub warranty_expiry_days: i64,

    /// Look-ahead for holiday context collection
    pub holiday_lookahead_days: i64,

    /// Skip customers with a sent campaign for the same reason within this
    /// many days; None disables suppression
    pub suppression_days: Option<i64>,

    /// Timeout applied to every external collaborator call
    pub request_timeout_secs: u64,

    pub weather_cache_ttl_secs: u64,

    pub holiday_cache_ttl_secs: u64,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            max_retry_attempts: 3,
            worker_limit: 8,
            upcoming_service_days: 30,
            warranty_expiry_days: 60,
            holiday_lookahead_days: 14,
            suppression_days: None,
            request_timeout_secs: 10,
            weather_cache_ttl_secs: 3600,
            holiday_cache_ttl_secs: 86_400,
        }
    }
}

impl CampaignConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".drivecast").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's parent
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Load configuration from all sources
fn load_config() -> Result<Config> {
    let config_path = find_config_file();
    let file = match config_path.as_deref() {
        Some(path) => load_config_file(path)?,
        None => ConfigFile::default(),
    };

    // Base for relative paths: the directory holding .drivecast/
    let base_dir = config_path
        .as_deref()
        .and_then(|p| p.parent())
        .and_then(|p| p.parent())
        .map(Path::to_path_buf);

    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".drivecast");
    let home = env_var("DRIVECAST_HOME")
        .map(PathBuf::from)
        .or_else(|| base_dir.as_ref().map(|b| b.join(".drivecast")))
        .unwrap_or(default_home);

    let weather_file = file.weather.unwrap_or_default();
    let weather = WeatherConfig {
        api_key: env_var("WEATHER_API_KEY").or(weather_file.api_key),
        api_url: env_var("WEATHER_API_URL")
            .or(weather_file.api_url)
            .unwrap_or_else(|| "https://api.openweathermap.org/data/2.5".to_string()),
        default_location: env_var("DEFAULT_LOCATION")
            .or(weather_file.default_location)
            .unwrap_or_else(|| "Mumbai".to_string()),
    };

    let generation_file = file.generation.unwrap_or_default();
    let generation = GenerationConfig {
        api_key: env_var("OPENAI_API_KEY").or(generation_file.api_key),
        api_url: env_var("OPENAI_API_URL")
            .or(generation_file.api_url)
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
        model: env_var("OPENAI_MODEL")
            .or(generation_file.model)
            .unwrap_or_else(|| "gpt-4".to_string()),
        temperature: env_var("OPENAI_TEMPERATURE")
            .and_then(|v| v.parse().ok())
            .or(generation_file.temperature)
            .unwrap_or(0.7),
    };

    let mailer_file = file.mailer.unwrap_or_default();
    let mailer = MailerConfig {
        api_key: env_var("BREVO_API_KEY").or(mailer_file.api_key),
        api_url: env_var("BREVO_API_URL")
            .or(mailer_file.api_url)
            .unwrap_or_else(|| "https://api.brevo.com/v3".to_string()),
        sender_email: env_var("BREVO_SENDER_EMAIL")
            .or(mailer_file.sender_email)
            .unwrap_or_else(|| "service@drivecast.local".to_string()),
        sender_name: env_var("BREVO_SENDER_NAME")
            .or(mailer_file.sender_name)
            .unwrap_or_else(|| "Smart Campaigns".to_string()),
    };

    let defaults = CampaignConfig::default();
    let campaigns_file = file.campaigns.unwrap_or_default();
    let campaigns = CampaignConfig {
        batch_size: env_var("CAMPAIGN_BATCH_SIZE")
            .and_then(|v| v.parse().ok())
            .or(campaigns_file.batch_size)
            .unwrap_or(defaults.batch_size),
        max_retry_attempts: env_var("MAX_RETRY_ATTEMPTS")
            .and_then(|v| v.parse().ok())
            .or(campaigns_file.max_retry_attempts)
            .unwrap_or(defaults.max_retry_attempts),
        worker_limit: campaigns_file.worker_limit.unwrap_or(defaults.worker_limit),
        upcoming_service_days: campaigns_file
            .upcoming_service_days
            .unwrap_or(defaults.upcoming_service_days),
        warranty_expiry_days: campaigns_file
            .warranty_expiry_days
            .unwrap_or(defaults.warranty_expiry_days),
        holiday_lookahead_days: campaigns_file
            .holiday_lookahead_days
            .unwrap_or(defaults.holiday_lookahead_days),
        suppression_days: campaigns_file.suppression_days.or(defaults.suppression_days),
        request_timeout_secs: campaigns_file
            .request_timeout_secs
            .unwrap_or(defaults.request_timeout_secs),
        weather_cache_ttl_secs: campaigns_file
            .weather_cache_ttl_secs
            .unwrap_or(defaults.weather_cache_ttl_secs),
        holiday_cache_ttl_secs: campaigns_file
            .holiday_cache_ttl_secs
            .unwrap_or(defaults.holiday_cache_ttl_secs),
    };

    let paths = file.paths.unwrap_or_default();
    let resolve_base = base_dir.clone().unwrap_or_else(|| home.clone());
    let database_path = env_var("DRIVECAST_DB")
        .map(PathBuf::from)
        .or_else(|| paths.database.map(|p| resolve_path(&resolve_base, &p)))
        .unwrap_or_else(|| home.join("campaigns.db"));
    let runs_dir = paths
        .runs
        .map(|p| resolve_path(&resolve_base, &p))
        .unwrap_or_else(|| home.join("runs"));
    let holidays_path = env_var("HOLIDAYS_FILE")
        .map(PathBuf::from)
        .or_else(|| paths.holidays.map(|p| resolve_path(&resolve_base, &p)));

    Ok(Config {
        weather,
        generation,
        mailer,
        campaigns,
        database_path,
        runs_dir,
        holidays_path,
        config_file: config_path,
    })
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static Config> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<Config> {
    load_config()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_campaign_defaults() {
        let defaults = CampaignConfig::default();
        assert_eq!(defaults.batch_size, 50);
        assert_eq!(defaults.max_retry_attempts, 3);
        assert_eq!(defaults.upcoming_service_days, 30);
        assert_eq!(defaults.warranty_expiry_days, 60);
        assert!(defaults.suppression_days.is_none());
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join(".drivecast");
        std::fs::create_dir_all(&dir).unwrap();

        let config_path = dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
weather:
  default_location: Pune
mailer:
  sender_name: Garage Works
campaigns:
  batch_size: 10
  suppression_days: 7
paths:
  database: ./data/campaigns.db
"#
        )
        .unwrap();

        let parsed = load_config_file(&config_path).unwrap();
        assert_eq!(
            parsed.weather.unwrap().default_location,
            Some("Pune".to_string())
        );
        assert_eq!(
            parsed.mailer.unwrap().sender_name,
            Some("Garage Works".to_string())
        );
        let campaigns = parsed.campaigns.unwrap();
        assert_eq!(campaigns.batch_size, Some(10));
        assert_eq!(campaigns.suppression_days, Some(7));
        assert_eq!(
            parsed.paths.unwrap().database,
            Some("./data/campaigns.db".to_string())
        );
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project");

        assert_eq!(
            resolve_path(&base, "data/campaigns.db"),
            PathBuf::from("/home/user/project/data/campaigns.db")
        );
        assert_eq!(
            resolve_path(&base, "/absolute/campaigns.db"),
            PathBuf::from("/absolute/campaigns.db")
        );
    }
}
