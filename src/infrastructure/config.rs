//! Configuration infrastructure
//!
//! Configuration is a single JSON file managed by [`ConfigManager`]:
//! loaded at startup, created with defaults on first run, validated before
//! the pipeline is allowed to start. Defaults live in the [`defaults`]
//! module as named constants; the portal URL template lives in [`portal`].

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::fs;
use tracing::info;

use crate::domain::model::Target;

/// Complete application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Portal endpoints and credentials.
    pub portal: PortalConfig,

    /// Browser/WebDriver connection settings.
    pub browser: BrowserConfig,

    /// Extraction pipeline tuning.
    pub scraper: ScraperConfig,

    /// Enabled persistence backends. Absent section = backend disabled.
    pub sinks: SinksConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Where the dashboard lives and how to get past its login form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalConfig {
    pub login_url: String,

    /// Target locator template pieces: `prefix + target_id + suffix`.
    pub target_url_prefix: String,
    pub target_url_suffix: String,

    pub username: String,
    pub password: String,

    /// CSS selectors for the credential form.
    pub account_selector: String,
    pub password_selector: String,
    pub submit_selector: String,

    /// Substring identifying the login surface in a URL; a target page
    /// resolving to such a URL means the session has expired.
    pub login_surface_marker: String,

    /// Bounded wait for the post-submit navigation, in seconds.
    pub login_timeout_secs: u64,
}

impl PortalConfig {
    /// Navigable locator for one target.
    #[must_use]
    pub fn locator(&self, target: &Target) -> String {
        format!("{}{}{}", self.target_url_prefix, target.id, self.target_url_suffix)
    }
}

/// WebDriver endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// WebDriver server, e.g. a local chromedriver.
    pub endpoint: String,

    pub headless: bool,

    /// Per-command HTTP timeout in seconds.
    pub command_timeout_secs: u64,
}

/// Extraction pipeline tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperConfig {
    /// Path to the target list JSON file.
    pub targets_file: PathBuf,

    /// Take only the first N targets (handy while commissioning).
    pub max_targets: Option<usize>,

    /// Concurrency ceiling K: tabs in flight at once.
    pub max_concurrent_tabs: usize,

    /// Locate attempts per target per cycle.
    pub locate_attempts: u32,

    /// Delay between locate attempts in milliseconds.
    pub locate_retry_delay_ms: u64,

    /// Bounded wait for the dashboard frames to appear, in seconds.
    pub readiness_timeout_secs: u64,

    /// Sleep between cycles (measured from cycle completion), in seconds.
    pub cycle_delay_secs: u64,

    /// Require a parsed wind value to accept a depth-2 frame (the
    /// dashboard's deepest searched level). Off by default.
    pub deep_stop_requires_value: bool,
}

/// Persistence backends. Each one is optional and independent.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SinksConfig {
    pub csv: Option<CsvSinkConfig>,
    pub sqlite: Option<SqliteSinkConfig>,
    pub influx: Option<InfluxSinkConfig>,
    pub supabase: Option<SupabaseSinkConfig>,
}

impl SinksConfig {
    /// Number of enabled backends.
    #[must_use]
    pub fn enabled_count(&self) -> usize {
        usize::from(self.csv.is_some())
            + usize::from(self.sqlite.is_some())
            + usize::from(self.influx.is_some())
            + usize::from(self.supabase.is_some())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsvSinkConfig {
    /// Directory for the daily CSV files.
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteSinkConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfluxSinkConfig {
    pub url: String,
    pub token: String,
    pub org: String,
    pub bucket: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupabaseSinkConfig {
    pub url: String,
    pub api_key: String,
    pub table: String,
}

/// Logging configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,

    /// Enable console output
    pub console_output: bool,

    /// Enable file output (non-blocking writer under `logs/`)
    pub file_output: bool,

    /// Module-specific log level filters (e.g. "sqlx": "warn")
    pub module_filters: HashMap<String, String>,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            login_url: portal::LOGIN_URL.to_string(),
            target_url_prefix: portal::TARGET_URL_PREFIX.to_string(),
            target_url_suffix: portal::TARGET_URL_SUFFIX.to_string(),
            username: String::new(),
            password: String::new(),
            account_selector: portal::ACCOUNT_SELECTOR.to_string(),
            password_selector: portal::PASSWORD_SELECTOR.to_string(),
            submit_selector: portal::SUBMIT_SELECTOR.to_string(),
            login_surface_marker: portal::LOGIN_SURFACE_MARKER.to_string(),
            login_timeout_secs: defaults::LOGIN_TIMEOUT_SECS,
        }
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            endpoint: defaults::WEBDRIVER_ENDPOINT.to_string(),
            headless: defaults::HEADLESS,
            command_timeout_secs: defaults::COMMAND_TIMEOUT_SECS,
        }
    }
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            targets_file: PathBuf::from(defaults::TARGETS_FILE),
            max_targets: None,
            max_concurrent_tabs: defaults::MAX_CONCURRENT_TABS,
            locate_attempts: defaults::LOCATE_ATTEMPTS,
            locate_retry_delay_ms: defaults::LOCATE_RETRY_DELAY_MS,
            readiness_timeout_secs: defaults::READINESS_TIMEOUT_SECS,
            cycle_delay_secs: defaults::CYCLE_DELAY_SECS,
            deep_stop_requires_value: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            console_output: true,
            file_output: true,
            module_filters: {
                let mut filters = HashMap::new();
                filters.insert("sqlx".to_string(), "warn".to_string());
                filters.insert("reqwest".to_string(), "warn".to_string());
                filters.insert("hyper".to_string(), "warn".to_string());
                filters
            },
        }
    }
}

impl AppConfig {
    /// Startup validation: everything the pipeline cannot run without.
    pub fn validate(&self) -> Result<()> {
        if self.portal.username.trim().is_empty() || self.portal.password.trim().is_empty() {
            bail!("portal credentials are not configured (portal.username / portal.password)");
        }
        url::Url::parse(&self.portal.login_url)
            .with_context(|| format!("portal.login_url is not a URL: {}", self.portal.login_url))?;
        url::Url::parse(&self.browser.endpoint)
            .with_context(|| format!("browser.endpoint is not a URL: {}", self.browser.endpoint))?;
        if self.sinks.enabled_count() == 0 {
            bail!("no sink configured - readings would be extracted and dropped");
        }
        if self.scraper.max_concurrent_tabs == 0 {
            bail!("scraper.max_concurrent_tabs must be at least 1");
        }
        if self.scraper.locate_attempts == 0 {
            bail!("scraper.locate_attempts must be at least 1");
        }
        Ok(())
    }
}

/// Configuration manager for loading and saving settings
pub struct ConfigManager {
    pub config_path: PathBuf,
}

impl ConfigManager {
    /// Get the application configuration directory
    pub fn get_config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get user config directory")?
            .join("enos-harvester");
        Ok(config_dir)
    }

    /// Create a new configuration manager with the default path
    pub fn new() -> Result<Self> {
        let config_path = Self::get_config_dir()?.join("enos_harvester_config.json");
        Ok(Self { config_path })
    }

    /// Manager for an explicit path (tests, `--config` style overrides).
    #[must_use]
    pub fn with_path(config_path: PathBuf) -> Self {
        Self { config_path }
    }

    /// Load configuration from file, creating the default if it doesn't
    /// exist yet so the operator has a template to fill in.
    pub async fn load_config(&self) -> Result<AppConfig> {
        if !self.config_path.exists() {
            info!("Configuration file not found, creating default: {:?}", self.config_path);
            let default_config = AppConfig::default();
            self.save_config(&default_config).await?;
            return Ok(default_config);
        }

        let content = fs::read_to_string(&self.config_path)
            .await
            .context("Failed to read configuration file")?;

        let config: AppConfig = serde_json::from_str(&content)
            .with_context(|| format!("Malformed configuration in {:?}", self.config_path))?;

        info!("Loaded configuration from: {:?}", self.config_path);
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save_config(&self, config: &AppConfig) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create config directory")?;
        }

        let content =
            serde_json::to_string_pretty(config).context("Failed to serialize configuration")?;

        fs::write(&self.config_path, content)
            .await
            .context("Failed to write configuration file")?;

        info!("Saved configuration to: {:?}", self.config_path);
        Ok(())
    }
}

/// Shape of the targets file: `{ "targets": ["WA101", ...] }`.
#[derive(Debug, Deserialize)]
struct TargetsFile {
    targets: Vec<String>,
}

/// Load the static target list. Missing or malformed files are startup
/// failures - the pipeline never runs with a guessed target set.
pub async fn load_targets(path: &Path, max_targets: Option<usize>) -> Result<Vec<Target>> {
    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read targets file {path:?}"))?;

    let parsed: TargetsFile = serde_json::from_str(&content)
        .with_context(|| format!("Malformed targets file {path:?}"))?;

    if parsed.targets.is_empty() {
        bail!("targets file {path:?} lists no targets");
    }

    let mut targets: Vec<Target> = parsed.targets.into_iter().map(Target::new).collect();
    if let Some(cap) = max_targets {
        if cap < targets.len() {
            info!("🧪 limiting run to the first {cap} of {} targets", targets.len());
            targets.truncate(cap);
        }
    }

    Ok(targets)
}

/// EnOS portal URLs and selectors.
pub mod portal {
    /// Login surface of the EU portal.
    pub const LOGIN_URL: &str = "https://app-portal-eu.enos-iot.com/login";

    /// Turbine dashboard locator prefix; the opaque target id is spliced
    /// between prefix and suffix (the suffix closes the percent-encoded
    /// state object).
    pub const TARGET_URL_PREFIX: &str = "https://app-portal-eu.enos-iot.com/portal/sc17591331211951978/rollout_turbinelist?state=%7B%22site%22%3A%22kpBQhchl%22%2C%22target%22%3A%22kpBQhchl%2FEna1%2F";
    pub const TARGET_URL_SUFFIX: &str = "%22%7D";

    /// Substring that marks the login surface in any URL.
    pub const LOGIN_SURFACE_MARKER: &str = "/login";

    /// Credential form selectors.
    pub const ACCOUNT_SELECTOR: &str = "#account";
    pub const PASSWORD_SELECTOR: &str = "#password";
    pub const SUBMIT_SELECTOR: &str = ".login-form-button";
}

/// Default configuration values
pub mod defaults {
    /// Default WebDriver endpoint (local chromedriver).
    pub const WEBDRIVER_ENDPOINT: &str = "http://localhost:9515";

    /// Default headless setting.
    pub const HEADLESS: bool = true;

    /// Default per-command HTTP timeout in seconds.
    pub const COMMAND_TIMEOUT_SECS: u64 = 60;

    /// Default targets file path.
    pub const TARGETS_FILE: &str = "targets.json";

    /// Default concurrency ceiling (tabs in flight).
    pub const MAX_CONCURRENT_TABS: usize = 3;

    /// Default locate attempts per target per cycle.
    pub const LOCATE_ATTEMPTS: u32 = 3;

    /// Default delay between locate attempts in milliseconds.
    pub const LOCATE_RETRY_DELAY_MS: u64 = 3000;

    /// Default bounded wait for dashboard frames in seconds.
    pub const READINESS_TIMEOUT_SECS: u64 = 20;

    /// Default sleep between cycles in seconds.
    pub const CYCLE_DELAY_SECS: u64 = 120;

    /// Default bounded wait for the post-login navigation in seconds.
    pub const LOGIN_TIMEOUT_SECS: u64 = 60;

    /// Default log level
    pub const LOG_LEVEL: &str = "info";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locator_splices_target_id_into_template() {
        let portal = PortalConfig::default();
        let url = portal.locator(&Target::new("WA101"));
        assert!(url.starts_with(portal::TARGET_URL_PREFIX));
        assert!(url.ends_with("WA101%22%7D"));
    }

    #[test]
    fn default_config_fails_validation_without_credentials() {
        let config = AppConfig::default();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.portal.username = "dev@example.com".to_string();
        config.portal.password = "secret".to_string();
        // Still no sinks configured.
        assert!(config.validate().is_err());

        config.sinks.csv = Some(CsvSinkConfig { dir: PathBuf::from("result") });
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn load_creates_default_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ConfigManager::with_path(dir.path().join("config.json"));

        let created = manager.load_config().await.unwrap();
        assert_eq!(created.scraper.max_concurrent_tabs, defaults::MAX_CONCURRENT_TABS);

        let mut edited = created.clone();
        edited.scraper.max_concurrent_tabs = 1;
        manager.save_config(&edited).await.unwrap();

        let reloaded = manager.load_config().await.unwrap();
        assert_eq!(reloaded.scraper.max_concurrent_tabs, 1);
    }

    #[tokio::test]
    async fn targets_file_is_loaded_and_capped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("targets.json");
        std::fs::write(&path, r#"{"targets": ["WA101", "WA102", "WA103"]}"#).unwrap();

        let all = load_targets(&path, None).await.unwrap();
        assert_eq!(all.len(), 3);

        let capped = load_targets(&path, Some(2)).await.unwrap();
        assert_eq!(capped.len(), 2);
        assert_eq!(capped[0].id, "WA101");

        assert!(load_targets(&dir.path().join("missing.json"), None).await.is_err());
    }
}
