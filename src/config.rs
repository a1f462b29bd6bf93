//! Application configuration loaded from TOML.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{AppError, Result};
use crate::filters::NameVariants;

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub marketplace: MarketplaceConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub monitoring: MonitoringConfig,

    #[serde(default)]
    pub specs: SpecsConfig,

    #[serde(default)]
    pub email: EmailConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            AppError::config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.marketplace.base_url.trim().is_empty() {
            return Err(AppError::validation("marketplace.base_url is empty"));
        }
        if let Err(e) = Url::parse(&self.marketplace.base_url) {
            return Err(AppError::validation(format!("marketplace.base_url: {e}")));
        }
        let rate = self.marketplace.rate_limit_secs;
        if !rate.is_finite() || rate < 0.0 {
            return Err(AppError::validation(
                "marketplace.rate_limit_secs must be a finite number >= 0",
            ));
        }
        if self.marketplace.user_agent.trim().is_empty() {
            return Err(AppError::validation("marketplace.user_agent is empty"));
        }
        if self.marketplace.timeout_secs == 0 {
            return Err(AppError::validation("marketplace.timeout_secs must be > 0"));
        }
        if self.marketplace.render_timeout_secs == 0 {
            return Err(AppError::validation(
                "marketplace.render_timeout_secs must be > 0",
            ));
        }
        if self.monitoring.max_specs_per_run == 0 {
            return Err(AppError::validation(
                "monitoring.max_specs_per_run must be > 0",
            ));
        }
        Ok(())
    }
}

/// Marketplace endpoint and fetch behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketplaceConfig {
    #[serde(default = "defaults::base_url")]
    pub base_url: String,

    /// Minimum seconds between any two requests, across all specs
    #[serde(default = "defaults::rate_limit_secs")]
    pub rate_limit_secs: f64,

    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    #[serde(default = "defaults::timeout_secs")]
    pub timeout_secs: u64,

    /// Fall back to a headless browser when static extraction finds nothing
    #[serde(default = "defaults::render_enabled")]
    pub render_enabled: bool,

    #[serde(default = "defaults::render_timeout_secs")]
    pub render_timeout_secs: u64,

    #[serde(default = "defaults::currency")]
    pub currency: String,

    #[serde(default = "defaults::destination")]
    pub destination: String,
}

impl MarketplaceConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.rate_limit_secs).unwrap_or_default()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn render_timeout(&self) -> Duration {
        Duration::from_secs(self.render_timeout_secs)
    }
}

impl Default for MarketplaceConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::base_url(),
            rate_limit_secs: defaults::rate_limit_secs(),
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout_secs(),
            render_enabled: defaults::render_enabled(),
            render_timeout_secs: defaults::render_timeout_secs(),
            currency: defaults::currency(),
            destination: defaults::destination(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "defaults::database_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: defaults::database_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    #[serde(default = "defaults::max_specs_per_run")]
    pub max_specs_per_run: usize,

    /// Extra given-name spellings for author verification, added to the
    /// built-in table: `giuseppe = ["beppe"]`
    #[serde(default)]
    pub name_aliases: BTreeMap<String, Vec<String>>,
}

impl MonitoringConfig {
    pub fn name_variants(&self) -> NameVariants {
        self.name_aliases
            .iter()
            .fold(NameVariants::default(), |names, (canonical, variants)| {
                names.with_alias(canonical, variants.iter().map(String::as_str))
            })
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            max_specs_per_run: defaults::max_specs_per_run(),
            name_aliases: BTreeMap::new(),
        }
    }
}

/// Location of the spec sheet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecsConfig {
    #[serde(default = "defaults::specs_path")]
    pub path: PathBuf,
}

impl Default for SpecsConfig {
    fn default() -> Self {
        Self {
            path: defaults::specs_path(),
        }
    }
}

/// Digest delivery settings. The API key itself is read from the
/// environment variable named by `api_key_env`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    #[serde(default)]
    pub sender_email: String,

    #[serde(default)]
    pub sender_name: String,

    #[serde(default)]
    pub recipient_email: String,

    #[serde(default = "defaults::email_api_url")]
    pub api_url: String,

    #[serde(default = "defaults::email_api_key_env")]
    pub api_key_env: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            sender_email: String::new(),
            sender_name: String::new(),
            recipient_email: String::new(),
            api_url: defaults::email_api_url(),
            api_key_env: defaults::email_api_key_env(),
        }
    }
}

impl EmailConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sender_email.trim().is_empty() {
            return Err(AppError::validation("email.sender_email is empty"));
        }
        if self.recipient_email.trim().is_empty() {
            return Err(AppError::validation("email.recipient_email is empty"));
        }
        Ok(())
    }
}

mod defaults {
    use std::path::PathBuf;

    pub fn base_url() -> String {
        "https://www.bookfinder.com".into()
    }
    pub fn rate_limit_secs() -> f64 {
        10.0
    }
    pub fn user_agent() -> String {
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".into()
    }
    pub fn timeout_secs() -> u64 {
        30
    }
    pub fn render_enabled() -> bool {
        true
    }
    pub fn render_timeout_secs() -> u64 {
        60
    }
    pub fn currency() -> String {
        "USD".into()
    }
    pub fn destination() -> String {
        "US".into()
    }
    pub fn database_path() -> PathBuf {
        PathBuf::from("data/books.db")
    }
    pub fn max_specs_per_run() -> usize {
        40
    }
    pub fn specs_path() -> PathBuf {
        PathBuf::from("specs.toml")
    }
    pub fn email_api_url() -> String {
        "https://api.brevo.com/v3/smtp/email".into()
    }
    pub fn email_api_key_env() -> String {
        "BREVO_API_KEY".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_default_config_ok() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.marketplace.base_url, "https://www.bookfinder.com");
        assert_eq!(config.monitoring.max_specs_per_run, 40);
        assert_eq!(config.database.path, PathBuf::from("data/books.db"));
        assert_eq!(config.email.api_url, "https://api.brevo.com/v3/smtp/email");
    }

    #[test]
    fn partial_sections_merge_with_defaults() {
        let config = Config::from_toml(
            r#"
            [marketplace]
            rate_limit_secs = 2.5
            render_enabled = false

            [email]
            sender_email = "bot@example.com"
            recipient_email = "me@example.com"
            "#,
        )
        .unwrap();
        assert_eq!(config.marketplace.min_interval(), Duration::from_millis(2500));
        assert!(!config.marketplace.render_enabled);
        assert_eq!(config.marketplace.timeout_secs, 30);
        assert_eq!(config.email.api_key_env, "BREVO_API_KEY");
        assert!(config.email.validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_user_agent() {
        let mut config = Config::default();
        config.marketplace.user_agent = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_spec_budget() {
        let mut config = Config::default();
        config.monitoring.max_specs_per_run = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_rate_limit() {
        for rate in [f64::INFINITY, f64::NAN, -1.0] {
            let mut config = Config::default();
            config.marketplace.rate_limit_secs = rate;
            assert!(config.validate().is_err(), "rate {rate} accepted");
            assert_eq!(config.marketplace.min_interval(), Duration::ZERO);
        }

        let config = Config::from_toml("[marketplace]\nrate_limit_secs = inf").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_unparseable_base_url() {
        let mut config = Config::default();
        config.marketplace.base_url = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn name_aliases_extend_builtin_table() {
        let config = Config::from_toml(
            r#"
            [monitoring.name_aliases]
            Giuseppe = ["Beppe"]
            italo = ["itálo"]
            "#,
        )
        .unwrap();
        let names = config.monitoring.name_variants();
        assert_eq!(
            names.variants_for("giuseppe"),
            vec!["giuseppe", "g", "joseph", "joe", "beppe"]
        );
        assert_eq!(names.variants_for("Italo"), vec!["italo", "i", "itálo"]);
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = Config::load("/nonexistent/bookwatch.toml").unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn email_requires_addresses() {
        assert!(EmailConfig::default().validate().is_err());
    }
}
