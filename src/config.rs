use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Json, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{ScanError, ScanResult};

pub const ENV_PREFIX: &str = "AZPS_";
pub const CONFIG_PATH_ENV: &str = "AZPS_CONFIG_PATH";
pub const MAX_PRUNE_AFTER_DAYS: u32 = 36_500;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    pub scanner: ScannerConfig,
    pub store: StoreConfig,
    pub infra: InfraConfig,
    pub keys: KeysConfig,
}

impl AppConfig {
    /// Fills values that older deployments passed through unprefixed variables.
    ///
    /// Only used when the `AZPS_...` value is missing; explicit config always wins.
    fn apply_legacy_env_overrides(&mut self) {
        fn env_trimmed(key: &str) -> Option<String> {
            let value = std::env::var(key).ok()?;
            let trimmed = value.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }

        if self.keys.api_key.as_deref().unwrap_or_default().trim().is_empty() {
            if let Some(key) = env_trimmed("AZURE_PRICING_API_KEY") {
                self.keys.api_key = Some(key);
            }
        }
    }

    pub fn validate(&self) -> ScanResult<()> {
        self.scanner.validate()?;
        self.store.validate()?;
        self.infra.validate()?;
        self.keys.validate()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OsChoice {
    Linux,
    Windows,
    #[default]
    Both,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScannerConfig {
    pub api_url: String,
    pub currency_code: String,
    /// Sent as `api-version`; `None` uses the endpoint's default schema.
    pub api_version: Option<String>,
    pub os: OsChoice,
    pub include_spot: bool,
    /// ARM region names; one filter set is fetched per region. Empty fetches all regions.
    pub regions: Vec<String>,
    /// Page cap per filter set, 0 means follow every continuation link.
    pub max_pages: u32,
    pub timeout_s: u64,
    pub page_delay_ms: u64,
    pub retry_once: bool,
    pub retry_backoff_ms: u64,
    pub max_price_per_hour: f64,
    pub user_agent: String,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            api_url: "https://prices.azure.com/api/retail/prices".to_string(),
            currency_code: "USD".to_string(),
            api_version: Some("2023-01-01-preview".to_string()),
            os: OsChoice::Both,
            include_spot: false,
            regions: Vec::new(),
            max_pages: 0,
            timeout_s: 30,
            page_delay_ms: 300,
            retry_once: true,
            retry_backoff_ms: 2_000,
            max_price_per_hour: 1_000.0,
            user_agent: "Azure-Price-Intelligence-Dashboard/1.0".to_string(),
        }
    }
}

impl ScannerConfig {
    pub fn validate(&self) -> ScanResult<()> {
        if !(self.api_url.starts_with("https://") || self.api_url.starts_with("http://")) {
            return Err(ScanError::Config(format!(
                "scanner.api_url must be an http(s) url, got '{}'",
                self.api_url
            )));
        }
        if self.currency_code.len() != 3
            || !self.currency_code.chars().all(|c| c.is_ascii_uppercase())
        {
            return Err(ScanError::Config(format!(
                "scanner.currency_code must be a 3-letter uppercase ISO code, got '{}'",
                self.currency_code
            )));
        }
        if let Some(version) = self.api_version.as_deref() {
            if version.trim().is_empty() {
                return Err(ScanError::Config(
                    "scanner.api_version must not be empty when set".to_string(),
                ));
            }
        }
        for region in &self.regions {
            if region.is_empty()
                || !region
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
            {
                return Err(ScanError::Config(format!(
                    "scanner.regions entries must be lowercase ARM region names, got '{region}'"
                )));
            }
        }
        if self.timeout_s == 0 || self.timeout_s > 300 {
            return Err(ScanError::Config(format!(
                "scanner.timeout_s must be in [1,300], got {}",
                self.timeout_s
            )));
        }
        if self.retry_backoff_ms > 60_000 {
            return Err(ScanError::Config(format!(
                "scanner.retry_backoff_ms must be <=60000, got {}",
                self.retry_backoff_ms
            )));
        }
        if !self.max_price_per_hour.is_finite() || self.max_price_per_hour <= 0.0 {
            return Err(ScanError::Config(format!(
                "scanner.max_price_per_hour must be >0, got {}",
                self.max_price_per_hour
            )));
        }
        if self.user_agent.trim().is_empty() {
            return Err(ScanError::Config(
                "scanner.user_agent must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    pub output_path: PathBuf,
    /// Drop records not refreshed within this many days. Unset keeps every record.
    pub prune_after_days: Option<u32>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            output_path: PathBuf::from("dashboard/data/azure_prices.json"),
            prune_after_days: None,
        }
    }
}

impl StoreConfig {
    pub fn validate(&self) -> ScanResult<()> {
        if self.output_path.as_os_str().is_empty() || self.output_path.file_name().is_none() {
            return Err(ScanError::Config(format!(
                "store.output_path must name a file, got '{}'",
                self.output_path.display()
            )));
        }
        if let Some(days) = self.prune_after_days {
            if days == 0 || days > MAX_PRUNE_AFTER_DAYS {
                return Err(ScanError::Config(format!(
                    "store.prune_after_days must be in [1,{MAX_PRUNE_AFTER_DAYS}] when set, got {days}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InfraConfig {
    pub log_level: String,
}

impl Default for InfraConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl InfraConfig {
    pub fn validate(&self) -> ScanResult<()> {
        if self.log_level.trim().is_empty() {
            return Err(ScanError::Config(
                "infra.log_level must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KeysConfig {
    /// The public retail endpoint needs no key; gateways in front of it may.
    pub api_key: Option<String>,
    pub api_key_header: String,
    pub require_api_key: bool,
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_key_header: "Ocp-Apim-Subscription-Key".to_string(),
            require_api_key: false,
        }
    }
}

impl KeysConfig {
    pub fn validate(&self) -> ScanResult<()> {
        let key = self.api_key.as_deref().unwrap_or_default().trim();
        if self.require_api_key && key.is_empty() {
            return Err(ScanError::Config(
                "missing required key: AZPS_KEYS__API_KEY".to_string(),
            ));
        }
        if !key.is_empty() && self.api_key_header.trim().is_empty() {
            return Err(ScanError::Config(
                "keys.api_key_header must not be empty when keys.api_key is set".to_string(),
            ));
        }
        Ok(())
    }
}

/// Loads layered config and lets the caller apply last-mile overrides (CLI flags)
/// before validation.
pub fn load_config_with<F>(overrides: F) -> ScanResult<AppConfig>
where
    F: FnOnce(&mut AppConfig),
{
    let figment = build_figment_from_env()?;
    load_config_from(figment, overrides)
}

fn build_figment_from_env() -> ScanResult<Figment> {
    let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        figment = merge_config_file(figment, &path)?;
    }

    figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));
    Ok(figment)
}

fn merge_config_file(figment: Figment, path: &str) -> ScanResult<Figment> {
    let p = Path::new(path);
    match p.extension().and_then(|s| s.to_str()) {
        Some("toml") => Ok(figment.merge(Toml::file(path))),
        Some("json") => Ok(figment.merge(Json::file(path))),
        _ => Err(ScanError::Config(format!(
            "unsupported config file extension for {CONFIG_PATH_ENV}: {path} (expected .toml or .json)"
        ))),
    }
}

fn load_config_from<F>(figment: Figment, overrides: F) -> ScanResult<AppConfig>
where
    F: FnOnce(&mut AppConfig),
{
    let mut cfg: AppConfig = figment
        .extract()
        .map_err(|e| ScanError::Config(e.to_string()))?;
    cfg.apply_legacy_env_overrides();
    overrides(&mut cfg);
    cfg.validate()?;
    Ok(cfg)
}
