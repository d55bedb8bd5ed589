use crate::core::rate::CurrencyFilter;
use anyhow::{Context, Result, bail};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use std::{fs, path::PathBuf};
use tracing::debug;

pub const DEFAULT_BANK_PAGE_URL: &str = "https://kapitalbank.uz/uz/welcome.php";
pub const DEFAULT_CENTRAL_BANK_URL: &str = "https://cbu.uz/oz/arkhiv-kursov-valyut/json/";

fn default_currencies() -> Vec<String> {
    vec!["USD".to_string(), "RUB".to_string(), "EUR".to_string()]
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_retry_delay_ms() -> u64 {
    500
}

fn default_central_bank_prefix() -> String {
    "CBU-".to_string()
}

/// CSS selectors locating one rate box per currency and the code and value
/// elements inside it.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct BankPageSelectors {
    pub rate_box: String,
    pub code: String,
    pub value: String,
}

impl Default for BankPageSelectors {
    fn default() -> Self {
        BankPageSelectors {
            rate_box: "div.kapitalbank_currency_tablo_rate_box".to_string(),
            code: "div.kapitalbank_currency_tablo_type_box".to_string(),
            value: "div.kapitalbank_currency_tablo_type_value".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BankPageConfig {
    pub url: String,
    /// Skips TLS certificate verification for this source.
    #[serde(default)]
    pub insecure_tls: bool,
    #[serde(default)]
    pub name_prefix: String,
    #[serde(default)]
    pub selectors: BankPageSelectors,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CentralBankConfig {
    pub url: String,
    #[serde(default)]
    pub insecure_tls: bool,
    #[serde(default = "default_central_bank_prefix")]
    pub name_prefix: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProvidersConfig {
    pub bank_page: Option<BankPageConfig>,
    pub central_bank: Option<CentralBankConfig>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        ProvidersConfig {
            bank_page: Some(BankPageConfig {
                url: DEFAULT_BANK_PAGE_URL.to_string(),
                insecure_tls: false,
                name_prefix: String::new(),
                selectors: BankPageSelectors::default(),
            }),
            central_bank: Some(CentralBankConfig {
                url: DEFAULT_CENTRAL_BANK_URL.to_string(),
                insecure_tls: false,
                name_prefix: default_central_bank_prefix(),
            }),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    #[serde(default = "default_currencies")]
    pub currencies: Vec<String>,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub retries: usize,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    pub data_path: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            currencies: default_currencies(),
            providers: ProvidersConfig::default(),
            timeout_secs: default_timeout_secs(),
            retries: 0,
            retry_delay_ms: default_retry_delay_ms(),
            data_path: None,
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        debug!("Loading default config");
        let config_path = Self::default_config_path()?;
        Self::load_from_path(&config_path)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("uz", "ratekeeper", "ratekeeper")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    pub fn data_path(&self) -> Result<PathBuf> {
        if let Some(custom_path) = &self.data_path {
            return Ok(PathBuf::from(custom_path));
        }
        let proj_dirs = ProjectDirs::from("uz", "ratekeeper", "ratekeeper")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.data_dir().to_path_buf())
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.as_ref().display()))?;
        debug!("Successfully loaded config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.currency_filter().is_empty() {
            bail!("At least one currency must be configured");
        }
        if self.timeout_secs == 0 {
            bail!("timeout_secs must be greater than zero");
        }

        let mut prefixes = HashSet::new();
        if let Some(bank) = &self.providers.bank_page {
            prefixes.insert(bank.name_prefix.as_str());
            for selector in [
                &bank.selectors.rate_box,
                &bank.selectors.code,
                &bank.selectors.value,
            ] {
                scraper::Selector::parse(selector)
                    .map_err(|e| anyhow::anyhow!("Invalid selector '{selector}': {e}"))?;
            }
        }
        if let Some(cbu) = &self.providers.central_bank
            && !prefixes.insert(cbu.name_prefix.as_str())
        {
            bail!(
                "Providers must use distinct name prefixes, both use '{}'",
                cbu.name_prefix
            );
        }
        if prefixes.is_empty() {
            bail!("No rate providers configured");
        }
        Ok(())
    }

    pub fn currency_filter(&self) -> CurrencyFilter {
        CurrencyFilter::new(&self.currencies)
    }

    /// Limit for a single HTTP attempt.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Limit for one source's whole fetch, covering every attempt and the
    /// delays between them.
    pub fn source_budget(&self) -> Duration {
        let attempts = u32::try_from(self.retries.saturating_add(1)).unwrap_or(u32::MAX);
        let delays = Duration::from_millis(self.retry_delay_ms)
            .saturating_mul(attempts.saturating_sub(1));
        self.timeout().saturating_mul(attempts).saturating_add(delays)
    }
}
