use crate::constants;
use crate::error::{Result, TaxrefError};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub services: ServicesConfig,
    pub lookup: LookupConfig,
    pub http: HttpConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServicesConfig {
    pub gbif_base_url: String,
    pub checklistbank_base_url: String,
    pub probe_url: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LookupConfig {
    pub reference_title: String,
    pub dataset_key: u32,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_seconds: u64,
    pub user_agent: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub dir: PathBuf,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            gbif_base_url: constants::GBIF_API_BASE_URL.to_string(),
            checklistbank_base_url: constants::CHECKLISTBANK_API_BASE_URL.to_string(),
            probe_url: constants::CONNECTIVITY_PROBE_URL.to_string(),
        }
    }
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            reference_title: constants::REFERENCE_DATASET_TITLE.to_string(),
            dataset_key: constants::REFERENCE_DATASET_KEY,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: constants::DEFAULT_TIMEOUT_SECONDS,
            user_agent: constants::DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { dir: PathBuf::from("logs") }
    }
}

impl Config {
    /// Load configuration from `path`, or from `config.toml` when present,
    /// then apply `TAXREF_*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => Self::from_file(Path::new(DEFAULT_CONFIG_PATH))?,
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            TaxrefError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// `lookup` is injected so tests do not depend on the process environment
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("TAXREF_GBIF_BASE_URL") {
            self.services.gbif_base_url = v;
        }
        if let Some(v) = lookup("TAXREF_CLB_BASE_URL") {
            self.services.checklistbank_base_url = v;
        }
        if let Some(v) = lookup("TAXREF_PROBE_URL") {
            self.services.probe_url = v;
        }
        if let Some(v) = lookup("TAXREF_TIMEOUT_SECONDS") {
            self.http.timeout_seconds = v
                .trim()
                .parse()
                .map_err(|_| TaxrefError::Config(format!("TAXREF_TIMEOUT_SECONDS is not a number: '{}'", v)))?;
        }
        if let Some(v) = lookup("TAXREF_LOG_DIR") {
            self.logging.dir = PathBuf::from(v);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.http.timeout_seconds == 0 {
            return Err(TaxrefError::Config("http.timeout_seconds must be greater than 0".to_string()));
        }
        if self.lookup.reference_title.trim().is_empty() {
            return Err(TaxrefError::Config("lookup.reference_title must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_seconds)
    }
}
