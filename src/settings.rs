use std::path::PathBuf;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::geocode::{AddressColumns, RetryPolicy};
use crate::loader::DEFAULT_BATCH_SIZE;
use crate::scraper::ScrapeSettings;

const DEFAULT_SOURCES: [&str; 2] = [
    "https://www.bancoprovincia.com.ar/cuentadni/buscadores/carniceriasymas",
    "https://www.bancoprovincia.com.ar/cuentadni/buscadores/comerciosdebarrio",
];

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// DevTools endpoint of a running Chrome.
    pub browser_url: String,
    pub sources: Vec<String>,
    /// Leading header cells that belong to the duplicated scroll header.
    pub header_offset: usize,
    pub db_path: PathBuf,
    pub table: String,
    pub batch_size: usize,
    pub pagination: PaginationSettings,
    pub geocode: GeocodeSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            browser_url: "http://localhost:9222".into(),
            sources: DEFAULT_SOURCES.iter().map(|s| s.to_string()).collect(),
            header_offset: 4,
            db_path: PathBuf::from("data/comercios.sqlite"),
            table: "comercios".into(),
            batch_size: DEFAULT_BATCH_SIZE,
            pagination: PaginationSettings::default(),
            geocode: GeocodeSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PaginationSettings {
    pub control_timeout_secs: u64,
    pub poll_interval_ms: u64,
    /// 0 waits for a page transition indefinitely.
    pub page_deadline_secs: u64,
}

impl Default for PaginationSettings {
    fn default() -> Self {
        Self {
            control_timeout_secs: 10,
            poll_interval_ms: 250,
            page_deadline_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeocodeSettings {
    pub api_key: Option<String>,
    pub max_attempts: u32,
    pub initial_timeout_secs: u64,
    pub country: String,
    pub sentinel: String,
    pub coordinate_column: String,
    pub address_column: String,
    pub locality_column: String,
}

impl Default for GeocodeSettings {
    fn default() -> Self {
        let columns = AddressColumns::default();
        let policy = RetryPolicy::default();
        Self {
            api_key: None,
            max_attempts: policy.max_attempts,
            initial_timeout_secs: policy.initial_timeout.as_secs(),
            country: columns.country,
            sentinel: columns.sentinel,
            coordinate_column: columns.coordinate,
            address_column: columns.address,
            locality_column: columns.locality,
        }
    }
}

impl Settings {
    /// Defaults, then `comercios.toml` if present, then `COMERCIOS_*` env vars.
    pub fn load() -> Result<Self> {
        let settings: Settings = Config::builder()
            .add_source(File::with_name("comercios").required(false))
            .add_source(
                Environment::with_prefix("COMERCIOS")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("sources")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.batch_size > 0, "batch_size must be at least 1");
        ensure!(self.geocode.max_attempts > 0, "geocode.max_attempts must be at least 1");
        ensure!(!self.sources.is_empty(), "no source URLs configured");
        ensure!(!self.table.is_empty(), "table name is empty");
        Ok(())
    }

    pub fn scrape_settings(&self) -> ScrapeSettings {
        let p = &self.pagination;
        ScrapeSettings {
            control_timeout: Duration::from_secs(p.control_timeout_secs),
            poll_interval: Duration::from_millis(p.poll_interval_ms),
            page_deadline: (p.page_deadline_secs > 0).then(|| Duration::from_secs(p.page_deadline_secs)),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.geocode.max_attempts,
            initial_timeout: Duration::from_secs(self.geocode.initial_timeout_secs),
        }
    }

    pub fn address_columns(&self) -> AddressColumns {
        let g = &self.geocode;
        AddressColumns {
            coordinate: g.coordinate_column.clone(),
            address: g.address_column.clone(),
            locality: g.locality_column.clone(),
            sentinel: g.sentinel.clone(),
            country: g.country.clone(),
        }
    }
}
