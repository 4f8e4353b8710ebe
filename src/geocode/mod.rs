pub mod google;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use crate::context::{Phase, PhaseReport, RunContext};
use crate::dataset::{Dataset, DatasetError};
use crate::scraper::Coordinates;

pub use google::GoogleGeocoder;

#[derive(Debug, Error)]
pub enum GeocodeError {
    #[error("address not found")]
    NotFound,
    #[error("geocoder timed out")]
    Timeout,
    #[error("geocoder connection failed: {0}")]
    Connection(String),
    #[error("geocoder rejected request: {0}")]
    Provider(String),
}

impl GeocodeError {
    pub fn is_transient(&self) -> bool {
        matches!(self, GeocodeError::Timeout | GeocodeError::Connection(_))
    }
}

#[derive(Debug, Error)]
pub enum EnrichError {
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error("geocoding aborted for {query:?}: {source}")]
    Provider {
        query: String,
        #[source]
        source: GeocodeError,
    },
    #[error("run cancelled")]
    Cancelled,
}

#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn geocode(&self, query: &str, timeout: Duration) -> Result<Coordinates, GeocodeError>;
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Timeout of the first attempt; doubles after every transient failure.
    pub initial_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_timeout: Duration::from_secs(2),
        }
    }
}

/// Which columns hold the coordinate and the address parts.
#[derive(Debug, Clone)]
pub struct AddressColumns {
    pub coordinate: String,
    pub address: String,
    pub locality: String,
    /// Coordinate value marking a row the page could not locate.
    pub sentinel: String,
    pub country: String,
}

impl Default for AddressColumns {
    fn default() -> Self {
        Self {
            coordinate: "Localizar".into(),
            address: "Dirección".into(),
            locality: "Localidad".into(),
            sentinel: "No disponible".into(),
            country: "ARGENTINA".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resolution {
    Resolved(Coordinates),
    NotFound,
    Exhausted,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EnrichReport {
    pub attempted: usize,
    pub resolved: usize,
    pub not_found: usize,
    pub exhausted: usize,
}

pub struct GeocodeEnricher<G> {
    geocoder: G,
    policy: RetryPolicy,
    columns: AddressColumns,
}

impl<G: Geocoder> GeocodeEnricher<G> {
    pub fn new(geocoder: G, policy: RetryPolicy, columns: AddressColumns) -> Self {
        Self {
            geocoder,
            policy,
            columns,
        }
    }

    /// Fill every sentinel coordinate cell. Resolved rows get `"lat,lng"`,
    /// failed rows get an empty value; other rows are left untouched.
    pub async fn enrich(
        &self,
        ctx: &RunContext,
        mut dataset: Dataset,
    ) -> Result<(Dataset, EnrichReport), EnrichError> {
        let schema = dataset.schema();
        let coord = schema.position(&self.columns.coordinate)?;
        let address = schema.position(&self.columns.address)?;
        let locality = schema.position(&self.columns.locality)?;

        let pending = dataset
            .records()
            .iter()
            .filter(|r| r.get(coord) == self.columns.sentinel)
            .count();
        let timer = PhaseReport::start(Phase::Enrich);
        let pb = ctx.progress_bar(pending as u64, format!("Geocoding {pending} addresses..."));
        let mut report = EnrichReport::default();

        for record in dataset.records_mut() {
            if record.get(coord) != self.columns.sentinel {
                continue;
            }
            let query = self.query(record.get(address), record.get(locality));
            report.attempted += 1;

            let (resolution, _) = self.resolve(ctx, &query).await?;
            let value = match resolution {
                Resolution::Resolved(c) => {
                    report.resolved += 1;
                    c.to_string()
                }
                Resolution::NotFound => {
                    report.not_found += 1;
                    String::new()
                }
                Resolution::Exhausted => {
                    report.exhausted += 1;
                    warn!("Giving up on {} after {} attempts", query, self.policy.max_attempts);
                    String::new()
                }
            };
            record.set(coord, value);
            pb.inc(1);
        }
        pb.finish_and_clear();

        timer.finish(ctx, report.resolved);
        info!(
            attempted = report.attempted,
            resolved = report.resolved,
            not_found = report.not_found,
            exhausted = report.exhausted,
            "geocoding finished"
        );
        Ok((dataset, report))
    }

    fn query(&self, address: &str, locality: &str) -> String {
        format!("{}, {}, {}", address, locality, self.columns.country)
    }

    /// Geocode one query with exponential backoff. The timeout starts fresh
    /// on every call. Returns the outcome and the number of attempts used.
    pub async fn resolve(&self, ctx: &RunContext, query: &str) -> Result<(Resolution, u32), EnrichError> {
        let mut timeout = self.policy.initial_timeout;
        let mut attempt = 1;
        while attempt <= self.policy.max_attempts {
            let Some(result) = ctx.guard(self.geocoder.geocode(query, timeout)).await else {
                return Err(EnrichError::Cancelled);
            };
            match result {
                Ok(coords) => return Ok((Resolution::Resolved(coords), attempt)),
                Err(GeocodeError::NotFound) => {
                    warn!("Could not find location for {}", query);
                    return Ok((Resolution::NotFound, attempt));
                }
                Err(e) if e.is_transient() => {
                    info!("{}, retrying in {} seconds...", e, timeout.as_secs_f64());
                    if !ctx.sleep(timeout).await {
                        return Err(EnrichError::Cancelled);
                    }
                    timeout *= 2;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(EnrichError::Provider {
                        query: query.to_string(),
                        source: e,
                    })
                }
            }
        }
        Ok((Resolution::Exhausted, self.policy.max_attempts))
    }
}
