use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::browser::BrowserSession;
use crate::context::{PhaseReport, RunContext};
use crate::dataset::Dataset;
use crate::db::{self, SqliteSink};
use crate::geocode::{EnrichReport, GeocodeEnricher, GoogleGeocoder};
use crate::loader::ChunkedLoader;
use crate::scraper::PaginatedScraper;
use crate::settings::Settings;

pub struct RunOptions {
    pub skip_geocode: bool,
}

pub struct RunSummary {
    pub extracted: Vec<PhaseReport>,
    pub rows: usize,
    pub geocoding: Option<EnrichReport>,
    pub load: PhaseReport,
}

/// Extract every source, merge, geocode, and load.
pub async fn run(ctx: &RunContext, settings: &Settings, opts: &RunOptions) -> Result<RunSummary> {
    let session = BrowserSession::connect(&settings.browser_url)
        .await
        .context("Failed to connect to browser")?;
    let extracted = extract_all(ctx, settings, &session).await;
    session.close().await;
    let (parts, extracted) = extracted?;

    let Some(dataset) = Dataset::concat_dedup(parts)? else {
        anyhow::bail!("no sources configured");
    };
    if dataset.is_empty() {
        warn!("No rows extracted from any source");
    }
    info!(rows = dataset.len(), "merged and de-duplicated sources");

    let (dataset, geocoding) = match (&settings.geocode.api_key, opts.skip_geocode) {
        (_, true) => (dataset, None),
        (None, false) => {
            warn!("No geocoding API key configured; leaving unresolved coordinates as-is");
            (dataset, None)
        }
        (Some(key), false) => {
            let geocoder = GoogleGeocoder::new(key.clone()).context("Failed to build HTTP client")?;
            let enricher =
                GeocodeEnricher::new(geocoder, settings.retry_policy(), settings.address_columns());
            let (dataset, report) = enricher.enrich(ctx, dataset).await?;
            (dataset, Some(report))
        }
    };

    let conn = db::connect(&settings.db_path)?;
    let loader = ChunkedLoader::new(settings.table.clone(), settings.batch_size)?;
    let load = loader.load(ctx, &mut SqliteSink::new(&conn), &dataset)?;

    Ok(RunSummary {
        extracted,
        rows: dataset.len(),
        geocoding,
        load,
    })
}

async fn extract_all(
    ctx: &RunContext,
    settings: &Settings,
    session: &BrowserSession,
) -> Result<(Vec<Dataset>, Vec<PhaseReport>)> {
    let scrape = settings.scrape_settings();
    let scraper = PaginatedScraper::new(scrape);
    let mut parts = Vec::with_capacity(settings.sources.len());
    let mut reports = Vec::with_capacity(settings.sources.len());

    for url in &settings.sources {
        let (mut table, schema) = session
            .open_table(
                ctx,
                url,
                settings.header_offset,
                scrape.control_timeout,
                scrape.poll_interval,
            )
            .await
            .with_context(|| format!("Failed to open table at {url}"))?;
        let out = scraper
            .scrape(ctx, &mut table, schema)
            .await
            .with_context(|| format!("Extraction failed for {url}"))?;
        info!(
            url = %url,
            rows = out.dataset.len(),
            pages = out.pages,
            expected = ?out.expected,
            "source extracted"
        );
        parts.push(out.dataset);
        reports.push(out.report);
    }
    Ok((parts, reports))
}
