pub mod columns;
pub mod page;
pub mod waiter;

use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::context::{Phase, PhaseReport, RunContext};
use crate::dataset::{Dataset, DatasetError, TableSchema};
use columns::{parse_record_count, ColumnExtractor};
use page::{DomError, NextControl, TablePage};
use waiter::{click_next, locate_next, StabilityWaiter};

pub use columns::Coordinates;

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("table page did not change from {marker:?} within {waited:?}")]
    PaginationTimeout { marker: String, waited: Duration },
    #[error("{control} control not interactable within {waited:?}")]
    ControlTimeout { control: &'static str, waited: Duration },
    #[error("column {column} has {got} cells, expected {expected}")]
    RaggedColumns {
        column: String,
        expected: usize,
        got: usize,
    },
    #[error("run cancelled")]
    Cancelled,
    #[error(transparent)]
    Dom(#[from] DomError),
    #[error(transparent)]
    Dataset(#[from] DatasetError),
}

#[derive(Debug, Clone, Copy)]
pub struct ScrapeSettings {
    pub control_timeout: Duration,
    pub poll_interval: Duration,
    /// Upper bound on one page transition; `None` waits forever.
    pub page_deadline: Option<Duration>,
}

#[derive(Debug)]
pub struct Extraction {
    pub dataset: Dataset,
    /// Total the page claimed to hold, if its counter could be parsed.
    pub expected: Option<usize>,
    pub pages: usize,
    pub report: PhaseReport,
}

/// Drives extract -> next -> wait across every page of the table.
pub struct PaginatedScraper {
    settings: ScrapeSettings,
    waiter: StabilityWaiter,
}

impl PaginatedScraper {
    pub fn new(settings: ScrapeSettings) -> Self {
        Self {
            settings,
            waiter: StabilityWaiter::new(settings.poll_interval, settings.page_deadline),
        }
    }

    pub async fn scrape<P>(
        &self,
        ctx: &RunContext,
        page: &mut P,
        schema: TableSchema,
    ) -> Result<Extraction, ScrapeError>
    where
        P: TablePage + ?Sized,
    {
        let timer = PhaseReport::start(Phase::Extract);
        let counter = page.record_count_text().await?;
        let expected = parse_record_count(&counter);
        if expected.is_none() {
            warn!("Could not read record count from {:?}", counter);
        }

        let extractor = ColumnExtractor::new(schema.len());
        let mut columns: Vec<Vec<String>> = vec![Vec::new(); schema.len()];
        let pb = ctx.progress_bar(
            expected.unwrap_or(0) as u64,
            format!("Extracting {} records...", expected.unwrap_or(0)),
        );
        let mut pages = 0usize;

        loop {
            if ctx.is_cancelled() {
                pb.abandon();
                return Err(ScrapeError::Cancelled);
            }
            let mut page_rows = 0;
            for (index, acc) in columns.iter_mut().enumerate() {
                let values = extractor.extract_column(page, index).await?;
                page_rows = values.len();
                acc.extend(values);
            }
            pages += 1;
            pb.inc(page_rows as u64);

            let state = locate_next(
                ctx,
                page,
                self.settings.control_timeout,
                self.settings.poll_interval,
            )
            .await?;
            if state == NextControl::Disabled {
                info!("No more records to extract");
                break;
            }

            let marker = click_next(
                ctx,
                page,
                self.settings.control_timeout,
                self.settings.poll_interval,
            )
            .await?;
            self.waiter.wait_for_new_page(ctx, page, &marker).await?;
        }
        pb.finish_and_clear();

        let dataset = assemble(schema, columns)?;
        if let Some(n) = expected.filter(|&n| n != dataset.len()) {
            warn!(
                expected = n,
                extracted = dataset.len(),
                "extracted row count differs from the page's record counter"
            );
        }
        let report = timer.finish(ctx, dataset.len());
        Ok(Extraction {
            dataset,
            expected,
            pages,
            report,
        })
    }
}

/// Turn per-column accumulators into row-oriented records.
fn assemble(schema: TableSchema, columns: Vec<Vec<String>>) -> Result<Dataset, ScrapeError> {
    let rows = columns.first().map_or(0, Vec::len);
    for (name, col) in schema.columns().iter().zip(&columns) {
        if col.len() != rows {
            return Err(ScrapeError::RaggedColumns {
                column: name.clone(),
                expected: rows,
                got: col.len(),
            });
        }
    }

    let mut iters: Vec<_> = columns.into_iter().map(Vec::into_iter).collect();
    let mut dataset = Dataset::new(schema);
    for _ in 0..rows {
        let values = iters.iter_mut().filter_map(Iterator::next).collect();
        dataset.push(values)?;
    }
    Ok(dataset)
}
