use std::ops::Range;

use thiserror::Error;
use tracing::info;

use crate::context::{Phase, PhaseReport, RunContext};
use crate::dataset::{Dataset, Record};

pub const DEFAULT_BATCH_SIZE: usize = 5_000;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("batch size must be at least 1")]
    InvalidBatchSize,
    #[error("sink error: {0}")]
    Sink(#[from] rusqlite::Error),
    #[error("run cancelled after {loaded} rows")]
    Cancelled { loaded: usize },
}

/// Destination that can be reset to an empty table and appended to.
pub trait RelationalSink {
    /// Drop any previous table of this name and create it empty.
    fn replace_table(&mut self, table: &str, columns: &[String]) -> Result<(), LoadError>;

    fn append_rows(&mut self, table: &str, columns: &[String], rows: &[Record]) -> Result<usize, LoadError>;
}

/// Split `total` rows into consecutive ranges of at most `batch_size`.
/// The final range is truncated to what remains.
pub fn plan_batches(total: usize, batch_size: usize) -> impl Iterator<Item = Range<usize>> {
    let step = batch_size.max(1);
    (0..total)
        .step_by(step)
        .map(move |start| start..(start + step).min(total))
}

/// Replace-then-append bulk loader. Not resumable: a rerun after a partial
/// failure replaces the table and inserts everything again.
pub struct ChunkedLoader {
    table: String,
    batch_size: usize,
}

impl ChunkedLoader {
    pub fn new(table: impl Into<String>, batch_size: usize) -> Result<Self, LoadError> {
        if batch_size == 0 {
            return Err(LoadError::InvalidBatchSize);
        }
        Ok(Self {
            table: table.into(),
            batch_size,
        })
    }

    pub fn load<S: RelationalSink + ?Sized>(
        &self,
        ctx: &RunContext,
        sink: &mut S,
        dataset: &Dataset,
    ) -> Result<PhaseReport, LoadError> {
        let columns = dataset.schema().columns();
        sink.replace_table(&self.table, columns)?;
        info!("Table {} created", self.table);

        let timer = PhaseReport::start(Phase::Load);
        let total = dataset.len();
        let pb = ctx.progress_bar(total as u64, format!("Inserting {total} rows..."));
        let mut loaded = 0usize;
        for range in plan_batches(total, self.batch_size) {
            if ctx.is_cancelled() {
                pb.abandon();
                return Err(LoadError::Cancelled { loaded });
            }
            loaded += sink.append_rows(&self.table, columns, &dataset.records()[range])?;
            pb.set_position(loaded as u64);
        }
        pb.finish_and_clear();
        Ok(timer.finish(ctx, loaded))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::TableSchema;

    #[derive(Default)]
    struct RecordingSink {
        replaced: Vec<(String, Vec<String>)>,
        batches: Vec<usize>,
    }

    impl RelationalSink for RecordingSink {
        fn replace_table(&mut self, table: &str, columns: &[String]) -> Result<(), LoadError> {
            self.replaced.push((table.to_string(), columns.to_vec()));
            Ok(())
        }

        fn append_rows(&mut self, _table: &str, _columns: &[String], rows: &[Record]) -> Result<usize, LoadError> {
            self.batches.push(rows.len());
            Ok(rows.len())
        }
    }

    fn dataset(rows: usize) -> Dataset {
        let mut ds = Dataset::new(TableSchema::new(vec!["n".into()]).unwrap());
        for i in 0..rows {
            ds.push(vec![i.to_string()]).unwrap();
        }
        ds
    }

    #[test]
    fn batches_cover_every_row_once() {
        for total in [0usize, 1, 4, 5, 6, 10, 11, 12_345] {
            for size in [1usize, 3, 5, 5_000] {
                let ranges: Vec<_> = plan_batches(total, size).collect();
                assert_eq!(ranges.len(), total.div_ceil(size), "total={total} size={size}");
                assert_eq!(ranges.iter().map(|r| r.len()).sum::<usize>(), total);
                assert!(ranges.windows(2).all(|w| w[0].end == w[1].start));
                if let Some(last) = ranges.last() {
                    assert_eq!(last.len(), total - size * ((total - 1) / size));
                }
            }
        }
    }

    #[test]
    fn final_batch_is_truncated() {
        let ranges: Vec<_> = plan_batches(12_345, DEFAULT_BATCH_SIZE).collect();
        assert_eq!(ranges, vec![0..5_000, 5_000..10_000, 10_000..12_345]);
    }

    #[test]
    fn load_replaces_schema_then_appends_in_batches() {
        let ctx = RunContext::quiet();
        let mut sink = RecordingSink::default();
        let report = ChunkedLoader::new("comercios", 4)
            .unwrap()
            .load(&ctx, &mut sink, &dataset(10))
            .unwrap();
        assert_eq!(sink.replaced, vec![("comercios".to_string(), vec!["n".to_string()])]);
        assert_eq!(sink.batches, vec![4, 4, 2]);
        assert_eq!(report.items, 10);
    }

    #[test]
    fn empty_dataset_only_creates_table() {
        let ctx = RunContext::quiet();
        let mut sink = RecordingSink::default();
        ChunkedLoader::new("t", 5).unwrap().load(&ctx, &mut sink, &dataset(0)).unwrap();
        assert_eq!(sink.replaced.len(), 1);
        assert!(sink.batches.is_empty());
    }

    #[test]
    fn zero_batch_size_rejected() {
        assert!(matches!(ChunkedLoader::new("t", 0), Err(LoadError::InvalidBatchSize)));
    }

    #[test]
    fn cancelled_load_stops_before_next_batch() {
        let ctx = RunContext::quiet();
        ctx.cancel_token().cancel();
        let mut sink = RecordingSink::default();
        let err = ChunkedLoader::new("t", 2)
            .unwrap()
            .load(&ctx, &mut sink, &dataset(4))
            .unwrap_err();
        assert!(matches!(err, LoadError::Cancelled { loaded: 0 }));
    }
}
