use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use super::page::{NextControl, TablePage};
use super::ScrapeError;
use crate::context::RunContext;

/// Detects when a table page has finished re-rendering after a pagination
/// click, by watching the first row's text change.
#[derive(Debug, Clone, Copy)]
pub struct StabilityWaiter {
    poll_interval: Duration,
    /// `None` waits forever.
    deadline: Option<Duration>,
}

impl StabilityWaiter {
    pub fn new(poll_interval: Duration, deadline: Option<Duration>) -> Self {
        Self {
            poll_interval,
            deadline,
        }
    }

    /// Sample the first row until it differs from `current_marker` and return
    /// the new marker. Stale reads are retried.
    pub async fn wait_for_new_page<P>(
        &self,
        ctx: &RunContext,
        page: &mut P,
        current_marker: &str,
    ) -> Result<String, ScrapeError>
    where
        P: TablePage + ?Sized,
    {
        let started = Instant::now();
        let mut stale_reads = 0usize;
        loop {
            match page.first_row_text().await {
                Ok(marker) if marker != current_marker => {
                    if stale_reads > 0 {
                        debug!(stale_reads, "page settled after stale reads");
                    }
                    return Ok(marker);
                }
                Ok(_) => {}
                Err(e) if e.is_transient() => stale_reads += 1,
                Err(e) => return Err(ScrapeError::Dom(e)),
            }

            if let Some(limit) = self.deadline {
                let waited = started.elapsed();
                if waited >= limit {
                    return Err(ScrapeError::PaginationTimeout {
                        marker: current_marker.to_string(),
                        waited,
                    });
                }
            }
            if !ctx.sleep(self.poll_interval).await {
                return Err(ScrapeError::Cancelled);
            }
        }
    }
}

/// Wait for the "next" control to become interactable and report its state.
/// Transient faults are retried until `timeout`; anything else is fatal.
pub async fn locate_next<P>(
    ctx: &RunContext,
    page: &mut P,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<NextControl, ScrapeError>
where
    P: TablePage + ?Sized,
{
    let started = Instant::now();
    loop {
        match page.next_control().await {
            Ok(state) => return Ok(state),
            Err(e) if e.is_transient() => {
                if started.elapsed() >= timeout {
                    tracing::error!("Unable to locate next control within {:?}: {}", timeout, e);
                    return Err(ScrapeError::ControlTimeout {
                        control: "next",
                        waited: timeout,
                    });
                }
            }
            Err(e) => return Err(ScrapeError::Dom(e)),
        }
        if !ctx.sleep(poll_interval).await {
            return Err(ScrapeError::Cancelled);
        }
    }
}

/// Read the current first-row marker and click "next". Either step may hit
/// the table mid-render; transient faults are retried until `timeout`.
/// Returns the marker read before the click.
pub async fn click_next<P>(
    ctx: &RunContext,
    page: &mut P,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<String, ScrapeError>
where
    P: TablePage + ?Sized,
{
    let started = Instant::now();
    let marker = loop {
        match page.first_row_text().await {
            Ok(marker) => break marker,
            Err(e) if e.is_transient() => {
                if started.elapsed() >= timeout {
                    tracing::error!("Unable to read first row within {:?}: {}", timeout, e);
                    return Err(ScrapeError::ControlTimeout {
                        control: "first row",
                        waited: timeout,
                    });
                }
                debug!("first row not readable yet: {}", e);
            }
            Err(e) => return Err(ScrapeError::Dom(e)),
        }
        if !ctx.sleep(poll_interval).await {
            return Err(ScrapeError::Cancelled);
        }
    };

    loop {
        match page.click_next().await {
            Ok(()) => return Ok(marker),
            Err(e) if e.is_transient() => {
                if started.elapsed() >= timeout {
                    tracing::error!("Unable to click next control within {:?}: {}", timeout, e);
                    return Err(ScrapeError::ControlTimeout {
                        control: "next",
                        waited: timeout,
                    });
                }
                debug!("next control not clickable yet: {}", e);
            }
            Err(e) => return Err(ScrapeError::Dom(e)),
        }
        if !ctx.sleep(poll_interval).await {
            return Err(ScrapeError::Cancelled);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scraper::page::{DomError, RawCell};
    use async_trait::async_trait;
    use std::collections::VecDeque;

    /// Replays a scripted sequence of first-row and next-control reads.
    #[derive(Default)]
    struct Script {
        first_rows: VecDeque<Result<String, DomError>>,
        controls: VecDeque<Result<NextControl, DomError>>,
        clicks: VecDeque<Result<(), DomError>>,
        samples: usize,
        click_attempts: usize,
    }

    #[async_trait]
    impl TablePage for Script {
        async fn column_cells(&mut self, _index: usize) -> Result<Vec<RawCell>, DomError> {
            Ok(Vec::new())
        }

        async fn first_row_text(&mut self) -> Result<String, DomError> {
            self.samples += 1;
            self.first_rows
                .pop_front()
                .unwrap_or_else(|| Ok("old".to_string()))
        }

        async fn next_control(&mut self) -> Result<NextControl, DomError> {
            self.controls
                .pop_front()
                .unwrap_or_else(|| Err(DomError::NotReady("#table_id_next".into())))
        }

        async fn click_next(&mut self) -> Result<(), DomError> {
            self.click_attempts += 1;
            self.clicks.pop_front().unwrap_or(Ok(()))
        }

        async fn record_count_text(&mut self) -> Result<String, DomError> {
            Ok(String::new())
        }
    }

    fn waiter(deadline: Option<Duration>) -> StabilityWaiter {
        StabilityWaiter::new(Duration::from_millis(100), deadline)
    }

    #[tokio::test(start_paused = true)]
    async fn returns_new_marker_after_stale_reads() {
        let ctx = RunContext::quiet();
        let mut page = Script {
            first_rows: VecDeque::from(vec![
                Ok("old".into()),
                Err(DomError::Stale),
                Err(DomError::Stale),
                Ok("new".into()),
            ]),
            ..Default::default()
        };
        let marker = waiter(None).wait_for_new_page(&ctx, &mut page, "old").await.unwrap();
        assert_eq!(marker, "new");
        assert_eq!(page.samples, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_page_hits_deadline() {
        let ctx = RunContext::quiet();
        let mut page = Script::default();
        let err = waiter(Some(Duration::from_secs(2)))
            .wait_for_new_page(&ctx, &mut page, "old")
            .await
            .unwrap_err();
        assert!(matches!(err, ScrapeError::PaginationTimeout { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn structural_fault_is_not_retried() {
        let ctx = RunContext::quiet();
        let mut page = Script {
            first_rows: VecDeque::from(vec![Err(DomError::InvalidSelector("tbody>tr".into()))]),
            ..Default::default()
        };
        let err = waiter(None).wait_for_new_page(&ctx, &mut page, "old").await.unwrap_err();
        assert!(matches!(err, ScrapeError::Dom(DomError::InvalidSelector(_))));
        assert_eq!(page.samples, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_wait_aborts() {
        let ctx = RunContext::quiet();
        ctx.cancel_token().cancel();
        let mut page = Script::default();
        let err = waiter(None).wait_for_new_page(&ctx, &mut page, "old").await.unwrap_err();
        assert!(matches!(err, ScrapeError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn next_control_waits_through_not_ready() {
        let ctx = RunContext::quiet();
        let mut page = Script {
            controls: VecDeque::from(vec![
                Err(DomError::NotReady("#table_id_next".into())),
                Ok(NextControl::Disabled),
            ]),
            ..Default::default()
        };
        let state = locate_next(&ctx, &mut page, Duration::from_secs(10), Duration::from_millis(250))
            .await
            .unwrap();
        assert_eq!(state, NextControl::Disabled);
    }

    #[tokio::test(start_paused = true)]
    async fn absent_next_control_times_out() {
        let ctx = RunContext::quiet();
        let mut page = Script::default();
        let err = locate_next(&ctx, &mut page, Duration::from_secs(10), Duration::from_millis(250))
            .await
            .unwrap_err();
        assert!(matches!(err, ScrapeError::ControlTimeout { control: "next", .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn click_retries_stale_marker_and_unready_control() {
        let ctx = RunContext::quiet();
        let mut page = Script {
            first_rows: VecDeque::from(vec![Err(DomError::Stale), Ok("row 1".into())]),
            clicks: VecDeque::from(vec![Err(DomError::NotReady("#table_id_next".into()))]),
            ..Default::default()
        };
        let marker = click_next(&ctx, &mut page, Duration::from_secs(10), Duration::from_millis(250))
            .await
            .unwrap();
        assert_eq!(marker, "row 1");
        assert_eq!(page.samples, 2);
        assert_eq!(page.click_attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn unclickable_next_control_times_out() {
        let ctx = RunContext::quiet();
        let mut page = Script {
            clicks: std::iter::repeat_with(|| Err(DomError::NotReady("#table_id_next".into())))
                .take(1000)
                .collect(),
            ..Default::default()
        };
        let started = Instant::now();
        let err = click_next(&ctx, &mut page, Duration::from_secs(10), Duration::from_millis(250))
            .await
            .unwrap_err();
        assert!(matches!(err, ScrapeError::ControlTimeout { control: "next", .. }));
        assert!(started.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn structural_click_fault_is_not_retried() {
        let ctx = RunContext::quiet();
        let mut page = Script {
            clicks: VecDeque::from(vec![Err(DomError::Missing("#table_id_next".into()))]),
            ..Default::default()
        };
        let err = click_next(&ctx, &mut page, Duration::from_secs(10), Duration::from_millis(250))
            .await
            .unwrap_err();
        assert!(matches!(err, ScrapeError::Dom(DomError::Missing(_))));
        assert_eq!(page.click_attempts, 1);
    }
}
