use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::Browser;
use chromiumoxide::error::CdpError;
use chromiumoxide::Page;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::context::RunContext;
use crate::dataset::TableSchema;
use crate::scraper::page::{DomError, NextControl, RawCell, TablePage};
use crate::scraper::ScrapeError;

const NEXT_SELECTOR: &str = "#table_id_next";

const TABLE_READY_JS: &str = "document.querySelector('.row-border tbody > tr') !== null";

const HEADERS_JS: &str =
    "Array.from(document.querySelectorAll('table[id] th'), (th) => th.innerText.trim())";

const FIRST_ROW_JS: &str = "(() => {
    const row = document.querySelector('table[id] > tbody > tr');
    return row ? row.innerText : null;
})()";

const NEXT_STATE_JS: &str = "(() => {
    const next = document.querySelector('#table_id_next');
    return next ? next.className : null;
})()";

const COUNTER_JS: &str = "(() => {
    const info = document.querySelector('#table_id_info');
    return info ? info.innerText : null;
})()";

/// Batched read of one column: cell text plus the raw `onclick` payload of
/// a locate control, decoded on the Rust side.
fn column_js(index: usize) -> String {
    format!(
        "Array.from(document.querySelectorAll('tbody > tr > td:nth-child({})'), (cell) => {{
            const locate = cell.querySelector('.boton_ir');
            return {{
                text: cell.innerText.trim(),
                locate: locate ? locate.getAttribute('onclick') : null,
            }};
        }})",
        index + 1
    )
}

fn classify(err: CdpError) -> DomError {
    let msg = err.to_string();
    if msg.contains("is not a valid selector") {
        DomError::InvalidSelector(msg)
    } else if msg.contains("No node")
        || msg.contains("Could not find node")
        || msg.contains("Cannot find context")
    {
        DomError::Stale
    } else {
        DomError::Protocol(msg)
    }
}

/// Connection to a running Chrome over the DevTools protocol.
pub struct BrowserSession {
    browser: Browser,
    handler: JoinHandle<()>,
}

impl BrowserSession {
    pub async fn connect(url: &str) -> Result<Self, DomError> {
        let (browser, mut handler) = Browser::connect(url).await.map_err(classify)?;
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });
        info!("Connected to browser at {}", url);
        Ok(Self { browser, handler })
    }

    /// Open `url`, wait for its table, and read the header into a schema.
    pub async fn open_table(
        &self,
        ctx: &RunContext,
        url: &str,
        header_offset: usize,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<(BrowserTable, TableSchema), ScrapeError> {
        let page = self.browser.new_page(url).await.map_err(classify)?;
        let table = BrowserTable { page };
        table.wait_until_rendered(ctx, timeout, poll_interval).await?;

        let headers: Vec<String> = table.eval(HEADERS_JS).await?;
        debug!(?headers, "table headers");
        let schema = TableSchema::new(headers.into_iter().skip(header_offset).collect())?;
        info!("Loaded {} with columns {:?}", url, schema.columns());
        Ok((table, schema))
    }

    pub async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            debug!("browser close failed: {}", e);
        }
        self.handler.abort();
    }
}

/// A source page whose table is driven through DevTools.
pub struct BrowserTable {
    page: Page,
}

impl BrowserTable {
    async fn eval<T: DeserializeOwned>(&self, js: &str) -> Result<T, DomError> {
        self.page
            .evaluate(js)
            .await
            .map_err(classify)?
            .into_value::<T>()
            .map_err(|e| DomError::Protocol(e.to_string()))
    }

    async fn wait_until_rendered(
        &self,
        ctx: &RunContext,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<(), ScrapeError> {
        let started = Instant::now();
        loop {
            match self.eval::<bool>(TABLE_READY_JS).await {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(e) if e.is_transient() => {}
                Err(e) => return Err(e.into()),
            }
            if started.elapsed() >= timeout {
                return Err(ScrapeError::ControlTimeout {
                    control: "table",
                    waited: timeout,
                });
            }
            if !ctx.sleep(poll_interval).await {
                return Err(ScrapeError::Cancelled);
            }
        }
    }
}

#[async_trait]
impl TablePage for BrowserTable {
    async fn column_cells(&mut self, index: usize) -> Result<Vec<RawCell>, DomError> {
        self.eval(&column_js(index)).await
    }

    async fn first_row_text(&mut self) -> Result<String, DomError> {
        self.eval::<Option<String>>(FIRST_ROW_JS)
            .await?
            .ok_or(DomError::Stale)
    }

    async fn next_control(&mut self) -> Result<NextControl, DomError> {
        let class = self
            .eval::<Option<String>>(NEXT_STATE_JS)
            .await?
            .ok_or_else(|| DomError::NotReady(NEXT_SELECTOR.into()))?;
        if class.split_whitespace().any(|c| c == "disabled") {
            Ok(NextControl::Disabled)
        } else {
            Ok(NextControl::Enabled)
        }
    }

    async fn click_next(&mut self) -> Result<(), DomError> {
        self.page
            .find_element(NEXT_SELECTOR)
            .await
            .map_err(classify)?
            .click()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn record_count_text(&mut self) -> Result<String, DomError> {
        self.eval::<Option<String>>(COUNTER_JS)
            .await?
            .ok_or_else(|| DomError::Missing("#table_id_info".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_query_is_one_based() {
        let js = column_js(0);
        assert!(js.contains("td:nth-child(1)"));
        assert!(js.contains(".boton_ir"));
    }

    #[test]
    fn raw_cells_deserialize_from_column_query_shape() {
        let cells: Vec<RawCell> = serde_json::from_str(
            r#"[{"text": "Carnes Juan", "locate": null},
                {"text": "", "locate": "irMapa(-34.6, -58.4)"}]"#,
        )
        .unwrap();
        assert_eq!(cells[0], RawCell::text("Carnes Juan"));
        assert_eq!(cells[1].locate.as_deref(), Some("irMapa(-34.6, -58.4)"));
    }
}
