use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

/// One table cell as read from the DOM, before any decoding.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawCell {
    pub text: String,
    /// Raw action payload of the cell's locate control, when it has one.
    #[serde(default)]
    pub locate: Option<String>,
}

#[cfg(test)]
impl RawCell {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            locate: None,
        }
    }

    pub fn locate(payload: impl Into<String>) -> Self {
        Self {
            text: String::new(),
            locate: Some(payload.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextControl {
    Enabled,
    Disabled,
}

#[derive(Debug, Error)]
pub enum DomError {
    #[error("element went stale mid-read")]
    Stale,
    #[error("element not interactable yet: {0}")]
    NotReady(String),
    #[error("invalid selector: {0}")]
    InvalidSelector(String),
    #[error("element missing: {0}")]
    Missing(String),
    #[error("browser protocol error: {0}")]
    Protocol(String),
}

impl DomError {
    /// Faults expected while the table re-renders; safe to retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, DomError::Stale | DomError::NotReady(_))
    }
}

/// Query shapes the scraper issues against the rendered table page.
#[async_trait]
pub trait TablePage: Send {
    /// Every rendered cell of the column at `index` (0-based), in row order,
    /// read in one batched evaluation.
    async fn column_cells(&mut self, index: usize) -> Result<Vec<RawCell>, DomError>;

    /// Text identity of the first rendered row.
    async fn first_row_text(&mut self) -> Result<String, DomError>;

    async fn next_control(&mut self) -> Result<NextControl, DomError>;

    async fn click_next(&mut self) -> Result<(), DomError>;

    /// The localized "showing x of N records" counter.
    async fn record_count_text(&mut self) -> Result<String, DomError>;
}
