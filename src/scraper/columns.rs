use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use super::page::{DomError, RawCell, TablePage};

static LOCATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(([-+]?\d+\.\d+),\s*([-+]?\d+\.\d+)").unwrap());

static COUNT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d[\d.]*").unwrap());

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.lat, self.lng)
    }
}

/// Total record count from a counter like "Mostrando 1 a 10 de 12.345 registros".
/// The last number wins; `.` is a thousands separator.
pub fn parse_record_count(text: &str) -> Option<usize> {
    let last = COUNT_RE.find_iter(text).last()?;
    last.as_str().replace('.', "").parse().ok()
}

/// Pull `lat,lng` out of a locate control's action payload,
/// e.g. `irMapa(-34.6037, -58.3816, 'Carnes Juan')`, keeping the digits
/// exactly as the page wrote them.
pub fn locate_text(raw: &str) -> Option<String> {
    let caps = LOCATE_RE.captures(raw)?;
    Some(format!("{},{}", &caps[1], &caps[2]))
}

/// Cell value as stored in a record. Locate cells in the last column become
/// `"lat,lng"`, or empty when the payload can't be parsed.
pub fn decode_cell(cell: RawCell, is_last_column: bool) -> String {
    match cell.locate {
        Some(payload) if is_last_column => locate_text(&payload).unwrap_or_default(),
        _ => cell.text.trim().to_string(),
    }
}

/// Reads whole columns from the rendered page.
#[derive(Debug, Clone, Copy)]
pub struct ColumnExtractor {
    column_count: usize,
}

impl ColumnExtractor {
    pub fn new(column_count: usize) -> Self {
        Self { column_count }
    }

    pub async fn extract_column<P>(&self, page: &mut P, index: usize) -> Result<Vec<String>, DomError>
    where
        P: TablePage + ?Sized,
    {
        let is_last = index + 1 == self.column_count;
        let cells = page.column_cells(index).await?;
        Ok(cells.into_iter().map(|c| decode_cell(c, is_last)).collect())
    }
}
