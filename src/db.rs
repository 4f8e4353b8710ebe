use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::Connection;

use crate::dataset::Record;
use crate::loader::{LoadError, RelationalSink};

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;
    }
    let conn = Connection::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    Ok(conn)
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// SQLite destination for the loader.
pub struct SqliteSink<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteSink<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }
}

impl RelationalSink for SqliteSink<'_> {
    fn replace_table(&mut self, table: &str, columns: &[String]) -> Result<(), LoadError> {
        let cols = columns
            .iter()
            .map(|c| format!("{} TEXT", quote_ident(c)))
            .collect::<Vec<_>>()
            .join(", ");
        self.conn.execute_batch(&format!(
            "DROP TABLE IF EXISTS {t};
             CREATE TABLE {t} ({cols});",
            t = quote_ident(table),
        ))?;
        Ok(())
    }

    fn append_rows(&mut self, table: &str, columns: &[String], rows: &[Record]) -> Result<usize, LoadError> {
        let names = columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ");
        let placeholders = (1..=columns.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(table),
            names,
            placeholders
        );

        let tx = self.conn.unchecked_transaction()?;
        let mut count = 0;
        {
            let mut stmt = tx.prepare(&sql)?;
            for r in rows {
                count += stmt.execute(rusqlite::params_from_iter(r.values()))?;
            }
        }
        tx.commit()?;
        Ok(count)
    }
}

// ── Stats ──

pub struct Stats {
    pub rows: usize,
    pub without_coordinates: usize,
}

pub fn get_stats(conn: &Connection, table: &str, coordinate_column: &str) -> Result<Stats> {
    let t = quote_ident(table);
    let rows: usize = conn
        .query_row(&format!("SELECT COUNT(*) FROM {t}"), [], |r| r.get(0))
        .with_context(|| format!("Failed to count rows of {table}"))?;
    let without_coordinates: usize = conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM {t} WHERE COALESCE({c}, '') = ''",
            c = quote_ident(coordinate_column)
        ),
        [],
        |r| r.get(0),
    )?;
    Ok(Stats {
        rows,
        without_coordinates,
    })
}
