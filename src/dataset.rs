use std::collections::HashSet;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("duplicate column name in table header: {0}")]
    DuplicateColumn(String),
    #[error("column {column} not present in table schema")]
    MissingColumn { column: String },
    #[error("record has {got} values, schema has {expected} columns")]
    RecordWidth { expected: usize, got: usize },
    #[error("schemas differ between sources: {left:?} vs {right:?}")]
    SchemaMismatch { left: Vec<String>, right: Vec<String> },
}

/// Ordered, unique column names discovered from one table header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    columns: Vec<String>,
}

impl TableSchema {
    pub fn new(columns: Vec<String>) -> Result<Self, DatasetError> {
        let mut seen = HashSet::new();
        for c in &columns {
            if !seen.insert(c.as_str()) {
                return Err(DatasetError::DuplicateColumn(c.clone()));
            }
        }
        Ok(Self { columns })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn position(&self, column: &str) -> Result<usize, DatasetError> {
        self.columns
            .iter()
            .position(|c| c == column)
            .ok_or_else(|| DatasetError::MissingColumn {
                column: column.to_string(),
            })
    }
}

/// One table row. Values are positional against the owning dataset's schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Record {
    values: Vec<String>,
}

impl Record {
    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub fn get(&self, index: usize) -> &str {
        self.values.get(index).map(String::as_str).unwrap_or_default()
    }

    pub fn set(&mut self, index: usize, value: String) {
        if let Some(slot) = self.values.get_mut(index) {
            *slot = value;
        }
    }
}

/// Rows sharing one schema. Every record is exactly as wide as the schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataset {
    schema: TableSchema,
    records: Vec<Record>,
}

impl Dataset {
    pub fn new(schema: TableSchema) -> Self {
        Self {
            schema,
            records: Vec::new(),
        }
    }

    pub fn push(&mut self, values: Vec<String>) -> Result<(), DatasetError> {
        if values.len() != self.schema.len() {
            return Err(DatasetError::RecordWidth {
                expected: self.schema.len(),
                got: values.len(),
            });
        }
        self.records.push(Record { values });
        Ok(())
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn records_mut(&mut self) -> &mut [Record] {
        &mut self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Concatenate datasets in order and drop repeated rows, keeping the
    /// first occurrence.
    pub fn concat_dedup(parts: Vec<Dataset>) -> Result<Option<Dataset>, DatasetError> {
        let mut parts = parts.into_iter();
        let Some(mut merged) = parts.next() else {
            return Ok(None);
        };
        for part in parts {
            if part.schema != merged.schema {
                return Err(DatasetError::SchemaMismatch {
                    left: merged.schema.columns.clone(),
                    right: part.schema.columns,
                });
            }
            merged.records.extend(part.records);
        }
        merged.dedup();
        Ok(Some(merged))
    }

    pub fn dedup(&mut self) {
        let mut seen = HashSet::with_capacity(self.records.len());
        self.records.retain(|r| seen.insert(r.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> TableSchema {
        TableSchema::new(vec!["Nombre".into(), "Dirección".into(), "Localizar".into()]).unwrap()
    }

    fn dataset(rows: &[[&str; 3]]) -> Dataset {
        let mut ds = Dataset::new(schema());
        for r in rows {
            ds.push(r.iter().map(|s| s.to_string()).collect()).unwrap();
        }
        ds
    }

    #[test]
    fn rejects_duplicate_columns() {
        let err = TableSchema::new(vec!["a".into(), "b".into(), "a".into()]).unwrap_err();
        assert!(matches!(err, DatasetError::DuplicateColumn(c) if c == "a"));
    }

    #[test]
    fn rejects_ragged_record() {
        let mut ds = Dataset::new(schema());
        let err = ds.push(vec!["x".into()]).unwrap_err();
        assert!(matches!(err, DatasetError::RecordWidth { expected: 3, got: 1 }));
        assert!(ds.is_empty());
    }

    #[test]
    fn dedup_of_repeated_run_equals_single_run() {
        let rows = [
            ["Carnes Juan", "Calle 1", "-34.6,-58.4"],
            ["Don Pepe", "Calle 2", "No disponible"],
            ["Carnes Juan", "Calle 1", "-34.6,-58.4"],
        ];
        let once = Dataset::concat_dedup(vec![dataset(&rows)]).unwrap().unwrap();
        let twice = Dataset::concat_dedup(vec![dataset(&rows), dataset(&rows)])
            .unwrap()
            .unwrap();
        assert_eq!(once, twice);
        assert_eq!(once.len(), 2);
        assert_eq!(once.records()[0].get(0), "Carnes Juan");
    }

    #[test]
    fn concat_requires_matching_schema() {
        let other = Dataset::new(TableSchema::new(vec!["x".into()]).unwrap());
        let err = Dataset::concat_dedup(vec![dataset(&[]), other]).unwrap_err();
        assert!(matches!(err, DatasetError::SchemaMismatch { .. }));
    }

    #[test]
    fn concat_of_nothing_is_none() {
        assert!(Dataset::concat_dedup(Vec::new()).unwrap().is_none());
    }

    #[test]
    fn position_reports_missing_column() {
        let s = schema();
        assert_eq!(s.position("Localizar").unwrap(), 2);
        assert!(matches!(
            s.position("Localidad"),
            Err(DatasetError::MissingColumn { .. })
        ));
    }
}
