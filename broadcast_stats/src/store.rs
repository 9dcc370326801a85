//! The storage collaborator boundary
//!
//! Raw stats live outside this crate, one stored row per channel per month.
//! Each row carries its raw series JSON-encoded, exactly as a document or
//! key/value store would hand them back. [`Store`] is the seam the aggregator
//! fetches through; [`MemoryStore`] is a complete in-process implementation.

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use time::Date;

use crate::bucket::{date_start, month_floor};

/// Errors produced by [`Store`] implementations
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The named table does not exist.
    #[error("Table {0} is missing")]
    TableMissing(String),
    /// Any failure of the backing store, passed through as-is.
    #[error("Store backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// One stored month of raw series for one source.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawRow {
    month: i64,
    attributes: FxHashMap<String, String>,
}

impl RawRow {
    /// Create an empty row for the month starting at epoch second `month`.
    #[must_use]
    pub fn new(month: i64) -> Self {
        Self {
            month,
            attributes: FxHashMap::default(),
        }
    }

    /// Set a raw, still-encoded attribute.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, encoded: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), encoded.into());
        self
    }

    /// Encode `values` and set them as the attribute `name`.
    ///
    /// # Errors
    ///
    /// Function will error if `values` contains a non-finite float, which
    /// JSON cannot represent.
    pub fn insert_series(
        &mut self,
        name: impl Into<String>,
        values: &[f64],
    ) -> Result<(), serde_json::Error> {
        if let Some(bad) = values.iter().find(|v| !v.is_finite()) {
            return Err(<serde_json::Error as serde::ser::Error>::custom(format!(
                "non-finite sample {bad}"
            )));
        }
        let encoded = serde_json::to_string(values)?;
        self.attributes.insert(name.into(), encoded);
        Ok(())
    }

    /// Epoch second of the first instant of the month this row covers.
    #[must_use]
    pub fn month(&self) -> i64 {
        self.month
    }

    /// The encoded attribute `name`, if stored.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

/// Source of raw monthly rows.
#[async_trait]
pub trait Store: Send + Sync {
    /// Return every stored row of `source` in `table` whose month overlaps
    /// `start` through `end`, ordered by month.
    ///
    /// # Errors
    ///
    /// Implementations return their own failures verbatim. No retries are
    /// expected of callers.
    async fn fetch(
        &self,
        table: &str,
        source: &str,
        start: Date,
        end: Date,
    ) -> Result<Vec<RawRow>, Error>;
}

/// A [`Store`] held entirely in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: FxHashMap<String, FxHashMap<String, Vec<RawRow>>>,
}

impl MemoryStore {
    /// Create an empty store with no tables.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `table` if it does not exist.
    pub fn create_table(&mut self, table: impl Into<String>) {
        self.tables.entry(table.into()).or_default();
    }

    /// Store `row` for `source`, creating `table` as needed.
    pub fn insert(&mut self, table: impl Into<String>, source: impl Into<String>, row: RawRow) {
        self.tables
            .entry(table.into())
            .or_default()
            .entry(source.into())
            .or_default()
            .push(row);
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn fetch(
        &self,
        table: &str,
        source: &str,
        start: Date,
        end: Date,
    ) -> Result<Vec<RawRow>, Error> {
        let sources = self
            .tables
            .get(table)
            .ok_or_else(|| Error::TableMissing(table.to_string()))?;

        let lower = month_floor(date_start(start));
        let upper = month_floor(date_start(end));
        let mut rows: Vec<RawRow> = sources
            .get(source)
            .into_iter()
            .flatten()
            .filter(|row| lower <= row.month && row.month <= upper)
            .cloned()
            .collect();
        rows.sort_by_key(RawRow::month);
        Ok(rows)
    }
}
