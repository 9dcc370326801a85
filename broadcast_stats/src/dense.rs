//! Dense, gap-filled stats matrices
//!
//! Row maps are sparse: a bucket only exists if some sample landed in it.
//! Callers want one row per step of the requested range, so this module
//! walks an explicit time axis and, for every step, merges the buckets of
//! every source holding that step. Steps no source holds are zero-filled.
//! Zero-fill is the only marker of missing data; a true zero and an absent
//! bucket are indistinguishable in the output.

use metrics::counter;
use serde::{Serialize, Serializer, ser::SerializeSeq};
use time::Date;

use crate::{
    accumulator::{Kind, Slots},
    bucket::{Resolution, axis},
    metric::Plan,
    row_map::RowMap,
};

/// Errors produced by [`build`]
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A row map was built for a plan with different metrics.
    #[error("Row map built for metrics {actual:?}, expected {expected:?}")]
    ShapeMismatch {
        /// Accumulator kinds of the plan
        expected: Vec<Kind>,
        /// Accumulator kinds of the offending row map
        actual: Vec<Kind>,
    },
}

/// One time step of a [`Matrix`].
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    timestamp: i64,
    values: Vec<f64>,
}

impl Row {
    /// Epoch second this row's bucket starts at.
    #[must_use]
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Summarized metric values, in request order.
    #[must_use]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// The row as `[timestamp, metric_1, ..., metric_n]`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn to_vec(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.values.len() + 1);
        out.push(self.timestamp as f64);
        out.extend_from_slice(&self.values);
        out
    }
}

impl Serialize for Row {
    /// Serialized as `[timestamp, metric_1, ..., metric_n]`. Note that JSON
    /// renders non-finite values as `null`.
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut seq = serializer.serialize_seq(Some(self.values.len() + 1))?;
        seq.serialize_element(&self.timestamp)?;
        for value in &self.values {
            seq.serialize_element(value)?;
        }
        seq.end()
    }
}

/// Gap-filled multi-source time series, one [`Row`] per axis step.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Matrix {
    rows: Vec<Row>,
}

impl Matrix {
    /// Rows in strictly ascending timestamp order.
    #[must_use]
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Number of axis steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the axis was empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Flatten into `[timestamp, metric_1, ..., metric_n]` rows.
    #[must_use]
    pub fn to_vecs(&self) -> Vec<Vec<f64>> {
        self.rows.iter().map(Row::to_vec).collect()
    }
}

/// Materialize `row_maps` over the axis of `start` through `end`.
///
/// Every row of the result holds one value per metric of `plan`. Buckets
/// outside the axis are dropped.
///
/// # Errors
///
/// Function will error if any of `row_maps` was built for a plan whose
/// metric kinds differ from those of `plan`.
pub fn build(
    start: Date,
    end: Date,
    resolution: Resolution,
    plan: &Plan,
    mut row_maps: Vec<RowMap>,
) -> Result<Matrix, Error> {
    let expected = plan.shape();
    if let Some(row_map) = row_maps.iter().find(|m| m.shape() != expected.as_slice()) {
        return Err(Error::ShapeMismatch {
            expected,
            actual: row_map.shape().to_vec(),
        });
    }

    let width = plan.len();
    let rows: Vec<Row> = axis(start, end, resolution)
        .into_iter()
        .map(|timestamp| {
            let mut merged: Option<Slots> = None;
            for row_map in &mut row_maps {
                if let Some(slots) = row_map.take(timestamp) {
                    merged = Some(match merged.take() {
                        Some(mut acc) => {
                            acc.merge(&slots);
                            acc
                        }
                        None => slots,
                    });
                }
            }

            let values = match merged {
                Some(slots) => slots.summarize().collect(),
                None => vec![0.0; width],
            };
            Row { timestamp, values }
        })
        .collect();

    counter!("stats_buckets_emitted").increment(rows.len() as u64);
    Ok(Matrix { rows })
}
