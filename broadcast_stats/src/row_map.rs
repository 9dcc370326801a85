//! Per-source sparse row maps
//!
//! A source's stored rows are decoded, turned into per-sample [`Slots`] by a
//! [`Plan`] and folded into a [`RowMap`] keyed by bucket. Samples that land in
//! the same bucket merge slot by slot. At day resolution, for example, the 24
//! hourly samples of one UTC day share a bucket. Because every merge is
//! associative and commutative the order rows are folded in does not matter.

use std::collections::{BTreeMap, btree_map::Entry};

use metrics::counter;
use tracing::debug;

use crate::{
    accumulator::{Kind, Slots},
    bucket::{Resolution, bucket_key},
    metric::{self, HOURS, Plan, Samples},
    store::RawRow,
};

/// Errors produced while building a [`RowMap`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A series the plan needs is absent from a stored row.
    #[error("Raw series {series} missing from row for month {month}")]
    MissingSeries {
        /// Absent series
        series: String,
        /// Month of the offending row
        month: i64,
    },
    /// A stored series is not a JSON array of numbers.
    #[error("Failed to decode raw series {series}: {source}")]
    Decode {
        /// Undecodable series
        series: String,
        /// Underlying decode error
        #[source]
        source: serde_json::Error,
    },
    /// Wrapper around [`metric::Error`], notably series length mismatches.
    #[error(transparent)]
    Metric(#[from] metric::Error),
}

/// Sparse mapping of bucket key to the accumulators of that bucket.
///
/// A map is tied to the [`Plan`] it was created for. Every [`Slots`] in it
/// was built by that plan and so has the plan's width and slot kinds.
#[derive(Debug, Clone, PartialEq)]
pub struct RowMap {
    shape: Vec<Kind>,
    buckets: BTreeMap<i64, Slots>,
}

impl RowMap {
    /// Create an empty map for the metrics of `plan`.
    #[must_use]
    pub fn new(plan: &Plan) -> Self {
        Self {
            shape: plan.shape(),
            buckets: BTreeMap::new(),
        }
    }

    /// Accumulator kind of every slot, in metric order.
    #[must_use]
    pub fn shape(&self) -> &[Kind] {
        &self.shape
    }

    /// Fold `slots` into the bucket `key`.
    ///
    /// A new bucket takes `slots` as-is. An existing bucket merges them
    /// element-wise.
    pub(crate) fn add(&mut self, key: i64, slots: Slots) {
        match self.buckets.entry(key) {
            Entry::Vacant(entry) => {
                entry.insert(slots);
            }
            Entry::Occupied(mut entry) => entry.get_mut().merge(&slots),
        }
    }

    /// Remove and return the accumulators of bucket `key`.
    pub(crate) fn take(&mut self, key: i64) -> Option<Slots> {
        self.buckets.remove(&key)
    }

    /// Number of populated buckets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Whether no bucket is populated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Populated buckets in ascending key order.
    pub fn iter(&self) -> impl Iterator<Item = (i64, &Slots)> {
        self.buckets.iter().map(|(k, v)| (*k, v))
    }
}

/// Build the row map of `source` from its stored `rows`.
///
/// Every stored series is a JSON array of numbers. `hours` holds epoch
/// seconds and is expected to be hour-aligned; its samples are cast to whole
/// seconds, so a fractional timestamp is truncated and one beyond the `i64`
/// range saturates.
///
/// # Errors
///
/// Function will error if any row is missing a required series, holds a
/// series that does not decode, or holds a series whose length differs from
/// its `hours` axis. No partial map is returned.
pub fn build(
    source: &str,
    plan: &Plan,
    resolution: Resolution,
    rows: &[RawRow],
) -> Result<RowMap, Error> {
    let mut row_map = RowMap::new(plan);
    let mut samples_folded: u64 = 0;

    for row in rows {
        let samples = decode(row, plan)?;
        let slots = plan.slots(&samples)?;

        for (&hour, slots) in samples.hours().iter().zip(slots) {
            #[allow(clippy::cast_possible_truncation)]
            let key = bucket_key(hour as i64, resolution);
            row_map.add(key, slots);
        }
        samples_folded += samples.len() as u64;
    }

    counter!("stats_rows_folded").increment(rows.len() as u64);
    debug!(
        source,
        rows = rows.len(),
        samples = samples_folded,
        buckets = row_map.len(),
        %resolution,
        "Built row map"
    );
    Ok(row_map)
}

fn decode(row: &RawRow, plan: &Plan) -> Result<Samples, Error> {
    let mut samples = Samples::new(decode_series(row, HOURS)?);
    for series in plan.series() {
        let values = decode_series(row, series)?;
        samples.insert(series.as_str(), values)?;
    }
    Ok(samples)
}

fn decode_series(row: &RawRow, series: &str) -> Result<Vec<f64>, Error> {
    let encoded = row.attribute(series).ok_or_else(|| Error::MissingSeries {
        series: series.to_string(),
        month: row.month(),
    })?;
    serde_json::from_str(encoded).map_err(|source| Error::Decode {
        series: series.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::Registry;
    use proptest::prelude::*;

    const METRICS: [&str; 4] = [
        "avg_concurrents",
        "max_concurrents",
        "hours_broadcast",
        "hours_watched",
    ];

    fn row(
        month: i64,
        hours: &[f64],
        watched: &[f64],
        broadcast: &[f64],
        concurrents: &[f64],
    ) -> RawRow {
        let mut row = RawRow::new(month);
        row.insert_series("hours", hours).unwrap();
        row.insert_series("hours_watched", watched).unwrap();
        row.insert_series("hours_broadcast", broadcast).unwrap();
        row.insert_series("max_concurrents", concurrents).unwrap();
        row
    }

    fn plan() -> Plan {
        Registry::default().plan(&METRICS).unwrap()
    }

    fn summarized(row_map: &RowMap) -> Vec<(i64, Vec<f64>)> {
        row_map
            .iter()
            .map(|(k, slots)| (k, slots.summarize().collect()))
            .collect()
    }

    fn first_day() -> RawRow {
        row(
            0,
            &[0.0, 3_600.0, 43_200.0],
            &[1.0, 2.0, 3.0],
            &[1.0, 1.0, 0.5],
            &[3.0, 2.0, 5.0],
        )
    }

    #[test]
    fn hourly_keeps_each_sample() {
        let row_map = build("alpha", &plan(), Resolution::Hour, &[first_day()]).unwrap();
        assert_eq!(
            summarized(&row_map),
            vec![
                (0, vec![1.0, 3.0, 1.0, 1.0]),
                (3_600, vec![2.0, 2.0, 1.0, 2.0]),
                (43_200, vec![6.0, 5.0, 0.5, 3.0]),
            ]
        );
    }

    #[test]
    fn daily_collapses_into_one_bucket() {
        let row_map = build("alpha", &plan(), Resolution::Day, &[first_day()]).unwrap();
        let rows = summarized(&row_map);

        assert_eq!(rows.len(), 1);
        let (key, values) = &rows[0];
        assert_eq!(*key, 0);
        assert!((values[0] - 2.4).abs() < 1e-10);
        assert_eq!(&values[1..], &[5.0, 2.5, 6.0]);
    }

    #[test]
    fn rows_merge_into_shared_buckets() {
        let second = row(
            0,
            &[86_400.0, 90_000.0, 3_600.0],
            &[4.0, 4.0, 1.0],
            &[2.0, 2.0, 1.0],
            &[9.0, 1.0, 7.0],
        );
        let row_map = build("alpha", &plan(), Resolution::Day, &[first_day(), second]).unwrap();
        let rows = summarized(&row_map);

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0, 0);
        // (1 + 2 + 3 + 1) / (1 + 1 + 0.5 + 1)
        assert!((rows[0].1[0] - 2.0).abs() < 1e-10);
        assert_eq!(&rows[0].1[1..], &[7.0, 3.5, 7.0]);
        assert_eq!(rows[1], (86_400, vec![2.0, 9.0, 4.0, 8.0]));
    }

    #[test]
    fn metric_order_follows_plan() {
        let plan = Registry::default()
            .plan(&["hours_watched", "max_concurrents"])
            .unwrap();
        let row_map = build("alpha", &plan, Resolution::Day, &[first_day()]).unwrap();
        assert_eq!(summarized(&row_map), vec![(0, vec![6.0, 5.0])]);
    }

    #[test]
    fn length_mismatch_aborts_build() {
        let bad = row(
            0,
            &[0.0, 3_600.0],
            &[1.0, 2.0, 3.0],
            &[1.0, 1.0],
            &[1.0, 1.0],
        );
        let err = build("alpha", &plan(), Resolution::Hour, &[first_day(), bad]).unwrap_err();
        assert!(
            matches!(
                err,
                Error::Metric(metric::Error::LengthMismatch {
                    ref series,
                    expected: 2,
                    actual: 3,
                }) if series == "hours_watched"
            ),
            "{err}"
        );
    }

    #[test]
    fn decode_failure_aborts_build() {
        let bad = first_day().with_attribute("hours_broadcast", "[1, \"two\"]");
        let err = build("alpha", &plan(), Resolution::Hour, &[bad]).unwrap_err();
        assert!(
            matches!(err, Error::Decode { ref series, .. } if series == "hours_broadcast"),
            "{err}"
        );
    }

    #[test]
    fn missing_series_aborts_build() {
        let mut bare = RawRow::new(0);
        bare.insert_series("hours", &[0.0]).unwrap();
        let err = build("alpha", &plan(), Resolution::Hour, &[bare]).unwrap_err();
        assert!(matches!(err, Error::MissingSeries { month: 0, .. }), "{err}");
    }

    #[test]
    fn unused_series_are_not_decoded() {
        let plan = Registry::default().plan(&["hours_watched"]).unwrap();
        let row = first_day().with_attribute("max_concurrents", "not json");
        assert!(build("alpha", &plan, Resolution::Hour, &[row]).is_ok());
    }

    #[test]
    fn no_rows_is_empty_map() {
        let plan = plan();
        let row_map = build("alpha", &plan, Resolution::Day, &[]).unwrap();
        assert!(row_map.is_empty());
        assert_eq!(row_map.shape(), plan.shape().as_slice());
    }

    fn arb_row() -> impl Strategy<Value = RawRow> {
        // Integer-valued samples keep sums exact regardless of fold order.
        prop::collection::vec((0i64..96, 0u8..50, 1u8..50, 0u8..50), 0..24).prop_map(|samples| {
            let hours: Vec<f64> = samples.iter().map(|s| (s.0 * 3_600) as f64).collect();
            let watched: Vec<f64> = samples.iter().map(|s| f64::from(s.1)).collect();
            let broadcast: Vec<f64> = samples.iter().map(|s| f64::from(s.2)).collect();
            let concurrents: Vec<f64> = samples.iter().map(|s| f64::from(s.3)).collect();
            row(0, &hours, &watched, &broadcast, &concurrents)
        })
    }

    proptest! {
        #[test]
        fn fold_order_does_not_matter(
            rows in prop::collection::vec(arb_row(), 0..6),
            resolution in prop_oneof![Just(Resolution::Hour), Just(Resolution::Day)],
        ) {
            let plan = plan();
            let forward = build("alpha", &plan, resolution, &rows).unwrap();
            let mut reversed_rows = rows.clone();
            reversed_rows.reverse();
            let reversed = build("alpha", &plan, resolution, &reversed_rows).unwrap();

            prop_assert_eq!(forward, reversed);
        }
    }
}
