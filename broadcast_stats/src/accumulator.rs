//! Mergeable partial aggregates
//!
//! Every output cell of a stats matrix is the result of merging many raw
//! hourly samples: the samples of one channel that fall in the same bucket,
//! and then the per-channel partials of every channel in the request. The
//! core structure is [`Accumulator`], a closed set of partial aggregates that
//! know how to absorb another partial of the same kind and how to project
//! themselves into a final `f64`.
//!
//! # Semantics
//!
//! * `Sum(a).merge(Sum(b))` yields `Sum(a + b)`, summarizes to the total.
//! * `Max(a).merge(Max(b))` yields `Max(max(a, b))`, summarizes to the
//!   maximum.
//! * `Ratio(n0, d0).merge(Ratio(n1, d1))` yields `Ratio(n0 + n1, d0 + d1)`,
//!   summarizes to `n / d`.
//!
//! Stated logically, every `merge` is associative and commutative, so
//! partials may be combined in any grouping and any order. This is what
//! allows channels to be fetched concurrently and fanned-in unordered.
//! `summarize` is pure.
//!
//! Ratio division is unguarded. A denominator that sums to zero projects to
//! `NaN` or an infinity, and callers see that value as-is.

use std::fmt;

/// The variant of an [`Accumulator`], without its running value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// See [`Accumulator::Sum`].
    Sum,
    /// See [`Accumulator::Max`].
    Max,
    /// See [`Accumulator::Ratio`].
    Ratio,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Kind::Sum => "sum",
            Kind::Max => "max",
            Kind::Ratio => "ratio",
        };
        f.write_str(name)
    }
}

/// A partial aggregate for one metric in one bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Accumulator {
    /// Running total.
    Sum(f64),
    /// Running maximum.
    Max(f64),
    /// Running numerator and denominator, projected as their quotient.
    Ratio {
        /// Sum of all merged numerators
        numerator: f64,
        /// Sum of all merged denominators
        denominator: f64,
    },
}

impl Accumulator {
    /// Absorb `other` into `self`.
    ///
    /// # Panics
    ///
    /// Function will panic if `other` is not the same variant as `self`. Rows
    /// are only ever built from a single rule per metric position so a
    /// mismatch is a construction bug, not a data problem.
    pub fn merge(&mut self, other: &Accumulator) {
        match (self, other) {
            (Accumulator::Sum(lhs), Accumulator::Sum(rhs)) => *lhs += rhs,
            (Accumulator::Max(lhs), Accumulator::Max(rhs)) => *lhs = lhs.max(*rhs),
            (
                Accumulator::Ratio {
                    numerator,
                    denominator,
                },
                Accumulator::Ratio {
                    numerator: rhs_num,
                    denominator: rhs_denom,
                },
            ) => {
                *numerator += rhs_num;
                *denominator += rhs_denom;
            }
            (lhs, rhs) => panic!("cannot merge {} into {}", rhs.kind(), lhs.kind()),
        }
    }

    /// Project the partial into its final value.
    #[must_use]
    pub fn summarize(&self) -> f64 {
        match *self {
            Accumulator::Sum(v) | Accumulator::Max(v) => v,
            Accumulator::Ratio {
                numerator,
                denominator,
            } => numerator / denominator,
        }
    }

    /// The variant of this accumulator.
    #[must_use]
    pub fn kind(&self) -> Kind {
        match self {
            Accumulator::Sum(_) => Kind::Sum,
            Accumulator::Max(_) => Kind::Max,
            Accumulator::Ratio { .. } => Kind::Ratio,
        }
    }
}

/// The accumulators of one bucket, one slot per requested metric.
///
/// Slot `i` always holds the accumulator for the `i`th metric of the request
/// that produced it. Rows are only built inside this crate, by a
/// [`crate::metric::Plan`], so every row of one plan has the same width and
/// the same slot kinds.
#[derive(Debug, Clone, PartialEq)]
pub struct Slots(Vec<Accumulator>);

impl Slots {
    /// Construct from accumulators already ordered by metric position.
    #[must_use]
    pub(crate) fn new(accumulators: Vec<Accumulator>) -> Self {
        Self(accumulators)
    }

    /// Merge `other` element-wise into `self`, by metric position.
    ///
    /// # Panics
    ///
    /// Function will panic if the two rows do not have the same number of
    /// slots, or if any slot pair differs in variant.
    pub(crate) fn merge(&mut self, other: &Slots) {
        assert_eq!(
            self.0.len(),
            other.0.len(),
            "slot rows built from different metric lists"
        );
        for (lhs, rhs) in self.0.iter_mut().zip(&other.0) {
            lhs.merge(rhs);
        }
    }

    /// Summarize every slot, in metric order.
    pub fn summarize(&self) -> impl Iterator<Item = f64> + '_ {
        self.0.iter().map(Accumulator::summarize)
    }

    /// Number of metric slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the row carries no metrics at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
