//! Metric rules and the registry that names them
//!
//! A metric is requested by name. The [`Registry`] maps that name to a
//! [`Rule`] describing which raw series the metric is read from and how its
//! samples accumulate. Registries are plain values: the aggregator is handed
//! one at construction and tests are free to build their own.

use rustc_hash::FxHashMap;
use serde::Deserialize;

use crate::accumulator::{Accumulator, Kind, Slots};

/// Name of the raw series every other series is index-aligned to.
pub const HOURS: &str = "hours";

/// Errors produced by [`Registry`], [`Plan`] and [`Samples`]
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The requested metric has no rule in the registry.
    #[error("Metric not recognized: {0}")]
    UnknownMetric(String),
    /// A rule needs a raw series that was not supplied.
    #[error("Raw series missing: {0}")]
    MissingSeries(String),
    /// A raw series does not line up with the `hours` axis.
    #[error("Raw series {series} has {actual} samples, hours axis has {expected}")]
    LengthMismatch {
        /// Offending raw series
        series: String,
        /// Length of the `hours` axis
        expected: usize,
        /// Length of the offending series
        actual: usize,
    },
}

/// One source's raw series for one stored row, all index-aligned to
/// [`HOURS`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Samples {
    hours: Vec<f64>,
    series: FxHashMap<String, Vec<f64>>,
}

impl Samples {
    /// Create a sample set over the given `hours` axis.
    #[must_use]
    pub fn new(hours: Vec<f64>) -> Self {
        Self {
            hours,
            series: FxHashMap::default(),
        }
    }

    /// Add a named raw series.
    ///
    /// # Errors
    ///
    /// Function will error if `values` is not the same length as the `hours`
    /// axis. Series are never truncated or padded.
    pub fn insert(&mut self, name: impl Into<String>, values: Vec<f64>) -> Result<(), Error> {
        let name = name.into();
        if values.len() != self.hours.len() {
            return Err(Error::LengthMismatch {
                series: name,
                expected: self.hours.len(),
                actual: values.len(),
            });
        }
        self.series.insert(name, values);
        Ok(())
    }

    /// The sample axis, epoch seconds.
    #[must_use]
    pub fn hours(&self) -> &[f64] {
        &self.hours
    }

    /// Number of samples on the axis.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hours.len()
    }

    /// Whether the axis is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hours.is_empty()
    }

    /// Look up a raw series by name. `hours` is itself a valid series.
    ///
    /// # Errors
    ///
    /// Function will error if the series was never inserted.
    pub fn series(&self, name: &str) -> Result<&[f64], Error> {
        if name == HOURS {
            return Ok(&self.hours);
        }
        self.series
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| Error::MissingSeries(name.to_string()))
    }
}

/// How a metric is extracted from raw series and accumulated.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Rule {
    /// Each sample of the series is summed.
    Sum(String),
    /// The maximum sample of the series is kept.
    Max(String),
    /// Samples are summed pairwise and reported as their quotient.
    Ratio {
        /// Series summed into the numerator
        numerator: String,
        /// Series summed into the denominator
        denominator: String,
    },
}

impl Rule {
    /// Raw series this rule reads.
    #[must_use]
    pub fn series(&self) -> Vec<&str> {
        match self {
            Rule::Sum(s) | Rule::Max(s) => vec![s.as_str()],
            Rule::Ratio {
                numerator,
                denominator,
            } => vec![numerator.as_str(), denominator.as_str()],
        }
    }

    /// The kind of accumulator this rule builds.
    #[must_use]
    pub fn kind(&self) -> Kind {
        match self {
            Rule::Sum(_) => Kind::Sum,
            Rule::Max(_) => Kind::Max,
            Rule::Ratio { .. } => Kind::Ratio,
        }
    }

    /// Build one accumulator per sample index of `samples`.
    ///
    /// # Errors
    ///
    /// Function will error if a series this rule reads is absent.
    pub fn apply(&self, samples: &Samples) -> Result<Vec<Accumulator>, Error> {
        let out = match self {
            Rule::Sum(s) => samples
                .series(s)?
                .iter()
                .copied()
                .map(Accumulator::Sum)
                .collect(),
            Rule::Max(s) => samples
                .series(s)?
                .iter()
                .copied()
                .map(Accumulator::Max)
                .collect(),
            Rule::Ratio {
                numerator,
                denominator,
            } => samples
                .series(numerator)?
                .iter()
                .zip(samples.series(denominator)?)
                .map(|(&numerator, &denominator)| Accumulator::Ratio {
                    numerator,
                    denominator,
                })
                .collect(),
        };
        Ok(out)
    }
}

/// Mapping of metric name to [`Rule`].
#[derive(Debug, Clone)]
pub struct Registry {
    rules: FxHashMap<String, Rule>,
}

impl Default for Registry {
    /// The broadcast metrics: `avg_concurrents`, `max_concurrents`,
    /// `hours_broadcast` and `hours_watched`.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.insert(
            "avg_concurrents",
            Rule::Ratio {
                numerator: "hours_watched".to_string(),
                denominator: "hours_broadcast".to_string(),
            },
        );
        registry.insert("max_concurrents", Rule::Max("max_concurrents".to_string()));
        registry.insert("hours_broadcast", Rule::Sum("hours_broadcast".to_string()));
        registry.insert("hours_watched", Rule::Sum("hours_watched".to_string()));
        registry
    }
}

impl Registry {
    /// A registry with no rules at all.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            rules: FxHashMap::default(),
        }
    }

    /// Install `rule` under `name`, returning any rule it replaced.
    pub fn insert(&mut self, name: impl Into<String>, rule: Rule) -> Option<Rule> {
        self.rules.insert(name.into(), rule)
    }

    /// Look up a rule.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Rule> {
        self.rules.get(name)
    }

    /// Resolve an ordered metric list into a [`Plan`].
    ///
    /// # Errors
    ///
    /// Function will error on the first name with no rule.
    pub fn plan<S: AsRef<str>>(&self, metrics: &[S]) -> Result<Plan, Error> {
        let mut names = Vec::with_capacity(metrics.len());
        let mut rules = Vec::with_capacity(metrics.len());
        for metric in metrics {
            let name = metric.as_ref();
            let rule = self
                .get(name)
                .ok_or_else(|| Error::UnknownMetric(name.to_string()))?;
            names.push(name.to_string());
            rules.push(rule.clone());
        }

        let mut series: Vec<String> = rules
            .iter()
            .flat_map(Rule::series)
            .filter(|s| *s != HOURS)
            .map(str::to_string)
            .collect();
        series.sort_unstable();
        series.dedup();

        Ok(Plan {
            names,
            rules,
            series,
        })
    }
}

/// The rules of one request, in request order.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    names: Vec<String>,
    rules: Vec<Rule>,
    series: Vec<String>,
}

impl Plan {
    /// Metric names in request order.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Number of metrics, the width of every [`Slots`] this plan builds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the plan requests no metrics.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Accumulator kind of every metric, in request order.
    #[must_use]
    pub fn shape(&self) -> Vec<Kind> {
        self.rules.iter().map(Rule::kind).collect()
    }

    /// Raw series, other than `hours`, that must be decoded for this plan.
    #[must_use]
    pub fn series(&self) -> &[String] {
        &self.series
    }

    /// Build one [`Slots`] per sample index of `samples`.
    ///
    /// # Errors
    ///
    /// Function will error if any rule is missing a series.
    pub fn slots(&self, samples: &Samples) -> Result<Vec<Slots>, Error> {
        let mut columns = self
            .rules
            .iter()
            .map(|rule| rule.apply(samples).map(Vec::into_iter))
            .collect::<Result<Vec<_>, _>>()?;

        let mut rows = Vec::with_capacity(samples.len());
        for _ in 0..samples.len() {
            let row = columns.iter_mut().filter_map(|column| column.next()).collect();
            rows.push(Slots::new(row));
        }
        Ok(rows)
    }
}
