//! The caller-facing stats request

use serde::Deserialize;
use time::Date;

use crate::bucket::Resolution;

/// Errors produced by [`Request`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The range ends before it starts.
    #[error("Request range is inverted: {start} is after {end}")]
    InvertedRange {
        /// First day of the range
        start: Date,
        /// Last day of the range
        end: Date,
    },
    /// Error for a serde [`serde_yaml`].
    #[error("Failed to deserialize yaml: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),
    /// Error for a serde [`serde_json`].
    #[error("Failed to deserialize json: {0}")]
    SerdeJson(#[from] serde_json::Error),
}

/// A request for the dense stats of a set of sources.
///
/// `start` and `end` are calendar dates, both inclusive, and are written as
/// `YYYY-MM-DD`. `resolution` is `hour` or `day`; anything else fails to
/// parse.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    /// Table, or source set, the raw rows live in
    pub table: String,
    /// Sources to aggregate across
    pub sources: Vec<String>,
    /// First day of the range
    pub start: Date,
    /// Last day of the range, inclusive
    pub end: Date,
    /// Metric names, in output column order
    pub metrics: Vec<String>,
    /// Bucketing granularity
    pub resolution: Resolution,
}

impl Request {
    /// Parse a YAML request.
    ///
    /// # Errors
    ///
    /// Function will error if `contents` does not describe a [`Request`],
    /// including when the resolution is not recognized.
    pub fn from_yaml(contents: &str) -> Result<Self, Error> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Parse a JSON request.
    ///
    /// # Errors
    ///
    /// Function will error if `contents` does not describe a [`Request`],
    /// including when the resolution is not recognized.
    pub fn from_json(contents: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(contents)?)
    }

    /// Check the request is internally consistent.
    ///
    /// # Errors
    ///
    /// Function will error if `start` is after `end`.
    pub fn validate(&self) -> Result<(), Error> {
        if self.start > self.end {
            return Err(Error::InvertedRange {
                start: self.start,
                end: self.end,
            });
        }
        Ok(())
    }
}
