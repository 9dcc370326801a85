//! Aggregator configuration
//!
//! Configuration is read from YAML. Every field has a default so an empty
//! document is a valid configuration.

use std::num::NonZeroUsize;

use rustc_hash::FxHashMap;
use serde::Deserialize;

use crate::metric::{Registry, Rule};

/// Errors produced by [`Config`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Error for a serde [`serde_yaml`].
    #[error("Failed to deserialize yaml: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),
}

fn default_concurrent_fetches_max() -> NonZeroUsize {
    NonZeroUsize::new(64).unwrap_or(NonZeroUsize::MIN)
}

/// Main configuration struct for the aggregator
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Upper bound on source fetches in flight at once, per request.
    #[serde(default = "default_concurrent_fetches_max")]
    pub concurrent_fetches_max: NonZeroUsize,
    /// Metrics installed on top of the built-in registry. A name shared with
    /// a built-in replaces it.
    #[serde(default)]
    #[serde(with = "serde_yaml::with::singleton_map_recursive")]
    pub metrics: FxHashMap<String, Rule>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            concurrent_fetches_max: default_concurrent_fetches_max(),
            metrics: FxHashMap::default(),
        }
    }
}

impl Config {
    /// Parse a configuration document.
    ///
    /// # Errors
    ///
    /// Function will error if `contents` is not valid YAML for [`Config`].
    pub fn from_yaml(contents: &str) -> Result<Self, Error> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// The built-in registry extended with this configuration's metrics.
    #[must_use]
    pub fn registry(&self) -> Registry {
        let mut registry = Registry::default();
        for (name, rule) in &self.metrics {
            registry.insert(name.clone(), rule.clone());
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_default() {
        let config = Config::from_yaml("{}").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.concurrent_fetches_max.get(), 64);
    }

    #[test]
    fn custom_metrics_extend_builtins() {
        let contents = r#"
concurrent_fetches_max: 4
metrics:
  peak_hour:
    max: hours
  watched_per_broadcast:
    ratio:
      numerator: hours_watched
      denominator: hours_broadcast
"#;
        let config = Config::from_yaml(contents).unwrap();
        assert_eq!(config.concurrent_fetches_max.get(), 4);

        let registry = config.registry();
        assert_eq!(
            registry.get("peak_hour"),
            Some(&Rule::Max("hours".to_string()))
        );
        assert_eq!(
            registry.get("watched_per_broadcast"),
            registry.get("avg_concurrents")
        );
        assert!(registry.get("hours_watched").is_some());
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        assert!(Config::from_yaml("concurrent_fetches_max: 0").is_err());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(Config::from_yaml("retries: 3").is_err());
    }

    #[test]
    fn unknown_rule_kind_is_rejected() {
        let contents = r#"
metrics:
  weird:
    median: hours
"#;
        assert!(Config::from_yaml(contents).is_err());
    }
}
