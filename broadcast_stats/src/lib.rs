//! Dense broadcast stats aggregation
//!
//! This library turns sparse, per-channel raw stats stored at hourly
//! granularity into dense, gap-filled time series merged across channels, at
//! hourly or daily resolution. Raw rows come from a [`store::Store`], are
//! folded into per-channel [`row_map::RowMap`]s concurrently and are then
//! materialized into a [`dense::Matrix`] by an [`aggregate::Aggregator`].

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_copy_implementations)]
#![deny(missing_debug_implementations)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::multiple_crate_versions)]

pub mod accumulator;
pub mod aggregate;
pub mod bucket;
pub mod config;
pub mod dense;
pub mod metric;
pub mod request;
pub mod row_map;
pub mod store;

pub use aggregate::Aggregator;
pub use bucket::Resolution;
pub use config::Config;
pub use dense::Matrix;
pub use metric::Registry;
pub use request::Request;
