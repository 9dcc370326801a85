//! Concurrent multi-source aggregation
//!
//! An [`Aggregator`] answers a [`Request`] by fanning out one task per
//! source. Each task fetches the source's raw rows from the [`Store`] and
//! folds them into that source's [`RowMap`]; tasks share nothing but the
//! store handle and the resolved [`Plan`]. Results are collected in
//! completion order. The first failure of any source fails the whole request:
//! the remaining tasks are aborted, outstanding fetches included, and the
//! failure is returned as-is. A partial matrix is never produced.
//!
//! No per-task timeout is applied here. A fetch that never completes stalls
//! its request unless the [`Store`] bounds it.

use std::sync::Arc;

use metrics::counter;
use time::Date;
use tokio::{sync::Semaphore, task::JoinSet};
use tracing::{debug, info, warn};

use crate::{
    bucket::Resolution,
    config::Config,
    dense::{self, Matrix},
    metric::{self, Plan, Registry},
    request::{self, Request},
    row_map::{self, RowMap},
    store::{self, Store},
};

/// Errors produced by [`Aggregator`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Wrapper around [`request::Error`].
    #[error(transparent)]
    Request(#[from] request::Error),
    /// Wrapper around [`metric::Error`], an unknown metric was requested.
    #[error(transparent)]
    Metric(#[from] metric::Error),
    /// The store failed to fetch a source's rows.
    #[error("Fetch of source {source_id} failed: {error}")]
    Store {
        /// Failing source
        source_id: String,
        /// Error as reported by the store
        #[source]
        error: store::Error,
    },
    /// A source's rows could not be folded into a row map.
    #[error("Row map of source {source_id} failed: {error}")]
    RowMap {
        /// Failing source
        source_id: String,
        /// Underlying build error
        #[source]
        error: row_map::Error,
    },
    /// Wrapper around [`dense::Error`].
    #[error(transparent)]
    Dense(#[from] dense::Error),
    /// A source task was cancelled before reporting its result.
    #[error("Source task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Answers stats requests against a [`Store`].
#[derive(Debug)]
pub struct Aggregator<S: ?Sized> {
    store: Arc<S>,
    registry: Registry,
    config: Config,
}

impl<S> Aggregator<S>
where
    S: Store + ?Sized + 'static,
{
    /// Create an [`Aggregator`] with an explicit metric registry.
    #[must_use]
    pub fn new(store: Arc<S>, registry: Registry, config: Config) -> Self {
        Self {
            store,
            registry,
            config,
        }
    }

    /// Create an [`Aggregator`] whose registry is derived from `config`.
    #[must_use]
    pub fn from_config(store: Arc<S>, config: Config) -> Self {
        let registry = config.registry();
        Self::new(store, registry, config)
    }

    /// The registry requests are resolved against.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Build the dense matrix for `request`.
    ///
    /// # Errors
    ///
    /// Function will error if the request is invalid, names an unknown
    /// metric, or if any single source fails to fetch or fold.
    pub async fn stats(&self, request: &Request) -> Result<Matrix, Error> {
        let plan = Arc::new(self.plan(request)?);
        let row_maps = self.fan_out(request, &plan).await?;
        let matrix = dense::build(
            request.start,
            request.end,
            request.resolution,
            &plan,
            row_maps,
        )?;
        info!(
            table = %request.table,
            sources = request.sources.len(),
            rows = matrix.len(),
            resolution = %request.resolution,
            "Stats request complete"
        );
        Ok(matrix)
    }

    /// Build the sparse row map of every source in `request`.
    ///
    /// Row maps are returned in completion order, not request order.
    ///
    /// # Errors
    ///
    /// Function will error if the request is invalid or names an unknown
    /// metric, in which case the store is never consulted, or with the first
    /// source failure to arrive.
    pub async fn row_maps(&self, request: &Request) -> Result<Vec<RowMap>, Error> {
        let plan = Arc::new(self.plan(request)?);
        self.fan_out(request, &plan).await
    }

    fn plan(&self, request: &Request) -> Result<Plan, Error> {
        request.validate()?;
        Ok(self.registry.plan(&request.metrics)?)
    }

    async fn fan_out(&self, request: &Request, plan: &Arc<Plan>) -> Result<Vec<RowMap>, Error> {
        counter!("stats_requests").increment(1);

        let semaphore = Arc::new(Semaphore::new(self.config.concurrent_fetches_max.get()));
        let mut join_set = JoinSet::new();
        for source in &request.sources {
            let task = SourceTask {
                table: request.table.clone(),
                source: source.clone(),
                start: request.start,
                end: request.end,
                resolution: request.resolution,
                plan: Arc::clone(plan),
            };
            let store = Arc::clone(&self.store);
            let semaphore = Arc::clone(&semaphore);
            join_set.spawn(async move {
                // The semaphore is never closed, acquisition cannot fail.
                let _permit = semaphore.acquire().await.ok();
                let result = task.run(store.as_ref()).await;
                (task.source, result)
            });
        }
        debug!(
            table = %request.table,
            sources = request.sources.len(),
            concurrent_fetches_max = self.config.concurrent_fetches_max.get(),
            "Fanned out source tasks"
        );

        let mut row_maps = Vec::with_capacity(request.sources.len());
        while let Some(joined) = join_set.join_next().await {
            let outcome = joined.map_err(Error::from).and_then(|(source, result)| {
                result.map(|row_map| (source, row_map))
            });
            match outcome {
                Ok((source, row_map)) => {
                    debug!(source = %source, buckets = row_map.len(), "Source complete");
                    row_maps.push(row_map);
                }
                Err(err) => {
                    counter!("stats_source_failures").increment(1);
                    warn!(
                        error = %err,
                        outstanding = join_set.len(),
                        "Source failed, aborting outstanding sources"
                    );
                    join_set.abort_all();
                    return Err(err);
                }
            }
        }

        Ok(row_maps)
    }
}

/// Everything one source task needs, owned.
#[derive(Debug)]
struct SourceTask {
    table: String,
    source: String,
    start: Date,
    end: Date,
    resolution: Resolution,
    plan: Arc<Plan>,
}

impl SourceTask {
    async fn run<S>(&self, store: &S) -> Result<RowMap, Error>
    where
        S: Store + ?Sized,
    {
        let rows = store
            .fetch(&self.table, &self.source, self.start, self.end)
            .await
            .map_err(|error| Error::Store {
                source_id: self.source.clone(),
                error,
            })?;
        counter!("stats_source_fetches").increment(1);

        row_map::build(&self.source, &self.plan, self.resolution, &rows).map_err(|error| {
            Error::RowMap {
                source_id: self.source.clone(),
                error,
            }
        })
    }
}
