//! Query engine: resolve, scan, and aggregate a [`QueryRequest`].

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::error::Error;
use crate::storage::{RangeQuery, RangeStore};

use super::executor::QueryExecutor;
use super::request::{Interval, QueryRequest};
use super::resolver::{find_source, Source};
use super::session::{QuerySession, ResultShape, SessionResult};
use super::timeframe::{parse_timeframe, TimeRange, TimeframeOutput};

/// Response body of a query: the resolved timeframe and the result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryResponse {
    pub timeframe: TimeframeOutput,
    pub result: SessionResult,
}

/// Everything needed to evaluate a request, resolved before touching storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPlan {
    pub range: TimeRange,
    pub source: Source,
    pub table: String,
    pub row_key: String,
    pub shape: ResultShape,
    pub interval: Option<Interval>,
}

impl QueryPlan {
    /// Range predicate for the plan's row.
    pub fn range_query(&self) -> RangeQuery {
        RangeQuery::new(&self.table, &self.row_key, self.range.start, self.range.end)
    }

    /// Fresh session for accumulating the plan's rows.
    pub fn session(&self) -> QuerySession {
        QuerySession::new(self.shape.clone(), self.interval)
    }
}

/// Answers analytics queries from precomputed counters.
pub struct QueryEngine<S: RangeStore> {
    config: Arc<EngineConfig>,
    store: Arc<S>,
}

impl<S: RangeStore> Clone for QueryEngine<S> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: RangeStore> QueryEngine<S> {
    /// Create a new query engine.
    pub fn new(config: Arc<EngineConfig>, store: Arc<S>) -> Self {
        Self { config, store }
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Underlying range store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Execute a request relative to the current time.
    pub async fn execute(&self, request: &QueryRequest) -> Result<QueryResponse, Error> {
        self.execute_at(request, Utc::now(), &CancellationToken::new()).await
    }

    /// Execute a request that can be cancelled through `cancel`.
    pub async fn execute_with_cancel(
        &self,
        request: &QueryRequest,
        cancel: &CancellationToken,
    ) -> Result<QueryResponse, Error> {
        self.execute_at(request, Utc::now(), cancel).await
    }

    /// Execute a request with relative timeframes resolved against `now`.
    ///
    /// Applies the configured query timeout, if any.
    pub async fn execute_at(
        &self,
        request: &QueryRequest,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<QueryResponse, Error> {
        let plan = self.plan(request, now)?;

        match self.config.query_timeout() {
            Some(timeout) => tokio::time::timeout(timeout, self.evaluate(&plan, cancel))
                .await
                .map_err(|_| Error::Timeout(timeout.as_millis() as u64))?,
            None => self.evaluate(&plan, cancel).await,
        }
    }

    /// Resolve a request into a plan without reading any rows.
    pub fn plan(&self, request: &QueryRequest, now: DateTime<Utc>) -> Result<QueryPlan, Error> {
        request.validate()?;

        let metric = request
            .metric
            .as_deref()
            .unwrap_or(self.config.default_metric.as_str());
        if !self.config.has_metric(metric) {
            return Err(Error::InvalidRequest(format!("unknown metric '{metric}'")));
        }

        let range = parse_timeframe(now, &request.timeframe, request.timezone.as_deref())?;
        let source = find_source(&self.config.catalog, &request.filters, &request.group_by)?;
        let table = source.table_name(&self.config.period.name);
        let row_key = source.row_key(&request.filters, &request.event_collection, metric)?;
        let shape = ResultShape {
            residual_filters: source.residual_filters(&request.filters),
            group_by: request.group_by.clone(),
            properties: source.filter.properties.clone(),
        };

        debug!(
            table = %table,
            row_key = %row_key,
            filter = %source.filter.name,
            start = range.start,
            end = ?range.end,
            "planned query"
        );

        Ok(QueryPlan {
            range,
            source,
            table,
            row_key,
            shape,
            interval: request.interval,
        })
    }

    async fn evaluate(
        &self,
        plan: &QueryPlan,
        cancel: &CancellationToken,
    ) -> Result<QueryResponse, Error> {
        let started = Instant::now();
        let mut session = plan.session();

        let stats = QueryExecutor::new(self.store.as_ref())
            .scan(&plan.range_query(), cancel, |rows| session.add_rows(rows))
            .await?;

        info!(
            table = %plan.table,
            row_key = %plan.row_key,
            pages = stats.pages,
            rows = stats.rows,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "query complete"
        );

        Ok(QueryResponse {
            timeframe: plan.range.into(),
            result: session.result(),
        })
    }
}
