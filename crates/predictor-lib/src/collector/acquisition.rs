//! Per-cycle metrics acquisition
//!
//! Issues every configured query concurrently, each under its own timeout,
//! and folds the answers into a complete [`WorkloadSnapshot`]. A query that
//! fails contributes zero for its metric and never affects the others.

use super::{MetricsStore, QueryData, QueryRequest, StoreError};
use crate::error::PredictorError;
use crate::models::{MetricQuerySpec, RawMetric, WorkloadSnapshot};
use futures::future::join_all;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Snapshot plus the metrics that degraded to zero while building it
#[derive(Debug)]
pub struct AcquisitionOutcome {
    pub snapshot: WorkloadSnapshot,
    pub failures: Vec<PredictorError>,
}

impl AcquisitionOutcome {
    pub fn failed_metrics(&self) -> Vec<RawMetric> {
        self.failures
            .iter()
            .filter_map(|e| match e {
                PredictorError::Acquisition { metric, .. } => Some(*metric),
                _ => None,
            })
            .collect()
    }
}

/// Fan-out/fan-in acquisition over a fixed query set
pub struct MetricsAcquisition {
    store: Arc<dyn MetricsStore>,
    queries: Vec<MetricQuerySpec>,
}

impl MetricsAcquisition {
    pub fn new(store: Arc<dyn MetricsStore>, queries: Vec<MetricQuerySpec>) -> Self {
        Self { store, queries }
    }

    /// Whether the underlying store answers queries
    pub async fn store_reachable(&self) -> bool {
        match self.store.probe().await {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "Metrics store probe failed");
                false
            }
        }
    }

    /// Run one acquisition cycle. Always yields a fully populated snapshot.
    pub async fn acquire(&self) -> AcquisitionOutcome {
        let start = Instant::now();
        let results = join_all(
            self.queries
                .iter()
                .map(|spec| async move { (spec.metric, self.query_one(spec).await) }),
        )
        .await;

        let mut readings = Vec::with_capacity(results.len());
        let mut failures = Vec::new();
        for (metric, result) in results {
            match result {
                Ok(value) => readings.push((metric, value)),
                Err(reason) => {
                    warn!(metric = %metric, error = %reason, "Metric query failed, using 0");
                    failures.push(PredictorError::Acquisition {
                        metric,
                        reason: reason.to_string(),
                    });
                }
            }
        }

        debug!(
            succeeded = readings.len(),
            failed = failures.len(),
            elapsed_ms = start.elapsed().as_millis(),
            "Acquisition cycle complete"
        );

        AcquisitionOutcome {
            snapshot: WorkloadSnapshot::from_readings(readings),
            failures,
        }
    }

    async fn query_one(&self, spec: &MetricQuerySpec) -> Result<f64, StoreError> {
        let request = QueryRequest::instant(spec.expr.clone());
        let data = tokio::time::timeout(spec.timeout, self.store.query(&request))
            .await
            .map_err(|_| StoreError::Timeout(spec.timeout))??;

        if let QueryData::String { value, .. } = &data {
            return Err(StoreError::Decode(format!("string result '{}'", value)));
        }

        match data.first_value() {
            None => {
                debug!(metric = %spec.metric, "Query returned no series, using 0");
                Ok(0.0)
            }
            Some(value) if value.is_finite() => Ok(value),
            Some(value) => Err(StoreError::Decode(format!("non-finite value {}", value))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{async_trait, Sample};
    use crate::models::WorkloadTarget;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    enum Reply {
        Value(f64),
        Empty,
        Fail,
        Hang,
    }

    /// Store double answering per query expression
    struct ScriptedStore {
        replies: HashMap<String, Reply>,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl ScriptedStore {
        fn new(replies: HashMap<String, Reply>) -> Self {
            Self {
                replies,
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl MetricsStore for ScriptedStore {
        async fn query(&self, request: &QueryRequest) -> Result<QueryData, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match self.replies.get(&request.expr) {
                Some(Reply::Value(v)) => Ok(QueryData::Vector(vec![Sample {
                    labels: HashMap::new(),
                    timestamp: 0.0,
                    value: *v,
                }])),
                Some(Reply::Empty) => Ok(QueryData::Vector(vec![])),
                Some(Reply::Hang) => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(QueryData::Vector(vec![]))
                }
                Some(Reply::Fail) | None => {
                    Err(StoreError::Transport("connection refused".to_string()))
                }
            }
        }
    }

    fn queries(timeout: Duration) -> Vec<MetricQuerySpec> {
        WorkloadTarget::new("default", "web").default_queries(timeout)
    }

    fn replies_for(specs: &[MetricQuerySpec], f: impl Fn(RawMetric) -> Reply) -> HashMap<String, Reply> {
        specs.iter().map(|s| (s.expr.clone(), f(s.metric))).collect()
    }

    #[tokio::test]
    async fn test_one_failure_keeps_other_five_exact() {
        let specs = queries(Duration::from_secs(1));
        let replies = replies_for(&specs, |m| match m {
            RawMetric::QueueLength => Reply::Fail,
            RawMetric::CpuUsage => Reply::Value(40.0),
            RawMetric::MemoryUsage => Reply::Value(512.0),
            RawMetric::RequestRate => Reply::Value(12.5),
            RawMetric::ResponseTime => Reply::Value(0.25),
            RawMetric::ActiveConnections => Reply::Value(7.0),
        });
        let acquisition = MetricsAcquisition::new(Arc::new(ScriptedStore::new(replies)), specs);

        let outcome = acquisition.acquire().await;

        assert_eq!(
            outcome.snapshot,
            WorkloadSnapshot {
                cpu_usage: 40.0,
                memory_usage: 512.0,
                request_rate: 12.5,
                queue_length: 0.0,
                response_time: 0.25,
                active_connections: 7.0,
            }
        );
        assert_eq!(outcome.failed_metrics(), vec![RawMetric::QueueLength]);
    }

    #[tokio::test]
    async fn test_unreachable_store_yields_all_zero_snapshot() {
        let specs = queries(Duration::from_secs(1));
        let acquisition =
            MetricsAcquisition::new(Arc::new(ScriptedStore::new(HashMap::new())), specs);

        let outcome = acquisition.acquire().await;

        assert_eq!(outcome.snapshot, WorkloadSnapshot::default());
        assert_eq!(outcome.failures.len(), 6);
    }

    #[tokio::test]
    async fn test_empty_result_is_zero_without_failure() {
        let specs = queries(Duration::from_secs(1));
        let replies = replies_for(&specs, |m| match m {
            RawMetric::ActiveConnections => Reply::Empty,
            _ => Reply::Value(1.0),
        });
        let acquisition = MetricsAcquisition::new(Arc::new(ScriptedStore::new(replies)), specs);

        let outcome = acquisition.acquire().await;

        assert_eq!(outcome.snapshot.active_connections, 0.0);
        assert_eq!(outcome.snapshot.cpu_usage, 1.0);
        assert!(outcome.failures.is_empty());
    }

    #[tokio::test]
    async fn test_non_finite_value_degrades_to_zero() {
        let specs = queries(Duration::from_secs(1));
        let replies = replies_for(&specs, |m| match m {
            RawMetric::ResponseTime => Reply::Value(f64::NAN),
            _ => Reply::Value(2.0),
        });
        let acquisition = MetricsAcquisition::new(Arc::new(ScriptedStore::new(replies)), specs);

        let outcome = acquisition.acquire().await;

        assert_eq!(outcome.snapshot.response_time, 0.0);
        assert_eq!(outcome.failed_metrics(), vec![RawMetric::ResponseTime]);
    }

    #[tokio::test]
    async fn test_slow_query_times_out_alone() {
        let specs = queries(Duration::from_millis(50));
        let replies = replies_for(&specs, |m| match m {
            RawMetric::CpuUsage => Reply::Hang,
            _ => Reply::Value(3.0),
        });
        let acquisition = MetricsAcquisition::new(Arc::new(ScriptedStore::new(replies)), specs);

        let outcome = tokio::time::timeout(Duration::from_secs(5), acquisition.acquire())
            .await
            .expect("acquisition must be bounded by per-query timeouts");

        assert_eq!(outcome.snapshot.cpu_usage, 0.0);
        assert_eq!(outcome.snapshot.memory_usage, 3.0);
        assert_eq!(outcome.failed_metrics(), vec![RawMetric::CpuUsage]);
    }

    #[tokio::test]
    async fn test_queries_run_concurrently() {
        let specs = queries(Duration::from_secs(5));
        let replies = replies_for(&specs, |_| Reply::Value(1.0));
        let mut store = ScriptedStore::new(replies);
        store.delay = Duration::from_millis(200);
        let store = Arc::new(store);
        let acquisition = MetricsAcquisition::new(store.clone(), specs);

        let start = std::time::Instant::now();
        acquisition.acquire().await;

        assert_eq!(store.calls.load(Ordering::SeqCst), 6);
        assert!(start.elapsed() < Duration::from_millis(1000));
    }
}
