//! Prediction scheduling loop
//!
//! Runs one prediction cycle immediately, then one per interval until
//! shutdown. A failed cycle, panics included, is logged and counted; the
//! loop keeps going and the previously published prediction stays in place.

use super::pipeline::PredictionPipeline;
use crate::collector::async_trait;
use crate::health::{components, HealthRegistry};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default prediction interval
pub const DEFAULT_PREDICTION_INTERVAL: Duration = Duration::from_secs(30);

/// Source of time for the scheduler and for prediction timestamps
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Wait for one interval. Must be cancel-safe.
    async fn sleep(&self, duration: Duration);
}

/// Wall clock backed by the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Configuration for the prediction scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval between prediction cycles
    pub prediction_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            prediction_interval: DEFAULT_PREDICTION_INTERVAL,
        }
    }
}

/// Scheduler statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerStats {
    pub cycles_completed: u64,
    pub cycles_failed: u64,
}

pub struct PredictionScheduler {
    pipeline: Arc<PredictionPipeline>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    health: Option<HealthRegistry>,
    cycles_completed: AtomicU64,
    cycles_failed: AtomicU64,
}

impl PredictionScheduler {
    pub fn new(pipeline: Arc<PredictionPipeline>, clock: Arc<dyn Clock>, config: SchedulerConfig) -> Self {
        Self {
            pipeline,
            clock,
            config,
            health: None,
            cycles_completed: AtomicU64::new(0),
            cycles_failed: AtomicU64::new(0),
        }
    }

    /// Report cycle outcomes to the health registry
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Run one cycle, containing any failure. Returns whether it published.
    pub async fn tick(&self) -> bool {
        match self.pipeline.run_cycle().await {
            Ok(result) => {
                self.cycles_completed.fetch_add(1, Ordering::Relaxed);
                debug!(replica_count = result.replica_count, "Scheduled cycle complete");
                if let Some(health) = &self.health {
                    health.set_healthy(components::SCHEDULER).await;
                }
                true
            }
            Err(e) => {
                self.cycles_failed.fetch_add(1, Ordering::Relaxed);
                self.pipeline.metrics().inc_cycle_failures();
                self.pipeline.logger().log_cycle_skipped(&e.to_string());
                if let Some(health) = &self.health {
                    health
                        .set_degraded(components::SCHEDULER, e.to_string())
                        .await;
                }
                false
            }
        }
    }

    /// Run the prediction loop until shutdown
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.prediction_interval.as_secs(),
            "Starting prediction scheduler"
        );

        loop {
            self.tick().await;

            tokio::select! {
                biased;
                _ = self.clock.sleep(self.config.prediction_interval) => {}
                _ = shutdown.recv() => {
                    info!("Shutting down prediction scheduler");
                    break;
                }
            }
        }
    }

    /// Start the loop on its own task
    pub fn spawn(self: Arc<Self>) -> SchedulerHandle {
        let (shutdown, rx) = broadcast::channel(1);
        let task = tokio::spawn(self.run(rx));
        SchedulerHandle { shutdown, task }
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            cycles_completed: self.cycles_completed.load(Ordering::Relaxed),
            cycles_failed: self.cycles_failed.load(Ordering::Relaxed),
        }
    }
}

/// Stop handle for a spawned scheduler
pub struct SchedulerHandle {
    shutdown: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signal shutdown and wait for the in-flight cycle to finish
    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.task.await {
            warn!(error = %e, "Prediction scheduler task ended abnormally");
        }
    }
}
