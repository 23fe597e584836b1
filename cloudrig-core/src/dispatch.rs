//! Command dispatcher.
//!
//! Fans work items out over tokio tasks with a bounded number in flight and
//! a global submission throttle, then aggregates one log record and one
//! result per item. A failing item never cancels its siblings.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::error::{DeployError, Result};
use crate::log::LogRecord;

/// What every work item hands back.
pub type ItemResult = (LogRecord, Result<()>);

/// One (target, operation) pair.
pub struct WorkItem {
    target: String,
    op: BoxFuture<'static, ItemResult>,
}

impl WorkItem {
    pub fn new<F>(target: impl Into<String>, op: F) -> Self
    where
        F: Future<Output = ItemResult> + Send + 'static,
    {
        Self {
            target: target.into(),
            op: op.boxed(),
        }
    }
}

/// A batch of work items that must all finish before the next phase starts.
pub struct Phase {
    pub name: String,
    pub items: Vec<WorkItem>,
}

impl Phase {
    pub fn new(name: impl Into<String>, items: Vec<WorkItem>) -> Self {
        Self {
            name: name.into(),
            items,
        }
    }
}

/// Where log records and errors end up.
pub trait OutputSink: Send + Sync {
    fn record(&self, record: &LogRecord);
    fn error(&self, target: &str, err: &DeployError);
    /// Free-form operator hint outside any work item.
    fn notice(&self, text: &str);
}

/// Records to stdout, errors to stderr.
pub struct ConsoleSink;

impl OutputSink for ConsoleSink {
    fn record(&self, record: &LogRecord) {
        println!("{}", record);
    }

    fn error(&self, target: &str, err: &DeployError) {
        eprintln!("{}: {}", target, err);
    }

    fn notice(&self, text: &str) {
        println!("{}", text);
    }
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Work items allowed in flight at once.
    pub max_workers: usize,
    /// Minimum spacing between two submissions, across all batches.
    pub throttle: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_workers: 10,
            throttle: Duration::from_secs(1),
        }
    }
}

/// Aggregate outcome of one or more batches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    pub submitted: usize,
    /// Targets whose item reported an error.
    pub failed: Vec<String>,
}

impl Report {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_success() { 0 } else { 1 }
    }

    pub fn merge(&mut self, other: Report) {
        self.submitted += other.submitted;
        self.failed.extend(other.failed);
    }
}

pub struct Dispatcher {
    semaphore: Arc<Semaphore>,
    throttle: Mutex<Interval>,
    log_capacity: usize,
    sink: Arc<dyn OutputSink>,
}

impl Dispatcher {
    /// Must be called from within a tokio runtime.
    pub fn new(config: DispatcherConfig, sink: Arc<dyn OutputSink>) -> Self {
        let workers = config.max_workers.max(1);
        let mut throttle = interval(config.throttle.max(Duration::from_millis(1)));
        throttle.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            semaphore: Arc::new(Semaphore::new(workers)),
            throttle: Mutex::new(throttle),
            log_capacity: workers * 5,
            sink,
        }
    }

    pub fn sink(&self) -> &Arc<dyn OutputSink> {
        &self.sink
    }

    async fn tick(&self) {
        self.throttle.lock().await.tick().await;
    }

    /// Run a job inline on the coordinating task.
    ///
    /// Used for singleton jobs that may mutate the project, which parallel
    /// items must never touch.
    pub async fn run_single<F>(&self, target: &str, op: F) -> Report
    where
        F: Future<Output = ItemResult>,
    {
        self.tick().await;
        let _permit = self.semaphore.acquire().await;
        let (record, result) = op.await;
        self.sink.record(&record);
        let mut report = Report {
            submitted: 1,
            failed: vec![],
        };
        if let Err(e) = result {
            self.sink.error(target, &e);
            report.failed.push(target.to_string());
        }
        report
    }

    /// Submit every item and wait for all of them.
    pub async fn run_batch(&self, items: Vec<WorkItem>) -> Report {
        let expected = items.len();
        if expected == 0 {
            return Report::default();
        }

        let (log_tx, mut log_rx) = mpsc::channel::<LogRecord>(self.log_capacity);
        let (err_tx, mut err_rx) = mpsc::channel::<(String, Option<DeployError>)>(expected);

        let submit = async move {
            for WorkItem { target, op } in items {
                self.tick().await;
                let Ok(permit) = Arc::clone(&self.semaphore).acquire_owned().await else {
                    error!("Worker pool closed, not submitting {}", target);
                    break;
                };
                debug!(target = %target, "Submitting work item");
                let log_tx = log_tx.clone();
                let err_tx = err_tx.clone();
                tokio::spawn(async move {
                    let (record, result) = op.await;
                    let _ = log_tx.send(record).await;
                    let _ = err_tx.send((target, result.err())).await;
                    drop(permit);
                });
            }
        };

        let sink = &self.sink;
        let drain = async move {
            let mut report = Report {
                submitted: expected,
                failed: vec![],
            };
            let mut remaining = expected;
            while remaining > 0 {
                tokio::select! {
                    Some((target, err)) = err_rx.recv() => {
                        if let Some(e) = err {
                            sink.error(&target, &e);
                            report.failed.push(target);
                        }
                        remaining -= 1;
                    }
                    Some(record) = log_rx.recv() => sink.record(&record),
                    else => break,
                }
            }
            while let Ok(record) = log_rx.try_recv() {
                sink.record(&record);
            }
            if remaining > 0 {
                error!("{} work items ended without reporting a result", remaining);
                report
                    .failed
                    .extend((0..remaining).map(|i| format!("<lost item {}>", i)));
            }
            report
        };

        let ((), report) = tokio::join!(submit, drain);
        report
    }

    /// Run phases with a barrier between them; a failed phase stops the rest.
    pub async fn run_phases(&self, phases: Vec<Phase>) -> Report {
        let mut total = Report::default();
        let count = phases.len();
        for (n, phase) in phases.into_iter().enumerate() {
            info!(phase = %phase.name, "Starting phase {}/{}", n + 1, count);
            let report = self.run_batch(phase.items).await;
            let ok = report.is_success();
            total.merge(report);
            if !ok {
                error!(phase = %phase.name, "Phase failed, skipping remaining phases");
                break;
            }
        }
        total
    }
}
