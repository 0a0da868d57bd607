//! Job queue
//!
//! `JobDispatcher` is the seam to a queue broker. The shipped implementation,
//! `InProcessQueue`, keeps one tokio channel per lane and runs a fixed number
//! of worker tasks per lane. Delivery is at-least-once from the handler's
//! point of view: handlers must treat repeated jobs as no-ops.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::QueueConfig;
use crate::error::{Error, Result};
use crate::models::{JobKind, Lane};

/// A unit of pipeline work for one statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub tenant_id: i64,
    pub statement_id: i64,
    pub kind: JobKind,
    /// Times this job was put back because its stage was not ready yet
    #[serde(default)]
    pub deferrals: u32,
}

impl Job {
    pub fn new(tenant_id: i64, statement_id: i64, kind: JobKind) -> Self {
        Self {
            tenant_id,
            statement_id,
            kind,
            deferrals: 0,
        }
    }

    pub fn lane(&self) -> Lane {
        self.kind.lane()
    }
}

/// Accepts jobs for asynchronous execution
#[async_trait]
pub trait JobDispatcher: Send + Sync {
    /// Queue a job on its lane, optionally after a delay
    async fn dispatch(&self, job: Job, delay: Option<Duration>) -> Result<()>;
}

/// Executes jobs taken off a lane
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: Job);
}

/// In-process queue backed by tokio channels
#[derive(Clone)]
pub struct InProcessQueue {
    senders: HashMap<Lane, mpsc::UnboundedSender<Job>>,
}

/// Receiving ends of an `InProcessQueue`, consumed by `spawn_workers`
pub struct QueueReceivers {
    receivers: HashMap<Lane, mpsc::UnboundedReceiver<Job>>,
}

/// Running worker tasks
pub struct QueueWorkers {
    handles: Vec<JoinHandle<()>>,
}

impl InProcessQueue {
    /// Create the lanes; workers are started separately so the handler can
    /// hold a reference to the queue
    pub fn new() -> (Self, QueueReceivers) {
        let mut senders = HashMap::new();
        let mut receivers = HashMap::new();
        for lane in Lane::all() {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.insert(*lane, tx);
            receivers.insert(*lane, rx);
        }
        (Self { senders }, QueueReceivers { receivers })
    }

    fn send(&self, job: Job) -> Result<()> {
        let sender = self
            .senders
            .get(&job.lane())
            .ok_or_else(|| Error::Queue(format!("No lane {}", job.lane())))?;
        sender
            .send(job)
            .map_err(|_| Error::Queue(format!("Lane {} is closed", job.lane())))
    }
}

#[async_trait]
impl JobDispatcher for InProcessQueue {
    async fn dispatch(&self, job: Job, delay: Option<Duration>) -> Result<()> {
        debug!(
            lane = %job.lane(),
            kind = %job.kind,
            statement_id = job.statement_id,
            "Dispatching job"
        );
        match delay.filter(|d| !d.is_zero()) {
            None => self.send(job),
            Some(delay) => {
                let queue = self.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Err(e) = queue.send(job) {
                        warn!(statement_id = job.statement_id, error = %e, "Delayed dispatch dropped");
                    }
                });
                Ok(())
            }
        }
    }
}

impl QueueReceivers {
    /// Start the configured number of workers per lane
    pub fn spawn_workers(self, handler: Arc<dyn JobHandler>, config: &QueueConfig) -> QueueWorkers {
        let mut handles = Vec::new();

        for (lane, rx) in self.receivers {
            let workers = match lane {
                Lane::OcrProcessing => config.ocr_workers,
                Lane::Matching => config.matching_workers,
            };
            let rx = Arc::new(tokio::sync::Mutex::new(rx));

            for worker in 0..workers.max(1) {
                let rx = Arc::clone(&rx);
                let handler = Arc::clone(&handler);
                handles.push(tokio::spawn(async move {
                    loop {
                        // Hold the lock only while waiting for the next job
                        let job = { rx.lock().await.recv().await };
                        match job {
                            Some(job) => handler.handle(job).await,
                            None => break,
                        }
                    }
                    debug!(lane = %lane, worker, "Queue worker stopped");
                }));
            }
        }

        QueueWorkers { handles }
    }
}

impl QueueWorkers {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Stop all workers immediately
    pub fn abort(&self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

/// Dispatcher that only records jobs (for tests and synchronous drivers)
#[derive(Default)]
pub struct RecordingDispatcher {
    jobs: Mutex<Vec<(Job, Option<Duration>)>>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return all recorded jobs, oldest first
    pub fn take(&self) -> Vec<Job> {
        self.jobs
            .lock()
            .map(|mut jobs| jobs.drain(..).map(|(job, _)| job).collect())
            .unwrap_or_default()
    }

    /// Recorded jobs with their delays, without removing them
    pub fn recorded(&self) -> Vec<(Job, Option<Duration>)> {
        self.jobs.lock().map(|jobs| jobs.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl JobDispatcher for RecordingDispatcher {
    async fn dispatch(&self, job: Job, delay: Option<Duration>) -> Result<()> {
        self.jobs
            .lock()
            .map_err(|_| Error::Queue("Recorder poisoned".into()))?
            .push((job, delay));
        Ok(())
    }
}
