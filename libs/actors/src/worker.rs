//! Per-port worker queue
//!
//! Every port owns one single-consumer job queue serviced by one task, bound
//! when the port opens. Driver callbacks only enqueue, so they never block
//! and the queue keeps per-connection arrival order.
//!
//! - [`WorkerMode::Sequential`]: each job runs to completion before the next
//!   starts, including across its await points
//! - [`WorkerMode::Concurrent`]: jobs are started in arrival order but run
//!   as independent tasks and may interleave

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub type Job = BoxFuture<'static, ()>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerMode {
    Sequential,
    Concurrent,
}

#[derive(Debug, Default)]
pub struct WorkerStats {
    pub enqueued: AtomicU64,
    pub completed: AtomicU64,
}

/// Handle to a running port worker
pub struct PortWorker {
    port: String,
    mode: WorkerMode,
    sender: mpsc::UnboundedSender<Job>,
    task: Mutex<Option<JoinHandle<()>>>,
    stats: Arc<WorkerStats>,
}

impl PortWorker {
    /// Start the worker on the current runtime
    pub fn spawn(port: impl Into<String>, mode: WorkerMode) -> Self {
        let port = port.into();
        let (sender, receiver) = mpsc::unbounded_channel();
        let stats = Arc::new(WorkerStats::default());
        let task = tokio::spawn(run(port.clone(), mode, receiver, stats.clone()));
        debug!(port = %port, ?mode, "Port worker started");
        Self {
            port,
            mode,
            sender,
            task: Mutex::new(Some(task)),
            stats,
        }
    }

    /// Queue a job; false once the worker has stopped
    pub fn enqueue(&self, job: Job) -> bool {
        match self.sender.send(job) {
            Ok(()) => {
                self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(_) => {
                warn!(port = %self.port, "Worker stopped; dropping job");
                false
            }
        }
    }

    pub fn is_running(&self) -> bool {
        !self.sender.is_closed()
    }

    pub fn mode(&self) -> WorkerMode {
        self.mode
    }

    pub fn stats(&self) -> Arc<WorkerStats> {
        self.stats.clone()
    }

    /// Stop taking jobs; in-flight concurrent jobs are left to finish
    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
            debug!(port = %self.port, "Port worker stopped");
        }
    }
}

impl Drop for PortWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run(
    port: String,
    mode: WorkerMode,
    mut receiver: mpsc::UnboundedReceiver<Job>,
    stats: Arc<WorkerStats>,
) {
    while let Some(job) = receiver.recv().await {
        match mode {
            WorkerMode::Sequential => {
                job.await;
                stats.completed.fetch_add(1, Ordering::Relaxed);
            }
            WorkerMode::Concurrent => {
                let stats = stats.clone();
                tokio::spawn(async move {
                    job.await;
                    stats.completed.fetch_add(1, Ordering::Relaxed);
                });
            }
        }
    }
    debug!(port = %port, "Port worker queue closed");
}
