//! Worker queue for fire-and-forget side effects

use crate::CsmsResult;
use futures_util::future::BoxFuture;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, warn};

struct Job {
    label: String,
    future: BoxFuture<'static, CsmsResult<()>>,
}

/// Runs detached jobs whose failure is logged and never reaches the submitter
#[derive(Clone)]
pub struct TaskQueue {
    sender: mpsc::UnboundedSender<Job>,
    in_flight: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl TaskQueue {
    /// Start the worker loop; must be called from within a Tokio runtime
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let idle = Arc::new(Notify::new());
        tokio::spawn(run_worker(receiver, in_flight.clone(), idle.clone()));
        Self {
            sender,
            in_flight,
            idle,
        }
    }

    pub fn submit<F>(&self, label: impl Into<String>, future: F)
    where
        F: Future<Output = CsmsResult<()>> + Send + 'static,
    {
        let label = label.into();
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let job = Job {
            label,
            future: Box::pin(future),
        };
        if let Err(mpsc::error::SendError(job)) = self.sender.send(job) {
            error!("Task queue stopped, dropping {}", job.label);
            self.finish();
        }
    }

    /// Jobs submitted and not yet finished
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Wait until every submitted job has finished
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }

    fn finish(&self) {
        finish(&self.in_flight, &self.idle);
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

fn finish(in_flight: &AtomicUsize, idle: &Notify) {
    in_flight.fetch_sub(1, Ordering::SeqCst);
    idle.notify_waiters();
}

async fn run_worker(
    mut receiver: mpsc::UnboundedReceiver<Job>,
    in_flight: Arc<AtomicUsize>,
    idle: Arc<Notify>,
) {
    while let Some(job) = receiver.recv().await {
        let in_flight = in_flight.clone();
        let idle = idle.clone();
        tokio::spawn(async move {
            let Job { label, future } = job;
            match tokio::spawn(future).await {
                Ok(Ok(())) => debug!("Background task {} done", label),
                Ok(Err(e)) => warn!("Background task {} failed: {}", label, e),
                Err(e) => error!("Background task {} panicked: {}", label, e),
            }
            finish(&in_flight, &idle);
        });
    }
    debug!("Task queue worker stopped");
}
