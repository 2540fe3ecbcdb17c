/// Background cache writer
///
/// Cache write-backs and fan-out batches are fire-and-forget relative to the
/// request that produced them. They are submitted to a bounded queue and
/// drained by a fixed pool of worker tasks.
///
/// Architecture:
/// - Bounded MPSC channel shared by all workers
/// - A full queue drops the write (the cache self-heals on the next read)
/// - Failures are logged by the worker, never returned to the submitter
/// - `shutdown` closes the queue and waits for in-flight writes
use crate::metrics::CacheMetrics;
use crate::CacheResult;
use futures::future::BoxFuture;
use parking_lot::Mutex as SyncMutex;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A labelled unit of background work
struct WriteJob {
    label: String,
    work: BoxFuture<'static, CacheResult<()>>,
}

/// Accounting shared between submitters and workers
struct Progress {
    pending: AtomicUsize,
    idle: Notify,
}

impl Progress {
    fn finish_one(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

struct Inner {
    sender: SyncMutex<Option<mpsc::Sender<WriteJob>>>,
    workers: SyncMutex<Vec<JoinHandle<()>>>,
    progress: Arc<Progress>,
    metrics: CacheMetrics,
}

/// Bounded pool of workers running detached cache writes
#[derive(Clone)]
pub struct BackgroundWriter {
    inner: Arc<Inner>,
}

impl BackgroundWriter {
    /// Spawn `workers` tasks draining a queue of `capacity` jobs
    pub fn new(workers: usize, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel::<WriteJob>(capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        let progress = Arc::new(Progress {
            pending: AtomicUsize::new(0),
            idle: Notify::new(),
        });

        let handles = (0..workers.max(1))
            .map(|id| spawn_worker(id, Arc::clone(&receiver), Arc::clone(&progress)))
            .collect();

        Self {
            inner: Arc::new(Inner {
                sender: SyncMutex::new(Some(sender)),
                workers: SyncMutex::new(handles),
                progress,
                metrics: CacheMetrics::new(),
            }),
        }
    }

    /// Queue a write without waiting for it. Returns false when the write was
    /// dropped because the queue is full or the writer is shut down.
    pub fn submit<F>(&self, label: impl Into<String>, work: F) -> bool
    where
        F: Future<Output = CacheResult<()>> + Send + 'static,
    {
        let label = label.into();
        let sender = match self.inner.sender.lock().as_ref() {
            Some(sender) => sender.clone(),
            None => {
                debug!(label = %label, "Background writer shut down, dropping write");
                self.inner.metrics.record_dropped_write();
                return false;
            }
        };

        self.inner.progress.pending.fetch_add(1, Ordering::SeqCst);
        let job = WriteJob {
            label,
            work: Box::pin(work),
        };
        match sender.try_send(job) {
            Ok(()) => true,
            Err(e) => {
                let job = match e {
                    mpsc::error::TrySendError::Full(job) | mpsc::error::TrySendError::Closed(job) => job,
                };
                warn!(label = %job.label, "Background write queue full, dropping write");
                self.inner.metrics.record_dropped_write();
                self.inner.progress.finish_one();
                false
            }
        }
    }

    /// Number of queued or running writes
    pub fn pending(&self) -> usize {
        self.inner.progress.pending.load(Ordering::SeqCst)
    }

    /// Wait until every accepted write has finished
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.progress.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Close the queue and wait for the workers to drain it
    pub async fn shutdown(&self) {
        let sender = self.inner.sender.lock().take();
        drop(sender);

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.inner.workers.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Background writer worker panicked");
            }
        }
        info!("Background writer stopped");
    }
}

fn spawn_worker(
    id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<WriteJob>>>,
    progress: Arc<Progress>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!(worker = id, "Background writer worker started");

        loop {
            let job = {
                let mut receiver = receiver.lock().await;
                receiver.recv().await
            };
            let Some(job) = job else {
                break;
            };

            match job.work.await {
                Ok(()) => debug!(worker = id, label = %job.label, "Background write applied"),
                Err(e) => warn!(
                    worker = id,
                    label = %job.label,
                    error = %e,
                    "Background write failed"
                ),
            }
            progress.finish_one();
        }

        debug!(worker = id, "Background writer worker stopped (channel closed)");
    })
}
