//! Background expansion workers.
//!
//! A bounded pool of threads drains generator calls and forwards results to
//! the insertion queue in capped batches. Cancellation is cooperative: the
//! live epoch is compared against the captured one at every item boundary,
//! and no thread is ever forcibly stopped.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::engine::queue::QueueEvent;
use crate::generator::ItemGenerator;
use crate::model::GeneratedItem;

/// One scheduled generator call.
pub(crate) struct ExpandJob {
    /// Generator to drain.
    pub generator: Arc<dyn ItemGenerator>,
    /// Parent item snapshot; `None` drains the generator's roots.
    pub parent: Option<GeneratedItem>,
    /// Remaining recursion budget for the produced items.
    pub depth: u32,
    /// Epoch captured when the job was scheduled.
    pub epoch: u64,
}

enum Job {
    Expand(ExpandJob),
    Shutdown,
}

/// Bounded pool executing expansion jobs.
pub(crate) struct WorkerPool {
    job_tx: Sender<Job>,
    _handles: Vec<thread::JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `threads` workers sharing one job channel.
    pub(crate) fn spawn(
        threads: usize,
        live_epoch: Arc<AtomicU64>,
        out: Sender<QueueEvent>,
        batch_cap: usize,
    ) -> Self {
        let threads = threads.max(1);
        let batch_cap = batch_cap.max(1);
        let (job_tx, job_rx) = mpsc::channel::<Job>();
        let job_rx = Arc::new(Mutex::new(job_rx));

        let mut handles = Vec::with_capacity(threads);
        for _ in 0..threads {
            let job_rx = Arc::clone(&job_rx);
            let live_epoch = Arc::clone(&live_epoch);
            let out = out.clone();
            handles.push(thread::spawn(move || {
                worker_loop(&job_rx, &live_epoch, &out, batch_cap);
            }));
        }

        Self {
            job_tx,
            _handles: handles,
        }
    }

    /// Enqueues one job; never blocks.
    pub(crate) fn submit(&self, job: ExpandJob) {
        let _ = self.job_tx.send(Job::Expand(job));
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Idle threads exit promptly; a thread blocked inside a generator
        // call is left to finish on its own, never forcibly stopped.
        for _ in &self._handles {
            let _ = self.job_tx.send(Job::Shutdown);
        }
    }
}

fn worker_loop(
    job_rx: &Mutex<Receiver<Job>>,
    live_epoch: &AtomicU64,
    out: &Sender<QueueEvent>,
    batch_cap: usize,
) {
    loop {
        // Hold the lock only while receiving, never while draining a
        // generator call.
        let job = {
            let rx = job_rx.lock();
            rx.recv()
        };
        match job {
            Ok(Job::Expand(job)) => run_expansion(job, live_epoch, out, batch_cap),
            Ok(Job::Shutdown) | Err(_) => break,
        }
    }
}

fn run_expansion(job: ExpandJob, live_epoch: &AtomicU64, out: &Sender<QueueEvent>, batch_cap: usize) {
    let parent_entity = job.parent.as_ref().and_then(|item| item.entity);
    let epoch = job.epoch;
    let depth = job.depth;

    // The generator call itself may panic; the terminal finished event must
    // go out regardless so the owner's outstanding counter stays correct.
    let drained = panic::catch_unwind(AssertUnwindSafe(|| {
        let stream = match &job.parent {
            None => job.generator.roots(),
            Some(parent) => job.generator.children(parent),
        };

        let mut batch: Vec<GeneratedItem> = Vec::with_capacity(batch_cap);
        let mut forwarded = 0usize;
        for item in stream {
            if live_epoch.load(Ordering::Acquire) != epoch {
                debug!(epoch, parent = ?parent_entity, forwarded, "worker.expand.stale");
                return forwarded;
            }
            batch.push(item);
            if batch.len() >= batch_cap {
                forwarded += batch.len();
                let _ = out.send(QueueEvent::Items {
                    epoch,
                    parent: parent_entity,
                    items: std::mem::take(&mut batch),
                    depth,
                });
            }
        }
        if !batch.is_empty() {
            forwarded += batch.len();
            let _ = out.send(QueueEvent::Items {
                epoch,
                parent: parent_entity,
                items: batch,
                depth,
            });
        }
        forwarded
    }));

    match drained {
        Ok(forwarded) => {
            debug!(epoch, parent = ?parent_entity, forwarded, "worker.expand.complete");
        }
        Err(_) => {
            warn!(epoch, parent = ?parent_entity, "worker.expand.panicked");
        }
    }

    let _ = out.send(QueueEvent::Finished {
        epoch,
        parent: parent_entity,
    });
}
