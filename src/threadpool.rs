//! Bounded worker pool for block (de)compression jobs.
//!
//! Backed by a `rayon::ThreadPool` with a `crossbeam_channel::bounded`
//! semaphore channel limiting how many jobs may be in flight at once, so a
//! fast submitter cannot pile up unbounded queued closures. Workers never
//! touch the shared channel; they hand results back over a caller-owned
//! crossbeam channel.

use crossbeam_channel::{bounded, Receiver, Sender};
use rayon::ThreadPool as RayonPool;
use std::sync::{Arc, Condvar, Mutex};

use crate::error::{Error, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

struct PoolState {
    // Submitted but not yet finished jobs.
    pending: usize,
}

/// Fixed-size worker pool. Joins its workers on drop.
pub struct WorkerPool {
    pool: Arc<RayonPool>,
    // Pre-filled token channel acting as a semaphore: a submitter takes a
    // token before spawning, the worker returns it when the job finishes.
    slot_tx: Sender<()>,
    slot_rx: Receiver<()>,
    state: Arc<(Mutex<PoolState>, Condvar)>,
}

impl WorkerPool {
    /// Build a pool of `nb_workers` threads (at least one) with room for
    /// `2 * nb_workers` in-flight jobs.
    pub fn new(nb_workers: usize) -> Result<Self> {
        let nb_workers = nb_workers.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(nb_workers)
            .build()
            .map_err(|e| Error::Pool(e.to_string()))?;

        let capacity = nb_workers * 2;
        let (slot_tx, slot_rx) = bounded(capacity);
        for _ in 0..capacity {
            slot_tx
                .send(())
                .map_err(|_| Error::Pool("token channel closed during setup".to_string()))?;
        }

        Ok(WorkerPool {
            pool: Arc::new(pool),
            slot_tx,
            slot_rx,
            state: Arc::new((Mutex::new(PoolState { pending: 0 }), Condvar::new())),
        })
    }

    /// Run `job` on a worker thread. Blocks while the in-flight limit is
    /// reached.
    pub fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let job: Job = Box::new(job);

        // Both channel ends live in self, so this only fails if the pool is
        // being torn down; nothing to submit to in that case.
        if self.slot_rx.recv().is_err() {
            return;
        }

        {
            let (lock, _cvar) = &*self.state;
            if let Ok(mut s) = lock.lock() {
                s.pending += 1;
            }
        }

        let state = Arc::clone(&self.state);
        let slot_tx = self.slot_tx.clone();
        self.pool.spawn(move || {
            job();

            let (lock, cvar) = &*state;
            if let Ok(mut s) = lock.lock() {
                s.pending -= 1;
                if s.pending == 0 {
                    cvar.notify_all();
                }
            }
            let _ = slot_tx.send(());
        });
    }

    /// Block until every submitted job has finished. The pool stays usable
    /// afterwards.
    pub fn wait_idle(&self) {
        let (lock, cvar) = &*self.state;
        let Ok(mut s) = lock.lock() else { return };
        while s.pending > 0 {
            match cvar.wait(s) {
                Ok(next) => s = next,
                Err(_) => return,
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // rayon joins its threads once all spawned jobs are done.
        self.wait_idle();
    }
}
