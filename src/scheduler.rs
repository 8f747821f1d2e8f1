//! Process-wide periodic durability.
//!
//! A single ticker thread flushes every registered file at a fixed interval.
//! Errors from individual flushes are swallowed; periodic durability is best
//! effort. The scheduler holds only weak references, so it never extends a
//! file's lifetime.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Weak};
use std::thread;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::file::{Inner, MappedFile};

pub(crate) struct SchedulerCore {
    files: RwLock<HashMap<usize, Weak<Inner>>>,
    stopped: AtomicBool,
}

impl SchedulerCore {
    pub(crate) fn unregister_key(&self, key: usize) {
        self.files.write().remove(&key);
    }

    fn sync_all(&self) {
        // Snapshot under the lock, flush outside it, so a slow disk never
        // blocks registration.
        let snapshot: Vec<Weak<Inner>> = self.files.read().values().cloned().collect();
        for weak in snapshot {
            let Some(inner) = weak.upgrade() else {
                continue;
            };
            let file = MappedFile { inner };
            if let Err(err) = file.sync() {
                warn!(%err, "periodic sync failed");
            }
        }
        self.files.write().retain(|_, weak| weak.strong_count() > 0);
    }
}

/// Ticker that drives [`SyncPolicy::Periodic`](crate::config::SyncPolicy)
/// across registered files.
///
/// Dropping the scheduler stops the ticker thread; [`SyncScheduler::stop`]
/// does so explicitly and clears the registration set.
pub struct SyncScheduler {
    core: Arc<SchedulerCore>,
    stop_tx: Mutex<Option<mpsc::Sender<()>>>,
}

impl SyncScheduler {
    /// Start a scheduler ticking at `interval`.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        let core = Arc::new(SchedulerCore {
            files: RwLock::new(HashMap::new()),
            stopped: AtomicBool::new(false),
        });
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let worker = Arc::clone(&core);
        thread::spawn(move || loop {
            match stop_rx.recv_timeout(interval) {
                Err(mpsc::RecvTimeoutError::Timeout) => worker.sync_all(),
                // Stop requested, or the scheduler was dropped.
                Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        });

        debug!(?interval, "sync scheduler started");
        Self {
            core,
            stop_tx: Mutex::new(Some(stop_tx)),
        }
    }

    /// Register `file` for periodic flushing. Idempotent; ignored after
    /// [`SyncScheduler::stop`].
    pub fn register(&self, file: &MappedFile) {
        if self.core.stopped.load(Ordering::Acquire) {
            return;
        }
        self.core
            .files
            .write()
            .insert(file.registry_key(), Arc::downgrade(&file.inner));
        *file.inner.scheduler.lock() = Some(Arc::downgrade(&self.core));
    }

    /// Remove `file` from the periodic set. Safe after stop.
    pub fn unregister(&self, file: &MappedFile) {
        self.core.unregister_key(file.registry_key());
        *file.inner.scheduler.lock() = None;
    }

    /// Number of currently registered files.
    #[must_use]
    pub fn registered(&self) -> usize {
        self.core.files.read().len()
    }

    /// Stop the ticker and clear the registration set.
    pub fn stop(&self) {
        self.core.stopped.store(true, Ordering::Release);
        if let Some(stop_tx) = self.stop_tx.lock().take() {
            let _ = stop_tx.send(());
        }
        self.core.files.write().clear();
        debug!("sync scheduler stopped");
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        // Dropping the sender wakes and ends the ticker thread.
        self.core.stopped.store(true, Ordering::Release);
    }
}
