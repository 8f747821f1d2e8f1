//! Bus-fault observation and truncation recovery.
//!
//! A bus fault is asynchronous and cannot identify a specific mapping, so the
//! handler is a process-wide registry of protected files. The signal handler
//! itself only raises a flag (the only async-signal-safe thing to do); a
//! watcher thread notices the flag and probes every registered file with a
//! stat, reporting those whose on-disk size shrank below the mapped size.
//!
//! The handler is best effort: the primary defense against truncation is not
//! mapping files whose size may shrink externally. On Windows there is no
//! bus-fault signal; the registry still works and [`probe`] can be driven
//! manually.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::errors::{MmapEngineError, Result};
use crate::file::{Inner, MappedFile};
use crate::mmap::MapSegment;

const FAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

type FaultCallback = Arc<dyn Fn(&MappedFile, &MmapEngineError) + Send + Sync>;

struct FaultRegistry {
    files: Mutex<HashMap<usize, Weak<Inner>>>,
    callbacks: RwLock<Vec<FaultCallback>>,
    watcher_started: AtomicBool,
    installed: Mutex<bool>,
}

static REGISTRY: Lazy<FaultRegistry> = Lazy::new(|| FaultRegistry {
    files: Mutex::new(HashMap::new()),
    callbacks: RwLock::new(Vec::new()),
    watcher_started: AtomicBool::new(false),
    installed: Mutex::new(false),
});

/// Set from the signal handler, consumed by the watcher thread.
static FAULT_PENDING: AtomicBool = AtomicBool::new(false);

/// Register a process-wide callback invoked with each truncated file when a
/// bus fault (or a manual [`probe`]) detects external truncation.
pub fn on_bus_fault<F>(callback: F)
where
    F: Fn(&MappedFile, &MmapEngineError) + Send + Sync + 'static,
{
    REGISTRY.callbacks.write().push(Arc::new(callback));
}

/// Run one truncation sweep over all protected files, invoking the
/// registered callbacks for each truncated one. Returns how many files were
/// reported.
///
/// This is the same sweep the bus-fault watcher runs; exposing it lets hosts
/// integrate their own fault delivery.
pub fn probe() -> usize {
    let snapshot: Vec<Weak<Inner>> = REGISTRY.files.lock().values().cloned().collect();
    let callbacks: Vec<FaultCallback> = REGISTRY.callbacks.read().clone();

    let mut reported = 0;
    for weak in snapshot {
        let Some(inner) = weak.upgrade() else {
            continue;
        };
        let file = MappedFile { inner };
        let (expected, observed) = match file.observed_sizes() {
            Ok(sizes) => sizes,
            Err(err) => {
                warn!(%err, "truncation probe failed to stat");
                continue;
            }
        };
        if observed >= expected {
            continue;
        }
        reported += 1;
        let err = MmapEngineError::Truncated { expected, observed };
        warn!(expected, observed, "mapped file truncated externally");
        for callback in &callbacks {
            callback(&file, &err);
        }
    }
    reported
}

pub(crate) fn register(file: &MappedFile) {
    let first = {
        let mut files = REGISTRY.files.lock();
        files.insert(file.registry_key(), Arc::downgrade(&file.inner));
        files.len() == 1
    };
    if first {
        install_handler();
    }
    start_watcher();
}

pub(crate) fn unregister(file: &MappedFile) {
    let empty = {
        let mut files = REGISTRY.files.lock();
        files.remove(&file.registry_key());
        files.is_empty()
    };
    if empty {
        uninstall_handler();
    }
}

fn start_watcher() {
    if REGISTRY.watcher_started.swap(true, Ordering::AcqRel) {
        return;
    }
    thread::spawn(|| loop {
        thread::sleep(FAULT_POLL_INTERVAL);
        if FAULT_PENDING.swap(false, Ordering::AcqRel) {
            probe();
        }
    });
}

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        extern "C" fn bus_fault_handler(_signal: libc::c_int) {
            // Only an atomic store is permitted here.
            FAULT_PENDING.store(true, Ordering::SeqCst);
        }

        fn install_handler() {
            let mut installed = REGISTRY.installed.lock();
            if *installed {
                return;
            }
            // SAFETY: the handler performs a single atomic store, which is
            // async-signal-safe.
            unsafe {
                let mut action: libc::sigaction = std::mem::zeroed();
                action.sa_sigaction = bus_fault_handler as libc::sighandler_t;
                action.sa_flags = libc::SA_RESTART;
                libc::sigaction(libc::SIGBUS, &action, std::ptr::null_mut());
            }
            *installed = true;
            debug!("bus-fault handler installed");
        }

        fn uninstall_handler() {
            let mut installed = REGISTRY.installed.lock();
            if !*installed {
                return;
            }
            // SAFETY: restoring the default disposition is always valid.
            unsafe {
                let mut action: libc::sigaction = std::mem::zeroed();
                action.sa_sigaction = libc::SIG_DFL;
                libc::sigaction(libc::SIGBUS, &action, std::ptr::null_mut());
            }
            *installed = false;
            debug!("bus-fault handler withdrawn");
        }
    } else {
        fn install_handler() {
            // No bus-fault signal to hook; probes are manual.
            let _ = &REGISTRY.installed;
        }

        fn uninstall_handler() {}
    }
}

impl MappedFile {
    /// Insert this file into the process-wide fault registry and make sure
    /// the bus-fault hook is installed. Idempotent.
    pub fn enable_truncation_protection(&self) {
        register(self);
    }

    /// Remove this file from the fault registry. Close does this
    /// unconditionally.
    pub fn disable_truncation_protection(&self) {
        unregister(self);
    }

    /// Whether the file on disk is now smaller than the mapped size.
    ///
    /// # Errors
    ///
    /// Fails with `Closed` after close, or with the stat error.
    pub fn check_truncation(&self) -> Result<bool> {
        let (expected, observed) = self.observed_sizes()?;
        Ok(observed < expected)
    }

    fn observed_sizes(&self) -> Result<(u64, u64)> {
        let state = self.inner.state.read();
        if state.closed {
            return Err(MmapEngineError::Closed);
        }
        let observed = Self::handle_of(&state)?.size()?;
        Ok((state.size, observed))
    }

    /// Canonical recovery after external truncation: dissolve the stale
    /// mapping, adopt the observed size, and re-establish a fresh mapping
    /// when the file is still non-empty. A no-op when the file did not
    /// actually shrink.
    ///
    /// # Errors
    ///
    /// Fails with the re-establish error, leaving the file in the
    /// `MappingLost` state.
    pub fn remap_after_truncation(&self) -> Result<()> {
        let mut state = self.inner.state.write();
        if state.closed {
            return Err(MmapEngineError::Closed);
        }

        let observed = Self::handle_of(&state)?.size()?;
        if observed >= state.size {
            return Ok(());
        }

        debug!(
            expected = state.size,
            observed, "remapping after external truncation"
        );

        // The stale mapping goes first; its tail pages are already invalid.
        state.segment = None;
        state.size = observed;
        state.window_offset = 0;
        state.lost = false;
        self.inner.dirty.store(false, Ordering::Release);

        if observed == 0 {
            return Ok(());
        }

        let window = self.inner.window_size;
        let map_len = if window == 0 {
            observed
        } else {
            window.min(observed)
        };
        match MapSegment::establish(state.descriptor.0, 0, map_len, &self.inner.config) {
            Ok(segment) => {
                state.segment = Some(segment);
                Ok(())
            }
            Err(err) => {
                state.lost = true;
                warn!(%err, "remap after truncation failed; mapping lost");
                Err(err)
            }
        }
    }
}
