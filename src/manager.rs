//! High-level entry points: a configured engine that turns paths or handles
//! into mapped files.
//!
//! The engine is not a filesystem: it performs no path metadata operations
//! beyond opening. Empty files and directories come back as the unwrapped
//! handle, exactly as the host filesystem would hand them out.

use std::fs::OpenOptions;
use std::path::Path;

use crate::config::{MapConfig, MapMode, SyncPolicy};
use crate::errors::{MmapEngineError, Result};
use crate::file::MappedFile;
use crate::handle::FileHandle;
use crate::scheduler::SyncScheduler;

/// Result of opening through a [`MapEngine`].
pub enum Opened {
    /// The file was mapped.
    Mapped(MappedFile),
    /// Empty file or directory: the handle is returned unwrapped.
    Passthrough(Box<dyn FileHandle>),
}

impl Opened {
    /// The mapped file, if mapping happened.
    #[must_use]
    pub fn mapped(self) -> Option<MappedFile> {
        match self {
            Opened::Mapped(file) => Some(file),
            Opened::Passthrough(_) => None,
        }
    }

    /// Whether mapping happened.
    #[must_use]
    pub fn is_mapped(&self) -> bool {
        matches!(self, Opened::Mapped(_))
    }
}

/// A configured opener. Owns the periodic-sync scheduler when the
/// configuration asks for one.
pub struct MapEngine {
    config: MapConfig,
    scheduler: Option<SyncScheduler>,
}

impl MapEngine {
    /// Build an engine; starts a [`SyncScheduler`] when the policy is
    /// [`SyncPolicy::Periodic`] and an interval is configured.
    #[must_use]
    pub fn new(config: MapConfig) -> Self {
        let scheduler = match (config.sync_policy, config.sync_interval) {
            (SyncPolicy::Periodic, Some(interval)) => Some(SyncScheduler::new(interval)),
            _ => None,
        };
        Self { config, scheduler }
    }

    /// The engine's configuration.
    #[must_use]
    pub fn config(&self) -> &MapConfig {
        &self.config
    }

    /// The periodic-sync scheduler, when one is running.
    #[must_use]
    pub fn scheduler(&self) -> Option<&SyncScheduler> {
        self.scheduler.as_ref()
    }

    /// Open `path` with the access the configured mode requires and map it.
    ///
    /// # Errors
    ///
    /// Fails with the open or mapping errors.
    pub fn open<P: AsRef<Path>>(&self, path: P) -> Result<Opened> {
        let mut options = OpenOptions::new();
        options.read(true);
        // Copy-on-write maps privately and needs only read access.
        if self.config.mode == MapMode::ReadWrite {
            options.write(true);
        }
        let file = options.open(path)?;
        self.wrap(Box::new(file))
    }

    /// Map an already-opened handle; empty files and directories pass
    /// through unwrapped.
    ///
    /// # Errors
    ///
    /// Fails with the mapping errors.
    pub fn wrap(&self, handle: Box<dyn FileHandle>) -> Result<Opened> {
        if handle.is_directory()? || handle.size()? == 0 {
            return Ok(Opened::Passthrough(handle));
        }
        let file =
            MappedFile::with_scheduler(handle, self.config.clone(), self.scheduler.as_ref())?;
        Ok(Opened::Mapped(file))
    }

    /// Stop the periodic-sync scheduler, if any.
    pub fn shutdown(&self) {
        if let Some(scheduler) = &self.scheduler {
            scheduler.stop();
        }
    }
}

/// Map a single path with `config`, without engine bookkeeping.
///
/// # Errors
///
/// Fails with `Config` for empty files and directories, and with the open or
/// mapping errors.
pub fn map_path<P: AsRef<Path>>(path: P, config: MapConfig) -> Result<MappedFile> {
    let engine = MapEngine::new(MapConfig {
        sync_interval: None,
        ..config
    });
    match engine.open(path)? {
        Opened::Mapped(file) => Ok(file),
        Opened::Passthrough(_) => Err(MmapEngineError::Config(
            "path is empty or a directory and cannot be mapped",
        )),
    }
}
