//! Mapping mode, durability policy, and per-file configuration.

use std::time::Duration;

/// Default window extent for windowed mappings (1 GiB).
pub const DEFAULT_WINDOW_SIZE: u64 = 1 << 30;

/// Protection and sharing mode for a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MapMode {
    /// Read-only shared mapping.
    #[default]
    ReadOnly,
    /// Read-write shared mapping; writes propagate to the file.
    ReadWrite,
    /// Read-write private mapping; writes produce private copies invisible to
    /// the file and to other mappings.
    CopyOnWrite,
}

impl MapMode {
    /// Whether writes through the mapping are permitted.
    #[must_use]
    pub fn writable(self) -> bool {
        !matches!(self, MapMode::ReadOnly)
    }
}

/// Policy controlling when dirty pages are flushed to the backing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPolicy {
    /// Flush synchronously after every successful write.
    Immediate,
    /// A process-wide [`SyncScheduler`](crate::scheduler::SyncScheduler)
    /// flushes registered files at a fixed interval.
    Periodic,
    /// Flush only on an explicit `sync` call and at close.
    OnClose,
    /// Never initiate a flush; the OS page cache decides. Close does not
    /// flush either. A window slide still flushes before relocating, for
    /// correctness rather than durability.
    #[default]
    Never,
}

/// Configuration for a [`MappedFile`](crate::file::MappedFile).
///
/// Defaults are the safe ones: read-only, never flushed by the engine, whole
/// file mapped, no population hints.
#[derive(Debug, Clone)]
pub struct MapConfig {
    /// Mapping protection and sharing.
    pub mode: MapMode,
    /// Durability discipline.
    pub sync_policy: SyncPolicy,
    /// Ticker interval when `sync_policy` is [`SyncPolicy::Periodic`].
    pub sync_interval: Option<Duration>,
    /// Map the entire file at once. When `false`, a sliding window of
    /// `window_size` bytes is used.
    pub map_whole_file: bool,
    /// Window extent for windowed mappings. `0` selects
    /// [`DEFAULT_WINDOW_SIZE`]. Must be at least the allocation granularity.
    pub window_size: u64,
    /// Request eager page population (`MAP_POPULATE` on Linux, a `WillNeed`
    /// advice elsewhere).
    pub preload: bool,
    /// Request huge pages where the platform supports them; falls back to
    /// normal pages when the mapping fails with huge pages requested.
    pub huge_pages: bool,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            mode: MapMode::ReadOnly,
            sync_policy: SyncPolicy::Never,
            sync_interval: None,
            map_whole_file: true,
            window_size: 0,
            preload: false,
            huge_pages: false,
        }
    }
}

impl MapConfig {
    /// Read-only, whole-file configuration.
    #[must_use]
    pub fn read_only() -> Self {
        Self::default()
    }

    /// Read-write, whole-file configuration with the given durability policy.
    #[must_use]
    pub fn read_write(sync_policy: SyncPolicy) -> Self {
        Self {
            mode: MapMode::ReadWrite,
            sync_policy,
            ..Self::default()
        }
    }

    /// Set the mapping mode.
    #[must_use]
    pub fn mode(mut self, mode: MapMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the durability policy.
    #[must_use]
    pub fn sync_policy(mut self, policy: SyncPolicy) -> Self {
        self.sync_policy = policy;
        self
    }

    /// Set the periodic sync interval.
    #[must_use]
    pub fn sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = Some(interval);
        self
    }

    /// Use a sliding window of `size` bytes instead of mapping the whole
    /// file. `0` selects [`DEFAULT_WINDOW_SIZE`].
    #[must_use]
    pub fn windowed(mut self, size: u64) -> Self {
        self.map_whole_file = false;
        self.window_size = size;
        self
    }

    /// Request eager page population.
    #[must_use]
    pub fn preload(mut self, preload: bool) -> Self {
        self.preload = preload;
        self
    }

    /// Request huge pages.
    #[must_use]
    pub fn huge_pages(mut self, huge_pages: bool) -> Self {
        self.huge_pages = huge_pages;
        self
    }

    /// Effective window extent: `0` means the whole file is mapped.
    #[must_use]
    pub fn effective_window(&self) -> u64 {
        if self.map_whole_file {
            0
        } else if self.window_size == 0 {
            DEFAULT_WINDOW_SIZE
        } else {
            self.window_size
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_safe() {
        let config = MapConfig::default();
        assert_eq!(config.mode, MapMode::ReadOnly);
        assert_eq!(config.sync_policy, SyncPolicy::Never);
        assert!(config.map_whole_file);
        assert_eq!(config.effective_window(), 0);
    }

    #[test]
    fn windowed_defaults_to_one_gib() {
        let config = MapConfig::read_only().windowed(0);
        assert_eq!(config.effective_window(), DEFAULT_WINDOW_SIZE);
        let config = MapConfig::read_only().windowed(4096);
        assert_eq!(config.effective_window(), 4096);
    }

    #[test]
    fn mode_writability() {
        assert!(!MapMode::ReadOnly.writable());
        assert!(MapMode::ReadWrite.writable());
        assert!(MapMode::CopyOnWrite.writable());
    }
}
