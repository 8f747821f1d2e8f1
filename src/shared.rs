//! Shared-memory regions: a thin façade over the engine for IPC through a
//! file of fixed size.
//!
//! `create` pre-allocates the backing file and maps it read-write;
//! cooperating processes `open` the same path. The engine provides no
//! cross-process synchronization; callers bring their own.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use crate::config::{MapConfig, MapMode, SyncPolicy};
use crate::errors::{MmapEngineError, Result};
use crate::file::{MappedFile, MappedView};

/// Configuration for [`SharedRegion::create`].
#[derive(Debug, Clone)]
pub struct SharedRegionConfig {
    /// Path of the backing file; parent directories are created.
    pub path: PathBuf,
    /// Size of the region in bytes. Must be positive.
    pub size: u64,
    /// Mapping mode; [`MapMode::ReadOnly`] is promoted to
    /// [`MapMode::ReadWrite`], since a fresh region must be writable to be
    /// useful.
    pub mode: MapMode,
    /// Durability policy for the region.
    pub sync_policy: SyncPolicy,
    /// Unix permission bits for a newly created file (`0o644` by default).
    pub permissions: u32,
    /// Eagerly populate pages.
    pub populate: bool,
}

impl SharedRegionConfig {
    /// Configuration for a region of `size` bytes at `path`, read-write,
    /// never flushed by the engine, permissions `0o644`.
    pub fn new<P: AsRef<Path>>(path: P, size: u64) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            size,
            mode: MapMode::ReadWrite,
            sync_policy: SyncPolicy::Never,
            permissions: 0o644,
            populate: false,
        }
    }
}

/// A fixed-size byte region backed by a file and shared between processes.
pub struct SharedRegion {
    path: PathBuf,
    size: u64,
    file: MappedFile,
}

impl SharedRegion {
    /// Create (or truncate to size) the backing file and map it whole.
    ///
    /// # Errors
    ///
    /// Fails with `Config` for an empty path or zero size, and with the
    /// underlying create/map errors.
    pub fn create(config: &SharedRegionConfig) -> Result<Self> {
        if config.path.as_os_str().is_empty() {
            return Err(MmapEngineError::Config("shared region path is required"));
        }
        if config.size == 0 {
            return Err(MmapEngineError::Config("shared region size must be positive"));
        }

        if let Some(dir) = config.path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }

        let mut options = OpenOptions::new();
        options.read(true).write(true).create(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(config.permissions);
        }
        let handle = options.open(&config.path)?;
        handle.set_len(config.size)?;

        let mode = match config.mode {
            MapMode::ReadOnly => MapMode::ReadWrite,
            other => other,
        };
        let map_config = MapConfig {
            mode,
            sync_policy: config.sync_policy,
            preload: config.populate,
            ..MapConfig::default()
        };

        let file = MappedFile::new(Box::new(handle), map_config)?;
        Ok(Self {
            path: config.path.clone(),
            size: config.size,
            file,
        })
    }

    /// Open an existing region, read-only or writable. Opened regions flush
    /// at close ([`SyncPolicy::OnClose`]) when writable.
    ///
    /// # Errors
    ///
    /// Fails with the underlying open/map errors.
    pub fn open<P: AsRef<Path>>(path: P, writable: bool) -> Result<Self> {
        let path = path.as_ref();
        let size = std::fs::metadata(path)?.len();

        let mut options = OpenOptions::new();
        options.read(true).write(writable);
        let handle = options.open(path)?;

        let map_config = MapConfig {
            mode: if writable {
                MapMode::ReadWrite
            } else {
                MapMode::ReadOnly
            },
            sync_policy: SyncPolicy::OnClose,
            ..MapConfig::default()
        };

        let file = MappedFile::new(Box::new(handle), map_config)?;
        Ok(Self {
            path: path.to_path_buf(),
            size,
            file,
        })
    }

    /// Borrow the region's bytes. Concurrent access from multiple processes
    /// requires external synchronization.
    #[must_use]
    pub fn data(&self) -> MappedView<'_> {
        self.file.data()
    }

    /// Size of the region in bytes.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.size
    }

    /// Whether the region is zero-sized (never true for a created region).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Filesystem path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The underlying mapped file, for advanced operations.
    #[must_use]
    pub fn file(&self) -> &MappedFile {
        &self.file
    }

    /// Write `buf` at `offset` within the region.
    ///
    /// # Errors
    ///
    /// As [`MappedFile::write_at`].
    pub fn write_at(&self, buf: &[u8], offset: u64) -> Result<usize> {
        self.file.write_at(buf, offset)
    }

    /// Read at `offset` within the region.
    ///
    /// # Errors
    ///
    /// As [`MappedFile::read_at`].
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        self.file.read_at(buf, offset)
    }

    /// Flush the region to its backing file.
    ///
    /// # Errors
    ///
    /// As [`MappedFile::sync`].
    pub fn sync(&self) -> Result<()> {
        self.file.sync()
    }

    /// Close the region; the backing file remains and can be reopened.
    ///
    /// # Errors
    ///
    /// As [`MappedFile::close`].
    pub fn close(&self) -> Result<()> {
        self.file.close()
    }

    /// Close the region and delete its backing file.
    ///
    /// # Errors
    ///
    /// Returns the first error from close or delete.
    pub fn remove(self) -> Result<()> {
        let close_result = self.file.close();
        std::fs::remove_file(&self.path)?;
        close_result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_write_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ipc").join("region.shm");

        let region =
            SharedRegion::create(&SharedRegionConfig::new(&path, 4096)).expect("create");
        assert_eq!(region.len(), 4096);
        assert_eq!(region.data().len(), 4096);

        region.write_at(b"shared-bytes", 128).expect("write");
        region.sync().expect("sync");
        region.close().expect("close");

        let reopened = SharedRegion::open(&path, false).expect("open");
        let mut buf = [0u8; 12];
        reopened.read_at(&mut buf, 128).expect("read");
        assert_eq!(&buf, b"shared-bytes");
        reopened.close().expect("close");
    }

    #[test]
    fn invalid_configurations_are_refused() {
        assert!(SharedRegion::create(&SharedRegionConfig::new("", 16)).is_err());
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("zero.shm");
        assert!(SharedRegion::create(&SharedRegionConfig::new(path, 0)).is_err());
    }

    #[test]
    fn open_missing_region_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("missing.shm");
        assert!(SharedRegion::open(&path, true).is_err());
    }

    #[test]
    fn remove_deletes_backing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("gone.shm");

        let region =
            SharedRegion::create(&SharedRegionConfig::new(&path, 1024)).expect("create");
        region.remove().expect("remove");
        assert!(!path.exists());
    }
}
