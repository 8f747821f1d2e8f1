//! The per-file engine: a byte-oriented file handle whose storage is a
//! memory mapping of the underlying file.
//!
//! A [`MappedFile`] reconciles a logical byte-stream cursor with a possibly
//! partial mapped window, enforces the configured durability policy, and
//! tears everything down in order at close: scheduler unregistration, flush
//! if dirty, dissolve, handle close.

use std::io::{self, SeekFrom};
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use tracing::debug;

use crate::config::{MapConfig, MapMode, SyncPolicy};
use crate::errors::{MmapEngineError, Result};
use crate::handle::{FileHandle, SharedDescriptor};
use crate::mmap::MapSegment;
use crate::scheduler::{SchedulerCore, SyncScheduler};

pub(crate) struct State {
    pub(crate) handle: Option<Box<dyn FileHandle>>,
    pub(crate) descriptor: SharedDescriptor,
    /// File size as observed when the mapping was last established.
    pub(crate) size: u64,
    pub(crate) segment: Option<MapSegment>,
    /// Logical file offset at which the current window begins.
    pub(crate) window_offset: u64,
    /// Logical file offset for the next sequential read or write.
    pub(crate) cursor: u64,
    /// A window relocation or recovery failed; only close works now.
    pub(crate) lost: bool,
    pub(crate) closed: bool,
}

pub(crate) struct Inner {
    pub(crate) config: MapConfig,
    /// Effective window extent; 0 means the whole file is mapped.
    pub(crate) window_size: u64,
    pub(crate) dirty: AtomicBool,
    pub(crate) state: RwLock<State>,
    /// Membership back-reference for close-time unregistration. Weak in both
    /// directions, so scheduler and file never keep each other alive.
    pub(crate) scheduler: Mutex<Option<Weak<SchedulerCore>>>,
}

/// A memory-mapped file.
///
/// Cloning is cheap and shares the underlying state; all clones observe the
/// same cursor, window, and close.
///
/// # Examples
///
/// ```no_run
/// use mmap_engine::{MapConfig, MapEngine, Opened};
///
/// let engine = MapEngine::new(MapConfig::read_only());
/// let Opened::Mapped(file) = engine.open("data.bin")? else {
///     unreachable!("non-empty regular files are mapped");
/// };
/// let mut buf = [0u8; 16];
/// let n = file.read(&mut buf)?;
/// file.close()?;
/// # Ok::<(), mmap_engine::MmapEngineError>(())
/// ```
#[derive(Clone)]
pub struct MappedFile {
    pub(crate) inner: Arc<Inner>,
}

impl std::fmt::Debug for MappedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.read();
        f.debug_struct("MappedFile")
            .field("mode", &self.inner.config.mode)
            .field("sync_policy", &self.inner.config.sync_policy)
            .field("size", &state.size)
            .field("window_size", &self.inner.window_size)
            .field("window_offset", &state.window_offset)
            .field("cursor", &state.cursor)
            .field("mapped", &state.segment.is_some())
            .finish()
    }
}

impl MappedFile {
    /// Map an already-opened, non-empty file.
    ///
    /// # Errors
    ///
    /// Returns `MmapEngineError::Config` for a zero-length file,
    /// `MmapEngineError::Unsupported` when the handle exposes no OS
    /// descriptor, and `MmapEngineError::Map` when the mapping cannot be
    /// established.
    pub fn new(handle: Box<dyn FileHandle>, config: MapConfig) -> Result<Self> {
        Self::with_scheduler(handle, config, None)
    }

    /// Like [`MappedFile::new`], registering with `scheduler` when the
    /// configured policy is [`SyncPolicy::Periodic`].
    pub fn with_scheduler(
        handle: Box<dyn FileHandle>,
        config: MapConfig,
        scheduler: Option<&SyncScheduler>,
    ) -> Result<Self> {
        let size = handle.size()?;
        if size == 0 {
            return Err(MmapEngineError::Config("cannot map a zero-length file"));
        }
        let descriptor = SharedDescriptor(handle.raw_descriptor().ok_or(
            MmapEngineError::Unsupported("handle does not expose an OS descriptor"),
        )?);

        let window_size = config.effective_window();
        let map_len = if window_size == 0 {
            size
        } else {
            window_size.min(size)
        };
        let segment = MapSegment::establish(descriptor.0, 0, map_len, &config)?;

        let file = Self {
            inner: Arc::new(Inner {
                window_size,
                dirty: AtomicBool::new(false),
                state: RwLock::new(State {
                    handle: Some(handle),
                    descriptor,
                    size,
                    segment: Some(segment),
                    window_offset: 0,
                    cursor: 0,
                    lost: false,
                    closed: false,
                }),
                scheduler: Mutex::new(None),
                config,
            }),
        };

        if file.inner.config.sync_policy == SyncPolicy::Periodic {
            if let Some(scheduler) = scheduler {
                scheduler.register(&file);
            }
        }

        Ok(file)
    }

    /// Mapping protection and sharing mode.
    #[must_use]
    pub fn mode(&self) -> MapMode {
        self.inner.config.mode
    }

    /// Configured durability policy.
    #[must_use]
    pub fn sync_policy(&self) -> SyncPolicy {
        self.inner.config.sync_policy
    }

    /// File size in bytes, as recorded when the mapping was last established.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.inner.state.read().size
    }

    /// Whether the file has zero recorded size (only after a
    /// truncation-to-zero recovery; files are never mapped empty).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Effective window extent; `0` means the whole file is mapped.
    #[must_use]
    pub fn window_size(&self) -> u64 {
        self.inner.window_size
    }

    /// Logical file offset at which the current window begins.
    #[must_use]
    pub fn window_offset(&self) -> u64 {
        self.inner.state.read().window_offset
    }

    /// Logical cursor for the next sequential read or write.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.inner.state.read().cursor
    }

    /// Whether a write has occurred since the last successful flush.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.inner.dirty.load(Ordering::Acquire)
    }

    /// Read from the cursor into `buf`, advancing the cursor.
    ///
    /// Returns `Ok(0)` at end of input. A short read at a window boundary is
    /// not end of input; the next call continues in the next window.
    ///
    /// # Errors
    ///
    /// Fails with `Closed` after close and `MappingLost` after a failed
    /// window relocation.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let mut state = self.inner.state.write();
        Self::check_live(&state)?;

        if state.segment.is_none() {
            let cursor = state.cursor;
            let n = Self::handle_of(&state)?.read_at(buf, cursor)?;
            state.cursor += n as u64;
            return Ok(n);
        }

        if state.cursor >= state.size {
            return Ok(0);
        }

        if self.inner.window_size > 0 {
            let cursor = state.cursor;
            self.ensure_visible(&mut state, cursor)?;
        }

        let n = {
            let view = state
                .segment
                .as_ref()
                .ok_or(MmapEngineError::NotMapped)?
                .view();
            let pos = (state.cursor - state.window_offset) as usize;
            let n = buf.len().min(view.len() - pos);
            buf[..n].copy_from_slice(&view[pos..pos + n]);
            n
        };
        state.cursor += n as u64;
        Ok(n)
    }

    /// Read at `offset` without moving the cursor.
    ///
    /// Returns the number of bytes copied, short when the file (or the
    /// current window) ends before `buf` is full.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidOffset` unless `0 <= offset < len()`.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        if self.inner.window_size > 0 {
            let mut state = self.inner.state.write();
            Self::check_live(&state)?;
            if state.segment.is_none() {
                return Ok(Self::handle_of(&state)?.read_at(buf, offset)?);
            }
            Self::check_offset(offset, state.size)?;
            self.ensure_visible(&mut state, offset)?;
            Self::copy_from_view(&state, buf, offset)
        } else {
            let state = self.inner.state.read();
            Self::check_live(&state)?;
            if state.segment.is_none() {
                return Ok(Self::handle_of(&state)?.read_at(buf, offset)?);
            }
            Self::check_offset(offset, state.size)?;
            Self::copy_from_view(&state, buf, offset)
        }
    }

    /// Write `buf` at the cursor, advancing it and marking the file dirty.
    ///
    /// The mapping never grows the file: a write that would pass the end of
    /// the file fails with `ShortWrite` and writes nothing.
    ///
    /// # Errors
    ///
    /// Fails with `WriteToReadOnly` on read-only mappings, `ShortWrite` past
    /// the file or window end, and `WriteFlush` when the write landed but the
    /// immediate flush required by [`SyncPolicy::Immediate`] failed.
    pub fn write(&self, buf: &[u8]) -> Result<usize> {
        let mut state = self.inner.state.write();
        Self::check_live(&state)?;

        if state.segment.is_none() {
            let cursor = state.cursor;
            let n = Self::handle_of(&state)?.write_at(buf, cursor)?;
            state.cursor += n as u64;
            return Ok(n);
        }

        let cursor = state.cursor;
        let n = self.write_in_view(&mut state, buf, cursor)?;
        state.cursor += n as u64;
        Ok(n)
    }

    /// Write `buf` at `offset` without moving the cursor.
    ///
    /// # Errors
    ///
    /// As [`MappedFile::write`], plus `InvalidOffset` unless
    /// `0 <= offset < len()`.
    pub fn write_at(&self, buf: &[u8], offset: u64) -> Result<usize> {
        let mut state = self.inner.state.write();
        Self::check_live(&state)?;

        if state.segment.is_none() {
            return Ok(Self::handle_of(&state)?.write_at(buf, offset)?);
        }

        if self.inner.config.mode == MapMode::ReadOnly {
            return Err(MmapEngineError::WriteToReadOnly);
        }
        Self::check_offset(offset, state.size)?;
        self.write_in_view(&mut state, buf, offset)
    }

    /// Set the cursor. Never blocks and never materializes the mapping.
    ///
    /// The cursor may be positioned past end of file; a subsequent read
    /// reports end of input and a write fails with `ShortWrite`.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidOffset` when the computed position is negative.
    pub fn seek(&self, pos: SeekFrom) -> Result<u64> {
        let mut state = self.inner.state.write();
        Self::check_live(&state)?;

        let target: i128 = match pos {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::Current(delta) => state.cursor as i128 + delta as i128,
            SeekFrom::End(delta) => state.size as i128 + delta as i128,
        };
        if target < 0 {
            return Err(MmapEngineError::InvalidOffset {
                offset: target as i64,
                size: state.size,
            });
        }
        state.cursor = target as u64;
        Ok(state.cursor)
    }

    /// Flush dirty pages synchronously. No-op when clean or read-only; the
    /// dirty flag clears only on success.
    ///
    /// # Errors
    ///
    /// Fails with `Closed` after close, or with the wrapped flush error.
    pub fn sync(&self) -> Result<()> {
        let state = self.inner.state.read();
        Self::check_live(&state)?;
        self.sync_with(&state)
    }

    pub(crate) fn sync_with(&self, state: &State) -> Result<()> {
        let Some(segment) = &state.segment else {
            return Ok(Self::handle_of(state)?.sync()?);
        };
        if self.inner.config.mode == MapMode::ReadOnly {
            return Ok(());
        }
        if !self.inner.dirty.load(Ordering::Acquire) {
            return Ok(());
        }
        segment.flush().map_err(|source| MmapEngineError::Map {
            op: "msync",
            source,
        })?;
        self.inner.dirty.store(false, Ordering::Release);
        Ok(())
    }

    /// Queue write-back of dirty pages without awaiting completion.
    ///
    /// The dirty flag stays set: only a synchronous flush proves durability.
    ///
    /// # Errors
    ///
    /// Fails with `Closed` after close, or with the wrapped flush error.
    pub fn sync_async(&self) -> Result<()> {
        let state = self.inner.state.read();
        Self::check_live(&state)?;
        let Some(segment) = &state.segment else {
            return Ok(Self::handle_of(&state)?.sync()?);
        };
        if self.inner.config.mode == MapMode::ReadOnly
            || !self.inner.dirty.load(Ordering::Acquire)
        {
            return Ok(());
        }
        segment.flush_async().map_err(|source| MmapEngineError::Map {
            op: "msync",
            source,
        })
    }

    /// Close the file: unregister from the scheduler and the fault registry,
    /// flush if dirty (unless the policy is [`SyncPolicy::Never`]), dissolve
    /// the mapping, close the handle. The first error is recorded and
    /// returned; later steps still run. A second close is a no-op.
    pub fn close(&self) -> Result<()> {
        if let Some(weak) = self.inner.scheduler.lock().take() {
            if let Some(core) = weak.upgrade() {
                core.unregister_key(self.registry_key());
            }
        }
        crate::fault::unregister(self);

        let mut state = self.inner.state.write();
        if state.closed {
            return Ok(());
        }
        state.closed = true;

        let mut first_error: Option<MmapEngineError> = None;

        if self.inner.dirty.load(Ordering::Acquire)
            && self.inner.config.sync_policy != SyncPolicy::Never
        {
            if let Some(segment) = &state.segment {
                match segment.flush() {
                    Ok(()) => self.inner.dirty.store(false, Ordering::Release),
                    Err(source) => {
                        first_error = Some(MmapEngineError::Map {
                            op: "msync",
                            source,
                        });
                    }
                }
            }
        }

        state.segment = None;

        if let Some(handle) = state.handle.take() {
            if let Err(err) = handle.close() {
                first_error.get_or_insert(err.into());
            }
        }

        debug!("mapped file closed");
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Change the file size. Unsupported while a mapping is live; after a
    /// truncation-to-zero recovery the call delegates to the handle.
    ///
    /// # Errors
    ///
    /// Fails with `TruncateUnsupported` while mapped.
    pub fn truncate(&self, size: u64) -> Result<()> {
        let mut state = self.inner.state.write();
        Self::check_live(&state)?;
        if state.segment.is_some() {
            return Err(MmapEngineError::TruncateUnsupported);
        }
        Self::handle_of(&state)?.set_len(size)?;
        state.size = size;
        Ok(())
    }

    /// Borrow the mapped view directly.
    ///
    /// The borrow holds a shared lock on the file for its lifetime; the slice
    /// is empty when no mapping is live. Writing through a separately
    /// obtained pointer into a read-only mapping faults; that is the caller's
    /// error, not the engine's.
    #[must_use]
    pub fn data(&self) -> MappedView<'_> {
        MappedView {
            guard: self.inner.state.read(),
        }
    }

    /// Stable identity for the process-wide registries.
    pub(crate) fn registry_key(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    pub(crate) fn check_live(state: &State) -> Result<()> {
        if state.closed {
            return Err(MmapEngineError::Closed);
        }
        if state.lost {
            return Err(MmapEngineError::MappingLost);
        }
        Ok(())
    }

    pub(crate) fn handle_of(state: &State) -> Result<&dyn FileHandle> {
        state
            .handle
            .as_deref()
            .ok_or(MmapEngineError::Closed)
    }

    fn check_offset(offset: u64, size: u64) -> Result<()> {
        if offset >= size {
            return Err(MmapEngineError::InvalidOffset {
                offset: offset as i64,
                size,
            });
        }
        Ok(())
    }

    fn copy_from_view(state: &State, buf: &mut [u8], offset: u64) -> Result<usize> {
        let view = state
            .segment
            .as_ref()
            .ok_or(MmapEngineError::NotMapped)?
            .view();
        let pos = (offset - state.window_offset) as usize;
        let n = buf.len().min(view.len() - pos);
        buf[..n].copy_from_slice(&view[pos..pos + n]);
        Ok(n)
    }

    /// Shared body of `write` and `write_at`, cursor handling excluded.
    fn write_in_view(&self, state: &mut State, buf: &[u8], offset: u64) -> Result<usize> {
        if self.inner.config.mode == MapMode::ReadOnly {
            return Err(MmapEngineError::WriteToReadOnly);
        }
        if offset + buf.len() as u64 > state.size {
            return Err(MmapEngineError::ShortWrite {
                requested: buf.len(),
                offset,
                limit: state.size,
            });
        }

        if self.inner.window_size > 0 {
            self.ensure_visible(state, offset)?;
        }

        let window_offset = state.window_offset;
        let segment = state.segment.as_mut().ok_or(MmapEngineError::NotMapped)?;
        let view = segment.view_mut().ok_or(MmapEngineError::WriteToReadOnly)?;
        let pos = (offset - window_offset) as usize;
        if pos + buf.len() > view.len() {
            // A write never spans a window boundary.
            return Err(MmapEngineError::ShortWrite {
                requested: buf.len(),
                offset,
                limit: window_offset + view.len() as u64,
            });
        }
        view[pos..pos + buf.len()].copy_from_slice(buf);
        self.inner.dirty.store(true, Ordering::Release);

        if self.inner.config.sync_policy == SyncPolicy::Immediate {
            match segment.flush() {
                Ok(()) => self.inner.dirty.store(false, Ordering::Release),
                Err(source) => {
                    return Err(MmapEngineError::WriteFlush {
                        written: buf.len(),
                        source,
                    });
                }
            }
        }

        Ok(buf.len())
    }
}

/// Borrowed view of the mapped bytes, holding a shared lock on the file.
pub struct MappedView<'a> {
    guard: RwLockReadGuard<'a, State>,
}

impl Deref for MappedView<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.guard
            .segment
            .as_ref()
            .map_or(&[][..], |segment| segment.view())
    }
}

impl AsRef<[u8]> for MappedView<'_> {
    fn as_ref(&self) -> &[u8] {
        self
    }
}

impl std::fmt::Debug for MappedView<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedView").field("len", &self.len()).finish()
    }
}

/// `std::io` adapters so a `MappedFile` can stand in where the std traits are
/// expected. Engine errors surface as `io::Error` with `InvalidInput` kind
/// for argument errors.
impl io::Read for MappedFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        MappedFile::read(self, buf).map_err(io_error)
    }
}

impl io::Write for MappedFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        MappedFile::write(self, buf).map_err(io_error)
    }

    fn flush(&mut self) -> io::Result<()> {
        MappedFile::sync(self).map_err(io_error)
    }
}

impl io::Seek for MappedFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        MappedFile::seek(self, pos).map_err(io_error)
    }
}

fn io_error(err: MmapEngineError) -> io::Error {
    match err {
        MmapEngineError::Io(source) => source,
        MmapEngineError::Map { source, .. } => source,
        other @ MmapEngineError::InvalidOffset { .. } => {
            io::Error::new(io::ErrorKind::InvalidInput, other.to_string())
        }
        other => io::Error::other(other.to_string()),
    }
}
