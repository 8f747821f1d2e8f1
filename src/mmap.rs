//! The mapping primitive: establish, flush, and dissolve a contiguous
//! virtual-address range bound to a file descriptor.
//!
//! A [`MapSegment`] owns one established range. The caller supplies a logical
//! (offset, length); the primitive aligns the offset down to the platform
//! allocation granularity, maps the padded range, and exposes a `view` that
//! starts at the first byte whose file offset equals the requested offset.
//! Dissolving is `Drop`.

use std::io;

use memmap2::{Mmap, MmapMut, MmapOptions};
use tracing::debug;

use crate::config::{MapConfig, MapMode};
use crate::errors::{MmapEngineError, Result};
use crate::handle::RawDescriptor;
use crate::utils::{align_down, allocation_granularity};

pub(crate) enum MapVariant {
    Ro(Mmap),
    Rw(MmapMut),
    Cow(MmapMut),
}

/// One established mapping over `[aligned_offset, aligned_offset + pad + len)`
/// of the file, where `aligned_offset + pad` is the logical offset the caller
/// asked for.
pub(crate) struct MapSegment {
    map: MapVariant,
    /// Alignment padding: the view begins `pad` bytes into the raw range.
    pad: usize,
    /// View length in bytes.
    len: usize,
}

impl MapSegment {
    /// Establish a mapping of `len` bytes at logical file `offset`.
    ///
    /// `len` must be positive and `offset + len` must not exceed the file
    /// size; the caller (the window manager) guarantees both.
    pub(crate) fn establish(
        desc: RawDescriptor,
        offset: u64,
        len: u64,
        config: &MapConfig,
    ) -> Result<Self> {
        let granularity = allocation_granularity() as u64;
        let aligned_offset = align_down(offset, granularity);
        let pad = (offset - aligned_offset) as usize;
        let map_len = pad + len as usize;

        let map = match map_range(desc, aligned_offset, map_len, config, true) {
            Ok(map) => map,
            // Huge pages and population can be hard flags; one retry without.
            Err(err) if config.huge_pages || config.preload => {
                debug!(%err, "mapping with population/huge-page flags failed, retrying plain");
                map_range(desc, aligned_offset, map_len, config, false)
                    .map_err(|source| MmapEngineError::Map { op: "mmap", source })?
            }
            Err(source) => return Err(MmapEngineError::Map { op: "mmap", source }),
        };

        let segment = Self {
            map,
            pad,
            len: len as usize,
        };

        if config.preload {
            // Population fallback where MAP_POPULATE is unavailable; a hint,
            // never fatal.
            let _ = segment.advise_raw(AdviceKind::WillNeed);
        }

        debug!(offset, len, pad, "mapping established");
        Ok(segment)
    }

    /// The mapped view, with the alignment padding removed.
    pub(crate) fn view(&self) -> &[u8] {
        let raw: &[u8] = match &self.map {
            MapVariant::Ro(m) => &m[..],
            MapVariant::Rw(m) | MapVariant::Cow(m) => &m[..],
        };
        &raw[self.pad..self.pad + self.len]
    }

    /// Mutable view; `None` for read-only mappings.
    pub(crate) fn view_mut(&mut self) -> Option<&mut [u8]> {
        match &mut self.map {
            MapVariant::Ro(_) => None,
            MapVariant::Rw(m) | MapVariant::Cow(m) => Some(&mut m[self.pad..self.pad + self.len]),
        }
    }

    /// View length in bytes.
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Initiate write-back of the whole range and await it.
    ///
    /// No-op for read-only mappings, and for copy-on-write mappings, whose
    /// private pages never reach the file.
    pub(crate) fn flush(&self) -> io::Result<()> {
        match &self.map {
            MapVariant::Ro(_) | MapVariant::Cow(_) => Ok(()),
            MapVariant::Rw(m) => m.flush(),
        }
    }

    /// Queue write-back of the whole range and return.
    pub(crate) fn flush_async(&self) -> io::Result<()> {
        match &self.map {
            MapVariant::Ro(_) | MapVariant::Cow(_) => Ok(()),
            MapVariant::Rw(m) => m.flush_async(),
        }
    }

    /// Base pointer and length of the raw mapped range, padding included.
    /// Kernel advice operates on the raw range, as the original mapping does.
    pub(crate) fn raw_parts(&self) -> (*const u8, usize) {
        match &self.map {
            MapVariant::Ro(m) => (m.as_ptr(), m.len()),
            MapVariant::Rw(m) | MapVariant::Cow(m) => (m.as_ptr(), m.len()),
        }
    }

    /// Apply kernel advice to the raw range. Advisory only.
    pub(crate) fn advise_raw(&self, advice: AdviceKind) -> Result<()> {
        let (ptr, len) = self.raw_parts();
        self.advise_ptr_range(ptr, len, advice)
    }

    /// Apply kernel advice to `[view_offset, view_offset + len)` of the view.
    ///
    /// The start is aligned down to the page size; the raw base is
    /// granularity-aligned, so page alignment is always reachable inside the
    /// raw range.
    pub(crate) fn advise_range_raw(
        &self,
        view_offset: usize,
        len: usize,
        advice: AdviceKind,
    ) -> Result<()> {
        let (base, raw_len) = self.raw_parts();
        let start = self.pad + view_offset;
        let page = crate::utils::page_size();
        let aligned_start = (start / page) * page;
        let adjusted_len = (len + (start - aligned_start)).min(raw_len - aligned_start);
        // SAFETY: aligned_start < raw_len, so the pointer stays inside the
        // raw mapping.
        let ptr = unsafe { base.add(aligned_start) };
        self.advise_ptr_range(ptr, adjusted_len, advice)
    }

    #[cfg_attr(windows, allow(unused_variables))]
    fn advise_ptr_range(&self, ptr: *const u8, len: usize, advice: AdviceKind) -> Result<()> {
        if len == 0 {
            return Ok(());
        }

        #[cfg(unix)]
        {
            let Some(flag) = advice.madvise_flag() else {
                // Advice with no kernel equivalent here is silently ignored.
                return Ok(());
            };
            // SAFETY: the range [ptr, ptr+len) is the live mapping owned by
            // self, and madvise does not invalidate it.
            let rc = unsafe { libc::madvise(ptr as *mut libc::c_void, len, flag) };
            if rc != 0 {
                return Err(MmapEngineError::Map {
                    op: "madvise",
                    source: io::Error::last_os_error(),
                });
            }
        }

        #[cfg(windows)]
        {
            // Windows exposes only prefetch; everything else succeeds as a
            // no-op.
            if matches!(advice, AdviceKind::WillNeed) {
                prefetch_virtual_memory(ptr, len)?;
            }
        }

        Ok(())
    }
}

impl Drop for MapSegment {
    fn drop(&mut self) {
        debug!(len = self.len, "mapping dissolved");
    }
}

/// Internal advice selector shared by the primitive and the public advise
/// surface in [`crate::advise`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AdviceKind {
    Normal,
    Random,
    Sequential,
    WillNeed,
    DontNeed,
    Free,
    HugePage,
    NoHugePage,
}

#[cfg(unix)]
impl AdviceKind {
    /// The platform `madvise` flag, or `None` when this platform has no
    /// equivalent and the advice is ignored.
    fn madvise_flag(self) -> Option<libc::c_int> {
        match self {
            AdviceKind::Normal => Some(libc::MADV_NORMAL),
            AdviceKind::Random => Some(libc::MADV_RANDOM),
            AdviceKind::Sequential => Some(libc::MADV_SEQUENTIAL),
            AdviceKind::WillNeed => Some(libc::MADV_WILLNEED),
            AdviceKind::DontNeed => Some(libc::MADV_DONTNEED),
            #[cfg(any(target_os = "linux", target_os = "macos"))]
            AdviceKind::Free => Some(libc::MADV_FREE),
            #[cfg(not(any(target_os = "linux", target_os = "macos")))]
            AdviceKind::Free => None,
            #[cfg(target_os = "linux")]
            AdviceKind::HugePage => Some(libc::MADV_HUGEPAGE),
            #[cfg(target_os = "linux")]
            AdviceKind::NoHugePage => Some(libc::MADV_NOHUGEPAGE),
            #[cfg(not(target_os = "linux"))]
            AdviceKind::HugePage | AdviceKind::NoHugePage => None,
        }
    }
}

fn map_range(
    desc: RawDescriptor,
    aligned_offset: u64,
    map_len: usize,
    config: &MapConfig,
    with_hints: bool,
) -> io::Result<MapVariant> {
    let mut options = MmapOptions::new();
    options.offset(aligned_offset).len(map_len);

    #[cfg(target_os = "linux")]
    if with_hints {
        if config.preload {
            options.populate();
        }
        if config.huge_pages {
            options.huge(None);
        }
    }
    #[cfg(not(target_os = "linux"))]
    let _ = with_hints;

    // SAFETY: the descriptor refers to an open file whose handle the caller
    // keeps alive for the lifetime of the segment, and [aligned_offset,
    // aligned_offset + map_len) lies within the file. External truncation can
    // still invalidate pages; that hazard is handled by the fault registry.
    unsafe {
        Ok(match config.mode {
            MapMode::ReadOnly => MapVariant::Ro(options.map(desc)?),
            MapMode::ReadWrite => MapVariant::Rw(options.map_mut(desc)?),
            MapMode::CopyOnWrite => MapVariant::Cow(options.map_copy(desc)?),
        })
    }
}

#[cfg(windows)]
fn prefetch_virtual_memory(ptr: *const u8, len: usize) -> Result<()> {
    #[allow(non_snake_case)]
    #[repr(C)]
    struct WIN32_MEMORY_RANGE_ENTRY {
        VirtualAddress: *mut core::ffi::c_void,
        NumberOfBytes: usize,
    }

    extern "system" {
        fn PrefetchVirtualMemory(
            hProcess: *mut core::ffi::c_void,
            NumberOfEntries: usize,
            VirtualAddresses: *const WIN32_MEMORY_RANGE_ENTRY,
            Flags: u32,
        ) -> i32;

        fn GetCurrentProcess() -> *mut core::ffi::c_void;
    }

    let entry = WIN32_MEMORY_RANGE_ENTRY {
        VirtualAddress: ptr as *mut core::ffi::c_void,
        NumberOfBytes: len,
    };

    // SAFETY: PrefetchVirtualMemory is safe with a valid in-process range.
    let rc = unsafe { PrefetchVirtualMemory(GetCurrentProcess(), 1, &entry, 0) };
    if rc == 0 {
        return Err(MmapEngineError::Map {
            op: "PrefetchVirtualMemory",
            source: io::Error::last_os_error(),
        });
    }
    Ok(())
}
