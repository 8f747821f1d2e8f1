//! Kernel access-pattern advice for mapped files.
//!
//! Advice is a hint: platforms silently ignore what they cannot express. On
//! Unix this surfaces `madvise`; on Windows `WillNeed` prefetches through
//! `PrefetchVirtualMemory` and every other advice succeeds as a no-op.

use crate::errors::{MmapEngineError, Result};
use crate::file::MappedFile;
use crate::mmap::AdviceKind;
use crate::utils::ensure_in_bounds;

/// Memory access pattern advice for the OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapAdvice {
    /// Normal access pattern (default).
    Normal,
    /// Random access pattern.
    Random,
    /// Sequential access pattern.
    Sequential,
    /// Will need this range soon.
    WillNeed,
    /// Won't need this range soon.
    DontNeed,
    /// Pages may be reclaimed without writing them back (Linux, macOS).
    Free,
    /// Prefer transparent huge pages for this range (Linux).
    HugePage,
    /// Avoid transparent huge pages for this range (Linux).
    NoHugePage,
}

impl From<MapAdvice> for AdviceKind {
    fn from(advice: MapAdvice) -> Self {
        match advice {
            MapAdvice::Normal => AdviceKind::Normal,
            MapAdvice::Random => AdviceKind::Random,
            MapAdvice::Sequential => AdviceKind::Sequential,
            MapAdvice::WillNeed => AdviceKind::WillNeed,
            MapAdvice::DontNeed => AdviceKind::DontNeed,
            MapAdvice::Free => AdviceKind::Free,
            MapAdvice::HugePage => AdviceKind::HugePage,
            MapAdvice::NoHugePage => AdviceKind::NoHugePage,
        }
    }
}

impl MappedFile {
    /// Advise the kernel about the access pattern for the whole current
    /// window.
    ///
    /// # Errors
    ///
    /// Fails with `NotMapped` when no mapping is live, or with the wrapped
    /// `madvise` error.
    pub fn advise(&self, advice: MapAdvice) -> Result<()> {
        let state = self.inner.state.read();
        Self::check_live(&state)?;
        let segment = state.segment.as_ref().ok_or(MmapEngineError::NotMapped)?;
        segment.advise_raw(advice.into())
    }

    /// Advise the kernel about `[offset, offset + len)` of the current view,
    /// offsets relative to the window start.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidOffset` when the range exceeds the view, with
    /// `NotMapped` when no mapping is live, or with the wrapped `madvise`
    /// error.
    pub fn advise_range(&self, offset: u64, len: u64, advice: MapAdvice) -> Result<()> {
        if len == 0 {
            return Ok(());
        }
        let state = self.inner.state.read();
        Self::check_live(&state)?;
        let segment = state.segment.as_ref().ok_or(MmapEngineError::NotMapped)?;
        ensure_in_bounds(offset, len, segment.len() as u64)?;
        segment.advise_range_raw(offset as usize, len as usize, advice.into())
    }

    /// Hint that the window will be read sequentially.
    pub fn advise_sequential(&self) -> Result<()> {
        self.advise(MapAdvice::Sequential)
    }

    /// Hint that the window will be accessed randomly.
    pub fn advise_random(&self) -> Result<()> {
        self.advise(MapAdvice::Random)
    }

    /// Hint that the window's pages will be needed soon.
    pub fn advise_will_need(&self) -> Result<()> {
        self.advise(MapAdvice::WillNeed)
    }

    /// Hint that the window's pages will not be needed soon.
    pub fn advise_dont_need(&self) -> Result<()> {
        self.advise(MapAdvice::DontNeed)
    }

    /// Hint that the window's pages may be reclaimed without write-back.
    /// Unwritten modifications may be lost.
    pub fn advise_free(&self) -> Result<()> {
        self.advise(MapAdvice::Free)
    }

    /// Hint that transparent huge pages should back the window.
    pub fn advise_huge_page(&self) -> Result<()> {
        self.advise(MapAdvice::HugePage)
    }

    /// Hint that transparent huge pages should not back the window.
    pub fn advise_no_huge_page(&self) -> Result<()> {
        self.advise(MapAdvice::NoHugePage)
    }
}
