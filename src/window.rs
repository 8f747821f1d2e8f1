//! The window manager: hides the distinction between a full-file mapping and
//! a sliding window from the I/O surface.
//!
//! Windows are aligned to the window size; the mapping primitive further
//! aligns the mapped offset down to the allocation granularity and re-adjusts
//! the view. Sliding away from a dirty window flushes it first, under every
//! sync policy including [`SyncPolicy::Never`](crate::config::SyncPolicy::Never).

use std::sync::atomic::Ordering;

use tracing::{debug, warn};

use crate::errors::{MmapEngineError, Result};
use crate::file::{MappedFile, State};
use crate::mmap::MapSegment;
use crate::utils::align_down;

impl MappedFile {
    /// Make the logical `offset` visible in the current view, sliding the
    /// window when it lies outside. No-op for whole-file mappings.
    ///
    /// The caller validates `offset < state.size` and holds the exclusive
    /// lock.
    pub(crate) fn ensure_visible(&self, state: &mut State, offset: u64) -> Result<()> {
        if self.inner.window_size == 0 {
            return Ok(());
        }
        let Some(segment) = &state.segment else {
            return Err(MmapEngineError::NotMapped);
        };
        let window_end = state.window_offset + segment.len() as u64;
        if offset >= state.window_offset && offset < window_end {
            return Ok(());
        }
        self.slide_window(state, offset)
    }

    /// Relocate the window to contain `target`.
    ///
    /// On a failed re-establish the file keeps no view and every subsequent
    /// I/O call fails with `MappingLost` until close.
    fn slide_window(&self, state: &mut State, target: u64) -> Result<()> {
        let window = self.inner.window_size;

        if self.inner.dirty.load(Ordering::Acquire) {
            if let Some(segment) = &state.segment {
                segment.flush().map_err(|source| MmapEngineError::Map {
                    op: "msync",
                    source,
                })?;
            }
            self.inner.dirty.store(false, Ordering::Release);
        }

        // Dissolve before re-establishing; the old and new ranges may not
        // coexist in tight address spaces.
        state.segment = None;

        let mut new_offset = align_down(target, window);
        if new_offset + window > state.size {
            new_offset = state.size.saturating_sub(window);
        }
        let len = window.min(state.size - new_offset);

        match MapSegment::establish(state.descriptor.0, new_offset, len, &self.inner.config) {
            Ok(segment) => {
                state.window_offset = new_offset;
                state.segment = Some(segment);
                debug!(requested = target, new_offset, len, "window slid");
                Ok(())
            }
            Err(err) => {
                state.lost = true;
                warn!(%err, "window relocation failed; mapping lost");
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MapConfig;
    use std::fs;

    fn patterned(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 256) as u8).collect()
    }

    #[test]
    fn sequential_reads_slide_per_window() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("slide.bin");
        fs::write(&path, patterned(3072)).expect("write");

        let handle = fs::File::open(&path).expect("open");
        let config = MapConfig::read_only().windowed(1024);
        let file = MappedFile::new(Box::new(handle), config).expect("map");

        let mut offsets = vec![file.window_offset()];
        let mut total = 0usize;
        let mut buf = [0u8; 512];
        loop {
            let n = file.read(&mut buf).expect("read");
            if n == 0 {
                break;
            }
            for (i, byte) in buf[..n].iter().enumerate() {
                assert_eq!(*byte, ((total + i) % 256) as u8);
            }
            total += n;
            let offset = file.window_offset();
            if *offsets.last().expect("nonempty") != offset {
                offsets.push(offset);
            }
        }

        assert_eq!(total, 3072);
        // ceil(3072 / 1024) - 1 distinct slides.
        assert_eq!(offsets, vec![0, 1024, 2048]);
        file.close().expect("close");
    }

    #[test]
    fn window_clamps_to_file_end() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("clamp.bin");
        fs::write(&path, patterned(5000)).expect("write");

        let handle = fs::File::open(&path).expect("open");
        let config = MapConfig::read_only().windowed(4096);
        let file = MappedFile::new(Box::new(handle), config).expect("map");

        // Reading near the end slides to a window ending exactly at the file
        // end rather than one starting at a window multiple.
        let mut buf = [0u8; 100];
        let n = file.read_at(&mut buf, 4900).expect("read_at");
        assert_eq!(n, 100);
        assert_eq!(file.window_offset(), 5000 - 4096);
        assert_eq!(buf[0], (4900 % 256) as u8);
        file.close().expect("close");
    }

    #[test]
    fn random_access_slides_both_directions() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("random.bin");
        fs::write(&path, patterned(8192)).expect("write");

        let handle = fs::File::open(&path).expect("open");
        let config = MapConfig::read_only().windowed(2048);
        let file = MappedFile::new(Box::new(handle), config).expect("map");

        for &offset in &[6000u64, 100, 4096, 2047, 2048, 0] {
            let mut buf = [0u8; 1];
            let n = file.read_at(&mut buf, offset).expect("read_at");
            assert_eq!(n, 1);
            assert_eq!(buf[0], (offset % 256) as u8);
            let window_offset = file.window_offset();
            assert!(window_offset <= offset);
        }
        file.close().expect("close");
    }
}
