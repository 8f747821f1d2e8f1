//! The host-filesystem file handle contract consumed by the engine.
//!
//! The engine does not open paths itself; the host filesystem hands it an
//! already-opened handle. The handle must expose its size, positional I/O,
//! durability, and the raw OS descriptor the mapping is established from.
//! Handles that cannot produce a descriptor are refused at open time.

use std::fs::File;
use std::io;

/// Raw OS descriptor a mapping is established from.
#[cfg(unix)]
pub type RawDescriptor = std::os::unix::io::RawFd;

/// Raw OS descriptor a mapping is established from.
#[cfg(windows)]
pub type RawDescriptor = std::os::windows::io::RawHandle;

/// Copy of a raw descriptor that the engine shares across threads.
///
/// A raw descriptor is only an OS identifier. Sharing is sound because the
/// handle that owns it stays open for as long as any mapping established
/// from it is live.
#[derive(Clone, Copy, Debug)]
pub(crate) struct SharedDescriptor(pub(crate) RawDescriptor);

// SAFETY: see above; the identifier itself carries no thread affinity.
unsafe impl Send for SharedDescriptor {}
unsafe impl Sync for SharedDescriptor {}

/// An opened file provided by the host filesystem.
///
/// The engine reconciles the logical cursor itself, so the contract is purely
/// positional: there is no seek method. `close` consumes the handle; for
/// handle types whose close cannot fail, the default implementation (drop)
/// suffices.
pub trait FileHandle: Send + Sync {
    /// Current size of the file in bytes, as observed on disk.
    fn size(&self) -> io::Result<u64>;

    /// Whether the handle refers to a directory. Directories are never
    /// mapped; they pass through the engine unwrapped.
    fn is_directory(&self) -> io::Result<bool> {
        Ok(false)
    }

    /// Read up to `buf.len()` bytes at `offset`, without any cursor.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize>;

    /// Write `buf` at `offset`, without any cursor.
    fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<usize>;

    /// Flush file content to stable storage.
    fn sync(&self) -> io::Result<()>;

    /// Change the size of the file. Only invoked while no mapping is live.
    fn set_len(&self, size: u64) -> io::Result<()>;

    /// The raw OS descriptor, or `None` when the handle cannot expose one.
    fn raw_descriptor(&self) -> Option<RawDescriptor>;

    /// Close the handle, reporting any error the close observes.
    fn close(self: Box<Self>) -> io::Result<()> {
        Ok(())
    }
}

impl FileHandle for File {
    fn size(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn is_directory(&self) -> io::Result<bool> {
        Ok(self.metadata()?.is_dir())
    }

    #[cfg(unix)]
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        std::os::unix::fs::FileExt::read_at(self, buf, offset)
    }

    #[cfg(windows)]
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        std::os::windows::fs::FileExt::seek_read(self, buf, offset)
    }

    #[cfg(unix)]
    fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<usize> {
        std::os::unix::fs::FileExt::write_at(self, buf, offset)
    }

    #[cfg(windows)]
    fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<usize> {
        std::os::windows::fs::FileExt::seek_write(self, buf, offset)
    }

    fn sync(&self) -> io::Result<()> {
        self.sync_all()
    }

    fn set_len(&self, size: u64) -> io::Result<()> {
        File::set_len(self, size)
    }

    #[cfg(unix)]
    fn raw_descriptor(&self) -> Option<RawDescriptor> {
        use std::os::unix::io::AsRawFd;
        Some(self.as_raw_fd())
    }

    #[cfg(windows)]
    fn raw_descriptor(&self) -> Option<RawDescriptor> {
        use std::os::windows::io::AsRawHandle;
        Some(self.as_raw_handle())
    }

    fn close(self: Box<Self>) -> io::Result<()> {
        // Dropping a File discards close errors; sync_all first would change
        // durability semantics, so closing simply drops.
        drop(self);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn file_handle_positional_io() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("handle.bin");
        let mut f = File::create(&path).expect("create");
        f.write_all(b"0123456789").expect("write");
        drop(f);

        let handle: Box<dyn FileHandle> = Box::new(
            std::fs::OpenOptions::new()
                .read(true)
                .write(true)
                .open(&path)
                .expect("open"),
        );
        assert_eq!(handle.size().expect("size"), 10);
        assert!(handle.raw_descriptor().is_some());

        let mut buf = [0u8; 4];
        let n = handle.read_at(&mut buf, 3).expect("read_at");
        assert_eq!(n, 4);
        assert_eq!(&buf, b"3456");

        handle.write_at(b"xy", 0).expect("write_at");
        let mut buf = [0u8; 2];
        handle.read_at(&mut buf, 0).expect("read_at");
        assert_eq!(&buf, b"xy");

        handle.close().expect("close");
    }
}
