//! Crate-specific error types for mmap-engine.

use std::io;
use thiserror::Error;

/// Result alias for mmap-engine operations.
pub type Result<T> = std::result::Result<T, MmapEngineError>;

/// Error type covering mapping, I/O-surface, durability, and fault-recovery
/// failures.
#[derive(Debug, Error)]
pub enum MmapEngineError {
    /// Wrapper for `std::io::Error` from the underlying handle.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A mapping primitive failed; `op` names the operation that observed it.
    #[error("{op} failed: {source}")]
    Map {
        /// Primitive operation name (e.g. `mmap`, `msync`, `madvise`).
        op: &'static str,
        /// Underlying OS error.
        source: io::Error,
    },

    /// A positional argument fell outside [0, file size).
    #[error("invalid offset {offset} (file size {size})")]
    InvalidOffset {
        /// The offending logical offset.
        offset: i64,
        /// The file size the offset was validated against.
        size: u64,
    },

    /// A write was attempted on a read-only mapping.
    #[error("cannot write to read-only mapping")]
    WriteToReadOnly,

    /// A write would extend past the end of the file (or of the current
    /// window); no bytes were written. The mapping never grows the file.
    #[error("short write: {requested} bytes at offset {offset} exceed limit {limit}")]
    ShortWrite {
        /// Bytes the caller asked to write.
        requested: usize,
        /// Logical offset of the write.
        offset: u64,
        /// First offset the write may not reach.
        limit: u64,
    },

    /// An operation requires an active mapping and none exists.
    #[error("file is not memory-mapped")]
    NotMapped,

    /// A window relocation failed to re-establish a mapping; all I/O fails
    /// until Close.
    #[error("mapping lost after failed window relocation")]
    MappingLost,

    /// The file on disk is smaller than the mapped size.
    #[error("file truncated while mapped: size decreased from {expected} to {observed}")]
    Truncated {
        /// Size recorded when the mapping was established.
        expected: u64,
        /// Size observed on disk.
        observed: u64,
    },

    /// Truncate was attempted while a mapping is live.
    #[error("cannot truncate a mapped file")]
    TruncateUnsupported,

    /// The operation is not implementable on the current platform, or the
    /// handle does not expose an OS descriptor to map from.
    #[error("not supported on this platform: {0}")]
    Unsupported(&'static str),

    /// The file handle has already been closed.
    #[error("file already closed")]
    Closed,

    /// The configuration is not usable as given.
    #[error("invalid configuration: {0}")]
    Config(&'static str),

    /// A write landed in memory but the immediate flush that follows it under
    /// `SyncPolicy::Immediate` failed. `written` bytes are visible in the
    /// mapping but their durability is not assured.
    #[error("wrote {written} bytes but immediate flush failed: {source}")]
    WriteFlush {
        /// Bytes copied into the mapping before the flush was attempted.
        written: usize,
        /// The flush failure.
        source: io::Error,
    },
}
