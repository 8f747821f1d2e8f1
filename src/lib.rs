//! # mmap-engine: a memory-mapped file engine
//!
//! This crate provides a conventional byte-oriented file handle whose
//! storage is a memory mapping of an on-disk file: read, write, positional
//! I/O, and seek. It is designed to be composed with a host filesystem that
//! supplies opened handles; it is not itself a filesystem.
//!
//! ## Features
//!
//! - **Zero-copy I/O**: reads and writes go straight through the mapping
//! - **Sliding windows**: large files map a bounded window that relocates on
//!   demand, transparently to the I/O surface
//! - **Durability policies**: immediate, periodic, on-close, or never
//! - **Truncation recovery**: a process-wide bus-fault registry detects
//!   external truncation and supports controlled remapping
//! - **Cross-platform**: Linux, macOS, BSDs, Windows via memmap2
//!
//! ## Quick Start
//!
//! ```no_run
//! use mmap_engine::{MapConfig, MapEngine, SyncPolicy};
//!
//! let engine = MapEngine::new(MapConfig::read_write(SyncPolicy::Immediate));
//! let file = engine.open("data.bin")?.mapped().expect("regular file");
//!
//! file.write_at(b"hello, mapping", 0)?;
//!
//! let mut buf = [0u8; 14];
//! file.read_at(&mut buf, 0)?;
//! assert_eq!(&buf, b"hello, mapping");
//!
//! file.close()?;
//! # Ok::<(), mmap_engine::MmapEngineError>(())
//! ```
//!
//! ## Modules
//!
//! - [`errors`]: error types for all engine operations
//! - [`config`]: mapping modes, durability policies, configuration
//! - [`handle`]: the host-filesystem handle contract
//! - [`file`]: the core [`MappedFile`] implementation
//! - [`advise`]: kernel access-pattern advice
//! - [`scheduler`]: periodic durability
//! - [`fault`]: bus-fault registry and truncation recovery
//! - [`shared`]: shared-memory regions for IPC
//! - [`manager`]: the configured [`MapEngine`] opener

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![deny(missing_docs)]
#![doc(html_root_url = "https://docs.rs/mmap-engine")]

pub mod advise;
pub mod config;
pub mod errors;
pub mod fault;
pub mod file;
pub mod handle;
pub mod manager;
pub mod scheduler;
pub mod shared;
pub mod utils;

mod mmap;
mod window;

pub use advise::MapAdvice;
pub use config::{MapConfig, MapMode, SyncPolicy, DEFAULT_WINDOW_SIZE};
pub use errors::MmapEngineError;
pub use file::{MappedFile, MappedView};
pub use handle::{FileHandle, RawDescriptor};
pub use manager::{map_path, MapEngine, Opened};
pub use scheduler::SyncScheduler;
pub use shared::{SharedRegion, SharedRegionConfig};
