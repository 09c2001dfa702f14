//! memslurp, a process memory dumper for Linux.
//!
//! A dump is one bounded pass over the target's address space: optionally attach with ptrace,
//! walk `/proc/<pid>/maps`, read every readable region from `/proc/<pid>/mem` and hand the
//! bytes to a writer, then detach.

#[cfg(target_os = "linux")]
mod error;
#[cfg(target_os = "linux")]
pub use error::{AttachError, RegionReadError, ScanError};

#[cfg(target_os = "linux")]
pub type ScanResult<T> = Result<T, ScanError>;

/// Functions to work with target processes: memory maps, ptrace attach/detach and raw memory reads.
#[cfg(target_os = "linux")]
pub mod target;

/// Orchestration of a whole dump pass.
#[cfg(target_os = "linux")]
pub mod scan;

#[cfg(target_os = "linux")]
pub use scan::{dump, RegionDump, ScanOptions, ScanSummary, DEFAULT_MAX_REGION_SIZE};
