use crate::target::TraceOp;
use nix::{errno::Errno, unistd::Pid};
use std::{io, path::PathBuf};
use thiserror::Error;

/// A ptrace attach or detach request was refused by the kernel.
#[derive(Error, Debug)]
#[error("ptrace({op}) on pid {pid} failed: {errno}")]
pub struct AttachError {
    pub op: TraceOp,
    pub pid: Pid,
    pub errno: Errno,
}

impl AttachError {
    pub fn new(op: TraceOp, pid: Pid, errno: Errno) -> Self {
        AttachError { op, pid, errno }
    }

    /// Raw OS error code reported by the failed call.
    pub fn os_error_code(&self) -> i32 {
        self.errno as i32
    }
}

/// Failure of a single read strategy on a single region.
/// These never leave the region reader; the region is skipped instead.
#[derive(Error, Debug)]
pub enum RegionReadError {
    #[error("{0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Sys(#[from] Errno),

    #[error("region at {start:#x} with size {size:#x} overflows the file offset range")]
    Overflow { start: u64, size: u64 },

    #[error("seek to {expected:#x} landed at {actual:#x}")]
    SeekMismatch { expected: u64, actual: u64 },

    #[error("region ends at {end:#x}, past the end of the image ({len:#x} bytes)")]
    OutOfBounds { end: u64, len: u64 },
}

/// Failures that abort a dump pass.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("failed to attach to target: {0}")]
    Attach(#[from] AttachError),

    #[error("cannot read {}: {source}", path.display())]
    MapAccess { path: PathBuf, source: io::Error },

    #[error("failed to write region data: {0}")]
    Output(#[source] io::Error),
}
