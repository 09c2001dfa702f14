mod attach;
mod maps;
mod memory;
mod readmem;

pub use attach::{AttachGuard, Ptrace, TraceOp, Tracer};
pub use maps::{open_maps, parse_line, regions, MapsReader, MemoryRegion, Permissions};
pub use memory::{page_align_down, PAGE_SIZE};
pub use readmem::{
    default_strategies, MappedRead, PositionedRead, ReadStrategy, RegionBytes, RegionReader,
    SeekRead,
};

use nix::unistd::Pid;
use std::path::PathBuf;

/// Location of the memory map listing of `pid`.
pub fn maps_path(pid: Pid) -> PathBuf {
    PathBuf::from(format!("/proc/{}/maps", pid))
}

/// Location of the raw memory image of `pid`.
pub fn mem_path(pid: Pid) -> PathBuf {
    PathBuf::from(format!("/proc/{}/mem", pid))
}
