use super::{page_align_down, MemoryRegion};
use crate::RegionReadError;
use memmap::MmapOptions;
use nix::unistd::{self, Pid, Whence};
use std::{
    convert::TryFrom,
    fs::File,
    io::{Read, Seek, SeekFrom},
    os::unix::io::AsRawFd,
    path::{Path, PathBuf},
};
use tracing::trace;

/// Bytes read from one region. `data` may be shorter than the region if the read came up short.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionBytes {
    pub start: u64,
    pub end: u64,
    pub data: Vec<u8>,
}

impl RegionBytes {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// One way of fetching `size` bytes at absolute address `start` from a raw memory image.
///
/// Every attempt opens the image afresh, so nothing is held between regions.
pub trait ReadStrategy {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    fn read(&self, image: &Path, start: u64, size: usize) -> Result<Vec<u8>, RegionReadError>;
}

/// Checks that the whole window fits in a signed file offset.
fn checked_window(start: u64, size: usize) -> Result<u64, RegionReadError> {
    start
        .checked_add(size as u64)
        .filter(|&end| i64::try_from(end).is_ok())
        .ok_or(RegionReadError::Overflow {
            start,
            size: size as u64,
        })
}

/// Seeks to `start` and issues one read of `size` bytes. A short read is returned as is.
#[derive(Debug, Default, Clone, Copy)]
pub struct PositionedRead;

impl ReadStrategy for PositionedRead {
    fn name(&self) -> &'static str {
        "positioned-read"
    }

    fn read(&self, image: &Path, start: u64, size: usize) -> Result<Vec<u8>, RegionReadError> {
        checked_window(start, size)?;

        let mut file = File::open(image)?;
        file.seek(SeekFrom::Start(start))?;

        let mut data = vec![0; size];
        let read = file.read(&mut data)?;
        data.truncate(read);
        Ok(data)
    }
}

/// Maps the window into our address space and copies it out.
///
/// Only regular-file images get this far: `/proc/<pid>/mem` reports a length of zero, so every
/// window over it fails the bounds check and the cascade moves on.
#[derive(Debug, Default, Clone, Copy)]
pub struct MappedRead;

impl ReadStrategy for MappedRead {
    fn name(&self) -> &'static str {
        "mmap"
    }

    fn read(&self, image: &Path, start: u64, size: usize) -> Result<Vec<u8>, RegionReadError> {
        let end = checked_window(start, size)?;

        let file = File::open(image)?;

        // Touching a file mapping past EOF raises SIGBUS, so regular files are bounds-checked.
        let metadata = file.metadata()?;
        if metadata.is_file() && end > metadata.len() {
            return Err(RegionReadError::OutOfBounds {
                end,
                len: metadata.len(),
            });
        }

        // mmap offsets must be page aligned.
        let offset = page_align_down(start);
        let lead = (start - offset) as usize;
        let len = lead.checked_add(size).ok_or(RegionReadError::Overflow {
            start,
            size: size as u64,
        })?;

        // Safety: the mapping is read-only, private to this call and copied out immediately.
        let map = unsafe { MmapOptions::new().offset(offset).len(len).map(&file)? };
        Ok(map[lead..].to_vec())
    }
}

/// Reopens the image, positions it with `lseek64` and issues a single `read(2)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SeekRead;

impl ReadStrategy for SeekRead {
    fn name(&self) -> &'static str {
        "lseek64-read"
    }

    fn read(&self, image: &Path, start: u64, size: usize) -> Result<Vec<u8>, RegionReadError> {
        let file = File::open(image)?;
        let fd = file.as_raw_fd();

        // `/proc/<pid>/mem` treats offsets as unsigned, so addresses above `i64::MAX`
        // are passed through bit for bit. Ordinary files reject them with EINVAL.
        let pos = unistd::lseek64(fd, start as i64, Whence::SeekSet)?;
        if pos as u64 != start {
            return Err(RegionReadError::SeekMismatch {
                expected: start,
                actual: pos as u64,
            });
        }

        let mut data = vec![0; size];
        let read = unistd::read(fd, &mut data)?;
        data.truncate(read);
        Ok(data)
    }
}

/// The default cascade: positioned read, then mmap, then `lseek64` + `read`.
pub fn default_strategies() -> Vec<Box<dyn ReadStrategy>> {
    vec![
        Box::new(PositionedRead),
        Box::new(MappedRead),
        Box::new(SeekRead),
    ]
}

/// Reads whole regions from a raw memory image, trying each strategy in turn.
pub struct RegionReader {
    image: PathBuf,
    max_region_size: u64,
    strategies: Vec<Box<dyn ReadStrategy>>,
}

impl RegionReader {
    pub fn new(image: impl Into<PathBuf>, max_region_size: u64) -> Self {
        Self::with_strategies(image, max_region_size, default_strategies())
    }

    /// Reader for `/proc/<pid>/mem`.
    pub fn for_pid(pid: Pid, max_region_size: u64) -> Self {
        Self::new(super::mem_path(pid), max_region_size)
    }

    pub fn with_strategies(
        image: impl Into<PathBuf>,
        max_region_size: u64,
        strategies: Vec<Box<dyn ReadStrategy>>,
    ) -> Self {
        RegionReader {
            image: image.into(),
            max_region_size,
            strategies,
        }
    }

    pub fn image(&self) -> &Path {
        &self.image
    }

    pub fn max_region_size(&self) -> u64 {
        self.max_region_size
    }

    /// Number of bytes to read for `region`, or `None` if it is empty or above the size limit.
    pub fn region_size(&self, region: &MemoryRegion) -> Option<usize> {
        let size = region.size();
        if size == 0 || size > self.max_region_size {
            return None;
        }
        usize::try_from(size).ok()
    }

    /// Reads `region`, or returns `None` if it is out of bounds or every strategy failed.
    ///
    /// Strategy failures are logged at trace level and otherwise dropped.
    pub fn read_region(&self, region: &MemoryRegion) -> Option<RegionBytes> {
        let size = match self.region_size(region) {
            Some(size) => size,
            None => {
                trace!(%region, max = self.max_region_size, "skipping region by size");
                return None;
            }
        };

        for strategy in &self.strategies {
            match strategy.read(&self.image, region.start, size) {
                Ok(data) => {
                    trace!(%region, strategy = strategy.name(), len = data.len(), "read region");
                    return Some(RegionBytes {
                        start: region.start,
                        end: region.end,
                        data,
                    });
                }
                Err(err) => trace!(%region, strategy = strategy.name(), %err, "strategy failed"),
            }
        }

        trace!(%region, "all read strategies failed");
        None
    }
}
