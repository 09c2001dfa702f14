use crate::{
    target::{
        self, open_maps, AttachGuard, MapsReader, Ptrace, ReadStrategy, RegionBytes,
        RegionReader, Tracer,
    },
    ScanError, ScanResult,
};
use nix::unistd::Pid;
use std::{
    fs::File,
    io::{BufReader, Write},
    path::PathBuf,
};
use tracing::{debug, trace};

/// Regions declared larger than this are skipped unless configured otherwise.
pub const DEFAULT_MAX_REGION_SIZE: u64 = 10_000_000;

/// Settings for one dump pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOptions {
    /// Freeze the target with ptrace for the duration of the pass.
    pub attach: bool,
    /// Upper bound on the declared size of a region that will be read.
    pub max_region_size: u64,
    /// Memory map listing to walk instead of `/proc/<pid>/maps`.
    pub maps_path: Option<PathBuf>,
    /// Raw memory image to read instead of `/proc/<pid>/mem`.
    pub mem_path: Option<PathBuf>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        ScanOptions {
            attach: false,
            max_region_size: DEFAULT_MAX_REGION_SIZE,
            maps_path: None,
            mem_path: None,
        }
    }
}

impl ScanOptions {
    pub fn with_attach(mut self, attach: bool) -> Self {
        self.attach = attach;
        self
    }

    pub fn with_max_region_size(mut self, max_region_size: u64) -> Self {
        self.max_region_size = max_region_size;
        self
    }

    pub fn with_maps_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.maps_path = Some(path.into());
        self
    }

    pub fn with_mem_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.mem_path = Some(path.into());
        self
    }

    pub fn maps_path(&self, pid: Pid) -> PathBuf {
        self.maps_path
            .clone()
            .unwrap_or_else(|| target::maps_path(pid))
    }

    pub fn mem_path(&self, pid: Pid) -> PathBuf {
        self.mem_path.clone().unwrap_or_else(|| target::mem_path(pid))
    }
}

/// Counters collected over a pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// Regions parsed from the listing.
    pub regions_seen: u64,
    /// Regions whose bytes were produced.
    pub regions_read: u64,
    /// Regions that were unreadable, out of bounds or failed every read strategy.
    pub regions_skipped: u64,
    /// Bytes handed to the writer.
    pub bytes_written: u64,
}

/// A single pass over a target's memory, yielding the bytes of each readable region in map order.
///
/// The target stays attached (if requested) until the dump is dropped or fully written.
pub struct RegionDump<'t, T: Tracer + ?Sized = Ptrace> {
    maps: MapsReader<BufReader<File>>,
    maps_path: PathBuf,
    reader: RegionReader,
    summary: ScanSummary,
    failed: bool,
    // Dropped last, so the target is detached after every file is closed.
    guard: AttachGuard<'t, T>,
}

impl RegionDump<'static, Ptrace> {
    /// Starts a pass over `pid` using the system ptrace facility.
    pub fn open(pid: Pid, options: &ScanOptions) -> ScanResult<Self> {
        Self::with_tracer(Ptrace::global(), pid, options)
    }
}

impl<'t, T: Tracer + ?Sized> RegionDump<'t, T> {
    /// Starts a pass over `pid`, attaching through `tracer` when `options.attach` is set.
    ///
    /// Fails if the attach is refused or if either the map listing or the memory image
    /// cannot be opened. No region is read before this returns.
    pub fn with_tracer(tracer: &'t T, pid: Pid, options: &ScanOptions) -> ScanResult<Self> {
        let guard = AttachGuard::acquire(tracer, pid, options.attach)?;

        let maps_path = options.maps_path(pid);
        let maps = open_maps(&maps_path).map_err(|source| ScanError::MapAccess {
            path: maps_path.clone(),
            source,
        })?;

        // Each read strategy reopens the image, this only checks that it can be opened at all.
        let mem_path = options.mem_path(pid);
        File::open(&mem_path).map_err(|source| ScanError::MapAccess {
            path: mem_path.clone(),
            source,
        })?;

        debug!(
            %pid,
            maps = %maps_path.display(),
            mem = %mem_path.display(),
            attached = guard.is_attached(),
            max_region_size = options.max_region_size,
            "starting memory dump"
        );

        Ok(RegionDump {
            maps,
            maps_path,
            reader: RegionReader::new(mem_path, options.max_region_size),
            summary: ScanSummary::default(),
            failed: false,
            guard,
        })
    }

    /// Replaces the read strategy cascade.
    pub fn with_strategies(mut self, strategies: Vec<Box<dyn ReadStrategy>>) -> Self {
        self.reader = RegionReader::with_strategies(
            self.reader.image().to_path_buf(),
            self.reader.max_region_size(),
            strategies,
        );
        self
    }

    pub fn pid(&self) -> Pid {
        self.guard.pid()
    }

    pub fn summary(&self) -> ScanSummary {
        self.summary
    }

    /// Writes every remaining region to `sink`, back to back and without framing.
    ///
    /// Bytes already written stay written if a later write fails.
    pub fn write_to<W: Write + ?Sized>(mut self, sink: &mut W) -> ScanResult<ScanSummary> {
        while let Some(region) = self.next() {
            let region = region?;
            sink.write_all(&region.data).map_err(ScanError::Output)?;
            self.summary.bytes_written += region.data.len() as u64;
        }
        sink.flush().map_err(ScanError::Output)?;

        debug!(pid = %self.pid(), summary = ?self.summary, "memory dump finished");
        Ok(self.summary)
    }
}

impl<T: Tracer + ?Sized> Iterator for RegionDump<'_, T> {
    type Item = ScanResult<RegionBytes>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        for region in &mut self.maps {
            let region = match region {
                Ok(region) => region,
                Err(source) => {
                    self.failed = true;
                    return Some(Err(ScanError::MapAccess {
                        path: self.maps_path.clone(),
                        source,
                    }));
                }
            };
            self.summary.regions_seen += 1;

            if !region.is_readable() {
                trace!(%region, "skipping unreadable region");
                self.summary.regions_skipped += 1;
                continue;
            }

            match self.reader.read_region(&region) {
                Some(bytes) => {
                    self.summary.regions_read += 1;
                    return Some(Ok(bytes));
                }
                None => self.summary.regions_skipped += 1,
            }
        }

        None
    }
}

/// Dumps every readable region of `pid` into `sink`.
pub fn dump<W: Write + ?Sized>(
    pid: Pid,
    options: &ScanOptions,
    sink: &mut W,
) -> ScanResult<ScanSummary> {
    RegionDump::open(pid, options)?.write_to(sink)
}
