//! Parsing of `/proc/<pid>/maps` style listings.

use lazy_static::lazy_static;
use regex::Regex;
use std::{
    fmt,
    fs::File,
    io::{self, BufRead, BufReader},
    path::Path,
};

lazy_static! {
    // Offset, device, inode and path follow the flags in real listings and are ignored.
    static ref MAPS_LINE: Regex =
        Regex::new(r"^([0-9A-Fa-f]+)-([0-9A-Fa-f]+)\s+([rwxps-]{4})").unwrap();
}

/// The four permission characters of a mapping, e.g. `r-xp`.
///
/// Positions conventionally mean readable, writable, executable and private/shared,
/// but only the literal characters are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Permissions([u8; 4]);

impl Permissions {
    fn from_flags(flags: &str) -> Option<Self> {
        let bytes = flags.as_bytes();
        if bytes.len() != 4 {
            return None;
        }
        Some(Permissions([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn is_readable(&self) -> bool {
        self.0.contains(&b'r')
    }

    pub fn is_writable(&self) -> bool {
        self.0.contains(&b'w')
    }

    pub fn is_executable(&self) -> bool {
        self.0.contains(&b'x')
    }

    pub fn is_private(&self) -> bool {
        self.0[3] == b'p'
    }

    pub fn is_shared(&self) -> bool {
        self.0[3] == b's'
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &flag in &self.0 {
            write!(f, "{}", flag as char)?;
        }
        Ok(())
    }
}

impl PartialEq<str> for Permissions {
    fn eq(&self, other: &str) -> bool {
        self.0 == other.as_bytes()
    }
}

impl PartialEq<&str> for Permissions {
    fn eq(&self, other: &&str) -> bool {
        self.0 == other.as_bytes()
    }
}

/// One line of a memory map listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryRegion {
    pub start: u64,
    pub end: u64,
    pub perms: Permissions,
}

impl MemoryRegion {
    /// Declared size of the region. Inverted or empty ranges have size zero.
    pub fn size(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_readable(&self) -> bool {
        self.perms.is_readable()
    }
}

impl fmt::Display for MemoryRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}-{:016x} {}", self.start, self.end, self.perms)
    }
}

/// Parses a single listing line.
///
/// Returns `None` for anything that doesn't start with `<hex>-<hex> <flags>`, including
/// addresses too large for 64 bits.
pub fn parse_line(line: &str) -> Option<MemoryRegion> {
    let caps = MAPS_LINE.captures(line)?;
    let start = u64::from_str_radix(&caps[1], 16).ok()?;
    let end = u64::from_str_radix(&caps[2], 16).ok()?;
    let perms = Permissions::from_flags(&caps[3])?;

    Some(MemoryRegion { start, end, perms })
}

/// Lazily yields the regions of a listing, one line at a time.
///
/// Lines that don't parse are skipped. Invalid UTF-8 is replaced rather than rejected.
/// The reader is single-pass and stops after the first I/O error.
pub struct MapsReader<R> {
    source: R,
    line: Vec<u8>,
    done: bool,
}

impl<R: BufRead> MapsReader<R> {
    pub fn new(source: R) -> Self {
        MapsReader {
            source,
            line: Vec::new(),
            done: false,
        }
    }
}

impl<R: BufRead> Iterator for MapsReader<R> {
    type Item = io::Result<MemoryRegion>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            self.line.clear();
            match self.source.read_until(b'\n', &mut self.line) {
                Ok(0) => self.done = true,
                Ok(_) => {
                    if let Some(region) = parse_line(&String::from_utf8_lossy(&self.line)) {
                        return Some(Ok(region));
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            }
        }
        None
    }
}

/// Streams the regions described by `source`.
pub fn regions<R: BufRead>(source: R) -> MapsReader<R> {
    MapsReader::new(source)
}

/// Opens a listing file, e.g. `/proc/<pid>/maps`.
pub fn open_maps(path: &Path) -> io::Result<MapsReader<BufReader<File>>> {
    Ok(MapsReader::new(BufReader::new(File::open(path)?)))
}
