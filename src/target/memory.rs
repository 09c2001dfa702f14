//! Utility functions to work with memory pages.

lazy_static::lazy_static! {
    /// Memory page size from system configuration.
    pub static ref PAGE_SIZE: usize = unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize };
}

/// Rounds `addr` down to the start of the page containing it.
pub fn page_align_down(addr: u64) -> u64 {
    addr & !(*PAGE_SIZE as u64 - 1)
}
