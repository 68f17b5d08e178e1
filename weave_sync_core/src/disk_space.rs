//! Free disk space as a resource shared with the outside world (§5): every
//! periodic task that may write checks `free_bytes() > disk_data_buffer`
//! first and otherwise reschedules. The real free-space query is an
//! external collaborator (§1's "process-wide configuration" category); this
//! crate only needs the trait seam and a couple of reference implementations
//! for tests.

use std::path::{Path, PathBuf};

pub trait DiskSpaceMonitor: Send + Sync {
    fn free_bytes(&self) -> u64;
}

/// A free-space query for `root`. Stable Rust has no portable
/// `statvfs`-equivalent in `std::fs`, and pulling in a crate for one `u64`
/// isn't worth it here, so this reference implementation is deliberately
/// conservative and reports `u64::MAX`. A host integrator is expected to
/// supply a real `statvfs`-backed monitor.
pub struct UnboundedDiskSpaceMonitor {
    #[allow(dead_code)]
    root: PathBuf,
}

impl UnboundedDiskSpaceMonitor {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }
}

impl DiskSpaceMonitor for UnboundedDiskSpaceMonitor {
    fn free_bytes(&self) -> u64 {
        u64::MAX
    }
}

/// Fixed reading, used by tests that need to simulate a full disk.
pub struct FixedDiskSpaceMonitor(pub u64);

impl DiskSpaceMonitor for FixedDiskSpaceMonitor {
    fn free_bytes(&self) -> u64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_monitor_reports_the_configured_value() {
        let monitor = FixedDiskSpaceMonitor(42);
        assert_eq!(monitor.free_bytes(), 42);
    }
}
