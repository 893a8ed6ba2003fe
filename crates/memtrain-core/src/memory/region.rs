use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Page protection of a region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Protection {
    pub read: bool,
    pub write: bool,
    pub execute: bool,
}

impl Protection {
    pub const NONE: Self = Self {
        read: false,
        write: false,
        execute: false,
    };
    pub const READ_ONLY: Self = Self {
        read: true,
        write: false,
        execute: false,
    };
    pub const READ_WRITE: Self = Self {
        read: true,
        write: true,
        execute: false,
    };
    pub const READ_EXECUTE: Self = Self {
        read: true,
        write: false,
        execute: true,
    };
}

impl fmt::Display for Protection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            if self.read { 'r' } else { '-' },
            if self.write { 'w' } else { '-' },
            if self.execute { 'x' } else { '-' }
        )
    }
}

/// A committed range of the target's address space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRegion {
    pub base: u64,
    pub size: u64,
    pub protection: Protection,
}

impl MemoryRegion {
    pub fn end(&self) -> u64 {
        self.base.saturating_add(self.size)
    }

    pub fn contains(&self, address: u64) -> bool {
        address >= self.base && address < self.end()
    }

    pub fn is_readable(&self) -> bool {
        self.protection.read
    }
}

/// Which regions a scan visits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, EnumString, Display)]
#[strum(ascii_case_insensitive)]
pub enum RegionFilter {
    #[default]
    #[strum(to_string = "exec", serialize = "executable", serialize = "x")]
    Executable,
    #[strum(to_string = "read", serialize = "readable", serialize = "r")]
    Readable,
    #[strum(to_string = "write", serialize = "writable", serialize = "w")]
    Writable,
}

impl RegionFilter {
    /// Regions that pass are always readable.
    pub fn accepts(&self, region: &MemoryRegion) -> bool {
        let p = region.protection;
        p.read
            && match self {
                Self::Executable => p.execute,
                Self::Readable => true,
                Self::Writable => p.write,
            }
    }
}

/// Merge contiguous accepted regions into `(base, size)` runs.
///
/// `regions` must be sorted by base address.
pub fn contiguous_runs(regions: &[MemoryRegion], filter: RegionFilter) -> Vec<(u64, u64)> {
    let mut runs: Vec<(u64, u64)> = Vec::new();
    for region in regions.iter().filter(|r| filter.accepts(r) && r.size > 0) {
        match runs.last_mut() {
            Some((base, size)) if *base + *size == region.base => *size += region.size,
            _ => runs.push((region.base, region.size)),
        }
    }
    runs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(base: u64, size: u64, protection: Protection) -> MemoryRegion {
        MemoryRegion {
            base,
            size,
            protection,
        }
    }

    #[test]
    fn test_protection_display() {
        assert_eq!(Protection::READ_EXECUTE.to_string(), "r-x");
        assert_eq!(Protection::READ_WRITE.to_string(), "rw-");
        assert_eq!(Protection::NONE.to_string(), "---");
    }

    #[test]
    fn test_filter_accepts() {
        let code = region(0x1000, 0x1000, Protection::READ_EXECUTE);
        let data = region(0x2000, 0x1000, Protection::READ_WRITE);
        let guard = region(0x3000, 0x1000, Protection::NONE);

        assert!(RegionFilter::Executable.accepts(&code));
        assert!(!RegionFilter::Executable.accepts(&data));
        assert!(RegionFilter::Readable.accepts(&data));
        assert!(RegionFilter::Writable.accepts(&data));
        assert!(!RegionFilter::Readable.accepts(&guard));
    }

    #[test]
    fn test_filter_from_str() {
        assert_eq!("exec".parse::<RegionFilter>().unwrap(), RegionFilter::Executable);
        assert_eq!("READ".parse::<RegionFilter>().unwrap(), RegionFilter::Readable);
        assert!("bogus".parse::<RegionFilter>().is_err());
    }

    #[test]
    fn test_contiguous_runs() {
        let regions = [
            region(0x1000, 0x1000, Protection::READ_EXECUTE),
            region(0x2000, 0x1000, Protection::READ_EXECUTE),
            region(0x3000, 0x1000, Protection::READ_WRITE),
            region(0x5000, 0x1000, Protection::READ_EXECUTE),
        ];

        let runs = contiguous_runs(&regions, RegionFilter::Executable);
        assert_eq!(runs, vec![(0x1000, 0x2000), (0x5000, 0x1000)]);

        let readable = contiguous_runs(&regions, RegionFilter::Readable);
        assert_eq!(readable, vec![(0x1000, 0x3000), (0x5000, 0x1000)]);
    }
}
