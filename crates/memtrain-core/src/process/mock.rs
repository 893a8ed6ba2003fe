//! In-memory process backend for tests.

use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use super::{ModuleInfo, PointerWidth, ProcessBackend};
use crate::error::{Error, Result};
use crate::memory::{MemoryRegion, Protection};

struct MockRegion {
    base: u64,
    data: Vec<u8>,
    protection: Protection,
}

impl MockRegion {
    fn end(&self) -> u64 {
        self.base + self.data.len() as u64
    }

    fn slice_range(&self, address: u64, len: usize) -> Option<std::ops::Range<usize>> {
        let end = address.checked_add(len as u64)?;
        if address < self.base || end > self.end() {
            return None;
        }
        let start = (address - self.base) as usize;
        Some(start..start + len)
    }
}

struct MockState {
    regions: Vec<MockRegion>,
    modules: Vec<ModuleInfo>,
    faults: Vec<Range<u64>>,
}

/// A fake target process whose memory lives in this test process.
///
/// Clones share state, so a test can keep one copy to play the "external
/// actor" while the trainer owns another through its handle.
#[derive(Clone)]
pub struct MockProcess {
    pid: u32,
    width: PointerWidth,
    alive: Arc<AtomicBool>,
    liveness_checks: Arc<AtomicUsize>,
    state: Arc<RwLock<MockState>>,
}

impl MockProcess {
    /// Simulate the target exiting.
    pub fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    /// Write bytes regardless of protection, as the target itself would.
    pub fn poke(&self, address: u64, data: &[u8]) {
        let mut state = self.state.write().unwrap();
        let region = state
            .regions
            .iter_mut()
            .find(|r| r.slice_range(address, data.len()).is_some())
            .unwrap_or_else(|| panic!("poke outside mapped memory at {address:#x}"));
        let range = region.slice_range(address, data.len()).unwrap();
        region.data[range].copy_from_slice(data);
    }

    pub fn poke_i32(&self, address: u64, value: i32) {
        self.poke(address, &value.to_le_bytes());
    }

    pub fn poke_u64(&self, address: u64, value: u64) {
        self.poke(address, &value.to_le_bytes());
    }

    /// Write a pointer using the process' native width.
    pub fn poke_ptr(&self, address: u64, value: u64) {
        match self.width {
            PointerWidth::Bits32 => self.poke(address, &(value as u32).to_le_bytes()),
            PointerWidth::Bits64 => self.poke_u64(address, value),
        }
    }

    pub fn peek(&self, address: u64, len: usize) -> Vec<u8> {
        let state = self.state.read().unwrap();
        let region = state
            .regions
            .iter()
            .find(|r| r.slice_range(address, len).is_some())
            .unwrap_or_else(|| panic!("peek outside mapped memory at {address:#x}"));
        region.data[region.slice_range(address, len).unwrap()].to_vec()
    }

    pub fn peek_i32(&self, address: u64) -> i32 {
        let bytes = self.peek(address, 4);
        i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    /// Make reads touching `range` fault while the regions still report
    /// it readable, like a page that goes away mid-scan.
    pub fn inject_fault(&self, range: Range<u64>) {
        self.state.write().unwrap().faults.push(range);
    }

    /// Number of times the backend was asked whether the target lives.
    pub fn liveness_checks(&self) -> usize {
        self.liveness_checks.load(Ordering::SeqCst)
    }

    /// Remove the region starting at `base`.
    pub fn unmap(&self, base: u64) {
        self.state.write().unwrap().regions.retain(|r| r.base != base);
    }
}

impl ProcessBackend for MockProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn pointer_width(&self) -> PointerWidth {
        self.width
    }

    fn is_alive(&self) -> bool {
        self.liveness_checks.fetch_add(1, Ordering::SeqCst);
        self.alive.load(Ordering::SeqCst)
    }

    fn read_into(&self, address: u64, buf: &mut [u8]) -> Result<()> {
        let violation = Error::AccessViolation {
            address,
            size: buf.len(),
        };
        if !self.alive.load(Ordering::SeqCst) {
            return Err(violation);
        }
        let state = self.state.read().unwrap();
        let end = address + buf.len() as u64;
        if state.faults.iter().any(|f| f.start < end && address < f.end) {
            return Err(violation);
        }
        let mut done = 0;
        while done < buf.len() {
            let cursor = address + done as u64;
            let region = state
                .regions
                .iter()
                .find(|r| cursor >= r.base && cursor < r.end() && r.protection.read)
                .ok_or(Error::AccessViolation {
                    address,
                    size: buf.len(),
                })?;
            let start = (cursor - region.base) as usize;
            let len = (region.data.len() - start).min(buf.len() - done);
            buf[done..done + len].copy_from_slice(&region.data[start..start + len]);
            done += len;
        }
        Ok(())
    }

    fn write_from(&self, address: u64, data: &[u8]) -> Result<()> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(Error::AccessViolation {
                address,
                size: data.len(),
            });
        }
        let mut state = self.state.write().unwrap();
        // validate the whole span before touching anything
        let mut cursor = address;
        let end = address + data.len() as u64;
        while cursor < end {
            let region = state
                .regions
                .iter()
                .find(|r| cursor >= r.base && cursor < r.end() && r.protection.write)
                .ok_or(Error::AccessViolation {
                    address,
                    size: data.len(),
                })?;
            cursor = region.end().min(end);
        }

        let mut done = 0;
        while done < data.len() {
            let cursor = address + done as u64;
            let Some(region) = state
                .regions
                .iter_mut()
                .find(|r| cursor >= r.base && cursor < r.end())
            else {
                break;
            };
            let start = (cursor - region.base) as usize;
            let len = (region.data.len() - start).min(data.len() - done);
            region.data[start..start + len].copy_from_slice(&data[done..done + len]);
            done += len;
        }
        Ok(())
    }

    fn regions(&self) -> Result<Vec<MemoryRegion>> {
        let state = self.state.read().unwrap();
        let mut regions: Vec<MemoryRegion> = state
            .regions
            .iter()
            .map(|r| MemoryRegion {
                base: r.base,
                size: r.data.len() as u64,
                protection: r.protection,
            })
            .collect();
        regions.sort_by_key(|r| r.base);
        Ok(regions)
    }

    fn modules(&self) -> Result<Vec<ModuleInfo>> {
        Ok(self.state.read().unwrap().modules.clone())
    }
}

/// Builder for [`MockProcess`]
pub struct MockProcessBuilder {
    pid: u32,
    width: PointerWidth,
    regions: Vec<MockRegion>,
    modules: Vec<ModuleInfo>,
}

impl MockProcessBuilder {
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            width: PointerWidth::Bits64,
            regions: Vec::new(),
            modules: Vec::new(),
        }
    }

    pub fn width(mut self, width: PointerWidth) -> Self {
        self.width = width;
        self
    }

    /// Add a zero-filled read/write region.
    pub fn region(self, base: u64, size: usize) -> Self {
        self.region_with(base, size, Protection::READ_WRITE)
    }

    pub fn region_with(mut self, base: u64, size: usize, protection: Protection) -> Self {
        self.regions.push(MockRegion {
            base,
            data: vec![0; size],
            protection,
        });
        self
    }

    /// Register a module image; pair it with a region covering the range.
    pub fn module(mut self, name: &str, base: u64, size: u64) -> Self {
        self.modules.push(ModuleInfo {
            name: name.to_string(),
            base,
            size,
        });
        self
    }

    pub fn build(self) -> MockProcess {
        MockProcess {
            pid: self.pid,
            width: self.width,
            alive: Arc::new(AtomicBool::new(true)),
            liveness_checks: Arc::new(AtomicUsize::new(0)),
            state: Arc::new(RwLock::new(MockState {
                regions: self.regions,
                modules: self.modules,
                faults: Vec::new(),
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_spans_adjacent_regions() {
        let process = MockProcessBuilder::new(1)
            .region(0x1000, 0x10)
            .region(0x1010, 0x10)
            .build();
        process.write_from(0x100E, &[1, 2, 3, 4]).unwrap();

        let mut buf = [0u8; 4];
        process.read_into(0x100E, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
        assert_eq!(process.peek(0x1010, 2), vec![3, 4]);
    }

    #[test]
    fn test_gap_and_protection_fault() {
        let process = MockProcessBuilder::new(1)
            .region(0x1000, 0x10)
            .region_with(0x1010, 0x10, Protection::READ_ONLY)
            .build();
        let mut buf = [0u8; 4];
        assert!(process.read_into(0x101E, &mut buf).is_err());
        assert!(process.write_from(0x100E, &[1, 2, 3, 4]).is_err());
        // rejected writes leave memory untouched
        assert_eq!(process.peek(0x100E, 2), vec![0, 0]);
    }
}
