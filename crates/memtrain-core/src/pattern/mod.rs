//! Byte-pattern (AOB) scanning over the target's regions.

mod signature;

use std::ops::ControlFlow;

use memchr::memchr_iter;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::memory::{ReadMemory, RegionFilter, contiguous_runs, walk_chunks};

pub use signature::{Pattern, PatternByte, format_pattern, parse_pattern};

/// Start address of a pattern occurrence
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct PatternMatch {
    pub address: u64,
}

/// Scans the target's memory for byte signatures
pub struct PatternScanner<'a, R: ReadMemory + ?Sized> {
    reader: &'a R,
    chunk_size: usize,
}

impl<'a, R: ReadMemory + ?Sized> PatternScanner<'a, R> {
    pub fn new(reader: &'a R, chunk_size: usize) -> Self {
        Self { reader, chunk_size }
    }

    /// Every occurrence of `pattern` in regions accepted by `filter`, in
    /// ascending address order. With `first_only` the scan stops at the
    /// lowest match.
    pub fn scan(
        &self,
        pattern: &Pattern,
        filter: RegionFilter,
        first_only: bool,
    ) -> Result<Vec<PatternMatch>> {
        let regions = self.reader.enumerate_regions()?;
        let runs = contiguous_runs(&regions, filter);
        let overlap = pattern.len() - 1;
        // A chunk must hold at least one full window past the carried tail.
        let chunk_size = self.chunk_size.max(pattern.len());

        debug!(
            "Pattern scan: {} ({} bytes) over {} {} runs",
            pattern,
            pattern.len(),
            runs.len(),
            filter
        );

        let mut results = Vec::new();
        for (base, size) in runs {
            let flow = walk_chunks(self.reader, base, size, chunk_size, overlap, |addr, data| {
                find_matches(data, addr, pattern, first_only, &mut results)
            })?;
            if flow.is_break() {
                break;
            }
        }

        info!("Pattern {} matched {} location(s)", pattern, results.len());
        Ok(results)
    }

    /// Follow a RIP-relative operand: the 32-bit displacement stored at
    /// `address + disp_offset` is relative to the end of the instruction at
    /// `address` that is `instr_len` bytes long.
    pub fn resolve_relative(&self, address: u64, disp_offset: usize, instr_len: usize) -> Result<u64> {
        if disp_offset + 4 > instr_len {
            return Err(Error::InvalidArgument(format!(
                "displacement at +{} does not fit a {}-byte instruction",
                disp_offset, instr_len
            )));
        }

        let disp = self.reader.read_i32(address + disp_offset as u64)?;
        let next_ip = address + instr_len as u64;
        Ok(next_ip.wrapping_add_signed(disp as i64))
    }
}

fn find_matches(
    buffer: &[u8],
    base_addr: u64,
    pattern: &Pattern,
    first_only: bool,
    results: &mut Vec<PatternMatch>,
) -> ControlFlow<()> {
    if buffer.len() < pattern.len() {
        return ControlFlow::Continue(());
    }

    let (anchor, anchor_byte) = pattern.anchor();
    let last = buffer.len() - pattern.len();

    for i in memchr_iter(anchor_byte, &buffer[anchor..=anchor + last]) {
        if pattern.matches(&buffer[i..i + pattern.len()]) {
            results.push(PatternMatch {
                address: base_addr + i as u64,
            });
            if first_only {
                return ControlFlow::Break(());
            }
        }
    }

    ControlFlow::Continue(())
}
