//! Chunked reads over an address range with a bounded buffer.

use std::ops::ControlFlow;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::memory::ReadMemory;

/// Granularity of the retry after a chunk faults
const PAGE_SIZE: u64 = 0x1000;

/// Walk `[base, base + size)` in reads of at most `chunk_size` bytes.
///
/// Each call to `visit` receives the absolute address of the first byte in
/// the slice. When `overlap > 0` the last `overlap` bytes of the previous
/// chunk are prepended so a needle of length `overlap + 1` straddling a
/// chunk boundary is still seen exactly once.
///
/// A chunk that faults is retried page by page; unreadable pages are
/// skipped (and logged) and the walk carries on past them. Lifecycle
/// errors propagate.
pub fn walk_chunks<R, F>(
    reader: &R,
    base: u64,
    size: u64,
    chunk_size: usize,
    overlap: usize,
    mut visit: F,
) -> Result<ControlFlow<()>>
where
    R: ReadMemory + ?Sized,
    F: FnMut(u64, &[u8]) -> ControlFlow<()>,
{
    let end = base.saturating_add(size);
    let mut buffer: Vec<u8> = Vec::with_capacity(chunk_size + overlap);
    let mut chunk = vec![0u8; chunk_size];
    let mut address = base;
    let mut skipped = 0u64;

    while address < end {
        reader.check_alive()?;

        let len = ((end - address) as usize).min(chunk_size);
        match reader.read_into(address, &mut chunk[..len]) {
            Ok(()) => {
                if feed(&mut buffer, address, &chunk[..len], overlap, &mut visit).is_break() {
                    return Ok(ControlFlow::Break(()));
                }
            }
            Err(Error::AccessViolation { .. }) => {
                debug!("Chunk read failed at {:#x} ({} bytes), retrying by page", address, len);
                let chunk_end = address + len as u64;
                let mut page = address;
                while page < chunk_end {
                    let page_len = ((page / PAGE_SIZE + 1) * PAGE_SIZE).min(chunk_end) - page;
                    let data = &mut chunk[..page_len as usize];
                    match reader.read_into(page, data) {
                        Ok(()) => {
                            if feed(&mut buffer, page, data, overlap, &mut visit).is_break() {
                                return Ok(ControlFlow::Break(()));
                            }
                        }
                        Err(Error::AccessViolation { .. }) => {
                            // bytes on either side of a hole are not contiguous
                            buffer.clear();
                            skipped += page_len;
                        }
                        Err(e) => return Err(e),
                    }
                    page += page_len;
                }
            }
            Err(e) => return Err(e),
        }
        address += len as u64;
    }

    if skipped > 0 {
        warn!(
            "Skipped {} unreadable bytes in {:#x}..{:#x}",
            skipped, base, end
        );
    }
    Ok(ControlFlow::Continue(()))
}

/// Append `data` after the carried tail, visit, then keep the new tail.
fn feed<F>(
    buffer: &mut Vec<u8>,
    address: u64,
    data: &[u8],
    overlap: usize,
    visit: &mut F,
) -> ControlFlow<()>
where
    F: FnMut(u64, &[u8]) -> ControlFlow<()>,
{
    let carried = buffer.len();
    buffer.extend_from_slice(data);
    let flow = visit(address - carried as u64, buffer);

    let keep = overlap.min(buffer.len());
    buffer.drain(..buffer.len() - keep);
    flow
}
