//! Iterative value scanning.
//!
//! A first scan collects every address whose bytes equal the searched value;
//! each refinement re-reads only the surviving candidates, so the working set
//! never grows between first scans.

use std::cmp::Ordering as CmpOrdering;
use std::ops::ControlFlow;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use memchr::memmem;
use tracing::{debug, info, warn};

use crate::config::TrainerConfig;
use crate::error::{Error, Result};
use crate::memory::{ReadMemory, RegionFilter, Value, ValueType, contiguous_runs, walk_chunks};

/// An address still matching the scan, with the value last read there
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandidateAddress {
    pub address: u64,
    pub value: Value,
}

/// Predicate applied by [`ValueScanner::refine`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScanFilter {
    /// Current bytes equal this value's encoding
    Exact(Value),
    Changed,
    Unchanged,
    Increased,
    Decreased,
}

impl ScanFilter {
    fn keep(&self, previous: &Value, current: &Value) -> bool {
        match self {
            Self::Exact(target) => current.to_bytes() == target.to_bytes(),
            Self::Changed => current.to_bytes() != previous.to_bytes(),
            Self::Unchanged => current.to_bytes() == previous.to_bytes(),
            Self::Increased => current.compare(previous) == Some(CmpOrdering::Greater),
            Self::Decreased => current.compare(previous) == Some(CmpOrdering::Less),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Scanned,
    Refined,
}

/// Knobs for a first scan
#[derive(Debug, Clone, Copy)]
pub struct ScanOptions {
    pub fast_scan: bool,
    pub max_candidates: usize,
    pub chunk_size: usize,
}

impl From<&TrainerConfig> for ScanOptions {
    fn from(config: &TrainerConfig) -> Self {
        Self {
            fast_scan: config.fast_scan,
            max_candidates: config.max_candidates,
            chunk_size: config.scan_chunk_size,
        }
    }
}

struct Session {
    value_type: ValueType,
    candidates: Vec<CandidateAddress>,
    state: ScanState,
}

/// Clears the busy flag when a scan returns.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// One value-scan session.
///
/// Scans are serialized: a call made while another scan runs fails with
/// [`Error::ScanInProgress`] instead of queueing.
#[derive(Default)]
pub struct ValueScanner {
    session: Mutex<Option<Session>>,
    busy: AtomicBool,
    epoch: AtomicU64,
}

impl ValueScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Search every readable region for `value` and start a new session.
    ///
    /// Returns the candidate count.
    pub fn first_scan<R: ReadMemory + ?Sized>(
        &self,
        reader: &R,
        value: Value,
        options: ScanOptions,
    ) -> Result<usize> {
        let _guard = self.begin()?;
        let epoch = self.epoch.load(Ordering::Acquire);

        let result = collect_matches(reader, value, options);
        let mut session = self.lock();
        if self.epoch.load(Ordering::Acquire) != epoch {
            debug!("Session reset during first scan, discarding results");
            return Err(Error::NotAttached);
        }

        match result {
            Ok(candidates) => {
                let count = candidates.len();
                info!(
                    "First scan for {} ({}): {} candidates",
                    value,
                    value.value_type(),
                    count
                );
                *session = Some(Session {
                    value_type: value.value_type(),
                    candidates,
                    state: ScanState::Scanned,
                });
                Ok(count)
            }
            Err(e) => {
                *session = None;
                Err(e)
            }
        }
    }

    /// Keep only the candidates whose current value equals `value`.
    pub fn next_scan<R: ReadMemory + ?Sized>(&self, reader: &R, value: Value) -> Result<usize> {
        self.refine(reader, ScanFilter::Exact(value))
    }

    /// Re-read every candidate and drop those rejected by `filter`.
    pub fn refine<R: ReadMemory + ?Sized>(&self, reader: &R, filter: ScanFilter) -> Result<usize> {
        let _guard = self.begin()?;
        let epoch = self.epoch.load(Ordering::Acquire);

        let (value_type, snapshot) = {
            let session = self.lock();
            let session = session.as_ref().ok_or(Error::NoActiveScan)?;
            if let ScanFilter::Exact(target) = filter
                && target.value_type() != session.value_type
            {
                return Err(Error::InvalidType(format!(
                    "session scans {}, got {}",
                    session.value_type,
                    target.value_type()
                )));
            }
            (session.value_type, session.candidates.clone())
        };

        let result = retain_matching(reader, value_type, snapshot, &filter);
        let mut session = self.lock();
        if self.epoch.load(Ordering::Acquire) != epoch {
            debug!("Session reset during refine, discarding results");
            return Err(Error::NotAttached);
        }

        match result {
            Ok(survivors) => {
                let count = survivors.len();
                if let Some(session) = session.as_mut() {
                    debug!(
                        "Refine {:?}: {} -> {} candidates",
                        filter,
                        session.candidates.len(),
                        count
                    );
                    session.candidates = survivors;
                    session.state = ScanState::Refined;
                }
                Ok(count)
            }
            Err(e) => {
                *session = None;
                Err(e)
            }
        }
    }

    /// Up to `limit` current candidates in address order.
    pub fn candidates(&self, limit: usize) -> Vec<CandidateAddress> {
        self.lock()
            .as_ref()
            .map(|s| s.candidates.iter().take(limit).copied().collect())
            .unwrap_or_default()
    }

    pub fn candidate_count(&self) -> usize {
        self.lock().as_ref().map_or(0, |s| s.candidates.len())
    }

    pub fn state(&self) -> ScanState {
        self.lock().as_ref().map_or(ScanState::Idle, |s| s.state)
    }

    pub fn value_type(&self) -> Option<ValueType> {
        self.lock().as_ref().map(|s| s.value_type)
    }

    /// Drop the session. A scan still running discards its results.
    pub fn reset(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        *self.lock() = None;
    }

    fn begin(&self) -> Result<BusyGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .map_err(|_| Error::ScanInProgress)?;
        Ok(BusyGuard(&self.busy))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn collect_matches<R: ReadMemory + ?Sized>(
    reader: &R,
    value: Value,
    options: ScanOptions,
) -> Result<Vec<CandidateAddress>> {
    let needle = value.to_bytes();
    let finder = memmem::Finder::new(&needle);
    let alignment = if options.fast_scan {
        value.value_type().alignment() as u64
    } else {
        1
    };

    let regions = reader.enumerate_regions()?;
    let runs = contiguous_runs(&regions, RegionFilter::Readable);
    let chunk_size = options.chunk_size.max(needle.len());
    let mut candidates = Vec::new();

    for (base, size) in runs {
        let flow = walk_chunks(reader, base, size, chunk_size, needle.len() - 1, |addr, data| {
            for pos in finder.find_iter(data) {
                let address = addr + pos as u64;
                if address % alignment != 0 {
                    continue;
                }
                if candidates.len() >= options.max_candidates {
                    return ControlFlow::Break(());
                }
                candidates.push(CandidateAddress { address, value });
            }
            ControlFlow::Continue(())
        })?;

        if flow.is_break() {
            warn!(
                "Candidate limit {} reached, first scan truncated",
                options.max_candidates
            );
            break;
        }
    }

    Ok(candidates)
}

fn retain_matching<R: ReadMemory + ?Sized>(
    reader: &R,
    value_type: ValueType,
    candidates: Vec<CandidateAddress>,
    filter: &ScanFilter,
) -> Result<Vec<CandidateAddress>> {
    let mut survivors = Vec::with_capacity(candidates.len());
    for (i, candidate) in candidates.into_iter().enumerate() {
        if i % 4096 == 0 {
            reader.check_alive()?;
        }
        let current = match reader.read_value(candidate.address, value_type) {
            Ok(value) => value,
            // unmapped since the last scan
            Err(Error::AccessViolation { .. }) => continue,
            Err(e) => return Err(e),
        };
        if filter.keep(&candidate.value, &current) {
            survivors.push(CandidateAddress {
                address: candidate.address,
                value: current,
            });
        }
    }
    Ok(survivors)
}
