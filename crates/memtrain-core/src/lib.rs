//! # memtrain-core
//!
//! Process-memory introspection and live value manipulation.
//!
//! This crate provides:
//! - Process attachment on Windows and Linux behind one backend trait
//! - Typed reads/writes and region enumeration
//! - Iterative value scanning (first scan, then refinements)
//! - Reverse pointer-chain discovery and resolution
//! - Byte-pattern (AOB) scanning with wildcards
//! - Per-entry freeze tasks that keep rewriting a value
//! - Cheat tables persisted as JSON
//!
//! [`Trainer`] ties these together into one session object.

pub mod config;
pub mod error;
pub mod freeze;
pub mod memory;
pub mod pattern;
pub mod pointer;
pub mod process;
pub mod scan;
pub mod table;
pub mod trainer;

pub use config::{PointerScanConfig, TrainerConfig, TrainerConfigBuilder};
pub use error::{Error, Result};
pub use freeze::{FreezeEngine, ShutdownSignal};
pub use memory::{
    MemoryAccess, MemoryRegion, Protection, ReadMemory, RegionFilter, Value, ValueType,
    WriteMemory,
};
pub use pattern::{
    Pattern, PatternByte, PatternMatch, PatternScanner, format_pattern, parse_pattern,
};
pub use pointer::{ChainRoot, PointerChain, PointerScanner, resolve_chain};
pub use process::{ModuleInfo, PointerWidth, ProcessBackend, ProcessHandle, find_pid_by_name};
pub use scan::{CandidateAddress, ScanFilter, ScanOptions, ScanState, ValueScanner};
pub use table::{
    CheatEntry, CheatTable, EntryId, EntryRecord, EntryState, EntryStatus, EntryTarget,
    EntryUpdate, TableStore, TableSummary,
};
pub use trainer::Trainer;
