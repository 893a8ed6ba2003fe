//! Memory access layer: typed reads/writes and region enumeration on top of
//! a [`crate::process::ProcessHandle`].

mod access;
mod chunks;
mod region;
mod value;

pub use access::{MemoryAccess, ReadMemory, WriteMemory};
pub use chunks::walk_chunks;
pub use region::{MemoryRegion, Protection, RegionFilter, contiguous_runs};
pub use value::{Value, ValueType};
