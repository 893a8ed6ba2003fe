//! CLI command implementations.

pub mod freeze;
pub mod memory;
pub mod pattern;
pub mod pointers;
pub mod scan;
pub mod table;

use anyhow::Result;
use memtrain_core::{ChainRoot, PointerChain, Trainer, ValueType};

/// Resolve a command-line address: plain hex or `module+offset`.
pub fn resolve_address(trainer: &Trainer, text: &str) -> Result<u64> {
    let root: ChainRoot = text.parse()?;
    let chain = PointerChain::new(root, Vec::new(), ValueType::U8);
    Ok(trainer.resolve_chain(&chain)?)
}
