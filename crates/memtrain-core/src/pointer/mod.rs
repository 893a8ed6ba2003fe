//! Pointer chains: resolution and reverse pointer scanning.

mod chain;
mod scan;

pub use chain::{ChainRoot, PointerChain, resolve_chain};
pub use scan::PointerScanner;
