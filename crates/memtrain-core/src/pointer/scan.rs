use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::ops::ControlFlow;

use tracing::{debug, info, warn};

use crate::config::PointerScanConfig;
use crate::error::{Error, Result};
use crate::memory::{ReadMemory, RegionFilter, ValueType, contiguous_runs, walk_chunks};
use crate::process::ModuleInfo;

use super::chain::{ChainRoot, PointerChain, resolve_chain};

/// A word in target memory that points into readable memory
#[derive(Debug, Clone, Copy)]
struct PointerEntry {
    value: u64,
    source: u64,
}

/// A BFS node: an address and the offsets leading from it to the target
struct Node {
    address: u64,
    offsets: Vec<i64>,
}

/// Breadth-first reverse pointer search.
pub struct PointerScanner<'a, R: ReadMemory + ?Sized> {
    reader: &'a R,
    config: &'a PointerScanConfig,
    chunk_size: usize,
    value_type: ValueType,
}

impl<'a, R: ReadMemory + ?Sized> PointerScanner<'a, R> {
    pub fn new(reader: &'a R, config: &'a PointerScanConfig, chunk_size: usize) -> Self {
        Self {
            reader,
            config,
            chunk_size,
            value_type: ValueType::I32,
        }
    }

    /// Value type recorded on the returned chains
    pub fn value_type(mut self, value_type: ValueType) -> Self {
        self.value_type = value_type;
        self
    }

    /// Find chains ending at `target`, ranked static root first, then
    /// shallower, then smaller total offset.
    pub fn scan(&self, target: u64, max_offset: u64, max_depth: usize) -> Result<Vec<PointerChain>> {
        if max_depth == 0 || max_depth > self.config.max_depth {
            return Err(Error::InvalidArgument(format!(
                "max depth must be between 1 and {}, got {}",
                self.config.max_depth, max_depth
            )));
        }

        let modules = self.reader.modules()?;
        let map = self.build_pointer_map()?;
        info!(
            "Pointer scan for {:#x}: {} pointers mapped, max offset {:#x}, depth {}",
            target,
            map.len(),
            max_offset,
            max_depth
        );

        // Each (node, map entry) pair is visited once and yields a distinct
        // chain, so no dedupe set is needed. The heap keeps the best
        // `max_results` seen so far with the worst on top.
        let mut best: BinaryHeap<Ranked> = BinaryHeap::with_capacity(self.config.max_results + 1);
        let mut total = 0usize;
        let mut visited: HashSet<u64> = HashSet::from([target]);
        let mut frontier = vec![Node {
            address: target,
            offsets: Vec::new(),
        }];

        for depth in 1..=max_depth {
            self.reader.check_alive()?;
            let mut next = Vec::new();

            for node in &frontier {
                let low = node.address.saturating_sub(max_offset);
                let start = map.partition_point(|e| e.value < low);

                for entry in map[start..].iter().take_while(|e| e.value <= node.address) {
                    let mut offsets = Vec::with_capacity(node.offsets.len() + 1);
                    offsets.push((node.address - entry.value) as i64);
                    offsets.extend_from_slice(&node.offsets);

                    let root = root_for(entry.source, &modules);
                    total += 1;
                    best.push(Ranked(PointerChain::new(root, offsets.clone(), self.value_type)));
                    if best.len() > self.config.max_results {
                        best.pop();
                    }

                    if depth < max_depth && visited.insert(entry.source) {
                        next.push(Node {
                            address: entry.source,
                            offsets,
                        });
                    }
                }
            }

            debug!(
                "Depth {}: {} chains so far, {} nodes to expand",
                depth,
                total,
                next.len()
            );
            if next.len() > self.config.max_frontier {
                warn!(
                    "Pointer scan frontier truncated from {} to {} at depth {}",
                    next.len(),
                    self.config.max_frontier,
                    depth
                );
                next.truncate(self.config.max_frontier);
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }

        if total > best.len() {
            debug!("Kept best {} of {} chains", best.len(), total);
        }
        let mut chains: Vec<PointerChain> = best.into_sorted_vec().into_iter().map(|r| r.0).collect();

        for chain in &mut chains {
            chain.validated = match resolve_chain(self.reader, chain) {
                Ok(address) => address == target,
                Err(e) if e.is_terminal() => return Err(e),
                Err(_) => false,
            };
        }

        info!(
            "Pointer scan for {:#x} returned {} chains ({} validated)",
            target,
            chains.len(),
            chains.iter().filter(|c| c.validated).count()
        );
        Ok(chains)
    }

    /// Collect every aligned word that points into readable memory, sorted
    /// by value.
    fn build_pointer_map(&self) -> Result<Vec<PointerEntry>> {
        let regions = self.reader.enumerate_regions()?;
        let runs = contiguous_runs(&regions, RegionFilter::Readable);
        let width = self.reader.pointer_width().bytes();
        let chunk_size = (self.chunk_size / width).max(1) * width;
        let in_readable = |value: u64| {
            let idx = runs.partition_point(|(base, _)| *base <= value);
            idx > 0 && {
                let (base, size) = runs[idx - 1];
                value < base + size
            }
        };

        let mut map = Vec::new();
        for &(base, size) in &runs {
            let aligned = base.next_multiple_of(width as u64);
            if aligned >= base + size {
                continue;
            }

            let flow = walk_chunks(
                self.reader,
                aligned,
                base + size - aligned,
                chunk_size,
                0,
                |addr, data| {
                    for (i, word) in data.chunks_exact(width).enumerate() {
                        let value = match width {
                            4 => u32::from_le_bytes([word[0], word[1], word[2], word[3]]) as u64,
                            _ => u64::from_le_bytes([
                                word[0], word[1], word[2], word[3], word[4], word[5], word[6],
                                word[7],
                            ]),
                        };
                        if value != 0 && in_readable(value) {
                            if map.len() >= self.config.max_pointer_map {
                                return ControlFlow::Break(());
                            }
                            map.push(PointerEntry {
                                value,
                                source: addr + (i * width) as u64,
                            });
                        }
                    }
                    ControlFlow::Continue(())
                },
            )?;

            if flow.is_break() {
                warn!(
                    "Pointer map limit {} reached, scan coverage is partial",
                    self.config.max_pointer_map
                );
                break;
            }
        }

        map.sort_unstable_by_key(|e| (e.value, e.source));
        Ok(map)
    }
}

fn root_for(source: u64, modules: &[ModuleInfo]) -> ChainRoot {
    match modules.iter().find(|m| m.contains(source)) {
        Some(module) => ChainRoot::Module {
            module: module.name.clone(),
            offset: source - module.base,
        },
        None => ChainRoot::Absolute(source),
    }
}

/// Static roots first, then depth, then total offset, then root.
fn rank_order(a: &PointerChain, b: &PointerChain) -> Ordering {
    b.root
        .is_static()
        .cmp(&a.root.is_static())
        .then(a.depth().cmp(&b.depth()))
        .then(a.total_offset().cmp(&b.total_offset()))
        .then_with(|| a.root.cmp(&b.root))
        .then_with(|| a.offsets.cmp(&b.offsets))
}

/// Heap wrapper: greater means ranked later.
struct Ranked(PointerChain);

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        rank_order(&self.0, &other.0)
    }
}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ranked {}
