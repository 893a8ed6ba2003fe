use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::memory::{ReadMemory, ValueType};

/// Where a pointer chain starts
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ChainRoot {
    /// `module+offset`, stable across restarts while the module layout holds
    Module { module: String, offset: u64 },
    /// Fixed address, typically heap
    Absolute(u64),
}

impl ChainRoot {
    pub fn is_static(&self) -> bool {
        matches!(self, Self::Module { .. })
    }

    /// Absolute address of the root in the attached process.
    pub fn resolve<R: ReadMemory + ?Sized>(&self, reader: &R) -> Result<u64> {
        match self {
            Self::Module { module, offset } => Ok(reader.module_base(module)? + offset),
            Self::Absolute(address) => Ok(*address),
        }
    }
}

fn parse_hex(text: &str) -> Option<u64> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    u64::from_str_radix(digits, 16).ok()
}

impl FromStr for ChainRoot {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let invalid = || Error::InvalidArgument(format!("invalid pointer root '{}'", s));

        match s.rsplit_once('+') {
            Some((module, offset)) => {
                let module = module.trim();
                if module.is_empty() {
                    return Err(invalid());
                }
                Ok(Self::Module {
                    module: module.to_string(),
                    offset: parse_hex(offset.trim()).ok_or_else(invalid)?,
                })
            }
            None => parse_hex(s).map(Self::Absolute).ok_or_else(invalid),
        }
    }
}

impl fmt::Display for ChainRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Module { module, offset } => write!(f, "{}+{:X}", module, offset),
            Self::Absolute(address) => write!(f, "0x{:X}", address),
        }
    }
}

impl TryFrom<String> for ChainRoot {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ChainRoot> for String {
    fn from(root: ChainRoot) -> Self {
        root.to_string()
    }
}

/// A root plus offsets that, dereferenced in order, reach a value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PointerChain {
    pub root: ChainRoot,
    pub offsets: Vec<i64>,
    pub value_type: ValueType,
    /// Re-resolution reproduced the scan target
    #[serde(default)]
    pub validated: bool,
}

impl PointerChain {
    pub fn new(root: ChainRoot, offsets: Vec<i64>, value_type: ValueType) -> Self {
        Self {
            root,
            offsets,
            value_type,
            validated: false,
        }
    }

    pub fn depth(&self) -> usize {
        self.offsets.len()
    }

    pub fn total_offset(&self) -> u64 {
        self.offsets.iter().map(|o| o.unsigned_abs()).sum()
    }
}

impl fmt::Display for PointerChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [", self.root)?;
        for (i, offset) in self.offsets.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            if *offset < 0 {
                write!(f, "-0x{:X}", offset.unsigned_abs())?;
            } else {
                write!(f, "0x{:X}", offset)?;
            }
        }
        write!(f, "] ({})", self.value_type)
    }
}

/// Walk `chain` in the attached process and return the final address.
///
/// `p = root; for o in offsets { p = read_ptr(p) + o }`. A null or unreadable
/// link is [`Error::PointerUnresolved`]; lifecycle errors pass through.
pub fn resolve_chain<R: ReadMemory + ?Sized>(reader: &R, chain: &PointerChain) -> Result<u64> {
    let mut address = chain.root.resolve(reader)?;

    for (level, offset) in chain.offsets.iter().enumerate() {
        let pointer = match reader.read_pointer(address) {
            Ok(pointer) => pointer,
            Err(Error::AccessViolation { address, .. }) => {
                return Err(Error::PointerUnresolved(format!(
                    "level {} of {}: cannot read {:#x}",
                    level + 1,
                    chain.root,
                    address
                )));
            }
            Err(e) => return Err(e),
        };
        if pointer == 0 {
            return Err(Error::PointerUnresolved(format!(
                "level {} of {}: null pointer at {:#x}",
                level + 1,
                chain.root,
                address
            )));
        }
        address = pointer.wrapping_add_signed(*offset);
    }

    Ok(address)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryAccess;
    use crate::process::{MockProcessBuilder, PointerWidth, ProcessHandle};
    use std::sync::Arc;

    #[test]
    fn test_root_parse_and_display() {
        let root: ChainRoot = "game.exe+1A2B".parse().unwrap();
        assert_eq!(
            root,
            ChainRoot::Module {
                module: "game.exe".to_string(),
                offset: 0x1A2B
            }
        );
        assert_eq!(root.to_string(), "game.exe+1A2B");
        assert_eq!("game.exe+0x1A2B".parse::<ChainRoot>().unwrap(), root);

        let abs: ChainRoot = "0x7FF612340000".parse().unwrap();
        assert_eq!(abs, ChainRoot::Absolute(0x7FF6_1234_0000));
        assert_eq!(abs.to_string(), "0x7FF612340000");

        assert!("+10".parse::<ChainRoot>().is_err());
        assert!("game.exe+zz".parse::<ChainRoot>().is_err());
    }

    #[test]
    fn test_chain_serde() {
        let chain = PointerChain::new(
            ChainRoot::Module {
                module: "game.exe".to_string(),
                offset: 0x100,
            },
            vec![0x40, -8],
            ValueType::I32,
        );
        let json = serde_json::to_string(&chain).unwrap();
        assert!(json.contains("\"game.exe+100\""));
        let back: PointerChain = serde_json::from_str(&json).unwrap();
        assert_eq!(back, chain);
        assert_eq!(chain.total_offset(), 0x48);
        assert_eq!(chain.to_string(), "game.exe+100 [0x40, -0x8] (i32)");
    }

    #[test]
    fn test_resolve_chain() {
        let process = MockProcessBuilder::new(2)
            .region(0x400000, 0x1000)
            .region(0xA00000, 0x1000)
            .module("game.exe", 0x400000, 0x1000)
            .build();
        process.poke_ptr(0x400100, 0xA00000);
        process.poke_ptr(0xA00040, 0xABCC00);
        let memory = MemoryAccess::new(Arc::new(ProcessHandle::from_backend(Box::new(process))));

        let chain = PointerChain::new(
            "game.exe+100".parse().unwrap(),
            vec![0x40, 0x100],
            ValueType::I32,
        );
        assert_eq!(resolve_chain(&memory, &chain).unwrap(), 0xABCD00);

        let empty = PointerChain::new(ChainRoot::Absolute(0xA00010), vec![], ValueType::I32);
        assert_eq!(resolve_chain(&memory, &empty).unwrap(), 0xA00010);
    }

    #[test]
    fn test_resolve_failures() {
        let process = MockProcessBuilder::new(2)
            .width(PointerWidth::Bits32)
            .region(0x400000, 0x1000)
            .module("game.exe", 0x400000, 0x1000)
            .build();
        process.poke_ptr(0x400010, 0xDEAD0000);
        let memory = MemoryAccess::new(Arc::new(ProcessHandle::from_backend(Box::new(
            process.clone(),
        ))));

        // null link
        let null = PointerChain::new("game.exe+20".parse().unwrap(), vec![0], ValueType::I32);
        assert!(matches!(
            resolve_chain(&memory, &null),
            Err(Error::PointerUnresolved(_))
        ));

        // dangling link
        let dangling =
            PointerChain::new("game.exe+10".parse().unwrap(), vec![0, 0], ValueType::I32);
        assert!(matches!(
            resolve_chain(&memory, &dangling),
            Err(Error::PointerUnresolved(_))
        ));

        // module not loaded
        let missing = PointerChain::new("other.dll+10".parse().unwrap(), vec![0], ValueType::I32);
        assert!(matches!(
            resolve_chain(&memory, &missing),
            Err(Error::PointerUnresolved(_))
        ));

        process.kill();
        assert!(matches!(
            resolve_chain(&memory, &null),
            Err(Error::ProcessGone)
        ));
    }
}
