use std::sync::Arc;

use crate::error::{Error, Result};
use crate::memory::{MemoryRegion, Value, ValueType};
use crate::process::{ModuleInfo, PointerWidth, ProcessHandle};

/// Read access to a target address space.
///
/// Scanners are generic over this trait so they only depend on reads.
pub trait ReadMemory {
    fn read_into(&self, address: u64, buf: &mut [u8]) -> Result<()>;

    fn enumerate_regions(&self) -> Result<Vec<MemoryRegion>>;

    fn modules(&self) -> Result<Vec<ModuleInfo>>;

    fn pointer_width(&self) -> PointerWidth;

    /// `NotAttached` or `ProcessGone` when the target is unusable.
    fn check_alive(&self) -> Result<()>;

    fn read_bytes(&self, address: u64, size: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; size];
        self.read_into(address, &mut buf)?;
        Ok(buf)
    }

    fn read_i32(&self, address: u64) -> Result<i32> {
        let mut buf = [0u8; 4];
        self.read_into(address, &mut buf)?;
        Ok(i32::from_le_bytes(buf))
    }

    fn read_u32(&self, address: u64) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_into(address, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_u64(&self, address: u64) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read_into(address, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Read a pointer using the target's native width.
    fn read_pointer(&self, address: u64) -> Result<u64> {
        match self.pointer_width() {
            PointerWidth::Bits32 => self.read_u32(address).map(u64::from),
            PointerWidth::Bits64 => self.read_u64(address),
        }
    }

    fn read_value(&self, address: u64, value_type: ValueType) -> Result<Value> {
        let bytes = self.read_bytes(address, value_type.size())?;
        Value::from_bytes(value_type, &bytes)
    }

    /// Base address of a loaded module (case-insensitive name match).
    fn module_base(&self, name: &str) -> Result<u64> {
        self.modules()?
            .into_iter()
            .find(|m| m.name.eq_ignore_ascii_case(name))
            .map(|m| m.base)
            .ok_or_else(|| Error::PointerUnresolved(format!("module '{}' is not loaded", name)))
    }
}

/// Write access to a target address space
pub trait WriteMemory {
    fn write_bytes(&self, address: u64, data: &[u8]) -> Result<()>;

    fn write_value(&self, address: u64, value: &Value) -> Result<()> {
        self.write_bytes(address, &value.to_bytes())
    }
}

/// Bounded read/write access through a shared [`ProcessHandle`].
///
/// Cheap to clone; freeze tasks each hold their own copy.
#[derive(Debug, Clone)]
pub struct MemoryAccess {
    handle: Arc<ProcessHandle>,
}

impl MemoryAccess {
    pub fn new(handle: Arc<ProcessHandle>) -> Self {
        Self { handle }
    }

    pub fn handle(&self) -> &Arc<ProcessHandle> {
        &self.handle
    }

    /// Read `size` bytes at `address` and decode them as `value_type`.
    pub fn read(&self, address: u64, size: usize, value_type: ValueType) -> Result<Value> {
        if size != value_type.size() {
            return Err(Error::InvalidType(format!(
                "{} is {} bytes, not {}",
                value_type,
                value_type.size(),
                size
            )));
        }
        self.read_value(address, value_type)
    }

    /// Encode `value` as `value_type` and write it at `address`.
    pub fn write(&self, address: u64, value: &Value, value_type: ValueType) -> Result<()> {
        if value.value_type() != value_type {
            return Err(Error::InvalidType(format!(
                "value {} is {}, expected {}",
                value,
                value.value_type(),
                value_type
            )));
        }
        self.write_value(address, value)
    }

    /// A failed access on a dead or closed target reports the lifecycle
    /// error rather than the fault.
    fn classify(&self, err: Error) -> Error {
        match err {
            Error::AccessViolation { .. } => match self.handle.check() {
                Ok(()) => err,
                Err(lifecycle) => lifecycle,
            },
            other => other,
        }
    }
}

impl ReadMemory for MemoryAccess {
    fn read_into(&self, address: u64, buf: &mut [u8]) -> Result<()> {
        self.handle.ensure_open()?;
        self.handle
            .backend()
            .read_into(address, buf)
            .map_err(|e| self.classify(e))
    }

    fn enumerate_regions(&self) -> Result<Vec<MemoryRegion>> {
        self.handle.check()?;
        self.handle.backend().regions().map_err(|e| self.classify(e))
    }

    fn modules(&self) -> Result<Vec<ModuleInfo>> {
        self.handle.check()?;
        self.handle.backend().modules().map_err(|e| self.classify(e))
    }

    fn pointer_width(&self) -> PointerWidth {
        self.handle.pointer_width()
    }

    fn check_alive(&self) -> Result<()> {
        self.handle.check()
    }
}

impl WriteMemory for MemoryAccess {
    fn write_bytes(&self, address: u64, data: &[u8]) -> Result<()> {
        self.handle.ensure_open()?;
        self.handle
            .backend()
            .write_from(address, data)
            .map_err(|e| self.classify(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Protection;
    use crate::process::MockProcessBuilder;

    fn setup() -> (crate::process::MockProcess, MemoryAccess) {
        let process = MockProcessBuilder::new(7)
            .region(0x10000, 0x1000)
            .region_with(0x20000, 0x1000, Protection::READ_ONLY)
            .module("game.exe", 0x20000, 0x1000)
            .build();
        let handle = Arc::new(ProcessHandle::from_backend(Box::new(process.clone())));
        (process, MemoryAccess::new(handle))
    }

    #[test]
    fn test_typed_read_write() {
        let (process, memory) = setup();
        memory
            .write(0x10010, &Value::I32(1234), ValueType::I32)
            .unwrap();
        assert_eq!(process.peek_i32(0x10010), 1234);
        assert_eq!(
            memory.read(0x10010, 4, ValueType::I32).unwrap(),
            Value::I32(1234)
        );
    }

    #[test]
    fn test_size_mismatch_is_invalid_type() {
        let (_process, memory) = setup();
        assert!(matches!(
            memory.read(0x10010, 2, ValueType::I32),
            Err(Error::InvalidType(_))
        ));
        assert!(matches!(
            memory.write(0x10010, &Value::F32(1.0), ValueType::I32),
            Err(Error::InvalidType(_))
        ));
    }

    #[test]
    fn test_unmapped_and_protected_access() {
        let (_process, memory) = setup();
        assert!(matches!(
            memory.read_value(0x90000, ValueType::U8),
            Err(Error::AccessViolation { address: 0x90000, .. })
        ));
        assert!(matches!(
            memory.write_value(0x20000, &Value::U8(1)),
            Err(Error::AccessViolation { .. })
        ));
        // readable even though not writable
        assert!(memory.read_u32(0x20000).is_ok());
    }

    #[test]
    fn test_dead_process_is_process_gone() {
        let (process, memory) = setup();
        process.kill();
        assert!(matches!(memory.read_u32(0x10000), Err(Error::ProcessGone)));
        assert!(matches!(
            memory.enumerate_regions(),
            Err(Error::ProcessGone)
        ));
    }

    #[test]
    fn test_plain_accesses_skip_liveness_query() {
        let (process, memory) = setup();
        for i in 0..1000u64 {
            memory.read_u32(0x10000 + (i % 0x100) * 4).unwrap();
            memory.write_value(0x10800, &Value::U32(i as u32)).unwrap();
        }
        assert_eq!(process.liveness_checks(), 0);

        // a fault asks once to tell exit from a bad address
        assert!(memory.read_u32(0x90000).is_err());
        assert_eq!(process.liveness_checks(), 1);
    }

    #[test]
    fn test_closed_handle_is_not_attached() {
        let (_process, memory) = setup();
        memory.handle().close();
        assert!(matches!(memory.read_u32(0x10000), Err(Error::NotAttached)));
    }

    #[test]
    fn test_pointer_width_reads() {
        let process = MockProcessBuilder::new(8)
            .width(PointerWidth::Bits32)
            .region(0x1000, 0x100)
            .build();
        process.poke_u64(0x1000, 0xFFFF_FFFF_0040_0000);
        let memory = MemoryAccess::new(Arc::new(ProcessHandle::from_backend(Box::new(process))));
        assert_eq!(memory.read_pointer(0x1000).unwrap(), 0x0040_0000);
    }

    #[test]
    fn test_module_base_lookup() {
        let (_process, memory) = setup();
        assert_eq!(memory.module_base("GAME.EXE").unwrap(), 0x20000);
        assert!(matches!(
            memory.module_base("missing.dll"),
            Err(Error::PointerUnresolved(_))
        ));
    }
}
