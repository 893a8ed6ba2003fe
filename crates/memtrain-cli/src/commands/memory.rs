//! One-off reads and writes.

use anyhow::Result;
use memtrain_core::{Trainer, ValueType};

use super::resolve_address;

pub fn read(trainer: &Trainer, address: &str, value_type: ValueType) -> Result<()> {
    let resolved = resolve_address(trainer, address)?;
    let value = trainer.read_value(resolved, value_type)?;
    println!("0x{:X} ({}) = {}", resolved, value_type, value);
    Ok(())
}

pub fn write(trainer: &Trainer, address: &str, text: &str, value_type: ValueType) -> Result<()> {
    let resolved = resolve_address(trainer, address)?;
    let value = value_type.parse_value(text)?;
    let before = trainer.read_value(resolved, value_type)?;
    trainer.write_value(resolved, value)?;
    println!("0x{:X} ({}): {} -> {}", resolved, value_type, before, value);
    Ok(())
}
