//! Saved table management.

use anyhow::Result;
use memtrain_core::Trainer;

pub fn list(trainer: &Trainer) -> Result<()> {
    let tables = trainer.list_tables()?;
    if tables.is_empty() {
        println!("No saved tables");
        return Ok(());
    }
    for table in tables {
        println!(
            "{:<24} {:>4} entries  {}",
            table.game_name,
            table.entries,
            table.path.display()
        );
    }
    Ok(())
}

pub fn show(trainer: &Trainer, game: &str) -> Result<()> {
    let count = trainer.load_table(game)?;
    println!("Table '{}' ({} entries)", trainer.table_name(), count);
    for entry in trainer.entries() {
        println!(
            "  {:<20} {:<8} {} = {}",
            entry.name,
            entry.value_type(),
            entry.target,
            entry.frozen_value
        );
        if !entry.description.is_empty() {
            println!("      {}", entry.description);
        }
        if let Some(hotkey) = &entry.hotkey {
            println!("      hotkey: {}", hotkey);
        }
    }
    Ok(())
}

pub fn delete(trainer: &Trainer, game: &str) -> Result<()> {
    trainer.delete_table(game)?;
    println!("Deleted table '{}'", game);
    Ok(())
}
