//! Load a table and hold its entries until told to stop.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use memtrain_core::{EntryStatus, ShutdownSignal, Trainer};
use tracing::{debug, warn};

use crate::input::spawn_keyboard_monitor;

pub fn run(trainer: &Trainer, game: &str, names: &[String]) -> Result<()> {
    let count = trainer.load_table(game)?;
    println!("Loaded '{}' ({} entries)", game, count);

    let selected = if names.is_empty() {
        trainer.entries()
    } else {
        let mut selected = Vec::with_capacity(names.len());
        for name in names {
            match trainer.find_entry(name) {
                Some(entry) => selected.push(entry),
                None => bail!("no entry named '{}' in '{}'", name, game),
            }
        }
        selected
    };

    for entry in &selected {
        match trainer.enable_entry(entry.id) {
            Ok(()) => println!("  [on]   {} = {}", entry.name, entry.frozen_value),
            Err(e) if e.is_terminal() => return Err(e.into()),
            Err(e) => println!("  [fail] {}: {}", entry.name, e),
        }
    }

    if trainer.active_freezes() == 0 {
        bail!("no entries could be frozen");
    }

    let shutdown = Arc::new(ShutdownSignal::new());
    let ctrlc_signal = Arc::clone(&shutdown);
    if let Err(e) = ctrlc::set_handler(move || ctrlc_signal.trigger()) {
        warn!("Failed to install Ctrl+C handler: {}", e);
    }
    let monitor = spawn_keyboard_monitor(Arc::clone(&shutdown));

    println!("Freezing {} entries. Press Esc or q to stop.", trainer.active_freezes());
    while !shutdown.wait(Duration::from_secs(1)) {
        if trainer.active_freezes() == 0 {
            debug!("All freezes ended");
            break;
        }
    }
    shutdown.trigger();
    let _ = monitor.join();

    for entry in trainer.entries() {
        if entry.status() == EntryStatus::Stale {
            println!(
                "  [stale] {}: {}",
                entry.name,
                entry.last_error().unwrap_or_default()
            );
        }
    }
    Ok(())
}
