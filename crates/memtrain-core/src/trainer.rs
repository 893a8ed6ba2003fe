//! The trainer session: one attachment, one active cheat table, and the
//! scanners and freeze tasks that depend on them.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard};

use tracing::{info, warn};

use crate::config::TrainerConfig;
use crate::error::{Error, Result};
use crate::freeze::FreezeEngine;
use crate::memory::{MemoryAccess, ReadMemory, RegionFilter, Value, ValueType, WriteMemory};
use crate::pattern::{Pattern, PatternMatch, PatternScanner};
use crate::pointer::{PointerChain, PointerScanner};
use crate::process::ProcessHandle;
use crate::scan::{CandidateAddress, ScanFilter, ScanOptions, ScanState, ValueScanner};
use crate::table::{
    CheatEntry, CheatTable, EntryId, EntryStatus, EntryUpdate, TableStore, TableSummary,
};

/// Control API over an attached process.
///
/// All methods take `&self`; share it behind an `Arc` to drive it from
/// several threads.
pub struct Trainer {
    config: TrainerConfig,
    handle: RwLock<Option<Arc<ProcessHandle>>>,
    scanner: ValueScanner,
    freezer: FreezeEngine,
    store: TableStore,
    table: Mutex<CheatTable>,
}

impl Trainer {
    pub fn new(config: TrainerConfig) -> Self {
        let freezer = FreezeEngine::new(config.freeze_interval(), config.freeze_max_failures);
        let store = TableStore::new(config.tables_dir.clone());
        Self {
            config,
            handle: RwLock::new(None),
            scanner: ValueScanner::new(),
            freezer,
            store,
            table: Mutex::new(CheatTable::new("untitled")),
        }
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    // --- attachment ---

    pub fn attach(&self, pid: u32) -> Result<()> {
        self.attach_handle(ProcessHandle::attach(pid)?);
        Ok(())
    }

    /// Attach to the first process whose executable matches `name`.
    pub fn attach_by_name(&self, name: &str) -> Result<u32> {
        let handle = ProcessHandle::find_by_name(name)?;
        let pid = handle.pid();
        self.attach_handle(handle);
        Ok(pid)
    }

    /// Adopt an already opened handle, replacing any current attachment.
    pub fn attach_handle(&self, handle: ProcessHandle) {
        self.detach();
        let pid = handle.pid();
        *self.handle.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(handle));
        info!("Session attached to process {}", pid);
    }

    /// Release the attachment, stopping every freeze task and invalidating
    /// the scan session. Returns whether a process was attached.
    pub fn detach(&self) -> bool {
        let handle = self.handle.write().unwrap_or_else(|e| e.into_inner()).take();
        let Some(handle) = handle else {
            return false;
        };

        handle.close();
        self.freezer.stop_all();
        self.scanner.reset();
        info!("Detached from process {}", handle.pid());
        true
    }

    pub fn is_attached(&self) -> bool {
        self.current_handle().is_some_and(|h| h.is_open())
    }

    pub fn pid(&self) -> Option<u32> {
        self.current_handle().map(|h| h.pid())
    }

    fn current_handle(&self) -> Option<Arc<ProcessHandle>> {
        self.handle.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn memory(&self) -> Result<MemoryAccess> {
        self.current_handle()
            .map(MemoryAccess::new)
            .ok_or(Error::NotAttached)
    }

    /// Memory access that keeps `detach` waiting until the guard drops.
    ///
    /// Drop the guard before [`Self::guard`], which may detach.
    fn attachment(&self) -> Result<(RwLockReadGuard<'_, Option<Arc<ProcessHandle>>>, MemoryAccess)> {
        let attached = self.handle.read().unwrap_or_else(|e| e.into_inner());
        let memory = attached
            .as_ref()
            .map(|handle| MemoryAccess::new(Arc::clone(handle)))
            .ok_or(Error::NotAttached)?;
        Ok((attached, memory))
    }

    /// Tear the session down when an operation saw the target exit.
    fn guard<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(Error::ProcessGone) = &result {
            warn!("Target process exited, detaching");
            self.detach();
        }
        result
    }

    // --- value scanning ---

    pub fn first_scan(&self, value: Value) -> Result<usize> {
        let memory = self.memory()?;
        self.guard(
            self.scanner
                .first_scan(&memory, value, ScanOptions::from(&self.config)),
        )
    }

    pub fn next_scan(&self, value: Value) -> Result<usize> {
        let memory = self.memory()?;
        self.guard(self.scanner.next_scan(&memory, value))
    }

    pub fn refine(&self, filter: ScanFilter) -> Result<usize> {
        let memory = self.memory()?;
        self.guard(self.scanner.refine(&memory, filter))
    }

    pub fn candidates(&self, limit: usize) -> Vec<CandidateAddress> {
        self.scanner.candidates(limit)
    }

    pub fn candidate_count(&self) -> usize {
        self.scanner.candidate_count()
    }

    pub fn scan_state(&self) -> ScanState {
        self.scanner.state()
    }

    /// Value type of the active scan session
    pub fn scan_type(&self) -> Option<ValueType> {
        self.scanner.value_type()
    }

    pub fn reset_scan(&self) {
        self.scanner.reset();
    }

    // --- pointer and pattern scanning ---

    pub fn scan_for_pointers(
        &self,
        target: u64,
        max_offset: u64,
        max_depth: usize,
        value_type: ValueType,
    ) -> Result<Vec<PointerChain>> {
        let memory = self.memory()?;
        let scanner = PointerScanner::new(&memory, &self.config.pointer, self.config.scan_chunk_size)
            .value_type(value_type);
        self.guard(scanner.scan(target, max_offset, max_depth))
    }

    pub fn scan_pattern(
        &self,
        pattern: &str,
        filter: RegionFilter,
        first_only: bool,
    ) -> Result<Vec<PatternMatch>> {
        let pattern: Pattern = pattern.parse()?;
        let memory = self.memory()?;
        let scanner = PatternScanner::new(&memory, self.config.scan_chunk_size);
        self.guard(scanner.scan(&pattern, filter, first_only))
    }

    /// Absolute address referenced by a RIP-relative operand at `address`.
    pub fn resolve_relative(&self, address: u64, disp_offset: usize, instr_len: usize) -> Result<u64> {
        let memory = self.memory()?;
        let scanner = PatternScanner::new(&memory, self.config.scan_chunk_size);
        self.guard(scanner.resolve_relative(address, disp_offset, instr_len))
    }

    // --- direct access ---

    pub fn read_value(&self, address: u64, value_type: ValueType) -> Result<Value> {
        let memory = self.memory()?;
        self.guard(memory.read(address, value_type.size(), value_type))
    }

    pub fn write_value(&self, address: u64, value: Value) -> Result<()> {
        let memory = self.memory()?;
        self.guard(memory.write(address, &value, value.value_type()))
    }

    pub fn resolve_chain(&self, chain: &PointerChain) -> Result<u64> {
        let memory = self.memory()?;
        self.guard(crate::pointer::resolve_chain(&memory, chain))
    }

    // --- entries ---

    /// Add an entry to the active table.
    ///
    /// An entry built with `enabled(true)` starts freezing right away; if its
    /// target cannot be resolved it is kept, disabled and marked stale.
    pub fn add_entry(&self, entry: CheatEntry) -> Result<EntryId> {
        let result = {
            let (_attached, memory) = self.attachment()?;
            let mut table = self.lock_table();
            table.check_name(&entry.name, None)?;

            let wants_freeze = entry.is_enabled();
            entry.state().enabled = false;
            let id = table.insert(entry.clone())?;
            info!("Added entry '{}' ({})", entry.name, entry.target);

            match wants_freeze.then(|| self.freezer.enable(&entry, memory)) {
                None | Some(Ok(())) => Ok(id),
                Some(Err(e)) if e.is_terminal() => Err(e),
                Some(Err(e)) => {
                    warn!("Entry '{}' added but not frozen: {}", entry.name, e);
                    let mut state = entry.state();
                    state.status = EntryStatus::Stale;
                    state.last_error = Some(e.to_string());
                    Ok(id)
                }
            }
        };
        self.guard(result)
    }

    /// Patch an entry; a running freeze restarts with the new values.
    pub fn update_entry(&self, id: EntryId, update: EntryUpdate) -> Result<()> {
        let result = {
            let (_attached, memory) = self.attachment()?;
            let mut table = self.lock_table();
            if let Some(name) = &update.name {
                table.check_name(name, Some(id))?;
            }

            let was_active = self.freezer.is_active(id);
            if was_active {
                self.freezer.disable(id);
            }
            let entry = table.get_mut(id)?;
            entry.apply(update)?;

            let entry = entry.clone();
            match was_active.then(|| self.freezer.enable(&entry, memory)) {
                None | Some(Ok(())) => Ok(()),
                Some(Err(e)) if e.is_terminal() => Err(e),
                Some(Err(e)) => {
                    warn!("Entry '{}' updated but could not be re-frozen: {}", entry.name, e);
                    let mut state = entry.state();
                    state.status = EntryStatus::Stale;
                    state.last_error = Some(e.to_string());
                    Ok(())
                }
            }
        };
        self.guard(result)
    }

    /// Remove an entry, stopping its freeze. Works while detached.
    pub fn remove_entry(&self, id: EntryId) -> Result<CheatEntry> {
        let mut table = self.lock_table();
        self.freezer.disable(id);
        let entry = table.remove(id)?;
        info!("Removed entry '{}'", entry.name);
        Ok(entry)
    }

    /// Flip freezing for an entry and return the new enabled state.
    pub fn toggle_entry(&self, id: EntryId) -> Result<bool> {
        if self.freezer.is_active(id) {
            self.memory()?;
            self.disable_entry(id)?;
            Ok(false)
        } else {
            self.enable_entry(id)?;
            Ok(true)
        }
    }

    /// Start freezing an entry. Refused with `PointerUnresolved` when its
    /// target cannot be resolved right now.
    pub fn enable_entry(&self, id: EntryId) -> Result<()> {
        let result = {
            let (_attached, memory) = self.attachment()?;
            let entry = self.lock_table().get(id)?.clone();
            self.freezer.enable(&entry, memory)
        };
        self.guard(result)
    }

    pub fn disable_entry(&self, id: EntryId) -> Result<()> {
        self.lock_table().get(id)?;
        self.freezer.disable(id);
        Ok(())
    }

    /// Current value at an entry's target.
    pub fn read_entry(&self, id: EntryId) -> Result<Value> {
        let memory = self.memory()?;
        let entry = self.lock_table().get(id)?.clone();
        let result = entry
            .target
            .resolve(&memory)
            .and_then(|address| memory.read_value(address, entry.value_type()));
        self.guard(result)
    }

    /// Write an entry's frozen value once without freezing it.
    pub fn apply_entry(&self, id: EntryId) -> Result<()> {
        let memory = self.memory()?;
        let entry = self.lock_table().get(id)?.clone();
        let result = entry
            .target
            .resolve(&memory)
            .and_then(|address| memory.write_value(address, &entry.frozen_value));
        self.guard(result)
    }

    /// Snapshot of the active table's entries. Clones share live state.
    pub fn entries(&self) -> Vec<CheatEntry> {
        self.lock_table().entries().to_vec()
    }

    pub fn entry(&self, id: EntryId) -> Result<CheatEntry> {
        self.lock_table().get(id).cloned()
    }

    pub fn find_entry(&self, name: &str) -> Option<CheatEntry> {
        self.lock_table().find_by_name(name).cloned()
    }

    pub fn active_freezes(&self) -> usize {
        self.freezer.active_count()
    }

    // --- tables ---

    pub fn table_name(&self) -> String {
        self.lock_table().game_name().to_string()
    }

    /// Replace the active table with an empty one.
    pub fn new_table(&self, game_name: &str) {
        let mut table = self.lock_table();
        self.freezer.stop_all();
        *table = CheatTable::new(game_name);
        info!("Started new table '{}'", game_name);
    }

    pub fn save_table(&self) -> Result<PathBuf> {
        let table = self.lock_table();
        self.store.save(&table)
    }

    /// Make a persisted table active. Its entries start disabled.
    pub fn load_table(&self, game_name: &str) -> Result<usize> {
        let loaded = self.store.load(game_name)?;
        let count = loaded.len();
        let mut table = self.lock_table();
        self.freezer.stop_all();
        *table = loaded;
        Ok(count)
    }

    pub fn list_tables(&self) -> Result<Vec<TableSummary>> {
        self.store.list()
    }

    pub fn delete_table(&self, game_name: &str) -> Result<()> {
        self.store.delete(game_name)
    }

    fn lock_table(&self) -> MutexGuard<'_, CheatTable> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for Trainer {
    fn drop(&mut self) {
        self.detach();
    }
}
