//! Cheat tables: named entry lists per game, and their JSON persistence.

mod entry;
mod store;

use crate::error::{Error, Result};

pub use entry::{
    CheatEntry, EntryId, EntryRecord, EntryState, EntryStatus, EntryTarget, EntryUpdate,
};
pub(crate) use entry::lock_state;
pub use store::{TableStore, TableSummary};

/// Ordered entries for one game; names are unique
#[derive(Debug, Clone)]
pub struct CheatTable {
    game_name: String,
    entries: Vec<CheatEntry>,
}

impl CheatTable {
    pub fn new(game_name: impl Into<String>) -> Self {
        Self {
            game_name: game_name.into(),
            entries: Vec::new(),
        }
    }

    pub fn game_name(&self) -> &str {
        &self.game_name
    }

    pub fn entries(&self) -> &[CheatEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: EntryId) -> Result<&CheatEntry> {
        self.entries
            .iter()
            .find(|e| e.id == id)
            .ok_or_else(|| Error::EntryNotFound(id.to_string()))
    }

    pub fn get_mut(&mut self, id: EntryId) -> Result<&mut CheatEntry> {
        self.entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| Error::EntryNotFound(id.to_string()))
    }

    pub fn find_by_name(&self, name: &str) -> Option<&CheatEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// `NameConflict` if another entry (not `except`) already uses `name`.
    pub fn check_name(&self, name: &str, except: Option<EntryId>) -> Result<()> {
        if name.trim().is_empty() {
            return Err(Error::InvalidEntry("entry name is empty".to_string()));
        }
        match self.find_by_name(name) {
            Some(existing) if Some(existing.id) != except => {
                Err(Error::NameConflict(name.to_string()))
            }
            _ => Ok(()),
        }
    }

    /// Append `entry` after checking its name.
    pub fn insert(&mut self, entry: CheatEntry) -> Result<EntryId> {
        self.check_name(&entry.name, None)?;
        let id = entry.id;
        self.entries.push(entry);
        Ok(id)
    }

    pub fn remove(&mut self, id: EntryId) -> Result<CheatEntry> {
        let index = self
            .entries
            .iter()
            .position(|e| e.id == id)
            .ok_or_else(|| Error::EntryNotFound(id.to_string()))?;
        Ok(self.entries.remove(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Value;

    fn entry(name: &str) -> CheatEntry {
        CheatEntry::new(name, EntryTarget::Address(0x1000), Value::I32(1))
    }

    #[test]
    fn test_insert_rejects_duplicate_names() {
        let mut table = CheatTable::new("game");
        table.insert(entry("hp")).unwrap();
        assert!(matches!(
            table.insert(entry("hp")),
            Err(Error::NameConflict(_))
        ));
        assert!(matches!(table.insert(entry("")), Err(Error::InvalidEntry(_))));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_check_name_allows_self() {
        let mut table = CheatTable::new("game");
        let hp = table.insert(entry("hp")).unwrap();
        let mp = table.insert(entry("mp")).unwrap();
        assert!(table.check_name("hp", Some(hp)).is_ok());
        assert!(matches!(
            table.check_name("hp", Some(mp)),
            Err(Error::NameConflict(_))
        ));
    }

    #[test]
    fn test_remove_keeps_order() {
        let mut table = CheatTable::new("game");
        table.insert(entry("a")).unwrap();
        let b = table.insert(entry("b")).unwrap();
        table.insert(entry("c")).unwrap();

        assert_eq!(table.remove(b).unwrap().name, "b");
        let names: Vec<&str> = table.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);
        assert!(matches!(table.remove(b), Err(Error::EntryNotFound(_))));
    }
}
