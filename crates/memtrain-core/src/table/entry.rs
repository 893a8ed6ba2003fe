use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::{Error, Result};
use crate::memory::{ReadMemory, Value, ValueType};
use crate::pointer::{ChainRoot, PointerChain, resolve_chain};

static NEXT_ENTRY_ID: AtomicU64 = AtomicU64::new(1);

/// Runtime key of an entry; not persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(u64);

impl EntryId {
    fn next() -> Self {
        Self(NEXT_ENTRY_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where an entry's value lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryTarget {
    Address(u64),
    Pointer(PointerChain),
}

impl EntryTarget {
    /// Current absolute address of the value.
    pub fn resolve<R: ReadMemory + ?Sized>(&self, reader: &R) -> Result<u64> {
        match self {
            Self::Address(address) => Ok(*address),
            Self::Pointer(chain) => resolve_chain(reader, chain),
        }
    }
}

impl fmt::Display for EntryTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Address(address) => write!(f, "0x{:X}", address),
            Self::Pointer(chain) => write!(f, "{}", chain),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EntryStatus {
    #[default]
    Ok,
    /// The freeze task gave up on this entry
    Stale,
}

/// Live state shared between an entry and its freeze task
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryState {
    pub enabled: bool,
    pub status: EntryStatus,
    pub last_error: Option<String>,
}

/// One named value in a cheat table.
///
/// Clones share the live [`EntryState`].
#[derive(Debug, Clone)]
pub struct CheatEntry {
    pub id: EntryId,
    pub name: String,
    pub description: String,
    pub target: EntryTarget,
    pub frozen_value: Value,
    pub hotkey: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    state: Arc<Mutex<EntryState>>,
}

impl CheatEntry {
    pub fn new(name: impl Into<String>, target: EntryTarget, frozen_value: Value) -> Self {
        let now = Utc::now();
        let mut entry = Self {
            id: EntryId::next(),
            name: name.into(),
            description: String::new(),
            target,
            frozen_value,
            hotkey: None,
            created_at: now,
            updated_at: now,
            state: Arc::default(),
        };
        entry.sync_chain_type();
        entry
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_hotkey(mut self, hotkey: impl Into<String>) -> Self {
        self.hotkey = Some(hotkey.into());
        self
    }

    /// Request freezing when the entry is added to a table.
    pub fn enabled(self, enabled: bool) -> Self {
        self.state().enabled = enabled;
        self
    }

    pub fn value_type(&self) -> ValueType {
        self.frozen_value.value_type()
    }

    pub fn is_enabled(&self) -> bool {
        self.state().enabled
    }

    pub fn status(&self) -> EntryStatus {
        self.state().status
    }

    pub fn last_error(&self) -> Option<String> {
        self.state().last_error.clone()
    }

    pub fn snapshot(&self) -> EntryState {
        self.state().clone()
    }

    pub(crate) fn shared_state(&self) -> Arc<Mutex<EntryState>> {
        Arc::clone(&self.state)
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, EntryState> {
        lock_state(&self.state)
    }

    /// Apply `update` in place. Validation happens before any field changes.
    pub fn apply(&mut self, update: EntryUpdate) -> Result<()> {
        if let Some(name) = &update.name
            && name.trim().is_empty()
        {
            return Err(Error::InvalidEntry("entry name is empty".to_string()));
        }

        if let Some(name) = update.name {
            self.name = name;
        }
        if let Some(description) = update.description {
            self.description = description;
        }
        if let Some(target) = update.target {
            self.target = target;
        }
        if let Some(value) = update.frozen_value {
            self.frozen_value = value;
        }
        if let Some(hotkey) = update.hotkey {
            self.hotkey = hotkey;
        }
        self.sync_chain_type();
        self.updated_at = Utc::now();
        Ok(())
    }

    fn sync_chain_type(&mut self) {
        let value_type = self.value_type();
        if let EntryTarget::Pointer(chain) = &mut self.target {
            chain.value_type = value_type;
        }
    }

    pub fn to_record(&self) -> EntryRecord {
        let (address, pointer_base, offsets) = match &self.target {
            EntryTarget::Address(address) => (Some(format!("0x{:X}", address)), None, Vec::new()),
            EntryTarget::Pointer(chain) => (None, Some(chain.root.to_string()), chain.offsets.clone()),
        };
        EntryRecord {
            name: self.name.clone(),
            description: self.description.clone(),
            address,
            pointer_base,
            offsets,
            value_type: self.value_type(),
            frozen_value: self.frozen_value.to_string(),
            hotkey: self.hotkey.clone(),
            enabled: self.is_enabled(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

pub(crate) fn lock_state(state: &Mutex<EntryState>) -> MutexGuard<'_, EntryState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

/// Partial modification of an entry; `None` leaves a field as is.
///
/// The value type follows `frozen_value`.
#[derive(Debug, Clone, Default)]
pub struct EntryUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub target: Option<EntryTarget>,
    pub frozen_value: Option<Value>,
    pub hotkey: Option<Option<String>>,
}

impl EntryUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.target.is_none()
            && self.frozen_value.is_none()
            && self.hotkey.is_none()
    }
}

/// Persisted form of an entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryRecord {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pointer_base: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub offsets: Vec<i64>,
    pub value_type: ValueType,
    pub frozen_value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hotkey: Option<String>,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<EntryRecord> for CheatEntry {
    type Error = Error;

    /// Validates the record; the resulting entry is always disabled.
    fn try_from(record: EntryRecord) -> Result<Self> {
        if record.name.trim().is_empty() {
            return Err(Error::InvalidEntry("entry name is empty".to_string()));
        }

        let target = match (&record.address, &record.pointer_base) {
            (Some(address), None) => EntryTarget::Address(parse_address(address).ok_or_else(|| {
                Error::InvalidEntry(format!("'{}': invalid address '{}'", record.name, address))
            })?),
            (None, Some(base)) => {
                let root: ChainRoot = base.parse().map_err(|_| {
                    Error::InvalidEntry(format!("'{}': invalid pointer base '{}'", record.name, base))
                })?;
                EntryTarget::Pointer(PointerChain::new(
                    root,
                    record.offsets.clone(),
                    record.value_type,
                ))
            }
            (Some(_), Some(_)) => {
                return Err(Error::InvalidEntry(format!(
                    "'{}' has both an address and a pointer base",
                    record.name
                )));
            }
            (None, None) => {
                return Err(Error::InvalidEntry(format!(
                    "'{}' has neither an address nor a pointer base",
                    record.name
                )));
            }
        };

        let frozen_value = record.value_type.parse_value(&record.frozen_value)?;
        let mut entry = CheatEntry::new(record.name, target, frozen_value);
        entry.description = record.description;
        entry.hotkey = record.hotkey;
        entry.created_at = record.created_at;
        entry.updated_at = record.updated_at;
        Ok(entry)
    }
}

fn parse_address(text: &str) -> Option<u64> {
    let text = text.trim();
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}
