use std::fs;
use std::io::Write;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use super::{CheatEntry, CheatTable, EntryRecord};
use crate::error::{Error, Result};

/// On-disk shape of a table
#[derive(Debug, Serialize, Deserialize)]
struct TableFile {
    game_name: String,
    #[serde(default)]
    entries: Vec<EntryRecord>,
}

/// A persisted table as reported by [`TableStore::list`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSummary {
    pub game_name: String,
    pub entries: usize,
    pub path: PathBuf,
}

/// One JSON file per table under a directory
#[derive(Debug, Clone)]
pub struct TableStore {
    dir: PathBuf,
}

impl TableStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    /// File backing `game_name`
    pub fn path_for(&self, game_name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(game_name)))
    }

    /// Write the full entry list, replacing any previous file.
    ///
    /// The JSON goes to a temporary file in the same directory which is then
    /// renamed over the old one, so an interrupted save leaves the previous
    /// table intact.
    pub fn save(&self, table: &CheatTable) -> Result<PathBuf> {
        let file = TableFile {
            game_name: table.game_name().to_string(),
            entries: table.entries().iter().map(CheatEntry::to_record).collect(),
        };
        let content = serde_json::to_string_pretty(&file)?;

        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(table.game_name());
        let mut staged = NamedTempFile::new_in(&self.dir)?;
        staged.write_all(content.as_bytes())?;
        staged.as_file().sync_all()?;
        staged.persist(&path).map_err(|e| e.error)?;
        info!(
            "Saved table '{}' ({} entries) to {}",
            table.game_name(),
            table.len(),
            path.display()
        );
        Ok(path)
    }

    /// Restore a table. Every entry comes back disabled.
    pub fn load(&self, game_name: &str) -> Result<CheatTable> {
        let path = self.path_for(game_name);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::TableNotFound(game_name.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let file: TableFile = serde_json::from_str(&content)?;

        let mut table = CheatTable::new(file.game_name);
        for record in file.entries {
            if record.enabled {
                debug!("Entry '{}' was enabled when saved; loading disabled", record.name);
            }
            table.insert(CheatEntry::try_from(record)?)?;
        }

        info!(
            "Loaded table '{}' ({} entries) from {}",
            table.game_name(),
            table.len(),
            path.display()
        );
        Ok(table)
    }

    /// Tables found in the directory, sorted by game name.
    ///
    /// Files that fail to parse are skipped with a warning.
    pub fn list(&self) -> Result<Vec<TableSummary>> {
        let dir = match fs::read_dir(&self.dir) {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut tables = Vec::new();
        for item in dir {
            let path = item?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let parsed = fs::read_to_string(&path)
                .map_err(Error::from)
                .and_then(|content| serde_json::from_str::<TableFile>(&content).map_err(Error::from));
            match parsed {
                Ok(file) => tables.push(TableSummary {
                    game_name: file.game_name,
                    entries: file.entries.len(),
                    path,
                }),
                Err(e) => warn!("Skipping unreadable table {}: {}", path.display(), e),
            }
        }

        tables.sort_by(|a, b| a.game_name.cmp(&b.game_name));
        Ok(tables)
    }

    pub fn delete(&self, game_name: &str) -> Result<()> {
        let path = self.path_for(game_name);
        match fs::remove_file(&path) {
            Ok(()) => {
                info!("Deleted table '{}' ({})", game_name, path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::TableNotFound(game_name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// File-system safe stem for a game name.
fn file_stem(game_name: &str) -> String {
    let stem: String = game_name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let stem = stem.trim_matches('.');
    if stem.is_empty() {
        "table".to_string()
    } else {
        stem.to_string()
    }
}
