//! Engine configuration.
//!
//! Every field has a default, so a TOML file only needs the keys it
//! overrides:
//!
//! ```toml
//! tables_dir = "my_tables"
//! freeze_interval_ms = 50
//!
//! [pointer]
//! max_depth = 4
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;

/// Default bounded read size for region scans (1MB)
pub const DEFAULT_SCAN_CHUNK_SIZE: usize = 1024 * 1024;

/// Pointer scan limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PointerScanConfig {
    /// Largest offset accepted between a pointer value and its target
    pub max_offset: u64,
    /// Deepest chain a scan may request
    pub max_depth: usize,
    /// Number of ranked chains returned
    pub max_results: usize,
    /// Nodes expanded per BFS level
    pub max_frontier: usize,
    /// Upper bound on words kept in the pointer map
    pub max_pointer_map: usize,
}

impl Default for PointerScanConfig {
    fn default() -> Self {
        Self {
            max_offset: 4096,
            max_depth: 5,
            max_results: 100,
            max_frontier: 4096,
            max_pointer_map: 16 * 1024 * 1024,
        }
    }
}

/// Configuration for a [`crate::Trainer`] session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    /// Directory holding persisted cheat tables
    pub tables_dir: PathBuf,
    /// Delay between freeze writes
    pub freeze_interval_ms: u64,
    /// Consecutive resolution failures before a freeze task gives up
    pub freeze_max_failures: u32,
    /// Only consider addresses aligned to the value size during value scans
    pub fast_scan: bool,
    /// Cap on candidates kept by a first scan
    pub max_candidates: usize,
    /// Bounded buffer size for chunked region reads
    pub scan_chunk_size: usize,
    pub pointer: PointerScanConfig,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            tables_dir: PathBuf::from("tables"),
            freeze_interval_ms: 100,
            freeze_max_failures: 10,
            fast_scan: true,
            max_candidates: 5_000_000,
            scan_chunk_size: DEFAULT_SCAN_CHUNK_SIZE,
            pointer: PointerScanConfig::default(),
        }
    }
}

impl TrainerConfig {
    /// Create a new configuration builder
    pub fn builder() -> TrainerConfigBuilder {
        TrainerConfigBuilder::default()
    }

    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)?;
        let config: TrainerConfig = toml::from_str(&content)?;
        debug!("Loaded config from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn freeze_interval(&self) -> Duration {
        Duration::from_millis(self.freeze_interval_ms)
    }
}

/// Builder for TrainerConfig
#[derive(Debug, Clone, Default)]
pub struct TrainerConfigBuilder {
    tables_dir: Option<PathBuf>,
    freeze_interval: Option<Duration>,
    freeze_max_failures: Option<u32>,
    fast_scan: Option<bool>,
    max_candidates: Option<usize>,
    scan_chunk_size: Option<usize>,
    pointer: Option<PointerScanConfig>,
}

impl TrainerConfigBuilder {
    /// Set the directory for persisted tables
    pub fn tables_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.tables_dir = Some(path.into());
        self
    }

    /// Set the delay between freeze writes
    pub fn freeze_interval(mut self, interval: Duration) -> Self {
        self.freeze_interval = Some(interval);
        self
    }

    /// Set how many consecutive failures stop a freeze task
    pub fn freeze_max_failures(mut self, failures: u32) -> Self {
        self.freeze_max_failures = Some(failures);
        self
    }

    pub fn fast_scan(mut self, enabled: bool) -> Self {
        self.fast_scan = Some(enabled);
        self
    }

    pub fn max_candidates(mut self, max: usize) -> Self {
        self.max_candidates = Some(max);
        self
    }

    pub fn scan_chunk_size(mut self, size: usize) -> Self {
        self.scan_chunk_size = Some(size);
        self
    }

    pub fn pointer(mut self, pointer: PointerScanConfig) -> Self {
        self.pointer = Some(pointer);
        self
    }

    /// Build the configuration
    pub fn build(self) -> TrainerConfig {
        let default = TrainerConfig::default();
        TrainerConfig {
            tables_dir: self.tables_dir.unwrap_or(default.tables_dir),
            freeze_interval_ms: self
                .freeze_interval
                .map(|d| d.as_millis() as u64)
                .unwrap_or(default.freeze_interval_ms),
            freeze_max_failures: self
                .freeze_max_failures
                .unwrap_or(default.freeze_max_failures),
            fast_scan: self.fast_scan.unwrap_or(default.fast_scan),
            max_candidates: self.max_candidates.unwrap_or(default.max_candidates),
            scan_chunk_size: self
                .scan_chunk_size
                .unwrap_or(default.scan_chunk_size)
                .max(64),
            pointer: self.pointer.unwrap_or(default.pointer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_builder_overrides() {
        let config = TrainerConfig::builder()
            .tables_dir("elsewhere")
            .freeze_interval(Duration::from_millis(25))
            .freeze_max_failures(3)
            .build();

        assert_eq!(config.tables_dir, PathBuf::from("elsewhere"));
        assert_eq!(config.freeze_interval(), Duration::from_millis(25));
        assert_eq!(config.freeze_max_failures, 3);
        assert!(config.fast_scan);
        assert_eq!(config.pointer.max_depth, 5);
    }

    #[test]
    fn test_load_partial_toml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "freeze_interval_ms = 50\nunknown_key = true\n\n[pointer]\nmax_depth = 3"
        )
        .unwrap();

        let config = TrainerConfig::load(file.path()).unwrap();
        assert_eq!(config.freeze_interval_ms, 50);
        assert_eq!(config.pointer.max_depth, 3);
        assert_eq!(config.pointer.max_offset, 4096);
        assert_eq!(config.tables_dir, PathBuf::from("tables"));
    }

    #[test]
    fn test_load_invalid_toml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "freeze_interval_ms = \"soon\"").unwrap();
        assert!(matches!(
            TrainerConfig::load(file.path()),
            Err(crate::Error::Config(_))
        ));
    }
}
