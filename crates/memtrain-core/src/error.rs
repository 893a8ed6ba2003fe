use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Process not found: {0}")]
    ProcessNotFound(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Target process has exited")]
    ProcessGone,

    #[error("No process attached")]
    NotAttached,

    #[error("Access violation at address {address:#x} ({size} bytes)")]
    AccessViolation { address: u64, size: usize },

    #[error("Invalid type: {0}")]
    InvalidType(String),

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("Pointer could not be resolved: {0}")]
    PointerUnresolved(String),

    #[error("An entry named '{0}' already exists")]
    NameConflict(String),

    #[error("A scan is already in progress for this session")]
    ScanInProgress,

    #[error("No active scan session; run a first scan")]
    NoActiveScan,

    #[error("Invalid entry: {0}")]
    InvalidEntry(String),

    #[error("Entry not found: {0}")]
    EntryNotFound(String),

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Platform error: {0}")]
    Platform(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Errors after which the attachment is unusable.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Error::ProcessGone | Error::NotAttached)
    }
}
