//! Unified error types for jailconf

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Main error type for jailconf operations
#[derive(Error, Debug)]
pub enum Error {
    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read '{path}': {source}")]
    ConfigRead { path: PathBuf, source: io::Error },

    #[error("Failed to {op} {}: {source}", path.display())]
    Fs {
        op: &'static str,
        path: PathBuf,
        source: io::Error,
    },

    // Config errors
    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config validation failed: {0}")]
    ConfigValidation(String),

    // Input validation
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid jail name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("Jail entry {entry}: required field '{field}' is missing")]
    MissingField { entry: String, field: String },

    #[error("Jail entry {entry}: field '{field}' must be {expected}")]
    FieldType {
        entry: String,
        field: String,
        expected: String,
    },

    #[error("Failed to parse roster: {0}")]
    RosterParse(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid version format: {0}")]
    InvalidVersion(String),

    // Missing resources
    #[error("Jail '{0}' not found")]
    JailNotFound(String),

    #[error("Base archive for version {version} not found at {}; run 'jailconf fetch' first", path.display())]
    BaseArchiveNotFound { version: String, path: PathBuf },

    #[error("Directory {} does not exist; run 'jailconf init' first", .0.display())]
    DirectoryMissing(PathBuf),

    // Collisions
    #[error("Jail '{name}' already exists with slot {slot}")]
    JailExists { name: String, slot: u32 },

    #[error("Slot {slot} is already taken by jail '{name}'")]
    SlotTaken { slot: u32, name: String },

    #[error("Config file already exists: {}", .0.display())]
    ConfExists(PathBuf),

    #[error("Jail root already exists without a config file: {}", .0.display())]
    RootExists(PathBuf),

    // Reconciliation
    #[error("Config drift for jail '{name}': {} differs from the rendered template", path.display())]
    ConfigDrift { name: String, path: PathBuf },

    #[error("Inconsistent config directory: {0}")]
    DataConsistency(String),

    // Identity derivation
    #[error("Invalid slot {slot}: {reason}")]
    InvalidSlot { slot: u32, reason: String },

    // Template errors
    #[error("Template parse failed: {0}")]
    TemplateParse(String),

    #[error("Template references field '{field}' which jail '{jail}' does not provide")]
    TemplateField { field: String, jail: String },

    #[error("Render failed: {0}")]
    Render(String),

    // External tools
    #[error("Failed to extract archive: {0}")]
    ExtractionFailed(String),

    #[error("Failed to clear file flags: {0}")]
    FlagClearFailed(String),

    #[error("Failed to download: {0}")]
    DownloadFailed(String),

    #[error("Checksum mismatch for {file}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        file: String,
        expected: String,
        actual: String,
    },

    #[error("Lifecycle transition rejected: {0}")]
    Lifecycle(String),

    // Partial-failure recovery
    #[error("{error}; cleanup also failed: {cleanup}")]
    Cleanup { error: Box<Error>, cleanup: String },
}

/// Coarse error classes used for reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Validation,
    NotFound,
    AlreadyExists,
    ConfigDrift,
    DataConsistency,
    InvalidSlot,
    Template,
    ExternalTool,
    Io,
}

impl Error {
    /// Filesystem error for `op` on `path`, for use with `map_err`
    pub fn fs(op: &'static str, path: &Path) -> impl FnOnce(io::Error) -> Error {
        let path = path.to_path_buf();
        move |source| Error::Fs { op, path, source }
    }

    /// Classify this error; cleanup wrappers report the class of the original error
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Io(_) | Error::ConfigRead { .. } | Error::Fs { .. } => ErrorClass::Io,
            Error::ConfigParse(_)
            | Error::ConfigValidation(_)
            | Error::Validation(_)
            | Error::InvalidName { .. }
            | Error::MissingField { .. }
            | Error::FieldType { .. }
            | Error::RosterParse(_)
            | Error::Json(_)
            | Error::InvalidVersion(_)
            | Error::Lifecycle(_) => ErrorClass::Validation,
            Error::JailNotFound(_)
            | Error::BaseArchiveNotFound { .. }
            | Error::DirectoryMissing(_) => ErrorClass::NotFound,
            Error::JailExists { .. }
            | Error::SlotTaken { .. }
            | Error::ConfExists(_)
            | Error::RootExists(_) => ErrorClass::AlreadyExists,
            Error::ConfigDrift { .. } => ErrorClass::ConfigDrift,
            Error::DataConsistency(_) => ErrorClass::DataConsistency,
            Error::InvalidSlot { .. } => ErrorClass::InvalidSlot,
            Error::TemplateParse(_) | Error::TemplateField { .. } | Error::Render(_) => {
                ErrorClass::Template
            }
            Error::ExtractionFailed(_)
            | Error::FlagClearFailed(_)
            | Error::DownloadFailed(_)
            | Error::ChecksumMismatch { .. } => ErrorClass::ExternalTool,
            Error::Cleanup { error, .. } => error.class(),
        }
    }

    /// Attach cleanup failures to this error without replacing it
    pub fn with_cleanup_failures(self, failures: Vec<String>) -> Error {
        if failures.is_empty() {
            self
        } else {
            Error::Cleanup {
                error: Box::new(self),
                cleanup: failures.join("; "),
            }
        }
    }
}

/// Describe a failed removal during cleanup
///
/// A target that is already gone counts as cleaned up.
pub fn cleanup_failure(path: &Path, result: io::Result<()>) -> Option<String> {
    match result {
        Ok(()) => None,
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(e) => Some(format!("failed to remove {}: {}", path.display(), e)),
    }
}

/// Result type alias for jailconf operations
pub type Result<T> = std::result::Result<T, Error>;
