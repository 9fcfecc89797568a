//! Error types for the depletion result store.
//!
//! Errors are layered the same way the store is: configuration problems,
//! storage/format problems, and read-back analysis problems each get their
//! own enum, and [`StoreError`] wraps them for callers that only want one
//! type to propagate.

use std::path::PathBuf;

use thiserror::Error;

use crate::nuclide::NuclideCode;

/// Errors raised while validating store configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Compression level {level} is out of range [0, 9]")]
    CompressionLevelOutOfRange {
        level: u32,
    },

    #[error("Compaction threshold {percent}% is out of range [0, 100]")]
    CompactionThresholdOutOfRange {
        percent: u8,
    },

    #[error("Unknown compression algorithm '{name}'")]
    UnknownAlgorithm {
        name: String,
    },

    #[error("Invalid configuration document: {message}")]
    InvalidDocument {
        message: String,
    },
}

/// Errors raised by the backing file, its framing, or the node tree.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store file {path} is corrupted: {message}")]
    Corrupted {
        path: PathBuf,
        message: String,
    },

    #[error("Store file {path} is locked by another process")]
    Locked {
        path: PathBuf,
    },

    #[error("Session was opened read-only")]
    ReadOnly,

    #[error("Invalid node name '{name}'")]
    InvalidNodeName {
        name: String,
    },

    #[error("Node not found: {path}")]
    NodeNotFound {
        path: String,
    },

    #[error("Node already exists: {path}")]
    NodeExists {
        path: String,
    },

    #[error("Node {path} is a {actual}, expected a {expected}")]
    NodeKindMismatch {
        path: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Row of width {actual} cannot be appended to {path} (width {expected})")]
    RowWidthMismatch {
        path: String,
        expected: usize,
        actual: usize,
    },

    #[error("Table {path} schema mismatch: {reason}")]
    SchemaMismatch {
        path: String,
        reason: String,
    },

    #[error("Inconsistent composition nodes at {path}: {reason}")]
    InconsistentComposition {
        path: String,
        reason: String,
    },

    #[error("Nuclides '{first}' and '{second}' share nuclide code {code}")]
    DuplicateNuclideCode {
        first: String,
        second: String,
        code: NuclideCode,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StorageError {
    /// Returns true if the error reports a table schema mismatch.
    #[must_use]
    pub const fn is_schema_mismatch(&self) -> bool {
        matches!(self, Self::SchemaMismatch { .. })
    }

    /// Returns true if the backing file failed an integrity check.
    #[must_use]
    pub const fn is_corruption(&self) -> bool {
        matches!(self, Self::Corrupted { .. })
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Errors raised by the criticality trend predictor.
#[derive(Debug, Error)]
pub enum PredictionError {
    #[error("Criticality prediction needs at least {required} end-of-step values, found {found}")]
    InsufficientHistory {
        required: usize,
        found: usize,
    },
}

/// Top-level error type.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Prediction error: {0}")]
    Prediction(#[from] PredictionError),
}

impl StoreError {
    /// Returns true if this is a configuration error.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Returns true if this is a storage error.
    #[must_use]
    pub const fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Returns true if this is a prediction error.
    #[must_use]
    pub const fn is_prediction(&self) -> bool {
        matches!(self, Self::Prediction(_))
    }

    /// Returns true if a fixed table schema was violated.
    #[must_use]
    pub const fn is_schema_mismatch(&self) -> bool {
        match self {
            Self::Storage(e) => e.is_schema_mismatch(),
            _ => false,
        }
    }

    /// Returns true if the store file was missing when it had to exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Storage(StorageError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound
        )
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(StorageError::Io(err))
    }
}

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
