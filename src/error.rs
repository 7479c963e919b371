//! Error types for the storage engine.

use thiserror::Error;

/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors surfaced by the storage API.
///
/// Nothing is retried internally. `Io` and `CorruptPage` are fatal
/// for the session; the remaining kinds are user errors that leave
/// the database unchanged.
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O error from the underlying file system.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Insert found an existing cell with the same key.
    #[error("duplicate key {0}")]
    DuplicateKey(i32),

    /// Lookup or delete missed.
    #[error("key {0} not found")]
    NotFound(i32),

    /// Record exceeds the single-cell limit (no overflow pages).
    #[error("record too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    /// Record bytes or values do not match the expected schema.
    #[error("record does not match schema: {0}")]
    SchemaMismatch(String),

    /// A tree invariant failed during validation.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// A page header failed sanity checks on read. The pager refuses
    /// further writes once this is raised.
    #[error("corrupt page {page}: {detail}")]
    CorruptPage { page: u32, detail: String },

    /// The file is not a database this engine understands.
    #[error("invalid database file: {0}")]
    InvalidDatabaseFile(String),

    /// Named table is absent from the catalog.
    #[error("table {0:?} not found")]
    TableNotFound(String),

    /// Catalog already holds a table under this name.
    #[error("table {0:?} already exists")]
    TableExists(String),

    /// Schema failed structural validation.
    #[error("invalid schema: {0}")]
    InvalidSchema(String),
}

impl StorageError {
    pub fn schema_mismatch(msg: impl Into<String>) -> Self {
        Self::SchemaMismatch(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn corrupt_page(page: u32, detail: impl Into<String>) -> Self {
        Self::CorruptPage {
            page,
            detail: detail.into(),
        }
    }

    pub fn invalid_db(msg: impl Into<String>) -> Self {
        Self::InvalidDatabaseFile(msg.into())
    }

    pub fn invalid_schema(msg: impl Into<String>) -> Self {
        Self::InvalidSchema(msg.into())
    }
}
