use thiserror::Error as ThisError;

/// The failure taxonomy shared by all arkiv crates.
///
/// One tagged type instead of an exception hierarchy: callers branch on
/// [`Error::kind`] (or match the variant directly) and read the detail for
/// diagnostics.
#[derive(Debug, ThisError)]
pub enum Error {
    /// Object, container, or cursor absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// WORM rewrite with differing content, or an optimistic-concurrency
    /// filter miss during reconstruction.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A backup bundle is malformed (missing metadata, lifecycle, or offset).
    #[error("backup integrity: {0}")]
    BackupIntegrity(String),

    /// Transient document-store failure that is not a guard-filter miss.
    #[error("database: {0}")]
    Database(String),

    /// I/O failure reading or writing object bytes.
    #[error("storage: {0}")]
    Storage(#[from] std::io::Error),

    /// Invalid parameter, rejected before any I/O.
    #[error("illegal argument: {0}")]
    IllegalArgument(String),
}

/// Discriminant of [`Error`], for branching without destructuring.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    BackupIntegrity,
    Database,
    Storage,
    IllegalArgument,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::BackupIntegrity(_) => ErrorKind::BackupIntegrity,
            Error::Database(_) => ErrorKind::Database,
            Error::Storage(_) => ErrorKind::Storage,
            Error::IllegalArgument(_) => ErrorKind::IllegalArgument,
        }
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Error::NotFound(detail.into())
    }

    pub fn conflict(detail: impl Into<String>) -> Self {
        Error::Conflict(detail.into())
    }

    pub fn backup_integrity(detail: impl Into<String>) -> Self {
        Error::BackupIntegrity(detail.into())
    }

    pub fn database(detail: impl Into<String>) -> Self {
        Error::Database(detail.into())
    }

    pub fn illegal_argument(detail: impl Into<String>) -> Self {
        Error::IllegalArgument(detail.into())
    }
}

/// Result alias used across the workspace.
pub type Result<T> = std::result::Result<T, Error>;
