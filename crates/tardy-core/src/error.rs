use std::fmt;

use crate::position::PositionId;

/// Machine-readable error codes for operators and automation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    SourceUnavailable,
    SourceRejected,
    MissingPositionData,
    CorruptState,
    StateWriteFailed,
    LockContention,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::SourceUnavailable => "E2001",
            Self::SourceRejected => "E2002",
            Self::MissingPositionData => "E2003",
            Self::CorruptState => "E3001",
            Self::StateWriteFailed => "E5001",
            Self::LockContention => "E5002",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::SourceUnavailable => "Position source unavailable",
            Self::SourceRejected => "Position source rejected the request",
            Self::MissingPositionData => "Position is missing required data",
            Self::CorruptState => "Persisted delinquency state is corrupt",
            Self::StateWriteFailed => "State store write failed",
            Self::LockContention => "Lock contention",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::SourceUnavailable => {
                Some("Nothing was committed. The next scheduled run will retry.")
            }
            Self::SourceRejected => Some("Check credentials and the requested tenant."),
            Self::MissingPositionData => {
                Some("The source returned an incomplete position; report it upstream.")
            }
            Self::CorruptState => {
                Some("Inspect the state database; values must be decimal position ids.")
            }
            Self::StateWriteFailed => Some("Check disk space and write permissions."),
            Self::LockContention => Some("Retry after the other `tardy` run releases its lock."),
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Failure reading or writing the durable state store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite state store failure: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to prepare state directory {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode or decode stored values for {namespace}/{key}: {source}")]
    Payload {
        namespace: String,
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("stored value {value:?} under {namespace}/{key} is not a position id")]
    Corrupt {
        namespace: String,
        key: String,
        value: String,
    },

    #[error("state store lock poisoned")]
    Poisoned,
}

impl StoreError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Sqlite(_) | Self::Io { .. } => ErrorCode::StateWriteFailed,
            Self::Payload { .. } | Self::Corrupt { .. } => ErrorCode::CorruptState,
            Self::Poisoned => ErrorCode::InternalUnexpected,
        }
    }
}

/// Failure talking to the external position source.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    /// Transient: the source could not be reached or timed out.
    #[error("position source unavailable: {0}")]
    Unavailable(String),

    /// The source answered but refused the request.
    #[error("position source rejected request: {0}")]
    Rejected(String),
}

impl SourceError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Unavailable(_) => ErrorCode::SourceUnavailable,
            Self::Rejected(_) => ErrorCode::SourceRejected,
        }
    }
}

/// Reason a reconciliation run aborted without committing.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("position {position} is missing {field}; refusing to guess its category")]
    MissingData {
        position: PositionId,
        field: &'static str,
    },

    #[error("reconciliation worker panicked")]
    WorkerPanicked,
}

impl ReconcileError {
    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Source(err) => err.code(),
            Self::Store(err) => err.code(),
            Self::MissingData { .. } => ErrorCode::MissingPositionData,
            Self::WorkerPanicked => ErrorCode::InternalUnexpected,
        }
    }

    /// Optional remediation hint for operators.
    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }
}
