use fieldgrid_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("row not found: {0}")]
    RowNotFound(String),

    #[error("row already present: {0}")]
    DuplicateRow(String),

    #[error("column not found: {0}")]
    ColumnNotFound(String),

    #[error("system column {0} cannot be changed this way")]
    SystemColumn(String),

    #[error("invalid value for {column}: {reason}")]
    Validation { column: String, reason: String },

    #[error("invalid config: {0}")]
    Config(String),
}

/// Failure reported by a remote collaborator through a request's error channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("duplicate field name: {0}")]
    DuplicateName(String),

    #[error("invalid field name: {0}")]
    InvalidName(String),

    #[error("field definition is still in use")]
    InUse,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("request failed: {0}")]
    Transient(String),
}

impl RemoteError {
    /// Validation failures are surfaced inline and never trigger a resync.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::DuplicateName(_) | Self::InvalidName(_))
    }
}
