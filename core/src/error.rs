use thiserror::Error;

#[derive(Error, Debug)]
pub enum DashError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unknown field '{name}'")]
    InvalidField { name: String },

    #[error("Invalid root identifier '{raw}'")]
    InvalidRoot { raw: String },

    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("Upstream '{source_name}' unavailable: {message}")]
    Upstream {
        source_name: String,
        message: String,
        retryable: bool,
    },

    #[error("Data unavailable: no records have been loaded")]
    DataUnavailable,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Coarse classification callers use to pick a response shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The request itself was malformed.
    Client,
    /// A collaborator (record source, language model) failed or has no data.
    Upstream,
    Internal,
}

impl DashError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DashError::InvalidField { .. }
            | DashError::InvalidRoot { .. }
            | DashError::InvalidParameter { .. } => ErrorKind::Client,
            DashError::Upstream { .. } | DashError::DataUnavailable => ErrorKind::Upstream,
            DashError::Database(_)
            | DashError::Serialization(_)
            | DashError::Io(_)
            | DashError::Other(_) => ErrorKind::Internal,
        }
    }

    /// Whether repeating the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            DashError::Upstream { retryable, .. } => *retryable,
            DashError::DataUnavailable => true,
            _ => false,
        }
    }

    pub fn invalid_parameter(name: &str, reason: impl Into<String>) -> Self {
        DashError::InvalidParameter {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

pub type DashResult<T> = Result<T, DashError>;
