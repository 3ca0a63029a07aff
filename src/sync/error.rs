//! Error types for the sync engine.

use thiserror::Error;

use crate::db::StoreError;
use crate::models::EntityKind;

pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("sync not configured: add sync.server_url to the config file")]
    NotConfigured,

    #[error("local store error: {0}")]
    Storage(#[from] StoreError),

    #[error("{kind} '{key}' not found on server")]
    NotFound { kind: EntityKind, key: String },

    /// The server holds a newer version than the one the edit was based on.
    #[error("{kind} '{key}' was changed on the server")]
    Conflict { kind: EntityKind, key: String },

    #[error("transport error: {message}")]
    Transport { message: String, retryable: bool },

    #[error("{kind} '{key}' waits on parent '{parent_key}', which has not been uploaded yet")]
    ParentNotSynced {
        kind: EntityKind,
        key: String,
        parent_key: String,
    },

    #[error("{kind} '{key}' is not in the local store")]
    MissingLocal { kind: EntityKind, key: String },

    #[error("a sync pass for {0} is already running")]
    PassInProgress(EntityKind),
}

impl SyncError {
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Whether a later pass may succeed without user action.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::ParentNotSynced { .. } | SyncError::PassInProgress(_) => true,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        // Connection-level failures and timeouts can succeed on retry.
        let retryable = e.is_timeout() || e.is_connect() || e.is_request();
        Self::Transport {
            message: e.to_string(),
            retryable,
        }
    }
}
