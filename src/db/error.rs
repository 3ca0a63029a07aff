use crate::models::EntityKind;

/// Errors raised by the local store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("failed to prepare database directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("{kind} with key '{key}' already exists")]
    DuplicateKey { kind: EntityKind, key: String },

    #[error("{kind} row {id} no longer exists")]
    RowMissing { kind: EntityKind, id: i64 },

    #[error("stored {kind} '{key}' is unreadable: {reason}")]
    Corrupt {
        kind: EntityKind,
        key: String,
        reason: String,
    },

    #[error("attachment '{key}' cannot be saved before its parent item '{parent_key}'")]
    ParentNotPersisted { key: String, parent_key: String },
}
