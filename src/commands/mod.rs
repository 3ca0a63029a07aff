mod attachment;
mod auto_sync;
mod collection;
mod config_cmd;
mod item;
mod sync_cmd;

pub use attachment::{AttachmentCommand, AttachmentSubcommand};
pub use auto_sync::try_auto_sync;
pub use collection::{CollectionCommand, CollectionSubcommand};
pub use config_cmd::ConfigCommand;
pub use item::{ItemCommand, ItemSubcommand};
pub use sync_cmd::SyncCommand;

use clap::ValueEnum;
use serde_json::{json, Value};

use bibsync::models::Entity;

#[derive(Clone, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// JSON view of a stored record for `--format json`.
fn record_json<T: Entity>(record: &T) -> Value {
    json!({
        "kind": T::KIND,
        "key": record.key(),
        "parentKey": record.parent_key(),
        "etag": record.etag(),
        "dirty": record.dirty(),
        "syncedAt": record.synced_at().map(|dt| dt.to_rfc3339()),
        "content": record.content(),
    })
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() > width {
        let cut: String = text.chars().take(width.saturating_sub(3)).collect();
        format!("{}...", cut)
    } else {
        text.to_string()
    }
}
