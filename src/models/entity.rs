//! Shared shape of the three synced entity kinds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::{Content, DirtyState, LocalIdentity};
use crate::db::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Item,
    Collection,
    Attachment,
}

impl EntityKind {
    /// Referential sync order: parents before the records that point at them.
    pub const SYNC_ORDER: [EntityKind; 3] = [
        EntityKind::Collection,
        EntityKind::Item,
        EntityKind::Attachment,
    ];

    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::Item => "items",
            EntityKind::Collection => "collections",
            EntityKind::Attachment => "attachments",
        }
    }

    /// Kind referenced by this kind's `parent_key`, if it has a parent relation.
    pub fn parent_kind(&self) -> Option<EntityKind> {
        match self {
            EntityKind::Item => None,
            EntityKind::Collection => Some(EntityKind::Collection),
            EntityKind::Attachment => Some(EntityKind::Item),
        }
    }

    /// Kinds whose `parent_key` points at this kind.
    pub fn child_kinds(&self) -> &'static [EntityKind] {
        match self {
            EntityKind::Item => &[EntityKind::Attachment],
            EntityKind::Collection => &[EntityKind::Collection],
            EntityKind::Attachment => &[],
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Item => write!(f, "item"),
            EntityKind::Collection => write!(f, "collection"),
            EntityKind::Attachment => write!(f, "attachment"),
        }
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "item" | "items" => Ok(EntityKind::Item),
            "collection" | "collections" => Ok(EntityKind::Collection),
            "attachment" | "attachments" => Ok(EntityKind::Attachment),
            _ => Err(format!(
                "Invalid entity kind '{}'. Valid options: item, collection, attachment",
                s
            )),
        }
    }
}

/// Generates a client-side key for a record the server has not seen yet.
pub fn new_local_key() -> String {
    Uuid::new_v4().to_string()
}

/// Fields every synced record carries, whatever its kind.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordCore {
    pub(crate) key: String,
    pub(crate) identity: LocalIdentity,
    pub(crate) etag: String,
    pub(crate) dirty: DirtyState,
    pub(crate) content: Content,
    pub(crate) synced_at: Option<DateTime<Utc>>,
}

impl RecordCore {
    /// A record created locally: `New`, never persisted.
    pub(crate) fn new_local(key: String, content: Content) -> Self {
        Self {
            key,
            identity: LocalIdentity::Unpersisted,
            etag: String::new(),
            dirty: DirtyState::New,
            content,
            synced_at: None,
        }
    }

    /// A record as the server just returned it: `Clean`, not yet persisted.
    pub(crate) fn from_remote(remote: &RemoteEntity) -> Self {
        Self {
            key: remote.key.clone(),
            identity: LocalIdentity::Unpersisted,
            etag: remote.etag.clone(),
            dirty: DirtyState::Clean,
            content: remote.content.clone(),
            synced_at: Some(Utc::now()),
        }
    }

    /// Rebuilds a record from its stored columns.
    pub(crate) fn from_columns(
        kind: EntityKind,
        id: i64,
        key: String,
        etag: String,
        dirty: &str,
        content: &str,
        synced_at: Option<String>,
    ) -> Result<Self, StoreError> {
        let dirty = DirtyState::from_str(dirty).map_err(|reason| StoreError::Corrupt {
            kind,
            key: key.clone(),
            reason,
        })?;
        let content = Content::from_str(content).map_err(|e| StoreError::Corrupt {
            kind,
            key: key.clone(),
            reason: e.to_string(),
        })?;
        let synced_at = synced_at
            .filter(|s| !s.is_empty())
            .map(|s| {
                DateTime::parse_from_rfc3339(&s)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| StoreError::Corrupt {
                        kind,
                        key: key.clone(),
                        reason: format!("bad synced_at '{}': {}", s, e),
                    })
            })
            .transpose()?;

        Ok(Self {
            key,
            identity: LocalIdentity::Persisted(id),
            etag,
            dirty,
            content,
            synced_at,
        })
    }

    /// Records a local field change.
    pub(crate) fn touch(&mut self) {
        self.dirty = self.dirty.after_local_edit();
    }

    /// Confirms a successful round trip.
    pub(crate) fn mark_synced(&mut self, etag: String) {
        self.etag = etag;
        self.dirty = DirtyState::Clean;
        self.synced_at = Some(Utc::now());
    }

    fn common_columns(&self) -> Vec<(&'static str, Option<String>)> {
        vec![
            ("key", Some(self.key.clone())),
            ("etag", Some(self.etag.clone())),
            ("dirty", Some(self.dirty.as_str().to_string())),
            ("content", Some(self.content.to_json_string())),
            ("synced_at", self.synced_at.map(|dt| dt.to_rfc3339())),
        ]
    }
}

/// Authoritative state of one record as reported by the remote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEntity {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_key: Option<String>,
    #[serde(default)]
    pub etag: String,
    #[serde(default)]
    pub content: Content,
}

/// A record kind the local store and the sync engine can handle.
pub trait Entity: Clone + Send + Sync + Unpin + 'static {
    const KIND: EntityKind;

    /// Full-table scan in storage order.
    const SCAN_SQL: &'static str;

    type Row: for<'r> FromRow<'r, SqliteRow> + Send + Unpin;

    fn core(&self) -> &RecordCore;

    #[doc(hidden)]
    fn core_mut(&mut self) -> &mut RecordCore;

    /// Builds the record from a stored row.
    fn from_row(row: Self::Row) -> Result<Self, StoreError>;

    /// Builds a clean, unpersisted record from remote state.
    fn from_remote(remote: RemoteEntity) -> Self;

    /// Kind-specific columns, including derived display fields.
    fn kind_columns(&self) -> Vec<(&'static str, Option<String>)>;

    fn parent_key(&self) -> Option<&str> {
        None
    }

    #[doc(hidden)]
    fn set_parent_key(&mut self, _parent_key: Option<String>) {}

    /// Keys of the collections this record belongs to. `None` for kinds
    /// without collection membership.
    fn memberships(&self) -> Option<Vec<String>> {
        None
    }

    fn key(&self) -> &str {
        &self.core().key
    }

    fn identity(&self) -> LocalIdentity {
        self.core().identity
    }

    fn etag(&self) -> &str {
        &self.core().etag
    }

    fn dirty(&self) -> DirtyState {
        self.core().dirty
    }

    fn content(&self) -> &Content {
        &self.core().content
    }

    fn synced_at(&self) -> Option<DateTime<Utc>> {
        self.core().synced_at
    }

    /// Every stored column except the row id, in a stable order.
    fn columns(&self) -> Vec<(&'static str, Option<String>)> {
        let mut columns = self.core().common_columns();
        columns.extend(self.kind_columns());
        columns
    }

    /// Overwrites local fields with authoritative remote state and marks
    /// the record clean. The local identity is kept.
    fn apply_remote(&mut self, remote: RemoteEntity) {
        if remote.parent_key.is_some() || Self::KIND.parent_kind().is_some() {
            self.set_parent_key(remote.parent_key.clone());
        }
        let core = self.core_mut();
        core.key = remote.key;
        core.content = remote.content;
        core.mark_synced(remote.etag);
    }
}

/// Entity kinds that reference a parent record through `parent_key`.
pub trait ChildEntity: Entity {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_str() {
        assert_eq!(EntityKind::from_str("items").unwrap(), EntityKind::Item);
        assert_eq!(
            EntityKind::from_str("Collection").unwrap(),
            EntityKind::Collection
        );
        assert!(EntityKind::from_str("tag").is_err());
    }

    #[test]
    fn test_sync_order_puts_parents_first() {
        let order = EntityKind::SYNC_ORDER;
        let item = order.iter().position(|k| *k == EntityKind::Item).unwrap();
        let attachment = order
            .iter()
            .position(|k| *k == EntityKind::Attachment)
            .unwrap();
        assert!(item < attachment);
    }

    #[test]
    fn test_from_columns_rejects_unknown_marker() {
        let err = RecordCore::from_columns(
            EntityKind::Item,
            1,
            "K1".into(),
            String::new(),
            "Sync attempted",
            "{}",
            None,
        )
        .unwrap_err();
        assert!(err.to_string().contains("K1"));
    }

    #[test]
    fn test_local_keys_are_unique() {
        assert_ne!(new_local_key(), new_local_key());
    }
}
