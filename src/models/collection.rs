use std::fmt;

use super::entity::{new_local_key, ChildEntity, Entity, EntityKind, RecordCore, RemoteEntity};
use super::{Content, Item};
use crate::db::{LocalStore, StoreError};

#[derive(sqlx::FromRow)]
pub struct CollectionRow {
    id: i64,
    key: String,
    parent_key: Option<String>,
    etag: String,
    dirty: String,
    content: String,
    synced_at: Option<String>,
}

/// A named folder of items. Collections nest through `parent_key`.
#[derive(Debug, Clone, PartialEq)]
pub struct Collection {
    core: RecordCore,
    parent_key: Option<String>,
}

impl Collection {
    pub fn new(name: impl Into<String>) -> Self {
        let mut content = Content::new();
        content.set("name", name.into());
        Self {
            core: RecordCore::new_local(new_local_key(), content),
            parent_key: None,
        }
    }

    pub fn with_parent(mut self, parent_key: impl Into<String>) -> Self {
        self.set_parent(Some(parent_key.into()));
        self
    }

    pub fn name(&self) -> &str {
        self.core.content.get_str("name").unwrap_or("")
    }

    pub fn set_name(&mut self, name: impl Into<String>) -> bool {
        let changed = self.core.content.set("name", name.into());
        if changed {
            self.core.touch();
        }
        changed
    }

    /// Moves the collection under another one, or to the top level.
    pub fn set_parent(&mut self, parent_key: Option<String>) -> bool {
        if self.parent_key == parent_key {
            return false;
        }
        self.parent_key = parent_key;
        self.core.touch();
        true
    }

    pub async fn save(&mut self, store: &LocalStore) -> Result<(), StoreError> {
        store.save(self).await
    }

    pub async fn subcollections(&self, store: &LocalStore) -> Result<Vec<Collection>, StoreError> {
        store.find_by_parent::<Collection>(&self.core.key).await
    }

    /// Puts `item` in this collection. Membership is carried by the item,
    /// so the item is the record marked for upload.
    pub fn add_item(&self, item: &mut Item) -> bool {
        item.add_to_collection(&self.core.key)
    }

    pub fn remove_item(&self, item: &mut Item) -> bool {
        item.remove_from_collection(&self.core.key)
    }

    /// Saved member items, ordered by title.
    pub async fn items(&self, store: &LocalStore) -> Result<Vec<Item>, StoreError> {
        store.items_in_collection(&self.core.key).await
    }

    /// Number of saved member items.
    pub async fn size(&self, store: &LocalStore) -> Result<i64, StoreError> {
        store.collection_size(&self.core.key).await
    }
}

impl Entity for Collection {
    const KIND: EntityKind = EntityKind::Collection;
    const SCAN_SQL: &'static str = "SELECT * FROM collections ORDER BY id";

    type Row = CollectionRow;

    fn core(&self) -> &RecordCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut RecordCore {
        &mut self.core
    }

    fn from_row(row: CollectionRow) -> Result<Self, StoreError> {
        Ok(Self {
            core: RecordCore::from_columns(
                Self::KIND,
                row.id,
                row.key,
                row.etag,
                &row.dirty,
                &row.content,
                row.synced_at,
            )?,
            parent_key: row.parent_key.filter(|k| !k.is_empty()),
        })
    }

    fn from_remote(remote: RemoteEntity) -> Self {
        Self {
            core: RecordCore::from_remote(&remote),
            parent_key: remote.parent_key.filter(|k| !k.is_empty()),
        }
    }

    fn kind_columns(&self) -> Vec<(&'static str, Option<String>)> {
        vec![
            ("parent_key", self.parent_key.clone()),
            ("name", Some(self.name().to_string())),
        ]
    }

    fn parent_key(&self) -> Option<&str> {
        self.parent_key.as_deref()
    }

    fn set_parent_key(&mut self, parent_key: Option<String>) {
        self.parent_key = parent_key.filter(|k| !k.is_empty());
    }
}

impl ChildEntity for Collection {}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] ({})", self.name(), self.core.key, self.core.dirty)
    }
}
