use std::fmt;

use super::entity::{new_local_key, ChildEntity, Entity, EntityKind, RecordCore, RemoteEntity};
use super::{Content, Item};
use crate::db::{LocalStore, StoreError};

#[derive(sqlx::FromRow)]
pub struct AttachmentRow {
    id: i64,
    key: String,
    parent_key: String,
    etag: String,
    dirty: String,
    content: String,
    synced_at: Option<String>,
}

/// A file, link or note attached to an item. Top-level attachments have
/// an empty parent key.
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    core: RecordCore,
    parent_key: String,
}

impl Attachment {
    /// A top-level attachment of the given item type ("attachment", "note").
    pub fn new(item_type: impl Into<String>) -> Self {
        let mut content = Content::new();
        content.set("itemType", item_type.into());
        Self {
            core: RecordCore::new_local(new_local_key(), content),
            parent_key: String::new(),
        }
    }

    /// An attachment owned by `parent`.
    pub fn child_of(parent: &Item, item_type: impl Into<String>) -> Self {
        let mut attachment = Self::new(item_type);
        attachment.parent_key = parent.key().to_string();
        attachment
    }

    pub fn title(&self) -> &str {
        self.core.content.get_str("title").unwrap_or("")
    }

    pub fn filename(&self) -> Option<&str> {
        self.core.content.get_str("filename")
    }

    pub fn url(&self) -> Option<&str> {
        self.core.content.get_str("url")
    }

    /// The type shown to users.
    ///
    /// File attachments report their MIME type (or "attachment" when none
    /// is recorded), notes report "note", anything else reports its stored
    /// item type. Empty when no item type is stored.
    pub fn effective_type(&self) -> String {
        let content = &self.core.content;
        match content.get_str("itemType") {
            Some("attachment") => content
                .get_str("mimeType")
                .unwrap_or("attachment")
                .to_string(),
            Some(other) => other.to_string(),
            None => String::new(),
        }
    }

    pub fn is_note(&self) -> bool {
        self.core.content.get_str("itemType") == Some("note")
    }

    pub fn note_text(&self) -> Option<&str> {
        self.core.content.get_str("note")
    }

    /// Sets the note body. Has no effect on non-note attachments; returns
    /// whether the attachment is a note.
    pub fn set_note_text(&mut self, text: impl Into<String>) -> bool {
        if !self.is_note() {
            return false;
        }
        if self.core.content.set("note", text.into()) {
            self.core.touch();
        }
        true
    }

    pub fn set_title(&mut self, title: impl Into<String>) -> bool {
        let changed = self.core.content.set("title", title.into());
        if changed {
            self.core.touch();
        }
        changed
    }

    /// Saves the attachment. Fails when it names a parent item that has
    /// not been persisted yet.
    pub async fn save(&mut self, store: &LocalStore) -> Result<(), StoreError> {
        if !self.parent_key.is_empty()
            && store
                .find_by_key::<Item>(&self.parent_key)
                .await?
                .is_none()
        {
            return Err(StoreError::ParentNotPersisted {
                key: self.core.key.clone(),
                parent_key: self.parent_key.clone(),
            });
        }
        store.save(self).await
    }

    /// Saves `parent` first, then this attachment under it.
    pub async fn save_with_parent(
        &mut self,
        store: &LocalStore,
        parent: &mut Item,
    ) -> Result<(), StoreError> {
        parent.save(store).await?;
        if self.parent_key != parent.key() {
            self.parent_key = parent.key().to_string();
            self.core.touch();
        }
        store.save(self).await
    }
}

impl Entity for Attachment {
    const KIND: EntityKind = EntityKind::Attachment;
    const SCAN_SQL: &'static str = "SELECT * FROM attachments ORDER BY id";

    type Row = AttachmentRow;

    fn core(&self) -> &RecordCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut RecordCore {
        &mut self.core
    }

    fn from_row(row: AttachmentRow) -> Result<Self, StoreError> {
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
            parent_key: row.parent_key,
        })
    }

    fn from_remote(remote: RemoteEntity) -> Self {
        Self {
            core: RecordCore::from_remote(&remote),
            parent_key: remote.parent_key.unwrap_or_default(),
        }
    }

    fn kind_columns(&self) -> Vec<(&'static str, Option<String>)> {
        vec![
            ("parent_key", Some(self.parent_key.clone())),
            ("title", Some(self.title().to_string())),
            ("filename", self.filename().map(str::to_string)),
            ("url", self.url().map(str::to_string)),
        ]
    }

    fn parent_key(&self) -> Option<&str> {
        if self.parent_key.is_empty() {
            None
        } else {
            Some(&self.parent_key)
        }
    }

    fn set_parent_key(&mut self, parent_key: Option<String>) {
        self.parent_key = parent_key.unwrap_or_default();
    }
}

impl ChildEntity for Attachment {}

impl fmt::Display for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = if self.title().is_empty() {
            self.filename().unwrap_or("(untitled)")
        } else {
            self.title()
        };
        write!(
            f,
            "{} <{}> [{}] ({})",
            label,
            self.effective_type(),
            self.core.key,
            self.core.dirty
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_content(raw: &str) -> Attachment {
        Attachment::from_remote(RemoteEntity {
            key: "ATT00001".into(),
            parent_key: None,
            etag: "e1".into(),
            content: raw.parse().unwrap(),
        })
    }

    #[test]
    fn test_effective_type_uses_mime_type() {
        let att = with_content(r#"{"itemType":"attachment","mimeType":"application/pdf"}"#);
        assert_eq!(att.effective_type(), "application/pdf");
    }

    #[test]
    fn test_effective_type_note() {
        let att = with_content(r#"{"itemType":"note"}"#);
        assert_eq!(att.effective_type(), "note");
    }

    #[test]
    fn test_effective_type_without_mime_type() {
        let att = with_content(r#"{"itemType":"attachment"}"#);
        assert_eq!(att.effective_type(), "attachment");
    }

    #[test]
    fn test_effective_type_missing_item_type() {
        let att = with_content(r#"{"title":"scan.png"}"#);
        assert_eq!(att.effective_type(), "");
    }

    #[test]
    fn test_set_note_text_only_for_notes() {
        let mut note = Attachment::new("note");
        assert!(note.set_note_text("<p>Check chapter 3</p>"));
        assert_eq!(note.note_text(), Some("<p>Check chapter 3</p>"));

        let mut file = with_content(r#"{"itemType":"attachment","mimeType":"application/pdf"}"#);
        assert!(!file.set_note_text("ignored"));
        assert_eq!(file.note_text(), None);
        assert_eq!(file.dirty(), crate::models::DirtyState::Clean);
    }

    #[test]
    fn test_child_of_records_parent() {
        let item = Item::new("book");
        let att = Attachment::child_of(&item, "note");
        assert_eq!(att.parent_key(), Some(item.key()));

        let top = Attachment::new("note");
        assert_eq!(top.parent_key(), None);
    }
}
