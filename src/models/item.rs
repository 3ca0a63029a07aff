use serde_json::{json, Value};
use std::fmt;

use super::entity::{new_local_key, Entity, EntityKind, RecordCore, RemoteEntity};
use super::{Attachment, Content};
use crate::db::{LocalStore, StoreError};

/// Row shape of the `items` table. Display columns are derived from
/// `content` on every save, so they are not read back.
#[derive(sqlx::FromRow)]
pub struct ItemRow {
    id: i64,
    key: String,
    etag: String,
    dirty: String,
    content: String,
    synced_at: Option<String>,
}

/// A bibliographic item (book, article, ...).
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    core: RecordCore,
}

impl Item {
    pub fn new(item_type: impl Into<String>) -> Self {
        let mut content = Content::new();
        content.set("itemType", item_type.into());
        Self {
            core: RecordCore::new_local(format!("local:{}", new_local_key()), content),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.set_title(title);
        self
    }

    pub fn title(&self) -> &str {
        self.core.content.get_str("title").unwrap_or("")
    }

    pub fn item_type(&self) -> &str {
        self.core.content.get_str("itemType").unwrap_or("")
    }

    /// First run of four digits in the `date` field.
    pub fn year(&self) -> Option<String> {
        self.core.content.get_str("date").and_then(first_year)
    }

    /// Creators' last names joined with ", ". Single-field creators
    /// contribute their `name`.
    pub fn creator_summary(&self) -> String {
        let Some(Value::Array(creators)) = self.core.content.get("creators") else {
            return String::new();
        };
        creators
            .iter()
            .filter_map(|c| {
                c.get("lastName")
                    .or_else(|| c.get("name"))
                    .and_then(Value::as_str)
            })
            .filter(|name| !name.is_empty())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Tag names in stored order.
    pub fn tags(&self) -> Vec<&str> {
        match self.core.content.get("tags") {
            Some(Value::Array(tags)) => tags
                .iter()
                .filter_map(|t| t.get("tag").and_then(Value::as_str))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Sets one content field. Returns true if the value changed, in which
    /// case the record is marked for upload.
    pub fn set_field(&mut self, label: &str, value: impl Into<Value>) -> bool {
        let changed = self.core.content.set(label, value);
        if changed {
            self.core.touch();
        }
        changed
    }

    pub fn set_title(&mut self, title: impl Into<String>) -> bool {
        self.set_field("title", title.into())
    }

    /// Replaces the whole content payload.
    pub fn set_content(&mut self, content: Content) -> bool {
        if self.core.content == content {
            return false;
        }
        self.core.content = content;
        self.core.touch();
        true
    }

    /// Adds, renames or removes a tag.
    ///
    /// `old = None` appends `new`; `new = None` deletes `old`; both set
    /// renames `old` in place. Returns false when nothing changed.
    pub fn set_tag(&mut self, old: Option<&str>, new: Option<&str>) -> bool {
        let mut tags = match self.core.content.get("tags") {
            Some(Value::Array(tags)) => tags.clone(),
            _ => Vec::new(),
        };
        let position =
            old.and_then(|old| tags.iter().position(|t| t.get("tag") == Some(&json!(old))));

        match (old, new, position) {
            (None, Some(new), _) => {
                if tags.iter().any(|t| t.get("tag") == Some(&json!(new))) {
                    return false;
                }
                tags.push(json!({ "tag": new, "type": 0 }));
            }
            (Some(_), Some(new), Some(idx)) => match tags[idx].as_object_mut() {
                Some(tag) => {
                    tag.insert("tag".to_string(), json!(new));
                }
                None => tags[idx] = json!({ "tag": new, "type": 0 }),
            },
            (Some(_), None, Some(idx)) => {
                tags.remove(idx);
            }
            _ => return false,
        }

        self.set_field("tags", Value::Array(tags))
    }

    /// Keys of the collections the item belongs to, from the
    /// `collections` content field.
    pub fn collections(&self) -> Vec<&str> {
        match self.core.content.get("collections") {
            Some(Value::Array(keys)) => keys.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        }
    }

    /// Adds the item to a collection. Returns false if it already belongs.
    pub fn add_to_collection(&mut self, collection_key: &str) -> bool {
        if self.collections().contains(&collection_key) {
            return false;
        }
        let mut keys: Vec<Value> = self.collections().into_iter().map(Value::from).collect();
        keys.push(Value::from(collection_key));
        self.set_field("collections", Value::Array(keys))
    }

    /// Removes the item from a collection. Returns false if it was not a
    /// member.
    pub fn remove_from_collection(&mut self, collection_key: &str) -> bool {
        if !self.collections().contains(&collection_key) {
            return false;
        }
        let keys: Vec<Value> = self
            .collections()
            .into_iter()
            .filter(|key| *key != collection_key)
            .map(Value::from)
            .collect();
        self.set_field("collections", Value::Array(keys))
    }

    /// Rewrites a collection key after the server assigned a new one. The
    /// dirty marker is left alone.
    pub(crate) fn rename_collection(&mut self, old_key: &str, new_key: &str) -> bool {
        if !self.collections().contains(&old_key) {
            return false;
        }
        let keys: Vec<Value> = self
            .collections()
            .into_iter()
            .map(|key| if key == old_key { new_key } else { key })
            .map(Value::from)
            .collect();
        self.core.content.set("collections", Value::Array(keys))
    }

    pub async fn save(&mut self, store: &LocalStore) -> Result<(), StoreError> {
        store.save(self).await
    }

    /// Attachments owned by this item. An unsaved item is persisted first.
    pub async fn attachments(&mut self, store: &LocalStore) -> Result<Vec<Attachment>, StoreError> {
        if !self.core.identity.is_persisted() {
            self.save(store).await?;
        }
        store.find_by_parent::<Attachment>(&self.core.key).await
    }
}

impl Entity for Item {
    const KIND: EntityKind = EntityKind::Item;
    const SCAN_SQL: &'static str = "SELECT * FROM items ORDER BY id";

    type Row = ItemRow;

    fn core(&self) -> &RecordCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut RecordCore {
        &mut self.core
    }

    fn from_row(row: ItemRow) -> Result<Self, StoreError> {
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
        })
    }

    fn from_remote(remote: RemoteEntity) -> Self {
        Self {
            core: RecordCore::from_remote(&remote),
        }
    }

    fn memberships(&self) -> Option<Vec<String>> {
        Some(self.collections().into_iter().map(str::to_string).collect())
    }

    fn kind_columns(&self) -> Vec<(&'static str, Option<String>)> {
        vec![
            ("title", Some(self.title().to_string())),
            ("item_type", Some(self.item_type().to_string())),
            ("year", self.year()),
            ("creator_summary", Some(self.creator_summary())),
        ]
    }
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let title = if self.title().is_empty() {
            "(untitled)"
        } else {
            self.title()
        };
        writeln!(f, "{}", title)?;
        writeln!(f, "{}", "=".repeat(title.len()))?;
        writeln!(f, "Type: {}", self.item_type())?;

        if let Some(year) = self.year() {
            writeln!(f, "Year: {}", year)?;
        }

        let creators = self.creator_summary();
        if !creators.is_empty() {
            writeln!(f, "Creators: {}", creators)?;
        }

        let tags = self.tags();
        if !tags.is_empty() {
            writeln!(f, "Tags: {}", tags.join(", "))?;
        }

        let collections = self.collections();
        if !collections.is_empty() {
            writeln!(f, "Collections: {}", collections.join(", "))?;
        }

        writeln!(f, "Key: {}", self.core.key)?;
        write!(f, "State: {}", self.core.dirty)?;
        if !self.core.etag.is_empty() {
            write!(f, " (etag {})", self.core.etag)?;
        }
        writeln!(f)
    }
}

fn first_year(date: &str) -> Option<String> {
    let bytes = date.as_bytes();
    bytes
        .windows(4)
        .position(|w| w.iter().all(u8::is_ascii_digit))
        .map(|start| date[start..start + 4].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DirtyState, LocalIdentity};

    #[test]
    fn test_item_new() {
        let item = Item::new("book");

        assert_eq!(item.item_type(), "book");
        assert_eq!(item.dirty(), DirtyState::New);
        assert_eq!(item.identity(), LocalIdentity::Unpersisted);
        assert!(item.key().starts_with("local:"));
        assert!(item.etag().is_empty());
    }

    #[test]
    fn test_edit_keeps_new() {
        let mut item = Item::new("book");
        assert!(item.set_title("Dune"));
        assert_eq!(item.dirty(), DirtyState::New);
    }

    #[test]
    fn test_edit_marks_clean_record_dirty() {
        let mut item = Item::from_remote(RemoteEntity {
            key: "ABCD1234".into(),
            parent_key: None,
            etag: "e7".into(),
            content: r#"{"itemType":"book","title":"Dune"}"#.parse().unwrap(),
        });
        assert_eq!(item.dirty(), DirtyState::Clean);

        assert!(!item.set_title("Dune"));
        assert_eq!(item.dirty(), DirtyState::Clean);

        assert!(item.set_title("Dune Messiah"));
        assert_eq!(item.dirty(), DirtyState::Dirty);
    }

    #[test]
    fn test_year_is_first_four_digits() {
        let mut item = Item::new("journalArticle");
        assert_eq!(item.year(), None);

        item.set_field("date", "March 12, 1998");
        assert_eq!(item.year(), Some("1998".to_string()));

        item.set_field("date", "2004-05-01");
        assert_eq!(item.year(), Some("2004".to_string()));

        item.set_field("date", "n.d.");
        assert_eq!(item.year(), None);
    }

    #[test]
    fn test_creator_summary() {
        let mut item = Item::new("book");
        item.set_field(
            "creators",
            json!([
                {"creatorType": "author", "firstName": "Frank", "lastName": "Herbert"},
                {"creatorType": "editor", "name": "Ace Books"},
                {"creatorType": "author", "firstName": "Brian", "lastName": "Herbert"}
            ]),
        );
        assert_eq!(item.creator_summary(), "Herbert, Ace Books, Herbert");
    }

    #[test]
    fn test_set_tag_append_rename_delete() {
        let mut item = Item::new("book");

        assert!(item.set_tag(None, Some("sf")));
        assert!(item.set_tag(None, Some("classic")));
        assert!(!item.set_tag(None, Some("sf")));
        assert_eq!(item.tags(), vec!["sf", "classic"]);

        assert!(item.set_tag(Some("sf"), Some("science fiction")));
        assert_eq!(item.tags(), vec!["science fiction", "classic"]);

        assert!(item.set_tag(Some("classic"), None));
        assert_eq!(item.tags(), vec!["science fiction"]);

        assert!(!item.set_tag(Some("missing"), None));
        assert_eq!(item.content().get("tags"), Some(&json!([{"tag": "science fiction", "type": 0}])));
    }

    #[test]
    fn test_collection_membership() {
        let mut item = Item::from_remote(RemoteEntity {
            key: "ITEM0001".into(),
            parent_key: None,
            etag: "e2".into(),
            content: r#"{"itemType":"book","collections":["COLL0001"]}"#.parse().unwrap(),
        });
        assert_eq!(item.collections(), vec!["COLL0001"]);
        assert_eq!(item.memberships(), Some(vec!["COLL0001".to_string()]));

        assert!(!item.add_to_collection("COLL0001"));
        assert_eq!(item.dirty(), DirtyState::Clean);

        assert!(item.add_to_collection("COLL0002"));
        assert_eq!(item.collections(), vec!["COLL0001", "COLL0002"]);
        assert_eq!(item.dirty(), DirtyState::Dirty);

        assert!(item.remove_from_collection("COLL0001"));
        assert!(!item.remove_from_collection("COLL0001"));
        assert_eq!(item.collections(), vec!["COLL0002"]);
    }

    #[test]
    fn test_rename_collection_keeps_dirty_marker() {
        let mut item = Item::new("book");
        item.add_to_collection("local-coll");
        item.core_mut().dirty = DirtyState::Dirty;

        assert!(item.rename_collection("local-coll", "SRV00001"));
        assert_eq!(item.collections(), vec!["SRV00001"]);
        assert_eq!(item.dirty(), DirtyState::Dirty);
        assert!(!item.rename_collection("local-coll", "SRV00002"));
    }

    #[test]
    fn test_display_columns() {
        let mut item = Item::new("book").with_title("Dune");
        item.set_field("date", "1965");
        let columns = item.columns();

        let lookup = |name: &str| {
            columns
                .iter()
                .find(|(n, _)| *n == name)
                .and_then(|(_, v)| v.clone())
        };
        assert_eq!(lookup("title"), Some("Dune".to_string()));
        assert_eq!(lookup("item_type"), Some("book".to_string()));
        assert_eq!(lookup("year"), Some("1965".to_string()));
        assert_eq!(lookup("dirty"), Some("new".to_string()));
        assert_eq!(lookup("synced_at"), None);
    }

    #[test]
    fn test_item_display() {
        let item = Item::new("book").with_title("Dune");
        let output = format!("{}", item);
        assert!(output.contains("Dune"));
        assert!(output.contains("Type: book"));
        assert!(output.contains("State: new"));
    }
}
