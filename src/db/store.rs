use futures::future;
use futures::stream::{Stream, StreamExt, TryStreamExt};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;

use super::{init_db, StoreError};
use crate::models::{ChildEntity, DirtyState, Entity, EntityKind, Item, LocalIdentity};

/// Relational cache of remote records, one table per entity kind.
///
/// Every operation borrows a pooled connection for its own duration only.
#[derive(Clone)]
pub struct LocalStore {
    pool: SqlitePool,
}

impl LocalStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        Ok(Self::new(init_db(path).await?))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Inserts a new row and returns its local id.
    pub async fn insert<T: Entity>(&self, record: &T) -> Result<i64, StoreError> {
        let columns = record.columns();
        let names: Vec<&str> = columns.iter().map(|(name, _)| *name).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            T::KIND.table(),
            names.join(", "),
            vec!["?"; columns.len()].join(", ")
        );

        let mut query = sqlx::query(&sql);
        for (_, value) in &columns {
            query = query.bind(value.as_deref());
        }

        match query.execute(&self.pool).await {
            Ok(result) => Ok(result.last_insert_rowid()),
            Err(e) => Err(map_unique_violation(e, T::KIND, record.key())),
        }
    }

    /// Overwrites every column of row `id`.
    pub async fn update<T: Entity>(&self, id: i64, record: &T) -> Result<(), StoreError> {
        let columns = record.columns();
        let assignments: Vec<String> = columns
            .iter()
            .map(|(name, _)| format!("{} = ?", name))
            .collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE id = ?",
            T::KIND.table(),
            assignments.join(", ")
        );

        let mut query = sqlx::query(&sql);
        for (_, value) in &columns {
            query = query.bind(value.as_deref());
        }

        let result = query
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_unique_violation(e, T::KIND, record.key()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::RowMissing { kind: T::KIND, id });
        }
        Ok(())
    }

    pub async fn find_by_key<T: Entity>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let sql = format!("SELECT * FROM {} WHERE key = ?", T::KIND.table());
        let row: Option<T::Row> = sqlx::query_as(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        row.map(T::from_row).transpose()
    }

    /// Lazily streams the records of one kind that satisfy `predicate`, in
    /// local id order. Each call runs a fresh query; dropping the stream
    /// returns its connection to the pool.
    pub fn scan<'a, T, P>(
        &'a self,
        mut predicate: P,
    ) -> impl Stream<Item = Result<T, StoreError>> + Send + 'a
    where
        T: Entity,
        P: FnMut(&T) -> bool + Send + 'a,
    {
        sqlx::query_as::<_, T::Row>(T::SCAN_SQL)
            .fetch(&self.pool)
            .map(|row| row.map_err(StoreError::from).and_then(T::from_row))
            .try_filter(move |record| future::ready(predicate(record)))
    }

    pub async fn list<T: Entity>(&self) -> Result<Vec<T>, StoreError> {
        self.scan(|_: &T| true).try_collect().await
    }

    pub async fn find_by_parent<T: ChildEntity>(
        &self,
        parent_key: &str,
    ) -> Result<Vec<T>, StoreError> {
        let sql = format!(
            "SELECT * FROM {} WHERE parent_key = ? ORDER BY id",
            T::KIND.table()
        );
        let rows: Vec<T::Row> = sqlx::query_as(&sql)
            .bind(parent_key)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(T::from_row).collect()
    }

    /// Upserts a record by key and records the assigned local identity.
    ///
    /// The dirty marker is stored as-is; saving never changes it.
    pub async fn save<T: Entity>(&self, record: &mut T) -> Result<(), StoreError> {
        let existing = self.find_id_by_key(T::KIND, record.key()).await?;

        let id = match (existing, record.identity()) {
            (Some(id), _) => {
                self.update(id, record).await?;
                id
            }
            (None, LocalIdentity::Persisted(id)) => {
                // Key changed since the last save.
                self.update(id, record).await?;
                id
            }
            (None, LocalIdentity::Unpersisted) => self.insert(record).await?,
        };

        if let Some(collection_keys) = record.memberships() {
            self.write_memberships(id, &collection_keys).await?;
        }

        record.core_mut().identity = LocalIdentity::Persisted(id);
        tracing::debug!(kind = %T::KIND, key = record.key(), id, "saved record");
        Ok(())
    }

    pub async fn find_id_by_key(
        &self,
        kind: EntityKind,
        key: &str,
    ) -> Result<Option<i64>, StoreError> {
        let sql = format!("SELECT id FROM {} WHERE key = ?", kind.table());
        let id: Option<i64> = sqlx::query_scalar(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }

    /// Dirty marker of a stored record, without decoding its content.
    pub async fn dirty_state(
        &self,
        kind: EntityKind,
        key: &str,
    ) -> Result<Option<DirtyState>, StoreError> {
        let sql = format!("SELECT dirty FROM {} WHERE key = ?", kind.table());
        let dirty: Option<String> = sqlx::query_scalar(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        dirty
            .map(|d| {
                DirtyState::from_str(&d).map_err(|reason| StoreError::Corrupt {
                    kind,
                    key: key.to_string(),
                    reason,
                })
            })
            .transpose()
    }

    pub async fn count<T: Entity>(&self) -> Result<i64, StoreError> {
        let sql = format!("SELECT COUNT(*) FROM {}", T::KIND.table());
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(count)
    }

    /// Number of records waiting for upload.
    pub async fn count_pending<T: Entity>(&self) -> Result<i64, StoreError> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE dirty != ?",
            T::KIND.table()
        );
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(DirtyState::Clean.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Points every `kind` row whose parent is `old_key` at `new_key`.
    /// Returns the number of rows changed.
    pub async fn reparent(
        &self,
        kind: EntityKind,
        old_key: &str,
        new_key: &str,
    ) -> Result<u64, StoreError> {
        let sql = format!(
            "UPDATE {} SET parent_key = ? WHERE parent_key = ?",
            kind.table()
        );
        let result = sqlx::query(&sql)
            .bind(new_key)
            .bind(old_key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

impl LocalStore {
    /// Replaces the membership rows of item `item_id`.
    async fn write_memberships(
        &self,
        item_id: i64,
        collection_keys: &[String],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM collection_items WHERE item_id = ?")
            .bind(item_id)
            .execute(&mut *tx)
            .await?;
        for key in collection_keys {
            sqlx::query(
                "INSERT OR IGNORE INTO collection_items (collection_key, item_id) VALUES (?, ?)",
            )
            .bind(key)
            .bind(item_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Items belonging to a collection, ordered by title.
    pub async fn items_in_collection(&self, collection_key: &str) -> Result<Vec<Item>, StoreError> {
        let rows: Vec<<Item as Entity>::Row> = sqlx::query_as(
            "SELECT items.* FROM items \
             JOIN collection_items ON collection_items.item_id = items.id \
             WHERE collection_items.collection_key = ? \
             ORDER BY items.title, items.id",
        )
        .bind(collection_key)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Item::from_row).collect()
    }

    pub async fn collection_size(&self, collection_key: &str) -> Result<i64, StoreError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM collection_items WHERE collection_key = ?")
                .bind(collection_key)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    /// Rewrites the membership of every item in collection `old_key` to
    /// `new_key`, leaving dirty markers alone. Returns the number of items
    /// changed.
    pub async fn rekey_collection_members(
        &self,
        old_key: &str,
        new_key: &str,
    ) -> Result<u64, StoreError> {
        let mut moved = 0;
        for mut item in self.items_in_collection(old_key).await? {
            if item.rename_collection(old_key, new_key) {
                self.save(&mut item).await?;
                moved += 1;
            }
        }
        Ok(moved)
    }
}

fn map_unique_violation(e: sqlx::Error, kind: EntityKind, key: &str) -> StoreError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return StoreError::DuplicateKey {
                kind,
                key: key.to_string(),
            };
        }
    }
    StoreError::Database(e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::temp_store;
    use crate::models::{Attachment, Collection, Item, RemoteEntity};

    fn clean_item(key: &str, title: &str) -> Item {
        Item::from_remote(RemoteEntity {
            key: key.to_string(),
            parent_key: None,
            etag: "e1".to_string(),
            content: format!(r#"{{"itemType":"book","title":"{}"}}"#, title)
                .parse()
                .unwrap(),
        })
    }

    #[tokio::test]
    async fn test_insert_and_find_by_key() {
        let (store, _dir) = temp_store().await;
        let item = Item::new("book").with_title("Dune");

        let id = store.insert(&item).await.unwrap();
        assert!(id > 0);

        let found: Item = store.find_by_key(item.key()).await.unwrap().unwrap();
        assert_eq!(found.title(), "Dune");
        assert_eq!(found.identity(), LocalIdentity::Persisted(id));
        assert_eq!(found.dirty(), DirtyState::New);
    }

    #[tokio::test]
    async fn test_find_by_key_absent() {
        let (store, _dir) = temp_store().await;
        let found: Option<Item> = store.find_by_key("nope").await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_insert_duplicate_key() {
        let (store, _dir) = temp_store().await;
        let item = clean_item("KEY1", "One");
        store.insert(&item).await.unwrap();

        let err = store.insert(&item).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey { kind: EntityKind::Item, .. }));
    }

    #[tokio::test]
    async fn test_update_missing_row() {
        let (store, _dir) = temp_store().await;
        let item = clean_item("KEY1", "One");

        let err = store.update(42, &item).await.unwrap_err();
        assert!(matches!(err, StoreError::RowMissing { id: 42, .. }));
    }

    #[tokio::test]
    async fn test_save_twice_keeps_one_row() {
        let (store, _dir) = temp_store().await;
        let mut item = Item::new("book").with_title("Dune");

        store.save(&mut item).await.unwrap();
        let first = item.identity();
        assert!(first.is_persisted());

        item.set_title("Dune (revised)");
        store.save(&mut item).await.unwrap();

        assert_eq!(item.identity(), first);
        assert_eq!(store.count::<Item>().await.unwrap(), 1);
        let found: Item = store.find_by_key(item.key()).await.unwrap().unwrap();
        assert_eq!(found.title(), "Dune (revised)");
    }

    #[tokio::test]
    async fn test_save_adopts_existing_identity() {
        let (store, _dir) = temp_store().await;
        let mut stored = clean_item("KEY1", "One");
        store.save(&mut stored).await.unwrap();

        // Same key, built independently.
        let mut copy = clean_item("KEY1", "One again");
        store.save(&mut copy).await.unwrap();

        assert_eq!(copy.identity(), stored.identity());
        assert_eq!(store.count::<Item>().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_save_does_not_touch_dirty() {
        let (store, _dir) = temp_store().await;
        let mut item = clean_item("KEY1", "One");
        store.save(&mut item).await.unwrap();

        assert_eq!(
            store.dirty_state(EntityKind::Item, "KEY1").await.unwrap(),
            Some(DirtyState::Clean)
        );

        item.set_title("Two");
        store.save(&mut item).await.unwrap();
        assert_eq!(
            store.dirty_state(EntityKind::Item, "KEY1").await.unwrap(),
            Some(DirtyState::Dirty)
        );
    }

    #[tokio::test]
    async fn test_scan_filters_and_preserves_order() {
        let (store, _dir) = temp_store().await;
        let mut a = Item::new("book").with_title("A");
        let mut b = clean_item("KEY_B", "B");
        let mut c = Item::new("book").with_title("C");
        store.save(&mut a).await.unwrap();
        store.save(&mut b).await.unwrap();
        store.save(&mut c).await.unwrap();

        let pending: Vec<Item> = store
            .scan(|item: &Item| item.dirty() != DirtyState::Clean)
            .try_collect()
            .await
            .unwrap();
        let titles: Vec<&str> = pending.iter().map(|i| i.title()).collect();
        assert_eq!(titles, vec!["A", "C"]);

        // Restartable: a second scan sees the same rows.
        let all = store.list::<Item>().await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_scan_empty_table() {
        let (store, _dir) = temp_store().await;
        let all: Vec<Collection> = store.list().await.unwrap();
        assert!(all.is_empty());
    }

    #[tokio::test]
    async fn test_scan_reports_corrupt_rows() {
        let (store, _dir) = temp_store().await;
        sqlx::query("INSERT INTO items (key, dirty, content) VALUES ('BAD', 'dirty', 'not json')")
            .execute(store.pool())
            .await
            .unwrap();

        let result: Result<Vec<Item>, _> = store.list().await;
        assert!(matches!(result, Err(StoreError::Corrupt { .. })));
    }

    #[tokio::test]
    async fn test_attachment_requires_saved_parent() {
        let (store, _dir) = temp_store().await;
        let item = Item::new("book");
        let mut note = Attachment::child_of(&item, "note");

        let err = note.save(&store).await.unwrap_err();
        assert!(matches!(err, StoreError::ParentNotPersisted { .. }));
        assert_eq!(store.count::<Attachment>().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_attachment_save_with_parent_persists_parent_first() {
        let (store, _dir) = temp_store().await;
        let mut item = Item::new("book");
        let mut note = Attachment::child_of(&item, "note");

        note.save_with_parent(&store, &mut item).await.unwrap();

        assert!(item.identity().is_persisted());
        assert!(note.identity().is_persisted());
        let children: Vec<Attachment> = store.find_by_parent(item.key()).await.unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].key(), note.key());
    }

    #[tokio::test]
    async fn test_item_attachments_saves_item() {
        let (store, _dir) = temp_store().await;
        let mut item = Item::new("book");

        let attachments = item.attachments(&store).await.unwrap();
        assert!(attachments.is_empty());
        assert!(item.identity().is_persisted());
    }

    #[tokio::test]
    async fn test_subcollections() {
        let (store, _dir) = temp_store().await;
        let mut parent = Collection::new("Thesis");
        parent.save(&store).await.unwrap();
        let mut child = Collection::new("Chapter 1").with_parent(parent.key());
        child.save(&store).await.unwrap();
        let mut other = Collection::new("Unrelated");
        other.save(&store).await.unwrap();

        let subs = parent.subcollections(&store).await.unwrap();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].name(), "Chapter 1");
    }

    #[tokio::test]
    async fn test_count_pending_and_reparent() {
        let (store, _dir) = temp_store().await;
        let mut item = clean_item("OLD", "One");
        store.save(&mut item).await.unwrap();
        let mut att = Attachment::child_of(&item, "note");
        att.save(&store).await.unwrap();

        assert_eq!(store.count_pending::<Item>().await.unwrap(), 0);
        assert_eq!(store.count_pending::<Attachment>().await.unwrap(), 1);

        let moved = store
            .reparent(EntityKind::Attachment, "OLD", "NEW")
            .await
            .unwrap();
        assert_eq!(moved, 1);
        let children: Vec<Attachment> = store.find_by_parent("NEW").await.unwrap();
        assert_eq!(children.len(), 1);
    }

    #[tokio::test]
    async fn test_membership_follows_item_saves() {
        let (store, _dir) = temp_store().await;
        let mut item = Item::new("book").with_title("Dune");
        item.add_to_collection("C1");
        item.add_to_collection("C2");
        store.save(&mut item).await.unwrap();
        assert_eq!(store.collection_size("C1").await.unwrap(), 1);
        assert_eq!(store.collection_size("C2").await.unwrap(), 1);

        item.remove_from_collection("C1");
        item.core_mut().key = "SRV00001".to_string();
        store.save(&mut item).await.unwrap();
        assert_eq!(store.collection_size("C1").await.unwrap(), 0);

        let members = store.items_in_collection("C2").await.unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].key(), "SRV00001");
    }

    #[tokio::test]
    async fn test_rekey_collection_members() {
        let (store, _dir) = temp_store().await;
        let mut item = Item::new("book");
        item.add_to_collection("local-coll");
        store.save(&mut item).await.unwrap();

        let moved = store
            .rekey_collection_members("local-coll", "SRV00009")
            .await
            .unwrap();
        assert_eq!(moved, 1);
        assert_eq!(store.collection_size("local-coll").await.unwrap(), 0);

        let members = store.items_in_collection("SRV00009").await.unwrap();
        assert_eq!(members[0].collections(), vec!["SRV00009"]);
        assert_eq!(members[0].dirty(), DirtyState::New);
    }
}
