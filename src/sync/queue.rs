use futures::TryStreamExt;

use crate::db::{LocalStore, StoreError};
use crate::models::Entity;

/// Records of one kind awaiting upload, captured at rebuild time.
///
/// The queue is a snapshot: later edits do not change its membership
/// until the next rebuild.
#[derive(Debug, Clone)]
pub struct DirtyQueue<T> {
    records: Vec<T>,
}

impl<T: Entity> DirtyQueue<T> {
    /// Collects every record whose dirty marker is not `Clean`, in store
    /// order.
    pub async fn rebuild(store: &LocalStore) -> Result<Self, StoreError> {
        let records: Vec<T> = store
            .scan(|record: &T| record.dirty().needs_push())
            .try_collect()
            .await?;
        tracing::debug!(kind = %T::KIND, pending = records.len(), "rebuilt dirty queue");
        Ok(Self { records })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.records.iter()
    }

    pub fn keys(&self) -> Vec<&str> {
        self.records.iter().map(|r| r.key()).collect()
    }
}

impl<T> IntoIterator for DirtyQueue<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::temp_store;
    use crate::models::{Attachment, Item, RemoteEntity};

    fn clean_item(key: &str) -> Item {
        Item::from_remote(RemoteEntity {
            key: key.to_string(),
            parent_key: None,
            etag: "e1".to_string(),
            content: r#"{"itemType":"book"}"#.parse().unwrap(),
        })
    }

    #[tokio::test]
    async fn test_empty_store_gives_empty_queue() {
        let (store, _dir) = temp_store().await;
        let queue = DirtyQueue::<Item>::rebuild(&store).await.unwrap();
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_membership_follows_dirty_marker() {
        let (store, _dir) = temp_store().await;

        let mut fresh = Item::new("book");
        fresh.save(&store).await.unwrap();
        let mut clean = clean_item("CLEAN");
        clean.save(&store).await.unwrap();
        let mut edited = clean_item("EDITED");
        edited.set_title("changed");
        edited.save(&store).await.unwrap();

        let queue = DirtyQueue::<Item>::rebuild(&store).await.unwrap();
        assert_eq!(queue.keys(), vec![fresh.key(), "EDITED"]);
    }

    #[tokio::test]
    async fn test_queue_is_a_snapshot() {
        let (store, _dir) = temp_store().await;
        let mut item = Item::new("book");
        item.save(&store).await.unwrap();

        let queue = DirtyQueue::<Item>::rebuild(&store).await.unwrap();
        let mut later = Item::new("article");
        later.save(&store).await.unwrap();

        assert_eq!(queue.len(), 1);
        assert_eq!(DirtyQueue::<Item>::rebuild(&store).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_queues_are_per_kind() {
        let (store, _dir) = temp_store().await;
        let mut item = clean_item("I1");
        item.save(&store).await.unwrap();
        let mut note = Attachment::child_of(&item, "note");
        note.save(&store).await.unwrap();

        assert!(DirtyQueue::<Item>::rebuild(&store).await.unwrap().is_empty());
        assert_eq!(
            DirtyQueue::<Attachment>::rebuild(&store).await.unwrap().len(),
            1
        );
    }
}
