//! Remote gateway abstraction.
//!
//! The engine talks to the reference service only through [`RemoteGateway`],
//! so the HTTP client and the in-process test server are interchangeable.

use serde::{Deserialize, Serialize};

use super::error::SyncResult;
use crate::models::{Content, Entity, EntityKind, RemoteEntity};

/// Body of an upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_key: Option<String>,
    pub content: Content,
}

impl PushRequest {
    pub fn from_record<T: Entity>(record: &T) -> Self {
        Self {
            key: record.key().to_string(),
            parent_key: record.parent_key().map(str::to_string),
            content: record.content().clone(),
        }
    }
}

/// Server acknowledgement of an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushAck {
    /// New version tag of the stored record.
    pub etag: String,
    /// Set when the server stored the record under a different key.
    pub server_key: Option<String>,
}

/// Access to the remote reference service.
#[allow(async_fn_in_trait)]
pub trait RemoteGateway: Send + Sync {
    /// Fetches one record. Fails with `NotFound` when the server has no
    /// record with that key.
    async fn fetch_entity(&self, kind: EntityKind, key: &str) -> SyncResult<RemoteEntity>;

    /// Lists every server-side record of a kind, optionally only those whose
    /// parent is `parent`.
    async fn fetch_all(
        &self,
        kind: EntityKind,
        parent: Option<&str>,
    ) -> SyncResult<Vec<RemoteEntity>>;

    /// Uploads a record. `if_match` carries the etag the edit was based on;
    /// `None` creates the record. A stale etag fails with `Conflict`.
    async fn push_entity(
        &self,
        kind: EntityKind,
        request: &PushRequest,
        if_match: Option<&str>,
    ) -> SyncResult<PushAck>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Attachment, Item};

    #[test]
    fn test_push_request_from_record() {
        let item = Item::new("book").with_title("Dune");
        let note = Attachment::child_of(&item, "note");

        let request = PushRequest::from_record(&note);
        assert_eq!(request.key, note.key());
        assert_eq!(request.parent_key.as_deref(), Some(item.key()));
        assert_eq!(request.content.get_str("itemType"), Some("note"));

        let json = serde_json::to_value(PushRequest::from_record(&item)).unwrap();
        assert!(json.get("parentKey").is_none());
        assert_eq!(json["content"]["title"], "Dune");
    }
}
