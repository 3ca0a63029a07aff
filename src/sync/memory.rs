//! In-process stand-in for the remote service.
//!
//! Keeps records per kind in insertion order and versions them with a
//! global counter (`e1`, `e2`, ...). Failures can be injected per record
//! key to exercise the engine's error paths.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::error::{SyncError, SyncResult};
use super::gateway::{PushAck, PushRequest, RemoteGateway};
use crate::models::{Content, EntityKind, RemoteEntity};

/// Failure returned for pushes of a given key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFailure {
    Transport,
    Conflict,
}

#[derive(Default)]
struct MemoryState {
    records: HashMap<EntityKind, Vec<RemoteEntity>>,
    etag_counter: u64,
    key_counter: u64,
    assign_keys: bool,
    failures: HashMap<String, InjectedFailure>,
    pushes: Vec<(EntityKind, String)>,
}

impl MemoryState {
    fn next_etag(&mut self) -> String {
        self.etag_counter += 1;
        format!("e{}", self.etag_counter)
    }

    fn next_key(&mut self) -> String {
        self.key_counter += 1;
        format!("SRV{:05}", self.key_counter)
    }

    fn find_mut(&mut self, kind: EntityKind, key: &str) -> Option<&mut RemoteEntity> {
        self.records
            .get_mut(&kind)
            .and_then(|records| records.iter_mut().find(|r| r.key == key))
    }
}

/// Cloning shares the underlying state.
#[derive(Clone, Default)]
pub struct MemoryGateway {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores created records under server-generated keys (`SRV00001`, ...)
    /// instead of the client's key.
    pub fn with_server_keys(self) -> Self {
        self.lock().assign_keys = true;
        self
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates or replaces a record as another client would, bumping its
    /// etag. Returns the new etag.
    pub fn put_remote(
        &self,
        kind: EntityKind,
        key: &str,
        parent_key: Option<&str>,
        content: Content,
    ) -> String {
        let mut state = self.lock();
        let etag = state.next_etag();
        let record = RemoteEntity {
            key: key.to_string(),
            parent_key: parent_key.map(str::to_string),
            etag: etag.clone(),
            content,
        };
        match state.find_mut(kind, key) {
            Some(existing) => *existing = record,
            None => state.records.entry(kind).or_default().push(record),
        }
        etag
    }

    pub fn get(&self, kind: EntityKind, key: &str) -> Option<RemoteEntity> {
        self.lock()
            .records
            .get(&kind)
            .and_then(|records| records.iter().find(|r| r.key == key).cloned())
    }

    pub fn len(&self, kind: EntityKind) -> usize {
        self.lock().records.get(&kind).map_or(0, Vec::len)
    }

    pub fn is_empty(&self, kind: EntityKind) -> bool {
        self.len(kind) == 0
    }

    pub fn fail_key(&self, key: &str, failure: InjectedFailure) {
        self.lock().failures.insert(key.to_string(), failure);
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Keys of every push the gateway accepted or rejected, in call order.
    pub fn pushed_keys(&self, kind: EntityKind) -> Vec<String> {
        self.lock()
            .pushes
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, key)| key.clone())
            .collect()
    }
}

impl RemoteGateway for MemoryGateway {
    async fn fetch_entity(&self, kind: EntityKind, key: &str) -> SyncResult<RemoteEntity> {
        self.get(kind, key).ok_or_else(|| SyncError::NotFound {
            kind,
            key: key.to_string(),
        })
    }

    async fn fetch_all(
        &self,
        kind: EntityKind,
        parent: Option<&str>,
    ) -> SyncResult<Vec<RemoteEntity>> {
        let state = self.lock();
        let records = state.records.get(&kind).map(Vec::as_slice).unwrap_or(&[]);
        Ok(records
            .iter()
            .filter(|r| parent.is_none() || r.parent_key.as_deref() == parent)
            .cloned()
            .collect())
    }

    async fn push_entity(
        &self,
        kind: EntityKind,
        request: &PushRequest,
        if_match: Option<&str>,
    ) -> SyncResult<PushAck> {
        let mut state = self.lock();
        state.pushes.push((kind, request.key.clone()));

        match state.failures.get(&request.key) {
            Some(InjectedFailure::Transport) => {
                return Err(SyncError::transport_retryable("injected transport failure"))
            }
            Some(InjectedFailure::Conflict) => {
                return Err(SyncError::Conflict {
                    kind,
                    key: request.key.clone(),
                })
            }
            None => {}
        }

        match if_match {
            None => {
                if state.find_mut(kind, &request.key).is_some() {
                    return Err(SyncError::Conflict {
                        kind,
                        key: request.key.clone(),
                    });
                }
                let key = if state.assign_keys {
                    state.next_key()
                } else {
                    request.key.clone()
                };
                let etag = state.next_etag();
                state.records.entry(kind).or_default().push(RemoteEntity {
                    key: key.clone(),
                    parent_key: request.parent_key.clone(),
                    etag: etag.clone(),
                    content: request.content.clone(),
                });
                Ok(PushAck {
                    etag,
                    server_key: (key != request.key).then_some(key),
                })
            }
            Some(expected) => {
                let not_found = || SyncError::NotFound {
                    kind,
                    key: request.key.clone(),
                };
                let current = state
                    .find_mut(kind, &request.key)
                    .map(|r| r.etag.clone())
                    .ok_or_else(not_found)?;
                if current != expected {
                    return Err(SyncError::Conflict {
                        kind,
                        key: request.key.clone(),
                    });
                }

                let etag = state.next_etag();
                let record = state.find_mut(kind, &request.key).ok_or_else(not_found)?;
                record.parent_key = request.parent_key.clone();
                record.content = request.content.clone();
                record.etag = etag.clone();
                Ok(PushAck {
                    etag,
                    server_key: None,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(key: &str, title: &str) -> PushRequest {
        let mut content = Content::new();
        content.set("title", title);
        PushRequest {
            key: key.to_string(),
            parent_key: None,
            content,
        }
    }

    #[tokio::test]
    async fn test_create_then_update() {
        let gw = MemoryGateway::new();
        let kind = EntityKind::Item;

        let ack = gw.push_entity(kind, &request("K1", "A"), None).await.unwrap();
        assert_eq!(ack.etag, "e1");
        assert_eq!(ack.server_key, None);

        let ack = gw
            .push_entity(kind, &request("K1", "B"), Some("e1"))
            .await
            .unwrap();
        assert_eq!(ack.etag, "e2");
        assert_eq!(
            gw.get(kind, "K1").unwrap().content.get_str("title"),
            Some("B")
        );
    }

    #[tokio::test]
    async fn test_stale_etag_conflicts() {
        let gw = MemoryGateway::new();
        let kind = EntityKind::Item;
        gw.put_remote(kind, "K1", None, Content::new());
        gw.put_remote(kind, "K1", None, Content::new());

        let err = gw
            .push_entity(kind, &request("K1", "mine"), Some("e1"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_server_keys() {
        let gw = MemoryGateway::new().with_server_keys();
        let ack = gw
            .push_entity(EntityKind::Item, &request("local:x", "A"), None)
            .await
            .unwrap();
        assert_eq!(ack.server_key.as_deref(), Some("SRV00001"));
        assert!(gw.get(EntityKind::Item, "SRV00001").is_some());
        assert!(gw.get(EntityKind::Item, "local:x").is_none());
    }

    #[tokio::test]
    async fn test_fetch_all_parent_filter() {
        let gw = MemoryGateway::new();
        let kind = EntityKind::Attachment;
        gw.put_remote(kind, "A1", Some("I1"), Content::new());
        gw.put_remote(kind, "A2", Some("I2"), Content::new());

        assert_eq!(gw.fetch_all(kind, None).await.unwrap().len(), 2);
        let filtered = gw.fetch_all(kind, Some("I2")).await.unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].key, "A2");
        assert!(matches!(
            gw.fetch_entity(kind, "A3").await,
            Err(SyncError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let gw = MemoryGateway::new();
        gw.fail_key("K1", InjectedFailure::Transport);

        let err = gw
            .push_entity(EntityKind::Item, &request("K1", "A"), None)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(gw.is_empty(EntityKind::Item));

        gw.clear_failures();
        assert!(gw
            .push_entity(EntityKind::Item, &request("K1", "A"), None)
            .await
            .is_ok());
        assert_eq!(gw.pushed_keys(EntityKind::Item), vec!["K1", "K1"]);
    }
}
