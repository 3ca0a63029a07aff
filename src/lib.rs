//! bibsync
//!
//! Offline cache of a bibliographic reference service with local dirty
//! tracking and etag-guarded sync.

pub mod config;
pub mod db;
pub mod models;
pub mod sync;

pub use db::{LocalStore, StoreError};
pub use models::{
    Attachment, Collection, Content, DirtyState, Entity, EntityKind, Item, LocalIdentity,
    RemoteEntity,
};
pub use sync::{HttpGateway, MemoryGateway, RemoteGateway, SyncEngine, SyncError, SyncReport};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
