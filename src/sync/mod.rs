//! Dirty tracking and reconciliation with the remote reference service.
//!
//! Records are edited locally and marked `New` or `Dirty`; a sync pass
//! uploads them through a [`RemoteGateway`] and marks them `Clean` once the
//! server confirms. Edits based on a stale etag surface as conflicts and
//! are kept locally until resolved with
//! [`SyncEngine::resolve_keep_local`] or [`SyncEngine::resolve_take_remote`].
//!
//! ```no_run
//! use bibsync::db::LocalStore;
//! use bibsync::models::{Entity, Item};
//! use bibsync::sync::{MemoryGateway, SyncEngine};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let store = LocalStore::open(std::path::Path::new("cache.db")).await?;
//! let mut item = Item::new("book").with_title("Dune");
//! item.save(&store).await?;
//!
//! let engine = SyncEngine::new(store, MemoryGateway::new());
//! for report in engine.sync_all().await? {
//!     println!("{}", report);
//! }
//! # Ok(())
//! # }
//! ```

mod engine;
mod error;
mod gateway;
mod http;
mod memory;
mod queue;
mod report;

pub use engine::{AbortHandle, SyncEngine};
pub use error::{SyncError, SyncResult};
pub use gateway::{PushAck, PushRequest, RemoteGateway};
pub use http::HttpGateway;
pub use memory::{InjectedFailure, MemoryGateway};
pub use queue::DirtyQueue;
pub use report::{ConflictShadow, Fetched, PullSummary, RecordFailure, SyncReport};
