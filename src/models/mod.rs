mod attachment;
mod collection;
mod content;
mod dirty;
mod entity;
mod identity;
mod item;

pub use attachment::Attachment;
pub use collection::Collection;
pub use content::{Content, ContentError};
pub use dirty::DirtyState;
pub use entity::{new_local_key, ChildEntity, Entity, EntityKind, RecordCore, RemoteEntity};
pub use identity::LocalIdentity;
pub use item::Item;
