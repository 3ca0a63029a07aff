use std::fmt;

/// Storage-layer identity of a record.
///
/// A record starts `Unpersisted`; the first save assigns the row id and it
/// never changes afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LocalIdentity {
    #[default]
    Unpersisted,
    Persisted(i64),
}

impl LocalIdentity {
    pub fn is_persisted(&self) -> bool {
        matches!(self, LocalIdentity::Persisted(_))
    }

    pub fn id(&self) -> Option<i64> {
        match self {
            LocalIdentity::Persisted(id) => Some(*id),
            LocalIdentity::Unpersisted => None,
        }
    }
}

impl fmt::Display for LocalIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocalIdentity::Persisted(id) => write!(f, "#{}", id),
            LocalIdentity::Unpersisted => write!(f, "unsaved"),
        }
    }
}
