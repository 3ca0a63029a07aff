use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Per-record sync marker.
///
/// `New` records were created locally and never sent. `Dirty` records were
/// edited after their last confirmed round trip. `Clean` records match the
/// last-known server state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirtyState {
    New,
    Dirty,
    Clean,
}

impl DirtyState {
    /// Token stored in the `dirty` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            DirtyState::New => "new",
            DirtyState::Dirty => "dirty",
            DirtyState::Clean => "clean",
        }
    }

    /// State after a local field change. `New` always wins over `Dirty`.
    pub fn after_local_edit(self) -> Self {
        match self {
            DirtyState::New => DirtyState::New,
            DirtyState::Dirty | DirtyState::Clean => DirtyState::Dirty,
        }
    }

    pub fn needs_push(&self) -> bool {
        !matches!(self, DirtyState::Clean)
    }
}

impl fmt::Display for DirtyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DirtyState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "new" => Ok(DirtyState::New),
            "dirty" => Ok(DirtyState::Dirty),
            "clean" => Ok(DirtyState::Clean),
            _ => Err(format!(
                "Invalid dirty marker '{}'. Valid options: new, dirty, clean",
                s
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_never_downgraded() {
        assert_eq!(DirtyState::New.after_local_edit(), DirtyState::New);
        assert_eq!(DirtyState::Clean.after_local_edit(), DirtyState::Dirty);
        assert_eq!(DirtyState::Dirty.after_local_edit(), DirtyState::Dirty);
    }

    #[test]
    fn test_needs_push() {
        assert!(DirtyState::New.needs_push());
        assert!(DirtyState::Dirty.needs_push());
        assert!(!DirtyState::Clean.needs_push());
    }

    #[test]
    fn test_from_str() {
        assert_eq!(DirtyState::from_str("new").unwrap(), DirtyState::New);
        assert_eq!(DirtyState::from_str("DIRTY").unwrap(), DirtyState::Dirty);
        assert_eq!(DirtyState::from_str("Clean").unwrap(), DirtyState::Clean);
        assert!(DirtyState::from_str("Unsynced change").is_err());
    }

    #[test]
    fn test_column_token_round_trip() {
        for state in [DirtyState::New, DirtyState::Dirty, DirtyState::Clean] {
            assert_eq!(DirtyState::from_str(state.as_str()).unwrap(), state);
        }
    }
}
