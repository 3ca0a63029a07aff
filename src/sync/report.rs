//! Outcomes of sync operations.

use std::fmt;

use super::error::SyncError;
use crate::models::{EntityKind, RemoteEntity};

/// Remote state captured when a local edit collided with a newer server
/// version. The local record is left `Dirty` until the user resolves it.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictShadow {
    pub kind: EntityKind,
    pub key: String,
    /// Etag the local edit was based on.
    pub local_etag: String,
    /// Server copy at detection time. `None` when it could not be fetched.
    pub remote: Option<RemoteEntity>,
}

/// A record that could not be pushed during a pass.
#[derive(Debug)]
pub struct RecordFailure {
    pub key: String,
    pub error: SyncError,
}

/// Result of a single-record fetch.
#[derive(Debug)]
pub enum Fetched<T> {
    /// Remote state was written to the local store as `Clean`.
    Applied(T),
    /// The local copy has unsent edits and was kept; the server copy is in
    /// the shadow.
    LocalKept(ConflictShadow),
}

/// Counts from a full download of one kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PullSummary {
    /// Server-only records added locally.
    pub inserted: usize,
    /// Clean local records replaced by a newer server version.
    pub refreshed: usize,
}

#[derive(Debug)]
pub struct SyncReport {
    pub kind: EntityKind,
    /// Keys of the records confirmed by the server, after any re-keying.
    pub pushed: Vec<String>,
    /// Keys accepted by the server but edited again meanwhile; still pending.
    pub requeued: Vec<String>,
    pub conflicts: Vec<ConflictShadow>,
    pub failures: Vec<RecordFailure>,
    pub pull: Option<PullSummary>,
    pub pull_error: Option<SyncError>,
    /// The pass was stopped through its abort handle.
    pub aborted: bool,
}

impl SyncReport {
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            pushed: Vec::new(),
            requeued: Vec::new(),
            conflicts: Vec::new(),
            failures: Vec::new(),
            pull: None,
            pull_error: None,
            aborted: false,
        }
    }

    /// True when nothing needs attention.
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
            && self.failures.is_empty()
            && self.pull_error.is_none()
            && !self.aborted
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = vec![format!("{} pushed", self.pushed.len())];
        if !self.requeued.is_empty() {
            parts.push(format!("{} requeued", self.requeued.len()));
        }
        if let Some(pull) = &self.pull {
            parts.push(format!("{} new", pull.inserted));
            parts.push(format!("{} refreshed", pull.refreshed));
        }
        if !self.conflicts.is_empty() {
            parts.push(format!("{} conflicted", self.conflicts.len()));
        }
        if !self.failures.is_empty() {
            parts.push(format!("{} failed", self.failures.len()));
        }

        let status = if self.is_clean() { "✓" } else { "✗" };
        write!(f, "{} {}s: {}", status, self.kind, parts.join(", "))?;
        if self.aborted {
            write!(f, " (aborted)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_display() {
        let mut report = SyncReport::new(EntityKind::Item);
        report.pushed.push("K1".into());
        report.pull = Some(PullSummary {
            inserted: 2,
            refreshed: 0,
        });
        assert_eq!(report.to_string(), "✓ items: 1 pushed, 2 new, 0 refreshed");

        report.failures.push(RecordFailure {
            key: "K2".into(),
            error: SyncError::transport_retryable("timeout"),
        });
        report.aborted = true;
        assert!(!report.is_clean());
        assert_eq!(
            report.to_string(),
            "✗ items: 1 pushed, 2 new, 0 refreshed, 1 failed (aborted)"
        );
    }

    #[test]
    fn test_requeued_records_are_counted_separately() {
        let mut report = SyncReport::new(EntityKind::Collection);
        report.pushed.push("C1".into());
        report.requeued.push("C2".into());
        assert!(report.is_clean());
        assert_eq!(report.to_string(), "✓ collections: 1 pushed, 1 requeued");
    }
}
