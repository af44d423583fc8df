use crate::config::WatchConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// A filesystem change observed under a watched root.
///
/// Paths are absolute. `Moved` carries both ends of a rename; its `path` is
/// the destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChangeEvent {
    Created { path: PathBuf, timestamp: u64 },
    Modified { path: PathBuf, timestamp: u64 },
    Deleted { path: PathBuf, timestamp: u64 },
    Moved { from: PathBuf, path: PathBuf, timestamp: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
    Moved,
}

impl ChangeKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "Created",
            Self::Modified => "Modified",
            Self::Deleted => "Deleted",
            Self::Moved => "Moved",
        }
    }

    /// What the index has to do for a change of this kind.
    #[must_use]
    pub const fn action(self) -> IndexAction {
        match self {
            Self::Created => IndexAction::IndexNewFile,
            Self::Modified => IndexAction::ReindexFile,
            Self::Deleted => IndexAction::RemoveFromIndex,
            Self::Moved => IndexAction::UpdateFilePath,
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ChangeEvent {
    pub fn created(path: impl Into<PathBuf>) -> Self {
        Self::Created {
            path: path.into(),
            timestamp: now_unix_ms(),
        }
    }

    pub fn modified(path: impl Into<PathBuf>) -> Self {
        Self::Modified {
            path: path.into(),
            timestamp: now_unix_ms(),
        }
    }

    pub fn deleted(path: impl Into<PathBuf>) -> Self {
        Self::Deleted {
            path: path.into(),
            timestamp: now_unix_ms(),
        }
    }

    pub fn moved(from: impl Into<PathBuf>, to: impl Into<PathBuf>) -> Self {
        Self::Moved {
            from: from.into(),
            path: to.into(),
            timestamp: now_unix_ms(),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Created { path, .. }
            | Self::Modified { path, .. }
            | Self::Deleted { path, .. }
            | Self::Moved { path, .. } => path,
        }
    }

    #[must_use]
    pub const fn timestamp(&self) -> u64 {
        match self {
            Self::Created { timestamp, .. }
            | Self::Modified { timestamp, .. }
            | Self::Deleted { timestamp, .. }
            | Self::Moved { timestamp, .. } => *timestamp,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> ChangeKind {
        match self {
            Self::Created { .. } => ChangeKind::Created,
            Self::Modified { .. } => ChangeKind::Modified,
            Self::Deleted { .. } => ChangeKind::Deleted,
            Self::Moved { .. } => ChangeKind::Moved,
        }
    }

    /// Same change, different kind. Used when coalescing.
    #[must_use]
    pub(crate) fn with_kind(self, kind: ChangeKind) -> Self {
        let timestamp = self.timestamp();
        match (self, kind) {
            (Self::Moved { from, path, .. }, ChangeKind::Moved) => Self::Moved {
                from,
                path,
                timestamp,
            },
            (event, ChangeKind::Moved) => event,
            (event, ChangeKind::Created) => Self::Created {
                path: event.path().to_path_buf(),
                timestamp,
            },
            (event, ChangeKind::Modified) => Self::Modified {
                path: event.path().to_path_buf(),
                timestamp,
            },
            (event, ChangeKind::Deleted) => Self::Deleted {
                path: event.path().to_path_buf(),
                timestamp,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexAction {
    IndexNewFile,
    ReindexFile,
    RemoveFromIndex,
    UpdateFilePath,
}

/// Outcome of screening one event against a watch configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EventDisposition {
    Ignored {
        reason: String,
        pattern: Option<String>,
    },
    Queued {
        action: IndexAction,
        event_type: ChangeKind,
        file_path: PathBuf,
    },
}

impl EventDisposition {
    #[must_use]
    pub const fn status(&self) -> &'static str {
        match self {
            Self::Ignored { .. } => "ignored",
            Self::Queued { .. } => "queued",
        }
    }

    #[must_use]
    pub const fn is_queued(&self) -> bool {
        matches!(self, Self::Queued { .. })
    }
}

/// Screen a single event: excluded or out-of-scope paths are ignored,
/// everything else is queued with the matching index action.
#[must_use]
pub fn handle_event(event: &ChangeEvent, config: &WatchConfig) -> EventDisposition {
    let path = event.path();
    if let Some(pattern) = config.exclusion_match(path) {
        return EventDisposition::Ignored {
            reason: "excluded_pattern".to_string(),
            pattern: Some(pattern.to_string()),
        };
    }
    if !config.in_scope(path) {
        return EventDisposition::Ignored {
            reason: "outside_watch_roots".to_string(),
            pattern: None,
        };
    }
    EventDisposition::Queued {
        action: event.kind().action(),
        event_type: event.kind(),
        file_path: path.to_path_buf(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub status: &'static str,
    pub total_events: usize,
    pub processed: usize,
    pub ignored: usize,
    pub details: Vec<EventDisposition>,
}

/// Screen a batch of events, reporting per-event dispositions in input order.
#[must_use]
pub fn process_batch_events(events: &[ChangeEvent], config: &WatchConfig) -> BatchReport {
    let details: Vec<EventDisposition> = events.iter().map(|e| handle_event(e, config)).collect();
    let processed = details.iter().filter(|d| d.is_queued()).count();
    BatchReport {
        status: "batch_processed",
        total_events: events.len(),
        processed,
        ignored: events.len() - processed,
        details,
    }
}

#[allow(clippy::cast_possible_truncation)]
pub(crate) fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|dur| dur.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_type_tag() {
        let event = ChangeEvent::Modified {
            path: PathBuf::from("/workspace/a.rs"),
            timestamp: 7,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "Modified");
        assert_eq!(json["path"], "/workspace/a.rs");

        let back: ChangeEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn with_kind_keeps_path_and_time() {
        let event = ChangeEvent::Created {
            path: PathBuf::from("/w/x"),
            timestamp: 3,
        };
        let modified = event.with_kind(ChangeKind::Modified);
        assert_eq!(modified.kind(), ChangeKind::Modified);
        assert_eq!(modified.path(), Path::new("/w/x"));
        assert_eq!(modified.timestamp(), 3);
    }

    #[test]
    fn kinds_map_to_actions() {
        assert_eq!(ChangeKind::Created.action(), IndexAction::IndexNewFile);
        assert_eq!(ChangeKind::Deleted.action(), IndexAction::RemoveFromIndex);
        assert_eq!(ChangeKind::Moved.to_string(), "Moved");
        assert_eq!(serde_json::to_value(ChangeKind::Deleted).unwrap(), "Deleted");
    }
}
