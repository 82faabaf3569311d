//! Change records and the semantic events dispatched to callbacks.

use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::topology::WatchHandle;

/// Kind of change reported by the kernel for one directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// Entry was created.
    Create,

    /// Entry was modified.
    Modify,

    /// Entry was deleted.
    Delete,
}

/// One decoded notification about an entry inside a watched directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    /// Watch of the directory containing the entry.
    pub handle: WatchHandle,

    /// Whether the entry is a directory.
    pub is_directory: bool,

    /// What happened to the entry.
    pub kind: ChangeKind,

    /// Name of the entry within its directory.
    pub name: OsString,
}

impl ChangeRecord {
    /// Create a new change record.
    pub fn new(
        handle: WatchHandle,
        kind: ChangeKind,
        is_directory: bool,
        name: impl Into<OsString>,
    ) -> Self {
        Self {
            handle,
            is_directory,
            kind,
            name: name.into(),
        }
    }
}

/// Semantic event type handed to callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// File was created.
    FileCreated,

    /// File was modified.
    FileModified,

    /// File was deleted.
    FileDeleted,

    /// Directory was created.
    DirCreated,

    /// Directory was modified.
    DirModified,

    /// Directory was deleted.
    DirDeleted,
}

impl EventType {
    /// Number of event types.
    pub const COUNT: usize = 6;

    /// Every event type, in ordinal order.
    pub const ALL: [EventType; Self::COUNT] = [
        Self::FileCreated,
        Self::FileModified,
        Self::FileDeleted,
        Self::DirCreated,
        Self::DirModified,
        Self::DirDeleted,
    ];

    /// Stable ordinal of this type, usable as an array index.
    pub const fn index(self) -> usize {
        match self {
            Self::FileCreated => 0,
            Self::FileModified => 1,
            Self::FileDeleted => 2,
            Self::DirCreated => 3,
            Self::DirModified => 4,
            Self::DirDeleted => 5,
        }
    }

    /// Whether this type concerns a directory.
    pub const fn is_directory(self) -> bool {
        matches!(self, Self::DirCreated | Self::DirModified | Self::DirDeleted)
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::FileCreated => "file_created",
            Self::FileModified => "file_modified",
            Self::FileDeleted => "file_deleted",
            Self::DirCreated => "dir_created",
            Self::DirModified => "dir_modified",
            Self::DirDeleted => "dir_deleted",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|event_type| event_type.as_str() == s)
            .ok_or_else(|| format!("unknown event type: {s}"))
    }
}

/// A change resolved to a semantic type and an absolute path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifiedEvent {
    /// The type of event.
    pub event_type: EventType,

    /// Absolute path of the affected file or directory.
    pub path: PathBuf,

    /// When the event was classified.
    pub timestamp: DateTime<Utc>,
}

impl ClassifiedEvent {
    /// Create a new classified event.
    pub fn new(event_type: EventType, path: impl Into<PathBuf>) -> Self {
        Self {
            event_type,
            path: path.into(),
            timestamp: Utc::now(),
        }
    }

    /// Check if this is a directory event.
    pub fn is_directory(&self) -> bool {
        self.event_type.is_directory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::Path;

    #[test]
    fn test_ordinals_match_all() {
        for (position, event_type) in EventType::ALL.into_iter().enumerate() {
            assert_eq!(event_type.index(), position);
        }
    }

    #[test]
    fn test_event_type_parse_and_display() {
        for event_type in EventType::ALL {
            let parsed: EventType = event_type.to_string().parse().unwrap();
            assert_eq!(parsed, event_type);
        }
        assert!("file_renamed".parse::<EventType>().is_err());
    }

    #[test]
    fn test_classified_event_creation() {
        let event = ClassifiedEvent::new(EventType::DirCreated, "/tmp/w/sub");
        assert_eq!(event.path, Path::new("/tmp/w/sub"));
        assert!(event.is_directory());
        assert!(!ClassifiedEvent::new(EventType::FileDeleted, "/tmp/w/f").is_directory());
    }

    #[test]
    fn test_event_type_serde_names() {
        let json = serde_json::to_string(&EventType::FileModified).unwrap();
        assert_eq!(json, "\"file_modified\"");
    }
}
