//! Error types for the change-notification engine.

use std::ffi::OsString;
use std::path::PathBuf;

use thiserror::Error;

use crate::topology::{Parent, WatchHandle};

/// Result type alias for watcher operations.
pub type Result<T> = std::result::Result<T, WatcherError>;

/// Errors that can occur in the change-notification engine.
#[derive(Error, Debug)]
pub enum WatcherError {
    /// A handle was registered twice.
    #[error("watch handle {0} is already registered")]
    DuplicateHandle(WatchHandle),

    /// A (parent, name) pair was registered twice under different handles.
    #[error("entry {name:?} under {parent} is already registered")]
    DuplicateEntry { parent: Parent, name: OsString },

    /// Handle is not (or no longer) in the topology.
    #[error("unknown watch handle {0}")]
    UnknownHandle(WatchHandle),

    /// (parent, name) pair is not (or no longer) in the topology.
    #[error("no watched entry {name:?} under {parent}")]
    UnknownEntry { parent: Parent, name: OsString },

    /// Notification batch is malformed or truncated.
    #[error("corrupt notification batch at offset {offset}: {reason}")]
    Decode { offset: usize, reason: String },

    /// Kernel event queue overflowed; events were lost.
    #[error("notification queue overflowed, events were lost")]
    QueueOverflow,

    /// A watch the engine still considered live was removed by the kernel.
    #[error("watch {handle} on {} was removed by the kernel", path.display())]
    WatchLost { handle: WatchHandle, path: PathBuf },

    /// Notification facility could not be initialized.
    #[error("failed to initialize notification facility: {0}")]
    Init(#[source] std::io::Error),

    /// Reading a notification batch failed.
    #[error("failed to read notification batch: {0}")]
    Read(#[source] std::io::Error),

    /// A watched root could not be registered.
    #[error("failed to watch root {}: {source}", path.display())]
    WatchRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Root directory not found.
    #[error("root directory not found: {0}")]
    RootNotFound(String),

    /// The engine was already started once.
    #[error("engine already started")]
    AlreadyStarted,

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl WatcherError {
    /// Whether this error terminates the engine loop.
    ///
    /// Lookup misses are the only recoverable errors: they stem from queued
    /// notifications racing with a directory that was already torn down.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::UnknownHandle(_) | Self::UnknownEntry { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_misses_are_recoverable() {
        let handle = WatchHandle::from_raw(3);
        assert!(!WatcherError::UnknownHandle(handle).is_fatal());
        assert!(
            !WatcherError::UnknownEntry {
                parent: Parent::Handle(handle),
                name: "gone".into(),
            }
            .is_fatal()
        );
        assert!(WatcherError::QueueOverflow.is_fatal());
        assert!(WatcherError::DuplicateHandle(handle).is_fatal());
    }
}
