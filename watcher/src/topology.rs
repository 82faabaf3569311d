//! Registry of live watches and the directory tree they mirror.
//!
//! The kernel identifies every notification only by a watch handle (plus a
//! bare entry name). `WatchTopology` keeps two indices over the same set of
//! entries:
//!
//! - handle → (parent, name), walked upwards to rebuild absolute paths;
//! - (parent, name) → handle, needed because directory deletions are
//!   reported against the *parent* handle while releasing a watch needs the
//!   child's own handle.
//!
//! Both indices are private and only ever changed together, so they cannot
//! drift apart.

use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::PathBuf;

use crate::error::{Result, WatcherError};

/// Opaque kernel-issued identifier of one directory watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchHandle(i32);

impl WatchHandle {
    /// Wrap a raw descriptor returned by the notification facility.
    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    /// The raw descriptor value.
    pub const fn as_raw(self) -> i32 {
        self.0
    }
}

impl fmt::Display for WatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Parent of a topology entry: another watch, or nothing for a watched root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Parent {
    /// Explicitly watched root; its name is the root's absolute path.
    Root,
    /// Subdirectory discovered below the given watch.
    Handle(WatchHandle),
}

impl fmt::Display for Parent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Root => f.write_str("root"),
            Self::Handle(handle) => handle.fmt(f),
        }
    }
}

impl From<WatchHandle> for Parent {
    fn from(handle: WatchHandle) -> Self {
        Self::Handle(handle)
    }
}

#[derive(Debug, Clone)]
struct TopologyEntry {
    parent: Parent,
    name: OsString,
    /// Kernel already dropped this watch on its own (directory deleted).
    kernel_released: bool,
}

/// An entry removed from the topology.
///
/// Whoever unregisters an entry owns the matching kernel watch and is
/// expected to release it when `needs_release` is set.
#[must_use = "the kernel watch of an unregistered entry must be released"]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unregistered {
    /// Handle the entry was registered under.
    pub handle: WatchHandle,

    /// Local name of the entry.
    pub name: OsString,

    /// False when the kernel already released the watch itself.
    pub needs_release: bool,
}

/// Bidirectional, hierarchical index of watched directories.
#[derive(Debug, Default)]
pub struct WatchTopology {
    forward: HashMap<WatchHandle, TopologyEntry>,
    reverse: HashMap<(Parent, OsString), WatchHandle>,
}

impl WatchTopology {
    /// Create an empty topology.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `handle` watches the entry `name` below `parent`.
    pub fn register(
        &mut self,
        parent: Parent,
        name: impl Into<OsString>,
        handle: WatchHandle,
    ) -> Result<()> {
        let name = name.into();
        if self.forward.contains_key(&handle) {
            return Err(WatcherError::DuplicateHandle(handle));
        }
        let key = (parent, name);
        if self.reverse.contains_key(&key) {
            let (parent, name) = key;
            return Err(WatcherError::DuplicateEntry { parent, name });
        }

        self.forward.insert(
            handle,
            TopologyEntry {
                parent,
                name: key.1.clone(),
                kernel_released: false,
            },
        );
        self.reverse.insert(key, handle);
        Ok(())
    }

    /// Rebuild the absolute path watched by `handle`.
    pub fn resolve_path(&self, handle: WatchHandle) -> Result<PathBuf> {
        let mut names = Vec::new();
        let mut current = handle;
        loop {
            let entry = self
                .forward
                .get(&current)
                .ok_or(WatcherError::UnknownHandle(current))?;
            names.push(entry.name.as_os_str());
            match entry.parent {
                Parent::Root => break,
                Parent::Handle(parent) => current = parent,
            }
        }

        Ok(names.iter().rev().collect())
    }

    /// Look up the handle of `name` below `parent`.
    pub fn resolve_handle(&self, parent: Parent, name: &OsStr) -> Result<WatchHandle> {
        self.reverse
            .get(&(parent, name.to_os_string()))
            .copied()
            .ok_or(WatcherError::UnknownHandle(match parent {
                Parent::Handle(handle) => handle,
                Parent::Root => WatchHandle::from_raw(-1),
            }))
    }

    /// Remove the entry `name` below `parent` from both indices.
    pub fn unregister(&mut self, parent: Parent, name: &OsStr) -> Result<Unregistered> {
        let key = (parent, name.to_os_string());
        let Some(handle) = self.reverse.remove(&key) else {
            let (parent, name) = key;
            return Err(WatcherError::UnknownEntry { parent, name });
        };
        let needs_release = self
            .forward
            .remove(&handle)
            .is_some_and(|entry| !entry.kernel_released);

        Ok(Unregistered {
            handle,
            name: key.1,
            needs_release,
        })
    }

    /// Remove the entry registered under `handle`, wherever it sits.
    pub fn unregister_handle(&mut self, handle: WatchHandle) -> Result<Unregistered> {
        let (parent, name) = self
            .forward
            .get(&handle)
            .map(|entry| (entry.parent, entry.name.clone()))
            .ok_or(WatcherError::UnknownHandle(handle))?;
        self.unregister(parent, &name)
    }

    /// Remove the entry `name` below `parent` and every entry below it.
    ///
    /// The entry itself comes first, descendants follow parent before child.
    pub fn unregister_subtree(&mut self, parent: Parent, name: &OsStr) -> Result<Vec<Unregistered>> {
        let top = self.unregister(parent, name)?;
        let mut pending = vec![top.handle];
        let mut removed = vec![top];

        while let Some(handle) = pending.pop() {
            let below = Parent::Handle(handle);
            let children: Vec<OsString> = self
                .reverse
                .keys()
                .filter(|(parent, _)| *parent == below)
                .map(|(_, name)| name.clone())
                .collect();
            for child in children {
                let entry = self.unregister(below, &child)?;
                pending.push(entry.handle);
                removed.push(entry);
            }
        }

        Ok(removed)
    }

    /// Note that the kernel dropped the watch behind `handle` by itself.
    ///
    /// The entry stays in place so queued notifications for its children can
    /// still be attributed; the parent's delete record erases it later.
    pub fn mark_kernel_released(&mut self, handle: WatchHandle) -> Result<()> {
        let entry = self
            .forward
            .get_mut(&handle)
            .ok_or(WatcherError::UnknownHandle(handle))?;
        entry.kernel_released = true;
        Ok(())
    }

    /// Whether `handle` is a watched root.
    pub fn is_root(&self, handle: WatchHandle) -> bool {
        self.forward
            .get(&handle)
            .is_some_and(|entry| entry.parent == Parent::Root)
    }

    /// Whether `handle` is currently registered.
    pub fn contains(&self, handle: WatchHandle) -> bool {
        self.forward.contains_key(&handle)
    }

    /// Number of registered watches.
    pub fn len(&self) -> usize {
        self.forward.len()
    }

    /// Whether no watch is registered.
    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// Empty the topology, yielding every entry for release.
    pub fn drain(&mut self) -> Vec<Unregistered> {
        self.reverse.clear();
        self.forward
            .drain()
            .map(|(handle, entry)| Unregistered {
                handle,
                name: entry.name,
                needs_release: !entry.kernel_released,
            })
            .collect()
    }

    /// Check that both indices are exact inverses of each other.
    pub fn is_consistent(&self) -> bool {
        self.forward.len() == self.reverse.len()
            && self.forward.iter().all(|(handle, entry)| {
                self.reverse.get(&(entry.parent, entry.name.clone())) == Some(handle)
            })
    }
}
