//! Keeps the watch topology in lockstep with directory creation and
//! deletion.
//!
//! Erasing a topology entry and releasing its kernel watch only happen
//! together, through [`release`], [`release_all`] and the stale-entry
//! replacement on directory creation.

use std::ffi::OsStr;
use std::path::Path;

use tracing::{debug, warn};

use crate::error::{Result, WatcherError};
use crate::event::{ChangeKind, ChangeRecord};
use crate::source::NotificationSource;
use crate::topology::{Parent, Unregistered, WatchHandle, WatchTopology};

/// What applying one record did to the topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Maintenance {
    /// The record does not change the topology.
    Unchanged,

    /// A watch was installed for a new directory.
    Installed(WatchHandle),

    /// A watch was installed after dropping a stale entry of the same name
    /// (left behind by a rename, which is not reported) and everything
    /// below it.
    Replaced {
        installed: WatchHandle,
        released: u64,
    },

    /// The new directory is one already watched under another name; its
    /// entry moved to the new name.
    Rehomed(WatchHandle),

    /// The new directory could not be watched (usually already gone).
    InstallSkipped,

    /// A deleted directory's entry was erased and its watch released.
    Released(WatchHandle),

    /// The deleted directory was not (or no longer) watched.
    AlreadyGone,
}

/// Apply the topology side effects of `record`.
///
/// `path` is the record's resolved absolute path, computed before this call
/// so that it reflects the topology as it was prior to the record.
pub fn apply<S>(
    topology: &mut WatchTopology,
    source: &mut S,
    record: &ChangeRecord,
    path: &Path,
) -> Result<Maintenance>
where
    S: NotificationSource + ?Sized,
{
    if !record.is_directory {
        return Ok(Maintenance::Unchanged);
    }

    match record.kind {
        ChangeKind::Create => install(topology, source, record, path),
        ChangeKind::Delete => release(topology, source, record.handle.into(), &record.name),
        ChangeKind::Modify => Ok(Maintenance::Unchanged),
    }
}

fn install<S>(
    topology: &mut WatchTopology,
    source: &mut S,
    record: &ChangeRecord,
    path: &Path,
) -> Result<Maintenance>
where
    S: NotificationSource + ?Sized,
{
    let parent = Parent::from(record.handle);
    let released: u64 = match topology.resolve_handle(parent, &record.name) {
        Ok(stale) => {
            debug!("replacing stale watch {stale} for {}", path.display());
            topology
                .unregister_subtree(parent, &record.name)?
                .into_iter()
                .map(|entry| u64::from(release_kernel_watch(source, entry)))
                .sum()
        }
        Err(_) => 0,
    };

    let handle = match source.add_watch(path) {
        Ok(handle) => handle,
        Err(e) => {
            // Directory vanished (or the watch limit was hit) between the
            // notification and now; changes below it go unobserved.
            warn!("not watching new directory {}: {e}", path.display());
            return Ok(Maintenance::InstallSkipped);
        }
    };

    if topology.contains(handle) {
        // The kernel hands out one watch per inode.
        let previous = topology.unregister_handle(handle)?;
        topology.register(parent, record.name.clone(), handle)?;
        debug!(
            "watch {handle} moved from {:?} to {}",
            previous.name,
            path.display()
        );
        return Ok(Maintenance::Rehomed(handle));
    }

    if let Err(e) = topology.register(parent, record.name.clone(), handle) {
        if let Err(release_err) = source.remove_watch(handle) {
            warn!("failed to release unregistered watch {handle}: {release_err}");
        }
        return Err(e);
    }
    debug!("watching {} as {handle}", path.display());

    if released > 0 {
        Ok(Maintenance::Replaced {
            installed: handle,
            released,
        })
    } else {
        Ok(Maintenance::Installed(handle))
    }
}

/// Erase the entry `name` below `parent` and release its kernel watch.
///
/// A missing entry is not an error: duplicate delete notifications and
/// directories that were never watched both end up here.
pub fn release<S>(
    topology: &mut WatchTopology,
    source: &mut S,
    parent: Parent,
    name: &OsStr,
) -> Result<Maintenance>
where
    S: NotificationSource + ?Sized,
{
    match topology.unregister(parent, name) {
        Ok(entry) => {
            let handle = entry.handle;
            release_kernel_watch(source, entry);
            Ok(Maintenance::Released(handle))
        }
        Err(WatcherError::UnknownEntry { parent, name }) => {
            debug!("delete of unwatched directory {name:?} under {parent}");
            Ok(Maintenance::AlreadyGone)
        }
        Err(e) => Err(e),
    }
}

/// Erase every entry and release each watch still held, returning how many
/// kernel watches were released.
pub fn release_all<S>(topology: &mut WatchTopology, source: &mut S) -> u64
where
    S: NotificationSource + ?Sized,
{
    topology
        .drain()
        .into_iter()
        .map(|entry| u64::from(release_kernel_watch(source, entry)))
        .sum()
}

fn release_kernel_watch<S>(source: &mut S, entry: Unregistered) -> bool
where
    S: NotificationSource + ?Sized,
{
    if !entry.needs_release {
        debug!("watch {} was already dropped by the kernel", entry.handle);
        return false;
    }
    match source.remove_watch(entry.handle) {
        Ok(()) => {
            debug!("released watch {} ({:?})", entry.handle, entry.name);
            true
        }
        Err(e) => {
            warn!("failed to release watch {}: {e}", entry.handle);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::testing::ScriptedSource;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    fn setup() -> (WatchTopology, ScriptedSource, WatchHandle) {
        let mut source = ScriptedSource::new();
        let mut topology = WatchTopology::new();
        let root = source.add_watch(Path::new("/tmp/w")).unwrap();
        topology.register(Parent::Root, "/tmp/w", root).unwrap();
        (topology, source, root)
    }

    #[test]
    fn test_create_installs_watch() {
        let (mut topology, mut source, root) = setup();
        let record = ChangeRecord::new(root, ChangeKind::Create, true, "sub");

        let outcome = apply(&mut topology, &mut source, &record, Path::new("/tmp/w/sub")).unwrap();

        let Maintenance::Installed(handle) = outcome else {
            panic!("expected a watch, got {outcome:?}");
        };
        assert_eq!(topology.resolve_path(handle).unwrap(), PathBuf::from("/tmp/w/sub"));
        assert_eq!(
            source.log().lock().unwrap().handle_for(Path::new("/tmp/w/sub")),
            Some(handle)
        );
        assert!(topology.is_consistent());
    }

    #[test]
    fn test_vanished_directory_is_skipped() {
        let (mut topology, _, root) = setup();
        let mut source = ScriptedSource::new().vanished("/tmp/w/gone");
        let record = ChangeRecord::new(root, ChangeKind::Create, true, "gone");

        let outcome = apply(&mut topology, &mut source, &record, Path::new("/tmp/w/gone")).unwrap();

        assert_eq!(outcome, Maintenance::InstallSkipped);
        assert_eq!(topology.len(), 1);
    }

    #[test]
    fn test_delete_releases_once() {
        let (mut topology, mut source, root) = setup();
        let create = ChangeRecord::new(root, ChangeKind::Create, true, "sub");
        let Maintenance::Installed(sub) =
            apply(&mut topology, &mut source, &create, Path::new("/tmp/w/sub")).unwrap()
        else {
            panic!("expected a watch");
        };

        let delete = ChangeRecord::new(root, ChangeKind::Delete, true, "sub");
        let first = apply(&mut topology, &mut source, &delete, Path::new("/tmp/w/sub")).unwrap();
        let second = apply(&mut topology, &mut source, &delete, Path::new("/tmp/w/sub")).unwrap();

        assert_eq!(first, Maintenance::Released(sub));
        assert_eq!(second, Maintenance::AlreadyGone);
        assert_eq!(source.log().lock().unwrap().removed, vec![sub]);
        assert!(topology.is_consistent());
    }

    #[test]
    fn test_kernel_released_watch_not_released_again() {
        let (mut topology, mut source, root) = setup();
        let create = ChangeRecord::new(root, ChangeKind::Create, true, "sub");
        apply(&mut topology, &mut source, &create, Path::new("/tmp/w/sub")).unwrap();
        let sub = topology.resolve_handle(root.into(), OsStr::new("sub")).unwrap();
        topology.mark_kernel_released(sub).unwrap();

        let released = release(&mut topology, &mut source, root.into(), OsStr::new("sub")).unwrap();

        assert_eq!(released, Maintenance::Released(sub));
        assert!(source.log().lock().unwrap().removed.is_empty());
    }

    #[test]
    fn test_files_never_touch_topology() {
        let (mut topology, mut source, root) = setup();
        for kind in [ChangeKind::Create, ChangeKind::Modify, ChangeKind::Delete] {
            let record = ChangeRecord::new(root, kind, false, "f.txt");
            let outcome =
                apply(&mut topology, &mut source, &record, Path::new("/tmp/w/f.txt")).unwrap();
            assert_eq!(outcome, Maintenance::Unchanged);
        }
        assert_eq!(topology.len(), 1);
    }

    #[test]
    fn test_recreated_name_replaces_stale_subtree() {
        let (mut topology, mut source, root) = setup();
        let create = ChangeRecord::new(root, ChangeKind::Create, true, "sub");
        let Maintenance::Installed(old_sub) =
            apply(&mut topology, &mut source, &create, Path::new("/tmp/w/sub")).unwrap()
        else {
            panic!("expected a watch");
        };
        let nested = ChangeRecord::new(old_sub, ChangeKind::Create, true, "inner");
        let Maintenance::Installed(old_inner) =
            apply(&mut topology, &mut source, &nested, Path::new("/tmp/w/sub/inner")).unwrap()
        else {
            panic!("expected a watch");
        };

        // "sub" was renamed away unseen, then a new "sub" appeared.
        let outcome = apply(&mut topology, &mut source, &create, Path::new("/tmp/w/sub")).unwrap();

        let Maintenance::Replaced {
            installed,
            released,
        } = outcome
        else {
            panic!("expected a replacement, got {outcome:?}");
        };
        assert_eq!(released, 2);
        assert_eq!(
            topology.resolve_handle(root.into(), OsStr::new("sub")).unwrap(),
            installed
        );
        let mut removed = source.log().lock().unwrap().removed.clone();
        removed.sort();
        assert_eq!(removed, vec![old_sub, old_inner]);
        assert_eq!(topology.len(), 2);
        assert!(topology.is_consistent());
    }

    #[test]
    fn test_same_inode_under_new_name_is_rehomed() {
        let (mut topology, mut source, root) = setup();
        let create = ChangeRecord::new(root, ChangeKind::Create, true, "a");
        let Maintenance::Installed(a) =
            apply(&mut topology, &mut source, &create, Path::new("/tmp/w/a")).unwrap()
        else {
            panic!("expected a watch");
        };
        let mut source = source.reuse("/tmp/w/b", a);

        let record = ChangeRecord::new(root, ChangeKind::Create, true, "b");
        let outcome = apply(&mut topology, &mut source, &record, Path::new("/tmp/w/b")).unwrap();

        assert_eq!(outcome, Maintenance::Rehomed(a));
        assert_eq!(topology.resolve_path(a).unwrap(), PathBuf::from("/tmp/w/b"));
        assert!(source.log().lock().unwrap().removed.is_empty());
        assert_eq!(topology.len(), 2);
        assert!(topology.is_consistent());
    }

    #[test]
    fn test_release_all_skips_kernel_released() {
        let (mut topology, mut source, root) = setup();
        let create = ChangeRecord::new(root, ChangeKind::Create, true, "sub");
        apply(&mut topology, &mut source, &create, Path::new("/tmp/w/sub")).unwrap();
        let sub = topology.resolve_handle(root.into(), OsStr::new("sub")).unwrap();
        topology.mark_kernel_released(sub).unwrap();

        assert_eq!(release_all(&mut topology, &mut source), 1);
        assert!(topology.is_empty());
        assert_eq!(source.log().lock().unwrap().removed, vec![root]);
    }
}
