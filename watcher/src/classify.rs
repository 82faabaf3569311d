//! Classification of change records into semantic events.

use crate::error::Result;
use crate::event::{ChangeKind, ChangeRecord, ClassifiedEvent, EventType};
use crate::topology::WatchTopology;

/// Map a change kind and entry type to its event type.
pub fn classify(kind: ChangeKind, is_directory: bool) -> EventType {
    match (kind, is_directory) {
        (ChangeKind::Create, true) => EventType::DirCreated,
        (ChangeKind::Create, false) => EventType::FileCreated,
        (ChangeKind::Modify, true) => EventType::DirModified,
        (ChangeKind::Modify, false) => EventType::FileModified,
        (ChangeKind::Delete, true) => EventType::DirDeleted,
        (ChangeKind::Delete, false) => EventType::FileDeleted,
    }
}

/// Resolve `record` to an event with an absolute path.
///
/// The path is the record's own containing directory (`record.handle`) plus
/// the entry name, read from the topology as it stands before this record
/// mutates it. Fails with `UnknownHandle` when the containing watch is
/// already gone.
pub fn resolve(topology: &WatchTopology, record: &ChangeRecord) -> Result<ClassifiedEvent> {
    let parent = topology.resolve_path(record.handle)?;
    Ok(ClassifiedEvent::new(
        classify(record.kind, record.is_directory),
        parent.join(&record.name),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WatcherError;
    use crate::topology::{Parent, WatchHandle};
    use pretty_assertions::assert_eq;
    use std::path::Path;

    #[test]
    fn test_classification_table() {
        let cases = [
            (ChangeKind::Create, true, EventType::DirCreated),
            (ChangeKind::Create, false, EventType::FileCreated),
            (ChangeKind::Modify, true, EventType::DirModified),
            (ChangeKind::Modify, false, EventType::FileModified),
            (ChangeKind::Delete, true, EventType::DirDeleted),
            (ChangeKind::Delete, false, EventType::FileDeleted),
        ];
        for (kind, is_directory, expected) in cases {
            assert_eq!(classify(kind, is_directory), expected);
        }
    }

    #[test]
    fn test_resolve_joins_parent_path() {
        let root = WatchHandle::from_raw(1);
        let sub = WatchHandle::from_raw(2);
        let mut topology = WatchTopology::new();
        topology.register(Parent::Root, "/tmp/w", root).unwrap();
        topology.register(root.into(), "sub", sub).unwrap();

        let record = ChangeRecord::new(sub, ChangeKind::Modify, false, "f.txt");
        let event = resolve(&topology, &record).unwrap();
        assert_eq!(event.event_type, EventType::FileModified);
        assert_eq!(event.path, Path::new("/tmp/w/sub/f.txt"));

        // Directory deletes resolve through the parent, not the deleted child.
        let record = ChangeRecord::new(root, ChangeKind::Delete, true, "sub");
        let event = resolve(&topology, &record).unwrap();
        assert_eq!(event.event_type, EventType::DirDeleted);
        assert_eq!(event.path, Path::new("/tmp/w/sub"));
    }

    #[test]
    fn test_resolve_unknown_handle() {
        let topology = WatchTopology::new();
        let record = ChangeRecord::new(WatchHandle::from_raw(5), ChangeKind::Create, false, "x");
        assert!(matches!(
            resolve(&topology, &record),
            Err(WatcherError::UnknownHandle(_))
        ));
    }
}
