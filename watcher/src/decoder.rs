//! Decoding of raw inotify batches.
//!
//! One `read(2)` on an inotify descriptor returns a packed sequence of
//! variable-length records: a fixed `inotify_event` header followed by
//! `len` bytes of NUL-padded entry name. Records are decoded strictly in
//! order since later records may refer to watches installed because of
//! earlier ones.

use std::ffi::OsString;
use std::mem::size_of;
use std::os::unix::ffi::{OsStrExt, OsStringExt};

use crate::error::{Result, WatcherError};
use crate::event::{ChangeKind, ChangeRecord};
use crate::topology::WatchHandle;

/// Size of the fixed record header.
pub const EVENT_HEADER_LEN: usize = size_of::<libc::inotify_event>();

const NAME_MAX: usize = 255;

/// Size of the largest possible record; reads need room for at least one.
pub const MAX_EVENT_LEN: usize = EVENT_HEADER_LEN + NAME_MAX + 1;

/// One undecoded-mask record as laid out by the kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    /// Watch the record was reported on.
    pub handle: WatchHandle,

    /// Event mask bits (`IN_*`).
    pub mask: u32,

    /// Rename cookie.
    pub cookie: u32,

    /// Entry name, absent for events about the watched directory itself.
    pub name: Option<OsString>,
}

impl RawEvent {
    /// Create a record for `name` inside the directory watched by `handle`.
    pub fn new(handle: WatchHandle, mask: u32, name: impl Into<OsString>) -> Self {
        Self {
            handle,
            mask,
            cookie: 0,
            name: Some(name.into()),
        }
    }

    /// Create a record without a name.
    pub fn nameless(handle: WatchHandle, mask: u32) -> Self {
        Self {
            handle,
            mask,
            cookie: 0,
            name: None,
        }
    }

    /// Append the kernel wire form of this record to `out`.
    ///
    /// Used to build synthetic batches for scripted notification sources.
    pub fn encode(&self, out: &mut Vec<u8>) {
        let name = self.name.as_deref().map(OsStrExt::as_bytes).unwrap_or_default();
        // Name plus terminator, padded to the header's alignment.
        let padded = if name.is_empty() {
            0
        } else {
            (name.len() + 1).next_multiple_of(4)
        };

        out.extend_from_slice(&self.handle.as_raw().to_ne_bytes());
        out.extend_from_slice(&self.mask.to_ne_bytes());
        out.extend_from_slice(&self.cookie.to_ne_bytes());
        out.extend_from_slice(&(padded as u32).to_ne_bytes());
        out.extend_from_slice(name);
        out.resize(out.len() + padded - name.len(), 0);
    }

    fn interpret(self) -> Option<Notification> {
        if self.mask & libc::IN_Q_OVERFLOW != 0 {
            return Some(Notification::Overflow);
        }
        if self.mask & libc::IN_UNMOUNT != 0 {
            return Some(Notification::Unmounted(self.handle));
        }
        if self.mask & libc::IN_IGNORED != 0 {
            return Some(Notification::WatchRemoved(self.handle));
        }

        let name = self.name?;
        let kind = if self.mask & libc::IN_CREATE != 0 {
            ChangeKind::Create
        } else if self.mask & libc::IN_MODIFY != 0 {
            ChangeKind::Modify
        } else if self.mask & libc::IN_DELETE != 0 {
            ChangeKind::Delete
        } else {
            return None;
        };

        Some(Notification::Change(ChangeRecord::new(
            self.handle,
            kind,
            self.mask & libc::IN_ISDIR != 0,
            name,
        )))
    }
}

/// A decoded notification, in the order the kernel queued it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Change to an entry inside a watched directory.
    Change(ChangeRecord),

    /// The kernel dropped the watch (explicit removal or directory deleted).
    WatchRemoved(WatchHandle),

    /// The filesystem holding the watched directory was unmounted.
    Unmounted(WatchHandle),

    /// The kernel queue overflowed and events were lost.
    Overflow,
}

/// Split a batch into raw records.
pub fn decode_raw(bytes: &[u8]) -> Result<Vec<RawEvent>> {
    let mut events = Vec::new();
    let mut offset = 0;

    while offset < bytes.len() {
        let header = bytes
            .get(offset..offset + EVENT_HEADER_LEN)
            .ok_or_else(|| WatcherError::Decode {
                offset,
                reason: format!(
                    "truncated header: {} of {EVENT_HEADER_LEN} bytes",
                    bytes.len() - offset
                ),
            })?;

        let handle = WatchHandle::from_raw(i32::from_ne_bytes(word(header, 0)));
        let mask = u32::from_ne_bytes(word(header, 4));
        let cookie = u32::from_ne_bytes(word(header, 8));
        let len = u32::from_ne_bytes(word(header, 12)) as usize;

        let name_start = offset + EVENT_HEADER_LEN;
        let raw_name = bytes
            .get(name_start..name_start + len)
            .ok_or_else(|| WatcherError::Decode {
                offset,
                reason: format!(
                    "name length {len} runs past end of batch ({} bytes left)",
                    bytes.len() - name_start
                ),
            })?;

        let trimmed = raw_name
            .iter()
            .position(|&byte| byte == 0)
            .map_or(raw_name, |end| &raw_name[..end]);
        let name = (!trimmed.is_empty()).then(|| OsString::from_vec(trimmed.to_vec()));

        events.push(RawEvent {
            handle,
            mask,
            cookie,
            name,
        });
        offset = name_start + len;
    }

    Ok(events)
}

/// Decode a batch into the notifications the engine acts on.
///
/// Records the engine has no use for (events about a watched directory
/// itself, masks outside create/modify/delete) are skipped.
pub fn decode_batch(bytes: &[u8]) -> Result<Vec<Notification>> {
    Ok(decode_raw(bytes)?
        .into_iter()
        .filter_map(RawEvent::interpret)
        .collect())
}

fn word(header: &[u8], at: usize) -> [u8; 4] {
    [header[at], header[at + 1], header[at + 2], header[at + 3]]
}
