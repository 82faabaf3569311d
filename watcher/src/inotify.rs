//! Linux inotify notification source.

use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use async_trait::async_trait;
use tokio::io::Interest;
use tokio::io::unix::AsyncFd;

use crate::source::NotificationSource;
use crate::topology::WatchHandle;

/// Events requested for every watched directory.
pub const WATCH_MASK: u32 =
    libc::IN_CREATE | libc::IN_MODIFY | libc::IN_DELETE | libc::IN_ONLYDIR | libc::IN_DONT_FOLLOW;

/// Non-blocking inotify instance registered with the tokio reactor.
///
/// The descriptor is closed when the source is dropped.
#[derive(Debug)]
pub struct InotifySource {
    fd: AsyncFd<OwnedFd>,
}

impl InotifySource {
    /// Create a new inotify instance.
    pub fn open() -> io::Result<Self> {
        // SAFETY: plain syscall taking only flag bits; the result is checked.
        let raw = unsafe { libc::inotify_init1(libc::IN_NONBLOCK | libc::IN_CLOEXEC) };
        if raw < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: `raw` is a freshly created descriptor owned by nobody else.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };
        // SAFETY: the `OwnedFd` moves into the `AsyncFd` and stays open, with
        // the same descriptor number, until the `AsyncFd` is dropped.
        let fd = unsafe { AsyncFd::register_with_interest(fd, Interest::READABLE) }?;
        Ok(Self { fd })
    }
}

#[async_trait]
impl NotificationSource for InotifySource {
    fn add_watch(&mut self, path: &Path) -> io::Result<WatchHandle> {
        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        // SAFETY: the descriptor is open for the lifetime of `self` and
        // `c_path` is a NUL-terminated string that outlives the call.
        let wd = unsafe { libc::inotify_add_watch(self.fd.as_raw_fd(), c_path.as_ptr(), WATCH_MASK) };
        if wd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(WatchHandle::from_raw(wd))
    }

    fn remove_watch(&mut self, handle: WatchHandle) -> io::Result<()> {
        // SAFETY: the descriptor is open; an unknown handle only yields EINVAL.
        let res = unsafe { libc::inotify_rm_watch(self.fd.as_raw_fd(), handle.as_raw()) };
        if res < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    async fn read_batch(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.fd.readable().await?;
            let result = guard.try_io(|inner| {
                // SAFETY: `buf` is valid for writes of `buf.len()` bytes and
                // borrowed mutably for the whole call.
                let res = unsafe {
                    libc::read(inner.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len())
                };
                if res < 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(res as usize)
                }
            });
            match result {
                Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
                Ok(read) => return read,
                // Spurious readiness; wait again.
                Err(_would_block) => continue,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{Notification, decode_batch};
    use crate::event::ChangeKind;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_reads_create_in_watched_dir() {
        let temp_dir = TempDir::new().unwrap();
        let mut source = InotifySource::open().unwrap();
        let handle = source.add_watch(temp_dir.path()).unwrap();

        std::fs::create_dir(temp_dir.path().join("sub")).unwrap();

        let mut buf = vec![0u8; 4096];
        let len = tokio::time::timeout(Duration::from_secs(5), source.read_batch(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let notifications = decode_batch(&buf[..len]).unwrap();

        let Some(Notification::Change(record)) = notifications.first() else {
            panic!("expected a change record, got {notifications:?}");
        };
        assert_eq!(record.handle, handle);
        assert_eq!(record.kind, ChangeKind::Create);
        assert!(record.is_directory);
        assert_eq!(record.name, "sub");
    }

    #[test]
    fn test_add_watch_on_missing_dir_fails() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .build()
            .unwrap();
        let _guard = runtime.enter();

        let mut source = InotifySource::open().unwrap();
        let err = source
            .add_watch(Path::new("/nonexistent/path/12345"))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_remove_watch_twice_fails() {
        let temp_dir = TempDir::new().unwrap();
        let mut source = InotifySource::open().unwrap();
        let handle = source.add_watch(temp_dir.path()).unwrap();

        source.remove_watch(handle).unwrap();
        assert!(source.remove_watch(handle).is_err());
    }
}
