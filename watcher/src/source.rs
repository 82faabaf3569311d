//! The seam between the engine loop and the kernel notification facility.

use std::io;
use std::path::Path;

use async_trait::async_trait;

use crate::topology::WatchHandle;

/// A notification facility the engine can install watches on and read
/// batches from.
///
/// Dropping the source closes the underlying channel.
#[async_trait]
pub trait NotificationSource: Send {
    /// Start watching the directory at `path` (not recursively).
    fn add_watch(&mut self, path: &Path) -> io::Result<WatchHandle>;

    /// Release a watch previously returned by `add_watch`.
    fn remove_watch(&mut self, handle: WatchHandle) -> io::Result<()>;

    /// Wait until notifications are available and read one batch into
    /// `buf`, returning the number of bytes written.
    ///
    /// Must be cancel safe: dropping the future before it completes loses
    /// no data.
    async fn read_batch(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}
