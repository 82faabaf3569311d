//! Configuration for the watcher engines.

use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::decoder::MAX_EVENT_LEN;
use crate::error::{Result, WatcherError};

/// Default bytes per notification read: room for 1024 short records.
pub const DEFAULT_BUFFER_SIZE: usize = 1024 * (crate::decoder::EVENT_HEADER_LEN + 16);

/// Default period of the polling scanner.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Configuration shared by the inotify engine and the polling scanner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Roots to watch, recursively.
    pub roots: Vec<PathBuf>,

    /// Bytes read from the notification channel at a time.
    pub buffer_size: usize,

    /// Polling scanner period in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl WatchConfig {
    /// Create a config watching the given roots.
    pub fn new<I, P>(roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            roots: roots.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Add a root.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.roots.push(root.into());
        self
    }

    /// Set the read buffer size.
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Set the polling scanner period.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// The polling scanner period.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Load a config from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Check the numeric settings.
    pub fn validate(&self) -> Result<()> {
        if self.buffer_size < MAX_EVENT_LEN {
            return Err(WatcherError::Config(format!(
                "buffer_size {} is smaller than one maximal event ({MAX_EVENT_LEN} bytes)",
                self.buffer_size
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(WatcherError::Config(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Turn the configured roots into existing, canonical, distinct
    /// directories.
    ///
    /// An empty root means the current directory and a leading `~` is
    /// replaced by `$HOME`. Symlinked roots resolve to their target, so two
    /// aliases of one directory collapse into a single root.
    pub fn resolve_roots(&self) -> Result<Vec<PathBuf>> {
        if self.roots.is_empty() {
            return Err(WatcherError::Config("no roots to watch".to_string()));
        }

        let mut seen = HashSet::new();
        let mut resolved = Vec::with_capacity(self.roots.len());
        for root in &self.roots {
            let root = if root.as_os_str().is_empty() {
                Path::new(".")
            } else {
                root.as_path()
            };
            let expanded = expand_home(root)?;
            let absolute = std::path::absolute(&expanded)?;

            if !absolute.exists() {
                return Err(WatcherError::RootNotFound(absolute.display().to_string()));
            }
            if !absolute.is_dir() {
                return Err(WatcherError::Config(format!(
                    "root is not a directory: {}",
                    absolute.display()
                )));
            }
            let canonical = std::fs::canonicalize(&absolute)?;
            if seen.insert(canonical.clone()) {
                resolved.push(canonical);
            }
        }

        Ok(resolved)
    }
}

/// Expand a leading `~` component using the `HOME` environment variable.
pub fn expand_home(path: &Path) -> Result<PathBuf> {
    expand_home_with(path, std::env::var_os("HOME"))
}

fn expand_home_with(path: &Path, home: Option<OsString>) -> Result<PathBuf> {
    let mut components = path.components();
    match components.next() {
        Some(Component::Normal(first)) if first == "~" => {
            let home = home
                .filter(|home| !home.is_empty())
                .ok_or_else(|| WatcherError::Config("HOME environment variable not set".to_string()))?;
            let rest = components.as_path();
            if rest.as_os_str().is_empty() {
                Ok(PathBuf::from(home))
            } else {
                Ok(PathBuf::from(home).join(rest))
            }
        }
        _ => Ok(path.to_path_buf()),
    }
}
