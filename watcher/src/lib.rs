//! # fswatch watcher
//!
//! Recursive change notification for one or more directory trees, built
//! directly on Linux inotify.
//!
//! inotify watches are per directory and report changes only as
//! `(watch handle, entry name)`. This crate keeps a live topology of watched
//! directories so every notification can be turned into an absolute path,
//! installs watches on directories as they appear and releases them as they
//! disappear.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Engine loop                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  NotificationSource ──► decoder ──► classify ──► Dispatcher     │
//! │         ▲                              │                        │
//! │         └──────── maintain ◄── WatchTopology                    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! [`PollingScanner`] offers the same event contract by periodically
//! diffing a modification-time snapshot instead.
//!
//! ## Example
//!
//! ```no_run
//! use fswatch_watcher::{Engine, EventType, WatchConfig};
//!
//! # async fn example() -> fswatch_watcher::Result<()> {
//! let mut engine = Engine::new(WatchConfig::new(["~/notes"]))?;
//! engine.on(EventType::FileModified, |event| {
//!     println!("modified: {}", event.path.display());
//! });
//!
//! let stop = engine.stop_handle();
//! tokio::spawn(async move {
//!     let _ = tokio::signal::ctrl_c().await;
//!     stop.stop();
//! });
//! engine.start().await?;
//! # Ok(())
//! # }
//! ```

pub mod classify;
pub mod config;
pub mod decoder;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod event;
pub mod inotify;
pub mod lifecycle;
pub mod maintain;
pub mod poll;
pub mod source;
pub mod topology;

pub use config::WatchConfig;
pub use dispatch::{Callback, Dispatcher};
pub use engine::Engine;
pub use error::{Result, WatcherError};
pub use event::{ChangeKind, ChangeRecord, ClassifiedEvent, EventType};
pub use inotify::InotifySource;
pub use lifecycle::{EngineState, RunStats, StopHandle};
pub use poll::PollingScanner;
pub use source::NotificationSource;
pub use topology::{Parent, WatchHandle, WatchTopology};
