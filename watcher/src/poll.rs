//! Polling scanner: the brute-force alternative to the inotify engine.
//!
//! Keeps a modification-time snapshot of every entry below the roots and
//! diffs it against a fresh walk on a fixed period. Reports the same event
//! types through the same dispatcher as [`crate::engine::Engine`], with
//! timeliness bounded by the period and no watch topology to maintain.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, info};
use walkdir::WalkDir;

use crate::config::WatchConfig;
use crate::dispatch::Dispatcher;
use crate::error::{Result, WatcherError};
use crate::event::{ClassifiedEvent, EventType};
use crate::lifecycle::{EngineState, Lifecycle, RunStats, StopHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EntryState {
    modified: Option<SystemTime>,
    is_directory: bool,
}

/// Periodic snapshot-diffing watcher.
pub struct PollingScanner {
    /// Absolute, existing root directories.
    roots: Vec<PathBuf>,

    /// Time between scans.
    interval: Duration,

    /// Last seen state of every entry below the roots.
    snapshot: HashMap<PathBuf, EntryState>,

    /// Registered callbacks.
    dispatcher: Dispatcher,

    /// State and stop requests.
    lifecycle: Lifecycle,

    /// Counters for the current run.
    stats: RunStats,
}

impl PollingScanner {
    /// Create a scanner and take the initial snapshot.
    pub fn new(config: WatchConfig) -> Result<Self> {
        config.validate()?;
        let roots = config.resolve_roots()?;
        let snapshot: HashMap<_, _> = walk(&roots).into_iter().collect();
        debug!("initial snapshot of {} entries", snapshot.len());

        Ok(Self {
            roots,
            interval: config.poll_interval(),
            snapshot,
            dispatcher: Dispatcher::new(),
            lifecycle: Lifecycle::new(),
            stats: RunStats::default(),
        })
    }

    /// Register `callback` for `event_type`, replacing any previous one.
    pub fn on<F>(&mut self, event_type: EventType, callback: F)
    where
        F: FnMut(&ClassifiedEvent) + Send + 'static,
    {
        self.dispatcher.on(event_type, callback);
    }

    /// Register a copy of `callback` for each of `event_types`.
    pub fn on_many<F>(&mut self, event_types: &[EventType], callback: F)
    where
        F: FnMut(&ClassifiedEvent) + Clone + Send + 'static,
    {
        self.dispatcher.on_many(event_types, callback);
    }

    /// The dispatcher, for finer-grained callback management.
    pub fn dispatcher_mut(&mut self) -> &mut Dispatcher {
        &mut self.dispatcher
    }

    /// A handle for stopping the scanner from any task or callback.
    pub fn stop_handle(&self) -> StopHandle {
        self.lifecycle.handle()
    }

    /// Request shutdown.
    pub fn stop(&self) {
        self.lifecycle.token().cancel();
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EngineState {
        self.lifecycle.state()
    }

    /// Counters of the current (or last) run.
    pub fn stats(&self) -> RunStats {
        self.stats
    }

    /// Number of entries in the snapshot.
    pub fn tracked(&self) -> usize {
        self.snapshot.len()
    }

    /// Diff the snapshot against the filesystem once and update it.
    ///
    /// Deletions come first, sorted by path, followed by creations and
    /// modifications in walk order.
    pub fn scan(&mut self) -> Vec<ClassifiedEvent> {
        let current = walk(&self.roots);
        let seen: HashSet<&Path> = current.iter().map(|(path, _)| path.as_path()).collect();

        let mut deleted: Vec<(PathBuf, EntryState)> = self
            .snapshot
            .iter()
            .filter(|(path, _)| !seen.contains(path.as_path()))
            .map(|(path, state)| (path.clone(), *state))
            .collect();
        deleted.sort_by(|a, b| a.0.cmp(&b.0));

        let mut events = Vec::new();
        for (path, state) in deleted {
            self.snapshot.remove(&path);
            let event_type = if state.is_directory {
                EventType::DirDeleted
            } else {
                EventType::FileDeleted
            };
            events.push(ClassifiedEvent::new(event_type, path));
        }

        for (path, state) in current {
            let event_type = match self.snapshot.insert(path.clone(), state) {
                None if state.is_directory => EventType::DirCreated,
                None => EventType::FileCreated,
                Some(previous) if previous.modified != state.modified => {
                    if state.is_directory {
                        EventType::DirModified
                    } else {
                        EventType::FileModified
                    }
                }
                Some(_) => continue,
            };
            events.push(ClassifiedEvent::new(event_type, path));
        }

        events
    }

    /// Run one scan and dispatch its events, returning how many ran a
    /// callback.
    pub fn poll(&mut self) -> usize {
        let events = self.scan();
        self.stats.batches += 1;
        self.stats.records += events.len() as u64;

        let mut dispatched = 0;
        for event in &events {
            if self.dispatcher.dispatch(event) {
                dispatched += 1;
            }
        }
        self.stats.dispatched += dispatched as u64;
        self.lifecycle.publish(self.stats);
        dispatched
    }

    /// Scan every interval until stopped.
    pub async fn start(&mut self) -> Result<RunStats> {
        if self.lifecycle.state() != EngineState::Idle {
            return Err(WatcherError::AlreadyStarted);
        }
        self.lifecycle.transition(EngineState::Running);
        info!(
            "polling {} roots every {:?}",
            self.roots.len(),
            self.interval
        );

        let cancel = self.lifecycle.token().clone();
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.interval) => {}
            }
            let dispatched = self.poll();
            if dispatched > 0 {
                debug!("scan dispatched {dispatched} events");
            }
        }

        self.lifecycle.transition(EngineState::Stopping);
        self.snapshot.clear();
        self.lifecycle.transition(EngineState::Stopped);
        info!(
            "scanner stopped: {} scans, {} dispatched",
            self.stats.batches, self.stats.dispatched
        );
        Ok(self.stats)
    }
}

/// Walk every root, skipping the roots themselves and unreadable entries.
fn walk(roots: &[PathBuf]) -> Vec<(PathBuf, EntryState)> {
    let mut entries = Vec::new();
    for root in roots {
        let walker = WalkDir::new(root)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name();

        for entry in walker.into_iter().filter_map(|e| e.ok()) {
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            entries.push((
                entry.into_path(),
                EntryState {
                    modified: metadata.modified().ok(),
                    is_directory: metadata.is_dir(),
                },
            ));
        }
    }
    entries
}
