//! The recursive change-notification engine.
//!
//! One loop owns the notification channel and the topology. It waits for a
//! batch, then decodes it and for every record in order:
//!
//! 1. resolves the record's path against the topology as it currently is,
//! 2. installs or releases watches for created or deleted directories,
//! 3. hands the classified event to the dispatcher.
//!
//! Stop requests are only observed while waiting for the next batch.

use std::io;
use std::path::PathBuf;

use tracing::{debug, error, info};

use crate::classify;
use crate::config::WatchConfig;
use crate::decoder::{Notification, decode_batch};
use crate::dispatch::Dispatcher;
use crate::error::{Result, WatcherError};
use crate::event::{ChangeRecord, ClassifiedEvent, EventType};
use crate::inotify::InotifySource;
use crate::lifecycle::{EngineState, Lifecycle, RunStats, StopHandle};
use crate::maintain::{self, Maintenance};
use crate::source::NotificationSource;
use crate::topology::{Parent, WatchHandle, WatchTopology};

type Opener<S> = Box<dyn FnOnce() -> io::Result<S> + Send>;

/// Recursive watcher over one or more root directories.
pub struct Engine<S = InotifySource> {
    /// Absolute, existing root directories.
    roots: Vec<PathBuf>,

    /// Bytes read per batch.
    buffer_size: usize,

    /// Opens the notification channel on start.
    opener: Option<Opener<S>>,

    /// Live watches.
    topology: WatchTopology,

    /// Registered callbacks.
    dispatcher: Dispatcher,

    /// State and stop requests.
    lifecycle: Lifecycle,

    /// Counters for the current run.
    stats: RunStats,
}

impl Engine<InotifySource> {
    /// Create an engine backed by inotify.
    ///
    /// Roots are resolved and checked here; the inotify instance itself is
    /// only created by [`Engine::start`].
    pub fn new(config: WatchConfig) -> Result<Self> {
        Self::with_opener(config, InotifySource::open)
    }
}

impl<S> Engine<S>
where
    S: NotificationSource + 'static,
{
    /// Create an engine reading from an already opened source.
    pub fn with_source(config: WatchConfig, source: S) -> Result<Self> {
        Self::with_opener(config, move || Ok(source))
    }

    fn with_opener<F>(config: WatchConfig, opener: F) -> Result<Self>
    where
        F: FnOnce() -> io::Result<S> + Send + 'static,
    {
        config.validate()?;
        let roots = config.resolve_roots()?;

        Ok(Self {
            roots,
            buffer_size: config.buffer_size,
            opener: Some(Box::new(opener)),
            topology: WatchTopology::new(),
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

    /// A handle for stopping the engine from any task or callback.
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

    /// The resolved roots.
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Live watch topology.
    pub fn topology(&self) -> &WatchTopology {
        &self.topology
    }

    /// Counters of the current (or last) run.
    pub fn stats(&self) -> RunStats {
        self.stats
    }

    /// Watch the roots and process batches until stopped.
    ///
    /// Fatal errors end the run and are returned after every watch has been
    /// released and the channel closed.
    pub async fn start(&mut self) -> Result<RunStats> {
        if self.lifecycle.state() != EngineState::Idle {
            return Err(WatcherError::AlreadyStarted);
        }
        let opener = self.opener.take().ok_or(WatcherError::AlreadyStarted)?;
        let mut source = match opener() {
            Ok(source) => source,
            Err(e) => {
                self.lifecycle.transition(EngineState::Stopped);
                error!("failed to open notification channel: {e}");
                return Err(WatcherError::Init(e));
            }
        };

        // Running is published only once every root is watched.
        let outcome = match self.watch_roots(&mut source) {
            Ok(()) => {
                self.publish_stats();
                self.lifecycle.transition(EngineState::Running);
                self.run_loop(&mut source).await
            }
            Err(e) => Err(e),
        };

        self.lifecycle.transition(EngineState::Stopping);
        self.stats.watches_released += maintain::release_all(&mut self.topology, &mut source);
        drop(source);
        self.publish_stats();
        self.lifecycle.transition(EngineState::Stopped);

        match outcome {
            Ok(()) => {
                info!(
                    "engine stopped: {} batches, {} records, {} dispatched, {} dropped",
                    self.stats.batches, self.stats.records, self.stats.dispatched, self.stats.dropped
                );
                Ok(self.stats)
            }
            Err(e) => {
                error!("engine terminated: {e}");
                Err(e)
            }
        }
    }

    /// Run [`Engine::start`] on a fresh single-threaded runtime, blocking the
    /// calling thread until the engine stops.
    pub fn start_blocking(&mut self) -> Result<RunStats> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        runtime.block_on(self.start())
    }

    fn watch_roots(&mut self, source: &mut S) -> Result<()> {
        for root in &self.roots {
            let handle = source
                .add_watch(root)
                .map_err(|source| WatcherError::WatchRoot {
                    path: root.clone(),
                    source,
                })?;
            self.topology
                .register(Parent::Root, root.as_os_str(), handle)?;
            self.stats.watches_added += 1;
            info!("watching root {} as {handle}", root.display());
        }
        Ok(())
    }

    async fn run_loop(&mut self, source: &mut S) -> Result<()> {
        let mut buf = vec![0u8; self.buffer_size];
        let cancel = self.lifecycle.token().clone();

        loop {
            let len = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    info!("stop requested");
                    return Ok(());
                }
                read = source.read_batch(&mut buf) => read.map_err(WatcherError::Read)?,
            };
            self.process_batch(source, &buf[..len])?;
        }
    }

    fn process_batch(&mut self, source: &mut S, bytes: &[u8]) -> Result<()> {
        let notifications = decode_batch(bytes)?;
        self.stats.batches += 1;
        debug!(
            "batch of {} bytes with {} notifications",
            bytes.len(),
            notifications.len()
        );

        for notification in notifications {
            match notification {
                Notification::Change(record) => self.process_record(source, &record)?,
                Notification::WatchRemoved(handle) => self.watch_removed(handle)?,
                Notification::Unmounted(handle) => return Err(self.watch_lost(handle)),
                Notification::Overflow => return Err(WatcherError::QueueOverflow),
            }
        }
        debug_assert!(self.topology.is_consistent());
        self.publish_stats();
        Ok(())
    }

    fn publish_stats(&mut self) {
        self.stats.live_watches = self.topology.len() as u64;
        self.lifecycle.publish(self.stats);
    }

    fn process_record(&mut self, source: &mut S, record: &ChangeRecord) -> Result<()> {
        self.stats.records += 1;

        let event = match classify::resolve(&self.topology, record) {
            Ok(event) => event,
            Err(e) if !e.is_fatal() => {
                self.stats.dropped += 1;
                debug!("dropping {:?} of {:?}: {e}", record.kind, record.name);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        match maintain::apply(&mut self.topology, source, record, &event.path)? {
            Maintenance::Installed(_) => self.stats.watches_added += 1,
            Maintenance::Replaced { released, .. } => {
                self.stats.watches_added += 1;
                self.stats.watches_released += released;
            }
            Maintenance::Released(_) => self.stats.watches_released += 1,
            Maintenance::Unchanged
            | Maintenance::InstallSkipped
            | Maintenance::Rehomed(_)
            | Maintenance::AlreadyGone => {}
        }

        if self.dispatcher.dispatch(&event) {
            self.stats.dispatched += 1;
        }
        Ok(())
    }

    fn watch_removed(&mut self, handle: WatchHandle) -> Result<()> {
        if !self.topology.contains(handle) {
            // Echo of a watch this engine released itself.
            return Ok(());
        }
        if self.topology.is_root(handle) {
            return Err(self.watch_lost(handle));
        }
        debug!("kernel dropped watch {handle}, awaiting parent delete");
        self.topology.mark_kernel_released(handle)
    }

    fn watch_lost(&self, handle: WatchHandle) -> WatcherError {
        WatcherError::WatchLost {
            handle,
            path: self.topology.resolve_path(handle).unwrap_or_default(),
        }
    }
}
