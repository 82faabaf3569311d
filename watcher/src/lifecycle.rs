//! Engine lifecycle: states, stop requests and run statistics.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Lifecycle state of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    /// Constructed, not started yet.
    Idle,

    /// Roots are watched and batches are being processed.
    Running,

    /// Stop was observed; watches are being released.
    Stopping,

    /// Every watch released and the channel closed.
    Stopped,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Cloneable handle for requesting shutdown and observing the state.
///
/// Safe to use from callbacks, signal handlers and other tasks. A stop
/// request takes effect the next time the engine waits for data; a batch
/// already being processed always completes.
#[derive(Debug, Clone)]
pub struct StopHandle {
    cancel: CancellationToken,
    state: watch::Receiver<EngineState>,
    stats: watch::Receiver<RunStats>,
}

impl StopHandle {
    /// Request shutdown.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Whether shutdown was requested.
    pub fn is_stop_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Current engine state.
    pub fn state(&self) -> EngineState {
        *self.state.borrow()
    }

    /// Counters as of the last completed batch (or scan pass).
    pub fn stats(&self) -> RunStats {
        *self.stats.borrow()
    }

    /// Wait until the engine reached `state` or a later one.
    ///
    /// Returns the state actually observed, which is `Stopped` if the engine
    /// was dropped before getting there.
    pub async fn wait_for_state(&self, state: EngineState) -> EngineState {
        let mut rx = self.state.clone();
        match rx.wait_for(|current| *current >= state).await {
            Ok(current) => *current,
            Err(_) => EngineState::Stopped,
        }
    }
}

/// Counters collected over one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    /// Batches (or scan passes) processed.
    pub batches: u64,

    /// Change records seen.
    pub records: u64,

    /// Events handed to the dispatcher.
    pub dispatched: u64,

    /// Records dropped because their watch was already gone.
    pub dropped: u64,

    /// Watches installed, roots included.
    pub watches_added: u64,

    /// Watches released by the engine.
    pub watches_released: u64,

    /// Watches currently held, roots included.
    pub live_watches: u64,
}

/// Owner side of the lifecycle shared with every `StopHandle`.
#[derive(Debug)]
pub(crate) struct Lifecycle {
    cancel: CancellationToken,
    state: watch::Sender<EngineState>,
    stats: watch::Sender<RunStats>,
}

impl Lifecycle {
    pub fn new() -> Self {
        let (state, _) = watch::channel(EngineState::Idle);
        let (stats, _) = watch::channel(RunStats::default());
        Self {
            cancel: CancellationToken::new(),
            state,
            stats,
        }
    }

    pub fn handle(&self) -> StopHandle {
        StopHandle {
            cancel: self.cancel.clone(),
            state: self.state.subscribe(),
            stats: self.stats.subscribe(),
        }
    }

    pub fn publish(&self, stats: RunStats) {
        self.stats.send_replace(stats);
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn state(&self) -> EngineState {
        *self.state.borrow()
    }

    pub fn transition(&self, next: EngineState) {
        let previous = self.state.send_replace(next);
        info!("engine state {previous} -> {next}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stop_handle_observes_transitions() {
        let lifecycle = Lifecycle::new();
        let handle = lifecycle.handle();
        assert_eq!(handle.state(), EngineState::Idle);
        assert!(!handle.is_stop_requested());

        handle.clone().stop();
        assert!(lifecycle.token().is_cancelled());

        lifecycle.transition(EngineState::Running);
        lifecycle.transition(EngineState::Stopped);
        assert_eq!(
            handle.wait_for_state(EngineState::Stopping).await,
            EngineState::Stopped
        );
    }

    #[test]
    fn test_published_stats_reach_handles() {
        let lifecycle = Lifecycle::new();
        let handle = lifecycle.handle();
        assert_eq!(handle.stats(), RunStats::default());

        let stats = RunStats {
            batches: 2,
            live_watches: 3,
            ..RunStats::default()
        };
        lifecycle.publish(stats);
        assert_eq!(handle.stats(), stats);
    }

    #[tokio::test]
    async fn test_wait_for_state_when_engine_dropped() {
        let lifecycle = Lifecycle::new();
        let handle = lifecycle.handle();
        drop(lifecycle);
        assert_eq!(
            handle.wait_for_state(EngineState::Running).await,
            EngineState::Stopped
        );
    }
}
