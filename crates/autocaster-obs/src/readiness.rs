//! Scene-graph readiness gate.
//!
//! OBS tears down and rebuilds the whole scene graph when the current scene
//! collection changes. Reads issued in that window either fail with status
//! 207 or observe a half-built graph. [`Readiness`] tracks whether the graph
//! is stable and lets any number of tasks wait for it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, timeout};
use tracing::{debug, trace};

use crate::error::{ObsError, ObsResult};

/// Default bound on readiness waits.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_millis(7000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ReadyState {
    ready: bool,
    /// Bumped every time readiness is lost
    epoch: u64,
}

/// Shared readiness flag with async waiters.
#[derive(Debug, Clone)]
pub struct Readiness {
    tx: Arc<watch::Sender<ReadyState>>,
}

impl Default for Readiness {
    fn default() -> Self {
        Self::new()
    }
}

impl Readiness {
    /// Create a gate that starts not ready.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ReadyState { ready: false, epoch: 0 });
        Self { tx: Arc::new(tx) }
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.tx.borrow().ready
    }

    /// Mark the scene graph stable and release every waiter.
    pub fn mark_ready(&self) {
        let changed = self.tx.send_if_modified(|state| {
            if state.ready {
                false
            } else {
                state.ready = true;
                true
            }
        });
        if changed {
            debug!("Scene graph ready");
        }
    }

    /// Mark the scene graph unstable.
    pub fn mark_not_ready(&self) {
        let changed = self.tx.send_if_modified(|state| {
            if state.ready {
                state.ready = false;
                state.epoch += 1;
                true
            } else {
                false
            }
        });
        if changed {
            debug!("Scene graph not ready");
        }
    }

    /// Reset for a new session: not ready, and any read in flight is stale.
    pub fn reset(&self) {
        self.tx.send_modify(|state| {
            state.ready = false;
            state.epoch += 1;
        });
    }

    /// Wait until the scene graph is ready.
    ///
    /// Suspends only the calling task. Each waiter times out independently.
    ///
    /// # Errors
    /// Returns [`ObsError::NotReady`] if readiness is not reached in time.
    pub async fn wait_until_ready(&self, limit: Duration) -> ObsResult<()> {
        let mut rx = self.tx.subscribe();
        match timeout(limit, rx.wait_for(|state| state.ready)).await {
            Ok(Ok(_)) => Ok(()),
            // The sender lives as long as self, so a closed channel means teardown
            Ok(Err(_)) => Err(ObsError::NotConnected),
            Err(_) => Err(ObsError::NotReady { waited: limit }),
        }
    }

    /// Run a scene-graph read once the graph is ready.
    ///
    /// If readiness is lost while `read` is in flight its result is discarded
    /// and the read runs again against the rebuilt graph, within the same
    /// overall deadline.
    ///
    /// # Errors
    /// Returns [`ObsError::NotReady`] when the deadline passes, or the error
    /// of a read that completed against a stable graph.
    pub async fn read_scene_graph<T, F, Fut>(&self, limit: Duration, mut read: F) -> ObsResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ObsResult<T>>,
    {
        let deadline = Instant::now() + limit;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            self.wait_until_ready(remaining).await.map_err(|e| match e {
                ObsError::NotReady { .. } => ObsError::NotReady { waited: limit },
                other => other,
            })?;

            let started = *self.tx.borrow();
            let result = read().await;
            let finished = *self.tx.borrow();

            if finished.ready && finished.epoch == started.epoch {
                return result;
            }
            trace!("Scene graph changed during read; retrying");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out_when_never_ready() {
        let gate = Readiness::new();
        let started = Instant::now();
        let err = gate.wait_until_ready(DEFAULT_READY_TIMEOUT).await.unwrap_err();
        assert_matches!(err, ObsError::NotReady { waited } if waited == DEFAULT_READY_TIMEOUT);
        assert!(started.elapsed() >= DEFAULT_READY_TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_waiters_released_together() {
        let gate = Readiness::new();
        let mut waiters = Vec::new();
        for _ in 0..8 {
            let gate = gate.clone();
            waiters.push(tokio::spawn(async move { gate.wait_until_ready(Duration::from_secs(5)).await }));
        }

        tokio::time::sleep(Duration::from_millis(300)).await;
        gate.mark_ready();

        for waiter in waiters {
            assert!(waiter.await.unwrap().is_ok());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiters_time_out_independently() {
        let gate = Readiness::new();
        let short = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait_until_ready(Duration::from_millis(100)).await })
        };
        let long = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait_until_ready(Duration::from_secs(2)).await })
        };

        tokio::time::sleep(Duration::from_millis(500)).await;
        gate.mark_ready();

        assert_matches!(short.await.unwrap(), Err(ObsError::NotReady { .. }));
        assert!(long.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_ready_gate_passes_immediately() {
        let gate = Readiness::new();
        gate.mark_ready();
        assert!(gate.wait_until_ready(Duration::ZERO).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_never_runs_while_not_ready() {
        let gate = Readiness::new();
        let runs = AtomicUsize::new(0);

        let result = gate
            .read_scene_graph(Duration::from_secs(1), || async {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert_matches!(result, Err(ObsError::NotReady { .. }));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_discarded_when_readiness_drops_mid_flight() {
        let gate = Readiness::new();
        gate.mark_ready();
        let runs = AtomicUsize::new(0);

        let result = gate
            .read_scene_graph(Duration::from_secs(5), || {
                let attempt = runs.fetch_add(1, Ordering::SeqCst);
                let gate = gate.clone();
                async move {
                    if attempt == 0 {
                        // A collection switch starts and finishes while the read runs
                        gate.mark_not_ready();
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        gate.mark_ready();
                        Ok("stale")
                    } else {
                        Ok("fresh")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "fresh");
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_reset_clears_readiness() {
        let gate = Readiness::new();
        gate.mark_ready();
        assert!(gate.is_ready());
        gate.reset();
        assert!(!gate.is_ready());
    }
}
