//! Cooperative stop signal for a consumer session

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::watch;
use tokio::time::{Duration, Instant};
use tracing::{debug, info};

/// Stop state shared between a session handle and its run loop
#[derive(Debug)]
pub struct ShutdownState {
    /// Whether shutdown has been initiated
    shutting_down: AtomicBool,
    /// Whether the run loop has exited
    shutdown_complete: AtomicBool,
    /// Records currently inside handlers
    inflight_records: AtomicUsize,
    /// Shutdown initiated timestamp
    shutdown_start: Mutex<Option<Instant>>,
    signal: watch::Sender<bool>,
    completed: watch::Sender<bool>,
}

impl ShutdownState {
    pub fn new() -> Self {
        let (signal, _) = watch::channel(false);
        let (completed, _) = watch::channel(false);
        Self {
            shutting_down: AtomicBool::new(false),
            shutdown_complete: AtomicBool::new(false),
            inflight_records: AtomicUsize::new(0),
            shutdown_start: Mutex::new(None),
            signal,
            completed,
        }
    }

    /// Begin the shutdown process. Returns false if it had already begun.
    pub fn begin_shutdown(&self) -> bool {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return false;
        }
        *self.shutdown_start.lock() = Some(Instant::now());
        self.signal.send_replace(true);
        info!("Shutdown initiated");
        true
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Resolve once shutdown has begun
    pub async fn wait(&self) {
        let mut rx = self.signal.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|stopping| *stopping).await;
    }

    /// Mark the run loop as exited
    pub fn complete_shutdown(&self) {
        if self.shutdown_complete.swap(true, Ordering::SeqCst) {
            return;
        }
        self.completed.send_replace(true);
        if let Some(start) = *self.shutdown_start.lock() {
            info!("Shutdown completed in {:?}", start.elapsed());
        }
    }

    /// Resolve once the run loop has exited
    pub async fn wait_complete(&self) {
        let mut rx = self.completed.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }

    pub fn is_shutdown_complete(&self) -> bool {
        self.shutdown_complete.load(Ordering::SeqCst)
    }

    pub fn add_inflight_record(&self) {
        let count = self.inflight_records.fetch_add(1, Ordering::Relaxed) + 1;
        debug!("In-flight records: {}", count);
    }

    pub fn remove_inflight_record(&self) {
        let _ = self
            .inflight_records
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn inflight_count(&self) -> usize {
        self.inflight_records.load(Ordering::Relaxed)
    }

    /// Time since shutdown began
    pub fn shutdown_duration(&self) -> Option<Duration> {
        self.shutdown_start.lock().map(|start| start.elapsed())
    }
}

impl Default for ShutdownState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_shutdown_state() {
        let state = ShutdownState::new();

        assert!(!state.is_shutting_down());
        assert!(!state.is_shutdown_complete());
        assert!(state.shutdown_duration().is_none());

        assert!(state.begin_shutdown());
        assert!(!state.begin_shutdown());
        assert!(state.is_shutting_down());

        state.add_inflight_record();
        assert_eq!(state.inflight_count(), 1);
        state.remove_inflight_record();
        state.remove_inflight_record();
        assert_eq!(state.inflight_count(), 0);

        state.complete_shutdown();
        assert!(state.is_shutdown_complete());
        tokio::time::timeout(Duration::from_millis(100), state.wait_complete())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_complete_blocks_until_loop_exits() {
        let state = Arc::new(ShutdownState::new());
        state.begin_shutdown();

        let waiter = {
            let state = state.clone();
            tokio::spawn(async move { state.wait_complete().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        state.complete_shutdown();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_wakes_on_shutdown() {
        let state = Arc::new(ShutdownState::new());
        let waiter = {
            let state = state.clone();
            tokio::spawn(async move { state.wait().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        state.begin_shutdown();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();

        // Already stopped: resolves immediately
        tokio::time::timeout(Duration::from_millis(100), state.wait())
            .await
            .unwrap();
    }
}
