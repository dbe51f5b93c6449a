use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::consts::DEFAULT_TRACKER_STALE_AFTER;

struct Entry {
    done: watch::Sender<bool>,
    started: Instant,
    generation: u64,
}

struct TrackerState {
    entries: HashMap<u64, Entry>,
    next_generation: u64,
    last_sweep: Instant,
}

/// Waitable signal handed out for a height that is being backfilled.
pub struct CompletionSignal(watch::Receiver<bool>);

impl CompletionSignal {
    /// Resolves once the height is completed (or its entry is dropped).
    pub async fn wait(mut self) {
        let _ = self.0.wait_for(|done| *done).await;
    }

    pub fn is_complete(&self) -> bool {
        *self.0.borrow() || self.0.has_changed().is_err()
    }
}

/// Single-flight registry of source heights with a backfill in progress.
pub struct RequestTracker {
    state: Mutex<TrackerState>,
    stale_after: Duration,
}

impl Default for RequestTracker {
    fn default() -> Self {
        Self::new(DEFAULT_TRACKER_STALE_AFTER)
    }
}

impl RequestTracker {
    pub fn new(stale_after: Duration) -> Self {
        Self {
            state: Mutex::new(TrackerState {
                entries: HashMap::new(),
                next_generation: 0,
                last_sweep: Instant::now(),
            }),
            stale_after,
        }
    }

    fn state(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(&self, st: &mut TrackerState, height: u64) -> u64 {
        let generation = st.next_generation;
        st.next_generation += 1;
        let (done, _) = watch::channel(false);
        st.entries.insert(height, Entry { done, started: Instant::now(), generation });
        generation
    }

    /// Register `height` as in flight with a fresh signal. A prior entry is
    /// replaced; its waiters are released.
    pub fn mark_processing(&self, height: u64) {
        let mut st = self.state();
        self.insert(&mut st, height);
    }

    /// Completion signal for `height` if a backfill is in flight.
    pub fn is_processing(&self, height: u64) -> Option<CompletionSignal> {
        self.state().entries.get(&height).map(|e| CompletionSignal(e.done.subscribe()))
    }

    /// Clear `height` and wake every waiter. No-op for unknown heights.
    pub fn complete_processing(&self, height: u64) {
        let mut st = self.state();
        if let Some(entry) = st.entries.remove(&height) {
            entry.done.send_replace(true);
        }
        self.maybe_sweep(&mut st);
    }

    /// Atomic check-and-mark: `None` if another caller already owns `height`.
    /// The returned ticket completes the height when dropped.
    pub fn try_begin_processing(self: &Arc<Self>, height: u64) -> Option<ProcessingTicket> {
        let mut st = self.state();
        self.maybe_sweep(&mut st);
        if st.entries.contains_key(&height) {
            return None;
        }
        let generation = self.insert(&mut st, height);
        drop(st);
        Some(ProcessingTicket { tracker: Arc::clone(self), height, generation })
    }

    fn complete_generation(&self, height: u64, generation: u64) {
        let mut st = self.state();
        if st.entries.get(&height).is_some_and(|e| e.generation == generation) {
            if let Some(entry) = st.entries.remove(&height) {
                entry.done.send_replace(true);
            }
        }
        self.maybe_sweep(&mut st);
    }

    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop entries older than the stale threshold, waking their waiters.
    pub fn sweep_stale(&self) -> usize {
        let mut st = self.state();
        self.sweep_locked(&mut st)
    }

    fn maybe_sweep(&self, st: &mut TrackerState) {
        if st.last_sweep.elapsed() >= self.stale_after {
            self.sweep_locked(st);
        }
    }

    fn sweep_locked(&self, st: &mut TrackerState) -> usize {
        st.last_sweep = Instant::now();
        let stale_after = self.stale_after;
        let before = st.entries.len();
        st.entries.retain(|height, entry| {
            let keep = entry.started.elapsed() < stale_after;
            if !keep {
                warn!(height, age = ?entry.started.elapsed(), "dropping stale backfill entry");
                entry.done.send_replace(true);
            }
            keep
        });
        let swept = before - st.entries.len();
        if swept > 0 {
            debug!(swept, remaining = st.entries.len(), "tracker sweep");
        }
        swept
    }
}

/// Ownership of an in-flight height; completes it on drop.
pub struct ProcessingTicket {
    tracker: Arc<RequestTracker>,
    height: u64,
    generation: u64,
}

impl ProcessingTicket {
    pub fn height(&self) -> u64 {
        self.height
    }
}

impl Drop for ProcessingTicket {
    fn drop(&mut self) {
        self.tracker.complete_generation(self.height, self.generation);
    }
}
