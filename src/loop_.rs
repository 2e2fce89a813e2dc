//! The adaptive connection loop (spec §4.4). One instance drives push,
//! another drives pull; each runs one PENDING -> DEBOUNCE -> ADMIT -> PACE
//! -> DISPATCH cycle per call to [`ConnectionLoop::tick`]. Admission
//! control is structural here: a loop's driving task only ever has one
//! dispatch in flight, so "max concurrent sends" only shows up as the
//! divisor in the pacing calculation below, not as a semaphore.
//!
//! Module named `loop_` because `loop` is a keyword.

use crate::error::CResult;
use std::collections::VecDeque;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex as AsyncMutex, Notify};

const WINDOW: usize = 9;
const INITIAL_DELAY_MS: u64 = 30;
const MAX_DELAY_MS: u64 = 60_000;

struct LoopState {
    delay_ms: u64,
    outcomes: VecDeque<bool>,
    ok_durations_ms: VecDeque<u64>,
    last_ok: bool,
}

pub struct ConnectionLoop {
    max_connections: usize,
    state: AsyncMutex<LoopState>,
    notify: Notify,
}

impl ConnectionLoop {
    pub fn new(max_connections: usize) -> Self {
        ConnectionLoop {
            max_connections: max_connections.max(1),
            state: AsyncMutex::new(LoopState {
                delay_ms: INITIAL_DELAY_MS,
                outcomes: VecDeque::with_capacity(WINDOW),
                ok_durations_ms: VecDeque::with_capacity(WINDOW),
                last_ok: true,
            }),
            notify: Notify::new(),
        }
    }

    /// Wakes an in-progress DEBOUNCE wait early -- called when a new
    /// mutation is queued so it doesn't wait out a debounce window that
    /// started before it existed.
    pub fn wake(&self) {
        self.notify.notify_one();
    }

    pub async fn current_delay_ms(&self) -> u64 {
        self.state.lock().await.delay_ms
    }

    /// Runs one full cycle: debounces, paces by the current adaptive
    /// delay, dispatches, then folds the outcome into the delay for the
    /// next cycle.
    pub async fn tick<F, Fut>(&self, debounce_ms: u64, dispatch: F) -> CResult<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CResult<()>>,
    {
        // DEBOUNCE: a wakeup during the window restarts it once, coalescing
        // a burst of closely-spaced mutations into a single dispatch.
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(debounce_ms)) => {}
            _ = self.notify.notified() => {
                tokio::time::sleep(Duration::from_millis(debounce_ms)).await;
            }
        }

        // ADMIT + PACE: the caller only drives one tick at a time per
        // direction, so admission is automatic. Pacing only applies once
        // there's history to pace against -- an isolated send against a
        // clean history (nothing dispatched yet, last attempt didn't fail)
        // goes immediately.
        let (pace_ms, should_pace) = {
            let state = self.state.lock().await;
            (state.delay_ms, !state.outcomes.is_empty() || !state.last_ok)
        };
        if should_pace {
            tokio::time::sleep(Duration::from_millis(pace_ms)).await;
        }

        // DISPATCH.
        let start = Instant::now();
        let result = dispatch().await;
        let elapsed_ms = start.elapsed().as_millis() as u64;
        self.record(result.is_ok(), elapsed_ms).await;
        result
    }

    async fn record(&self, ok: bool, elapsed_ms: u64) {
        let mut state = self.state.lock().await;
        if state.outcomes.len() == WINDOW {
            state.outcomes.pop_front();
        }
        state.outcomes.push_back(ok);

        if ok {
            if state.ok_durations_ms.len() == WINDOW {
                state.ok_durations_ms.pop_front();
            }
            state.ok_durations_ms.push_back(elapsed_ms);
        }

        state.delay_ms = if ok && !state.last_ok {
            // Recovery: reset to the floor rather than easing down gradually.
            INITIAL_DELAY_MS
        } else if !ok {
            state.delay_ms.saturating_mul(2).min(MAX_DELAY_MS)
        } else {
            (median(&state.ok_durations_ms) / self.max_connections as u64).max(1)
        };
        state.last_ok = ok;
    }
}

fn median(values: &VecDeque<u64>) -> u64 {
    if values.is_empty() {
        return INITIAL_DELAY_MS;
    }
    let mut sorted: Vec<u64> = values.iter().copied().collect();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2
    } else {
        sorted[mid]
    }
}
