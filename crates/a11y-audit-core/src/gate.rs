use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{sync::Notify, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Admission limits for outbound model calls, shared by every file in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Maximum number of calls in flight at once.
    pub concurrency_cap: usize,
    /// Minimum spacing between two call starts.
    #[serde(with = "crate::durations")]
    pub min_interval: Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            concurrency_cap: 3,
            min_interval: Duration::from_millis(1500),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("rate gate wait cancelled")]
pub struct GateCancelled;

#[derive(Debug, Default)]
struct RateGateState {
    in_flight: usize,
    last_call_started_at: Option<Instant>,
}

/// Point-in-time view of the gate, for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateSnapshot {
    pub in_flight: usize,
    pub last_call_started_at: Option<Instant>,
}

/// Process-wide admission control: bounds concurrent calls and spaces their starts.
///
/// Both conditions are checked under one lock. Admission hands out a
/// [`GatePermit`] whose drop releases the slot, so every exit path of the
/// holder (success, error, cancellation, task abort) gives it back.
#[derive(Debug)]
pub struct RateGate {
    config: GateConfig,
    state: Mutex<RateGateState>,
    wake: Notify,
}

impl RateGate {
    pub fn new(config: GateConfig) -> Self {
        Self {
            config: GateConfig {
                concurrency_cap: config.concurrency_cap.max(1),
                ..config
            },
            state: Mutex::new(RateGateState::default()),
            wake: Notify::new(),
        }
    }

    pub fn config(&self) -> GateConfig {
        self.config
    }

    /// Wait until a slot is free and `min_interval` has passed since the last start.
    pub async fn acquire(
        self: &Arc<Self>,
        cancel: &CancellationToken,
    ) -> Result<GatePermit, GateCancelled> {
        loop {
            if cancel.is_cancelled() {
                return Err(GateCancelled);
            }
            // Register for wakeups before inspecting state so a release in between is not missed.
            let notified = self.wake.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let spacing_wait = {
                let mut state = self.lock_state();
                if state.in_flight >= self.config.concurrency_cap {
                    None
                } else {
                    let now = Instant::now();
                    let remaining = state
                        .last_call_started_at
                        .map(|last| now.saturating_duration_since(last))
                        .filter(|since| *since < self.config.min_interval)
                        .map(|since| self.config.min_interval - since);
                    match remaining {
                        Some(remaining) => Some(remaining),
                        None => {
                            state.in_flight += 1;
                            state.last_call_started_at = Some(now);
                            trace!(in_flight = state.in_flight, "rate gate admitted call");
                            return Ok(GatePermit {
                                gate: Arc::clone(self),
                                started_at: now,
                            });
                        }
                    }
                }
            };

            match spacing_wait {
                Some(delay) => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(GateCancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(GateCancelled),
                        _ = &mut notified => {}
                    }
                }
            }
        }
    }

    /// Return a permit explicitly. Equivalent to dropping it.
    pub fn release(permit: GatePermit) {
        drop(permit);
    }

    pub fn in_flight(&self) -> usize {
        self.lock_state().in_flight
    }

    pub fn snapshot(&self) -> GateSnapshot {
        let state = self.lock_state();
        GateSnapshot {
            in_flight: state.in_flight,
            last_call_started_at: state.last_call_started_at,
        }
    }

    fn release_slot(&self) {
        {
            let mut state = self.lock_state();
            state.in_flight = state.in_flight.saturating_sub(1);
            trace!(in_flight = state.in_flight, "rate gate released call");
        }
        self.wake.notify_one();
    }

    fn lock_state(&self) -> MutexGuard<'_, RateGateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One admitted call slot. Dropping it releases the slot exactly once.
#[derive(Debug)]
pub struct GatePermit {
    gate: Arc<RateGate>,
    started_at: Instant,
}

impl GatePermit {
    /// When the call was admitted.
    pub fn started_at(&self) -> Instant {
        self.started_at
    }
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.gate.release_slot();
    }
}
