//! Liveness gate guarding every public affinity operation.
//!
//! Callers enter the gate for the duration of an operation. Once the owning
//! context stops, new entries fail fast with [`Error::NotActive`] and `stop`
//! waits until every operation already inside has left. Entering is
//! reentrant: a nested call from inside a guarded operation simply holds a
//! second guard.

use corelib::{Error, Result};
use crossbeam::utils::Backoff;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

const CLOSED: usize = 1 << (usize::BITS - 1);

/// Counts callers inside; the top bit marks the gate closed.
#[derive(Debug)]
pub struct LivenessGate {
    state: AtomicUsize,
}

impl LivenessGate {
    /// A gate that admits callers immediately.
    pub fn new() -> Self {
        Self {
            state: AtomicUsize::new(0),
        }
    }

    /// A gate that rejects callers until [`start`](Self::start).
    pub fn stopped() -> Self {
        Self {
            state: AtomicUsize::new(CLOSED),
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.load(Ordering::Acquire) & CLOSED == 0
    }

    /// Number of operations currently inside the gate.
    pub fn active_calls(&self) -> usize {
        self.state.load(Ordering::Acquire) & !CLOSED
    }

    /// Enters the gate.
    ///
    /// # Errors
    ///
    /// [`Error::NotActive`] once the gate is stopped (or before it started).
    pub fn enter(&self) -> Result<GateGuard<'_>> {
        let prev = self.state.fetch_add(1, Ordering::AcqRel);
        if prev & CLOSED != 0 {
            self.state.fetch_sub(1, Ordering::AcqRel);
            return Err(Error::NotActive);
        }
        Ok(GateGuard { gate: self })
    }

    /// Opens the gate. No-op if already open.
    pub fn start(&self) {
        let prev = self.state.fetch_and(!CLOSED, Ordering::AcqRel);
        if prev & CLOSED != 0 {
            info!("affinity gate opened");
        }
    }

    /// Closes the gate and blocks until in-flight operations have left.
    ///
    /// Must not be called from inside a guarded operation: it would wait for
    /// itself.
    pub fn stop(&self) {
        let prev = self.state.fetch_or(CLOSED, Ordering::AcqRel);
        if prev & CLOSED == 0 {
            debug!(in_flight = prev, "closing affinity gate");
        }

        let backoff = Backoff::new();
        while self.active_calls() != 0 {
            if backoff.is_completed() {
                std::thread::yield_now();
            } else {
                backoff.snooze();
            }
        }
        info!("affinity gate closed");
    }
}

impl Default for LivenessGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Proof of being inside a [`LivenessGate`]. Leaves the gate on drop.
#[derive(Debug)]
#[must_use = "the operation is only guarded while the guard is alive"]
pub struct GateGuard<'a> {
    gate: &'a LivenessGate,
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        self.gate.state.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Gate shared by a processor and every facade it hands out.
pub type SharedGate = Arc<LivenessGate>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    #[test]
    fn test_enter_and_leave() {
        let gate = LivenessGate::new();
        {
            let _outer = gate.enter().unwrap();
            let _inner = gate.enter().unwrap();
            assert_eq!(gate.active_calls(), 2);
        }
        assert_eq!(gate.active_calls(), 0);
    }

    #[test]
    fn test_stopped_gate_rejects() {
        let gate = LivenessGate::stopped();
        assert_eq!(gate.enter().unwrap_err(), Error::NotActive);
        assert_eq!(gate.active_calls(), 0);

        gate.start();
        assert!(gate.enter().is_ok());

        gate.stop();
        assert!(!gate.is_active());
        assert_eq!(gate.enter().unwrap_err(), Error::NotActive);
    }

    #[test]
    fn test_stop_waits_for_in_flight_calls() {
        let gate = LivenessGate::new();
        let released = AtomicBool::new(false);

        crossbeam::scope(|s| {
            let guard = gate.enter().unwrap();
            s.spawn(|_| {
                gate.stop();
                assert!(released.load(Ordering::Acquire));
            });
            std::thread::sleep(Duration::from_millis(50));
            released.store(true, Ordering::Release);
            drop(guard);
        })
        .unwrap();

        assert_eq!(gate.active_calls(), 0);
    }
}
