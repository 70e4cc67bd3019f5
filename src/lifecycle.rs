use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::info;

/// Externally visible phase of a manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Open,
    Stopping,
    Closed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LifecycleState::Open => "open",
            LifecycleState::Stopping => "stopping",
            LifecycleState::Closed => "closed",
        })
    }
}

/// Result of a successful `close` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseStatus {
    /// All admitted operations finished; the caller owns teardown.
    Drained,
    AlreadyClosed,
}

/// Shutdown ordering failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LifecycleError {
    #[error("must stop the metadata manager before closing it")]
    NotStopped,
    #[error("gave up waiting for {pending} pending operations to finish")]
    DrainTimeout { pending: u64 },
}

#[derive(Debug)]
struct GateState {
    stopped: bool,
    closed: bool,
    /// Starts at 1: the unit held by the open manager itself, released by `stop`.
    pending: u64,
}

/// Admission gate shared by every mutating operation of a manager.
#[derive(Debug)]
pub struct OperationGate {
    state: Mutex<GateState>,
    drained: Condvar,
}

impl Default for OperationGate {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationGate {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GateState {
                stopped: false,
                closed: false,
                pending: 1,
            }),
            drained: Condvar::new(),
        }
    }

    /// Admits an operation unless the gate is stopped or drained.
    pub fn try_begin(&self) -> Option<OperationPermit<'_>> {
        let mut state = self.state.lock();
        if state.stopped || state.pending == 0 {
            return None;
        }
        state.pending += 1;
        Some(OperationPermit { gate: self })
    }

    /// Stops admission. Returns the operations still in flight, or `None` if already stopped.
    pub fn stop(&self) -> Option<u64> {
        let mut state = self.state.lock();
        if state.stopped {
            return None;
        }
        state.stopped = true;
        state.pending -= 1;
        if state.pending == 0 {
            self.drained.notify_all();
        }
        Some(state.pending)
    }

    /// Waits for every admitted operation to finish.
    ///
    /// The gate is marked closed before waiting so concurrent callers return
    /// `AlreadyClosed`. When `timeout` elapses first the closed mark is withdrawn and the call
    /// can be retried.
    pub fn close(&self, timeout: Option<Duration>) -> Result<CloseStatus, LifecycleError> {
        let mut state = self.state.lock();
        if !state.stopped {
            return Err(LifecycleError::NotStopped);
        }
        if state.closed {
            return Ok(CloseStatus::AlreadyClosed);
        }
        state.closed = true;
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        while state.pending != 0 {
            info!(pending = state.pending, "waiting for pending operations to finish");
            match deadline {
                None => self.drained.wait(&mut state),
                Some(deadline) => {
                    if self.drained.wait_until(&mut state, deadline).timed_out()
                        && state.pending != 0
                    {
                        state.closed = false;
                        return Err(LifecycleError::DrainTimeout {
                            pending: state.pending,
                        });
                    }
                }
            }
        }
        Ok(CloseStatus::Drained)
    }

    /// Withdraws the closed mark of a drained gate so `close` can run again.
    pub fn reopen_close(&self) {
        let mut state = self.state.lock();
        if state.pending == 0 {
            state.closed = false;
        }
    }

    pub fn state(&self) -> LifecycleState {
        let state = self.state.lock();
        match (state.stopped, state.closed) {
            (false, _) => LifecycleState::Open,
            (true, false) => LifecycleState::Stopping,
            (true, true) => LifecycleState::Closed,
        }
    }

    /// Admitted operations plus the open unit while not stopped.
    pub fn pending_operations(&self) -> u64 {
        self.state.lock().pending
    }

    fn finish(&self) {
        let mut state = self.state.lock();
        state.pending -= 1;
        if state.pending == 0 {
            self.drained.notify_all();
        }
    }
}

/// Proof of admission; releases its slot when dropped, including during unwinding.
#[derive(Debug)]
#[must_use = "dropping the permit ends the operation"]
pub struct OperationPermit<'a> {
    gate: &'a OperationGate,
}

impl Drop for OperationPermit<'_> {
    fn drop(&mut self) {
        self.gate.finish();
    }
}
