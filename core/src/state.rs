use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use tracing::debug;

use crate::error::CacheError;

/// Lifecycle of a continuous view relative to its remote cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ViewState {
    /// No server-side subscriptions are active; local content may be stale.
    Disconnected = 0,
    /// A synchronization is attaching listeners and fetching initial data.
    Configuring = 1,
    /// Listeners are attached and initial data is loaded, but events that
    /// raced the load have not been reconciled yet.
    Configured = 2,
    /// Steady state: events drive the local store directly.
    Synchronized = 3,
}

impl ViewState {
    pub fn code(self) -> u8 { self as u8 }

    pub fn from_code(code: u8) -> Result<Self, CacheError> {
        match code {
            0 => Ok(ViewState::Disconnected),
            1 => Ok(ViewState::Configuring),
            2 => Ok(ViewState::Configured),
            3 => Ok(ViewState::Synchronized),
            other => Err(CacheError::invalid_argument(format!("unknown view state code {}", other))),
        }
    }

    /// The edges a view is allowed to take. A synchronization starts from
    /// Disconnected; any state can fall back to Disconnected. Everything
    /// else is an engine invariant violation.
    fn can_become(self, next: ViewState) -> bool {
        use ViewState::*;
        matches!(
            (self, next),
            (Disconnected, Configuring)
                | (Configuring, Configured)
                | (Configured, Synchronized)
                | (Configuring, Disconnected)
                | (Configured, Disconnected)
                | (Synchronized, Disconnected)
        )
    }
}

impl fmt::Display for ViewState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ViewState::Disconnected => "Disconnected",
            ViewState::Configuring => "Configuring",
            ViewState::Configured => "Configured",
            ViewState::Synchronized => "Synchronized",
        };
        write!(f, "{}", s)
    }
}

/// Atomically published view state. Writes go through [`StateCell::transition`],
/// which enforces the legal edge set; reads never block.
pub struct StateCell {
    state: AtomicU8,
}

impl StateCell {
    pub fn new() -> Self { Self { state: AtomicU8::new(ViewState::Disconnected.code()) } }

    pub fn get(&self) -> ViewState {
        // the cell only ever stores codes produced by ViewState
        ViewState::from_code(self.state.load(Ordering::Acquire)).expect("corrupt state cell")
    }

    /// Move to `next`, validating the edge. Re-entering the current state is
    /// a no-op; any other illegal edge is an engine invariant violation and
    /// reported as invalid state.
    pub fn transition(&self, next: ViewState) -> Result<(), CacheError> {
        let current = self.get();
        if current == next {
            return Ok(());
        }
        if !current.can_become(next) {
            return Err(CacheError::invalid_state(format!("illegal state transition {} -> {}", current, next)));
        }
        debug!("view state {} -> {}", current, next);
        self.state.store(next.code(), Ordering::Release);
        Ok(())
    }
}

impl Default for StateCell {
    fn default() -> Self { Self::new() }
}

impl fmt::Debug for StateCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "StateCell({})", self.get()) }
}
