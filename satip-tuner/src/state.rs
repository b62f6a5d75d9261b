//! Tuner state and the request ledger that reconciles caller intents with
//! worker observations.
//!
//! Callers and the worker never write the current state directly. They
//! *request* a state in one of two queues ([`StateMode::External`] for
//! callers, [`StateMode::Internal`] for the worker) and the worker folds the
//! queues into a single new state once per loop iteration.

use std::cmp::Ordering;
use std::fmt;

/// Progress of a tuner session.
///
/// The order is part of the contract: `Idle < Release < Set < Tuned < Locked`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TunerState {
    Idle,
    /// Teardown requested or in progress.
    Release,
    /// Tune requested, not yet connected.
    Set,
    /// Session established.
    Tuned,
    /// Server reports sustained signal lock.
    Locked,
}

impl TunerState {
    /// Position in the progress order.
    pub const fn rank(self) -> u8 {
        match self {
            TunerState::Idle => 0,
            TunerState::Release => 1,
            TunerState::Set => 2,
            TunerState::Tuned => 3,
            TunerState::Locked => 4,
        }
    }

    /// A session is usable once tuned.
    pub fn is_usable(self) -> bool {
        self >= TunerState::Tuned
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TunerState::Idle => "Idle",
            TunerState::Release => "Release",
            TunerState::Set => "Set",
            TunerState::Tuned => "Tuned",
            TunerState::Locked => "Locked",
        }
    }
}

impl PartialOrd for TunerState {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TunerState {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl fmt::Display for TunerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Origin of a state request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateMode {
    /// Raised by the worker thread from its own observations.
    Internal,
    /// Raised by a caller (tune, close).
    External,
}

impl fmt::Display for StateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StateMode::Internal => "internal",
            StateMode::External => "external",
        })
    }
}

/// Pending state requests, one collapsed queue per mode.
///
/// Each queue holds a state at most once, so it never grows beyond the
/// number of states no matter how often a request is repeated.
#[derive(Debug, Default)]
pub struct StateLedger {
    internal: Vec<TunerState>,
    external: Vec<TunerState>,
    closed: bool,
}

impl StateLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request. Returns false once the ledger has been closed.
    pub fn request(&mut self, state: TunerState, mode: StateMode) -> bool {
        if self.closed {
            return false;
        }
        let queue = match mode {
            StateMode::Internal => &mut self.internal,
            StateMode::External => &mut self.external,
        };
        if !queue.contains(&state) {
            queue.push(state);
        }
        true
    }

    /// True if any request is pending.
    pub fn is_requested(&self) -> bool {
        !self.internal.is_empty() || !self.external.is_empty()
    }

    /// Fold all pending requests into the next current state and clear both
    /// queues. Returns `None` when nothing was requested.
    ///
    /// Precedence:
    /// 1. an external `Release` always wins;
    /// 2. an external `Set` wins over anything internal, discarding stale
    ///    `Tuned`/`Locked` markers and a pending connect-timeout release;
    /// 3. an internal `Release` (connect-timeout escalation);
    /// 4. otherwise the highest requested state.
    pub fn resolve(&mut self) -> Option<TunerState> {
        if !self.is_requested() {
            return None;
        }

        let next = if self.external.contains(&TunerState::Release) {
            TunerState::Release
        } else if self.external.contains(&TunerState::Set) {
            TunerState::Set
        } else if self.internal.contains(&TunerState::Release) {
            TunerState::Release
        } else {
            self.internal
                .iter()
                .chain(self.external.iter())
                .copied()
                .max()
                .unwrap_or(TunerState::Idle)
        };

        self.internal.clear();
        self.external.clear();
        Some(next)
    }

    /// Reject all further requests.
    pub fn close(&mut self) {
        self.closed = true;
        self.internal.clear();
        self.external.clear();
    }

    /// Accept requests again after a close.
    pub fn reopen(&mut self) {
        self.closed = false;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}
