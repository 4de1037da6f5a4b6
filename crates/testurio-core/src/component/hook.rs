//! Hooks and the pending-cell synchronization primitive (spec §3, §4.8).

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::{Error, Result};
use crate::message::Message;
use crate::step::Step;

/// One-shot future-like synchronization used by `wait*` steps.
///
/// Producers call [`PendingCell::resolve`]/[`PendingCell::reject`]; a single
/// `wait*` step calls [`PendingCell::wait`]. Resolution is idempotent: once a
/// value lands, later `resolve`/`reject` calls are no-ops unless the cell is
/// `persistent`, in which case they update a "latest value" shadow that only
/// a *subsequent* `wait` observes (a still-pending `wait` call only ever
/// receives the first value, per spec §8 invariant 3).
pub struct PendingCell {
    state: Mutex<CellState>,
    notify: Notify,
    persistent: bool,
}

enum CellState {
    Empty,
    Resolved(Message),
    Rejected(String),
}

impl fmt::Debug for PendingCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let resolved = !matches!(&*self.state.lock(), CellState::Empty);
        f.debug_struct("PendingCell").field("resolved", &resolved).finish()
    }
}

impl PendingCell {
    /// Create a fresh, unresolved cell.
    pub fn new(persistent: bool) -> Self {
        Self { state: Mutex::new(CellState::Empty), notify: Notify::new(), persistent }
    }

    /// Whether the cell already carries a value (used for strict-ordering checks).
    pub fn is_resolved(&self) -> bool {
        !matches!(&*self.state.lock(), CellState::Empty)
    }

    /// Resolve the cell with a value. No-op if already resolved and not persistent.
    pub fn resolve(&self, value: Message) {
        let mut state = self.state.lock();
        match &*state {
            CellState::Empty => {
                *state = CellState::Resolved(value);
                drop(state);
                self.notify.notify_waiters();
            }
            _ if self.persistent => {
                *state = CellState::Resolved(value);
            }
            _ => {}
        }
    }

    /// Reject the cell with an error. Same idempotence rules as [`Self::resolve`].
    pub fn reject(&self, err: impl Into<String>) {
        let mut state = self.state.lock();
        match &*state {
            CellState::Empty => {
                *state = CellState::Rejected(err.into());
                drop(state);
                self.notify.notify_waiters();
            }
            _ if self.persistent => {
                *state = CellState::Rejected(err.into());
            }
            _ => {}
        }
    }

    /// Await the resolved value, or fail with [`Error::Timeout`] after `timeout`.
    pub async fn wait(&self, timeout: Duration) -> Result<Message> {
        if let Some(result) = self.peek() {
            return result;
        }
        let wait_for_notify = self.notify.notified();
        tokio::select! {
            () = wait_for_notify => {}
            () = tokio::time::sleep(timeout) => {
                return Err(Error::Timeout(timeout));
            }
        }
        // The value may have landed between the initial peek and registering
        // the notification; re-check unconditionally after either branch.
        self.peek().unwrap_or(Err(Error::Timeout(timeout)))
    }

    fn peek(&self) -> Option<Result<Message>> {
        match &*self.state.lock() {
            CellState::Empty => None,
            CellState::Resolved(m) => Some(Ok(m.clone())),
            CellState::Rejected(e) => Some(Err(Error::transport(e.clone()))),
        }
    }
}

/// A registered interceptor: match predicate + handler chain + optional
/// pending cell (spec §3).
pub struct Hook {
    /// Stable hook id.
    pub id: String,
    /// Step that registered this hook, if any (persistent init hooks have one too).
    pub step_id: Option<String>,
    /// Test case this hook belongs to; `None` for persistent (init-phase) hooks.
    pub test_case_id: Option<String>,
    /// The step data driving `isMatch`/handler execution.
    pub step: Step,
    /// Match predicate, built by the owning component's `createHookMatcher`.
    pub is_match: Box<dyn Fn(&Message) -> bool + Send + Sync>,
    /// Persistent hooks survive `clearHooks` (only init-phase hooks are persistent).
    pub persistent: bool,
    /// Present iff this hook's step is a `wait` step.
    pub pending: Option<Arc<PendingCell>>,
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook")
            .field("id", &self.id)
            .field("step_id", &self.step_id)
            .field("test_case_id", &self.test_case_id)
            .field("persistent", &self.persistent)
            .field("has_pending", &self.pending.is_some())
            .finish()
    }
}

impl Hook {
    /// `true` once the hook's pending cell has a value (strict-ordering checks).
    pub fn resolved(&self) -> bool {
        self.pending.as_ref().is_some_and(|p| p.is_resolved())
    }

    /// Test whether `message` matches this hook, swallowing predicate panics
    /// as non-matches per spec §4.4 (`findMatchingHook`).
    pub fn matches(&self, message: &Message) -> bool {
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| (self.is_match)(message)))
            .unwrap_or(false)
    }
}
