//! Component base: uniform lifecycle + hook registry (spec §4.4).

pub mod handler;
pub mod hook;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::MutexGuard;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::message::Message;
use crate::step::{Mode, Step};
use hook::{Hook, PendingCell};

/// Component lifecycle state (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentState {
    /// Never started.
    Created,
    /// `start()` in progress.
    Starting,
    /// Running and accepting traffic.
    Started,
    /// `stop()` in progress.
    Stopping,
    /// Cleanly stopped; eligible to be started again.
    Stopped,
    /// `start`/`stop` raised; terminal until externally recreated.
    Error,
}

/// Shared bookkeeping every component embeds: lifecycle state, hook set,
/// and unhandled-error log. Per-component hook mutations and handler-chain
/// executions are serialized through `hooks` (spec §5 guarantee 1): a
/// dispatcher holds the lock for the whole find-match-then-run-handlers
/// sequence, never just the lookup.
pub struct ComponentBase {
    name: String,
    state: SyncMutex<ComponentState>,
    hooks: AsyncMutex<Vec<Arc<Hook>>>,
    unhandled_errors: SyncMutex<Vec<String>>,
    started_once: AtomicBool,
}

impl ComponentBase {
    /// Create a fresh base for a component named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: SyncMutex::new(ComponentState::Created),
            hooks: AsyncMutex::new(Vec::new()),
            unhandled_errors: SyncMutex::new(Vec::new()),
            started_once: AtomicBool::new(false),
        }
    }

    /// Component name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ComponentState {
        *self.state.lock()
    }

    fn set_state(&self, s: ComponentState) {
        *self.state.lock() = s;
    }

    /// Acquire the hook-set lock for the duration of a dispatch: find the
    /// matching hook(s), run their handler chain, resolve pending cells, all
    /// under one guard so no second inbound message interleaves.
    pub async fn hooks(&self) -> MutexGuard<'_, Vec<Arc<Hook>>> {
        self.hooks.lock().await
    }

    /// Register a hook built from `step` with the given matcher.
    ///
    /// `with_pending` is decided by the owning component, not purely by
    /// `step.mode`: every `wait*` step needs a pending cell (the executor
    /// blocks Phase 2 on it), but a sync client's `onResponse` also needs one
    /// even though it is `Mode::Hook` — its handler chain runs deferred,
    /// racing the response against the step reaching Phase 2 (spec §4.5).
    pub async fn register_hook(
        &self,
        step: &Step,
        is_match: Box<dyn Fn(&Message) -> bool + Send + Sync>,
        with_pending: bool,
    ) -> Arc<Hook> {
        let persistent = step.test_case_id.is_none();
        let pending = with_pending.then(|| Arc::new(PendingCell::new(persistent)));
        let hook = Arc::new(Hook {
            id: crate::id::generate_id("hook"),
            step_id: Some(step.id.clone()),
            test_case_id: step.test_case_id.clone(),
            step: step.clone(),
            is_match,
            persistent,
            pending,
        });
        let mut hooks = self.hooks.lock().await;
        hooks.push(hook.clone());
        debug!(component = %self.name, hook = %hook.id, "registered hook");
        hook
    }

    /// Remove all non-persistent hooks, or all hooks for a specific test
    /// case id. If `test_case_id` is `None`, clears everything (including
    /// persistent hooks — used when the component itself is being stopped).
    pub async fn clear_hooks(&self, test_case_id: Option<&str>) {
        let mut hooks = self.hooks.lock().await;
        match test_case_id {
            Some(tc) => hooks.retain(|h| h.persistent || h.test_case_id.as_deref() != Some(tc)),
            None => hooks.retain(|h| h.persistent),
        }
    }

    /// Remove every hook unconditionally (component teardown).
    pub async fn clear_all_hooks(&self) {
        self.hooks.lock().await.clear();
    }

    /// First hook (in insertion order) whose matcher accepts `message`.
    pub async fn find_matching_hook(&self, message: &Message) -> Option<Arc<Hook>> {
        let hooks = self.hooks.lock().await;
        hooks.iter().find(|h| h.matches(message)).cloned()
    }

    /// Every hook (in insertion order) whose matcher accepts `message`.
    pub async fn find_all_matching_hooks(&self, message: &Message) -> Vec<Arc<Hook>> {
        let hooks = self.hooks.lock().await;
        hooks.iter().filter(|h| h.matches(message)).cloned().collect()
    }

    /// Locate the hook registered for a particular step id (used by `wait*`
    /// steps to find the hook Phase 1 already created for them).
    pub async fn find_hook_by_step_id(&self, step_id: &str) -> Option<Arc<Hook>> {
        let hooks = self.hooks.lock().await;
        hooks.iter().find(|h| h.step_id.as_deref() == Some(step_id)).cloned()
    }

    /// Remove a single hook by id.
    pub async fn remove_hook(&self, hook_id: &str) {
        let mut hooks = self.hooks.lock().await;
        hooks.retain(|h| h.id != hook_id);
    }

    /// Record an asynchronous handler error that couldn't be returned
    /// synchronously to the caller that triggered it (e.g. a server push
    /// path with no waiting step).
    pub fn track_unhandled_error(&self, err: impl Into<String>) {
        let msg = err.into();
        warn!(component = %self.name, error = %msg, "unhandled error in handler chain");
        self.unhandled_errors.lock().push(msg);
    }

    /// Snapshot of unhandled errors recorded so far.
    pub fn unhandled_errors(&self) -> Vec<String> {
        self.unhandled_errors.lock().clone()
    }

    /// Drain and return unhandled errors recorded so far, clearing the log.
    /// Called once per test case so errors from one test case are never
    /// attributed to the next.
    pub fn take_unhandled_errors(&self) -> Vec<String> {
        std::mem::take(&mut self.unhandled_errors.lock())
    }

    /// Number of hooks currently registered (tests rely on this for spec §8
    /// invariant 1: after Phase 3, `|hooks| == |persistent_hooks|`).
    pub async fn hook_count(&self) -> usize {
        self.hooks.lock().await.len()
    }

    /// Reject every hook's pending cell so blocked `wait*` steps unblock
    /// with a [`Error::ComponentStopped`] instead of timing out (spec §5
    /// resource policy).
    pub async fn reject_all_pending(&self) {
        let hooks = self.hooks.lock().await;
        for hook in hooks.iter() {
            if let Some(pending) = &hook.pending {
                pending.reject(Error::ComponentStopped { component: self.name.clone() }.to_string());
            }
        }
    }
}

/// Uniform component lifecycle + per-type hooks into execution (spec §4.4,
/// §4.5–§4.7 share this trait).
#[async_trait]
pub trait Component: Send + Sync {
    /// Access to the shared lifecycle/hook bookkeeping.
    fn base(&self) -> &ComponentBase;

    /// Component-specific startup (open listeners, dial upstreams, ...).
    async fn do_start(&self) -> Result<()>;

    /// Component-specific teardown; must close all owned connections and
    /// reject outstanding pending cells with [`Error::ComponentStopped`].
    async fn do_stop(&self) -> Result<()>;

    /// Build the match predicate for a `hook`/`wait` step (spec §4.5/§4.6
    /// `createHookMatcher`).
    async fn create_hook_matcher(&self, step: &Step) -> Box<dyn Fn(&Message) -> bool + Send + Sync>;

    /// Run an `action` step, or block an already-registered `wait` step on
    /// its pending cell. `hook`-mode steps are a no-op here (spec §4.3 Phase 2).
    async fn execute_step(&self, step: &Step) -> Result<()>;

    /// Whether Phase 1 should give this step's hook a pending cell.
    ///
    /// Defaults to `step.mode == Mode::Wait`. A sync client's `onResponse`
    /// overrides this to `true` even though it is `Mode::Hook`: its handler
    /// chain races the response against the step reaching Phase 2, and
    /// needs the pending cell to know which arrived first (spec §4.5).
    fn wants_pending(&self, step: &Step) -> bool {
        step.mode == Mode::Wait
    }

    /// Component name, delegating to the shared base.
    fn name(&self) -> &str {
        self.base().name()
    }

    /// Start the component; legal only from `Created`/`Stopped` (spec §3).
    async fn start(&self) -> Result<()> {
        let current = self.base().state();
        if !matches!(current, ComponentState::Created | ComponentState::Stopped) {
            return Err(Error::lifecycle(format!(
                "cannot start component '{}' from state {current:?}",
                self.name()
            )));
        }
        self.base().set_state(ComponentState::Starting);
        match self.do_start().await {
            Ok(()) => {
                self.base().set_state(ComponentState::Started);
                self.base().started_once.store(true, Ordering::Relaxed);
                debug!(component = %self.name(), "started");
                Ok(())
            }
            Err(e) => {
                self.base().set_state(ComponentState::Error);
                Err(e)
            }
        }
    }

    /// Stop the component; idempotent once already `Stopped`.
    async fn stop(&self) -> Result<()> {
        if self.base().state() == ComponentState::Stopped {
            return Ok(());
        }
        self.base().set_state(ComponentState::Stopping);
        let result = self.do_stop().await;
        self.base().reject_all_pending().await;
        self.base().clear_all_hooks().await;
        match result {
            Ok(()) => {
                self.base().set_state(ComponentState::Stopped);
                debug!(component = %self.name(), "stopped");
                Ok(())
            }
            Err(e) => {
                self.base().set_state(ComponentState::Error);
                Err(e)
            }
        }
    }
}
