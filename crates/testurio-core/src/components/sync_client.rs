//! Sync client component: `request`/`onResponse`/`waitResponse` (spec §4.5).
//!
//! `onResponse` is `Mode::Hook` but still carries a pending cell
//! ([`Component::wants_pending`] override below): the response and the
//! step reaching Phase 2 race each other, and the pending cell is how the
//! component tells which arrived first. When the response wins, the
//! handler chain runs immediately at dispatch time (errors land in
//! [`ComponentBase::track_unhandled_error`]); when the `waitResponse` step
//! wins, handler-chain execution is deferred to [`Component::execute_step`].

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use crate::component::handler::{execute_handlers, ChainResult};
use crate::component::{Component, ComponentBase};
use crate::error::{Error, Result};
use crate::message::{Address, Message};
use crate::protocol::{MatchSpec, MatcherOptions, SyncClientAdapter, SyncProtocol};
use crate::recorder::{Direction, Interaction, InteractionRecorder};
use crate::step::{Mode, Step, StepKind};
use crate::testcase::{HookBuilder, StepCollector, StepTarget};

/// A dialed sync client: `request(...)`, with `onResponse`/`waitResponse`
/// steps asserting on the reply (spec §4.5 "Client (request/response)").
pub struct SyncClient {
    base: ComponentBase,
    protocol: Arc<dyn SyncProtocol>,
    target: Address,
    adapter: Mutex<Option<Arc<dyn SyncClientAdapter>>>,
    recorder: Arc<InteractionRecorder>,
}

impl SyncClient {
    /// Declare a sync client dialing `target` once the scenario starts it.
    pub fn new(
        name: impl Into<String>,
        protocol: Arc<dyn SyncProtocol>,
        target: Address,
        recorder: Arc<InteractionRecorder>,
    ) -> Arc<Self> {
        Arc::new(Self { base: ComponentBase::new(name), protocol, target, adapter: Mutex::new(None), recorder })
    }

    fn adapter(&self) -> Result<Arc<dyn SyncClientAdapter>> {
        self.adapter
            .lock()
            .clone()
            .ok_or_else(|| Error::lifecycle(format!("client '{}' has not been started", self.base.name())))
    }

    async fn execute_request(&self, step: &Step, message_type: &str, data: &Value) -> Result<()> {
        let adapter = self.adapter()?;
        let timeout = step.effective_timeout();
        let request = Message::new(message_type, data.clone());

        let interaction_id = self.recorder.record_request(Interaction::start(
            self.base.name(),
            message_type,
            "sync",
            Direction::Upstream,
            None,
            Some(data.clone()),
        ));

        match adapter.request(message_type, request, timeout).await {
            Ok(response) => {
                self.recorder.record_response(&interaction_id, Some(response.payload.clone()));
                self.dispatch_response(message_type, response).await;
                Ok(())
            }
            Err(e) => {
                self.recorder.record_failure(&interaction_id, e.to_string());
                self.dispatch_response_error(message_type, &e).await;
                Err(e)
            }
        }
    }

    async fn dispatch_response(&self, message_type: &str, response: Message) {
        let probe = Message { message_type: message_type.to_string(), ..response };
        let hooks = self.base.find_all_matching_hooks(&probe).await;
        for hook in hooks {
            if let Some(pending) = &hook.pending {
                pending.resolve(probe.clone());
            }
            if hook.step.mode != Mode::Hook {
                continue;
            }
            match execute_handlers(&hook.step.handlers, &probe).await {
                Ok((ChainResult::Dropped, _)) => {
                    debug!(component = %self.base.name(), hook = %hook.id, "onResponse chain dropped the response");
                }
                Ok(_) => {}
                Err(e) => self.base.track_unhandled_error(e.to_string()),
            }
        }
    }

    async fn dispatch_response_error(&self, message_type: &str, err: &Error) {
        let probe = Message::new(message_type, Value::Null);
        let hooks = self.base.find_all_matching_hooks(&probe).await;
        for hook in hooks {
            if let Some(pending) = &hook.pending {
                pending.reject(err.to_string());
            }
        }
    }

    async fn execute_wait_response(&self, step: &Step) -> Result<()> {
        let hook = self
            .base
            .find_hook_by_step_id(&step.id)
            .await
            .ok_or_else(|| Error::generic(format!("no hook registered for step '{}'", step.id)))?;
        if hook.resolved() {
            return Err(Error::StrictOrderingViolation);
        }
        let pending = hook
            .pending
            .clone()
            .ok_or_else(|| Error::generic("waitResponse step is missing its pending cell"))?;
        let message = pending.wait(step.effective_timeout()).await?;
        let (result, _effects) = execute_handlers(&hook.step.handlers, &message).await?;
        if matches!(result, ChainResult::Dropped) {
            return Err(Error::assertion("waitResponse handler chain dropped the response"));
        }
        Ok(())
    }
}

#[async_trait]
impl Component for SyncClient {
    fn base(&self) -> &ComponentBase {
        &self.base
    }

    async fn do_start(&self) -> Result<()> {
        let adapter = self.protocol.create_client(self.target.clone()).await?;
        *self.adapter.lock() = Some(adapter);
        Ok(())
    }

    async fn do_stop(&self) -> Result<()> {
        if let Some(adapter) = self.adapter.lock().take() {
            adapter.close().await?;
        }
        Ok(())
    }

    async fn create_hook_matcher(&self, step: &Step) -> Box<dyn Fn(&Message) -> bool + Send + Sync> {
        match &step.kind {
            StepKind::OnResponse { message_type, trace_id } => {
                let spec = self.protocol.create_message_type_matcher(message_type, &MatcherOptions::default());
                let trace_id = trace_id.clone();
                Box::new(move |msg: &Message| {
                    let type_matches = match &spec {
                        MatchSpec::Canonical(expected) => msg.message_type == *expected,
                        MatchSpec::Predicate(predicate) => predicate(&msg.message_type),
                    };
                    type_matches && trace_id.as_deref().map_or(true, |t| msg.trace_id.as_deref() == Some(t))
                })
            }
            _ => Box::new(|_| false),
        }
    }

    async fn execute_step(&self, step: &Step) -> Result<()> {
        match &step.kind {
            StepKind::Request { message_type, data } => self.execute_request(step, message_type, data).await,
            StepKind::OnResponse { .. } if step.mode == Mode::Hook => Ok(()),
            StepKind::OnResponse { .. } => self.execute_wait_response(step).await,
            other => Err(Error::generic(format!("sync client cannot execute step kind {other:?}"))),
        }
    }

    fn wants_pending(&self, step: &Step) -> bool {
        matches!(step.kind, StepKind::OnResponse { .. }) || step.mode == Mode::Wait
    }
}

/// Step builder for [`SyncClient`] (spec §4.5).
pub struct SyncClientSteps<'a> {
    collector: &'a mut StepCollector,
    component: String,
}

impl<'a> SyncClientSteps<'a> {
    /// `request(messageType, data)` — action; uses the step-type default
    /// timeout unless overridden via a following `.timeout()` is not
    /// available here (actions don't chain into a [`HookBuilder`]).
    pub fn request(self, message_type: impl Into<String>, data: Value) -> Self {
        self.collector.push(self.component.clone(), StepKind::Request { message_type: message_type.into(), data }, Mode::Action);
        self
    }

    /// `onResponse(messageType)` — hook; non-strict.
    pub fn on_response(self, message_type: impl Into<String>) -> HookBuilder<'a> {
        self.on_response_matching(message_type, None)
    }

    /// `onResponse(messageType, traceId)` — hook, correlated by trace id.
    pub fn on_response_matching(self, message_type: impl Into<String>, trace_id: Option<String>) -> HookBuilder<'a> {
        let idx = self.collector.push(
            self.component.clone(),
            StepKind::OnResponse { message_type: message_type.into(), trace_id },
            Mode::Hook,
        );
        HookBuilder::new(self.collector, idx)
    }

    /// `waitResponse(messageType)` — wait; strict.
    pub fn wait_response(self, message_type: impl Into<String>) -> HookBuilder<'a> {
        self.wait_response_matching(message_type, None)
    }

    /// `waitResponse(messageType, traceId)` — wait, correlated by trace id.
    pub fn wait_response_matching(self, message_type: impl Into<String>, trace_id: Option<String>) -> HookBuilder<'a> {
        let idx = self.collector.push(
            self.component.clone(),
            StepKind::OnResponse { message_type: message_type.into(), trace_id },
            Mode::Wait,
        );
        HookBuilder::new(self.collector, idx)
    }
}

impl StepTarget for SyncClient {
    type Builder<'a> = SyncClientSteps<'a>;

    fn step_builder<'a>(&self, collector: &'a mut StepCollector) -> Self::Builder<'a> {
        SyncClientSteps { collector, component: self.base.name().to_string() }
    }
}
