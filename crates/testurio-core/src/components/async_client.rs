//! Async client component: `sendMessage`/`onEvent`/`waitEvent`/
//! `waitDisconnect`/`disconnect` (spec §4.6 "AsyncClient step builder").
//!
//! Unlike the sync client's `onResponse`/`waitResponse` pair, every hook
//! family here runs its handler chain at dispatch time regardless of
//! `hook`/`wait` mode; a `wait*` step's pending cell is purely a
//! completion signal Phase 2 awaits, not a deferred-execution marker.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::component::handler::{execute_handlers, ChainResult};
use crate::component::{Component, ComponentBase};
use crate::error::{Error, Result};
use crate::message::{Address, Message};
use crate::protocol::{AsyncProtocol, Connection};
use crate::recorder::{Direction, Interaction, InteractionRecorder};
use crate::step::{Mode, Step, StepKind};
use crate::testcase::{HookBuilder, StepCollector, StepTarget};

const DISCONNECT_EVENT_TYPE: &str = "__disconnect__";

/// A dialed async (connection-oriented) client (spec §4.6).
pub struct AsyncClient {
    base: ComponentBase,
    protocol: Arc<dyn AsyncProtocol>,
    target: Address,
    connection: Mutex<Option<Arc<dyn Connection>>>,
    recorder: Arc<InteractionRecorder>,
    self_ref: Weak<AsyncClient>,
}

impl AsyncClient {
    /// Declare an async client dialing `target` once the scenario starts it.
    pub fn new(
        name: impl Into<String>,
        protocol: Arc<dyn AsyncProtocol>,
        target: Address,
        recorder: Arc<InteractionRecorder>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            base: ComponentBase::new(name),
            protocol,
            target,
            connection: Mutex::new(None),
            recorder,
            self_ref: weak.clone(),
        })
    }

    async fn dispatch_event(&self, message: Message) {
        let hooks = self.base.find_all_matching_hooks(&message).await;
        let mut wait_hook_claimed = false;
        for hook in hooks {
            // `onEvent` hooks (no pending cell) fire on every matching
            // event; a `waitEvent` hook is one-shot, so only the oldest
            // still-unresolved one claims this event — later waiters stay
            // registered for later events instead of all resolving together.
            if hook.pending.is_some() {
                if hook.resolved() || wait_hook_claimed {
                    continue;
                }
                wait_hook_claimed = true;
            }

            match execute_handlers(&hook.step.handlers, &message).await {
                Ok((ChainResult::Forward(_), _)) => {
                    if let Some(pending) = &hook.pending {
                        pending.resolve(message.clone());
                    }
                }
                Ok((ChainResult::Dropped, _)) => {
                    if let Some(pending) = &hook.pending {
                        pending.reject("event dropped by handler chain");
                    }
                }
                Ok((ChainResult::Response(_) | ChainResult::Event { .. }, _)) => {
                    self.base.track_unhandled_error("mockResponse/mockEvent is not valid on an async client onEvent chain");
                }
                Err(e) => {
                    if let Some(pending) = &hook.pending {
                        pending.reject(e.to_string());
                    } else {
                        self.base.track_unhandled_error(e.to_string());
                    }
                }
            }
        }
    }

    async fn await_pending(&self, step: &Step) -> Result<()> {
        let hook = self
            .base
            .find_hook_by_step_id(&step.id)
            .await
            .ok_or_else(|| Error::generic(format!("no hook registered for step '{}'", step.id)))?;
        if hook.resolved() {
            return Err(Error::StrictOrderingViolation);
        }
        let pending = hook.pending.clone().ok_or_else(|| Error::generic("wait step is missing its pending cell"))?;
        pending.wait(step.effective_timeout()).await?;
        Ok(())
    }

    async fn execute_send(&self, message_type: &str, payload: Value, trace_id: Option<String>) -> Result<()> {
        let connection = self
            .connection
            .lock()
            .clone()
            .ok_or_else(|| Error::lifecycle(format!("client '{}' is not connected", self.base.name())))?;
        let mut message = Message::new(message_type, payload);
        if let Some(trace_id) = trace_id.clone() {
            message = message.with_trace_id(trace_id);
        }
        let interaction_id = self.recorder.record_request(Interaction::start(
            self.base.name(),
            message_type,
            "async",
            Direction::Upstream,
            trace_id,
            Some(message.payload.clone()),
        ));
        match connection.send(message_type, message).await {
            Ok(()) => {
                self.recorder.record_response(&interaction_id, None);
                Ok(())
            }
            Err(e) => {
                self.recorder.record_failure(&interaction_id, e.to_string());
                Err(e)
            }
        }
    }
}

#[async_trait]
impl Component for AsyncClient {
    fn base(&self) -> &ComponentBase {
        &self.base
    }

    async fn do_start(&self) -> Result<()> {
        let connection = self.protocol.connect(self.target.clone()).await?;

        let dispatch_weak = self.self_ref.clone();
        connection.on_message(Arc::new(move |message: Message| {
            if let Some(this) = dispatch_weak.upgrade() {
                tokio::spawn(async move { this.dispatch_event(message).await });
            }
        }));

        let close_weak = self.self_ref.clone();
        connection.on_close(Arc::new(move || {
            if let Some(this) = close_weak.upgrade() {
                tokio::spawn(async move { this.dispatch_event(Message::new(DISCONNECT_EVENT_TYPE, Value::Null)).await });
            }
        }));

        *self.connection.lock() = Some(connection);
        Ok(())
    }

    async fn do_stop(&self) -> Result<()> {
        if let Some(connection) = self.connection.lock().take() {
            connection.close().await?;
        }
        Ok(())
    }

    async fn create_hook_matcher(&self, step: &Step) -> Box<dyn Fn(&Message) -> bool + Send + Sync> {
        match &step.kind {
            StepKind::OnEvent { event_type } => {
                let event_type = event_type.clone();
                Box::new(move |msg: &Message| msg.message_type == event_type)
            }
            StepKind::ClientWaitDisconnect => Box::new(|msg: &Message| msg.message_type == DISCONNECT_EVENT_TYPE),
            _ => Box::new(|_| false),
        }
    }

    async fn execute_step(&self, step: &Step) -> Result<()> {
        match &step.kind {
            StepKind::SendMessage { message_type, payload, trace_id } => {
                self.execute_send(message_type, payload.clone(), trace_id.clone()).await
            }
            StepKind::ClientDisconnect => {
                if let Some(connection) = self.connection.lock().take() {
                    connection.close().await?;
                }
                Ok(())
            }
            StepKind::OnEvent { .. } if step.mode == Mode::Hook => Ok(()),
            StepKind::OnEvent { .. } | StepKind::ClientWaitDisconnect => self.await_pending(step).await,
            other => Err(Error::generic(format!("async client cannot execute step kind {other:?}"))),
        }
    }
}

/// Step builder for [`AsyncClient`] (spec §4.6).
pub struct AsyncClientSteps<'a> {
    collector: &'a mut StepCollector,
    component: String,
}

impl<'a> AsyncClientSteps<'a> {
    /// `sendMessage(messageType, payload)` — action.
    pub fn send_message(self, message_type: impl Into<String>, payload: Value) -> Self {
        self.collector.push(
            self.component.clone(),
            StepKind::SendMessage { message_type: message_type.into(), payload, trace_id: None },
            Mode::Action,
        );
        self
    }

    /// `sendMessage(messageType, payload, traceId)` — action.
    pub fn send_message_with_trace(self, message_type: impl Into<String>, payload: Value, trace_id: impl Into<String>) -> Self {
        self.collector.push(
            self.component.clone(),
            StepKind::SendMessage { message_type: message_type.into(), payload, trace_id: Some(trace_id.into()) },
            Mode::Action,
        );
        self
    }

    /// `onEvent(eventType)` — hook; non-strict.
    pub fn on_event(self, event_type: impl Into<String>) -> HookBuilder<'a> {
        let idx = self.collector.push(self.component.clone(), StepKind::OnEvent { event_type: event_type.into() }, Mode::Hook);
        HookBuilder::new(self.collector, idx)
    }

    /// `waitEvent(eventType)` — wait; strict.
    pub fn wait_event(self, event_type: impl Into<String>) -> HookBuilder<'a> {
        let idx = self.collector.push(self.component.clone(), StepKind::OnEvent { event_type: event_type.into() }, Mode::Wait);
        HookBuilder::new(self.collector, idx)
    }

    /// `waitDisconnect()` — wait for a server-initiated close.
    pub fn wait_disconnect(self) -> HookBuilder<'a> {
        let idx = self.collector.push(self.component.clone(), StepKind::ClientWaitDisconnect, Mode::Wait);
        HookBuilder::new(self.collector, idx)
    }

    /// `disconnect()` — action; closes the client's own connection.
    pub fn disconnect(self) -> Self {
        self.collector.push(self.component.clone(), StepKind::ClientDisconnect, Mode::Action);
        self
    }
}

impl StepTarget for AsyncClient {
    type Builder<'a> = AsyncClientSteps<'a>;

    fn step_builder<'a>(&self, collector: &'a mut StepCollector) -> Self::Builder<'a> {
        AsyncClientSteps { collector, component: self.base.name().to_string() }
    }
}
