//! Async server component: mock and proxy modes, with link-id routing
//! (spec §4.6 "AsyncServer step builder").
//!
//! Mode is decided once, at construction, exactly like [`super::sync_server::SyncServer`].
//! Every inbound connection gets its own `onMessage`/`onClose` wiring; a
//! proxy-mode server additionally dials a paired upstream connection per
//! client connection, forwarding unmatched traffic both ways.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::component::handler::{execute_handlers, ChainResult};
use crate::component::{Component, ComponentBase};
use crate::error::{Error, Result};
use crate::message::{Address, Message};
use crate::protocol::{AsyncProtocol, AsyncServerHandle, Connection};
use crate::recorder::{Direction, Interaction, InteractionRecorder};
use crate::step::{Mode, Step, StepKind};
use crate::testcase::{HookBuilder, StepCollector, StepTarget};

use super::connection::ConnectionRegistry;

const CONNECTION_EVENT_TYPE: &str = "__connection__";
const DISCONNECT_EVENT_TYPE: &str = "__disconnect__";

/// A mock or proxy async server (spec §4.6). Proxy mode is enabled iff a
/// target address was supplied at construction.
pub struct AsyncServer {
    base: ComponentBase,
    protocol: Arc<dyn AsyncProtocol>,
    listen: Address,
    target: Option<Address>,
    server: Mutex<Option<Arc<dyn AsyncServerHandle>>>,
    connections: ConnectionRegistry,
    upstream_pairs: Mutex<HashMap<String, Arc<dyn Connection>>>,
    recorder: Arc<InteractionRecorder>,
    self_ref: Weak<AsyncServer>,
}

impl AsyncServer {
    /// A mock server: unmatched traffic is simply not replied to.
    pub fn new_mock(
        name: impl Into<String>,
        protocol: Arc<dyn AsyncProtocol>,
        listen: Address,
        recorder: Arc<InteractionRecorder>,
    ) -> Arc<Self> {
        Self::build(name, protocol, listen, None, recorder)
    }

    /// A proxy server: pairs each inbound connection with an outbound
    /// connection to `target`, forwarding unmatched traffic both ways.
    pub fn new_proxy(
        name: impl Into<String>,
        protocol: Arc<dyn AsyncProtocol>,
        listen: Address,
        target: Address,
        recorder: Arc<InteractionRecorder>,
    ) -> Arc<Self> {
        Self::build(name, protocol, listen, Some(target), recorder)
    }

    fn build(
        name: impl Into<String>,
        protocol: Arc<dyn AsyncProtocol>,
        listen: Address,
        target: Option<Address>,
        recorder: Arc<InteractionRecorder>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            base: ComponentBase::new(name),
            protocol,
            listen,
            target,
            server: Mutex::new(None),
            connections: ConnectionRegistry::new(),
            upstream_pairs: Mutex::new(HashMap::new()),
            recorder,
            self_ref: weak.clone(),
        })
    }

    fn is_proxy(&self) -> bool {
        self.target.is_some()
    }

    async fn handle_new_connection(&self, connection: Arc<dyn Connection>) {
        self.connections.insert(connection.clone());

        let connection_id = connection.id().to_string();
        let message_weak = self.self_ref.clone();
        let message_conn_id = connection_id.clone();
        connection.on_message(Arc::new(move |message: Message| {
            if let Some(this) = message_weak.upgrade() {
                let connection_id = message_conn_id.clone();
                tokio::spawn(async move { this.dispatch_message(&connection_id, message).await });
            }
        }));

        let close_weak = self.self_ref.clone();
        let close_conn_id = connection_id.clone();
        connection.on_close(Arc::new(move || {
            if let Some(this) = close_weak.upgrade() {
                let connection_id = close_conn_id.clone();
                tokio::spawn(async move { this.handle_disconnect(&connection_id).await });
            }
        }));

        if self.is_proxy() {
            if let Err(e) = self.pair_with_upstream(&connection).await {
                self.base.track_unhandled_error(format!("failed to pair upstream connection: {e}"));
            }
        }

        self.dispatch_connection(connection).await;
    }

    async fn pair_with_upstream(&self, client_connection: &Arc<dyn Connection>) -> Result<()> {
        let target = self.target.clone().expect("pair_with_upstream only called in proxy mode");
        let upstream = self.protocol.connect(target).await?;

        let forward_target = client_connection.clone();
        upstream.on_message(Arc::new(move |message: Message| {
            let forward_target = forward_target.clone();
            tokio::spawn(async move {
                let _ = forward_target.send(&message.message_type.clone(), message).await;
            });
        }));

        let close_target = client_connection.clone();
        upstream.on_close(Arc::new(move || {
            let close_target = close_target.clone();
            tokio::spawn(async move {
                let _ = close_target.close().await;
            });
        }));

        self.upstream_pairs.lock().insert(client_connection.id().to_string(), upstream);
        Ok(())
    }

    async fn dispatch_connection(&self, connection: Arc<dyn Connection>) {
        // A connection event binds exactly one onConnection/waitConnection
        // hook, the oldest registered match — never every match at once.
        let probe = Message::new(CONNECTION_EVENT_TYPE, Value::Null);
        let Some(hook) = self.base.find_matching_hook(&probe).await else {
            return;
        };

        if let StepKind::OnConnection { link_id, .. } = &hook.step.kind {
            if let Some(link_id) = link_id {
                self.connections.bind_link(link_id.clone(), connection.id().to_string());
            }
        }
        // "binds the first inbound connection" — one-shot per hook.
        self.base.remove_hook(&hook.id).await;

        match execute_handlers(&hook.step.handlers, &probe).await {
            Ok((ChainResult::Dropped, _)) => {
                if let Some(pending) = &hook.pending {
                    pending.reject("connection dropped by handler chain");
                }
            }
            Ok(_) => {
                if let Some(pending) = &hook.pending {
                    pending.resolve(probe.clone());
                }
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

    async fn dispatch_message(&self, connection_id: &str, message: Message) {
        let candidates = self.base.find_all_matching_hooks(&message).await;
        let mut matched_any = false;
        let mut wait_hook_claimed = false;

        for hook in candidates {
            if let StepKind::OnMessage { link_id: Some(required_link), .. } = &hook.step.kind {
                let bound = self.connections.resolve_link(required_link).map(|c| c.id().to_string());
                if bound.as_deref() != Some(connection_id) {
                    continue;
                }
            }

            // `onMessage` hooks (no pending cell) fire on every matching
            // message; a `waitMessage` hook is one-shot, so only the oldest
            // still-unresolved one claims this message.
            if hook.pending.is_some() {
                if hook.resolved() || wait_hook_claimed {
                    continue;
                }
                wait_hook_claimed = true;
            }
            matched_any = true;

            let interaction_id = self.recorder.record_request(Interaction::start(
                self.base.name(),
                message.message_type.clone(),
                "async",
                Direction::Downstream,
                message.trace_id.clone(),
                Some(message.payload.clone()),
            ));

            match execute_handlers(&hook.step.handlers, &message).await {
                Ok((result, effects)) => {
                    if let Some(link_id) = effects.bind_link.clone() {
                        self.connections.bind_link(link_id, connection_id.to_string());
                    }
                    match result {
                        ChainResult::Dropped => {
                            self.recorder.record_response(&interaction_id, None);
                            if let Some(pending) = &hook.pending {
                                pending.reject("message dropped by handler chain");
                            }
                        }
                        ChainResult::Response(_) => {
                            self.recorder.record_failure(&interaction_id, "mockResponse is not valid on an async server");
                            self.base.track_unhandled_error("mockResponse is not valid on an async server onMessage chain");
                        }
                        ChainResult::Event { event_type, payload } => {
                            self.recorder.record_response(&interaction_id, Some(payload.clone()));
                            if let Some(conn) = self.connections.get(connection_id) {
                                let reply = Message::new(event_type.clone(), payload);
                                if let Err(e) = conn.send(&event_type, reply).await {
                                    self.base.track_unhandled_error(e.to_string());
                                }
                            }
                            if let Some(pending) = &hook.pending {
                                pending.resolve(message.clone());
                            }
                        }
                        ChainResult::Forward(value) => {
                            self.recorder.record_response(&interaction_id, Some(value.clone()));
                            if let Some(pending) = &hook.pending {
                                pending.resolve(Message { payload: value.clone(), ..message.clone() });
                            }
                            if self.is_proxy() {
                                self.forward_upstream(connection_id, &message.message_type, value, message.trace_id.clone())
                                    .await;
                            }
                        }
                    }
                    if effects.disconnect {
                        if let Some(conn) = self.connections.get(connection_id) {
                            let _ = conn.close().await;
                        }
                    }
                }
                Err(e) => {
                    self.recorder.record_failure(&interaction_id, e.to_string());
                    if let Some(pending) = &hook.pending {
                        pending.reject(e.to_string());
                    } else {
                        self.base.track_unhandled_error(e.to_string());
                    }
                }
            }
        }

        if !matched_any && self.is_proxy() {
            self.forward_upstream(connection_id, &message.message_type, message.payload.clone(), message.trace_id.clone())
                .await;
        }
    }

    async fn forward_upstream(&self, connection_id: &str, message_type: &str, payload: Value, trace_id: Option<String>) {
        let Some(upstream) = self.upstream_pairs.lock().get(connection_id).cloned() else {
            self.base.track_unhandled_error(format!("no paired upstream connection for '{connection_id}'"));
            return;
        };
        let mut message = Message::new(message_type, payload);
        if let Some(trace_id) = trace_id {
            message = message.with_trace_id(trace_id);
        }
        if let Err(e) = upstream.send(message_type, message).await {
            self.base.track_unhandled_error(e.to_string());
        }
    }

    async fn handle_disconnect(&self, connection_id: &str) {
        let bound_links = self.connections.links_for(connection_id);
        self.connections.remove(connection_id);
        if let Some(upstream) = self.upstream_pairs.lock().remove(connection_id) {
            let _ = upstream.close().await;
        }
        self.dispatch_disconnect(&bound_links).await;
    }

    async fn dispatch_disconnect(&self, bound_links: &[String]) {
        if bound_links.is_empty() {
            return;
        }
        let probe = Message::new(DISCONNECT_EVENT_TYPE, Value::Null);
        let hooks_guard = self.base.hooks().await;
        let matching: Vec<_> = hooks_guard
            .iter()
            .filter(|h| matches!(&h.step.kind, StepKind::ServerWaitDisconnect { link_id } if bound_links.iter().any(|l| l == link_id)))
            .cloned()
            .collect();
        drop(hooks_guard);

        for hook in matching {
            match execute_handlers(&hook.step.handlers, &probe).await {
                Ok((ChainResult::Dropped, _)) => {
                    if let Some(pending) = &hook.pending {
                        pending.reject("disconnect handler dropped the event");
                    }
                }
                Ok(_) => {
                    if let Some(pending) = &hook.pending {
                        pending.resolve(probe.clone());
                    }
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
}

#[async_trait]
impl Component for AsyncServer {
    fn base(&self) -> &ComponentBase {
        &self.base
    }

    async fn do_start(&self) -> Result<()> {
        let accept_weak = self.self_ref.clone();
        let server = self
            .protocol
            .create_server(
                self.listen.clone(),
                Arc::new(move |connection: Arc<dyn Connection>| {
                    if let Some(this) = accept_weak.upgrade() {
                        tokio::spawn(async move { this.handle_new_connection(connection).await });
                    }
                }),
            )
            .await?;
        *self.server.lock() = Some(server);
        Ok(())
    }

    async fn do_stop(&self) -> Result<()> {
        if let Some(server) = self.server.lock().take() {
            server.stop().await?;
        }
        for connection in self.connections.all() {
            let _ = connection.close().await;
        }
        for (_, upstream) in self.upstream_pairs.lock().drain() {
            let _ = upstream.close().await;
        }
        Ok(())
    }

    async fn create_hook_matcher(&self, step: &Step) -> Box<dyn Fn(&Message) -> bool + Send + Sync> {
        match &step.kind {
            StepKind::OnConnection { matcher, .. } => {
                let matcher = matcher.clone();
                Box::new(move |msg: &Message| {
                    msg.message_type == CONNECTION_EVENT_TYPE && matcher.as_ref().map_or(true, |m| m(msg))
                })
            }
            StepKind::OnMessage { message_type, matcher, .. } => {
                let expected = message_type.clone();
                let matcher = matcher.clone();
                Box::new(move |msg: &Message| msg.message_type == expected && matcher.as_ref().map_or(true, |m| m(msg)))
            }
            StepKind::ServerWaitDisconnect { .. } => Box::new(|msg: &Message| msg.message_type == DISCONNECT_EVENT_TYPE),
            _ => Box::new(|_| false),
        }
    }

    async fn execute_step(&self, step: &Step) -> Result<()> {
        match &step.kind {
            StepKind::SendEvent { link_id, event_type, payload } => {
                let connection =
                    self.connections.resolve_link(link_id).ok_or_else(|| Error::UnknownLink(link_id.clone()))?;
                connection.send(event_type, Message::new(event_type.clone(), payload.clone())).await
            }
            StepKind::Broadcast { event_type, payload } => {
                for connection in self.connections.all() {
                    connection.send(event_type, Message::new(event_type.clone(), payload.clone())).await?;
                }
                Ok(())
            }
            StepKind::ServerDisconnect { link_id } => {
                let connection =
                    self.connections.resolve_link(link_id).ok_or_else(|| Error::UnknownLink(link_id.clone()))?;
                connection.close().await
            }
            StepKind::OnConnection { .. } | StepKind::OnMessage { .. } if step.mode == Mode::Hook => Ok(()),
            StepKind::OnConnection { .. } | StepKind::OnMessage { .. } | StepKind::ServerWaitDisconnect { .. } => {
                self.await_pending(step).await
            }
            other => Err(Error::generic(format!("async server cannot execute step kind {other:?}"))),
        }
    }
}

/// Step builder for [`AsyncServer`] (spec §4.6).
pub struct AsyncServerSteps<'a> {
    collector: &'a mut StepCollector,
    component: String,
}

impl<'a> AsyncServerSteps<'a> {
    /// `onConnection(linkId?)` — hook; binds the first inbound connection.
    pub fn on_connection(self, link_id: Option<String>) -> HookBuilder<'a> {
        let idx = self.collector.push(self.component.clone(), StepKind::OnConnection { link_id, matcher: None }, Mode::Hook);
        HookBuilder::new(self.collector, idx)
    }

    /// `waitConnection(linkId?)` — wait variant.
    pub fn wait_connection(self, link_id: Option<String>) -> HookBuilder<'a> {
        let idx = self.collector.push(self.component.clone(), StepKind::OnConnection { link_id, matcher: None }, Mode::Wait);
        HookBuilder::new(self.collector, idx)
    }

    /// `onMessage(messageType, linkId?)` — hook; non-strict.
    pub fn on_message(self, message_type: impl Into<String>, link_id: Option<String>) -> HookBuilder<'a> {
        let idx = self.collector.push(
            self.component.clone(),
            StepKind::OnMessage { message_type: message_type.into(), matcher: None, link_id },
            Mode::Hook,
        );
        HookBuilder::new(self.collector, idx)
    }

    /// `waitMessage(messageType, linkId?)` — wait; strict.
    pub fn wait_message(self, message_type: impl Into<String>, link_id: Option<String>) -> HookBuilder<'a> {
        let idx = self.collector.push(
            self.component.clone(),
            StepKind::OnMessage { message_type: message_type.into(), matcher: None, link_id },
            Mode::Wait,
        );
        HookBuilder::new(self.collector, idx)
    }

    /// `sendEvent(linkId, eventType, payload)` — action.
    pub fn send_event(self, link_id: impl Into<String>, event_type: impl Into<String>, payload: Value) -> Self {
        self.collector.push(
            self.component.clone(),
            StepKind::SendEvent { link_id: link_id.into(), event_type: event_type.into(), payload },
            Mode::Action,
        );
        self
    }

    /// `broadcast(eventType, payload)` — action.
    pub fn broadcast(self, event_type: impl Into<String>, payload: Value) -> Self {
        self.collector.push(self.component.clone(), StepKind::Broadcast { event_type: event_type.into(), payload }, Mode::Action);
        self
    }

    /// `onDisconnect(linkId)` — hook.
    pub fn on_disconnect(self, link_id: impl Into<String>) -> HookBuilder<'a> {
        let idx = self.collector.push(self.component.clone(), StepKind::ServerWaitDisconnect { link_id: link_id.into() }, Mode::Hook);
        HookBuilder::new(self.collector, idx)
    }

    /// `waitDisconnect(linkId)` — wait.
    pub fn wait_disconnect(self, link_id: impl Into<String>) -> HookBuilder<'a> {
        let idx = self.collector.push(self.component.clone(), StepKind::ServerWaitDisconnect { link_id: link_id.into() }, Mode::Wait);
        HookBuilder::new(self.collector, idx)
    }

    /// `disconnect(linkId)` — action.
    pub fn disconnect(self, link_id: impl Into<String>) -> Self {
        self.collector.push(self.component.clone(), StepKind::ServerDisconnect { link_id: link_id.into() }, Mode::Action);
        self
    }
}

impl StepTarget for AsyncServer {
    type Builder<'a> = AsyncServerSteps<'a>;

    fn step_builder<'a>(&self, collector: &'a mut StepCollector) -> Self::Builder<'a> {
        AsyncServerSteps { collector, component: self.base.name().to_string() }
    }
}
