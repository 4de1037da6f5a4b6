//! Sync server component: mock and proxy modes (spec §4.5 "Server").
//!
//! Mode is decided once, at construction, by whether a target address was
//! given: [`SyncServer::new_mock`] vs [`SyncServer::new_proxy`]. `onResponse`
//! hooks are a proxy-only feature; registering one on a mock server panics
//! during the test-case `build` closure, matching the spec's "build-time
//! error" (synchronous, before any component starts).

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::component::handler::{execute_handlers, ChainResult};
use crate::component::hook::Hook;
use crate::component::{Component, ComponentBase};
use crate::error::{Error, Result};
use crate::message::{Address, Message};
use crate::protocol::{MatchSpec, MatcherOptions, RequestHandler, SyncClientAdapter, SyncProtocol, SyncServerAdapter};
use crate::recorder::{Direction, Interaction, InteractionRecorder};
use crate::step::{Mode, Step, StepKind};
use crate::testcase::{HookBuilder, StepCollector, StepTarget};

/// A mock or proxy sync server (spec §4.5). Proxy mode is enabled iff a
/// target address was supplied at construction.
pub struct SyncServer {
    base: ComponentBase,
    protocol: Arc<dyn SyncProtocol>,
    listen: Address,
    target: Option<Address>,
    server: Mutex<Option<Arc<dyn SyncServerAdapter>>>,
    upstream: Mutex<Option<Arc<dyn SyncClientAdapter>>>,
    recorder: Arc<InteractionRecorder>,
    self_ref: Weak<SyncServer>,
}

impl SyncServer {
    /// A mock server: no upstream, `handleIncomingRequest` returns `None`
    /// (protocol sends its unhandled-request shape) when nothing matches.
    pub fn new_mock(
        name: impl Into<String>,
        protocol: Arc<dyn SyncProtocol>,
        listen: Address,
        recorder: Arc<InteractionRecorder>,
    ) -> Arc<Self> {
        Self::build(name, protocol, listen, None, recorder)
    }

    /// A proxy server: forwards unhandled (or handler-forwarded) requests
    /// to `target` and can assert on the upstream response via `onResponse`.
    pub fn new_proxy(
        name: impl Into<String>,
        protocol: Arc<dyn SyncProtocol>,
        listen: Address,
        target: Address,
        recorder: Arc<InteractionRecorder>,
    ) -> Arc<Self> {
        Self::build(name, protocol, listen, Some(target), recorder)
    }

    fn build(
        name: impl Into<String>,
        protocol: Arc<dyn SyncProtocol>,
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
            upstream: Mutex::new(None),
            recorder,
            self_ref: weak.clone(),
        })
    }

    fn is_proxy(&self) -> bool {
        self.target.is_some()
    }

    async fn resolve_wait_hook(&self, hook: &Arc<Hook>, message: &Message) {
        if let Some(pending) = &hook.pending {
            pending.resolve(message.clone());
        }
    }

    async fn forward_upstream(
        &self,
        message_type: &str,
        payload: Value,
        trace_id: Option<String>,
        timeout: Duration,
    ) -> Result<Message> {
        let upstream = self
            .upstream
            .lock()
            .clone()
            .ok_or_else(|| Error::proxy_mode(format!("server '{}' has no upstream connection", self.base.name())))?;
        let mut request = Message::new(message_type, payload);
        if let Some(trace_id) = trace_id {
            request = request.with_trace_id(trace_id);
        }
        let response = upstream.request(message_type, request, timeout).await?;
        Ok(self.run_proxy_response_hooks(message_type, response).await)
    }

    /// Run proxy-only `onResponse` handler chains over the upstream reply,
    /// applying any transform before it goes back to the client.
    async fn run_proxy_response_hooks(&self, message_type: &str, response: Message) -> Message {
        let probe = Message { message_type: message_type.to_string(), ..response.clone() };
        let hooks = self.base.find_all_matching_hooks(&probe).await;
        let mut current = response;
        for hook in hooks {
            if !matches!(hook.step.kind, StepKind::ServerOnResponse { .. }) {
                continue;
            }
            match execute_handlers(&hook.step.handlers, &current).await {
                Ok((ChainResult::Forward(value) | ChainResult::Response(value), _)) => current.payload = value,
                Ok((ChainResult::Dropped, _)) => {}
                Ok((ChainResult::Event { .. }, _)) => {
                    self.base.track_unhandled_error("mockEvent is not valid on a sync server onResponse chain");
                }
                Err(e) => self.base.track_unhandled_error(e.to_string()),
            }
        }
        current
    }

    async fn handle_incoming_request(&self, message_type: &str, request: Message) -> Result<Option<Message>> {
        let interaction_id = self.recorder.record_request(Interaction::start(
            self.base.name(),
            message_type,
            "sync",
            Direction::Downstream,
            request.trace_id.clone(),
            Some(request.payload.clone()),
        ));

        let probe = Message { message_type: message_type.to_string(), ..request.clone() };

        // Hold the hook-set lock across lookup and handler-chain execution
        // so concurrent inbound requests to this server never interleave
        // (spec §5 guarantee 1).
        let hooks_guard = self.base.hooks().await;
        let hook = hooks_guard.iter().find(|h| h.matches(&probe)).cloned();
        let chain_outcome = match &hook {
            Some(h) => Some(execute_handlers(&h.step.handlers, &probe).await),
            None => None,
        };
        drop(hooks_guard);

        let (hook, chain_outcome) = match (hook, chain_outcome) {
            (Some(h), Some(outcome)) => (h, outcome),
            _ => {
                // No matching hook: mock mode reports unhandled, proxy mode forwards as-is.
                return if self.is_proxy() {
                    let response = self
                        .forward_upstream(
                            message_type,
                            request.payload.clone(),
                            request.trace_id.clone(),
                            Duration::from_millis(5000),
                        )
                        .await?;
                    self.recorder.record_response(&interaction_id, Some(response.payload.clone()));
                    Ok(Some(response))
                } else {
                    self.recorder.record_response(&interaction_id, None);
                    Ok(None)
                };
            }
        };

        let (result, _effects) = match chain_outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                self.recorder.record_failure(&interaction_id, e.to_string());
                if let Some(pending) = &hook.pending {
                    pending.reject(e.to_string());
                }
                return Err(e);
            }
        };

        self.resolve_wait_hook(&hook, &probe).await;

        match result {
            ChainResult::Response(payload) => {
                self.recorder.record_response(&interaction_id, Some(payload.clone()));
                Ok(Some(Message { message_type: message_type.to_string(), payload, trace_id: request.trace_id }))
            }
            ChainResult::Dropped => {
                self.recorder.record_response(&interaction_id, None);
                Ok(None)
            }
            ChainResult::Event { .. } => {
                self.recorder.record_failure(&interaction_id, "mockEvent is not valid on a sync server");
                Err(Error::generic("mockEvent handler is not valid on a sync server"))
            }
            ChainResult::Forward(transformed) => {
                if self.is_proxy() {
                    let response = self
                        .forward_upstream(message_type, transformed, request.trace_id.clone(), Duration::from_millis(5000))
                        .await?;
                    self.recorder.record_response(&interaction_id, Some(response.payload.clone()));
                    Ok(Some(response))
                } else {
                    self.recorder.record_response(&interaction_id, None);
                    Ok(None)
                }
            }
        }
    }
}

#[async_trait]
impl RequestHandler for SyncServer {
    async fn handle(&self, message_type: &str, payload: Message) -> Result<Option<Message>> {
        self.handle_incoming_request(message_type, payload).await
    }
}

#[async_trait]
impl Component for SyncServer {
    fn base(&self) -> &ComponentBase {
        &self.base
    }

    async fn do_start(&self) -> Result<()> {
        let server = self.protocol.create_server(self.listen.clone()).await?;
        if let Some(target) = &self.target {
            let upstream = self.protocol.create_client(target.clone()).await?;
            *self.upstream.lock() = Some(upstream);
        }
        let handler: Arc<dyn RequestHandler> =
            self.self_ref.upgrade().ok_or_else(|| Error::generic("sync server dropped before start completed"))?;
        server.on_request(handler).await;
        *self.server.lock() = Some(server);
        Ok(())
    }

    async fn do_stop(&self) -> Result<()> {
        if let Some(server) = self.server.lock().take() {
            server.stop().await?;
        }
        if let Some(upstream) = self.upstream.lock().take() {
            upstream.close().await?;
        }
        Ok(())
    }

    async fn create_hook_matcher(&self, step: &Step) -> Box<dyn Fn(&Message) -> bool + Send + Sync> {
        match &step.kind {
            StepKind::OnRequest { message_type } | StepKind::ServerOnResponse { message_type } => {
                let spec = self.protocol.create_message_type_matcher(message_type, &MatcherOptions::default());
                Box::new(move |msg: &Message| match &spec {
                    MatchSpec::Canonical(expected) => msg.message_type == *expected,
                    MatchSpec::Predicate(predicate) => predicate(&msg.message_type),
                })
            }
            _ => Box::new(|_| false),
        }
    }

    async fn execute_step(&self, step: &Step) -> Result<()> {
        match &step.kind {
            StepKind::OnRequest { .. } if step.mode == Mode::Hook => Ok(()),
            StepKind::OnRequest { .. } => {
                let hook = self
                    .base
                    .find_hook_by_step_id(&step.id)
                    .await
                    .ok_or_else(|| Error::generic(format!("no hook registered for step '{}'", step.id)))?;
                if hook.resolved() {
                    return Err(Error::StrictOrderingViolation);
                }
                let pending =
                    hook.pending.clone().ok_or_else(|| Error::generic("waitRequest step is missing its pending cell"))?;
                pending.wait(step.effective_timeout()).await?;
                Ok(())
            }
            StepKind::ServerOnResponse { .. } => Ok(()),
            other => Err(Error::generic(format!("sync server cannot execute step kind {other:?}"))),
        }
    }
}

/// Step builder for [`SyncServer`] (spec §4.5).
pub struct SyncServerSteps<'a> {
    collector: &'a mut StepCollector,
    component: String,
    is_proxy: bool,
}

impl<'a> SyncServerSteps<'a> {
    /// `onRequest(messageType)` — hook; non-strict.
    pub fn on_request(self, message_type: impl Into<String>) -> HookBuilder<'a> {
        let idx = self.collector.push(self.component.clone(), StepKind::OnRequest { message_type: message_type.into() }, Mode::Hook);
        HookBuilder::new(self.collector, idx)
    }

    /// `waitRequest(messageType)` — wait; strict.
    pub fn wait_request(self, message_type: impl Into<String>) -> HookBuilder<'a> {
        let idx = self.collector.push(self.component.clone(), StepKind::OnRequest { message_type: message_type.into() }, Mode::Wait);
        HookBuilder::new(self.collector, idx)
    }

    /// `onResponse(messageType)` — hook, proxy-only. Panics if called on a
    /// mock-mode server (spec §4.5: "a build-time error").
    pub fn on_response(self, message_type: impl Into<String>) -> HookBuilder<'a> {
        assert!(
            self.is_proxy,
            "onResponse handlers are not valid on a mock-mode server (component '{}')",
            self.component
        );
        let idx =
            self.collector.push(self.component.clone(), StepKind::ServerOnResponse { message_type: message_type.into() }, Mode::Hook);
        HookBuilder::new(self.collector, idx)
    }
}

impl StepTarget for SyncServer {
    type Builder<'a> = SyncServerSteps<'a>;

    fn step_builder<'a>(&self, collector: &'a mut StepCollector) -> Self::Builder<'a> {
        SyncServerSteps { collector, component: self.base.name().to_string(), is_proxy: self.is_proxy() }
    }
}
