//! Pure-data step model (spec §3, §4.2).
//!
//! Source DSLs embed closures directly in steps. Here a `Step` stays data;
//! the owning component switches on [`StepKind`] during execution
//! (`Component::execute_step`/`Component::create_hook_matcher`), and the only
//! user closures that enter the system are the ones explicitly named in
//! [`StepKind`]'s `matcher` fields or in a [`Handler`](crate::component::handler::Handler).

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::component::handler::Handler;
use crate::message::Message;

/// A user-supplied predicate used by async matchers (`matcher:` options).
pub type MessagePredicate = Arc<dyn Fn(&Message) -> bool + Send + Sync>;

/// Governs which executor phase a step participates in (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Executed in Phase 2 order; never registers a hook.
    Action,
    /// Registered in Phase 1; Phase 2 slot is a no-op.
    Hook,
    /// Registered in Phase 1 with a pending cell; Phase 2 blocks on it.
    Wait,
}

/// The discriminant driving per-component step execution and hook matching.
/// `Clone` because a registered [`Hook`](crate::component::hook::Hook) keeps
/// its own copy of the originating step for later dispatch-time execution.
#[derive(Clone)]
pub enum StepKind {
    // --- sync client (§4.5) ---
    /// `request(messageType, data, timeout?)` — action.
    Request { message_type: String, data: Value },
    /// `onResponse(messageType, traceId?)` / `waitResponse(...)` — hook/wait.
    OnResponse { message_type: String, trace_id: Option<String> },

    // --- sync server (§4.5) ---
    /// `onRequest(messageType, options?)` / `waitRequest(...)` — hook/wait.
    OnRequest { message_type: String },
    /// Proxy-only `onResponse(messageType, options?)` on a server.
    ServerOnResponse { message_type: String },

    // --- async client (§4.6) ---
    /// `sendMessage(messageType, payload, traceId?)` — action.
    SendMessage { message_type: String, payload: Value, trace_id: Option<String> },
    /// `onEvent(eventType)` / `waitEvent(eventType)` — hook/wait.
    OnEvent { event_type: String },
    /// `waitDisconnect()` on a client — wait.
    ClientWaitDisconnect,
    /// `disconnect()` on a client — action.
    ClientDisconnect,

    // --- async server (§4.6) ---
    /// `onConnection(linkId?, {matcher?})` / `waitConnection(...)`.
    OnConnection { link_id: Option<String>, matcher: Option<MessagePredicate> },
    /// `onMessage(messageType, {matcher?, linkId?})` / `waitMessage(...)`.
    OnMessage { message_type: String, matcher: Option<MessagePredicate>, link_id: Option<String> },
    /// `sendEvent(linkId, eventType, payload)` — action.
    SendEvent { link_id: String, event_type: String, payload: Value },
    /// `broadcast(eventType, payload)` — action.
    Broadcast { event_type: String, payload: Value },
    /// `onDisconnect(linkId, fn)` / `waitDisconnect(linkId)`.
    ServerWaitDisconnect { link_id: String },
    /// `disconnect(linkId)` — action.
    ServerDisconnect { link_id: String },

    // --- pub/sub (§4.7) ---
    /// `publish(topic, payload, options?)` — action.
    Publish { topic: String, payload: Value },
    /// `publishBatch(topic, items[])` — action.
    PublishBatch { topic: String, items: Vec<Value> },
    /// `onMessage(messageType, {matcher?})` / `waitMessage(...)` on a subscriber.
    SubscriberOnMessage { topic: String, matcher: Option<MessagePredicate> },

    /// Escape hatch for data-source style exec steps (out-of-scope adapters,
    /// spec §1); carries an opaque operation name and payload.
    Exec { operation: String, payload: Value },
}

impl fmt::Debug for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Request { .. } => "Request",
            Self::OnResponse { .. } => "OnResponse",
            Self::OnRequest { .. } => "OnRequest",
            Self::ServerOnResponse { .. } => "ServerOnResponse",
            Self::SendMessage { .. } => "SendMessage",
            Self::OnEvent { .. } => "OnEvent",
            Self::ClientWaitDisconnect => "ClientWaitDisconnect",
            Self::ClientDisconnect => "ClientDisconnect",
            Self::OnConnection { .. } => "OnConnection",
            Self::OnMessage { .. } => "OnMessage",
            Self::SendEvent { .. } => "SendEvent",
            Self::Broadcast { .. } => "Broadcast",
            Self::ServerWaitDisconnect { .. } => "ServerWaitDisconnect",
            Self::ServerDisconnect { .. } => "ServerDisconnect",
            Self::Publish { .. } => "Publish",
            Self::PublishBatch { .. } => "PublishBatch",
            Self::SubscriberOnMessage { .. } => "SubscriberOnMessage",
            Self::Exec { .. } => "Exec",
        };
        f.write_str(name)
    }
}

/// A single, pure-data user instruction (spec §3).
#[derive(Clone)]
pub struct Step {
    /// Stable step id, assigned at builder time.
    pub id: String,
    /// Name of the component this step targets.
    pub component: String,
    /// What kind of operation this step performs.
    pub kind: StepKind,
    /// Ordered handler chain run against matching traffic.
    pub handlers: Vec<Handler>,
    /// Which executor phase this step participates in.
    pub mode: Mode,
    /// Stamped at registration; `None` for scenario-`init` steps.
    pub test_case_id: Option<String>,
    /// Per-step timeout override; falls back to the step-type default.
    pub timeout: Option<Duration>,
}

impl Step {
    /// Construct a new step with no handlers and no timeout override.
    pub fn new(id: impl Into<String>, component: impl Into<String>, kind: StepKind, mode: Mode) -> Self {
        Self {
            id: id.into(),
            component: component.into(),
            kind,
            handlers: Vec::new(),
            mode,
            test_case_id: None,
            timeout: None,
        }
    }

    /// Default timeout for this step's kind (spec §5).
    pub fn default_timeout(&self) -> Duration {
        match self.kind {
            StepKind::OnResponse { .. }
            | StepKind::OnRequest { .. }
            | StepKind::OnMessage { .. }
            | StepKind::OnEvent { .. }
            | StepKind::SubscriberOnMessage { .. }
            | StepKind::OnConnection { .. }
            | StepKind::ServerWaitDisconnect { .. }
            | StepKind::ClientWaitDisconnect => Duration::from_millis(5000),
            _ => Duration::from_millis(5000),
        }
    }

    /// Effective timeout: explicit override, else [`Self::default_timeout`].
    pub fn effective_timeout(&self) -> Duration {
        self.timeout.unwrap_or_else(|| self.default_timeout())
    }
}
