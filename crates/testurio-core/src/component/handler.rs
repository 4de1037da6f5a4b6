//! Handler chains (spec §3, §4.4).
//!
//! Source harnesses embed closures directly on steps (`action: async () =>
//! ...`). Here a [`Step`](crate::step::Step) stays pure data; user code only
//! enters through the typed function values held by a [`Handler`] variant
//! (`predicate`, `transform`, `response_builder`), matching the "closures
//! only at handler params" design note.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::message::Message;

/// A single operation in a handler chain. Every variant's payload is owned
/// data or an `Arc`-wrapped closure, so the whole enum is cheaply `Clone`
/// — needed because a registered [`Hook`](crate::component::hook::Hook)
/// keeps its own copy of the chain for as long as it lives.
#[derive(Clone)]
pub enum Handler {
    /// Fail the chain (and the owning step) unless `predicate` returns true.
    Assert {
        /// Optional human-readable description surfaced in assertion errors.
        description: Option<String>,
        /// User predicate over the current chain value.
        predicate: Arc<dyn Fn(&Value) -> bool + Send + Sync>,
    },
    /// Rewrite the current chain value.
    Transform {
        /// User transform over the current chain value.
        transform: Arc<dyn Fn(&Value) -> Value + Send + Sync>,
    },
    /// Forward the (possibly transformed) message upstream; proxy-mode only.
    Proxy,
    /// Produce a terminal mock response for a sync server / client.
    MockResponse {
        /// Builds the response payload from the current chain value.
        builder: Arc<dyn Fn(&Value) -> Value + Send + Sync>,
    },
    /// Produce a terminal mock event sent back on the triggering connection.
    MockEvent {
        /// Event type to send back.
        event_type: String,
        /// Builds the event payload from the current chain value.
        builder: Arc<dyn Fn(&Value) -> Value + Send + Sync>,
    },
    /// Delay the chain by a fixed duration (a suspension point, spec §5).
    Delay(Duration),
    /// Unconditionally drop the message.
    Drop,
    /// Bind the triggering connection to a stable link id.
    Link(String),
    /// Close the triggering connection after the chain completes.
    Disconnect,
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Assert { description, .. } => {
                f.debug_struct("Assert").field("description", description).finish()
            }
            Self::Transform { .. } => f.write_str("Transform"),
            Self::Proxy => f.write_str("Proxy"),
            Self::MockResponse { .. } => f.write_str("MockResponse"),
            Self::MockEvent { event_type, .. } => {
                f.debug_struct("MockEvent").field("event_type", event_type).finish()
            }
            Self::Delay(d) => f.debug_tuple("Delay").field(d).finish(),
            Self::Drop => f.write_str("Drop"),
            Self::Link(id) => f.debug_tuple("Link").field(id).finish(),
            Self::Disconnect => f.write_str("Disconnect"),
        }
    }
}

/// Result of running a full handler chain against an inbound message.
#[derive(Debug, Clone)]
pub enum ChainResult {
    /// No terminal response; proxy components forward as-is.
    Forward(Value),
    /// A terminal mock/proxy response was produced.
    Response(Value),
    /// A terminal mock event was produced, to be sent on the triggering connection.
    Event {
        /// Event type.
        event_type: String,
        /// Event payload.
        payload: Value,
    },
    /// The chain dropped the message.
    Dropped,
}

/// Side effects a handler chain wants applied by its owning component,
/// distinct from the chain's terminal value.
#[derive(Debug, Default)]
pub struct ChainEffects {
    /// Link id to bind the triggering connection to, if a `link` handler ran.
    pub bind_link: Option<String>,
    /// Whether a `disconnect` handler ran.
    pub disconnect: bool,
}

/// Run `handlers` in order against `message`, threading the chain value and
/// collecting side effects (spec §4.4 `executeHandlers`).
pub async fn execute_handlers(handlers: &[Handler], message: &Message) -> Result<(ChainResult, ChainEffects)> {
    let mut current = message.payload.clone();
    let mut effects = ChainEffects::default();

    for handler in handlers {
        match handler {
            Handler::Assert { description, predicate } => {
                if !predicate(&current) {
                    let desc = description.clone().unwrap_or_else(|| "assert".to_string());
                    return Err(Error::assertion(desc));
                }
            }
            Handler::Transform { transform } => {
                current = transform(&current);
            }
            Handler::Proxy => {
                // Marker only; the owning component decides how to forward.
            }
            Handler::MockResponse { builder } => {
                return Ok((ChainResult::Response(builder(&current)), effects));
            }
            Handler::MockEvent { event_type, builder } => {
                return Ok((
                    ChainResult::Event { event_type: event_type.clone(), payload: builder(&current) },
                    effects,
                ));
            }
            Handler::Delay(d) => {
                tokio::time::sleep(*d).await;
            }
            Handler::Drop => {
                return Ok((ChainResult::Dropped, effects));
            }
            Handler::Link(id) => {
                effects.bind_link = Some(id.clone());
            }
            Handler::Disconnect => {
                effects.disconnect = true;
            }
        }
    }

    Ok((ChainResult::Forward(current), effects))
}
