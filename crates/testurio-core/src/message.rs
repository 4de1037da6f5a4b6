//! Wire-level data model: [`Message`] and [`Address`] (spec §3).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A wire-level artifact passed between components.
///
/// `message_type` is the protocol-defined discriminator — an HTTP method +
/// path template, a gRPC method name, or an application message name.
/// `payload` is opaque to the core; protocols and user handlers interpret
/// it as JSON (the reference codec, see [`crate::codec`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Protocol-defined discriminator, e.g. `"GET /users/{id}"`.
    pub message_type: String,
    /// Opaque payload.
    pub payload: Value,
    /// Optional trace id used for correlation across hops.
    pub trace_id: Option<String>,
}

impl Message {
    /// Build a new message with no trace id.
    pub fn new(message_type: impl Into<String>, payload: Value) -> Self {
        Self { message_type: message_type.into(), payload, trace_id: None }
    }

    /// Attach a trace id, returning `self` for chaining.
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }
}

/// A network address a component binds to or dials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    /// Hostname or IP.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Optional path component (HTTP/WS base path).
    pub path: Option<String>,
    /// Whether the connection should be established over TLS.
    pub tls: bool,
}

impl Address {
    /// Build a plaintext address with no path.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port, path: None, tls: false }
    }

    /// Set the path component.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Mark the address as TLS.
    pub fn with_tls(mut self) -> Self {
        self.tls = true;
        self
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let scheme = if self.tls { "https" } else { "http" };
        write!(f, "{scheme}://{}:{}{}", self.host, self.port, self.path.as_deref().unwrap_or(""))
    }
}
