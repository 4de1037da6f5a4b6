//! Protocol interfaces the core consumes (spec §4.8, §6).
//!
//! These are thin factories: the concrete wire adapters (HTTP, gRPC, WS,
//! TCP, MQ clients) are external collaborators out of scope for this crate
//! (spec §1) — only their contracts matter here.

pub mod matcher;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::message::{Address, Message};

/// Either a canonical messageType string or a custom predicate, returned by
/// [`SyncProtocol::create_message_type_matcher`]/
/// [`AsyncProtocol::create_message_type_matcher`].
pub enum MatchSpec {
    /// Replace the messageType with this canonical string before comparing.
    Canonical(String),
    /// Use this predicate directly against the actual message type.
    Predicate(Arc<dyn Fn(&str) -> bool + Send + Sync>),
}

/// Protocol-specific matcher construction options (e.g. template syntax).
#[derive(Debug, Clone, Default)]
pub struct MatcherOptions {
    /// Opaque protocol-specific hints (e.g. `"path-template"`).
    pub hints: Vec<String>,
}

/// Sync request/response transport contract (spec §4.5, §6).
#[async_trait]
pub trait SyncProtocol: Send + Sync {
    /// Build a client dialing `target`.
    async fn create_client(&self, target: Address) -> Result<Arc<dyn SyncClientAdapter>>;

    /// Build a server listening on `listen`.
    async fn create_server(&self, listen: Address) -> Result<Arc<dyn SyncServerAdapter>>;

    /// Optional protocol-specific messageType matcher (path templates, etc).
    fn create_message_type_matcher(&self, message_type: &str, _options: &MatcherOptions) -> MatchSpec {
        MatchSpec::Canonical(message_type.to_string())
    }
}

/// A dialed sync client connection (spec §6).
#[async_trait]
pub trait SyncClientAdapter: Send + Sync {
    /// Send `data` as `message_type` and await the response.
    async fn request(&self, message_type: &str, data: Message, timeout: Duration) -> Result<Message>;

    /// Close the client.
    async fn close(&self) -> Result<()>;
}

/// A listening sync server (spec §6).
#[async_trait]
pub trait SyncServerAdapter: Send + Sync {
    /// Register the single inbound-request handler. Returning `Ok(None)`
    /// means "no response" (the protocol should emit its not-found shape,
    /// e.g. HTTP 404).
    async fn on_request(&self, handler: Arc<dyn RequestHandler>);

    /// Stop listening.
    async fn stop(&self) -> Result<()>;
}

/// Callback invoked per inbound sync request.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Handle one request, optionally producing a response.
    async fn handle(&self, message_type: &str, payload: Message) -> Result<Option<Message>>;
}

/// Async (connection-oriented) transport contract (spec §4.6, §6).
#[async_trait]
pub trait AsyncProtocol: Send + Sync {
    /// Start listening on `listen`, invoking `on_connection` per inbound connection.
    async fn create_server(
        &self,
        listen: Address,
        on_connection: Arc<dyn Fn(Arc<dyn Connection>) + Send + Sync>,
    ) -> Result<Arc<dyn AsyncServerHandle>>;

    /// Dial `target`, returning the client-side connection.
    async fn connect(&self, target: Address) -> Result<Arc<dyn Connection>>;
}

/// Handle to a running async server (stop it, nothing more — connections
/// arrive through the `on_connection` callback).
#[async_trait]
pub trait AsyncServerHandle: Send + Sync {
    /// Stop accepting and close all owned sockets.
    async fn stop(&self) -> Result<()>;
}

/// A connection wrapper shared by server- and client-side async components
/// (spec §3 "Connection", §9 design notes on wrapper ownership).
#[async_trait]
pub trait Connection: Send + Sync {
    /// Stable id for this connection.
    fn id(&self) -> &str;

    /// Whether the underlying socket is still open.
    fn is_connected(&self) -> bool;

    /// Send `type`/`payload` across the wire (client: `sendMessage`,
    /// server: `sendEvent`). Idempotent failure after `close()`.
    async fn send(&self, r#type: &str, payload: Message) -> Result<()>;

    /// Register the single inbound-message callback.
    fn on_message(&self, handler: Arc<dyn Fn(Message) + Send + Sync>);

    /// Register a close callback (fan-out: many may be registered).
    fn on_close(&self, handler: Arc<dyn Fn() + Send + Sync>);

    /// Register an error callback (fan-out).
    fn on_error(&self, handler: Arc<dyn Fn(String) + Send + Sync>);

    /// Idempotently close the connection.
    async fn close(&self) -> Result<()>;
}

/// Publisher/subscriber transport contract (spec §4.7, §6).
#[async_trait]
pub trait MqAdapter: Send + Sync {
    /// Build a publisher.
    async fn create_publisher(&self) -> Result<Arc<dyn MqPublisher>>;

    /// Build a subscriber.
    async fn create_subscriber(&self) -> Result<Arc<dyn MqSubscriber>>;
}

/// Publish side of an MQ adapter.
#[async_trait]
pub trait MqPublisher: Send + Sync {
    /// Publish a single message to `topic`.
    async fn publish(&self, topic: &str, payload: Message) -> Result<()>;

    /// Publish a batch, preserving order (spec §4.7 per-topic ordering).
    async fn publish_batch(&self, topic: &str, items: Vec<Message>) -> Result<()>;

    /// Close the publisher.
    async fn close(&self) -> Result<()>;
}

/// Subscribe side of an MQ adapter.
#[async_trait]
pub trait MqSubscriber: Send + Sync {
    /// Subscribe to `topic`.
    async fn subscribe(&self, topic: &str) -> Result<()>;

    /// Unsubscribe from `topic`.
    async fn unsubscribe(&self, topic: &str) -> Result<()>;

    /// Register the inbound-message callback, delivered `(topic, message)`.
    fn on_message(&self, handler: Arc<dyn Fn(String, Message) + Send + Sync>);

    /// Close the subscriber.
    async fn close(&self) -> Result<()>;
}

/// External data-source collaborator contract (spec §1, §6); only its shape
/// matters to the core, which never talks to a concrete database.
#[async_trait]
pub trait DataSourceAdapter: Send + Sync {
    /// Establish the underlying connection.
    async fn init(&self) -> Result<()>;

    /// Tear it down.
    async fn dispose(&self) -> Result<()>;

    /// Whether the adapter currently believes it is connected.
    fn is_connected(&self) -> bool;
}
