//! In-process protocol adapters.
//!
//! No socket is ever opened; components wired to these adapters exchange
//! [`Message`]s through in-memory registries keyed by [`Address`]. Useful
//! for adapter-free scenarios and for exercising the runtime's own test
//! suite without a real HTTP/gRPC/WS/TCP/MQ stack.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::timeout as tokio_timeout;

use testurio_core::error::{Error, Result};
use testurio_core::id::generate_id;
use testurio_core::message::{Address, Message};
use testurio_core::protocol::{
    AsyncProtocol, AsyncServerHandle, Connection, MqAdapter, MqPublisher, MqSubscriber, RequestHandler,
    SyncClientAdapter, SyncProtocol, SyncServerAdapter,
};

fn addr_key(address: &Address) -> String {
    format!("{}:{}{}", address.host, address.port, address.path.as_deref().unwrap_or(""))
}

struct SyncRoute {
    handler: Mutex<Option<Arc<dyn RequestHandler>>>,
}

/// Request/response transport backed by an in-process routing table.
///
/// A server registered at an address answers every client dialing the same
/// address; dialing an address with no listener yields
/// [`Error::Transport`], matching a real connection refused.
#[derive(Default)]
pub struct InMemorySync {
    routes: Mutex<HashMap<String, Arc<SyncRoute>>>,
}

impl InMemorySync {
    /// An empty routing table.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn route(&self, address: &Address) -> Arc<SyncRoute> {
        self.routes.lock().entry(addr_key(address)).or_insert_with(|| Arc::new(SyncRoute { handler: Mutex::new(None) })).clone()
    }
}

#[async_trait]
impl SyncProtocol for InMemorySync {
    async fn create_client(&self, target: Address) -> Result<Arc<dyn SyncClientAdapter>> {
        Ok(Arc::new(InMemorySyncClient { route: self.route(&target) }))
    }

    async fn create_server(&self, listen: Address) -> Result<Arc<dyn SyncServerAdapter>> {
        Ok(Arc::new(InMemorySyncServer { route: self.route(&listen) }))
    }
}

struct InMemorySyncClient {
    route: Arc<SyncRoute>,
}

#[async_trait]
impl SyncClientAdapter for InMemorySyncClient {
    async fn request(&self, message_type: &str, data: Message, timeout: Duration) -> Result<Message> {
        let handler = self.route.handler.lock().clone().ok_or_else(|| {
            Error::transport(format!("no server listening for request '{message_type}'"))
        })?;
        let fut = handler.handle(message_type, data);
        match tokio_timeout(timeout, fut).await {
            Ok(Ok(Some(response))) => Ok(response),
            Ok(Ok(None)) => Ok(Message::new(message_type, serde_json::Value::Null)),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::Timeout(timeout)),
        }
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

struct InMemorySyncServer {
    route: Arc<SyncRoute>,
}

#[async_trait]
impl SyncServerAdapter for InMemorySyncServer {
    async fn on_request(&self, handler: Arc<dyn RequestHandler>) {
        *self.route.handler.lock() = Some(handler);
    }

    async fn stop(&self) -> Result<()> {
        *self.route.handler.lock() = None;
        Ok(())
    }
}

type OnConnection = Arc<dyn Fn(Arc<dyn Connection>) + Send + Sync>;

struct AsyncRoute {
    on_connection: Mutex<Option<OnConnection>>,
}

/// Connection-oriented transport backed by an in-process routing table.
///
/// Every [`InMemoryBroker::connect`] call pairs a freshly created client
/// connection with a server-side peer connection and, if a server is
/// listening at the target address, hands the peer to its `on_connection`
/// callback. [`Connection::send`] on either half delivers directly to the
/// other half's `on_message` callback.
#[derive(Default)]
pub struct InMemoryBroker {
    routes: Mutex<HashMap<String, Arc<AsyncRoute>>>,
}

impl InMemoryBroker {
    /// An empty routing table.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn route(&self, address: &Address) -> Arc<AsyncRoute> {
        self.routes
            .lock()
            .entry(addr_key(address))
            .or_insert_with(|| Arc::new(AsyncRoute { on_connection: Mutex::new(None) }))
            .clone()
    }
}

#[async_trait]
impl AsyncProtocol for InMemoryBroker {
    async fn create_server(&self, listen: Address, on_connection: OnConnection) -> Result<Arc<dyn AsyncServerHandle>> {
        let route = self.route(&listen);
        *route.on_connection.lock() = Some(on_connection);
        Ok(Arc::new(InMemoryAsyncServerHandle { route }))
    }

    async fn connect(&self, target: Address) -> Result<Arc<dyn Connection>> {
        let route = self.route(&target);
        let on_connection = route.on_connection.lock().clone().ok_or_else(|| {
            Error::transport(format!("no server listening at {}:{}", target.host, target.port))
        })?;

        let (client_side, server_side) = PairedConnection::new_pair();
        on_connection(server_side);
        Ok(client_side)
    }
}

struct InMemoryAsyncServerHandle {
    route: Arc<AsyncRoute>,
}

#[async_trait]
impl AsyncServerHandle for InMemoryAsyncServerHandle {
    async fn stop(&self) -> Result<()> {
        *self.route.on_connection.lock() = None;
        Ok(())
    }
}

/// One half of an in-process connection pair; `send` on this half invokes
/// the peer half's registered `on_message` callback directly.
struct PairedConnection {
    id: String,
    connected: AtomicBool,
    peer: Mutex<Option<Arc<PairedConnection>>>,
    on_message: Mutex<Option<Arc<dyn Fn(Message) + Send + Sync>>>,
    on_close: Mutex<Vec<Arc<dyn Fn() + Send + Sync>>>,
    on_error: Mutex<Vec<Arc<dyn Fn(String) + Send + Sync>>>,
}

impl PairedConnection {
    fn new_pair() -> (Arc<dyn Connection>, Arc<dyn Connection>) {
        let a = Arc::new(PairedConnection {
            id: generate_id("conn"),
            connected: AtomicBool::new(true),
            peer: Mutex::new(None),
            on_message: Mutex::new(None),
            on_close: Mutex::new(Vec::new()),
            on_error: Mutex::new(Vec::new()),
        });
        let b = Arc::new(PairedConnection {
            id: generate_id("conn"),
            connected: AtomicBool::new(true),
            peer: Mutex::new(None),
            on_message: Mutex::new(None),
            on_close: Mutex::new(Vec::new()),
            on_error: Mutex::new(Vec::new()),
        });
        *a.peer.lock() = Some(b.clone());
        *b.peer.lock() = Some(a.clone());
        (a as Arc<dyn Connection>, b as Arc<dyn Connection>)
    }
}

#[async_trait]
impl Connection for PairedConnection {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send(&self, r#type: &str, payload: Message) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::transport(format!("connection '{}' is closed", self.id)));
        }
        let Some(peer) = self.peer.lock().clone() else {
            return Err(Error::transport(format!("connection '{}' has no peer", self.id)));
        };
        let message = Message { message_type: r#type.to_string(), ..payload };
        if let Some(handler) = peer.on_message.lock().clone() {
            handler(message);
        }
        Ok(())
    }

    fn on_message(&self, handler: Arc<dyn Fn(Message) + Send + Sync>) {
        *self.on_message.lock() = Some(handler);
    }

    fn on_close(&self, handler: Arc<dyn Fn() + Send + Sync>) {
        self.on_close.lock().push(handler);
    }

    fn on_error(&self, handler: Arc<dyn Fn(String) + Send + Sync>) {
        self.on_error.lock().push(handler);
    }

    async fn close(&self) -> Result<()> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        for callback in self.on_close.lock().iter() {
            callback();
        }
        if let Some(peer) = self.peer.lock().clone() {
            if peer.connected.swap(false, Ordering::SeqCst) {
                for callback in peer.on_close.lock().iter() {
                    callback();
                }
            }
        }
        Ok(())
    }
}

struct MqTopic {
    subscribers: Mutex<Vec<(String, Arc<dyn Fn(String, Message) + Send + Sync>)>>,
}

type TopicMap = Arc<Mutex<HashMap<String, Arc<MqTopic>>>>;

/// Publish/subscribe transport backed by in-process topic fan-out.
///
/// Delivery is synchronous and in publish order: `publish`/`publish_batch`
/// calls each subscribed callback directly before returning.
#[derive(Default)]
pub struct InMemoryMq {
    topics: TopicMap,
}

impl InMemoryMq {
    /// An empty broker with no topics.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn topic(topics: &TopicMap, name: &str) -> Arc<MqTopic> {
        topics.lock().entry(name.to_string()).or_insert_with(|| Arc::new(MqTopic { subscribers: Mutex::new(Vec::new()) })).clone()
    }
}

#[async_trait]
impl MqAdapter for InMemoryMq {
    async fn create_publisher(&self) -> Result<Arc<dyn MqPublisher>> {
        Ok(Arc::new(InMemoryPublisher { topics: self.topics.clone() }))
    }

    async fn create_subscriber(&self) -> Result<Arc<dyn MqSubscriber>> {
        Ok(Arc::new(InMemorySubscriber {
            topics: self.topics.clone(),
            id: generate_id("sub"),
            subscriptions: Mutex::new(Vec::new()),
            handler: Mutex::new(None),
        }))
    }
}

struct InMemoryPublisher {
    topics: TopicMap,
}

#[async_trait]
impl MqPublisher for InMemoryPublisher {
    async fn publish(&self, topic: &str, payload: Message) -> Result<()> {
        let route = InMemoryMq::topic(&self.topics, topic);
        for (_, subscriber) in route.subscribers.lock().iter() {
            subscriber(topic.to_string(), payload.clone());
        }
        Ok(())
    }

    async fn publish_batch(&self, topic: &str, items: Vec<Message>) -> Result<()> {
        for item in items {
            self.publish(topic, item).await?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

struct InMemorySubscriber {
    topics: TopicMap,
    id: String,
    subscriptions: Mutex<Vec<String>>,
    handler: Mutex<Option<Arc<dyn Fn(String, Message) + Send + Sync>>>,
}

#[async_trait]
impl MqSubscriber for InMemorySubscriber {
    async fn subscribe(&self, topic: &str) -> Result<()> {
        let Some(handler) = self.handler.lock().clone() else {
            return Err(Error::generic("subscribe called before on_message handler was registered"));
        };
        let route = InMemoryMq::topic(&self.topics, topic);
        route.subscribers.lock().push((self.id.clone(), handler));
        self.subscriptions.lock().push(topic.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<()> {
        self.subscriptions.lock().retain(|t| t != topic);
        if let Some(route) = self.topics.lock().get(topic).cloned() {
            route.subscribers.lock().retain(|(id, _)| id != &self.id);
        }
        Ok(())
    }

    fn on_message(&self, handler: Arc<dyn Fn(String, Message) + Send + Sync>) {
        *self.handler.lock() = Some(handler);
    }

    async fn close(&self) -> Result<()> {
        for topic in self.subscriptions.lock().drain(..) {
            if let Some(route) = self.topics.lock().get(&topic).cloned() {
                route.subscribers.lock().retain(|(id, _)| id != &self.id);
            }
        }
        Ok(())
    }
}
