//! Concrete component families (spec §4.5–§4.7).

pub mod async_client;
pub mod async_server;
pub mod connection;
pub mod pubsub;
pub mod sync_client;
pub mod sync_server;

pub use async_client::{AsyncClient, AsyncClientSteps};
pub use async_server::{AsyncServer, AsyncServerSteps};
pub use connection::ConnectionRegistry;
pub use pubsub::{Publisher, PublisherSteps, Subscriber, SubscriberSteps};
pub use sync_client::{SyncClient, SyncClientSteps};
pub use sync_server::{SyncServer, SyncServerSteps};
