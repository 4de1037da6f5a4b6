//! # testurio
//!
//! Declarative integration-test harness for distributed systems that speak
//! request/response and message-stream protocols: declare components
//! (clients, mock/proxy servers, publishers/subscribers), declare test
//! cases as ordered steps with assertion/transform/mock handler chains, and
//! let [`Scenario::run`] drive them.
//!
//! This crate re-exports the [`testurio_core`] runtime and adds a
//! [`prelude`] for ergonomic imports. It ships no wire adapters of its own;
//! bring an HTTP/gRPC/WebSocket/TCP/MQ adapter implementing
//! [`testurio_core::protocol`]'s traits, or use [`memory`]'s in-process
//! adapters for adapter-free scenarios and this crate's own tests.

#![warn(missing_docs)]

pub mod memory;

pub use testurio_core::codec::{JsonCodec, ValueTransformer, WireFormat};
pub use testurio_core::component::{Component, ComponentBase, ComponentState};
pub use testurio_core::error::{Error, Result};
pub use testurio_core::executor::{StepResult, TestCaseResult};
pub use testurio_core::id::generate_id;
pub use testurio_core::message::{Address, Message};
pub use testurio_core::protocol::{
    AsyncProtocol, AsyncServerHandle, Connection, DataSourceAdapter, MatchSpec, MatcherOptions, MqAdapter, MqPublisher,
    MqSubscriber, RequestHandler, SyncClientAdapter, SyncProtocol, SyncServerAdapter,
};
pub use testurio_core::recorder::{Direction, Interaction, InteractionFilter, InteractionRecorder, InteractionStatus};
pub use testurio_core::reporter::{CompositeReporter, NullReporter, Reporter, TracingReporter};
pub use testurio_core::scenario::{CancellationHandle, Scenario, ScenarioOptions, TestResult};
pub use testurio_core::step::{Mode, Step, StepKind};
pub use testurio_core::testcase::{HookBuilder, StepCollector, StepTarget, TestCase};
pub use testurio_core::{
    AsyncClient, AsyncClientSteps, AsyncServer, AsyncServerSteps, ConnectionRegistry, Publisher, PublisherSteps,
    Subscriber, SubscriberSteps, SyncClient, SyncClientSteps, SyncServer, SyncServerSteps,
};

/// Ergonomic glob import for scenario authors: `use testurio::prelude::*;`.
pub mod prelude {
    pub use crate::memory::{InMemoryBroker, InMemoryMq, InMemorySync};
    pub use crate::{
        Address, AsyncClient, AsyncProtocol, AsyncServer, Component, Connection, Error, HookBuilder, Interaction,
        InteractionFilter, InteractionRecorder, Message, MqAdapter, Publisher, Result, Scenario, ScenarioOptions,
        StepCollector, StepTarget, Subscriber, SyncClient, SyncProtocol, SyncServer, TestCase, TestResult,
    };
}
