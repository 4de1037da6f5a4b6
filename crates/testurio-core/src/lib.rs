//! # testurio-core
//!
//! Engine crate for `testurio`, a declarative integration-test harness for
//! distributed systems that speak request/response and message-stream
//! protocols (HTTP, gRPC, WebSocket, raw TCP, message queues).
//!
//! A scenario declares named components — clients, mock/proxy servers,
//! publishers/subscribers, data sources — and one or more test cases built
//! as an ordered list of steps. The [`executor`] drives each test case
//! through three phases (register hooks, run steps, clear hooks);
//! components intercept live traffic through [`component::hook::Hook`]s and
//! resolve [`component::hook::PendingCell`]s so blocked `wait*` steps
//! unblock.
//!
//! This crate defines the runtime and the protocol contracts
//! ([`protocol`]) that concrete wire adapters implement; it does not ship
//! an HTTP/gRPC/WS/TCP/MQ client or server itself.

#![warn(missing_docs)]

pub mod codec;
pub mod component;
pub mod components;
pub mod error;
pub mod executor;
pub mod id;
pub mod message;
pub mod protocol;
pub mod recorder;
pub mod reporter;
pub mod scenario;
pub mod step;
pub mod testcase;

pub use component::{Component, ComponentBase, ComponentState};
pub use components::{
    AsyncClient, AsyncClientSteps, AsyncServer, AsyncServerSteps, ConnectionRegistry, Publisher, PublisherSteps,
    Subscriber, SubscriberSteps, SyncClient, SyncClientSteps, SyncServer, SyncServerSteps,
};
pub use error::{Error, Result};
pub use executor::{StepResult, TestCaseResult};
pub use message::{Address, Message};
pub use recorder::{Direction, Interaction, InteractionFilter, InteractionRecorder, InteractionStatus};
pub use reporter::{CompositeReporter, NullReporter, Reporter, TracingReporter};
pub use scenario::{CancellationHandle, Scenario, ScenarioOptions, TestResult};
pub use step::{Mode, Step, StepKind};
pub use testcase::{HookBuilder, StepCollector, StepTarget, TestCase};
