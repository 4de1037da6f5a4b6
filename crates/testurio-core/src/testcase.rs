//! Test-case builder & step registration (spec §4.2).
//!
//! `build` closures run synchronously inside [`Scenario::run`](crate::scenario::Scenario::run)
//! and may only append steps — no I/O happens here. `test.use_component(&c)`
//! dispatches to a component-specific step builder via the [`StepTarget`]
//! GAT trait; each family's builder (`SyncClientSteps`, `AsyncServerSteps`,
//! ...) lives with its owning component in `component::*`.

use std::time::Duration;

use serde_json::Value;

use crate::component::handler::Handler;
use crate::id::generate_id;
use crate::step::{Mode, Step, StepKind};

/// Accumulates the ordered step list for one `build` pass (spec §4.2).
///
/// Every appended step is stamped with the collector's `test_case_id` at
/// insertion time (builder invariant 2); `None` for a scenario's `init`.
pub struct StepCollector {
    test_case_id: Option<String>,
    steps: Vec<Step>,
}

impl StepCollector {
    pub(crate) fn new(test_case_id: Option<String>) -> Self {
        Self { test_case_id, steps: Vec::new() }
    }

    /// Borrow the collector as a component-specific step builder.
    ///
    /// The returned builder holds `&'a mut StepCollector`; NLL ends that
    /// borrow at the end of the enclosing statement, so `test.use_component`
    /// can be called again for a different component on the next line.
    pub fn use_component<'a, T>(&'a mut self, target: &T) -> T::Builder<'a>
    where
        T: StepTarget,
    {
        target.step_builder(self)
    }

    /// Append a step, returning its index for a follow-up [`HookBuilder`].
    pub(crate) fn push(&mut self, component: impl Into<String>, kind: StepKind, mode: Mode) -> usize {
        let step = Step {
            id: generate_id("step"),
            component: component.into(),
            kind,
            handlers: Vec::new(),
            mode,
            test_case_id: self.test_case_id.clone(),
            timeout: None,
        };
        self.steps.push(step);
        self.steps.len() - 1
    }

    pub(crate) fn handlers_mut(&mut self, index: usize) -> &mut Vec<Handler> {
        &mut self.steps[index].handlers
    }

    pub(crate) fn set_timeout(&mut self, index: usize, timeout: Duration) {
        self.steps[index].timeout = Some(timeout);
    }

    pub(crate) fn into_steps(self) -> Vec<Step> {
        self.steps
    }
}

/// Implemented by every component type so [`StepCollector::use_component`]
/// can return a builder shaped for that component's step vocabulary.
///
/// The GAT lets each component pick its own builder type while sharing one
/// dispatch method; there is no trait object indirection at the DSL layer.
pub trait StepTarget {
    /// The step builder this component exposes, borrowing the collector
    /// for exactly as long as the caller keeps chaining.
    type Builder<'a>
    where
        Self: 'a;

    /// Build the step builder for this component against `collector`.
    fn step_builder<'a>(&self, collector: &'a mut StepCollector) -> Self::Builder<'a>;
}

/// Appends handlers to a single already-registered hook/wait step.
///
/// Returned by every `on*`/`wait*` method; each handler method consumes and
/// returns `Self` so calls chain (`.assert(..).delay(..).mockResponse(..)`)
/// exactly as Handler chains are defined in spec §3/§4.4.
pub struct HookBuilder<'a> {
    collector: &'a mut StepCollector,
    step_index: usize,
}

impl<'a> HookBuilder<'a> {
    pub(crate) fn new(collector: &'a mut StepCollector, step_index: usize) -> Self {
        Self { collector, step_index }
    }

    /// Override this step's timeout (default per step-type, spec §5).
    pub fn timeout(self, timeout: Duration) -> Self {
        self.collector.set_timeout(self.step_index, timeout);
        self
    }

    /// Fail the chain (and the step) unless `predicate` holds.
    pub fn assert(self, predicate: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Self {
        self.push(Handler::Assert { description: None, predicate: std::sync::Arc::new(predicate) })
    }

    /// Same as [`Self::assert`] with a description surfaced in failures.
    pub fn assert_with_description(
        self,
        description: impl Into<String>,
        predicate: impl Fn(&Value) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.push(Handler::Assert {
            description: Some(description.into()),
            predicate: std::sync::Arc::new(predicate),
        })
    }

    /// Rewrite the current chain value.
    pub fn transform(self, transform: impl Fn(&Value) -> Value + Send + Sync + 'static) -> Self {
        self.push(Handler::Transform { transform: std::sync::Arc::new(transform) })
    }

    /// Forward the (possibly transformed) message upstream; proxy mode only.
    pub fn proxy(self) -> Self {
        self.push(Handler::Proxy)
    }

    /// Produce a terminal mock response from the current chain value.
    pub fn mock_response(self, builder: impl Fn(&Value) -> Value + Send + Sync + 'static) -> Self {
        self.push(Handler::MockResponse { builder: std::sync::Arc::new(builder) })
    }

    /// Produce a terminal mock event sent back on the triggering connection.
    pub fn mock_event(
        self,
        event_type: impl Into<String>,
        builder: impl Fn(&Value) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.push(Handler::MockEvent { event_type: event_type.into(), builder: std::sync::Arc::new(builder) })
    }

    /// Delay the chain by a fixed duration.
    pub fn delay(self, duration: Duration) -> Self {
        self.push(Handler::Delay(duration))
    }

    /// Unconditionally drop the message.
    pub fn drop_message(self) -> Self {
        self.push(Handler::Drop)
    }

    /// Bind the triggering connection to a stable link id.
    pub fn link(self, link_id: impl Into<String>) -> Self {
        self.push(Handler::Link(link_id.into()))
    }

    /// Close the triggering connection once the chain completes.
    pub fn disconnect(self) -> Self {
        self.push(Handler::Disconnect)
    }

    fn push(self, handler: Handler) -> Self {
        self.collector.handlers_mut(self.step_index).push(handler);
        self
    }
}

/// One declared, named test case: a `build` closure that materializes a
/// fresh step list every time [`Scenario::run`](crate::scenario::Scenario::run)
/// assigns it a new `testCaseId` (spec §4.1 step 4, §4.2).
pub struct TestCase {
    name: String,
    build: std::sync::Arc<dyn Fn(&mut StepCollector) + Send + Sync>,
}

impl TestCase {
    /// Declare a test case. `build` is not invoked here; it runs once per
    /// scenario run, synchronously, against a fresh [`StepCollector`].
    pub fn new(name: impl Into<String>, build: impl Fn(&mut StepCollector) + Send + Sync + 'static) -> Self {
        Self { name: name.into(), build: std::sync::Arc::new(build) }
    }

    /// The test case's declared name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn materialize(&self, test_case_id: Option<String>) -> Vec<Step> {
        let mut collector = StepCollector::new(test_case_id);
        (self.build)(&mut collector);
        collector.into_steps()
    }
}
