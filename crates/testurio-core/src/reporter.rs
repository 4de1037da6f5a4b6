//! Reporter contract (spec §4.9).

use async_trait::async_trait;

use crate::executor::StepResult;
use crate::scenario::TestResult;

/// Pure sink for scenario/test-case progress. Implementations must not
/// mutate the results passed to them.
#[async_trait]
pub trait Reporter: Send + Sync {
    /// Called once when the scenario starts.
    async fn on_start(&self, _scenario_name: &str) {}

    /// Called when a test case begins.
    async fn on_test_case_start(&self, _test_case_name: &str) {}

    /// Called after each step finishes (pass or fail).
    async fn on_step_complete(&self, _test_case_name: &str, _result: &StepResult) {}

    /// Called when a test case finishes.
    async fn on_test_case_complete(&self, _test_case_name: &str, _result: &TestResult) {}

    /// Called once when the whole scenario run finishes.
    async fn on_complete(&self, _result: &TestResult) {}

    /// Called on an uncaught scenario-level error.
    async fn on_error(&self, _error: &str) {}
}

/// Reporter that discards every callback; the default when none is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

#[async_trait]
impl Reporter for NullReporter {}

/// Reporter that forwards every callback into `tracing` events — the
/// ambient "observability by default" instantiation of the contract.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

#[async_trait]
impl Reporter for TracingReporter {
    async fn on_start(&self, scenario_name: &str) {
        tracing::info!(scenario = scenario_name, "scenario started");
    }

    async fn on_test_case_start(&self, test_case_name: &str) {
        tracing::info!(test_case = test_case_name, "test case started");
    }

    async fn on_step_complete(&self, test_case_name: &str, result: &StepResult) {
        if result.passed {
            tracing::debug!(test_case = test_case_name, step = %result.step_id, duration_ms = result.duration.as_millis() as u64, "step passed");
        } else {
            tracing::warn!(test_case = test_case_name, step = %result.step_id, error = ?result.error, "step failed");
        }
    }

    async fn on_test_case_complete(&self, test_case_name: &str, result: &TestResult) {
        tracing::info!(test_case = test_case_name, passed = result.passed, "test case complete");
    }

    async fn on_complete(&self, result: &TestResult) {
        tracing::info!(passed = result.passed, "scenario run complete");
    }

    async fn on_error(&self, error: &str) {
        tracing::error!(error, "scenario-level error");
    }
}

/// Multiplexes callbacks to several child reporters, in registration order.
#[derive(Default)]
pub struct CompositeReporter {
    children: Vec<Box<dyn Reporter>>,
}

impl CompositeReporter {
    /// An empty composite.
    pub fn new() -> Self {
        Self { children: Vec::new() }
    }

    /// Register a child reporter, returning `self` for chaining.
    pub fn with_reporter(mut self, reporter: Box<dyn Reporter>) -> Self {
        self.children.push(reporter);
        self
    }
}

#[async_trait]
impl Reporter for CompositeReporter {
    async fn on_start(&self, scenario_name: &str) {
        for r in &self.children {
            r.on_start(scenario_name).await;
        }
    }

    async fn on_test_case_start(&self, test_case_name: &str) {
        for r in &self.children {
            r.on_test_case_start(test_case_name).await;
        }
    }

    async fn on_step_complete(&self, test_case_name: &str, result: &StepResult) {
        for r in &self.children {
            r.on_step_complete(test_case_name, result).await;
        }
    }

    async fn on_test_case_complete(&self, test_case_name: &str, result: &TestResult) {
        for r in &self.children {
            r.on_test_case_complete(test_case_name, result).await;
        }
    }

    async fn on_complete(&self, result: &TestResult) {
        for r in &self.children {
            r.on_complete(result).await;
        }
    }

    async fn on_error(&self, error: &str) {
        for r in &self.children {
            r.on_error(error).await;
        }
    }
}
