//! Scenario & test-case driver (spec §4.1).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::component::Component;
use crate::error::Result;
use crate::executor::{run_steps, ComponentRegistry, StepResult, TestCaseResult};
use crate::id::generate_id;
use crate::reporter::{NullReporter, Reporter};
use crate::testcase::{StepCollector, TestCase};

/// Options governing a scenario run (SPEC_FULL.md §1 configuration).
#[derive(Debug, Clone)]
pub struct ScenarioOptions {
    /// Stop running further test cases (and fail fast within a test case's
    /// Phase 2) at the first failure.
    pub fail_fast: bool,
    /// Default per-step timeout used when a step has no explicit override.
    pub default_timeout: Duration,
}

impl Default for ScenarioOptions {
    fn default() -> Self {
        Self { fail_fast: false, default_timeout: Duration::from_millis(5000) }
    }
}

/// Aggregate result of a scenario run: one [`TestCaseResult`] per test case,
/// plus whether the scenario itself completed without an uncaught error.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Whether every test case passed and no scenario-level error occurred.
    pub passed: bool,
    /// Per-test-case verdicts, in declaration order.
    pub test_cases: Vec<TestCaseResult>,
    /// Scenario-level error, if the run aborted before/during test execution.
    pub error: Option<String>,
}

struct Registry {
    components: HashMap<String, Arc<dyn Component>>,
}

impl ComponentRegistry for Registry {
    fn get(&self, name: &str) -> Option<Arc<dyn Component>> {
        self.components.get(name).cloned()
    }
}

/// A declared component plus whether it is network-facing, used to order
/// startup so clients never race the servers they dial (spec §4.1 step 1).
struct Declared {
    component: Arc<dyn Component>,
    is_network: bool,
}

/// External handle that can cancel an in-flight [`Scenario::run`] (spec §5
/// cancellation signal). Cloning shares the same underlying flag.
#[derive(Clone)]
pub struct CancellationHandle(Arc<AtomicBool>);

impl CancellationHandle {
    /// Request cancellation. The executor observes this at the start of its
    /// next step, not mid-step; an in-flight step still runs to completion.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Orchestrates one scenario: N declared components plus one or more test
/// cases (spec §4.1).
pub struct Scenario {
    name: String,
    declared: Vec<Declared>,
    options: ScenarioOptions,
    reporter: Arc<dyn Reporter>,
    init_build: Option<Arc<dyn Fn(&mut StepCollector) + Send + Sync>>,
    cancelled: Arc<AtomicBool>,
}

impl Scenario {
    /// Start building a scenario named `name` with no components yet.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            declared: Vec::new(),
            options: ScenarioOptions::default(),
            reporter: Arc::new(NullReporter),
            init_build: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A cloneable handle a caller can use to cancel this scenario's
    /// remaining steps from outside the `run` future — e.g. a test-harness
    /// timeout or a user-triggered abort.
    pub fn cancellation_handle(&self) -> CancellationHandle {
        CancellationHandle(self.cancelled.clone())
    }

    /// Override the default options.
    pub fn with_options(mut self, options: ScenarioOptions) -> Self {
        self.options = options;
        self
    }

    /// Install a reporter; defaults to [`NullReporter`] if never called.
    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Declare a non-network component (e.g. a data source); started before
    /// any network component regardless of declaration order.
    pub fn with_data_component(mut self, component: Arc<dyn Component>) -> Self {
        self.declared.push(Declared { component, is_network: false });
        self
    }

    /// Declare a network-facing component (client, server, publisher, ...).
    pub fn with_component(mut self, component: Arc<dyn Component>) -> Self {
        self.declared.push(Declared { component, is_network: true });
        self
    }

    /// Register persistent hooks applied before every test case. `build`
    /// runs once, synchronously, after components start and may only
    /// append steps; its action steps execute immediately.
    pub fn init(mut self, build: impl Fn(&mut StepCollector) + Send + Sync + 'static) -> Self {
        self.init_build = Some(Arc::new(build));
        self
    }

    fn registry(&self) -> Registry {
        let components = self
            .declared
            .iter()
            .map(|d| (d.component.name().to_string(), d.component.clone()))
            .collect();
        Registry { components }
    }

    /// Start every declared component, apply `init`, run each test case in
    /// order, then stop every component. Test-case failures do not abort
    /// the run unless `fail_fast` is set; startup failures do (spec §4.1).
    pub async fn run(&self, test_cases: Vec<TestCase>) -> Result<TestResult> {
        self.reporter.on_start(&self.name).await;

        // Stable partition: non-network components first, preserving
        // declared order within each group (spec §4.1 step 1).
        let mut start_order: Vec<usize> = (0..self.declared.len()).collect();
        start_order.sort_by_key(|&i| self.declared[i].is_network);

        let mut started: Vec<usize> = Vec::new();
        for &idx in &start_order {
            let component = &self.declared[idx].component;
            if let Err(e) = component.start().await {
                error!(scenario = %self.name, component = component.name(), error = %e, "component failed to start");
                for &done in started.iter().rev() {
                    if let Err(stop_err) = self.declared[done].component.stop().await {
                        warn!(component = self.declared[done].component.name(), error = %stop_err, "rollback stop failed");
                    }
                }
                let msg = format!("scenario '{}' aborted: component '{}' failed to start: {e}", self.name, component.name());
                self.reporter.on_error(&msg).await;
                let result = TestResult { passed: false, test_cases: Vec::new(), error: Some(msg.clone()) };
                self.reporter.on_complete(&result).await;
                return Ok(result);
            }
            started.push(idx);
        }

        let registry = self.registry();

        // Apply init: persistent hooks plus any action steps, executed once.
        if let Some(build) = &self.init_build {
            let mut collector = StepCollector::new(None);
            build(&mut collector);
            let init_steps = collector.into_steps();
            if let Err(e) = run_steps(
                &registry,
                "__init__",
                "__init__",
                &init_steps,
                false,
                || self.cancelled.load(Ordering::SeqCst),
                |_r: &StepResult| {},
            )
            .await
            {
                let msg = format!("scenario '{}' init failed: {e}", self.name);
                error!(scenario = %self.name, error = %msg, "init failed");
                self.reporter.on_error(&msg).await;
            }
        }
        // Persistent hooks have no test_case_id, so Phase 3 above (which
        // only clears hooks tagged with "__init__") never touches them.

        let mut test_case_results = Vec::new();
        let mut overall_passed = true;

        for tc in &test_cases {
            let tc_name = tc.name().to_string();
            let tc_id = generate_id("tc");
            self.reporter.on_test_case_start(&tc_name).await;

            let steps = tc.materialize(Some(tc_id.clone()));
            let result = run_steps(
                &registry,
                &tc_name,
                &tc_id,
                &steps,
                self.options.fail_fast,
                || self.cancelled.load(Ordering::SeqCst),
                |_r: &StepResult| {},
            )
            .await;

            match result {
                Ok(tc_result) => {
                    for step_result in &tc_result.steps {
                        self.reporter.on_step_complete(&tc_name, step_result).await;
                    }
                    if !tc_result.passed {
                        overall_passed = false;
                    }
                    let test_result_view = TestResult {
                        passed: tc_result.passed,
                        test_cases: vec![tc_result.clone()],
                        error: None,
                    };
                    self.reporter.on_test_case_complete(&tc_name, &test_result_view).await;
                    test_case_results.push(tc_result);
                    if (!overall_passed && self.options.fail_fast) || self.cancelled.load(Ordering::SeqCst) {
                        break;
                    }
                }
                Err(e) => {
                    overall_passed = false;
                    let msg = format!("test case '{tc_name}' aborted: {e}");
                    self.reporter.on_error(&msg).await;
                    if self.options.fail_fast {
                        break;
                    }
                }
            }
        }

        for &idx in start_order.iter().rev() {
            let component = &self.declared[idx].component;
            if let Err(e) = component.stop().await {
                warn!(component = component.name(), error = %e, "component failed to stop cleanly");
            }
        }

        let result = TestResult { passed: overall_passed, test_cases: test_case_results, error: None };
        self.reporter.on_complete(&result).await;
        info!(scenario = %self.name, passed = result.passed, "scenario run complete");
        Ok(result)
    }
}
