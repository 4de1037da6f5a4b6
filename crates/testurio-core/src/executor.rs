//! Three-phase step executor (spec §4.3).

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::component::Component;
use crate::error::{Error, Result};
use crate::step::{Mode, Step};

/// Outcome of running a single step.
#[derive(Debug, Clone)]
pub struct StepResult {
    /// Id of the step this result belongs to.
    pub step_id: String,
    /// Name of the component the step targeted.
    pub component: String,
    /// Whether the step completed without error.
    pub passed: bool,
    /// Wall-clock time spent executing (or waiting) on the step.
    pub duration: Duration,
    /// Error description if `passed` is false.
    pub error: Option<String>,
    /// True if the step was never attempted because of an earlier cancellation.
    pub skipped: bool,
}

impl StepResult {
    fn ok(step: &Step, duration: Duration) -> Self {
        Self {
            step_id: step.id.clone(),
            component: step.component.clone(),
            passed: true,
            duration,
            error: None,
            skipped: false,
        }
    }

    fn failed(step: &Step, duration: Duration, error: impl Into<String>) -> Self {
        Self {
            step_id: step.id.clone(),
            component: step.component.clone(),
            passed: false,
            duration,
            error: Some(error.into()),
            skipped: false,
        }
    }

    fn skipped(step: &Step) -> Self {
        Self {
            step_id: step.id.clone(),
            component: step.component.clone(),
            passed: false,
            duration: Duration::ZERO,
            error: Some("skipped after an earlier step failed with fail_fast set".to_string()),
            skipped: true,
        }
    }

    fn cancelled(step: &Step) -> Self {
        Self {
            step_id: step.id.clone(),
            component: step.component.clone(),
            passed: false,
            duration: Duration::ZERO,
            error: Some(Error::Cancelled.to_string()),
            skipped: true,
        }
    }
}

/// Aggregate outcome of running one test case's step list.
#[derive(Debug, Clone)]
pub struct TestCaseResult {
    /// Name of the test case.
    pub name: String,
    /// Whether every step passed.
    pub passed: bool,
    /// Per-step results, in execution order.
    pub steps: Vec<StepResult>,
    /// Errors raised by non-strict (`on*`) handler chains that had no
    /// waiting step to return them to, collected per component in Phase 3
    /// (spec §7). These never flip `passed`; a non-strict hook failing is
    /// by definition not something a `wait*` step was blocked on.
    pub unhandled_errors: Vec<String>,
}

/// Looks up a live component by name; implemented by the scenario driver.
pub trait ComponentRegistry: Send + Sync {
    /// Resolve a component by the name steps reference.
    fn get(&self, name: &str) -> Option<Arc<dyn Component>>;
}

/// Runs one test case's step list against live components (spec §4.3).
///
/// `fail_fast` stops Phase 2 at the first failure instead of running every
/// step and reporting the aggregate. Phase 3 (clear hooks) always runs,
/// even when Phase 2 failed, was cancelled, or panicked logically via an
/// early return.
pub async fn run_steps<R, F>(
    registry: &R,
    test_case_name: &str,
    test_case_id: &str,
    steps: &[Step],
    fail_fast: bool,
    cancelled: F,
    mut on_step_complete: impl FnMut(&StepResult),
) -> Result<TestCaseResult>
where
    R: ComponentRegistry,
    F: Fn() -> bool,
{
    // Phase 1 -- register hooks for every hook/wait step.
    for step in steps {
        if step.mode == Mode::Action {
            continue;
        }
        let Some(component) = registry.get(&step.component) else {
            return Err(Error::UnknownComponent(step.component.clone()));
        };
        let matcher = component.create_hook_matcher(step).await;
        let with_pending = component.wants_pending(step);
        component.base().register_hook(step, matcher, with_pending).await;
    }

    // Phase 2 -- execute steps in insertion order.
    let mut results = Vec::with_capacity(steps.len());
    let mut failed_fast = false;

    for step in steps {
        if cancelled() {
            let result = StepResult::cancelled(step);
            on_step_complete(&result);
            results.push(result);
            continue;
        }
        if failed_fast {
            let result = StepResult::skipped(step);
            on_step_complete(&result);
            results.push(result);
            continue;
        }

        let Some(component) = registry.get(&step.component) else {
            let result = StepResult::failed(step, Duration::ZERO, format!("unknown component '{}'", step.component));
            on_step_complete(&result);
            results.push(result);
            if fail_fast {
                failed_fast = true;
            }
            continue;
        };

        let result = match step.mode {
            Mode::Hook => {
                // Firing is traffic-driven; Phase 2 has nothing to do.
                StepResult::ok(step, Duration::ZERO)
            }
            Mode::Action | Mode::Wait => {
                let started = Instant::now();
                match component.execute_step(step).await {
                    Ok(()) => StepResult::ok(step, started.elapsed()),
                    Err(e) => StepResult::failed(step, started.elapsed(), e.to_string()),
                }
            }
        };

        debug!(test_case = test_case_name, step = %step.id, passed = result.passed, "step complete");
        on_step_complete(&result);
        let passed = result.passed;
        results.push(result);
        if !passed && fail_fast {
            failed_fast = true;
        }
    }

    // Phase 3 -- clear non-persistent hooks for this test case, unconditionally,
    // and drain each component's unhandled-error log for this test case.
    let mut component_names: Vec<&str> = steps.iter().map(|s| s.component.as_str()).collect();
    component_names.sort_unstable();
    component_names.dedup();
    let mut unhandled_errors = Vec::new();
    for name in component_names {
        if let Some(component) = registry.get(name) {
            component.base().clear_hooks(Some(test_case_id)).await;
            for err in component.base().take_unhandled_errors() {
                unhandled_errors.push(format!("{name}: {err}"));
            }
        } else {
            warn!(component = name, "component vanished before Phase 3 cleanup");
        }
    }

    let passed = results.iter().all(|r| r.passed);
    Ok(TestCaseResult { name: test_case_name.to_string(), passed, steps: results, unhandled_errors })
}
