//! 测试执行器
//!
//! Executes a [`RunPlan`] one invocation at a time: acquire the board for the
//! (configuration, target) pair, run the case body on it, release it. A
//! failure only ever affects the invocation being exercised.

use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::dut::{CaseSummary, DeviceFactory};
use crate::registry::Registrar;
use crate::selection::{Invocation, RunPlan};

/// Result of one invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum Outcome {
    Passed,
    /// At least one on-device sub-case failed
    Failed,
    /// The board could not be acquired or driven
    Error(String),
    /// Not attempted because an earlier invocation failed under fail-fast
    NotRun,
}

impl Outcome {
    pub fn is_passed(&self) -> bool {
        matches!(self, Outcome::Passed)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Passed => "passed",
            Outcome::Failed => "failed",
            Outcome::Error(_) => "error",
            Outcome::NotRun => "not run",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationResult {
    pub invocation: Invocation,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<CaseSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
}

/// Sequential plan executor.
pub struct SuiteRunner<'a, F: DeviceFactory> {
    registrar: &'a Registrar,
    factory: F,
    fail_fast: bool,
}

impl<'a, F: DeviceFactory> SuiteRunner<'a, F> {
    pub fn new(registrar: &'a Registrar, factory: F) -> Self {
        Self {
            registrar,
            factory,
            fail_fast: false,
        }
    }

    pub fn fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Runs every invocation of `plan` and returns one result per invocation,
    /// in plan order.
    pub fn run(&mut self, plan: &RunPlan) -> Vec<InvocationResult> {
        let mut results = Vec::with_capacity(plan.invocations.len());
        let mut stop = false;

        for (i, invocation) in plan.invocations.iter().enumerate() {
            if stop {
                results.push(InvocationResult {
                    invocation: invocation.clone(),
                    outcome: Outcome::NotRun,
                    summary: None,
                    device: None,
                    duration: Duration::ZERO,
                });
                continue;
            }

            info!("[{}/{}] {invocation}", i + 1, plan.invocations.len());
            let result = self.run_one(invocation);
            match &result.outcome {
                Outcome::Passed => info!("{invocation}: PASSED ({:?})", result.duration),
                Outcome::Failed => warn!("{invocation}: FAILED ({:?})", result.duration),
                Outcome::Error(reason) => error!("{invocation}: ERROR: {reason}"),
                Outcome::NotRun => {}
            }
            if self.fail_fast && !result.outcome.is_passed() {
                warn!("Stopping after first failure (fail-fast)");
                stop = true;
            }
            results.push(result);
        }
        results
    }

    fn run_one(&mut self, invocation: &Invocation) -> InvocationResult {
        let started = Instant::now();
        let finish = |outcome, summary, device| InvocationResult {
            invocation: invocation.clone(),
            outcome,
            summary,
            device,
            duration: started.elapsed(),
        };

        let Some(case) = self.registrar.get(&invocation.case) else {
            return finish(
                Outcome::Error(format!("test case '{}' is not registered", invocation.case)),
                None,
                None,
            );
        };

        let mut handle = match self.factory.acquire(invocation, case) {
            Ok(handle) => handle,
            Err(e) => return finish(Outcome::Error(e.to_string()), None, None),
        };
        let device = Some(handle.describe());

        // the handle is dropped (and the board released) when this returns
        match case.execute(handle.as_mut()) {
            Ok(summary) if summary.passed() => finish(Outcome::Passed, Some(summary), device),
            Ok(summary) => finish(Outcome::Failed, Some(summary), device),
            Err(e) => finish(Outcome::Error(e.to_string()), None, device),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dut::{DeviceHandle, DutError, MockDeviceHandle, SubCaseResult, SubCaseStatus};
    use crate::registry::TestCase;
    use crate::selection::{self, SelectionFilter};

    fn summary(status: SubCaseStatus) -> CaseSummary {
        CaseSummary {
            cases: vec![SubCaseResult {
                index: 1,
                name: "DAC output voltage".to_string(),
                status,
                message: None,
                duration: Duration::from_millis(10),
            }],
        }
    }

    fn registrar() -> Registrar {
        let mut registrar = Registrar::new();
        registrar
            .register_case(
                TestCase::builder("test_dac")
                    .configurations(["iram_safe", "release"])
                    .targets(["esp32", "esp32s2"])
                    .build()
                    .unwrap(),
            )
            .unwrap();
        registrar
    }

    fn handle(result: fn() -> Result<CaseSummary, DutError>) -> Box<dyn DeviceHandle> {
        let mut dut = MockDeviceHandle::new();
        dut.expect_run_all_single_board_cases().times(1).returning(result);
        dut.expect_describe().return_const("mock".to_string());
        Box::new(dut)
    }

    #[test_log::test]
    fn every_pair_is_invoked_and_reported() {
        let registrar = registrar();
        let plan = selection::plan(&registrar, &SelectionFilter::default());
        let mut seen = Vec::new();
        let factory = |inv: &Invocation, _case: &TestCase| -> Result<Box<dyn DeviceHandle>, DutError> {
            seen.push((inv.configuration.clone(), inv.target.clone()));
            Ok(handle(|| Ok(summary(SubCaseStatus::Pass))))
        };

        let results = SuiteRunner::new(&registrar, factory).run(&plan);
        assert_eq!(results.len(), 4);
        assert!(results.iter().all(|r| r.outcome == Outcome::Passed));
        assert_eq!(seen, registrar.get("test_dac").unwrap().matrix());
    }

    #[test_log::test]
    fn failures_stay_with_their_own_pair() {
        let registrar = registrar();
        let plan = selection::plan(&registrar, &SelectionFilter::default());
        let factory = |inv: &Invocation, _case: &TestCase| -> Result<Box<dyn DeviceHandle>, DutError> {
            match (inv.configuration.as_str(), inv.target.as_str()) {
                ("iram_safe", "esp32") => Ok(handle(|| Ok(summary(SubCaseStatus::Fail)))),
                ("iram_safe", "esp32s2") => Ok(handle(|| {
                    Err(DutError::Disconnected("USB cable pulled".to_string()))
                })),
                ("release", "esp32") => Err(DutError::Acquisition("port busy".to_string())),
                _ => Ok(handle(|| Ok(summary(SubCaseStatus::Pass)))),
            }
        };

        let results = SuiteRunner::new(&registrar, factory).run(&plan);
        let outcomes: Vec<&str> = results.iter().map(|r| r.outcome.label()).collect();
        assert_eq!(outcomes, vec!["failed", "error", "error", "passed"]);
        assert!(matches!(&results[1].outcome, Outcome::Error(m) if m.contains("USB cable pulled")));
        assert!(matches!(&results[2].outcome, Outcome::Error(m) if m.contains("port busy")));
        assert_eq!(results[2].device, None);
        assert_eq!(results[3].device.as_deref(), Some("mock"));
    }

    #[test]
    fn fail_fast_marks_the_rest_not_run() {
        let registrar = registrar();
        let plan = selection::plan(&registrar, &SelectionFilter::default());
        let mut acquired = 0;
        let factory = |_: &Invocation, _: &TestCase| -> Result<Box<dyn DeviceHandle>, DutError> {
            acquired += 1;
            Ok(handle(|| Ok(summary(SubCaseStatus::Fail))))
        };

        let results = SuiteRunner::new(&registrar, factory).fail_fast(true).run(&plan);
        assert_eq!(results.len(), 4);
        assert_eq!(results[0].outcome, Outcome::Failed);
        assert!(results[1..].iter().all(|r| r.outcome == Outcome::NotRun));
        assert_eq!(acquired, 1);
    }

    #[test]
    fn custom_body_receives_the_handle() {
        let mut registrar = Registrar::new();
        registrar
            .register("test_custom", "generic", ["release"], ["esp32"], |dut| {
                let mut summary = dut.run_all_single_board_cases()?;
                summary.cases.retain(|c| c.status != SubCaseStatus::Fail);
                Ok(summary)
            })
            .unwrap();
        let plan = selection::plan(&registrar, &SelectionFilter::default());
        let factory = |_: &Invocation, _: &TestCase| -> Result<Box<dyn DeviceHandle>, DutError> {
            Ok(handle(|| Ok(summary(SubCaseStatus::Fail))))
        };

        let results = SuiteRunner::new(&registrar, factory).run(&plan);
        assert_eq!(results[0].outcome, Outcome::Passed);
    }

    #[test]
    fn outcome_serializes_with_reason() {
        let json = serde_json::to_string(&Outcome::Error("port busy".to_string())).unwrap();
        assert_eq!(json, r#"{"status":"error","reason":"port busy"}"#);
        let json = serde_json::to_string(&Outcome::Passed).unwrap();
        assert_eq!(json, r#"{"status":"passed"}"#);
    }
}
