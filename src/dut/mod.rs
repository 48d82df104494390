//! Device-under-test handles.
//!
//! A [`DeviceHandle`] is what a registered test case body receives: a board
//! that is already connected and ready. The only operation the runner needs
//! from it is [`DeviceHandle::run_all_single_board_cases`], which runs every
//! on-device single-board sub-case and reports the aggregate.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::registry::TestCase;
use crate::selection::Invocation;

mod console;
mod factory;
mod unity;

pub use console::{Console, ExpectMatch};
pub use factory::ConfiguredDeviceFactory;
pub use unity::{UnityCase, UnityCaseKind, UnityDut, parse_menu, select_cases};

/// Errors raised while talking to a board.
#[derive(Debug, Error)]
pub enum DutError {
    #[error("device acquisition failed: {0}")]
    Acquisition(String),
    #[error("timed out after {timeout:?} waiting for {waiting_for}")]
    Timeout {
        waiting_for: String,
        timeout: Duration,
    },
    #[error("device disconnected: {0}")]
    Disconnected(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("operation not supported: {0}")]
    Unsupported(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubCaseStatus {
    Pass,
    Fail,
    Ignore,
    /// Not reached because the board could not be recovered
    NotRun,
}

/// Result of one on-device sub-case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubCaseResult {
    pub index: u32,
    pub name: String,
    pub status: SubCaseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
}

/// Aggregate of one `run_all_single_board_cases` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaseSummary {
    pub cases: Vec<SubCaseResult>,
}

impl CaseSummary {
    pub fn push(&mut self, result: SubCaseResult) {
        self.cases.push(result);
    }

    pub fn count(&self, status: SubCaseStatus) -> usize {
        self.cases.iter().filter(|c| c.status == status).count()
    }

    /// True when every sub-case that was due to run passed or was ignored.
    pub fn passed(&self) -> bool {
        self.count(SubCaseStatus::Fail) == 0 && self.count(SubCaseStatus::NotRun) == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = &SubCaseResult> {
        self.cases
            .iter()
            .filter(|c| matches!(c.status, SubCaseStatus::Fail | SubCaseStatus::NotRun))
    }
}

/// A connected, ready board exclusively owned by one invocation.
#[cfg_attr(test, mockall::automock)]
pub trait DeviceHandle: Send {
    /// Runs every single-board sub-case on the board and returns the per
    /// sub-case results. Sub-case failures are reported in the summary;
    /// `Err` means the board could not be driven at all.
    fn run_all_single_board_cases(&mut self) -> Result<CaseSummary, DutError>;

    /// Human readable description of the device, e.g. `serial:/dev/ttyUSB0`.
    fn describe(&self) -> String;
}

/// Acquires a device handle for one (configuration, target) combination.
pub trait DeviceFactory {
    fn acquire(
        &mut self,
        invocation: &Invocation,
        case: &TestCase,
    ) -> Result<Box<dyn DeviceHandle>, DutError>;
}

impl<F> DeviceFactory for F
where
    F: FnMut(&Invocation, &TestCase) -> Result<Box<dyn DeviceHandle>, DutError>,
{
    fn acquire(
        &mut self,
        invocation: &Invocation,
        case: &TestCase,
    ) -> Result<Box<dyn DeviceHandle>, DutError> {
        self(invocation, case)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub(index: u32, status: SubCaseStatus) -> SubCaseResult {
        SubCaseResult {
            index,
            name: format!("case {index}"),
            status,
            message: None,
            duration: Duration::from_millis(5),
        }
    }

    #[test]
    fn summary_with_ignored_cases_passes() {
        let mut summary = CaseSummary::default();
        summary.push(sub(1, SubCaseStatus::Pass));
        summary.push(sub(2, SubCaseStatus::Ignore));
        assert!(summary.passed());
        assert_eq!(summary.failures().count(), 0);
    }

    #[test]
    fn not_run_cases_fail_the_summary() {
        let mut summary = CaseSummary::default();
        summary.push(sub(1, SubCaseStatus::Fail));
        summary.push(sub(2, SubCaseStatus::NotRun));
        assert!(!summary.passed());
        assert_eq!(summary.failures().count(), 2);
        assert_eq!(summary.count(SubCaseStatus::Fail), 1);
    }

    #[test]
    fn timeout_error_names_what_it_waited_for() {
        let err = DutError::Timeout {
            waiting_for: "test menu".to_string(),
            timeout: Duration::from_secs(3),
        };
        assert_eq!(err.to_string(), "timed out after 3s waiting for test menu");
    }
}
