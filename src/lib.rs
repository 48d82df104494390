//! dutrunner: register parametrized board test cases, select the
//! (configuration, target) combinations to run and drive each board's Unity
//! test menu through `run_all_single_board_cases`.

pub mod config;
pub mod connection;
pub mod dut;
pub mod registry;
pub mod report;
pub mod runner;
pub mod selection;
pub mod utils;

pub use dut::{CaseSummary, DeviceFactory, DeviceHandle, DutError};
pub use registry::{Registrar, TestCase};
pub use runner::{InvocationResult, Outcome, SuiteRunner};
pub use selection::{Invocation, RunPlan, SelectionFilter};
