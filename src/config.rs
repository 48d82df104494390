//! Configuration types: CLI arguments, case manifests, targets file and executor options.

pub mod cli_args;
pub mod executor_config;
pub mod process_config;
pub mod serial_config;
pub mod suite_config;
pub mod target_config;
