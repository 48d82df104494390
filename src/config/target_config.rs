//! Represents the targets file: executor defaults plus one device entry per target.

use crate::config::executor_config::ExecutorConfig;
use crate::config::process_config::ProcessConfig;
use crate::config::serial_config::SerialConfig;
use crate::utils;
use anyhow::{Result, bail};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// How a target's board is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestingType {
    Serial,
    Process,
}

/// Device configuration for one target identifier.
///
/// - `testing_type`: `serial` (physical board on a serial port) or `process`
///   (emulator or host application spawned locally).
/// - `flash_command`: optional command run before the console is opened.
/// - `serial` / `process`: connection details for the selected testing type.
#[derive(Debug, Deserialize, Clone)]
pub struct TargetConfig {
    pub testing_type: TestingType,
    #[serde(default)]
    pub flash_command: Option<String>,
    #[serde(default)]
    pub serial: Option<SerialConfig>,
    #[serde(default)]
    pub process: Option<ProcessConfig>,
    /// Overrides the `build_{target}_{config}` directory name pattern
    #[serde(default)]
    pub build_dir_pattern: Option<String>,
    /// Short form of `[process] command` written on the target table itself
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl TargetConfig {
    /// Process settings, from the `[process]` table or the short form.
    pub fn process_config(&self) -> Option<ProcessConfig> {
        self.process.clone().or_else(|| {
            self.command.as_ref().map(|command| ProcessConfig {
                command: command.clone(),
                env: self.env.clone(),
            })
        })
    }

    fn validate(&self, name: &str) -> Result<()> {
        match self.testing_type {
            TestingType::Serial if self.serial.is_none() => {
                bail!("Target '{name}' uses testing_type = \"serial\" but has no [serial] table")
            }
            TestingType::Process if self.process_config().is_none() => {
                bail!(
                    "Target '{name}' uses testing_type = \"process\" but has neither a command nor a [process] table"
                )
            }
            _ => Ok(()),
        }
    }
}

/// Top-level targets file.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct TargetsFile {
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub targets: BTreeMap<String, TargetConfig>,
}

impl TargetsFile {
    /// 从文件中读取
    pub fn from_file(path: &Path) -> Result<Self> {
        let file: Self = utils::read_toml_from_file(path)?;
        for (name, target) in &file.targets {
            target.validate(name)?;
        }
        Ok(file)
    }

    pub fn get(&self, target: &str) -> Option<&TargetConfig> {
        self.targets.get(target)
    }
}
