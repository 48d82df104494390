//! 连接管理模块
//!
//! Byte-level access to a board console. Every connection type (serial port,
//! spawned emulator process) exposes the same line-writing and chunk-reading
//! interface; protocol handling lives in [`crate::dut`].

use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::target_config::{TargetConfig, TestingType};
use crate::dut::DutError;
use crate::utils;

/// Console connection to one board.
pub trait ConsoleConnection: Send {
    /// Writes `line` followed by a newline.
    fn write_line(&mut self, line: &str) -> Result<(), DutError>;

    /// Returns whatever bytes arrive within `timeout`.
    ///
    /// An empty vector means nothing arrived; a closed console is an error.
    fn read_available(&mut self, timeout: Duration) -> Result<Vec<u8>, DutError>;

    /// Restarts the board.
    ///
    /// 默认实现不支持复位
    fn reset(&mut self) -> Result<(), DutError> {
        Err(DutError::Unsupported(format!("{} cannot be reset", self.describe())))
    }

    /// 关闭连接
    fn close(&mut self) -> Result<(), DutError> {
        Ok(())
    }

    /// Human readable name used in logs and reports.
    fn describe(&self) -> String;
}

/// 连接工厂，用于根据目标配置打开控制台连接
pub struct ConnectionFactory;

impl ConnectionFactory {
    /// Opens the console described by `config`.
    ///
    /// `vars` supplies the placeholder values (`{build_dir}`, `{target}`, ...)
    /// used by process commands.
    pub fn open(
        config: &TargetConfig,
        vars: &BTreeMap<&str, String>,
    ) -> Result<Box<dyn ConsoleConnection>, DutError> {
        match config.testing_type {
            TestingType::Serial => {
                let serial = config.serial.as_ref().ok_or_else(|| {
                    DutError::Acquisition("No serial configuration provided".to_string())
                })?;
                Ok(Box::new(SerialConnection::open(serial.clone())?))
            }
            TestingType::Process => {
                let process = config.process_config().ok_or_else(|| {
                    DutError::Acquisition("No process command configured".to_string())
                })?;
                let command = utils::render_placeholders(&process.command, vars);
                Ok(Box::new(ProcessConnection::spawn(command, process.env)?))
            }
        }
    }
}

mod process;
pub use process::ProcessConnection;

mod serial;
pub use serial::SerialConnection;
