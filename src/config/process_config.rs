//! 进程型目标配置
//!
//! A `process` target runs the test application as a child process (an
//! emulator such as QEMU, or a host build of the firmware) and talks to its
//! console over stdin/stdout.
use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessConfig {
    /// Shell command, may use `{build_dir}`, `{target}`, `{config}` and `{app_path}`
    pub command: String,
    /// Extra environment variables for the child
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}
