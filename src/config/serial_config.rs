//! 串口连接配置
use serde::Deserialize;
use std::time::Duration;

fn default_baud_rate() -> u32 {
    115_200
}

fn default_read_timeout() -> Duration {
    Duration::from_millis(100)
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct SerialConfig {
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Per-read poll timeout on the port, not the test case timeout
    #[serde(with = "humantime_serde", default = "default_read_timeout")] // 支持toml/yaml友好时间格式
    pub timeout: Duration,
    /// Toggle DTR/RTS to pulse the EN line on reset
    #[serde(default = "default_true")]
    pub hard_reset: bool,
}
