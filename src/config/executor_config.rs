//! 执行器配置参数
use serde::Deserialize;
use std::time::Duration;

/// Executor options read from the `[executor]` table of the targets file.
///
/// Every field is optional so the table can be partially filled and layered
/// with CLI arguments and per-case overrides through [`ExecutorConfig::merge`].
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct ExecutorConfig {
    #[serde(with = "humantime_serde", default, skip_serializing_if = "Option::is_none")]
    pub case_timeout: Option<Duration>,
    /// How long to wait for the ready banner after opening or resetting the board
    #[serde(with = "humantime_serde", default, skip_serializing_if = "Option::is_none")]
    pub ready_timeout: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_ignore_cases: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail_fast: Option<bool>,
}

impl ExecutorConfig {
    /// Layers `other` over `self`: fields set in `other` win.
    pub fn merge(&self, other: &ExecutorConfig) -> ExecutorConfig {
        ExecutorConfig {
            case_timeout: other.case_timeout.or(self.case_timeout),
            ready_timeout: other.ready_timeout.or(self.ready_timeout),
            reset: other.reset.or(self.reset),
            run_ignore_cases: other.run_ignore_cases.or(self.run_ignore_cases),
            group: other.group.clone().or_else(|| self.group.clone()),
            fail_fast: other.fail_fast.or(self.fail_fast),
        }
    }

    /// Fills every unset field with its default and returns the concrete options.
    pub fn resolve(&self) -> ExecutorOptions {
        let defaults = ExecutorOptions::default();
        ExecutorOptions {
            case_timeout: self.case_timeout.unwrap_or(defaults.case_timeout),
            ready_timeout: self.ready_timeout.unwrap_or(defaults.ready_timeout),
            reset: self.reset.unwrap_or(defaults.reset),
            run_ignore_cases: self.run_ignore_cases.unwrap_or(defaults.run_ignore_cases),
            group: self.group.clone(),
            fail_fast: self.fail_fast.unwrap_or(defaults.fail_fast),
        }
    }
}

/// Concrete executor options after layering.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorOptions {
    pub case_timeout: Duration,
    pub ready_timeout: Duration,
    pub reset: bool,
    pub run_ignore_cases: bool,
    pub group: Option<String>,
    pub fail_fast: bool,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            case_timeout: Duration::from_secs(30),
            ready_timeout: Duration::from_secs(30),
            reset: false,
            run_ignore_cases: false,
            group: None,
            fail_fast: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_prefers_overriding_layer() {
        let base = ExecutorConfig {
            case_timeout: Some(Duration::from_secs(30)),
            reset: Some(false),
            group: Some("dac".into()),
            ..Default::default()
        };
        let over = ExecutorConfig {
            reset: Some(true),
            ..Default::default()
        };
        let merged = base.merge(&over);
        assert_eq!(merged.case_timeout, Some(Duration::from_secs(30)));
        assert_eq!(merged.reset, Some(true));
        assert_eq!(merged.group.as_deref(), Some("dac"));
    }

    #[test]
    fn resolve_fills_defaults() {
        let opts = ExecutorConfig::default().resolve();
        assert_eq!(opts, ExecutorOptions::default());
    }

    #[test]
    fn parses_humantime_durations() {
        let cfg: ExecutorConfig = toml::from_str("case_timeout = \"1m 30s\"\nreset = true").unwrap();
        assert_eq!(cfg.case_timeout, Some(Duration::from_secs(90)));
        assert_eq!(cfg.reset, Some(true));
    }
}
