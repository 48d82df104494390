use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::executor_config::ExecutorConfig;
use crate::selection::SelectionFilter;

// dutrunner - 运行参数化的单板测试用例
#[derive(Parser, Debug)]
#[clap(
    name = "dutrunner",
    version,
    about = "Run parametrized single-board test cases on devices under test",
    after_help = "SOURCES:\n  --suite <FILE>         Case manifest (*.suite.toml / *.suite.yaml)\n  --suite-dir <DIR>      Directory searched recursively for manifests\n\nFILTER OPTIONS:\n  --marker <MARKER>      Keep cases with this marker\n  --case <NAME>          Keep cases with this name\n  --config <LABEL>       Keep these configurations\n  --target <TARGET>      Keep these targets\n\nEXAMPLES:\n  dutrunner -D components/ --target esp32 --list\n  dutrunner -s dac.suite.toml -T targets.toml --config release\n  dutrunner -D components/ -m generic --target esp32c6 --reset --timeout 120"
)]
pub struct CliArgs {
    // Case manifest files
    // 用例清单文件
    #[clap(short = 's', long = "suite", help = "Case manifest file (repeatable)")]
    pub suites: Vec<PathBuf>,

    // Directory containing case manifests
    // 包含用例清单的目录
    #[clap(short = 'D', long = "suite-dir", help = "Directory containing case manifests")]
    pub suite_dir: Option<PathBuf>,

    // Targets file - device connections and executor defaults
    // 目标文件 - 设备连接和执行器默认值
    #[clap(
        short = 'T',
        long = "targets-file",
        default_value = "targets.toml",
        help = "Targets file describing device connections"
    )]
    pub targets_file: PathBuf,

    #[clap(short = 'm', long = "marker", help = "Filter cases by marker (repeatable)")]
    pub markers: Vec<String>,

    #[clap(short = 'k', long = "case", help = "Filter cases by name (repeatable)")]
    pub cases: Vec<String>,

    #[clap(short = 'c', long = "config", help = "Filter by configuration label (repeatable)")]
    pub configs: Vec<String>,

    #[clap(long = "target", help = "Filter by target identifier (repeatable)")]
    pub targets: Vec<String>,

    // List only - print the run plan without touching any device
    // 仅列出 - 打印运行计划但不访问设备
    #[clap(short = 'l', long = "list", help = "Print the run plan without executing")]
    pub list: bool,

    #[clap(long = "reports-dir", default_value = "reports", help = "Output directory for reports")]
    pub reports_dir: PathBuf,

    // Sub-case timeout (seconds)
    // 子用例超时时间（秒）
    #[clap(long = "timeout", help = "Per sub-case timeout in seconds")]
    pub timeout: Option<u64>,

    #[clap(long = "reset", help = "Reset the board before every sub-case")]
    pub reset: bool,

    #[clap(long = "run-ignored", help = "Also run sub-cases tagged [ignore]")]
    pub run_ignored: bool,

    #[clap(long = "group", help = "Only run sub-cases carrying this Unity tag")]
    pub group: Option<String>,

    #[clap(long = "fail-fast", help = "Stop after the first failed combination")]
    pub fail_fast: bool,

    #[clap(short = 'v', long = "verbose", help = "Enable verbose logging")]
    pub verbose: bool,

    #[clap(short = 'q', long = "quiet", help = "Suppress non-essential output")]
    pub quiet: bool,
}

impl CliArgs {
    /// Parse command line arguments
    /// 解析命令行参数
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Get log level
    /// 获取日志级别
    pub fn get_log_level(&self) -> &str {
        if self.quiet {
            "error"
        } else if self.verbose {
            "debug"
        } else {
            "info"
        }
    }

    /// Get filter conditions
    /// 获取筛选条件
    pub fn get_filter(&self) -> SelectionFilter {
        SelectionFilter::default()
            .with_markers(self.markers.iter().cloned())
            .with_names(self.cases.iter().cloned())
            .with_configurations(self.configs.iter().cloned())
            .with_targets(self.targets.iter().cloned())
    }

    /// Executor options given on the command line; flags that were not
    /// passed stay unset so the targets file can supply them.
    pub fn get_executor_overrides(&self) -> ExecutorConfig {
        ExecutorConfig {
            case_timeout: self.timeout.map(Duration::from_secs),
            reset: self.reset.then_some(true),
            run_ignore_cases: self.run_ignored.then_some(true),
            group: self.group.clone(),
            fail_fast: self.fail_fast.then_some(true),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeatable_filters_are_collected() {
        let args = CliArgs::parse_from([
            "dutrunner", "-D", "apps", "--target", "esp32", "--target", "esp32s2", "-c", "release",
        ]);
        let filter = args.get_filter();
        assert!(filter.targets.contains("esp32"));
        assert!(filter.targets.contains("esp32s2"));
        assert!(filter.configurations.contains("release"));
        assert!(filter.markers.is_empty());
    }

    #[test]
    fn unset_flags_do_not_override() {
        let args = CliArgs::parse_from(["dutrunner", "-s", "a.suite.toml"]);
        assert_eq!(args.get_executor_overrides(), ExecutorConfig::default());
        assert_eq!(args.get_log_level(), "info");
    }

    #[test]
    fn set_flags_override() {
        let args = CliArgs::parse_from(["dutrunner", "--timeout", "90", "--reset", "-q"]);
        let overrides = args.get_executor_overrides();
        assert_eq!(overrides.case_timeout, Some(Duration::from_secs(90)));
        assert_eq!(overrides.reset, Some(true));
        assert_eq!(args.get_log_level(), "error");
    }
}
