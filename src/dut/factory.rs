//! Device acquisition from the targets file.

use log::{debug, info};
use std::collections::BTreeMap;
use std::process::Command;

use crate::config::executor_config::{ExecutorConfig, ExecutorOptions};
use crate::config::target_config::{TargetsFile, TestingType};
use crate::connection::ConnectionFactory;
use crate::dut::{DeviceFactory, DeviceHandle, DutError, UnityDut};
use crate::registry::TestCase;
use crate::selection::Invocation;
use crate::utils;

/// Acquires boards as described by a [`TargetsFile`].
///
/// For each invocation it resolves the build directory, optionally flashes
/// it, opens the console and waits for the Unity banner.
pub struct ConfiguredDeviceFactory {
    targets: TargetsFile,
    executor: ExecutorConfig,
}

impl ConfiguredDeviceFactory {
    /// `executor` holds the options layered from the targets file and the
    /// command line; per-case overrides are applied on top at acquisition.
    pub fn new(targets: TargetsFile, executor: ExecutorConfig) -> Self {
        Self { targets, executor }
    }

    /// Executor options for `case`: its manifest overrides win over the
    /// targets file and command line.
    pub fn options_for(&self, case: &TestCase) -> ExecutorOptions {
        self.executor.merge(case.overrides()).resolve()
    }

    fn flash(command: &str) -> Result<(), DutError> {
        info!("Flashing: {command}");
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .output()
            .map_err(|e| DutError::Acquisition(format!("Unable to run flash command: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
            return Err(DutError::Acquisition(format!(
                "flash command exited with {}: {}",
                output.status,
                tail.into_iter().rev().collect::<Vec<_>>().join(" | ")
            )));
        }
        debug!("Flash finished: {}", String::from_utf8_lossy(&output.stdout).trim_end());
        Ok(())
    }
}

impl DeviceFactory for ConfiguredDeviceFactory {
    fn acquire(
        &mut self,
        invocation: &Invocation,
        case: &TestCase,
    ) -> Result<Box<dyn DeviceHandle>, DutError> {
        let target = self.targets.get(&invocation.target).ok_or_else(|| {
            DutError::Acquisition(format!(
                "no device configured for target '{}'",
                invocation.target
            ))
        })?;

        let build_dir = case.build_dir(
            &invocation.target,
            &invocation.configuration,
            target.build_dir_pattern.as_deref(),
        );
        let mut vars = BTreeMap::new();
        vars.insert("build_dir", build_dir.display().to_string());
        vars.insert("target", invocation.target.clone());
        vars.insert("config", invocation.configuration.clone());
        vars.insert(
            "app_path",
            case.app_path().map(|p| p.display().to_string()).unwrap_or_default(),
        );
        if let (TestingType::Serial, Some(serial)) = (target.testing_type, &target.serial) {
            vars.insert("port", serial.port.clone());
        }

        if let Some(flash_command) = &target.flash_command {
            if !build_dir.is_dir() {
                return Err(DutError::Acquisition(format!(
                    "build directory not found: {}",
                    build_dir.display()
                )));
            }
            Self::flash(&utils::render_placeholders(flash_command, &vars))?;
        }

        let options = self.options_for(case);
        let connection = ConnectionFactory::open(target, &vars)?;
        let mut dut = UnityDut::new(connection, options, invocation.to_string());
        dut.wait_ready()?;
        Ok(Box::new(dut))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::registry::TestCase;
    use std::time::Duration;

    fn invocation(target: &str) -> Invocation {
        Invocation {
            case: "test_dac".to_string(),
            configuration: "release".to_string(),
            target: target.to_string(),
        }
    }

    fn dac_case(app_path: &std::path::Path) -> TestCase {
        TestCase::builder("test_dac")
            .configurations(["release"])
            .targets(["linux"])
            .app_path(app_path)
            .build()
            .unwrap()
    }

    fn quick() -> ExecutorConfig {
        ExecutorConfig {
            ready_timeout: Some(Duration::from_secs(2)),
            ..Default::default()
        }
    }

    #[test]
    fn manifest_overrides_win_at_acquisition() {
        let manifest: crate::config::suite_config::SuiteManifest = toml::from_str(
            r#"
[[case]]
name = "test_dac"
configurations = ["release"]
targets = ["linux"]
timeout = "2m"
reset = true
group = "dac"

[[case]]
name = "test_adc"
configurations = ["release"]
targets = ["linux"]
"#,
        )
        .unwrap();
        let mut registrar = crate::registry::Registrar::new();
        for declaration in &manifest.cases {
            registrar.register_declaration(declaration).unwrap();
        }

        // targets file [executor] table layered with command line flags
        let file = ExecutorConfig {
            case_timeout: Some(Duration::from_secs(45)),
            group: Some("adc".to_string()),
            ..Default::default()
        };
        let cli = ExecutorConfig {
            run_ignore_cases: Some(true),
            ..Default::default()
        };
        let factory = ConfiguredDeviceFactory::new(TargetsFile::default(), file.merge(&cli));

        let dac = factory.options_for(registrar.get("test_dac").unwrap());
        assert_eq!(dac.case_timeout, Duration::from_secs(120));
        assert!(dac.reset);
        assert_eq!(dac.group.as_deref(), Some("dac"));
        assert!(dac.run_ignore_cases);

        let adc = factory.options_for(registrar.get("test_adc").unwrap());
        assert_eq!(adc.case_timeout, Duration::from_secs(45));
        assert!(!adc.reset);
        assert_eq!(adc.group.as_deref(), Some("adc"));
        assert_eq!(adc.ready_timeout, Duration::from_secs(30));
    }

    #[test]
    fn unknown_target_is_an_acquisition_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut factory = ConfiguredDeviceFactory::new(TargetsFile::default(), quick());
        let err = factory
            .acquire(&invocation("esp32"), &dac_case(dir.path()))
            .err()
            .unwrap();
        assert!(matches!(err, DutError::Acquisition(msg) if msg.contains("esp32")));
    }

    #[test]
    fn missing_build_dir_fails_before_flashing() {
        let dir = tempfile::tempdir().unwrap();
        let targets: TargetsFile = toml::from_str(
            r#"
[targets.linux]
testing_type = "process"
flash_command = "touch {build_dir}/flashed"
[targets.linux.process]
command = "echo 'Press ENTER to see the list of tests.'; sleep 1"
"#,
        )
        .unwrap();
        let mut factory = ConfiguredDeviceFactory::new(targets, quick());
        let err = factory
            .acquire(&invocation("linux"), &dac_case(dir.path()))
            .err()
            .unwrap();
        assert!(err.to_string().contains("build directory not found"));
    }

    #[test]
    fn flashes_then_waits_for_banner() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("build_linux_release")).unwrap();
        let targets: TargetsFile = toml::from_str(
            r#"
[targets.linux]
testing_type = "process"
flash_command = "touch {build_dir}/flashed"
[targets.linux.process]
command = "cat {build_dir}/flashed && echo 'Press ENTER to see the list of tests.'; sleep 1"
"#,
        )
        .unwrap();
        let mut factory = ConfiguredDeviceFactory::new(targets, quick());
        let handle = factory
            .acquire(&invocation("linux"), &dac_case(dir.path()))
            .unwrap();
        assert!(dir.path().join("build_linux_release/flashed").exists());
        assert!(handle.describe().starts_with("process:"));
    }

    #[test]
    fn failing_flash_command_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("build_linux_release")).unwrap();
        let targets: TargetsFile = toml::from_str(
            r#"
[targets.linux]
testing_type = "process"
flash_command = "echo 'no serial port' >&2; exit 2"
[targets.linux.process]
command = "true"
"#,
        )
        .unwrap();
        let mut factory = ConfiguredDeviceFactory::new(targets, quick());
        let err = factory
            .acquire(&invocation("linux"), &dac_case(dir.path()))
            .err()
            .unwrap();
        assert!(err.to_string().contains("no serial port"));
    }
}
