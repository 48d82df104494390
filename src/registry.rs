//! Test case registration.
//!
//! A [`TestCase`] ties a name and a marker to the build configurations and
//! targets it supports, plus the body that runs against a connected board.
//! The [`Registrar`] collects cases so the selection layer can build a run
//! plan from them.

use anyhow::{Context, Result, bail};
use log::{debug, info, warn};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::executor_config::ExecutorConfig;
use crate::config::suite_config::{CaseDeclaration, SuiteManifest};
use crate::dut::{CaseSummary, DeviceHandle, DutError};
use crate::utils;

/// Body of a test case: receives the board acquired for one
/// (configuration, target) combination.
pub type CaseBody =
    Arc<dyn Fn(&mut dyn DeviceHandle) -> Result<CaseSummary, DutError> + Send + Sync>;

/// The standard body: run every single-board case on the board.
pub fn single_board_body() -> CaseBody {
    Arc::new(|dut: &mut dyn DeviceHandle| dut.run_all_single_board_cases())
}

const DEFAULT_BUILD_DIR_PATTERN: &str = "build_{target}_{config}";

/// A registered test case. Immutable once built.
#[derive(Clone)]
pub struct TestCase {
    name: String,
    marker: String,
    configurations: Vec<String>,
    targets: Vec<String>,
    app_path: Option<PathBuf>,
    overrides: ExecutorConfig,
    body: CaseBody,
}

impl fmt::Debug for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestCase")
            .field("name", &self.name)
            .field("marker", &self.marker)
            .field("configurations", &self.configurations)
            .field("targets", &self.targets)
            .field("app_path", &self.app_path)
            .finish_non_exhaustive()
    }
}

impl TestCase {
    pub fn builder(name: impl Into<String>) -> TestCaseBuilder {
        TestCaseBuilder {
            name: name.into(),
            marker: "generic".to_string(),
            configurations: Vec::new(),
            targets: Vec::new(),
            app_path: None,
            overrides: ExecutorConfig::default(),
            body: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    pub fn configurations(&self) -> &[String] {
        &self.configurations
    }

    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    pub fn app_path(&self) -> Option<&Path> {
        self.app_path.as_deref()
    }

    pub fn overrides(&self) -> &ExecutorConfig {
        &self.overrides
    }

    /// Every (configuration, target) pair, configuration-major.
    pub fn matrix(&self) -> Vec<(String, String)> {
        self.configurations
            .iter()
            .flat_map(|c| self.targets.iter().map(move |t| (c.clone(), t.clone())))
            .collect()
    }

    /// Directory holding the build for `target` in `config`.
    pub fn build_dir(&self, target: &str, config: &str, pattern: Option<&str>) -> PathBuf {
        let pattern = pattern.unwrap_or(DEFAULT_BUILD_DIR_PATTERN);
        let dir_name = pattern.replace("{target}", target).replace("{config}", config);
        match &self.app_path {
            Some(app_path) => app_path.join(dir_name),
            None => PathBuf::from(dir_name),
        }
    }

    /// Runs the body against an acquired board.
    pub fn execute(&self, dut: &mut dyn DeviceHandle) -> Result<CaseSummary, DutError> {
        (self.body)(dut)
    }
}

/// Builder validating a [`TestCase`].
pub struct TestCaseBuilder {
    name: String,
    marker: String,
    configurations: Vec<String>,
    targets: Vec<String>,
    app_path: Option<PathBuf>,
    overrides: ExecutorConfig,
    body: Option<CaseBody>,
}

impl TestCaseBuilder {
    pub fn marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = marker.into();
        self
    }

    pub fn configurations<I, S>(mut self, configurations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.configurations = configurations.into_iter().map(Into::into).collect();
        self
    }

    pub fn targets<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.targets = targets.into_iter().map(Into::into).collect();
        self
    }

    pub fn app_path(mut self, app_path: impl Into<PathBuf>) -> Self {
        self.app_path = Some(app_path.into());
        self
    }

    pub fn overrides(mut self, overrides: ExecutorConfig) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn body<F>(mut self, body: F) -> Self
    where
        F: Fn(&mut dyn DeviceHandle) -> Result<CaseSummary, DutError> + Send + Sync + 'static,
    {
        self.body = Some(Arc::new(body));
        self
    }

    pub fn build(self) -> Result<TestCase> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            bail!("Test case name must not be empty");
        }
        let marker = self.marker.trim().to_string();
        if marker.is_empty() {
            bail!("Test case '{name}' has an empty marker");
        }
        let configurations = Self::label_set(&name, "configuration", self.configurations)?;
        let targets = Self::label_set(&name, "target", self.targets)?;

        Ok(TestCase {
            name,
            marker,
            configurations,
            targets,
            app_path: self.app_path,
            overrides: self.overrides,
            body: self.body.unwrap_or_else(single_board_body),
        })
    }

    fn label_set(name: &str, kind: &str, labels: Vec<String>) -> Result<Vec<String>> {
        if labels.iter().any(|l| l.trim().is_empty()) {
            bail!("Test case '{name}' declares an empty {kind} label");
        }
        let (kept, dropped) = utils::dedup_ordered(labels);
        if kept.is_empty() {
            bail!("Test case '{name}' must declare at least one {kind}");
        }
        if !dropped.is_empty() {
            warn!("Test case '{name}': dropped duplicate {kind}(s) {dropped:?}");
        }
        Ok(kept)
    }
}

/// Collection of registered test cases, in registration order.
#[derive(Debug, Default, Clone)]
pub struct Registrar {
    cases: Vec<TestCase>,
}

impl Registrar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a case under `name`.
    ///
    /// # Errors
    ///
    /// Fails when the name is empty or already registered, or when
    /// `configurations` or `targets` is empty.
    pub fn register<C, T, S, F>(
        &mut self,
        name: &str,
        marker: &str,
        configurations: C,
        targets: T,
        body: F,
    ) -> Result<()>
    where
        C: IntoIterator<Item = S>,
        T: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&mut dyn DeviceHandle) -> Result<CaseSummary, DutError> + Send + Sync + 'static,
    {
        let case = TestCase::builder(name)
            .marker(marker)
            .configurations(configurations)
            .targets(targets)
            .body(body)
            .build()?;
        self.register_case(case)
    }

    pub fn register_case(&mut self, case: TestCase) -> Result<()> {
        if self.get(case.name()).is_some() {
            bail!("Test case '{}' is already registered", case.name());
        }
        debug!(
            "Registered {} [{}] configs={:?} targets={:?}",
            case.name(),
            case.marker(),
            case.configurations(),
            case.targets()
        );
        self.cases.push(case);
        Ok(())
    }

    /// Registers one manifest entry with the standard single-board body.
    pub fn register_declaration(&mut self, declaration: &CaseDeclaration) -> Result<()> {
        let mut builder = TestCase::builder(&declaration.name)
            .marker(&declaration.marker)
            .configurations(declaration.configurations.iter().cloned())
            .targets(declaration.targets.iter().cloned())
            .overrides(declaration.executor_overrides());
        if let Some(app_path) = &declaration.app_path {
            builder = builder.app_path(app_path);
        }
        self.register_case(builder.build()?)
    }

    /// Builds a registrar from manifest files.
    pub fn from_manifests<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut registrar = Self::new();
        for path in paths {
            let path = path.as_ref();
            let manifest = SuiteManifest::from_file(path)?;
            for declaration in &manifest.cases {
                registrar
                    .register_declaration(declaration)
                    .with_context(|| format!("In manifest {}", path.display()))?;
            }
        }
        info!("Registered {} test case(s)", registrar.len());
        Ok(registrar)
    }

    pub fn get(&self, name: &str) -> Option<&TestCase> {
        self.cases.iter().find(|c| c.name == name)
    }

    pub fn cases(&self) -> &[TestCase] {
        &self.cases
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dut::MockDeviceHandle;

    fn noop(_: &mut dyn DeviceHandle) -> Result<CaseSummary, DutError> {
        Ok(CaseSummary::default())
    }

    #[test]
    fn register_rejects_empty_sets_and_names() {
        let mut registrar = Registrar::new();
        let none: [&str; 0] = [];
        assert!(registrar.register("test_dac", "generic", none, ["esp32"], noop).is_err());
        assert!(registrar.register("test_dac", "generic", ["release"], none, noop).is_err());
        assert!(registrar.register("  ", "generic", ["release"], ["esp32"], noop).is_err());
        assert!(registrar.register("test_dac", "generic", ["release", ""], ["esp32"], noop).is_err());
        assert!(registrar.is_empty());
    }

    #[test]
    fn register_rejects_duplicate_names() {
        let mut registrar = Registrar::new();
        registrar
            .register("test_dac", "generic", ["release"], ["esp32"], noop)
            .unwrap();
        let err = registrar
            .register("test_dac", "generic", ["iram_safe"], ["esp32s2"], noop)
            .unwrap_err();
        assert!(err.to_string().contains("already registered"));
        assert_eq!(registrar.len(), 1);
    }

    #[test]
    fn duplicate_labels_are_dropped_in_order() {
        let case = TestCase::builder("test_parlio")
            .configurations(["iram_safe", "release", "iram_safe"])
            .targets(["esp32c6", "esp32h2", "esp32c6"])
            .build()
            .unwrap();
        assert_eq!(case.configurations(), ["iram_safe", "release"]);
        assert_eq!(case.targets(), ["esp32c6", "esp32h2"]);
        assert_eq!(case.marker(), "generic");
    }

    #[test]
    fn matrix_is_the_full_cross_product() {
        let case = TestCase::builder("test_dac")
            .configurations(["iram_safe", "release"])
            .targets(["esp32", "esp32s2"])
            .build()
            .unwrap();
        assert_eq!(
            case.matrix(),
            vec![
                ("iram_safe".to_string(), "esp32".to_string()),
                ("iram_safe".to_string(), "esp32s2".to_string()),
                ("release".to_string(), "esp32".to_string()),
                ("release".to_string(), "esp32s2".to_string()),
            ]
        );
    }

    #[test]
    fn build_dir_follows_pattern() {
        let case = TestCase::builder("test_dac")
            .configurations(["release"])
            .targets(["esp32"])
            .app_path("components/dac/test_apps")
            .build()
            .unwrap();
        assert_eq!(
            case.build_dir("esp32", "release", None),
            PathBuf::from("components/dac/test_apps/build_esp32_release")
        );
        assert_eq!(
            case.build_dir("esp32", "release", Some("out/{config}/{target}")),
            PathBuf::from("components/dac/test_apps/out/release/esp32")
        );
    }

    #[test]
    fn default_body_delegates_to_the_handle() {
        let case = TestCase::builder("test_dac")
            .configurations(["release"])
            .targets(["esp32"])
            .build()
            .unwrap();
        let mut dut = MockDeviceHandle::new();
        dut.expect_run_all_single_board_cases()
            .times(1)
            .returning(|| Ok(CaseSummary::default()));
        assert!(case.execute(&mut dut).unwrap().passed());
    }

    #[test]
    fn manifests_register_every_case() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drivers.suite.toml");
        std::fs::write(
            &path,
            r#"
[[case]]
name = "test_dac"
configurations = ["iram_safe", "release"]
targets = ["esp32", "esp32s2"]

[[case]]
name = "test_legacy_i2s"
configurations = ["release"]
targets = ["esp32", "esp32s2", "esp32c3"]
reset = true
"#,
        )
        .unwrap();

        let registrar = Registrar::from_manifests(&[&path]).unwrap();
        assert_eq!(registrar.len(), 2);
        let i2s = registrar.get("test_legacy_i2s").unwrap();
        assert_eq!(i2s.overrides().reset, Some(true));
        assert_eq!(i2s.app_path(), Some(dir.path()));
    }

    #[test]
    fn duplicate_names_across_manifests_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let body = "[[case]]\nname = \"test_dac\"\nconfigurations = [\"release\"]\ntargets = [\"esp32\"]\n";
        let a = dir.path().join("a.suite.toml");
        let b = dir.path().join("b.suite.toml");
        std::fs::write(&a, body).unwrap();
        std::fs::write(&b, body).unwrap();
        let err = Registrar::from_manifests(&[a, b]).unwrap_err();
        assert!(format!("{err:#}").contains("already registered"));
    }
}
