//! Case manifests.
//!
//! A manifest declares one or more test cases the way a board test app
//! declares its pytest entry: a name, a marker, the build configurations and
//! the targets it supports. Manifests are TOML (`*.suite.toml`) or YAML
//! (`*.suite.yaml` / `*.suite.yml`).
//!
//! ```toml
//! [[case]]
//! name = "test_dac"
//! marker = "generic"
//! configurations = ["iram_safe", "release"]
//! targets = ["esp32", "esp32s2"]
//! ```

use anyhow::{Result, bail};
use log::{debug, info};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::executor_config::ExecutorConfig;
use crate::utils;

fn default_marker() -> String {
    "generic".to_string()
}

/// One `[[case]]` entry of a manifest.
#[derive(Debug, Clone, Deserialize)]
pub struct CaseDeclaration {
    pub name: String,
    #[serde(default = "default_marker")]
    pub marker: String,
    pub configurations: Vec<String>,
    pub targets: Vec<String>,
    /// Directory holding `build_<target>_<config>`, relative to the manifest
    #[serde(default)]
    pub app_path: Option<PathBuf>,
    #[serde(with = "humantime_serde", default)]
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub reset: Option<bool>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub run_ignore_cases: Option<bool>,
}

impl CaseDeclaration {
    /// Per-case executor overrides declared in the manifest.
    pub fn executor_overrides(&self) -> ExecutorConfig {
        ExecutorConfig {
            case_timeout: self.timeout,
            reset: self.reset,
            group: self.group.clone(),
            run_ignore_cases: self.run_ignore_cases,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SuiteManifest {
    #[serde(default, rename = "case")]
    pub cases: Vec<CaseDeclaration>,
}

impl SuiteManifest {
    /// Loads a manifest, picking the format from the file extension.
    pub fn from_file(path: &Path) -> Result<Self> {
        let mut manifest: SuiteManifest = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => utils::read_toml_from_file(path)?,
            Some("yaml") | Some("yml") => utils::read_yaml_from_file(path)?,
            other => bail!(
                "Unsupported manifest format {:?}: {}",
                other.unwrap_or(""),
                path.display()
            ),
        };

        // app_path is relative to the manifest's own directory
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        for case in &mut manifest.cases {
            let resolved = match case.app_path.take() {
                Some(app_path) if app_path.is_relative() => base.join(app_path),
                Some(app_path) => app_path,
                None => base.to_path_buf(),
            };
            case.app_path = Some(resolved);
        }
        debug!("Loaded {} case(s) from {}", manifest.cases.len(), path.display());
        Ok(manifest)
    }
}

fn is_manifest_file(path: &Path) -> bool {
    let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
    name.ends_with(".suite.toml") || name.ends_with(".suite.yaml") || name.ends_with(".suite.yml")
}

/// Finds manifest files under `dir`.
///
/// Results are sorted so discovery order (and therefore run order) does not
/// depend on the filesystem.
pub fn discover_manifests<P: AsRef<Path>>(dir: P, recursive: bool) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    let mut manifests = Vec::new();

    if !dir.is_dir() {
        bail!("Suite directory does not exist or is not a directory: {}", dir.display());
    }

    walk_directory(dir, &mut manifests, recursive)?;
    manifests.sort();

    info!("Found {} manifest(s) under {}", manifests.len(), dir.display());
    Ok(manifests)
}

fn walk_directory(dir: &Path, manifests: &mut Vec<PathBuf>, recursive: bool) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            // build output never holds manifests
            let skip = path
                .file_name()
                .map(|n| {
                    let n = n.to_string_lossy();
                    n == "build" || n.starts_with("build_")
                })
                .unwrap_or(false);
            if recursive && !skip {
                walk_directory(&path, manifests, recursive)?;
            }
        } else if path.is_file() && is_manifest_file(&path) {
            manifests.push(path);
        }
    }
    Ok(())
}
