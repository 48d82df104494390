//! Utility helpers shared across dutrunner.
//!
//! File loading for the TOML/YAML configuration formats and placeholder
//! expansion for command templates.

use anyhow::{Context, Result};
use log::{error, warn};
use regex::Regex;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$?\{([a-z_]+)\}").unwrap());

/// Reads a TOML file into an arbitrary struct.
///
/// # Errors
///
/// Returns an error if the file cannot be read or data parsing fails.
pub fn read_toml_from_file<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned,
{
    let content = fs::read_to_string(path)
        .with_context(|| format!("Unable to read file: {}", path.display()))?;
    match toml::de::from_str(&content) {
        Ok(value) => Ok(value),
        Err(e) => {
            error!("Failed to parse TOML file {}: {e}", path.display());
            Err(e).with_context(|| format!("Invalid TOML in {}", path.display()))
        }
    }
}

/// Reads a YAML file into an arbitrary struct.
pub fn read_yaml_from_file<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned,
{
    let content = fs::read_to_string(path)
        .with_context(|| format!("Unable to read file: {}", path.display()))?;
    match serde_yaml::from_str(&content) {
        Ok(value) => Ok(value),
        Err(e) => {
            error!("Failed to parse YAML file {}: {e}", path.display());
            Err(e).with_context(|| format!("Invalid YAML in {}", path.display()))
        }
    }
}

/// Expands `{name}` placeholders in a command template.
///
/// Unknown placeholders are left untouched and reported once with a warning,
/// so a typo in a flash command shows up in the log instead of silently
/// producing an empty argument.
pub fn render_placeholders(template: &str, vars: &BTreeMap<&str, String>) -> String {
    let mut rendered = template.to_string();
    for (name, value) in vars {
        rendered = rendered.replace(&format!("{{{name}}}"), value);
    }
    let unresolved = unresolved_placeholders(&rendered);
    if !unresolved.is_empty() {
        warn!("Unresolved placeholder(s) {unresolved:?} left in command: {rendered}");
    }
    rendered
}

/// `{name}` placeholders still present in `command`. Shell `${VAR}`
/// expansions are not placeholders.
pub fn unresolved_placeholders(command: &str) -> Vec<&str> {
    PLACEHOLDER
        .captures_iter(command)
        .filter(|caps| !caps[0].starts_with('$'))
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect()
}

/// Drops duplicates while keeping the first occurrence order.
///
/// Returns the de-duplicated list and the entries that were dropped.
pub fn dedup_ordered(items: Vec<String>) -> (Vec<String>, Vec<String>) {
    let mut kept: Vec<String> = Vec::with_capacity(items.len());
    let mut dropped = Vec::new();
    for item in items {
        let item = item.trim().to_string();
        if kept.contains(&item) {
            dropped.push(item);
        } else {
            kept.push(item);
        }
    }
    (kept, dropped)
}
