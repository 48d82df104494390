//! Run plan selection.
//!
//! Turns the registered cases and the requested marker / name /
//! configuration / target filters into the list of invocations to execute.
//! Cases that do not match are recorded as skipped, never as failed.

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::registry::Registrar;

/// Requested filters. An empty set leaves that dimension unfiltered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionFilter {
    pub markers: BTreeSet<String>,
    pub names: BTreeSet<String>,
    pub configurations: BTreeSet<String>,
    pub targets: BTreeSet<String>,
}

impl SelectionFilter {
    pub fn with_markers<I: IntoIterator<Item = String>>(mut self, markers: I) -> Self {
        self.markers.extend(markers);
        self
    }

    pub fn with_names<I: IntoIterator<Item = String>>(mut self, names: I) -> Self {
        self.names.extend(names);
        self
    }

    pub fn with_configurations<I: IntoIterator<Item = String>>(mut self, configurations: I) -> Self {
        self.configurations.extend(configurations);
        self
    }

    pub fn with_targets<I: IntoIterator<Item = String>>(mut self, targets: I) -> Self {
        self.targets.extend(targets);
        self
    }
}

fn allowed(filter: &BTreeSet<String>, value: &str) -> bool {
    filter.is_empty() || filter.contains(value)
}

/// One cell of a case's execution matrix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Invocation {
    pub case: String,
    pub configuration: String,
    pub target: String,
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.target, self.configuration, self.case)
    }
}

/// A case left out of the run and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedCase {
    pub case: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunPlan {
    pub invocations: Vec<Invocation>,
    pub skipped: Vec<SkippedCase>,
}

impl RunPlan {
    pub fn is_empty(&self) -> bool {
        self.invocations.is_empty()
    }
}

/// Builds the run plan for `registrar` under `filter`.
///
/// Each selected case contributes the cross product of its declared
/// configurations and targets intersected with the requested ones, in
/// declaration order (configuration-major).
pub fn plan(registrar: &Registrar, filter: &SelectionFilter) -> RunPlan {
    let mut run_plan = RunPlan::default();

    for case in registrar.cases() {
        let skip = |reason: String| SkippedCase {
            case: case.name().to_string(),
            reason,
        };

        if !allowed(&filter.names, case.name()) {
            run_plan.skipped.push(skip("name not selected".to_string()));
            continue;
        }
        if !allowed(&filter.markers, case.marker()) {
            run_plan
                .skipped
                .push(skip(format!("marker '{}' not selected", case.marker())));
            continue;
        }

        let configurations: Vec<&String> = case
            .configurations()
            .iter()
            .filter(|c| allowed(&filter.configurations, c))
            .collect();
        if configurations.is_empty() {
            run_plan.skipped.push(skip(format!(
                "no requested configuration among {:?}",
                case.configurations()
            )));
            continue;
        }

        let targets: Vec<&String> = case
            .targets()
            .iter()
            .filter(|t| allowed(&filter.targets, t))
            .collect();
        if targets.is_empty() {
            run_plan.skipped.push(skip(format!(
                "no requested target among {:?}",
                case.targets()
            )));
            continue;
        }

        for configuration in &configurations {
            for target in &targets {
                run_plan.invocations.push(Invocation {
                    case: case.name().to_string(),
                    configuration: (*configuration).clone(),
                    target: (*target).clone(),
                });
            }
        }
        debug!(
            "{}: {} configuration(s) x {} target(s)",
            case.name(),
            configurations.len(),
            targets.len()
        );
    }

    info!(
        "Run plan: {} invocation(s), {} case(s) skipped",
        run_plan.invocations.len(),
        run_plan.skipped.len()
    );
    run_plan
}
