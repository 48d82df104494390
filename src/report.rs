//! Run reports.
//!
//! A [`RunReport`] collects every invocation result of a run. It is written
//! as `report.json` for machines and `summary.md` for people.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use log::info;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use crate::dut::SubCaseStatus;
use crate::runner::{InvocationResult, Outcome};
use crate::selection::SkippedCase;

pub const JSON_REPORT: &str = "report.json";
pub const MARKDOWN_SUMMARY: &str = "summary.md";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub results: Vec<InvocationResult>,
    pub skipped: Vec<SkippedCase>,
}

/// Per-outcome counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Totals {
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    pub not_run: usize,
    pub skipped: usize,
}

impl RunReport {
    pub fn new(
        started_at: DateTime<Local>,
        results: Vec<InvocationResult>,
        skipped: Vec<SkippedCase>,
    ) -> Self {
        Self {
            started_at,
            finished_at: Local::now(),
            results,
            skipped,
        }
    }

    /// True when every executed invocation passed. Skipped cases do not count.
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.outcome.is_passed())
    }

    pub fn totals(&self) -> Totals {
        let mut totals = Totals {
            skipped: self.skipped.len(),
            ..Default::default()
        };
        for result in &self.results {
            match result.outcome {
                Outcome::Passed => totals.passed += 1,
                Outcome::Failed => totals.failed += 1,
                Outcome::Error(_) => totals.errors += 1,
                Outcome::NotRun => totals.not_run += 1,
            }
        }
        totals
    }

    /// Writes `report.json` and `summary.md` into `dir`.
    pub fn write_to_dir(&self, dir: &Path) -> Result<(PathBuf, PathBuf)> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Unable to create reports directory: {}", dir.display()))?;

        let json_path = dir.join(JSON_REPORT);
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&json_path, json)
            .with_context(|| format!("Unable to write report: {}", json_path.display()))?;

        let md_path = dir.join(MARKDOWN_SUMMARY);
        fs::write(&md_path, self.to_markdown())
            .with_context(|| format!("Unable to write summary: {}", md_path.display()))?;

        info!("Reports written to {}", dir.display());
        Ok((json_path, md_path))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Unable to read report: {}", path.display()))?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn to_markdown(&self) -> String {
        let totals = self.totals();
        let mut md = String::new();

        let _ = writeln!(md, "# Test Summary\n");
        let _ = writeln!(
            md,
            "Run started {} and finished {}.\n",
            self.started_at.format("%Y-%m-%d %H:%M:%S"),
            self.finished_at.format("%Y-%m-%d %H:%M:%S")
        );
        let _ = writeln!(
            md,
            "**{} passed, {} failed, {} errors, {} not run, {} skipped**\n",
            totals.passed, totals.failed, totals.errors, totals.not_run, totals.skipped
        );

        md.push_str("| Case | Config | Target | Result | Sub-cases (pass/fail/ignore) | Duration |\n");
        md.push_str("|---|---|---|---|---|---|\n");
        for result in &self.results {
            let counts = result
                .summary
                .as_ref()
                .map(|s| {
                    format!(
                        "{}/{}/{}",
                        s.count(SubCaseStatus::Pass),
                        s.count(SubCaseStatus::Fail) + s.count(SubCaseStatus::NotRun),
                        s.count(SubCaseStatus::Ignore)
                    )
                })
                .unwrap_or_else(|| "-".to_string());
            let _ = writeln!(
                md,
                "| {} | {} | {} | {} | {} | {:.1}s |",
                result.invocation.case,
                result.invocation.configuration,
                result.invocation.target,
                outcome_cell(&result.outcome),
                counts,
                result.duration.as_secs_f64()
            );
        }

        let problems: Vec<&InvocationResult> =
            self.results.iter().filter(|r| !r.outcome.is_passed()).collect();
        if !problems.is_empty() {
            md.push_str("\n## Failures\n");
            for result in problems {
                let _ = writeln!(md, "\n### {}\n", result.invocation);
                if let Outcome::Error(reason) = &result.outcome {
                    let _ = writeln!(md, "- error: {}", escape_cell(reason));
                }
                if let Some(summary) = &result.summary {
                    for sub in summary.failures() {
                        let _ = writeln!(
                            md,
                            "- ({}) {}: {}",
                            sub.index,
                            sub.name,
                            sub.message.as_deref().map(escape_cell).unwrap_or_default()
                        );
                    }
                }
                if result.outcome == Outcome::NotRun {
                    md.push_str("- not run\n");
                }
            }
        }

        if !self.skipped.is_empty() {
            md.push_str("\n## Skipped\n\n");
            for skipped in &self.skipped {
                let _ = writeln!(md, "- {}: {}", skipped.case, skipped.reason);
            }
        }
        md
    }
}

fn outcome_cell(outcome: &Outcome) -> &'static str {
    match outcome {
        Outcome::Passed => "✅ Pass",
        Outcome::Failed => "❌ Fail",
        Outcome::Error(_) => "⚠️ Error",
        Outcome::NotRun => "❓ Not Run",
    }
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}
