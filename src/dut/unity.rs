//! Unity test menu driver.
//!
//! Board test apps built on Unity print a numbered menu of their test cases
//! and run one when its number is written to the console:
//!
//! ```text
//! Press ENTER to see the list of tests.
//!
//! Here's the test menu, pick your combo:
//! (1)     "DAC output voltage" [dac]
//! (2)     "DAC DMA write" [dac][timeout=60]
//! (3)     "DAC wakes from light sleep" [dac][multi_stage]
//!         (1)     "prepare"
//!         (2)     "check"
//! (4)     "DAC sync with peer" [dac][multi_device]
//!         (1)     "master"
//!         (2)     "slave"
//!
//! Enter test for running.
//! ```
//!
//! [`UnityDut`] implements [`DeviceHandle`] on top of that protocol.

use log::{debug, info, warn};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use crate::config::executor_config::ExecutorOptions;
use crate::connection::ConsoleConnection;
use crate::dut::console::Console;
use crate::dut::{CaseSummary, DeviceHandle, DutError, SubCaseResult, SubCaseStatus};

static READY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Press ENTER to see the list of tests").unwrap());
static MENU_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Enter test for running\.").unwrap());
static MENU_ENTRY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\((\d+)\)\s+"(.+)"\s*(.*)$"#).unwrap());
static STAGE_ENTRY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\s+\((\d+)\)\s+"(.+)"\s*$"#).unwrap());
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[([^\]]+)\]").unwrap());
static SUMMARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+) Tests (\d+) Failures (\d+) Ignored").unwrap());
static CRASH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(Guru Meditation Error[^\r\n]*|abort\(\) was called[^\r\n]*|\*\*\*ERROR\*\*\* A stack overflow[^\r\n]*|Stack smashing protect failure[^\r\n]*|Rebooting\.\.\.)",
    )
    .unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnityCaseKind {
    Normal,
    MultiStage,
    MultiDevice,
}

/// One entry of the Unity menu.
#[derive(Debug, Clone, PartialEq)]
pub struct UnityCase {
    pub index: u32,
    pub name: String,
    /// Plain tags such as `dac` or `ignore`
    pub tags: Vec<String>,
    /// `key=value` tags such as `timeout=60`
    pub attributes: BTreeMap<String, String>,
    pub kind: UnityCaseKind,
    /// Stage (or device) names for multi-stage and multi-device cases
    pub stages: Vec<String>,
}

impl UnityCase {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    pub fn is_ignored(&self) -> bool {
        self.has_tag("ignore")
    }

    /// Timeout requested by a `[timeout=N]` tag, in seconds.
    pub fn timeout(&self) -> Option<Duration> {
        self.attributes
            .get("timeout")
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
    }
}

/// Parses the text of a Unity test menu.
pub fn parse_menu(text: &str) -> Vec<UnityCase> {
    let mut cases: Vec<UnityCase> = Vec::new();
    for line in text.lines().map(|l| l.trim_end_matches('\r')) {
        if let Some(caps) = MENU_ENTRY.captures(line) {
            let Ok(index) = caps[1].parse::<u32>() else {
                continue;
            };
            let mut tags = Vec::new();
            let mut attributes = BTreeMap::new();
            for tag in TAG.captures_iter(&caps[3]) {
                match tag[1].split_once('=') {
                    Some((key, value)) => {
                        attributes.insert(key.trim().to_string(), value.trim().to_string());
                    }
                    None => tags.push(tag[1].trim().to_string()),
                }
            }
            let kind = if tags.iter().any(|t| t == "multi_device") {
                UnityCaseKind::MultiDevice
            } else if tags.iter().any(|t| t == "multi_stage") {
                UnityCaseKind::MultiStage
            } else {
                UnityCaseKind::Normal
            };
            cases.push(UnityCase {
                index,
                name: caps[2].to_string(),
                tags,
                attributes,
                kind,
                stages: Vec::new(),
            });
        } else if let Some(caps) = STAGE_ENTRY.captures(line) {
            if let Some(case) = cases.last_mut() {
                case.stages.push(caps[2].to_string());
                // untagged entries with a sub-menu are multi-stage
                if case.kind == UnityCaseKind::Normal {
                    case.kind = UnityCaseKind::MultiStage;
                }
            }
        }
    }
    cases
}

/// Picks the cases `run_all_single_board_cases` should run.
///
/// Multi-device cases need more than one board and are never selected.
pub fn select_cases(menu: &[UnityCase], options: &ExecutorOptions) -> Vec<UnityCase> {
    menu.iter()
        .filter(|c| c.kind != UnityCaseKind::MultiDevice)
        .filter(|c| options.run_ignore_cases || !c.is_ignored())
        .filter(|c| options.group.as_deref().is_none_or(|g| c.has_tag(g)))
        .cloned()
        .collect()
}

/// Result of running one sub-case, plus whether the board needs a reset
/// before the next one.
struct Attempt {
    result: SubCaseResult,
    board_dirty: bool,
}

/// Board running a Unity test app.
pub struct UnityDut {
    console: Console,
    options: ExecutorOptions,
    label: String,
    menu: Option<Vec<UnityCase>>,
}

impl UnityDut {
    pub fn new(connection: Box<dyn ConsoleConnection>, options: ExecutorOptions, label: String) -> Self {
        Self {
            console: Console::new(connection),
            options,
            label,
            menu: None,
        }
    }

    /// Waits for the boot banner.
    pub fn wait_ready(&mut self) -> Result<(), DutError> {
        self.console
            .expect(&READY, self.options.ready_timeout, "Unity ready banner")?;
        debug!("[{}] board is ready", self.label);
        Ok(())
    }

    /// Requests and parses the test menu, once per handle.
    pub fn menu(&mut self) -> Result<Vec<UnityCase>, DutError> {
        if let Some(menu) = &self.menu {
            return Ok(menu.clone());
        }
        self.console.clear()?;
        self.console.write_line("")?;
        let found = self
            .console
            .expect(&MENU_END, self.options.ready_timeout, "Unity test menu")?;
        let menu = parse_menu(&found.before);
        if menu.is_empty() {
            return Err(DutError::Protocol(format!(
                "[{}] test menu lists no cases",
                self.label
            )));
        }
        debug!("[{}] menu lists {} case(s)", self.label, menu.len());
        self.menu = Some(menu.clone());
        Ok(menu)
    }

    fn reset_board(&mut self) -> Result<(), DutError> {
        self.console.reset()?;
        self.wait_ready()
    }

    fn case_timeout(&self, case: &UnityCase) -> Duration {
        case.timeout().unwrap_or(self.options.case_timeout)
    }

    fn finish(case: &UnityCase, started: Instant, status: SubCaseStatus, message: Option<String>) -> SubCaseResult {
        SubCaseResult {
            index: case.index,
            name: case.name.clone(),
            status,
            message,
            duration: started.elapsed(),
        }
    }

    /// Reads the `N Tests N Failures N Ignored` block that ends a case.
    fn classify(case: &UnityCase, before: &str, failures: u32, ignored: u32) -> (SubCaseStatus, Option<String>) {
        let line = Regex::new(&format!(
            r":{}:(PASS|FAIL|IGNORE)(?::[ \t]*([^\r\n]*))?",
            regex::escape(&case.name)
        ))
        .ok()
        .and_then(|re| re.captures(before).map(|c| (c[1].to_string(), c.get(2).map(|m| m.as_str().to_string()))));

        let message = line.as_ref().and_then(|(_, m)| m.clone()).filter(|m| !m.is_empty());
        if failures > 0 || matches!(&line, Some((s, _)) if s == "FAIL") {
            (SubCaseStatus::Fail, message.or_else(|| Some("Unity reported a failure".to_string())))
        } else if ignored > 0 || matches!(&line, Some((s, _)) if s == "IGNORE") {
            (SubCaseStatus::Ignore, message)
        } else {
            (SubCaseStatus::Pass, None)
        }
    }

    fn summary_counts(found: &crate::dut::ExpectMatch) -> (u32, u32) {
        let failures = found.group(2).and_then(|v| v.parse().ok()).unwrap_or(0);
        let ignored = found.group(3).and_then(|v| v.parse().ok()).unwrap_or(0);
        (failures, ignored)
    }

    fn run_normal_case(&mut self, case: &UnityCase) -> Result<Attempt, DutError> {
        let started = Instant::now();
        let timeout = self.case_timeout(case);
        self.console.clear()?;
        self.console.write_line(&case.index.to_string())?;

        match self
            .console
            .expect_any(&[&*SUMMARY, &*CRASH], timeout, &format!("result of \"{}\"", case.name))
        {
            Ok(found) if found.pattern == 0 => {
                let (failures, ignored) = Self::summary_counts(&found);
                let (status, message) = Self::classify(case, &found.before, failures, ignored);
                Ok(Attempt {
                    result: Self::finish(case, started, status, message),
                    board_dirty: false,
                })
            }
            Ok(found) => {
                let crash = found.group(1).unwrap_or("crash").trim().to_string();
                warn!("[{}] \"{}\" crashed: {crash}", self.label, case.name);
                Ok(Attempt {
                    result: Self::finish(case, started, SubCaseStatus::Fail, Some(format!("board crashed: {crash}"))),
                    board_dirty: true,
                })
            }
            Err(DutError::Timeout { timeout, .. }) => {
                warn!("[{}] \"{}\" timed out after {timeout:?}", self.label, case.name);
                Ok(Attempt {
                    result: Self::finish(case, started, SubCaseStatus::Fail, Some(format!("timed out after {timeout:?}"))),
                    board_dirty: true,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Runs a multi-stage case: each stage is started from the menu and all
    /// but the last are expected to restart the board.
    fn run_multi_stage_case(&mut self, case: &UnityCase) -> Result<Attempt, DutError> {
        let started = Instant::now();
        let timeout = self.case_timeout(case);
        let stage_count = case.stages.len().max(1);

        for stage in 1..=stage_count {
            let last = stage == stage_count;
            self.console.clear()?;
            self.console.write_line(&case.index.to_string())?;
            if !case.stages.is_empty() {
                // wait for the stage sub-menu before choosing a stage
                let stage_menu = Regex::new(&format!(
                    r#"\({}\)\s+"{}""#,
                    stage_count,
                    regex::escape(&case.stages[stage_count - 1])
                ))
                .map_err(|e| DutError::Protocol(e.to_string()))?;
                if let Err(e) = self.console.expect(&stage_menu, timeout, "stage menu") {
                    return Self::stage_failure(case, started, stage, e);
                }
                self.console.write_line(&stage.to_string())?;
            }

            if last {
                return match self.console.expect_any(&[&*SUMMARY, &*CRASH], timeout, "last stage result") {
                    Ok(found) if found.pattern == 0 => {
                        let (failures, ignored) = Self::summary_counts(&found);
                        let (status, message) = Self::classify(case, &found.before, failures, ignored);
                        Ok(Attempt {
                            result: Self::finish(case, started, status, message),
                            board_dirty: false,
                        })
                    }
                    Ok(found) => Ok(Attempt {
                        result: Self::finish(
                            case,
                            started,
                            SubCaseStatus::Fail,
                            Some(format!("board crashed in stage {stage}: {}", found.group(1).unwrap_or("crash").trim())),
                        ),
                        board_dirty: true,
                    }),
                    Err(e) => Self::stage_failure(case, started, stage, e),
                };
            }

            match self.console.expect_any(&[&*READY, &*SUMMARY], timeout, "stage restart") {
                // the stage restarted the board as intended
                Ok(found) if found.pattern == 0 => {}
                Ok(found) => {
                    let (failures, ignored) = Self::summary_counts(&found);
                    let (status, message) = Self::classify(case, &found.before, failures, ignored);
                    if status == SubCaseStatus::Fail {
                        return Ok(Attempt {
                            result: Self::finish(
                                case,
                                started,
                                status,
                                message.map(|m| format!("stage {stage}: {m}")),
                            ),
                            board_dirty: true,
                        });
                    }
                    // stage finished without restarting, restart it ourselves
                    self.reset_board()?;
                }
                Err(e) => return Self::stage_failure(case, started, stage, e),
            }
        }
        unreachable!("the last stage always returns")
    }

    fn stage_failure(case: &UnityCase, started: Instant, stage: usize, error: DutError) -> Result<Attempt, DutError> {
        match error {
            DutError::Timeout { timeout, .. } => Ok(Attempt {
                result: Self::finish(
                    case,
                    started,
                    SubCaseStatus::Fail,
                    Some(format!("stage {stage} timed out after {timeout:?}")),
                ),
                board_dirty: true,
            }),
            other => Err(other),
        }
    }
}

impl DeviceHandle for UnityDut {
    fn run_all_single_board_cases(&mut self) -> Result<CaseSummary, DutError> {
        let menu = self.menu()?;
        let selected = select_cases(&menu, &self.options);
        info!(
            "[{}] running {} of {} menu case(s)",
            self.label,
            selected.len(),
            menu.len()
        );

        let mut summary = CaseSummary::default();
        let mut board_dirty = false;
        for (position, case) in selected.iter().enumerate() {
            if board_dirty || (self.options.reset && position > 0) {
                if let Err(e) = self.reset_board() {
                    warn!("[{}] unable to recover the board: {e}", self.label);
                    for skipped in &selected[position..] {
                        summary.push(SubCaseResult {
                            index: skipped.index,
                            name: skipped.name.clone(),
                            status: SubCaseStatus::NotRun,
                            message: Some(format!("board could not be reset: {e}")),
                            duration: Duration::ZERO,
                        });
                    }
                    return Ok(summary);
                }
            }

            debug!("[{}] running ({}) \"{}\"", self.label, case.index, case.name);
            let attempt = match case.kind {
                UnityCaseKind::MultiStage => self.run_multi_stage_case(case)?,
                _ => self.run_normal_case(case)?,
            };
            match attempt.result.status {
                SubCaseStatus::Fail => warn!(
                    "[{}] FAIL \"{}\": {}",
                    self.label,
                    case.name,
                    attempt.result.message.as_deref().unwrap_or("")
                ),
                status => debug!("[{}] {status:?} \"{}\"", self.label, case.name),
            }
            board_dirty = attempt.board_dirty;
            summary.push(attempt.result);
        }
        Ok(summary)
    }

    fn describe(&self) -> String {
        self.console.describe()
    }
}

impl Drop for UnityDut {
    fn drop(&mut self) {
        if let Err(e) = self.console.close() {
            warn!("[{}] failed to close console: {e}", self.label);
        }
    }
}
