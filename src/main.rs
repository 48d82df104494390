use anyhow::{Result, bail};
use chrono::Local;
use log::{error, info, warn};
use std::path::PathBuf;
use std::process::ExitCode;

use dutrunner::config::cli_args::CliArgs;
use dutrunner::config::suite_config::discover_manifests;
use dutrunner::config::target_config::TargetsFile;
use dutrunner::dut::ConfiguredDeviceFactory;
use dutrunner::registry::Registrar;
use dutrunner::report::RunReport;
use dutrunner::runner::SuiteRunner;
use dutrunner::selection::{self, RunPlan};

fn main() -> ExitCode {
    let args = CliArgs::parse_args();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(args.get_log_level()))
        .init();

    match run(&args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(2)
        }
    }
}

/// Returns whether every executed invocation passed.
fn run(args: &CliArgs) -> Result<bool> {
    let mut manifests: Vec<PathBuf> = args.suites.clone();
    if let Some(dir) = &args.suite_dir {
        manifests.extend(discover_manifests(dir, true)?);
    }
    if manifests.is_empty() {
        bail!("No case manifests given; use --suite <FILE> or --suite-dir <DIR>");
    }

    let registrar = Registrar::from_manifests(&manifests)?;
    let plan = selection::plan(&registrar, &args.get_filter());

    if args.list {
        print_plan(&plan);
        return Ok(true);
    }
    if plan.is_empty() {
        warn!("Nothing to run: every case was filtered out");
    }

    let targets = TargetsFile::from_file(&args.targets_file)?;
    let executor = targets.executor.merge(&args.get_executor_overrides());
    let fail_fast = executor.resolve().fail_fast;
    let factory = ConfiguredDeviceFactory::new(targets, executor);

    let started_at = Local::now();
    let results = SuiteRunner::new(&registrar, factory)
        .fail_fast(fail_fast)
        .run(&plan);
    let report = RunReport::new(started_at, results, plan.skipped.clone());
    report.write_to_dir(&args.reports_dir)?;

    let totals = report.totals();
    info!(
        "{} passed, {} failed, {} errors, {} not run, {} skipped",
        totals.passed, totals.failed, totals.errors, totals.not_run, totals.skipped
    );
    Ok(report.all_passed())
}

fn print_plan(plan: &RunPlan) {
    for invocation in &plan.invocations {
        println!("{invocation}");
    }
    for skipped in &plan.skipped {
        println!("skipped {}: {}", skipped.case, skipped.reason);
    }
    println!(
        "{} invocation(s), {} case(s) skipped",
        plan.invocations.len(),
        plan.skipped.len()
    );
}
