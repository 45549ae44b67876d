//! `modeljob stress`: multi-owner mutual-exclusion check
//!
//! Every owner gets its own "in model" flag; a job that finds the flag
//! already set has overlapped with another job of the same owner.

use crate::output::StyledOutput;
use anyhow::bail;
use modeljob::{
    filter, BlockingCondition, JobFuture, JobInput, MutualExclusionScheduler, OwnerId, SchedulerStats,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use termcolor::ColorChoice;

/// Parsed `stress` arguments
pub struct StressOptions {
    pub owners: usize,
    pub jobs: usize,
    pub workers: Option<usize>,
    pub block_every: usize,
    pub timeout_secs: u64,
    pub config: Option<PathBuf>,
    pub json: bool,
    pub color: ColorChoice,
}

/// Outcome of a stress run
#[derive(Debug, Serialize)]
pub struct StressReport {
    pub owners: usize,
    pub jobs_per_owner: usize,
    pub blocking_jobs: usize,
    pub completed: bool,
    pub elapsed_ms: u128,
    pub overlaps: usize,
    pub failures: usize,
    pub stats: SchedulerStats,
}

impl StressReport {
    pub fn passed(&self) -> bool {
        self.completed && self.overlaps == 0 && self.failures == 0
    }
}

#[derive(Default)]
struct OwnerTracker {
    in_model: AtomicBool,
}

impl OwnerTracker {
    fn enter(&self, overlaps: &AtomicUsize) {
        if self.in_model.swap(true, Ordering::SeqCst) {
            overlaps.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn leave(&self) {
        self.in_model.store(false, Ordering::SeqCst);
    }
}

pub fn execute(options: StressOptions) -> anyhow::Result<()> {
    let mut config = super::load_config(options.config.as_deref())?;
    if let Some(workers) = options.workers {
        config.pool.core_threads = workers.max(1);
        config.pool.max_threads = config.pool.max_threads.max(config.pool.core_threads);
    }
    if options.block_every > 0 && config.pool.max_threads < options.owners * 2 {
        // A blocked job keeps its thread while its successor runs.
        config.pool.max_threads = options.owners * 2;
    }

    let scheduler = MutualExclusionScheduler::new(config);
    let report = run(&scheduler, &options);
    scheduler.shutdown();

    if options.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report, options.color);
    }

    if !report.passed() {
        bail!(
            "stress run failed (completed: {}, overlaps: {}, failures: {})",
            report.completed,
            report.overlaps,
            report.failures
        );
    }
    Ok(())
}

/// Schedule `options.jobs` jobs for each of `options.owners` owners and wait
/// for all of them.
pub fn run(scheduler: &MutualExclusionScheduler, options: &StressOptions) -> StressReport {
    let overlaps = Arc::new(AtomicUsize::new(0));
    let mut futures: Vec<JobFuture<()>> = Vec::with_capacity(options.owners * options.jobs);
    let mut blocking_jobs = 0;
    let start = Instant::now();

    for o in 0..options.owners {
        let owner = OwnerId::new();
        let tracker = Arc::new(OwnerTracker::default());
        let mut gate: Option<BlockingCondition> = None;

        for i in 0..options.jobs {
            let input = JobInput::new(owner).with_name(format!("owner-{}-job-{}", o, i));
            let (tracker, overlaps) = (tracker.clone(), overlaps.clone());
            let lift = gate.take();

            let blocks = options.block_every > 0 && i % options.block_every == 0 && i + 1 < options.jobs;
            let wait_on = if blocks {
                let condition =
                    scheduler.create_blocking_condition(format!("owner-{}-gate-{}", o, i), true);
                gate = Some(condition.clone());
                blocking_jobs += 1;
                Some(condition)
            } else {
                None
            };

            futures.push(scheduler.schedule(input, move |ctx| {
                tracker.enter(&overlaps);
                if let Some(condition) = &lift {
                    condition.set_blocking(false);
                }
                if let Some(condition) = &wait_on {
                    tracker.leave();
                    let outcome = condition.wait_for(ctx);
                    tracker.enter(&overlaps);
                    if let Err(e) = outcome {
                        tracker.leave();
                        return Err(e);
                    }
                }
                tracker.leave();
                ctx.check_interrupted()
            }));
        }
    }

    let completed = scheduler.wait_until_done(&filter::always(), Duration::from_secs(options.timeout_secs));
    let elapsed_ms = start.elapsed().as_millis();
    let failures = futures
        .iter()
        .filter(|f| f.get(Duration::ZERO).is_err())
        .count();

    StressReport {
        owners: options.owners,
        jobs_per_owner: options.jobs,
        blocking_jobs,
        completed,
        elapsed_ms,
        overlaps: overlaps.load(Ordering::SeqCst),
        failures,
        stats: scheduler.stats(),
    }
}

fn print_report(report: &StressReport, color: ColorChoice) {
    let mut out = StyledOutput::new(color);

    out.bold("Stress run");
    out.newline();
    out.field("owners", report.owners);
    out.field("jobs/owner", report.jobs_per_owner);
    out.field("blocking jobs", report.blocking_jobs);
    out.field("elapsed", format!("{} ms", report.elapsed_ms));
    out.field("completed", report.stats.jobs_completed);
    out.field("failed", report.stats.jobs_failed);
    out.field("cancelled", report.stats.jobs_cancelled);
    out.field("rejected", report.stats.jobs_rejected);
    out.newline();

    if !report.completed {
        out.warning("timed out waiting for jobs");
        out.newline();
    }
    if report.overlaps > 0 {
        out.error(&format!("{} overlapping jobs detected", report.overlaps));
    } else if report.passed() {
        out.success("no overlap: every owner ran one job at a time");
    } else {
        out.error(&format!("{} jobs did not complete", report.failures));
    }
    out.newline();
    out.flush();
}
