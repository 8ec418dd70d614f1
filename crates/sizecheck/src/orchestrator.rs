use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::Result;
use sizecheck_artifacts::{ArtifactFetcher, ArtifactRecord, TestType};
use sizecheck_runner::{CaseError, RunSettings, TestCase, ValidationError, WebModeValidator};

use crate::skip::SkipList;
use crate::summary::{CaseOutcome, LogExcerpt, RunSummary};

/// Name of the web-mode check in reports and the skip list.
pub const WEB_CASE_NAME: &str = "web";

/// One schedulable unit of a run.
#[derive(Debug, Clone)]
pub enum Job {
    Case(TestCase),
    /// Web-mode contract check against `input`.
    Web { input: PathBuf },
    /// A case whose input could not be provisioned; it fails without running.
    Unprovisioned { name: String, error: String },
}

impl Job {
    pub fn name(&self) -> &str {
        match self {
            Job::Case(case) => &case.name,
            Job::Web { .. } => WEB_CASE_NAME,
            Job::Unprovisioned { name, .. } => name,
        }
    }
}

/// Fetches every record on up to `jobs` threads and derives its cases.
///
/// A failed fetch turns each case the record would have produced into
/// [`Job::Unprovisioned`]. Output keeps catalog order.
pub fn provision(fetcher: &ArtifactFetcher, records: &[ArtifactRecord], jobs: usize) -> Vec<Job> {
    let next = AtomicUsize::new(0);
    let provisioned: Mutex<Vec<(usize, Vec<Job>)>> = Mutex::new(Vec::with_capacity(records.len()));

    std::thread::scope(|scope| {
        let jobs = jobs.max(1).min(records.len().max(1));
        for _ in 0..jobs {
            scope.spawn(|| loop {
                let idx = next.fetch_add(1, Ordering::Relaxed);
                let Some(record) = records.get(idx) else {
                    return;
                };
                let derived = match TestCase::from_artifact(fetcher, record) {
                    Ok(cases) => cases.into_iter().map(Job::Case).collect(),
                    Err(err) => {
                        log::error!("Failed to provision {}: {err}", record.name);
                        record
                            .case_names()
                            .into_iter()
                            .map(|name| Job::Unprovisioned {
                                name,
                                error: err.to_string(),
                            })
                            .collect()
                    }
                };
                if let Ok(mut guard) = provisioned.lock() {
                    guard.push((idx, derived));
                }
            });
        }
    });

    let mut provisioned = provisioned.into_inner().unwrap_or_else(|e| e.into_inner());
    provisioned.sort_by_key(|(idx, _)| *idx);
    provisioned.into_iter().flat_map(|(_, jobs)| jobs).collect()
}

/// Runs test cases on a bounded worker pool and aggregates their outcomes.
#[derive(Debug, Clone)]
pub struct Orchestrator<'a> {
    settings: &'a RunSettings,
    workers: usize,
}

impl<'a> Orchestrator<'a> {
    pub fn new(settings: &'a RunSettings, workers: usize) -> Self {
        Self {
            settings,
            workers: workers.max(1),
        }
    }

    /// Runs every job not named in `skip`. A failing case never stops the
    /// others; duplicate names are rejected before anything runs.
    pub fn run(&self, jobs: Vec<Job>, skip: &SkipList) -> Result<RunSummary> {
        let started = Instant::now();
        let mut seen = BTreeSet::new();
        for job in &jobs {
            if !seen.insert(job.name()) {
                anyhow::bail!("duplicate test case name: {}", job.name());
            }
        }

        let (skipped, pending): (Vec<Job>, Vec<Job>) =
            jobs.into_iter().partition(|j| skip.contains(j.name()));
        for job in &skipped {
            log::info!("Test {} skipped.", job.name());
        }
        log::info!(
            "Running {} test cases on {} workers ({} skipped)",
            pending.len(),
            self.workers.min(pending.len().max(1)),
            skipped.len()
        );

        let next = AtomicUsize::new(0);
        let done = AtomicUsize::new(0);
        let outcomes: Mutex<Vec<CaseOutcome>> = Mutex::new(Vec::with_capacity(pending.len()));
        let total = pending.len();

        std::thread::scope(|scope| {
            let workers = self.workers.min(total.max(1));
            for _ in 0..workers {
                scope.spawn(|| loop {
                    let idx = next.fetch_add(1, Ordering::Relaxed);
                    let Some(job) = pending.get(idx) else {
                        return;
                    };
                    let outcome = self.run_job(job);
                    let n = done.fetch_add(1, Ordering::Relaxed) + 1;
                    match &outcome.error {
                        None => log::info!("[{n}/{total}] Test {} passed.", outcome.name),
                        Some(err) => log::error!("[{n}/{total}] {err}"),
                    }
                    if let Ok(mut guard) = outcomes.lock() {
                        guard.push(outcome);
                    }
                });
            }
        });

        let mut outcomes = outcomes.into_inner().unwrap_or_else(|e| e.into_inner());
        outcomes.extend(skipped.iter().map(|j| CaseOutcome::skipped(j.name())));
        Ok(RunSummary::from_outcomes(outcomes, started.elapsed()))
    }

    fn run_job(&self, job: &Job) -> CaseOutcome {
        let started = Instant::now();
        match job {
            Job::Case(case) => {
                let on_mode = |mode: TestType, elapsed: Duration| {
                    log::info!(
                        "Test {} {mode} passed in {:.2}s",
                        case.name,
                        elapsed.as_secs_f64()
                    );
                };
                match case.run_test(self.settings, &on_mode) {
                    Ok(()) => CaseOutcome::passed(&case.name, started.elapsed()),
                    Err(err) => {
                        let logs = case_logs(&err);
                        CaseOutcome::failed(&case.name, started.elapsed(), err.to_string(), logs)
                    }
                }
            }
            Job::Web { input } => {
                match WebModeValidator::new(self.settings).run_web_test(WEB_CASE_NAME, input) {
                    Ok(_) => CaseOutcome::passed(WEB_CASE_NAME, started.elapsed()),
                    Err(err) => {
                        let logs = self.web_logs(&err);
                        CaseOutcome::failed(
                            WEB_CASE_NAME,
                            started.elapsed(),
                            format!("test {WEB_CASE_NAME} failed: {err}"),
                            logs,
                        )
                    }
                }
            }
            Job::Unprovisioned { name, error } => CaseOutcome::failed(
                name,
                started.elapsed(),
                format!("test {name} failed: input not provisioned: {error}"),
                Vec::new(),
            ),
        }
    }

    fn web_logs(&self, err: &ValidationError) -> Vec<LogExcerpt> {
        if let ValidationError::ServerStartFailure { output, .. } = err {
            return vec![LogExcerpt::from_text("web server output", output)];
        }
        let saved = self
            .settings
            .case_dir(WEB_CASE_NAME)
            .join(format!("{WEB_CASE_NAME}.web.output.txt"));
        LogExcerpt::from_file(&saved).into_iter().collect()
    }
}

fn case_logs(err: &CaseError) -> Vec<LogExcerpt> {
    err.failures
        .iter()
        .filter_map(|f| f.output_log.as_deref())
        .filter_map(LogExcerpt::from_file)
        .collect()
}
