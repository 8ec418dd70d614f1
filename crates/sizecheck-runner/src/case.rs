use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use sizecheck_artifacts::{ArtifactFetcher, ArtifactRecord, FetchError, TestType, TestTypeMask};
use sizecheck_contracts::{
    SUBJECT_FLAG_FORMAT, SUBJECT_FLAG_HIDE_PROGRESS, SUBJECT_FLAG_INDENT, SUBJECT_FLAG_OUTPUT,
    SUBJECT_FLAG_VERBOSE,
};

use crate::chart::render_usage_svg;
use crate::process::{self, RunError, RunRequest};
use crate::settings::{ModePaths, RunSettings};

/// One provisioned input and the modes to exercise against it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    pub name: String,
    pub input: PathBuf,
    pub test_types: TestTypeMask,
}

#[derive(Debug, thiserror::Error)]
pub enum ModeError {
    #[error("exited with {status}")]
    ProcessFailure { status: String },
    #[error(transparent)]
    Run(#[from] RunError),
    #[error("{action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug)]
pub struct ModeFailure {
    pub mode: TestType,
    pub error: ModeError,
    /// Where the subject's output for this mode was saved, if it got that far.
    pub output_log: Option<PathBuf>,
}

impl fmt::Display for ModeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.mode, self.error)?;
        if let Some(log) = &self.output_log {
            write!(f, " (see {})", log.display())?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("test {case} failed: {}", describe(.failures))]
pub struct CaseError {
    pub case: String,
    pub failures: Vec<ModeFailure>,
}

fn describe(failures: &[ModeFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl CaseError {
    pub fn timed_out(&self) -> bool {
        self.failures
            .iter()
            .any(|f| matches!(f.error, ModeError::Run(RunError::TimedOut { .. })))
    }
}

impl TestCase {
    pub fn new(name: impl Into<String>, input: impl Into<PathBuf>, test_types: TestTypeMask) -> Self {
        Self {
            name: name.into(),
            input: input.into(),
            test_types,
        }
    }

    /// Makes sure the artifact is on disk, then derives one case per target.
    pub fn from_artifact(
        fetcher: &ArtifactFetcher,
        record: &ArtifactRecord,
    ) -> Result<Vec<TestCase>, FetchError> {
        fetcher.ensure_exist(record)?;
        Ok(record
            .targets
            .iter()
            .map(|t| TestCase::new(record.case_name(t), fetcher.destination(t), record.test_types))
            .collect())
    }

    pub fn subject_args(&self, mode: TestType, paths: &ModePaths) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![SUBJECT_FLAG_FORMAT.into(), mode.as_str().into()];
        match mode {
            TestType::Text => {
                args.push(SUBJECT_FLAG_VERBOSE.into());
                args.push(self.input.clone().into_os_string());
            }
            TestType::Json => {
                args.push(SUBJECT_FLAG_VERBOSE.into());
                args.push(SUBJECT_FLAG_INDENT.into());
                args.push("2".into());
                args.push(self.input.clone().into_os_string());
                args.push(SUBJECT_FLAG_OUTPUT.into());
                args.push(paths.generated.clone().into_os_string());
            }
            TestType::Html | TestType::Svg => {
                args.push(SUBJECT_FLAG_HIDE_PROGRESS.into());
                args.push(self.input.clone().into_os_string());
                args.push(SUBJECT_FLAG_OUTPUT.into());
                args.push(paths.generated.clone().into_os_string());
            }
        }
        args
    }

    /// Runs every enabled mode concurrently and waits for all of them before
    /// reporting. `on_mode_complete` fires once per passing mode.
    pub fn run_test(
        &self,
        settings: &RunSettings,
        on_mode_complete: &(dyn Fn(TestType, Duration) + Sync),
    ) -> Result<(), CaseError> {
        let mut failures: Vec<ModeFailure> = std::thread::scope(|scope| {
            let handles: Vec<_> = self
                .test_types
                .iter()
                .map(|mode| {
                    (
                        mode,
                        scope.spawn(move || self.run_mode(settings, mode, on_mode_complete)),
                    )
                })
                .collect();
            handles
                .into_iter()
                .filter_map(|(mode, handle)| match handle.join() {
                    Ok(Ok(())) => None,
                    Ok(Err(failure)) => Some(failure),
                    Err(_) => Some(ModeFailure {
                        mode,
                        error: ModeError::Io {
                            action: "run mode",
                            path: self.input.clone(),
                            source: std::io::Error::other("mode thread panicked"),
                        },
                        output_log: None,
                    }),
                })
                .collect()
        });

        if failures.is_empty() {
            return Ok(());
        }
        failures.sort_by_key(|f| f.mode);
        Err(CaseError {
            case: self.name.clone(),
            failures,
        })
    }

    fn run_mode(
        &self,
        settings: &RunSettings,
        mode: TestType,
        on_mode_complete: &(dyn Fn(TestType, Duration) + Sync),
    ) -> Result<(), ModeFailure> {
        let fail = |error: ModeError, output_log: Option<PathBuf>| ModeFailure {
            mode,
            error,
            output_log,
        };

        let paths = settings.mode_paths(&self.name, mode);
        create_dir(&paths.dir).map_err(|e| fail(e, None))?;
        create_dir(&paths.profiler_dir).map_err(|e| fail(e, None))?;

        let req = RunRequest {
            name: format!("{} ({mode})", self.name),
            program: settings.subject.clone(),
            args: self.subject_args(mode, &paths),
            work_dir: settings.work_dir.clone(),
            env: settings.subject_env(Some(&paths.profiler_dir)),
            timeout: settings.timeout,
            sample_resources: settings.draw_charts,
        };

        let started = Instant::now();
        let result = match process::run(&req) {
            Ok(result) => result,
            Err(err) => {
                let mut log = None;
                if let RunError::TimedOut { output, .. } = &err {
                    if write_file(&paths.output_log, output.as_bytes()).is_ok() {
                        log = Some(paths.output_log.clone());
                    }
                }
                return Err(fail(err.into(), log));
            }
        };

        write_file(&paths.output_log, result.output.as_bytes()).map_err(|e| fail(e, None))?;
        if settings.draw_charts {
            if let Some(svg) = render_usage_svg(&req.name, &result.samples) {
                write_file(&paths.chart, svg.as_bytes())
                    .map_err(|e| fail(e, Some(paths.output_log.clone())))?;
            }
        }

        if !result.success() {
            return Err(fail(
                ModeError::ProcessFailure {
                    status: result.status.to_string(),
                },
                Some(paths.output_log.clone()),
            ));
        }

        on_mode_complete(mode, started.elapsed());
        Ok(())
    }
}

fn create_dir(dir: &Path) -> Result<(), ModeError> {
    std::fs::create_dir_all(dir).map_err(|source| ModeError::Io {
        action: "create dir",
        path: dir.to_path_buf(),
        source,
    })
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<(), ModeError> {
    std::fs::write(path, bytes).map_err(|source| ModeError::Io {
        action: "write",
        path: path.to_path_buf(),
        source,
    })
}
