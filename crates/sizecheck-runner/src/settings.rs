use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use sizecheck_artifacts::TestType;
use sizecheck_contracts::{ENV_COVER_DIR, ENV_PROFILER_OUTPUT_DIR};

/// Everything a subject invocation needs besides its input.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub subject: PathBuf,
    /// Working directory of every subject process.
    pub work_dir: PathBuf,
    /// Root of the per-case output tree.
    pub results_dir: PathBuf,
    pub cover_dir: Option<PathBuf>,
    pub timeout: Duration,
    pub draw_charts: bool,
}

/// Files and directories of one (case, mode) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModePaths {
    pub dir: PathBuf,
    pub profiler_dir: PathBuf,
    /// Combined subject output.
    pub output_log: PathBuf,
    /// File the subject writes with `-o`.
    pub generated: PathBuf,
    pub chart: PathBuf,
}

impl RunSettings {
    pub fn case_dir(&self, case: &str) -> PathBuf {
        self.results_dir.join(case)
    }

    pub fn mode_paths(&self, case: &str, mode: TestType) -> ModePaths {
        let dir = self.case_dir(case).join(mode.as_str());
        ModePaths {
            profiler_dir: dir.join("profiler"),
            output_log: dir.join(format!("{case}.{mode}.output.txt")),
            generated: dir.join(format!("{case}.{}", mode.output_extension())),
            chart: dir.join(format!("{case}.{mode}.graph.svg")),
            dir,
        }
    }

    /// Environment overrides for a subject run.
    pub fn subject_env(&self, profiler_dir: Option<&Path>) -> Vec<(OsString, OsString)> {
        let mut env = Vec::new();
        if let Some(cover) = &self.cover_dir {
            env.push((ENV_COVER_DIR.into(), cover.clone().into_os_string()));
        }
        if let Some(dir) = profiler_dir {
            env.push((ENV_PROFILER_OUTPUT_DIR.into(), dir.as_os_str().to_owned()));
        }
        env
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_paths_are_keyed_by_case_and_mode() {
        let settings = RunSettings {
            subject: PathBuf::from("subject"),
            work_dir: PathBuf::from("."),
            results_dir: PathBuf::from("results"),
            cover_dir: Some(PathBuf::from("cov")),
            timeout: Duration::from_secs(1),
            draw_charts: false,
        };
        let p = settings.mode_paths("demo", TestType::Text);
        assert_eq!(p.dir, PathBuf::from("results/demo/text"));
        assert_eq!(p.output_log, PathBuf::from("results/demo/text/demo.text.output.txt"));
        assert_eq!(p.generated, PathBuf::from("results/demo/text/demo.txt"));
        assert_eq!(
            settings.mode_paths("demo", TestType::Json).generated,
            PathBuf::from("results/demo/json/demo.json")
        );

        let env = settings.subject_env(Some(&p.profiler_dir));
        assert_eq!(env.len(), 2);
        assert_eq!(env[0].0, OsString::from("GOCOVERDIR"));
        assert_eq!(env[1].1, p.profiler_dir.into_os_string());
    }
}
