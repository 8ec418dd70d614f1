use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use sizecheck_contracts::{ENV_CI, ENV_CI_SUMMARY, ENV_DISABLE_DRAW};

/// Per-invocation budget; Windows runners are markedly slower.
pub const DEFAULT_TIMEOUT: Duration = if cfg!(windows) {
    Duration::from_secs(360)
} else {
    Duration::from_secs(180)
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub root: PathBuf,
    pub catalog: PathBuf,
    pub skip: PathBuf,
    pub bins: PathBuf,
    pub results: PathBuf,
    pub cover: PathBuf,
    /// Scratch space for the staged subject.
    pub temp: PathBuf,
}

impl Layout {
    pub fn under(root: &Path) -> Self {
        let scripts = root.join("scripts");
        Self {
            root: root.to_path_buf(),
            catalog: scripts.join("binaries.csv"),
            skip: scripts.join("skip.csv"),
            bins: scripts.join("bins"),
            results: root.join("results"),
            cover: root.join("covdata").join("integration"),
            temp: root.join("temp"),
        }
    }
}

/// Where CI-facing markdown goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummarySink {
    /// Appended to the step summary file.
    File(PathBuf),
    Stdout,
}

impl SummarySink {
    pub fn write(&self, text: &str) -> Result<()> {
        match self {
            SummarySink::File(path) => {
                let mut f = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| format!("open CI summary: {}", path.display()))?;
                writeln!(f, "{text}")
                    .with_context(|| format!("write CI summary: {}", path.display()))?;
            }
            SummarySink::Stdout => println!("{text}"),
        }
        Ok(())
    }
}

/// Settings taken from the process environment, read once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvSettings {
    pub summary: SummarySink,
    pub draw_charts: bool,
}

impl EnvSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let summary = match (lookup(ENV_CI), lookup(ENV_CI_SUMMARY)) {
            (Some(_), Some(path)) if !path.trim().is_empty() => SummarySink::File(PathBuf::from(path)),
            (Some(_), _) => {
                log::warn!("{ENV_CI} is set but {ENV_CI_SUMMARY} is not; summary goes to stdout");
                SummarySink::Stdout
            }
            (None, _) => SummarySink::Stdout,
        };
        Self {
            summary,
            draw_charts: lookup(ENV_DISABLE_DRAW).is_none(),
        }
    }
}

pub fn effective_root(root: Option<PathBuf>) -> Result<PathBuf> {
    match root {
        Some(root) => Ok(root),
        None => std::env::current_dir().context("get current dir"),
    }
}

pub fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Empties `dir`, creating it if needed.
pub fn reset_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        for entry in std::fs::read_dir(dir).with_context(|| format!("read dir: {}", dir.display()))? {
            let path = entry?.path();
            let removed = if path.is_dir() {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            };
            removed.with_context(|| format!("remove: {}", path.display()))?;
        }
    }
    std::fs::create_dir_all(dir).with_context(|| format!("create dir: {}", dir.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: BTreeMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn ci_with_summary_path_appends_to_file() {
        let env = EnvSettings::from_lookup(lookup(&[("CI", "true"), ("GITHUB_STEP_SUMMARY", "/tmp/s.md")]));
        assert_eq!(env.summary, SummarySink::File(PathBuf::from("/tmp/s.md")));
        assert!(env.draw_charts);
    }

    #[test]
    fn local_runs_print_and_honour_disable_draw() {
        let env = EnvSettings::from_lookup(lookup(&[("GITHUB_STEP_SUMMARY", "/tmp/s.md"), ("DISABLE_DRAW", "1")]));
        assert_eq!(env.summary, SummarySink::Stdout);
        assert!(!env.draw_charts);
    }

    #[test]
    fn layout_defaults() {
        let l = Layout::under(Path::new("/repo"));
        assert_eq!(l.catalog, PathBuf::from("/repo/scripts/binaries.csv"));
        assert_eq!(l.skip, PathBuf::from("/repo/scripts/skip.csv"));
        assert_eq!(l.cover, PathBuf::from("/repo/covdata/integration"));
    }

    #[test]
    fn reset_dir_clears_contents() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let dir = tmp.path().join("results");
        std::fs::create_dir_all(dir.join("case/text")).expect("mkdir");
        std::fs::write(dir.join("stale.txt"), "x").expect("write");

        reset_dir(&dir).expect("reset");
        assert!(dir.is_dir());
        assert_eq!(std::fs::read_dir(&dir).expect("read").count(), 0);

        reset_dir(&tmp.path().join("fresh")).expect("create");
        assert!(tmp.path().join("fresh").is_dir());
    }

    #[test]
    fn file_sink_appends() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("summary.md");
        let sink = SummarySink::File(path.clone());
        sink.write("one").expect("write");
        sink.write("two").expect("write");
        assert_eq!(std::fs::read_to_string(path).expect("read"), "one\ntwo\n");
    }
}
