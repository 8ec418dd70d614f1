//! Post-run scan of saved subject output for unexpected warnings.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sizecheck_contracts::{BENIGN_WARNING_TIPS, SUMMARY_MAX_LINES};
use walkdir::WalkDir;

use crate::summary::details;

const OUTPUT_SUFFIX: &str = ".output.txt";

/// The first output file with reportable lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub path: PathBuf,
    pub lines: Vec<String>,
    pub truncated: bool,
}

impl Finding {
    pub fn to_markdown(&self) -> String {
        let mut out = format!("### Found bad case in {}\n", self.path.display());
        out.push_str(&details("Warnings", &self.lines, false));
        if self.truncated {
            out.push_str("truncated output...\n");
        }
        out
    }
}

/// A warning or error line that is not one of the known benign tips.
pub fn is_reportable(line: &str) -> bool {
    if !line.contains("level=WARN") && !line.contains("level=ERROR") {
        return false;
    }
    !BENIGN_WARNING_TIPS.iter().any(|tip| line.contains(tip))
}

/// Reportable lines of `text`, capped at the first [`SUMMARY_MAX_LINES`].
pub fn filter_output(text: &str) -> (Vec<String>, bool) {
    let mut lines: Vec<String> = text
        .lines()
        .filter(|l| is_reportable(l))
        .map(str::to_string)
        .collect();
    let truncated = lines.len() > SUMMARY_MAX_LINES;
    lines.truncate(SUMMARY_MAX_LINES);
    (lines, truncated)
}

/// Walks `results` in path order and returns the first offending file.
pub fn scan(results: &Path) -> Result<Option<Finding>> {
    if !results.is_dir() {
        anyhow::bail!("results directory does not exist: {}", results.display());
    }
    let mut files: Vec<PathBuf> = WalkDir::new(results)
        .follow_links(false)
        .into_iter()
        .flatten()
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.file_name().to_string_lossy().ends_with(OUTPUT_SUFFIX))
        .map(|e| e.into_path())
        .collect();
    files.sort();

    for path in files {
        let bytes = std::fs::read(&path).with_context(|| format!("read: {}", path.display()))?;
        let (lines, truncated) = filter_output(&String::from_utf8_lossy(&bytes));
        if !lines.is_empty() {
            return Ok(Some(Finding {
                path,
                lines,
                truncated,
            }));
        }
    }
    Ok(None)
}
