use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use sizecheck_contracts::{RUN_SUMMARY_SCHEMA_VERSION, SUMMARY_MAX_LINES};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseStatus {
    Passed,
    Failed,
    Skipped,
}

/// Tail of one saved output file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogExcerpt {
    pub source: String,
    pub lines: Vec<String>,
    /// Earlier lines were dropped.
    pub truncated: bool,
}

impl LogExcerpt {
    pub fn from_text(source: impl Into<String>, text: &str) -> Self {
        let (lines, truncated) = tail_lines(text, SUMMARY_MAX_LINES);
        Self {
            source: source.into(),
            lines,
            truncated,
        }
    }

    pub fn from_file(path: &Path) -> Option<Self> {
        let bytes = std::fs::read(path).ok()?;
        Some(Self::from_text(
            path.display().to_string(),
            &String::from_utf8_lossy(&bytes),
        ))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CaseOutcome {
    pub name: String,
    pub status: CaseStatus,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<LogExcerpt>,
}

impl CaseOutcome {
    pub fn passed(name: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            name: name.into(),
            status: CaseStatus::Passed,
            duration_ms: elapsed.as_millis() as u64,
            error: None,
            logs: Vec::new(),
        }
    }

    pub fn failed(name: impl Into<String>, elapsed: Duration, error: String, logs: Vec<LogExcerpt>) -> Self {
        Self {
            name: name.into(),
            status: CaseStatus::Failed,
            duration_ms: elapsed.as_millis() as u64,
            error: Some(error),
            logs,
        }
    }

    pub fn skipped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CaseStatus::Skipped,
            duration_ms: 0,
            error: None,
            logs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub schema_version: String,
    pub total: usize,
    pub executed: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration_ms: u64,
    pub cases: Vec<CaseOutcome>,
}

impl RunSummary {
    /// Tallies `cases`, sorted by name.
    pub fn from_outcomes(mut cases: Vec<CaseOutcome>, elapsed: Duration) -> Self {
        cases.sort_by(|a, b| a.name.cmp(&b.name));
        let count = |s: CaseStatus| cases.iter().filter(|c| c.status == s).count();
        let (passed, failed, skipped) = (
            count(CaseStatus::Passed),
            count(CaseStatus::Failed),
            count(CaseStatus::Skipped),
        );
        Self {
            schema_version: RUN_SUMMARY_SCHEMA_VERSION.to_string(),
            total: cases.len(),
            executed: passed + failed,
            passed,
            failed,
            skipped,
            duration_ms: elapsed.as_millis() as u64,
            cases,
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &CaseOutcome> {
        self.cases.iter().filter(|c| c.status == CaseStatus::Failed)
    }

    pub fn exit_code(&self) -> u8 {
        if self.failed > 0 {
            1
        } else {
            0
        }
    }

    pub fn write_json(&self, results_dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(results_dir)
            .with_context(|| format!("create results dir: {}", results_dir.display()))?;
        let path = results_dir.join("summary.json");
        let json = serde_json::to_string_pretty(self)? + "\n";
        std::fs::write(&path, json).with_context(|| format!("write summary: {}", path.display()))?;
        Ok(path)
    }

    /// Markdown describing every failed case, or `None` when all passed.
    pub fn render_failures(&self) -> Option<String> {
        if self.failed == 0 {
            return None;
        }
        let mut out = format!(
            "### {} of {} test cases failed\n",
            self.failed, self.executed
        );
        for case in self.failures() {
            out.push_str(&format!("\n#### {}\n\n", case.name));
            if let Some(err) = &case.error {
                out.push_str(&format!("{}\n", err.trim_end()));
            }
            for log in &case.logs {
                out.push_str(&details(
                    &format!("Last {} lines of {}", log.lines.len(), log.source),
                    &log.lines,
                    log.truncated,
                ));
            }
        }
        Some(out)
    }
}

/// Last `max` lines of `text` and whether any were dropped.
pub fn tail_lines(text: &str, max: usize) -> (Vec<String>, bool) {
    let lines: Vec<&str> = text.lines().collect();
    let skip = lines.len().saturating_sub(max);
    (
        lines[skip..].iter().map(|l| l.to_string()).collect(),
        skip > 0,
    )
}

pub(crate) fn details(summary: &str, lines: &[String], truncated: bool) -> String {
    let mut out = format!("\n<details><summary>{summary}</summary>\n\n```\n");
    if truncated {
        out.push_str("... earlier output truncated ...\n");
    }
    for line in lines {
        out.push_str(line);
        out.push('\n');
    }
    out.push_str("```\n\n</details>\n");
    out
}
