//! Shared identifiers for the harness and the subject it drives.
//!
//! These constants are the single source of truth for environment variable
//! names, subject command-line flags and the web payload contract.

pub const RUN_SUMMARY_SCHEMA_VERSION: &str = "sizecheck.run.summary@0.1.0";

pub const ENV_FORCE_REFRESH: &str = "FORCE_REFRESH";
pub const ENV_GITHUB_TOKEN: &str = "GITHUB_TOKEN";
pub const ENV_COVER_DIR: &str = "GOCOVERDIR";
pub const ENV_PROFILER_OUTPUT_DIR: &str = "OUTPUT_DIR";
pub const ENV_CI: &str = "CI";
pub const ENV_CI_SUMMARY: &str = "GITHUB_STEP_SUMMARY";
pub const ENV_DISABLE_DRAW: &str = "DISABLE_DRAW";

/// Hosts that receive the bearer token when one is configured.
pub const AUTH_HOSTS: &[&str] = &[
    "github.com",
    "api.github.com",
    "objects.githubusercontent.com",
];

pub const SUBJECT_FLAG_FORMAT: &str = "-f";
pub const SUBJECT_FLAG_OUTPUT: &str = "-o";
pub const SUBJECT_FLAG_INDENT: &str = "--indent";
pub const SUBJECT_FLAG_VERBOSE: &str = "--verbose";
pub const SUBJECT_FLAG_HIDE_PROGRESS: &str = "--hide-progress";
pub const SUBJECT_FLAG_WEB: &str = "--web";
pub const SUBJECT_FLAG_LISTEN: &str = "--listen";

/// Substrings that mark the web server as ready in the subject's output.
///
/// The listen address itself is not a marker: the subject echoes it in bind
/// errors too.
pub const WEB_READY_MARKERS: &[&str] = &["localhost"];

/// Keys the embedded web payload must carry, checked in this order.
pub const WEB_REQUIRED_KEYS: &[&str] = &["name", "size", "packages", "sections"];

pub const PORT_RANGE_START: u16 = 20000;
pub const PORT_RANGE_END: u16 = 60000;

/// Output lines kept per failing case in the CI summary.
pub const SUMMARY_MAX_LINES: usize = 50;

/// Warnings in subject output that are expected and never reported.
pub const BENIGN_WARNING_TIPS: &[&str] = &[
    "DWARF parsing failed",
    "No symbol table found",
    "Disassembler not supported",
];
