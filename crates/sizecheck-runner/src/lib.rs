//! Runs the subject binary: per-mode invocations under a wall-clock budget,
//! resource sampling, and the web-mode contract check.

pub mod case;
pub mod chart;
pub mod probe;
pub mod process;
pub mod settings;
pub mod subject;
pub mod web;

pub use case::{CaseError, ModeError, ModeFailure, TestCase};
pub use process::{run, ProcessResult, RunError, RunRequest, Sample};
pub use settings::{ModePaths, RunSettings};
pub use subject::ScopedSubject;
pub use web::{find_unused_port, validate_page, ValidationError, WebModeValidator};
