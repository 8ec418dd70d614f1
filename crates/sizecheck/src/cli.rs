use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "sizecheck")]
#[command(about = "Integration tests for the size analyzer.", long_about = None)]
pub struct Cli {
    /// Project root; relative defaults below resolve against it.
    #[arg(long, global = true, value_name = "DIR")]
    pub root: Option<PathBuf>,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Provision inputs and run every test case against the subject.
    Run(RunArgs),
    /// Provision inputs without running anything.
    Fetch(FetchArgs),
    /// Write a catalog of raw artifacts resolved from a release.
    Generate(GenerateArgs),
    /// Scan saved subject output for unexpected warnings.
    Report(ReportArgs),
}

#[derive(Debug, Clone, Args)]
pub struct CatalogArgs {
    #[arg(long, value_name = "PATH")]
    pub catalog: Option<PathBuf>,

    /// Directory that relative target paths resolve against.
    #[arg(long, value_name = "DIR")]
    pub bins: Option<PathBuf>,

    /// Only artifacts whose name contains this substring.
    #[arg(long, value_name = "TEXT")]
    pub filter: Option<String>,

    /// Worker threads; defaults to the available parallelism.
    #[arg(long, value_name = "N")]
    pub jobs: Option<usize>,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Built subject binary under test.
    #[arg(long, value_name = "PATH")]
    pub subject: PathBuf,

    #[command(flatten)]
    pub catalog: CatalogArgs,

    #[arg(long, value_name = "PATH")]
    pub skip: Option<PathBuf>,

    #[arg(long, value_name = "DIR")]
    pub results: Option<PathBuf>,

    #[arg(long, value_name = "DIR")]
    pub cover_dir: Option<PathBuf>,

    /// Wall-clock budget per subject invocation.
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Input served by the web-mode check; defaults to the subject itself.
    #[arg(long, value_name = "PATH")]
    pub web_input: Option<PathBuf>,

    #[arg(long)]
    pub no_web: bool,

    #[arg(long)]
    pub no_chart: bool,

    /// Leave previous results and coverage data in place.
    #[arg(long)]
    pub keep_results: bool,
}

#[derive(Debug, Args)]
pub struct FetchArgs {
    #[command(flatten)]
    pub catalog: CatalogArgs,
}

#[derive(Debug, Args)]
pub struct GenerateArgs {
    /// GitHub repository as `owner/name`.
    #[arg(long, value_name = "REPO")]
    pub repo: String,

    #[arg(long, default_value = "latest")]
    pub tag: String,

    /// Modes enabled for every generated record, e.g. `text,json,html`.
    #[arg(long, value_name = "MODES", value_delimiter = ',', default_value = "text,json,html")]
    pub types: Vec<String>,

    /// Output catalog; defaults to the run catalog path.
    #[arg(long, value_name = "PATH")]
    pub out: Option<PathBuf>,

    /// Keep existing records whose names are not regenerated.
    #[arg(long)]
    pub append: bool,

    /// Release asset names to include.
    #[arg(required = true, value_name = "ASSET")]
    pub assets: Vec<String>,
}

#[derive(Debug, Args)]
pub struct ReportArgs {
    #[arg(long, value_name = "DIR")]
    pub results: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory as _;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_flags_parse() {
        let cli = Cli::try_parse_from([
            "sizecheck",
            "--root",
            "/repo",
            "run",
            "--subject",
            "/tmp/gsa",
            "--jobs",
            "3",
            "--filter",
            "linux",
            "--no-web",
        ])
        .expect("parse");
        assert_eq!(cli.root, Some(PathBuf::from("/repo")));
        let Command::Run(args) = cli.cmd else {
            panic!("expected run");
        };
        assert_eq!(args.subject, PathBuf::from("/tmp/gsa"));
        assert_eq!(args.catalog.jobs, Some(3));
        assert_eq!(args.catalog.filter.as_deref(), Some("linux"));
        assert!(args.no_web);
        assert!(!args.no_chart);
    }

    #[test]
    fn generate_splits_types() {
        let cli = Cli::try_parse_from([
            "sizecheck", "generate", "--repo", "o/r", "--types", "text,svg", "a", "b",
        ])
        .expect("parse");
        let Command::Generate(args) = cli.cmd else {
            panic!("expected generate");
        };
        assert_eq!(args.types, vec!["text", "svg"]);
        assert_eq!(args.assets, vec!["a", "b"]);
        assert_eq!(args.tag, "latest");
    }
}
