use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use sizecheck_artifacts::{
    catalog, ArtifactFetcher, ArtifactKind, ArtifactRecord, FetcherConfig, ReleaseIndex, Target,
    TestType, TestTypeMask,
};
use sizecheck_runner::{RunSettings, ScopedSubject};

mod cli;
mod config;
mod logging;
mod orchestrator;
mod report;
mod skip;
mod summary;

use cli::{CatalogArgs, Cli, Command, FetchArgs, GenerateArgs, ReportArgs, RunArgs};
use config::{EnvSettings, Layout};
use orchestrator::{Job, Orchestrator};
use skip::SkipList;

fn main() -> ExitCode {
    logging::init();
    match try_main() {
        Ok(code) => code,
        Err(err) => {
            log::error!("{err:#}");
            ExitCode::from(2)
        }
    }
}

fn try_main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let root = config::effective_root(cli.root)?;
    let mut layout = Layout::under(&root);

    match cli.cmd {
        Command::Run(args) => cmd_run(&mut layout, args),
        Command::Fetch(args) => cmd_fetch(&mut layout, args),
        Command::Generate(args) => cmd_generate(&layout, args),
        Command::Report(args) => cmd_report(&mut layout, args),
    }
}

impl Layout {
    fn apply_catalog_args(&mut self, args: &CatalogArgs) {
        if let Some(p) = &args.catalog {
            self.catalog = p.clone();
        }
        if let Some(p) = &args.bins {
            self.bins = p.clone();
        }
    }
}

/// Catalog records selected by `--filter`.
fn load_catalog(layout: &Layout, args: &CatalogArgs) -> Result<Vec<ArtifactRecord>> {
    let mut records = catalog::load(&layout.catalog)
        .with_context(|| format!("load catalog: {}", layout.catalog.display()))?;
    if let Some(filter) = &args.filter {
        records.retain(|r| r.name.contains(filter.as_str()));
    }
    log::info!(
        "Loaded {} artifacts from {}",
        records.len(),
        layout.catalog.display()
    );
    Ok(records)
}

fn cmd_run(layout: &mut Layout, args: RunArgs) -> Result<ExitCode> {
    layout.apply_catalog_args(&args.catalog);
    if let Some(p) = &args.skip {
        layout.skip = p.clone();
    }
    if let Some(p) = &args.results {
        layout.results = p.clone();
    }
    if let Some(p) = &args.cover_dir {
        layout.cover = p.clone();
    }
    let env = EnvSettings::from_env();
    let workers = args.catalog.jobs.unwrap_or_else(config::default_jobs);

    let records = load_catalog(layout, &args.catalog)?;
    let skip = SkipList::load(&layout.skip)?;
    if !skip.is_empty() {
        log::info!("{} cases listed in {}", skip.len(), layout.skip.display());
    }
    let subject = ScopedSubject::stage(&args.subject, &layout.temp)
        .with_context(|| format!("stage subject: {}", args.subject.display()))?;

    if !args.keep_results {
        config::reset_dir(&layout.results)?;
        config::reset_dir(&layout.cover)?;
    }

    let fetcher = ArtifactFetcher::new(FetcherConfig::from_env(&layout.bins));
    let mut jobs = orchestrator::provision(&fetcher, &records, workers);
    if !args.no_web {
        let input = args.web_input.clone().unwrap_or_else(|| args.subject.clone());
        jobs.push(Job::Web { input });
    }

    let settings = RunSettings {
        subject: subject.path().to_path_buf(),
        work_dir: layout.root.clone(),
        results_dir: layout.results.clone(),
        cover_dir: Some(layout.cover.clone()),
        timeout: args
            .timeout
            .map(Duration::from_secs)
            .unwrap_or(config::DEFAULT_TIMEOUT),
        draw_charts: env.draw_charts && !args.no_chart,
    };
    let summary = Orchestrator::new(&settings, workers).run(jobs, &skip)?;

    let summary_path = summary.write_json(&layout.results)?;
    log::info!(
        "passed={} failed={} skipped={} (summary: {})",
        summary.passed,
        summary.failed,
        summary.skipped,
        summary_path.display()
    );
    if let Some(markdown) = summary.render_failures() {
        env.summary.write(&markdown)?;
        let kept = subject.publish_copy(&layout.results, "subject")?;
        log::info!("Kept the subject at {} for inspection", kept.display());
    } else {
        log::info!("All tests passed.");
    }
    Ok(ExitCode::from(summary.exit_code()))
}

fn cmd_fetch(layout: &mut Layout, args: FetchArgs) -> Result<ExitCode> {
    layout.apply_catalog_args(&args.catalog);
    let records = load_catalog(layout, &args.catalog)?;
    let fetcher = ArtifactFetcher::new(FetcherConfig::from_env(&layout.bins));
    let workers = args.catalog.jobs.unwrap_or_else(config::default_jobs);

    fetcher.ensure_all(&records, workers)?;
    log::info!(
        "{} artifacts present under {} ({} downloads)",
        records.len(),
        layout.bins.display(),
        fetcher.request_count()
    );
    Ok(ExitCode::SUCCESS)
}

fn parse_mask(names: &[String]) -> Result<TestTypeMask> {
    let mut mask = TestTypeMask::empty();
    for name in names {
        let name = name.trim();
        let typ = TestType::parse(name).with_context(|| format!("unknown test type: {name:?}"))?;
        mask.insert(typ);
    }
    if mask.is_empty() {
        anyhow::bail!("at least one test type is required");
    }
    Ok(mask)
}

fn cmd_generate(layout: &Layout, args: GenerateArgs) -> Result<ExitCode> {
    let mask = parse_mask(&args.types)?;
    let out = args.out.clone().unwrap_or_else(|| layout.catalog.clone());
    let fetcher = ArtifactFetcher::new(FetcherConfig::from_env(&layout.bins));
    let index = ReleaseIndex::github(&args.repo, &args.tag);

    let mut generated = Vec::new();
    for asset in &args.assets {
        let Some(url) = index.asset_url(&fetcher, asset)? else {
            continue;
        };
        generated.push(ArtifactRecord {
            name: asset.clone(),
            url,
            test_types: mask,
            kind: ArtifactKind::Raw,
            targets: vec![Target::raw(asset.as_str())],
        });
    }
    if generated.is_empty() {
        anyhow::bail!("none of the requested assets exist in {}", index.metadata_url());
    }

    let mut records = Vec::new();
    if args.append && out.is_file() {
        records = catalog::load(&out).with_context(|| format!("load catalog: {}", out.display()))?;
        records.retain(|r| !generated.iter().any(|g| g.name == r.name));
    }
    records.extend(generated);

    // Re-parse to enforce unique destinations before anything is written.
    catalog::parse(&catalog::serialize(&records)).context("validate generated catalog")?;
    catalog::save(&out, &records)?;
    log::info!("Wrote {} records to {}", records.len(), out.display());
    Ok(ExitCode::SUCCESS)
}

fn cmd_report(layout: &mut Layout, args: ReportArgs) -> Result<ExitCode> {
    if let Some(p) = args.results {
        layout.results = p;
    }
    let env = EnvSettings::from_env();
    match report::scan(&layout.results)? {
        Some(finding) => {
            log::warn!("Unexpected warnings in {}", finding.path.display());
            env.summary.write(&finding.to_markdown())?;
        }
        None => log::info!("No unexpected warnings under {}", layout.results.display()),
    }
    Ok(ExitCode::SUCCESS)
}
