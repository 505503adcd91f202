use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use colored::*;

use gwen_eval::launcher::ResultsSummary;
use gwen_eval::{
    assemble, Engine, Launcher, ReportFormat, Settings, SysoutReporter, TagFilter,
};

#[derive(Parser)]
#[command(name = "gwen")]
#[command(about = "An interpreter for Gherkin feature specifications", long_about = None)]
#[command(version)]
struct Cli {
    /// Batch mode: evaluate and exit, non-zero on failure
    #[arg(short = 'b', long)]
    batch: bool,

    /// Evaluate feature units in parallel
    #[arg(short = 'p', long)]
    parallel: bool,

    /// Translate and interpolate without executing side effects
    #[arg(short = 'n', long = "dry-run")]
    dry_run: bool,

    /// Report output directory
    #[arg(short = 'r', long = "report", value_name = "DIR")]
    report: Option<PathBuf>,

    /// Comma-separated report formats (html,junit,json,rp,sysout)
    #[arg(short = 'f', long = "formats", value_name = "FMTS")]
    formats: Option<String>,

    /// Include/exclude tag filter (@tag,~@other)
    #[arg(short = 't', long = "tags", value_name = "TAGS")]
    tags: Option<String>,

    /// Additional meta files
    #[arg(short = 'm', long = "meta", value_name = "FILES", value_delimiter = ',')]
    meta: Vec<PathBuf>,

    /// CSV or JSON data file
    #[arg(short = 'i', long = "input-data", value_name = "FILE")]
    input_data: Option<PathBuf>,

    /// Initialise a working directory and exit
    #[arg(long = "init", value_name = "DIR", num_args = 0..=1, default_missing_value = ".")]
    init: Option<PathBuf>,

    /// Verbose logging
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Feature files or directories to evaluate
    #[arg(value_name = "PATHS")]
    paths: Vec<PathBuf>,
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::WARN
        })
        .with_target(false)
        .init();

    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(error) => {
            eprintln!("{} {:#}", "error:".red().bold(), error);
            std::process::exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    if let Some(dir) = cli.init {
        init_working_dir(&dir)?;
        return Ok(0);
    }

    if cli.paths.is_empty() {
        anyhow::bail!("no feature files or directories given (try --init to scaffold one)");
    }
    if !cli.batch {
        eprintln!(
            "{}",
            "note: the interactive REPL is not bundled with this build, running in batch mode"
                .dimmed()
        );
    }

    let mut settings = Settings::load(".").unwrap_or_default();
    if cli.dry_run {
        settings.dry_run = true;
    }
    if cli.parallel {
        settings.parallel = true;
    }

    let formats = parse_formats(cli.formats.as_deref())?;
    let filter = match cli.tags.as_deref() {
        Some(tags) => TagFilter::parse(tags)?,
        None => TagFilter::default(),
    };

    let stream = assemble(&cli.paths, &cli.meta, cli.input_data.as_deref())?;
    if stream.unit_count() == 0 {
        println!("{} {}", "✓".green().bold(), "No features found".dimmed());
        return Ok(0);
    }

    let engine = Engine::new().with_tag_filter(filter);
    let stop = Arc::new(AtomicBool::new(false));
    let mut launcher = Launcher::new(settings, engine).with_stop_flag(Arc::clone(&stop));
    if formats.contains(&ReportFormat::Sysout) {
        launcher.add_reporter(Box::new(SysoutReporter));
    }
    if let Some(report_dir) = &cli.report {
        std::fs::create_dir_all(report_dir)
            .with_context(|| format!("failed to create report directory {}", report_dir.display()))?;
        launcher.add_reporter(Box::new(AttachmentReporter {
            report_dir: report_dir.clone(),
        }));
    }

    let summary = launcher.run(&stream)?;
    print_summary(&summary);
    Ok(summary.exit_code())
}

fn parse_formats(formats: Option<&str>) -> Result<Vec<ReportFormat>> {
    let Some(formats) = formats else {
        return Ok(vec![ReportFormat::Sysout]);
    };
    formats
        .split(',')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(|name| {
            ReportFormat::parse(name)
                .ok_or_else(|| anyhow::anyhow!("unknown report format: {}", name))
        })
        .collect()
}

/// Copies step attachments into the report directory as units finish.
struct AttachmentReporter {
    report_dir: PathBuf,
}

impl gwen_eval::Reporter for AttachmentReporter {
    fn report_detail(
        &mut self,
        _unit: &gwen_eval::FeatureUnit,
        result: &gwen_eval::SpecResult,
    ) -> Result<Option<PathBuf>> {
        gwen_eval::report::persist_attachments(&self.report_dir, result)?;
        Ok(None)
    }
}

fn print_summary(summary: &ResultsSummary) {
    println!();
    for result in &summary.results {
        let status = colored_status(result.status.keyword());
        let name = &result.unit_name;
        let base_len = name.chars().count();
        let dots = ".".repeat(if base_len < 60 { 60 - base_len } else { 1 });
        println!("  {}{}{}", name, dots.dimmed(), status);
        if let Some(error) = result.status.error() {
            println!("    {} {}", "✗".red().bold(), error.lines().next().unwrap_or(""));
        }
    }
    println!();
    let status = summary.status();
    let counts: Vec<String> = summary
        .feature_counts()
        .iter()
        .map(|(keyword, count)| format!("{} {}", count, keyword))
        .collect();
    if status.is_ok_exit() {
        println!(
            "{} {} {}",
            "✓".green().bold(),
            status.keyword().green().bold(),
            counts.join(", ").dimmed()
        );
    } else {
        println!(
            "{} {} {}",
            "✗".red().bold(),
            status.keyword().red().bold(),
            counts.join(", ").dimmed()
        );
    }
}

fn colored_status(keyword: &str) -> ColoredString {
    match keyword {
        "Passed" | "Loaded" => keyword.green(),
        "Sustained" => keyword.yellow(),
        "Skipped" | "Disabled" => keyword.cyan(),
        "Pending" => keyword.blue(),
        _ => keyword.red(),
    }
}

fn init_working_dir(dir: &PathBuf) -> Result<()> {
    let features_dir = dir.join("features");
    std::fs::create_dir_all(&features_dir)
        .with_context(|| format!("failed to create {}", features_dir.display()))?;

    let meta_path = features_dir.join("bindings.meta");
    if !meta_path.exists() {
        let sample_meta = r#"Feature: Shared bindings

  @StepDef
  Scenario: I have a configured environment
    Given my environment is "local"
"#;
        std::fs::write(&meta_path, sample_meta)
            .with_context(|| format!("failed to write {}", meta_path.display()))?;
        println!("{} Created {}", "✓".green().bold(), meta_path.display());
    }

    let feature_path = features_dir.join("example.feature");
    if !feature_path.exists() {
        let sample_feature = r#"Feature: Example

  Scenario: Bind and check a value
    Given I have a configured environment
    When my greeting is "hello ${environment}"
    Then greeting should be "hello local"
"#;
        std::fs::write(&feature_path, sample_feature)
            .with_context(|| format!("failed to write {}", feature_path.display()))?;
        println!("{} Created {}", "✓".green().bold(), feature_path.display());
    }

    println!(
        "\n{} Gwen initialised. Try: gwen -b {}",
        "✓".green().bold(),
        features_dir.display()
    );
    Ok(())
}
