//! `solaudit scan`
//!
//! Configuration is layered: defaults, then `.solaudit.toml` (given with
//! `--config` or found next to the input), then command-line flags. Every
//! `.sol` file under the input is scanned and the per-file reports are merged
//! into one ordered list before rendering.

use crate::commands::Outcome;
use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Args, ValueEnum};
use colored::*;
use solaudit_scanners::analysis::version_parser::parse_version;
use solaudit_scanners::{
    Finding, MarkdownOptions, ScanReport, ScannerConfig, ScannerRegistry, ScanningEngine,
    Severity, SoliditySource,
};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum OutputFormat {
    Console,
    Json,
    Markdown,
}

#[derive(Args, Clone, Debug)]
pub struct ScanArgs {
    /// Solidity file or directory to scan
    #[arg(short, long)]
    pub input: PathBuf,

    #[arg(long, value_enum, default_value_t = OutputFormat::Console)]
    pub format: OutputFormat,

    /// Configuration file (defaults to `.solaudit.toml` next to the input)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Language version to assume instead of the `pragma solidity` line
    #[arg(long = "solc-version")]
    pub solc_version: Option<String>,

    /// Rule or finding id to skip; repeatable
    #[arg(long = "disable")]
    pub disable: Vec<String>,

    /// Run rules one after another instead of in parallel
    #[arg(long)]
    pub sequential: bool,
}

pub fn execute(args: &ScanArgs, verbose: bool) -> Result<Outcome> {
    let config = load_config(args)?;
    let files = find_solidity_files(&args.input)?;
    tracing::info!(files = files.len(), "starting scan");

    let engine = ScanningEngine::with_defaults(config);
    let mut report = ScanReport::default();
    for path in &files {
        report.merge(scan_file(&engine, path)?);
    }

    output_report(&report, args.format, verbose)?;

    Ok(if report.has_blocking_findings() {
        Outcome::Blocking
    } else {
        Outcome::Clean
    })
}

fn load_config(args: &ScanArgs) -> Result<ScannerConfig> {
    let mut config = match &args.config {
        Some(path) => ScannerConfig::load(path)?,
        None => {
            let dir = if args.input.is_dir() {
                args.input.as_path()
            } else {
                args.input.parent().unwrap_or_else(|| Path::new("."))
            };
            ScannerConfig::discover(dir)
        }
    };

    if let Some(version) = &args.solc_version {
        if parse_version(version).is_none() {
            bail!("invalid --solc-version '{}', expected e.g. 0.4.24", version);
        }
        config.language_version = Some(version.clone());
    }

    let registry = ScannerRegistry::with_defaults();
    for rule in &args.disable {
        if !registry.knows(rule) {
            bail!(
                "unknown rule '{}' (available: {})",
                rule,
                registry.list_ids().join(", ")
            );
        }
        if !config.disabled_rules.contains(rule) {
            config.disabled_rules.push(rule.clone());
        }
    }

    if args.sequential {
        config.parallel_execution = false;
    }

    Ok(config)
}

fn find_solidity_files(input: &Path) -> Result<Vec<PathBuf>> {
    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }
    if !input.exists() {
        bail!("input {} does not exist", input.display());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(input).sort_by_file_name() {
        let entry = entry.with_context(|| format!("failed to walk {}", input.display()))?;
        let path = entry.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "sol") {
            files.push(path.to_path_buf());
        }
    }

    if files.is_empty() {
        bail!("no .sol files found under {}", input.display());
    }
    Ok(files)
}

fn scan_file(engine: &ScanningEngine, path: &Path) -> Result<ScanReport> {
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let source = SoliditySource::new(content).with_file_path(path.display().to_string());
    engine
        .run(&source)
        .with_context(|| format!("failed to parse {}", path.display()))
}

fn severity_label(severity: Severity) -> ColoredString {
    let label = severity.to_string().to_uppercase();
    match severity {
        Severity::Critical => label.bright_red().bold(),
        Severity::High => label.red(),
        Severity::Medium => label.yellow(),
        Severity::Low => label.bright_yellow(),
    }
}

fn print_finding(index: usize, finding: &Finding, verbose: bool) {
    let loc = &finding.location;
    println!(
        "\n{}. {} [{}] {}",
        index,
        severity_label(finding.severity),
        finding.rule_id,
        finding.title.bright_white().bold()
    );
    print!("   at {}:{}:{}", loc.file, loc.line, loc.column);
    if let Some(function) = &loc.function {
        print!(" in {}", function);
    }
    if finding.occurrences > 1 {
        print!(" (x{})", finding.occurrences);
    }
    println!();
    if let Some(snippet) = &loc.snippet {
        println!("   > {}", snippet.dimmed());
    }
    if verbose {
        println!("   {}", finding.message);
        if let Some(recommendation) = &finding.recommendation {
            println!("   Fix: {}", recommendation);
        }
    }
}

fn output_report(report: &ScanReport, format: OutputFormat, verbose: bool) -> Result<()> {
    match format {
        OutputFormat::Console => {
            let count = report.count_by_severity();
            println!(
                "{} {} file(s), {} contract(s)",
                "Scanned".bright_cyan().bold(),
                report.files().len(),
                report.contracts_scanned()
            );
            if report.is_empty() {
                println!("{}", "No findings".bright_green());
                return Ok(());
            }
            println!(
                "Found {} finding(s): {} critical, {} high, {} medium, {} low",
                count.total(),
                count.critical,
                count.high,
                count.medium,
                count.low
            );
            for (i, finding) in report.findings().iter().enumerate() {
                print_finding(i + 1, finding, verbose);
            }
        }
        OutputFormat::Json => {
            println!("{}", report.to_json()?);
        }
        OutputFormat::Markdown => {
            let options = MarkdownOptions {
                generated_at: Some(Utc::now()),
                ..MarkdownOptions::default()
            };
            match report.to_markdown(&options) {
                Ok(markdown) => println!("{}", markdown),
                Err(e) => {
                    tracing::warn!("markdown rendering failed, printing raw findings: {}", e);
                    println!("{}", serde_json::to_string_pretty(report.findings())?);
                }
            }
        }
    }
    Ok(())
}
