//! Netforge CLI - schematic generation and electrical rule checking from the command line.

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use netforge::external::{erc_report_path, ExternalTool};
use netforge::plugins::{find_diagnostics, summarize_diagnostics, DiagnosticsSummary};
use netforge::{
    placement_file_name, ConfigError, Finding, GeneratorConfig, NetforgeCore, NetforgeError, Provenance, Registries,
    RunOptions, RunOutcome, Severity,
};
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::EnvFilter;

/// Exit status for runs that completed but were not accepted.
const EXIT_REJECTED: i32 = 1;
/// Exit status for fatal errors.
const EXIT_FATAL: i32 = 2;

#[derive(Parser)]
#[command(name = "netforge")]
#[command(about = "Hierarchical KiCad schematic generator and rule checker", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate, check and publish the schematic documents
    Generate {
        /// Configuration file (JSON); built-in defaults when omitted
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Output directory
        #[arg(short, long, value_name = "DIR", default_value = "out")]
        out: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value = "human")]
        format: OutputFormat,

        /// Placement table to honour locked rows from (defaults to the one in the output directory)
        #[arg(long, value_name = "FILE")]
        previous_placement: Option<PathBuf>,

        /// Lock every row of the written placement table
        #[arg(long)]
        accept_placement: bool,

        /// Skip the external ERC and PDF steps
        #[arg(long)]
        no_external: bool,

        #[command(flatten)]
        stamp: StampArgs,
    },

    /// Build and check the design without writing anything
    Check {
        /// Configuration file (JSON); built-in defaults when omitted
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "human")]
        format: OutputFormat,

        /// Exit with error code if findings exist at this severity or higher
        #[arg(long, value_enum, default_value = "error")]
        fail_on: FailOnSeverity,
    },

    /// Generate the footprint placement table only
    Place {
        /// Configuration file (JSON); built-in defaults when omitted
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Previous placement table whose locked rows are kept
        #[arg(long, value_name = "FILE")]
        previous: Option<PathBuf>,

        /// Where to write the table (defaults to `<name>.placement.csv`)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Lock every row
        #[arg(long)]
        accept: bool,

        /// Unlock a reference so the grid position is used again
        #[arg(long, value_name = "REF")]
        unlock: Vec<String>,
    },

    /// List available rules and generators
    Rules {
        /// Configuration file whose plugin manifest is loaded as well
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Show detailed rule descriptions
        #[arg(short, long)]
        verbose: bool,
    },

    /// Run the external ERC on a published schematic
    Erc {
        /// Root schematic
        #[arg(value_name = "FILE")]
        schematic: PathBuf,

        /// Configuration file supplying the tool path and timeout
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Report path (defaults to `<schematic>.erc.json`)
        #[arg(short, long, value_name = "FILE")]
        report: Option<PathBuf>,
    },

    /// Summarize plugin diagnostics files below a directory
    Diagnostics {
        /// Directory to scan
        #[arg(value_name = "DIR", default_value = ".")]
        dir: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value = "human")]
        format: OutputFormat,
    },
}

#[derive(clap::Args)]
struct StampArgs {
    /// RFC 3339 timestamp recorded in the outputs (defaults to now)
    #[arg(long, value_name = "TIME")]
    timestamp: Option<String>,

    /// Source revision recorded in the outputs (defaults to the git revision)
    #[arg(long, value_name = "REV")]
    revision: Option<String>,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON output for CI/CD
    Json,
    /// GitHub Actions format
    Github,
    /// GitLab CI format
    Gitlab,
}

#[derive(Clone, ValueEnum)]
enum FailOnSeverity {
    Error,
    Warning,
    Info,
}

fn main() {
    let cli = Cli::parse();
    init_tracing();

    let exit_code = match cli.command {
        Commands::Generate {
            config,
            out,
            format,
            previous_placement,
            accept_placement,
            no_external,
            stamp,
        } => handle_generate(
            config.as_deref(),
            out,
            format,
            previous_placement,
            accept_placement,
            no_external,
            &stamp,
        ),
        Commands::Check {
            config,
            format,
            fail_on,
        } => handle_check(config.as_deref(), format, fail_on),
        Commands::Place {
            config,
            previous,
            output,
            accept,
            unlock,
        } => handle_place(config.as_deref(), previous.as_deref(), output, accept, &unlock),
        Commands::Rules { config, verbose } => handle_rules(config.as_deref(), verbose),
        Commands::Erc {
            schematic,
            config,
            report,
        } => handle_erc(&schematic, config.as_deref(), report),
        Commands::Diagnostics { dir, format } => handle_diagnostics(&dir, format),
    };

    process::exit(exit_code);
}

/// Logs go to stderr so stdout stays machine-readable; `RUST_LOG` sets the filter.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<GeneratorConfig, ConfigError> {
    match path {
        Some(path) => GeneratorConfig::load(path),
        None => {
            let config = GeneratorConfig::default();
            config.validate()?;
            Ok(config)
        }
    }
}

fn base_dir(config: &GeneratorConfig) -> &Path {
    if config.base_dir.as_os_str().is_empty() {
        Path::new(".")
    } else {
        &config.base_dir
    }
}

fn make_stamp(config: &GeneratorConfig, args: &StampArgs) -> Result<Provenance, String> {
    let mut stamp = Provenance::current(base_dir(config));
    if let Some(ts) = &args.timestamp {
        stamp.timestamp = DateTime::parse_from_rfc3339(ts)
            .map_err(|e| format!("invalid --timestamp '{}': {}", ts, e))?
            .with_timezone(&Utc);
    }
    if let Some(rev) = &args.revision {
        stamp.source_revision = rev.clone();
    }
    Ok(stamp)
}

fn handle_generate(
    config: Option<&Path>,
    out: PathBuf,
    format: OutputFormat,
    previous_placement: Option<PathBuf>,
    accept_placement: bool,
    no_external: bool,
    stamp: &StampArgs,
) -> i32 {
    let config = match load_config(config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            return EXIT_FATAL;
        }
    };
    let stamp = match make_stamp(&config, stamp) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {}", e);
            return EXIT_FATAL;
        }
    };

    let mut options = RunOptions::new(out, stamp);
    options.previous_placement = previous_placement;
    options.accept_placement = accept_placement;
    options.external = !no_external;

    match NetforgeCore::generate(&config, &options) {
        Ok(outcome) => {
            output_outcome(&outcome, &format);
            if outcome.accepted() && !outcome.external_failed() {
                0
            } else {
                EXIT_REJECTED
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            EXIT_FATAL
        }
    }
}

fn handle_check(config: Option<&Path>, format: OutputFormat, fail_on: FailOnSeverity) -> i32 {
    let result = load_config(config).map_err(NetforgeError::from).and_then(|config| {
        let stamp = Provenance::current(base_dir(&config));
        let registries = Registries::build(&config, &stamp)?;
        for failure in &registries.plugins.failures {
            eprintln!("Warning: plugin {} ({}): {}", failure.path, failure.kind, failure.message);
        }
        NetforgeCore::check(&config, &registries, None).map(|report| (config, report))
    });

    match result {
        Ok((config, report)) => {
            output_findings(&config.project.name, &report.findings, &format);
            if report.findings.iter().any(|f| meets(f.severity, &fail_on)) {
                EXIT_REJECTED
            } else {
                0
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            EXIT_FATAL
        }
    }
}

fn handle_place(
    config: Option<&Path>,
    previous: Option<&Path>,
    output: Option<PathBuf>,
    accept: bool,
    unlock: &[String],
) -> i32 {
    let result = load_config(config).map_err(NetforgeError::from).and_then(|config| {
        let mut plan = NetforgeCore::place(&config, previous, accept)?;
        for reference in unlock {
            plan.unlock(reference)?;
        }
        let path = output.unwrap_or_else(|| PathBuf::from(placement_file_name(&config.project.name)));
        plan.to_table().write(&path)?;
        Ok((plan, path))
    });

    match result {
        Ok((plan, path)) => {
            let stats = plan.stats();
            println!("Placement written to {}", path.display());
            println!("  Placed:    {}", stats.placed);
            println!("  Locked:    {}", stats.locked);
            println!("  Conflicts: {}", stats.conflicts);
            for conflict in plan.conflicts() {
                println!("    - {}", conflict.message);
            }
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            EXIT_FATAL
        }
    }
}

fn handle_rules(config: Option<&Path>, verbose: bool) -> i32 {
    let registries = load_config(config).map_err(NetforgeError::from).and_then(|config| {
        let stamp = Provenance::current(base_dir(&config));
        Registries::build(&config, &stamp)
    });
    let registries = match registries {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error: {}", e);
            return EXIT_FATAL;
        }
    };

    println!("Available rules:\n");
    for (name, rule) in registries.rules.iter() {
        println!("  {} [{}]", name, rule.severity().as_str());
        println!("    {}", rule.name());
        if verbose {
            println!("    {}", rule.description());
        }
        println!();
    }

    println!("Available generators:\n");
    for (name, generator) in registries.generators.iter() {
        println!("  {}", name);
        if verbose {
            println!("    {}", generator.description());
        }
    }

    for failure in &registries.plugins.failures {
        eprintln!("Warning: plugin {} ({}): {}", failure.path, failure.kind, failure.message);
    }
    0
}

fn handle_erc(schematic: &Path, config: Option<&Path>, report: Option<PathBuf>) -> i32 {
    let config = match load_config(config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            return EXIT_FATAL;
        }
    };
    let report = report.unwrap_or_else(|| erc_report_path(schematic));
    let tool = ExternalTool::from_config(&config.external);

    match tool.erc(schematic, &report) {
        Ok(_) => {
            println!("ERC passed: {}", report.display());
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            EXIT_REJECTED
        }
    }
}

fn handle_diagnostics(dir: &Path, format: OutputFormat) -> i32 {
    let files = match find_diagnostics(dir) {
        Ok(files) => files,
        Err(e) => {
            eprintln!("Error: cannot scan {}: {}", dir.display(), e);
            return EXIT_FATAL;
        }
    };
    let summaries: Vec<DiagnosticsSummary> = files.iter().map(|p| summarize_diagnostics(p)).collect();

    match format {
        OutputFormat::Json | OutputFormat::Gitlab => {
            let output = serde_json::json!({
                "files": summaries,
                "total_files": summaries.len(),
            });
            println!("{}", serde_json::to_string_pretty(&output).unwrap_or_default());
        }
        OutputFormat::Github => {
            for summary in &summaries {
                println!(
                    "::error file={}::{}",
                    summary.path.display(),
                    describe_diagnostics(summary)
                );
            }
        }
        OutputFormat::Human => {
            if summaries.is_empty() {
                println!("No plugin diagnostics found");
            }
            for summary in &summaries {
                println!("{}: {}", summary.path.display(), describe_diagnostics(summary));
            }
        }
    }

    if summaries.is_empty() {
        0
    } else {
        EXIT_REJECTED
    }
}

fn describe_diagnostics(summary: &DiagnosticsSummary) -> String {
    if let Some(error) = &summary.error {
        return error.clone();
    }
    summary
        .failures
        .iter()
        .map(|(kind, count)| format!("{}={}", kind, count))
        .collect::<Vec<_>>()
        .join(", ")
}

fn meets(severity: Severity, threshold: &FailOnSeverity) -> bool {
    let rank = |s: Severity| match s {
        Severity::Error => 2,
        Severity::Warning => 1,
        Severity::Info => 0,
    };
    let limit = match threshold {
        FailOnSeverity::Error => 2,
        FailOnSeverity::Warning => 1,
        FailOnSeverity::Info => 0,
    };
    rank(severity) >= limit
}

fn output_outcome(outcome: &RunOutcome, format: &OutputFormat) {
    let summary = &outcome.summary;
    match format {
        OutputFormat::Human => {
            output_findings(&summary.title, &summary.findings, format);
            println!("\n  Documents:");
            for doc in &summary.documents {
                match &doc.error {
                    Some(error) => println!("    {} {:?}: {}", doc.path, doc.status, error),
                    None => println!("    {} {:?}", doc.path, doc.status),
                }
            }
            if let Some(placement) = &summary.placement {
                println!(
                    "\n  Placement: {} placed, {} locked, {} conflicts",
                    placement.placed, placement.locked, placement.conflicts
                );
            }
            if let Some(path) = &outcome.diagnostics_path {
                println!("\n  Plugin failures: {} (see {})", summary.plugin_failures, path.display());
            }
            for run in &outcome.external {
                match &run.result {
                    Ok(_) => println!("\n  {}: ok", run.action),
                    Err(e) => println!("\n  {}: {}", run.action, e),
                }
            }
            println!(
                "\n  {} ({})",
                if summary.accepted { "Accepted" } else { "Rejected" },
                outcome.summary_path.display()
            );
        }
        OutputFormat::Json => {
            let output = serde_json::json!({
                "summary": summary,
                "summary_path": outcome.summary_path.display().to_string(),
                "published": outcome
                    .published
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>(),
                "external": outcome
                    .external
                    .iter()
                    .map(|run| serde_json::json!({
                        "action": run.action,
                        "ok": run.result.is_ok(),
                        "error": run.result.as_ref().err().map(|e| e.to_string()),
                    }))
                    .collect::<Vec<_>>(),
            });
            println!("{}", serde_json::to_string_pretty(&output).unwrap_or_default());
        }
        OutputFormat::Github | OutputFormat::Gitlab => output_findings(&summary.title, &summary.findings, format),
    }
}

fn output_findings(title: &str, findings: &[Finding], format: &OutputFormat) {
    match format {
        OutputFormat::Human => output_human(title, findings),
        OutputFormat::Json => output_json(title, findings),
        OutputFormat::Github => output_github(findings),
        OutputFormat::Gitlab => output_gitlab(findings),
    }
}

fn output_human(title: &str, findings: &[Finding]) {
    println!("\nDesign: {}", title);
    println!("{}", "─".repeat(60));

    if findings.is_empty() {
        println!("  No findings");
        return;
    }

    for (label, severity) in [
        ("ERROR", Severity::Error),
        ("WARNING", Severity::Warning),
        ("INFO", Severity::Info),
    ] {
        let matching: Vec<&Finding> = findings.iter().filter(|f| f.severity == severity).collect();
        if matching.is_empty() {
            continue;
        }
        println!("\n  {}:", label);
        for finding in matching {
            println!("    - {}", finding.message);
            println!("      At: {}", describe_location(finding));
            if let Some(ref suggestion) = finding.suggestion {
                println!("      Fix: {}", suggestion);
            }
        }
    }

    let count = |s: Severity| findings.iter().filter(|f| f.severity == s).count();
    println!("\n  Summary:");
    println!("    Errors:   {}", count(Severity::Error));
    println!("    Warnings: {}", count(Severity::Warning));
    println!("    Info:     {}", count(Severity::Info));
}

fn describe_location(finding: &Finding) -> String {
    let mut parts = vec![finding.location.sheet.clone()];
    if let Some(net) = &finding.location.net {
        parts.push(format!("net {}", net));
    }
    if let Some(pin) = &finding.location.pin {
        parts.push(format!("pin {}", pin));
    }
    parts.join(", ")
}

fn output_json(title: &str, findings: &[Finding]) {
    let count = |s: Severity| findings.iter().filter(|f| f.severity == s).count();
    let output = serde_json::json!({
        "design": title,
        "findings": findings,
        "counts": {
            "error": count(Severity::Error),
            "warning": count(Severity::Warning),
            "info": count(Severity::Info),
        }
    });
    println!("{}", serde_json::to_string_pretty(&output).unwrap_or_default());
}

fn severity_to_github(finding: &Finding) -> &'static str {
    match finding.severity {
        Severity::Error => "error",
        Severity::Warning => "warning",
        Severity::Info => "notice",
    }
}

fn output_github(findings: &[Finding]) {
    for finding in findings {
        println!(
            "::{} title={}::{} ({})",
            severity_to_github(finding),
            finding.rule_id,
            finding.message.replace('\n', " "),
            describe_location(finding)
        );
    }
}

fn severity_to_gitlab(finding: &Finding) -> &'static str {
    match finding.severity {
        Severity::Error => "blocker",
        Severity::Warning => "major",
        Severity::Info => "info",
    }
}

fn output_gitlab(findings: &[Finding]) {
    let reports: Vec<serde_json::Value> = findings
        .iter()
        .map(|finding| {
            serde_json::json!({
                "description": finding.message,
                "check_name": finding.rule_id,
                "severity": severity_to_gitlab(finding),
                "location": {
                    "path": finding.location.sheet,
                }
            })
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&reports).unwrap_or_default());
}
