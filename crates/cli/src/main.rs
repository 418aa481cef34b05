mod run;

use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use qti_eval::{AssessmentPackage, EngineSettings, NotificationLevel, RuntimeNotification};
use serde::Serialize;

use run::{RunFile, RunTarget};

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// QTI assessment runtime.
#[derive(Parser)]
#[command(name = "qti", version, about = "QTI assessment runtime")]
struct Cli {
    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    quiet: bool,

    /// Engine settings file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Random seed for templates, selection and ordering
    #[arg(long, global = true)]
    seed: Option<u64>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the documents of a package
    Inspect {
        /// Path to the package JSON file
        package: PathBuf,
    },

    /// Run static validation on a package
    Validate {
        /// Path to the package JSON file
        package: PathBuf,
        /// Comma-separated list of passes to run (v1,v2,v3,v4). Default: all.
        #[arg(long)]
        passes: Option<String>,
    },

    /// Run a standalone item session and print its item result
    RunItem {
        /// Path to the package JSON file
        package: PathBuf,
        /// Identifier of the item document
        item: String,
        /// Responses for one submission as JSON, e.g. '{"RESPONSE": ["A"]}'. Repeatable.
        #[arg(long = "responses", conflicts_with = "run")]
        responses: Vec<String>,
        /// Run file holding the submissions
        #[arg(long)]
        run: Option<PathBuf>,
    },

    /// Run a test session and print its assessment result
    RunTest {
        /// Path to the package JSON file
        package: PathBuf,
        /// Identifier of the test document
        test: String,
        /// Run file holding the submissions per item ref
        #[arg(long)]
        run: PathBuf,
    },
}

fn main() {
    let Cli {
        output,
        quiet,
        config,
        seed,
        log_level,
        command,
    } = Cli::parse();
    init_logging(&log_level, quiet);

    match command {
        Commands::Inspect { package } => cmd_inspect(&package, output, quiet),
        Commands::Validate { package, passes } => {
            cmd_validate(&package, passes.as_deref(), output, quiet)
        }
        Commands::RunItem {
            package,
            item,
            responses,
            run,
        } => {
            let run_file = match run {
                Some(path) => RunFile::load(&path),
                None => RunFile::from_responses(&responses),
            };
            let run_file = unwrap_or_exit(run_file, output, quiet);
            let settings = load_settings(config.as_deref(), seed.or(run_file.seed), output, quiet);
            cmd_run_item(&package, &item, settings, &run_file, output, quiet)
        }
        Commands::RunTest { package, test, run } => {
            let run_file = unwrap_or_exit(RunFile::load(&run), output, quiet);
            let settings = load_settings(config.as_deref(), seed.or(run_file.seed), output, quiet);
            cmd_run_test(&package, &test, settings, &run_file, output, quiet)
        }
    }
}

/// Install a stderr subscriber. `RUST_LOG` wins over `--log-level`.
fn init_logging(level: &str, quiet: bool) {
    let fallback = if quiet { "error" } else { level };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Engine settings from `--config`, with the seed applied on top.
/// `--seed` wins over the run file seed.
fn load_settings(
    config: Option<&Path>,
    seed: Option<u64>,
    output: OutputFormat,
    quiet: bool,
) -> EngineSettings {
    let mut settings = match config {
        Some(path) => match EngineSettings::load(path) {
            Ok(s) => s,
            Err(e) => {
                report_error(&format!("config error: {}", e), output, quiet);
                process::exit(1);
            }
        },
        None => EngineSettings::default(),
    };
    if seed.is_some() {
        settings.random_seed = seed;
    }
    settings
}

fn unwrap_or_exit<T>(result: Result<T, String>, output: OutputFormat, quiet: bool) -> T {
    match result {
        Ok(v) => v,
        Err(msg) => {
            report_error(&msg, output, quiet);
            process::exit(1);
        }
    }
}

fn read_package_json(path: &Path, output: OutputFormat, quiet: bool) -> serde_json::Value {
    let text = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            let msg = format!("error reading file '{}': {}", path.display(), e);
            report_error(&msg, output, quiet);
            process::exit(1);
        }
    };
    match serde_json::from_str(&text) {
        Ok(v) => v,
        Err(e) => {
            let msg = format!("error parsing JSON in '{}': {}", path.display(), e);
            report_error(&msg, output, quiet);
            process::exit(1);
        }
    }
}

fn load_package(path: &Path, output: OutputFormat, quiet: bool) -> AssessmentPackage {
    let json = read_package_json(path, output, quiet);
    match AssessmentPackage::from_interchange(&json) {
        Ok(p) => p,
        Err(e) => {
            report_error(&format!("load error: {}", e), output, quiet);
            process::exit(1);
        }
    }
}

fn print_json<T: Serialize>(value: &T) {
    let json = serde_json::to_string_pretty(value)
        .unwrap_or_else(|e| format!("{{\"error\": \"serialization: {}\"}}", e));
    println!("{}", json);
}

// ──────────────────────────────────────────────
// Inspect
// ──────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DocumentSummary {
    kind: &'static str,
    identifier: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    declarations: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    test_parts: Option<usize>,
}

fn cmd_inspect(package_path: &Path, output: OutputFormat, quiet: bool) {
    let json = read_package_json(package_path, output, quiet);
    let package = match qti_interchange::from_interchange(&json) {
        Ok(p) => p,
        Err(e) => {
            report_error(&format!("load error: {}", e), output, quiet);
            process::exit(1);
        }
    };

    let mut summaries: Vec<DocumentSummary> = package
        .items()
        .map(|item| DocumentSummary {
            kind: "item",
            identifier: item.identifier.clone(),
            title: item.title.clone(),
            declarations: item.response_declarations.len()
                + item.outcome_declarations.len()
                + item.template_declarations.len(),
            test_parts: None,
        })
        .collect();
    summaries.extend(package.tests().map(|test| DocumentSummary {
        kind: "test",
        identifier: test.identifier.clone(),
        title: test.title.clone(),
        declarations: test.outcome_declarations.len(),
        test_parts: Some(test.test_parts.len()),
    }));

    if quiet {
        return;
    }
    match output {
        OutputFormat::Json => print_json(&serde_json::json!({
            "id": package.id,
            "qtiVersion": package.qti_version,
            "documents": summaries,
        })),
        OutputFormat::Text => {
            println!("package '{}' (QTI {})", package.id, package.qti_version);
            for s in &summaries {
                let title = s.title.as_deref().map(|t| format!(" \"{}\"", t)).unwrap_or_default();
                match s.test_parts {
                    Some(parts) => println!(
                        "  {} {}{}: {} declarations, {} test parts",
                        s.kind, s.identifier, title, s.declarations, parts
                    ),
                    None => println!(
                        "  {} {}{}: {} declarations",
                        s.kind, s.identifier, title, s.declarations
                    ),
                }
            }
        }
    }
}

// ──────────────────────────────────────────────
// Validate
// ──────────────────────────────────────────────

fn cmd_validate(package_path: &Path, passes: Option<&str>, output: OutputFormat, quiet: bool) {
    let json = read_package_json(package_path, output, quiet);

    let selected: Vec<&str> = match passes {
        None => qti_analyze::PASSES.to_vec(),
        Some(p) => p.split(',').map(|s| s.trim()).collect(),
    };
    if let Some(bad) = selected.iter().find(|s| !qti_analyze::PASSES.contains(*s)) {
        let msg = format!(
            "invalid pass '{}'. Valid: {}",
            bad,
            qti_analyze::PASSES.join(", ")
        );
        report_error(&msg, output, quiet);
        process::exit(1);
    }

    let result = match qti_analyze::validate_selected(&json, &selected) {
        Ok(r) => r,
        Err(e) => {
            report_error(&format!("validation error: {}", e), output, quiet);
            process::exit(1);
        }
    };

    if !quiet {
        match output {
            OutputFormat::Json => print_json(&result),
            OutputFormat::Text => {
                for item in &result.items {
                    println!("{}", item);
                }
                let (errors, warnings, infos) = result.counts();
                println!(
                    "{}: {} errors, {} warnings, {} infos",
                    package_path.display(),
                    errors,
                    warnings,
                    infos
                );
            }
        }
    }

    if result.has_errors() {
        process::exit(1);
    }
}

// ──────────────────────────────────────────────
// Run
// ──────────────────────────────────────────────

fn level_name(level: NotificationLevel) -> &'static str {
    match level {
        NotificationLevel::Info => "info",
        NotificationLevel::Warning => "warning",
        NotificationLevel::Error => "error",
    }
}

fn print_notifications(notifications: &[RuntimeNotification]) {
    for n in notifications {
        eprintln!("{}: {}: {}", level_name(n.level), n.source, n.message);
    }
}

fn cmd_run_item(
    package_path: &Path,
    item: &str,
    settings: EngineSettings,
    run_file: &RunFile,
    output: OutputFormat,
    quiet: bool,
) {
    unwrap_or_exit(run_file.check_target(RunTarget::Item, item), output, quiet);
    let package = load_package(package_path, output, quiet);

    let outcome = match run::run_item(&package, item, settings, run_file) {
        Ok(o) => o,
        Err(e) => {
            report_error(&format!("runtime error: {}", e), output, quiet);
            process::exit(1);
        }
    };

    if quiet {
        return;
    }
    match output {
        OutputFormat::Json => print_json(&outcome.result),
        OutputFormat::Text => {
            let status = if outcome.finished { "finished" } else { "open" };
            println!("item '{}': {}", outcome.result.identifier, status);
            for i in &outcome.unprocessed {
                println!("  submission {} was not processed", i + 1);
            }
            for v in &outcome.result.variables {
                println!("  {} {} = {}", v.kind.name(), v.identifier, v.value);
            }
            print_notifications(&outcome.notifications);
        }
    }
}

fn cmd_run_test(
    package_path: &Path,
    test: &str,
    settings: EngineSettings,
    run_file: &RunFile,
    output: OutputFormat,
    quiet: bool,
) {
    unwrap_or_exit(run_file.check_target(RunTarget::Test, test), output, quiet);
    let package = load_package(package_path, output, quiet);

    let outcome = match run::run_test(&package, test, settings, run_file) {
        Ok(o) => o,
        Err(e) => {
            report_error(&format!("runtime error: {}", e), output, quiet);
            process::exit(1);
        }
    };

    if quiet {
        return;
    }
    match output {
        OutputFormat::Json => print_json(&outcome.result),
        OutputFormat::Text => {
            let status = if outcome.finished { "finished" } else { "open" };
            let test_result = &outcome.result.test_result;
            println!("test '{}': {}", test_result.identifier, status);
            for v in &test_result.variables {
                println!("  {} = {}", v.identifier, v.value);
            }
            for item in &outcome.result.item_results {
                println!(
                    "item {} '{}': {:?}",
                    item.sequence_index.unwrap_or_default(),
                    item.identifier,
                    item.session_status
                );
                for v in &item.variables {
                    println!("  {} {} = {}", v.kind.name(), v.identifier, v.value);
                }
            }
            print_notifications(&outcome.notifications);
        }
    }
}

/// Report an error to stderr in the chosen output format.
pub(crate) fn report_error(msg: &str, output: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    match output {
        OutputFormat::Text => eprintln!("{}", msg),
        OutputFormat::Json => {
            eprintln!("{}", serde_json::json!({ "error": msg }));
        }
    }
}
