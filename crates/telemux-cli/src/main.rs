use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use glob::glob;
use telemux_core::{
    DecoderConfig, FailurePolicy, JobConfig, JobError, JobReport, run_job,
};

#[derive(Parser, Debug)]
#[command(name = "telemux")]
#[command(version, long_version = concat!(
    env!("CARGO_PKG_VERSION"),
    " (commit ", env!("TELEMUX_BUILD_COMMIT"),
    ", ", env!("TELEMUX_BUILD_DATE"), ")"
))]
#[command(
    about = "Demultiplexer and decode orchestrator for multi-sensor logger captures.",
    long_about = None,
    after_help = "Examples:\n  telemux capture analyse ride.bin --decoder ./fifo_decoder -o report.json\n  telemux capture analyze ride.bin --decoder ./fifo_decoder --stdout\n  telemux capture analyse ride.dat --decoder ./fifo_decoder --out-dir out -o out/report.json"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Operations on multi-sensor logger captures (offline-first).
    Capture {
        #[command(subcommand)]
        command: CaptureCommands,
    },
}

#[derive(Subcommand, Debug)]
enum CaptureCommands {
    /// Demux a capture, decode every sensor, and generate a versioned JSON report.
    #[command(alias = "analyze")]
    #[command(
        after_help = "Examples:\n  telemux capture analyse ride.bin --decoder ./fifo_decoder -o report.json\n  telemux capture analyze ride.bin --decoder ./fifo_decoder --stdout"
    )]
    Analyse {
        /// Path to a .bin or .dat capture file
        input: PathBuf,

        /// Path to the external decoder executable
        #[arg(long)]
        decoder: PathBuf,

        /// Output report path (JSON)
        #[arg(short = 'o', long, required_unless_present = "stdout")]
        report: Option<PathBuf>,

        /// Write JSON report to stdout
        #[arg(long, conflicts_with = "report")]
        stdout: bool,

        /// Pretty-print JSON output
        #[arg(long, conflicts_with = "compact")]
        pretty: bool,

        /// Compact JSON output (default)
        #[arg(long)]
        compact: bool,

        /// Directory for per-sensor sinks and artifacts (default: next to the input)
        #[arg(long)]
        out_dir: Option<PathBuf>,

        /// Per-sensor decode time budget in seconds
        #[arg(long, default_value_t = 60)]
        timeout_secs: u64,

        /// Maximum concurrent decoder processes
        #[arg(long, default_value_t = 4)]
        jobs: usize,

        /// Fail the whole job if any sensor fails to decode
        #[arg(long)]
        strict: bool,

        /// Suppress non-error output
        #[arg(long)]
        quiet: bool,

        /// List failed sensors after analysis
        #[arg(long)]
        list_failures: bool,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Capture { command } => match command {
            CaptureCommands::Analyse {
                input,
                decoder,
                report,
                stdout,
                pretty,
                compact,
                out_dir,
                timeout_secs,
                jobs,
                strict,
                quiet,
                list_failures,
            } => cmd_capture_analyse(AnalyseArgs {
                input,
                decoder,
                report,
                stdout,
                pretty,
                compact,
                out_dir,
                timeout_secs,
                jobs,
                strict,
                quiet,
                list_failures,
            }),
        },
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {}", err.message);
            if let Some(hint) = err.hint {
                eprintln!("hint: {}", hint);
            }
            ExitCode::from(2)
        }
    }
}

#[derive(Debug)]
struct CliError {
    message: String,
    hint: Option<String>,
}

impl CliError {
    fn new(message: impl Into<String>, hint: Option<String>) -> Self {
        Self {
            message: message.into(),
            hint,
        }
    }
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

impl From<anyhow::Error> for CliError {
    fn from(err: anyhow::Error) -> Self {
        CliError::new(err.to_string(), None)
    }
}

struct AnalyseArgs {
    input: PathBuf,
    decoder: PathBuf,
    report: Option<PathBuf>,
    stdout: bool,
    pretty: bool,
    compact: bool,
    out_dir: Option<PathBuf>,
    timeout_secs: u64,
    jobs: usize,
    strict: bool,
    quiet: bool,
    list_failures: bool,
}

fn cmd_capture_analyse(args: AnalyseArgs) -> Result<(), CliError> {
    let resolved_input = resolve_input_path(&args.input)?;
    validate_input_file(&resolved_input)?;
    let input_abs = fs::canonicalize(&resolved_input)
        .with_context(|| format!("Failed to resolve input path: {}", resolved_input.display()))?;

    let report = if args.stdout {
        None
    } else {
        Some(args.report.clone().ok_or_else(|| {
            CliError::new(
                "missing output path",
                Some("use -o/--report or --stdout".to_string()),
            )
        })?)
    };

    if let Some(report_path) = report.as_ref() {
        let report_dir = report_path
            .parent()
            .map(|parent| {
                if parent.as_os_str().is_empty() {
                    fs::canonicalize(".")
                } else {
                    fs::canonicalize(parent)
                }
            })
            .transpose()
            .with_context(|| format!("Failed to resolve output path: {}", report_path.display()))?;
        if let Some(report_dir) = report_dir {
            let report_target = report_dir.join(
                report_path
                    .file_name()
                    .ok_or_else(|| anyhow::anyhow!("Invalid report path"))?,
            );
            if report_target == input_abs {
                return Err(CliError::new(
                    format!(
                        "report path must differ from input: {}",
                        report_path.display()
                    ),
                    Some("choose a different output path".to_string()),
                ));
            }
        }
    }

    let mut decoder_config = DecoderConfig::new(args.decoder);
    decoder_config.timeout = Duration::from_secs(args.timeout_secs);
    decoder_config.max_jobs = args.jobs;
    let mut job_config = JobConfig::new(decoder_config);
    job_config.out_dir = args.out_dir.clone();
    job_config.policy = if args.strict {
        FailurePolicy::Strict
    } else {
        FailurePolicy::Lenient
    };

    let rep = run_job(&resolved_input, &job_config).map_err(job_error_to_cli)?;
    let json = serialize_report(&rep, args.pretty, args.compact)?;

    if args.stdout {
        print!("{}", json);
        if args.list_failures && !args.quiet {
            print_failures(&rep);
        }
        return Ok(());
    }

    let report = report.expect("report required when not using stdout");
    if let Some(parent) = report.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create output directory: {}", parent.display())
            })?;
        }
    }

    fs::write(&report, json)
        .with_context(|| format!("Failed to write report: {}", report.display()))?;

    if args.list_failures && !args.quiet {
        print_failures(&rep);
    }
    if !args.quiet {
        eprintln!("OK: report written -> {}", report.display());
    }
    Ok(())
}

fn job_error_to_cli(err: JobError) -> CliError {
    let hint = match &err {
        JobError::DecoderMissing { .. } => Some("check the --decoder path".to_string()),
        JobError::NoSensorsDetected => {
            Some("the capture contains no complete packet headers".to_string())
        }
        JobError::AllSensorsFailed { .. } => {
            Some("check the decoder and the capture; no sensor produced output".to_string())
        }
        JobError::SensorsFailed { .. } => {
            Some("rerun without --strict to keep successfully decoded sensors".to_string())
        }
        _ => None,
    };
    CliError::new(err.to_string(), hint)
}

fn serialize_report(rep: &JobReport, pretty: bool, compact: bool) -> Result<String, CliError> {
    if pretty && compact {
        return Err(CliError::new(
            "cannot use --pretty and --compact together",
            Some("choose one output format".to_string()),
        ));
    }
    if pretty {
        serde_json::to_string_pretty(rep)
            .context("JSON serialization failed")
            .map_err(Into::into)
    } else {
        serde_json::to_string(rep)
            .context("JSON serialization failed")
            .map_err(Into::into)
    }
}

fn print_failures(rep: &JobReport) {
    if rep.failures.is_empty() {
        return;
    }
    eprintln!("Failed sensors:");
    for failure in &rep.failures {
        eprintln!("  {} {}", failure.handle, failure.reason);
    }
}

fn validate_input_file(input: &PathBuf) -> Result<(), CliError> {
    if !input.exists() {
        return Err(CliError::new(
            format!("input file not found: {}", input.display()),
            Some("use a .bin or .dat capture file".to_string()),
        ));
    }
    let ext = input
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    if ext != "bin" && ext != "dat" {
        return Err(CliError::new(
            format!("unsupported input format '{}'", input.display()),
            Some("expected a .bin or .dat capture file".to_string()),
        ));
    }
    Ok(())
}

fn resolve_input_path(input: &PathBuf) -> Result<PathBuf, CliError> {
    let pattern = input.to_string_lossy();
    if !is_glob_pattern(&pattern) {
        return Ok(input.clone());
    }

    let mut matches = Vec::new();
    let paths = glob(&pattern).map_err(|err| {
        CliError::new(
            format!("invalid input pattern '{}'", pattern),
            Some(format!("pattern error: {}", err.msg)),
        )
    })?;
    for entry in paths {
        let path = entry.map_err(|err| {
            CliError::new(
                format!("invalid input pattern '{}'", pattern),
                Some(format!("pattern error: {}", err)),
            )
        })?;
        if path.is_file() {
            matches.push(path);
        }
    }

    if matches.is_empty() {
        return Err(CliError::new(
            format!("no files match pattern '{}'", pattern),
            Some("check the path or quote the pattern; expected .bin or .dat".to_string()),
        ));
    }
    if matches.len() > 1 {
        let hint = "pass a single capture file, or run once per file".to_string();
        let mut message = format!(
            "multiple files match pattern '{}' ({} matches)",
            pattern,
            matches.len()
        );
        let listed = matches.iter().take(3).collect::<Vec<_>>();
        if !listed.is_empty() {
            let mut details = String::new();
            details.push_str("; matches: ");
            details.push_str(
                &listed
                    .into_iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
            );
            if matches.len() > 3 {
                details.push_str(", ...");
            }
            message.push_str(&details);
        }
        return Err(CliError::new(message, Some(hint)));
    }

    Ok(matches.remove(0))
}

fn is_glob_pattern(input: &str) -> bool {
    input.contains('*') || input.contains('?') || input.contains('[')
}
