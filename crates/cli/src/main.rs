use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use jobwatch_core::config::{
    Settings, apply_env_overrides, config_path, load_settings, validate_settings,
};
use jobwatch_core::{
    APP_NAME, ChangeCounts, ChangeSummary, JobContext, JobKind, Phase, ProgressCounters,
    ProgressSource, Reporter, Totals,
};
use serde::Serialize;

#[derive(Parser)]
#[command(name = "jobwatch")]
#[command(about = "Backup/restore progress reporter (simulation harness)", long_about = None)]
struct Cli {
    #[arg(long)]
    json: bool,

    #[arg(long)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a simulated job and report its progress.
    Simulate(SimulateArgs),
    /// Load, validate and print the effective settings.
    CheckConfig,
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Backup,
    Restore,
}

impl From<KindArg> for JobKind {
    fn from(k: KindArg) -> Self {
        match k {
            KindArg::Backup => JobKind::Backup,
            KindArg::Restore => JobKind::Restore,
        }
    }
}

#[derive(clap::Args)]
struct SimulateArgs {
    #[arg(long, value_enum, default_value = "backup")]
    kind: KindArg,

    /// Receiver URL; overrides settings.
    #[arg(long)]
    url: Option<String>,

    #[arg(long)]
    token: Option<String>,

    /// Seconds between periodic updates; overrides settings.
    #[arg(long)]
    interval: Option<u64>,

    #[arg(long, default_value_t = 20)]
    files: u64,

    #[arg(long, default_value_t = 4096)]
    file_bytes: u64,

    #[arg(long, default_value_t = 200)]
    step_ms: u64,

    /// Snapshot to restore (required for restore).
    #[arg(long)]
    snapshot: Option<String>,

    /// Report a recoverable error while processing this file index.
    #[arg(long)]
    fail_at: Option<u64>,
}

#[derive(Debug, Serialize)]
struct CliError {
    code: &'static str,
    message: String,
    details: serde_json::Value,
    retryable: bool,
}

impl CliError {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: serde_json::json!({}),
            retryable: false,
        }
    }
}

impl From<jobwatch_core::Error> for CliError {
    fn from(e: jobwatch_core::Error) -> Self {
        let code = match e {
            jobwatch_core::Error::InvalidConfig { .. } => "config.invalid",
            _ => "reporter.failed",
        };
        Self::new(code, e.to_string())
    }
}

#[tokio::main]
async fn main() {
    jobwatch_core::logging::init_logging();

    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            emit_error(&e);
            1
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config_dir = cli
        .config_dir
        .or_else(|| std::env::var("JOBWATCH_CONFIG_DIR").ok().map(PathBuf::from))
        .unwrap_or_else(default_config_dir);

    match cli.cmd {
        Command::CheckConfig => check_config(&config_dir, cli.json),
        Command::Simulate(args) => simulate(&config_dir, args, cli.json).await,
    }
}

fn effective_settings(config_dir: &Path) -> Result<Settings, CliError> {
    let mut settings = load_settings(&config_path(config_dir))?;
    apply_env_overrides(&mut settings)?;
    Ok(settings)
}

fn check_config(config_dir: &Path, json: bool) -> Result<(), CliError> {
    let settings = effective_settings(config_dir)?;
    validate_settings(&settings)?;

    if json {
        println!("{}", serde_json::json!({ "settings": settings }));
    } else {
        println!("configPath={}", config_path(config_dir).display());
        println!("reportEnabled={}", settings.report.is_enabled());
        println!("reportUrl={}", settings.report.url);
        println!("reportIntervalSecs={}", settings.report.interval_secs);
    }
    Ok(())
}

async fn simulate(config_dir: &Path, args: SimulateArgs, json: bool) -> Result<(), CliError> {
    let mut settings = effective_settings(config_dir)?;
    if let Some(url) = &args.url {
        settings.report.url = url.clone();
    }
    if let Some(token) = &args.token {
        settings.report.token = token.clone();
    }
    if let Some(interval) = args.interval {
        settings.report.interval_secs = interval;
    }
    if settings.report.token.is_empty() {
        settings.report.token = format!("job_{}", uuid::Uuid::new_v4());
    }
    validate_settings(&settings)?;

    let kind = JobKind::from(args.kind);
    let counters = Arc::new(ProgressCounters::new());
    let job = match kind {
        JobKind::Backup => JobContext::backup(counters.clone()),
        JobKind::Restore => {
            let snapshot = args.snapshot.clone().ok_or_else(|| {
                CliError::new("cli.invalid_args", "--snapshot is required for restore")
            })?;
            JobContext::restore(counters.clone(), snapshot)
        }
    };

    let reporter = Reporter::start(job, settings.report.to_options())?;
    tracing::info!(
        event = "job.start",
        action = kind.action(),
        reporting = reporter.is_enabled(),
        files = args.files,
        "job.start"
    );

    run_simulated_job(&reporter, &counters, &args).await;

    let produced = match kind {
        JobKind::Backup => Some(format!("snp_{}", uuid::Uuid::new_v4())),
        JobKind::Restore => None,
    };
    reporter.report_done(produced.as_deref()).await;
    let suspended = reporter.delivery_suspended();
    reporter.finish().await;

    let snap = counters.snapshot();
    tracing::info!(
        event = "job.finish",
        action = kind.action(),
        files = snap.processed.files,
        errors = snap.errors,
        "job.finish"
    );

    let snapshot_id = produced.or(args.snapshot).unwrap_or_default();
    if json {
        println!(
            "{}",
            serde_json::json!({
                "action": kind.action(),
                "snapshotId": snapshot_id,
                "filesProcessed": snap.processed.files,
                "bytesProcessed": snap.processed.bytes,
                "errors": snap.errors,
                "deliverySuspended": suspended,
            })
        );
    } else {
        println!("action={}", kind.action());
        println!("snapshotId={snapshot_id}");
        println!("filesProcessed={}", snap.processed.files);
        println!("bytesProcessed={}", snap.processed.bytes);
        println!("errors={}", snap.errors);
        println!("deliverySuspended={suspended}");
    }
    Ok(())
}

async fn run_simulated_job(reporter: &Reporter, counters: &ProgressCounters, args: &SimulateArgs) {
    let step = Duration::from_millis(args.step_ms);

    reporter.set_phase(Phase::ReadingIndex);
    reporter.report_update().await;
    tokio::time::sleep(step).await;

    reporter.set_phase(Phase::ScanningData);
    reporter.report_update().await;
    for _ in 0..args.files {
        counters.record_scanned(1, args.file_bytes);
        tokio::time::sleep(step / 4).await;
    }
    counters.set_total(Totals {
        files: args.files,
        dirs: 1,
        bytes: total_bytes(args.files, args.file_bytes),
    });

    reporter.set_phase(Phase::DoingWork);
    reporter.report_update().await;
    let mut summary = ChangeSummary {
        files: ChangeCounts::default(),
        dirs: ChangeCounts {
            new: 1,
            ..ChangeCounts::default()
        },
    };
    for i in 0..args.files {
        if args.fail_at == Some(i) {
            counters.record_error();
            reporter
                .report_error(format!("simulated read error on file {i}"))
                .await;
        } else {
            counters.record_processed(1, args.file_bytes);
            summary.files.new += 1;
        }
        let remaining = args.files - i - 1;
        counters.set_eta(Some(eta_seconds(remaining, args.step_ms)));
        tokio::time::sleep(step).await;
    }
    counters.set_eta(None);
    counters.set_summary(summary);
}

fn total_bytes(files: u64, file_bytes: u64) -> u64 {
    files.saturating_mul(file_bytes)
}

fn eta_seconds(remaining_files: u64, step_ms: u64) -> u64 {
    remaining_files.saturating_mul(step_ms) / 1000
}

fn default_config_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".config").join(APP_NAME)
}

fn emit_error(e: &CliError) {
    let json = serde_json::to_string(e).unwrap_or_else(|_| {
        "{\"code\":\"unknown\",\"message\":\"json encode failed\",\"details\":{},\"retryable\":false}"
            .to_string()
    });
    let _ = writeln!(std::io::stderr(), "{json}");
}
