// Module-specific lints configuration
#![allow(clippy::uninlined_format_args)]

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use log::{info, warn, Level, LevelFilter, Log, Metadata, Record, SetLoggerError};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::atomic::Ordering;

use outcome_classifier::app_config::{self, Config};
use outcome_classifier::app_controller::Controller;
use outcome_classifier::providers::RemoteJob;

/// CLI Wrapper for LogLevel to implement ValueEnum
#[derive(Debug, Clone, ValueEnum)]
enum CliLogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<CliLogLevel> for app_config::LogLevel {
    fn from(cli_level: CliLogLevel) -> Self {
        match cli_level {
            CliLogLevel::Error => app_config::LogLevel::Error,
            CliLogLevel::Warn => app_config::LogLevel::Warn,
            CliLogLevel::Info => app_config::LogLevel::Info,
            CliLogLevel::Debug => app_config::LogLevel::Debug,
            CliLogLevel::Trace => app_config::LogLevel::Trace,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Classify learning outcomes through the batch API (default command)
    #[command(alias = "classify")]
    Run(RunArgs),

    /// Cancel batch jobs that are still queued, validating or in progress
    Cancel {
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,

        /// Number of recent jobs to inspect
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },

    /// Generate shell completions for outcome-classifier
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args, Debug, Clone)]
struct RunArgs {
    /// Input CSV of learning outcomes
    #[arg(short, long, default_value = "learning_outcomes.csv")]
    input: PathBuf,

    /// Output CSV with classification columns
    #[arg(short, long, default_value = "classified_learning_outcomes_batch.csv")]
    output: PathBuf,

    /// Records per batch job
    #[arg(short, long)]
    batch_size: Option<usize>,

    /// Directory for manifests and raw results
    #[arg(long)]
    temp_dir: Option<PathBuf>,

    /// Maximum concurrent batch jobs
    #[arg(long)]
    max_workers: Option<usize>,

    /// Seconds between job status checks
    #[arg(long)]
    check_interval: Option<u64>,

    /// Retries per batch before giving up
    #[arg(long)]
    max_retries: Option<u32>,

    /// Checkpoint path (default: <output>.partial)
    #[arg(long)]
    checkpoint: Option<PathBuf>,

    /// Keep sample requests and failed job details in the staging directory
    #[arg(long)]
    debug: bool,
}

/// outcome-classifier - batch classification of learning outcomes
///
/// Scores every learning outcome of a CSV against the four Aims of a BYU
/// Education using the OpenAI Batch API, with resumable checkpoints.
#[derive(Parser, Debug)]
#[command(name = "outcome-classifier")]
#[command(version)]
#[command(about = "Batch classification of learning outcomes")]
#[command(long_about = "outcome-classifier submits learning outcomes to the OpenAI Batch API in
batches, retries failed jobs with smaller batches, and writes a checkpoint after
every completed batch so an interrupted run can be resumed.

EXAMPLES:
    outcome-classifier                                   # Classify learning_outcomes.csv
    outcome-classifier -i in.csv -o out.csv -b 500       # Custom files and batch size
    outcome-classifier --max-workers 3 --max-retries 5   # More concurrency and retries
    outcome-classifier cancel                            # Cancel active batch jobs
    outcome-classifier completions bash > oc.bash        # Generate bash completions

CONFIGURATION:
    Configuration is stored in conf.json by default. If the file doesn't exist,
    a default one is created. The API key is read from OPENAI_API_KEY.")]
struct CommandLineOptions {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    run: RunArgs,

    /// Configuration file path
    #[arg(short, long = "config", default_value = "conf.json", global = true)]
    config_path: PathBuf,

    /// API key for the batch service
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true, global = true)]
    api_key: Option<String>,

    /// Set logging level
    #[arg(short, long, value_enum, global = true)]
    log_level: Option<CliLogLevel>,
}

// @struct: Custom logger implementation
//
// Filtering follows `log::max_level()`, so the level can be changed after
// the configuration is loaded.
struct CustomLogger;

impl CustomLogger {
    // @initializes: Global logger
    fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
        log::set_boxed_logger(Box::new(CustomLogger))?;
        log::set_max_level(level);
        Ok(())
    }

    // @returns: ANSI color code for log level
    fn color_for_level(level: Level) -> &'static str {
        match level {
            Level::Error => "1;31",
            Level::Warn => "1;33",
            Level::Info => "1;32",
            Level::Debug => "1;36",
            Level::Trace => "1;35",
        }
    }
}

impl Log for CustomLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let now = chrono::Local::now().format("%H:%M:%S%.3f");
            let mut stderr = std::io::stderr();
            let _ = writeln!(
                stderr,
                "\x1B[{}m{} {:<5} {}\x1B[0m",
                Self::color_for_level(record.level()),
                now,
                record.level(),
                record.args()
            );
        }
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

/// Load the configuration and apply command line overrides
fn load_config(options: &CommandLineOptions, run: Option<&RunArgs>) -> Result<Config> {
    let mut config = Config::load_or_create(&options.config_path)?;

    if let Some(api_key) = &options.api_key {
        config.provider.api_key = api_key.clone();
    }
    if let Some(level) = &options.log_level {
        config.log_level = level.clone().into();
    }

    if let Some(run) = run {
        if let Some(batch_size) = run.batch_size {
            config.batch.batch_size = batch_size;
        }
        if let Some(temp_dir) = &run.temp_dir {
            config.batch.staging_dir = temp_dir.clone();
        }
        if let Some(max_workers) = run.max_workers {
            config.batch.max_concurrent_jobs = max_workers;
        }
        if let Some(check_interval) = run.check_interval {
            config.batch.poll_interval_secs = check_interval;
        }
        if let Some(max_retries) = run.max_retries {
            config.batch.max_retries = max_retries;
        }
        if run.debug {
            config.enable_debug();
        }
    }

    config.validate().context("Configuration validation failed")?;
    log::set_max_level(config.log_level.to_level_filter());
    Ok(config)
}

fn confirm_cancel(jobs: &[RemoteJob]) -> bool {
    print!("Cancel {} active batch job(s)? [y/N] ", jobs.len());
    let _ = std::io::stdout().flush();

    let mut answer = String::new();
    if std::io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize the logger once with info level by default
    // We'll update the level after loading the config if needed
    CustomLogger::init(LevelFilter::Info)?;

    let cli = CommandLineOptions::parse();

    match &cli.command {
        Some(Commands::Completions { shell }) => {
            let mut cmd = CommandLineOptions::command();
            generate(*shell, &mut cmd, "outcome-classifier", &mut std::io::stdout());
            Ok(())
        }
        Some(Commands::Cancel { yes, limit }) => {
            let config = load_config(&cli, None)?;
            let controller = Controller::with_config(config)?;
            let yes = *yes;
            controller
                .cancel_active_jobs(controller.service(), *limit, |jobs| yes || confirm_cancel(jobs))
                .await?;
            Ok(())
        }
        Some(Commands::Run(args)) => run_classify(&cli, args).await,
        None => run_classify(&cli, &cli.run).await,
    }
}

async fn run_classify(cli: &CommandLineOptions, args: &RunArgs) -> Result<()> {
    let config = load_config(cli, Some(args))?;
    let controller = Controller::with_config(config)?;

    let cancelled = controller.cancellation_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; waiting for in-flight batches to finish");
            cancelled.store(true, Ordering::SeqCst);
        }
    });

    let summary = controller
        .run(&args.input, &args.output, args.checkpoint.as_deref())
        .await?;

    info!(
        "Classified {}/{} learning outcomes",
        summary.classified, summary.total_records
    );
    Ok(())
}
