//! bulk-anonymize command line client
//!
//! Anonymizes every image below an input folder and mirrors the results into an
//! output folder. Settings come from an optional JSON settings file; flags override
//! it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bulk_anonymize::config::load_anonymization_config;
use bulk_anonymize::{Anonymizer, Config, run_with_shutdown};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Anonymize a folder of images through the anonymization service.
#[derive(Parser, Debug)]
#[command(name = "bulk-anonymize", version, about)]
struct Args {
    /// Input folder containing the images
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Output folder receiving the anonymized images
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Account user name
    #[arg(short, long, env = "BULK_ANONYMIZE_USERNAME")]
    username: Option<String>,

    /// Account password
    #[arg(
        short,
        long,
        env = "BULK_ANONYMIZE_PASSWORD",
        hide_env_values = true
    )]
    password: Option<String>,

    /// Anonymization configuration file (JSON) sent with every task
    #[arg(short = 'c', long)]
    configuration: Option<PathBuf>,

    /// Service endpoint
    #[arg(short, long, env = "BULK_ANONYMIZE_ENDPOINT")]
    endpoint: Option<String>,

    /// Only process files directly inside the input folder
    #[arg(long)]
    no_recursive: bool,

    /// File type to process (repeatable; jpg, jpeg, png)
    #[arg(long = "file-type", value_name = "EXT")]
    file_types: Vec<String>,

    /// Number of concurrent workers
    #[arg(long)]
    workers: Option<usize>,

    /// Seconds between two status polls of a task
    #[arg(long, value_name = "SECONDS")]
    poll_interval: Option<f64>,

    /// Status polls per task before giving up
    #[arg(long)]
    max_polls: Option<u32>,

    /// Sign in again after this many processed images
    #[arg(long)]
    reauth_every: Option<u64>,

    /// Maximum number of discovered images waiting for a worker
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// Log level or filter directive (overridden by RUST_LOG)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Also write logs to a timestamped file in this folder
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Settings file (JSON) with the full configuration
    #[arg(long)]
    settings: Option<PathBuf>,
}

impl Args {
    /// Build the run configuration: settings file first, flags on top
    fn into_config(self) -> Result<Config, Box<dyn std::error::Error>> {
        let mut config = match &self.settings {
            Some(path) => Config::from_json_file(path)?,
            None => Config::default(),
        };

        if let Some(input) = self.input {
            config.source.input_dir = input;
        }
        if let Some(output) = self.output {
            config.source.output_dir = output;
        }
        if let Some(username) = self.username {
            config.service.username = username;
        }
        if let Some(password) = self.password {
            config.service.password = password;
        }
        if let Some(endpoint) = self.endpoint {
            config.service.endpoint = endpoint;
        }
        if let Some(path) = &self.configuration {
            config.anonymization = load_anonymization_config(path)?;
        }
        if self.no_recursive {
            config.source.recursive = false;
        }
        if !self.file_types.is_empty() {
            config.source.extensions = self.file_types;
        }
        if let Some(workers) = self.workers {
            config.pipeline.workers = workers;
        }
        if let Some(secs) = self.poll_interval {
            config.pipeline.poll_interval = std::time::Duration::try_from_secs_f64(secs)
                .map_err(|e| format!("invalid --poll-interval: {e}"))?;
        }
        if let Some(max_polls) = self.max_polls {
            config.pipeline.max_poll_attempts = max_polls;
        }
        if let Some(reauth_every) = self.reauth_every {
            config.pipeline.reauth_every = reauth_every;
        }
        if let Some(capacity) = self.queue_capacity {
            config.source.queue_capacity = capacity;
        }

        Ok(config)
    }
}

/// Console logging, plus a plain-text log file when `log_dir` is given
fn init_logging(level: &str, log_dir: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;

    let file_layer = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let name = format!(
                "bulk-anonymize_{}.log",
                chrono::Local::now().format("%Y%m%d_%H%M%S")
            );
            let file = std::fs::File::create(dir.join(name))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_thread_names(true)
                    .with_writer(Arc::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_names(true)
                .with_target(false),
        )
        .with(file_layer)
        .try_init()?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(&args.log_level, args.log_dir.as_deref())?;

    let config = args.into_config()?;
    let anonymizer = Anonymizer::new(config)?;

    let summary = run_with_shutdown(&anonymizer).await.inspect_err(|e| {
        tracing::error!(error = %e, "Run aborted");
    })?;

    println!(
        "Total images: {} queued, {} skipped, {} anonymized, {} failed in {:.1}s{}",
        summary.enqueued,
        summary.skipped,
        summary.succeeded,
        summary.failed,
        summary.elapsed.as_secs_f64(),
        if summary.cancelled { " (cancelled)" } else { "" }
    );

    if summary.failed > 0 || summary.cancelled {
        std::process::exit(2);
    }
    Ok(())
}
