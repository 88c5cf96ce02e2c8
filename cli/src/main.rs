//! cfgbackup - command-line front-end for the router configuration archiver.
//!
//! Loads `.env` and the layered configuration, wires the real collaborators
//! (external automation command, Google Drive) into the engine and prints a
//! short summary.

mod logging;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};
use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing::error;
use engine::{
    run_backup, AppConfig, BackupOptions, BackupRun, DriveClient, EngineError, ProgressCallback,
    Reconciler, RemoteArchivist, RemoteStatus, TieredComparator, UploadMetadata,
};

/// cfgbackup - back up a router's configuration locally and to Google Drive
#[derive(Parser, Debug)]
#[command(name = "cfgbackup")]
#[command(version)]
#[command(about = "Download, deduplicate and archive router configuration backups")]
struct Cli {
    /// Configuration file (defaults to ./cfgbackup.toml when present)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `engine=trace` (overrides TRACING_LEVEL)
    #[arg(long, global = true, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Log file (overrides LOG_FILE_PATH)
    #[arg(long, global = true, value_name = "PATH")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Trigger a download, archive it locally and make sure it is on Drive
    Run {
        /// Date used in the archive name (defaults to today)
        #[arg(long, value_name = "YYYY-MM-DD")]
        date: Option<NaiveDate>,

        /// Stop after the local archive is reconciled
        #[arg(long)]
        skip_upload: bool,

        /// Description attached to a newly uploaded file
        #[arg(long, value_name = "TEXT")]
        description: Option<String>,
    },

    /// Upload an existing file unless one with the same name is already there
    Upload {
        file: PathBuf,

        /// Destination folder id (overrides GDRIVE_FOLDER_ID)
        #[arg(long, value_name = "ID")]
        folder: Option<String>,
    },
}

/// Prints one line per pipeline stage.
struct CliProgress {
    start_time: Instant,
}

impl CliProgress {
    fn new() -> Self {
        CliProgress {
            start_time: Instant::now(),
        }
    }

    fn format_duration(elapsed: Duration) -> String {
        let secs = elapsed.as_secs();
        let mins = secs / 60;
        let secs = secs % 60;

        if mins > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{:.1}s", elapsed.as_secs_f64())
        }
    }
}

impl ProgressCallback for CliProgress {
    fn on_run_started(&self, run: &BackupRun) {
        eprintln!("Starting backup {}", run.id);
        eprintln!("  Download directory: {}", run.download_dir.display());
    }

    fn on_download_detected(&self, run: &BackupRun) {
        if let Some(file) = &run.downloaded {
            eprintln!("Downloaded: {} ({} bytes)", file.path.display(), file.size);
        }
    }

    fn on_reconciled(&self, run: &BackupRun) {
        if let (Some(path), Some(outcome)) = (run.archive_path(), run.outcome) {
            eprintln!("Local archive: {} ({})", path.display(), outcome);
        }
    }

    fn on_remote_resolved(&self, run: &BackupRun) {
        match &run.remote {
            RemoteStatus::Uploaded(record) => eprintln!("Uploaded {}", record.name),
            RemoteStatus::AlreadyPresent(record) => {
                eprintln!("{} already on Drive, upload skipped", record.name)
            }
            RemoteStatus::NotRequested => {}
        }
    }

    fn on_run_completed(&self, _run: &BackupRun) {
        eprintln!(
            "Process completed in {}",
            Self::format_duration(self.start_time.elapsed())
        );
    }
}

fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    let _guard = logging::init_logger(cli.log_level.as_deref(), cli.log_file.as_deref());

    match run_cli(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match os_error_code(&err) {
                Some(code) => error!(os_error = code, "{:#}", err),
                None => error!("{:#}", err),
            }
            ExitCode::from(1)
        }
    }
}

/// OS error code behind a failed run, if an OS call caused it.
fn os_error_code(err: &anyhow::Error) -> Option<i32> {
    err.downcast_ref::<EngineError>().and_then(EngineError::raw_os_error)
}

/// Main CLI logic - separated for testability
fn run_cli(cli: &Cli) -> anyhow::Result<()> {
    let config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match &cli.command {
        Commands::Run {
            date,
            skip_upload,
            description,
        } => run_pipeline(&config, *date, *skip_upload, description.clone()),
        Commands::Upload { file, folder } => upload_file(&config, file, folder.as_deref()),
    }
}

fn backup_options(config: &AppConfig, date: Option<NaiveDate>, description: Option<String>) -> BackupOptions {
    BackupOptions {
        download_dir: config.download_dir.clone(),
        archive_dir: config.archive_dir().to_path_buf(),
        prefix: config.archive_prefix.clone(),
        date: date.unwrap_or_else(|| chrono::Local::now().date_naive()),
        watch: config.watch_options(),
        metadata: UploadMetadata {
            description,
            ..UploadMetadata::default()
        },
    }
}

fn drive_archivist(config: &AppConfig, folder: Option<&str>) -> Result<RemoteArchivist<DriveClient>, EngineError> {
    let client = DriveClient::new(config.drive_credentials()?, config.request_timeout())?;
    let folder_id = match folder {
        Some(id) => id.to_string(),
        None => config.folder_id()?,
    };
    RemoteArchivist::new(client, folder_id)
}

fn run_pipeline(
    config: &AppConfig,
    date: Option<NaiveDate>,
    skip_upload: bool,
    description: Option<String>,
) -> anyhow::Result<()> {
    // Validate everything before the browser is started.
    let reconciler = Reconciler::new(
        Box::new(TieredComparator::with_algorithm(config.checksum_algorithm()?)),
        config.retry_policy(),
    );
    let archivist = if skip_upload {
        None
    } else {
        Some(drive_archivist(config, None)?)
    };
    let mut driver = config.automation_driver()?;
    let options = backup_options(config, date, description);

    let progress = CliProgress::new();
    let run = run_backup(
        &options,
        &mut driver,
        &reconciler,
        archivist.as_ref(),
        Some(&progress),
    )?;

    print_summary(&run.remote);
    Ok(())
}

fn upload_file(config: &AppConfig, file: &Path, folder: Option<&str>) -> anyhow::Result<()> {
    if !file.is_file() {
        return Err(EngineError::SourceNotFound {
            path: file.to_path_buf(),
        }
        .into());
    }
    let archivist = drive_archivist(config, folder)?;
    let status = archivist.ensure_archived(file, &UploadMetadata::default())?;
    print_summary(&status);
    Ok(())
}

fn print_summary(status: &RemoteStatus) {
    if let Some(record) = status.record() {
        println!("File ID: {}", record.id);
        println!("Link: {}", record.web_view_link.as_deref().unwrap_or("(none)"));
    }
}
