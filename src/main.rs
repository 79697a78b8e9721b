//! nebula - Cancellable file operations with live progress.
//!
//! Usage:
//!   nebula copy <SOURCES>... --to <DEST>   Copy files and directories
//!   nebula move <SOURCES>... --to <DEST>   Move files and directories
//!   nebula delete <PATHS>...               Delete files and directories
//!   nebula size [PATHS]...                 Count files and bytes
//!   nebula ls [PATH]                       List a directory
//!   nebula --help                          Show help

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{bail, eyre, Context, Result};
use tracing_subscriber::EnvFilter;

use nebula_core::{EngineConfig, JobStatus, Operation, OpsError};
use nebula_ops::{OperationEngine, ProgressStream};
use nebula_scan::{walk_totals, DirectoryLister, FsLister, TreeTotals};

/// Exit code used when a job was cancelled with Ctrl-C.
const EXIT_CANCELLED: i32 = 130;

#[derive(Parser)]
#[command(
    name = "nebula",
    version,
    about = "Cancellable file operations with live progress",
    long_about = "nebula copies, moves and deletes files in the background, \
                  reporting progress after every file.\n\n\
                  Press Ctrl-C to cancel a running job; files already \
                  processed are left in place."
)]
struct Cli {
    /// Engine settings file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print every progress snapshot as a JSON line
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Copy files and directories into a directory
    Copy {
        /// Files or directories to copy
        #[arg(required = true)]
        sources: Vec<PathBuf>,

        /// Directory to copy into (created if missing)
        #[arg(short, long)]
        to: PathBuf,
    },

    /// Move files and directories into a directory
    Move {
        /// Files or directories to move
        #[arg(required = true)]
        sources: Vec<PathBuf>,

        /// Directory to move into (created if missing)
        #[arg(short, long)]
        to: PathBuf,
    },

    /// Delete files and directories recursively
    Delete {
        /// Files or directories to delete
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Count files and bytes below paths
    Size {
        /// Paths to measure
        #[arg(default_value = ".")]
        paths: Vec<PathBuf>,
    },

    /// List the entries of a directory
    Ls {
        /// Directory to list
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Include hidden entries
        #[arg(short, long)]
        all: bool,
    },
}

fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    let status = match cli.command {
        Command::Copy { sources, to } => {
            run_job(config, cli.json, |engine| engine.submit_copy(sources, to))?
        }
        Command::Move { sources, to } => {
            run_job(config, cli.json, |engine| engine.submit_move(sources, to))?
        }
        Command::Delete { paths } => {
            run_job(config, cli.json, |engine| engine.submit_delete(paths))?
        }
        Command::Size { paths } => {
            run_size(&paths, cli.json)?;
            JobStatus::Completed
        }
        Command::Ls { path, all } => {
            run_ls(&path, all, cli.json)?;
            JobStatus::Completed
        }
    };

    if status == JobStatus::Cancelled {
        std::process::exit(EXIT_CANCELLED);
    }

    Ok(())
}

/// Log to stderr, filtered by `RUST_LOG` (warnings and errors by default).
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Read engine settings from a TOML file, or use the defaults.
fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };

    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    let config: EngineConfig = toml::from_str(&text)
        .with_context(|| format!("Invalid config {}", path.display()))?;
    config
        .validate()
        .map_err(|message| OpsError::InvalidConfig { message })?;

    tracing::debug!(?config, "loaded engine config");
    Ok(config)
}

/// Submit a job, report its progress, and cancel it on Ctrl-C.
fn run_job(
    config: EngineConfig,
    json: bool,
    submit: impl FnOnce(&OperationEngine) -> ProgressStream,
) -> Result<JobStatus> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start runtime")?;

    runtime.block_on(watch_job(config, json, submit))
}

async fn watch_job(
    config: EngineConfig,
    json: bool,
    submit: impl FnOnce(&OperationEngine) -> ProgressStream,
) -> Result<JobStatus> {
    let engine = OperationEngine::with_config(config);
    let mut stream = submit(&engine);
    let id = stream.id();

    let canceller = engine.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!();
            eprintln!("Cancelling...");
            canceller.cancel(&id);
        }
    });

    let mut last = None;
    while let Some(snapshot) = stream.recv().await {
        if json {
            println!("{}", serde_json::to_string(&snapshot)?);
        } else {
            print_progress(&snapshot);
        }
        last = Some(snapshot);
    }
    interrupt.abort();

    let last = last.ok_or_else(|| eyre!("Operation {id} ended without a result"))?;
    if !json {
        println!("{} in {:.2}s", last.summary(), last.elapsed().as_secs_f64());
    }

    if last.is_failed() {
        bail!(
            "{}",
            last.error_message.as_deref().unwrap_or("Operation failed")
        );
    }
    Ok(last.status)
}

/// Show one snapshot on a single, rewritten stderr line.
fn print_progress(op: &Operation) {
    if op.is_terminal() {
        eprintln!();
        return;
    }

    let eta = op
        .remaining_time()
        .map(|left| format!(", ~{}s left", left.as_secs()))
        .unwrap_or_default();
    let bytes = if op.total_bytes > 0 {
        format!(
            ", {}/{}",
            format_size(op.processed_bytes),
            format_size(op.total_bytes)
        )
    } else {
        String::new()
    };

    eprint!(
        "\r{} {:>3}% {}/{} files{}{}  {:<30}",
        op.kind,
        op.progress_percent,
        op.processed_files,
        op.total_files,
        bytes,
        eta,
        truncate(op.current_file.as_deref().unwrap_or_default(), 30)
    );
}

/// Print file and byte counts for each path.
fn run_size(paths: &[PathBuf], json: bool) -> Result<()> {
    let mut grand_total = TreeTotals::default();

    for path in paths {
        path.symlink_metadata()
            .with_context(|| format!("Cannot measure {}", path.display()))?;
        let totals = walk_totals(path);
        grand_total += totals;

        if json {
            let line = serde_json::json!({
                "path": path,
                "files": totals.files,
                "bytes": totals.bytes,
            });
            println!("{line}");
        } else {
            println!(
                "{:>10} {:>8} files  {}",
                format_size(totals.bytes),
                totals.files,
                path.display()
            );
        }
    }

    if !json && paths.len() > 1 {
        println!("{}", "─".repeat(40));
        println!(
            "{:>10} {:>8} files  total",
            format_size(grand_total.bytes),
            grand_total.files
        );
    }

    Ok(())
}

/// Print a directory listing, directories first.
fn run_ls(path: &Path, all: bool, json: bool) -> Result<()> {
    let lister = if all {
        FsLister::new()
    } else {
        FsLister::without_hidden()
    };
    let entries = lister
        .list(path)
        .with_context(|| format!("Failed to list {}", path.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    for entry in &entries {
        let size = if entry.is_directory {
            "-".to_string()
        } else {
            format_size(entry.size)
        };
        let modified = entry
            .last_modified
            .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        let name = match (&entry.symlink_target, entry.is_directory) {
            (Some(target), _) => format!("{} -> {}", entry.name, target.display()),
            (None, true) => format!("{}/", entry.name),
            (None, false) => entry.name.clone(),
        };

        println!(
            "{:<10} {:>10} {:<16} {}",
            entry.permissions.as_deref().unwrap_or("-"),
            size,
            modified,
            name
        );
    }

    Ok(())
}

/// Format size in human-readable form.
fn format_size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}

/// Truncate a string to at most `max_len` characters.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(1)).collect();
        format!("{head}…")
    }
}
