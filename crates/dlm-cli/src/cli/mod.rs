//! Argument parsing and dispatch.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use dlm_core::config;
use dlm_core::engine::Engine;

/// Process exit codes shared by every command.
pub const EXIT_OK: i32 = 0;
pub const EXIT_USER: i32 = 1;
pub const EXIT_IO: i32 = 2;
pub const EXIT_INTERRUPTED: i32 = 130;

/// Top-level CLI for the DLM download engine.
#[derive(Debug, Parser)]
#[command(name = "dlm")]
#[command(about = "DLM: persistent, resumable, multi-connection download manager", long_about = None)]
pub struct Cli {
    /// Project root (repository, downloads/ and .workspace/ live here).
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Add a new download task.
    Add {
        /// Direct HTTP/HTTPS URL to download.
        url: String,

        /// Referer to replay with the request.
        #[arg(long)]
        referer: Option<String>,

        /// User agent override.
        #[arg(long)]
        user_agent: Option<String>,

        /// Target filename (derived from the URL when omitted).
        #[arg(long)]
        filename: Option<String>,

        /// Known size in bytes; 0 probes on first start.
        #[arg(long, default_value_t = 0)]
        size: u64,

        /// Destination directory override.
        #[arg(long)]
        output: Option<PathBuf>,

        /// Start immediately instead of leaving the task queued.
        #[arg(long)]
        start: bool,
    },

    /// Start a task (or every task in a folder) and wait for the drain.
    Start {
        /// Task id; omit when starting a folder.
        id: Option<String>,

        /// Folder id to start instead of a single task.
        #[arg(long, conflicts_with = "id")]
        folder: Option<i64>,

        /// Descend into subfolders.
        #[arg(long, requires = "folder")]
        recursive: bool,
    },

    /// Run queued tasks until the engine drains.
    Run,

    /// Show all tasks.
    Status,

    /// Pause a running task.
    Pause { id: String },

    /// Resume a paused task.
    Resume { id: String },

    /// Remove a task, optionally deleting its partial data.
    Remove {
        id: String,
        /// Also delete the task's workspace files.
        #[arg(long)]
        delete_files: bool,
    },

    /// Re-queue a paused, failed, or completed task.
    Retry { id: String },

    /// Import a split manifest, creating partial task(s) bound to a shared
    /// workspace.
    Import {
        /// Path to the manifest file.
        path: PathBuf,

        /// Only these part numbers (comma-separated), e.g. "3,5,7".
        #[arg(long, value_delimiter = ',')]
        parts: Option<Vec<u32>>,

        /// One task per part instead of one covering task.
        #[arg(long)]
        separate: bool,

        /// Start the imported task(s) immediately.
        #[arg(long)]
        start: bool,
    },

    /// Split a known-size task into a shared workspace plus per-peer
    /// assignment manifests.
    Split {
        id: String,

        /// Number of parts.
        #[arg(long)]
        parts: u32,

        /// Parts for one peer (repeatable), e.g. --assign 1,2,3 --assign 4,5.
        #[arg(long = "assign", value_delimiter = ',', value_parser = clap::value_parser!(u32))]
        assignments: Vec<Vec<u32>>,
    },

    /// Refresh a paused task's session from the newest browser capture of
    /// its URL and re-queue it.
    Recapture { id: String },
}

/// Parse arguments, run the selected command, and map the outcome to an
/// exit code (0 ok, 1 user error, 2 I/O failure, 130 interrupted).
pub async fn run_from_args() -> i32 {
    let cli = Cli::parse();

    let result = dispatch(cli).await;
    match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("dlm error: {err:#}");
            if err
                .chain()
                .any(|c| c.downcast_ref::<std::io::Error>().is_some())
            {
                EXIT_IO
            } else {
                EXIT_USER
            }
        }
    }
}

async fn dispatch(cli: Cli) -> Result<i32> {
    let cfg = config::load_or_init()?;
    tracing::debug!("loaded config: {cfg:?}");

    let root = match cli.root {
        Some(root) => root,
        None => std::env::current_dir()?,
    };
    let engine = Engine::new(root, cfg).await?;

    match cli.command {
        CliCommand::Add {
            url,
            referer,
            user_agent,
            filename,
            size,
            output,
            start,
        } => {
            commands::add::run(&engine, url, referer, user_agent, filename, size, output, start)
                .await?;
            if start {
                return commands::run::drain(&engine).await;
            }
            Ok(EXIT_OK)
        }
        CliCommand::Start {
            id,
            folder,
            recursive,
        } => {
            match (id, folder) {
                (Some(id), None) => engine.start(&id).await?,
                (None, folder) => engine.start_folder(folder, recursive).await?,
                (Some(_), Some(_)) => unreachable!("clap forbids id with --folder"),
            }
            commands::run::drain(&engine).await
        }
        CliCommand::Run => commands::run::run(&engine).await,
        CliCommand::Status => {
            commands::status::run(&engine).await?;
            Ok(EXIT_OK)
        }
        CliCommand::Pause { id } => {
            engine.pause(&id).await?;
            println!("Paused {id}");
            Ok(EXIT_OK)
        }
        CliCommand::Resume { id } => {
            engine.resume(&id).await?;
            commands::run::drain(&engine).await
        }
        CliCommand::Remove { id, delete_files } => {
            engine.remove(&id, delete_files).await?;
            println!("Removed {id}");
            Ok(EXIT_OK)
        }
        CliCommand::Retry { id } => {
            engine.retry(&id).await?;
            commands::run::drain(&engine).await
        }
        CliCommand::Import {
            path,
            parts,
            separate,
            start,
        } => {
            commands::import_task::run(&engine, &path, parts.as_deref(), separate).await?;
            if start {
                return commands::run::run(&engine).await;
            }
            Ok(EXIT_OK)
        }
        CliCommand::Split {
            id,
            parts,
            assignments,
        } => {
            let ws = engine.split(&id, parts, &assignments).await?;
            println!("Split workspace created at {}", ws.display());
            Ok(EXIT_OK)
        }
        CliCommand::Recapture { id } => {
            engine.recapture(&id).await?;
            commands::run::drain(&engine).await
        }
    }
}
