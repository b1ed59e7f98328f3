//! chunkwire client - list and download files from a chunkwire daemon

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::collections::VecDeque;
use std::path::PathBuf;

use chunkwire::cli::ConnectOpts;
use chunkwire::log::{TransferLog, TransferLogEntry, TransferStatus};
use chunkwire::net_async::client::{Client, DownloadEvent, DownloadManager, SpawnError};
use chunkwire::progress::{format_bytes, TransferBars};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "chunkwire - list and download files from a chunkwire server")]
struct Args {
    #[command(flatten)]
    connect: ConnectOpts,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// List the files the server offers
    List,
    /// Download one or more files, each on its own connection
    Get {
        /// Files to download
        #[arg(required = true)]
        files: Vec<String>,

        /// Directory to save into
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Maximum simultaneous downloads
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Write JSONL log entries to file
        #[arg(long = "log-file")]
        log_file: Option<PathBuf>,
    },
    /// Show past downloads recorded in the JSONL log
    History {
        /// Log file to read (defaults to log_file from the config)
        #[arg(long = "log-file")]
        log_file: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = args.connect.resolve()?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    match args.command {
        Cmd::List => rt.block_on(async move {
            let mut client = Client::new(config);
            let msg = client.connect().await?;
            println!("{}", msg);
            let res = client.list_files().await;
            client.disconnect().await;
            let listing = res.context("Listing failed")?;
            println!("{}", listing.message);
            for name in &listing.files {
                println!("  {}", name);
            }
            Ok::<(), anyhow::Error>(())
        }),
        Cmd::History { log_file } => {
            let Some(path) = log_file.or(config.log_file) else {
                anyhow::bail!("No log file configured; pass --log-file");
            };
            show_history(&path)
        }
        Cmd::Get {
            files,
            out,
            jobs,
            log_file,
        } => {
            if let Some(out) = out {
                config.downloads_dir = out;
            }
            if let Some(jobs) = jobs {
                config.max_concurrent_downloads = jobs;
            }
            if config.max_concurrent_downloads == 0 {
                anyhow::bail!("--jobs must be at least 1");
            }
            if log_file.is_some() {
                config.log_file = log_file;
            }
            std::fs::create_dir_all(&config.downloads_dir).with_context(|| {
                format!(
                    "Failed to create downloads directory: {}",
                    config.downloads_dir.display()
                )
            })?;
            let failed = rt.block_on(get_files(config, files))?;
            if failed > 0 {
                anyhow::bail!("{} download(s) failed", failed);
            }
            Ok(())
        }
    }
}

fn show_history(path: &std::path::Path) -> Result<()> {
    let entries = TransferLog::new(path).read_log()?;
    if entries.is_empty() {
        println!("No downloads recorded in {}", path.display());
        return Ok(());
    }
    for e in &entries {
        match e.status {
            TransferStatus::Completed => println!(
                "{}  {:<9} {} ({}) from {}",
                e.timestamp,
                "Completed",
                e.name,
                format_bytes(e.bytes_transferred),
                e.server
            ),
            TransferStatus::Failed => println!(
                "{}  {:<9} {} from {}: {}",
                e.timestamp,
                "Failed",
                e.name,
                e.server,
                e.error.as_deref().unwrap_or("unknown error")
            ),
        }
    }
    Ok(())
}

/// Run every download through the manager, queueing past its cap.
/// Returns the number of failed downloads.
async fn get_files(config: chunkwire::config::ClientConfig, files: Vec<String>) -> Result<usize> {
    let server = config.addr();
    let history = config.log_file.as_deref().map(TransferLog::new);
    let (manager, mut events) = DownloadManager::new(config);
    let mut queue: VecDeque<String> = files.into();
    let mut running = 0usize;
    let mut failed = 0usize;
    let mut total_bytes = 0u64;
    let mut bars = TransferBars::new();

    loop {
        while let Some(name) = queue.pop_front() {
            match manager.spawn(&name) {
                Ok(_) => running += 1,
                Err(SpawnError::Busy { .. }) => {
                    queue.push_front(name);
                    break;
                }
            }
        }
        if running == 0 {
            break;
        }
        let Some(event) = events.recv().await else {
            break;
        };
        match event {
            DownloadEvent::Started { id, name } => bars.start(id, &name),
            DownloadEvent::Progress { id, progress } => bars.update(id, &progress),
            DownloadEvent::Finished {
                id,
                name,
                outcome,
                report,
            } => {
                running -= 1;
                bars.finish(id, &outcome);
                if !outcome.success {
                    failed += 1;
                }
                if let Some(r) = &report {
                    total_bytes += r.bytes;
                }
                if let Some(log) = &history {
                    let mut entry = TransferLogEntry::now(id.to_string(), server.clone(), name);
                    match &report {
                        Some(r) => {
                            entry.status = TransferStatus::Completed;
                            entry.bytes_transferred = r.bytes;
                            entry.destination = Some(r.path.clone());
                        }
                        None => entry.error = Some(outcome.message.clone()),
                    }
                    if let Err(e) = log.add_entry(&entry) {
                        eprintln!("Failed to write transfer log: {}", e);
                    }
                }
            }
        }
    }

    println!("Downloaded {} total, {} failed", format_bytes(total_bytes), failed);
    Ok(failed)
}
