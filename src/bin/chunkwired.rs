use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;

use chunkwire::cli::DaemonOpts;
use chunkwire::logger::{Logger, MultiLogger, StderrLogger, TextLogger};
use chunkwire::net_async::server::{bind_listener, serve_until, SessionContext};

fn main() -> Result<()> {
    let opts = DaemonOpts::parse();
    let config = opts.resolve()?;

    // Validate root directory exists and is a directory
    if !config.root.exists() {
        anyhow::bail!("Error: Root directory does not exist: {}", config.root.display());
    }
    if !config.root.is_dir() {
        anyhow::bail!("Error: Root path is not a directory: {}", config.root.display());
    }

    // Canonical root: traversal checks compare against it
    let canonical_root = std::fs::canonicalize(&config.root)
        .with_context(|| format!("Failed to canonicalize root path: {}", config.root.display()))?;

    println!("Starting chunkwire daemon:");
    println!("  Root: {}", canonical_root.display());
    println!("  Bind: {}", config.bind);
    println!("  Chunk size: {} bytes", config.chunk_size);

    if config.bind.starts_with("0.0.0.0") {
        eprintln!("WARNING: Binding to 0.0.0.0 exposes the daemon to all network interfaces");
        eprintln!("   The protocol is UNENCRYPTED and UNAUTHENTICATED; use on trusted networks only");
    }

    let console: Box<dyn Logger> = Box::new(StderrLogger {
        verbose: config.verbose,
    });
    let logger: Arc<dyn Logger> = match &config.log_file {
        Some(path) => {
            let file = TextLogger::new(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;
            Arc::new(MultiLogger::new(vec![console, Box::new(file)]))
        }
        None => Arc::from(console),
    };

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    rt.block_on(async move {
        let listener = bind_listener(&config.bind)
            .await
            .context("Could not start server")?;
        let ctx = Arc::new(SessionContext::new(&config, canonical_root, logger));
        serve_until(listener, ctx, async {
            let _ = tokio::signal::ctrl_c().await;
            eprintln!("[SHUTTING DOWN] Server is shutting down.");
        })
        .await
    })
}
