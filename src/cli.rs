//! Shared CLI helpers and small reusable Clap fragments

use crate::config::{self, ClientConfig, ServerConfig};
use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

/// Daemon options for chunkwired
#[derive(Clone, Debug, Parser)]
#[command(author, version, about = "chunkwire file server")]
pub struct DaemonOpts {
    /// TOML config file; flags below override its values
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Bind address (host:port)
    #[arg(long)]
    pub bind: Option<String>,

    /// Directory whose files are served
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Append session events to this file
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// Close sessions idle for this long (0 = never)
    #[arg(long = "idle-timeout-ms")]
    pub idle_timeout_ms: Option<u64>,

    /// Log every command received
    #[arg(short, long)]
    pub verbose: bool,
}

impl DaemonOpts {
    pub fn resolve(&self) -> Result<ServerConfig> {
        let mut cfg: ServerConfig = config::load(self.config.as_deref())?;
        if let Some(bind) = &self.bind {
            cfg.bind = bind.clone();
        }
        if let Some(root) = &self.root {
            cfg.root = root.clone();
        }
        if let Some(log_file) = &self.log_file {
            cfg.log_file = Some(log_file.clone());
        }
        if let Some(ms) = self.idle_timeout_ms {
            cfg.idle_timeout_ms = ms;
        }
        cfg.verbose |= self.verbose;
        check_chunk_size(cfg.chunk_size)?;
        Ok(cfg)
    }
}

/// Connection options shared by every client subcommand
#[derive(Clone, Debug, clap::Args)]
pub struct ConnectOpts {
    /// TOML config file; flags below override its values
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Server host
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Server port
    #[arg(short, long, global = true)]
    pub port: Option<u16>,

    /// Per-read deadline in milliseconds (0 = none)
    #[arg(long = "timeout-ms", global = true)]
    pub timeout_ms: Option<u64>,
}

impl ConnectOpts {
    pub fn resolve(&self) -> Result<ClientConfig> {
        let mut cfg: ClientConfig = config::load(self.config.as_deref())?;
        if let Some(host) = &self.host {
            cfg.host = host.clone();
        }
        if let Some(port) = self.port {
            cfg.port = port;
        }
        if let Some(ms) = self.timeout_ms {
            cfg.read_timeout_ms = ms;
        }
        check_chunk_size(cfg.chunk_size)?;
        Ok(cfg)
    }
}

fn check_chunk_size(chunk_size: u32) -> Result<()> {
    if chunk_size == 0 {
        anyhow::bail!("chunk_size must be greater than 0");
    }
    Ok(())
}
