//! Runtime configuration, loadable from TOML
//!
//! Every field has a default, so a config file only needs the keys it wants to
//! change. Command-line flags are applied on top by the binaries.

use crate::protocol::{timeouts, CHUNK_SIZE, DEFAULT_HOST, DEFAULT_PORT};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub root: PathBuf,
    pub chunk_size: u32,
    pub idle_timeout_ms: u64, // 0 = no deadline
    pub log_file: Option<PathBuf>,
    pub verbose: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: format!("{}:{}", DEFAULT_HOST, DEFAULT_PORT),
            root: PathBuf::from("server_files"),
            chunk_size: CHUNK_SIZE,
            idle_timeout_ms: timeouts::SESSION_IDLE_MS,
            log_file: None,
            verbose: false,
        }
    }
}

impl ServerConfig {
    pub fn idle_timeout(&self) -> Option<Duration> {
        millis(self.idle_timeout_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub downloads_dir: PathBuf,
    pub chunk_size: u32,
    pub read_timeout_ms: u64, // 0 = no deadline
    pub max_concurrent_downloads: usize,
    pub log_file: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            downloads_dir: PathBuf::from("client_downloads"),
            chunk_size: CHUNK_SIZE,
            read_timeout_ms: timeouts::CLIENT_READ_MS,
            max_concurrent_downloads: 4,
            log_file: None,
        }
    }
}

impl ClientConfig {
    pub fn read_timeout(&self) -> Option<Duration> {
        millis(self.read_timeout_ms)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn millis(ms: u64) -> Option<Duration> {
    if ms == 0 {
        None
    } else {
        Some(Duration::from_millis(ms))
    }
}

/// Load a config file, or defaults when `path` is `None`.
pub fn load<T>(path: Option<&Path>) -> Result<T>
where
    T: for<'de> Deserialize<'de> + Default,
{
    match path {
        Some(p) => {
            let data = std::fs::read_to_string(p)
                .with_context(|| format!("Failed to read config file: {}", p.display()))?;
            let cfg: T = toml::from_str(&data)
                .with_context(|| format!("Failed to parse config file: {}", p.display()))?;
            Ok(cfg)
        }
        None => Ok(T::default()),
    }
}
