use anyhow::Result;
use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Mutex;

/// Server event sink. Every method defaults to a no-op.
pub trait Logger: Send + Sync {
    fn listening(&self, _bind: &str, _root: &Path) {}
    fn session_open(&self, _peer: SocketAddr) {}
    fn command(&self, _peer: SocketAddr, _line: &str) {}
    fn listed(&self, _peer: SocketAddr, _count: usize) {}
    fn file_sent(&self, _peer: SocketAddr, _name: &str, _bytes: u64, _chunks: u32) {}
    fn not_found(&self, _peer: SocketAddr, _name: &str) {}
    fn session_error(&self, _peer: SocketAddr, _msg: &str) {}
    fn session_closed(&self, _peer: SocketAddr, _reason: &str) {}
}

pub struct NoopLogger;
impl Logger for NoopLogger {}

/// Console output for the daemon.
pub struct StderrLogger {
    pub verbose: bool,
}

impl Logger for StderrLogger {
    fn listening(&self, bind: &str, root: &Path) {
        eprintln!("[LISTENING] {} serving {}", bind, root.display());
    }
    fn session_open(&self, peer: SocketAddr) {
        eprintln!("[NEW CONNECTION] {}", peer);
    }
    fn command(&self, peer: SocketAddr, line: &str) {
        if self.verbose {
            eprintln!("[{}] command: {}", peer, line);
        }
    }
    fn listed(&self, peer: SocketAddr, count: usize) {
        if self.verbose {
            eprintln!("[{}] sent list of {} files", peer, count);
        }
    }
    fn file_sent(&self, peer: SocketAddr, name: &str, bytes: u64, chunks: u32) {
        eprintln!("[SENT] {} -> {} ({} bytes, {} chunks)", name, peer, bytes, chunks);
    }
    fn not_found(&self, peer: SocketAddr, name: &str) {
        eprintln!("[NOT FOUND] {} requested '{}'", peer, name);
    }
    fn session_error(&self, peer: SocketAddr, msg: &str) {
        eprintln!("[ERROR] {}: {}", peer, msg);
    }
    fn session_closed(&self, peer: SocketAddr, reason: &str) {
        eprintln!("[CLOSED] {} ({})", peer, reason);
    }
}

pub struct TextLogger {
    file: Mutex<File>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(f),
        })
    }

    fn line(&self, s: &str) {
        if let Ok(mut f) = self.file.lock() {
            let _ = writeln!(f, "[{}] {}", Utc::now().to_rfc3339(), s);
        }
    }
}

impl Logger for TextLogger {
    fn listening(&self, bind: &str, root: &Path) {
        self.line(&format!("LISTEN bind={} root={}", bind, root.display()));
    }
    fn session_open(&self, peer: SocketAddr) {
        self.line(&format!("OPEN peer={}", peer));
    }
    fn command(&self, peer: SocketAddr, line: &str) {
        self.line(&format!("CMD peer={} line={}", peer, line));
    }
    fn listed(&self, peer: SocketAddr, count: usize) {
        self.line(&format!("LIST peer={} count={}", peer, count));
    }
    fn file_sent(&self, peer: SocketAddr, name: &str, bytes: u64, chunks: u32) {
        self.line(&format!(
            "SENT peer={} name={} bytes={} chunks={}",
            peer, name, bytes, chunks
        ));
    }
    fn not_found(&self, peer: SocketAddr, name: &str) {
        self.line(&format!("NOTFOUND peer={} name={}", peer, name));
    }
    fn session_error(&self, peer: SocketAddr, msg: &str) {
        self.line(&format!("ERROR peer={} msg={}", peer, msg));
    }
    fn session_closed(&self, peer: SocketAddr, reason: &str) {
        self.line(&format!("CLOSE peer={} reason={}", peer, reason));
    }
}

/// Fan events out to several loggers (console plus file, typically).
pub struct MultiLogger {
    sinks: Vec<Box<dyn Logger>>,
}

impl MultiLogger {
    pub fn new(sinks: Vec<Box<dyn Logger>>) -> Self {
        Self { sinks }
    }
}

impl Logger for MultiLogger {
    fn listening(&self, bind: &str, root: &Path) {
        self.sinks.iter().for_each(|s| s.listening(bind, root));
    }
    fn session_open(&self, peer: SocketAddr) {
        self.sinks.iter().for_each(|s| s.session_open(peer));
    }
    fn command(&self, peer: SocketAddr, line: &str) {
        self.sinks.iter().for_each(|s| s.command(peer, line));
    }
    fn listed(&self, peer: SocketAddr, count: usize) {
        self.sinks.iter().for_each(|s| s.listed(peer, count));
    }
    fn file_sent(&self, peer: SocketAddr, name: &str, bytes: u64, chunks: u32) {
        self.sinks
            .iter()
            .for_each(|s| s.file_sent(peer, name, bytes, chunks));
    }
    fn not_found(&self, peer: SocketAddr, name: &str) {
        self.sinks.iter().for_each(|s| s.not_found(peer, name));
    }
    fn session_error(&self, peer: SocketAddr, msg: &str) {
        self.sinks.iter().for_each(|s| s.session_error(peer, msg));
    }
    fn session_closed(&self, peer: SocketAddr, reason: &str) {
        self.sinks.iter().for_each(|s| s.session_closed(peer, reason));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_logger_appends_timestamped_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("server.log");
        let peer: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        {
            let log = TextLogger::new(&path).unwrap();
            log.session_open(peer);
            log.file_sent(peer, "a.bin", 10, 1);
        }
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with('['));
        assert!(lines[0].ends_with("OPEN peer=127.0.0.1:4000"));
        assert!(lines[1].ends_with("SENT peer=127.0.0.1:4000 name=a.bin bytes=10 chunks=1"));
    }
}
