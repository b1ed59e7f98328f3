//! Terminal progress for concurrent downloads
//!
//! One bar per download, stacked with indicatif's MultiProgress; finished
//! downloads leave a colored Completed/Failed line behind.

use crate::net_async::client::Outcome;
use crate::transfer::TransferProgress;
use crossterm::style::{Color, Stylize};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

pub struct TransferBars {
    multi: MultiProgress,
    bars: HashMap<Uuid, ProgressBar>,
    style: ProgressStyle,
}

impl TransferBars {
    pub fn new() -> Self {
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} {msg:32!} [{bar:30.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
        Self {
            multi: MultiProgress::new(),
            bars: HashMap::new(),
            style,
        }
    }

    pub fn start(&mut self, id: Uuid, name: &str) {
        let pb = self.multi.add(ProgressBar::new(0));
        pb.set_style(self.style.clone());
        pb.set_message(name.to_string());
        pb.enable_steady_tick(Duration::from_millis(120));
        self.bars.insert(id, pb);
    }

    pub fn update(&mut self, id: Uuid, progress: &TransferProgress) {
        if let Some(pb) = self.bars.get(&id) {
            if pb.length() != Some(progress.total_bytes) {
                pb.set_length(progress.total_bytes);
            }
            pb.set_position(progress.bytes_so_far);
            pb.set_message(bar_message(progress));
        }
    }

    pub fn finish(&mut self, id: Uuid, outcome: &Outcome) {
        let line = if outcome.success {
            format!("{} {}", "Completed".with(Color::Green).bold(), outcome.message)
        } else {
            format!("{} {}", "Failed".with(Color::Red).bold(), outcome.message)
        };
        match self.bars.remove(&id) {
            Some(pb) => {
                pb.finish_and_clear();
                self.multi.remove(&pb);
                let _ = self.multi.println(line);
            }
            None => {
                let _ = self.multi.println(line);
            }
        }
    }
}

impl Default for TransferBars {
    fn default() -> Self {
        Self::new()
    }
}

/// Name plus percent done; empty files jump straight from 0% to 100%.
fn bar_message(progress: &TransferProgress) -> String {
    format!("{} {:>3.0}%", progress.name, progress.fraction() * 100.0)
}

/// Human-readable byte count for listings and summaries.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1024), "1.0 KB");
        assert_eq!(format_bytes(2 * 1024 * 1024 + 50_000), "2.0 MB");
    }

    #[test]
    fn test_bar_message_percent() {
        let mut p = TransferProgress {
            name: "a.bin".into(),
            chunk_index: 1,
            chunk_count: 4,
            bytes_so_far: 25,
            total_bytes: 100,
        };
        assert_eq!(bar_message(&p), "a.bin  25%");
        p.name = "empty".into();
        p.total_bytes = 0;
        p.bytes_so_far = 0;
        p.chunk_count = 1;
        p.chunk_index = 0;
        assert_eq!(bar_message(&p), "empty   0%");
        p.chunk_index = 1;
        assert_eq!(bar_message(&p), "empty 100%");
    }
}
