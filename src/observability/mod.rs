//! Observability infrastructure for mail operations.
//!
//! Provides counters for sent, received and monitored mail, a duration timer,
//! and the protocol log file writer.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::errors::{MailError, MailErrorKind, MailResult};

/// Mail metrics collector, shared by every service of a [`MailServices`](crate::MailServices).
#[derive(Debug, Default)]
pub struct MailMetrics {
    /// Emails accepted by the transport.
    pub emails_sent: AtomicU64,
    /// Emails that failed to send.
    pub emails_failed: AtomicU64,
    /// Emails or summaries fetched by the receiver.
    pub emails_received: AtomicU64,
    /// Failed receive operations.
    pub receive_failures: AtomicU64,
    /// Arrivals reported by folder monitors.
    pub arrivals: AtomicU64,
    /// Departures reported by folder monitors.
    pub departures: AtomicU64,
    /// Reconnects after a lost or failed session.
    pub reconnects: AtomicU64,
}

impl MailMetrics {
    /// Creates a new metrics collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a successful send.
    pub fn record_send_success(&self) {
        self.emails_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a failed send.
    pub fn record_send_failure(&self) {
        self.emails_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Records received messages.
    pub fn record_received(&self, count: usize) {
        self.emails_received.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Records a failed receive operation.
    pub fn record_receive_failure(&self) {
        self.receive_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a message arrival.
    pub fn record_arrival(&self) {
        self.arrivals.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a message departure.
    pub fn record_departure(&self) {
        self.departures.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a reconnect.
    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            emails_sent: self.emails_sent.load(Ordering::Relaxed),
            emails_failed: self.emails_failed.load(Ordering::Relaxed),
            emails_received: self.emails_received.load(Ordering::Relaxed),
            receive_failures: self.receive_failures.load(Ordering::Relaxed),
            arrivals: self.arrivals.load(Ordering::Relaxed),
            departures: self.departures.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }

    /// Resets all metrics.
    pub fn reset(&self) {
        for counter in [
            &self.emails_sent,
            &self.emails_failed,
            &self.emails_received,
            &self.receive_failures,
            &self.arrivals,
            &self.departures,
            &self.reconnects,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Emails accepted by the transport.
    pub emails_sent: u64,
    /// Emails that failed to send.
    pub emails_failed: u64,
    /// Emails or summaries fetched.
    pub emails_received: u64,
    /// Failed receive operations.
    pub receive_failures: u64,
    /// Arrivals reported by monitors.
    pub arrivals: u64,
    /// Departures reported by monitors.
    pub departures: u64,
    /// Reconnects.
    pub reconnects: u64,
}

impl MetricsSnapshot {
    /// Returns the send success rate.
    pub fn send_success_rate(&self) -> f64 {
        let total = self.emails_sent + self.emails_failed;
        if total == 0 {
            1.0
        } else {
            self.emails_sent as f64 / total as f64
        }
    }
}

/// Timer for measuring operation duration.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    name: &'static str,
}

impl Timer {
    /// Creates and starts a new timer.
    pub fn start(name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            name,
        }
    }

    /// Returns the elapsed time.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stops the timer and returns the duration.
    pub fn stop(self) -> Duration {
        let elapsed = self.start.elapsed();
        tracing::debug!(
            timer = self.name,
            duration_ms = elapsed.as_millis() as u64,
            "Timer stopped"
        );
        elapsed
    }
}

/// Appends protocol lines to a log file.
///
/// Each line is prefixed with an RFC 3339 timestamp. Clones share the file.
#[derive(Debug, Clone)]
pub struct ProtocolLogger {
    path: PathBuf,
    file: Arc<Mutex<File>>,
}

impl ProtocolLogger {
    /// Opens (or creates) the log file in append mode, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> MailResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| log_error(&path, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| log_error(&path, e))?;

        Ok(Self {
            path,
            file: Arc::new(Mutex::new(file)),
        })
    }

    /// Returns the log file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes one entry. Multi-line text is split so every line gets a prefix.
    ///
    /// Write failures are reported through tracing and otherwise ignored, so a
    /// full disk never fails a mail operation.
    pub fn log(&self, prefix: &str, text: &str) {
        let timestamp = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        let mut entry = String::new();
        for line in text.lines() {
            entry.push_str(&format!("{} {}{}\n", timestamp, prefix, line));
        }

        let Ok(mut file) = self.file.lock() else {
            tracing::warn!(path = %self.path.display(), "Protocol log lock poisoned");
            return;
        };
        if let Err(e) = file.write_all(entry.as_bytes()) {
            tracing::warn!(path = %self.path.display(), error = %e, "Protocol log write failed");
        }
    }
}

fn log_error(path: &Path, error: std::io::Error) -> MailError {
    MailError::new(
        MailErrorKind::Io,
        format!("Cannot open protocol log {}: {}", path.display(), error),
    )
    .with_cause(error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics() {
        let metrics = MailMetrics::new();

        metrics.record_send_success();
        metrics.record_send_success();
        metrics.record_send_failure();
        metrics.record_received(5);
        metrics.record_arrival();
        metrics.record_reconnect();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.emails_sent, 2);
        assert_eq!(snapshot.emails_failed, 1);
        assert_eq!(snapshot.emails_received, 5);
        assert_eq!(snapshot.arrivals, 1);
        assert_eq!(snapshot.reconnects, 1);
        assert!((snapshot.send_success_rate() - 0.666).abs() < 0.01);

        metrics.reset();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_timer() {
        let timer = Timer::start("test");
        std::thread::sleep(Duration::from_millis(10));
        assert!(timer.stop() >= Duration::from_millis(10));
    }

    #[test]
    fn test_protocol_logger_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("imap.txt");

        let logger = ProtocolLogger::open(&path).unwrap();
        logger.log("C: ", "A1 LOGIN user ****");
        logger.clone().log("S: ", "* OK ready\r\nA1 OK done");

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with("C: A1 LOGIN user ****"));
        assert!(lines[2].ends_with("S: A1 OK done"));

        // Reopening appends rather than truncates
        ProtocolLogger::open(&path).unwrap().log("C: ", "A2 LOGOUT");
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 4);
    }
}
