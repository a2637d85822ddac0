//! Deploy status file writer
//!
//! Writes a status snapshot to `.shiplink-status.json` next to the output
//! directory for tooling consumption. Status includes daemon PID, listen
//! port, connection state, and the last completed push cycle. Display-only:
//! write failures are logged at debug and never disturb the pipeline.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Status snapshot written to `.shiplink-status.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// ISO 8601 timestamp when status was last written
    pub updated_at: String,
    /// Process ID of the daemon
    pub pid: u32,
    /// Daemon version (crate version)
    pub version: String,
    /// Port the link listens on
    pub port: u16,
    /// Whether a runtime client is currently connected
    pub connected: bool,
    /// Last completed push cycle, if any
    pub last_push: Option<PushSummary>,
}

/// Summary of the last completed push cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushSummary {
    /// Number of files pushed
    pub files: usize,
    /// Sum of per-file RAM costs
    pub total_ram: f64,
    /// ISO 8601 completion time
    pub finished_at: String,
}

/// Status file writer that tracks deploy state
pub struct StatusWriter {
    status_path: PathBuf,
    port: u16,
    version: String,
    last_push: Mutex<Option<PushSummary>>,
}

impl StatusWriter {
    /// Create a new status writer.
    ///
    /// The status file lands next to `output_dir` rather than inside it, so
    /// clearing the output between builds never deletes the snapshot.
    pub fn new(output_dir: &Path, port: u16, version: String) -> Self {
        let status_path = match output_dir.parent() {
            Some(parent) => parent.join(".shiplink-status.json"),
            None => output_dir.join(".shiplink-status.json"),
        };

        Self {
            status_path,
            port,
            version,
            last_push: Mutex::new(None),
        }
    }

    /// Record a completed push cycle and rewrite the status file.
    pub fn record_push(&self, files: usize, total_ram: f64, connected: bool) {
        {
            let mut last_push = self.last_push.lock().unwrap();
            *last_push = Some(PushSummary {
                files,
                total_ram,
                finished_at: format_timestamp(SystemTime::now()),
            });
        }
        self.write(connected);
    }

    /// Rewrite the status file after a connection change.
    pub fn record_connection(&self, connected: bool) {
        self.write(connected);
    }

    /// Get the status file path
    pub fn status_path(&self) -> &Path {
        &self.status_path
    }

    /// Write the snapshot atomically (temp file + rename). Best-effort.
    fn write(&self, connected: bool) {
        let status = DaemonStatus {
            updated_at: format_timestamp(SystemTime::now()),
            pid: std::process::id(),
            version: self.version.clone(),
            port: self.port,
            connected,
            last_push: self.last_push.lock().unwrap().clone(),
        };

        if let Err(e) = self.write_atomic(&status) {
            debug!("Failed to write status file {:?}: {e}", self.status_path);
        }
    }

    fn write_atomic(&self, status: &DaemonStatus) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(status)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        // On Windows, rename does not replace existing files, so remove
        // first.
        let temp_path = self.status_path.with_extension("json.tmp");
        std::fs::write(&temp_path, json.as_bytes())?;
        if self.status_path.exists() {
            std::fs::remove_file(&self.status_path)?;
        }
        std::fs::rename(&temp_path, &self.status_path)?;
        Ok(())
    }
}

/// Format timestamp as ISO 8601 string
fn format_timestamp(time: SystemTime) -> String {
    let duration = time.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
    let secs = duration.as_secs();
    let nanos = duration.subsec_nanos();

    use chrono::{DateTime, Utc};
    let dt = DateTime::<Utc>::from_timestamp(secs as i64, nanos).unwrap_or_else(Utc::now);
    dt.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_status_file_lands_next_to_output_dir() {
        let temp_dir = TempDir::new().unwrap();
        let output_dir = temp_dir.path().join("build");

        let writer = StatusWriter::new(&output_dir, 12525, "0.7.2".to_string());
        assert_eq!(
            writer.status_path(),
            temp_dir.path().join(".shiplink-status.json")
        );

        writer.record_connection(true);
        assert!(writer.status_path().exists());
        // The output dir itself was never created.
        assert!(!output_dir.exists());
    }

    #[test]
    fn test_push_summary_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let output_dir = temp_dir.path().join("build");
        let writer = StatusWriter::new(&output_dir, 4855, "0.7.2".to_string());

        writer.record_push(3, 7.25, true);

        let content = std::fs::read_to_string(writer.status_path()).unwrap();
        let status: DaemonStatus = serde_json::from_str(&content).unwrap();

        assert_eq!(status.pid, std::process::id());
        assert_eq!(status.port, 4855);
        assert!(status.connected);
        let push = status.last_push.unwrap();
        assert_eq!(push.files, 3);
        assert!((push.total_ram - 7.25).abs() < f64::EPSILON);
        assert!(push.finished_at.ends_with('Z'));
    }

    #[test]
    fn test_last_push_survives_connection_updates() {
        let temp_dir = TempDir::new().unwrap();
        let output_dir = temp_dir.path().join("build");
        let writer = StatusWriter::new(&output_dir, 1, "0.7.2".to_string());

        writer.record_push(2, 3.2, true);
        writer.record_connection(false);

        let content = std::fs::read_to_string(writer.status_path()).unwrap();
        let status: DaemonStatus = serde_json::from_str(&content).unwrap();

        assert!(!status.connected);
        assert_eq!(status.last_push.unwrap().files, 2);
    }

    #[test]
    fn test_unwritable_location_does_not_panic() {
        let temp_dir = TempDir::new().unwrap();
        // Parent of the output dir does not exist, so writes fail.
        let output_dir = temp_dir.path().join("missing/build");
        let writer = StatusWriter::new(&output_dir, 1, "0.7.2".to_string());

        writer.record_push(1, 1.6, true);
        assert!(!writer.status_path().exists());
    }

    #[test]
    fn test_format_timestamp_is_rfc3339() {
        let formatted = format_timestamp(SystemTime::now());
        assert!(formatted.contains('T'));
        assert!(formatted.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&formatted).is_ok());
    }
}
