//! Append-only NDJSON audit log.
//!
//! One JSON line per record, flushed on every append so a crash loses at
//! most the in-flight record. The host is the only writer and the only
//! reader; queries scan the file and filter.

use ax_ipc::AuditSink;
use ax_types::audit::{AuditFilter, AuditRecord};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

/// Hard cap on entries returned by one query.
const MAX_QUERY_LIMIT: usize = 500;

/// NDJSON-file audit log.
pub struct NdjsonAuditLog {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl NdjsonAuditLog {
    /// Open or create the log file for appending.
    pub fn open(path: PathBuf) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// The log file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, record: &AuditRecord) -> std::io::Result<()> {
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        serde_json::to_writer(&mut *writer, record).map_err(std::io::Error::other)?;
        writer.write_all(b"\n")?;
        writer.flush()
    }
}

impl AuditSink for NdjsonAuditLog {
    fn record(&self, record: AuditRecord) {
        if let Err(e) = self.append(&record) {
            // The audit trail is policy-mandatory; failure to write is loud
            // but must not take down the handler that triggered it.
            warn!(error = %e, action = %record.action, "Audit append failed");
        }
    }

    fn query(&self, filter: &AuditFilter) -> Vec<AuditRecord> {
        let limit = filter.limit.unwrap_or(100).min(MAX_QUERY_LIMIT);
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(_) => return Vec::new(),
        };

        let mut matched: Vec<AuditRecord> = Vec::new();
        for line in BufReader::new(file).lines().map_while(Result::ok) {
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditRecord>(&line) {
                Ok(record) if filter.matches(&record) => matched.push(record),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Skipping corrupt audit line"),
            }
        }

        // Newest first, bounded.
        matched.reverse();
        matched.truncate(limit);
        matched
    }
}
