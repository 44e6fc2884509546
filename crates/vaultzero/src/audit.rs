//! audit trail and security log
//!
//! the audit trail is an append-only, pipe-separated text file:
//!
//! ```text
//! 2024-05-01 10:00:00|2024-05-01 15:30:00|CLIENT|UPLOAD|Distributed asset 'a.pdf' in 12.40ms
//! ```
//!
//! columns: utc time, local time, source, event, message.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// who raised an event
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Source {
    Client,
    Chaos,
    Admin,
    Watchdog,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Client => write!(f, "CLIENT"),
            Source::Chaos => write!(f, "CHAOS"),
            Source::Admin => write!(f, "ADMIN"),
            Source::Watchdog => write!(f, "WATCHDOG"),
        }
    }
}

/// what happened
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Upload,
    Download,
    DataBurn,
    NodeFlip,
    Reset,
    Restore,
    Critical,
    Recovery,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventKind::Upload => "UPLOAD",
            EventKind::Download => "DOWNLOAD",
            EventKind::DataBurn => "DATA_BURN",
            EventKind::NodeFlip => "NODE_FLIP",
            EventKind::Reset => "RESET",
            EventKind::Restore => "RESTORE",
            EventKind::Critical => "CRITICAL",
            EventKind::Recovery => "RECOVERY",
        };
        f.write_str(s)
    }
}

/// one audit event
#[derive(Clone, Debug)]
pub struct AuditEvent {
    pub utc: DateTime<Utc>,
    pub local: DateTime<Local>,
    pub source: Source,
    pub kind: EventKind,
    pub message: String,
}

impl AuditEvent {
    /// stamp an event with the current time
    pub fn now(source: Source, kind: EventKind, message: impl Into<String>) -> Self {
        let utc = Utc::now();
        Self {
            utc,
            local: utc.with_timezone(&Local),
            source,
            kind,
            message: message.into(),
        }
    }

    /// render as one log line (no trailing newline)
    pub fn to_line(&self) -> String {
        let message: String = self
            .message
            .chars()
            .map(|c| match c {
                '|' => '/',
                '\n' | '\r' => ' ',
                c => c,
            })
            .collect();
        format!(
            "{}|{}|{}|{}|{}",
            self.utc.format(TIME_FORMAT),
            self.local.format(TIME_FORMAT),
            self.source,
            self.kind,
            message
        )
    }
}

/// parsed audit line
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AuditRecord {
    pub utc: String,
    pub local: String,
    pub source: String,
    pub event: String,
    pub message: String,
}

impl AuditRecord {
    /// parse the first five columns, ignoring any extras
    pub fn parse(line: &str) -> Option<Self> {
        let mut cols = line.trim_end().splitn(6, '|');
        Some(Self {
            utc: cols.next()?.to_string(),
            local: cols.next()?.to_string(),
            source: cols.next()?.to_string(),
            event: cols.next()?.to_string(),
            message: cols.next()?.to_string(),
        })
    }
}

/// destination for audit events
pub trait EventSink: Send + Sync {
    fn append(&self, event: &AuditEvent) -> Result<()>;
}

fn append_line(path: &Path, line: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", line)?;
    file.flush()?;
    Ok(())
}

fn read_lines(path: &Path) -> Result<Vec<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content.lines().map(str::to_string).collect()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

fn truncate(path: &Path) -> Result<()> {
    match fs::write(path, b"") {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// file-backed audit trail
#[derive(Clone, Debug)]
pub struct AuditTrail {
    path: PathBuf,
}

impl AuditTrail {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// all records, newest first. lines without columns are skipped
    pub fn entries(&self) -> Result<Vec<AuditRecord>> {
        let mut records: Vec<_> = read_lines(&self.path)?
            .iter()
            .filter(|l| l.contains('|'))
            .filter_map(|l| AuditRecord::parse(l))
            .collect();
        records.reverse();
        Ok(records)
    }

    /// drop every record
    pub fn clear(&self) -> Result<()> {
        truncate(&self.path)
    }
}

impl EventSink for AuditTrail {
    fn append(&self, event: &AuditEvent) -> Result<()> {
        append_line(&self.path, &event.to_line())
    }
}

/// breach log written by the watchdog, cleared on restore
#[derive(Clone, Debug)]
pub struct SecurityLog {
    path: PathBuf,
}

impl SecurityLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `HH:MM:SS | CRITICAL | INTEGRITY FAIL | Hash: 1a2b3c4d...`
    pub fn record_breach(&self, at: DateTime<Local>, hash: &str) -> Result<()> {
        let short: String = hash.chars().take(8).collect();
        let line = format!(
            "{} | CRITICAL | INTEGRITY FAIL | Hash: {}...",
            at.format("%H:%M:%S"),
            short
        );
        append_line(&self.path, &line)
    }

    pub fn lines(&self) -> Result<Vec<String>> {
        read_lines(&self.path)
    }

    pub fn clear(&self) -> Result<()> {
        truncate(&self.path)
    }
}

/// collects events in memory (tests)
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.events().iter().filter(|e| e.kind == kind).count()
    }
}

impl EventSink for MemorySink {
    fn append(&self, event: &AuditEvent) -> Result<()> {
        self.events
            .lock()
            .map_err(|e| Error::Storage(e.to_string()))?
            .push(event.clone());
        Ok(())
    }
}
