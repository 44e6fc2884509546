//! latency telemetry
//!
//! a small json ledger of ingest latencies for the operator, plus `metrics`
//! counters/histograms for whatever exporter the host process installs.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Local;
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// one latency sample
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LatencySample {
    /// local wall clock, HH:MM:SS
    pub at: String,
    pub ms: f64,
}

/// json array of latency samples on disk
#[derive(Clone, Debug)]
pub struct LatencyLedger {
    path: PathBuf,
}

impl LatencyLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// all samples, oldest first. a missing or empty file is an empty ledger
    pub fn samples(&self) -> Result<Vec<LatencySample>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&content).map_err(|e| Error::Storage(format!("latency ledger: {}", e)))
    }

    /// append one sample
    pub fn record(&self, elapsed: Duration) -> Result<LatencySample> {
        let mut samples = self.samples()?;
        let sample = LatencySample {
            at: Local::now().format("%H:%M:%S").to_string(),
            ms: elapsed.as_secs_f64() * 1000.0,
        };
        samples.push(sample.clone());
        self.write(&samples)?;
        Ok(sample)
    }

    /// reset to an empty ledger
    pub fn clear(&self) -> Result<()> {
        self.write(&[])
    }

    fn write(&self, samples: &[LatencySample]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string(samples).map_err(|e| Error::Storage(e.to_string()))?;
        fs::write(&self.path, json)?;
        Ok(())
    }
}

/// count an operation and record its duration
pub fn observe(op: &'static str, elapsed: Duration, ok: bool) {
    let outcome = if ok { "ok" } else { "error" };
    counter!("vaultzero_operations_total", "op" => op, "outcome" => outcome).increment(1);
    histogram!("vaultzero_operation_duration_seconds", "op" => op).record(elapsed.as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_record_and_clear() {
        let dir = tempdir().unwrap();
        let ledger = LatencyLedger::new(dir.path().join("performance_metrics.json"));
        assert!(ledger.samples().unwrap().is_empty());

        ledger.record(Duration::from_millis(12)).unwrap();
        ledger.record(Duration::from_micros(1500)).unwrap();

        let samples = ledger.samples().unwrap();
        assert_eq!(samples.len(), 2);
        assert!((samples[0].ms - 12.0).abs() < 1e-9);
        assert!((samples[1].ms - 1.5).abs() < 1e-9);
        assert_eq!(samples[0].at.len(), 8);

        ledger.clear().unwrap();
        assert!(ledger.samples().unwrap().is_empty());
        assert_eq!(fs::read_to_string(ledger.path()).unwrap(), "[]");
    }

    #[test]
    fn test_corrupt_ledger_is_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("performance_metrics.json");
        fs::write(&path, "{not json").unwrap();
        assert!(LatencyLedger::new(path).samples().is_err());
    }

    #[test]
    fn test_observe_without_recorder() {
        // no recorder installed: must be a no-op
        observe("ingest", Duration::from_millis(3), true);
    }
}
