//! honeypot integrity watchdog
//!
//! polls a decoy credential file and compares a whitespace-normalized sha256
//! of its content against the hash of the known-good content.
//!
//! ```text
//!            hash != golden, hash != last alerted
//!   SECURE ─────────────────────────────────────▶ BREACHED ──┐ new content:
//!     ▲                                              │   ◀───┘ alert again
//!     └──────────────── hash == golden ──────────────┘
//! ```
//!
//! one CRITICAL event per distinct tampered content, one RECOVERY event when
//! the file is back to golden. re-observing the same tampered content is
//! silent.
//!
//! the state lives in [`WatchdogState`], owned by whoever drives the polls.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::audit::{AuditEvent, EventKind, EventSink, SecurityLog, Source};
use crate::Result;

/// fingerprint used when the artifact has disappeared after bootstrap
pub const MISSING_FINGERPRINT: &str = "missing";

/// sha256 hex of the content with all whitespace removed
pub fn normalized_hash(content: &str) -> String {
    let compact: String = content.split_whitespace().collect();
    hex::encode(Sha256::digest(compact.as_bytes()))
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum Status {
    #[default]
    Secure,
    Breached,
}

/// watchdog state, passed into every poll
#[derive(Clone, Debug, Default)]
pub struct WatchdogState {
    status: Status,
    last_alerted_hash: Option<String>,
}

impl WatchdogState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn last_alerted_hash(&self) -> Option<&str> {
        self.last_alerted_hash.as_deref()
    }
}

/// state change produced by a poll
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transition {
    /// new tampered content observed
    Breach { hash: String },
    /// artifact back to known-good
    Recovered,
}

pub struct Watchdog {
    artifact: PathBuf,
    known_good: String,
    golden_hash: String,
}

impl Watchdog {
    pub fn new(artifact: impl Into<PathBuf>, known_good: impl Into<String>) -> Self {
        let known_good = known_good.into();
        Self {
            artifact: artifact.into(),
            golden_hash: normalized_hash(&known_good),
            known_good,
        }
    }

    pub fn artifact(&self) -> &Path {
        &self.artifact
    }

    pub fn golden_hash(&self) -> &str {
        &self.golden_hash
    }

    /// write the known-good artifact if it does not exist. returns whether it
    /// had to be created.
    pub fn bootstrap(&self) -> Result<bool> {
        if self.artifact.try_exists()? {
            return Ok(false);
        }
        self.write_known_good()?;
        info!("planted honeypot at {}", self.artifact.display());
        Ok(true)
    }

    fn write_known_good(&self) -> Result<()> {
        if let Some(parent) = self.artifact.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&self.artifact, &self.known_good)?;
        Ok(())
    }

    /// current normalized hash of the artifact
    pub fn fingerprint(&self) -> Result<String> {
        match fs::read(&self.artifact) {
            Ok(bytes) => Ok(normalized_hash(&String::from_utf8_lossy(&bytes))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(MISSING_FINGERPRINT.to_string()),
            Err(e) => Err(e.into()),
        }
    }

    /// compare once and advance the state machine. read errors leave the
    /// state untouched.
    pub fn poll(&self, state: &mut WatchdogState) -> Result<Option<Transition>> {
        let current = self.fingerprint()?;

        if current != self.golden_hash {
            if state.last_alerted_hash.as_deref() == Some(current.as_str()) {
                return Ok(None);
            }
            state.status = Status::Breached;
            state.last_alerted_hash = Some(current.clone());
            return Ok(Some(Transition::Breach { hash: current }));
        }

        if state.last_alerted_hash.take().is_some() {
            state.status = Status::Secure;
            return Ok(Some(Transition::Recovered));
        }

        Ok(None)
    }

    /// record a transition in the audit trail (and the security log for breaches)
    pub fn emit(
        &self,
        transition: &Transition,
        sink: &dyn EventSink,
        security: Option<&SecurityLog>,
    ) -> Result<()> {
        match transition {
            Transition::Breach { hash } => {
                let now = Local::now();
                error!(
                    "new breach detected at {}: {} hash {}",
                    now.format("%H:%M:%S"),
                    self.artifact.display(),
                    &hash[..hash.len().min(8)]
                );
                // the audit event goes out even if the security log is unwritable
                let logged = security.map_or(Ok(()), |log| log.record_breach(now, hash));
                sink.append(&AuditEvent::now(
                    Source::Watchdog,
                    EventKind::Critical,
                    "Integrity Check Failed (File Modified)",
                ))?;
                logged
            }
            Transition::Recovered => {
                info!("system secured at {}", Local::now().format("%H:%M:%S"));
                sink.append(&AuditEvent::now(
                    Source::Watchdog,
                    EventKind::Recovery,
                    "Integrity restored (artifact matches golden image)",
                ))
            }
        }
    }

    /// poll and emit; never fails. errors are logged and the state is left as is.
    pub fn tick(
        &self,
        state: &mut WatchdogState,
        sink: &dyn EventSink,
        security: Option<&SecurityLog>,
    ) -> Option<Transition> {
        match self.poll(state) {
            Ok(Some(transition)) => {
                if let Err(e) = self.emit(&transition, sink, security) {
                    warn!("failed to record watchdog event: {}", e);
                }
                Some(transition)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("integrity check failed: {}", e);
                None
            }
        }
    }

    /// one-shot check: bootstrap if absent, then compare with golden
    pub fn check_integrity(&self) -> Result<bool> {
        if self.bootstrap()? {
            return Ok(true);
        }
        Ok(self.fingerprint()? == self.golden_hash)
    }

    /// rewrite the artifact, clear the breach log, note it in the audit trail.
    /// the next poll reports the recovery.
    pub fn restore(&self, sink: &dyn EventSink, security: Option<&SecurityLog>) -> Result<()> {
        self.write_known_good()?;
        if let Some(log) = security {
            log.clear()?;
        }
        sink.append(&AuditEvent::now(
            Source::Admin,
            EventKind::Restore,
            "System integrity successfully restored.",
        ))?;
        info!("honeypot restored at {}", self.artifact.display());
        Ok(())
    }

    /// spawn the polling loop. runs until the handle is stopped.
    pub fn spawn(
        self,
        sink: Arc<dyn EventSink>,
        security: Option<SecurityLog>,
        interval: Duration,
    ) -> WatchdogHandle {
        let (status_tx, status_rx) = watch::channel(Status::Secure);
        let task = tokio::spawn(self.run(sink, security, interval, status_tx));
        WatchdogHandle {
            status: status_rx,
            task,
        }
    }

    async fn run(
        self,
        sink: Arc<dyn EventSink>,
        security: Option<SecurityLog>,
        interval: Duration,
        status: watch::Sender<Status>,
    ) {
        if let Err(e) = self.bootstrap() {
            warn!("could not plant honeypot at {}: {}", self.artifact.display(), e);
        }
        info!("watchdog active, monitoring {}", self.artifact.display());

        let mut state = WatchdogState::new();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            self.tick(&mut state, sink.as_ref(), security.as_ref());
            status.send_replace(state.status());
        }
    }
}

/// handle to a running watchdog task
pub struct WatchdogHandle {
    status: watch::Receiver<Status>,
    task: JoinHandle<()>,
}

impl WatchdogHandle {
    /// latest published status
    pub fn status(&self) -> Status {
        *self.status.borrow()
    }

    /// receiver for status changes
    pub fn subscribe(&self) -> watch::Receiver<Status> {
        self.status.clone()
    }

    pub fn stop(self) {
        self.task.abort();
    }

    /// wait for the loop (only returns if the task is aborted or panics)
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            if !e.is_cancelled() {
                error!("watchdog task failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemorySink;
    use tempfile::tempdir;

    const BAIT: &str = "# ADMIN CREDENTIALS - DO NOT SHARE\nusername: admin1\npassword:admin@123";

    fn setup() -> (tempfile::TempDir, Watchdog) {
        let dir = tempdir().unwrap();
        let watchdog = Watchdog::new(dir.path().join("node1/admin_credentials.txt"), BAIT);
        (dir, watchdog)
    }

    #[test]
    fn test_normalization_ignores_whitespace() {
        assert_eq!(normalized_hash("a b\n c\t"), normalized_hash("abc"));
        assert_ne!(normalized_hash("abc"), normalized_hash("abd"));
        // sha256("") in hex
        assert_eq!(
            normalized_hash(" \n "),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_bootstrap_plants_artifact() {
        let (_dir, watchdog) = setup();
        assert!(watchdog.bootstrap().unwrap());
        assert!(!watchdog.bootstrap().unwrap());
        assert_eq!(fs::read_to_string(watchdog.artifact()).unwrap(), BAIT);

        let mut state = WatchdogState::new();
        assert_eq!(watchdog.poll(&mut state).unwrap(), None);
        assert_eq!(state.status(), Status::Secure);
    }

    #[test]
    fn test_formatting_drift_is_not_a_breach() {
        let (_dir, watchdog) = setup();
        watchdog.bootstrap().unwrap();
        fs::write(watchdog.artifact(), BAIT.replace('\n', "\r\n\n  ")).unwrap();

        let mut state = WatchdogState::new();
        assert_eq!(watchdog.poll(&mut state).unwrap(), None);
    }

    #[test]
    fn test_hysteresis() {
        let (_dir, watchdog) = setup();
        let sink = MemorySink::new();
        let mut state = WatchdogState::new();
        watchdog.bootstrap().unwrap();

        // secure, nothing to say
        assert!(watchdog.tick(&mut state, &sink, None).is_none());

        // first tamper: one critical
        fs::write(watchdog.artifact(), "password: hunter2").unwrap();
        assert!(matches!(
            watchdog.tick(&mut state, &sink, None),
            Some(Transition::Breach { .. })
        ));
        assert_eq!(state.status(), Status::Breached);
        assert_eq!(sink.count(EventKind::Critical), 1);

        // same content again: silent
        for _ in 0..3 {
            assert!(watchdog.tick(&mut state, &sink, None).is_none());
        }
        assert_eq!(sink.count(EventKind::Critical), 1);

        // different tamper while breached: alert again
        fs::write(watchdog.artifact(), "password: hunter3").unwrap();
        watchdog.tick(&mut state, &sink, None);
        assert_eq!(sink.count(EventKind::Critical), 2);

        // restore: one recovery
        fs::write(watchdog.artifact(), BAIT).unwrap();
        assert_eq!(watchdog.tick(&mut state, &sink, None), Some(Transition::Recovered));
        assert!(watchdog.tick(&mut state, &sink, None).is_none());
        assert_eq!(sink.count(EventKind::Recovery), 1);
        assert_eq!(state.status(), Status::Secure);
        assert!(state.last_alerted_hash().is_none());

        // tamper again after recovery with the earlier content: new alert
        fs::write(watchdog.artifact(), "password: hunter2").unwrap();
        watchdog.tick(&mut state, &sink, None);
        assert_eq!(sink.count(EventKind::Critical), 3);
    }

    #[test]
    fn test_deleted_artifact_is_breach() {
        let (_dir, watchdog) = setup();
        let mut state = WatchdogState::new();
        watchdog.bootstrap().unwrap();
        fs::remove_file(watchdog.artifact()).unwrap();

        assert_eq!(
            watchdog.poll(&mut state).unwrap(),
            Some(Transition::Breach {
                hash: MISSING_FINGERPRINT.to_string()
            })
        );
        assert_eq!(watchdog.poll(&mut state).unwrap(), None);
    }

    #[test]
    fn test_breach_written_to_security_log() {
        let (dir, watchdog) = setup();
        let sink = MemorySink::new();
        let security = SecurityLog::new(dir.path().join("security_events.log"));
        let mut state = WatchdogState::new();
        watchdog.bootstrap().unwrap();

        fs::write(watchdog.artifact(), "tampered").unwrap();
        watchdog.tick(&mut state, &sink, Some(&security));
        let lines = security.lines().unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains(&normalized_hash("tampered")[..8]));

        // restore clears the log and is audited; the next poll recovers
        watchdog.restore(&sink, Some(&security)).unwrap();
        assert!(security.lines().unwrap().is_empty());
        assert_eq!(sink.count(EventKind::Restore), 1);
        assert!(watchdog.check_integrity().unwrap());
        assert_eq!(watchdog.tick(&mut state, &sink, Some(&security)), Some(Transition::Recovered));
    }

    #[test]
    fn test_unwritable_security_log_still_alerts() {
        let (dir, watchdog) = setup();
        let sink = MemorySink::new();
        // a directory cannot be appended to
        let security = SecurityLog::new(dir.path());
        let mut state = WatchdogState::new();
        watchdog.bootstrap().unwrap();

        fs::write(watchdog.artifact(), "tampered").unwrap();
        let first = watchdog.tick(&mut state, &sink, Some(&security));
        assert!(matches!(first, Some(Transition::Breach { .. })));
        assert_eq!(watchdog.tick(&mut state, &sink, Some(&security)), None);
        assert_eq!(sink.count(EventKind::Critical), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_loop_publishes_status() {
        let (_dir, watchdog) = setup();
        let artifact = watchdog.artifact().to_path_buf();
        let sink = Arc::new(MemorySink::new());

        let handle = watchdog.spawn(sink.clone(), None, Duration::from_secs(1));
        let mut status = handle.subscribe();

        // let the first tick run (bootstrap + secure poll)
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(handle.status(), Status::Secure);
        assert!(artifact.exists());

        fs::write(&artifact, "tampered").unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        status.wait_for(|s| *s == Status::Breached).await.unwrap();
        assert_eq!(sink.count(EventKind::Critical), 1);

        handle.stop();
    }
}
