//! write and read paths over the grid
//!
//! ```text
//!   ingest:     payload ──kdf+aead──▶ envelope ──▶ every live data node
//!                  passphrase ──pad+split──▶ one share per live key node
//!               (both legs run concurrently, registry entry after both land)
//!
//!   reassemble: live key nodes ──quorum──▶ passphrase' ──compare──▶ decrypt
//! ```
//!
//! reconstructing the key is necessary but not sufficient: the caller must
//! also present the passphrase, so controlling a quorum of storage alone
//! yields nothing.

use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::Serialize;
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::audit::{AuditEvent, AuditTrail, EventKind, EventSink, Source};
use crate::config::GridConfig;
use crate::crypto::derive_key;
use crate::envelope;
use crate::quorum::{NodeLiveness, QuorumReconstructor, Topology};
use crate::registry::{AssetEntry, Registry};
use crate::share::PaddedSecret;
use crate::store::{validate_asset_name, ShareStore};
use crate::telemetry::{self, LatencyLedger};
use crate::{Error, Result};

/// longest accepted passphrase, in bytes
pub const MAX_PASSPHRASE_LEN: usize = 64;

/// outcome of a successful ingest
#[derive(Clone, Debug, Serialize)]
pub struct IngestReceipt {
    pub asset: String,
    /// envelope copies written
    pub replicas: usize,
    /// key shares written
    pub key_shards: usize,
    pub elapsed: Duration,
}

/// per-node status as shown to the operator
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum NodeStatus {
    Operational,
    Offline,
    /// online, but hosts a honeypot that failed its integrity check
    Compromised,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeStatus::Operational => write!(f, "OPERATIONAL"),
            NodeStatus::Offline => write!(f, "OFFLINE"),
            NodeStatus::Compromised => write!(f, "COMPROMISED"),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct NodeReport {
    pub index: usize,
    pub name: String,
    pub status: NodeStatus,
}

/// strip surrounding ascii whitespace
fn trim_whitespace(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &bytes[start..end]
}

/// constant-time comparison after trimming incidental whitespace
fn passphrases_match(recovered: &[u8], supplied: &[u8]) -> bool {
    trim_whitespace(recovered)
        .ct_eq(trim_whitespace(supplied))
        .into()
}

pub struct Vault {
    data: Arc<dyn ShareStore>,
    keys: QuorumReconstructor,
    registry: Registry,
    audit: Arc<dyn EventSink>,
    latency: Option<LatencyLedger>,
    liveness: RwLock<NodeLiveness>,
    honeypot_node: Option<usize>,
}

impl Vault {
    /// assemble a vault from its parts. all nodes start online.
    pub fn new(
        data: Arc<dyn ShareStore>,
        keys: Arc<dyn ShareStore>,
        topology: Topology,
        registry: Registry,
        audit: Arc<dyn EventSink>,
    ) -> Result<Self> {
        if data.node_count() != topology.node_count() {
            return Err(Error::Config(format!(
                "data store spans {} nodes, topology has {}",
                data.node_count(),
                topology.node_count()
            )));
        }
        let nodes = topology.node_count();
        Ok(Self {
            data,
            keys: QuorumReconstructor::new(keys, topology)?,
            registry,
            audit,
            latency: None,
            liveness: RwLock::new(NodeLiveness::all_online(nodes)),
            honeypot_node: None,
        })
    }

    /// open the on-disk grid described by `config`, creating node directories
    pub fn open(config: &GridConfig) -> Result<Self> {
        config.prepare()?;
        let honeypot_node = config
            .data_nodes
            .iter()
            .position(|root| config.honeypot.starts_with(root));

        let vault = Self::new(
            Arc::new(config.data_store()),
            Arc::new(config.key_store()),
            config.topology(),
            Registry::open(&config.registry_path)?,
            Arc::new(AuditTrail::new(&config.audit_log)),
        )?
        .with_write_latency(config.write_latency())
        .with_latency_ledger(LatencyLedger::new(&config.latency_log));

        Ok(Self {
            honeypot_node,
            ..vault
        })
    }

    /// simulated per-node delay on share writes
    pub fn with_write_latency(mut self, latency: Duration) -> Self {
        self.keys = self.keys.with_write_latency(latency);
        self
    }

    pub fn with_latency_ledger(mut self, ledger: LatencyLedger) -> Self {
        self.latency = Some(ledger);
        self
    }

    /// node whose data root hosts the honeypot
    pub fn with_honeypot_node(mut self, node: usize) -> Self {
        self.honeypot_node = Some(node);
        self
    }

    /// start with `nodes` offline. session setup, not a node flip, so
    /// nothing reaches the audit trail.
    pub fn with_offline(mut self, nodes: &[usize]) -> Result<Self> {
        let liveness = self
            .liveness
            .get_mut()
            .map_err(|_| Error::Storage("liveness lock poisoned".into()))?;
        for &node in nodes {
            liveness.set(node, false)?;
        }
        Ok(self)
    }

    pub fn topology(&self) -> &Topology {
        self.keys.topology()
    }

    /// snapshot of the liveness flags
    pub fn liveness(&self) -> Result<NodeLiveness> {
        self.liveness
            .read()
            .map(|l| l.clone())
            .map_err(|_| Error::Storage("liveness lock poisoned".into()))
    }

    fn record(&self, source: Source, kind: EventKind, message: String) {
        if let Err(e) = self.audit.append(&AuditEvent::now(source, kind, message)) {
            warn!("failed to write audit event {}: {}", kind, e);
        }
    }

    /// encrypt `payload` under `passphrase` and spread it over the grid.
    ///
    /// surrounding whitespace is not part of the passphrase. offline nodes
    /// receive neither a replica nor a share.
    pub async fn ingest(
        &self,
        asset: &str,
        passphrase: &[u8],
        payload: &[u8],
    ) -> Result<IngestReceipt> {
        let start = Instant::now();
        let result = self.ingest_inner(asset, passphrase, payload, start).await;
        telemetry::observe("ingest", start.elapsed(), result.is_ok());
        result
    }

    async fn ingest_inner(
        &self,
        asset: &str,
        passphrase: &[u8],
        payload: &[u8],
        start: Instant,
    ) -> Result<IngestReceipt> {
        validate_asset_name(asset)?;

        let passphrase = Zeroizing::new(trim_whitespace(passphrase).to_vec());
        if passphrase.is_empty() || passphrase.len() > MAX_PASSPHRASE_LEN {
            return Err(Error::InvalidPassphrase {
                len: passphrase.len(),
                max: MAX_PASSPHRASE_LEN,
            });
        }
        // fail before anything touches disk
        PaddedSecret::new(&passphrase, self.topology().secret_len)?;

        let liveness = self.liveness()?;
        if liveness.online_count() == 0 {
            return Err(Error::GridOffline);
        }

        let (replicas, key_shards) = tokio::join!(
            self.seal_and_replicate(asset, &passphrase, payload, &liveness),
            self.keys.distribute(asset, &passphrase, &liveness),
        );
        let (replicas, key_shards) = (replicas?, key_shards?);

        self.registry.add(asset)?;

        let elapsed = start.elapsed();
        let ms = elapsed.as_secs_f64() * 1000.0;
        self.record(
            Source::Client,
            EventKind::Upload,
            format!("Distributed asset '{}' in {:.2}ms", asset, ms),
        );
        if let Some(ledger) = &self.latency {
            if let Err(e) = ledger.record(elapsed) {
                warn!("failed to record latency: {}", e);
            }
        }
        info!(
            "ingested {} ({} bytes, {} replicas, {} key shards) in {:.2}ms",
            asset,
            payload.len(),
            replicas,
            key_shards,
            ms
        );

        Ok(IngestReceipt {
            asset: asset.to_string(),
            replicas,
            key_shards,
            elapsed,
        })
    }

    /// derive, encrypt, and write the envelope to every live data node
    async fn seal_and_replicate(
        &self,
        asset: &str,
        passphrase: &[u8],
        payload: &[u8],
        liveness: &NodeLiveness,
    ) -> Result<usize> {
        let passphrase = Zeroizing::new(passphrase.to_vec());
        let payload = payload.to_vec();
        let sealed = tokio::task::spawn_blocking(move || {
            let key = derive_key(&passphrase, None);
            envelope::encrypt(&key, &payload)
        })
        .await
        .map_err(|e| Error::EncryptionFailed(format!("encrypt task: {}", e)))??;
        let sealed = Arc::new(sealed);

        let mut tasks = Vec::new();
        for node in (0..self.data.node_count()).filter(|&n| liveness.is_online(n)) {
            let store = Arc::clone(&self.data);
            let asset = asset.to_string();
            let sealed = Arc::clone(&sealed);
            tasks.push(tokio::task::spawn_blocking(move || {
                store.write(node, &asset, &sealed)
            }));
        }

        let mut written = 0;
        let mut failed = 0;
        for result in join_all(tasks).await {
            match result {
                Ok(Ok(())) => written += 1,
                Ok(Err(e)) => {
                    warn!("replica write failed for {}: {}", asset, e);
                    failed += 1;
                }
                Err(e) => {
                    warn!("replica write task panicked for {}: {}", asset, e);
                    failed += 1;
                }
            }
        }
        if failed > 0 {
            return Err(Error::PartialWrite { written, failed });
        }

        debug!("replicated {} byte envelope for {} to {} nodes", sealed.len(), asset, written);
        Ok(written)
    }

    /// recover an asset. the key derivation runs on the blocking pool.
    pub async fn reassemble(&self, asset: &str, passphrase: &[u8]) -> Result<Vec<u8>> {
        let start = Instant::now();
        let result = self.reassemble_inner(asset, passphrase).await;
        telemetry::observe("reassemble", start.elapsed(), result.is_ok());
        result
    }

    async fn reassemble_inner(&self, asset: &str, passphrase: &[u8]) -> Result<Vec<u8>> {
        validate_asset_name(asset)?;
        if !self.registry.contains(asset)? {
            return Err(Error::AssetNotFound(asset.to_string()));
        }

        let liveness = self.liveness()?;
        let recovered = self.keys.reconstruct(asset, &liveness)?;

        if !passphrases_match(&recovered, passphrase) {
            warn!("access denied for {}", asset);
            return Err(Error::AccessDenied);
        }

        let sealed = self.fetch_envelope(asset, &liveness)?;
        let plaintext = tokio::task::spawn_blocking(move || envelope::decrypt(&recovered, &sealed))
            .await
            .map_err(|e| Error::Storage(format!("decrypt task: {}", e)))??;

        self.record(
            Source::Client,
            EventKind::Download,
            format!("Successfully reassembled asset '{}'.", asset),
        );
        info!("reassembled {} ({} bytes)", asset, plaintext.len());
        Ok(plaintext)
    }

    /// first live node holding a replica
    fn fetch_envelope(&self, asset: &str, liveness: &NodeLiveness) -> Result<Vec<u8>> {
        for node in (0..self.data.node_count()).filter(|&n| liveness.is_online(n)) {
            if self.data.exists(node, asset)? {
                debug!("reading envelope for {} from node {}", asset, node);
                return self.data.read(node, asset);
            }
        }
        Err(Error::CiphertextUnavailable(asset.to_string()))
    }

    /// delete every replica and share of an asset, on every node regardless
    /// of liveness. returns whether the registry knew the asset.
    pub fn burn(&self, asset: &str) -> Result<bool> {
        validate_asset_name(asset)?;
        for node in 0..self.data.node_count() {
            self.data.delete(node, asset)?;
        }
        self.keys.purge(asset)?;
        let existed = self.registry.remove(asset)?;

        self.record(
            Source::Client,
            EventKind::DataBurn,
            format!("Purged asset '{}' and associated key shards.", asset),
        );
        info!("burned {}", asset);
        Ok(existed)
    }

    /// stored asset names, newest first
    pub fn assets(&self) -> Result<Vec<String>> {
        self.registry.list()
    }

    pub fn asset_entries(&self) -> Result<Vec<AssetEntry>> {
        self.registry.entries()
    }

    pub fn set_node(&self, node: usize, online: bool) -> Result<()> {
        {
            let mut liveness = self
                .liveness
                .write()
                .map_err(|_| Error::Storage("liveness lock poisoned".into()))?;
            liveness.set(node, online)?;
        }
        self.record_flip(node, online);
        Ok(())
    }

    /// flip a node, returning its new state
    pub fn toggle_node(&self, node: usize) -> Result<bool> {
        let online = {
            let mut liveness = self
                .liveness
                .write()
                .map_err(|_| Error::Storage("liveness lock poisoned".into()))?;
            liveness.toggle(node)?
        };
        self.record_flip(node, online);
        Ok(online)
    }

    fn record_flip(&self, node: usize, online: bool) {
        let state = if online { "ONLINE" } else { "OFFLINE" };
        info!("node {} ({}) now {}", node + 1, self.topology().node_name(node), state);
        self.record(
            Source::Chaos,
            EventKind::NodeFlip,
            format!("Node {} transition: {}", node + 1, state),
        );
    }

    /// bring every node back online
    pub fn reset(&self) -> Result<()> {
        let nodes = self.topology().node_count();
        *self
            .liveness
            .write()
            .map_err(|_| Error::Storage("liveness lock poisoned".into()))? =
            NodeLiveness::all_online(nodes);
        self.record(
            Source::Admin,
            EventKind::Reset,
            "System session state reset performed.".to_string(),
        );
        Ok(())
    }

    /// status per node given the latest honeypot integrity result
    pub fn node_report(&self, integrity_ok: bool) -> Result<Vec<NodeReport>> {
        let liveness = self.liveness()?;
        let topology = self.topology();
        Ok((0..topology.node_count())
            .map(|index| {
                let status = if !liveness.is_online(index) {
                    NodeStatus::Offline
                } else if !integrity_ok && self.honeypot_node == Some(index) {
                    NodeStatus::Compromised
                } else {
                    NodeStatus::Operational
                };
                NodeReport {
                    index,
                    name: topology.node_name(index).to_string(),
                    status,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemorySink;
    use crate::store::MemoryStore;

    struct Grid {
        vault: Vault,
        data: Arc<MemoryStore>,
        keys: Arc<MemoryStore>,
        sink: Arc<MemorySink>,
    }

    fn grid() -> Grid {
        let data = Arc::new(MemoryStore::new(3));
        let keys = Arc::new(MemoryStore::new(3));
        let sink = Arc::new(MemorySink::new());
        let vault = Vault::new(
            data.clone(),
            keys.clone(),
            Topology::default(),
            Registry::temporary().unwrap(),
            sink.clone(),
        )
        .unwrap()
        .with_honeypot_node(0);
        Grid {
            vault,
            data,
            keys,
            sink,
        }
    }

    #[tokio::test]
    async fn test_ingest_then_reassemble_with_node_down() {
        let g = grid();
        let receipt = g
            .vault
            .ingest("note.txt", b"correct-horse", b"hello vault")
            .await
            .unwrap();
        assert_eq!(receipt.replicas, 3);
        assert_eq!(receipt.key_shards, 3);

        g.vault.set_node(1, false).unwrap();
        let plaintext = g.vault.reassemble("note.txt", b"correct-horse").await.unwrap();
        assert_eq!(plaintext, b"hello vault");

        assert_eq!(g.sink.count(EventKind::Upload), 1);
        assert_eq!(g.sink.count(EventKind::Download), 1);
        assert_eq!(g.vault.assets().unwrap(), vec!["note.txt"]);
    }

    #[tokio::test]
    async fn test_wrong_passphrase_denied_before_decrypt() {
        let g = grid();
        g.vault.ingest("a", b"correct-horse", b"x").await.unwrap();

        let err = g.vault.reassemble("a", b"battery-staple").await.unwrap_err();
        assert!(matches!(err, Error::AccessDenied));
        assert_eq!(err.to_string(), "access denied");
        assert_eq!(g.sink.count(EventKind::Download), 0);

        // incidental whitespace on either side is ignored
        assert_eq!(g.vault.reassemble("a", b"  correct-horse\n").await.unwrap(), b"x");
    }

    #[tokio::test]
    async fn test_passphrase_bounds() {
        let g = grid();
        let too_long = [b'p'; 65];
        for bad in [&b""[..], &b"   "[..], &too_long[..]] {
            assert!(matches!(
                g.vault.ingest("a", bad, b"x").await,
                Err(Error::InvalidPassphrase { max: 64, .. })
            ));
        }

        // accepted at the boundary, but too wide for the shared secret
        let err = g.vault.ingest("a", &[b'p'; 40], b"x").await.unwrap_err();
        assert!(matches!(err, Error::InvalidSecretLength { len: 40, max: 16 }));
        assert!(!g.data.exists(0, "a").unwrap());
        assert!(!g.keys.exists(0, "a").unwrap());
        assert!(g.vault.assets().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_grid_offline() {
        let g = grid();
        for node in 0..3 {
            g.vault.set_node(node, false).unwrap();
        }
        assert!(matches!(
            g.vault.ingest("a", b"pw", b"x").await,
            Err(Error::GridOffline)
        ));
    }

    #[tokio::test]
    async fn test_offline_node_gets_nothing() {
        let g = grid();
        g.vault.set_node(2, false).unwrap();
        let receipt = g.vault.ingest("a", b"pw", b"x").await.unwrap();
        assert_eq!(receipt.replicas, 2);
        assert_eq!(receipt.key_shards, 2);
        assert!(!g.data.exists(2, "a").unwrap());
        assert!(!g.keys.exists(2, "a").unwrap());

        // the never-written share is data loss, not an outage
        g.vault.reset().unwrap();
        assert!(matches!(
            g.vault.reassemble("a", b"pw").await,
            Err(Error::MissingShards(ref nodes)) if nodes == &["Gamma"]
        ));
    }

    #[tokio::test]
    async fn test_quorum_precedence_through_vault() {
        let g = grid();
        g.vault.ingest("a", b"pw", b"x").await.unwrap();
        g.keys.delete(0, "a").unwrap();
        g.vault.set_node(1, false).unwrap();

        assert!(matches!(
            g.vault.reassemble("a", b"pw").await,
            Err(Error::MissingShards(ref nodes)) if nodes == &["Alpha"]
        ));
    }

    #[tokio::test]
    async fn test_quorum_failure_through_vault() {
        let g = grid();
        g.vault.ingest("a", b"pw", b"x").await.unwrap();
        g.vault.set_node(0, false).unwrap();
        g.vault.set_node(1, false).unwrap();

        assert!(matches!(
            g.vault.reassemble("a", b"pw").await,
            Err(Error::QuorumFailure { online: 1, need: 2 })
        ));
    }

    #[tokio::test]
    async fn test_ciphertext_unavailable() {
        let g = grid();
        g.vault.ingest("a", b"pw", b"x").await.unwrap();
        g.data.delete(0, "a").unwrap();
        g.data.delete(2, "a").unwrap();
        g.vault.set_node(1, false).unwrap();

        assert!(matches!(
            g.vault.reassemble("a", b"pw").await,
            Err(Error::CiphertextUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_tampered_replica_detected() {
        let g = grid();
        g.vault.ingest("a", b"pw", b"payload").await.unwrap();
        let mut sealed = g.data.read(0, "a").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        g.data.write(0, "a", &sealed).unwrap();

        assert!(matches!(g.vault.reassemble("a", b"pw").await, Err(Error::TamperDetected)));
    }

    #[tokio::test]
    async fn test_burn() {
        let g = grid();
        g.vault.ingest("a", b"pw", b"x").await.unwrap();
        g.vault.set_node(1, false).unwrap();

        assert!(g.vault.burn("a").unwrap());
        for node in 0..3 {
            assert!(!g.data.exists(node, "a").unwrap());
            assert!(!g.keys.exists(node, "a").unwrap());
        }
        assert!(g.vault.assets().unwrap().is_empty());
        assert!(matches!(
            g.vault.reassemble("a", b"pw").await,
            Err(Error::AssetNotFound(_))
        ));
        assert!(!g.vault.burn("a").unwrap());
        assert_eq!(g.sink.count(EventKind::DataBurn), 2);
    }

    #[test]
    fn test_toggle_and_report() {
        let g = grid();
        assert!(!g.vault.toggle_node(1).unwrap());

        let events = g.sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].source, Source::Chaos);
        assert_eq!(events[0].message, "Node 2 transition: OFFLINE");

        let report = g.vault.node_report(false).unwrap();
        let statuses: Vec<_> = report.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![NodeStatus::Compromised, NodeStatus::Offline, NodeStatus::Operational]
        );
        assert_eq!(report[0].name, "Alpha");

        g.vault.reset().unwrap();
        assert_eq!(g.vault.liveness().unwrap().online_count(), 3);
        assert_eq!(g.sink.count(EventKind::Reset), 1);
        assert!(g
            .vault
            .node_report(true)
            .unwrap()
            .iter()
            .all(|r| r.status == NodeStatus::Operational));

        assert!(matches!(
            g.vault.toggle_node(7),
            Err(Error::UnknownNode { index: 7, nodes: 3 })
        ));
    }

    #[test]
    fn test_with_offline_is_not_audited() {
        let g = grid();
        let vault = g.vault.with_offline(&[0, 2]).unwrap();
        assert_eq!(vault.liveness().unwrap().flags(), &[false, true, false]);
        assert!(g.sink.events().is_empty());

        let g = grid();
        assert!(matches!(
            g.vault.with_offline(&[3]),
            Err(Error::UnknownNode { index: 3, nodes: 3 })
        ));
    }

    #[test]
    fn test_trim_and_compare() {
        assert_eq!(trim_whitespace(b"  pw \t"), b"pw");
        assert_eq!(trim_whitespace(b"   "), b"");
        assert!(passphrases_match(b"pw", b" pw\n"));
        assert!(!passphrases_match(b"pw", b"pw2"));
        assert!(!passphrases_match(b"pw", b"p w"));
    }
}
