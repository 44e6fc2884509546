//! quorum reconstruction over a fixed node topology
//!
//! maps node liveness and physical share presence onto the sharing scheme:
//!
//! ```text
//!   passphrase ──pad──▶ 16 bytes ──split──▶ ┌───────┬───────┬───────┐
//!                                           │ Alpha │ Beta  │ Gamma │  (2-of-3)
//!                                           └───┬───┴───┬───┴───┬───┘
//!                       only live nodes written │       │       │
//!                                               ▼       ▼       ▼
//!   reconstruct: missing file?  ──▶ MissingShards (data loss)
//!                live < k?      ──▶ QuorumFailure (degraded, recoverable)
//!                else combine   ──▶ unpad ──▶ passphrase
//! ```
//!
//! a share that is physically gone is reported before quorum is counted, so
//! an operator can tell a simulated outage apart from real data loss.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::share::{PaddedSecret, Share};
use crate::sss::Scheme;
use crate::store::{validate_asset_name, ShareStore};
use crate::{Error, Result};

/// default node names
pub const DEFAULT_NODES: [&str; 3] = ["Alpha", "Beta", "Gamma"];

/// default threshold for reconstruction
pub const DEFAULT_THRESHOLD: usize = 2;

/// fixed width of the shared secret
pub const SECRET_LEN: usize = 16;

/// node layout and sharing policy
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    /// display names, one per node (index = position)
    pub nodes: Vec<String>,
    /// shares needed to reconstruct
    pub threshold: usize,
    /// padded secret width in bytes
    pub secret_len: usize,
}

impl Default for Topology {
    fn default() -> Self {
        Self {
            nodes: DEFAULT_NODES.iter().map(|s| s.to_string()).collect(),
            threshold: DEFAULT_THRESHOLD,
            secret_len: SECRET_LEN,
        }
    }
}

impl Topology {
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node_name(&self, node: usize) -> &str {
        self.nodes.get(node).map(String::as_str).unwrap_or("?")
    }

    /// sharing scheme for this topology
    pub fn scheme(&self) -> Result<Scheme> {
        Scheme::new(self.threshold, self.nodes.len())
    }
}

/// operator-controlled up/down flag per node
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeLiveness(Vec<bool>);

impl NodeLiveness {
    pub fn all_online(nodes: usize) -> Self {
        Self(vec![true; nodes])
    }

    pub fn from_flags(flags: Vec<bool>) -> Self {
        Self(flags)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_online(&self, node: usize) -> bool {
        self.0.get(node).copied().unwrap_or(false)
    }

    pub fn online_count(&self) -> usize {
        self.0.iter().filter(|&&up| up).count()
    }

    pub fn flags(&self) -> &[bool] {
        &self.0
    }

    /// set a node's flag
    pub fn set(&mut self, node: usize, online: bool) -> Result<()> {
        let nodes = self.0.len();
        let flag = self
            .0
            .get_mut(node)
            .ok_or(Error::UnknownNode { index: node, nodes })?;
        *flag = online;
        Ok(())
    }

    /// flip a node, returning its new state
    pub fn toggle(&mut self, node: usize) -> Result<bool> {
        let online = !self.is_online(node);
        self.set(node, online)?;
        Ok(online)
    }
}

/// splits passphrases onto the key nodes and brings them back
pub struct QuorumReconstructor {
    store: Arc<dyn ShareStore>,
    topology: Topology,
    write_latency: Duration,
}

impl QuorumReconstructor {
    pub fn new(store: Arc<dyn ShareStore>, topology: Topology) -> Result<Self> {
        topology.scheme()?;
        if store.node_count() != topology.node_count() {
            return Err(Error::Config(format!(
                "store spans {} nodes, topology has {}",
                store.node_count(),
                topology.node_count()
            )));
        }
        Ok(Self {
            store,
            topology,
            write_latency: Duration::ZERO,
        })
    }

    /// simulated per-node write delay
    pub fn with_write_latency(mut self, latency: Duration) -> Self {
        self.write_latency = latency;
        self
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    fn check_liveness(&self, liveness: &NodeLiveness) -> Result<()> {
        if liveness.len() != self.topology.node_count() {
            return Err(Error::Config(format!(
                "liveness has {} flags, topology has {} nodes",
                liveness.len(),
                self.topology.node_count()
            )));
        }
        Ok(())
    }

    /// pad, split and write one share to every live node.
    ///
    /// writes fan out as one task per node and are joined before returning.
    /// if some writes fail the others still land and the call returns
    /// [`Error::PartialWrite`]; retrying overwrites the same locations.
    pub async fn distribute(
        &self,
        asset: &str,
        passphrase: &[u8],
        liveness: &NodeLiveness,
    ) -> Result<usize> {
        validate_asset_name(asset)?;
        self.check_liveness(liveness)?;

        let padded = PaddedSecret::new(passphrase, self.topology.secret_len)?;
        let shares = self.topology.scheme()?.split(padded.as_bytes())?;

        let mut tasks = Vec::with_capacity(shares.len());
        for (node, share) in shares.into_iter().enumerate() {
            if !liveness.is_online(node) {
                debug!("skipping offline node {}", self.topology.node_name(node));
                continue;
            }

            let store = Arc::clone(&self.store);
            let asset = asset.to_string();
            let latency = self.write_latency;
            let encoded = Zeroizing::new(share.to_hex());

            tasks.push(tokio::spawn(async move {
                if !latency.is_zero() {
                    tokio::time::sleep(latency).await;
                }
                tokio::task::spawn_blocking(move || store.write(node, &asset, encoded.as_bytes()))
                    .await
                    .map_err(|e| Error::Storage(format!("write task: {}", e)))?
            }));
        }

        let results = join_all(tasks).await;

        let mut written = 0;
        let mut failed = 0;
        for result in results {
            match result {
                Ok(Ok(())) => written += 1,
                Ok(Err(e)) => {
                    warn!("share write failed for {}: {}", asset, e);
                    failed += 1;
                }
                Err(e) => {
                    warn!("share write task panicked for {}: {}", asset, e);
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            return Err(Error::PartialWrite { written, failed });
        }

        info!("distributed {} key shards for {}", written, asset);
        Ok(written)
    }

    /// recover the passphrase for an asset from the live nodes
    pub fn reconstruct(&self, asset: &str, liveness: &NodeLiveness) -> Result<Zeroizing<Vec<u8>>> {
        validate_asset_name(asset)?;
        self.check_liveness(liveness)?;

        let nodes = self.topology.node_count();

        let mut missing = Vec::new();
        for node in 0..nodes {
            if !self.store.exists(node, asset)? {
                missing.push(self.topology.node_name(node).to_string());
            }
        }
        if !missing.is_empty() {
            warn!("missing shards for {}: {:?}", asset, missing);
            return Err(Error::MissingShards(missing));
        }

        let mut candidates = Vec::with_capacity(nodes);
        for node in (0..nodes).filter(|&n| liveness.is_online(n)) {
            let raw = Zeroizing::new(self.store.read(node, asset)?);
            let share = std::str::from_utf8(&raw)
                .map_err(|_| Error::InvalidShareFormat)
                .and_then(|text| Share::from_hex(node as u8 + 1, text))
                .map_err(|_| {
                    Error::Reconstruction(format!(
                        "share on node {} is not valid hex",
                        self.topology.node_name(node)
                    ))
                })?;
            candidates.push(share);
        }

        if candidates.len() < self.topology.threshold {
            return Err(Error::QuorumFailure {
                online: candidates.len(),
                need: self.topology.threshold,
            });
        }

        let padded = Zeroizing::new(self.topology.scheme()?.combine(&candidates)?);
        debug!("reconstructed key for {} from {} shares", asset, candidates.len());
        Ok(PaddedSecret::unpad(&padded))
    }

    /// delete an asset's share from every node
    pub fn purge(&self, asset: &str) -> Result<()> {
        for node in 0..self.topology.node_count() {
            self.store.delete(node, asset)?;
        }
        Ok(())
    }
}
