//! per-node byte storage
//!
//! a store is an opaque byte location keyed by `(node_index, asset)`.
//! implementations:
//! - fs: one directory per node, one file per asset (production)
//! - memory: hashmap, for tests

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::debug;

use crate::{Error, Result};

/// byte store spread over a fixed set of nodes
pub trait ShareStore: Send + Sync {
    /// number of nodes this store spans
    fn node_count(&self) -> usize;

    /// write (or overwrite) the bytes for an asset on a node
    fn write(&self, node: usize, asset: &str, bytes: &[u8]) -> Result<()>;

    /// read the bytes for an asset on a node
    fn read(&self, node: usize, asset: &str) -> Result<Vec<u8>>;

    /// whether the node physically holds bytes for the asset
    fn exists(&self, node: usize, asset: &str) -> Result<bool>;

    /// delete the asset from a node. deleting something absent is not an error.
    fn delete(&self, node: usize, asset: &str) -> Result<()>;
}

/// reject names that could escape a node directory
pub fn validate_asset_name(asset: &str) -> Result<()> {
    let bad = asset.is_empty()
        || asset == "."
        || asset == ".."
        || asset.contains(['/', '\\', '\0'])
        || asset.len() > 255;
    if bad {
        return Err(Error::InvalidAssetName(asset.to_string()));
    }
    Ok(())
}

fn check_node(node: usize, nodes: usize) -> Result<()> {
    if node >= nodes {
        return Err(Error::UnknownNode { index: node, nodes });
    }
    Ok(())
}

/// filesystem store: `<root_i>/<asset>.<kind>.<i>`
#[derive(Debug, Clone)]
pub struct FsStore {
    roots: Vec<PathBuf>,
    kind: &'static str,
}

impl FsStore {
    /// `kind` tags the file suffix, e.g. "key" for shares, "enc" for ciphertext
    pub fn new(roots: Vec<PathBuf>, kind: &'static str) -> Self {
        Self { roots, kind }
    }

    /// create every node directory
    pub fn create_dirs(&self) -> Result<()> {
        for root in &self.roots {
            fs::create_dir_all(root)?;
        }
        Ok(())
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// file path for an asset on a node
    pub fn path(&self, node: usize, asset: &str) -> Result<PathBuf> {
        check_node(node, self.roots.len())?;
        validate_asset_name(asset)?;
        Ok(self.roots[node].join(format!("{}.{}.{}", asset, self.kind, node)))
    }
}

impl ShareStore for FsStore {
    fn node_count(&self) -> usize {
        self.roots.len()
    }

    fn write(&self, node: usize, asset: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(node, asset)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, bytes)?;
        debug!("wrote {} bytes to {}", bytes.len(), path.display());
        Ok(())
    }

    fn read(&self, node: usize, asset: &str) -> Result<Vec<u8>> {
        Ok(fs::read(self.path(node, asset)?)?)
    }

    fn exists(&self, node: usize, asset: &str) -> Result<bool> {
        Ok(Path::try_exists(&self.path(node, asset)?)?)
    }

    fn delete(&self, node: usize, asset: &str) -> Result<()> {
        match fs::remove_file(self.path(node, asset)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// in-memory store for testing
#[derive(Debug, Default)]
pub struct MemoryStore {
    nodes: usize,
    data: RwLock<HashMap<(usize, String), Vec<u8>>>,
}

impl MemoryStore {
    pub fn new(nodes: usize) -> Self {
        Self {
            nodes,
            data: RwLock::new(HashMap::new()),
        }
    }
}

impl ShareStore for MemoryStore {
    fn node_count(&self) -> usize {
        self.nodes
    }

    fn write(&self, node: usize, asset: &str, bytes: &[u8]) -> Result<()> {
        check_node(node, self.nodes)?;
        validate_asset_name(asset)?;
        let mut data = self.data.write().map_err(|e| Error::Storage(e.to_string()))?;
        data.insert((node, asset.to_string()), bytes.to_vec());
        Ok(())
    }

    fn read(&self, node: usize, asset: &str) -> Result<Vec<u8>> {
        check_node(node, self.nodes)?;
        let data = self.data.read().map_err(|e| Error::Storage(e.to_string()))?;
        data.get(&(node, asset.to_string()))
            .cloned()
            .ok_or_else(|| Error::Storage(format!("{} not on node {}", asset, node)))
    }

    fn exists(&self, node: usize, asset: &str) -> Result<bool> {
        check_node(node, self.nodes)?;
        let data = self.data.read().map_err(|e| Error::Storage(e.to_string()))?;
        Ok(data.contains_key(&(node, asset.to_string())))
    }

    fn delete(&self, node: usize, asset: &str) -> Result<()> {
        check_node(node, self.nodes)?;
        let mut data = self.data.write().map_err(|e| Error::Storage(e.to_string()))?;
        data.remove(&(node, asset.to_string()));
        Ok(())
    }
}
