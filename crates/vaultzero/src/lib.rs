//! # vaultzero
//!
//! envelope encryption with the passphrase split across storage nodes,
//! plus an integrity watchdog over a decoy credential file.
//!
//! ## architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │ passphrase + payload│
//! └──────────┬──────────┘
//!            │
//!     ┌──────┴───────────────┐
//!     │ pbkdf2-sha256        │ pad to 16, shamir split
//!     ▼                      ▼
//! ┌──────────┐        ┌─────┬─────┬─────┐
//! │ aes-gcm  │        │Alpha│Beta │Gamma│  (key nodes, 2-of-3)
//! │ envelope │        └──┬──┴──┬──┴──┬──┘
//! └────┬─────┘           │     │     │
//!      │ replicated      └──┬──┴──┬──┘
//!      ▼                    ▼     ▼
//! ┌─────┬─────┬─────┐   ┌───────────┐
//! │ d1  │ d2  │ d3  │   │ passphrase│  (quorum reconstruction)
//! └─────┴─────┴─────┘   └───────────┘
//!
//!   watchdog: honeypot ──normalize+sha256──▶ golden? ──▶ SECURE / BREACHED
//! ```
//!
//! ## properties
//!
//! - any single key node may be offline, destroyed or untrusted
//! - one share alone reveals nothing about the passphrase
//! - a lost share is reported as `MissingShards`, an outage as `QuorumFailure`
//! - reconstructing the key also requires presenting the passphrase
//! - watchdog alerts once per distinct tampered state, recovers once
//!
//! ## usage
//!
//! ```rust,ignore
//! use vaultzero::{GridConfig, Vault};
//!
//! let config = GridConfig::default();
//! let vault = Vault::open(&config)?;
//!
//! vault.ingest("report.pdf", b"correct-horse", &payload).await?;
//! vault.set_node(1, false)?;
//! let plaintext = vault.reassemble("report.pdf", b"correct-horse").await?;
//! ```

pub mod audit;
pub mod config;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod quorum;
pub mod registry;
pub mod share;
pub mod sss;
pub mod store;
pub mod telemetry;
pub mod vault;
pub mod watchdog;

pub use audit::{AuditEvent, AuditRecord, AuditTrail, EventKind, EventSink, SecurityLog, Source};
pub use config::GridConfig;
pub use crypto::{derive_key, DerivedKey};
pub use envelope::{decrypt, encrypt, Envelope};
pub use error::{Error, Result};
pub use quorum::{NodeLiveness, QuorumReconstructor, Topology};
pub use registry::Registry;
pub use share::Share;
pub use sss::Scheme;
pub use store::{FsStore, MemoryStore, ShareStore};
pub use telemetry::LatencyLedger;
pub use vault::{IngestReceipt, NodeReport, NodeStatus, Vault};
pub use watchdog::{Status, Transition, Watchdog, WatchdogHandle, WatchdogState};
