//! vaultzero-grid - shard, reassemble and guard assets
//!
//! usage:
//!   vaultzero-grid ingest report.pdf            # passphrase from VAULTZERO_PASSPHRASE
//!   vaultzero-grid --offline 2 reassemble report.pdf --out report.pdf
//!   vaultzero-grid watchdog                     # poll the honeypot until ctrl-c
//!
//! data lives under the current directory unless --config says otherwise.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use vaultzero::{AuditTrail, GridConfig, LatencyLedger, SecurityLog, Status, Vault};
use zeroize::Zeroizing;

#[derive(Parser)]
#[command(name = "vaultzero-grid")]
#[command(about = "vaultzero grid - shard, reassemble and guard assets")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// grid config (toml). default: standard layout in the current directory
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// take a node offline for this run (1-based, repeatable)
    #[arg(long, global = true)]
    offline: Vec<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// encrypt a file and shard its key across the grid
    Ingest {
        file: PathBuf,

        /// asset name (default: file name)
        #[arg(long)]
        name: Option<String>,

        #[arg(long, env = "VAULTZERO_PASSPHRASE", hide_env_values = true)]
        passphrase: String,
    },

    /// rebuild the key from a quorum and decrypt an asset
    Reassemble {
        asset: String,

        /// where to write the plaintext
        #[arg(short, long)]
        out: PathBuf,

        #[arg(long, env = "VAULTZERO_PASSPHRASE", hide_env_values = true)]
        passphrase: String,
    },

    /// delete an asset and its key shards from every node
    Burn { asset: String },

    /// list stored assets, newest first
    List,

    /// node status and honeypot integrity
    Status,

    /// watch the honeypot until interrupted
    Watchdog,

    /// rewrite the honeypot and clear the security log
    Restore,

    /// show the audit trail
    Logs {
        /// truncate the audit trail instead
        #[arg(long)]
        clear: bool,
    },

    /// show recorded ingest latencies
    Telemetry {
        /// reset the ledger instead
        #[arg(long)]
        clear: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vaultzero=info,vaultzero_grid=info".into()),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => GridConfig::load(path)?,
        None => GridConfig::default(),
    };

    match cli.command {
        Commands::Ingest {
            file,
            name,
            passphrase,
        } => {
            let passphrase = Zeroizing::new(passphrase);
            let vault = open_vault(&config, &cli.offline)?;
            let asset = match name {
                Some(name) => name,
                None => asset_name(&file)?,
            };
            let payload = fs::read(&file).with_context(|| format!("reading {}", file.display()))?;

            let receipt = vault.ingest(&asset, passphrase.as_bytes(), &payload).await?;
            println!(
                "ingested {} ({} replicas, {} key shards) in {:.2}ms",
                receipt.asset,
                receipt.replicas,
                receipt.key_shards,
                receipt.elapsed.as_secs_f64() * 1000.0
            );
        }
        Commands::Reassemble {
            asset,
            out,
            passphrase,
        } => {
            let passphrase = Zeroizing::new(passphrase);
            let vault = open_vault(&config, &cli.offline)?;
            let plaintext = Zeroizing::new(vault.reassemble(&asset, passphrase.as_bytes()).await?);
            fs::write(&out, plaintext.as_slice())
                .with_context(|| format!("writing {}", out.display()))?;
            println!("reassembled {} -> {}", asset, out.display());
        }
        Commands::Burn { asset } => {
            let vault = open_vault(&config, &cli.offline)?;
            if vault.burn(&asset)? {
                println!("burned {}", asset);
            } else {
                println!("{} was not registered; removed any stray files", asset);
            }
        }
        Commands::List => {
            let vault = open_vault(&config, &cli.offline)?;
            for entry in vault.asset_entries()? {
                println!("{}  {}", entry.uploaded_local(), entry.name);
            }
        }
        Commands::Status => status(&config, &cli.offline)?,
        Commands::Watchdog => watchdog(&config).await?,
        Commands::Restore => {
            let trail = AuditTrail::new(&config.audit_log);
            let security = SecurityLog::new(&config.security_log);
            config.watchdog().restore(&trail, Some(&security))?;
            println!("honeypot restored at {}", config.honeypot.display());
        }
        Commands::Logs { clear } => {
            let trail = AuditTrail::new(&config.audit_log);
            if clear {
                trail.clear()?;
                println!("audit trail cleared");
            } else {
                for r in trail.entries()? {
                    println!("{} | {} | {:<8} | {:<9} | {}", r.utc, r.local, r.source, r.event, r.message);
                }
            }
        }
        Commands::Telemetry { clear } => {
            let ledger = LatencyLedger::new(&config.latency_log);
            if clear {
                ledger.clear()?;
                println!("telemetry ledger cleared");
            } else {
                let samples = ledger.samples()?;
                if samples.is_empty() {
                    println!("telemetry ledger is empty");
                }
                for s in samples {
                    println!("{}  {:>10.2}ms", s.at, s.ms);
                }
            }
        }
    }

    Ok(())
}

/// open the grid and apply --offline flags
fn open_vault(config: &GridConfig, offline: &[usize]) -> anyhow::Result<Vault> {
    let vault = Vault::open(config)?;
    let nodes = vault.topology().node_count();
    let mut down = Vec::with_capacity(offline.len());
    for &node in offline {
        if node == 0 || node > nodes {
            return Err(anyhow!("--offline {}: nodes are numbered 1-{}", node, nodes));
        }
        down.push(node - 1);
    }
    // per-run view of the grid, not a persisted flip
    Ok(vault.with_offline(&down)?)
}

/// asset name from a file path
fn asset_name(file: &Path) -> anyhow::Result<String> {
    file.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("cannot derive an asset name from {}", file.display()))
}

fn status(config: &GridConfig, offline: &[usize]) -> anyhow::Result<()> {
    let vault = open_vault(config, offline)?;
    let intact = config.watchdog().check_integrity()?;

    if intact {
        println!("GRID SECURE");
    } else {
        println!("BREACH DETECTED: honeypot modified ({})", config.honeypot.display());
    }
    for node in vault.node_report(intact)? {
        println!("  node {} {:<6} {}", node.index + 1, node.name, node.status);
    }
    println!("assets: {}", vault.assets()?.len());

    let breaches = SecurityLog::new(&config.security_log).lines()?;
    if !breaches.is_empty() {
        println!("security log:");
        for line in breaches {
            println!("  {}", line);
        }
    }
    Ok(())
}

async fn watchdog(config: &GridConfig) -> anyhow::Result<()> {
    config.prepare()?;
    let trail = Arc::new(AuditTrail::new(&config.audit_log));
    let security = SecurityLog::new(&config.security_log);

    let handle = config
        .watchdog()
        .spawn(trail, Some(security), config.watchdog_interval());
    let mut status = handle.subscribe();

    info!(
        "watching {} every {}ms, ctrl-c to stop",
        config.honeypot.display(),
        config.watchdog_interval_ms
    );

    loop {
        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    warn!("watchdog task ended");
                    break;
                }
                match *status.borrow_and_update() {
                    Status::Secure => println!("GRID SECURE"),
                    Status::Breached => println!("BREACH DETECTED"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down watchdog");
                break;
            }
        }
    }

    handle.stop();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use tempfile::tempdir;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "vaultzero-grid",
            "reassemble",
            "a.pdf",
            "--out",
            "/tmp/a.pdf",
            "--passphrase",
            "pw",
            "--offline",
            "2",
            "--offline",
            "3",
        ])
        .unwrap();
        assert_eq!(cli.offline, vec![2, 3]);
        assert!(matches!(cli.command, Commands::Reassemble { ref asset, .. } if asset == "a.pdf"));
    }

    #[test]
    fn test_asset_name() {
        assert_eq!(asset_name(Path::new("/data/report.pdf")).unwrap(), "report.pdf");
        assert!(asset_name(Path::new("/")).is_err());
    }

    #[test]
    fn test_offline_bounds() {
        let dir = tempdir().unwrap();
        let config = GridConfig::rooted_at(dir.path());
        assert!(open_vault(&config, &[0]).is_err());

        let dir = tempdir().unwrap();
        let config = GridConfig::rooted_at(dir.path());
        assert!(open_vault(&config, &[4]).is_err());

        let dir = tempdir().unwrap();
        let config = GridConfig::rooted_at(dir.path());
        let vault = open_vault(&config, &[1, 3]).unwrap();
        assert_eq!(vault.liveness().unwrap().flags(), &[false, true, false]);
    }

    #[test]
    fn test_offline_flag_leaves_audit_trail_alone() {
        let dir = tempdir().unwrap();
        let config = GridConfig::rooted_at(dir.path());
        for _ in 0..3 {
            open_vault(&config, &[2]).unwrap();
        }
        assert!(AuditTrail::new(&config.audit_log).entries().unwrap().is_empty());
    }
}
