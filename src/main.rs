//! Revow Storage CLI
//!
//! Inspects and maintains the local store without any network attached.
//!
//! ## Usage
//!
//! ```bash
//! # Run the legacy migration
//! revow-storage init
//!
//! # Store a payload and print its handle
//! revow-storage put '{"description": "hello"}'
//!
//! # Resolve a handle through all tiers
//! revow-storage get bafy...
//!
//! # List attestations, show one with its link
//! revow-storage attestations
//! revow-storage show 0xabc...
//!
//! # Cached pledges of an account, enriched
//! revow-storage pledges --account 0x123...
//!
//! # Debug dump / wipe every namespaced key
//! revow-storage dump
//! revow-storage wipe --yes
//! ```

use clap::{Parser, Subcommand};
use revow_storage::{Collaborators, Config, Engine};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "revow-storage")]
#[command(about = "Local-first pledge, content and attestation store")]
struct Args {
    /// Path to config file
    #[arg(short, long, env = "REVOW_CONFIG")]
    config: Option<PathBuf>,

    /// Storage directory
    #[arg(long, env = "REVOW_STORAGE_DIR")]
    storage_dir: Option<PathBuf>,

    /// Attestation explorer base URL
    #[arg(long, env = "REVOW_EXPLORER_URL")]
    explorer_url: Option<String>,

    /// Connected wallet account
    #[arg(long, env = "REVOW_ACCOUNT")]
    account: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the legacy migration and report what it merged
    Init,

    /// Store a JSON payload and print its handle
    Put {
        /// Payload as JSON text
        json: String,
    },

    /// Resolve a content handle
    Get {
        handle: String,
    },

    /// List attestations, newest first
    Attestations,

    /// Show one attestation with its explorer link
    Show {
        uid: String,
    },

    /// List pledges of an account (defaults to --account)
    Pledges {
        address: Option<String>,
    },

    /// Print every namespaced key
    Dump,

    /// Remove every namespaced key
    Wipe {
        /// Confirm the wipe
        #[arg(long)]
        yes: bool,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("revow_storage=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    // Load config
    let mut config = if let Some(config_path) = &args.config {
        Config::load(config_path)?
    } else {
        Config::default()
    };

    // Apply CLI overrides
    if let Some(dir) = args.storage_dir {
        config.storage_dir = dir;
    }
    if let Some(url) = args.explorer_url {
        config.explorer_url = url;
    }

    info!(storage_dir = %config.storage_dir.display(), "Opening revow-storage");

    let chain_id = config.chain_id;
    let engine = Engine::open(config, Collaborators::offline(args.account.clone(), Some(chain_id)))?;

    // Save default config if it doesn't exist
    let config_path = engine.config().config_path();
    if args.config.is_none() && !config_path.exists() {
        engine.config().save(&config_path)?;
        info!(path = %config_path.display(), "Created default config");
    }

    let report = engine.initialize().await?;

    match args.command {
        Command::Init => print_json(&report)?,
        Command::Put { json } => {
            let payload: serde_json::Value = serde_json::from_str(&json)?;
            let handle = engine.content().put(&payload).await?;
            println!("{}", handle);
        }
        Command::Get { handle } => match engine.content().get(&handle)? {
            Some(record) => print_json(&record)?,
            None => {
                warn!(handle = %handle, "Content not found");
                std::process::exit(1);
            }
        },
        Command::Attestations => {
            let details: Vec<_> = engine
                .ledger()
                .all()?
                .into_iter()
                .map(|record| {
                    let link = engine.ledger().link(&record.uid);
                    revow_storage::AttestationDetails { record, link }
                })
                .collect();
            print_json(&details)?;
        }
        Command::Show { uid } => print_json(&engine.ledger().details(&uid)?)?,
        Command::Pledges { address } => {
            let Some(address) = address.or(args.account) else {
                return Err("no address given and no --account set".into());
            };
            print_json(&engine.user_pledges(&address).await?)?;
        }
        Command::Dump => print_json(&engine.dump()?)?,
        Command::Wipe { yes } => {
            if !yes {
                return Err("refusing to wipe without --yes".into());
            }
            let removed = engine.wipe()?;
            println!("removed {} keys", removed);
        }
    }

    engine.flush()?;
    Ok(())
}
