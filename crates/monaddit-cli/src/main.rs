//! Monaddit CLI
//!
//! Runs the ledger node and talks to a running one over HTTP.

mod client;

use clap::{Parser, Subcommand};
use client::{encoded_path, ApiClient};
use monaddit_ledger::{parse_mdt, Address};
use monaddit_node::config::LoggingConfig;
use monaddit_node::{init_logging, LedgerNode, NodeConfig};
use serde_json::{json, Value};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "monaddit")]
#[command(version)]
#[command(about = "Monaddit stake and content-bond ledger", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Node API base URL
    #[arg(long, global = true, env = "MONADDIT_API", default_value = "http://127.0.0.1:8080")]
    api: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a ledger node
    Serve {
        /// Configuration file path
        #[arg(short, long, env = "MONADDIT_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Print the default configuration as TOML
    Config {
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Query a running node
    Query {
        #[command(subcommand)]
        query: QueryCommands,
    },

    /// Move wallet tokens into stake
    Stake {
        address: String,
        /// Amount in MDT, e.g. 10 or 0.5
        amount: String,
    },

    /// Move available stake back to the wallet
    Unstake {
        address: String,
        /// Amount in MDT
        amount: String,
    },

    /// Claim pending rewards
    Claim { address: String },

    /// Resolve an open challenge
    Resolve {
        id: u64,
        /// for-defendant or for-challenger
        #[arg(value_parser = ["for-defendant", "for-challenger"])]
        outcome: String,
    },

    /// Accrue the current epoch's rewards now
    Accrue,

    /// Version information
    Version,
}

#[derive(Subcommand)]
enum QueryCommands {
    /// Account balances and reward status
    Account { address: String },
    /// Bond by id
    Bond { id: u64 },
    /// Challenge by id
    Challenge { id: u64 },
    /// Content record and its bond
    Content { id: String },
    /// Ledger-wide totals
    Stats,
    /// Node health
    Health,
}

fn normalize(address: &str) -> anyhow::Result<String> {
    Ok(Address::parse(address)?.to_string())
}

/// Request body for stake and unstake, amount in base units
fn stake_body(address: &str, amount: &str) -> anyhow::Result<Value> {
    Ok(json!({
        "address": normalize(address)?,
        "amount": parse_mdt(amount)?.to_string(),
    }))
}

fn query_path(query: QueryCommands) -> anyhow::Result<String> {
    Ok(match query {
        QueryCommands::Account { address } => format!("/account/{}", normalize(&address)?),
        QueryCommands::Bond { id } => format!("/bond/{}", id),
        QueryCommands::Challenge { id } => format!("/challenge/{}", id),
        QueryCommands::Content { id } => encoded_path(&["content", id.as_str()])?,
        QueryCommands::Stats => "/stats".to_string(),
        QueryCommands::Health => "/health".to_string(),
    })
}

fn print_json(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve { config } => serve(config, cli.verbose).await,
        command => {
            init_logging(&LoggingConfig::default(), cli.verbose)?;
            run_command(command, &ApiClient::new(&cli.api)).await
        }
    }
}

async fn serve(config: Option<PathBuf>, verbose: bool) -> anyhow::Result<()> {
    let node_config = NodeConfig::load(config.as_deref())?;
    init_logging(&node_config.logging, verbose)?;
    match &config {
        Some(path) => tracing::info!("Config: {:?}", path),
        None => tracing::info!("No config file given, using defaults and environment"),
    }

    let node = LedgerNode::new(node_config)?;
    node.run().await
}

async fn run_command(command: Commands, client: &ApiClient) -> anyhow::Result<()> {
    match command {
        Commands::Serve { config } => {
            anyhow::bail!("serve is not a client command (config: {:?})", config)
        }

        Commands::Config { output } => {
            let rendered = NodeConfig::default().to_toml()?;
            match output {
                Some(path) => {
                    std::fs::write(&path, rendered)?;
                    println!("Wrote default configuration to {:?}", path);
                }
                None => print!("{}", rendered),
            }
        }

        Commands::Query { query } => {
            print_json(&client.get(&query_path(query)?).await?)?;
        }

        Commands::Stake { address, amount } => {
            print_json(&client.post("/stake", stake_body(&address, &amount)?).await?)?;
        }

        Commands::Unstake { address, amount } => {
            print_json(&client.post("/withdraw", stake_body(&address, &amount)?).await?)?;
        }

        Commands::Claim { address } => {
            let path = format!("/account/{}/claim", normalize(&address)?);
            print_json(&client.post(&path, json!({})).await?)?;
        }

        Commands::Resolve { id, outcome } => {
            let outcome = outcome.replace('-', "_");
            let path = format!("/challenge/{}/resolve", id);
            print_json(&client.post(&path, json!({ "outcome": outcome })).await?)?;
        }

        Commands::Accrue => {
            print_json(&client.post("/epoch/accrue", json!({})).await?)?;
        }

        Commands::Version => {
            println!("monaddit {}", env!("CARGO_PKG_VERSION"));
            println!("Token: {} ({} decimals)", monaddit_ledger::SYMBOL, monaddit_ledger::DECIMALS);
        }
    }

    Ok(())
}
