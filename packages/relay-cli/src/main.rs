use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use relay_core::{
    config::ChainFamily,
    simulation::{ClusterOptions, LocalCluster},
    Config, CrossChainState,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate and summarize a node config file
    ValidateConfig {
        /// Config file path (JSON, or TOML by extension)
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
    },
    /// Relay messages through an in-process cluster of relayers
    Simulate {
        #[arg(long, default_value_t = 3)]
        peers: usize,
        #[arg(long, default_value_t = 2)]
        threshold: usize,
        /// Number of messages to relay
        #[arg(long, default_value_t = 1)]
        messages: usize,
        /// Signing family of the destination chain
        #[arg(long, default_value = "evm")]
        family: ChainFamily,
        /// Polls a commit transaction stays pending
        #[arg(long, default_value_t = 0)]
        pending_polls: usize,
        /// Length of one leader round
        #[arg(long, default_value_t = 2_000)]
        window_ms: u64,
        #[arg(long, default_value_t = 60)]
        timeout_secs: u64,
        /// Take this peer offline before the requests start
        #[arg(long)]
        offline: Option<usize>,
        /// Print the final records as JSON
        #[arg(long)]
        json: bool,
    },
}

fn validate_config(path: PathBuf) -> Result<()> {
    info!("Validating config file: {:?}", path);
    let config = Config::load(path)?;
    println!("Config is valid.");
    println!("- Node {} of {} peers:", config.node.index, config.peer_count());
    for (index, peer) in config.node.peers.iter().enumerate() {
        println!("  - [{}] {} at {}", index, peer.name, peer.endpoint);
    }
    println!("- Destination chains:");
    for chain in &config.chains {
        println!(
            "  - {} ({}): {} keys via {}",
            chain.name, chain.chain_id, chain.family, chain.rpc_url
        );
    }
    println!("- Relayer:");
    println!("  - Signature threshold: {}", config.relayer.signature_threshold);
    println!("  - Round window: {}ms", config.relayer.request_end_timeout_window_ms);
    println!("  - Result check interval: {}ms", config.relayer.result_check_interval_ms);
    println!(
        "  - Retry backoff: {}ms up to {}ms, giving up after {}ms",
        config.relayer.retry_initial_interval_ms,
        config.relayer.retry_max_interval_ms,
        config.relayer.retry_max_elapsed_ms
    );
    Ok(())
}

async fn simulate(
    options: ClusterOptions,
    messages: usize,
    timeout: Duration,
    offline: Option<usize>,
    json: bool,
) -> Result<()> {
    let cluster = LocalCluster::start(&options)?;
    if let Some(peer) = offline {
        if peer >= options.peers {
            bail!("No peer {} in a cluster of {}", peer, options.peers);
        }
        warn!("Taking peer {} offline", peer);
        cluster.set_reachable(peer, false);
    }

    let ids: Vec<String> = (0..messages).map(|i| format!("msg-{}", i)).collect();
    for id in &ids {
        let event = cluster.request_started(id, format!("payload of {}", id).as_bytes());
        cluster.publish(&event);
    }

    let mut failed = Vec::new();
    for id in &ids {
        if !cluster.wait_for_state(id, CrossChainState::Committed, timeout).await? {
            failed.push(id.clone());
        }
    }

    let mut records = Vec::new();
    for id in &ids {
        for peer in 0..options.peers {
            if let Some(record) = cluster.record(peer, id).await? {
                records.push((peer, record));
            }
        }
    }

    if json {
        let values: Vec<_> = records.iter().map(|(_, record)| record).collect();
        println!("{}", serde_json::to_string_pretty(&values)?);
    } else {
        for id in &ids {
            let submissions = cluster.chain().submissions_for(id);
            println!("{}: {} submission(s)", id, submissions.len());
            for (peer, record) in records.iter().filter(|(_, r)| r.key() == id) {
                println!(
                    "  - node-{}: {} in round {} tx {}",
                    peer,
                    record.state,
                    record.report_context.round_id,
                    record.commit_transaction_id.as_deref().unwrap_or("-")
                );
            }
        }
    }

    cluster.shutdown();
    if !failed.is_empty() {
        bail!("Not committed within {:?}: {}", timeout, failed.join(", "));
    }
    info!("All {} message(s) committed", messages);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::ValidateConfig { config } => validate_config(config),
        Commands::Simulate {
            peers,
            threshold,
            messages,
            family,
            pending_polls,
            window_ms,
            timeout_secs,
            offline,
            json,
        } => {
            let mut options = ClusterOptions::new(peers, threshold);
            options.family = family;
            options.pending_polls = pending_polls;
            options.request_end_timeout_window_ms = window_ms;
            simulate(options, messages, Duration::from_secs(timeout_secs), offline, json).await
        }
    }
}
