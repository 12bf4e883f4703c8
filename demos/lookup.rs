//! Run lookups from a node joining a simulated network, with some peers offline.

use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};
use kadcore::{Id, Lookup, LookupConfig, SelectionStrategy, Testnet};

use tracing::Level;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Number of peers in the testnet
    #[arg(long, default_value_t = 500)]
    size: usize,
    /// Number of peers known by the joining node
    #[arg(long, default_value_t = 8)]
    bootstrap: usize,
    /// Percentage of peers offline
    #[arg(long, default_value_t = 20)]
    offline: usize,
    /// Latency of every peer in milliseconds
    #[arg(long, default_value_t = 5)]
    latency: u64,
    #[arg(long, default_value_t = 3)]
    alpha: usize,
    #[arg(long, value_enum, default_value_t = Strategy::Random)]
    strategy: Strategy,
    /// Number of lookups to run
    #[arg(long, default_value_t = 5)]
    lookups: usize,
    /// Target to look up instead of random ones, as 40 hex characters
    target: Option<Id>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Strategy {
    Random,
    Latency,
    Closest,
}

impl From<Strategy> for SelectionStrategy {
    fn from(strategy: Strategy) -> Self {
        match strategy {
            Strategy::Random => SelectionStrategy::Random,
            Strategy::Latency => SelectionStrategy::LatencyRanked,
            Strategy::Closest => SelectionStrategy::Closest,
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        // Switch to TRACE to see every round
        .with_max_level(Level::DEBUG)
        .init();

    let cli = Cli::parse();

    println!("Building a testnet of {} peers...", cli.size);
    let testnet = Testnet::new(cli.size);

    let table = testnet.joining_table(cli.bootstrap);

    for (i, peer) in testnet.peers().iter().enumerate() {
        testnet.set_latency(peer.id(), Duration::from_millis(cli.latency));

        if i * 100 < cli.offline * cli.size {
            testnet.set_offline(peer.id(), true);
        }
    }

    let lookup = Lookup::with_config(
        table.clone(),
        testnet.clone(),
        LookupConfig::default()
            .with_alpha(cli.alpha)
            .with_strategy(cli.strategy.into())
            .with_timeout(Duration::from_secs(10)),
    );

    for _ in 0..cli.lookups {
        let target = cli.target.unwrap_or_else(Id::random);
        let start = Instant::now();

        match lookup.find_node(target) {
            Ok(result) => {
                let truth = testnet.closest_to(&target, 1);

                println!(
                    "\n{} -> {:?} in {:?}: {} rounds, {} queried, {} failed",
                    target,
                    result.termination(),
                    start.elapsed(),
                    result.rounds(),
                    result.queried(),
                    result.failures(),
                );
                println!(
                    "closest found {:?}, true closest {:?}",
                    result.closest().first().map(|node| node.id()),
                    truth.first().map(|node| node.id())
                );
            }
            Err(error) => println!("\n{} -> {}", target, error),
        }
    }

    println!("\nRouting table now holds {} peers", table.size());
}
