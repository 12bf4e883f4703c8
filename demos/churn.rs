//! Peers leave a simulated network while the joining node keeps refreshing its buckets.

use std::{thread, time::Duration};

use clap::Parser;
use kadcore::{Id, Lookup, SharedRoutingTable, TableConfig, Testnet};

use tracing::Level;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Number of peers in the testnet
    #[arg(long, default_value_t = 300)]
    size: usize,
    /// Number of peers going offline at every step
    #[arg(long, default_value_t = 20)]
    leaving: usize,
    /// Refresh interval of the joining node buckets in milliseconds
    #[arg(long, default_value_t = 100)]
    refresh: u64,
    #[arg(long, default_value_t = 10)]
    steps: usize,
}

fn main() {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let cli = Cli::parse();

    let testnet = Testnet::new(cli.size);

    let table = SharedRoutingTable::with_config(
        Id::random(),
        TableConfig::default().with_refresh_interval(Duration::from_millis(cli.refresh)),
        testnet.clone(),
    );

    for peer in testnet.peers().iter().take(5) {
        let _ = table.add(peer.clone());
    }

    let lookup = Lookup::new(table.clone(), testnet.clone());

    // Fill the table by looking up the local id, then a target in every bucket.
    let _ = lookup.find_node(table.id());
    for index in 0..8 {
        let _ = lookup.refresh_bucket(index);
    }

    println!("Joined with {} peers in the routing table", table.size());

    let mut peers = testnet.peers().iter();

    for step in 0..cli.steps {
        for peer in peers.by_ref().take(cli.leaving) {
            testnet.set_offline(peer.id(), true);
        }

        thread::sleep(Duration::from_millis(cli.refresh));

        let probed = table.refresh_due_buckets();

        let offline_known = table
            .snapshot()
            .iter()
            .filter(|node| testnet.is_offline(node.id()))
            .count();

        println!(
            "step {:>2}: probed {:>2} buckets, {:>3} peers known, {:>3} of them offline",
            step,
            probed,
            table.size(),
            offline_known
        );

        match lookup.find_node(Id::random()) {
            Ok(result) => println!(
                "         lookup {:?}: {} queried, {} failed",
                result.termination(),
                result.queried(),
                result.failures()
            ),
            Err(error) => println!("         lookup failed: {}", error),
        }
    }
}
