//! Micro-benchmarks for the routing table and the lookup engine: add, closest_local,
//! closest, remove and testnet lookups at varying sizes. Reports nanoseconds-per-operation.
//!
//! Run: `cargo bench --bench routing_table`

use std::net::SocketAddr;
use std::time::Instant;

use kadcore::{k_closest, Id, Lookup, PeerError, PeerRecord, RoutingTable, Testnet};

fn alive(_: SocketAddr) -> Result<bool, PeerError> {
    Ok(true)
}

fn main() {
    println!("routing_table\n");

    bench_add();
    bench_closest();
    bench_k_closest();
    bench_remove();
    bench_lookup();
}

fn bench_add() {
    println!("add");

    // Pre-generate random nodes outside the timed section
    let nodes: Vec<_> = (0..1000).map(|_| PeerRecord::random()).collect();

    {
        let mut table = RoutingTable::new(Id::random());
        let start = Instant::now();
        for node in nodes.iter().cloned() {
            let _ = table.add(node, &alive);
        }
        let per_op = start.elapsed().as_nanos() / nodes.len() as u128;
        println!("empty table: {}ns/op (final size: {})", per_op, table.size());
    }

    {
        let mut table = RoutingTable::new(Id::random());
        for _ in 0..400 {
            let _ = table.add(PeerRecord::random(), &alive);
        }

        let start = Instant::now();
        for node in nodes.iter().cloned() {
            let _ = table.add(node, &alive);
        }
        let per_op = start.elapsed().as_nanos() / nodes.len() as u128;
        println!("full table:  {}ns/op", per_op);
    }

    println!();
}

fn bench_closest() {
    println!("closest_local / closest");

    let targets: Vec<_> = (0..1000).map(|_| Id::random()).collect();

    for size in [50, 100, 200, 400] {
        let mut table = RoutingTable::new(Id::random());
        for _ in 0..size {
            let _ = table.add(PeerRecord::random(), &alive);
        }

        let start = Instant::now();
        for target in &targets {
            let _ = table.closest_local(target, 20);
        }
        let local = start.elapsed().as_nanos() / targets.len() as u128;

        let start = Instant::now();
        for target in &targets {
            let _ = table.closest(target);
        }
        let exact = start.elapsed().as_nanos() / targets.len() as u128;

        println!("{:>3} nodes: {}ns/op / {}ns/op", size, local, exact);
    }

    println!();
}

fn bench_k_closest() {
    println!("k_closest");

    let target = Id::random();

    for size in [20, 60, 200] {
        let candidates: Vec<_> = (0..size).map(|_| PeerRecord::random()).collect();

        let rounds = 1000;
        let start = Instant::now();
        for _ in 0..rounds {
            let _ = k_closest(&target, candidates.clone(), 20);
        }
        let per_op = start.elapsed().as_nanos() / rounds as u128;
        println!("{:>3} candidates: {}ns/op", size, per_op);
    }

    println!();
}

fn bench_remove() {
    println!("remove");

    let mut table = RoutingTable::new(Id::random());

    let mut ids = Vec::new();
    for _ in 0..200 {
        let node = PeerRecord::random();
        ids.push(*node.id());
        let _ = table.add(node, &alive);
    }

    let n = ids.len();
    let start = Instant::now();
    for id in &ids {
        table.remove(id);
    }
    let per_op = start.elapsed().as_nanos() / n as u128;
    println!("{}ns/op ({} removals)", per_op, n);
    println!();
}

fn bench_lookup() {
    println!("lookup");

    for size in [100, 500] {
        let testnet = Testnet::new(size);
        let lookup = Lookup::new(testnet.joining_table(5), testnet.clone());

        let lookups = 20;
        let mut rounds = 0;

        let start = Instant::now();
        for _ in 0..lookups {
            if let Ok(result) = lookup.find_node(Id::random()) {
                rounds += result.rounds();
            }
        }
        let per_op = start.elapsed().as_micros() / lookups as u128;

        println!(
            "{:>3} peers: {}us/lookup, {:.1} rounds, {} queries",
            size,
            per_op,
            rounds as f64 / lookups as f64,
            testnet.queries()
        );
    }

    println!();
}
