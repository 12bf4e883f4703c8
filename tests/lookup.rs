//! Lookups over an in-process [Testnet].

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use kadcore::{
    Error, Id, Lookup, LookupConfig, PeerError, PeerRecord, SelectionStrategy, SharedRoutingTable,
    Termination, Testnet,
};

fn ids(nodes: &[PeerRecord]) -> HashSet<Id> {
    nodes.iter().map(|node| *node.id()).collect()
}

#[test]
fn empty_table_issues_no_query() {
    let testnet = Testnet::new(10);
    let table = SharedRoutingTable::new(Id::random(), testnet.clone());

    let lookup = Lookup::new(table, testnet.clone());

    assert!(matches!(
        lookup.find_node(Id::random()),
        Err(Error::InsufficientPeers)
    ));
    assert_eq!(testnet.queries(), 0);
}

#[test]
fn finds_the_k_closest() {
    let testnet = Testnet::new(200);

    let lookup = Lookup::with_config(
        testnet.joining_table(8),
        testnet.clone(),
        LookupConfig::default().with_k(10),
    );

    for _ in 0..5 {
        let target = Id::random();
        let result = lookup.find_node(target).unwrap();

        assert_eq!(result.target(), &target);
        assert_eq!(ids(result.closest()), ids(&testnet.closest_to(&target, 10)));
        assert!(result.rounds() <= lookup.config().max_rounds);
        assert_eq!(result.failures(), 0);
    }
}

#[test]
fn every_strategy_finds_the_closest() {
    let testnet = Testnet::new(100);
    let target = Id::random();
    let expected = *testnet.closest_to(&target, 1)[0].id();

    for strategy in [
        SelectionStrategy::Random,
        SelectionStrategy::LatencyRanked,
        SelectionStrategy::Closest,
    ] {
        let lookup = Lookup::with_config(
            testnet.joining_table(5),
            testnet.clone(),
            LookupConfig::default().with_strategy(strategy),
        );

        let result = lookup.find_node(target).unwrap();

        assert_eq!(*result.closest()[0].id(), expected);
    }
}

#[test]
fn progress_strictly_decreases() {
    let testnet = Testnet::new(300);
    let lookup = Lookup::with_config(
        testnet.joining_table(3),
        testnet.clone(),
        LookupConfig::default().with_final_sweep(false),
    );

    let result = lookup.find_node(Id::random()).unwrap();
    let progress = result.progress();

    assert_eq!(progress.len(), result.rounds());
    assert_eq!(result.best_distance(), progress.last().copied());

    // Every round but the last one got closer.
    let non_terminal = &progress[..progress.len().saturating_sub(1)];
    for pair in non_terminal.windows(2) {
        assert!(pair[1] < pair[0]);
    }
}

#[test]
fn sweep_rounds_are_counted() {
    let testnet = Testnet::new(300);
    let lookup = Lookup::new(testnet.joining_table(3), testnet.clone());

    let result = lookup.find_node(Id::random()).unwrap();
    let progress = result.progress();

    assert_eq!(progress.len(), result.rounds());
    assert_eq!(result.best_distance(), progress.last().copied());
    assert!(result.queried() <= result.rounds() * lookup.config().alpha);

    for pair in progress.windows(2) {
        assert!(pair[1] <= pair[0]);
    }
}

#[test]
fn round_limit_bounds_the_final_sweep() {
    let target = Id::random();

    let table = SharedRoutingTable::new(Id::random(), |_: std::net::SocketAddr| -> Result<bool, PeerError> {
        Ok(true)
    });

    let near = PeerRecord::new(target.random_in_bucket(90), PeerRecord::random().address());
    let far = PeerRecord::new(target.random_in_bucket(80), PeerRecord::random().address());
    table.add(near.clone()).unwrap();
    table.add(far.clone()).unwrap();

    let queries = Arc::new(AtomicUsize::new(0));
    let counter = queries.clone();
    let silent = *near.id();

    // The nearest seed knows nobody, the other one leads down a chain of ever
    // closer peers.
    let query = move |target: Id, peer: &PeerRecord| -> Result<Vec<PeerRecord>, PeerError> {
        let n = counter.fetch_add(1, Ordering::SeqCst) as u8;

        if *peer.id() == silent {
            return Ok(vec![]);
        }

        Ok(vec![PeerRecord::new(
            target.random_in_bucket(100 + n),
            PeerRecord::random().address(),
        )])
    };

    let lookup = Lookup::with_config(
        table,
        query,
        LookupConfig::default()
            .with_alpha(1)
            .with_max_rounds(2)
            .with_strategy(SelectionStrategy::Closest),
    );

    let result = lookup.find_node(target).unwrap();

    assert_eq!(result.termination(), Termination::RoundLimit);
    assert_eq!(result.rounds(), 2);
    assert_eq!(result.progress().len(), 2);
    assert!(result.progress()[1] < result.progress()[0]);
    assert_eq!(queries.load(Ordering::SeqCst), 2);
}

#[test]
fn lookup_enriches_the_routing_table() {
    let testnet = Testnet::new(100);
    let table = testnet.joining_table(3);

    let lookup = Lookup::new(table.clone(), testnet.clone());
    let result = lookup.find_node(Id::random()).unwrap();

    // Workers add to the table right after reporting.
    let deadline = Instant::now() + Duration::from_secs(5);
    while table.size() <= 3 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }

    assert!(!result.responders().is_empty());
    assert!(table.size() > 3);
}

#[test]
fn tolerates_offline_peers() {
    let testnet = Testnet::new(100);
    let table = testnet.joining_table(10);

    // Half of the peers the joining node knows are gone.
    for node in table.snapshot().iter().take(5) {
        testnet.set_offline(node.id(), true);
    }

    let lookup = Lookup::new(table, testnet.clone());
    let result = lookup.find_node(Id::random()).unwrap();

    assert!(!result.responders().is_empty());
    assert!(result
        .responders()
        .iter()
        .all(|node| !testnet.is_offline(node.id())));
    assert!(result.failures() <= result.queried());
}

#[test]
fn all_offline_is_unreachable() {
    let testnet = Testnet::new(20);
    let table = testnet.joining_table(5);

    for node in testnet.peers() {
        testnet.set_offline(node.id(), true);
    }

    let lookup = Lookup::new(table, testnet.clone());
    let target = Id::random();

    match lookup.find_node(target) {
        Err(Error::Unreachable { target: t, tried }) => {
            assert_eq!(t, target);
            assert_eq!(tried, 5);
        }
        other => panic!("expected Unreachable, got {:?}", other),
    }
}

#[test]
fn deadline_returns_best_so_far() {
    let testnet = Testnet::new(50);
    let table = testnet.joining_table(10);

    for node in testnet.peers() {
        testnet.set_latency(node.id(), Duration::from_secs(2));
    }

    let lookup = Lookup::with_config(
        table,
        testnet.clone(),
        LookupConfig::default().with_timeout(Duration::from_millis(200)),
    );

    let start = Instant::now();
    let result = lookup.find_node(Id::random()).unwrap();

    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(result.termination(), Termination::Deadline);
    assert_eq!(result.closest().len(), 10);
    assert!(result.responders().is_empty());
}

#[test]
fn query_timeout_counts_as_failure() {
    let testnet = Testnet::new(30);
    let table = testnet.joining_table(6);

    let slow: Vec<PeerRecord> = table.snapshot();
    for node in &slow {
        testnet.set_latency(node.id(), Duration::from_secs(2));
    }

    let lookup = Lookup::with_config(
        table,
        testnet.clone(),
        LookupConfig::default()
            .with_alpha(6)
            .with_query_timeout(Duration::from_millis(100)),
    );

    let start = Instant::now();
    let result = lookup.find_node(Id::random());

    assert!(start.elapsed() < Duration::from_secs(1));
    assert!(matches!(result, Err(Error::Unreachable { tried: 6, .. })));
}

#[test]
fn non_convergence_carries_best_shortlist() {
    let local = Id::random();
    let target = Id::random();

    let table = SharedRoutingTable::new(local, |_: std::net::SocketAddr| -> Result<bool, PeerError> {
        Ok(true)
    });

    let seeds: Vec<PeerRecord> = (100..105)
        .map(|index| PeerRecord::new(target.random_in_bucket(index), PeerRecord::random().address()))
        .collect();
    for seed in &seeds {
        table.add(seed.clone()).unwrap();
    }

    // Adversarial peers, always answering fresh but remote peers.
    let query = move |target: Id, _: &PeerRecord| -> Result<Vec<PeerRecord>, PeerError> {
        Ok((0..3)
            .map(|_| PeerRecord::new(target.random_in_bucket(0), PeerRecord::random().address()))
            .collect())
    };

    let lookup = Lookup::with_config(
        table,
        query,
        LookupConfig::default().with_max_rounds(1),
    );

    match lookup.find_node(target) {
        Err(Error::NonConvergence { rounds, closest }) => {
            assert_eq!(rounds, 1);
            assert!(ids(&seeds).is_subset(&ids(&closest)));
        }
        other => panic!("expected NonConvergence, got {:?}", other),
    }
}

#[test]
fn concurrent_lookups() {
    let testnet = Testnet::new(100);
    let lookup = Lookup::new(testnet.joining_table(5), testnet.clone());

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let lookup = lookup.clone();
            std::thread::spawn(move || lookup.find_node(Id::random()))
        })
        .collect();

    for handle in handles {
        assert!(handle.join().unwrap().is_ok());
    }
}

#[test]
fn refresh_bucket_targets_the_bucket() {
    let testnet = Testnet::new(100);
    let table = testnet.joining_table(5);
    let lookup = Lookup::new(table.clone(), testnet.clone());

    let result = lookup.refresh_bucket(2).unwrap();

    assert_eq!(table.id().bucket_index(result.target()), Some(2));
}
