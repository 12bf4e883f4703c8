//! State of a single lookup, discarded once it returns.

use std::{collections::HashSet, time::Duration};

use rand::seq::index;
use tracing::{debug, trace};

use crate::capabilities::PeerError;
use crate::common::{k_closest, ClosestNodes, Distance, Id, PeerRecord};
use crate::config::SelectionStrategy;

use super::response::{LookupResult, Termination};

/// Outcome of one FIND_NODE query, sent back by its worker.
#[derive(Debug)]
pub(crate) struct QueryReport {
    pub peer: PeerRecord,
    pub latency: Duration,
    pub outcome: Result<Vec<PeerRecord>, PeerError>,
}

#[derive(Debug)]
pub(crate) struct LookupSession {
    target: Id,
    k: usize,
    /// At most `k` candidates, sorted by distance to the target.
    shortlist: Vec<PeerRecord>,
    /// Ids already queried, and the local id.
    seen: HashSet<Id>,
    best: Distance,
    improved: bool,
    responders: ClosestNodes,
    queried: usize,
    failures: usize,
    rounds: usize,
    progress: Vec<Distance>,
}

impl LookupSession {
    pub fn new(local: Id, target: Id, k: usize, seeds: Vec<PeerRecord>) -> Self {
        let mut seen = HashSet::new();
        seen.insert(local);

        let mut session = LookupSession {
            target,
            k,
            shortlist: Vec::with_capacity(k),
            seen,
            best: Distance::MAX,
            improved: false,
            responders: ClosestNodes::new(target),
            queried: 0,
            failures: 0,
            rounds: 0,
            progress: Vec::new(),
        };

        session.merge(seeds);
        session.best = session.current_best();

        session
    }

    // === Getters ===

    pub fn is_empty(&self) -> bool {
        self.shortlist.is_empty()
    }

    pub fn rounds(&self) -> usize {
        self.rounds
    }

    pub fn best(&self) -> Distance {
        self.best
    }

    /// Whether any round ever got closer to the target.
    pub fn improved(&self) -> bool {
        self.improved
    }

    pub fn queried(&self) -> usize {
        self.queried
    }

    pub fn has_responders(&self) -> bool {
        !self.responders.is_empty()
    }

    /// Whether any shortlist candidate is still waiting to be queried.
    pub fn has_unqueried(&self) -> bool {
        self.shortlist.iter().any(|node| !self.seen.contains(node.id()))
    }

    // === Public Methods ===

    /// Pick up to `n` unqueried candidates of the shortlist, and mark them as seen.
    pub fn select(&mut self, n: usize, strategy: SelectionStrategy) -> Vec<PeerRecord> {
        let mut unqueried: Vec<PeerRecord> = self
            .shortlist
            .iter()
            .filter(|node| !self.seen.contains(node.id()))
            .cloned()
            .collect();

        let selected = if unqueried.len() <= n {
            unqueried
        } else {
            match strategy {
                SelectionStrategy::Random => {
                    let mut rng = rand::thread_rng();

                    index::sample(&mut rng, unqueried.len(), n)
                        .into_iter()
                        .map(|i| unqueried[i].clone())
                        .collect()
                }
                SelectionStrategy::LatencyRanked => {
                    let target = self.target;

                    // Shortlist order breaks ties, and it is sorted by distance.
                    unqueried.sort_by_key(|node| node.latency().unwrap_or(Duration::MAX));
                    unqueried.truncate(n);
                    unqueried.sort_by_key(|node| node.id().distance(&target));
                    unqueried
                }
                SelectionStrategy::Closest => {
                    unqueried.truncate(n);
                    unqueried
                }
            }
        };

        for node in &selected {
            self.seen.insert(*node.id());
        }
        self.queried += selected.len();

        selected
    }

    /// Record a query outcome, merging the returned peers on success.
    pub fn absorb(&mut self, report: QueryReport) {
        let QueryReport {
            peer,
            latency,
            outcome,
        } = report;

        match outcome {
            Ok(nodes) => {
                trace!(id = ?peer.id(), ?latency, returned = nodes.len(), "Query responded");

                self.responders.add(peer.with_latency(latency));
                self.merge(nodes);
            }
            Err(error) => {
                debug!(id = ?peer.id(), address = ?peer.address(), ?error, "Query failed");

                self.failures += 1;
            }
        }
    }

    /// Count queries that never reported back in time as failed.
    pub fn missed(&mut self, count: usize) {
        if count > 0 {
            debug!(count, "Queries timed out");
        }

        self.failures += count;
    }

    /// Add new candidates to the shortlist, keeping the `k` closest.
    ///
    /// Already queried ids, the local id and duplicates are dropped.
    pub fn merge(&mut self, nodes: Vec<PeerRecord>) {
        let mut known: HashSet<Id> = self.shortlist.iter().map(|node| *node.id()).collect();

        let fresh: Vec<PeerRecord> = nodes
            .into_iter()
            .filter(|node| !self.seen.contains(node.id()) && known.insert(*node.id()))
            .collect();

        if fresh.is_empty() {
            return;
        }

        let mut candidates = std::mem::take(&mut self.shortlist);
        candidates.extend(fresh);

        let target = self.target;
        let mut shortlist = k_closest(&target, candidates, self.k);
        shortlist.sort_by_key(|node| node.id().distance(&target));

        self.shortlist = shortlist;
    }

    /// Close a round, returns `true` if it got strictly closer to the target.
    pub fn end_round(&mut self) -> bool {
        self.rounds += 1;

        let current = self.current_best();
        let improved = current < self.best;

        if improved {
            self.best = current;
            self.improved = true;
        }

        self.progress.push(self.best);

        improved
    }

    pub fn finish(self, termination: Termination) -> LookupResult {
        LookupResult {
            target: self.target,
            closest: self.shortlist.into_boxed_slice(),
            responders: self.responders.into_iter().collect(),
            queried: self.queried,
            failures: self.failures,
            rounds: self.rounds,
            progress: self.progress,
            termination,
        }
    }

    pub fn into_closest(self) -> Box<[PeerRecord]> {
        self.shortlist.into_boxed_slice()
    }

    // === Private Methods ===

    fn current_best(&self) -> Distance {
        self.shortlist
            .first()
            .map(|node| node.id().distance(&self.target))
            .unwrap_or(Distance::MAX)
    }
}
