//! Iterative FIND_NODE lookup over a [SharedRoutingTable].

mod response;
mod session;

use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use flume::RecvTimeoutError;
use tracing::{debug, trace, warn};

use crate::capabilities::{FindNode, PeerError};
use crate::common::{Id, PeerRecord};
use crate::config::LookupConfig;
use crate::table::SharedRoutingTable;
use crate::{Error, Result};

pub use response::{LookupResult, Termination};
use session::{LookupSession, QueryReport};

#[derive(Clone)]
/// Lookup engine, locating the peers closest to a target by querying
/// closer and closer peers, `alpha` at a time.
///
/// Every peer discovered along the way is added to the routing table.
pub struct Lookup {
    table: SharedRoutingTable,
    query: Arc<dyn FindNode>,
    config: LookupConfig,
}

/// Queries of a round, or nothing if the lookup deadline passed first.
enum Round {
    Complete {
        reports: Vec<QueryReport>,
        missed: usize,
    },
    Abandoned,
}

impl Lookup {
    pub fn new<Q: FindNode + 'static>(table: SharedRoutingTable, query: Q) -> Self {
        Self::with_config(table, query, LookupConfig::default())
    }

    pub fn with_config<Q: FindNode + 'static>(
        table: SharedRoutingTable,
        query: Q,
        config: LookupConfig,
    ) -> Self {
        Lookup {
            table,
            query: Arc::new(query),
            config,
        }
    }

    // === Getters ===

    pub fn table(&self) -> &SharedRoutingTable {
        &self.table
    }

    pub fn config(&self) -> &LookupConfig {
        &self.config
    }

    // === Public Methods ===

    /// Find the K closest peers to `target`.
    ///
    /// Fails only if the routing table is empty, if no queried peer ever responded,
    /// or if the round limit was reached without ever getting closer to the target.
    /// Individual query failures are tolerated, and a passed deadline returns the
    /// best peers found so far.
    pub fn find_node(&self, target: Id) -> Result<LookupResult> {
        let started = Instant::now();
        let deadline = self.config.timeout.map(|timeout| started + timeout);

        let k = self.config.k.max(1);
        let alpha = self.config.alpha.max(1);
        let max_rounds = self.config.max_rounds.max(1);
        let strategy = self.config.strategy;

        let local = self.table.id();
        let seeds = self.table.closest_local(&target, k);

        let mut session = LookupSession::new(local, target, k, seeds);

        if session.is_empty() {
            debug!(?target, "Lookup with an empty routing table");
            return Err(Error::InsufficientPeers);
        }

        trace!(?target, k, alpha, ?strategy, "New lookup");

        // Stale rounds left before accepting there is nothing closer.
        let mut sweep: Option<usize> = None;

        let termination = loop {
            if expired(deadline) {
                break Termination::Deadline;
            }

            let batch = session.select(alpha, strategy);

            if batch.is_empty() {
                break Termination::Exhausted;
            }

            match self.query_round(target, batch, deadline) {
                Round::Complete { reports, missed } => {
                    for report in reports {
                        session.absorb(report);
                    }
                    session.missed(missed);
                }
                Round::Abandoned => break Termination::Deadline,
            }

            let improved = session.end_round();

            trace!(?target, round = session.rounds(), best = ?session.best(), improved, ?sweep, "Lookup round");

            if session.rounds() >= max_rounds {
                break Termination::RoundLimit;
            }

            if !session.has_unqueried() {
                break Termination::Exhausted;
            }

            if improved {
                sweep = None;
                continue;
            }

            if !self.config.final_sweep {
                break Termination::Converged;
            }

            // Sweep the rest of the shortlist, at most ⌈K/alpha⌉ more rounds.
            match sweep.unwrap_or((k + alpha - 1) / alpha) {
                0 => break Termination::Converged,
                left => sweep = Some(left - 1),
            }
        };

        debug!(
            ?target,
            ?termination,
            rounds = session.rounds(),
            queried = session.queried(),
            elapsed = ?started.elapsed(),
            "Lookup done"
        );

        if !session.has_responders() && termination != Termination::Deadline {
            return Err(Error::Unreachable {
                target,
                tried: session.queried(),
            });
        }

        if termination == Termination::RoundLimit && !session.improved() {
            return Err(Error::NonConvergence {
                rounds: session.rounds(),
                closest: session.into_closest(),
            });
        }

        Ok(session.finish(termination))
    }

    /// Look up a random target within the bucket `index` of the local routing table,
    /// filling that bucket with fresh peers.
    pub fn refresh_bucket(&self, index: u8) -> Result<LookupResult> {
        let target = self.table.id().random_in_bucket(index);

        self.find_node(target)
    }

    // === Private Methods ===

    /// Query every peer of `batch` concurrently, and wait for all of them to report
    /// back, time out, or for the lookup deadline.
    fn query_round(&self, target: Id, batch: Vec<PeerRecord>, deadline: Option<Instant>) -> Round {
        let launched = batch.len();
        let round_deadline = earliest(self.config.query_timeout.map(|t| Instant::now() + t), deadline);

        // Enough capacity for abandoned workers to never block on sending.
        let (sender, receiver) = flume::bounded::<QueryReport>(launched);

        let mut reports = Vec::with_capacity(launched);

        for peer in batch {
            let sender = sender.clone();
            let query = self.query.clone();
            let table = self.table.clone();
            let worker_peer = peer.clone();

            let spawned = thread::Builder::new()
                .name("kadcore-lookup".to_string())
                .spawn(move || run_query(target, worker_peer, query, table, sender));

            if let Err(error) = spawned {
                warn!(?error, "Failed to spawn a lookup worker");

                reports.push(QueryReport {
                    peer,
                    latency: Duration::ZERO,
                    outcome: Err(PeerError::Io(error)),
                });
            }
        }

        drop(sender);

        while reports.len() < launched {
            let next = match round_deadline {
                Some(at) => receiver.recv_deadline(at),
                None => receiver.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };

            match next {
                Ok(report) => reports.push(report),
                Err(RecvTimeoutError::Timeout) => {
                    if expired(deadline) {
                        return Round::Abandoned;
                    }
                    break;
                }
                // A worker panicked before reporting.
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        Round::Complete {
            missed: launched - reports.len(),
            reports,
        }
    }
}

impl std::fmt::Debug for Lookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lookup")
            .field("table", &self.table)
            .field("config", &self.config)
            .finish()
    }
}

/// Body of a lookup worker thread.
///
/// Reports first, so that a lookup is never kept waiting on the routing table,
/// then adds the responder and the peers it returned to the table.
fn run_query(
    target: Id,
    peer: PeerRecord,
    query: Arc<dyn FindNode>,
    table: SharedRoutingTable,
    sender: flume::Sender<QueryReport>,
) {
    let start = Instant::now();
    let outcome = query.find_node(target, &peer);
    let latency = start.elapsed();

    let discovered = outcome.as_ref().ok().cloned();

    let _ = sender.send(QueryReport {
        peer: peer.clone(),
        latency,
        outcome,
    });

    if let Some(nodes) = discovered {
        let _ = table.add(peer.with_latency(latency));

        for node in nodes {
            if let Err(error) = table.add(node) {
                trace!(?error, "Ignored discovered node");
            }
        }
    }
}

fn expired(deadline: Option<Instant>) -> bool {
    deadline.map(|at| Instant::now() >= at).unwrap_or(false)
}

fn earliest(a: Option<Instant>, b: Option<Instant>) -> Option<Instant> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}
