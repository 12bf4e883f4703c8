use crate::common::{Distance, Id, PeerRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Why a lookup stopped.
pub enum Termination {
    /// Rounds stopped getting closer to the target.
    Converged,
    /// Every peer in the shortlist was queried.
    Exhausted,
    /// The configured maximum number of rounds was reached.
    RoundLimit,
    /// The lookup deadline passed, outstanding queries were abandoned.
    Deadline,
}

#[derive(Debug, Clone)]
/// Outcome of a successful lookup.
pub struct LookupResult {
    pub(crate) target: Id,
    pub(crate) closest: Box<[PeerRecord]>,
    pub(crate) responders: Box<[PeerRecord]>,
    pub(crate) queried: usize,
    pub(crate) failures: usize,
    pub(crate) rounds: usize,
    pub(crate) progress: Vec<Distance>,
    pub(crate) termination: Termination,
}

impl LookupResult {
    pub fn target(&self) -> &Id {
        &self.target
    }

    /// Up to K closest peers to the target found, sorted by distance.
    ///
    /// Includes peers only known from other peers' answers, see [Self::responders]
    /// for peers confirmed reachable during this lookup.
    pub fn closest(&self) -> &[PeerRecord] {
        &self.closest
    }

    /// Peers that answered a query during this lookup, sorted by distance to the
    /// target, carrying their measured round trip time.
    pub fn responders(&self) -> &[PeerRecord] {
        &self.responders
    }

    /// Number of queries sent.
    pub fn queried(&self) -> usize {
        self.queried
    }

    /// Number of queries that failed or timed out.
    pub fn failures(&self) -> usize {
        self.failures
    }

    pub fn rounds(&self) -> usize {
        self.rounds
    }

    /// Best distance to the target after each round.
    pub fn progress(&self) -> &[Distance] {
        &self.progress
    }

    pub fn termination(&self) -> Termination {
        self.termination
    }

    /// Distance between the target and the closest peer found.
    pub fn best_distance(&self) -> Option<Distance> {
        self.closest.first().map(|node| node.id().distance(&self.target))
    }
}
