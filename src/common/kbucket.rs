//! Kbuckets
use std::{
    collections::{vec_deque::Iter, HashSet, VecDeque},
    fmt::{self, Debug, Formatter},
    time::{Duration, Instant},
};

use rand::seq::index;
use tracing::trace;

use crate::capabilities::{probe, AliveChecker};
use crate::common::{Id, PeerRecord};
use crate::config::{DEFAULT_K, DEFAULT_REFRESH_INTERVAL};

#[derive(Debug, Clone, PartialEq)]
/// Outcome of the first, lock friendly, phase of inserting into a [KBucket].
pub enum Admission {
    /// New peer appended at the back of the bucket.
    Inserted,
    /// Peer was already known, its record was replaced and moved to the back.
    Updated,
    /// Bucket is full, `front` has to be probed before the insertion can be
    /// resolved with [KBucket::resolve_full].
    Full { front: PeerRecord },
}

/// Kbuckets are similar to LRU caches that checks and evicts unresponsive nodes,
/// without dropping any responsive nodes in the process.
#[derive(Clone)]
pub struct KBucket {
    /// K (as in k-bucket) is the maximum number of nodes in a k-bucket.
    k: usize,
    /// Nodes in the k-bucket, sorted by the least recently seen.
    nodes: VecDeque<PeerRecord>,
    /// Ids of `nodes`, always mutated together with it.
    members: HashSet<Id>,
    refresh_interval: Duration,
    next_refresh: Instant,
}

impl KBucket {
    pub fn new() -> Self {
        KBucket {
            k: DEFAULT_K,
            nodes: VecDeque::with_capacity(DEFAULT_K),
            members: HashSet::with_capacity(DEFAULT_K),
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            next_refresh: Instant::now() + DEFAULT_REFRESH_INTERVAL,
        }
    }

    // === Options ===

    pub fn with_size(mut self, k: usize) -> Self {
        self.k = k.max(1);
        self.nodes = VecDeque::with_capacity(self.k);
        self.members = HashSet::with_capacity(self.k);
        self
    }

    pub fn with_refresh_interval(mut self, refresh_interval: Duration) -> Self {
        self.refresh_interval = refresh_interval;
        self.next_refresh = Instant::now() + refresh_interval;
        self
    }

    // === Getters ===

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.nodes.len() >= self.k
    }

    pub fn contains(&self, id: &Id) -> bool {
        self.members.contains(id)
    }

    /// Least recently seen node.
    pub fn front(&self) -> Option<&PeerRecord> {
        self.nodes.front()
    }

    pub fn iter(&self) -> Iter<'_, PeerRecord> {
        self.nodes.iter()
    }

    /// All nodes, from the least to the most recently seen.
    pub fn all(&self) -> Vec<PeerRecord> {
        self.nodes.iter().cloned().collect()
    }

    pub fn next_refresh(&self) -> Instant {
        self.next_refresh
    }

    // === Public Methods ===

    /// Insert a node, probing the least recently seen node if the bucket is full.
    ///
    /// If the probed node is dead it is evicted in favor of `incoming`, otherwise it
    /// is moved to the back and `incoming` is dropped. Returns `true` if `incoming`
    /// ended up in the bucket.
    pub fn insert<C: AliveChecker + ?Sized>(&mut self, incoming: PeerRecord, checker: &C) -> bool {
        match self.try_insert(incoming.clone()) {
            Admission::Full { front } => {
                let alive = probe(checker, &front);
                self.resolve_full(front.id(), alive, incoming)
            }
            Admission::Inserted | Admission::Updated => true,
        }
    }

    /// Insert a node if it is already known or there is room for it, otherwise return
    /// the node that needs to be probed.
    pub fn try_insert(&mut self, incoming: PeerRecord) -> Admission {
        if self.members.contains(incoming.id()) {
            // Last seen wins, the peer might have changed its address.
            self.nodes.retain(|node| node.id() != incoming.id());
            self.nodes.push_back(incoming);

            return Admission::Updated;
        }

        if let Some(front) = self.nodes.front() {
            if self.nodes.len() >= self.k {
                return Admission::Full {
                    front: front.clone(),
                };
            }
        }

        self.members.insert(*incoming.id());
        self.nodes.push_back(incoming);

        Admission::Inserted
    }

    /// Resolve an [Admission::Full] after probing `front_id`.
    ///
    /// If the bucket changed while the probe was in flight, the admission is retried
    /// without probing again.
    pub fn resolve_full(&mut self, front_id: &Id, alive: bool, incoming: PeerRecord) -> bool {
        if self.front().map(|front| front.id()) != Some(front_id) {
            return !matches!(self.try_insert(incoming), Admission::Full { .. });
        }

        if alive {
            self.touch_front();

            false
        } else {
            self.pop_front();

            !matches!(self.try_insert(incoming), Admission::Full { .. })
        }
    }

    pub fn remove(&mut self, id: &Id) -> Option<PeerRecord> {
        if !self.members.remove(id) {
            return None;
        }

        let index = self.nodes.iter().position(|node| node.id() == id)?;

        self.nodes.remove(index)
    }

    /// Empty this bucket.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.members.clear();
    }

    /// Returns up to `n` nodes picked uniformly at random, or all nodes if there
    /// are no more than `n`.
    pub fn sample(&self, n: usize) -> Vec<PeerRecord> {
        if n >= self.nodes.len() {
            return self.all();
        }

        let mut rng = rand::thread_rng();

        index::sample(&mut rng, self.nodes.len(), n)
            .into_iter()
            .filter_map(|i| self.nodes.get(i).cloned())
            .collect()
    }

    // === Refresh ===

    pub fn is_refresh_due(&self, now: Instant) -> bool {
        now >= self.next_refresh
    }

    /// Probe the least recently seen node if the refresh deadline has passed.
    ///
    /// Returns `true` if a refresh happened.
    pub fn refresh_if_due<C: AliveChecker + ?Sized>(&mut self, checker: &C) -> bool {
        self.refresh_if_due_at(Instant::now(), checker)
    }

    pub fn refresh_if_due_at<C: AliveChecker + ?Sized>(&mut self, now: Instant, checker: &C) -> bool {
        if !self.is_refresh_due(now) {
            return false;
        }

        match self.front().cloned() {
            Some(front) => {
                let alive = probe(checker, &front);
                self.apply_refresh(front.id(), alive, now);
            }
            None => self.reset_refresh(now),
        }

        true
    }

    /// Apply the result of probing `front_id` for a refresh, and reset the deadline.
    pub(crate) fn apply_refresh(&mut self, front_id: &Id, alive: bool, now: Instant) {
        if self.front().map(|front| front.id()) == Some(front_id) {
            if alive {
                self.touch_front();
            } else {
                self.pop_front();
            }
        }

        self.reset_refresh(now);
    }

    pub(crate) fn reset_refresh(&mut self, now: Instant) {
        self.next_refresh = now + self.refresh_interval;
    }

    // === Private Methods ===

    /// Move the least recently seen node to the back.
    fn touch_front(&mut self) {
        if let Some(front) = self.nodes.pop_front() {
            trace!(id = ?front.id(), "Least recently seen node is alive");
            self.nodes.push_back(front);
        }
    }

    fn pop_front(&mut self) -> Option<PeerRecord> {
        let front = self.nodes.pop_front()?;
        self.members.remove(front.id());

        trace!(id = ?front.id(), "Evicted dead node");

        Some(front)
    }
}

impl Default for KBucket {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for KBucket {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "KBucket{{ nodes: {}/{} }}", &self.nodes.len(), self.k)
    }
}

#[cfg(test)]
mod test {
    use std::net::SocketAddr;

    use super::*;
    use crate::capabilities::PeerError;

    fn alive(_: SocketAddr) -> Result<bool, PeerError> {
        Ok(true)
    }

    fn dead(_: SocketAddr) -> Result<bool, PeerError> {
        Ok(false)
    }

    fn unreachable(_: SocketAddr) -> Result<bool, PeerError> {
        Err(PeerError::Unreachable("connection refused".to_string()))
    }

    fn ids(bucket: &KBucket) -> Vec<Id> {
        bucket.iter().map(|node| *node.id()).collect()
    }

    #[test]
    fn should_not_add_more_than_k() {
        let mut bucket = KBucket::new();

        for i in 0..bucket.k() {
            let node = PeerRecord::random();
            assert!(bucket.insert(node, &alive), "Failed to add node {}", i);
        }

        assert!(!bucket.insert(PeerRecord::random(), &alive));
        assert_eq!(bucket.len(), bucket.k());
    }

    #[test]
    fn never_holds_duplicates() {
        let mut bucket = KBucket::new().with_size(4);
        let nodes: Vec<PeerRecord> = (0..6).map(|_| PeerRecord::random()).collect();

        for round in 0..3 {
            for node in &nodes {
                let checker = if round % 2 == 0 { dead } else { alive };
                bucket.insert(node.clone(), &checker);

                assert!(bucket.len() <= 4);
                let unique: HashSet<Id> = bucket.iter().map(|n| *n.id()).collect();
                assert_eq!(unique.len(), bucket.len());
                assert_eq!(bucket.members, unique);
            }
        }
    }

    #[test]
    fn evicts_dead_front() {
        let mut bucket = KBucket::new().with_size(2);

        let p1 = PeerRecord::random();
        let p2 = PeerRecord::random();
        let p3 = PeerRecord::random();

        bucket.insert(p1.clone(), &alive);
        bucket.insert(p2.clone(), &alive);

        assert!(bucket.insert(p3.clone(), &dead));

        assert_eq!(ids(&bucket), vec![*p2.id(), *p3.id()]);
        assert!(!bucket.contains(p1.id()));
    }

    #[test]
    fn probe_errors_evict() {
        let mut bucket = KBucket::new().with_size(1);

        let p1 = PeerRecord::random();
        let p2 = PeerRecord::random();

        bucket.insert(p1, &alive);

        assert!(bucket.insert(p2.clone(), &unreachable));
        assert_eq!(ids(&bucket), vec![*p2.id()]);
    }

    #[test]
    fn keeps_alive_front() {
        let mut bucket = KBucket::new().with_size(2);

        let p1 = PeerRecord::random();
        let p2 = PeerRecord::random();
        let p3 = PeerRecord::random();

        bucket.insert(p1.clone(), &alive);
        bucket.insert(p2.clone(), &alive);

        assert!(!bucket.insert(p3.clone(), &alive));

        assert_eq!(ids(&bucket), vec![*p2.id(), *p1.id()]);
        assert!(!bucket.contains(p3.id()));
    }

    #[test]
    fn should_update_existing_node() {
        let mut bucket = KBucket::new().with_size(2);

        let p1 = PeerRecord::random();
        let p2 = PeerRecord::random();
        let p1_moved = PeerRecord::new(*p1.id(), SocketAddr::from(([127, 0, 0, 1], 6881)));

        bucket.insert(p1.clone(), &dead);
        bucket.insert(p2.clone(), &dead);

        // Full bucket, but known peers never need a probe.
        assert!(bucket.insert(p1_moved.clone(), &dead));

        assert_eq!(ids(&bucket), vec![*p2.id(), *p1.id()]);
        assert_eq!(bucket.all()[1].address(), p1_moved.address());
    }

    #[test]
    fn resolve_full_after_concurrent_change() {
        let mut bucket = KBucket::new().with_size(2);

        let p1 = PeerRecord::random();
        let p2 = PeerRecord::random();
        let p3 = PeerRecord::random();

        bucket.try_insert(p1.clone());
        bucket.try_insert(p2.clone());

        let front = match bucket.try_insert(p3.clone()) {
            Admission::Full { front } => front,
            other => panic!("expected a full bucket, got {:?}", other),
        };
        assert_eq!(front.id(), p1.id());

        // p1 got removed while probing it.
        bucket.remove(p1.id());

        assert!(bucket.resolve_full(front.id(), true, p3.clone()));
        assert_eq!(ids(&bucket), vec![*p2.id(), *p3.id()]);
    }

    #[test]
    fn refresh_only_when_due() {
        let mut bucket = KBucket::new()
            .with_size(2)
            .with_refresh_interval(Duration::from_secs(60));

        let p1 = PeerRecord::random();
        let p2 = PeerRecord::random();

        bucket.insert(p1.clone(), &alive);
        bucket.insert(p2.clone(), &alive);

        assert!(!bucket.refresh_if_due(&dead));
        assert_eq!(bucket.len(), 2);

        // We add to Instant::now() instead of subtracting, to avoid overflows
        // when Instant is close to its internal epoch.
        let later = Instant::now() + Duration::from_secs(61);

        assert!(bucket.refresh_if_due_at(later, &alive));
        assert_eq!(ids(&bucket), vec![*p2.id(), *p1.id()]);
        assert_eq!(bucket.next_refresh(), later + Duration::from_secs(60));

        // Not due again until the new deadline.
        assert!(!bucket.refresh_if_due_at(later, &dead));

        let even_later = later + Duration::from_secs(61);
        assert!(bucket.refresh_if_due_at(even_later, &dead));
        assert_eq!(ids(&bucket), vec![*p1.id()]);
    }

    #[test]
    fn refresh_empty_bucket_resets_deadline() {
        let mut bucket = KBucket::new().with_refresh_interval(Duration::from_secs(1));
        let later = Instant::now() + Duration::from_secs(2);

        assert!(bucket.refresh_if_due_at(later, &dead));
        assert_eq!(bucket.next_refresh(), later + Duration::from_secs(1));
    }

    #[test]
    fn sample() {
        let mut bucket = KBucket::new();
        for _ in 0..10 {
            bucket.insert(PeerRecord::random(), &alive);
        }

        let sample = bucket.sample(4);
        assert_eq!(sample.len(), 4);

        let unique: HashSet<Id> = sample.iter().map(|n| *n.id()).collect();
        assert_eq!(unique.len(), 4);
        assert!(unique.iter().all(|id| bucket.contains(id)));

        assert_eq!(bucket.sample(10), bucket.all());
        assert_eq!(bucket.sample(50).len(), 10);
    }

    #[test]
    fn clear() {
        let mut bucket = KBucket::new();
        let node = PeerRecord::random();
        bucket.insert(node.clone(), &alive);

        bucket.clear();

        assert!(bucket.is_empty());
        assert!(!bucket.contains(node.id()));
    }
}
