//! Kademlia routing table with one k-bucket per possible shared prefix length.

use std::time::Instant;

use crate::capabilities::{probe, AliveChecker};
use crate::common::{k_closest, Admission, ClosestNodes, Id, KBucket, PeerRecord, MAX_DISTANCE};
use crate::config::TableConfig;
use crate::{Error, Result};

#[derive(Debug, Clone)]
/// Kademlia routing table
///
/// Buckets are indexed by [Id::bucket_index] relative to the local [Id], from 0
/// (most remote peers) to 159 (peers differing only in the last bit), and
/// allocated on first insertion.
pub struct RoutingTable {
    id: Id,
    config: TableConfig,
    buckets: Box<[Option<KBucket>]>,
    /// Highest index of a non empty bucket.
    nearest: Option<u8>,
}

impl RoutingTable {
    /// Create a new [RoutingTable] with a given id.
    pub fn new(id: Id) -> Self {
        Self::with_config(id, TableConfig::default())
    }

    pub fn with_config(id: Id, config: TableConfig) -> Self {
        RoutingTable {
            id,
            config,
            buckets: (0..MAX_DISTANCE).map(|_| None).collect(),
            nearest: None,
        }
    }

    // === Getters ===

    /// Returns the [Id] of this node, where the distance is measured from.
    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn config(&self) -> &TableConfig {
        &self.config
    }

    /// Returns the bucket at `index`, if it was ever allocated.
    pub fn bucket(&self, index: u8) -> Option<&KBucket> {
        self.buckets.get(index as usize)?.as_ref()
    }

    /// Index of the nearest non empty bucket to the local [Id].
    pub fn nearest_bucket(&self) -> Option<u8> {
        self.nearest
    }

    // === Public Methods ===

    /// Attempts to add a node to this routing table, and return `true` if it did.
    ///
    /// If the node's bucket is full, its least recently seen node is probed with
    /// `checker` and evicted only if it is dead.
    pub fn add<C: AliveChecker + ?Sized>(&mut self, node: PeerRecord, checker: &C) -> Result<bool> {
        match self.admit(node.clone())? {
            Admission::Full { front } => {
                let alive = probe(checker, &front);
                Ok(self.resolve_admission(front.id(), alive, node))
            }
            Admission::Inserted | Admission::Updated => Ok(true),
        }
    }

    /// First phase of [Self::add], that never probes.
    pub fn admit(&mut self, node: PeerRecord) -> Result<Admission> {
        let index = self.id.bucket_index(node.id()).ok_or(Error::SelfInsertion)?;

        let k = self.config.k;
        let refresh_interval = self.config.refresh_interval;

        let admission = self.buckets[index as usize]
            .get_or_insert_with(|| {
                KBucket::new()
                    .with_size(k)
                    .with_refresh_interval(refresh_interval)
            })
            .try_insert(node);

        // The bucket is never empty after an admission, full or not.
        self.nearest = self.nearest.max(Some(index));

        Ok(admission)
    }

    /// Second phase of [Self::add] after probing the `front_id` returned in [Admission::Full].
    pub fn resolve_admission(&mut self, front_id: &Id, alive: bool, node: PeerRecord) -> bool {
        let index = match self.id.bucket_index(node.id()) {
            Some(index) => index,
            None => return false,
        };

        let added = match self.buckets[index as usize].as_mut() {
            Some(bucket) => bucket.resolve_full(front_id, alive, node),
            None => return false,
        };

        self.update_nearest(index);

        added
    }

    /// Remove a node from this routing table.
    pub fn remove(&mut self, node_id: &Id) -> Option<PeerRecord> {
        let index = self.id.bucket_index(node_id)?;

        let removed = self.buckets[index as usize].as_mut()?.remove(node_id);

        self.update_nearest(index);

        removed
    }

    pub fn contains(&self, node_id: &Id) -> bool {
        self.id
            .bucket_index(node_id)
            .and_then(|index| self.bucket(index))
            .map(|bucket| bucket.contains(node_id))
            .unwrap_or(false)
    }

    /// Best local guess of up to `n` nodes close to `target`, without any network traffic.
    ///
    /// Walks buckets outward from the bucket `target` falls in: that bucket first, then
    /// the nearer ones, then the more remote ones, sampling each bucket at random
    /// until `n` nodes are collected. The result is sorted by distance to `target`.
    pub fn closest_local(&self, target: &Id, n: usize) -> Vec<PeerRecord> {
        let mut result = Vec::with_capacity(n);

        if n == 0 {
            return result;
        }

        let start = self.id.bucket_index(target).unwrap_or(MAX_DISTANCE - 1);

        for index in (start..MAX_DISTANCE).chain((0..start).rev()) {
            if let Some(bucket) = self.bucket(index) {
                result.extend(bucket.sample(n - result.len()));

                if result.len() >= n {
                    break;
                }
            }
        }

        result.sort_by_key(|node| node.id().distance(target));
        result
    }

    /// Up to K (as in k-bucket) of the `candidates` closest to `target`, see [k_closest].
    pub fn k_closest(&self, target: &Id, candidates: Vec<PeerRecord>) -> Vec<PeerRecord> {
        k_closest(target, candidates, self.config.k)
    }

    /// Exactly the K closest nodes to `target` in this table, used to answer
    /// incoming FIND_NODE requests.
    pub fn closest(&self, target: &Id) -> Box<[PeerRecord]> {
        let mut closest = ClosestNodes::new(*target);

        for node in self.nodes() {
            closest.add(node.clone());
        }

        closest.truncate(self.config.k);

        closest.into_iter().collect()
    }

    /// Returns `true` if this routing table is empty.
    pub fn is_empty(&self) -> bool {
        self.nearest.is_none()
    }

    /// Return the number of nodes in this routing table.
    pub fn size(&self) -> usize {
        self.buckets
            .iter()
            .flatten()
            .fold(0, |acc, bucket| acc + bucket.len())
    }

    /// Returns an iterator over the nodes in this routing table, from the most
    /// remote bucket to the nearest.
    pub fn nodes(&self) -> impl Iterator<Item = &PeerRecord> + '_ {
        self.buckets.iter().flatten().flat_map(|bucket| bucket.iter())
    }

    /// Export an owned vector of nodes from this routing table.
    pub fn to_owned_nodes(&self) -> Vec<PeerRecord> {
        self.nodes().cloned().collect()
    }

    /// Empty every bucket.
    pub fn clear(&mut self) {
        for bucket in self.buckets.iter_mut().flatten() {
            bucket.clear();
        }

        self.nearest = None;
    }

    // === Maintenance ===

    /// Refresh every bucket whose refresh deadline has passed, returns the number
    /// of refreshed buckets.
    pub fn refresh_due<C: AliveChecker + ?Sized>(&mut self, checker: &C) -> usize {
        self.refresh_due_at(Instant::now(), checker)
    }

    pub fn refresh_due_at<C: AliveChecker + ?Sized>(&mut self, now: Instant, checker: &C) -> usize {
        let mut refreshed = 0;

        for bucket in self.buckets.iter_mut().flatten() {
            if bucket.refresh_if_due_at(now, checker) {
                refreshed += 1;
            }
        }

        self.recompute_nearest();

        refreshed
    }

    /// Least recently seen nodes of the buckets due for a refresh, to be probed
    /// and passed to [Self::apply_refresh].
    ///
    /// Empty buckets due for a refresh have their deadline reset right away.
    pub fn due_refreshes(&mut self, now: Instant) -> Vec<(u8, PeerRecord)> {
        let mut due = Vec::new();

        for (index, slot) in self.buckets.iter_mut().enumerate() {
            if let Some(bucket) = slot {
                if !bucket.is_refresh_due(now) {
                    continue;
                }

                match bucket.front() {
                    Some(front) => due.push((index as u8, front.clone())),
                    None => bucket.reset_refresh(now),
                }
            }
        }

        due
    }

    pub fn apply_refresh(&mut self, index: u8, front_id: &Id, alive: bool, now: Instant) {
        if let Some(Some(bucket)) = self.buckets.get_mut(index as usize) {
            bucket.apply_refresh(front_id, alive, now);
        }

        self.update_nearest(index);
    }

    // === Private Methods ===

    /// Keep the nearest bucket cache valid after mutating the bucket at `index`.
    fn update_nearest(&mut self, index: u8) {
        let occupied = self.bucket(index).map(|b| !b.is_empty()).unwrap_or(false);

        if occupied {
            self.nearest = self.nearest.max(Some(index));
        } else if self.nearest == Some(index) {
            self.recompute_nearest();
        }
    }

    fn recompute_nearest(&mut self) {
        self.nearest = (0..MAX_DISTANCE)
            .rev()
            .find(|index| self.bucket(*index).map(|b| !b.is_empty()).unwrap_or(false));
    }
}
