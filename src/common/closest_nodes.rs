use std::vec::IntoIter;

use crate::common::{Distance, Id, PeerRecord};

#[derive(Debug, Clone)]
/// Peers sorted by their distance to a target, without duplicate ids.
pub struct ClosestNodes {
    target: Id,
    nodes: Vec<PeerRecord>,
}

impl ClosestNodes {
    pub fn new(target: Id) -> Self {
        Self {
            target,
            nodes: Vec::with_capacity(200),
        }
    }

    // === Getters ===

    pub fn target(&self) -> Id {
        self.target
    }

    pub fn nodes(&self) -> &[PeerRecord] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Distance between the target and the closest node, if any.
    pub fn best_distance(&self) -> Option<Distance> {
        self.nodes.first().map(|node| node.id().distance(&self.target))
    }

    // === Public Methods ===

    /// Insert a node at its position, returns `false` if a node with the same id
    /// is already present.
    pub fn add(&mut self, node: PeerRecord) -> bool {
        let seek = node.id().distance(&self.target);
        let target = self.target;

        // XOR is a bijection, so an equal distance means an equal id.
        match self
            .nodes
            .binary_search_by(|probe| probe.id().distance(&target).cmp(&seek))
        {
            Ok(_) => false,
            Err(pos) => {
                self.nodes.insert(pos, node);
                true
            }
        }
    }

    pub fn contains(&self, id: &Id) -> bool {
        let seek = id.distance(&self.target);
        let target = self.target;

        self.nodes
            .binary_search_by(|probe| probe.id().distance(&target).cmp(&seek))
            .is_ok()
    }

    /// Keep only the `k` closest nodes.
    pub fn truncate(&mut self, k: usize) {
        self.nodes.truncate(k)
    }
}

impl IntoIterator for ClosestNodes {
    type Item = PeerRecord;
    type IntoIter = IntoIter<PeerRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.nodes.into_iter()
    }
}

impl<'a> IntoIterator for &'a ClosestNodes {
    type Item = &'a PeerRecord;
    type IntoIter = std::slice::Iter<'a, PeerRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.nodes.iter()
    }
}

/// Select the `k` candidates closest to `target`, in ascending distance.
///
/// Partial selection: the closest remaining candidate is picked `k` times, ties keep
/// their original relative order. Candidates are returned untouched (in their
/// original order) if there are no more than `k` of them.
pub fn k_closest(target: &Id, mut candidates: Vec<PeerRecord>, k: usize) -> Vec<PeerRecord> {
    if candidates.len() <= k {
        return candidates;
    }

    for j in 0..k {
        let mut closest = j;
        let mut closest_distance = candidates[j].id().distance(target);

        for (i, candidate) in candidates.iter().enumerate().skip(j + 1) {
            let distance = candidate.id().distance(target);

            if distance < closest_distance {
                closest = i;
                closest_distance = distance;
            }
        }

        // Rotating instead of swapping keeps the order of the remaining candidates.
        candidates[j..=closest].rotate_right(1);
    }

    candidates.truncate(k);
    candidates
}

/// The candidate closest to `target` and its distance, `None` if there are no candidates.
pub fn closest_of(target: &Id, candidates: &[PeerRecord]) -> Option<(PeerRecord, Distance)> {
    candidates
        .iter()
        .map(|node| (node, node.id().distance(target)))
        .min_by_key(|(_, distance)| *distance)
        .map(|(node, distance)| (node.clone(), distance))
}
