//! Routing table shared between a lookup engine and whatever answers incoming requests.

use std::{
    fmt::{self, Debug, Formatter},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Instant,
};

use tracing::debug;

use crate::capabilities::{probe, AliveChecker};
use crate::common::{Admission, Id, PeerRecord, RoutingTable};
use crate::config::TableConfig;
use crate::Result;

#[derive(Clone)]
/// Cloneable handle to a [RoutingTable] behind a lock, owning the [AliveChecker]
/// used to probe full buckets.
///
/// Liveness probes never run while the lock is held: insertion into a full bucket
/// is admitted under the lock, probed without it, then resolved under it again.
pub struct SharedRoutingTable {
    inner: Arc<Mutex<RoutingTable>>,
    checker: Arc<dyn AliveChecker>,
}

impl SharedRoutingTable {
    pub fn new<C: AliveChecker + 'static>(id: Id, checker: C) -> Self {
        Self::from_table(RoutingTable::new(id), checker)
    }

    pub fn with_config<C: AliveChecker + 'static>(id: Id, config: TableConfig, checker: C) -> Self {
        Self::from_table(RoutingTable::with_config(id, config), checker)
    }

    /// Share an already populated [RoutingTable].
    pub fn from_table<C: AliveChecker + 'static>(table: RoutingTable, checker: C) -> Self {
        SharedRoutingTable {
            inner: Arc::new(Mutex::new(table)),
            checker: Arc::new(checker),
        }
    }

    // === Getters ===

    pub fn id(&self) -> Id {
        *self.lock().id()
    }

    pub fn config(&self) -> TableConfig {
        self.lock().config().clone()
    }

    pub fn contains(&self, id: &Id) -> bool {
        self.lock().contains(id)
    }

    pub fn size(&self) -> usize {
        self.lock().size()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // === Public Methods ===

    /// Add a node to the table, see [RoutingTable::add].
    pub fn add(&self, node: PeerRecord) -> Result<bool> {
        let admission = self.lock().admit(node.clone())?;

        match admission {
            Admission::Full { front } => {
                let alive = probe(self.checker.as_ref(), &front);

                Ok(self.lock().resolve_admission(front.id(), alive, node))
            }
            Admission::Inserted | Admission::Updated => Ok(true),
        }
    }

    pub fn remove(&self, id: &Id) -> Option<PeerRecord> {
        self.lock().remove(id)
    }

    /// See [RoutingTable::closest_local].
    pub fn closest_local(&self, target: &Id, n: usize) -> Vec<PeerRecord> {
        self.lock().closest_local(target, n)
    }

    /// See [RoutingTable::closest].
    pub fn closest(&self, target: &Id) -> Box<[PeerRecord]> {
        self.lock().closest(target)
    }

    /// See [RoutingTable::k_closest].
    pub fn k_closest(&self, target: &Id, candidates: Vec<PeerRecord>) -> Vec<PeerRecord> {
        self.lock().k_closest(target, candidates)
    }

    /// Owned copy of every node in the table.
    pub fn snapshot(&self) -> Vec<PeerRecord> {
        self.lock().to_owned_nodes()
    }

    /// Owned copy of the whole table.
    pub fn to_routing_table(&self) -> RoutingTable {
        self.lock().clone()
    }

    pub fn clear(&self) {
        self.lock().clear()
    }

    /// Probe the least recently seen node of every bucket due for a refresh,
    /// returns the number of probed nodes.
    pub fn refresh_due_buckets(&self) -> usize {
        let now = Instant::now();
        let due = self.lock().due_refreshes(now);

        if due.is_empty() {
            return 0;
        }

        let outcomes: Vec<(u8, PeerRecord, bool)> = due
            .into_iter()
            .map(|(index, front)| {
                let alive = probe(self.checker.as_ref(), &front);
                (index, front, alive)
            })
            .collect();

        let probed = outcomes.len();

        let mut table = self.lock();
        for (index, front, alive) in outcomes {
            table.apply_refresh(index, front.id(), alive, now);
        }

        debug!(probed, size = table.size(), "Refreshed routing table buckets");

        probed
    }

    // === Private Methods ===

    /// Every critical section leaves the table consistent, so a panic elsewhere
    /// does not make it unusable.
    fn lock(&self) -> MutexGuard<'_, RoutingTable> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Debug for SharedRoutingTable {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let table = self.lock();

        f.debug_struct("SharedRoutingTable")
            .field("id", table.id())
            .field("size", &table.size())
            .finish()
    }
}
