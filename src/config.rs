use std::time::Duration;

/// K = the default maximum size of a k-bucket, and the default size of a lookup's shortlist.
pub const DEFAULT_K: usize = 20;
/// Default number of peers queried concurrently in one lookup round.
pub const DEFAULT_ALPHA: usize = 3;
/// Default period between two liveness refreshes of the same k-bucket.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(10 * 60);
/// Default upper bound of rounds in a single lookup.
pub const DEFAULT_MAX_ROUNDS: usize = 32;
/// Default connect timeout of the [crate::TcpAliveChecker].
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
/// Routing table configurations
pub struct TableConfig {
    /// Capacity of each k-bucket.
    ///
    /// Defaults to [DEFAULT_K]
    pub k: usize,
    /// How often each k-bucket probes its least recently seen peer,
    /// when [crate::RoutingTable::refresh_due] is called.
    ///
    /// Defaults to [DEFAULT_REFRESH_INTERVAL]
    pub refresh_interval: Duration,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            k: DEFAULT_K,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
        }
    }
}

impl TableConfig {
    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    pub fn with_refresh_interval(mut self, refresh_interval: Duration) -> Self {
        self.refresh_interval = refresh_interval;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// How a lookup round picks the peers to query among the unqueried shortlist.
pub enum SelectionStrategy {
    /// Uniformly random, spreads the load instead of always hammering the same peers.
    #[default]
    Random,
    /// Lowest measured round trip time first, peers without a measurement last.
    LatencyRanked,
    /// Closest to the target first.
    Closest,
}

#[derive(Debug, Clone)]
/// Lookup configurations
pub struct LookupConfig {
    /// Size of the shortlist, and so of the returned closest peers.
    ///
    /// Defaults to [DEFAULT_K]
    pub k: usize,
    /// Number of peers queried concurrently in each round.
    ///
    /// Defaults to [DEFAULT_ALPHA]
    pub alpha: usize,
    /// Maximum number of rounds, guards against peers that keep answering
    /// with new but never closer nodes.
    ///
    /// Defaults to [DEFAULT_MAX_ROUNDS]
    pub max_rounds: usize,
    /// How long a round waits for a single query before counting it as failed.
    ///
    /// Defaults to None, where the [crate::FindNode] implementation is trusted
    /// to time out on its own.
    pub query_timeout: Option<Duration>,
    /// Deadline of the whole lookup, after which the best peers found so far are returned.
    ///
    /// Defaults to None
    pub timeout: Option<Duration>,
    /// Defaults to [SelectionStrategy::Random]
    pub strategy: SelectionStrategy,
    /// Once a round fails to get closer to the target, keep querying the rest
    /// of the shortlist for up to ⌈k/alpha⌉ more rounds before returning.
    /// These rounds count against `max_rounds`.
    ///
    /// Defaults to true
    pub final_sweep: bool,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            k: DEFAULT_K,
            alpha: DEFAULT_ALPHA,
            max_rounds: DEFAULT_MAX_ROUNDS,
            query_timeout: None,
            timeout: None,
            strategy: SelectionStrategy::default(),
            final_sweep: true,
        }
    }
}

impl LookupConfig {
    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    pub fn with_alpha(mut self, alpha: usize) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = Some(timeout);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_strategy(mut self, strategy: SelectionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_final_sweep(mut self, final_sweep: bool) -> Self {
        self.final_sweep = final_sweep;
        self
    }
}
