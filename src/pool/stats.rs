//! Handle pool statistics tracking

/// Snapshot of a handle pool's usage
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Number of slots in the pool
    pub capacity: usize,
    /// Objects currently alive
    pub live: usize,
    /// Peak number of objects alive simultaneously
    pub peak_live: usize,
    /// Total number of successful creates
    pub total_creates: u64,
    /// Total number of destroys (including takes)
    pub total_destroys: u64,
    /// Creates refused because the pool was full
    pub exhausted: u64,
}

impl PoolStats {
    /// Create statistics for a pool with the given capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ..Default::default()
        }
    }

    /// Record a successful create
    pub(crate) fn record_create(&mut self) {
        self.total_creates += 1;
        self.live += 1;
        self.peak_live = self.peak_live.max(self.live);
    }

    /// Record a destroy
    pub(crate) fn record_destroy(&mut self) {
        self.total_destroys += 1;
        self.live -= 1;
    }

    /// Record a create refused with `Exhausted`
    pub(crate) fn record_exhausted(&mut self) {
        self.exhausted += 1;
    }

    /// Pool utilization (0.0 to 1.0)
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        self.live as f64 / self.capacity as f64
    }

    /// Get a summary string of the statistics
    pub fn summary(&self) -> String {
        format!(
            "PoolStats {{ live: {}/{}, peak: {}, creates: {}, destroys: {}, exhausted: {} }}",
            self.live,
            self.capacity,
            self.peak_live,
            self.total_creates,
            self.total_destroys,
            self.exhausted
        )
    }
}
