//! Engine observability counters.

/// Running totals maintained by the drain tick. Reset on generator install.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineMetrics {
    /// Items popped from the insertion queue and applied (or skipped).
    pub items_drained: u64,
    /// Whole batches dropped because their epoch was superseded.
    pub stale_batches_dropped: u64,
    /// Items skipped for lack of a resolvable entity id.
    pub unresolved_items_skipped: u64,
    /// Rows materialized as duplicates of an earlier canonical node.
    pub duplicates_detected: u64,
    /// Expansion workers scheduled.
    pub workers_scheduled: u64,
    /// Drain ticks executed.
    pub ticks: u64,
    /// Structural-insert notifications emitted.
    pub notifications_emitted: u64,
}
