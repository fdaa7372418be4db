//! The tree materialization engine.
//!
//! [`TreeModel`] owns the node store and the insertion queue, drains worker
//! results on a periodic tick, deduplicates arrivals, and exposes the
//! addressable (parent, row, column) contract. The thread that owns the
//! model is the only one that ever mutates the tree; workers communicate
//! exclusively through the insertion queue.

mod list;
mod metrics;
mod queue;
mod worker;

pub use list::ListModel;
pub use metrics::EngineMetrics;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{ModelError, Result};
use crate::generator::ItemGenerator;
use crate::model::{DataRole, EntityId, GeneratedItem, NodeState, Value};
use crate::store::{NodeStore, SlotId};
use queue::{InsertionQueue, QueueEvent};
use worker::{ExpandJob, WorkerPool};

/// Stable address of one materialized cell: a node handle plus a column.
///
/// Handles survive unrelated mutations but go stale when a new generator is
/// installed; stale handles surface as [`ModelError::StaleHandle`], never as
/// a row of the fresh tree.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct ModelIndex {
    pub(crate) slot: SlotId,
    /// The addressed column.
    pub column: usize,
}

/// Structural change notification, drained by the consumer after each tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelEvent {
    /// A generator install or on-demand expansion began producing results.
    RequestStarted,
    /// Every scheduled worker finished and the queue is drained.
    RequestFinished,
    /// Rows `first..=last` were appended under `parent` (`None` for the
    /// root) in one contiguous range.
    RowsInserted {
        /// Parent the rows were appended under; `None` for top level.
        parent: Option<ModelIndex>,
        /// First inserted row index.
        first: usize,
        /// Last inserted row index.
        last: usize,
    },
}

/// Incremental, deduplicated tree materialization over a caller-supplied
/// item generator.
pub struct TreeModel {
    config: Config,
    store: NodeStore,
    queue: InsertionQueue,
    backlog: VecDeque<QueueEvent>,
    pool: WorkerPool,
    epoch: Arc<AtomicU64>,
    generator: Option<Arc<dyn ItemGenerator>>,
    columns: usize,
    outstanding: usize,
    active: bool,
    events: Vec<ModelEvent>,
    metrics: EngineMetrics,
}

impl TreeModel {
    /// Creates an empty model with its worker pool already running.
    pub fn new(config: Config) -> Self {
        let queue = InsertionQueue::new();
        let epoch = Arc::new(AtomicU64::new(0));
        let pool = WorkerPool::spawn(
            config.worker_threads,
            Arc::clone(&epoch),
            queue.sender(),
            config.worker_batch,
        );
        Self {
            config,
            store: NodeStore::new(),
            queue,
            backlog: VecDeque::new(),
            pool,
            epoch,
            generator: None,
            columns: 0,
            outstanding: 0,
            active: false,
            events: Vec::new(),
            metrics: EngineMetrics::default(),
        }
    }

    /// Installs `generator`, discarding the whole previous tree and every
    /// in-flight result, and schedules a root expansion to the generator's
    /// declared initial depth. Never blocks.
    pub fn install_generator(&mut self, generator: Arc<dyn ItemGenerator>) {
        let depth = generator.initial_depth();
        self.install_with_depth(generator, depth);
    }

    pub(crate) fn install_with_depth(&mut self, generator: Arc<dyn ItemGenerator>, depth: u32) {
        let epoch = self.bump_epoch();
        self.queue.drain();
        self.backlog.clear();
        self.store.reset();
        self.outstanding = 0;
        self.metrics = EngineMetrics::default();
        self.columns = generator.column_count();
        self.generator = Some(Arc::clone(&generator));

        if self.active {
            self.events.push(ModelEvent::RequestFinished);
        }
        self.active = true;
        self.events.push(ModelEvent::RequestStarted);
        info!(epoch, depth, columns = self.columns, "engine.install");

        let root = self.store.root();
        self.store.set_state(root, NodeState::Opening);
        self.outstanding += 1;
        self.metrics.workers_scheduled += 1;
        self.pool.submit(ExpandJob {
            generator,
            parent: None,
            depth,
            epoch,
        });
    }

    /// Invalidates every in-flight worker and queued result. The already
    /// materialized tree is kept. Never blocks; running generator calls
    /// notice the new epoch at their next item boundary.
    pub fn cancel_running_request(&mut self) {
        let epoch = self.bump_epoch();
        self.queue.drain();
        self.backlog.clear();
        self.outstanding = 0;
        if self.active {
            self.active = false;
            self.events.push(ModelEvent::RequestFinished);
        }
        info!(epoch, "engine.cancel");
    }

    /// Schedules one expansion worker for an `Unopened` node, revealing up
    /// to `depth` levels below it. Requests on `Opening`, `Opened`, or
    /// `Duplicate` nodes (and `depth` 0) are no-ops answered with
    /// `Ok(false)`.
    pub fn expand(&mut self, index: ModelIndex, depth: u32) -> Result<bool> {
        let generator = self
            .generator
            .clone()
            .ok_or_else(|| ModelError::InvalidArgument("no generator installed".into()))?;
        let node = self.store.node(index.slot).ok_or(ModelError::StaleHandle)?;
        if depth == 0 || node.state != NodeState::Unopened {
            return Ok(false);
        }
        let item = node.item.clone();
        let epoch = self.epoch.load(Ordering::Acquire);

        self.store.set_state(index.slot, NodeState::Opening);
        if !self.active {
            self.active = true;
            self.events.push(ModelEvent::RequestStarted);
        }
        self.outstanding += 1;
        self.metrics.workers_scheduled += 1;
        self.pool.submit(ExpandJob {
            generator,
            parent: Some(item),
            depth: depth - 1,
            epoch,
        });
        Ok(true)
    }

    /// Resolves a handle to the canonical node of its identity class.
    pub fn deduplicate(&mut self, index: ModelIndex) -> Result<ModelIndex> {
        if self.store.node(index.slot).is_none() {
            return Err(ModelError::StaleHandle);
        }
        let rep = self.store.canonicalize(index.slot);
        Ok(ModelIndex {
            slot: rep,
            column: index.column,
        })
    }

    /// Drains queued worker results into the tree, bounded by the drain
    /// batch cap, and emits at most one structural-insert notification per
    /// parent. Returns whether more work is pending, i.e. whether the owner
    /// should reschedule the tick.
    pub fn tick(&mut self) -> bool {
        let cap = self.config.drain_batch_cap.max(1);
        let epoch = self.epoch.load(Ordering::Acquire);
        let mut processed = 0usize;
        let mut saturated = false;
        let mut pending: FxHashMap<SlotId, Vec<SlotId>> = FxHashMap::default();
        let mut flush_order: Vec<SlotId> = Vec::new();

        loop {
            if processed >= cap {
                saturated = true;
                break;
            }
            let event = match self.backlog.pop_front() {
                Some(event) => event,
                None => match self.queue.try_pop() {
                    Some(event) => event,
                    None => break,
                },
            };
            match event {
                QueueEvent::Finished {
                    epoch: ev_epoch,
                    parent,
                } => {
                    if ev_epoch != epoch {
                        continue;
                    }
                    self.outstanding = self.outstanding.saturating_sub(1);
                    if let Some(slot) = self.resolve_parent_entity(parent) {
                        if self.store.node(slot).map(|node| node.state)
                            == Some(NodeState::Opening)
                        {
                            self.store.set_state(slot, NodeState::Opened);
                        }
                    }
                }
                QueueEvent::Items {
                    epoch: ev_epoch,
                    parent,
                    mut items,
                    depth,
                } => {
                    if ev_epoch != epoch {
                        self.metrics.stale_batches_dropped += 1;
                        continue;
                    }
                    let Some(parent_slot) = self.resolve_parent_entity(parent) else {
                        continue;
                    };
                    // Split oversized batches so one tick (and thus one
                    // notification) never exceeds the cap.
                    let budget = cap - processed;
                    if items.len() > budget {
                        let rest = items.split_off(budget);
                        self.backlog.push_front(QueueEvent::Items {
                            epoch: ev_epoch,
                            parent,
                            items: rest,
                            depth,
                        });
                    }
                    for item in items {
                        processed += 1;
                        self.apply_item(item, parent_slot, depth, epoch, &mut pending, &mut flush_order);
                    }
                }
            }
        }

        for parent_slot in flush_order {
            let rows = pending.remove(&parent_slot).unwrap_or_default();
            if rows.is_empty() {
                continue;
            }
            let (first, last) = self.store.append_children(parent_slot, &rows);
            let parent = (parent_slot != self.store.root()).then_some(ModelIndex {
                slot: parent_slot,
                column: 0,
            });
            self.events.push(ModelEvent::RowsInserted {
                parent,
                first,
                last,
            });
            self.metrics.notifications_emitted += 1;
        }

        self.metrics.ticks += 1;
        if processed > 0 {
            debug!(processed, outstanding = self.outstanding, "engine.tick.drained");
        }

        let more = saturated || self.outstanding > 0;
        if !more && self.active {
            self.active = false;
            self.events.push(ModelEvent::RequestFinished);
            debug!(epoch, nodes = self.store.len(), "engine.request.finished");
        }
        more
    }

    /// Applies one drained item under `parent_slot`: interns it, resolves
    /// aliasing, buffers the resulting row, and schedules a child expansion
    /// when the node is canonical and budget remains.
    fn apply_item(
        &mut self,
        item: GeneratedItem,
        parent_slot: SlotId,
        depth: u32,
        epoch: u64,
        pending: &mut FxHashMap<SlotId, Vec<SlotId>>,
        flush_order: &mut Vec<SlotId>,
    ) {
        self.metrics.items_drained += 1;
        let Some(entity) = item.entity else {
            self.metrics.unresolved_items_skipped += 1;
            return;
        };
        let alias = item.aliased;

        let (slot, created) = self.store.intern(entity, item.clone());
        if let Some(alias) = alias {
            self.store.link_alias(entity, alias);
        }
        // A pending alias or the link above may have demoted the fresh node,
        // so the state is re-read after both steps.
        let state = self
            .store
            .node(slot)
            .map(|node| node.state)
            .unwrap_or(NodeState::Duplicate);

        let row_slot = if created {
            if state == NodeState::Unopened && depth > 0 {
                if let Some(generator) = self.generator.clone() {
                    self.store.set_state(slot, NodeState::Opening);
                    self.outstanding += 1;
                    self.metrics.workers_scheduled += 1;
                    self.pool.submit(ExpandJob {
                        generator,
                        parent: Some(item),
                        depth: depth - 1,
                        epoch,
                    });
                }
            } else if state == NodeState::Duplicate {
                self.metrics.duplicates_detected += 1;
            }
            slot
        } else {
            self.metrics.duplicates_detected += 1;
            self.store.new_duplicate(entity, item, slot)
        };

        if !pending.contains_key(&parent_slot) {
            flush_order.push(parent_slot);
        }
        pending.entry(parent_slot).or_default().push(row_slot);
    }

    /// Ticks until the current request finishes or `timeout` elapses.
    /// Returns whether the request finished. Intended for headless
    /// consumers and tests; UI owners reschedule [`tick`](Self::tick) from
    /// their own event loop instead.
    pub fn run_until_idle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let more = self.tick();
            if !more && !self.active {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(self.config.tick_interval);
        }
    }

    /// Drains the structural-change notifications accumulated since the
    /// last call.
    pub fn take_events(&mut self) -> Vec<ModelEvent> {
        std::mem::take(&mut self.events)
    }

    /// Whether a request is currently producing results.
    pub fn is_request_running(&self) -> bool {
        self.active
    }

    /// The current cancellation epoch. Incremented exactly once per
    /// [`install_generator`](Self::install_generator) or
    /// [`cancel_running_request`](Self::cancel_running_request) call.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Engine counters for the current request.
    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    /// The handle addressing `(row, column)` under `parent` (`None` for the
    /// top level).
    pub fn index(
        &self,
        row: usize,
        column: usize,
        parent: Option<ModelIndex>,
    ) -> Result<ModelIndex> {
        if column >= self.columns.max(1) {
            return Err(ModelError::ColumnOutOfRange(column));
        }
        let parent_slot = self.resolve_parent_index(parent)?;
        let node = self
            .store
            .node(parent_slot)
            .ok_or(ModelError::StaleHandle)?;
        let slot = node
            .children
            .get(row)
            .copied()
            .ok_or(ModelError::NotFound("row"))?;
        Ok(ModelIndex { slot, column })
    }

    /// The parent handle of `index`, `None` when its parent is the root.
    pub fn parent(&self, index: ModelIndex) -> Result<Option<ModelIndex>> {
        let node = self.store.node(index.slot).ok_or(ModelError::StaleHandle)?;
        match node.parent {
            Some(parent) if parent != self.store.root() => Ok(Some(ModelIndex {
                slot: parent,
                column: 0,
            })),
            _ => Ok(None),
        }
    }

    /// The row index of `index` among its siblings.
    pub fn row(&self, index: ModelIndex) -> Result<usize> {
        let node = self.store.node(index.slot).ok_or(ModelError::StaleHandle)?;
        Ok(node.row)
    }

    /// Number of materialized children under `parent` (`None` for the top
    /// level).
    pub fn row_count(&self, parent: Option<ModelIndex>) -> Result<usize> {
        let slot = self.resolve_parent_index(parent)?;
        let node = self.store.node(slot).ok_or(ModelError::StaleHandle)?;
        Ok(node.children.len())
    }

    /// Number of data columns of the installed generator.
    pub fn column_count(&self) -> usize {
        self.columns
    }

    /// Title of `column`, if a generator is installed and the column exists.
    pub fn column_title(&self, column: usize) -> Option<String> {
        if column >= self.columns {
            return None;
        }
        self.generator
            .as_ref()
            .map(|generator| generator.column_title(column))
    }

    /// Answers `role` for the addressed cell.
    pub fn data(&self, index: ModelIndex, role: DataRole) -> Result<Value> {
        let node = self.store.node(index.slot).ok_or(ModelError::StaleHandle)?;
        match role {
            DataRole::Display => {
                if index.column >= self.columns.max(1) {
                    return Err(ModelError::ColumnOutOfRange(index.column));
                }
                let text = node
                    .item
                    .cell(index.column)
                    .map(|cell| cell.display().to_string())
                    .unwrap_or_default();
                Ok(Value::Text(text))
            }
            DataRole::RichDisplay => {
                if index.column >= self.columns.max(1) {
                    return Err(ModelError::ColumnOutOfRange(index.column));
                }
                match node.item.cell(index.column) {
                    Some(crate::model::CellValue::Rich(rich)) => Ok(Value::Rich(rich.clone())),
                    _ => Ok(Value::None),
                }
            }
            DataRole::Tooltip => {
                let mut lines = Vec::with_capacity(self.columns);
                for column in 0..self.columns {
                    let title = self
                        .generator
                        .as_ref()
                        .map(|generator| generator.column_title(column))
                        .unwrap_or_default();
                    let text = node
                        .item
                        .cell(column)
                        .map(|cell| cell.display())
                        .unwrap_or("");
                    lines.push(format!("{title}: {text}"));
                }
                Ok(Value::Text(lines.join("\n")))
            }
            DataRole::Entity => Ok(Value::Entity(node.entity)),
            DataRole::CanExpand => {
                let can = match node.state {
                    NodeState::Unopened | NodeState::Opening => true,
                    NodeState::Opened => !node.children.is_empty(),
                    NodeState::Duplicate => false,
                };
                Ok(Value::Bool(can))
            }
            DataRole::IsDuplicate => Ok(Value::Bool(node.state == NodeState::Duplicate)),
        }
    }

    /// Tick interval the convenience driver sleeps between ticks.
    pub fn tick_interval(&self) -> Duration {
        self.config.tick_interval
    }

    fn bump_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn resolve_parent_index(&self, parent: Option<ModelIndex>) -> Result<SlotId> {
        match parent {
            None => Ok(self.store.root()),
            Some(index) => {
                if self.store.node(index.slot).is_none() {
                    return Err(ModelError::StaleHandle);
                }
                Ok(index.slot)
            }
        }
    }

    /// Maps a queued parent reference back to the node it addresses; the
    /// canonical node absorbs results even when the scheduled node was
    /// demoted by a later alias.
    fn resolve_parent_entity(&mut self, parent: Option<EntityId>) -> Option<SlotId> {
        match parent {
            None => Some(self.store.root()),
            Some(entity) => self.store.canonical_slot(entity),
        }
    }
}

impl std::fmt::Debug for TreeModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeModel")
            .field("nodes", &self.store.len())
            .field("outstanding", &self.outstanding)
            .field("active", &self.active)
            .field("epoch", &self.epoch())
            .finish()
    }
}
