//! End-to-end tests of the tree materialization engine: eager expansion,
//! dedup, cancellation, and notification batching.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use arbor::{
    Config, DataRole, EntityId, GeneratedItem, ItemGenerator, ItemStream, ModelError, ModelEvent,
    TreeModel,
};

const TIMEOUT: Duration = Duration::from_secs(10);

/// Static call graph over named entities. Entity ids are assigned in
/// registration order, starting at 1.
struct StaticTree {
    names: Vec<&'static str>,
    roots: Vec<usize>,
    children: HashMap<usize, Vec<usize>>,
    depth: u32,
}

impl StaticTree {
    fn new(roots: &[&'static str], edges: &[(&'static str, &'static str)], depth: u32) -> Self {
        let mut names: Vec<&'static str> = Vec::new();
        let mut ids: HashMap<&'static str, usize> = HashMap::new();
        let mut id_of = |name: &'static str, names: &mut Vec<&'static str>| -> usize {
            *ids.entry(name).or_insert_with(|| {
                names.push(name);
                names.len() - 1
            })
        };
        let root_ids: Vec<usize> = roots.iter().map(|&name| id_of(name, &mut names)).collect();
        let mut children: HashMap<usize, Vec<usize>> = HashMap::new();
        for &(parent, child) in edges {
            let parent = id_of(parent, &mut names);
            let child = id_of(child, &mut names);
            children.entry(parent).or_default().push(child);
        }
        Self {
            names,
            roots: root_ids,
            children,
            depth,
        }
    }

    fn item(&self, id: usize) -> GeneratedItem {
        GeneratedItem::new(EntityId(id as u64 + 1)).with_cell(self.names[id])
    }

    fn id_of_entity(&self, entity: Option<EntityId>) -> Option<usize> {
        match entity {
            Some(EntityId(raw)) if raw > 0 => Some((raw - 1) as usize),
            _ => None,
        }
    }
}

impl ItemGenerator for StaticTree {
    fn column_count(&self) -> usize {
        1
    }

    fn column_title(&self, _column: usize) -> String {
        "Name".to_string()
    }

    fn roots(&self) -> ItemStream {
        let items: Vec<GeneratedItem> = self.roots.iter().map(|&id| self.item(id)).collect();
        Box::new(items.into_iter())
    }

    fn children(&self, parent: &GeneratedItem) -> ItemStream {
        let Some(id) = self.id_of_entity(parent.entity) else {
            return Box::new(std::iter::empty());
        };
        let items: Vec<GeneratedItem> = self
            .children
            .get(&id)
            .map(|kids| kids.iter().map(|&kid| self.item(kid)).collect())
            .unwrap_or_default();
        Box::new(items.into_iter())
    }

    fn initial_depth(&self) -> u32 {
        self.depth
    }
}

/// Reusable open/close latch for blocking a generator mid-traversal.
#[derive(Clone, Default)]
struct Gate(Arc<(Mutex<bool>, Condvar)>);

impl Gate {
    fn open(&self) {
        let (lock, cvar) = &*self.0;
        *lock.lock().unwrap() = true;
        cvar.notify_all();
    }

    fn wait(&self) {
        let (lock, cvar) = &*self.0;
        let mut open = lock.lock().unwrap();
        while !*open {
            open = cvar.wait(open).unwrap();
        }
    }
}

/// A [`StaticTree`] whose `children` call for one parent blocks on a gate
/// after yielding `block_after` items.
struct GatedTree {
    base: StaticTree,
    gate: Gate,
    gated_parent: &'static str,
    block_after: usize,
}

impl ItemGenerator for GatedTree {
    fn column_count(&self) -> usize {
        self.base.column_count()
    }

    fn column_title(&self, column: usize) -> String {
        self.base.column_title(column)
    }

    fn roots(&self) -> ItemStream {
        self.base.roots()
    }

    fn children(&self, parent: &GeneratedItem) -> ItemStream {
        let gated = self
            .base
            .id_of_entity(parent.entity)
            .map(|id| self.base.names[id] == self.gated_parent)
            .unwrap_or(false);
        if !gated {
            return self.base.children(parent);
        }
        let items: Vec<GeneratedItem> = self.base.children(parent).collect();
        Box::new(GatedIter {
            items: items.into_iter(),
            gate: self.gate.clone(),
            block_after: self.block_after,
            yielded: 0,
            blocked: false,
        })
    }

    fn initial_depth(&self) -> u32 {
        self.base.initial_depth()
    }
}

struct GatedIter {
    items: std::vec::IntoIter<GeneratedItem>,
    gate: Gate,
    block_after: usize,
    yielded: usize,
    blocked: bool,
}

impl Iterator for GatedIter {
    type Item = GeneratedItem;

    fn next(&mut self) -> Option<GeneratedItem> {
        if self.yielded == self.block_after && !self.blocked {
            self.blocked = true;
            self.gate.wait();
        }
        self.yielded += 1;
        self.items.next()
    }
}

fn display(model: &TreeModel, index: arbor::ModelIndex) -> String {
    model
        .data(index, DataRole::Display)
        .ok()
        .and_then(|value| value.as_text().map(str::to_string))
        .unwrap_or_default()
}

fn is_duplicate(model: &TreeModel, index: arbor::ModelIndex) -> bool {
    model
        .data(index, DataRole::IsDuplicate)
        .ok()
        .and_then(|value| value.as_bool())
        .unwrap_or(false)
}

/// Ticks the model until `predicate` holds or the timeout elapses.
fn tick_until(model: &mut TreeModel, predicate: impl Fn(&TreeModel) -> bool) {
    let deadline = Instant::now() + TIMEOUT;
    while !predicate(model) {
        assert!(Instant::now() < deadline, "condition not reached in time");
        model.tick();
        thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn recursive_call_hierarchy_marks_duplicate() -> arbor::Result<()> {
    let generator = StaticTree::new(
        &["free"],
        &[
            ("free", "recursiveFreeCaller"),
            ("recursiveFreeCaller", "nestedFreeCaller5"),
            ("recursiveFreeCaller", "recursiveFreeCaller"),
        ],
        4,
    );
    let mut model = TreeModel::new(Config::default());
    model.install_generator(Arc::new(generator));
    assert!(model.run_until_idle(TIMEOUT));

    assert_eq!(model.row_count(None)?, 1);
    let free = model.index(0, 0, None)?;
    assert_eq!(display(&model, free), "free");

    assert_eq!(model.row_count(Some(free))?, 1);
    let caller = model.index(0, 0, Some(free))?;
    assert_eq!(display(&model, caller), "recursiveFreeCaller");
    assert!(!is_duplicate(&model, caller));

    assert_eq!(model.row_count(Some(caller))?, 2);
    let nested = model.index(0, 0, Some(caller))?;
    let duplicate = model.index(1, 0, Some(caller))?;
    assert_eq!(display(&model, nested), "nestedFreeCaller5");
    assert_eq!(display(&model, duplicate), "recursiveFreeCaller");
    assert!(is_duplicate(&model, duplicate));

    // The duplicate resolves back to the first recursiveFreeCaller node.
    assert_eq!(model.deduplicate(duplicate)?.column, 0);
    assert_eq!(model.deduplicate(duplicate)?, caller);

    // Expanding the duplicate is a no-op and reveals nothing.
    assert!(!model.expand(duplicate, 1)?);
    assert_eq!(model.row_count(Some(duplicate))?, 0);
    Ok(())
}

#[test]
fn expand_is_idempotent_while_opening_and_after() -> arbor::Result<()> {
    let gate = Gate::default();
    let generator = GatedTree {
        base: StaticTree::new(&["a"], &[("a", "b"), ("a", "c")], 0),
        gate: gate.clone(),
        gated_parent: "a",
        block_after: 0,
    };
    let mut model = TreeModel::new(Config::default());
    model.install_generator(Arc::new(generator));
    assert!(model.run_until_idle(TIMEOUT));
    assert_eq!(model.metrics().workers_scheduled, 1);

    let a = model.index(0, 0, None)?;
    assert_eq!(model.data(a, DataRole::CanExpand)?.as_bool(), Some(true));

    assert!(model.expand(a, 1)?);
    assert!(!model.expand(a, 1)?, "second expand while Opening must no-op");
    assert_eq!(model.metrics().workers_scheduled, 2);

    gate.open();
    assert!(model.run_until_idle(TIMEOUT));
    assert_eq!(model.row_count(Some(a))?, 2);

    assert!(!model.expand(a, 1)?, "expand on Opened must no-op");
    assert_eq!(model.metrics().workers_scheduled, 2);
    assert_eq!(model.row_count(Some(a))?, 2);
    Ok(())
}

#[test]
fn generator_swap_under_load_resets_cleanly() -> arbor::Result<()> {
    let gate = Gate::default();
    let first = GatedTree {
        base: StaticTree::new(&["g1root"], &[("g1root", "g1a"), ("g1root", "g1b")], 1),
        gate: gate.clone(),
        gated_parent: "g1root",
        block_after: 1,
    };
    let mut model = TreeModel::new(Config::default());
    model.install_generator(Arc::new(first));

    // Wait until g1's root is materialized; its children worker is now
    // blocked mid-traversal on the gate.
    tick_until(&mut model, |model| {
        model.row_count(None).unwrap_or(0) == 1
    });
    let stale_root = model.index(0, 0, None)?;

    let second = StaticTree::new(&["g2root"], &[], 1);
    model.install_generator(Arc::new(second));
    gate.open();
    assert!(model.run_until_idle(TIMEOUT));

    assert_eq!(model.row_count(None)?, 1);
    let root = model.index(0, 0, None)?;
    assert_eq!(display(&model, root), "g2root");
    assert_eq!(model.row_count(Some(root))?, 0);

    // Handles minted before the swap are stale, never aliased into the
    // fresh tree.
    assert!(matches!(
        model.data(stale_root, DataRole::Display),
        Err(ModelError::StaleHandle)
    ));
    Ok(())
}

/// One parent fanning out to `width` children.
struct FanOut {
    width: usize,
}

impl ItemGenerator for FanOut {
    fn column_count(&self) -> usize {
        1
    }

    fn column_title(&self, _column: usize) -> String {
        "Name".to_string()
    }

    fn roots(&self) -> ItemStream {
        Box::new(std::iter::once(
            GeneratedItem::new(EntityId(1)).with_cell("parent"),
        ))
    }

    fn children(&self, parent: &GeneratedItem) -> ItemStream {
        if parent.entity != Some(EntityId(1)) {
            return Box::new(std::iter::empty());
        }
        let width = self.width;
        Box::new((0..width).map(|i| {
            GeneratedItem::new(EntityId(i as u64 + 2)).with_cell(format!("child{i}"))
        }))
    }

    fn initial_depth(&self) -> u32 {
        1
    }
}

#[test]
fn wide_parent_produces_capped_notifications() -> arbor::Result<()> {
    let config = Config {
        drain_batch_cap: 150,
        worker_batch: 64,
        ..Config::default()
    };
    let mut model = TreeModel::new(config);
    model.install_generator(Arc::new(FanOut { width: 1000 }));
    assert!(model.run_until_idle(TIMEOUT));

    let parent = model.index(0, 0, None)?;
    assert_eq!(model.row_count(Some(parent))?, 1000);

    let mut covered = 0usize;
    let mut next_row = 0usize;
    let mut notifications = 0usize;
    for event in model.take_events() {
        if let ModelEvent::RowsInserted {
            parent: Some(under),
            first,
            last,
        } = event
        {
            assert_eq!(under, parent);
            assert_eq!(first, next_row, "inserted ranges must be contiguous");
            let width = last - first + 1;
            assert!(width <= 150, "notification spans {width} rows");
            covered += width;
            next_row = last + 1;
            notifications += 1;
        }
    }
    assert_eq!(covered, 1000);
    assert!(notifications >= 7);
    Ok(())
}

#[test]
fn sibling_batches_leave_existing_rows_untouched() -> arbor::Result<()> {
    let generator = StaticTree::new(
        &["p1", "p2"],
        &[
            ("p1", "a"),
            ("p1", "b"),
            ("p2", "c"),
            ("p2", "d"),
            ("a", "e"),
        ],
        1,
    );
    let mut model = TreeModel::new(Config::default());
    model.install_generator(Arc::new(generator));
    assert!(model.run_until_idle(TIMEOUT));

    let p1 = model.index(0, 0, None)?;
    let a = model.index(0, 0, Some(p1))?;
    let b = model.index(1, 0, Some(p1))?;
    let before = (display(&model, a), display(&model, b));

    assert!(model.expand(a, 1)?);
    assert!(model.run_until_idle(TIMEOUT));

    // The new batch under `a` renumbers nothing anywhere else.
    assert_eq!(model.index(0, 0, Some(p1))?, a);
    assert_eq!(model.index(1, 0, Some(p1))?, b);
    assert_eq!((display(&model, a), display(&model, b)), before);
    assert_eq!(model.row(a)?, 0);
    assert_eq!(model.row(b)?, 1);
    assert_eq!(model.row_count(Some(a))?, 1);
    assert_eq!(display(&model, model.index(0, 0, Some(a))?), "e");
    Ok(())
}

#[test]
fn epoch_increments_exactly_once_per_command() {
    let mut model = TreeModel::new(Config::default());
    assert_eq!(model.epoch(), 0);
    model.install_generator(Arc::new(StaticTree::new(&["r"], &[], 0)));
    assert_eq!(model.epoch(), 1);
    model.cancel_running_request();
    assert_eq!(model.epoch(), 2);
    model.cancel_running_request();
    assert_eq!(model.epoch(), 3);
    model.install_generator(Arc::new(StaticTree::new(&["r"], &[], 0)));
    assert_eq!(model.epoch(), 4);
}

#[test]
fn cancel_drops_late_results_without_blocking() -> arbor::Result<()> {
    let gate = Gate::default();
    let generator = GatedTree {
        base: StaticTree::new(&["root"], &[("root", "kid1"), ("root", "kid2")], 1),
        gate: gate.clone(),
        gated_parent: "root",
        block_after: 0,
    };
    let mut model = TreeModel::new(Config::default());
    model.install_generator(Arc::new(generator));
    tick_until(&mut model, |model| {
        model.row_count(None).unwrap_or(0) == 1
    });

    model.cancel_running_request();
    assert!(!model.is_request_running());
    let events = model.take_events();
    assert_eq!(events.last(), Some(&ModelEvent::RequestFinished));

    // Let the blocked worker resume and emit its stale batch.
    gate.open();
    thread::sleep(Duration::from_millis(100));
    for _ in 0..5 {
        model.tick();
        thread::sleep(Duration::from_millis(5));
    }

    let root = model.index(0, 0, None)?;
    assert_eq!(model.row_count(Some(root))?, 0, "stale rows must not land");
    assert!(
        model
            .take_events()
            .iter()
            .all(|event| !matches!(event, ModelEvent::RowsInserted { .. })),
        "no structural notifications after cancellation"
    );
    Ok(())
}

/// Roots containing an item with no resolvable entity.
struct Unresolvable;

impl ItemGenerator for Unresolvable {
    fn column_count(&self) -> usize {
        1
    }

    fn column_title(&self, _column: usize) -> String {
        "Name".to_string()
    }

    fn roots(&self) -> ItemStream {
        Box::new(
            vec![
                GeneratedItem::new(EntityId(1)).with_cell("first"),
                GeneratedItem::default().with_cell("nameless"),
                GeneratedItem::new(EntityId(2)).with_cell("second"),
            ]
            .into_iter(),
        )
    }

    fn initial_depth(&self) -> u32 {
        0
    }
}

#[test]
fn items_without_entity_are_skipped() -> arbor::Result<()> {
    let mut model = TreeModel::new(Config::default());
    model.install_generator(Arc::new(Unresolvable));
    assert!(model.run_until_idle(TIMEOUT));

    assert_eq!(model.row_count(None)?, 2);
    assert_eq!(display(&model, model.index(0, 0, None)?), "first");
    assert_eq!(display(&model, model.index(1, 0, None)?), "second");
    assert_eq!(model.metrics().unresolved_items_skipped, 1);
    Ok(())
}

#[test]
fn request_lifecycle_events_bracket_the_install() -> arbor::Result<()> {
    let mut model = TreeModel::new(Config::default());
    model.install_generator(Arc::new(StaticTree::new(&["r1", "r2"], &[], 0)));
    assert!(model.run_until_idle(TIMEOUT));

    let events = model.take_events();
    assert_eq!(events.first(), Some(&ModelEvent::RequestStarted));
    assert_eq!(events.last(), Some(&ModelEvent::RequestFinished));
    assert!(events.contains(&ModelEvent::RowsInserted {
        parent: None,
        first: 0,
        last: 1,
    }));
    Ok(())
}

#[test]
fn tooltip_joins_titled_columns() -> arbor::Result<()> {
    let mut model = TreeModel::new(Config::default());
    model.install_generator(Arc::new(StaticTree::new(&["free"], &[], 0)));
    assert!(model.run_until_idle(TIMEOUT));

    let root = model.index(0, 0, None)?;
    let tooltip = model.data(root, DataRole::Tooltip)?;
    assert_eq!(tooltip.as_text(), Some("Name: free"));
    assert_eq!(
        model.data(root, DataRole::Entity)?.as_entity(),
        Some(EntityId(1))
    );
    assert_eq!(model.column_title(0).as_deref(), Some("Name"));
    Ok(())
}
