//! Flat-list specialization of the materialization engine.
//!
//! Same store, queue, workers, dedup, and epoch handling as the tree model,
//! with recursion removed: exactly one roots worker runs per install, and
//! aliasing surfaces as a "go to original" row resolution instead of a
//! suppressed subtree.

use std::sync::Arc;
use std::time::Duration;

use crate::engine::{EngineMetrics, ModelEvent, TreeModel};
use crate::error::Result;
use crate::generator::ItemGenerator;
use crate::model::{DataRole, Value};
use crate::Config;

/// Incremental, deduplicated flat list over a generator's roots.
#[derive(Debug)]
pub struct ListModel {
    inner: TreeModel,
}

impl ListModel {
    /// Creates an empty list model with its worker pool already running.
    pub fn new(config: Config) -> Self {
        Self {
            inner: TreeModel::new(config),
        }
    }

    /// Installs `generator`, discarding the previous rows and every
    /// in-flight result, and schedules the single roots worker.
    pub fn install_generator(&mut self, generator: Arc<dyn ItemGenerator>) {
        self.inner.install_with_depth(generator, 0);
    }

    /// See [`TreeModel::cancel_running_request`].
    pub fn cancel_running_request(&mut self) {
        self.inner.cancel_running_request();
    }

    /// See [`TreeModel::tick`].
    pub fn tick(&mut self) -> bool {
        self.inner.tick()
    }

    /// See [`TreeModel::run_until_idle`].
    pub fn run_until_idle(&mut self, timeout: Duration) -> bool {
        self.inner.run_until_idle(timeout)
    }

    /// See [`TreeModel::take_events`].
    pub fn take_events(&mut self) -> Vec<ModelEvent> {
        self.inner.take_events()
    }

    /// Whether a request is currently producing rows.
    pub fn is_request_running(&self) -> bool {
        self.inner.is_request_running()
    }

    /// See [`TreeModel::epoch`].
    pub fn epoch(&self) -> u64 {
        self.inner.epoch()
    }

    /// See [`TreeModel::metrics`].
    pub fn metrics(&self) -> &EngineMetrics {
        self.inner.metrics()
    }

    /// Number of materialized rows.
    pub fn len(&self) -> usize {
        self.inner.row_count(None).unwrap_or(0)
    }

    /// Whether no rows are materialized.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of data columns of the installed generator.
    pub fn column_count(&self) -> usize {
        self.inner.column_count()
    }

    /// Title of `column`.
    pub fn column_title(&self, column: usize) -> Option<String> {
        self.inner.column_title(column)
    }

    /// Answers `role` for `(row, column)`.
    pub fn cell(&self, row: usize, column: usize, role: DataRole) -> Result<Value> {
        let index = self.inner.index(row, column, None)?;
        self.inner.data(index, role)
    }

    /// Whether `row` duplicates an earlier canonical row.
    pub fn is_duplicate(&self, row: usize) -> Result<bool> {
        Ok(self
            .cell(row, 0, DataRole::IsDuplicate)?
            .as_bool()
            .unwrap_or(false))
    }

    /// The "go to original" action: resolves a duplicate `row` to the row
    /// index of its canonical node. `None` when `row` is itself canonical.
    pub fn original_row(&mut self, row: usize) -> Result<Option<usize>> {
        let index = self.inner.index(row, 0, None)?;
        let canonical = self.inner.deduplicate(index)?;
        if canonical == index {
            return Ok(None);
        }
        Ok(Some(self.inner.row(canonical)?))
    }
}
