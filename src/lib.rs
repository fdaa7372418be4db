//! Incremental, asynchronous tree/list materialization for exploration
//! views.
//!
//! Given a caller-supplied, lazily-evaluated [`ItemGenerator`], the engine
//! builds a finite, deduplicated tree (or flat list) addressable by stable
//! (parent, row, column) coordinates. Expansion work runs on background
//! worker threads; results cross into the single-owner tree through an
//! insertion queue drained on a periodic tick, and results from superseded
//! requests are discarded by epoch comparison rather than by interrupting
//! any thread.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use arbor::{Config, DataRole, TreeModel};
//! # fn generator() -> Arc<dyn arbor::ItemGenerator> { unimplemented!() }
//!
//! let mut model = TreeModel::new(Config::default());
//! model.install_generator(generator());
//! model.run_until_idle(Duration::from_secs(5));
//! let first = model.index(0, 0, None)?;
//! let label = model.data(first, DataRole::Display)?;
//! # Ok::<(), arbor::ModelError>(())
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod engine;
pub mod error;
pub mod generator;
pub mod model;
pub mod store;

pub use config::Config;
pub use engine::{EngineMetrics, ListModel, ModelEvent, ModelIndex, TreeModel};
pub use error::{ModelError, Result};
pub use generator::{ItemGenerator, ItemStream};
pub use model::{
    CellValue, DataRole, EntityId, GeneratedItem, HighlightRange, NodeState, RichText, Value,
};
