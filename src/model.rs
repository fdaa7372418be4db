//! Core data types shared by generators, the node store, and the engine.

use std::fmt;

use smallvec::SmallVec;

/// Identifier of the underlying entity a materialized row stands for.
///
/// Two items carrying the same `EntityId` describe the same entity, no matter
/// which traversal path produced them.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for EntityId {
    fn from(value: u64) -> Self {
        EntityId(value)
    }
}

/// A byte range within a cell's text that a view may highlight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HighlightRange {
    /// Byte offset of the range start.
    pub start: usize,
    /// Length of the range in bytes.
    pub len: usize,
}

/// Cell text plus the ranges within it worth highlighting (e.g. the portion
/// that matched a query).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RichText {
    /// The full cell text.
    pub text: String,
    /// Highlightable byte ranges, in ascending order.
    pub ranges: Vec<HighlightRange>,
}

impl RichText {
    /// Builds a rich value from text and one highlighted range.
    pub fn highlighted(text: impl Into<String>, start: usize, len: usize) -> Self {
        Self {
            text: text.into(),
            ranges: vec![HighlightRange { start, len }],
        }
    }
}

/// Opaque per-column datum carried by a [`GeneratedItem`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CellValue {
    /// No datum for this column.
    #[default]
    Empty,
    /// Plain display text.
    Text(String),
    /// Display text with highlightable ranges.
    Rich(RichText),
}

impl CellValue {
    /// The cell rendered as plain text.
    pub fn display(&self) -> &str {
        match self {
            CellValue::Empty => "",
            CellValue::Text(text) => text,
            CellValue::Rich(rich) => &rich.text,
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Text(value)
    }
}

impl From<RichText> for CellValue {
    fn from(value: RichText) -> Self {
        CellValue::Rich(value)
    }
}

/// One element produced by a generator call. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GeneratedItem {
    /// The entity this item stands for. Items without a resolvable entity
    /// are skipped during the drain.
    pub entity: Option<EntityId>,
    /// The canonical referent, when the entity is an alias of another one
    /// (e.g. a thunk for its target).
    pub aliased: Option<EntityId>,
    /// Per-column data values.
    pub cells: SmallVec<[CellValue; 4]>,
}

impl GeneratedItem {
    /// Creates an item for `entity` with no cells.
    pub fn new(entity: EntityId) -> Self {
        Self {
            entity: Some(entity),
            aliased: None,
            cells: SmallVec::new(),
        }
    }

    /// Declares `alias` as this item's canonical referent.
    pub fn with_alias(mut self, alias: EntityId) -> Self {
        self.aliased = Some(alias);
        self
    }

    /// Appends a column value.
    pub fn with_cell(mut self, cell: impl Into<CellValue>) -> Self {
        self.cells.push(cell.into());
        self
    }

    /// The value of `column`, if the item carries one.
    pub fn cell(&self, column: usize) -> Option<&CellValue> {
        self.cells.get(column)
    }
}

/// Expansion state of a materialized node.
///
/// `Unopened -> Opening -> Opened` is the only forward path; `Duplicate` is
/// terminal and assigned at creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// No expansion has been requested yet.
    Unopened,
    /// A worker is draining this node's children.
    Opening,
    /// The generator call completed; no further children expected.
    Opened,
    /// This node aliases an already-canonical node and is never expanded.
    Duplicate,
}

/// The aspect of a node a [`data`](crate::engine::TreeModel::data) call asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataRole {
    /// Plain display text for the addressed column.
    Display,
    /// Multi-line summary of the whole row.
    Tooltip,
    /// The row's [`EntityId`].
    Entity,
    /// Whether an expansion request on this row could reveal children.
    CanExpand,
    /// Whether this row is a duplicate of an earlier canonical row.
    IsDuplicate,
    /// The addressed column as a [`RichText`] value, when the generator
    /// produced one.
    RichDisplay,
}

/// A value returned from the data contract.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// The role carries no value for this row/column.
    None,
    /// A boolean answer.
    Bool(bool),
    /// Plain text.
    Text(String),
    /// An entity identifier.
    Entity(EntityId),
    /// Text with highlightable ranges.
    Rich(RichText),
}

impl Value {
    /// The value as text, if it is textual.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            Value::Rich(rich) => Some(&rich.text),
            _ => None,
        }
    }

    /// The value as a boolean, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// The value as an entity id, if it is one.
    pub fn as_entity(&self) -> Option<EntityId> {
        match self {
            Value::Entity(entity) => Some(*entity),
            _ => None,
        }
    }
}
