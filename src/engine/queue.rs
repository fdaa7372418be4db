//! Worker-to-owner hand-off.

use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};

use crate::model::{EntityId, GeneratedItem};

/// One message from an expansion worker to the owner thread.
///
/// Every message carries the epoch captured when its originating work was
/// scheduled; the owner drops mismatches unseen.
#[derive(Debug)]
pub(crate) enum QueueEvent {
    /// A capped batch of freshly generated items for one parent.
    Items {
        /// Epoch captured at schedule time.
        epoch: u64,
        /// Entity of the parent the items belong under; `None` for roots.
        parent: Option<EntityId>,
        /// The items, in emission order.
        items: Vec<GeneratedItem>,
        /// Remaining recursion budget for the items themselves.
        depth: u32,
    },
    /// Terminal signal of one generator call, emitted even when the call
    /// was cancelled early or produced nothing.
    Finished {
        /// Epoch captured at schedule time.
        epoch: u64,
        /// Entity of the parent that was being drained; `None` for roots.
        parent: Option<EntityId>,
    },
}

/// Multi-producer/single-consumer hand-off between any number of running
/// workers and the owner thread's drain tick.
pub(crate) struct InsertionQueue {
    tx: Sender<QueueEvent>,
    rx: Receiver<QueueEvent>,
}

impl InsertionQueue {
    pub(crate) fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self { tx, rx }
    }

    /// A producer handle for workers. Enqueueing never blocks.
    pub(crate) fn sender(&self) -> Sender<QueueEvent> {
        self.tx.clone()
    }

    /// Pops one event without blocking.
    pub(crate) fn try_pop(&self) -> Option<QueueEvent> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Discards everything currently queued.
    pub(crate) fn drain(&self) {
        while self.try_pop().is_some() {}
    }
}
