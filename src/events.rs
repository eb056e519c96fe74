//! Workspace notifications.
//!
//! The workspace mutates its tree, name index, and dirty sets under its own
//! lock; anything a UI (or any other observer) needs to see is posted as a
//! [`WorkspaceEvent`] through an [`EventSink`]. A GUI embedder hands the
//! workspace a [`ChannelSink`] and drains the receiver on its own thread —
//! the queue replaces direct mutation from worker threads. Tests use
//! [`CollectingSink`] to assert on what was posted.

use std::sync::Mutex;

use crate::item::ItemId;

/// An observable change in the workspace.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkspaceEvent {
    /// A new item (root or child) entered the tree.
    Opened {
        /// The new item.
        item: ItemId,
        /// Its display name at open time.
        name: String,
    },
    /// An item's display name changed.
    Renamed {
        /// The renamed item.
        item: ItemId,
        /// The new name.
        name: String,
    },
    /// An item entered or left the unsaved set.
    DirtyChanged {
        /// The affected item.
        item: ItemId,
        /// `true` if the item is now unsaved.
        unsaved: bool,
    },
    /// A root item's save protocol completed successfully.
    Saved {
        /// The saved root.
        item: ItemId,
    },
    /// Coarse batch progress in `[0, 1]`. Throttled by the job runner.
    Progress(f32),
    /// A batch finished; fired exactly once per batch.
    BatchFinished {
        /// Jobs that completed successfully.
        succeeded: usize,
        /// Jobs that failed (including cancelled ones).
        failed: usize,
    },
    /// The workspace was closed; all items and caches are gone.
    Closed,
}

/// Where the workspace posts its events.
///
/// Implementations must be cheap and non-blocking: events may be posted
/// while the workspace lock is held and from batch worker threads.
pub trait EventSink: Send + Sync {
    /// Delivers one event.
    fn post(&self, event: WorkspaceEvent);
}

/// Drops every event. The default sink for headless use.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn post(&self, _event: WorkspaceEvent) {}
}

/// Forwards events into a `crossbeam_channel` sender, decoupling observers
/// from the threads that produce events. Send failures (receiver gone) are
/// ignored: a departed observer must not break workspace operations.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: crossbeam_channel::Sender<WorkspaceEvent>,
}

impl ChannelSink {
    /// Creates a sink plus the receiver to drain it from.
    pub fn new() -> (Self, crossbeam_channel::Receiver<WorkspaceEvent>) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        (Self { sender }, receiver)
    }
}

impl EventSink for ChannelSink {
    fn post(&self, event: WorkspaceEvent) {
        let _ = self.sender.send(event);
    }
}

/// Buffers every event for later inspection. Test helper.
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<WorkspaceEvent>>,
}

impl CollectingSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// A snapshot of everything posted so far.
    pub fn events(&self) -> Vec<WorkspaceEvent> {
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

impl EventSink for CollectingSink {
    fn post(&self, event: WorkspaceEvent) {
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(event);
    }
}
