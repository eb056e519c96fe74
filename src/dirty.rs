//! Dirty-state tracking.
//!
//! Two sets of items:
//!
//! - **unsaved** — the item or some descendant has a pending edit that has
//!   not yet been committed to disk. Saving removes items from this set.
//! - **modified** — the item's on-disk bytes were overwritten during this
//!   session. Membership is permanent for the session: any stale handle or
//!   cache built from the old stream must be treated as suspect.
//!
//! Marking propagates to every ancestor. The walk short-circuits at the
//! first ancestor already in the unsaved set — by the invariant above, its
//! own ancestors are already marked — keeping repeated marks O(depth), not
//! O(depth squared).
//!
//! The tracker has no interior synchronization; it is owned by the
//! workspace state and mutated only under the workspace lock.

use std::collections::HashSet;
use std::sync::Arc;

use crate::events::{EventSink, WorkspaceEvent};
use crate::item::{ItemId, WorkspaceItem};

/// The unsaved / modified sets with transitive propagation.
#[derive(Debug, Default)]
pub struct DirtyTracker {
    unsaved: HashSet<ItemId>,
    modified: HashSet<ItemId>,
}

impl DirtyTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `item` and every ancestor up to its root as unsaved and
    /// modified, posting a `DirtyChanged` event for each item that was not
    /// already unsaved.
    pub fn mark_dirty(&mut self, item: &Arc<WorkspaceItem>, sink: &dyn EventSink) {
        let mut current = Arc::clone(item);
        loop {
            let newly_unsaved = self.unsaved.insert(current.id());
            self.modified.insert(current.id());
            if !newly_unsaved {
                // The chain above is already marked.
                break;
            }
            sink.post(WorkspaceEvent::DirtyChanged {
                item: current.id(),
                unsaved: true,
            });
            match current.parent() {
                Some(parent) => current = parent,
                None => break,
            }
        }
    }

    /// Removes `item` from the unsaved set only. It stays in the modified
    /// set for the rest of the session — its underlying stream has been
    /// swapped.
    pub fn clear_after_save(&mut self, item: &WorkspaceItem, sink: &dyn EventSink) {
        if self.unsaved.remove(&item.id()) {
            sink.post(WorkspaceEvent::DirtyChanged {
                item: item.id(),
                unsaved: false,
            });
        }
    }

    /// [`Self::clear_after_save`] for a root item and its whole subtree:
    /// a successful save commits every descendant's edits too.
    pub(crate) fn clear_subtree_after_save(
        &mut self,
        item: &Arc<WorkspaceItem>,
        sink: &dyn EventSink,
    ) {
        self.clear_after_save(item, sink);
        for child in item.children() {
            self.clear_subtree_after_save(&child, sink);
        }
    }

    /// Whether `id` has uncommitted edits.
    pub fn is_unsaved(&self, id: ItemId) -> bool {
        self.unsaved.contains(&id)
    }

    /// Whether `id`'s on-disk bytes were overwritten this session.
    pub fn is_modified(&self, id: ItemId) -> bool {
        self.modified.contains(&id)
    }

    /// Number of items with uncommitted edits.
    pub fn unsaved_count(&self) -> usize {
        self.unsaved.len()
    }

    /// Drops both sets. Used by workspace close.
    pub fn clear_all(&mut self) {
        self.unsaved.clear();
        self.modified.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{CollectingSink, NullSink};
    use crate::item::{ItemKind, ResourceBlob};
    use crate::storage::FileSource;
    use std::sync::Weak;

    struct Fixture {
        _dir: tempfile::TempDir,
        next_id: u64,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                _dir: tempfile::tempdir().expect("tempdir"),
                next_id: 0,
            }
        }

        fn item(&mut self, parent: Option<&Arc<WorkspaceItem>>) -> Arc<WorkspaceItem> {
            let path = self._dir.path().join(format!("f{}.bin", self.next_id));
            std::fs::write(&path, b"x").expect("write fixture");
            let source = FileSource::open(&path).expect("open");
            let weak = parent.map(Arc::downgrade).unwrap_or_else(Weak::new);
            let item = WorkspaceItem::new(
                ItemId::new(self.next_id),
                0,
                format!("f{}.bin", self.next_id),
                weak,
                ItemKind::Resource(ResourceBlob::new(source)),
            );
            self.next_id += 1;
            if let Some(p) = parent {
                p.push_child(Arc::clone(&item));
            }
            item
        }
    }

    #[test]
    fn marking_a_leaf_marks_every_ancestor() {
        let mut fx = Fixture::new();
        let root = fx.item(None);
        let mid = fx.item(Some(&root));
        let leaf = fx.item(Some(&mid));

        let mut tracker = DirtyTracker::new();
        tracker.mark_dirty(&leaf, &NullSink);

        for item in [&leaf, &mid, &root] {
            assert!(tracker.is_unsaved(item.id()));
            assert!(tracker.is_modified(item.id()));
        }
    }

    #[test]
    fn remarking_short_circuits_and_posts_no_duplicate_events() {
        let mut fx = Fixture::new();
        let root = fx.item(None);
        let mid = fx.item(Some(&root));
        let leaf_a = fx.item(Some(&mid));
        let leaf_b = fx.item(Some(&mid));

        let sink = CollectingSink::new();
        let mut tracker = DirtyTracker::new();
        tracker.mark_dirty(&leaf_a, &sink);
        // mid and root already marked: only leaf_b should produce an event.
        tracker.mark_dirty(&leaf_b, &sink);

        let dirty_events = sink
            .events()
            .iter()
            .filter(|e| matches!(e, WorkspaceEvent::DirtyChanged { unsaved: true, .. }))
            .count();
        assert_eq!(dirty_events, 4); // leaf_a, mid, root, leaf_b
    }

    #[test]
    fn clear_after_save_keeps_modified_membership() {
        let mut fx = Fixture::new();
        let root = fx.item(None);
        let child = fx.item(Some(&root));

        let mut tracker = DirtyTracker::new();
        tracker.mark_dirty(&child, &NullSink);
        tracker.clear_subtree_after_save(&root, &NullSink);

        assert!(!tracker.is_unsaved(root.id()));
        assert!(!tracker.is_unsaved(child.id()));
        assert!(tracker.is_modified(root.id()));
        assert!(tracker.is_modified(child.id()));
    }
}
