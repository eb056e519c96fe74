//! The workspace graph: the tree of open files, the name index, and the
//! open/close/rename operations.
//!
//! All collaborators — field codec, container and object-table formats,
//! storage, event sink — are explicit constructor parameters, so multiple
//! independent workspaces can coexist in one process. Structural state
//! (tree, name index, dirty sets, path-open table) lives behind a single
//! workspace lock; opens are therefore safe to call from worker threads,
//! and observers learn about changes through the event sink rather than by
//! watching shared structures.
//!
//! Files opened purely to resolve pointers into them ("shadow opens") are
//! kept out of the visible tree but recorded in the path-open table, so
//! there is exactly one live handle per physical path: a later explicit
//! open of the same path promotes the shadow item instead of re-reading it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use log::{debug, warn};

use crate::dirty::DirtyTracker;
use crate::error::{BundleError, Result};
use crate::events::{EventSink, WorkspaceEvent};
use crate::field::{FieldCodec, FieldTree};
use crate::format::{ContainerFormat, ObjectTableFormat};
use crate::item::{
    ContainerState, ItemId, ItemKind, ResourceBlob, SerializedFile, WorkspaceItem,
};
use crate::record::AssetRecord;
use crate::storage::{FileSource, Storage};

/// One row of the path-open table.
pub(crate) struct PathedOpen {
    pub(crate) item: Arc<WorkspaceItem>,
    /// `false` for shadow opens (loaded only to resolve pointers).
    pub(crate) visible: bool,
}

/// The lock-guarded structural state of a workspace.
pub(crate) struct WorkspaceState {
    /// Visible root items in open order.
    pub(crate) roots: Vec<Arc<WorkspaceItem>>,
    /// Global name → node index over visible items. Duplicate names
    /// overwrite (last-registered wins); see the module docs of
    /// [`crate::workspace`] for why this sharp edge is kept.
    pub(crate) by_name: HashMap<String, Weak<WorkspaceItem>>,
    /// Canonical path → open item, visible and shadow alike.
    pub(crate) opens: HashMap<PathBuf, PathedOpen>,
    /// The unsaved / modified sets.
    pub(crate) dirty: DirtyTracker,
    /// Next load-order index for path-level opens.
    pub(crate) next_load_order: u32,
}

impl WorkspaceState {
    fn empty() -> Self {
        Self {
            roots: Vec::new(),
            by_name: HashMap::new(),
            opens: HashMap::new(),
            dirty: DirtyTracker::new(),
            next_load_order: 0,
        }
    }

    pub(crate) fn register_name(&mut self, item: &Arc<WorkspaceItem>) {
        let name = item.name();
        if self
            .by_name
            .insert(name.clone(), Arc::downgrade(item))
            .is_some()
        {
            // Known sharp edge: duplicate names silently collide in the
            // index. Kept as last-registered-wins, surfaced in the log.
            warn!("duplicate name '{name}' in workspace index; last-registered wins");
        }
    }
}

/// An asset workspace: open files, lazy object graph, dirty tracking.
///
/// Created with [`Workspace::new`]; shared by `Arc` between foreground
/// callers and batch workers.
pub struct Workspace {
    codec: Arc<dyn FieldCodec>,
    container_format: Arc<dyn ContainerFormat>,
    table_format: Arc<dyn ObjectTableFormat>,
    storage: Arc<dyn Storage>,
    sink: Arc<dyn EventSink>,
    state: Mutex<WorkspaceState>,
    next_item: AtomicU64,
}

impl Workspace {
    /// Creates an empty workspace over the given collaborators.
    pub fn new(
        codec: Arc<dyn FieldCodec>,
        container_format: Arc<dyn ContainerFormat>,
        table_format: Arc<dyn ObjectTableFormat>,
        storage: Arc<dyn Storage>,
        sink: Arc<dyn EventSink>,
    ) -> Arc<Self> {
        Arc::new(Self {
            codec,
            container_format,
            table_format,
            storage,
            sink,
            state: Mutex::new(WorkspaceState::empty()),
            next_item: AtomicU64::new(0),
        })
    }

    // --- OPEN OPERATIONS ---

    /// Opens `path`, detecting its format: container, serialized file, or
    /// neither.
    ///
    /// # Errors
    /// [`BundleError::Unrecognized`] if no format matches; the caller can
    /// still fall back to [`Workspace::open_resource`] explicitly.
    pub fn open_path(&self, path: &Path) -> Result<Arc<WorkspaceItem>> {
        let source = self.storage.open_read(path)?;
        if self.container_format.matches(&source) {
            self.open_container(path)
        } else if self.table_format.matches(&source) {
            self.open_serialized_file(path)
        } else {
            Err(BundleError::Unrecognized(path.display().to_string()))
        }
    }

    /// Opens an archive: one root plus one child per directory entry, in
    /// archive order. Structured entries are parsed as serialized files;
    /// a structured entry that fails to parse degrades to an opaque child
    /// (load errors are local, the rest of the archive stays usable).
    pub fn open_container(&self, path: &Path) -> Result<Arc<WorkspaceItem>> {
        let canonical = self.storage.canonicalize(path)?;
        let mut state = self.lock_state();
        if let Some(open) = state.opens.get(&canonical) {
            if open.visible {
                return Ok(Arc::clone(&open.item));
            }
        }

        let source = self.storage.open_read(&canonical)?;
        if !self.container_format.matches(&source) {
            return Err(BundleError::Unrecognized(path.display().to_string()));
        }
        let entries = self.container_format.read_directory(&source)?;
        debug!(
            "opening container {} with {} entries",
            canonical.display(),
            entries.len()
        );

        let load_order = state.next_load_order;
        state.next_load_order += 1;
        let root = WorkspaceItem::new(
            self.next_item_id(),
            load_order,
            file_name_of(&canonical),
            Weak::new(),
            ItemKind::Container(ContainerState::new(source.clone(), entries.clone())),
        );

        for (index, entry) in entries.iter().enumerate() {
            let sub = source.view(entry.offset, entry.size)?;
            let kind = if entry.is_structured {
                match self.table_format.read_table(&sub) {
                    Ok(header) => ItemKind::Serialized(SerializedFile::new(sub, header)),
                    Err(e) => {
                        warn!(
                            "entry '{}' of {} is flagged structured but failed to \
                             parse ({e}); treating as opaque",
                            entry.name,
                            canonical.display()
                        );
                        ItemKind::Resource(ResourceBlob::new(
                            source.view(entry.offset, entry.size)?,
                        ))
                    }
                }
            } else {
                ItemKind::Resource(ResourceBlob::new(sub))
            };
            let child = WorkspaceItem::new(
                self.next_item_id(),
                index as u32,
                entry.name.clone(),
                Arc::downgrade(&root),
                kind,
            );
            root.push_child(Arc::clone(&child));
            state.register_name(&child);
            self.sink.post(WorkspaceEvent::Opened {
                item: child.id(),
                name: child.name(),
            });
        }

        self.insert_root(&mut state, canonical, &root);
        Ok(root)
    }

    /// Opens a standalone serialized file as a visible root. If the same
    /// physical path is already open as a shadow (loaded for pointer
    /// resolution), that item is promoted instead of re-reading the file.
    pub fn open_serialized_file(&self, path: &Path) -> Result<Arc<WorkspaceItem>> {
        let canonical = self.storage.canonicalize(path)?;
        let mut state = self.lock_state();
        if let Some(item) = self.reuse_or_promote(&mut state, &canonical) {
            return Ok(item);
        }

        let source = self.storage.open_read(&canonical)?;
        if !self.table_format.matches(&source) {
            return Err(BundleError::Unrecognized(path.display().to_string()));
        }
        let item = self.build_serialized_item(&mut state, &canonical, source)?;
        self.insert_root(&mut state, canonical, &item);
        Ok(item)
    }

    /// Registers an opaque blob under its file name, with no structure.
    ///
    /// If the same physical path is already open (including as a shadow),
    /// the existing item is reused as-is — one live handle per path beats
    /// the requested kind.
    pub fn open_resource(&self, path: &Path) -> Result<Arc<WorkspaceItem>> {
        let canonical = self.storage.canonicalize(path)?;
        let mut state = self.lock_state();
        if let Some(item) = self.reuse_or_promote(&mut state, &canonical) {
            return Ok(item);
        }
        let source = self.storage.open_read(&canonical)?;
        let load_order = state.next_load_order;
        state.next_load_order += 1;
        let item = WorkspaceItem::new(
            self.next_item_id(),
            load_order,
            file_name_of(&canonical),
            Weak::new(),
            ItemKind::Resource(ResourceBlob::new(source)),
        );
        self.insert_root(&mut state, canonical, &item);
        Ok(item)
    }

    /// Opens a dependency file for pointer resolution only: the item is
    /// parsed and recorded in the path-open table but not added to the
    /// visible tree. Reused on subsequent shadow or explicit opens of the
    /// same physical path.
    pub(crate) fn shadow_open(&self, path: &Path) -> Result<Arc<WorkspaceItem>> {
        let canonical = self.storage.canonicalize(path)?;
        let mut state = self.lock_state();
        if let Some(open) = state.opens.get(&canonical) {
            return Ok(Arc::clone(&open.item));
        }
        let source = self.storage.open_read(&canonical)?;
        if !self.table_format.matches(&source) {
            return Err(BundleError::Unrecognized(path.display().to_string()));
        }
        debug!("shadow-opening dependency {}", canonical.display());
        let item = self.build_serialized_item(&mut state, &canonical, source)?;
        state.opens.insert(
            canonical,
            PathedOpen {
                item: Arc::clone(&item),
                visible: false,
            },
        );
        Ok(item)
    }

    // --- TREE MAINTENANCE ---

    /// Closes everything: releases all open streams, clears the tree, the
    /// name index, and both dirty sets. Idempotent.
    pub fn close(&self) {
        let mut state = self.lock_state();
        let had_any = !state.roots.is_empty() || !state.opens.is_empty();
        *state = WorkspaceState::empty();
        if had_any {
            self.sink.post(WorkspaceEvent::Closed);
        }
    }

    /// Renames `item`, updating the name index and marking the item dirty.
    /// `original_name` is left untouched — the save protocol compares the
    /// two to detect renames.
    pub fn rename(&self, item: &Arc<WorkspaceItem>, new_name: &str) {
        let mut state = self.lock_state();
        let old_name = item.name();
        if old_name == new_name {
            return;
        }
        // Only drop the old index entry if it still points at this item;
        // a colliding registration may have overwritten it since.
        if let Some(current) = state.by_name.get(&old_name) {
            if current
                .upgrade()
                .is_some_and(|existing| Arc::ptr_eq(&existing, item))
            {
                state.by_name.remove(&old_name);
            }
        }
        item.set_name(new_name.to_string());
        state.register_name(item);
        state.dirty.mark_dirty(item, self.sink.as_ref());
        self.sink.post(WorkspaceEvent::Renamed {
            item: item.id(),
            name: new_name.to_string(),
        });
    }

    // --- MUTATION API ---

    /// Stages raw replacement bytes for one object of a serialized item and
    /// marks the item (and its ancestors) dirty.
    pub fn stage_replacement(
        &self,
        item: &Arc<WorkspaceItem>,
        object_id: i64,
        bytes: Vec<u8>,
    ) -> Result<()> {
        let record = self.record_for_mutation(item, object_id)?;
        record.stage_replacement(bytes);
        self.mark_dirty(item);
        Ok(())
    }

    /// Encodes `tree` through the workspace codec and stages the result for
    /// one object. On encode failure nothing changes, not even dirt.
    pub fn stage_field_tree(
        &self,
        item: &Arc<WorkspaceItem>,
        object_id: i64,
        tree: &FieldTree,
    ) -> Result<()> {
        let record = self.record_for_mutation(item, object_id)?;
        record.stage_field_tree(tree, self.codec.as_ref())?;
        self.mark_dirty(item);
        Ok(())
    }

    /// Marks `item` and its ancestors unsaved and modified.
    pub fn mark_dirty(&self, item: &Arc<WorkspaceItem>) {
        let mut state = self.lock_state();
        state.dirty.mark_dirty(item, self.sink.as_ref());
    }

    /// Materializes a record's field tree through the workspace codec.
    /// Returns `None` (and caches nothing) if the object cannot be decoded.
    pub fn materialize(&self, record: &AssetRecord) -> Option<Arc<FieldTree>> {
        record.materialize(self.codec.as_ref())
    }

    // --- QUERIES ---

    /// Visible root items, in open order.
    pub fn roots(&self) -> Vec<Arc<WorkspaceItem>> {
        self.lock_state().roots.clone()
    }

    /// Looks up a visible item by name.
    pub fn find(&self, name: &str) -> Option<Arc<WorkspaceItem>> {
        self.lock_state().by_name.get(name).and_then(Weak::upgrade)
    }

    /// Whether `id` has uncommitted edits.
    pub fn is_unsaved(&self, id: ItemId) -> bool {
        self.lock_state().dirty.is_unsaved(id)
    }

    /// Whether `id`'s on-disk bytes were overwritten this session.
    pub fn is_modified(&self, id: ItemId) -> bool {
        self.lock_state().dirty.is_modified(id)
    }

    // --- INTERNALS ---

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, WorkspaceState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub(crate) fn table_format(&self) -> &dyn ObjectTableFormat {
        self.table_format.as_ref()
    }

    pub(crate) fn container_format(&self) -> &dyn ContainerFormat {
        self.container_format.as_ref()
    }

    pub(crate) fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }

    pub(crate) fn event_sink(&self) -> &dyn EventSink {
        self.sink.as_ref()
    }

    fn next_item_id(&self) -> ItemId {
        ItemId::new(self.next_item.fetch_add(1, Ordering::Relaxed))
    }

    /// Reuses the open item for `canonical` if there is one, promoting a
    /// shadow open to visible first. The path-open row is never replaced:
    /// one physical path has exactly one live handle.
    fn reuse_or_promote(
        &self,
        state: &mut WorkspaceState,
        canonical: &Path,
    ) -> Option<Arc<WorkspaceItem>> {
        let (item, visible) = state
            .opens
            .get(canonical)
            .map(|open| (Arc::clone(&open.item), open.visible))?;
        if !visible {
            debug!("promoting shadow open {} to visible", canonical.display());
            if let Some(open) = state.opens.get_mut(canonical) {
                open.visible = true;
            }
            state.roots.push(Arc::clone(&item));
            state.register_name(&item);
            self.sink.post(WorkspaceEvent::Opened {
                item: item.id(),
                name: item.name(),
            });
        }
        Some(item)
    }

    fn record_for_mutation(
        &self,
        item: &Arc<WorkspaceItem>,
        object_id: i64,
    ) -> Result<Arc<AssetRecord>> {
        let file = item.as_serialized().ok_or_else(|| {
            BundleError::Encode(format!(
                "'{}' is not a serialized file, cannot stage object bytes",
                item.name()
            ))
        })?;
        file.get(object_id).ok_or_else(|| {
            BundleError::Encode(format!(
                "no object {object_id} in '{}'",
                item.name()
            ))
        })
    }

    fn build_serialized_item(
        &self,
        state: &mut WorkspaceState,
        canonical: &Path,
        source: FileSource,
    ) -> Result<Arc<WorkspaceItem>> {
        let header = self.table_format.read_table(&source)?;
        debug!(
            "parsed {} objects, {} dependencies from {}",
            header.objects.len(),
            header.dependencies.len(),
            canonical.display()
        );
        let load_order = state.next_load_order;
        state.next_load_order += 1;
        Ok(WorkspaceItem::new(
            self.next_item_id(),
            load_order,
            file_name_of(canonical),
            Weak::new(),
            ItemKind::Serialized(SerializedFile::new(source, header)),
        ))
    }

    fn insert_root(
        &self,
        state: &mut WorkspaceState,
        canonical: PathBuf,
        root: &Arc<WorkspaceItem>,
    ) {
        state.roots.push(Arc::clone(root));
        state.register_name(root);
        state.opens.insert(
            canonical,
            PathedOpen {
                item: Arc::clone(root),
                visible: true,
            },
        );
        self.sink.post(WorkspaceEvent::Opened {
            item: root.id(),
            name: root.name(),
        });
    }
}

impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock_state();
        f.debug_struct("Workspace")
            .field("roots", &state.roots.len())
            .field("opens", &state.opens.len())
            .field("unsaved", &state.dirty.unsaved_count())
            .finish()
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
