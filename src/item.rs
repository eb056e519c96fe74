//! Workspace items: the nodes of the open-file tree.
//!
//! A [`WorkspaceItem`] is either a container file (archive), a serialized
//! file of addressable objects, or an opaque resource blob. Children are
//! owned `Arc`s; the parent link is a `Weak` back reference, so dropping a
//! root releases its whole subtree. The parsed payload of serialized files
//! lives behind a lock so the save protocol can swap it in place — any
//! external holder of the item then observes the new contents.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crate::format::{DirectoryEntry, SerializedHeader};
use crate::record::AssetRecord;
use crate::storage::FileSource;

/// A strong type identifying one workspace item for the session's lifetime.
/// Ids are workspace-local and never reused.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId(u64);

impl ItemId {
    /// Restrict creation to the workspace, which owns the counter.
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw numeric value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ItemId({})", self.0)
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The payload union of a workspace item.
#[derive(Debug)]
pub enum ItemKind {
    /// An archive holding an ordered directory of entries.
    Container(ContainerState),
    /// A single file of addressable objects.
    Serialized(SerializedFile),
    /// An opaque byte stream with no further structure.
    Resource(ResourceBlob),
}

/// The parsed state of a container item: its stream and directory table.
#[derive(Debug)]
pub struct ContainerState {
    inner: Mutex<ContainerInner>,
}

#[derive(Debug)]
struct ContainerInner {
    source: FileSource,
    entries: Vec<DirectoryEntry>,
}

impl ContainerState {
    pub(crate) fn new(source: FileSource, entries: Vec<DirectoryEntry>) -> Self {
        Self {
            inner: Mutex::new(ContainerInner { source, entries }),
        }
    }

    /// The container's current stream.
    pub fn source(&self) -> FileSource {
        self.lock().source.clone()
    }

    /// The directory entries as last parsed, in archive order.
    pub fn entries(&self) -> Vec<DirectoryEntry> {
        self.lock().entries.clone()
    }

    /// Replaces the parsed state in place after a save re-parse.
    pub(crate) fn swap(&self, source: FileSource, entries: Vec<DirectoryEntry>) {
        let mut inner = self.lock();
        inner.source = source;
        inner.entries = entries;
    }

    fn lock(&self) -> MutexGuard<'_, ContainerInner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// The parsed state of a serialized file: stream, dependency list, and the
/// object table wrapped as shared [`AssetRecord`]s.
#[derive(Debug)]
pub struct SerializedFile {
    inner: Mutex<SerializedState>,
}

#[derive(Debug)]
struct SerializedState {
    source: FileSource,
    dependencies: Vec<String>,
    /// Object ids in on-disk table order; saves preserve this order.
    order: Vec<i64>,
    objects: HashMap<i64, Arc<AssetRecord>>,
}

impl SerializedFile {
    /// Builds the record table from a parsed header.
    pub(crate) fn new(source: FileSource, header: SerializedHeader) -> Self {
        Self {
            inner: Mutex::new(SerializedState::build(source, header)),
        }
    }

    /// Looks up a record by object id. Returns the shared instance, so two
    /// lookups of the same id are reference-identical.
    pub fn get(&self, object_id: i64) -> Option<Arc<AssetRecord>> {
        self.lock().objects.get(&object_id).cloned()
    }

    /// All records in on-disk table order.
    pub fn records(&self) -> Vec<Arc<AssetRecord>> {
        let inner = self.lock();
        inner
            .order
            .iter()
            .filter_map(|id| inner.objects.get(id).cloned())
            .collect()
    }

    /// Number of addressable objects.
    pub fn object_count(&self) -> usize {
        self.lock().order.len()
    }

    /// The file's dependency list (pointer `file_index` N selects slot N-1).
    pub fn dependencies(&self) -> Vec<String> {
        self.lock().dependencies.clone()
    }

    /// The file's current stream.
    pub fn source(&self) -> FileSource {
        self.lock().source.clone()
    }

    /// Replaces the parsed representation in place after a save re-parse.
    /// Old records are dropped; pending replacements died with them, which
    /// is correct because the save just committed them.
    pub(crate) fn swap(&self, source: FileSource, header: SerializedHeader) {
        *self.lock() = SerializedState::build(source, header);
    }

    fn lock(&self) -> MutexGuard<'_, SerializedState> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl SerializedState {
    fn build(source: FileSource, header: SerializedHeader) -> Self {
        let mut order = Vec::with_capacity(header.objects.len());
        let mut objects = HashMap::with_capacity(header.objects.len());
        for entry in header.objects {
            order.push(entry.object_id);
            objects.insert(
                entry.object_id,
                Arc::new(AssetRecord::new(entry, source.clone())),
            );
        }
        Self {
            source,
            dependencies: header.dependencies,
            order,
            objects,
        }
    }
}

/// The state of an opaque resource item.
#[derive(Debug)]
pub struct ResourceBlob {
    source: Mutex<FileSource>,
}

impl ResourceBlob {
    pub(crate) fn new(source: FileSource) -> Self {
        Self {
            source: Mutex::new(source),
        }
    }

    /// The blob's current stream.
    pub fn source(&self) -> FileSource {
        self.source
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub(crate) fn swap(&self, source: FileSource) {
        *self.source.lock().unwrap_or_else(|p| p.into_inner()) = source;
    }
}

/// A node in the open-file tree.
#[derive(Debug)]
pub struct WorkspaceItem {
    id: ItemId,
    load_order: u32,
    name: Mutex<String>,
    original_name: Mutex<String>,
    parent: Weak<WorkspaceItem>,
    children: Mutex<Vec<Arc<WorkspaceItem>>>,
    kind: ItemKind,
}

impl WorkspaceItem {
    pub(crate) fn new(
        id: ItemId,
        load_order: u32,
        name: String,
        parent: Weak<WorkspaceItem>,
        kind: ItemKind,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            load_order,
            original_name: Mutex::new(name.clone()),
            name: Mutex::new(name),
            parent,
            children: Mutex::new(Vec::new()),
            kind,
        })
    }

    /// Session-unique item id.
    pub fn id(&self) -> ItemId {
        self.id
    }

    /// Load-order index: root open order for roots, archive entry order for
    /// container children. Stable for the session.
    pub fn load_order(&self) -> u32 {
        self.load_order
    }

    /// The item's current display name.
    pub fn name(&self) -> String {
        self.name.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// The name as last persisted to disk. Differs from [`Self::name`]
    /// while a rename is pending; the save protocol uses the difference to
    /// detect renames and re-aligns the two on success.
    pub fn original_name(&self) -> String {
        self.original_name
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub(crate) fn set_name(&self, name: String) {
        *self.name.lock().unwrap_or_else(|p| p.into_inner()) = name;
    }

    /// Aligns `original_name` with the live name after a successful save.
    pub(crate) fn commit_name(&self) {
        let name = self.name();
        *self
            .original_name
            .lock()
            .unwrap_or_else(|p| p.into_inner()) = name;
    }

    /// The owning parent, or `None` for a root item.
    pub fn parent(&self) -> Option<Arc<WorkspaceItem>> {
        self.parent.upgrade()
    }

    /// Whether this item is a root (no parent).
    pub fn is_root(&self) -> bool {
        self.parent.upgrade().is_none()
    }

    /// The item's owned children, in load order.
    pub fn children(&self) -> Vec<Arc<WorkspaceItem>> {
        self.children
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub(crate) fn push_child(&self, child: Arc<WorkspaceItem>) {
        self.children
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(child);
    }

    /// The payload union.
    pub fn kind(&self) -> &ItemKind {
        &self.kind
    }

    /// Shorthand for serialized-file payloads.
    pub fn as_serialized(&self) -> Option<&SerializedFile> {
        match &self.kind {
            ItemKind::Serialized(f) => Some(f),
            _ => None,
        }
    }

    /// The physical path of the item's backing stream.
    pub fn source_path(&self) -> PathBuf {
        match &self.kind {
            ItemKind::Container(c) => c.source().path().to_path_buf(),
            ItemKind::Serialized(f) => f.source().path().to_path_buf(),
            ItemKind::Resource(r) => r.source().path().to_path_buf(),
        }
    }
}
