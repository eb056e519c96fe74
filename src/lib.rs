//! # bundlekit
//!
//! A lazy, cross-file asset workspace for serialized container files:
//! archives holding multiple sub-files, standalone serialized files of
//! addressable objects, and opaque resource blobs that reference each other
//! through typed pointers.
//!
//! ## Overview
//!
//! bundlekit manages a working set of such files as one object graph. Files
//! are loaded on demand; individual objects' structured field data is
//! materialized lazily and cached; pointers that cross file boundaries are
//! resolved even into files not yet opened; pending in-memory edits are
//! tracked per item with transitive propagation; and edits are persisted
//! back to disk through an atomic write-temp/rename/reopen protocol that
//! cannot corrupt the original file if the process is interrupted.
//!
//! ### Key Properties
//!
//! *   **Lazy materialization:** an object's field tree is decoded on first
//!     access and cached; edits invalidate the cache. Malformed objects are
//!     absorbed — one broken object never takes down the workspace.
//! *   **One record per object:** any two pointers resolving to the same
//!     physical file and object id yield the same shared [`AssetRecord`]
//!     instance, so an edit staged through one resolution path is visible
//!     through every other.
//! *   **Shadow opens:** dependency files referenced by pointer are opened
//!     read-only for resolution without entering the visible tree, and are
//!     reused (one live handle per physical path) if the user later opens
//!     the same file explicitly.
//! *   **Dirty tracking:** an item is *unsaved* iff it or a descendant has
//!     an uncommitted edit; items whose on-disk bytes were overwritten stay
//!     *modified* for the session so stale caches can be distrusted.
//! *   **Bounded batch execution:** bulk loads and scans run on a fixed
//!     pool of self-feeding workers with per-job failure isolation,
//!     throttled progress, and an exactly-once completion signal.
//! *   **Crash-safe saves:** per root item, the reconciled contents are
//!     written to a temporary sibling, synced, atomically renamed over the
//!     original, then re-parsed with the live representation swapped in
//!     place.
//!
//! ## Architecture
//!
//! The binary layout of the files themselves stays behind three seams the
//! embedder implements (or takes the built-in simple versions of):
//! [`FieldCodec`] turns object bytes into [`FieldTree`]s and back,
//! [`ContainerFormat`](format::ContainerFormat) enumerates and writes
//! archive directories, and
//! [`ObjectTableFormat`](format::ObjectTableFormat) enumerates and writes
//! object tables. Storage access goes through the
//! [`Storage`](storage::Storage) trait so save-step failures are testable.
//! All collaborators are explicit constructor parameters of [`Workspace`];
//! there is no ambient global state, and multiple independent workspaces
//! can coexist in one process.
//!
//! Observers receive [`WorkspaceEvent`]s through an
//! [`EventSink`](events::EventSink) — a message-queue seam rather than a
//! UI-framework binding, so the core has zero GUI dependency.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use bundlekit::{
//!     BincodeFieldCodec, JobRunner, NullSink, Workspace,
//!     format_simple::{SimpleContainer, SimpleObjectTable},
//!     storage::LocalDisk,
//! };
//!
//! let workspace = Workspace::new(
//!     Arc::new(BincodeFieldCodec),
//!     Arc::new(SimpleContainer),
//!     Arc::new(SimpleObjectTable),
//!     Arc::new(LocalDisk),
//!     Arc::new(NullSink),
//! );
//!
//! // Open, edit, save.
//! let file = workspace.open_serialized_file("level0.bks".as_ref())?;
//! workspace.stage_replacement(&file, 7, new_bytes)?;
//! workspace.save(&file)?;
//! ```
//!
//! ### Safety and Error Handling
//!
//! * **No panics:** no `unwrap()` or `panic!()` in the library (enforced by
//!   clippy lints); all failures surface as [`BundleError`].
//! * **Encapsulated unsafe:** `unsafe` appears only in the storage module,
//!   for memory-mapping read handles.
//! * **Local failure recovery:** load and decode errors are recovered
//!   where they happen and reported as bounded lists; save errors always
//!   propagate synchronously, since continuing past a failed save risks
//!   data loss.

#![deny(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![warn(missing_docs)]

// --- PUBLIC API MODULES ---
pub mod error;
pub mod events;
pub mod field;
pub mod format;
pub mod format_simple;
pub mod item;
pub mod jobs;
pub mod ops;
pub mod record;
pub mod storage;
pub mod workspace;

// --- IMPLEMENTATION MODULES (impl blocks on Workspace) ---
mod dirty;
mod resolver;
mod save;

pub use dirty::DirtyTracker;

// --- RE-EXPORTS ---
pub use error::{BundleError, Result};
pub use events::{ChannelSink, CollectingSink, EventSink, NullSink, WorkspaceEvent};
pub use field::{BincodeFieldCodec, FieldCodec, FieldTree, FieldValue, PointerRef};
pub use item::{ItemId, ItemKind, WorkspaceItem};
pub use jobs::{BatchOptions, BatchReport, CancelToken, Job, JobRunner};
pub use record::AssetRecord;
pub use workspace::Workspace;
