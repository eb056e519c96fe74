//! The save protocol: write-temp, atomic rename, reopen.
//!
//! Edits are persisted per root item. The original file is never written
//! in place: the reconciled contents go to a temporary sibling, which is
//! atomically renamed over the original only after a successful, synced
//! write. A crash at any point leaves either the old file or the new file
//! on disk, never a torn one.
//!
//! The whole protocol runs while holding the workspace-wide lock, so no
//! concurrent open or second save can observe a half-migrated state.
//!
//! Failure taxonomy, in protocol order:
//! - [`BundleError::NoWriteAccess`] — step 3 refused; nothing written.
//! - [`BundleError::RenameFailed`] — the temp file was written but could
//!   not replace the original; the original is intact, the temp may remain.
//! - [`BundleError::ReparseFailed`] — the rename succeeded (the file IS
//!   saved) but rebuilding the in-memory mirror failed. Severe: the
//!   session's view of the file is no longer reliable and the caller
//!   should reload it from disk. Dirty state is deliberately left in place
//!   so nothing is silently forgotten.
//!
//! For the recoverable failures the dirty sets are untouched, so the user
//! never loses a staged edit to a failed save.

use std::borrow::Cow;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::debug;

use crate::error::{BundleError, Result};
use crate::format::{EntryPayload, EntryWrite, ObjectTableFormat, ObjectWrite};
use crate::item::{ItemKind, SerializedFile, WorkspaceItem};
use crate::workspace::{Workspace, WorkspaceState};

impl Workspace {
    /// Persists the pending edits under one root item, then reconciles the
    /// in-memory graph with the new on-disk bytes.
    ///
    /// A no-op if the item has no uncommitted edits. Root items are saved
    /// independently; there is no cross-file atomicity.
    pub fn save(&self, item: &Arc<WorkspaceItem>) -> Result<()> {
        if !item.is_root() {
            return Err(BundleError::Internal(format!(
                "save applies to root items; '{}' has a parent",
                item.name()
            )));
        }

        let mut state = self.lock_state();

        // Step 1: nothing staged, nothing to do.
        if !state.dirty.is_unsaved(item.id()) {
            return Ok(());
        }

        // Step 2-3: locate the original and prove we may overwrite it
        // before doing any work.
        let path = item.source_path();
        self.storage().confirm_writable(&path)?;

        // Step 4: a decorated sibling in the same directory, so the final
        // rename never crosses a filesystem boundary.
        let temp_path = temp_sibling(&path);
        let mut writer = self.storage().create_write(&temp_path)?;
        debug!("saving '{}' via {}", item.name(), temp_path.display());

        // Step 5: serialize the reconciled in-memory representation.
        match item.kind() {
            ItemKind::Serialized(file) => {
                write_serialized(self.table_format(), file, &mut writer)?;
            }
            ItemKind::Container(_) => {
                write_container(self, &state, item, &mut writer)?;
            }
            ItemKind::Resource(blob) => {
                // Resources carry no object edits; a save commits a rename.
                writer.write_all(blob.source().bytes())?;
            }
        }

        // Step 6: flush, sync, close the write handle.
        let temp = writer.finish()?;

        // Step 7: the commit point. On failure the dirty sets are left
        // untouched and the original file is still the old bytes.
        self.storage().atomic_rename(&temp, &path)?;

        // Step 8: reopen and re-parse from disk, swapping the live parsed
        // representation in place so existing handles see the new contents.
        self.reopen_after_save(item, &path).map_err(|e| {
            BundleError::ReparseFailed(format!("{}: {e}", path.display()))
        })?;

        // Step 9: edits are committed. Align names, clear the unsaved set
        // (the subtree stays in the modified set for the session).
        commit_names(item);
        state
            .dirty
            .clear_subtree_after_save(item, self.event_sink());
        self.event_sink()
            .post(crate::events::WorkspaceEvent::Saved { item: item.id() });
        debug!("saved '{}'", item.name());
        Ok(())
    }

    /// Re-parses `path` and swaps the parsed state of `item` (and, for a
    /// container, of every child) in place.
    fn reopen_after_save(&self, item: &Arc<WorkspaceItem>, path: &Path) -> Result<()> {
        let source = self.storage().open_read(path)?;
        match item.kind() {
            ItemKind::Serialized(file) => {
                let header = self.table_format().read_table(&source)?;
                file.swap(source, header);
            }
            ItemKind::Resource(blob) => {
                blob.swap(source);
            }
            ItemKind::Container(container) => {
                let entries = self.container_format().read_directory(&source)?;
                let children = item.children();
                if entries.len() != children.len() {
                    return Err(BundleError::Internal(format!(
                        "directory entry count changed across save: {} -> {}",
                        children.len(),
                        entries.len()
                    )));
                }
                container.swap(source.clone(), entries.clone());
                for (entry, child) in entries.iter().zip(children.iter()) {
                    let sub = source.view(entry.offset, entry.size)?;
                    match child.kind() {
                        ItemKind::Serialized(file) => {
                            let header = self.table_format().read_table(&sub)?;
                            file.swap(sub, header);
                        }
                        ItemKind::Resource(blob) => blob.swap(sub),
                        ItemKind::Container(_) => {
                            return Err(BundleError::Internal(
                                "nested containers are not modeled".into(),
                            ));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Serializes a file's object table, substituting pending replacement
/// bytes and copying untouched ranges from the original stream.
fn write_serialized(
    format: &dyn ObjectTableFormat,
    file: &SerializedFile,
    out: &mut dyn Write,
) -> Result<()> {
    let source = file.source();
    let dependencies = file.dependencies();
    let records = file.records();
    // Keep the replacement Arcs alive while the writes borrow them.
    let replacements: Vec<_> = records.iter().map(|r| r.replacement()).collect();

    let mut writes = Vec::with_capacity(records.len());
    for (record, replacement) in records.iter().zip(replacements.iter()) {
        let (offset, size) = record.byte_range();
        let data: Cow<'_, [u8]> = match replacement {
            Some(bytes) => Cow::Borrowed(bytes.as_slice()),
            None => Cow::Borrowed(source.slice(offset, size)?),
        };
        writes.push(ObjectWrite {
            object_id: record.object_id(),
            type_id: record.type_id(),
            data,
        });
    }
    format.write_file(&dependencies, &writes, out)
}

/// Reconciles a container's entries against its (possibly edited) children
/// and writes the new archive: renamed entries get their child's current
/// name, edited serialized children are re-serialized, everything else is
/// copied raw from the original stream.
fn write_container(
    workspace: &Workspace,
    state: &WorkspaceState,
    item: &Arc<WorkspaceItem>,
    out: &mut dyn Write,
) -> Result<()> {
    let container = match item.kind() {
        ItemKind::Container(c) => c,
        _ => return Err(BundleError::Internal("not a container".into())),
    };
    let source = container.source();
    let entries = container.entries();
    let children = item.children();
    if entries.len() != children.len() {
        return Err(BundleError::Internal(format!(
            "container '{}' has {} entries but {} children",
            item.name(),
            entries.len(),
            children.len()
        )));
    }

    let names: Vec<String> = children.iter().map(|c| c.name()).collect();
    let mut writes = Vec::with_capacity(entries.len());
    for ((entry, child), name) in entries.iter().zip(children.iter()).zip(names.iter()) {
        let payload = match child.as_serialized() {
            Some(file) if state.dirty.is_unsaved(child.id()) => {
                let mut rebuilt = Vec::new();
                write_serialized(workspace.table_format(), file, &mut rebuilt)?;
                EntryPayload::Rebuilt(rebuilt)
            }
            _ => EntryPayload::Raw(source.slice(entry.offset, entry.size)?),
        };
        writes.push(EntryWrite {
            name,
            is_structured: entry.is_structured,
            payload,
        });
    }
    workspace.container_format().write_container(&writes, out)
}

fn commit_names(item: &Arc<WorkspaceItem>) {
    item.commit_name();
    for child in item.children() {
        commit_names(&child);
    }
}

/// `file.bin` saves through `file.bin.bksave` in the same directory.
fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unnamed".to_string());
    path.with_file_name(format!("{name}.bksave"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_path_is_a_decorated_sibling() {
        let temp = temp_sibling(Path::new("/data/level0.bks"));
        assert_eq!(temp, PathBuf::from("/data/level0.bks.bksave"));
    }
}
