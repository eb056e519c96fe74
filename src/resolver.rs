//! Pointer resolution across file boundaries.
//!
//! A [`PointerRef`](crate::field::PointerRef) names its target as a local
//! dependency-file index plus an object id. Index 0 is the file the pointer
//! lives in; any other index selects slot `index - 1` of the owning file's
//! dependency list, which is then located in this order:
//!
//! 1. a sibling entry of the same container, matched by name;
//! 2. an already-open visible item, via the name index;
//! 3. the dependency's path on disk, shadow-opened read-only.
//!
//! Shadow opens are reused by physical path, so resolving the same
//! dependency from two files costs one parse, and a pointer resolved from
//! outside a file yields the very same [`AssetRecord`] instance as a local
//! pointer inside it.
//!
//! Resolution failures (missing object id, unlocatable dependency) are not
//! errors: `resolve` returns `None` and logs, because dangling pointers are
//! routine in real data.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::warn;

use crate::field::PointerRef;
use crate::item::WorkspaceItem;
use crate::record::AssetRecord;
use crate::workspace::Workspace;

impl Workspace {
    /// Resolves a pointer stored in `file` to the record it targets,
    /// loading the dependency file if it is not yet open.
    ///
    /// Returns `None` if the object id does not exist in the target file or
    /// the dependency cannot be located.
    pub fn resolve(
        &self,
        file: &Arc<WorkspaceItem>,
        ptr: PointerRef,
    ) -> Option<Arc<AssetRecord>> {
        let serialized = match file.as_serialized() {
            Some(s) => s,
            None => {
                warn!("'{}' holds no objects, cannot resolve pointers", file.name());
                return None;
            }
        };

        if ptr.file_index == 0 {
            return serialized.get(ptr.object_id);
        }

        let dependencies = serialized.dependencies();
        let slot = (ptr.file_index - 1) as usize;
        let dep_name = match dependencies.get(slot) {
            Some(d) => d.clone(),
            None => {
                warn!(
                    "pointer file index {} out of range for '{}' ({} dependencies)",
                    ptr.file_index,
                    file.name(),
                    dependencies.len()
                );
                return None;
            }
        };

        let target = self.locate_dependency(file, &dep_name)?;
        target.as_serialized()?.get(ptr.object_id)
    }

    /// Finds the open item a dependency name refers to, shadow-opening it
    /// from disk as a last resort.
    fn locate_dependency(
        &self,
        from: &Arc<WorkspaceItem>,
        dep_name: &str,
    ) -> Option<Arc<WorkspaceItem>> {
        // Sibling entries of the same container resolve by entry name.
        if let Some(parent) = from.parent() {
            if let Some(sibling) = parent
                .children()
                .into_iter()
                .find(|c| c.name() == dep_name && c.as_serialized().is_some())
            {
                return Some(sibling);
            }
        }

        // An already-visible item with that name.
        if let Some(found) = self.find(dep_name) {
            if found.as_serialized().is_some() {
                return Some(found);
            }
        }

        // Fall back to disk, relative to the referencing file.
        let path = dependency_path(&from.source_path(), dep_name);
        match self.shadow_open(&path) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!(
                    "dependency '{dep_name}' of '{}' cannot be located ({e})",
                    from.name()
                );
                None
            }
        }
    }
}

/// Resolves a dependency string against the referencing file's directory.
fn dependency_path(referencing_file: &Path, dep_name: &str) -> PathBuf {
    let dep = Path::new(dep_name);
    if dep.is_absolute() {
        return dep.to_path_buf();
    }
    match referencing_file.parent() {
        Some(dir) => dir.join(dep),
        None => dep.to_path_buf(),
    }
}
