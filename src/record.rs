//! Per-object records: identity, byte range, pending edits, and the
//! materialized field-tree cache.
//!
//! An [`AssetRecord`] is created once per addressable object and shared by
//! `Arc`: every pointer that resolves to the same (file, object id) pair
//! yields the same instance, so a mutation staged through one resolution
//! path is visible through every other.

use std::sync::{Arc, Mutex};

use log::warn;

use crate::error::Result;
use crate::field::{FieldCodec, FieldTree};
use crate::format::ObjectEntry;
use crate::storage::FileSource;

/// One addressable object inside a serialized file.
///
/// Identity and byte range are immutable for the record's lifetime; edits
/// and the field-tree cache live behind a lock. Records are rebuilt from
/// scratch when their owning file is re-parsed after a save.
#[derive(Debug)]
pub struct AssetRecord {
    object_id: i64,
    type_id: u32,
    offset: u64,
    size: u64,
    /// Snapshot of the stream this record was parsed from.
    source: FileSource,
    state: Mutex<RecordState>,
}

#[derive(Debug, Default)]
struct RecordState {
    /// Staged new bytes, not yet committed to disk.
    replacement: Option<Arc<Vec<u8>>>,
    /// Materialized field tree; `None` until first materialize or after
    /// invalidation.
    cached: Option<Arc<FieldTree>>,
    /// Set once decoding failed so broken objects are not re-decoded on
    /// every access. Cleared when new bytes are staged.
    unreadable: bool,
}

impl AssetRecord {
    /// Wraps one object-table entry of `source`.
    pub(crate) fn new(entry: ObjectEntry, source: FileSource) -> Self {
        Self {
            object_id: entry.object_id,
            type_id: entry.type_id,
            offset: entry.offset,
            size: entry.size,
            source,
            state: Mutex::new(RecordState::default()),
        }
    }

    /// The object id, unique within the owning file.
    pub fn object_id(&self) -> i64 {
        self.object_id
    }

    /// The object's type discriminator.
    pub fn type_id(&self) -> u32 {
        self.type_id
    }

    /// The object's byte range in the owning file: (offset, size).
    pub fn byte_range(&self) -> (u64, u64) {
        (self.offset, self.size)
    }

    /// Whether a pending replacement is staged.
    pub fn has_replacement(&self) -> bool {
        self.lock_state().replacement.is_some()
    }

    /// The staged replacement bytes, if any.
    pub fn replacement(&self) -> Option<Arc<Vec<u8>>> {
        self.lock_state().replacement.clone()
    }

    /// The object's current raw bytes: the pending replacement if one is
    /// staged, otherwise a copy of the on-disk range. This is the primitive
    /// behind raw export.
    pub fn raw_bytes(&self) -> Result<Vec<u8>> {
        if let Some(replacement) = self.replacement() {
            return Ok(replacement.as_ref().clone());
        }
        Ok(self.source.slice(self.offset, self.size)?.to_vec())
    }

    /// Stages new raw bytes for this object.
    ///
    /// Any cached field tree is stale from this point and is dropped; the
    /// unreadable flag is cleared since the new bytes may well decode.
    /// Dirty-set propagation is the caller's job (the workspace mutation
    /// API does it).
    pub fn stage_replacement(&self, bytes: Vec<u8>) {
        let mut state = self.lock_state();
        state.replacement = Some(Arc::new(bytes));
        state.cached = None;
        state.unreadable = false;
    }

    /// Encodes `tree` through `codec` and stages the result.
    ///
    /// # Errors
    /// On encode failure nothing is installed and the prior state (bytes,
    /// cache, dirt) is fully preserved.
    pub fn stage_field_tree(
        &self,
        tree: &FieldTree,
        codec: &dyn FieldCodec,
    ) -> Result<()> {
        let bytes = codec.write_field_tree(tree)?;
        self.stage_replacement(bytes);
        Ok(())
    }

    /// Returns the object's field tree, decoding and caching it on first
    /// access.
    ///
    /// Decoding order: a valid cache wins; otherwise pending replacement
    /// bytes if staged, else the on-disk byte range. Malformed objects are
    /// expected in the wild, so a decode failure is absorbed: the record is
    /// marked unreadable, nothing is cached, and `None` is returned.
    pub fn materialize(&self, codec: &dyn FieldCodec) -> Option<Arc<FieldTree>> {
        let mut state = self.lock_state();
        if let Some(cached) = &state.cached {
            return Some(Arc::clone(cached));
        }
        if state.unreadable {
            return None;
        }

        let decoded = match &state.replacement {
            Some(bytes) => codec.read_field_tree(bytes, self.type_id),
            None => match self.source.slice(self.offset, self.size) {
                Ok(raw) => codec.read_field_tree(raw, self.type_id),
                Err(e) => Err(e),
            },
        };

        match decoded {
            Ok(tree) => {
                let tree = Arc::new(tree);
                state.cached = Some(Arc::clone(&tree));
                Some(tree)
            }
            Err(e) => {
                warn!(
                    "object {} in {} is unreadable: {e}",
                    self.object_id,
                    self.source.path().display()
                );
                state.unreadable = true;
                None
            }
        }
    }

    /// Whether decoding this object has failed.
    pub fn is_unreadable(&self) -> bool {
        self.lock_state().unreadable
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, RecordState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BundleError;
    use crate::field::{BincodeFieldCodec, FieldValue};

    fn record_over(bytes: &[u8]) -> AssetRecord {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("file.bin");
        std::fs::write(&path, bytes).expect("write fixture");
        let source = FileSource::open(&path).expect("open");
        AssetRecord::new(
            ObjectEntry {
                object_id: 1,
                type_id: 0,
                offset: 0,
                size: bytes.len() as u64,
            },
            source,
        )
    }

    #[test]
    fn materialize_caches_one_instance() {
        let codec = BincodeFieldCodec;
        let tree = FieldTree::leaf("m_Value", "int", FieldValue::Int(5));
        let bytes = codec.write_field_tree(&tree).expect("encode");

        let record = record_over(&bytes);
        let a = record.materialize(&codec).expect("materialize");
        let b = record.materialize(&codec).expect("materialize");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(*a, tree);
    }

    #[test]
    fn staging_invalidate_the_cache_and_wins_over_disk() {
        let codec = BincodeFieldCodec;
        let old = FieldTree::leaf("m_Value", "int", FieldValue::Int(5));
        let record = record_over(&codec.write_field_tree(&old).expect("encode"));
        let before = record.materialize(&codec).expect("materialize");

        let new = FieldTree::leaf("m_Value", "int", FieldValue::Int(99));
        record.stage_field_tree(&new, &codec).expect("stage");
        assert!(record.has_replacement());

        let after = record.materialize(&codec).expect("materialize");
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(*after, new);
    }

    #[test]
    fn unreadable_objects_fail_once_and_stay_usable() {
        let codec = BincodeFieldCodec;
        let record = record_over(&[0xDE, 0xAD, 0xBE, 0xEF]);
        assert!(record.materialize(&codec).is_none());
        assert!(record.is_unreadable());
        // Second call short-circuits, still no cache.
        assert!(record.materialize(&codec).is_none());

        // Staging fresh, valid bytes makes the record readable again.
        let fixed = FieldTree::leaf("m_Value", "int", FieldValue::Int(1));
        record.stage_field_tree(&fixed, &codec).expect("stage");
        assert_eq!(*record.materialize(&codec).expect("materialize"), fixed);
    }

    #[test]
    fn encode_failure_leaves_prior_state_untouched() {
        struct FailingCodec;
        impl FieldCodec for FailingCodec {
            fn read_field_tree(&self, _: &[u8], _: u32) -> Result<FieldTree> {
                Err(BundleError::Decode("nope".into()))
            }
            fn write_field_tree(&self, _: &FieldTree) -> Result<Vec<u8>> {
                Err(BundleError::Encode("nope".into()))
            }
        }

        let codec = BincodeFieldCodec;
        let old = FieldTree::leaf("m_Value", "int", FieldValue::Int(5));
        let record = record_over(&codec.write_field_tree(&old).expect("encode"));
        let cached = record.materialize(&codec).expect("materialize");

        let err = record.stage_field_tree(&old, &FailingCodec);
        assert!(matches!(err, Err(BundleError::Encode(_))));
        assert!(!record.has_replacement());
        let still = record.materialize(&codec).expect("materialize");
        assert!(Arc::ptr_eq(&cached, &still));
    }
}
