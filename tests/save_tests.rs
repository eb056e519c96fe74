//! Save protocol: write-temp/rename/reopen behavior, the failure taxonomy,
//! and dirty-state guarantees around failed saves.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use bundlekit::{
    BundleError, CollectingSink, FieldTree, FieldValue, ItemKind, WorkspaceEvent,
};
use common::{
    workspace, workspace_with_sink, workspace_with_storage, write_container_fixture,
    write_serialized_fixture, serialized_file_bytes, FailingStorage, Sandbox,
};

fn int_tree(name: &str, value: i64) -> FieldTree {
    FieldTree::leaf(name, "int", FieldValue::Int(value))
}

#[test]
fn saving_a_serialized_file_commits_edits_and_clears_unsaved() {
    let sandbox = Sandbox::new();
    let path = sandbox.path("level.bks");
    write_serialized_fixture(
        &path,
        &[],
        &[(7, 3, int_tree("m_Speed", 5)), (8, 0, int_tree("m_Mass", 2))],
    );

    let ws = workspace();
    let item = ws.open_serialized_file(&path).expect("open");
    let edited = int_tree("m_Speed", 42);
    ws.stage_field_tree(&item, 7, &edited).expect("stage");
    assert!(ws.is_unsaved(item.id()));

    ws.save(&item).expect("save");

    // Unsaved is cleared, modified persists for the session.
    assert!(!ws.is_unsaved(item.id()));
    assert!(ws.is_modified(item.id()));
    assert_eq!(item.original_name(), item.name());

    // The live handle was swapped to the new on-disk state: fresh records,
    // no pending replacement, edits visible through materialize.
    let file = item.as_serialized().expect("serialized");
    let record = file.get(7).expect("record");
    assert!(!record.has_replacement());
    assert_eq!(*ws.materialize(&record).expect("materialize"), edited);
    let untouched = file.get(8).expect("record");
    assert_eq!(
        *ws.materialize(&untouched).expect("materialize"),
        int_tree("m_Mass", 2)
    );

    // The temp sibling was consumed by the rename.
    assert!(!sandbox.path("level.bks.bksave").exists());

    // A brand-new workspace reading from disk agrees.
    let fresh = workspace();
    let reread = fresh.open_serialized_file(&path).expect("open");
    let record = reread.as_serialized().expect("serialized").get(7).expect("record");
    assert_eq!(*fresh.materialize(&record).expect("materialize"), edited);
}

#[test]
fn saving_a_container_rebuilds_dirty_children_and_copies_the_rest_raw() {
    let sandbox = Sandbox::new();
    let a = serialized_file_bytes(&[], &[(1, 0, int_tree("m_A", 1))]);
    let b = serialized_file_bytes(&[], &[(2, 0, int_tree("m_B", 2))]);
    let tex = vec![0x5A; 100];
    let path = sandbox.path("bundle.bkc");
    write_container_fixture(
        &path,
        &[("a.bks", true, a), ("b.bks", true, b.clone()), ("tex.bin", false, tex.clone())],
    );

    let ws = workspace();
    let root = ws.open_container(&path).expect("open");
    let children = root.children();

    let edited = int_tree("m_A", 77);
    ws.stage_field_tree(&children[0], 1, &edited).expect("stage");
    ws.rename(&children[0], "a_new.bks");
    assert!(ws.is_unsaved(root.id()));

    ws.save(&root).expect("save");
    assert!(!ws.is_unsaved(root.id()));
    assert!(!ws.is_unsaved(children[0].id()));
    assert_eq!(children[0].original_name(), "a_new.bks");

    // Reread from disk with a fresh workspace.
    let fresh = workspace();
    let reroot = fresh.open_container(&path).expect("open");
    let rechildren = reroot.children();
    assert_eq!(
        rechildren.iter().map(|c| c.name()).collect::<Vec<_>>(),
        ["a_new.bks", "b.bks", "tex.bin"]
    );

    let record = rechildren[0]
        .as_serialized()
        .expect("serialized")
        .get(1)
        .expect("record");
    assert_eq!(*fresh.materialize(&record).expect("materialize"), edited);

    // Untouched entries were copied byte for byte.
    match rechildren[2].kind() {
        ItemKind::Resource(blob) => assert_eq!(blob.source().bytes(), tex.as_slice()),
        other => panic!("expected resource, got {other:?}"),
    }
    match rechildren[1].kind() {
        ItemKind::Serialized(_) => {
            assert_eq!(rechildren[1].as_serialized().map(|f| f.object_count()), Some(1));
        }
        other => panic!("expected serialized, got {other:?}"),
    }
}

#[test]
fn save_without_pending_edits_is_a_no_op() {
    let sandbox = Sandbox::new();
    let path = sandbox.path("level.bks");
    write_serialized_fixture(&path, &[], &[(1, 0, int_tree("m", 1))]);

    let sink = Arc::new(CollectingSink::new());
    let ws = workspace_with_sink(sink.clone());
    let item = ws.open_serialized_file(&path).expect("open");

    ws.save(&item).expect("save");
    assert!(!sink
        .events()
        .iter()
        .any(|e| matches!(e, WorkspaceEvent::Saved { .. })));

    // Save, then save again: the second is the no-op.
    ws.stage_field_tree(&item, 1, &int_tree("m", 2)).expect("stage");
    ws.save(&item).expect("save");
    ws.save(&item).expect("save");
    let saved = sink
        .events()
        .iter()
        .filter(|e| matches!(e, WorkspaceEvent::Saved { .. }))
        .count();
    assert_eq!(saved, 1);
}

#[test]
fn saving_a_non_root_item_is_rejected() {
    let sandbox = Sandbox::new();
    let a = serialized_file_bytes(&[], &[(1, 0, int_tree("m", 1))]);
    let path = sandbox.path("bundle.bkc");
    write_container_fixture(&path, &[("a.bks", true, a)]);

    let ws = workspace();
    let root = ws.open_container(&path).expect("open");
    let child = &root.children()[0];
    ws.stage_field_tree(child, 1, &int_tree("m", 2)).expect("stage");

    assert!(matches!(ws.save(child), Err(BundleError::Internal(_))));
    // The edit is still pending; saving the root commits it.
    assert!(ws.is_unsaved(root.id()));
    ws.save(&root).expect("save");
    assert!(!ws.is_unsaved(root.id()));
}

#[test]
fn refused_write_access_aborts_before_writing_and_keeps_edits_pending() {
    let sandbox = Sandbox::new();
    let path = sandbox.path("level.bks");
    write_serialized_fixture(&path, &[], &[(1, 0, int_tree("m", 1))]);
    let original = std::fs::read(&path).expect("read fixture");

    let storage = Arc::new(FailingStorage::default());
    let ws = workspace_with_storage(storage.clone());
    let item = ws.open_serialized_file(&path).expect("open");
    let edited = int_tree("m", 9);
    ws.stage_field_tree(&item, 1, &edited).expect("stage");

    storage.fail_confirm.store(true, Ordering::SeqCst);
    assert!(matches!(ws.save(&item), Err(BundleError::NoWriteAccess(_))));

    // Nothing was written, not even a temp file, and the edit survives.
    assert_eq!(std::fs::read(&path).expect("read"), original);
    assert!(!sandbox.path("level.bks.bksave").exists());
    assert!(ws.is_unsaved(item.id()));

    // Retrying once the path is writable commits the same edit.
    storage.fail_confirm.store(false, Ordering::SeqCst);
    ws.save(&item).expect("save");
    assert!(!ws.is_unsaved(item.id()));
    assert_ne!(std::fs::read(&path).expect("read"), original);
}

#[test]
fn failed_rename_leaves_the_original_intact_and_edits_pending() {
    let sandbox = Sandbox::new();
    let path = sandbox.path("level.bks");
    write_serialized_fixture(&path, &[], &[(1, 0, int_tree("m", 1))]);
    let original = std::fs::read(&path).expect("read fixture");

    let storage = Arc::new(FailingStorage::default());
    let ws = workspace_with_storage(storage.clone());
    let item = ws.open_serialized_file(&path).expect("open");
    ws.stage_field_tree(&item, 1, &int_tree("m", 9)).expect("stage");

    storage.fail_rename.store(true, Ordering::SeqCst);
    assert!(matches!(ws.save(&item), Err(BundleError::RenameFailed(_))));

    // The commit point was never crossed: old bytes on disk, the fully
    // written temp may remain for inspection, the edit is still pending.
    assert_eq!(std::fs::read(&path).expect("read"), original);
    assert!(sandbox.path("level.bks.bksave").exists());
    assert!(ws.is_unsaved(item.id()));

    storage.fail_rename.store(false, Ordering::SeqCst);
    ws.save(&item).expect("save");
    assert!(!ws.is_unsaved(item.id()));
    assert!(!sandbox.path("level.bks.bksave").exists());
    assert_ne!(std::fs::read(&path).expect("read"), original);
}

#[test]
fn failed_reparse_after_rename_reports_the_save_but_keeps_edits_pending() {
    let sandbox = Sandbox::new();
    let path = sandbox.path("level.bks");
    write_serialized_fixture(&path, &[], &[(1, 0, int_tree("m", 1))]);

    let storage = Arc::new(FailingStorage::default());
    let ws = workspace_with_storage(storage.clone());
    let item = ws.open_serialized_file(&path).expect("open");
    let edited = int_tree("m", 9);
    ws.stage_field_tree(&item, 1, &edited).expect("stage");

    // Everything up to the rename works; re-reading the saved file fails.
    storage.fail_read.store(true, Ordering::SeqCst);
    let err = ws.save(&item);
    assert!(matches!(err, Err(BundleError::ReparseFailed(_))));
    assert!(!err.unwrap_err().is_recoverable_save_error());

    // The rename was crossed: the new bytes ARE on disk.
    let fresh = workspace();
    let reread = fresh.open_serialized_file(&path).expect("open");
    let record = reread.as_serialized().expect("serialized").get(1).expect("record");
    assert_eq!(*fresh.materialize(&record).expect("materialize"), edited);

    // But the in-memory mirror could not be rebuilt, so nothing was
    // forgotten: the item is still unsaved.
    assert!(ws.is_unsaved(item.id()));

    // Once reads work again, a retry commits cleanly.
    storage.fail_read.store(false, Ordering::SeqCst);
    ws.save(&item).expect("save");
    assert!(!ws.is_unsaved(item.id()));
}

#[test]
fn saving_a_renamed_resource_rewrites_identical_bytes_and_commits_the_name() {
    let sandbox = Sandbox::new();
    let path = sandbox.path("res.bin");
    let payload = vec![0xC3; 48];
    std::fs::write(&path, &payload).expect("write fixture");

    let ws = workspace();
    let item = ws.open_resource(&path).expect("open");
    ws.rename(&item, "renamed.bin");
    assert!(ws.is_unsaved(item.id()));

    ws.save(&item).expect("save");
    assert!(!ws.is_unsaved(item.id()));
    assert_eq!(item.original_name(), "renamed.bin");
    assert_eq!(std::fs::read(&path).expect("read"), payload);
}
