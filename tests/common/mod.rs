//! Shared fixtures: workspaces over the built-in simple formats, plus
//! helpers that write real fixture files to a temp directory.

#![allow(dead_code)]

use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bundlekit::error::{BundleError, Result};
use bundlekit::format::{
    ContainerFormat, EntryPayload, EntryWrite, ObjectTableFormat, ObjectWrite,
};
use bundlekit::format_simple::{SimpleContainer, SimpleObjectTable};
use bundlekit::storage::{FileSource, LocalDisk, Storage, TempWriter};
use bundlekit::{BincodeFieldCodec, EventSink, FieldCodec, FieldTree, NullSink, Workspace};

/// A workspace over the simple formats with the given sink.
pub fn workspace_with_sink(sink: Arc<dyn EventSink>) -> Arc<Workspace> {
    Workspace::new(
        Arc::new(BincodeFieldCodec),
        Arc::new(SimpleContainer),
        Arc::new(SimpleObjectTable),
        Arc::new(LocalDisk),
        sink,
    )
}

/// A workspace over the simple formats that drops all events.
pub fn workspace() -> Arc<Workspace> {
    workspace_with_sink(Arc::new(NullSink))
}

/// A workspace whose storage can be made to fail specific save steps.
pub fn workspace_with_storage(storage: Arc<dyn Storage>) -> Arc<Workspace> {
    Workspace::new(
        Arc::new(BincodeFieldCodec),
        Arc::new(SimpleContainer),
        Arc::new(SimpleObjectTable),
        storage,
        Arc::new(NullSink),
    )
}

/// Encodes field trees through the reference codec and writes a simple
/// serialized file. Objects are given as (object_id, type_id, tree).
pub fn write_serialized_fixture(
    path: &Path,
    dependencies: &[&str],
    objects: &[(i64, u32, FieldTree)],
) {
    let bytes = serialized_file_bytes(dependencies, objects);
    std::fs::write(path, bytes).expect("write fixture");
}

/// The raw bytes of a simple serialized file, for embedding in containers.
pub fn serialized_file_bytes(
    dependencies: &[&str],
    objects: &[(i64, u32, FieldTree)],
) -> Vec<u8> {
    let codec = BincodeFieldCodec;
    let encoded: Vec<(i64, u32, Vec<u8>)> = objects
        .iter()
        .map(|(id, type_id, tree)| {
            let bytes = codec.write_field_tree(tree).expect("encode fixture object");
            (*id, *type_id, bytes)
        })
        .collect();
    let writes: Vec<ObjectWrite<'_>> = encoded
        .iter()
        .map(|(id, type_id, bytes)| ObjectWrite {
            object_id: *id,
            type_id: *type_id,
            data: Cow::Borrowed(bytes.as_slice()),
        })
        .collect();
    let deps: Vec<String> = dependencies.iter().map(|d| d.to_string()).collect();
    let mut out = Vec::new();
    SimpleObjectTable
        .write_file(&deps, &writes, &mut out)
        .expect("write fixture file");
    out
}

/// Writes a simple container whose entries are (name, is_structured, bytes).
pub fn write_container_fixture(path: &Path, entries: &[(&str, bool, Vec<u8>)]) {
    let writes: Vec<EntryWrite<'_>> = entries
        .iter()
        .map(|(name, is_structured, bytes)| EntryWrite {
            name,
            is_structured: *is_structured,
            payload: EntryPayload::Raw(bytes.as_slice()),
        })
        .collect();
    let mut out = Vec::new();
    SimpleContainer
        .write_container(&writes, &mut out)
        .expect("write fixture container");
    std::fs::write(path, out).expect("write fixture");
}

/// Storage that delegates to [`LocalDisk`] but can be told to refuse the
/// write-access check, the atomic rename, or any read open, for exercising
/// the save protocol's failure taxonomy without touching permission bits.
#[derive(Debug, Default)]
pub struct FailingStorage {
    inner: LocalDisk,
    pub fail_confirm: AtomicBool,
    pub fail_rename: AtomicBool,
    pub fail_read: AtomicBool,
}

impl Storage for FailingStorage {
    fn open_read(&self, path: &Path) -> Result<FileSource> {
        if self.fail_read.load(Ordering::SeqCst) {
            return Err(std::io::Error::other(format!(
                "{}: injected failure",
                path.display()
            ))
            .into());
        }
        self.inner.open_read(path)
    }

    fn create_write(&self, path: &Path) -> Result<TempWriter> {
        self.inner.create_write(path)
    }

    fn confirm_writable(&self, path: &Path) -> Result<()> {
        if self.fail_confirm.load(Ordering::SeqCst) {
            return Err(BundleError::NoWriteAccess(format!(
                "{}: injected failure",
                path.display()
            )));
        }
        self.inner.confirm_writable(path)
    }

    fn atomic_rename(&self, from: &Path, to: &Path) -> Result<()> {
        if self.fail_rename.load(Ordering::SeqCst) {
            return Err(BundleError::RenameFailed(format!(
                "{} -> {}: injected failure",
                from.display(),
                to.display()
            )));
        }
        self.inner.atomic_rename(from, to)
    }
}

/// A temp directory plus path helper, kept alive for the test's duration.
pub struct Sandbox {
    pub dir: tempfile::TempDir,
}

impl Sandbox {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("tempdir"),
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}
