//! Built-in reference implementations of the format seams.
//!
//! Both formats share one physical shape: a 4-byte magic, the raw payloads
//! written back to back, a bincode-encoded table describing them, and a
//! trailing little-endian `u64` pointing at the table. Putting the table at
//! the tail means payload offsets are known before any bookkeeping is
//! written, so writing is single-pass.
//!
//! ```text
//! [magic(4)] [payload 0] [payload 1] ... [bincode table] [u64 table offset]
//! ```
//!
//! These are fixture-grade formats: the integration tests build real files
//! with them, and embedders can use them for scratch data. Production
//! container formats plug in through the same traits.

use std::io::Write;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::{BundleError, Result};
use crate::format::{
    ContainerFormat, DirectoryEntry, EntryWrite, ObjectEntry, ObjectTableFormat,
    ObjectWrite, SerializedHeader,
};
use crate::storage::FileSource;

/// Magic bytes of the simple serialized-file format.
pub const SERIALIZED_MAGIC: [u8; 4] = *b"BKS1";
/// Magic bytes of the simple container format.
pub const CONTAINER_MAGIC: [u8; 4] = *b"BKC1";

/// Magic(4) + trailing table offset(8).
const MIN_FILE_SIZE: u64 = 12;

#[derive(Debug, Serialize, Deserialize)]
struct RawObjectRow {
    object_id: i64,
    type_id: u32,
    offset: u64,
    size: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct RawFileTable {
    dependencies: Vec<String>,
    objects: Vec<RawObjectRow>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RawDirRow {
    name: String,
    is_structured: bool,
    offset: u64,
    size: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct RawDirectory {
    entries: Vec<RawDirRow>,
}

fn has_magic(source: &FileSource, magic: &[u8; 4]) -> bool {
    source.len() >= MIN_FILE_SIZE && &source.bytes()[..4] == magic
}

/// Decodes the tail table of a simple-format stream.
fn read_tail_table<T: DeserializeOwned>(
    source: &FileSource,
    magic: &[u8; 4],
) -> Result<T> {
    if !has_magic(source, magic) {
        return Err(BundleError::Unrecognized(
            source.path().display().to_string(),
        ));
    }
    let len = source.len();
    let tail = source.slice(len - 8, 8)?;
    let table_offset = u64::from_le_bytes(tail.try_into().unwrap_or([0; 8]));
    if table_offset < 4 || table_offset > len - 8 {
        return Err(BundleError::Decode(format!(
            "table offset {table_offset} out of bounds for {}",
            source.path().display()
        )));
    }
    let table_bytes = source.slice(table_offset, len - 8 - table_offset)?;
    bincode::serde::decode_from_slice(table_bytes, bincode::config::standard())
        .map(|(table, _)| table)
        .map_err(|e| BundleError::Decode(e.to_string()))
}

/// Writes magic + payloads + table + trailing offset in one pass.
fn write_tail_table<T: Serialize>(
    magic: &[u8; 4],
    payloads: &[&[u8]],
    table: &T,
    out: &mut dyn Write,
) -> Result<()> {
    out.write_all(magic)?;
    for payload in payloads {
        out.write_all(payload)?;
    }
    let encoded = bincode::serde::encode_to_vec(table, bincode::config::standard())
        .map_err(|e| BundleError::Encode(e.to_string()))?;
    out.write_all(&encoded)?;
    let table_offset =
        4u64 + payloads.iter().map(|p| p.len() as u64).sum::<u64>();
    out.write_all(&table_offset.to_le_bytes())?;
    Ok(())
}

/// The built-in serialized-file format.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleObjectTable;

impl ObjectTableFormat for SimpleObjectTable {
    fn matches(&self, source: &FileSource) -> bool {
        has_magic(source, &SERIALIZED_MAGIC)
    }

    fn read_table(&self, source: &FileSource) -> Result<SerializedHeader> {
        let table: RawFileTable = read_tail_table(source, &SERIALIZED_MAGIC)?;
        let mut objects = Vec::with_capacity(table.objects.len());
        for row in &table.objects {
            // Validate ranges up front so records never carry bad offsets.
            source.slice(row.offset, row.size)?;
            objects.push(ObjectEntry {
                object_id: row.object_id,
                type_id: row.type_id,
                offset: row.offset,
                size: row.size,
            });
        }
        Ok(SerializedHeader {
            dependencies: table.dependencies,
            objects,
        })
    }

    fn write_file(
        &self,
        dependencies: &[String],
        objects: &[ObjectWrite<'_>],
        out: &mut dyn Write,
    ) -> Result<()> {
        let mut rows = Vec::with_capacity(objects.len());
        let mut offset = 4u64;
        for obj in objects {
            rows.push(RawObjectRow {
                object_id: obj.object_id,
                type_id: obj.type_id,
                offset,
                size: obj.data.len() as u64,
            });
            offset += obj.data.len() as u64;
        }
        let table = RawFileTable {
            dependencies: dependencies.to_vec(),
            objects: rows,
        };
        let payloads: Vec<&[u8]> = objects.iter().map(|o| &*o.data).collect();
        write_tail_table(&SERIALIZED_MAGIC, &payloads, &table, out)
    }
}

/// The built-in container (archive) format.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleContainer;

impl ContainerFormat for SimpleContainer {
    fn matches(&self, source: &FileSource) -> bool {
        has_magic(source, &CONTAINER_MAGIC)
    }

    fn read_directory(&self, source: &FileSource) -> Result<Vec<DirectoryEntry>> {
        let dir: RawDirectory = read_tail_table(source, &CONTAINER_MAGIC)?;
        let mut entries = Vec::with_capacity(dir.entries.len());
        for row in dir.entries {
            source.slice(row.offset, row.size)?;
            entries.push(DirectoryEntry {
                name: row.name,
                is_structured: row.is_structured,
                offset: row.offset,
                size: row.size,
            });
        }
        Ok(entries)
    }

    fn write_container(
        &self,
        entries: &[EntryWrite<'_>],
        out: &mut dyn Write,
    ) -> Result<()> {
        let mut rows = Vec::with_capacity(entries.len());
        let mut offset = 4u64;
        for entry in entries {
            let size = entry.payload.bytes().len() as u64;
            rows.push(RawDirRow {
                name: entry.name.to_string(),
                is_structured: entry.is_structured,
                offset,
                size,
            });
            offset += size;
        }
        let dir = RawDirectory { entries: rows };
        let payloads: Vec<&[u8]> =
            entries.iter().map(|e| e.payload.bytes()).collect();
        write_tail_table(&CONTAINER_MAGIC, &payloads, &dir, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::EntryPayload;
    use std::borrow::Cow;

    fn source_from(bytes: &[u8]) -> FileSource {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("fixture.bin");
        std::fs::write(&path, bytes).expect("write fixture");
        // Opened before the tempdir is dropped; the map outlives the unlink.
        FileSource::open(&path).expect("open")
    }

    #[test]
    fn object_table_round_trips() {
        let objects = vec![
            ObjectWrite {
                object_id: 7,
                type_id: 2,
                data: Cow::Borrowed(&b"seven"[..]),
            },
            ObjectWrite {
                object_id: -3,
                type_id: 9,
                data: Cow::Borrowed(&b"minus three"[..]),
            },
        ];
        let deps = vec!["other.bks".to_string()];

        let mut buf = Vec::new();
        SimpleObjectTable
            .write_file(&deps, &objects, &mut buf)
            .expect("write");

        let source = source_from(&buf);
        assert!(SimpleObjectTable.matches(&source));
        let header = SimpleObjectTable.read_table(&source).expect("read");
        assert_eq!(header.dependencies, deps);
        assert_eq!(header.objects.len(), 2);
        assert_eq!(header.objects[0].object_id, 7);
        let body = source
            .slice(header.objects[1].offset, header.objects[1].size)
            .expect("slice");
        assert_eq!(body, b"minus three");
    }

    #[test]
    fn container_round_trips_and_preserves_entry_order() {
        let entries = vec![
            EntryWrite {
                name: "a.bks",
                is_structured: true,
                payload: EntryPayload::Raw(b"AAAA"),
            },
            EntryWrite {
                name: "tex.bin",
                is_structured: false,
                payload: EntryPayload::Rebuilt(b"BBBBBB".to_vec()),
            },
        ];
        let mut buf = Vec::new();
        SimpleContainer
            .write_container(&entries, &mut buf)
            .expect("write");

        let source = source_from(&buf);
        assert!(SimpleContainer.matches(&source));
        let dir = SimpleContainer.read_directory(&source).expect("read");
        assert_eq!(dir.len(), 2);
        assert_eq!(dir[0].name, "a.bks");
        assert!(dir[0].is_structured);
        assert_eq!(source.slice(dir[1].offset, dir[1].size).expect("slice"), b"BBBBBB");
    }

    #[test]
    fn wrong_magic_is_unrecognized() {
        let source = source_from(b"NOPE-not-a-simple-file-0000000");
        assert!(!SimpleObjectTable.matches(&source));
        assert!(matches!(
            SimpleObjectTable.read_table(&source),
            Err(BundleError::Unrecognized(_))
        ));
    }
}
