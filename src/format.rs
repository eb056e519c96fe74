//! Format seams: container directories and object tables.
//!
//! The workspace only ever speaks to serialized files through these two
//! traits. It enumerates directory entries and object tables on open, and
//! hands back reconciled entries / object writes on save; the binary layout
//! itself stays behind the trait. [`crate::format_simple`] ships a built-in
//! reference implementation of both.

use std::borrow::Cow;
use std::io::Write;

use crate::error::Result;
use crate::storage::FileSource;

/// One entry of a container file's directory, as read from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// Entry name, unique within the container.
    pub name: String,
    /// `true` if the entry is itself a serialized file of addressable
    /// objects (as opposed to an opaque resource blob).
    pub is_structured: bool,
    /// Byte offset of the entry's data within the container stream.
    pub offset: u64,
    /// Byte size of the entry's data.
    pub size: u64,
}

/// One row of a serialized file's object table, as read from disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectEntry {
    /// Object id, unique within the owning file.
    pub object_id: i64,
    /// Type discriminator, passed through to the field codec.
    pub type_id: u32,
    /// Byte offset of the object's data within the file.
    pub offset: u64,
    /// Byte size of the object's data.
    pub size: u64,
}

/// The parsed header of a serialized file: its dependency list plus its
/// object table, in table order.
#[derive(Debug, Clone, Default)]
pub struct SerializedHeader {
    /// Paths (or names) of files this file's pointers may reference.
    /// Pointer `file_index` N (N > 0) selects `dependencies[N - 1]`.
    pub dependencies: Vec<String>,
    /// The object table in on-disk order.
    pub objects: Vec<ObjectEntry>,
}

/// Reconciled data for one container entry being written out.
#[derive(Debug)]
pub enum EntryPayload<'a> {
    /// The entry was untouched: copy its bytes from the original stream.
    Raw(&'a [u8]),
    /// The entry had pending edits: freshly serialized bytes.
    Rebuilt(Vec<u8>),
}

impl EntryPayload<'_> {
    /// The payload bytes, whichever side they come from.
    pub fn bytes(&self) -> &[u8] {
        match self {
            Self::Raw(b) => b,
            Self::Rebuilt(v) => v,
        }
    }
}

/// One container entry to be written by [`ContainerFormat::write_container`].
#[derive(Debug)]
pub struct EntryWrite<'a> {
    /// Current (possibly renamed) entry name.
    pub name: &'a str,
    /// Whether the entry is a serialized file.
    pub is_structured: bool,
    /// The entry's data.
    pub payload: EntryPayload<'a>,
}

/// One object to be written by [`ObjectTableFormat::write_file`].
#[derive(Debug)]
pub struct ObjectWrite<'a> {
    /// Object id, preserved across the save.
    pub object_id: i64,
    /// Type discriminator, preserved across the save.
    pub type_id: u32,
    /// The object's bytes: a pending replacement if one was staged,
    /// otherwise the original on-disk range.
    pub data: Cow<'a, [u8]>,
}

/// Interface to a container (archive) format.
pub trait ContainerFormat: Send + Sync {
    /// Cheap sniff: does this stream look like this container format?
    fn matches(&self, source: &FileSource) -> bool;

    /// Enumerates the container's directory entries, in archive order.
    fn read_directory(&self, source: &FileSource) -> Result<Vec<DirectoryEntry>>;

    /// Writes a complete container stream from reconciled entries.
    fn write_container(
        &self,
        entries: &[EntryWrite<'_>],
        out: &mut dyn Write,
    ) -> Result<()>;
}

/// Interface to a serialized-file (object table) format.
pub trait ObjectTableFormat: Send + Sync {
    /// Cheap sniff: does this stream look like this file format?
    fn matches(&self, source: &FileSource) -> bool;

    /// Parses the file's dependency list and object table.
    fn read_table(&self, source: &FileSource) -> Result<SerializedHeader>;

    /// Writes a complete serialized file from its dependency list and the
    /// reconciled object payloads, in the given order.
    fn write_file(
        &self,
        dependencies: &[String],
        objects: &[ObjectWrite<'_>],
        out: &mut dyn Write,
    ) -> Result<()>;
}
