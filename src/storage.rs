//! Local storage access: memory-mapped read views and temp-file writers.
//!
//! Read handles are memory maps, so concurrent range reads from background
//! scan jobs and foreground field materialization need no per-file seek
//! lock. A [`FileSource`] is a cheap cloneable view; sub-views share the
//! same map, which is how entries nested inside a container file get their
//! own source without a second handle.
//!
//! Writes never touch an original file directly: the save protocol writes a
//! temporary sibling through [`TempWriter`] and then atomically renames it
//! over the original via [`Storage::atomic_rename`].

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::Mmap;

use crate::error::{BundleError, Result};

/// A read-only view of a physical file (or a byte range within one).
///
/// Cloning is cheap: clones and sub-views share one memory map. The view
/// remembers the physical path it came from, which the resolver uses to
/// locate dependency files relative to their referencing file.
#[derive(Debug, Clone)]
pub struct FileSource {
    backing: Arc<Backing>,
    start: u64,
    len: u64,
    path: PathBuf,
}

enum Backing {
    Map(Mmap),
    /// Zero-length files cannot be mapped on all platforms.
    Empty,
}

impl fmt::Debug for Backing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Map(m) => write!(f, "Map({} bytes)", m.len()),
            Self::Empty => write!(f, "Empty"),
        }
    }
}

impl FileSource {
    /// Opens and memory-maps a file for reading.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();

        let backing = if len == 0 {
            Backing::Empty
        } else {
            // Safety: the map is read-only; an external writer mutating the
            // file under us is accepted the same way the save protocol
            // accepts it — stale views are tracked via the modified set.
            #[allow(unsafe_code)]
            let mmap = unsafe { Mmap::map(&file)? };
            Backing::Map(mmap)
        };

        Ok(Self {
            backing: Arc::new(backing),
            start: 0,
            len,
            path: path.to_path_buf(),
        })
    }

    /// The physical path this view was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Length of the view in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Returns `true` if the view is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The full byte contents of this view.
    pub fn bytes(&self) -> &[u8] {
        match &*self.backing {
            Backing::Map(m) => {
                let start = self.start as usize;
                let end = start + self.len as usize;
                &m[start..end]
            }
            Backing::Empty => &[],
        }
    }

    /// A bounds-checked byte range within this view.
    pub fn slice(&self, offset: u64, size: u64) -> Result<&[u8]> {
        let end = offset.checked_add(size).ok_or_else(|| {
            BundleError::Decode("byte range overflows u64".into())
        })?;
        if end > self.len {
            return Err(BundleError::Decode(format!(
                "byte range {offset}..{end} out of bounds for {} ({} bytes)",
                self.path.display(),
                self.len
            )));
        }
        Ok(&self.bytes()[offset as usize..end as usize])
    }

    /// A sub-view sharing this view's map, used for entries nested inside a
    /// container file. The sub-view keeps the container's physical path.
    pub fn view(&self, offset: u64, size: u64) -> Result<FileSource> {
        // Reuse the bounds check.
        self.slice(offset, size)?;
        Ok(Self {
            backing: Arc::clone(&self.backing),
            start: self.start + offset,
            len: size,
            path: self.path.clone(),
        })
    }
}

/// A buffered writer for a temporary save file.
///
/// Tracks how many bytes were written and syncs to disk on
/// [`TempWriter::finish`], so a successful finish means the temp file's
/// contents are durable before the rename step runs.
#[derive(Debug)]
pub struct TempWriter {
    writer: BufWriter<File>,
    path: PathBuf,
    written: u64,
}

impl TempWriter {
    /// Creates (truncating) the file at `path` for writing.
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            written: 0,
        })
    }

    /// The temp file's path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Total bytes written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Flushes buffers and syncs file contents to disk.
    pub fn finish(mut self) -> Result<PathBuf> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(self.path)
    }
}

impl Write for TempWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.writer.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Interface to local-path storage operations the workspace depends on.
///
/// Only local disks are assumed (no network storage). The trait exists so
/// tests can inject failures into individual save steps without touching
/// the real filesystem's permission bits.
pub trait Storage: Send + Sync + fmt::Debug {
    /// Opens a read view of `path`.
    fn open_read(&self, path: &Path) -> Result<FileSource>;

    /// Creates a temp file for writing at `path` (truncating).
    fn create_write(&self, path: &Path) -> Result<TempWriter>;

    /// Confirms `path` can be opened for writing without truncating it.
    ///
    /// # Errors
    /// [`BundleError::NoWriteAccess`] if the open is denied.
    fn confirm_writable(&self, path: &Path) -> Result<()>;

    /// Atomically renames `from` over `to`.
    ///
    /// # Errors
    /// [`BundleError::RenameFailed`] if the rename did not happen; in that
    /// case `to` is untouched.
    fn atomic_rename(&self, from: &Path, to: &Path) -> Result<()>;

    /// Resolves `path` to its canonical physical form, used to guarantee one
    /// live handle per physical path.
    fn canonicalize(&self, path: &Path) -> Result<PathBuf> {
        Ok(std::fs::canonicalize(path)?)
    }
}

/// The default [`Storage`]: plain local-disk operations.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalDisk;

impl Storage for LocalDisk {
    fn open_read(&self, path: &Path) -> Result<FileSource> {
        FileSource::open(path)
    }

    fn create_write(&self, path: &Path) -> Result<TempWriter> {
        TempWriter::create(path)
    }

    fn confirm_writable(&self, path: &Path) -> Result<()> {
        OpenOptions::new()
            .write(true)
            .open(path)
            .map(|_| ())
            .map_err(|e| {
                BundleError::NoWriteAccess(format!("{}: {e}", path.display()))
            })
    }

    fn atomic_rename(&self, from: &Path, to: &Path) -> Result<()> {
        std::fs::rename(from, to).map_err(|e| {
            BundleError::RenameFailed(format!(
                "{} -> {}: {e}",
                from.display(),
                to.display()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_views_share_the_map_and_keep_bounds() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("blob.bin");
        std::fs::write(&path, b"0123456789").expect("write fixture");

        let source = FileSource::open(&path).expect("open");
        assert_eq!(source.len(), 10);
        assert_eq!(source.slice(2, 3).expect("slice"), b"234");

        let view = source.view(4, 4).expect("view");
        assert_eq!(view.bytes(), b"4567");
        assert_eq!(view.slice(1, 2).expect("slice"), b"56");
        assert!(view.slice(3, 2).is_err());
        assert_eq!(view.path(), path.as_path());
    }

    #[test]
    fn empty_files_open_without_a_map() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("empty.bin");
        std::fs::write(&path, b"").expect("write fixture");

        let source = FileSource::open(&path).expect("open");
        assert!(source.is_empty());
        assert_eq!(source.bytes(), b"");
    }
}
