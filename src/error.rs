//! Centralized error handling for bundlekit.
//!
//! Every failure condition in the crate is represented as a [`BundleError`]
//! value and propagated through the crate-wide [`Result`] alias; the library
//! contains no panicking paths (enforced by `#![deny(clippy::panic)]` and
//! `#![deny(clippy::unwrap_used)]`).
//!
//! ## Error Categories
//!
//! The variants mirror the failure domains of the workspace:
//!
//! - **I/O** ([`BundleError::Io`]): low-level file system operations
//! - **Load** ([`BundleError::Unrecognized`]): a file whose format could not
//!   be determined
//! - **Decode / Encode** ([`BundleError::Decode`], [`BundleError::Encode`]):
//!   field-tree deserialization and serialization failures
//! - **Save** ([`BundleError::NoWriteAccess`], [`BundleError::RenameFailed`],
//!   [`BundleError::ReparseFailed`]): the three outcomes of a failed save,
//!   in increasing order of severity
//! - **Cancelled** ([`BundleError::Cancelled`]): a batch job skipped because
//!   its batch was cancelled
//! - **Internal** ([`BundleError::Internal`]): logic errors (should not occur
//!   in production; please report as bugs)
//!
//! ## Cloneability
//!
//! [`BundleError`] is `Clone` so that one failure can be recorded per job in
//! a batch report and also returned to the caller. I/O errors are wrapped in
//! `Arc` to make cloning cheap.

use std::fmt;
use std::io;
use std::sync::Arc;

/// A specialized `Result` type for bundlekit operations.
pub type Result<T> = std::result::Result<T, BundleError>;

/// The master error enum covering all failure domains in bundlekit.
#[derive(Debug, Clone)]
pub enum BundleError {
    /// Low-level I/O failure (file not found, permissions, disk full, ...).
    ///
    /// The underlying `io::Error` is wrapped in an `Arc` to keep the error
    /// `Clone` without copying.
    Io(Arc<io::Error>),

    /// The file's format could not be determined by any registered format.
    ///
    /// The string is the offending file's name or path. Batch loads record
    /// this per file and continue with the rest of the batch.
    Unrecognized(String),

    /// An object's field tree could not be deserialized.
    ///
    /// Malformed or version-mismatched objects are expected in the wild;
    /// callers treat the object as unreadable and keep the workspace usable.
    Decode(String),

    /// New bytes for an object could not be encoded.
    ///
    /// On this error no pending replacement is installed and the object's
    /// prior state is preserved.
    Encode(String),

    /// The save target is not writable (read-only filesystem, file in use).
    ///
    /// Recoverable: the item stays in the unsaved set and the save can be
    /// retried after the caller fixes the environment.
    NoWriteAccess(String),

    /// The atomic rename of the temporary file over the original failed.
    ///
    /// Recoverable: the original file is untouched, the item stays in the
    /// unsaved set. A temporary sibling file may be left behind.
    RenameFailed(String),

    /// The file was saved, but re-parsing it afterwards failed.
    ///
    /// Severe: the on-disk bytes are correct, but the in-memory mirror could
    /// not be rebuilt and must no longer be trusted. The caller should close
    /// and reload the file from disk.
    ReparseFailed(String),

    /// A batch job was skipped because its batch was cancelled.
    Cancelled,

    /// Logic error in the workspace or job machinery.
    ///
    /// Should not occur in production; indicates a bug in the library.
    Internal(String),
}

impl BundleError {
    /// Returns `true` for save failures that left the on-disk file intact
    /// and the dirty state preserved, so the save can simply be retried.
    pub fn is_recoverable_save_error(&self) -> bool {
        matches!(self, Self::NoWriteAccess(_) | Self::RenameFailed(_))
    }
}

impl fmt::Display for BundleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O Error: {e}"),
            Self::Unrecognized(s) => write!(f, "Unrecognized file format: {s}"),
            Self::Decode(s) => write!(f, "Decode Error: {s}"),
            Self::Encode(s) => write!(f, "Encode Error: {s}"),
            Self::NoWriteAccess(s) => write!(f, "No write access: {s}"),
            Self::RenameFailed(s) => write!(f, "Rename failed: {s}"),
            Self::ReparseFailed(s) => {
                write!(f, "File saved, but re-parsing it failed: {s}")
            }
            Self::Cancelled => write!(f, "Cancelled"),
            Self::Internal(s) => write!(f, "Internal Logic Error: {s}"),
        }
    }
}

impl std::error::Error for BundleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for BundleError {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}
