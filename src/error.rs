/*
MIT License

Copyright (c) 2021 Philipp Schuster

Permission is hereby granted, free of charge, to any person obtaining a copy
of this software and associated documentation files (the "Software"), to deal
in the Software without restriction, including without limitation the rights
to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
copies of the Software, and to permit persons to whom the Software is
furnished to do so, subject to the following conditions:

The above copyright notice and this permission notice shall be included in all
copies or substantial portions of the Software.

THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
SOFTWARE.
*/
//! Module for [`TarError`].

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = core::result::Result<T, TarError>;

/// Coarse classification of a [`TarError`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The store or the access mode cannot perform the operation (seeking a stream, deleting
    /// from a sequential archive, enumerating a sequential archive twice, writing a read-only
    /// archive).
    Capability,
    /// A stream, entry or archive was used outside of its lifetime.
    Lifecycle,
    /// Data does not fit or does not follow the ustar layout.
    Format,
    /// A caller supplied an invalid value.
    Argument,
    /// The backing store failed.
    Io,
}

/// Errors of this crate.
#[derive(Debug, Error)]
pub enum TarError {
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),
    #[error("the archive was opened read-only")]
    ReadOnly,
    #[error("the entries of a sequential archive can only be enumerated once")]
    EntriesConsumed,
    #[error("the stream or archive has been disposed")]
    Disposed,
    #[error("a stream for entry {index} is already open")]
    StreamAlreadyOpen { index: usize },
    #[error("the entry content has already been consumed")]
    EntryConsumed,
    #[error("the entry no longer exists in the archive")]
    StaleEntry,
    #[error("name of {len} bytes does not fit the 100 byte name and 155 byte prefix fields")]
    NameTooLong { len: usize },
    #[error("{field} of {len} bytes exceeds its {max} byte field")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },
    #[error("value {value} does not fit an octal field of {width} bytes")]
    FieldOverflow { value: u64, width: usize },
    #[error("archive data ended unexpectedly")]
    UnexpectedEof,
    #[error("relocation delta {0} is not a nonzero multiple of the block size")]
    MisalignedDelta(i64),
    #[error("cannot relocate by {delta} bytes after offset {after_offset} of a {len} byte store")]
    RelocationOutOfRange {
        after_offset: u64,
        delta: i64,
        len: u64,
    },
    #[error("entry index {index} is out of range for {len} entries")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("directory {} does not exist", .0.display())]
    DirectoryNotFound(PathBuf),
    #[error("entry path {0:?} escapes the extraction directory")]
    UnsafePath(String),
    #[error(transparent)]
    Io(io::Error),
}

impl TarError {
    /// Returns the class of the error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Unsupported(_) | Self::ReadOnly | Self::EntriesConsumed => ErrorKind::Capability,
            Self::Disposed
            | Self::StreamAlreadyOpen { .. }
            | Self::EntryConsumed
            | Self::StaleEntry => ErrorKind::Lifecycle,
            Self::NameTooLong { .. }
            | Self::FieldTooLong { .. }
            | Self::FieldOverflow { .. }
            | Self::UnexpectedEof => ErrorKind::Format,
            Self::MisalignedDelta(_)
            | Self::RelocationOutOfRange { .. }
            | Self::IndexOutOfRange { .. }
            | Self::DirectoryNotFound(_)
            | Self::UnsafePath(_) => ErrorKind::Argument,
            Self::Io(_) => ErrorKind::Io,
        }
    }
}

impl From<io::Error> for TarError {
    fn from(err: io::Error) -> Self {
        let kind = err.kind();
        // errors that already went through an `EntryStream` carry the original
        if err.get_ref().is_some_and(|inner| inner.is::<Self>()) {
            return match err.into_inner() {
                Some(inner) => match inner.downcast::<Self>() {
                    Ok(tar) => *tar,
                    Err(other) => Self::Io(io::Error::new(kind, other)),
                },
                None => Self::Io(kind.into()),
            };
        }
        if kind == io::ErrorKind::UnexpectedEof {
            Self::UnexpectedEof
        } else {
            Self::Io(err)
        }
    }
}

impl From<TarError> for io::Error {
    fn from(err: TarError) -> Self {
        let kind = match err {
            TarError::Io(err) => return err,
            TarError::UnexpectedEof => io::ErrorKind::UnexpectedEof,
            ref err => match err.kind() {
                ErrorKind::Capability => io::ErrorKind::Unsupported,
                ErrorKind::Argument => io::ErrorKind::InvalidInput,
                ErrorKind::Format => io::ErrorKind::InvalidData,
                ErrorKind::Lifecycle | ErrorKind::Io => io::ErrorKind::Other,
            },
        };
        Self::new(kind, err)
    }
}
