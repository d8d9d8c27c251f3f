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
//! Library to read and write POSIX ustar (Tar) archives on top of any byte store.
//!
//! The block layout is managed in two ways, depending on what the backing [`Storage`] can do:
//!
//! - **Random access** (files, in-memory buffers): the whole archive is parsed into an offset
//!   table up front. Entries can be created, opened, grown, shrunk and deleted in place. Only the
//!   blocks after a changed entry are moved; unrelated entries are never rewritten. See
//!   [`BlockStore`].
//! - **Sequential access** (network streams, pipes): entries are discovered lazily, one at a
//!   time, in a single forward pass. New entries can only be appended.
//!
//! [`TarArchive`] picks the mode from [`Storage::can_seek`] and exposes a uniform entry API
//! over both.
//!
//! The crate focuses on the base ustar format. GNU extensions such as long-name blocks, sparse
//! files and multi-volume archives are not supported; their headers are reported as
//! [`EntryKind::Metadata`] entries. Names up to 255 bytes are supported through the ustar
//! name/prefix split. Header checksums are written correctly but not verified on read.
//!
//! # Example
//! ```
//! use std::io::{Cursor, Read};
//! use ustar_rw::{ArchiveMode, TarArchive};
//!
//! # fn main() -> ustar_rw::Result<()> {
//! let archive = TarArchive::new(Cursor::new(Vec::new()), ArchiveMode::Create)?;
//! archive.create_entry("docs/")?;
//! archive.create_entry_with("docs/hello.txt", b"Hello World\n")?;
//! let bytes = archive.into_inner()?.into_inner();
//!
//! let archive = TarArchive::new(Cursor::new(bytes), ArchiveMode::Read)?;
//! for entry in archive.entries()? {
//!     let mut entry = entry?;
//!     let mut content = String::new();
//!     entry.open()?.read_to_string(&mut content)?;
//!     println!("{}: {:?}", entry.full_name(), content);
//! }
//! # Ok(())
//! # }
//! ```

#![deny(rustdoc::all)]
#![allow(rustdoc::missing_doc_code_examples)]
#![deny(clippy::all)]
#![deny(missing_debug_implementations)]

/// Each Archive Entry (either Header or Data Block) is a block of 512 bytes.
pub const BLOCKSIZE: usize = 512;

mod archive;
mod block_store;
mod error;
mod header;
mod sequential;
mod storage;
mod stream;
mod tar_format_types;

pub use archive::*;
pub use block_store::{BlockRange, BlockStore};
pub use error::*;
pub use header::*;
pub use sequential::SequentialEntries;
pub use storage::*;
pub use stream::EntryStream;
pub use tar_format_types::*;

/// Rounds `len` up to the next multiple of [`BLOCKSIZE`].
#[must_use]
pub const fn block_align(len: u64) -> u64 {
    len.div_ceil(BLOCKSIZE as u64) * BLOCKSIZE as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_align() {
        assert_eq!(block_align(0), 0);
        assert_eq!(block_align(1), 512);
        assert_eq!(block_align(512), 512);
        assert_eq!(block_align(513), 1024);
    }
}
