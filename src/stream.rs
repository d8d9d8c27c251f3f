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
//! Content streams of archive entries.

use crate::block_store::{BlockStore, ViewHandle};
use crate::sequential::SequentialStore;
use crate::{Result, Storage, TarError};
use core::fmt::{Debug, Formatter};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

/// Logical content of one entry: the bytes already stored at the entry's offset plus bytes
/// written past them that are not committed yet.
///
/// The view never stores the offset itself; the owner passes it on every access, so relocating
/// the entry doesn't invalidate the view.
#[derive(Debug, Default)]
pub(crate) struct ViewState {
    physical_len: u64,
    suffix: Vec<u8>,
}

impl ViewState {
    pub(crate) const fn new(physical_len: u64) -> Self {
        Self {
            physical_len,
            suffix: Vec::new(),
        }
    }

    pub(crate) fn len(&self) -> u64 {
        self.physical_len + self.suffix.len() as u64
    }

    pub(crate) fn suffix(&self) -> &[u8] {
        &self.suffix
    }

    pub(crate) const fn physical_len(&self) -> u64 {
        self.physical_len
    }

    /// Reads at logical position `pos`. The stored range is served from `storage` at
    /// `base + pos`, never crossing into the suffix in one call.
    pub(crate) fn read_at<S: Storage + ?Sized>(
        &self,
        storage: &mut S,
        base: u64,
        pos: u64,
        buf: &mut [u8],
    ) -> io::Result<usize> {
        if pos < self.physical_len {
            let n = clamp(buf.len(), self.physical_len - pos);
            storage.read_exact_at(base + pos, &mut buf[..n])?;
            return Ok(n);
        }
        let Some(start) = self.suffix_index(pos) else {
            return Ok(0);
        };
        let n = buf.len().min(self.suffix.len() - start);
        buf[..n].copy_from_slice(&self.suffix[start..start + n]);
        Ok(n)
    }

    /// Writes at logical position `pos`. Stored bytes are overwritten in place, bytes past
    /// them are buffered. A gap between the end of the content and `pos` is zero filled.
    pub(crate) fn write_at<S: Storage + ?Sized>(
        &mut self,
        storage: &mut S,
        base: u64,
        pos: u64,
        buf: &[u8],
    ) -> io::Result<usize> {
        if pos < self.physical_len {
            let n = clamp(buf.len(), self.physical_len - pos);
            storage.write_all_at(base + pos, &buf[..n])?;
            return Ok(n);
        }
        let start = usize::try_from(pos - self.physical_len)
            .map_err(|_| io::Error::new(io::ErrorKind::OutOfMemory, "suffix exceeds memory"))?;
        let end = start + buf.len();
        if end > self.suffix.len() {
            self.suffix.resize(end, 0);
        }
        self.suffix[start..end].copy_from_slice(buf);
        Ok(buf.len())
    }

    /// Marks the suffix as stored. The owner has written it to `base + physical_len`.
    pub(crate) fn commit(&mut self) {
        self.physical_len = self.len();
        self.suffix.clear();
    }

    fn suffix_index(&self, pos: u64) -> Option<usize> {
        let index = usize::try_from(pos - self.physical_len).ok()?;
        (index < self.suffix.len()).then_some(index)
    }
}

fn clamp(len: usize, limit: u64) -> usize {
    usize::try_from(limit).map_or(len, |limit| len.min(limit))
}

enum Source<S: Storage> {
    Random {
        store: Arc<BlockStore<S>>,
        handle: ViewHandle,
    },
    Sequential {
        store: Arc<SequentialStore<S>>,
        generation: u64,
        size: u64,
    },
}

/// Content of one entry, obtained from [`crate::TarEntry::open`].
///
/// Streams of a random-access archive can be read, written and sought. Bytes written past the
/// current end are buffered until [`Write::flush`] or [`EntryStream::close`], which grow the
/// entry in the archive. Streams of a sequential archive are read once, front to back.
///
/// Dropping an open stream closes it; errors are then only logged.
pub struct EntryStream<S: Storage> {
    source: Source<S>,
    position: u64,
    closed: bool,
}

impl<S: Storage> EntryStream<S> {
    pub(crate) fn random(store: Arc<BlockStore<S>>, handle: ViewHandle) -> Self {
        Self {
            source: Source::Random { store, handle },
            position: 0,
            closed: false,
        }
    }

    pub(crate) fn sequential(store: Arc<SequentialStore<S>>, generation: u64, size: u64) -> Self {
        Self {
            source: Source::Sequential {
                store,
                generation,
                size,
            },
            position: 0,
            closed: false,
        }
    }

    /// Logical length of the content, including bytes not flushed yet.
    ///
    /// # Errors
    /// Fails if the stream, its entry or the archive is gone.
    pub fn len(&self) -> Result<u64> {
        self.ensure_open()?;
        match &self.source {
            Source::Random { store, handle } => store.view_len(*handle),
            Source::Sequential { size, .. } => Ok(*size),
        }
    }

    /// # Errors
    /// See [`Self::len`].
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Commits buffered bytes and closes the stream. Every later operation fails with
    /// [`TarError::Disposed`].
    ///
    /// # Errors
    /// Fails if growing the entry fails.
    pub fn close(mut self) -> Result<()> {
        self.close_inner()
    }

    fn close_inner(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        match &self.source {
            Source::Random { store, handle } => store.close_view(*handle),
            Source::Sequential { .. } => Ok(()),
        }
    }

    /// Gives the handle back without committing, after a failed write.
    fn abandon(&mut self) {
        self.closed = true;
        if let Source::Random { store, handle } = &self.source {
            store.release_view(*handle);
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(TarError::Disposed)
        } else {
            Ok(())
        }
    }
}

impl<S: Storage> Read for EntryStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.ensure_open()?;
        let n = match &self.source {
            Source::Random { store, handle } => store.read_at(*handle, self.position, buf)?,
            Source::Sequential {
                store, generation, ..
            } => store.read_content(*generation, buf)?,
        };
        self.position += n as u64;
        Ok(n)
    }
}

impl<S: Storage> Write for EntryStream<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.ensure_open()?;
        let Source::Random { store, handle } = &self.source else {
            return Err(TarError::Unsupported("writing to a sequential entry").into());
        };
        match store.write_at(*handle, self.position, buf) {
            Ok(n) => {
                self.position += n as u64;
                Ok(n)
            }
            Err(err) => {
                self.abandon();
                Err(err.into())
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.ensure_open()?;
        let Source::Random { store, handle } = &self.source else {
            return Err(TarError::Unsupported("writing to a sequential entry").into());
        };
        if let Err(err) = store.commit_view(*handle) {
            self.abandon();
            return Err(err.into());
        }
        Ok(())
    }
}

impl<S: Storage> Seek for EntryStream<S> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.ensure_open()?;
        if let Source::Sequential { .. } = self.source {
            return Err(TarError::Unsupported("seeking a sequential entry").into());
        }
        let len = self.len()?;
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
            SeekFrom::End(delta) => len.checked_add_signed(delta),
        };
        // past the end is fine, a later write zero fills the gap
        let target = target.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("seek to {pos:?} before the start of the entry"),
            )
        })?;
        self.position = target;
        Ok(target)
    }
}

impl<S: Storage> Drop for EntryStream<S> {
    fn drop(&mut self) {
        if let Err(err) = self.close_inner() {
            log::warn!("closing entry stream failed: {err}");
        }
    }
}

impl<S: Storage> Debug for EntryStream<S> {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        let access = match self.source {
            Source::Random { .. } => "random",
            Source::Sequential { .. } => "sequential",
        };
        f.debug_struct("EntryStream")
            .field("access", &access)
            .field("position", &self.position)
            .field("closed", &self.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn store() -> Cursor<Vec<u8>> {
        Cursor::new(b"xxABCDEyy".to_vec())
    }

    #[test]
    fn test_reads_stop_at_the_physical_end() {
        let mut storage = store();
        let view = ViewState::new(5);
        let mut buf = [0; 8];
        assert_eq!(view.read_at(&mut storage, 2, 0, &mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], b"ABCDE");
        assert_eq!(view.read_at(&mut storage, 2, 3, &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"DE");
        assert_eq!(view.read_at(&mut storage, 2, 5, &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_writes_past_the_end_are_buffered() {
        let mut storage = store();
        let mut view = ViewState::new(5);
        // crosses the physical end: only the stored part is written
        assert_eq!(view.write_at(&mut storage, 2, 3, b"defg").unwrap(), 2);
        assert_eq!(view.write_at(&mut storage, 2, 5, b"fg").unwrap(), 2);
        assert_eq!(storage.get_ref(), b"xxABCdeyy");
        assert_eq!(view.suffix(), b"fg");
        assert_eq!(view.len(), 7);

        let mut buf = [0; 8];
        assert_eq!(view.read_at(&mut storage, 2, 5, &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"fg");
        assert_eq!(view.read_at(&mut storage, 2, 6, &mut buf).unwrap(), 1);
        assert_eq!(view.read_at(&mut storage, 2, 7, &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_suffix_gap_is_zero_filled() {
        let mut storage = store();
        let mut view = ViewState::new(0);
        view.write_at(&mut storage, 0, 3, b"z").unwrap();
        assert_eq!(view.suffix(), b"\0\0\0z");
        view.write_at(&mut storage, 0, 1, b"y").unwrap();
        assert_eq!(view.suffix(), b"\0y\0z");
        assert_eq!(storage.get_ref(), b"xxABCDEyy");
    }

    #[test]
    fn test_commit_moves_the_suffix_into_the_physical_range() {
        let mut view = ViewState::new(2);
        let mut storage = store();
        view.write_at(&mut storage, 0, 2, b"123").unwrap();
        view.commit();
        assert_eq!(view.physical_len(), 5);
        assert!(view.suffix().is_empty());
        assert_eq!(view.len(), 5);
    }
}
