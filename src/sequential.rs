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
//! Forward-only archives over stores that can't seek.
//!
//! Entries are read in one pass. Moving to the next entry skips whatever the caller left of
//! the previous one and revokes its stream, so at most one stream is ever usable.

use crate::storage::{copy_padded, ZERO_BLOCK};
use crate::{
    block_align, ArchiveMode, EntryStream, Header, Result, Storage, TarEntry, TarError, BLOCKSIZE,
};
use core::fmt::{Debug, Formatter};
use parking_lot::Mutex;
use std::io::Read;
use std::sync::Arc;

/// Content of the entry the reader currently stands in.
#[derive(Debug, Copy, Clone)]
struct Current {
    generation: u64,
    remaining: u64,
    padding: u64,
}

struct SequentialState<S> {
    storage: Option<S>,
    mode: ArchiveMode,
    generation: u64,
    current: Option<Current>,
    finished: bool,
    entries_taken: bool,
}

/// Reader and writer state of a sequential archive. Entries and their streams share it; the
/// lock is never contended because there is only one consumer.
pub(crate) struct SequentialStore<S> {
    state: Mutex<SequentialState<S>>,
}

impl<S: Storage> SequentialStore<S> {
    pub(crate) fn new(storage: S, mode: ArchiveMode) -> Result<Self> {
        if mode == ArchiveMode::Update {
            return Err(TarError::Unsupported("updating an archive on a non-seekable store"));
        }
        Ok(Self {
            state: Mutex::new(SequentialState {
                storage: Some(storage),
                mode,
                generation: 0,
                current: None,
                finished: false,
                entries_taken: false,
            }),
        })
    }

    /// Hands out the only enumeration of the archive.
    pub(crate) fn take_entries(self: &Arc<Self>) -> Result<SequentialEntries<S>> {
        let mut state = self.state.lock();
        if state.storage.is_none() {
            return Err(TarError::Disposed);
        }
        if state.mode == ArchiveMode::Create {
            return Err(TarError::Unsupported("reading an archive opened for creation"));
        }
        if state.entries_taken {
            return Err(TarError::EntriesConsumed);
        }
        state.entries_taken = true;
        Ok(SequentialEntries {
            store: Arc::clone(self),
        })
    }

    /// Moves to the next header. Returns `None` at the end of the archive.
    fn advance(&self) -> Result<Option<(Header, u64)>> {
        let mut state = self.state.lock();
        if state.finished {
            return Ok(None);
        }
        let result = state.advance();
        if !matches!(result, Ok(Some(_))) {
            state.finished = true;
        }
        result
    }

    /// Reads content of the entry with `generation`.
    pub(crate) fn read_content(&self, generation: u64, buf: &mut [u8]) -> Result<usize> {
        let mut state = self.state.lock();
        let state = &mut *state;
        let storage = state.storage.as_mut().ok_or(TarError::Disposed)?;
        let current = match &mut state.current {
            Some(current) if current.generation == generation => current,
            _ => return Err(TarError::Disposed),
        };
        let n = usize::try_from(current.remaining).map_or(buf.len(), |left| left.min(buf.len()));
        if n == 0 {
            return Ok(0);
        }
        let n = storage.read(&mut buf[..n])?;
        if n == 0 {
            return Err(TarError::UnexpectedEof);
        }
        current.remaining -= n as u64;
        Ok(n)
    }

    /// Writes `header` and `header.size` bytes of `content`, padded to the block size.
    pub(crate) fn append<R: Read + ?Sized>(&self, header: &Header, content: &mut R) -> Result<()> {
        let mut state = self.state.lock();
        if state.mode != ArchiveMode::Create {
            return Err(TarError::ReadOnly);
        }
        let block = header.encode()?;
        let storage = state.storage.as_mut().ok_or(TarError::Disposed)?;
        storage.write_all(&block)?;
        copy_padded(content, header.size, |_, chunk| storage.write_all(chunk))?;
        log::debug!("Appended entry {:?}", header.name);
        Ok(())
    }

    /// Terminates a created archive with two zero blocks and hands the storage out. Returns
    /// `None` if already disposed.
    pub(crate) fn dispose(&self) -> Result<Option<S>> {
        let mut state = self.state.lock();
        let state = &mut *state;
        state.current = None;
        let Some(storage) = state.storage.as_mut() else {
            return Ok(None);
        };
        let result = if state.mode == ArchiveMode::Create {
            storage
                .write_all(&ZERO_BLOCK)
                .and_then(|()| storage.write_all(&ZERO_BLOCK))
                .and_then(|()| storage.flush())
        } else {
            Ok(())
        };
        let storage = state.storage.take();
        result?;
        Ok(storage)
    }
}

impl<S: Storage> SequentialState<S> {
    fn advance(&mut self) -> Result<Option<(Header, u64)>> {
        let storage = self.storage.as_mut().ok_or(TarError::Disposed)?;
        if let Some(current) = self.current.take() {
            skip(storage, current.remaining + current.padding)?;
        }
        self.generation += 1;

        let mut block = [0; BLOCKSIZE];
        let mut filled = 0;
        while filled < BLOCKSIZE {
            match storage.read(&mut block[filled..])? {
                0 => break,
                n => filled += n,
            }
        }
        if filled == 0 {
            log::warn!("Reached end of Tar archive data without finding zero/end blocks!");
            return Ok(None);
        }
        if filled < BLOCKSIZE {
            return Err(TarError::UnexpectedEof);
        }

        let header = Header::from_block(&block)?;
        if header.is_end_of_archive() {
            log::debug!("End of Tar archive reached");
            return Ok(None);
        }
        if header.name.is_empty() {
            log::warn!("Found empty file name");
        }
        self.current = Some(Current {
            generation: self.generation,
            remaining: header.size,
            padding: block_align(header.size) - header.size,
        });
        Ok(Some((header, self.generation)))
    }
}

/// Discards `len` bytes.
fn skip<S: Storage + ?Sized>(storage: &mut S, mut len: u64) -> Result<()> {
    let mut buf = [0; 8 * BLOCKSIZE];
    while len > 0 {
        let want = usize::try_from(len).map_or(buf.len(), |left| left.min(buf.len()));
        storage.read_exact(&mut buf[..want])?;
        len -= want as u64;
    }
    Ok(())
}

impl<S> Debug for SequentialStore<S> {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        let mut debug = f.debug_struct("SequentialStore");
        match self.state.try_lock() {
            Some(state) => debug
                .field("mode", &state.mode)
                .field("generation", &state.generation)
                .field("finished", &state.finished),
            None => debug.field("state", &"<locked>"),
        };
        debug.finish()
    }
}

/// The single pass over the entries of a sequential archive.
///
/// Obtained from [`crate::TarArchive::entries`]. Each entry's stream is only valid until the
/// next entry is requested.
pub struct SequentialEntries<S> {
    store: Arc<SequentialStore<S>>,
}

impl<S: Storage> Iterator for SequentialEntries<S> {
    type Item = Result<TarEntry<S>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.store.advance() {
            Ok(Some((header, generation))) => {
                let stream =
                    EntryStream::sequential(Arc::clone(&self.store), generation, header.size);
                Some(Ok(TarEntry::sequential(header, Some(stream))))
            }
            Ok(None) => None,
            Err(err) => Some(Err(err)),
        }
    }
}

impl<S> Debug for SequentialEntries<S> {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SequentialEntries")
            .field("store", &self.store)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ForwardReader;
    use std::io::{self, Read, Seek, SeekFrom, Write};

    fn reader(data: &[u8]) -> Arc<SequentialStore<ForwardReader<&[u8]>>> {
        let _ = env_logger::builder().is_test(true).try_init();
        Arc::new(SequentialStore::new(ForwardReader::new(data), ArchiveMode::Read).unwrap())
    }

    fn names<S: Storage>(entries: SequentialEntries<S>) -> Vec<String> {
        entries
            .map(|entry| entry.unwrap().header().name.clone())
            .collect()
    }

    #[test]
    fn test_three_entries_then_end() {
        let store = reader(include_bytes!("../tests/gnu_tar_ustar.tar"));
        let entries = store.take_entries().unwrap();
        assert_eq!(
            names(entries),
            ["bye_world_513b.txt", "hello_world_513b.txt", "hello_world.txt"]
        );
        assert!(matches!(store.take_entries(), Err(TarError::EntriesConsumed)));
    }

    #[test]
    fn test_read_contents_in_order() {
        let store = reader(include_bytes!("../tests/gnu_tar_v7.tar"));
        let mut contents = Vec::new();
        for entry in store.take_entries().unwrap() {
            let mut entry = entry.unwrap();
            let mut stream = entry.open().unwrap();
            let mut content = Vec::new();
            stream.read_to_end(&mut content).unwrap();
            assert_eq!(content.len() as u64, entry.size());
            contents.push(content);
            assert!(matches!(entry.open(), Err(TarError::EntryConsumed)));
        }
        assert_eq!(contents[1], include_bytes!("../tests/hello_world_513b.txt"));
        assert_eq!(contents[2], b"Hello World\n");
    }

    #[test]
    fn test_unread_content_is_skipped() {
        let store = reader(include_bytes!("../tests/gnu_tar_posix.tar"));
        let mut entries = store.take_entries().unwrap();
        let mut first = entries.next().unwrap().unwrap();
        let mut stream = first.open().unwrap();
        let mut buf = [0; 10];
        stream.read_exact(&mut buf).unwrap();

        let mut second = entries.next().unwrap().unwrap();
        assert_eq!(second.header().name, "bye_world_513b.txt");
        // advancing revoked the previous stream
        assert!(matches!(
            TarError::from(stream.read(&mut buf).unwrap_err()),
            TarError::Disposed
        ));
        let mut content = Vec::new();
        second.open().unwrap().read_to_end(&mut content).unwrap();
        assert_eq!(content, include_bytes!("../tests/bye_world_513b.txt"));
        assert_eq!(entries.count(), 4);
    }

    #[test]
    fn test_stream_is_forward_only() {
        let store = reader(include_bytes!("../tests/gnu_tar_ustar.tar"));
        let mut entry = store.take_entries().unwrap().next().unwrap().unwrap();
        let mut stream = entry.open().unwrap();
        assert_eq!(stream.len().unwrap(), 513);
        for err in [
            stream.seek(SeekFrom::Start(0)).unwrap_err(),
            stream.stream_position().unwrap_err(),
            stream.write(b"x").unwrap_err(),
        ] {
            assert_eq!(err.kind(), io::ErrorKind::Unsupported);
        }
        assert!(matches!(entry.delete(), Err(TarError::Unsupported(_))));
    }

    #[test]
    fn test_truncated_archive() {
        let data = include_bytes!("../tests/gnu_tar_ustar.tar");
        // ends at a header boundary without end marker
        assert_eq!(names(reader(&data[..4096]).take_entries().unwrap()).len(), 3);

        // ends inside a header
        let mut entries = reader(&data[..100]).take_entries().unwrap();
        assert!(matches!(entries.next(), Some(Err(TarError::UnexpectedEof))));
        assert!(entries.next().is_none());

        // ends inside content that is skipped
        let mut entries = reader(&data[..1000]).take_entries().unwrap();
        assert!(entries.next().unwrap().is_ok());
        assert!(matches!(entries.next(), Some(Err(TarError::UnexpectedEof))));
    }

    #[test]
    fn test_append_only_writer() {
        let store = SequentialStore::new(crate::ForwardWriter::new(Vec::new()), ArchiveMode::Create)
            .unwrap();
        let mut header = Header::file("a.txt", 5);
        header.mtime = 1_620_043_200;
        store.append(&header, &mut &b"hello"[..]).unwrap();
        let store = Arc::new(store);
        assert!(matches!(store.take_entries(), Err(TarError::Unsupported(_))));

        let data = store.dispose().unwrap().unwrap().into_inner();
        assert_eq!(data.len(), 4 * BLOCKSIZE);
        assert_eq!(&data[..BLOCKSIZE], &header.encode().unwrap());
        assert_eq!(&data[BLOCKSIZE..BLOCKSIZE + 5], b"hello");
        assert!(data[BLOCKSIZE + 5..].iter().all(|&b| b == 0));
        assert!(store.dispose().unwrap().is_none());
    }

    #[test]
    fn test_update_is_unsupported() {
        let result = SequentialStore::new(ForwardReader::new(&b""[..]), ArchiveMode::Update);
        assert!(matches!(result, Err(TarError::Unsupported(_))));
    }

    #[test]
    fn test_read_mode_rejects_writes() {
        let store = reader(&[]);
        assert!(matches!(
            store.append(&Header::file("a", 0), &mut io::empty()),
            Err(TarError::ReadOnly)
        ));
        assert_eq!(names(store.take_entries().unwrap()).len(), 0);
    }
}
