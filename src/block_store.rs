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
//! Random-access archive over a seekable [`Storage`].
//!
//! The store keeps an offset table with one row per entry. Entries can be appended, grown,
//! shrunk and deleted in place: everything behind the changed entry is moved by a block
//! multiple ([`BlockStore::relocate`]) instead of rewriting the archive. One lock guards the
//! table and every access to the storage, it is shared with all streams the store hands out.

use crate::header::patch_size;
use crate::storage::{copy_padded, zero_fill, ZERO_BLOCK};
use crate::stream::ViewState;
use crate::{
    block_align, is_zero_block, ArchiveMode, EntryStream, Header, Result, Storage, TarError,
    BLOCKSIZE,
};
use core::fmt::{Debug, Formatter};
use parking_lot::Mutex;
use std::io::Read;
use std::sync::Arc;

/// Bytes moved per read/write during a relocation. A multiple of [`BLOCKSIZE`].
const RELOCATION_CHUNK: u64 = 128 * BLOCKSIZE as u64;

/// Identifies a row for its whole life. Keys are never reused.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub(crate) struct EntryKey(u64);

/// Names one live stream of a row. Closing or revoking the stream retires its generation.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct ViewHandle {
    key: EntryKey,
    generation: u64,
}

/// Where an entry lives in the store.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BlockRange {
    /// Offset of the first content byte. The header is the block in front of it.
    pub offset: u64,
    /// Reserved content bytes, a multiple of [`BLOCKSIZE`].
    pub allocated: u64,
    /// Content size in bytes.
    pub size: u64,
}

#[derive(Debug)]
struct LiveStream {
    generation: u64,
    view: ViewState,
}

#[derive(Debug)]
struct Row {
    key: EntryKey,
    offset: u64,
    allocated: u64,
    header: Header,
    stream: Option<LiveStream>,
}

impl Row {
    const fn header_offset(&self) -> u64 {
        self.offset - BLOCKSIZE as u64
    }

    const fn allocation_end(&self) -> u64 {
        self.offset + self.allocated
    }
}

struct StoreState<S> {
    /// `None` once disposed.
    storage: Option<S>,
    mode: ArchiveMode,
    /// Sorted by offset.
    rows: Vec<Row>,
    /// Offset of the end-of-archive marker.
    end: u64,
    next_key: u64,
    next_generation: u64,
    /// The end-of-archive marker is missing or followed by stale data.
    dirty: bool,
}

/// Offset table of a random-access archive.
///
/// Obtained from [`crate::TarArchive::block_store`]. Entries are addressed by their position in
/// layout order.
pub struct BlockStore<S> {
    state: Mutex<StoreState<S>>,
}

impl<S: Storage> BlockStore<S> {
    /// Takes over `storage`. [`ArchiveMode::Create`] truncates it, the other modes parse the
    /// existing entries.
    pub(crate) fn open(mut storage: S, mode: ArchiveMode) -> Result<Self> {
        let mut state = StoreState {
            storage: None,
            mode,
            rows: Vec::new(),
            end: 0,
            next_key: 0,
            next_generation: 0,
            dirty: false,
        };
        if mode == ArchiveMode::Create {
            storage.set_size(0)?;
            state.dirty = true;
        } else {
            state.parse(&mut storage)?;
        }
        state.storage = Some(storage);
        Ok(Self {
            state: Mutex::new(state),
        })
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.state.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current length of the storage in bytes.
    ///
    /// # Errors
    /// Fails if the store is disposed or the storage fails.
    pub fn store_len(&self) -> Result<u64> {
        Ok(self.state.lock().storage()?.size()?)
    }

    /// Position and size of every entry, in layout order.
    pub fn layout(&self) -> Vec<BlockRange> {
        self.state
            .lock()
            .rows
            .iter()
            .map(|row| BlockRange {
                offset: row.offset,
                allocated: row.allocated,
                size: row.header.size,
            })
            .collect()
    }

    /// Header of the entry at `index`, including size changes of committed writes.
    ///
    /// # Errors
    /// Fails with [`TarError::IndexOutOfRange`].
    pub fn header(&self, index: usize) -> Result<Header> {
        let state = self.state.lock();
        state.row(index).map(|row| row.header.clone())
    }

    /// Opens the content of the entry at `index`.
    ///
    /// # Errors
    /// Fails with [`TarError::StreamAlreadyOpen`] while another stream of the entry is open.
    pub fn open_stream(self: &Arc<Self>, index: usize) -> Result<EntryStream<S>> {
        let handle = self.state.lock().open_handle(index)?;
        Ok(EntryStream::random(Arc::clone(self), handle))
    }

    /// Removes the entry at `index` and reclaims its header and content blocks. An open stream
    /// of the entry is dropped without committing.
    ///
    /// # Errors
    /// Fails with [`TarError::ReadOnly`] in [`ArchiveMode::Read`].
    pub fn delete_entry(&self, index: usize) -> Result<()> {
        self.state.lock().delete(index)
    }

    /// Moves every byte at or after `after_offset` by `delta` bytes and updates the offset
    /// table. `after_offset` must be the end of an entry's allocation, and that entry owns
    /// the difference: growing adds zeroed slack to it, shrinking gives back slack it doesn't
    /// need for its content. Both must be block aligned. Slack is compacted on the next
    /// [`Self::flush`].
    ///
    /// # Errors
    /// Nothing is changed if the arguments are invalid.
    pub fn relocate(&self, after_offset: u64, delta: i64) -> Result<()> {
        let mut state = self.state.lock();
        state.ensure_writable()?;
        let len = state.validate_relocation(after_offset, delta)?;
        let owns_slack = |row: &Row| {
            let slack = row.allocated.saturating_sub(block_align(row.header.size));
            delta > 0 || slack >= delta.unsigned_abs()
        };
        if !state
            .rows
            .iter()
            .any(|row| row.allocation_end() == after_offset && owns_slack(row))
        {
            return Err(TarError::RelocationOutOfRange {
                after_offset,
                delta,
                len,
            });
        }
        state.relocate(after_offset, delta)
    }

    /// Commits all open streams, gives unused reserved blocks back, writes the end-of-archive
    /// marker if needed and flushes the storage.
    ///
    /// # Errors
    /// Fails if the store is disposed or the storage fails.
    pub fn flush(&self) -> Result<()> {
        self.state.lock().flush()
    }

    pub(crate) fn snapshot(&self) -> Vec<(EntryKey, Header)> {
        self.state
            .lock()
            .rows
            .iter()
            .map(|row| (row.key, row.header.clone()))
            .collect()
    }

    /// Appends an entry with `header.size` bytes taken from `content`. With `reserve`, an empty
    /// entry still gets one content block.
    pub(crate) fn append<R: Read + ?Sized>(
        &self,
        header: Header,
        content: &mut R,
        reserve: bool,
    ) -> Result<(EntryKey, Header)> {
        self.state.lock().append(header, content, reserve)
    }

    pub(crate) fn open_stream_by_key(self: &Arc<Self>, key: EntryKey) -> Result<EntryStream<S>> {
        let handle = {
            let mut state = self.state.lock();
            let index = state.index_of(key)?;
            state.open_handle(index)?
        };
        Ok(EntryStream::random(Arc::clone(self), handle))
    }

    pub(crate) fn delete_by_key(&self, key: EntryKey) -> Result<()> {
        let mut state = self.state.lock();
        let index = state.index_of(key)?;
        state.delete(index)
    }

    pub(crate) fn read_at(&self, handle: ViewHandle, pos: u64, buf: &mut [u8]) -> Result<usize> {
        let mut state = self.state.lock();
        let (storage, offset, view) = state.live(handle)?;
        Ok(view.read_at(storage, offset, pos, buf)?)
    }

    pub(crate) fn write_at(&self, handle: ViewHandle, pos: u64, buf: &[u8]) -> Result<usize> {
        let mut state = self.state.lock();
        state.ensure_writable()?;
        let (storage, offset, view) = state.live(handle)?;
        Ok(view.write_at(storage, offset, pos, buf)?)
    }

    pub(crate) fn view_len(&self, handle: ViewHandle) -> Result<u64> {
        let mut state = self.state.lock();
        let (_, _, view) = state.live(handle)?;
        Ok(view.len())
    }

    pub(crate) fn commit_view(&self, handle: ViewHandle) -> Result<()> {
        let mut state = self.state.lock();
        state.live(handle)?;
        let index = state.index_of(handle.key)?;
        state.commit(index)
    }

    /// Commits and retires `handle`. Succeeds without doing anything if the handle was already
    /// retired, e.g. by deleting the entry or disposing the store.
    pub(crate) fn close_view(&self, handle: ViewHandle) -> Result<()> {
        let mut state = self.state.lock();
        if state.live(handle).is_err() {
            return Ok(());
        }
        let index = state.index_of(handle.key)?;
        let result = state.commit(index);
        state.rows[index].stream = None;
        result
    }

    /// Retires `handle` without committing.
    pub(crate) fn release_view(&self, handle: ViewHandle) {
        let mut state = self.state.lock();
        if let Some(row) = state.rows.iter_mut().find(|row| row.key == handle.key) {
            if row.stream.as_ref().map(|live| live.generation) == Some(handle.generation) {
                row.stream = None;
            }
        }
    }

    /// Flushes, revokes every open stream and hands the storage out. Returns `None` if the
    /// store was already disposed.
    pub(crate) fn dispose(&self) -> Result<Option<S>> {
        let mut state = self.state.lock();
        if state.storage.is_none() {
            return Ok(None);
        }
        let result = state.flush();
        for row in &mut state.rows {
            row.stream = None;
        }
        let storage = state.storage.take();
        result.map(|()| storage)
    }
}

impl<S: Storage> StoreState<S> {
    fn storage(&mut self) -> Result<&mut S> {
        self.storage.as_mut().ok_or(TarError::Disposed)
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.mode == ArchiveMode::Read {
            Err(TarError::ReadOnly)
        } else {
            Ok(())
        }
    }

    fn row(&self, index: usize) -> Result<&Row> {
        self.rows.get(index).ok_or(TarError::IndexOutOfRange {
            index,
            len: self.rows.len(),
        })
    }

    fn index_of(&self, key: EntryKey) -> Result<usize> {
        self.rows
            .iter()
            .position(|row| row.key == key)
            .ok_or(TarError::StaleEntry)
    }

    /// Storage, content offset and view of a live handle.
    fn live(&mut self, handle: ViewHandle) -> Result<(&mut S, u64, &mut ViewState)> {
        let storage = self.storage.as_mut().ok_or(TarError::Disposed)?;
        let row = self
            .rows
            .iter_mut()
            .find(|row| row.key == handle.key)
            .ok_or(TarError::StaleEntry)?;
        match &mut row.stream {
            Some(live) if live.generation == handle.generation => {
                Ok((storage, row.offset, &mut live.view))
            }
            _ => Err(TarError::Disposed),
        }
    }

    fn open_handle(&mut self, index: usize) -> Result<ViewHandle> {
        self.storage()?;
        let generation = self.next_generation;
        let len = self.rows.len();
        let row = self
            .rows
            .get_mut(index)
            .ok_or(TarError::IndexOutOfRange { index, len })?;
        if row.stream.is_some() {
            return Err(TarError::StreamAlreadyOpen { index });
        }
        row.stream = Some(LiveStream {
            generation,
            view: ViewState::new(row.header.size),
        });
        self.next_generation += 1;
        Ok(ViewHandle {
            key: row.key,
            generation,
        })
    }

    /// Walks the headers from offset 0 and registers one row per entry.
    fn parse(&mut self, storage: &mut S) -> Result<()> {
        let len = storage.size()?;
        let mut pos = 0;
        let mut block = [0; BLOCKSIZE];
        loop {
            if pos + BLOCKSIZE as u64 > len {
                log::warn!("Reached end of Tar archive data without finding zero/end blocks!");
                self.dirty = true;
                break;
            }
            storage.read_exact_at(pos, &mut block)?;
            let header = Header::from_block(&block)?;
            if header.is_end_of_archive() {
                let next = pos + BLOCKSIZE as u64;
                let second_zero = next + BLOCKSIZE as u64 <= len && {
                    storage.read_exact_at(next, &mut block)?;
                    is_zero_block(&block)
                };
                if second_zero {
                    log::debug!("End of Tar archive with two zero blocks!");
                } else {
                    log::warn!(
                        "Zero block found at end of Tar archive, but only one instead of two!"
                    );
                    self.dirty = true;
                }
                break;
            }
            if header.name.is_empty() {
                log::warn!("Found empty file name at offset {pos}");
            }
            let offset = pos + BLOCKSIZE as u64;
            let allocated = block_align(header.size);
            if offset + allocated > len {
                log::warn!(
                    "Entry {:?} at offset {pos} ends after the archive data, ignoring it",
                    header.name
                );
                self.dirty = true;
                break;
            }
            let key = self.new_key();
            self.rows.push(Row {
                key,
                offset,
                allocated,
                header,
                stream: None,
            });
            pos = offset + allocated;
        }
        self.end = pos;
        log::debug!("Parsed {} entries, archive data ends at {pos}", self.rows.len());
        Ok(())
    }

    fn new_key(&mut self) -> EntryKey {
        let key = EntryKey(self.next_key);
        self.next_key += 1;
        key
    }

    fn append<R: Read + ?Sized>(
        &mut self,
        header: Header,
        content: &mut R,
        reserve: bool,
    ) -> Result<(EntryKey, Header)> {
        self.ensure_writable()?;
        let block = header.encode()?;
        let header_offset = self.end;
        let offset = header_offset + BLOCKSIZE as u64;
        let mut allocated = block_align(header.size);
        self.dirty = true;
        let storage = self.storage()?;
        storage.write_all_at(header_offset, &block)?;
        copy_padded(content, header.size, |at, chunk| {
            storage.write_all_at(offset + at, chunk)
        })?;
        if reserve && allocated == 0 {
            allocated = BLOCKSIZE as u64;
            storage.write_all_at(offset, &ZERO_BLOCK)?;
        }
        self.end = offset + allocated;
        self.write_end_marker()?;

        let key = self.new_key();
        log::debug!("Created entry {:?} at offset {offset}", header.name);
        self.rows.push(Row {
            key,
            offset,
            allocated,
            header: header.clone(),
            stream: None,
        });
        Ok((key, header))
    }

    /// Writes the two zero blocks at `end` and cuts the storage behind them.
    fn write_end_marker(&mut self) -> Result<()> {
        let end = self.end;
        let storage = self.storage()?;
        storage.write_all_at(end, &ZERO_BLOCK)?;
        storage.write_all_at(end + BLOCKSIZE as u64, &ZERO_BLOCK)?;
        storage.set_size(end + 2 * BLOCKSIZE as u64)?;
        self.dirty = false;
        Ok(())
    }

    /// Checks the arguments of a relocation and returns the current store length.
    fn validate_relocation(&mut self, after_offset: u64, delta: i64) -> Result<u64> {
        let len = self.storage()?.size()?;
        if delta == 0 || delta % BLOCKSIZE as i64 != 0 {
            return Err(TarError::MisalignedDelta(delta));
        }
        if after_offset % BLOCKSIZE as u64 != 0
            || after_offset > len
            || (delta < 0 && delta.unsigned_abs() > after_offset)
        {
            return Err(TarError::RelocationOutOfRange {
                after_offset,
                delta,
                len,
            });
        }
        Ok(len)
    }

    /// Shifts the bytes from `after_offset` on. The row whose allocation ends at
    /// `after_offset` takes the opened gap, which is zeroed, or gives up the closed one if it
    /// is large enough.
    fn relocate(&mut self, after_offset: u64, delta: i64) -> Result<()> {
        let len = self.validate_relocation(after_offset, delta)?;
        let shift = delta.unsigned_abs();
        let storage = self.storage.as_mut().ok_or(TarError::Disposed)?;

        let moved = len - after_offset;
        let mut buf = vec![0; usize::try_from(moved.min(RELOCATION_CHUNK)).unwrap_or(0)];
        if delta > 0 {
            storage.set_size(len + shift)?;
            // back to front, the destination overlaps the source
            let mut end = len;
            while end > after_offset {
                let start = end.saturating_sub(RELOCATION_CHUNK).max(after_offset);
                let chunk = &mut buf[..(end - start) as usize];
                storage.read_exact_at(start, chunk)?;
                storage.write_all_at(start + shift, chunk)?;
                end = start;
            }
        } else {
            let mut start = after_offset;
            while start < len {
                let end = (start + RELOCATION_CHUNK).min(len);
                let chunk = &mut buf[..(end - start) as usize];
                storage.read_exact_at(start, chunk)?;
                storage.write_all_at(start - shift, chunk)?;
                start = end;
            }
            storage.set_size(len - shift)?;
        }

        if delta > 0 {
            zero_fill(storage, after_offset, shift)?;
        }

        for row in &mut self.rows {
            if row.offset > after_offset {
                row.offset = row.offset.saturating_add_signed(delta);
            } else if row.allocation_end() == after_offset
                && (delta > 0 || row.allocated >= shift)
            {
                row.allocated = row.allocated.saturating_add_signed(delta);
            }
        }
        if self.end >= after_offset {
            self.end = self.end.saturating_add_signed(delta);
        }
        log::trace!("Relocated {moved} bytes after offset {after_offset} by {delta}");
        Ok(())
    }

    /// Brings the allocation of row `index` to `block_align(size)` and stores the buffered
    /// bytes of its stream. The header on disk gets the new size.
    fn commit(&mut self, index: usize) -> Result<()> {
        let row = &self.rows[index];
        let suffix_len = row.stream.as_ref().map_or(0, |live| live.view.suffix().len() as u64);
        let physical_len = row
            .stream
            .as_ref()
            .map_or(row.header.size, |live| live.view.physical_len());
        let size = physical_len + suffix_len;
        let required = block_align(size);
        if required == row.allocated && size == row.header.size && suffix_len == 0 {
            return Ok(());
        }
        self.ensure_writable()?;

        if required != row.allocated {
            let delta = required as i64 - row.allocated as i64;
            let after_offset = row.allocation_end();
            self.relocate(after_offset, delta)?;
        }

        let storage = self.storage.as_mut().ok_or(TarError::Disposed)?;
        let row = &mut self.rows[index];
        if let Some(live) = &mut row.stream {
            storage.write_all_at(row.offset + physical_len, live.view.suffix())?;
            live.view.commit();
        }
        zero_fill(storage, row.offset + size, required - size)?;
        if size != row.header.size {
            let mut block = [0; BLOCKSIZE];
            storage.read_exact_at(row.header_offset(), &mut block)?;
            patch_size(&mut block, size)?;
            storage.write_all_at(row.header_offset(), &block)?;
            row.header.size = size;
        }
        log::trace!("Committed entry {:?}, {size} bytes in {required}", row.header.name);
        Ok(())
    }

    fn delete(&mut self, index: usize) -> Result<()> {
        self.ensure_writable()?;
        let row = self.row(index)?;
        let after_offset = row.allocation_end();
        let delta = -((row.allocated + BLOCKSIZE as u64) as i64);
        self.relocate(after_offset, delta)?;
        self.dirty = true;
        let row = self.rows.remove(index);
        log::debug!("Deleted entry {:?}", row.header.name);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.storage()?;
        if self.mode != ArchiveMode::Read {
            for index in 0..self.rows.len() {
                self.commit(index)?;
            }
        }
        if self.dirty && self.mode != ArchiveMode::Read {
            self.write_end_marker()?;
        }
        self.storage()?.flush()?;
        Ok(())
    }
}

impl<S> Debug for BlockStore<S> {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        let mut debug = f.debug_struct("BlockStore");
        match self.state.try_lock() {
            Some(state) => debug
                .field("mode", &state.mode)
                .field("entries", &state.rows.len())
                .field("end", &state.end)
                .field("disposed", &state.storage.is_none()),
            None => debug.field("state", &"<locked>"),
        };
        debug.finish()
    }
}
