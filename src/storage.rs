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
//! Backing stores an archive can live in.
//!
//! A [`Storage`] either supports random access, in which case every read and write names its
//! offset explicitly, or it is forward-only like a socket or a pipe. The archive picks its
//! access strategy from [`Storage::can_seek`].

use crate::{block_align, Result, TarError, BLOCKSIZE};
use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

/// One block of zeroes, used for padding and the end-of-archive marker.
pub(crate) const ZERO_BLOCK: [u8; BLOCKSIZE] = [0; BLOCKSIZE];

fn unsupported(what: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::Unsupported, TarError::Unsupported(what))
}

/// Byte store underneath a [`crate::TarArchive`].
///
/// Non-seekable stores only implement the forward-only part; the random-access methods keep
/// their default implementations, which fail with [`io::ErrorKind::Unsupported`].
pub trait Storage: Send {
    /// True if the random-access methods are available.
    fn can_seek(&self) -> bool;

    /// Reads from the current position, like [`Read::read`].
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Writes at the current position, like [`Write::write_all`].
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()>;

    /// Fills `buf` from the current position. Fails with [`io::ErrorKind::UnexpectedEof`] if
    /// the store ends early.
    fn read_exact(&mut self, mut buf: &mut [u8]) -> io::Result<()> {
        while !buf.is_empty() {
            match self.read(buf) {
                Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
                Ok(n) => buf = &mut buf[n..],
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Fills `buf` with the bytes starting at `offset`.
    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let _ = (offset, buf);
        Err(unsupported("random reads"))
    }

    /// Writes `buf` starting at `offset`, growing the store if needed.
    fn write_all_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
        let _ = (offset, buf);
        Err(unsupported("random writes"))
    }

    /// Current length of the store in bytes.
    fn size(&mut self) -> io::Result<u64> {
        Err(unsupported("querying the length"))
    }

    /// Truncates or zero-extends the store.
    fn set_size(&mut self, size: u64) -> io::Result<()> {
        let _ = size;
        Err(unsupported("changing the length"))
    }
}

impl Storage for File {
    fn can_seek(&self) -> bool {
        true
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(self, buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        Write::write_all(self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Write::flush(self)
    }

    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.seek(SeekFrom::Start(offset))?;
        Read::read_exact(self, buf)
    }

    fn write_all_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
        self.seek(SeekFrom::Start(offset))?;
        Write::write_all(self, buf)
    }

    fn size(&mut self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn set_size(&mut self, size: u64) -> io::Result<()> {
        self.set_len(size)
    }
}

impl Storage for Cursor<Vec<u8>> {
    fn can_seek(&self) -> bool {
        true
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(self, buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        Write::write_all(self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.set_position(offset);
        Read::read_exact(self, buf)
    }

    fn write_all_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
        self.set_position(offset);
        Write::write_all(self, buf)
    }

    fn size(&mut self) -> io::Result<u64> {
        Ok(self.get_ref().len() as u64)
    }

    fn set_size(&mut self, size: u64) -> io::Result<()> {
        let size = usize::try_from(size)
            .map_err(|_| io::Error::new(io::ErrorKind::OutOfMemory, "store exceeds memory"))?;
        self.get_mut().resize(size, 0);
        Ok(())
    }
}

macro_rules! forward_storage {
    ($($target:ty),*) => {$(
        impl<S: Storage + ?Sized> Storage for $target {
            fn can_seek(&self) -> bool {
                (**self).can_seek()
            }

            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                (**self).read(buf)
            }

            fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
                (**self).write_all(buf)
            }

            fn flush(&mut self) -> io::Result<()> {
                (**self).flush()
            }

            fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
                (**self).read_exact_at(offset, buf)
            }

            fn write_all_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
                (**self).write_all_at(offset, buf)
            }

            fn size(&mut self) -> io::Result<u64> {
                (**self).size()
            }

            fn set_size(&mut self, size: u64) -> io::Result<()> {
                (**self).set_size(size)
            }
        }
    )*};
}

forward_storage!(&mut S, Box<S>);

/// A read-only, forward-only store over any [`Read`], e.g. a socket or a decompressor.
#[derive(Debug)]
pub struct ForwardReader<R> {
    inner: R,
}

impl<R: Read + Send> ForwardReader<R> {
    pub const fn new(inner: R) -> Self {
        Self { inner }
    }

    pub const fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read + Send> Storage for ForwardReader<R> {
    fn can_seek(&self) -> bool {
        false
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }

    fn write_all(&mut self, _buf: &[u8]) -> io::Result<()> {
        Err(unsupported("writing to a reader"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A write-only, append-only store over any [`Write`].
#[derive(Debug)]
pub struct ForwardWriter<W> {
    inner: W,
}

impl<W: Write + Send> ForwardWriter<W> {
    pub const fn new(inner: W) -> Self {
        Self { inner }
    }

    pub const fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write + Send> Storage for ForwardWriter<W> {
    fn can_seek(&self) -> bool {
        false
    }

    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(unsupported("reading from a writer"))
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.inner.write_all(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Writes `size` bytes taken from `content` through `write`, followed by zeroes up to the next
/// block boundary. `write` receives the number of bytes already written and a chunk.
///
/// Fails with [`TarError::UnexpectedEof`] if `content` yields fewer than `size` bytes.
pub(crate) fn copy_padded<R, F>(content: &mut R, size: u64, mut write: F) -> Result<()>
where
    R: Read + ?Sized,
    F: FnMut(u64, &[u8]) -> io::Result<()>,
{
    let mut buf = [0; 8 * BLOCKSIZE];
    let mut written = 0;
    while written < size {
        let want = usize::try_from(size - written).map_or(buf.len(), |left| left.min(buf.len()));
        let n = match content.read(&mut buf[..want]) {
            Ok(0) => return Err(TarError::UnexpectedEof),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        write(written, &buf[..n])?;
        written += n as u64;
    }
    let padding = block_align(size) - size;
    if padding > 0 {
        write(written, &ZERO_BLOCK[..padding as usize])?;
    }
    Ok(())
}

/// Overwrites `len` bytes from `offset` with zeroes.
pub(crate) fn zero_fill<S: Storage + ?Sized>(
    storage: &mut S,
    mut offset: u64,
    len: u64,
) -> io::Result<()> {
    let end = offset + len;
    while offset < end {
        let chunk = (end - offset).min(BLOCKSIZE as u64);
        storage.write_all_at(offset, &ZERO_BLOCK[..chunk as usize])?;
        offset += chunk;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_random_access() {
        let mut store = Cursor::new(Vec::new());
        assert!(Storage::can_seek(&store));
        store.write_all_at(4, b"tar").unwrap();
        assert_eq!(store.get_ref(), &[0, 0, 0, 0, b't', b'a', b'r']);
        let mut buf = [0; 2];
        store.read_exact_at(5, &mut buf).unwrap();
        assert_eq!(&buf, b"ar");
        assert_eq!(Storage::size(&mut store).unwrap(), 7);
        store.set_size(3).unwrap();
        assert_eq!(store.get_ref().len(), 3);
        let err = store.read_exact_at(2, &mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_file_random_access() {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all_at(BLOCKSIZE as u64, b"abc").unwrap();
        assert_eq!(Storage::size(&mut file).unwrap(), BLOCKSIZE as u64 + 3);
        let mut buf = [0xff; 4];
        file.read_exact_at(BLOCKSIZE as u64 - 1, &mut buf).unwrap();
        assert_eq!(&buf, b"\0abc");
        file.set_size(0).unwrap();
        assert_eq!(Storage::size(&mut file).unwrap(), 0);
    }

    #[test]
    fn test_forward_reader_is_not_seekable() {
        let mut store = ForwardReader::new(&b"hello"[..]);
        assert!(!store.can_seek());
        let mut buf = [0; 5];
        Storage::read_exact(&mut store, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");
        assert_eq!(
            Storage::read_exact(&mut store, &mut buf).unwrap_err().kind(),
            io::ErrorKind::UnexpectedEof
        );
        for err in [
            store.write_all(b"x").unwrap_err(),
            store.read_exact_at(0, &mut buf).unwrap_err(),
            store.write_all_at(0, b"x").unwrap_err(),
            store.size().unwrap_err(),
            store.set_size(0).unwrap_err(),
        ] {
            assert_eq!(err.kind(), io::ErrorKind::Unsupported);
        }
    }

    #[test]
    fn test_forward_writer() {
        let mut store = ForwardWriter::new(Vec::new());
        assert!(!store.can_seek());
        Storage::write_all(&mut store, b"abc").unwrap();
        Storage::flush(&mut store).unwrap();
        assert_eq!(
            Storage::read(&mut store, &mut [0; 1]).unwrap_err().kind(),
            io::ErrorKind::Unsupported
        );
        assert_eq!(store.into_inner(), b"abc");
    }

    #[test]
    fn test_borrowed_store_forwards() {
        let mut cursor = Cursor::new(vec![1, 2, 3]);
        {
            let mut store: Box<dyn Storage + '_> = Box::new(&mut cursor);
            assert!(store.can_seek());
            store.write_all_at(1, &[9]).unwrap();
        }
        assert_eq!(cursor.into_inner(), vec![1, 9, 3]);
    }

    #[test]
    fn test_copy_padded() {
        let mut out = Vec::new();
        copy_padded(&mut &b"hello"[..], 5, |at, chunk| {
            assert_eq!(at, out.len() as u64);
            out.extend_from_slice(chunk);
            Ok(())
        })
        .unwrap();
        assert_eq!(out.len(), BLOCKSIZE);
        assert_eq!(&out[..5], b"hello");
        assert!(out[5..].iter().all(|&b| b == 0));

        let err = copy_padded(&mut &b"hi"[..], 5, |_, _| Ok(())).unwrap_err();
        assert!(matches!(err, TarError::UnexpectedEof));

        // extra content is left in the reader
        let mut content = &b"abcdef"[..];
        copy_padded(&mut content, 3, |_, _| Ok(())).unwrap();
        assert_eq!(content, b"def");
    }

    #[test]
    fn test_zero_fill() {
        let mut store = Cursor::new(vec![0xff; 2 * BLOCKSIZE]);
        zero_fill(&mut store, 10, BLOCKSIZE as u64 + 5).unwrap();
        let data = store.into_inner();
        assert!(data[..10].iter().all(|&b| b == 0xff));
        assert!(data[10..BLOCKSIZE + 15].iter().all(|&b| b == 0));
        assert!(data[BLOCKSIZE + 15..].iter().all(|&b| b == 0xff));
    }
}
