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
//! Module for [`TarArchive`].

use crate::block_store::{BlockStore, EntryKey};
use crate::sequential::{SequentialEntries, SequentialStore};
use crate::{EntryKind, EntryStream, Header, Result, Storage, TarError};
use core::fmt::{Debug, Formatter};
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

/// What an archive is opened for.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub enum ArchiveMode {
    /// Entries can be listed and read.
    #[default]
    Read,
    /// The store is truncated and entries are appended.
    Create,
    /// Existing entries can be read, changed and deleted, new ones appended. Needs a seekable
    /// store.
    Update,
}

/// How the store is accessed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum AccessMode {
    /// Through the offset table of a [`BlockStore`].
    Random,
    /// Front to back in one pass.
    Sequential,
}

enum Access<S: Storage> {
    Random(Arc<BlockStore<S>>),
    Sequential(Arc<SequentialStore<S>>),
}

/// A Tar archive in a [`Storage`].
///
/// Seekable stores are parsed up front and can be changed in place. Other stores are read
/// or written in a single pass.
///
/// Dropping the archive flushes it and closes the store. Use [`TarArchive::finish`] to see
/// errors, or [`TarArchive::into_inner`] to keep the store.
pub struct TarArchive<S: Storage> {
    mode: ArchiveMode,
    access: Access<S>,
}

impl<S: Storage> TarArchive<S> {
    /// Opens `storage` with the access mode its capabilities allow.
    ///
    /// # Errors
    /// Fails if the existing entries can't be parsed, or for [`ArchiveMode::Update`] on a
    /// store that can't seek.
    pub fn new(storage: S, mode: ArchiveMode) -> Result<Self> {
        let access = if storage.can_seek() {
            AccessMode::Random
        } else {
            AccessMode::Sequential
        };
        Self::with_access(storage, mode, access)
    }

    /// Opens `storage` with a fixed access mode. A seekable store can still be read front to
    /// back.
    ///
    /// # Errors
    /// Fails with [`TarError::Unsupported`] for random access to a store that can't seek.
    pub fn with_access(storage: S, mode: ArchiveMode, access: AccessMode) -> Result<Self> {
        let access = match access {
            AccessMode::Random if !storage.can_seek() => {
                return Err(TarError::Unsupported("random access to a non-seekable store"))
            }
            AccessMode::Random => Access::Random(Arc::new(BlockStore::open(storage, mode)?)),
            AccessMode::Sequential => {
                Access::Sequential(Arc::new(SequentialStore::new(storage, mode)?))
            }
        };
        Ok(Self { mode, access })
    }

    pub const fn archive_mode(&self) -> ArchiveMode {
        self.mode
    }

    pub const fn access_mode(&self) -> AccessMode {
        match self.access {
            Access::Random(_) => AccessMode::Random,
            Access::Sequential(_) => AccessMode::Sequential,
        }
    }

    /// The offset table, for random access.
    pub const fn block_store(&self) -> Option<&Arc<BlockStore<S>>> {
        match &self.access {
            Access::Random(store) => Some(store),
            Access::Sequential(_) => None,
        }
    }

    /// Appends an empty entry: a directory if `name` ends with a path separator, a file
    /// otherwise. In a random-access archive one content block is reserved, so the first
    /// writes through [`TarEntry::open`] don't move other entries.
    ///
    /// # Errors
    /// Fails with [`TarError::ReadOnly`] in [`ArchiveMode::Read`], or if the name doesn't fit.
    pub fn create_entry(&self, name: &str) -> Result<TarEntry<S>> {
        self.append(Header::for_name(name, 0), &mut io::empty(), true)
    }

    /// Appends an entry holding `content`.
    ///
    /// # Errors
    /// See [`Self::create_entry`].
    pub fn create_entry_with(&self, name: &str, content: &[u8]) -> Result<TarEntry<S>> {
        let mut header = Header::for_name(name, 0);
        header.size = content.len() as u64;
        self.append(header, &mut &content[..], false)
    }

    /// Appends the file or directory at `path` under `name`. File contents are streamed.
    ///
    /// # Errors
    /// See [`Self::create_entry`]. Also fails if `path` can't be read, or if the file shrinks
    /// while it is copied.
    pub fn create_entry_from_file(
        &self,
        path: impl AsRef<Path>,
        name: &str,
    ) -> Result<TarEntry<S>> {
        let mut file = File::open(path)?;
        let header = Header::from_metadata(name, &file.metadata()?);
        self.append(header, &mut file, false)
    }

    fn append<R: io::Read + ?Sized>(
        &self,
        header: Header,
        content: &mut R,
        reserve: bool,
    ) -> Result<TarEntry<S>> {
        match &self.access {
            Access::Random(store) => {
                let (key, header) = store.append(header, content, reserve)?;
                Ok(TarEntry::random(header, Arc::clone(store), key))
            }
            Access::Sequential(store) => {
                store.append(&header, content)?;
                Ok(TarEntry::sequential(header, None))
            }
        }
    }

    /// The entries in archive order.
    ///
    /// For random access the entries are a snapshot and this can be called any number of
    /// times. A sequential archive is enumerated only once.
    ///
    /// # Errors
    /// Fails with [`TarError::EntriesConsumed`] on the second call for a sequential archive.
    pub fn entries(&self) -> Result<Entries<S>> {
        let inner = match &self.access {
            Access::Random(store) => EntriesInner::Random {
                store: Arc::clone(store),
                rows: store.snapshot().into_iter(),
            },
            Access::Sequential(store) => EntriesInner::Sequential(store.take_entries()?),
        };
        Ok(Entries { inner })
    }

    /// Writes all directories and files below `root`. Other entry kinds are skipped.
    ///
    /// # Errors
    /// Fails with [`TarError::DirectoryNotFound`] if `root` isn't a directory, and with
    /// [`TarError::UnsafePath`] for entries that would end up outside of `root`.
    pub fn extract_to_directory(&self, root: impl AsRef<Path>) -> Result<()> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(TarError::DirectoryNotFound(root.to_path_buf()));
        }
        for entry in self.entries()? {
            let mut entry = entry?;
            let target = root.join(relative_path(entry.full_name())?);
            match entry.kind() {
                EntryKind::Directory => fs::create_dir_all(target)?,
                EntryKind::File => {
                    if let Some(parent) = target.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    let mut file = File::create(target)?;
                    let mut content = entry.open()?;
                    io::copy(&mut content, &mut file)?;
                    content.close()?;
                }
                kind => log::warn!(
                    "Skipping {kind} entry {:?}, only files and directories are extracted",
                    entry.full_name()
                ),
            }
        }
        Ok(())
    }

    /// Flushes the archive and closes the store.
    ///
    /// # Errors
    /// Fails if the final writes fail.
    pub fn finish(self) -> Result<()> {
        self.dispose().map(drop)
    }

    /// Flushes the archive and hands the store back.
    ///
    /// # Errors
    /// Fails if the final writes fail.
    pub fn into_inner(self) -> Result<S> {
        self.dispose()?.ok_or(TarError::Disposed)
    }

    fn dispose(&self) -> Result<Option<S>> {
        match &self.access {
            Access::Random(store) => store.dispose(),
            Access::Sequential(store) => store.dispose(),
        }
    }
}

/// `name` as a path that stays below the extraction root.
fn relative_path(name: &str) -> Result<PathBuf> {
    let path = Path::new(name);
    let mut relative = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::RootDir | Component::ParentDir | Component::Prefix(_) => {
                return Err(TarError::UnsafePath(name.to_owned()))
            }
        }
    }
    Ok(relative)
}

impl<S: Storage> Drop for TarArchive<S> {
    fn drop(&mut self) {
        if let Err(err) = self.dispose() {
            log::warn!("Closing Tar archive failed: {err}");
        }
    }
}

impl<S: Storage> Debug for TarArchive<S> {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TarArchive")
            .field("mode", &self.mode)
            .field("access", &self.access_mode())
            .finish()
    }
}

enum EntrySource<S: Storage> {
    Random {
        store: Arc<BlockStore<S>>,
        key: EntryKey,
    },
    Sequential(Option<EntryStream<S>>),
}

/// Describes an entry in an archive.
///
/// The header is a snapshot taken when the entry was listed or created.
pub struct TarEntry<S: Storage> {
    header: Header,
    source: EntrySource<S>,
}

impl<S: Storage> TarEntry<S> {
    pub(crate) fn random(header: Header, store: Arc<BlockStore<S>>, key: EntryKey) -> Self {
        Self {
            header,
            source: EntrySource::Random { store, key },
        }
    }

    pub(crate) fn sequential(header: Header, stream: Option<EntryStream<S>>) -> Self {
        Self {
            header,
            source: EntrySource::Sequential(stream),
        }
    }

    pub const fn header(&self) -> &Header {
        &self.header
    }

    /// Path of the entry inside the archive.
    pub fn full_name(&self) -> &str {
        &self.header.name
    }

    /// Last component of [`Self::full_name`].
    pub fn name(&self) -> &str {
        self.header
            .name
            .trim_end_matches(['/', '\\'])
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or_default()
    }

    pub fn kind(&self) -> EntryKind {
        self.header.kind()
    }

    /// Filesize in bytes.
    pub const fn size(&self) -> u64 {
        self.header.size
    }

    pub fn modified(&self) -> SystemTime {
        self.header.modified()
    }

    /// Opens the content.
    ///
    /// # Errors
    /// - [`TarError::StreamAlreadyOpen`] while another stream of a random-access entry is open
    /// - [`TarError::StaleEntry`] if the entry was deleted
    /// - [`TarError::EntryConsumed`] if the stream of a sequential entry was already taken
    pub fn open(&mut self) -> Result<EntryStream<S>> {
        match &mut self.source {
            EntrySource::Random { store, key } => store.open_stream_by_key(*key),
            EntrySource::Sequential(stream) => stream.take().ok_or(TarError::EntryConsumed),
        }
    }

    /// Removes the entry from a random-access archive.
    ///
    /// # Errors
    /// Fails with [`TarError::Unsupported`] for sequential archives and with
    /// [`TarError::ReadOnly`] in [`ArchiveMode::Read`].
    pub fn delete(self) -> Result<()> {
        match &self.source {
            EntrySource::Random { store, key } => store.delete_by_key(*key),
            EntrySource::Sequential(_) => {
                Err(TarError::Unsupported("deleting from a sequential archive"))
            }
        }
    }
}

impl<S: Storage> Debug for TarEntry<S> {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TarEntry")
            .field("name", &self.full_name())
            .field("kind", &self.kind())
            .field("size", &self.size())
            .field("data", &"<stream>")
            .finish()
    }
}

enum EntriesInner<S: Storage> {
    Random {
        store: Arc<BlockStore<S>>,
        rows: std::vec::IntoIter<(EntryKey, Header)>,
    },
    Sequential(SequentialEntries<S>),
}

/// Iterator over the entries of a [`TarArchive`].
pub struct Entries<S: Storage> {
    inner: EntriesInner<S>,
}

impl<S: Storage> Iterator for Entries<S> {
    type Item = Result<TarEntry<S>>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.inner {
            EntriesInner::Random { store, rows } => rows
                .next()
                .map(|(key, header)| Ok(TarEntry::random(header, Arc::clone(store), key))),
            EntriesInner::Sequential(entries) => entries.next(),
        }
    }
}

impl<S: Storage> Debug for Entries<S> {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match &self.inner {
            EntriesInner::Random { rows, .. } => f
                .debug_struct("Entries")
                .field("remaining", &rows.len())
                .finish(),
            EntriesInner::Sequential(entries) => entries.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ForwardReader, ForwardWriter, TypeFlag, BLOCKSIZE};
    use std::io::{Cursor, Read, Seek, SeekFrom, Write};

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn read_all<S: Storage>(entry: &mut TarEntry<S>) -> Vec<u8> {
        let mut content = Vec::new();
        entry.open().unwrap().read_to_end(&mut content).unwrap();
        content
    }

    /// Reads every file while iterating, which also works for sequential archives.
    fn assert_archive_content<S: Storage>(archive: &TarArchive<S>) {
        let mut files = Vec::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            if entry.kind() == EntryKind::File {
                let content = read_all(&mut entry);
                assert_eq!(content.len() as u64, entry.size());
                files.push((entry.full_name().to_owned(), content));
            }
        }
        assert_eq!(files.len(), 3);
        // order in that I stored the files into the archive
        assert_eq!(files[0].0, "bye_world_513b.txt");
        assert_eq!(files[0].1, include_bytes!("../tests/bye_world_513b.txt"));
        assert_eq!(files[1].0, "hello_world_513b.txt");
        assert_eq!(files[1].1, include_bytes!("../tests/hello_world_513b.txt"));
        assert_eq!(files[2].0, "hello_world.txt");
        assert_eq!(files[2].1, b"Hello World\n", "file content must match");
    }

    #[test]
    fn test_archive_entries() {
        init_logger();
        for data in [
            &include_bytes!("../tests/gnu_tar_gnu.tar")[..],
            &include_bytes!("../tests/gnu_tar_oldgnu.tar")[..],
            &include_bytes!("../tests/gnu_tar_ustar.tar")[..],
            &include_bytes!("../tests/gnu_tar_v7.tar")[..],
        ] {
            let archive = TarArchive::new(Cursor::new(data.to_vec()), ArchiveMode::Read).unwrap();
            assert_eq!(archive.access_mode(), AccessMode::Random);
            assert_archive_content(&archive);
            // random access entries can be listed again
            assert_archive_content(&archive);
        }
    }

    #[test]
    fn test_archive_entries_sequential() {
        init_logger();
        let data = include_bytes!("../tests/gnu_tar_posix.tar");
        let archive = TarArchive::new(ForwardReader::new(&data[..]), ArchiveMode::Read).unwrap();
        assert_eq!(archive.access_mode(), AccessMode::Sequential);
        assert!(archive.block_store().is_none());
        assert_archive_content(&archive);
        assert!(matches!(archive.entries(), Err(TarError::EntriesConsumed)));

        // pax headers are listed as metadata entries
        let archive = TarArchive::new(ForwardReader::new(&data[..]), ArchiveMode::Read).unwrap();
        let first = archive.entries().unwrap().next().unwrap().unwrap();
        assert_eq!(first.kind(), EntryKind::Metadata);
        assert_eq!(first.header().type_flag, TypeFlag::XHDTYPE);
    }

    #[test]
    fn test_forced_sequential_access() {
        let data = include_bytes!("../tests/gnu_tar_ustar.tar").to_vec();
        let archive =
            TarArchive::with_access(Cursor::new(data), ArchiveMode::Read, AccessMode::Sequential)
                .unwrap();
        assert_archive_content(&archive);

        let err = TarArchive::with_access(
            ForwardReader::new(&b""[..]),
            ArchiveMode::Read,
            AccessMode::Random,
        )
        .unwrap_err();
        assert!(matches!(err, TarError::Unsupported(_)));

        let err = TarArchive::new(ForwardReader::new(&b""[..]), ArchiveMode::Update).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Capability);
    }

    #[test]
    fn test_create_and_read_back() {
        init_logger();
        let archive = TarArchive::new(Cursor::new(Vec::new()), ArchiveMode::Create).unwrap();
        assert_eq!(archive.archive_mode(), ArchiveMode::Create);
        let dir = archive.create_entry("docs/").unwrap();
        assert_eq!(dir.kind(), EntryKind::Directory);
        assert_eq!(dir.name(), "docs");
        archive
            .create_entry_with("docs/hello.txt", b"Hello World\n")
            .unwrap();
        let mut notes = archive.create_entry("docs/notes.txt").unwrap();
        assert_eq!(notes.name(), "notes.txt");
        let mut stream = notes.open().unwrap();
        write!(stream, "{}", "n".repeat(600)).unwrap();
        stream.close().unwrap();
        let data = archive.into_inner().unwrap().into_inner();

        let archive = TarArchive::new(Cursor::new(data), ArchiveMode::Read).unwrap();
        let mut entries = archive
            .entries()
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].full_name(), "docs/");
        assert_eq!(entries[0].size(), 0);
        assert_eq!(read_all(&mut entries[1]), b"Hello World\n");
        assert_eq!(entries[2].size(), 600);
        assert_eq!(read_all(&mut entries[2]), "n".repeat(600).as_bytes());
        let layout = archive.block_store().unwrap().layout();
        assert_eq!(layout[0].allocated, 0, "reserved block is given back");
    }

    #[test]
    fn test_update_entry_through_stream() {
        let data = include_bytes!("../tests/gnu_tar_ustar.tar").to_vec();
        let archive = TarArchive::new(Cursor::new(data), ArchiveMode::Update).unwrap();
        let mut entry = archive.entries().unwrap().nth(2).unwrap().unwrap();
        let mut stream = entry.open().unwrap();
        assert!(matches!(entry.open(), Err(TarError::StreamAlreadyOpen { index: 2 })));
        stream.seek(SeekFrom::End(-1)).unwrap();
        stream.write_all(b"!\n").unwrap();
        stream.close().unwrap();
        // the snapshot keeps the old size, a new listing has the new one
        assert_eq!(entry.size(), 12);
        let mut entry = archive.entries().unwrap().nth(2).unwrap().unwrap();
        assert_eq!(entry.size(), 13);
        assert_eq!(read_all(&mut entry), b"Hello World!\n");
    }

    #[test]
    fn test_delete_entry() {
        let data = include_bytes!("../tests/gnu_tar_ustar.tar").to_vec();
        let archive = TarArchive::new(Cursor::new(data), ArchiveMode::Update).unwrap();
        let first = archive.entries().unwrap().next().unwrap().unwrap();
        first.delete().unwrap();
        let names = archive
            .entries()
            .unwrap()
            .map(|entry| entry.unwrap().full_name().to_owned())
            .collect::<Vec<_>>();
        assert_eq!(names, ["hello_world_513b.txt", "hello_world.txt"]);
        assert_eq!(archive.block_store().unwrap().layout()[0].offset, BLOCKSIZE as u64);

        let read_only = TarArchive::new(
            Cursor::new(include_bytes!("../tests/gnu_tar_ustar.tar").to_vec()),
            ArchiveMode::Read,
        )
        .unwrap();
        let first = read_only.entries().unwrap().next().unwrap().unwrap();
        assert!(matches!(first.delete(), Err(TarError::ReadOnly)));
        assert!(matches!(
            read_only.create_entry("new"),
            Err(TarError::ReadOnly)
        ));
    }

    #[test]
    fn test_sequential_create() {
        let archive = TarArchive::new(ForwardWriter::new(Vec::new()), ArchiveMode::Create).unwrap();
        let mut entry = archive.create_entry_with("a.txt", b"abc").unwrap();
        assert!(matches!(entry.open(), Err(TarError::EntryConsumed)));
        assert!(matches!(archive.entries(), Err(TarError::Unsupported(_))));
        let data = archive.into_inner().unwrap().into_inner();
        assert_eq!(data.len(), 4 * BLOCKSIZE);

        let archive = TarArchive::new(Cursor::new(data), ArchiveMode::Read).unwrap();
        let mut entry = archive.entries().unwrap().next().unwrap().unwrap();
        assert_eq!(read_all(&mut entry), b"abc");
    }

    #[test]
    fn test_extract_to_directory() {
        init_logger();
        let target = tempfile::tempdir().unwrap();
        let archive = TarArchive::new(
            ForwardReader::new(&include_bytes!("../tests/ustar_with_dir.tar")[..]),
            ArchiveMode::Read,
        )
        .unwrap();
        archive.extract_to_directory(target.path()).unwrap();
        assert!(target.path().join("dir").is_dir());
        assert_eq!(fs::read(target.path().join("dir/file.txt")).unwrap(), b"hello");
    }

    #[test]
    fn test_extract_long_name() {
        let target = tempfile::tempdir().unwrap();
        let archive = TarArchive::new(
            Cursor::new(include_bytes!("../tests/ustar_long_name.tar").to_vec()),
            ArchiveMode::Read,
        )
        .unwrap();
        archive.extract_to_directory(target.path()).unwrap();
        let path = target
            .path()
            .join("a".repeat(60))
            .join("b".repeat(60))
            .join(format!("{}.txt", "c".repeat(40)));
        assert_eq!(fs::read_to_string(path).unwrap(), "deep");
    }

    #[test]
    fn test_extract_rejects_bad_targets() {
        let missing = tempfile::tempdir().unwrap().path().join("missing");
        let archive = TarArchive::new(
            Cursor::new(include_bytes!("../tests/ustar_with_dir.tar").to_vec()),
            ArchiveMode::Read,
        )
        .unwrap();
        assert!(matches!(
            archive.extract_to_directory(&missing),
            Err(TarError::DirectoryNotFound(path)) if path == missing
        ));

        let archive = TarArchive::new(Cursor::new(Vec::new()), ArchiveMode::Create).unwrap();
        archive.create_entry_with("../escape.txt", b"x").unwrap();
        let target = tempfile::tempdir().unwrap();
        assert!(matches!(
            archive.extract_to_directory(target.path()),
            Err(TarError::UnsafePath(name)) if name == "../escape.txt"
        ));
    }

    #[test]
    fn test_extract_skips_links() {
        let archive = TarArchive::new(Cursor::new(Vec::new()), ArchiveMode::Create).unwrap();
        archive.create_entry_with("file.txt", b"content").unwrap();
        let mut link = Header::file("link.txt", 0);
        link.type_flag = TypeFlag::SYMTYPE;
        link.link_name = "file.txt".to_owned();
        archive.append(link, &mut io::empty(), false).unwrap();

        let target = tempfile::tempdir().unwrap();
        archive.extract_to_directory(target.path()).unwrap();
        assert!(target.path().join("file.txt").is_file());
        assert!(!target.path().join("link.txt").exists());
    }

    #[test]
    fn test_file_backed_round_trip() {
        let source = tempfile::tempdir().unwrap();
        let input = source.path().join("input.txt");
        fs::write(&input, "x".repeat(1500)).unwrap();

        let file = tempfile::tempfile().unwrap();
        let archive = TarArchive::new(file, ArchiveMode::Create).unwrap();
        let entry = archive.create_entry_from_file(&input, "input.txt").unwrap();
        assert_eq!(entry.size(), 1500);
        assert_eq!(entry.kind(), EntryKind::File);
        let mut file = archive.into_inner().unwrap();
        assert_eq!(file.metadata().unwrap().len(), 6 * BLOCKSIZE as u64);

        file.seek(SeekFrom::Start(0)).unwrap();
        let archive = TarArchive::new(file, ArchiveMode::Update).unwrap();
        let mut entry = archive.entries().unwrap().next().unwrap().unwrap();
        assert_eq!(read_all(&mut entry), "x".repeat(1500).as_bytes());
        archive.finish().unwrap();
    }

    #[test]
    fn test_streams_outlive_the_archive() {
        let archive = TarArchive::new(
            Cursor::new(include_bytes!("../tests/gnu_tar_ustar.tar").to_vec()),
            ArchiveMode::Read,
        )
        .unwrap();
        let mut entry = archive.entries().unwrap().next().unwrap().unwrap();
        let mut stream = entry.open().unwrap();
        drop(archive);
        let err = stream.read(&mut [0; 1]).unwrap_err();
        assert!(matches!(TarError::from(err), TarError::Disposed));
        assert!(matches!(entry.open(), Err(TarError::Disposed)));
    }
}
