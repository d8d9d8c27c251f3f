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
//! TAR header definition taken from <https://www.gnu.org/software/tar/manual/html_node/Standard.html>.
//! A Tar-archive is a collection of 512-byte sized blocks. Unfortunately there are several
//! TAR-like archive specifications. An Overview can be found here:
//! <https://www.gnu.org/software/tar/manual/html_node/Formats.html#Formats>
//!
//! Headers are always written in the POSIX ustar layout. On read, everything after the link
//! name is only interpreted if the `ustar\0` magic is present; older headers (v7, and the GNU
//! `ustar  ` variant) leave [`Header::ustar`] empty.

use crate::{
    decode_octal_field, encode_octal_field, Result, TarError, TarFormatString, BLOCKSIZE,
};
use core::fmt::{Display, Formatter};
use std::fs::Metadata;
use std::io::{self, Read, Write};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Capacity of the name and link name fields.
pub const NAME_LEN: usize = 100;
/// Capacity of the ustar prefix field that holds the leading directories of long names.
pub const PREFIX_LEN: usize = 155;

const USTAR_MAGIC: &[u8; 6] = b"ustar\0";
const USTAR_VERSION: &[u8; 2] = b"00";
const SIZE_OFFSET: usize = 124;
const CHECKSUM_OFFSET: usize = 148;
/// Bytes up to and including the magic.
const COMMON_LEN: usize = 263;
/// Bytes up to and including the prefix.
const USTAR_LEN: usize = 500;

/// Device numbers of character and block special files.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct DeviceVersion {
    pub major: u32,
    pub minor: u32,
}

/// The part of a header that only exists in the ustar format.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UstarExtension {
    pub owner_name: String,
    pub group_name: String,
    pub device: DeviceVersion,
}

/// Decoded header of one archive member.
///
/// Each file is started by such a header, that describes the size and
/// the file name. After that, the file content stands in chunks of 512 bytes.
/// The number of bytes can be derived from the file size.
#[derive(Debug, Clone, Eq)]
pub struct Header {
    /// Full path. Long names are split into the name and prefix fields on write and joined
    /// with `/` on read.
    pub name: String,
    pub mode: ModeFlags,
    pub uid: u64,
    pub gid: u64,
    /// Content size in bytes.
    pub size: u64,
    /// Last modification, in seconds since the UNIX epoch.
    pub mtime: u64,
    pub type_flag: TypeFlag,
    pub link_name: String,
    /// Owner names and device numbers; `None` for pre-POSIX headers.
    pub ustar: Option<UstarExtension>,
    checksum: u32,
}

impl Header {
    /// A regular file of `size` bytes, modified now.
    #[must_use]
    pub fn file(name: &str, size: u64) -> Self {
        Self::new(
            name,
            TypeFlag::REGTYPE,
            size,
            ModeFlags::OwnerRead
                | ModeFlags::OwnerWrite
                | ModeFlags::GroupRead
                | ModeFlags::OthersRead,
        )
    }

    /// A directory, modified now.
    #[must_use]
    pub fn directory(name: &str) -> Self {
        Self::new(
            name,
            TypeFlag::DIRTYPE,
            0,
            ModeFlags::OwnerRead
                | ModeFlags::OwnerWrite
                | ModeFlags::OwnerExec
                | ModeFlags::GroupRead
                | ModeFlags::GroupExec
                | ModeFlags::OthersRead
                | ModeFlags::OthersExec,
        )
    }

    /// A directory if `name` ends with a path separator, a regular file of `size` bytes
    /// otherwise.
    #[must_use]
    pub fn for_name(name: &str, size: u64) -> Self {
        if name.ends_with(['/', '\\']) {
            Self::directory(name)
        } else {
            Self::file(name, size)
        }
    }

    /// A file or directory header carrying the size, modification time and (on UNIX) the
    /// permissions of `metadata`.
    #[must_use]
    pub fn from_metadata(name: &str, metadata: &Metadata) -> Self {
        let mut header = if metadata.is_dir() {
            Self::directory(name)
        } else {
            Self::file(name, metadata.len())
        };
        if let Ok(modified) = metadata.modified() {
            header.set_modified(modified);
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            header.mode = ModeFlags::from_bits_truncate(u64::from(metadata.permissions().mode()));
        }
        header
    }

    fn new(name: &str, type_flag: TypeFlag, size: u64, mode: ModeFlags) -> Self {
        let mtime = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |since| since.as_secs());
        Self {
            name: name.to_owned(),
            mode,
            uid: 0,
            gid: 0,
            size,
            mtime,
            type_flag,
            link_name: String::new(),
            ustar: Some(UstarExtension::default()),
            checksum: 0,
        }
    }

    /// Decodes one header block from `reader`. Exactly [`BLOCKSIZE`] bytes are consumed.
    /// The checksum is stored but not verified.
    ///
    /// # Errors
    /// Fails if `reader` ends before the block is complete.
    pub fn decode<R: Read + ?Sized>(reader: &mut R) -> io::Result<Self> {
        let name = TarFormatString::<NAME_LEN>::read_from(reader)?;
        let mode = decode_octal_field::<u64, _>(reader, 8)?;
        let uid = decode_octal_field(reader, 8)?;
        let gid = decode_octal_field(reader, 8)?;
        let size = decode_octal_field(reader, 12)?;
        let mtime = decode_octal_field(reader, 12)?;
        let checksum = decode_octal_field(reader, 8)?;
        let mut type_flag = [0; 1];
        reader.read_exact(&mut type_flag)?;
        let link_name = TarFormatString::<NAME_LEN>::read_from(reader)?;
        let mut magic = [0; 6];
        reader.read_exact(&mut magic)?;

        let mut header = Self {
            name: name.to_string_lossy().into_owned(),
            mode: ModeFlags::from_bits_retain(mode),
            uid,
            gid,
            size,
            mtime,
            type_flag: TypeFlag::from_byte(type_flag[0]),
            link_name: link_name.to_string_lossy().into_owned(),
            ustar: None,
            checksum,
        };

        let mut rest = [0; BLOCKSIZE];
        if &magic != USTAR_MAGIC {
            reader.read_exact(&mut rest[..BLOCKSIZE - COMMON_LEN])?;
            return Ok(header);
        }

        // version
        reader.read_exact(&mut rest[..USTAR_VERSION.len()])?;
        let owner_name = TarFormatString::<32>::read_from(reader)?;
        let group_name = TarFormatString::<32>::read_from(reader)?;
        let major = decode_octal_field(reader, 8)?;
        let minor = decode_octal_field(reader, 8)?;
        let prefix = TarFormatString::<PREFIX_LEN>::read_from(reader)?;
        reader.read_exact(&mut rest[..BLOCKSIZE - USTAR_LEN])?;

        if !prefix.is_empty() {
            header.name = format!("{}/{}", prefix.to_string_lossy(), header.name);
        }
        header.ustar = Some(UstarExtension {
            owner_name: owner_name.to_string_lossy().into_owned(),
            group_name: group_name.to_string_lossy().into_owned(),
            device: DeviceVersion { major, minor },
        });
        Ok(header)
    }

    /// Decodes a header block held in memory.
    ///
    /// # Errors
    /// Fails if a numeric field overflows.
    pub fn from_block(block: &[u8; BLOCKSIZE]) -> Result<Self> {
        Ok(Self::decode(&mut &block[..])?)
    }

    /// Encodes the header as one ustar block, including the checksum.
    ///
    /// # Errors
    /// - [`TarError::NameTooLong`] if the name can't be split into name and prefix fields
    /// - [`TarError::FieldTooLong`] if the link name or an owner name doesn't fit
    /// - [`TarError::FieldOverflow`] if a number doesn't fit its field
    pub fn encode(&self) -> Result<[u8; BLOCKSIZE]> {
        let (prefix, name) = split_name(&self.name)?;
        let no_extension = UstarExtension::default();
        let ustar = self.ustar.as_ref().unwrap_or(&no_extension);

        let mut block = [0; BLOCKSIZE];
        let mut out = &mut block[..];
        out.write_all(TarFormatString::<NAME_LEN>::encode("name", name)?.as_raw())?;
        out.write_all(&octal::<8>(self.mode.bits())?)?;
        out.write_all(&octal::<8>(self.uid)?)?;
        out.write_all(&octal::<8>(self.gid)?)?;
        out.write_all(&octal::<12>(self.size)?)?;
        out.write_all(&octal::<12>(self.mtime)?)?;
        // checksum is calculated with the field set to spaces
        out.write_all(&[b' '; 8])?;
        out.write_all(&[self.type_flag.as_byte()])?;
        out.write_all(TarFormatString::<NAME_LEN>::encode("link name", &self.link_name)?.as_raw())?;
        out.write_all(USTAR_MAGIC)?;
        out.write_all(USTAR_VERSION)?;
        out.write_all(TarFormatString::<32>::encode("owner name", &ustar.owner_name)?.as_raw())?;
        out.write_all(TarFormatString::<32>::encode("group name", &ustar.group_name)?.as_raw())?;
        out.write_all(&octal::<8>(u64::from(ustar.device.major))?)?;
        out.write_all(&octal::<8>(u64::from(ustar.device.minor))?)?;
        out.write_all(TarFormatString::<PREFIX_LEN>::encode("prefix", prefix)?.as_raw())?;

        seal(&mut block)?;
        Ok(block)
    }

    /// The checksum stored in a decoded header. Zero for headers that were never decoded.
    #[must_use]
    pub const fn checksum(&self) -> u32 {
        self.checksum
    }

    /// Returns the number of blocks that are required to store the whole file
    /// content.
    #[must_use]
    pub const fn payload_block_count(&self) -> u64 {
        self.size.div_ceil(BLOCKSIZE as u64)
    }

    /// A Tar archive is terminated by a header with an empty name, zero size and a
    /// NUL type flag, which is what an all-zero block decodes to.
    #[must_use]
    pub fn is_end_of_archive(&self) -> bool {
        self.name.is_empty() && self.size == 0 && self.type_flag == TypeFlag::AREGTYPE
    }

    /// How the entry should be treated when extracted.
    #[must_use]
    pub fn kind(&self) -> EntryKind {
        // old tar marks directories only by the trailing slash
        if self.type_flag == TypeFlag::AREGTYPE && self.name.ends_with('/') {
            return EntryKind::Directory;
        }
        self.type_flag.kind()
    }

    #[must_use]
    pub fn modified(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(self.mtime)
    }

    /// Sets the modification time. Times before the epoch are stored as the epoch.
    pub fn set_modified(&mut self, time: SystemTime) {
        self.mtime = time
            .duration_since(UNIX_EPOCH)
            .map_or(0, |since| since.as_secs());
    }
}

/// The stored checksum is not compared; it is recomputed on every encode.
impl PartialEq for Header {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.mode == other.mode
            && self.uid == other.uid
            && self.gid == other.gid
            && self.size == other.size
            && self.mtime == other.mtime
            && self.type_flag == other.type_flag
            && self.link_name == other.link_name
            && self.ustar == other.ustar
    }
}

fn octal<const N: usize>(value: u64) -> Result<[u8; N]> {
    let mut field = [0; N];
    encode_octal_field(value, &mut field)?;
    Ok(field)
}

/// Unsigned sum of all header bytes.
fn checksum(block: &[u8; BLOCKSIZE]) -> u32 {
    block.iter().map(|&byte| u32::from(byte)).sum()
}

/// Stores the checksum of `block` as six digits, NUL, space.
fn seal(block: &mut [u8; BLOCKSIZE]) -> Result<()> {
    block[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 8].fill(b' ');
    let checksum = checksum(block);
    encode_octal_field(
        u64::from(checksum),
        &mut block[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 7],
    )
}

/// Replaces the size field of an encoded header block and updates the checksum. Everything
/// else, including a non-POSIX magic, is left as it is.
pub(crate) fn patch_size(block: &mut [u8; BLOCKSIZE], size: u64) -> Result<()> {
    encode_octal_field(size, &mut block[SIZE_OFFSET..SIZE_OFFSET + 12])?;
    seal(block)
}

/// Splits `name` into ustar prefix and name. The first `/` that leaves at most
/// [`NAME_LEN`] bytes for the name is used, so the name field is filled as far as possible.
fn split_name(name: &str) -> Result<(&str, &str)> {
    if name.len() <= NAME_LEN {
        return Ok(("", name));
    }
    name.match_indices('/')
        .map(|(index, _)| (&name[..index], &name[index + 1..]))
        .find(|(prefix, rest)| {
            !rest.is_empty() && rest.len() <= NAME_LEN && prefix.len() <= PREFIX_LEN
        })
        .ok_or(TarError::NameTooLong { len: name.len() })
}

/// Returns true if every byte of `block` is zero.
#[must_use]
pub fn is_zero_block(block: &[u8]) -> bool {
    block.iter().all(|&byte| byte == 0)
}

/// Describes the kind of payload, that follows after a [`Header`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[allow(clippy::upper_case_acronyms)]
pub enum TypeFlag {
    /// Represents a regular file.
    REGTYPE,
    /// Represents a regular file. In order to be compatible with older versions of tar, a typeflag
    /// value of AREGTYPE should be silently recognized as a regular file. New archives should be
    /// created using REGTYPE. Also, for backward compatibility, tar treats a regular file whose
    /// name ends with a slash as a directory.
    AREGTYPE,
    /// This flag represents a file linked to another file, of any type, previously archived. The
    /// linked-to name is specified in the linkname field with a trailing null.
    LINK,
    /// This represents a symbolic link to another file. The linked-to name is specified in the
    /// linkname field with a trailing null.
    SYMTYPE,
    /// Character special file. The devmajor and devminor fields contain the device numbers.
    CHRTYPE,
    /// Block special file. The devmajor and devminor fields contain the device numbers.
    BLKTYPE,
    /// This flag specifies a directory or sub-directory. The directory name in the name field
    /// should end with a slash.
    DIRTYPE,
    /// This specifies a FIFO special file. Note that the archiving of a FIFO file archives the
    /// existence of this file and not its contents.
    FIFOTYPE,
    /// This specifies a contiguous file, which is the same as a normal file except that, in
    /// operating systems which support it, all its space is allocated contiguously on the disk.
    CONTTYPE,
    /// Extended header referring to the next file in the archive
    XHDTYPE,
    /// Global extended header
    XGLTYPE,
    /// GNU directory dump
    GNUDUMPDIR,
    /// GNU long link name for the next entry
    GNULONGLINK,
    /// GNU long name for the next entry
    GNULONGNAME,
    /// GNU continuation of a file from the previous volume
    GNUMULTIVOL,
    /// GNU sparse file
    GNUSPARSE,
    /// GNU volume header
    GNUVOLHDR,
    /// Solaris extended header
    SOLARISXHDTYPE,
    /// Any other byte. Kept so unknown entries can be skipped instead of failing the archive.
    Other(u8),
}

impl TypeFlag {
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        match byte {
            b'0' => Self::REGTYPE,
            b'\0' => Self::AREGTYPE,
            b'1' => Self::LINK,
            b'2' => Self::SYMTYPE,
            b'3' => Self::CHRTYPE,
            b'4' => Self::BLKTYPE,
            b'5' => Self::DIRTYPE,
            b'6' => Self::FIFOTYPE,
            b'7' => Self::CONTTYPE,
            b'x' => Self::XHDTYPE,
            b'g' => Self::XGLTYPE,
            b'D' => Self::GNUDUMPDIR,
            b'K' => Self::GNULONGLINK,
            b'L' => Self::GNULONGNAME,
            b'M' => Self::GNUMULTIVOL,
            b'S' => Self::GNUSPARSE,
            b'V' => Self::GNUVOLHDR,
            b'X' => Self::SOLARISXHDTYPE,
            other => Self::Other(other),
        }
    }

    #[must_use]
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::REGTYPE => b'0',
            Self::AREGTYPE => b'\0',
            Self::LINK => b'1',
            Self::SYMTYPE => b'2',
            Self::CHRTYPE => b'3',
            Self::BLKTYPE => b'4',
            Self::DIRTYPE => b'5',
            Self::FIFOTYPE => b'6',
            Self::CONTTYPE => b'7',
            Self::XHDTYPE => b'x',
            Self::XGLTYPE => b'g',
            Self::GNUDUMPDIR => b'D',
            Self::GNULONGLINK => b'K',
            Self::GNULONGNAME => b'L',
            Self::GNUMULTIVOL => b'M',
            Self::GNUSPARSE => b'S',
            Self::GNUVOLHDR => b'V',
            Self::SOLARISXHDTYPE => b'X',
            Self::Other(other) => other,
        }
    }

    /// Whether we have a regular file.
    #[must_use]
    pub fn is_regular_file(self) -> bool {
        self == Self::AREGTYPE || self == Self::REGTYPE
    }

    #[must_use]
    pub const fn kind(self) -> EntryKind {
        match self {
            Self::REGTYPE | Self::AREGTYPE | Self::CONTTYPE => EntryKind::File,
            Self::DIRTYPE => EntryKind::Directory,
            Self::LINK | Self::SYMTYPE | Self::CHRTYPE | Self::BLKTYPE | Self::FIFOTYPE => {
                EntryKind::Link
            }
            Self::XHDTYPE
            | Self::XGLTYPE
            | Self::GNUDUMPDIR
            | Self::GNULONGLINK
            | Self::GNULONGNAME
            | Self::GNUMULTIVOL
            | Self::GNUSPARSE
            | Self::GNUVOLHDR
            | Self::SOLARISXHDTYPE => EntryKind::Metadata,
            Self::Other(_) => EntryKind::Other,
        }
    }
}

/// Coarse classification of an entry.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum EntryKind {
    File,
    Directory,
    /// Hard and symbolic links, device files and FIFOs.
    Link,
    /// Extension headers that describe other entries.
    Metadata,
    Other,
}

impl Display for EntryKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            Self::File => "file",
            Self::Directory => "directory",
            Self::Link => "link",
            Self::Metadata => "metadata",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}

bitflags::bitflags! {
    /// UNIX file permissions in octal format.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ModeFlags: u64 {
        /// Set UID on execution.
        const SetUID = 0o4000;
        /// Set GID on execution.
        const SetGID = 0o2000;
        /// Reserved.
        const TSVTX = 0o1000;
        /// Owner read.
        const OwnerRead = 0o400;
        /// Owner write.
        const OwnerWrite = 0o200;
        /// Owner execute.
        const OwnerExec = 0o100;
        /// Group read.
        const GroupRead = 0o040;
        /// Group write.
        const GroupWrite = 0o020;
        /// Group execute.
        const GroupExec = 0o010;
        /// Others read.
        const OthersRead = 0o004;
        /// Others read.
        const OthersWrite = 0o002;
        /// Others execute.
        const OthersExec = 0o001;
    }
}
