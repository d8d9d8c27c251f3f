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
//! Fixed-width header fields: NUL-padded text and ASCII octal numbers.

use crate::{Result, TarError};
use core::fmt::{Debug, Formatter};
use num_traits::{CheckedAdd, CheckedMul, Num};
use std::borrow::Cow;
use std::io::{self, Read};

/// Base type for strings embedded in a Tar header. The Tar format sets a fixed
/// width for each field. The string is NUL terminated if it doesn't fill the
/// entire array.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct TarFormatString<const N: usize> {
    bytes: [u8; N],
}

impl<const N: usize> TarFormatString<N> {
    /// Constructor.
    ///
    /// # Panics
    /// Panics of `N` is zero, i.e., the underlying array has no length.
    #[must_use]
    pub const fn new(bytes: [u8; N]) -> Self {
        assert!(N > 0, "array should have at least one element");
        Self { bytes }
    }

    /// Reads exactly `N` bytes from `reader`.
    pub fn read_from<R: Read + ?Sized>(reader: &mut R) -> io::Result<Self> {
        let mut bytes = [0; N];
        reader.read_exact(&mut bytes)?;
        Ok(Self::new(bytes))
    }

    /// Stores `text` NUL padded. `field` names the header field in the error.
    ///
    /// # Errors
    /// Returns [`TarError::FieldTooLong`] if `text` has more than `N` bytes.
    pub fn encode(field: &'static str, text: &str) -> Result<Self> {
        let len = text.len();
        if len > N {
            return Err(TarError::FieldTooLong { field, len, max: N });
        }
        let mut bytes = [0; N];
        bytes[..len].copy_from_slice(text.as_bytes());
        Ok(Self::new(bytes))
    }

    /// True if the is string empty (ignoring NULL bytes).
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.bytes[0] == 0
    }

    /// Returns the length of the payload in bytes. This is either the full
    /// capacity `N` or the data until the first NULL byte.
    #[must_use]
    pub fn size(&self) -> usize {
        memchr::memchr(0, &self.bytes).unwrap_or(N)
    }

    /// Payload without the NUL padding.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.size()]
    }

    /// The full field including padding.
    #[must_use]
    pub const fn as_raw(&self) -> &[u8; N] {
        &self.bytes
    }

    /// Payload as text. Invalid UTF-8 sequences are replaced rather than rejected,
    /// archives written on other systems often carry legacy encodings.
    #[must_use]
    pub fn to_string_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.as_bytes())
    }
}

impl<const N: usize> Debug for TarFormatString<N> {
    fn fmt(&self, f: &mut Formatter) -> core::fmt::Result {
        write!(
            f,
            "str='{}',byte_usage={}/{}",
            self.to_string_lossy(),
            self.size(),
            N
        )
    }
}

/// Reads a `width` byte ASCII octal field from `reader`.
///
/// Padding is inconsistent across tar implementations: spaces and NUL bytes show
/// up leading, trailing and in between. Every byte that is not an ASCII digit is
/// skipped, the remaining digits are read most significant first, each one
/// weighted by a power of eight. A field without digits is zero.
///
/// # Errors
/// Fails if `reader` ends early or the digits overflow `T`.
pub fn decode_octal_field<T, R>(reader: &mut R, width: usize) -> io::Result<T>
where
    T: Num + CheckedAdd + CheckedMul + From<u8>,
    R: Read + ?Sized,
{
    let mut field = vec![0; width];
    reader.read_exact(&mut field)?;
    parse_octal(&field)
}

/// Like [`decode_octal_field`], for a field already in memory.
///
/// `8` and `9` are no octal digits but are still accepted and weighted like
/// any other digit, as lenient readers do.
///
/// # Errors
/// Fails if the digits overflow `T`.
pub fn parse_octal<T>(field: &[u8]) -> io::Result<T>
where
    T: Num + CheckedAdd + CheckedMul + From<u8>,
{
    let base = T::from(8);
    field
        .iter()
        .filter(|byte| byte.is_ascii_digit())
        .try_fold(T::zero(), |value, &digit| {
            value
                .checked_mul(&base)
                .and_then(|value| value.checked_add(&T::from(digit - b'0')))
        })
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("octal field {:?} overflows", String::from_utf8_lossy(field)),
            )
        })
}

/// Writes `value` into `field` as zero padded octal digits followed by a NUL.
///
/// # Errors
/// Returns [`TarError::FieldOverflow`] if the digits don't fit into `field.len() - 1` bytes.
pub fn encode_octal_field(value: u64, field: &mut [u8]) -> Result<()> {
    let width = field.len();
    let digits = format!("{value:o}");
    if width == 0 || digits.len() > width - 1 {
        return Err(TarError::FieldOverflow { value, width });
    }
    let (number, terminator) = field.split_at_mut(width - 1);
    let padding = number.len() - digits.len();
    number[..padding].fill(b'0');
    number[padding..].copy_from_slice(digits.as_bytes());
    terminator[0] = 0;
    Ok(())
}

#[cfg(test)]
mod tar_format_string_tests {
    use super::TarFormatString;
    use crate::TarError;

    use core::mem::size_of_val;

    #[test]
    fn test_empty_string() {
        let empty = TarFormatString::new([0]);
        assert_eq!(size_of_val(&empty), 1);
        assert!(empty.is_empty());
        assert_eq!(empty.size(), 0);
        assert_eq!(empty.to_string_lossy(), "");
    }

    #[test]
    fn test_one_byte_string() {
        let s = TarFormatString::new([b'A']);
        assert_eq!(size_of_val(&s), 1);
        assert!(!s.is_empty());
        assert_eq!(s.size(), 1);
        assert_eq!(s.to_string_lossy(), "A");
    }

    #[test]
    fn test_two_byte_string_nul_terminated() {
        let s = TarFormatString::new([b'A', 0, b'B']);
        assert_eq!(size_of_val(&s), 3);
        assert!(!s.is_empty());
        assert_eq!(s.size(), 1);
        assert_eq!(s.as_bytes(), b"A");
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let s = TarFormatString::new([b'A', 0xff, 0]);
        assert_eq!(s.to_string_lossy(), "A\u{fffd}");
    }

    #[test]
    fn test_encode() {
        let s = TarFormatString::<8>::encode("owner name", "phip").unwrap();
        assert_eq!(s.as_raw(), b"phip\0\0\0\0");
        assert_eq!(s.size(), 4);

        let full = TarFormatString::<4>::encode("owner name", "phip").unwrap();
        assert_eq!(full.size(), 4);
        assert_eq!(full.to_string_lossy(), "phip");

        let err = TarFormatString::<3>::encode("owner name", "phip").unwrap_err();
        assert!(matches!(
            err,
            TarError::FieldTooLong {
                field: "owner name",
                len: 4,
                max: 3
            }
        ));
    }

    #[test]
    fn test_read_from_consumes_exactly_n_bytes() {
        let mut data: &[u8] = b"abc\0\0rest";
        let s = TarFormatString::<5>::read_from(&mut data).unwrap();
        assert_eq!(s.to_string_lossy(), "abc");
        assert_eq!(data, b"rest");
    }
}
