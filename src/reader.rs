// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Sequential, bounds-checked reads over a seekable byte source.

use byteorder::{ByteOrder, LittleEndian};
use log::debug;
use std::io::{Read, Seek, SeekFrom};

use crate::{Error, Result, ToU64, TryVec};

/// Decode a 16-bit little-endian field.
#[inline]
pub(crate) fn le_u16(bytes: &[u8; 2]) -> u16 {
    LittleEndian::read_u16(bytes)
}

/// Decode a 64-bit little-endian field.
#[inline]
pub(crate) fn le_u64(bytes: &[u8; 8]) -> u64 {
    LittleEndian::read_u64(bytes)
}

/// Wraps a reader, tracking the current offset and the total stream length
/// so every read can be checked against the bytes that actually remain.
///
/// The cursor only moves forward on a successful read. A failed read
/// rewinds the underlying source to the last good offset.
pub struct BoundedReader<'a, T> {
    reader: &'a mut T,
    offset: u64,
    len: u64,
}

impl<'a, T: Seek> BoundedReader<'a, T> {
    /// Start reading at the source's current position.
    pub fn new(reader: &'a mut T) -> Result<Self> {
        let offset = reader.stream_position()?;
        let len = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(offset))?;
        debug!("bounded reader at {offset} of {len} bytes");
        Ok(Self { reader, offset, len })
    }
}

impl<T> BoundedReader<'_, T> {
    /// Bytes already consumed from the start of the source.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Bytes left between the cursor and the end of the source.
    pub fn remaining(&self) -> u64 {
        self.len.saturating_sub(self.offset)
    }

    /// Whether at least `n` more bytes can be read.
    pub fn can_read(&self, n: u64) -> bool {
        self.remaining() >= n
    }

    /// Fail with [`Error::Truncated`] unless `n` more bytes are available.
    pub fn ensure(&self, n: u64) -> Result<()> {
        if self.can_read(n) {
            Ok(())
        } else {
            Err(self.truncated(n))
        }
    }

    #[cold]
    fn truncated(&self, needed: u64) -> Error {
        Error::Truncated {
            offset: self.offset,
            needed,
            available: self.remaining(),
        }
    }
}

impl<T: Read + Seek> BoundedReader<'_, T> {
    /// Read a fixed number of bytes into an array.
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        self.ensure(N.to_u64())?;
        let mut buf = [0u8; N];
        self.fill(&mut buf)?;
        Ok(buf)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let [byte] = self.read_array::<1>()?;
        Ok(byte)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(le_u16(&self.read_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(le_u64(&self.read_array()?))
    }

    /// Read exactly `n` bytes into a fallibly allocated buffer.
    ///
    /// The length is checked against the remaining input before anything is
    /// allocated, so a hostile length field cannot force a huge allocation.
    pub fn read_bytes(&mut self, n: u64) -> Result<TryVec<u8>> {
        self.ensure(n)?;
        let len = usize::try_from(n).map_err(|_| Error::OutOfMemory)?;
        let mut buf = std::vec::Vec::new();
        buf.try_reserve_exact(len).map_err(|_| Error::OutOfMemory)?;
        buf.resize(len, 0);
        self.fill(&mut buf)?;
        Ok(buf.into())
    }

    fn fill(&mut self, buf: &mut [u8]) -> Result<()> {
        let needed = buf.len().to_u64();
        match self.reader.read_exact(buf) {
            Ok(()) => {
                self.offset += needed;
                Ok(())
            },
            Err(err) => {
                // Put the source back where the last complete read left it.
                self.reader.seek(SeekFrom::Start(self.offset))?;
                match err.kind() {
                    std::io::ErrorKind::UnexpectedEof => Err(self.truncated(needed)),
                    _ => Err(Error::Io(err)),
                }
            },
        }
    }
}

#[test]
fn le_fields_decode_independent_of_host_order() {
    assert_eq!(le_u16(&[0xe6, 0x07]), 2022);
    assert_eq!(le_u64(&[20, 0, 0, 0, 0, 0, 0, 0]), 20);
    assert_eq!(le_u64(&[0, 0, 0, 0, 0, 0, 0, 0x80]), 1 << 63);
}

#[test]
fn can_read_does_not_move_cursor() {
    let mut src = std::io::Cursor::new(b"abcdef".to_vec());
    let mut r = BoundedReader::new(&mut src).unwrap();
    assert!(r.can_read(6));
    assert!(!r.can_read(7));
    assert_eq!(r.offset(), 0);
    assert_eq!(r.read_u8().unwrap(), b'a');
    assert_eq!(r.remaining(), 5);
}

#[test]
fn short_read_is_truncated_and_keeps_offset() {
    let mut src = std::io::Cursor::new(vec![1u8, 2, 3]);
    let mut r = BoundedReader::new(&mut src).unwrap();
    r.read_u8().unwrap();
    match r.read_u64() {
        Err(Error::Truncated { offset, needed, available }) => {
            assert_eq!((offset, needed, available), (1, 8, 2));
        },
        other => panic!("expected truncation, got {other:?}"),
    }
    assert_eq!(r.offset(), 1);
    assert_eq!(r.read_u16().unwrap(), 0x0302);
}

#[test]
fn read_bytes_refuses_lengths_beyond_input() {
    let mut src = std::io::Cursor::new(vec![0u8; 4]);
    let mut r = BoundedReader::new(&mut src).unwrap();
    assert!(matches!(r.read_bytes(u64::MAX), Err(Error::Truncated { .. })));
    assert_eq!(r.read_bytes(4).unwrap().len(), 4);
    assert_eq!(r.remaining(), 0);
}

#[test]
fn starts_at_current_position() {
    let mut src = std::io::Cursor::new(vec![9u8, 8, 7]);
    src.set_position(1);
    let mut r = BoundedReader::new(&mut src).unwrap();
    assert_eq!(r.remaining(), 2);
    assert_eq!(r.read_u8().unwrap(), 8);
}
