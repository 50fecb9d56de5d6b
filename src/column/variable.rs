// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::ColumnOps;
use crate::memory::MemoryFile;
use byteorder::{BigEndian, ByteOrder};
use std::path::Path;

/// Length prefix that encodes a null value
const NULL_LEN: i32 = -1;

/// A borrowed string view over a mapped buffer.
///
/// Holds the raw big-endian UTF-16 code units; the borrow ends at the next
/// mutation or read on the owning column, which the `&mut` receivers
/// enforce at compile time.
#[derive(Debug, Clone, Copy)]
pub struct FlyweightStr<'a> {
    units: &'a [u8],
}

impl FlyweightStr<'_> {
    /// Length in UTF-16 code units.
    #[must_use]
    pub fn len(&self) -> usize {
        self.units.len() / 2
    }

    /// Whether the string is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    fn code_units(&self) -> impl Iterator<Item = u16> + '_ {
        self.units.chunks_exact(2).map(BigEndian::read_u16)
    }

    /// Decoded characters; unpaired surrogates become U+FFFD.
    pub fn chars(&self) -> impl Iterator<Item = char> + '_ {
        char::decode_utf16(self.code_units())
            .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
    }

    /// Compares against a Rust string without allocating.
    #[must_use]
    pub fn content_eq(&self, other: &str) -> bool {
        self.code_units().eq(other.encode_utf16())
    }
}

impl std::fmt::Display for FlyweightStr<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for c in self.chars() {
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

impl PartialEq<&str> for FlyweightStr<'_> {
    fn eq(&self, other: &&str) -> bool {
        self.content_eq(other)
    }
}

/// Variable-length (string/binary) column: a data file plus an offsets
/// file holding one big-endian u64 data offset per row.
///
/// Data records are `[len: i32 BE][payload]`; strings store `len` UTF-16
/// code units (2 bytes each, big-endian), blobs store `len` raw bytes, and
/// `len == -1` encodes null (distinct from empty).
pub struct VariableColumn {
    data: MemoryFile,
    offsets: MemoryFile,
    binary: bool,
}

impl VariableColumn {
    /// Opens the data + offsets file pair.
    pub fn open(
        data_path: &Path,
        offsets_path: &Path,
        bit_hint: u8,
        index_bit_hint: u8,
        binary: bool,
        writable: bool,
    ) -> crate::Result<Self> {
        let data = MemoryFile::open(data_path, bit_hint, writable)?;
        let offsets = MemoryFile::open(offsets_path, index_bit_hint, writable)?;
        Ok(Self {
            data,
            offsets,
            binary,
        })
    }

    fn offset(&mut self, row: u64) -> crate::Result<u64> {
        Ok(BigEndian::read_u64(self.offsets.slice(row * 8, 8)?))
    }

    fn len_at(&mut self, offset: u64) -> crate::Result<i32> {
        let mut buf = [0u8; 4];
        self.data.read_bytes(offset, &mut buf)?;
        Ok(BigEndian::read_i32(&buf))
    }

    fn payload_bytes(&self, len: i32) -> u64 {
        if len <= 0 {
            0
        } else if self.binary {
            u64::from(len.unsigned_abs())
        } else {
            u64::from(len.unsigned_abs()) * 2
        }
    }

    fn put(&mut self, record: &[u8]) -> crate::Result<u64> {
        let offset = self.data.append(record)?;
        let mut buf = [0u8; 8];
        BigEndian::write_u64(&mut buf, offset);
        let row = self.size();
        self.offsets.append(&buf)?;
        Ok(row)
    }

    /// Appends a string value, returning its row index.
    pub fn put_str(&mut self, value: &str) -> crate::Result<u64> {
        debug_assert!(!self.binary);
        let units: Vec<u16> = value.encode_utf16().collect();
        let mut record = Vec::with_capacity(4 + units.len() * 2);
        let mut len = [0u8; 4];
        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        BigEndian::write_i32(&mut len, units.len() as i32);
        record.extend_from_slice(&len);
        for unit in units {
            record.extend_from_slice(&unit.to_be_bytes());
        }
        self.put(&record)
    }

    /// Appends a blob, returning its row index.
    pub fn put_bin(&mut self, value: &[u8]) -> crate::Result<u64> {
        debug_assert!(self.binary);
        let mut record = Vec::with_capacity(4 + value.len());
        let mut len = [0u8; 4];
        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        BigEndian::write_i32(&mut len, value.len() as i32);
        record.extend_from_slice(&len);
        record.extend_from_slice(value);
        self.put(&record)
    }

    /// Appends a null value, returning its row index.
    pub fn put_null(&mut self) -> crate::Result<u64> {
        let mut record = [0u8; 4];
        BigEndian::write_i32(&mut record, NULL_LEN);
        self.put(&record)
    }

    /// Value length in UTF-16 code units (strings) or bytes (blobs);
    /// `-1` for null.
    pub fn value_len(&mut self, row: u64) -> crate::Result<i32> {
        let offset = self.offset(row)?;
        self.len_at(offset)
    }

    /// Reads an owned string; `None` for null.
    pub fn get_str(&mut self, row: u64) -> crate::Result<Option<String>> {
        let offset = self.offset(row)?;
        let len = self.len_at(offset)?;
        if len == NULL_LEN {
            return Ok(None);
        }

        let byte_len = self.payload_bytes(len);
        #[allow(clippy::cast_possible_truncation)]
        let mut bytes = vec![0u8; byte_len as usize];
        self.data.read_bytes(offset + 4, &mut bytes)?;

        let units = bytes.chunks_exact(2).map(BigEndian::read_u16);
        char::decode_utf16(units)
            .collect::<Result<String, _>>()
            .map(Some)
            .map_err(|_| crate::Error::Decode(crate::coding::DecodeError::Utf16))
    }

    /// Returns a borrowed view over the mapped value bytes; `None` for null.
    ///
    /// The value must fit within one mapping window; larger values can only
    /// be read owned through [`Self::get_str`].
    pub fn get_flyweight_str(&mut self, row: u64) -> crate::Result<Option<FlyweightStr<'_>>> {
        let offset = self.offset(row)?;
        let len = self.len_at(offset)?;
        if len == NULL_LEN {
            return Ok(None);
        }

        let byte_len = self.payload_bytes(len);
        let units = self.data.slice(offset + 4, byte_len)?;
        Ok(Some(FlyweightStr { units }))
    }

    /// Compares a stored string against `value` without allocating.
    ///
    /// Null never equals anything, not even another null.
    pub fn str_eq(&mut self, row: u64, value: &str) -> crate::Result<bool> {
        let offset = self.offset(row)?;
        let len = self.len_at(offset)?;
        if len == NULL_LEN {
            return Ok(false);
        }

        let mut expected = value.encode_utf16();
        let byte_len = self.payload_bytes(len);
        if byte_len != value.encode_utf16().count() as u64 * 2 {
            return Ok(false);
        }

        // Compare window by window so long values never force a bridge map
        let mut at = offset + 4;
        let end = offset + 4 + byte_len;
        while at < end {
            let n = (end - at).min(4_096);
            let chunk = self.data.slice(at, n)?;
            for stored in chunk.chunks_exact(2).map(BigEndian::read_u16) {
                if expected.next() != Some(stored) {
                    return Ok(false);
                }
            }
            at += n;
        }
        Ok(true)
    }

    /// Reads an owned blob; `None` for null.
    pub fn get_bin(&mut self, row: u64) -> crate::Result<Option<Vec<u8>>> {
        let offset = self.offset(row)?;
        let len = self.len_at(offset)?;
        if len == NULL_LEN {
            return Ok(None);
        }

        #[allow(clippy::cast_possible_truncation)]
        let mut bytes = vec![0u8; self.payload_bytes(len) as usize];
        self.data.read_bytes(offset + 4, &mut bytes)?;
        Ok(Some(bytes))
    }
}

impl ColumnOps for VariableColumn {
    fn size(&self) -> u64 {
        self.offsets.size() / 8
    }

    fn commit(&mut self) -> crate::Result<()> {
        // data first, offsets last: an offset entry must never point at
        // bytes that were not flushed
        self.data.commit()?;
        self.offsets.commit()
    }

    fn force(&mut self) -> crate::Result<()> {
        self.data.force()?;
        self.offsets.force()
    }

    fn truncate(&mut self, row_count: u64) -> crate::Result<()> {
        if row_count == 0 {
            self.data.truncate(0)?;
            return self.offsets.truncate(0);
        }

        let last = self.offset(row_count - 1)?;
        let len = self.len_at(last)?;
        let data_end = last + 4 + self.payload_bytes(len);
        self.data.truncate(data_end)?;
        self.offsets.truncate(row_count * 8)
    }

    fn compact(&mut self) -> crate::Result<()> {
        self.data.compact()?;
        self.offsets.compact()
    }

    fn close(self) -> crate::Result<()> {
        self.data.close()?;
        self.offsets.close()
    }
}
