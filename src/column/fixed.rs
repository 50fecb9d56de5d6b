// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::ColumnOps;
use crate::memory::MemoryFile;
use byteorder::{ByteOrder, LittleEndian};
use std::path::Path;

/// Which neighbour a binary search resolves to when the probed value sits
/// between (or on) stored timestamps
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BsearchEdge {
    /// Smallest row with `ts >= v`
    NewerOrSame,

    /// Largest row with `ts <= v`
    OlderOrSame,

    /// Smallest row with `ts > v`
    Newer,

    /// Largest row with `ts < v`
    Older,
}

/// Typed fixed-width column; element `i` lives at byte offset `i * width`.
///
/// Elements are packed little-endian.
pub struct FixedColumn {
    mem: MemoryFile,
    width: u64,
}

impl FixedColumn {
    /// Opens the column data file.
    pub fn open(path: &Path, width: u64, bit_hint: u8, writable: bool) -> crate::Result<Self> {
        debug_assert!(width > 0 && width <= 8);
        let mem = MemoryFile::open(path, bit_hint, writable)?;
        Ok(Self { mem, width })
    }

    fn get(&mut self, index: u64) -> crate::Result<&[u8]> {
        self.mem.slice(index * self.width, self.width)
    }

    fn put(&mut self, bytes: &[u8]) -> crate::Result<u64> {
        debug_assert_eq!(bytes.len() as u64, self.width);
        let index = self.size();
        self.mem.set_size((index + 1) * self.width)?;
        self.mem.write_bytes(index * self.width, bytes)?;
        Ok(index)
    }

    /// Reads the BOOL element at `index`.
    pub fn get_bool(&mut self, index: u64) -> crate::Result<bool> {
        Ok(self.get(index)?.first().copied().unwrap_or_default() != 0)
    }

    /// Reads the BYTE element at `index`.
    pub fn get_i8(&mut self, index: u64) -> crate::Result<i8> {
        #[allow(clippy::cast_possible_wrap)]
        Ok(self.get(index)?.first().copied().unwrap_or_default() as i8)
    }

    /// Reads the SHORT element at `index`.
    pub fn get_i16(&mut self, index: u64) -> crate::Result<i16> {
        Ok(LittleEndian::read_i16(self.get(index)?))
    }

    /// Reads the INT element at `index`.
    pub fn get_i32(&mut self, index: u64) -> crate::Result<i32> {
        Ok(LittleEndian::read_i32(self.get(index)?))
    }

    /// Reads the LONG/DATE element at `index`.
    pub fn get_i64(&mut self, index: u64) -> crate::Result<i64> {
        Ok(LittleEndian::read_i64(self.get(index)?))
    }

    /// Reads the FLOAT element at `index`.
    pub fn get_f32(&mut self, index: u64) -> crate::Result<f32> {
        Ok(LittleEndian::read_f32(self.get(index)?))
    }

    /// Reads the DOUBLE element at `index`.
    pub fn get_f64(&mut self, index: u64) -> crate::Result<f64> {
        Ok(LittleEndian::read_f64(self.get(index)?))
    }

    /// Appends a BOOL element, returning its row index.
    pub fn put_bool(&mut self, value: bool) -> crate::Result<u64> {
        self.put(&[u8::from(value)])
    }

    /// Appends a BYTE element, returning its row index.
    pub fn put_i8(&mut self, value: i8) -> crate::Result<u64> {
        #[allow(clippy::cast_sign_loss)]
        self.put(&[value as u8])
    }

    /// Appends a SHORT element, returning its row index.
    pub fn put_i16(&mut self, value: i16) -> crate::Result<u64> {
        let mut buf = [0; 2];
        LittleEndian::write_i16(&mut buf, value);
        self.put(&buf)
    }

    /// Appends an INT element, returning its row index.
    pub fn put_i32(&mut self, value: i32) -> crate::Result<u64> {
        let mut buf = [0; 4];
        LittleEndian::write_i32(&mut buf, value);
        self.put(&buf)
    }

    /// Appends a LONG/DATE element, returning its row index.
    pub fn put_i64(&mut self, value: i64) -> crate::Result<u64> {
        let mut buf = [0; 8];
        LittleEndian::write_i64(&mut buf, value);
        self.put(&buf)
    }

    /// Appends a FLOAT element, returning its row index.
    pub fn put_f32(&mut self, value: f32) -> crate::Result<u64> {
        let mut buf = [0; 4];
        LittleEndian::write_f32(&mut buf, value);
        self.put(&buf)
    }

    /// Appends a DOUBLE element, returning its row index.
    pub fn put_f64(&mut self, value: f64) -> crate::Result<u64> {
        let mut buf = [0; 8];
        LittleEndian::write_f64(&mut buf, value);
        self.put(&buf)
    }

    /// Binary search over a sorted i64 column (the timestamp column).
    ///
    /// Correct across duplicate values; returns `None` when no row
    /// satisfies the edge.
    pub fn bsearch_edge(
        &mut self,
        value: i64,
        edge: BsearchEdge,
        lo: u64,
        hi: u64,
    ) -> crate::Result<Option<u64>> {
        debug_assert_eq!(8, self.width);
        let hi = hi.min(self.size());

        // NOTE: PERF: For some reason, hand-rolling a binary search is
        // faster than using slice::partition_point
        let mut lower = {
            // first row with ts >= value
            let (mut left, mut right) = (lo, hi);
            while left < right {
                let mid = (left + right) / 2;
                if self.get_i64(mid)? < value {
                    left = mid + 1;
                } else {
                    right = mid;
                }
            }
            left
        };
        let mut upper = {
            // first row with ts > value
            let (mut left, mut right) = (lower, hi);
            while left < right {
                let mid = (left + right) / 2;
                if self.get_i64(mid)? <= value {
                    left = mid + 1;
                } else {
                    right = mid;
                }
            }
            left
        };

        Ok(match edge {
            BsearchEdge::NewerOrSame => (lower < hi).then_some(lower),
            BsearchEdge::Newer => (upper < hi).then_some(upper),
            BsearchEdge::OlderOrSame => {
                if upper > lo {
                    upper -= 1;
                    Some(upper)
                } else {
                    None
                }
            }
            BsearchEdge::Older => {
                if lower > lo {
                    lower -= 1;
                    Some(lower)
                } else {
                    None
                }
            }
        })
    }
}

impl ColumnOps for FixedColumn {
    fn size(&self) -> u64 {
        self.mem.size() / self.width
    }

    fn commit(&mut self) -> crate::Result<()> {
        self.mem.commit()
    }

    fn force(&mut self) -> crate::Result<()> {
        self.mem.force()
    }

    fn truncate(&mut self, row_count: u64) -> crate::Result<()> {
        self.mem.truncate(row_count * self.width)
    }

    fn compact(&mut self) -> crate::Result<()> {
        self.mem.compact()
    }

    fn close(self) -> crate::Result<()> {
        self.mem.close()
    }
}
