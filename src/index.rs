// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::memory::MemoryFile;
use byteorder::{BigEndian, ByteOrder};
use rustc_hash::FxHashSet;
use std::path::Path;

/// Key file header: row chunk size, key space, current key block offset
const HEADER_BYTES: u64 = 24;

/// Key block prefix: row-file append offset at commit time
const BLOCK_PREFIX_BYTES: u64 = 8;

/// Bytes per key slot: row count + last chunk offset
const SLOT_BYTES: u64 = 16;

/// The row file starts with a pad so a chunk offset of 0 means "none"
const ROW_FILE_PAD: u64 = 8;

const MIN_ROW_CHUNK: u64 = 8;

/// Append-only multimap from a bounded integer key to an ordered sequence
/// of row ids.
///
/// Two files. The key file holds a header plus a sequence of *key blocks*;
/// a block is a full array of `{rowCount, lastChunkOffset}` slots, one per
/// key, prefixed with the row-file append offset at the time the block was
/// committed. The row file holds fixed-size chunks of row ids, each chunk
/// ending with the offset of its predecessor, so a key's rows form a
/// backward chain from the slot's last chunk.
///
/// Commits never mutate a published block: the writer copies the current
/// block to the end of the key file on its first mutation after a commit.
/// The offset of a committed block is the index's *tx address* - readers
/// position themselves on a block and see exactly the rows that commit
/// published. All integers are big-endian.
pub struct KvIndex {
    kdata: MemoryFile,
    rdata: MemoryFile,
    row_chunk_size: u64,
    key_space: u64,
    block_offset: u64,
    block_shared: bool,
    cursor: Option<Cursor>,
    /// Keys holding at least one row in the current view; built lazily,
    /// kept current by `add`, so truncation never walks the key space
    occupied: Option<FxHashSet<i32>>,
}

/// Chain offsets of the most recently walked key, head to tail
struct Cursor {
    key: i32,
    chunks: Vec<u64>,
}

impl KvIndex {
    /// Opens (writers: possibly creates) an index file pair.
    ///
    /// `key_space` must be a power of two; `record_count_hint` sizes the
    /// row chunks. Both are ignored when the key file already carries a
    /// header.
    pub fn open(
        key_path: &Path,
        row_path: &Path,
        key_space: u64,
        record_count_hint: u64,
        key_bit_hint: u8,
        row_bit_hint: u8,
        writable: bool,
    ) -> crate::Result<Self> {
        debug_assert!(key_space.is_power_of_two());

        let mut kdata = MemoryFile::open(key_path, key_bit_hint, writable)?;
        let rdata = MemoryFile::open(row_path, row_bit_hint, writable)?;

        let fresh = kdata.size() < HEADER_BYTES;
        let (row_chunk_size, key_space, block_offset) = if fresh {
            let row_chunk_size = record_count_hint
                .div_ceil(key_space)
                .next_power_of_two()
                .max(MIN_ROW_CHUNK);
            (row_chunk_size, key_space, HEADER_BYTES)
        } else {
            let header = kdata.slice(0, HEADER_BYTES)?;
            let (chunk, rest) = header.split_at(8);
            let (space, block) = rest.split_at(8);
            (
                BigEndian::read_u64(chunk),
                BigEndian::read_u64(space),
                BigEndian::read_u64(block),
            )
        };

        let mut index = Self {
            kdata,
            rdata,
            row_chunk_size,
            key_space,
            block_offset,
            block_shared: !fresh,
            cursor: None,
            occupied: fresh.then(FxHashSet::default),
        };

        if fresh {
            if writable {
                let mut header = [0u8; HEADER_BYTES as usize];
                let (chunk, rest) = header.split_at_mut(8);
                let (space, block) = rest.split_at_mut(8);
                chunk.copy_from_slice(&row_chunk_size.to_be_bytes());
                space.copy_from_slice(&key_space.to_be_bytes());
                block.copy_from_slice(&HEADER_BYTES.to_be_bytes());
                index.kdata.append(&header)?;
                index.init_block(HEADER_BYTES)?;
                index.rdata.append(&[0u8; ROW_FILE_PAD as usize])?;
            } else {
                // Read before the writer ever created it: empty view
                index.block_offset = 0;
            }
        }

        log::trace!(
            "opened index {key_path:?}: key_space={}, chunk={}, block@{}",
            index.key_space,
            index.row_chunk_size,
            index.block_offset
        );
        Ok(index)
    }

    fn block_bytes(&self) -> u64 {
        BLOCK_PREFIX_BYTES + self.key_space * SLOT_BYTES
    }

    fn chunk_bytes(&self) -> u64 {
        self.row_chunk_size * 8 + 8
    }

    /// Zeroes a freshly allocated block at `offset` and stamps its
    /// row-file watermark.
    fn init_block(&mut self, offset: u64) -> crate::Result<()> {
        let len = self.block_bytes();
        self.kdata.set_size(offset + len)?;
        self.kdata.write_bytes(offset, &ROW_FILE_PAD.to_be_bytes())?;

        let zeros = vec![0u8; 4_096];
        let mut at = offset + BLOCK_PREFIX_BYTES;
        let end = offset + len;
        while at < end {
            #[allow(clippy::cast_possible_truncation)]
            let n = (end - at).min(zeros.len() as u64) as usize;
            self.kdata.write_bytes(at, zeros.get(..n).unwrap_or(&[]))?;
            at += n as u64;
        }
        Ok(())
    }

    /// Copies the current block to the end of the key file so the committed
    /// one stays untouched.
    fn ensure_private_block(&mut self) -> crate::Result<()> {
        if !self.block_shared {
            return Ok(());
        }

        let len = self.block_bytes();
        if self.block_offset == 0 {
            // No committed block to copy (write after read-only bootstrap)
            return Err(crate::Error::Unrecoverable);
        }

        #[allow(clippy::cast_possible_truncation)]
        let mut block = vec![0u8; len as usize];
        self.kdata.read_bytes(self.block_offset, &mut block)?;

        let new_offset = self.kdata.size();
        self.kdata.append(&block)?;

        log::trace!(
            "index {:?}: copied key block {} -> {new_offset}",
            self.kdata.path(),
            self.block_offset
        );
        self.block_offset = new_offset;
        self.block_shared = false;
        Ok(())
    }

    fn check_key(&self, key: i32) -> crate::Result<u64> {
        if key < 0 || u64::from(key.unsigned_abs()) >= self.key_space {
            return Err(crate::Error::IndexKeyOutOfRange {
                key: i64::from(key),
                key_space: self.key_space,
            });
        }
        Ok(u64::from(key.unsigned_abs()))
    }

    fn slot_offset(&self, key: u64) -> u64 {
        self.block_offset + BLOCK_PREFIX_BYTES + key * SLOT_BYTES
    }

    fn read_slot(&mut self, key: u64) -> crate::Result<(u64, u64)> {
        let slot = self.kdata.slice(self.slot_offset(key), SLOT_BYTES)?;
        let (count, last_chunk) = slot.split_at(8);
        Ok((BigEndian::read_u64(count), BigEndian::read_u64(last_chunk)))
    }

    fn write_slot(&mut self, key: u64, count: u64, last_chunk: u64) -> crate::Result<()> {
        let mut buf = [0u8; SLOT_BYTES as usize];
        let (head, tail) = buf.split_at_mut(8);
        head.copy_from_slice(&count.to_be_bytes());
        tail.copy_from_slice(&last_chunk.to_be_bytes());
        self.kdata.write_bytes(self.slot_offset(key), &buf)
    }

    /// Appends `row_id` to the key's chain.
    pub fn add(&mut self, key: i32, row_id: u64) -> crate::Result<()> {
        let key_at = self.check_key(key)?;
        self.ensure_private_block()?;

        let (count, mut last_chunk) = self.read_slot(key_at)?;

        if count % self.row_chunk_size == 0 {
            // Current chunk full (or none): chain a new one
            let offset = self.rdata.size().max(ROW_FILE_PAD);
            self.rdata.set_size(offset + self.chunk_bytes())?;
            self.rdata
                .write_bytes(offset + self.row_chunk_size * 8, &last_chunk.to_be_bytes())?;
            last_chunk = offset;
        }

        self.rdata.write_bytes(
            last_chunk + (count % self.row_chunk_size) * 8,
            &row_id.to_be_bytes(),
        )?;

        if let Some(occupied) = &mut self.occupied {
            occupied.insert(key);
        }
        self.write_slot(key_at, count + 1, last_chunk)
    }

    /// Number of row ids stored for `key` in the current view.
    pub fn get_value_count(&mut self, key: i32) -> crate::Result<u64> {
        let key = self.check_key(key)?;
        if self.block_offset == 0 {
            return Ok(0);
        }
        Ok(self.read_slot(key)?.0)
    }

    /// Whether the key has any rows.
    pub fn contains(&mut self, key: i32) -> crate::Result<bool> {
        Ok(self.get_value_count(key)? > 0)
    }

    /// Rebuilds (if stale) and returns the cached chunk chain of a key,
    /// ordered head to tail.
    fn chain(&mut self, key: i32) -> crate::Result<&[u64]> {
        let key_at = self.check_key(key)?;
        let (count, last_chunk) = self.read_slot(key_at)?;
        #[allow(clippy::cast_possible_truncation)]
        let total = count.div_ceil(self.row_chunk_size) as usize;

        let rebuild = match &self.cursor {
            Some(c) => c.key != key || c.chunks.len() != total,
            None => true,
        };

        if rebuild {
            let mut chunks = vec![0u64; total];
            let mut at = last_chunk;
            for slot in chunks.iter_mut().rev() {
                *slot = at;
                let prev = self.rdata.slice(at + self.row_chunk_size * 8, 8)?;
                at = BigEndian::read_u64(prev);
            }
            self.cursor = Some(Cursor { key, chunks });
        }

        Ok(self.cursor.as_ref().map_or(&[], |c| &c.chunks))
    }

    /// Reads the `i`-th row id for a key; `i` is zero-based in insertion
    /// order. Amortized O(1) for sequential scans via the cached chain.
    pub fn get_value_quick(&mut self, key: i32, i: u64) -> crate::Result<u64> {
        if self.block_offset == 0 {
            return Err(crate::Error::Unrecoverable);
        }
        let chunk_size = self.row_chunk_size;

        #[allow(clippy::cast_possible_truncation)]
        let chunk = self
            .chain(key)?
            .get((i / chunk_size) as usize)
            .copied()
            .ok_or(crate::Error::Unrecoverable)?;

        let cell = self.rdata.slice(chunk + (i % chunk_size) * 8, 8)?;
        Ok(BigEndian::read_u64(cell))
    }

    /// Collects every row id of a key, in insertion order.
    pub fn get_values(&mut self, key: i32, out: &mut Vec<u64>) -> crate::Result<()> {
        out.clear();
        let count = self.get_value_count(key)?;
        for i in 0..count {
            out.push(self.get_value_quick(key, i)?);
        }
        Ok(())
    }

    /// Publishes the current block: records the row-file append offset,
    /// repoints the header, flushes, and freezes the block.
    pub fn commit(&mut self) -> crate::Result<()> {
        if !self.block_shared {
            let row_size = self.rdata.size();
            self.kdata
                .write_bytes(self.block_offset, &row_size.to_be_bytes())?;
            let block = self.block_offset;
            self.kdata.write_bytes(16, &block.to_be_bytes())?;
        }

        self.rdata.commit()?;
        self.kdata.commit()?;
        self.block_shared = true;
        Ok(())
    }

    /// Opaque snapshot of the state after the last [`Self::commit`].
    #[must_use]
    pub fn tx_address(&self) -> u64 {
        self.block_offset
    }

    /// Repositions the view onto the most recently committed block, as
    /// recorded in the key file header.
    ///
    /// Used by readers whose visibility is clamped elsewhere (symbol
    /// tables); column indexes are positioned through tx addresses instead.
    pub fn refresh_from_header(&mut self) -> crate::Result<()> {
        let size = self.kdata.refresh_size()?;
        if size < HEADER_BYTES {
            return Ok(());
        }
        let pointer = self.kdata.slice(16, 8)?;
        let offset = BigEndian::read_u64(pointer);
        if offset >= HEADER_BYTES && offset + self.block_bytes() <= size {
            self.set_tx_address(offset);
        }
        Ok(())
    }

    /// Repositions the view onto a previously committed block.
    pub fn set_tx_address(&mut self, address: u64) {
        if address != 0 && address != self.block_offset {
            self.block_offset = address;
            self.cursor = None;
            self.occupied = None;
        }
        self.block_shared = true;
    }

    /// Writer-side crash recovery: reposition on `address` and physically
    /// drop everything written after it.
    pub fn recover_to(&mut self, address: u64) -> crate::Result<()> {
        if address == 0 {
            return Ok(());
        }
        self.block_offset = address;
        self.cursor = None;
        self.occupied = None;

        let row_size = {
            let prefix = self.kdata.slice(address, 8)?;
            BigEndian::read_u64(prefix)
        };

        self.kdata.truncate(address + self.block_bytes())?;
        self.kdata.write_bytes(16, &address.to_be_bytes())?;
        self.rdata.truncate(row_size.max(ROW_FILE_PAD))?;
        self.block_shared = true;
        Ok(())
    }

    /// Builds the populated-key set by scanning the current block once;
    /// after that `add` and `truncate` keep it current.
    fn ensure_occupied(&mut self) -> crate::Result<()> {
        if self.occupied.is_some() {
            return Ok(());
        }

        let mut occupied = FxHashSet::default();
        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        for key in 0..self.key_space as i32 {
            if self.read_slot(u64::from(key.unsigned_abs()))?.0 > 0 {
                occupied.insert(key);
            }
        }
        self.occupied = Some(occupied);
        Ok(())
    }

    /// Drops every `(key, row_id)` pair with `row_id >= row_count`.
    ///
    /// Walks only the keys that actually hold entries; a block that loses
    /// nothing is not copied, so repeated clamps do not grow the key file.
    pub fn truncate(&mut self, row_count: u64) -> crate::Result<()> {
        if self.block_offset == 0 {
            return Ok(());
        }
        self.ensure_occupied()?;

        let keys: Vec<i32> = self
            .occupied
            .as_ref()
            .map_or_else(Vec::new, |set| set.iter().copied().collect());

        let mut clamped = Vec::new();
        for key in keys {
            let key_at = u64::from(key.unsigned_abs());
            let (stored, _) = self.read_slot(key_at)?;
            let mut count = stored;

            // Row ids per key ascend, so only the tail can exceed the cap
            while count > 0 && self.get_value_quick(key, count - 1)? >= row_count {
                count -= 1;
            }
            if count == stored {
                continue;
            }

            let last_chunk = if count == 0 {
                0
            } else {
                let chunk_size = self.row_chunk_size;
                #[allow(clippy::cast_possible_truncation)]
                self.chain(key)?
                    .get(((count - 1) / chunk_size) as usize)
                    .copied()
                    .ok_or(crate::Error::Unrecoverable)?
            };
            clamped.push((key, key_at, count, last_chunk));
        }

        if clamped.is_empty() {
            return Ok(());
        }

        self.ensure_private_block()?;
        for (key, key_at, count, last_chunk) in clamped {
            self.write_slot(key_at, count, last_chunk)?;
            if count == 0 {
                if let Some(occupied) = &mut self.occupied {
                    occupied.remove(&key);
                }
            }
        }

        self.cursor = None;
        Ok(())
    }

    /// Flushes and fsyncs both files.
    pub fn force(&mut self) -> crate::Result<()> {
        self.rdata.force()?;
        self.kdata.force()
    }

    /// Trims unused physical tails.
    pub fn compact(&mut self) -> crate::Result<()> {
        self.rdata.compact()?;
        self.kdata.compact()
    }

    /// Flushes and unmaps both files.
    pub fn close(self) -> crate::Result<()> {
        self.rdata.close()?;
        self.kdata.close()
    }
}
