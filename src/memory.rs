// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::mmap::MappedWindow;
use std::{
    fs::{File, OpenOptions},
    path::{Path, PathBuf},
};

/// Maximum number of concurrently mapped windows per file
const WINDOW_CACHE_SIZE: usize = 16;

/// Mapping offsets handed to the OS must be page-aligned
const PAGE_SIZE: u64 = 4_096;

pub const MIN_BIT_HINT: u8 = 17;
pub const MAX_BIT_HINT: u8 = 30;

/// Computes the mapping window size for a file expected to hold
/// `avg_size * count` bytes, clamped to `[2^17, 2^30]`.
#[must_use]
pub fn bit_hint_for(avg_size: u64, count: u64) -> u8 {
    let total = avg_size.saturating_mul(count).clamp(1, 1 << MAX_BIT_HINT);
    let bits = total.next_power_of_two().trailing_zeros();
    #[allow(clippy::cast_possible_truncation)]
    (bits as u8).clamp(MIN_BIT_HINT, MAX_BIT_HINT)
}

struct CachedWindow {
    start: u64,
    len: u64,
    window: MappedWindow,
    last_used: u64,
    dirty: bool,
}

impl CachedWindow {
    fn covers(&self, offset: u64, len: u64) -> bool {
        offset >= self.start && offset + len <= self.start + self.len
    }
}

/// A file presented as an addressable byte region through a bounded set of
/// fixed-size mapped windows.
///
/// The window size is `2^bit_hint` bytes; windows are mapped on demand and
/// recycled through a small LRU. The logical size (the append offset) can
/// run behind the physical file length, which only ever grows in multiples
/// of the window size; [`Self::compact`] and [`Self::truncate`] reconcile
/// the two.
pub struct MemoryFile {
    path: PathBuf,
    file: File,
    bit_hint: u8,
    writable: bool,
    size: u64,
    file_len: u64,
    windows: Vec<CachedWindow>,
    tick: u64,
}

impl MemoryFile {
    /// Opens (or, for writers, creates) the file at `path`.
    ///
    /// The logical size starts at the physical file length; writers that
    /// recover from a crash truncate it back to the last published size.
    pub fn open(path: &Path, bit_hint: u8, writable: bool) -> crate::Result<Self> {
        debug_assert!((MIN_BIT_HINT..=MAX_BIT_HINT).contains(&bit_hint));

        let file = OpenOptions::new()
            .read(true)
            .write(writable)
            .create(writable)
            .open(path)?;
        let file_len = file.metadata()?.len();

        log::trace!("opened {path:?}, len={file_len}, bit_hint={bit_hint}, writable={writable}");

        Ok(Self {
            path: path.into(),
            file,
            bit_hint,
            writable,
            size: file_len,
            file_len,
            windows: Vec::with_capacity(WINDOW_CACHE_SIZE),
            tick: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bit_hint(&self) -> u8 {
        self.bit_hint
    }

    fn window_size(&self) -> u64 {
        1 << self.bit_hint
    }

    /// Logical size (append offset) in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Reader-side: re-reads the physical length of a file another process
    /// keeps appending to. No-op for writers, which own the length.
    pub fn refresh_size(&mut self) -> crate::Result<u64> {
        if !self.writable {
            self.file_len = self.file.metadata()?.len();
            self.size = self.file_len;
        }
        Ok(self.size)
    }

    /// Advances the logical size, growing the physical file as needed.
    pub fn set_size(&mut self, size: u64) -> crate::Result<()> {
        if size > self.file_len {
            self.grow_to(size)?;
        }
        self.size = size;
        Ok(())
    }

    fn grow_to(&mut self, needed: u64) -> crate::Result<()> {
        debug_assert!(self.writable);
        let ws = self.window_size();
        let new_len = needed.div_ceil(ws) * ws;
        self.file.set_len(new_len)?;
        self.file_len = new_len;
        Ok(())
    }

    fn touch(&mut self, idx: usize) {
        self.tick += 1;
        if let Some(w) = self.windows.get_mut(idx) {
            w.last_used = self.tick;
        }
    }

    /// Finds or maps a window covering `[offset, offset + len)`.
    ///
    /// `len` must not exceed the window size.
    fn window_for(&mut self, offset: u64, len: u64, write: bool) -> crate::Result<usize> {
        let ws = self.window_size();
        if len > ws {
            return Err(crate::Error::WindowOverrun {
                requested: len,
                window: ws,
            });
        }

        if let Some(idx) = self.windows.iter().position(|w| w.covers(offset, len)) {
            self.touch(idx);
            return Ok(idx);
        }

        // An aligned window serves the request unless it straddles a
        // boundary, in which case a page-aligned bridge window does.
        let aligned_start = offset & !(ws - 1);
        let (start, mut map_len) = if offset + len <= aligned_start + ws {
            (aligned_start, ws)
        } else {
            let start = offset & !(PAGE_SIZE - 1);
            (start, offset + len - start)
        };

        if write {
            if offset + len > self.size {
                // Appends pre-size the file through set_size; direct writes
                // past the logical end still need physical room.
                self.grow_to(offset + len)?;
            } else if start + map_len > self.file_len {
                self.grow_to(start + map_len)?;
            }
        } else {
            if start + map_len > self.file_len {
                // The file may have grown behind our back (active writer)
                self.file_len = self.file.metadata()?.len();
            }
            map_len = map_len.min(self.file_len.saturating_sub(start));
            if offset + len > start + map_len {
                return Err(crate::Error::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!(
                        "read of {len} bytes at {offset} beyond end of {:?} ({})",
                        self.path, self.file_len
                    ),
                )));
            }
        }

        if self.windows.len() >= WINDOW_CACHE_SIZE {
            self.evict_lru()?;
        }

        log::trace!("mapping {:?} [{start}..+{map_len}]", self.path);
        let window = MappedWindow::map(&self.file, &self.path, start, map_len, self.writable)?;

        self.tick += 1;
        self.windows.push(CachedWindow {
            start,
            len: map_len,
            window,
            last_used: self.tick,
            dirty: false,
        });

        Ok(self.windows.len() - 1)
    }

    fn evict_lru(&mut self) -> crate::Result<()> {
        let Some(idx) = self
            .windows
            .iter()
            .enumerate()
            .min_by_key(|(_, w)| w.last_used)
            .map(|(i, _)| i)
        else {
            return Ok(());
        };

        let w = self.windows.swap_remove(idx);
        if w.dirty {
            w.window.flush_async()?;
        }
        Ok(())
    }

    /// Returns at least `len` contiguous bytes starting at `offset`.
    ///
    /// Fails with [`crate::Error::WindowOverrun`] if `len` exceeds the
    /// window size. The borrow ends at the next call taking `&mut self`.
    #[allow(clippy::indexing_slicing)]
    pub fn slice(&mut self, offset: u64, len: u64) -> crate::Result<&[u8]> {
        if len == 0 {
            return Ok(&[]);
        }
        let idx = self.window_for(offset, len, false)?;
        let w = &self.windows[idx];
        let at = (offset - w.start) as usize;
        #[allow(clippy::cast_possible_truncation)]
        Ok(&w.window.bytes()[at..at + len as usize])
    }

    /// Mutable counterpart of [`Self::slice`]; marks the window dirty.
    #[allow(clippy::indexing_slicing)]
    pub fn slice_mut(&mut self, offset: u64, len: u64) -> crate::Result<&mut [u8]> {
        if !self.writable {
            return Err(crate::Error::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                format!("{:?} is mapped read-only", self.path),
            )));
        }
        if len == 0 {
            return Ok(Default::default());
        }

        let idx = self.window_for(offset, len, true)?;
        let w = &mut self.windows[idx];
        w.dirty = true;
        let at = (offset - w.start) as usize;
        #[allow(clippy::cast_possible_truncation)]
        w.window
            .bytes_mut()
            .map(|b| &mut b[at..at + len as usize])
            .ok_or(crate::Error::Unrecoverable)
    }

    /// Copies `dst.len()` bytes starting at `offset`, window by window.
    ///
    /// Unlike [`Self::slice`] this handles runs of any length.
    pub fn read_bytes(&mut self, mut offset: u64, dst: &mut [u8]) -> crate::Result<()> {
        let ws = self.window_size();
        let mut at = 0;
        while at < dst.len() {
            let avail = ws - (offset & (ws - 1));
            #[allow(clippy::cast_possible_truncation)]
            let n = ((dst.len() - at) as u64).min(avail) as usize;
            let src = self.slice(offset, n as u64)?;
            #[allow(clippy::indexing_slicing)]
            dst[at..at + n].copy_from_slice(src);
            offset += n as u64;
            at += n;
        }
        Ok(())
    }

    /// Writes `src` starting at `offset`, window by window.
    pub fn write_bytes(&mut self, mut offset: u64, src: &[u8]) -> crate::Result<()> {
        let ws = self.window_size();
        let mut at = 0;
        while at < src.len() {
            let avail = ws - (offset & (ws - 1));
            #[allow(clippy::cast_possible_truncation)]
            let n = ((src.len() - at) as u64).min(avail) as usize;
            let dst = self.slice_mut(offset, n as u64)?;
            #[allow(clippy::indexing_slicing)]
            dst.copy_from_slice(&src[at..at + n]);
            offset += n as u64;
            at += n;
        }
        Ok(())
    }

    /// Appends `src` at the logical end, returning the write offset.
    pub fn append(&mut self, src: &[u8]) -> crate::Result<u64> {
        let offset = self.size;
        self.set_size(offset + src.len() as u64)?;
        self.write_bytes(offset, src)?;
        Ok(offset)
    }

    /// Flushes dirty windows without forcing an fsync.
    pub fn commit(&mut self) -> crate::Result<()> {
        for w in &mut self.windows {
            if w.dirty {
                w.window.flush_async()?;
                w.dirty = false;
            }
        }
        Ok(())
    }

    /// Flushes dirty windows and fsyncs the file.
    pub fn force(&mut self) -> crate::Result<()> {
        for w in &mut self.windows {
            if w.dirty {
                w.window.flush()?;
                w.dirty = false;
            }
        }
        self.file.sync_all()?;
        Ok(())
    }

    /// Shrinks the file to `size` bytes, unmapping windows past it.
    pub fn truncate(&mut self, size: u64) -> crate::Result<()> {
        debug_assert!(self.writable);
        self.drop_windows()?;
        self.file.set_len(size)?;
        self.file_len = size;
        self.size = size;
        Ok(())
    }

    /// Trims the physical file down to the logical size.
    pub fn compact(&mut self) -> crate::Result<()> {
        if self.writable && self.file_len > self.size {
            self.drop_windows()?;
            self.file.set_len(self.size)?;
            self.file_len = self.size;
        }
        Ok(())
    }

    fn drop_windows(&mut self) -> crate::Result<()> {
        for w in self.windows.drain(..) {
            if w.dirty {
                w.window.flush()?;
            }
        }
        Ok(())
    }

    /// Flushes and unmaps everything.
    pub fn close(mut self) -> crate::Result<()> {
        self.drop_windows()?;
        log::trace!("closed {:?}", self.path);
        Ok(())
    }
}
