// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use memmap2::{Mmap, MmapMut, MmapOptions};
use std::{fs::File, path::Path};

/// A single mapped view over a byte range of a file.
///
/// This is the only module that touches `memmap2`'s unsafe constructors;
/// everything else addresses file bytes through [`crate::MemoryFile`].
pub enum MappedWindow {
    ReadOnly(Mmap),
    ReadWrite(MmapMut),
}

impl MappedWindow {
    /// Maps `len` bytes starting at `offset`.
    ///
    /// `offset` must be page-aligned; [`crate::MemoryFile`] guarantees this
    /// by only mapping power-of-two aligned windows.
    #[expect(
        unsafe_code,
        reason = "the one place the engine calls memmap2's unsafe constructors"
    )]
    pub fn map(
        file: &File,
        path: &Path,
        offset: u64,
        len: u64,
        writable: bool,
    ) -> crate::Result<Self> {
        let mut opts = MmapOptions::new();
        #[allow(clippy::cast_possible_truncation)]
        opts.offset(offset).len(len as usize);

        // SAFETY: the mapping is over a file this engine owns exclusively
        // (writer) or reads through published, committed offsets only
        // (reader); no window outlives its MemoryFile.
        let mapped = if writable {
            unsafe { opts.map_mut(file) }.map(Self::ReadWrite)
        } else {
            unsafe { opts.map(file) }.map(Self::ReadOnly)
        };

        mapped.map_err(|e| {
            log::warn!("mmap of {path:?} [{offset}..+{len}] failed: {e}");
            crate::Error::Mapping {
                path: path.into(),
                offset,
                len,
            }
        })
    }

    pub fn bytes(&self) -> &[u8] {
        match self {
            Self::ReadOnly(map) => map,
            Self::ReadWrite(map) => map,
        }
    }

    /// Mutable view; `None` for read-only mappings.
    pub fn bytes_mut(&mut self) -> Option<&mut [u8]> {
        match self {
            Self::ReadOnly(_) => None,
            Self::ReadWrite(map) => Some(map),
        }
    }

    /// Schedules dirty pages for writeback without blocking.
    pub fn flush_async(&self) -> std::io::Result<()> {
        match self {
            Self::ReadOnly(_) => Ok(()),
            Self::ReadWrite(map) => map.flush_async(),
        }
    }

    /// Synchronously writes dirty pages back.
    pub fn flush(&self) -> std::io::Result<()> {
        match self {
            Self::ReadOnly(_) => Ok(()),
            Self::ReadWrite(map) => map.flush(),
        }
    }
}
