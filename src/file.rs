// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use std::{fs::File, io::Write, path::Path};

pub const META_FILE: &str = "_meta";
pub const TX_FILE: &str = "_tx";
pub const LOCK_FILE: &str = "lock.lock";

/// Column data file
pub const DATA_EXT: &str = "d";
/// Variable-column offsets file
pub const OFFSETS_EXT: &str = "i";
/// Inverted-index key file
pub const INDEX_KEY_EXT: &str = "k";
/// Inverted-index row file
pub const INDEX_ROW_EXT: &str = "r";

/// Symbol-table files live at the journal level
pub const SYM_DATA_EXT: &str = "symd";
pub const SYM_OFFSETS_EXT: &str = "symi";
pub const SYM_INDEX_KEY_EXT: &str = "symk";
pub const SYM_INDEX_ROW_EXT: &str = "symr";

/// Atomically rewrites a file.
pub fn rewrite_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    #[expect(clippy::expect_used, reason = "journal paths always have a parent")]
    let folder = path.parent().expect("should have a parent");

    let mut temp_file = tempfile::NamedTempFile::new_in(folder)?;
    temp_file.write_all(content)?;
    temp_file.flush()?;
    temp_file.as_file_mut().sync_all()?;
    temp_file.persist(path)?;

    // TODO: not sure why it fails on Windows...
    #[cfg(not(target_os = "windows"))]
    {
        let file = File::open(path)?;
        file.sync_all()?;
        fsync_directory(folder)?;
    }

    Ok(())
}

#[cfg(not(target_os = "windows"))]
pub fn fsync_directory(path: &Path) -> std::io::Result<()> {
    let file = File::open(path)?;
    debug_assert!(file.metadata()?.is_dir());
    file.sync_all()
}

#[cfg(target_os = "windows")]
pub fn fsync_directory(_path: &Path) -> std::io::Result<()> {
    // Cannot fsync directory on Windows
    Ok(())
}
