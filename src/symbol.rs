// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    column::{variable::VariableColumn, ColumnOps},
    file,
    hash::bounded_hash,
    index::KvIndex,
    memory::bit_hint_for,
};
use rustc_hash::FxHashMap;
use std::path::Path;

/// Symbol key of a null value
pub const VALUE_IS_NULL: i32 = -1;

/// Transient sentinel for lookups that did not match
pub const VALUE_NOT_FOUND: i32 = -2;

/// A dense string dictionary: every distinct string gets a stable integer
/// key in `[0, n)`, in insertion order.
///
/// Backed by a variable column holding the distinct strings and an
/// inverted index from a bounded string hash to the keys carrying that
/// hash. Shared by all partitions of its column; grows monotonically and
/// only shrinks under a journal-wide truncate.
pub struct SymbolTable {
    strings: VariableColumn,
    index: KvIndex,
    cache: FxHashMap<String, i32>,
    hash_mask: u64,
    visible: Option<u64>,
}

impl SymbolTable {
    /// Opens the four symbol files of `column_name` inside the journal
    /// directory.
    pub fn open(
        directory: &Path,
        column_name: &str,
        distinct_count_hint: u64,
        avg_size: u64,
        writable: bool,
    ) -> crate::Result<Self> {
        debug_assert!(distinct_count_hint.is_power_of_two());

        let data_hint = bit_hint_for(avg_size * 2 + 4, distinct_count_hint);
        let offsets_hint = bit_hint_for(8, distinct_count_hint);

        let strings = VariableColumn::open(
            &directory.join(format!("{column_name}.{}", file::SYM_DATA_EXT)),
            &directory.join(format!("{column_name}.{}", file::SYM_OFFSETS_EXT)),
            data_hint,
            offsets_hint,
            false,
            writable,
        )?;

        let index = KvIndex::open(
            &directory.join(format!("{column_name}.{}", file::SYM_INDEX_KEY_EXT)),
            &directory.join(format!("{column_name}.{}", file::SYM_INDEX_ROW_EXT)),
            distinct_count_hint,
            distinct_count_hint,
            offsets_hint,
            offsets_hint,
            writable,
        )?;

        Ok(Self {
            strings,
            index,
            cache: FxHashMap::default(),
            hash_mask: distinct_count_hint - 1,
            visible: None,
        })
    }

    /// Number of distinct strings in the current view.
    pub fn size(&self) -> u64 {
        self.visible.unwrap_or_else(|| self.strings.size())
    }

    /// Resolves a string to its key, adding it if unseen. Idempotent.
    pub fn put(&mut self, value: Option<&str>) -> crate::Result<i32> {
        let Some(value) = value else {
            return Ok(VALUE_IS_NULL);
        };

        if let Some(&key) = self.cache.get(value) {
            return Ok(key);
        }

        let key = self.lookup(value)?;
        if key != VALUE_NOT_FOUND {
            self.cache.insert(value.to_owned(), key);
            return Ok(key);
        }

        let row = self.strings.put_str(value)?;
        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        let key = row as i32;
        self.index.add(bounded_hash(value, self.hash_mask), row)?;
        self.cache.insert(value.to_owned(), key);
        log::trace!("symbol {value:?} -> {key}");
        Ok(key)
    }

    /// Resolves a string to its key without inserting;
    /// [`VALUE_NOT_FOUND`] when absent.
    pub fn get(&mut self, value: &str) -> crate::Result<i32> {
        if let Some(&key) = self.cache.get(value) {
            #[allow(clippy::cast_sign_loss)]
            if self.visible.is_none() || (key as u64) < self.size() {
                return Ok(key);
            }
            return Ok(VALUE_NOT_FOUND);
        }
        self.lookup(value)
    }

    /// Scans the hash bucket newest to oldest, comparing content.
    fn lookup(&mut self, value: &str) -> crate::Result<i32> {
        let bucket = bounded_hash(value, self.hash_mask);
        let count = self.index.get_value_count(bucket)?;
        let limit = self.size();

        for i in (0..count).rev() {
            let row = self.index.get_value_quick(bucket, i)?;
            if row >= limit {
                continue;
            }
            if self.strings.str_eq(row, value)? {
                #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
                return Ok(row as i32);
            }
        }
        Ok(VALUE_NOT_FOUND)
    }

    /// Resolves a key back to its string; `None` for [`VALUE_IS_NULL`].
    pub fn value(&mut self, key: i32) -> crate::Result<Option<String>> {
        if key == VALUE_IS_NULL {
            return Ok(None);
        }
        #[allow(clippy::cast_sign_loss)]
        let row = key as u64;
        if key < 0 || row >= self.size() {
            return Err(crate::Error::Unrecoverable);
        }
        self.strings.get_str(row)
    }

    /// Flushes both backing stores.
    pub fn commit(&mut self) -> crate::Result<()> {
        self.strings.commit()?;
        self.index.commit()
    }

    /// Flushes and fsyncs both backing stores.
    pub fn force(&mut self) -> crate::Result<()> {
        self.strings.force()?;
        self.index.force()
    }

    /// Reader-side visibility clamp from the last observed transaction.
    ///
    /// Also repositions the hash index onto its latest committed block so
    /// newly published strings resolve; the clamp keeps anything committed
    /// after `size` invisible.
    pub fn apply_size(&mut self, size: u64) -> crate::Result<()> {
        self.visible = Some(size);
        self.index.refresh_from_header()
    }

    /// Drops every key at and past `size`. Writer-side.
    pub fn truncate(&mut self, size: u64) -> crate::Result<()> {
        self.strings.truncate(size)?;
        self.index.truncate(size)?;
        self.cache.retain(|_, key| u64::from(key.unsigned_abs()) < size);
        Ok(())
    }

    /// Flushes and unmaps.
    pub fn close(self) -> crate::Result<()> {
        self.strings.close()?;
        self.index.close()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use test_log::test;

    fn open_temp() -> (tempfile::TempDir, SymbolTable) {
        let dir = tempfile::tempdir().unwrap();
        let table = SymbolTable::open(dir.path(), "sym", 128, 8, true).unwrap();
        (dir, table)
    }

    #[test]
    fn put_is_idempotent() -> crate::Result<()> {
        let (_dir, mut table) = open_temp();

        let a = table.put(Some("AAA"))?;
        let b = table.put(Some("BBB"))?;
        let a2 = table.put(Some("AAA"))?;

        assert_eq!(a, a2);
        assert_ne!(a, b);
        assert_eq!(2, table.size());

        assert_eq!(Some("AAA".to_owned()), table.value(a)?);
        assert_eq!(Some("BBB".to_owned()), table.value(b)?);
        Ok(())
    }

    #[test]
    fn null_symbol() -> crate::Result<()> {
        let (_dir, mut table) = open_temp();
        assert_eq!(VALUE_IS_NULL, table.put(None)?);
        assert_eq!(None, table.value(VALUE_IS_NULL)?);
        assert_eq!(0, table.size());
        Ok(())
    }

    #[test]
    fn get_does_not_insert() -> crate::Result<()> {
        let (_dir, mut table) = open_temp();
        assert_eq!(VALUE_NOT_FOUND, table.get("nope")?);
        assert_eq!(0, table.size());

        table.put(Some("yes"))?;
        assert!(table.get("yes")? >= 0);
        Ok(())
    }

    #[test]
    fn survives_reopen_without_cache() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;

        let (a, b) = {
            let mut table = SymbolTable::open(dir.path(), "sym", 128, 8, true)?;
            let a = table.put(Some("first"))?;
            let b = table.put(Some("second"))?;
            table.commit()?;
            table.close()?;
            (a, b)
        };

        let mut table = SymbolTable::open(dir.path(), "sym", 128, 8, true)?;
        assert_eq!(a, table.put(Some("first"))?);
        assert_eq!(b, table.put(Some("second"))?);
        assert_eq!(2, table.size());
        Ok(())
    }

    #[test]
    fn visibility_clamp_hides_new_keys() -> crate::Result<()> {
        let (_dir, mut table) = open_temp();

        table.put(Some("one"))?;
        table.put(Some("two"))?;
        table.commit()?;
        table.apply_size(1)?;

        assert_eq!(1, table.size());
        assert_eq!(VALUE_NOT_FOUND, table.get("two")?);
        assert!(table.value(1).is_err());
        Ok(())
    }

    #[test]
    fn truncate_forgets_symbols() -> crate::Result<()> {
        let (_dir, mut table) = open_temp();

        table.put(Some("one"))?;
        table.put(Some("two"))?;
        table.truncate(1)?;

        assert_eq!(1, table.size());
        assert_eq!(VALUE_NOT_FOUND, table.get("two")?);

        // re-adding takes the freed key
        assert_eq!(1, table.put(Some("three"))?);
        Ok(())
    }

    #[test]
    fn many_symbols_with_collisions() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        // tiny key space forces bucket collisions
        let mut table = SymbolTable::open(dir.path(), "sym", 4, 8, true)?;

        for i in 0..200i32 {
            let key = table.put(Some(&format!("sym-{i}")))?;
            assert_eq!(i, key);
        }
        for i in (0..200i32).rev() {
            assert_eq!(Some(format!("sym-{i}")), table.value(i)?);
        }
        Ok(())
    }
}
