// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    column::{
        fixed::{BsearchEdge, FixedColumn},
        variable::VariableColumn,
        AnyColumn, ColumnOps, ColumnType,
    },
    file,
    hash::bounded_hash,
    index::KvIndex,
    interval::{Interval, LAG_SUFFIX},
    memory::bit_hint_for,
    meta::{ColumnMeta, JournalMeta},
    record::{RecordCodec, Value},
    symbol::{SymbolTable, VALUE_IS_NULL},
    time,
};
use std::{path::PathBuf, sync::Arc};

fn mismatch_for(column_meta: &ColumnMeta) -> crate::Error {
    crate::Error::TypeMismatch {
        column: column_meta.name.clone(),
        expected: column_meta.kind,
    }
}

/// One time range of a journal: a directory with one column per schema
/// column plus inverted-index files for indexed columns.
///
/// Partitions open lazily and close under TTL pressure; index tx addresses
/// survive a close so a reopened partition resumes the same visible view.
pub struct Partition {
    meta: Arc<JournalMeta>,
    path: PathBuf,
    interval: Interval,
    partition_index: usize,
    lag: bool,
    writable: bool,

    columns: Vec<AnyColumn>,
    indexes: Vec<Option<KvIndex>>,
    index_tx_addresses: Vec<Option<u64>>,

    tx_limit: Option<u64>,
    cached_size: Option<u64>,
    last_accessed_ms: u64,
    open: bool,
}

impl Partition {
    /// Sets a partition up without touching the filesystem; files open on
    /// first access.
    pub(crate) fn new(
        meta: Arc<JournalMeta>,
        journal_path: &std::path::Path,
        interval: Interval,
        partition_index: usize,
        lag: bool,
        writable: bool,
    ) -> crate::Result<Self> {
        let mut name = interval.dir_name(meta.partition_type)?;
        if lag {
            name.push_str(LAG_SUFFIX);
        }

        let column_count = meta.columns.len();
        Ok(Self {
            path: journal_path.join(name),
            meta,
            interval,
            partition_index,
            lag,
            writable,
            columns: Vec::new(),
            indexes: Vec::new(),
            index_tx_addresses: vec![None; column_count],
            tx_limit: None,
            cached_size: None,
            last_accessed_ms: time::unix_millis(),
            open: false,
        })
    }

    /// The partition's time range.
    #[must_use]
    pub fn interval(&self) -> &Interval {
        &self.interval
    }

    /// Position within the journal's partition list.
    #[must_use]
    pub fn partition_index(&self) -> usize {
        self.partition_index
    }

    /// Whether this is a lag partition.
    #[must_use]
    pub fn is_lag(&self) -> bool {
        self.lag
    }

    /// Whether column files are currently mapped.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Milliseconds since the partition was last touched.
    #[must_use]
    pub fn idle_ms(&self) -> u64 {
        time::unix_millis().saturating_sub(self.last_accessed_ms)
    }

    fn touch(&mut self) {
        self.last_accessed_ms = time::unix_millis();
    }

    /// Maps every column file and index of the partition.
    pub fn open(&mut self) -> crate::Result<()> {
        if self.open {
            return Ok(());
        }
        if self.writable {
            std::fs::create_dir_all(&self.path)?;
        }

        // A failed half-open leaves no mapped leftovers behind
        self.columns.clear();
        self.indexes.clear();

        let meta = Arc::clone(&self.meta);
        for column in &meta.columns {
            self.columns.push(self.open_column(&meta, column)?);
        }

        self.indexes = Vec::with_capacity(meta.columns.len());
        for (i, column) in meta.columns.iter().enumerate() {
            let index = if column.indexed {
                let mut index = self.open_index(&meta, column)?;
                if let Some(address) = self.index_tx_addresses.get(i).copied().flatten() {
                    index.set_tx_address(address);
                }
                Some(index)
            } else {
                None
            };
            self.indexes.push(index);
        }

        self.open = true;
        self.touch();
        log::debug!("opened partition {:?}", self.path);
        Ok(())
    }

    fn open_column(&self, meta: &JournalMeta, column: &ColumnMeta) -> crate::Result<AnyColumn> {
        let data_path = self.path.join(format!("{}.{}", column.name, file::DATA_EXT));
        let bit_hint = meta.data_bit_hint(column);

        Ok(match column.kind.fixed_size() {
            Some(width) => AnyColumn::Fixed(FixedColumn::open(
                &data_path,
                width,
                bit_hint,
                self.writable,
            )?),
            None => AnyColumn::Variable(VariableColumn::open(
                &data_path,
                &self
                    .path
                    .join(format!("{}.{}", column.name, file::OFFSETS_EXT)),
                bit_hint,
                meta.offsets_bit_hint(column),
                column.kind == ColumnType::Binary,
                self.writable,
            )?),
        })
    }

    fn open_index(&self, meta: &JournalMeta, column: &ColumnMeta) -> crate::Result<KvIndex> {
        let hint = bit_hint_for(16, column.distinct_count_hint.max(1));
        KvIndex::open(
            &self
                .path
                .join(format!("{}.{}", column.name, file::INDEX_KEY_EXT)),
            &self
                .path
                .join(format!("{}.{}", column.name, file::INDEX_ROW_EXT)),
            column.distinct_count_hint,
            meta.record_hint,
            hint,
            bit_hint_for(8, meta.record_hint),
            self.writable,
        )
    }

    /// Unmaps everything; index tx addresses survive for the next open.
    pub fn close(&mut self) -> crate::Result<()> {
        if !self.open {
            return Ok(());
        }

        for column in self.columns.drain(..) {
            column.close()?;
        }
        // Only a tx-positioned (reader-side active) view must resume at the
        // same address; sealed and writer-side partitions reopen on the key
        // file header, their latest committed state
        let save_addresses = self.tx_limit.is_some();
        for (i, index) in self.indexes.drain(..).enumerate() {
            if let Some(index) = index {
                if save_addresses {
                    if let Some(slot) = self.index_tx_addresses.get_mut(i) {
                        *slot = Some(index.tx_address());
                    }
                }
                index.close()?;
            }
        }

        self.open = false;
        log::debug!("closed partition {:?}", self.path);
        Ok(())
    }

    fn ensure_open(&mut self) -> crate::Result<()> {
        if self.open {
            self.touch();
            Ok(())
        } else {
            self.open()
        }
    }

    /// Visible row count: the tx limit when one is set, otherwise the last
    /// column's stored size.
    pub fn size(&mut self) -> crate::Result<u64> {
        if let Some(limit) = self.tx_limit {
            return Ok(limit);
        }
        if let Some(size) = self.cached_size {
            return Ok(size);
        }

        self.ensure_open()?;
        let size = self.columns.last().map_or(0, ColumnOps::size);
        self.cached_size = Some(size);
        Ok(size)
    }

    /// Applies a transaction's view: visible size and index tx addresses.
    ///
    /// `tx_limit == None` marks the partition sealed; its size then comes
    /// from the (final) column files.
    pub fn apply_tx(&mut self, tx_limit: Option<u64>, addresses: &[Option<u64>]) -> crate::Result<()> {
        let sealed = tx_limit.is_none() && self.tx_limit.is_some();

        if self.tx_limit != tx_limit {
            self.cached_size = None;
        }
        self.tx_limit = tx_limit;

        if tx_limit.is_none() {
            // Sealed: the index's own committed header is its final state
            for slot in &mut self.index_tx_addresses {
                *slot = None;
            }
        } else {
            for (i, slot) in self.index_tx_addresses.iter_mut().enumerate() {
                if let Some(address) = addresses.get(i).copied().flatten() {
                    *slot = Some(address);
                }
            }
            if self.open {
                for (i, index) in self.indexes.iter_mut().enumerate() {
                    if let (Some(index), Some(address)) =
                        (index.as_mut(), self.index_tx_addresses.get(i).copied().flatten())
                    {
                        index.set_tx_address(address);
                    }
                }
            }
        }

        if sealed {
            // The writer compacted this partition; remap to pick up the
            // final file lengths.
            self.close()?;
        }
        Ok(())
    }

    /// Appends one record, returning its local row id.
    ///
    /// On error the caller must roll the journal back to the last commit;
    /// the partition may hold a partially written row.
    pub fn append<R: RecordCodec>(
        &mut self,
        codec: &R,
        symbols: &mut [Option<SymbolTable>],
    ) -> crate::Result<u64> {
        self.ensure_open()?;
        let row = self.columns.last().map_or(0, ColumnOps::size);
        let meta = Arc::clone(&self.meta);

        for (i, column_meta) in meta.columns.iter().enumerate() {
            let value = codec.get(i);
            self.append_column(i, column_meta, value, row, symbols)?;
        }

        self.cached_size = None;
        Ok(row)
    }

    #[allow(clippy::too_many_lines)]
    fn append_column(
        &mut self,
        i: usize,
        column_meta: &ColumnMeta,
        value: Value,
        row: u64,
        symbols: &mut [Option<SymbolTable>],
    ) -> crate::Result<()> {
        let column = self
            .columns
            .get_mut(i)
            .ok_or(crate::Error::ClosedPartition)?;

        match column_meta.kind {
            ColumnType::Bool => {
                let v = match value {
                    Value::Bool(v) => v,
                    Value::Null => false,
                    _ => return Err(mismatch_for(column_meta)),
                };
                column.fixed_mut()?.put_bool(v)?;
            }
            ColumnType::Byte => {
                let v = match value {
                    Value::Byte(v) => v,
                    Value::Null => 0,
                    _ => return Err(mismatch_for(column_meta)),
                };
                column.fixed_mut()?.put_i8(v)?;
            }
            ColumnType::Short => {
                let v = match value {
                    Value::Short(v) => v,
                    Value::Null => 0,
                    _ => return Err(mismatch_for(column_meta)),
                };
                column.fixed_mut()?.put_i16(v)?;
            }
            ColumnType::Int => {
                let v = match value {
                    Value::Int(v) => v,
                    Value::Null => i32::MIN,
                    _ => return Err(mismatch_for(column_meta)),
                };
                column.fixed_mut()?.put_i32(v)?;

                if column_meta.indexed && v != i32::MIN {
                    let mask = column_meta.distinct_count_hint - 1;
                    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
                    let key = (i64::from(v) & i64::try_from(mask).unwrap_or(i64::MAX)) as i32;
                    self.index_mut(i)?.add(key, row)?;
                }
            }
            ColumnType::Long => {
                let v = match value {
                    Value::Long(v) => v,
                    Value::Null => i64::MIN,
                    _ => return Err(mismatch_for(column_meta)),
                };
                column.fixed_mut()?.put_i64(v)?;
            }
            ColumnType::Date => {
                let v = match value {
                    Value::Date(v) | Value::Long(v) => v,
                    Value::Null => i64::MIN,
                    _ => return Err(mismatch_for(column_meta)),
                };
                column.fixed_mut()?.put_i64(v)?;
            }
            ColumnType::Float => {
                let v = match value {
                    Value::Float(v) => v,
                    Value::Null => f32::NAN,
                    _ => return Err(mismatch_for(column_meta)),
                };
                column.fixed_mut()?.put_f32(v)?;
            }
            ColumnType::Double => {
                let v = match value {
                    Value::Double(v) => v,
                    Value::Null => f64::NAN,
                    _ => return Err(mismatch_for(column_meta)),
                };
                column.fixed_mut()?.put_f64(v)?;
            }
            ColumnType::String => {
                let text = match &value {
                    Value::Str(s) => Some(s.as_str()),
                    Value::Null => None,
                    _ => return Err(mismatch_for(column_meta)),
                };
                match text {
                    Some(s) => column.variable_mut()?.put_str(s)?,
                    None => column.variable_mut()?.put_null()?,
                };

                if column_meta.indexed {
                    let mask = column_meta.distinct_count_hint - 1;
                    let key = text.map_or(0, |s| bounded_hash(s, mask));
                    self.index_mut(i)?.add(key, row)?;
                }
            }
            ColumnType::Binary => {
                match &value {
                    Value::Bin(bytes) => column.variable_mut()?.put_bin(bytes)?,
                    Value::Null => column.variable_mut()?.put_null()?,
                    _ => return Err(mismatch_for(column_meta)),
                };
            }
            ColumnType::Symbol => {
                let text = match &value {
                    Value::Sym(s) | Value::Str(s) => Some(s.as_str()),
                    Value::Null => None,
                    _ => return Err(mismatch_for(column_meta)),
                };

                let key = symbols
                    .get_mut(i)
                    .and_then(Option::as_mut)
                    .ok_or(crate::Error::Unrecoverable)?
                    .put(text)?;

                let column = self
                    .columns
                    .get_mut(i)
                    .ok_or(crate::Error::ClosedPartition)?;
                column.fixed_mut()?.put_i32(key)?;

                if column_meta.indexed && key != VALUE_IS_NULL {
                    self.index_mut(i)?.add(key, row)?;
                }
            }
        }
        Ok(())
    }

    fn index_mut(&mut self, column_index: usize) -> crate::Result<&mut KvIndex> {
        self.indexes
            .get_mut(column_index)
            .and_then(Option::as_mut)
            .ok_or(crate::Error::Unrecoverable)
    }

    /// Direct access to a column's index for lookups.
    pub fn index(&mut self, column_index: usize) -> crate::Result<&mut KvIndex> {
        self.ensure_open()?;
        self.index_mut(column_index)
    }

    /// Copies one row into the destination record, skipping columns the
    /// caller marked inactive.
    pub fn read<R: RecordCodec>(
        &mut self,
        local_row_id: u64,
        codec: &mut R,
        symbols: &mut [Option<SymbolTable>],
        inactive: &[bool],
    ) -> crate::Result<()> {
        if local_row_id >= self.size()? {
            return Err(crate::Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!(
                    "row {local_row_id} is beyond the visible end of {:?}",
                    self.path
                ),
            )));
        }

        self.ensure_open()?;
        let meta = Arc::clone(&self.meta);

        for (i, column_meta) in meta.columns.iter().enumerate() {
            if inactive.get(i).copied().unwrap_or(false) {
                continue;
            }

            let column = self
                .columns
                .get_mut(i)
                .ok_or(crate::Error::ClosedPartition)?;

            let value = match column_meta.kind {
                ColumnType::Bool => Value::Bool(column.fixed_mut()?.get_bool(local_row_id)?),
                ColumnType::Byte => Value::Byte(column.fixed_mut()?.get_i8(local_row_id)?),
                ColumnType::Short => Value::Short(column.fixed_mut()?.get_i16(local_row_id)?),
                ColumnType::Int => Value::Int(column.fixed_mut()?.get_i32(local_row_id)?),
                ColumnType::Long => Value::Long(column.fixed_mut()?.get_i64(local_row_id)?),
                ColumnType::Float => Value::Float(column.fixed_mut()?.get_f32(local_row_id)?),
                ColumnType::Double => Value::Double(column.fixed_mut()?.get_f64(local_row_id)?),
                ColumnType::Date => Value::Date(column.fixed_mut()?.get_i64(local_row_id)?),
                ColumnType::String => column
                    .variable_mut()?
                    .get_str(local_row_id)?
                    .map_or(Value::Null, Value::Str),
                ColumnType::Binary => column
                    .variable_mut()?
                    .get_bin(local_row_id)?
                    .map_or(Value::Null, Value::Bin),
                ColumnType::Symbol => {
                    let key = column.fixed_mut()?.get_i32(local_row_id)?;
                    symbols
                        .get_mut(i)
                        .and_then(Option::as_mut)
                        .ok_or(crate::Error::Unrecoverable)?
                        .value(key)?
                        .map_or(Value::Null, Value::Sym)
                }
            };
            codec.set(i, value);
        }
        Ok(())
    }

    /// Binary search over the timestamp column.
    pub fn bsearch_timestamp(
        &mut self,
        value: i64,
        edge: BsearchEdge,
    ) -> crate::Result<Option<u64>> {
        let size = self.size()?;
        let Some(ts_column) = self.meta.timestamp_column else {
            return Ok(None);
        };

        self.ensure_open()?;
        self.columns
            .get_mut(ts_column)
            .ok_or(crate::Error::ClosedPartition)?
            .fixed_mut()?
            .bsearch_edge(value, edge, 0, size)
    }

    /// Reads the timestamp of one row.
    pub fn timestamp_at(&mut self, local_row_id: u64) -> crate::Result<i64> {
        let Some(ts_column) = self.meta.timestamp_column else {
            return Ok(i64::MIN);
        };
        self.ensure_open()?;
        self.columns
            .get_mut(ts_column)
            .ok_or(crate::Error::ClosedPartition)?
            .fixed_mut()?
            .get_i64(local_row_id)
    }

    /// Flushes columns first-to-last, then the indexes, so the partition
    /// size derived from the last column never runs ahead of earlier
    /// columns.
    pub fn commit(&mut self) -> crate::Result<()> {
        for column in &mut self.columns {
            column.commit()?;
        }
        for index in self.indexes.iter_mut().flatten() {
            index.commit()?;
        }
        Ok(())
    }

    /// Flushes and fsyncs everything.
    pub fn force(&mut self) -> crate::Result<()> {
        for column in &mut self.columns {
            column.force()?;
        }
        for index in self.indexes.iter_mut().flatten() {
            index.force()?;
        }
        Ok(())
    }

    /// Current tx addresses of the indexed columns, schema-ordered.
    pub fn index_tx_addresses(&self) -> Vec<u64> {
        self.meta
            .indexed_columns()
            .map(|i| {
                self.indexes
                    .get(i)
                    .and_then(Option::as_ref)
                    .map(KvIndex::tx_address)
                    .or_else(|| self.index_tx_addresses.get(i).copied().flatten())
                    .unwrap_or(0)
            })
            .collect()
    }

    /// Writer-side crash recovery: clamp columns to `row_count` and
    /// reposition indexes on their committed blocks.
    pub fn recover(&mut self, row_count: u64, addresses: &[Option<u64>]) -> crate::Result<()> {
        self.ensure_open()?;

        for column in &mut self.columns {
            column.truncate(row_count)?;
        }
        for (i, index) in self.indexes.iter_mut().enumerate() {
            if let Some(index) = index {
                if let Some(address) = addresses.get(i).copied().flatten() {
                    index.recover_to(address)?;
                }
                index.truncate(row_count)?;
            }
        }

        self.tx_limit = None;
        self.cached_size = None;
        Ok(())
    }

    /// Shrinks every column and index to `row_count` rows.
    pub fn truncate(&mut self, row_count: u64) -> crate::Result<()> {
        self.ensure_open()?;

        for column in &mut self.columns {
            column.truncate(row_count)?;
            column.commit()?;
        }
        for index in self.indexes.iter_mut().flatten() {
            index.truncate(row_count)?;
        }

        self.tx_limit = None;
        self.cached_size = None;
        log::debug!("truncated partition {:?} to {row_count} rows", self.path);
        Ok(())
    }

    /// Drops and rebuilds one column's index by rescanning the column.
    pub fn rebuild_index(&mut self, column_index: usize) -> crate::Result<()> {
        let meta = Arc::clone(&self.meta);
        let column_meta = meta
            .columns
            .get(column_index)
            .filter(|c| c.indexed)
            .ok_or(crate::Error::Unrecoverable)?;

        self.ensure_open()?;
        let size = self.columns.last().map_or(0, ColumnOps::size);

        if let Some(slot) = self.indexes.get_mut(column_index) {
            if let Some(index) = slot.take() {
                index.close()?;
            }
        }
        if let Some(slot) = self.index_tx_addresses.get_mut(column_index) {
            *slot = None;
        }

        for ext in [file::INDEX_KEY_EXT, file::INDEX_ROW_EXT] {
            let path = self.path.join(format!("{}.{ext}", column_meta.name));
            if path.exists() {
                std::fs::remove_file(path)?;
            }
        }

        let index = self.open_index(&meta, column_meta)?;
        if let Some(slot) = self.indexes.get_mut(column_index) {
            *slot = Some(index);
        }

        let mask = column_meta.distinct_count_hint - 1;
        for row in 0..size {
            let key = {
                let column = self
                    .columns
                    .get_mut(column_index)
                    .ok_or(crate::Error::ClosedPartition)?;

                match column_meta.kind {
                    ColumnType::Symbol => {
                        let key = column.fixed_mut()?.get_i32(row)?;
                        (key != VALUE_IS_NULL).then_some(key)
                    }
                    ColumnType::Int => {
                        let v = column.fixed_mut()?.get_i32(row)?;
                        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
                        (v != i32::MIN)
                            .then(|| (i64::from(v) & i64::try_from(mask).unwrap_or(i64::MAX)) as i32)
                    }
                    ColumnType::String => {
                        let column = column.variable_mut()?;
                        match column.get_str(row)? {
                            Some(s) => Some(bounded_hash(&s, mask)),
                            None => Some(0),
                        }
                    }
                    _ => None,
                }
            };

            if let Some(key) = key {
                self.index_mut(column_index)?.add(key, row)?;
            }
        }

        log::debug!(
            "rebuilt index of {:?} ({} rows)",
            column_meta.name,
            size
        );
        Ok(())
    }

    /// Trims every file's physical tail down to its logical size.
    pub fn compact(&mut self) -> crate::Result<()> {
        for column in &mut self.columns {
            column.compact()?;
        }
        for index in self.indexes.iter_mut().flatten() {
            index.compact()?;
        }
        Ok(())
    }

    /// Closes the partition and deletes its directory.
    pub fn delete(mut self) -> crate::Result<()> {
        self.close()?;
        if self.path.exists() {
            std::fs::remove_dir_all(&self.path)?;
        }
        log::debug!("deleted partition {:?}", self.path);
        Ok(())
    }
}
