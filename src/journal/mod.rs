// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The journal: an ordered collection of time-range partitions.

pub mod writer;

use crate::{
    column::fixed::BsearchEdge,
    error::ConfigError,
    file,
    interval::Interval,
    meta::JournalMeta,
    partition::Partition,
    record::{Record, RecordCodec},
    rows,
    symbol::SymbolTable,
    tx::{Tx, TxLog},
    JournalConfig,
};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

/// A read view over a journal directory.
///
/// Any number of readers may coexist with the single writer; each reader
/// owns its mappings and sees exactly the data of the last transaction it
/// observed through [`Self::refresh`].
pub struct Journal {
    pub(crate) meta: Arc<JournalMeta>,
    pub(crate) location: PathBuf,
    pub(crate) partitions: Vec<Partition>,
    pub(crate) symbols: Vec<Option<SymbolTable>>,
    pub(crate) tx_log: TxLog,
    pub(crate) tx: Tx,
    inactive: Vec<bool>,
    writable: bool,
}

/// Two schemas describe the same journal if their externally visible
/// shape matches; size hints may differ between openers.
fn check_compat(stored: &JournalMeta, supplied: &JournalMeta) -> crate::Result<()> {
    if stored.columns.len() != supplied.columns.len()
        || stored
            .columns
            .iter()
            .zip(&supplied.columns)
            .any(|(a, b)| a.name != b.name || a.kind != b.kind || a.indexed != b.indexed)
    {
        return Err(ConfigError::MetaMismatch("column list differs").into());
    }
    if stored.partition_type != supplied.partition_type {
        return Err(ConfigError::MetaMismatch("partition type differs").into());
    }
    if stored.timestamp_column != supplied.timestamp_column {
        return Err(ConfigError::MetaMismatch("timestamp column differs").into());
    }
    if stored.key_column != supplied.key_column {
        return Err(ConfigError::MetaMismatch("key column differs").into());
    }
    Ok(())
}

impl Journal {
    /// Opens a read view; the journal must have been created by a writer.
    pub(crate) fn open_reader(config: JournalConfig) -> crate::Result<Self> {
        let stored = JournalMeta::read_from(config.path())?;
        if config.has_columns() {
            check_compat(&stored, &config.build_meta()?)?;
        }

        let mut journal = Self::open_with(stored, config.path().into(), false)?;
        journal.apply_current_tx()?;
        Ok(journal)
    }

    /// Shared plumbing of readers and the writer.
    pub(crate) fn open_with(
        meta: JournalMeta,
        location: PathBuf,
        writable: bool,
    ) -> crate::Result<Self> {
        let meta = Arc::new(meta);

        let mut symbols: Vec<Option<SymbolTable>> = Vec::with_capacity(meta.columns.len());
        for column in &meta.columns {
            symbols.push(if column.kind == crate::ColumnType::Symbol {
                Some(SymbolTable::open(
                    &location,
                    &column.name,
                    column.distinct_count_hint,
                    column.avg_size,
                    writable,
                )?)
            } else {
                None
            });
        }

        let tx_log = TxLog::open(&location.join(file::TX_FILE), writable)?;
        let tx = tx_log
            .last()
            .cloned()
            .unwrap_or_else(|| Tx::genesis(meta.key_hash(), meta.symbol_columns().count()));

        let inactive = vec![false; meta.columns.len()];
        let journal = Self {
            meta,
            location,
            partitions: Vec::new(),
            symbols,
            tx_log,
            tx,
            inactive,
            writable,
        };
        journal.check_key_hash()?;
        Ok(journal)
    }

    fn check_key_hash(&self) -> crate::Result<()> {
        if self.tx.key_hash != self.meta.key_hash() {
            return Err(ConfigError::MetaMismatch("key column changed").into());
        }
        Ok(())
    }

    /// The journal's schema.
    #[must_use]
    pub fn meta(&self) -> &JournalMeta {
        &self.meta
    }

    /// The journal directory.
    #[must_use]
    pub fn location(&self) -> &Path {
        &self.location
    }

    /// Number of visible partitions.
    #[must_use]
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Number of partitions the transaction `tx` makes visible.
    pub(crate) fn visible_partitions(tx: &Tx) -> usize {
        if tx.max_row_id == 0 && tx.last_partition_ts == i64::MIN {
            0
        } else {
            tx.last_partition_index() + 1
        }
    }

    /// Spreads the tx record's dense index-address array over the full
    /// column list.
    pub(crate) fn per_column_addresses(&self, tx: &Tx) -> Vec<Option<u64>> {
        let mut addresses = vec![None; self.meta.columns.len()];
        for (slot, address) in self.meta.indexed_columns().zip(&tx.index_addresses) {
            if let Some(entry) = addresses.get_mut(slot) {
                *entry = Some(*address);
            }
        }
        addresses
    }

    /// Partition directories on disk, sorted by interval start.
    pub(crate) fn scan_partition_dirs(&self) -> crate::Result<Vec<(Interval, bool, PathBuf)>> {
        let mut found = Vec::new();

        for entry in std::fs::read_dir(&self.location)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some((interval, lag)) =
                Interval::parse_dir_name(&name, self.meta.partition_type)
            {
                found.push((interval, lag, entry.path()));
            }
        }

        found.sort_by_key(|(interval, lag, _)| (*interval, *lag));
        Ok(found)
    }

    /// Re-reads the tx log tail; `true` if a newer transaction became
    /// visible.
    pub fn refresh(&mut self) -> crate::Result<bool> {
        let advanced = self.tx_log.refresh()?;
        if advanced {
            if let Some(tx) = self.tx_log.last() {
                self.tx = tx.clone();
            }
            self.check_key_hash()?;
            self.apply_current_tx()?;
        }
        Ok(advanced)
    }

    /// Reconciles partitions and symbol visibility with `self.tx`.
    pub(crate) fn apply_current_tx(&mut self) -> crate::Result<()> {
        if !self.writable {
            let sizes = self.tx.symbol_sizes.clone();
            let columns: Vec<usize> = self.meta.symbol_columns().collect();
            for (column, size) in columns.into_iter().zip(sizes) {
                if let Some(table) = self.symbols.get_mut(column).and_then(Option::as_mut) {
                    table.apply_size(size)?;
                }
            }
        }

        let visible = Self::visible_partitions(&self.tx);

        // Materialize partitions that appeared since the last refresh
        if self.partitions.len() < visible {
            let found = self.scan_partition_dirs()?;
            let intervals: Vec<Interval> = found
                .into_iter()
                .filter(|(_, lag, _)| !lag)
                .map(|(interval, _, _)| interval)
                .collect();

            for index in self.partitions.len()..visible {
                let interval = intervals.get(index).copied().ok_or_else(|| {
                    log::warn!(
                        "{:?}: tx #{} names {visible} partitions but only {} exist",
                        self.location,
                        self.tx.tx_number,
                        intervals.len()
                    );
                    crate::Error::TxCorruption
                })?;
                self.partitions.push(Partition::new(
                    Arc::clone(&self.meta),
                    &self.location,
                    interval,
                    index,
                    false,
                    self.writable,
                )?);
            }
        }

        // Readers drop partitions a truncate made invisible
        while self.partitions.len() > visible {
            if let Some(mut partition) = self.partitions.pop() {
                partition.close()?;
            }
        }

        let addresses = self.per_column_addresses(&self.tx);
        let row_count = self.tx.last_partition_row_count();
        let last = visible.checked_sub(1);

        for (index, partition) in self.partitions.iter_mut().enumerate() {
            if Some(index) == last {
                partition.apply_tx(Some(row_count), &addresses)?;
            } else {
                partition.apply_tx(None, &[])?;
            }
        }
        Ok(())
    }

    /// Sum of the visible partition sizes.
    pub fn size(&mut self) -> crate::Result<u64> {
        let mut total = 0;
        for index in 0..self.partitions.len() {
            total += self.partition_size(index)?;
        }
        Ok(total)
    }

    pub(crate) fn partition_size(&mut self, index: usize) -> crate::Result<u64> {
        self.partitions
            .get_mut(index)
            .map_or(Ok(0), Partition::size)
    }

    /// Access to one partition, optionally forcing its files open.
    pub fn partition(&mut self, index: usize, open: bool) -> crate::Result<&mut Partition> {
        let partition = self
            .partitions
            .get_mut(index)
            .ok_or(crate::Error::ClosedPartition)?;
        if open {
            partition.open()?;
        }
        Ok(partition)
    }

    /// The newest partition, if any.
    pub fn last_partition(&mut self) -> Option<&mut Partition> {
        self.partitions.last_mut()
    }

    /// Restricts reads to the named columns; others stay untouched in the
    /// destination record.
    pub fn select(&mut self, columns: &[&str]) -> crate::Result<()> {
        let mut inactive = vec![true; self.meta.columns.len()];
        for name in columns {
            let index = self
                .meta
                .column_index(name)
                .ok_or_else(|| ConfigError::UnknownColumn((*name).to_owned()))?;
            if let Some(slot) = inactive.get_mut(index) {
                *slot = false;
            }
        }
        self.inactive = inactive;
        Ok(())
    }

    /// Clears a previous [`Self::select`].
    pub fn select_all(&mut self) {
        self.inactive = vec![false; self.meta.columns.len()];
    }

    /// The symbol table of a SYMBOL column.
    pub fn symbol_table(&mut self, column: &str) -> Option<&mut SymbolTable> {
        let index = self.meta.column_index(column)?;
        self.symbols.get_mut(index).and_then(Option::as_mut)
    }

    /// Copies one row into `codec` by global row id.
    pub fn read_into<R: RecordCodec>(&mut self, row_id: u64, codec: &mut R) -> crate::Result<()> {
        self.read_local_into(rows::partition_index(row_id), rows::local_row_id(row_id), codec)
    }

    pub(crate) fn read_local_into<R: RecordCodec>(
        &mut self,
        partition_index: usize,
        local_row_id: u64,
        codec: &mut R,
    ) -> crate::Result<()> {
        let partition = self
            .partitions
            .get_mut(partition_index)
            .ok_or(crate::Error::ClosedPartition)?;
        partition.read(local_row_id, codec, &mut self.symbols, &self.inactive)
    }

    /// Reads one row into a fresh [`Record`].
    pub fn read_record(&mut self, row_id: u64) -> crate::Result<Record> {
        let mut record = Record::new(self.meta.columns.len());
        self.read_into(row_id, &mut record)?;
        Ok(record)
    }

    /// Iterates over all visible rows in journal order.
    pub fn iter(&mut self) -> Rows<'_> {
        Rows {
            journal: self,
            partition: 0,
            row: 0,
        }
    }

    /// Like [`Self::iter`], but reusing one record allocation.
    pub fn buffered_iter(&mut self) -> BufferedRows<'_> {
        let record = Record::new(self.meta.columns.len());
        BufferedRows {
            journal: self,
            partition: 0,
            row: 0,
            record,
        }
    }

    /// Finds the global row id of the row matching `timestamp_ms` under
    /// the given edge rule.
    pub fn row_for_timestamp(
        &mut self,
        timestamp_ms: i64,
        edge: BsearchEdge,
    ) -> crate::Result<Option<u64>> {
        let count = self.partitions.len();

        let forward = matches!(edge, BsearchEdge::NewerOrSame | BsearchEdge::Newer);
        let indices: Vec<usize> = if forward {
            (0..count).collect()
        } else {
            (0..count).rev().collect()
        };

        for index in indices {
            let partition = self
                .partitions
                .get_mut(index)
                .ok_or(crate::Error::ClosedPartition)?;
            if let Some(local) = partition.bsearch_timestamp(timestamp_ms, edge)? {
                return Ok(Some(rows::to_row_id(index, local)));
            }
        }
        Ok(None)
    }

    /// Closes partitions idle longer than the journal's `open_file_ttl`.
    ///
    /// The writer's active (newest) partition is skipped; it is closed by
    /// the writer itself.
    pub fn sweep(&mut self) -> crate::Result<usize> {
        let ttl = self.meta.open_file_ttl_ms;
        let last = self.partitions.len().saturating_sub(1);
        let mut closed = 0;

        for (index, partition) in self.partitions.iter_mut().enumerate() {
            if self.writable && index == last {
                continue;
            }
            if partition.is_open() && partition.idle_ms() > ttl {
                partition.close()?;
                closed += 1;
            }
        }

        if closed > 0 {
            log::debug!("{:?}: swept {closed} idle partitions", self.location);
        }
        Ok(closed)
    }

    /// Closes every partition and symbol table.
    pub fn close(mut self) -> crate::Result<()> {
        for partition in &mut self.partitions {
            partition.close()?;
        }
        for table in self.symbols.drain(..).flatten() {
            table.close()?;
        }
        Ok(())
    }
}

/// Forward iterator over all visible rows
pub struct Rows<'a> {
    journal: &'a mut Journal,
    partition: usize,
    row: u64,
}

impl Iterator for Rows<'_> {
    type Item = crate::Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.partition >= self.journal.partition_count() {
                return None;
            }
            let size = fail_iter!(self.journal.partition_size(self.partition));
            if self.row < size {
                let mut record = Record::new(self.journal.meta.columns.len());
                fail_iter!(self
                    .journal
                    .read_local_into(self.partition, self.row, &mut record));
                self.row += 1;
                return Some(Ok(record));
            }
            self.partition += 1;
            self.row = 0;
        }
    }
}

/// Forward iteration that reuses a single [`Record`] buffer
pub struct BufferedRows<'a> {
    journal: &'a mut Journal,
    partition: usize,
    row: u64,
    record: Record,
}

impl BufferedRows<'_> {
    /// Advances to the next row; the borrow ends at the next call.
    pub fn next(&mut self) -> Option<crate::Result<&Record>> {
        loop {
            if self.partition >= self.journal.partition_count() {
                return None;
            }
            let size = fail_iter!(self.journal.partition_size(self.partition));
            if self.row < size {
                fail_iter!(self
                    .journal
                    .read_local_into(self.partition, self.row, &mut self.record));
                self.row += 1;
                return Some(Ok(&self.record));
            }
            self.partition += 1;
            self.row = 0;
        }
    }
}
